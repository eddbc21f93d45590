//! Generated protobuf bindings.
//!
//! `onnx` carries the subset of the ONNX IR the engine reads and writes;
//! `graphport::v1` carries the remote-execution gRPC service.

pub mod onnx {
    tonic::include_proto!("onnx");
}

pub mod graphport {
    pub mod v1 {
        tonic::include_proto!("graphport.v1");
    }
}

pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("graphport_descriptor");
