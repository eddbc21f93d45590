//! Conversion between [`Graph`] and ONNX `ModelProto`.
//!
//! Execution-mode and offload settings travel as model `metadata_props`.
//! Tensors are always written as `raw_data`; on read, the typed repeated
//! fields are accepted as well.

use bytes::Bytes;
use graphport_proto::onnx as pb;
use pb::tensor_shape_proto::{dimension, Dimension};
use prost::Message;

use crate::{
    Attribute, DType, Error, Graph, Node, OpsetImport, Result, Shape, Tensor, ValueInfo,
    CUSTOM_DOMAIN,
};

pub const IR_VERSION: i64 = 8;
pub const DEFAULT_OPSET: i64 = 13;
const PRODUCER: &str = "graphport";

pub fn decode_model(bytes: &[u8]) -> Result<Graph> {
    let model = pb::ModelProto::decode(bytes).map_err(|e| Error::InvalidModel(e.to_string()))?;
    graph_from_model(&model)
}

pub fn encode_model(graph: &Graph) -> Vec<u8> {
    model_from_graph(graph).encode_to_vec()
}

pub fn save_model(graph: &Graph, path: impl AsRef<std::path::Path>) -> std::io::Result<()> {
    std::fs::write(path, encode_model(graph))
}

pub fn graph_from_model(model: &pb::ModelProto) -> Result<Graph> {
    let proto = model
        .graph
        .as_ref()
        .ok_or_else(|| Error::InvalidModel("model has no graph".into()))?;
    let mut graph = graph_from_proto(proto)?;
    graph.metadata = model
        .metadata_props
        .iter()
        .map(|p| (p.key.clone(), p.value.clone()))
        .collect();
    graph.opset_imports = model
        .opset_import
        .iter()
        .map(|o| OpsetImport {
            domain: o.domain.clone(),
            version: o.version,
        })
        .collect();
    Ok(graph)
}

pub fn model_from_graph(graph: &Graph) -> pb::ModelProto {
    let opset_import = if graph.opset_imports.is_empty() {
        default_opsets(graph)
    } else {
        graph
            .opset_imports
            .iter()
            .map(|o| pb::OperatorSetIdProto {
                domain: o.domain.clone(),
                version: o.version,
            })
            .collect()
    };

    pb::ModelProto {
        ir_version: IR_VERSION,
        opset_import,
        producer_name: PRODUCER.to_string(),
        graph: Some(graph_to_proto(graph)),
        metadata_props: graph
            .metadata
            .iter()
            .map(|(key, value)| pb::StringStringEntryProto {
                key: key.clone(),
                value: value.clone(),
            })
            .collect(),
        ..Default::default()
    }
}

fn default_opsets(graph: &Graph) -> Vec<pb::OperatorSetIdProto> {
    let mut opsets = vec![pb::OperatorSetIdProto {
        domain: String::new(),
        version: DEFAULT_OPSET,
    }];
    if graph.nodes.iter().any(|n| n.domain == CUSTOM_DOMAIN) {
        opsets.push(pb::OperatorSetIdProto {
            domain: CUSTOM_DOMAIN.to_string(),
            version: 1,
        });
    }
    opsets
}

fn graph_from_proto(proto: &pb::GraphProto) -> Result<Graph> {
    let value_infos = |list: &[pb::ValueInfoProto]| {
        list.iter()
            .map(value_info_from_proto)
            .collect::<Result<Vec<_>>>()
    };

    let initializers = proto
        .initializer
        .iter()
        .map(|t| Ok((t.name.clone(), tensor_from_proto(t)?)))
        .collect::<Result<_>>()?;

    Ok(Graph {
        name: proto.name.clone(),
        nodes: proto
            .node
            .iter()
            .map(node_from_proto)
            .collect::<Result<_>>()?,
        inputs: value_infos(&proto.input)?,
        outputs: value_infos(&proto.output)?,
        value_info: value_infos(&proto.value_info)?,
        initializers,
        ..Graph::default()
    })
}

pub(crate) fn graph_to_proto(graph: &Graph) -> pb::GraphProto {
    let value_infos = |list: &[ValueInfo]| list.iter().map(value_info_to_proto).collect();
    pb::GraphProto {
        node: graph.nodes.iter().map(node_to_proto).collect(),
        name: graph.name.clone(),
        initializer: graph
            .initializers
            .iter()
            .map(|(name, t)| tensor_to_proto(name, t))
            .collect(),
        input: value_infos(&graph.inputs),
        output: value_infos(&graph.outputs),
        value_info: value_infos(&graph.value_info),
        ..Default::default()
    }
}

fn node_from_proto(proto: &pb::NodeProto) -> Result<Node> {
    let attributes = proto
        .attribute
        .iter()
        .map(|a| Ok((a.name.clone(), attribute_from_proto(a)?)))
        .collect::<Result<_>>()?;
    Ok(Node {
        name: proto.name.clone(),
        op_type: proto.op_type.clone(),
        domain: proto.domain.clone(),
        inputs: proto.input.clone(),
        outputs: proto.output.clone(),
        attributes,
    })
}

fn node_to_proto(node: &Node) -> pb::NodeProto {
    pb::NodeProto {
        input: node.inputs.clone(),
        output: node.outputs.clone(),
        name: node.name.clone(),
        op_type: node.op_type.clone(),
        domain: node.domain.clone(),
        attribute: node
            .attributes
            .iter()
            .map(|(name, a)| attribute_to_proto(name, a))
            .collect(),
        ..Default::default()
    }
}

fn attribute_from_proto(proto: &pb::AttributeProto) -> Result<Attribute> {
    use pb::attribute_proto::AttributeType as Ty;

    let ty = Ty::try_from(proto.r#type)
        .map_err(|_| Error::InvalidModel(format!("attribute `{}` has unknown type", proto.name)))?;
    let text = |raw: &[u8]| String::from_utf8_lossy(raw).into_owned();
    Ok(match ty {
        Ty::Float => Attribute::Float(proto.f),
        Ty::Int => Attribute::Int(proto.i),
        Ty::String => Attribute::String(text(&proto.s)),
        Ty::Tensor => {
            let t = proto.t.as_ref().ok_or_else(|| {
                Error::InvalidModel(format!("tensor attribute `{}` is empty", proto.name))
            })?;
            Attribute::Tensor(tensor_from_proto(t)?)
        }
        Ty::Graph => {
            let g = proto.g.as_ref().ok_or_else(|| {
                Error::InvalidModel(format!("graph attribute `{}` is empty", proto.name))
            })?;
            Attribute::Graph(Box::new(graph_from_proto(g)?))
        }
        Ty::Floats => Attribute::Floats(proto.floats.clone()),
        Ty::Ints => Attribute::Ints(proto.ints.clone()),
        Ty::Strings => Attribute::Strings(proto.strings.iter().map(|s| text(s)).collect()),
        Ty::Undefined | Ty::Tensors | Ty::Graphs => {
            return Err(Error::InvalidModel(format!(
                "attribute `{}` has unsupported type {ty:?}",
                proto.name
            )))
        }
    })
}

fn attribute_to_proto(name: &str, attr: &Attribute) -> pb::AttributeProto {
    use pb::attribute_proto::AttributeType as Ty;

    let mut proto = pb::AttributeProto {
        name: name.to_string(),
        ..Default::default()
    };
    let ty = match attr {
        Attribute::Float(v) => {
            proto.f = *v;
            Ty::Float
        }
        Attribute::Int(v) => {
            proto.i = *v;
            Ty::Int
        }
        Attribute::String(v) => {
            proto.s = v.as_bytes().to_vec();
            Ty::String
        }
        Attribute::Tensor(t) => {
            proto.t = Some(tensor_to_proto("", t));
            Ty::Tensor
        }
        Attribute::Graph(g) => {
            proto.g = Some(graph_to_proto(g).into());
            Ty::Graph
        }
        Attribute::Floats(v) => {
            proto.floats = v.clone();
            Ty::Floats
        }
        Attribute::Ints(v) => {
            proto.ints = v.clone();
            Ty::Ints
        }
        Attribute::Strings(v) => {
            proto.strings = v.iter().map(|s| s.as_bytes().to_vec()).collect();
            Ty::Strings
        }
    };
    proto.r#type = ty as i32;
    proto
}

fn value_info_from_proto(proto: &pb::ValueInfoProto) -> Result<ValueInfo> {
    let Some(pb::type_proto::Value::TensorType(tensor_type)) =
        proto.r#type.as_ref().and_then(|t| t.value.as_ref())
    else {
        return Err(Error::InvalidModel(format!(
            "value `{}` is not a tensor",
            proto.name
        )));
    };

    let dims = tensor_type.shape.as_ref().map(|shape| {
        shape
            .dim
            .iter()
            .map(|d| match d.value {
                Some(dimension::Value::DimValue(v)) if v >= 0 => Some(v as usize),
                _ => None,
            })
            .collect()
    });

    Ok(ValueInfo {
        name: proto.name.clone(),
        dtype: dtype_from_onnx(tensor_type.elem_type)?,
        dims,
    })
}

fn value_info_to_proto(vi: &ValueInfo) -> pb::ValueInfoProto {
    let shape = vi.dims.as_ref().map(|dims| pb::TensorShapeProto {
        dim: dims
            .iter()
            .map(|d| Dimension {
                value: d.map(|v| dimension::Value::DimValue(v as i64)),
                ..Default::default()
            })
            .collect(),
    });
    pb::ValueInfoProto {
        name: vi.name.clone(),
        r#type: Some(pb::TypeProto {
            value: Some(pb::type_proto::Value::TensorType(pb::type_proto::Tensor {
                elem_type: dtype_to_onnx(vi.dtype),
                shape,
            })),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn tensor_from_proto(proto: &pb::TensorProto) -> Result<Tensor> {
    let dtype = dtype_from_onnx(proto.data_type)?;
    let dims = proto
        .dims
        .iter()
        .map(|&d| {
            usize::try_from(d).map_err(|_| {
                Error::InvalidModel(format!("tensor `{}` has negative dim {d}", proto.name))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let shape = Shape::from_slice(&dims);
    let byte_len = shape.checked_byte_len(dtype).ok_or_else(|| {
        Error::InvalidTensor(format!("tensor `{}` of shape {shape} overflows usize", proto.name))
    })?;

    if !proto.raw_data.is_empty() || byte_len == 0 {
        return Tensor::from_cpu_bytes(dtype, shape, Bytes::copy_from_slice(&proto.raw_data));
    }

    let mut buf = Vec::with_capacity(byte_len);
    match dtype {
        DType::F32 => proto
            .float_data
            .iter()
            .for_each(|v| buf.extend_from_slice(&v.to_le_bytes())),
        DType::I64 => proto
            .int64_data
            .iter()
            .for_each(|v| buf.extend_from_slice(&v.to_le_bytes())),
        DType::I32 => proto
            .int32_data
            .iter()
            .for_each(|v| buf.extend_from_slice(&v.to_le_bytes())),
        // f16 bit patterns and u8 values are widened into int32_data.
        DType::F16 => proto
            .int32_data
            .iter()
            .for_each(|v| buf.extend_from_slice(&(*v as u16).to_le_bytes())),
        DType::U8 => proto.int32_data.iter().for_each(|v| buf.push(*v as u8)),
    }
    Tensor::from_cpu_bytes(dtype, shape, Bytes::from(buf))
}

pub fn tensor_to_proto(name: &str, tensor: &Tensor) -> pb::TensorProto {
    pb::TensorProto {
        dims: tensor.shape().dims().iter().map(|&d| d as i64).collect(),
        data_type: dtype_to_onnx(tensor.dtype()),
        name: name.to_string(),
        raw_data: tensor.data.to_vec(),
        ..Default::default()
    }
}

pub fn dtype_from_onnx(elem_type: i32) -> Result<DType> {
    use pb::tensor_proto::DataType;

    match DataType::try_from(elem_type) {
        Ok(DataType::Float) => Ok(DType::F32),
        Ok(DataType::Float16) => Ok(DType::F16),
        Ok(DataType::Int64) => Ok(DType::I64),
        Ok(DataType::Int32) => Ok(DType::I32),
        Ok(DataType::Uint8) => Ok(DType::U8),
        Ok(other) => Err(Error::InvalidModel(format!(
            "unsupported tensor element type {other:?}"
        ))),
        Err(_) => Err(Error::InvalidModel(format!(
            "unknown tensor element type {elem_type}"
        ))),
    }
}

pub fn dtype_to_onnx(dtype: DType) -> i32 {
    use pb::tensor_proto::DataType;

    let ty = match dtype {
        DType::F32 => DataType::Float,
        DType::F16 => DataType::Float16,
        DType::I64 => DataType::Int64,
        DType::I32 => DataType::Int32,
        DType::U8 => DataType::Uint8,
    };
    ty as i32
}
