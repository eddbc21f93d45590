mod common;

use anyhow::Result;
use common::*;
use graphport_core::{Attribute, DType, Graph, Node, ValueInfo, CUSTOM_DOMAIN};
use graphport_runtime::Engine;

const IFM_DIM: usize = 4;
const K: usize = 2;
const STRIDE: usize = 1;
const OFM_DIM: usize = (IFM_DIM - K) / STRIDE + 1;

#[rustfmt::skip]
const INPUT: [f32; 16] = [
    -1.0, -1.0,  1.0,  1.0,
     1.0, -1.0,  1.0, -1.0,
    -1.0,  1.0, -1.0, -1.0,
     1.0,  1.0,  1.0,  1.0,
];

#[rustfmt::skip]
const EXPECTED: [f32; 36] = [
    -1.0, -1.0,  1.0, -1.0,
    -1.0,  1.0, -1.0,  1.0,
     1.0,  1.0,  1.0, -1.0,
     1.0, -1.0, -1.0,  1.0,
    -1.0,  1.0,  1.0, -1.0,
     1.0, -1.0, -1.0, -1.0,
    -1.0,  1.0,  1.0,  1.0,
     1.0, -1.0,  1.0,  1.0,
    -1.0, -1.0,  1.0,  1.0,
];

fn im2col_node(input: &str, output: &str) -> Node {
    Node::new("Im2Col", [input], [output])
        .with_domain(CUSTOM_DOMAIN)
        .with_attr("stride", Attribute::Int(STRIDE as i64))
        .with_attr("kernel_size", Attribute::Int(K as i64))
        .with_attr(
            "input_shape",
            Attribute::String(format!("(1,{IFM_DIM},{IFM_DIM},1)")),
        )
}

#[test]
fn im2col_extracts_row_major_patches() -> Result<()> {
    let mut g = Graph::new("im2col_graph");
    g.inputs
        .push(ValueInfo::new("inp", DType::F32, &[1, IFM_DIM, IFM_DIM, 1]));
    g.outputs.push(ValueInfo::new(
        "outp",
        DType::F32,
        &[1, OFM_DIM, OFM_DIM, K * K],
    ));
    g.nodes.push(im2col_node("inp", "outp"));

    let engine = Engine::builder(RefBackend::default()).build();
    let x = f32_tensor(&[1, IFM_DIM, IFM_DIM, 1], &INPUT);
    let out = engine.execute(&g, inputs([("inp", x)]), false)?;

    assert_eq!(out["outp"].shape().dims(), [1, 3, 3, 4]);
    assert_eq!(values(&out, "outp"), EXPECTED);
    Ok(())
}

#[test]
fn im2col_after_generic_node() -> Result<()> {
    let mut g = Graph::new("abs_im2col");
    g.inputs
        .push(ValueInfo::new("inp", DType::F32, &[1, IFM_DIM, IFM_DIM, 1]));
    g.value_info
        .push(ValueInfo::new("abs", DType::F32, &[1, IFM_DIM, IFM_DIM, 1]));
    g.outputs.push(ValueInfo::new(
        "im2col",
        DType::F32,
        &[1, OFM_DIM, OFM_DIM, K * K],
    ));
    g.nodes.push(Node::new("Abs", ["inp"], ["abs"]));
    g.nodes.push(im2col_node("abs", "im2col"));

    let engine = Engine::builder(RefBackend::default()).build();
    let x = f32_tensor(&[1, IFM_DIM, IFM_DIM, 1], &INPUT);
    let out = engine.execute(&g, inputs([("inp", x)]), false)?;
    assert_eq!(values(&out, "im2col"), [1.0; 36]);
    Ok(())
}
