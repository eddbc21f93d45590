use std::collections::{HashMap, HashSet};

use graphport_core::{Error, ExecContext, Graph, Node, Result, Tensor, TensorMap, ValueInfo};

pub const SINGLE_NODE_GRAPH_NAME: &str = "single-node-exec";

/// Builds a graph holding only `node`, with the declarations it touches.
///
/// Inputs are taken from the owning graph's inputs, then value-info, then
/// outputs (a graph output may feed a later node), then initializers, in that
/// list order. Outputs are taken from the owning graph's outputs, then
/// value-info. Each name appears once, so the sub-graph's output order can
/// differ from `node.outputs`.
pub fn isolate_node(node: &Node, graph: &Graph) -> Graph {
    let wanted_inputs: HashSet<&str> = node.present_inputs().collect();
    let wanted_outputs: HashSet<&str> = node.present_outputs().collect();

    let mut seen = HashSet::new();
    let mut inputs: Vec<ValueInfo> = graph
        .inputs
        .iter()
        .chain(&graph.value_info)
        .chain(&graph.outputs)
        .filter(|vi| wanted_inputs.contains(vi.name.as_str()))
        .filter(|vi| seen.insert(vi.name.clone()))
        .cloned()
        .collect();
    for (name, value) in &graph.initializers {
        if wanted_inputs.contains(name.as_str()) && seen.insert(name.clone()) {
            inputs.push(ValueInfo::new(
                name.clone(),
                value.dtype(),
                value.shape().dims(),
            ));
        }
    }

    let mut seen = HashSet::new();
    let outputs = graph
        .outputs
        .iter()
        .chain(&graph.value_info)
        .filter(|vi| wanted_outputs.contains(vi.name.as_str()))
        .filter(|vi| seen.insert(vi.name.clone()))
        .cloned()
        .collect();

    Graph {
        name: SINGLE_NODE_GRAPH_NAME.to_string(),
        nodes: vec![node.clone()],
        inputs,
        outputs,
        opset_imports: graph.opset_imports.clone(),
        ..Graph::default()
    }
}

/// Current values of every input `node` reads.
pub fn gather_inputs(node: &Node, ctx: &ExecContext) -> Result<TensorMap> {
    node.present_inputs()
        .map(|name| Ok((name.to_string(), ctx.get(name)?.clone())))
        .collect()
}

/// Writes backend results into `ctx`, matching each to its slot by name.
///
/// `outputs` follows `subgraph.outputs`; positions in `node.outputs` are never
/// used to pick a buffer.
pub fn store_outputs(
    node: &Node,
    subgraph: &Graph,
    outputs: Vec<Tensor>,
    ctx: &mut ExecContext,
    backend: &str,
) -> Result<()> {
    if outputs.len() != subgraph.outputs.len() {
        return Err(Error::backend(
            backend,
            anyhow::anyhow!(
                "node `{}` produced {} outputs, expected {}",
                node.label(),
                outputs.len(),
                subgraph.outputs.len()
            ),
        ));
    }

    let mut by_name: HashMap<&str, Tensor> = subgraph
        .outputs
        .iter()
        .map(|vi| vi.name.as_str())
        .zip(outputs)
        .collect();

    for name in node.present_outputs() {
        let value = by_name.remove(name).ok_or_else(|| Error::UnknownTensor {
            tensor: name.to_string(),
        })?;
        ctx.store(name, value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphport_core::{DType, Shape};

    fn graph() -> Graph {
        let mut g = Graph::new("owner");
        g.inputs.push(ValueInfo::new("x", DType::F32, &[4]));
        g.value_info.push(ValueInfo::new("lo", DType::F32, &[2]));
        g.outputs.push(ValueInfo::new("hi", DType::F32, &[2]));
        g.outputs.push(ValueInfo::new("y", DType::F32, &[2]));
        g.set_initializer("w", Tensor::from_slice([2], &[1.0f32, 1.0]).unwrap());
        g.nodes.push(Node::new("Split", ["x"], ["lo", "hi"]));
        g.nodes.push(Node::new("Add", ["hi", "w"], ["y"]));
        g
    }

    #[test]
    fn outputs_follow_owner_declaration_order() {
        let g = graph();
        let sub = isolate_node(&g.nodes[0], &g);
        let names: Vec<_> = sub.outputs.iter().map(|vi| vi.name.as_str()).collect();
        assert_eq!(names, ["hi", "lo"]);
        assert_eq!(sub.inputs, vec![ValueInfo::new("x", DType::F32, &[4])]);
        assert_eq!(sub.nodes.len(), 1);
    }

    #[test]
    fn graph_outputs_and_initializers_can_be_inputs() {
        let g = graph();
        let sub = isolate_node(&g.nodes[1], &g);
        let names: Vec<_> = sub.inputs.iter().map(|vi| vi.name.as_str()).collect();
        assert_eq!(names, ["hi", "w"]);
        assert_eq!(sub.inputs[1].shape(), Some(Shape::from([2])));
    }

    #[test]
    fn duplicate_declarations_appear_once() {
        let mut g = graph();
        g.value_info.push(ValueInfo::new("hi", DType::F32, &[2]));
        g.value_info.push(ValueInfo::new("x", DType::F32, &[4]));
        let sub = isolate_node(&g.nodes[0], &g);
        assert_eq!(sub.inputs.len(), 1);
        assert_eq!(sub.outputs.len(), 2);
    }

    #[test]
    fn stores_by_name_not_position() {
        let g = graph();
        let node = &g.nodes[0];
        let sub = isolate_node(node, &g);
        let mut ctx = ExecContext::for_graph(&g).unwrap();
        let hi = Tensor::from_slice([2], &[3.0f32, 4.0]).unwrap();
        let lo = Tensor::from_slice([2], &[1.0f32, 2.0]).unwrap();
        store_outputs(node, &sub, vec![hi.clone(), lo.clone()], &mut ctx, "test").unwrap();
        assert_eq!(ctx.get("lo").unwrap(), &lo);
        assert_eq!(ctx.get("hi").unwrap(), &hi);
    }

    #[test]
    fn rejects_wrongly_shaped_result() {
        let g = graph();
        let node = &g.nodes[0];
        let sub = isolate_node(node, &g);
        let mut ctx = ExecContext::for_graph(&g).unwrap();
        let wide = Tensor::zeros(DType::F32, Shape::from([3]));
        let ok = Tensor::zeros(DType::F32, Shape::from([2]));
        let err = store_outputs(node, &sub, vec![ok, wide], &mut ctx, "test").unwrap_err();
        assert!(matches!(
            err,
            Error::ShapeMismatch { tensor, .. } if tensor == "lo"
        ));
    }

    #[test]
    fn rejects_missing_results() {
        let g = graph();
        let node = &g.nodes[0];
        let sub = isolate_node(node, &g);
        let mut ctx = ExecContext::for_graph(&g).unwrap();
        let err = store_outputs(node, &sub, Vec::new(), &mut ctx, "test").unwrap_err();
        assert!(matches!(err, Error::Backend { .. }));
    }
}
