#![allow(dead_code)]

use ferry::graph::{AttrValue, Graph, Node, NodeId, TensorData};

pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Adds a node and wires `inputs` to its value slots in order.
pub fn op(graph: &mut Graph, name: &str, op_type: &str, inputs: &[NodeId]) -> NodeId {
    op_with(graph, Node::new(name, op_type), inputs)
}

pub fn op_with(graph: &mut Graph, node: Node, inputs: &[NodeId]) -> NodeId {
    let id = graph.add_node(node);
    for (slot, &src) in inputs.iter().enumerate() {
        graph.add_edge(src, 0, id, slot as i32);
    }
    id
}

pub fn placeholder(graph: &mut Graph, name: &str, index: i64) -> NodeId {
    graph.add_node(Node::new(name, "Placeholder").with_attr("index", AttrValue::Int(index)))
}

pub fn retval(graph: &mut Graph, name: &str, index: i64, src: NodeId, src_output: i32) -> NodeId {
    let id = graph.add_node(Node::new(name, "Retval").with_attr("index", AttrValue::Int(index)));
    graph.add_edge(src, src_output, id, 0);
    id
}

pub fn const_f32(graph: &mut Graph, name: &str, dims: Vec<usize>, values: &[f32]) -> NodeId {
    graph.add_node(
        Node::new(name, "Const")
            .with_attr("value", AttrValue::Tensor(TensorData::from_f32(dims, values))),
    )
}

pub fn const_i64(graph: &mut Graph, name: &str, dims: Vec<usize>, values: &[i64]) -> NodeId {
    graph.add_node(
        Node::new(name, "Const")
            .with_attr("value", AttrValue::Tensor(TensorData::from_i64(dims, values))),
    )
}

/// Finds the single node of `op_type`, panicking when there is not exactly
/// one.
pub fn only_node_of_type(graph: &Graph, op_type: &str) -> NodeId {
    let matches: Vec<NodeId> = graph
        .node_ids()
        .filter(|&id| graph.node(id).map(|n| n.op_type == op_type).unwrap_or(false))
        .collect();
    assert_eq!(matches.len(), 1, "expected exactly one {op_type} node");
    matches[0]
}
