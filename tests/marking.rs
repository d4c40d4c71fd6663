mod common;

use ferry::graph::{AttrValue, DataType, Graph, Node};
use ferry::mark::{
    self, is_marked, mark_graph, resolve_static_slot, static_input_indexes, MarkOptions, MARK_ATTR,
};

use common::{const_i64, op, op_with, placeholder, retval};

fn simple_chain() -> Graph {
    let mut graph = Graph::new();
    let input = placeholder(&mut graph, "input", 0);
    let relu = op(&mut graph, "relu", "Relu", &[input]);
    let neg = op(&mut graph, "neg", "Neg", &[relu]);
    retval(&mut graph, "out", 0, neg, 0);
    graph
}

#[test]
fn marks_supported_nodes_only() {
    let mut graph = simple_chain();
    let report = mark_graph(&mut graph, &MarkOptions::default()).unwrap();

    assert_eq!(report.marked, 2);
    let relu = graph.find_node("relu").unwrap();
    let input = graph.find_node("input").unwrap();
    assert!(is_marked(graph.node(relu).unwrap()));
    assert!(!is_marked(graph.node(input).unwrap()));
    assert_eq!(
        report.reason_for("input"),
        Some("no confirmation function registered")
    );
}

#[test]
fn marking_is_idempotent() {
    let mut graph = simple_chain();
    let first = mark_graph(&mut graph, &MarkOptions::default()).unwrap();
    let second = mark_graph(&mut graph, &MarkOptions::default()).unwrap();

    assert_eq!(first.marked, second.marked);
    assert_eq!(first.reasons, second.reasons);
}

#[test]
fn disabled_op_is_rejected_with_reason() {
    let mut graph = Graph::new();
    let a = placeholder(&mut graph, "a", 0);
    let b = placeholder(&mut graph, "b", 1);
    let add = op(&mut graph, "add", "Add", &[a, b]);
    retval(&mut graph, "out", 0, add, 0);

    let options = MarkOptions {
        disabled_ops: ["Add".to_string()].into_iter().collect(),
    };
    let report = mark_graph(&mut graph, &options).unwrap();

    assert_eq!(report.marked, 0);
    assert_eq!(
        report.reason_for("add"),
        Some("op type Add is listed in the disabled-ops setting")
    );
}

#[test]
fn dynamic_reshape_is_rejected() {
    let mut graph = Graph::new();
    let data = placeholder(&mut graph, "data", 0);
    let shape = placeholder(&mut graph, "shape", 1);
    let reshape = op(&mut graph, "reshape", "Reshape", &[data, shape]);
    retval(&mut graph, "out", 0, reshape, 0);

    let report = mark_graph(&mut graph, &MarkOptions::default()).unwrap();
    assert_eq!(
        report.reason_for("reshape"),
        Some("input 1 of Reshape must be a constant")
    );
}

#[test]
fn static_reshape_is_marked_through_identity() {
    let mut graph = Graph::new();
    let data = placeholder(&mut graph, "data", 0);
    let shape = const_i64(&mut graph, "shape", vec![2], &[2, 3]);
    let alias = op(&mut graph, "alias", "Identity", &[shape]);
    let reshape = op(&mut graph, "reshape", "Reshape", &[data, alias]);
    retval(&mut graph, "out", 0, reshape, 0);

    mark_graph(&mut graph, &MarkOptions::default()).unwrap();
    let reshape = graph.find_node("reshape").unwrap();
    assert!(is_marked(graph.node(reshape).unwrap()));
    assert!(mark::input_is_constant(&graph, reshape, 1).unwrap());
}

#[test]
fn type_constraints_apply_per_op() {
    let mut graph = Graph::new();
    let input = placeholder(&mut graph, "input", 0);
    let relu = op_with(
        &mut graph,
        Node::new("int_relu", "Relu").with_attr("T", AttrValue::Type(DataType::I32)),
        &[input],
    );
    let neg = op_with(
        &mut graph,
        Node::new("int_neg", "Neg").with_attr("T", AttrValue::Type(DataType::I32)),
        &[relu],
    );
    retval(&mut graph, "out", 0, neg, 0);

    let report = mark_graph(&mut graph, &MarkOptions::default()).unwrap();

    // Relu is float-only, Neg accepts any numeric dtype.
    assert_eq!(
        report.reason_for("int_relu"),
        Some("attribute T has unsupported dtype I32")
    );
    let neg = graph.find_node("int_neg").unwrap();
    assert!(is_marked(graph.node(neg).unwrap()));
}

#[test]
fn exotic_data_format_is_rejected() {
    let mut graph = Graph::new();
    let data = placeholder(&mut graph, "data", 0);
    let filter = placeholder(&mut graph, "filter", 1);
    let conv = op_with(
        &mut graph,
        Node::new("conv", "Conv2D")
            .with_attr("data_format", AttrValue::Str("NCHW_VECT_C".into())),
        &[data, filter],
    );
    retval(&mut graph, "out", 0, conv, 0);

    let report = mark_graph(&mut graph, &MarkOptions::default()).unwrap();
    assert_eq!(
        report.reason_for("conv"),
        Some("unsupported data_format \"NCHW_VECT_C\"")
    );
}

#[test]
fn stale_mark_is_removed_on_rejection() {
    let mut graph = Graph::new();
    let data = placeholder(&mut graph, "data", 0);
    let sw = op_with(
        &mut graph,
        Node::new("switch", "Switch").with_attr(MARK_ATTR, AttrValue::Bool(true)),
        &[data, data],
    );
    retval(&mut graph, "out", 0, sw, 0);

    mark_graph(&mut graph, &MarkOptions::default()).unwrap();
    let sw = graph.find_node("switch").unwrap();
    assert!(!is_marked(graph.node(sw).unwrap()));
    assert!(graph.node(sw).unwrap().attr(MARK_ATTR).is_none());
}

#[test]
fn negative_static_slots_resolve_from_the_end() {
    assert_eq!(static_input_indexes("ConcatV2"), &[-1]);
    assert_eq!(resolve_static_slot(-1, 3), Some(2));
    assert_eq!(resolve_static_slot(1, 3), Some(1));
    assert_eq!(resolve_static_slot(3, 3), None);
    assert_eq!(resolve_static_slot(-4, 3), None);
}
