mod common;

use ferry::cluster::{assign_clusters, ClusterOptions};
use ferry::encapsulate::{
    encapsulate_clusters, subgraph, CLUSTER_ID_ATTR, ENCAPSULATE_OP,
};
use ferry::graph::{eval_graph, Graph, TensorData};
use ferry::mark::{mark_graph, MarkOptions};

use common::{op, only_node_of_type, placeholder, retval};

fn rewrite(graph: &mut Graph) -> Vec<ferry::ClusterId> {
    mark_graph(graph, &MarkOptions::default()).unwrap();
    let assignment = assign_clusters(graph, &ClusterOptions::default()).unwrap();
    encapsulate_clusters(graph, &assignment).unwrap()
}

#[test]
fn cluster_collapses_to_one_node() {
    let mut graph = Graph::new();
    let a = placeholder(&mut graph, "a", 0);
    let b = placeholder(&mut graph, "b", 1);
    let add = op(&mut graph, "add", "Add", &[a, b]);
    let neg = op(&mut graph, "neg", "Neg", &[add]);
    let out = retval(&mut graph, "out", 0, neg, 0);

    let ids = rewrite(&mut graph);
    assert_eq!(ids.len(), 1);
    assert!(graph.verify().is_ok());
    assert_eq!(graph.node_count(), 4);

    let enc = only_node_of_type(&graph, ENCAPSULATE_OP);
    assert_eq!(
        graph.node(enc).unwrap().attr_int(CLUSTER_ID_ATTR),
        Some(ids[0].0 as i64)
    );

    // Boundary edges are positional: a and b feed slots 0 and 1, the
    // consumer reads the cluster's output 0.
    assert_eq!(graph.input_node(enc, 0).unwrap(), a);
    assert_eq!(graph.input_node(enc, 1).unwrap(), b);
    let edge = graph.input_edge(out, 0).unwrap();
    assert_eq!(edge.src, enc);
    assert_eq!(edge.src_output, 0);
}

#[test]
fn extracted_body_is_registered_and_evaluable() {
    let mut graph = Graph::new();
    let a = placeholder(&mut graph, "a", 0);
    let b = placeholder(&mut graph, "b", 1);
    let add = op(&mut graph, "add", "Add", &[a, b]);
    let neg = op(&mut graph, "neg", "Neg", &[add]);
    retval(&mut graph, "out", 0, neg, 0);

    let ids = rewrite(&mut graph);
    let cluster = subgraph(ids[0]).unwrap();
    assert_eq!(cluster.num_inputs, 2);
    assert_eq!(cluster.num_outputs, 1);
    // Two boundary args, one retval, the two members.
    assert_eq!(cluster.graph.node_count(), 5);

    let feeds = [
        TensorData::from_f32(vec![2], &[1.0, 2.0]),
        TensorData::from_f32(vec![2], &[3.0, 4.0]),
    ];
    let results = eval_graph(&cluster.graph, &feeds).unwrap();
    assert_eq!(results[0].to_f32_vec().unwrap(), vec![-4.0, -6.0]);
}

#[test]
fn duplicate_external_inputs_are_deduplicated() {
    let mut graph = Graph::new();
    let a = placeholder(&mut graph, "a", 0);
    let add = op(&mut graph, "add", "Add", &[a, a]);
    let neg = op(&mut graph, "neg", "Neg", &[add]);
    retval(&mut graph, "out", 0, neg, 0);

    let ids = rewrite(&mut graph);
    let cluster = subgraph(ids[0]).unwrap();
    assert_eq!(cluster.num_inputs, 1);

    let enc = only_node_of_type(&graph, ENCAPSULATE_OP);
    assert_eq!(graph.num_inputs(enc), 1);
    assert_eq!(graph.input_node(enc, 0).unwrap(), a);

    // Inside the body both add inputs read the same boundary arg.
    let body = &cluster.graph;
    let add = body.find_node("add").unwrap();
    assert_eq!(body.input_node(add, 0).unwrap(), body.input_node(add, 1).unwrap());
}

#[test]
fn control_edges_reroute_to_the_encapsulation_node() {
    let mut graph = Graph::new();
    let a = placeholder(&mut graph, "a", 0);
    let before = op(&mut graph, "before", "HostBarrier", &[a]);
    let relu = op(&mut graph, "relu", "Relu", &[a]);
    let neg = op(&mut graph, "neg", "Neg", &[relu]);
    let after = op(&mut graph, "after", "HostBarrier", &[neg]);
    retval(&mut graph, "out", 0, after, 0);
    graph.add_control_edge(before, relu);
    graph.add_control_edge(neg, after);

    rewrite(&mut graph);
    let enc = only_node_of_type(&graph, ENCAPSULATE_OP);

    let control_in = graph.control_in_edges(enc);
    assert_eq!(control_in.len(), 1);
    assert_eq!(control_in[0].src, before);

    let control_after = graph.control_in_edges(after);
    assert_eq!(control_after.len(), 1);
    assert_eq!(control_after[0].src, enc);
}

#[test]
fn two_independent_clusters_get_distinct_ids() {
    let mut graph = Graph::new();
    let a = placeholder(&mut graph, "a", 0);
    let b = placeholder(&mut graph, "b", 1);
    let relu = op(&mut graph, "relu", "Relu", &[a]);
    let neg = op(&mut graph, "neg", "Neg", &[relu]);
    let barrier = op(&mut graph, "barrier", "HostBarrier", &[neg, b]);
    let abs = op(&mut graph, "abs", "Abs", &[barrier]);
    let sq = op(&mut graph, "sq", "Square", &[abs]);
    retval(&mut graph, "out", 0, sq, 0);

    let ids = rewrite(&mut graph);
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
    assert!(subgraph(ids[0]).is_some());
    assert!(subgraph(ids[1]).is_some());
}
