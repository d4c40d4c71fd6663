mod common;

use ferry::cluster::{assign_clusters, ClusterOptions};
use ferry::graph::Graph;
use ferry::mark::{mark_graph, MarkOptions};

use common::{const_i64, op, placeholder, retval};

fn marked(graph: &mut Graph) {
    mark_graph(graph, &MarkOptions::default()).unwrap();
}

#[test]
fn adjacent_marked_nodes_form_one_cluster() {
    let mut graph = Graph::new();
    let input = placeholder(&mut graph, "input", 0);
    let relu = op(&mut graph, "relu", "Relu", &[input]);
    let neg = op(&mut graph, "neg", "Neg", &[relu]);
    retval(&mut graph, "out", 0, neg, 0);
    marked(&mut graph);

    let assignment = assign_clusters(&graph, &ClusterOptions::default()).unwrap();
    assert_eq!(assignment.clusters.len(), 1);
    assert_eq!(assignment.cluster_of.get(&relu), assignment.cluster_of.get(&neg));
    assert!(assignment.cluster_of.get(&input).is_none());
}

#[test]
fn small_clusters_are_deassigned() {
    let mut graph = Graph::new();
    let input = placeholder(&mut graph, "input", 0);
    let relu = op(&mut graph, "relu", "Relu", &[input]);
    retval(&mut graph, "out", 0, relu, 0);
    marked(&mut graph);

    let default = assign_clusters(&graph, &ClusterOptions::default()).unwrap();
    assert!(default.clusters.is_empty());

    let permissive = assign_clusters(&graph, &ClusterOptions { min_cluster_size: 1 }).unwrap();
    assert_eq!(permissive.clusters.len(), 1);
    assert_eq!(permissive.clusters[0], vec![relu]);
}

#[test]
fn contraction_never_creates_a_cycle() {
    // relu -> barrier -> add runs through the host, so merging relu and
    // add would put the host path both after and before the cluster.
    let mut graph = Graph::new();
    let input = placeholder(&mut graph, "input", 0);
    let relu = op(&mut graph, "relu", "Relu", &[input]);
    let barrier = op(&mut graph, "barrier", "HostBarrier", &[relu]);
    let add = op(&mut graph, "add", "Add", &[relu, barrier]);
    retval(&mut graph, "out", 0, add, 0);
    marked(&mut graph);

    let assignment = assign_clusters(&graph, &ClusterOptions { min_cluster_size: 1 }).unwrap();
    assert_eq!(assignment.clusters.len(), 2);
    assert_ne!(assignment.cluster_of.get(&relu), assignment.cluster_of.get(&add));
}

#[test]
fn differing_deadness_predicates_block_contraction() {
    let mut graph = Graph::new();
    let data = placeholder(&mut graph, "data", 0);
    let pred = placeholder(&mut graph, "pred", 1);
    let sw = op(&mut graph, "switch", "Switch", &[data, pred]);
    let live = op(&mut graph, "live", "Abs", &[data]);
    let gated = op(&mut graph, "gated", "Relu", &[]);
    graph.add_edge(sw, 0, gated, 0);
    let join = op(&mut graph, "join", "Add", &[live, gated]);
    retval(&mut graph, "out", 0, join, 0);
    marked(&mut graph);

    let assignment = assign_clusters(&graph, &ClusterOptions { min_cluster_size: 1 }).unwrap();

    // join inherits the switch branch from gated, so live cannot merge in.
    assert_eq!(assignment.cluster_of.get(&gated), assignment.cluster_of.get(&join));
    assert_ne!(assignment.cluster_of.get(&live), assignment.cluster_of.get(&join));
    assert_eq!(assignment.clusters.len(), 2);
}

#[test]
fn cluster_with_external_static_input_is_deassigned() {
    let mut graph = Graph::new();
    let data = placeholder(&mut graph, "data", 0);
    let shape = const_i64(&mut graph, "shape", vec![2], &[2, 3]);
    let reshape = op(&mut graph, "reshape", "Reshape", &[data, shape]);
    let neg = op(&mut graph, "neg", "Neg", &[reshape]);
    retval(&mut graph, "out", 0, neg, 0);

    // With constants claimable the shape travels with the cluster.
    let mut options = MarkOptions::default();
    mark_graph(&mut graph, &options).unwrap();
    let closed = assign_clusters(&graph, &ClusterOptions::default()).unwrap();
    assert_eq!(closed.clusters.len(), 1);
    assert!(closed.cluster_of.contains_key(&shape));

    // With constants disabled the reshape's shape input would sit outside
    // the cluster, so the whole group is handed back.
    options.disabled_ops.insert("Const".to_string());
    mark_graph(&mut graph, &options).unwrap();
    let open = assign_clusters(&graph, &ClusterOptions::default()).unwrap();
    assert!(open.clusters.is_empty());
}

#[test]
fn partition_is_deterministic() {
    let build = || {
        let mut graph = Graph::new();
        let input = placeholder(&mut graph, "input", 0);
        let relu = op(&mut graph, "relu", "Relu", &[input]);
        let abs = op(&mut graph, "abs", "Abs", &[relu]);
        let neg = op(&mut graph, "neg", "Neg", &[relu]);
        let add = op(&mut graph, "add", "Add", &[abs, neg]);
        retval(&mut graph, "out", 0, add, 0);
        marked(&mut graph);
        graph
    };

    let a = assign_clusters(&build(), &ClusterOptions::default()).unwrap();
    let b = assign_clusters(&build(), &ClusterOptions::default()).unwrap();
    assert_eq!(a.clusters, b.clusters);
    assert_eq!(a.clusters.len(), 1);
}
