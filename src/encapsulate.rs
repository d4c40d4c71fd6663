//! Encapsulation: each surviving cluster collapses into one opaque node.
//!
//! The cluster's members are copied into a standalone subgraph with
//! `Placeholder`/`Retval` boundary nodes, registered process-wide under a
//! globally unique cluster id. In the host graph the members are replaced
//! by a single [`ENCAPSULATE_OP`] node; boundary value edges are rewired
//! positionally and control edges reroute to the new node. A dangling edge
//! after rewiring aborts the whole rewrite.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tracing::debug;

use crate::cluster::{ClusterAssignment, ClusterId};
use crate::error::{BridgeError, BridgeResult};
use crate::graph::{AttrValue, Graph, Node, NodeId};

/// Op type of the placeholder node standing in for a cluster.
pub const ENCAPSULATE_OP: &str = "_FerryEncapsulate";

/// Attribute on an encapsulate node holding its global cluster id.
pub const CLUSTER_ID_ATTR: &str = "ferry_cluster_id";

/// Extracted cluster body with its boundary arity.
#[derive(Debug, Clone)]
pub struct ClusterSubgraph {
    pub id: ClusterId,
    pub graph: Graph,
    pub num_inputs: usize,
    pub num_outputs: usize,
}

fn registry() -> &'static Mutex<HashMap<u32, Arc<ClusterSubgraph>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<u32, Arc<ClusterSubgraph>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn next_cluster_id() -> ClusterId {
    static NEXT: AtomicU32 = AtomicU32::new(0);
    ClusterId(NEXT.fetch_add(1, Ordering::Relaxed))
}

/// Looks up a registered cluster body.
pub fn subgraph(id: ClusterId) -> Option<Arc<ClusterSubgraph>> {
    registry()
        .lock()
        .expect("cluster registry poisoned")
        .get(&id.0)
        .cloned()
}

/// Replaces every cluster of `assignment` with an encapsulate node and
/// registers the extracted bodies. Returns the global cluster ids in the
/// order the clusters were numbered.
pub fn encapsulate_clusters(
    graph: &mut Graph,
    assignment: &ClusterAssignment,
) -> BridgeResult<Vec<ClusterId>> {
    let mut created = Vec::with_capacity(assignment.clusters.len());
    for local in assignment.cluster_ids() {
        let id = encapsulate_one(graph, assignment.cluster(local))?;
        created.push(id);
    }
    graph.verify().map_err(|e| {
        BridgeError::structural(format!("encapsulation left the graph inconsistent: {e}"))
    })?;
    Ok(created)
}

fn encapsulate_one(graph: &mut Graph, members: &[NodeId]) -> BridgeResult<ClusterId> {
    let member_set: BTreeSet<NodeId> = members.iter().copied().collect();
    let id = next_cluster_id();
    let enc_name = format!("ferry_cluster_{}", id.0);

    // External inputs keyed by producer slot, in first-seen order.
    let mut input_index: BTreeMap<(NodeId, i32), usize> = BTreeMap::new();
    let mut inputs: Vec<(NodeId, i32)> = Vec::new();
    for &member in members {
        for edge in graph.value_in_edges(member) {
            if member_set.contains(&edge.src) {
                continue;
            }
            input_index
                .entry((edge.src, edge.src_output))
                .or_insert_with(|| {
                    inputs.push((edge.src, edge.src_output));
                    inputs.len() - 1
                });
        }
    }

    // External outputs keyed by member slot, in first-seen order.
    let mut output_index: BTreeMap<(NodeId, i32), usize> = BTreeMap::new();
    let mut outputs: Vec<(NodeId, i32)> = Vec::new();
    for &member in members {
        for edge in graph.out_edges(member) {
            if edge.is_control() || member_set.contains(&edge.dst) {
                continue;
            }
            output_index
                .entry((member, edge.src_output))
                .or_insert_with(|| {
                    outputs.push((member, edge.src_output));
                    outputs.len() - 1
                });
        }
    }

    // Build the extracted body.
    let mut body = Graph::new();
    let mut mapped: HashMap<NodeId, NodeId> = HashMap::new();
    let mut arg_nodes: Vec<NodeId> = Vec::with_capacity(inputs.len());
    for (idx, _) in inputs.iter().enumerate() {
        let arg = body.add_node(
            Node::new(format!("{enc_name}/arg_{idx}"), "Placeholder")
                .with_attr("index", AttrValue::Int(idx as i64)),
        );
        arg_nodes.push(arg);
    }
    for &member in members {
        let node = graph.node(member)?.clone();
        mapped.insert(member, body.add_node(node));
    }
    for &member in members {
        for edge in graph.value_in_edges(member) {
            let dst = mapped[&member];
            if let Some(&src) = mapped.get(&edge.src) {
                body.add_edge(src, edge.src_output, dst, edge.dst_input);
            } else {
                let idx = input_index[&(edge.src, edge.src_output)];
                body.add_edge(arg_nodes[idx], 0, dst, edge.dst_input);
            }
        }
        for edge in graph.control_in_edges(member) {
            if let Some(&src) = mapped.get(&edge.src) {
                body.add_control_edge(src, mapped[&member]);
            }
        }
    }
    for (idx, &(member, src_output)) in outputs.iter().enumerate() {
        let ret = body.add_node(
            Node::new(format!("{enc_name}/retval_{idx}"), "Retval")
                .with_attr("index", AttrValue::Int(idx as i64)),
        );
        body.add_edge(mapped[&member], src_output, ret, 0);
    }

    // Host-graph surgery.
    let enc = graph.add_node(
        Node::new(&enc_name, ENCAPSULATE_OP)
            .with_attr(CLUSTER_ID_ATTR, AttrValue::Int(id.0 as i64)),
    );
    for (idx, &(src, src_output)) in inputs.iter().enumerate() {
        graph.add_edge(src, src_output, enc, idx as i32);
    }
    let mut control_in: BTreeSet<NodeId> = BTreeSet::new();
    let mut control_out: BTreeSet<NodeId> = BTreeSet::new();
    for &member in members {
        for edge in graph.control_in_edges(member) {
            if !member_set.contains(&edge.src) {
                control_in.insert(edge.src);
            }
        }
        for edge in graph.out_edges(member) {
            if edge.is_control() && !member_set.contains(&edge.dst) {
                control_out.insert(edge.dst);
            }
        }
        for edge in graph.out_edges(member) {
            if edge.is_control() || member_set.contains(&edge.dst) {
                continue;
            }
            let idx = output_index[&(member, edge.src_output)];
            graph.remove_edge(edge);
            graph.add_edge(enc, idx as i32, edge.dst, edge.dst_input);
        }
    }
    for src in control_in {
        graph.add_control_edge(src, enc);
    }
    for dst in control_out {
        graph.add_control_edge(enc, dst);
    }
    for &member in members {
        graph.remove_node(member)?;
    }

    debug!(
        cluster = %id,
        members = members.len(),
        inputs = inputs.len(),
        outputs = outputs.len(),
        "cluster encapsulated"
    );

    registry()
        .lock()
        .expect("cluster registry poisoned")
        .insert(
            id.0,
            Arc::new(ClusterSubgraph {
                id,
                graph: body,
                num_inputs: inputs.len(),
                num_outputs: outputs.len(),
            }),
        );
    Ok(id)
}
