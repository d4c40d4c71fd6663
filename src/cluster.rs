//! Cluster assignment: greedy edge contraction over marked nodes.
//!
//! Data edges are visited in deterministic topological order and
//! contracted when both endpoints are marked, placed on the same device,
//! carry equal deadness predicates, and the contraction keeps the cluster
//! quotient graph acyclic. A deassignment sweep then strips clusters that
//! are too small or whose static inputs are fed from outside the cluster.
//! The resulting partition is byte-identical across runs on the same
//! graph.

use std::collections::HashMap;

use tracing::debug;

use crate::cycles::CycleGraph;
use crate::deadness::DeadnessAnalysis;
use crate::error::{BridgeError, BridgeResult};
use crate::graph::{Graph, NodeId};
use crate::mark::{self, is_marked};

/// Identifier of one surviving cluster within a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterId(pub u32);

impl std::fmt::Display for ClusterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cluster_{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct ClusterOptions {
    /// Clusters smaller than this are handed back to the host.
    pub min_cluster_size: usize,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            min_cluster_size: 2,
        }
    }
}

/// Final partition: clusters numbered in order of first appearance in the
/// deterministic topological walk.
#[derive(Debug, Clone, Default)]
pub struct ClusterAssignment {
    pub clusters: Vec<Vec<NodeId>>,
    pub cluster_of: HashMap<NodeId, ClusterId>,
}

impl ClusterAssignment {
    pub fn cluster(&self, id: ClusterId) -> &[NodeId] {
        &self.clusters[id.0 as usize]
    }

    pub fn cluster_ids(&self) -> impl Iterator<Item = ClusterId> {
        (0..self.clusters.len() as u32).map(ClusterId)
    }
}

/// Union-find with path compression and union by rank.
#[derive(Debug, Clone)]
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }

    /// Returns the surviving root.
    fn union(&mut self, a: usize, b: usize) -> usize {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return ra;
        }
        if self.rank[ra] < self.rank[rb] {
            self.parent[ra] = rb;
            rb
        } else {
            if self.rank[ra] == self.rank[rb] {
                self.rank[ra] += 1;
            }
            self.parent[rb] = ra;
            ra
        }
    }
}

/// Partitions the marked nodes of `graph` into clusters.
pub fn assign_clusters(
    graph: &Graph,
    options: &ClusterOptions,
) -> BridgeResult<ClusterAssignment> {
    let deadness = DeadnessAnalysis::compute(graph)?;
    let order = graph.topo_order()?;

    let arena_len = order.iter().map(|id| id.0 as usize + 1).max().unwrap_or(0);
    let mut uf = UnionFind::new(arena_len);
    let mut cycles = CycleGraph::new();
    let mut cycle_node: Vec<usize> = Vec::with_capacity(arena_len);
    for _ in 0..arena_len {
        cycle_node.push(cycles.add_node());
    }

    // Seed the quotient graph with every edge of the (acyclic) host graph.
    for &id in &order {
        for edge in graph.out_edges(id) {
            if !cycles.insert_edge(cycle_node[id.0 as usize], cycle_node[edge.dst.0 as usize]) {
                return Err(BridgeError::structural(format!(
                    "host graph has a cycle through edge {} -> {}",
                    edge.src, edge.dst
                )));
            }
        }
    }

    // Greedy contraction in deterministic edge order.
    for &src in &order {
        for edge in graph.out_edges(src) {
            if edge.is_control() {
                continue;
            }
            let dst = edge.dst;
            if !is_marked(graph.node(src)?) || !is_marked(graph.node(dst)?) {
                continue;
            }
            if graph.node(src)?.attr_str("device") != graph.node(dst)?.attr_str("device") {
                continue;
            }
            if !deadness.same_predicate(src, dst) {
                continue;
            }
            let ra = uf.find(src.0 as usize);
            let rb = uf.find(dst.0 as usize);
            if ra == rb {
                continue;
            }
            let ca = cycle_node[ra];
            let cb = cycle_node[rb];
            if !cycles.can_contract_edge(ca, cb) {
                debug!(src = %src, dst = %dst, "contraction skipped, would form a cycle");
                continue;
            }
            let survivor = cycles.contract_edge(ca, cb);
            let root = uf.union(ra, rb);
            cycle_node[root] = survivor;
        }
    }

    // Group marked nodes by representative, preserving first-seen order.
    let mut groups: Vec<Vec<NodeId>> = Vec::new();
    let mut group_of_root: HashMap<usize, usize> = HashMap::new();
    for &id in &order {
        if !is_marked(graph.node(id)?) {
            continue;
        }
        let root = uf.find(id.0 as usize);
        let group = *group_of_root.entry(root).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[group].push(id);
    }

    // Deassignment sweep.
    let mut assignment = ClusterAssignment::default();
    for group in groups {
        if group.len() < options.min_cluster_size {
            debug!(size = group.len(), "cluster deassigned, below minimum size");
            continue;
        }
        if !static_inputs_closed(graph, &group)? {
            debug!("cluster deassigned, static input fed from outside");
            continue;
        }
        let id = ClusterId(assignment.clusters.len() as u32);
        for &node in &group {
            assignment.cluster_of.insert(node, id);
        }
        assignment.clusters.push(group);
    }

    debug!(
        clusters = assignment.clusters.len(),
        "cluster assignment complete"
    );
    Ok(assignment)
}

/// Every static input of every member must be produced inside the cluster,
/// otherwise the builder could not bake it as a constant.
fn static_inputs_closed(graph: &Graph, members: &[NodeId]) -> BridgeResult<bool> {
    let member_set: std::collections::HashSet<NodeId> = members.iter().copied().collect();
    for &id in members {
        let node = graph.node(id)?;
        let num_inputs = graph.num_inputs(id);
        for &slot in mark::static_input_indexes(&node.op_type) {
            let Some(slot) = mark::resolve_static_slot(slot, num_inputs) else {
                return Ok(false);
            };
            let producer = graph.input_node(id, slot)?;
            if !member_set.contains(&producer) {
                return Ok(false);
            }
        }
    }
    Ok(true)
}
