//! Incremental cycle oracle over the cluster quotient graph.
//!
//! Clustering asks, edge by edge, whether merging two clusters keeps the
//! quotient graph acyclic. Answers must never be a false "allowed", and a
//! full topological recompute per query is too slow, so the structure
//! keeps a dynamic topological order (Pearce-Kelly): ranks are repaired
//! only inside the affected region when an edge insertion goes against the
//! current order.

use std::collections::BTreeSet;

/// DAG with incremental edge insertion and edge contraction.
#[derive(Debug, Clone, Default)]
pub struct CycleGraph {
    ranks: Vec<u32>,
    out: Vec<BTreeSet<usize>>,
    incoming: Vec<BTreeSet<usize>>,
    live: Vec<bool>,
}

impl CycleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an isolated node and returns its index.
    pub fn add_node(&mut self) -> usize {
        let id = self.ranks.len();
        self.ranks.push(id as u32);
        self.out.push(BTreeSet::new());
        self.incoming.push(BTreeSet::new());
        self.live.push(true);
        id
    }

    pub fn has_edge(&self, src: usize, dst: usize) -> bool {
        self.out[src].contains(&dst)
    }

    /// Inserts `src -> dst`. Returns `false` (leaving the graph unchanged)
    /// if the edge would close a cycle.
    pub fn insert_edge(&mut self, src: usize, dst: usize) -> bool {
        debug_assert!(self.live[src] && self.live[dst]);
        if src == dst {
            return false;
        }
        if self.out[src].contains(&dst) {
            return true;
        }
        if self.ranks[src] >= self.ranks[dst] {
            // Insertion goes against the current order. Walk forward from
            // dst within the affected rank window; reaching src means a
            // cycle. Otherwise repair ranks across the forward region and
            // the backward region of src.
            let mut forward = Vec::new();
            if self.forward_reaches(dst, src, self.ranks[src], &mut forward) {
                return false;
            }
            let backward = self.backward_region(src, self.ranks[dst]);
            self.reorder(&backward, &forward);
        }
        self.out[src].insert(dst);
        self.incoming[dst].insert(src);
        true
    }

    pub fn remove_edge(&mut self, src: usize, dst: usize) {
        self.out[src].remove(&dst);
        self.incoming[dst].remove(&src);
    }

    /// Whether a directed path `src -> ... -> dst` exists. Exploration is
    /// pruned by rank; nodes ranked past `dst` cannot be on such a path.
    pub fn is_reachable(&self, src: usize, dst: usize) -> bool {
        if src == dst {
            return true;
        }
        let limit = self.ranks[dst];
        let mut stack = vec![src];
        let mut seen = BTreeSet::new();
        while let Some(node) = stack.pop() {
            if node == dst {
                return true;
            }
            if !seen.insert(node) {
                continue;
            }
            for &next in &self.out[node] {
                if self.ranks[next] <= limit {
                    stack.push(next);
                }
            }
        }
        false
    }

    /// Whether merging `a` and `b` keeps the graph acyclic: any path
    /// between them other than direct edges would collapse into a cycle.
    pub fn can_contract_edge(&mut self, a: usize, b: usize) -> bool {
        let ab = self.has_edge(a, b);
        let ba = self.has_edge(b, a);
        self.remove_edge(a, b);
        self.remove_edge(b, a);
        let cyclic = self.is_reachable(a, b) || self.is_reachable(b, a);
        if ab {
            self.insert_edge(a, b);
        }
        if ba {
            self.insert_edge(b, a);
        }
        !cyclic
    }

    /// Merges `b` into `a`; call only after [`Self::can_contract_edge`]
    /// approved the pair. Returns the surviving node (`a`).
    pub fn contract_edge(&mut self, a: usize, b: usize) -> usize {
        self.remove_edge(a, b);
        self.remove_edge(b, a);
        let preds: Vec<usize> = self.incoming[b].iter().copied().collect();
        let succs: Vec<usize> = self.out[b].iter().copied().collect();
        for p in preds {
            self.remove_edge(p, b);
            if p != a {
                self.insert_edge(p, a);
            }
        }
        for s in succs {
            self.remove_edge(b, s);
            if s != a {
                self.insert_edge(a, s);
            }
        }
        self.live[b] = false;
        a
    }

    fn forward_reaches(
        &self,
        start: usize,
        target: usize,
        limit: u32,
        visited: &mut Vec<usize>,
    ) -> bool {
        let mut stack = vec![start];
        let mut seen = BTreeSet::new();
        while let Some(node) = stack.pop() {
            if node == target {
                return true;
            }
            if !seen.insert(node) {
                continue;
            }
            visited.push(node);
            for &next in &self.out[node] {
                if self.ranks[next] <= limit {
                    stack.push(next);
                }
            }
        }
        false
    }

    /// Nodes that reach `start` through edges whose ranks lie at or above
    /// `limit` (`start` included).
    fn backward_region(&self, start: usize, limit: u32) -> Vec<usize> {
        let mut stack = vec![start];
        let mut seen = BTreeSet::new();
        let mut region = Vec::new();
        while let Some(node) = stack.pop() {
            if !seen.insert(node) {
                continue;
            }
            region.push(node);
            for &prev in &self.incoming[node] {
                if self.ranks[prev] >= limit {
                    stack.push(prev);
                }
            }
        }
        region
    }

    /// Reassigns the pooled ranks of both regions so every backward node
    /// precedes every forward node, keeping relative order within each.
    fn reorder(&mut self, backward: &[usize], forward: &[usize]) {
        let mut backward: Vec<usize> = backward.to_vec();
        let mut forward: Vec<usize> = forward.to_vec();
        backward.sort_by_key(|&n| self.ranks[n]);
        forward.sort_by_key(|&n| self.ranks[n]);

        let mut free_ranks: Vec<u32> = backward
            .iter()
            .chain(forward.iter())
            .map(|&n| self.ranks[n])
            .collect();
        free_ranks.sort_unstable();

        for (slot, node) in backward.into_iter().chain(forward).enumerate() {
            self.ranks[node] = free_ranks[slot];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_direct_cycle() {
        let mut g = CycleGraph::new();
        let a = g.add_node();
        let b = g.add_node();
        assert!(g.insert_edge(a, b));
        assert!(!g.insert_edge(b, a));
        assert!(g.has_edge(a, b));
        assert!(!g.has_edge(b, a));
    }

    #[test]
    fn rejects_transitive_cycle_after_reorder() {
        let mut g = CycleGraph::new();
        let a = g.add_node();
        let b = g.add_node();
        let c = g.add_node();
        // Insert against allocation order so the rank repair path runs.
        assert!(g.insert_edge(c, b));
        assert!(g.insert_edge(b, a));
        assert!(!g.insert_edge(a, c));
    }

    #[test]
    fn contraction_refused_when_a_path_bypasses_the_edge() {
        let mut g = CycleGraph::new();
        let a = g.add_node();
        let b = g.add_node();
        let c = g.add_node();
        g.insert_edge(a, b);
        g.insert_edge(b, c);
        g.insert_edge(a, c);
        // Merging a and c would pull b into a cycle.
        assert!(!g.can_contract_edge(a, c));
        assert!(g.can_contract_edge(a, b));
        let rep = g.contract_edge(a, b);
        assert_eq!(rep, a);
        assert!(g.has_edge(a, c));
    }

    #[test]
    fn contraction_moves_neighbor_edges_to_survivor() {
        let mut g = CycleGraph::new();
        let a = g.add_node();
        let b = g.add_node();
        let p = g.add_node();
        let s = g.add_node();
        g.insert_edge(p, b);
        g.insert_edge(a, b);
        g.insert_edge(b, s);
        assert!(g.can_contract_edge(a, b));
        g.contract_edge(a, b);
        assert!(g.has_edge(p, a));
        assert!(g.has_edge(a, s));
        assert!(!g.has_edge(a, b));
    }
}
