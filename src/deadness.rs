//! Deadness analysis over conditional control flow.
//!
//! `Switch` nodes forward their input on exactly one of two outputs; the
//! other output is dead for that execution. Every node therefore carries a
//! liveness predicate: the conjunction of switch branches it sits behind.
//! `Merge` joins complementary branches back together, which drops the
//! corresponding symbols. Two nodes may share a cluster only if their
//! predicates are equal, otherwise the fused cluster would observe a dead
//! tensor. The analysis is read-only.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::error::BridgeResult;
use crate::graph::{Graph, NodeId};

/// One switch branch: the switch node's name and which output was taken.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Branch {
    pub switch: String,
    pub output: i32,
}

/// Conjunction of branches; the empty set is the always-live predicate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Predicate(BTreeSet<Branch>);

impl Predicate {
    pub fn always_live() -> Self {
        Self::default()
    }

    pub fn is_always_live(&self) -> bool {
        self.0.is_empty()
    }

    fn with_branch(mut self, branch: Branch) -> Self {
        self.0.insert(branch);
        self
    }

    fn intersect(&self, other: &Predicate) -> Predicate {
        Predicate(self.0.intersection(&other.0).cloned().collect())
    }

    fn union(&mut self, other: &Predicate) {
        self.0.extend(other.0.iter().cloned());
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "#true");
        }
        for (idx, branch) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, " & ")?;
            }
            write!(f, "{}:{}", branch.switch, branch.output)?;
        }
        Ok(())
    }
}

/// Per-node predicates for one graph.
#[derive(Debug, Clone)]
pub struct DeadnessAnalysis {
    predicates: HashMap<NodeId, Predicate>,
}

impl DeadnessAnalysis {
    /// Single topological sweep; each node's predicate is derived from its
    /// producers' predicates plus the branch taken on any switch edge.
    pub fn compute(graph: &Graph) -> BridgeResult<Self> {
        let order = graph.topo_order()?;
        let mut predicates: HashMap<NodeId, Predicate> = HashMap::new();

        for id in order {
            let node = graph.node(id)?;
            let mut incoming: Vec<Predicate> = Vec::new();

            for edge in graph
                .value_in_edges(id)
                .into_iter()
                .chain(graph.control_in_edges(id))
            {
                let producer = graph.node(edge.src)?;
                let mut pred = predicates.get(&edge.src).cloned().unwrap_or_default();
                if producer.op_type == "Switch" && !edge.is_control() {
                    pred = pred.with_branch(Branch {
                        switch: producer.name.clone(),
                        output: edge.src_output,
                    });
                }
                incoming.push(pred);
            }

            let predicate = if incoming.is_empty() {
                Predicate::always_live()
            } else if node.op_type == "Merge" {
                // Complementary branches of the same switch cancel, which
                // intersection captures: only constraints common to every
                // input survive the merge.
                incoming
                    .iter()
                    .skip(1)
                    .fold(incoming[0].clone(), |acc, pred| acc.intersect(pred))
            } else {
                let mut acc = Predicate::always_live();
                for pred in &incoming {
                    acc.union(pred);
                }
                acc
            };
            predicates.insert(id, predicate);
        }

        Ok(Self { predicates })
    }

    pub fn predicate(&self, id: NodeId) -> &Predicate {
        static ALWAYS: Predicate = Predicate(BTreeSet::new());
        self.predicates.get(&id).unwrap_or(&ALWAYS)
    }

    /// Clustering gate: both nodes must sit behind the same branches.
    pub fn same_predicate(&self, a: NodeId, b: NodeId) -> bool {
        self.predicate(a) == self.predicate(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;

    fn simple_node(name: &str, op: &str) -> Node {
        Node::new(name, op)
    }

    #[test]
    fn switch_outputs_carry_distinct_predicates() {
        let mut g = Graph::new();
        let data = g.add_node(simple_node("data", "Const"));
        let cond = g.add_node(simple_node("cond", "Const"));
        let sw = g.add_node(simple_node("sw", "Switch"));
        let then_branch = g.add_node(simple_node("then", "Relu"));
        let else_branch = g.add_node(simple_node("else", "Neg"));
        g.add_edge(data, 0, sw, 0);
        g.add_edge(cond, 0, sw, 1);
        g.add_edge(sw, 1, then_branch, 0);
        g.add_edge(sw, 0, else_branch, 0);

        let analysis = DeadnessAnalysis::compute(&g).unwrap();
        assert!(!analysis.same_predicate(then_branch, else_branch));
        assert!(analysis.same_predicate(data, cond));
        assert!(analysis.predicate(data).is_always_live());
    }

    #[test]
    fn merge_cancels_complementary_branches() {
        let mut g = Graph::new();
        let data = g.add_node(simple_node("data", "Const"));
        let cond = g.add_node(simple_node("cond", "Const"));
        let sw = g.add_node(simple_node("sw", "Switch"));
        let then_branch = g.add_node(simple_node("then", "Relu"));
        let else_branch = g.add_node(simple_node("else", "Neg"));
        let merge = g.add_node(simple_node("merge", "Merge"));
        let after = g.add_node(simple_node("after", "Abs"));
        g.add_edge(data, 0, sw, 0);
        g.add_edge(cond, 0, sw, 1);
        g.add_edge(sw, 1, then_branch, 0);
        g.add_edge(sw, 0, else_branch, 0);
        g.add_edge(then_branch, 0, merge, 0);
        g.add_edge(else_branch, 0, merge, 1);
        g.add_edge(merge, 0, after, 0);

        let analysis = DeadnessAnalysis::compute(&g).unwrap();
        assert!(analysis.predicate(merge).is_always_live());
        assert!(analysis.same_predicate(after, data));
    }
}
