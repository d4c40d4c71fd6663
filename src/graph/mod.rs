//! Host-graph model consumed and rewritten by the bridge.
//!
//! The host runtime owns graphs of named, typed-attribute op nodes joined
//! by positional value edges and by control edges. The bridge only needs
//! the accessors below plus explicit surgery used during encapsulation.

mod eval;
mod tensor_data;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

pub use eval::eval_graph;
pub use tensor_data::TensorData;

/// Arena index of a node within its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Slot number used on both ends of a control edge.
pub const CONTROL_SLOT: i32 = -1;

/// Host scalar element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataType {
    F16,
    F32,
    F64,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    Bool,
}

impl DataType {
    pub fn size_in_bytes(self) -> usize {
        match self {
            DataType::I8 | DataType::U8 | DataType::Bool => 1,
            DataType::F16 | DataType::I16 | DataType::U16 => 2,
            DataType::F32 | DataType::I32 | DataType::U32 => 4,
            DataType::F64 | DataType::I64 | DataType::U64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DataType::F16 | DataType::F32 | DataType::F64)
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DataType::I8
                | DataType::I16
                | DataType::I32
                | DataType::I64
                | DataType::U8
                | DataType::U16
                | DataType::U32
                | DataType::U64
        )
    }
}

/// Typed attribute union attached to host nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Int(i64),
    IntList(Vec<i64>),
    Float(f32),
    FloatList(Vec<f32>),
    Str(String),
    StrList(Vec<String>),
    Bool(bool),
    Type(DataType),
    Shape(Vec<i64>),
    Tensor(TensorData),
}

/// Directed edge; value edges are positional, control edges use
/// [`CONTROL_SLOT`] on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    pub src: NodeId,
    pub src_output: i32,
    pub dst: NodeId,
    pub dst_input: i32,
}

impl Edge {
    pub fn is_control(&self) -> bool {
        self.dst_input == CONTROL_SLOT
    }
}

/// A single host op instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub op_type: String,
    pub attrs: BTreeMap<String, AttrValue>,
}

impl Node {
    pub fn new(name: impl Into<String>, op_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op_type: op_type.into(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: AttrValue) -> Self {
        self.attrs.insert(key.into(), value);
        self
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: AttrValue) {
        self.attrs.insert(key.into(), value);
    }

    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.get(key)
    }

    pub fn attr_int(&self, key: &str) -> Option<i64> {
        match self.attrs.get(key) {
            Some(AttrValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn attr_int_list(&self, key: &str) -> Option<&[i64]> {
        match self.attrs.get(key) {
            Some(AttrValue::IntList(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn attr_float(&self, key: &str) -> Option<f32> {
        match self.attrs.get(key) {
            Some(AttrValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        match self.attrs.get(key) {
            Some(AttrValue::Str(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn attr_bool(&self, key: &str) -> Option<bool> {
        match self.attrs.get(key) {
            Some(AttrValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn attr_type(&self, key: &str) -> Option<DataType> {
        match self.attrs.get(key) {
            Some(AttrValue::Type(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn attr_tensor(&self, key: &str) -> Option<&TensorData> {
        match self.attrs.get(key) {
            Some(AttrValue::Tensor(v)) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("node {0} does not exist")]
    NodeNotFound(NodeId),
    #[error("node \"{node}\" has no input at slot {slot}")]
    MissingInput { node: String, slot: i32 },
    #[error("node \"{node}\" is missing attribute \"{attr}\"")]
    MissingAttr { node: String, attr: String },
    #[error("edge {src}:{src_output} -> {dst}:{dst_input} references a removed node")]
    DanglingEdge {
        src: NodeId,
        src_output: i32,
        dst: NodeId,
        dst_input: i32,
    },
    #[error("graph contains a cycle involving node \"{0}\"")]
    Cycle(String),
    #[error("evaluation error at \"{node}\": {message}")]
    Eval { node: String, message: String },
}

/// Mutable host graph: node arena plus an edge list with per-node indices.
///
/// Removed nodes leave tombstones so `NodeId`s stay stable across the
/// encapsulation rewrite.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    nodes: Vec<Option<Node>>,
    in_edges: Vec<SmallVec<[Edge; 4]>>,
    out_edges: Vec<SmallVec<[Edge; 4]>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(node));
        self.in_edges.push(SmallVec::new());
        self.out_edges.push(SmallVec::new());
        id
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.nodes
            .get(id.0 as usize)
            .and_then(|slot| slot.as_ref())
            .ok_or(GraphError::NodeNotFound(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, GraphError> {
        self.nodes
            .get_mut(id.0 as usize)
            .and_then(|slot| slot.as_mut())
            .ok_or(GraphError::NodeNotFound(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes
            .get(id.0 as usize)
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Live node ids in ascending arena order (the host runtime's stable
    /// iteration order).
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(idx, _)| NodeId(idx as u32))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn add_edge(&mut self, src: NodeId, src_output: i32, dst: NodeId, dst_input: i32) {
        let edge = Edge {
            src,
            src_output,
            dst,
            dst_input,
        };
        self.out_edges[src.0 as usize].push(edge);
        self.in_edges[dst.0 as usize].push(edge);
    }

    pub fn add_control_edge(&mut self, src: NodeId, dst: NodeId) {
        self.add_edge(src, CONTROL_SLOT, dst, CONTROL_SLOT);
    }

    pub fn remove_edge(&mut self, edge: Edge) {
        self.out_edges[edge.src.0 as usize].retain(|e| *e != edge);
        self.in_edges[edge.dst.0 as usize].retain(|e| *e != edge);
    }

    /// Removes a node and every edge touching it.
    pub fn remove_node(&mut self, id: NodeId) -> Result<(), GraphError> {
        if !self.contains(id) {
            return Err(GraphError::NodeNotFound(id));
        }
        let incoming: Vec<Edge> = self.in_edges[id.0 as usize].iter().copied().collect();
        let outgoing: Vec<Edge> = self.out_edges[id.0 as usize].iter().copied().collect();
        for edge in incoming.into_iter().chain(outgoing) {
            self.remove_edge(edge);
        }
        self.nodes[id.0 as usize] = None;
        Ok(())
    }

    /// Value in-edges sorted by destination slot.
    pub fn value_in_edges(&self, id: NodeId) -> Vec<Edge> {
        let mut edges: Vec<Edge> = self.in_edges[id.0 as usize]
            .iter()
            .copied()
            .filter(|e| !e.is_control())
            .collect();
        edges.sort_by_key(|e| e.dst_input);
        edges
    }

    pub fn control_in_edges(&self, id: NodeId) -> Vec<Edge> {
        let mut edges: Vec<Edge> = self.in_edges[id.0 as usize]
            .iter()
            .copied()
            .filter(|e| e.is_control())
            .collect();
        edges.sort_by_key(|e| e.src);
        edges
    }

    /// All out-edges in a deterministic order.
    pub fn out_edges(&self, id: NodeId) -> Vec<Edge> {
        let mut edges: Vec<Edge> = self.out_edges[id.0 as usize].iter().copied().collect();
        edges.sort();
        edges
    }

    pub fn num_inputs(&self, id: NodeId) -> usize {
        self.in_edges[id.0 as usize]
            .iter()
            .filter(|e| !e.is_control())
            .count()
    }

    /// The value edge feeding `slot` of `dst`.
    pub fn input_edge(&self, dst: NodeId, slot: usize) -> Result<Edge, GraphError> {
        self.in_edges[dst.0 as usize]
            .iter()
            .copied()
            .find(|e| e.dst_input == slot as i32)
            .ok_or_else(|| GraphError::MissingInput {
                node: self
                    .node(dst)
                    .map(|n| n.name.clone())
                    .unwrap_or_else(|_| dst.to_string()),
                slot: slot as i32,
            })
    }

    pub fn input_node(&self, dst: NodeId, slot: usize) -> Result<NodeId, GraphError> {
        Ok(self.input_edge(dst, slot)?.src)
    }

    /// Deterministic topological order: Kahn's algorithm with ready nodes
    /// drained in name order. Control edges count as dependencies.
    pub fn topo_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut pending: BTreeMap<NodeId, usize> = BTreeMap::new();
        for id in self.node_ids() {
            pending.insert(id, self.in_edges[id.0 as usize].len());
        }

        let mut ready: BTreeSet<(String, NodeId)> = BTreeSet::new();
        for (&id, &count) in &pending {
            if count == 0 {
                ready.insert((self.node(id)?.name.clone(), id));
            }
        }

        let mut order = Vec::with_capacity(pending.len());
        while let Some(entry) = ready.iter().next().cloned() {
            ready.remove(&entry);
            let (_, id) = entry;
            order.push(id);
            for edge in self.out_edges(id) {
                let remaining = pending
                    .get_mut(&edge.dst)
                    .ok_or(GraphError::NodeNotFound(edge.dst))?;
                *remaining -= 1;
                if *remaining == 0 {
                    ready.insert((self.node(edge.dst)?.name.clone(), edge.dst));
                }
            }
        }

        if order.len() != pending.len() {
            let stuck = pending
                .keys()
                .find(|id| !order.contains(id))
                .copied()
                .ok_or(GraphError::NodeNotFound(NodeId(0)))?;
            return Err(GraphError::Cycle(self.node(stuck)?.name.clone()));
        }
        Ok(order)
    }

    /// Checks that no edge references a removed node and that every node's
    /// value inputs occupy dense slots `0..n`. Run after graph surgery.
    pub fn verify(&self) -> Result<(), GraphError> {
        for id in self.node_ids() {
            for edge in self.in_edges[id.0 as usize]
                .iter()
                .chain(self.out_edges[id.0 as usize].iter())
            {
                if !self.contains(edge.src) || !self.contains(edge.dst) {
                    return Err(GraphError::DanglingEdge {
                        src: edge.src,
                        src_output: edge.src_output,
                        dst: edge.dst,
                        dst_input: edge.dst_input,
                    });
                }
            }
            let inputs = self.value_in_edges(id);
            for (slot, edge) in inputs.iter().enumerate() {
                if edge.dst_input != slot as i32 {
                    return Err(GraphError::MissingInput {
                        node: self.node(id)?.name.clone(),
                        slot: slot as i32,
                    });
                }
            }
        }
        Ok(())
    }

    /// Looks a node up by name (test and diagnostics helper).
    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.node_ids()
            .find(|id| self.node(*id).map(|n| n.name == name).unwrap_or(false))
    }
}
