pub mod api;
pub mod cluster;
pub mod cycles;
pub mod deadness;
pub mod encapsulate;
pub mod engine;
mod error;
pub mod exec;
pub mod graph;
pub mod ir;
pub mod mark;
pub mod passes;
pub mod rewrite;
pub mod translate;

pub use cluster::{ClusterAssignment, ClusterId, ClusterOptions};
pub use error::{BridgeError, BridgeResult};
pub use exec::execute_cluster;
pub use graph::{Graph, Node, NodeId};
pub use ir::{DType, FunctionIr, TensorLiteral, TensorSpec};
pub use mark::{MarkOptions, MarkReport};
pub use rewrite::{rewrite_graph, RewriteOptions, RewriteReport};
