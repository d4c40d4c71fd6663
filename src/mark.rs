//! Marking pass: decides, per node, whether the accelerator can take it.
//!
//! Three process-wide tables drive the decision: a confirmation table
//! (op type to attribute predicate), a type-constraint table (attr name to
//! allowed scalar classes), and a static-input table (input slots that
//! must be constant at translation time). A node passes only if all three
//! agree; the verdict is stored as the [`MARK_ATTR`] attribute and every
//! rejection is recorded with its reason. Running the pass twice yields
//! identical marks.

use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use tracing::debug;

use crate::error::BridgeResult;
use crate::graph::{AttrValue, DataType, Graph, Node, NodeId};

/// Attribute written on nodes the accelerator may claim.
pub const MARK_ATTR: &str = "_ferry_marked";

/// Attribute predicate; `Err` carries the human-readable rejection reason.
type ConfirmationFn = fn(&Graph, NodeId) -> Result<(), String>;

/// Scalar classes used by the type-constraint table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeClass {
    Any,
    Numeric,
    Float,
    Integer,
    Index,
    Bool,
}

impl TypeClass {
    pub fn allows(self, dtype: DataType) -> bool {
        match self {
            TypeClass::Any => true,
            TypeClass::Numeric => dtype.is_float() || dtype.is_integer(),
            TypeClass::Float => dtype.is_float(),
            TypeClass::Integer => dtype.is_integer(),
            TypeClass::Index => matches!(dtype, DataType::I32 | DataType::I64),
            TypeClass::Bool => dtype == DataType::Bool,
        }
    }
}

/// Per-run marking options; `disabled_ops` mirrors the runtime
/// disabled-ops setting.
#[derive(Debug, Clone, Default)]
pub struct MarkOptions {
    pub disabled_ops: BTreeSet<String>,
}

/// Outcome of a marking run: how many nodes were marked plus one
/// `(node name, reason)` entry per rejection.
#[derive(Debug, Clone, Default)]
pub struct MarkReport {
    pub marked: usize,
    pub reasons: Vec<(String, String)>,
}

impl MarkReport {
    pub fn reason_for(&self, node_name: &str) -> Option<&str> {
        self.reasons
            .iter()
            .find(|(name, _)| name == node_name)
            .map(|(_, reason)| reason.as_str())
    }
}

pub fn is_marked(node: &Node) -> bool {
    node.attr_bool(MARK_ATTR).unwrap_or(false)
}

/// Input slots of `op_type` that must be produced by constants. A negative
/// index counts from the end of the input list.
pub fn static_input_indexes(op_type: &str) -> &'static [i32] {
    static_input_table()
        .get(op_type)
        .copied()
        .unwrap_or(&[])
}

/// Resolves a possibly negative static-input slot against the node's
/// actual input count.
pub fn resolve_static_slot(slot: i32, num_inputs: usize) -> Option<usize> {
    if slot >= 0 {
        let slot = slot as usize;
        (slot < num_inputs).then_some(slot)
    } else {
        num_inputs.checked_sub(slot.unsigned_abs() as usize)
    }
}

/// Marks every claimable node in `graph` and reports the rejections.
pub fn mark_graph(graph: &mut Graph, options: &MarkOptions) -> BridgeResult<MarkReport> {
    let mut report = MarkReport::default();
    let ids: Vec<NodeId> = graph.node_ids().collect();

    for id in ids {
        let verdict = confirm_node(graph, id, options)?;
        let node = graph.node_mut(id)?;
        match verdict {
            Ok(()) => {
                node.set_attr(MARK_ATTR, AttrValue::Bool(true));
                report.marked += 1;
            }
            Err(reason) => {
                node.attrs.remove(MARK_ATTR);
                debug!(node = %node.name, %reason, "node not marked");
                report.reasons.push((node.name.clone(), reason));
            }
        }
    }
    Ok(report)
}

fn confirm_node(
    graph: &Graph,
    id: NodeId,
    options: &MarkOptions,
) -> BridgeResult<Result<(), String>> {
    let node = graph.node(id)?;
    let op_type = node.op_type.clone();

    if options.disabled_ops.contains(&op_type) {
        return Ok(Err(format!(
            "op type {op_type} is listed in the disabled-ops setting"
        )));
    }

    let Some(confirm) = confirmation_table().get(op_type.as_str()) else {
        return Ok(Err("no confirmation function registered".to_string()));
    };

    if let Some(constraints) = type_constraint_table().get(op_type.as_str()) {
        for (attr, class) in *constraints {
            if let Some(dtype) = node.attr_type(attr) {
                if !class.allows(dtype) {
                    return Ok(Err(format!(
                        "attribute {attr} has unsupported dtype {dtype:?}"
                    )));
                }
            }
        }
    }

    let num_inputs = graph.num_inputs(id);
    for &slot in static_input_indexes(&op_type) {
        let Some(slot) = resolve_static_slot(slot, num_inputs) else {
            return Ok(Err(format!("missing static input at slot {slot}")));
        };
        if !input_is_constant(graph, id, slot)? {
            return Ok(Err(format!(
                "input {slot} of {op_type} must be a constant"
            )));
        }
    }

    Ok(confirm(graph, id))
}

/// Follows pass-through nodes from `slot` of `dst` and reports whether the
/// ultimate producer is a `Const`.
pub fn input_is_constant(graph: &Graph, dst: NodeId, slot: usize) -> BridgeResult<bool> {
    let mut current = graph.input_node(dst, slot)?;
    loop {
        let node = graph.node(current)?;
        match node.op_type.as_str() {
            "Const" => return Ok(true),
            "Identity" | "Snapshot" | "PreventGradient" => {
                current = graph.input_node(current, 0)?;
            }
            _ => return Ok(false),
        }
    }
}

fn confirm_always(_graph: &Graph, _id: NodeId) -> Result<(), String> {
    Ok(())
}

fn confirm_data_format(graph: &Graph, id: NodeId) -> Result<(), String> {
    let node = graph.node(id).map_err(|e| e.to_string())?;
    match node.attr_str("data_format") {
        None | Some("NHWC") | Some("NCHW") => Ok(()),
        Some(other) => Err(format!("unsupported data_format \"{other}\"")),
    }
}

fn confirm_spatial(graph: &Graph, id: NodeId) -> Result<(), String> {
    confirm_data_format(graph, id)?;
    let node = graph.node(id).map_err(|e| e.to_string())?;
    match node.attr_str("padding") {
        None | Some("SAME") | Some("VALID") | Some("EXPLICIT") => Ok(()),
        Some(other) => Err(format!("unsupported padding \"{other}\"")),
    }
}

fn confirm_batch_norm(graph: &Graph, id: NodeId) -> Result<(), String> {
    confirm_data_format(graph, id)?;
    let node = graph.node(id).map_err(|e| e.to_string())?;
    if node.attr_bool("is_training").unwrap_or(false) {
        return Err("training-mode batch norm stays on the host".to_string());
    }
    Ok(())
}

fn confirm_block_size(graph: &Graph, id: NodeId) -> Result<(), String> {
    let node = graph.node(id).map_err(|e| e.to_string())?;
    match node.attr_int("block_size") {
        Some(b) if b >= 1 => Ok(()),
        Some(b) => Err(format!("block_size {b} must be positive")),
        None => Err("missing block_size attribute".to_string()),
    }
}

fn confirmation_table() -> &'static HashMap<&'static str, ConfirmationFn> {
    static TABLE: OnceLock<HashMap<&'static str, ConfirmationFn>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table: HashMap<&'static str, ConfirmationFn> = HashMap::new();

        const ALWAYS: &[&str] = &[
            "Abs", "Acos", "Acosh", "Add", "AddN", "AddV2", "All", "Any", "ArgMax", "ArgMin",
            "Asin", "Asinh", "Atan", "Atanh", "Cast", "Ceil", "ConcatV2", "Const", "Cos", "Cosh",
            "Cumsum", "Elu", "Equal", "Erf", "Exp", "ExpandDims", "Fill", "Floor", "FloorDiv",
            "FloorMod", "Gather", "GatherNd", "GatherV2", "Greater", "GreaterEqual", "Identity",
            "L2Loss", "LeakyRelu", "Less", "LessEqual", "Log", "Log1p", "LogicalAnd", "LogicalNot",
            "LogicalOr", "LogSoftmax", "MatMul", "Max", "Maximum", "Mean", "Min", "Minimum",
            "MirrorPad", "Mod", "Mul", "Neg", "NoOp", "NotEqual", "OneHot", "Pack", "Pad", "PadV2",
            "Pow", "PreventGradient", "Prod", "Range", "Rank", "RealDiv", "Reciprocal", "Relu",
            "Relu6", "Reshape", "ReverseV2", "Rsqrt", "ScatterNd", "Select", "SelectV2", "Shape",
            "Sigmoid", "Sign", "Sin", "Sinh", "Size", "Slice", "Snapshot", "Softmax", "Softplus",
            "Split", "SplitV", "Sqrt", "Square", "SquaredDifference", "Squeeze", "StridedSlice", "Sub",
            "Sum", "Tan", "Tanh", "Tile", "TopKV2", "Transpose", "Unpack", "Xdivy", "ZerosLike",
        ];
        for op in ALWAYS {
            table.insert(op, confirm_always as ConfirmationFn);
        }

        for op in ["Conv2D", "Conv2DBackpropInput", "DepthwiseConv2dNative", "AvgPool", "MaxPool"]
        {
            table.insert(op, confirm_spatial as ConfirmationFn);
        }
        for op in ["FusedBatchNorm", "FusedBatchNormV2", "FusedBatchNormV3"] {
            table.insert(op, confirm_batch_norm as ConfirmationFn);
        }
        for op in ["DepthToSpace", "SpaceToDepth"] {
            table.insert(op, confirm_block_size as ConfirmationFn);
        }
        table.insert("BiasAdd", confirm_data_format as ConfirmationFn);
        table.insert("LRN", confirm_always as ConfirmationFn);
        table.insert("SpaceToBatchND", confirm_always as ConfirmationFn);
        table.insert("BatchToSpaceND", confirm_always as ConfirmationFn);

        table
    })
}

fn type_constraint_table() -> &'static HashMap<&'static str, &'static [(&'static str, TypeClass)]>
{
    static TABLE: OnceLock<HashMap<&'static str, &'static [(&'static str, TypeClass)]>> =
        OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table: HashMap<&'static str, &'static [(&'static str, TypeClass)]> =
            HashMap::new();

        const T_NUMERIC: &[(&str, TypeClass)] = &[("T", TypeClass::Numeric)];
        const T_FLOAT: &[(&str, TypeClass)] = &[("T", TypeClass::Float)];
        const T_BOOL: &[(&str, TypeClass)] = &[("T", TypeClass::Bool)];
        const T_INDEX: &[(&str, TypeClass)] =
            &[("T", TypeClass::Numeric), ("Tidx", TypeClass::Index)];
        const T_ANY: &[(&str, TypeClass)] = &[("T", TypeClass::Any)];

        for op in [
            "Add", "AddN", "AddV2", "BiasAdd", "FloorDiv", "FloorMod", "MatMul", "Maximum",
            "Minimum", "Mod", "Mul", "Neg", "Pow", "RealDiv", "Sub", "Abs", "Sign", "Square",
            "SquaredDifference", "Cumsum",
        ] {
            table.insert(op, T_NUMERIC);
        }
        for op in [
            "Acos", "Acosh", "Asin", "Asinh", "Atan", "Atanh", "AvgPool", "Ceil", "Conv2D",
            "Conv2DBackpropInput", "Cos", "Cosh", "DepthwiseConv2dNative", "Elu", "Erf", "Exp",
            "Floor", "FusedBatchNorm", "FusedBatchNormV2", "FusedBatchNormV3", "L2Loss",
            "LeakyRelu", "Log", "Log1p", "LogSoftmax", "LRN", "MaxPool", "Reciprocal", "Relu",
            "Relu6", "Rsqrt", "Sigmoid", "Sin", "Sinh", "Softmax", "Softplus", "Sqrt", "Tan",
            "Tanh", "Xdivy",
        ] {
            table.insert(op, T_FLOAT);
        }
        for op in ["LogicalAnd", "LogicalNot", "LogicalOr"] {
            table.insert(op, T_BOOL);
        }
        for op in [
            "ArgMax", "ArgMin", "Max", "Mean", "Min", "Prod", "Sum", "ConcatV2", "GatherV2",
        ] {
            table.insert(op, T_INDEX);
        }
        for op in [
            "Cast", "Const", "Equal", "ExpandDims", "Fill", "Gather", "GatherNd", "Greater",
            "GreaterEqual", "Identity", "Less", "LessEqual", "NotEqual", "OneHot", "Pack", "Pad",
            "PadV2", "MirrorPad", "Range", "Rank", "Reshape", "ReverseV2", "ScatterNd", "Select",
            "SelectV2", "Shape", "Size", "Slice", "Snapshot", "Split", "SplitV", "Squeeze",
            "StridedSlice", "Tile", "TopKV2", "Transpose", "Unpack", "ZerosLike", "DepthToSpace",
            "SpaceToDepth", "SpaceToBatchND", "BatchToSpaceND",
        ] {
            table.insert(op, T_ANY);
        }

        table
    })
}

fn static_input_table() -> &'static HashMap<&'static str, &'static [i32]> {
    static TABLE: OnceLock<HashMap<&'static str, &'static [i32]>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table: HashMap<&'static str, &'static [i32]> = HashMap::new();
        table.insert("ArgMax", &[1]);
        table.insert("ArgMin", &[1]);
        table.insert("BatchToSpaceND", &[1, 2]);
        table.insert("ConcatV2", &[-1]);
        table.insert("Conv2DBackpropInput", &[0]);
        table.insert("Cumsum", &[1]);
        table.insert("ExpandDims", &[1]);
        table.insert("Fill", &[0]);
        table.insert("GatherV2", &[2]);
        table.insert("Max", &[1]);
        table.insert("Mean", &[1]);
        table.insert("Min", &[1]);
        table.insert("MirrorPad", &[1]);
        table.insert("OneHot", &[1]);
        table.insert("Pad", &[1]);
        table.insert("PadV2", &[1, 2]);
        table.insert("Prod", &[1]);
        table.insert("Range", &[0, 1, 2]);
        table.insert("Reshape", &[1]);
        table.insert("ReverseV2", &[1]);
        table.insert("ScatterNd", &[2]);
        table.insert("Slice", &[1, 2]);
        table.insert("SpaceToBatchND", &[1, 2]);
        table.insert("Split", &[0]);
        table.insert("SplitV", &[1, 2]);
        table.insert("StridedSlice", &[1, 2, 3]);
        table.insert("Sum", &[1]);
        table.insert("Tile", &[1]);
        table.insert("TopKV2", &[1]);
        table.insert("Transpose", &[1]);
        table.insert("All", &[1]);
        table.insert("Any", &[1]);
        table
    })
}

/// Op types the confirmation table knows about, in sorted order. Used by
/// the translator cross-check.
pub fn confirmable_op_types() -> Vec<&'static str> {
    let mut ops: Vec<&'static str> = confirmation_table().keys().copied().collect();
    ops.sort_unstable();
    ops
}
