//! Translator registry: host op type to lowering routine.
//!
//! Built once per process. The table intentionally mirrors what the
//! marking confirmation table claims; a confirmed op type without a
//! translator would surface as a late per-cluster fallback, so a test
//! cross-checks the two.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::translate::{ops_math, ops_nn, ops_shape, TranslatorFn};

pub(super) fn translator(op_type: &str) -> Option<TranslatorFn> {
    table().get(op_type).copied()
}

/// Whether `op_type` has a registered lowering.
pub fn has_translator(op_type: &str) -> bool {
    table().contains_key(op_type)
}

/// All registered op types, sorted.
pub fn registered_op_types() -> Vec<&'static str> {
    let mut ops: Vec<&'static str> = table().keys().copied().collect();
    ops.sort_unstable();
    ops
}

fn table() -> &'static HashMap<&'static str, TranslatorFn> {
    static TABLE: OnceLock<HashMap<&'static str, TranslatorFn>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut t: HashMap<&'static str, TranslatorFn> = HashMap::new();

        for op in [
            "Abs", "Acos", "Acosh", "Asin", "Asinh", "Atan", "Atanh", "Ceil", "Cos", "Cosh",
            "Erf", "Exp", "Floor", "Log", "LogicalNot", "Neg", "Relu", "Sigmoid", "Sign", "Sin",
            "Sinh", "Sqrt", "Tan", "Tanh",
        ] {
            t.insert(op, ops_math::translate_unary as TranslatorFn);
        }
        for op in [
            "Add", "AddV2", "Sub", "Mul", "RealDiv", "FloorDiv", "FloorMod", "Mod", "Maximum",
            "Minimum", "Pow", "SquaredDifference", "LogicalAnd", "LogicalOr",
        ] {
            t.insert(op, ops_math::translate_binary as TranslatorFn);
        }
        for op in ["Less", "LessEqual", "Equal", "NotEqual", "Greater", "GreaterEqual"] {
            t.insert(op, ops_math::translate_compare as TranslatorFn);
        }
        for op in ["Sum", "Prod", "Max", "Min", "Mean", "Any", "All"] {
            t.insert(op, ops_math::translate_reduce as TranslatorFn);
        }
        for op in ["ArgMax", "ArgMin"] {
            t.insert(op, ops_math::translate_arg_reduce as TranslatorFn);
        }
        t.insert("AddN", ops_math::translate_add_n);
        t.insert("Cast", ops_math::translate_cast);
        t.insert("Cumsum", ops_math::translate_cumsum);
        t.insert("Elu", ops_math::translate_elu);
        t.insert("L2Loss", ops_math::translate_l2_loss);
        t.insert("LeakyRelu", ops_math::translate_leaky_relu);
        t.insert("Log1p", ops_math::translate_log1p);
        t.insert("LogSoftmax", ops_math::translate_log_softmax);
        t.insert("MatMul", ops_math::translate_matmul);
        t.insert("Reciprocal", ops_math::translate_reciprocal);
        t.insert("Relu6", ops_math::translate_relu6);
        t.insert("Rsqrt", ops_math::translate_rsqrt);
        t.insert("Select", ops_math::translate_select);
        t.insert("SelectV2", ops_math::translate_select);
        t.insert("Softmax", ops_math::translate_softmax);
        t.insert("Softplus", ops_math::translate_softplus);
        t.insert("Square", ops_math::translate_square);
        t.insert("Xdivy", ops_math::translate_xdivy);
        t.insert("ZerosLike", ops_math::translate_zeros_like);

        t.insert("AvgPool", ops_nn::translate_avg_pool);
        t.insert("BatchToSpaceND", ops_nn::translate_batch_to_space);
        t.insert("BiasAdd", ops_nn::translate_bias_add);
        t.insert("Conv2D", ops_nn::translate_conv2d);
        t.insert("Conv2DBackpropInput", ops_nn::translate_conv2d_backprop_input);
        t.insert("DepthToSpace", ops_nn::translate_depth_to_space);
        t.insert("DepthwiseConv2dNative", ops_nn::translate_depthwise_conv2d);
        t.insert("FusedBatchNorm", ops_nn::translate_fused_batch_norm);
        t.insert("FusedBatchNormV2", ops_nn::translate_fused_batch_norm);
        t.insert("FusedBatchNormV3", ops_nn::translate_fused_batch_norm);
        t.insert("LRN", ops_nn::translate_lrn);
        t.insert("MaxPool", ops_nn::translate_max_pool);
        t.insert("SpaceToBatchND", ops_nn::translate_space_to_batch);
        t.insert("SpaceToDepth", ops_nn::translate_space_to_depth);
        t.insert("TopKV2", ops_nn::translate_top_k);

        t.insert("ConcatV2", ops_shape::translate_concat);
        t.insert("Const", ops_shape::translate_const);
        t.insert("ExpandDims", ops_shape::translate_expand_dims);
        t.insert("Fill", ops_shape::translate_fill);
        t.insert("Gather", ops_shape::translate_gather);
        t.insert("GatherNd", ops_shape::translate_gather_nd);
        t.insert("GatherV2", ops_shape::translate_gather);
        t.insert("Identity", ops_shape::translate_identity);
        t.insert("MirrorPad", ops_shape::translate_pad);
        t.insert("NoOp", ops_shape::translate_noop);
        t.insert("OneHot", ops_shape::translate_one_hot);
        t.insert("Pack", ops_shape::translate_pack);
        t.insert("Pad", ops_shape::translate_pad);
        t.insert("PadV2", ops_shape::translate_pad);
        t.insert("PreventGradient", ops_shape::translate_identity);
        t.insert("Range", ops_shape::translate_range);
        t.insert("Rank", ops_shape::translate_rank);
        t.insert("Reshape", ops_shape::translate_reshape);
        t.insert("ReverseV2", ops_shape::translate_reverse);
        t.insert("ScatterNd", ops_shape::translate_scatter_nd);
        t.insert("Shape", ops_shape::translate_shape);
        t.insert("Size", ops_shape::translate_size);
        t.insert("Slice", ops_shape::translate_slice);
        t.insert("Snapshot", ops_shape::translate_identity);
        t.insert("Split", ops_shape::translate_split);
        t.insert("SplitV", ops_shape::translate_split_v);
        t.insert("Squeeze", ops_shape::translate_squeeze);
        t.insert("StridedSlice", ops_shape::translate_strided_slice);
        t.insert("Tile", ops_shape::translate_tile);
        t.insert("Transpose", ops_shape::translate_transpose);
        t.insert("Unpack", ops_shape::translate_unpack);

        t
    })
}
