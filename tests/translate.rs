mod common;

use std::collections::BTreeSet;

use ferry::cluster::ClusterId;
use ferry::encapsulate::ClusterSubgraph;
use ferry::engine;
use ferry::graph::{AttrValue, Graph, Node};
use ferry::ir::{DType, Operation, TensorLiteral, TensorSpec};
use ferry::mark::confirmable_op_types;
use ferry::translate::{
    has_translator, registered_op_types, translate_cluster, TranslateError,
};

use common::{const_f32, const_i64, op, op_with, placeholder, retval};

fn cluster(graph: Graph, num_inputs: usize, num_outputs: usize, tag: u32) -> ClusterSubgraph {
    ClusterSubgraph {
        id: ClusterId(tag),
        graph,
        num_inputs,
        num_outputs,
    }
}

fn f32_spec(dims: &[usize]) -> TensorSpec {
    TensorSpec::new(DType::F32, dims.to_vec())
}

#[test]
fn add_chain_translates_and_executes() {
    let mut body = Graph::new();
    let a = placeholder(&mut body, "arg_0", 0);
    let b = placeholder(&mut body, "arg_1", 1);
    let add = op(&mut body, "add", "Add", &[a, b]);
    let neg = op(&mut body, "neg", "Neg", &[add]);
    retval(&mut body, "retval_0", 0, neg, 0);

    let translated =
        translate_cluster(&cluster(body, 2, 1, 900), &[f32_spec(&[3]), f32_spec(&[3])]).unwrap();
    assert_eq!(translated.func.parameters.len(), 2);
    assert_eq!(translated.func.results.len(), 1);
    assert_eq!(translated.kept_outputs, vec![0]);
    assert_eq!(translated.param_inputs, vec![0, 1]);

    let interpreter = engine::engine(engine::INTERPRETER).unwrap();
    let inputs = [
        TensorLiteral::from_f32(vec![3], &[1.0, 2.0, 3.0]),
        TensorLiteral::from_f32(vec![3], &[4.0, 5.0, 6.0]),
    ];
    let outputs = interpreter.execute(&translated.func, &inputs).unwrap();
    assert_eq!(outputs[0].to_f32_vec().unwrap(), vec![-5.0, -7.0, -9.0]);
}

#[test]
fn conv2d_same_padding_keeps_spatial_dims() {
    let mut body = Graph::new();
    let data = placeholder(&mut body, "arg_0", 0);
    let filter = const_f32(&mut body, "filter", vec![3, 3, 3, 8], &[0.0; 216]);
    let conv = op_with(
        &mut body,
        Node::new("conv", "Conv2D")
            .with_attr("strides", AttrValue::IntList(vec![1, 1, 1, 1]))
            .with_attr("padding", AttrValue::Str("SAME".into())),
        &[data, filter],
    );
    retval(&mut body, "retval_0", 0, conv, 0);

    let translated =
        translate_cluster(&cluster(body, 1, 1, 901), &[f32_spec(&[1, 5, 5, 3])]).unwrap();
    assert_eq!(translated.output_specs[0].dims, vec![1, 5, 5, 8]);
}

#[test]
fn layout_brackets_cancel_between_spatial_ops() {
    let mut body = Graph::new();
    let data = placeholder(&mut body, "arg_0", 0);
    let filter = const_f32(&mut body, "filter", vec![1, 1, 4, 8], &[0.0; 32]);
    let conv = op_with(
        &mut body,
        Node::new("conv", "Conv2D")
            .with_attr("strides", AttrValue::IntList(vec![1, 1, 1, 1]))
            .with_attr("padding", AttrValue::Str("SAME".into())),
        &[data, filter],
    );
    let pool = op_with(
        &mut body,
        Node::new("pool", "MaxPool")
            .with_attr("ksize", AttrValue::IntList(vec![1, 2, 2, 1]))
            .with_attr("strides", AttrValue::IntList(vec![1, 2, 2, 1]))
            .with_attr("padding", AttrValue::Str("VALID".into())),
        &[conv],
    );
    retval(&mut body, "retval_0", 0, pool, 0);

    let translated =
        translate_cluster(&cluster(body, 1, 1, 902), &[f32_spec(&[1, 8, 8, 4])]).unwrap();
    assert_eq!(translated.output_specs[0].dims, vec![1, 4, 4, 8]);

    // One transpose into the channel-first region, one out of it; the pair
    // meeting between conv and pool must be gone.
    let transposes = translated
        .func
        .body
        .iter()
        .filter(|inst| matches!(inst.op, Operation::Transpose { .. }))
        .count();
    assert_eq!(transposes, 2);
    let conv = translated
        .func
        .body
        .iter()
        .find(|inst| matches!(inst.op, Operation::Convolution(_)))
        .unwrap();
    let pool = translated
        .func
        .body
        .iter()
        .find(|inst| matches!(inst.op, Operation::MaxPool(_)))
        .unwrap();
    assert_eq!(pool.operands[0], conv.id);
}

#[test]
fn fused_batch_norm_exposes_all_host_outputs() {
    let mut body = Graph::new();
    let data = placeholder(&mut body, "arg_0", 0);
    let scale = const_f32(&mut body, "scale", vec![3], &[1.0, 1.0, 1.0]);
    let offset = const_f32(&mut body, "offset", vec![3], &[0.0, 0.0, 0.0]);
    let mean = const_f32(&mut body, "mean", vec![3], &[0.0, 0.0, 0.0]);
    let variance = const_f32(&mut body, "variance", vec![3], &[1.0, 1.0, 1.0]);
    let bn = op_with(
        &mut body,
        Node::new("bn", "FusedBatchNormV3").with_attr("epsilon", AttrValue::Float(1e-3)),
        &[data, scale, offset, mean, variance],
    );
    retval(&mut body, "retval_0", 0, bn, 0);
    retval(&mut body, "retval_1", 1, bn, 1);
    retval(&mut body, "retval_2", 2, bn, 2);
    // V3 reserves a sixth output aliasing the mean.
    retval(&mut body, "retval_3", 3, bn, 5);

    let translated =
        translate_cluster(&cluster(body, 1, 4, 903), &[f32_spec(&[2, 4, 4, 3])]).unwrap();
    assert_eq!(translated.output_specs.len(), 4);
    assert_eq!(translated.output_specs[0].dims, vec![2, 4, 4, 3]);
    assert_eq!(translated.output_specs[1].dims, vec![3]);
    assert_eq!(translated.output_specs[3].dims, vec![3]);
    assert_eq!(translated.kept_outputs, vec![0, 1, 2, 3]);
}

#[test]
fn split_lowers_to_one_slice_per_part() {
    let mut body = Graph::new();
    let axis = const_i64(&mut body, "axis", vec![], &[1]);
    let data = placeholder(&mut body, "arg_0", 0);
    let split = op_with(
        &mut body,
        Node::new("split", "Split").with_attr("num_split", AttrValue::Int(2)),
        &[axis, data],
    );
    retval(&mut body, "retval_0", 0, split, 0);
    retval(&mut body, "retval_1", 1, split, 1);

    let translated =
        translate_cluster(&cluster(body, 1, 2, 904), &[f32_spec(&[4, 6])]).unwrap();
    assert_eq!(translated.output_specs[0].dims, vec![4, 3]);
    assert_eq!(translated.output_specs[1].dims, vec![4, 3]);
    assert_eq!(translated.func.results.len(), 2);
}

#[test]
fn concat_accepts_a_negative_axis() {
    let mut body = Graph::new();
    let a = placeholder(&mut body, "arg_0", 0);
    let b = placeholder(&mut body, "arg_1", 1);
    let axis = const_i64(&mut body, "axis", vec![], &[-1]);
    let concat = op(&mut body, "concat", "ConcatV2", &[a, b, axis]);
    retval(&mut body, "retval_0", 0, concat, 0);

    let translated =
        translate_cluster(&cluster(body, 2, 1, 905), &[f32_spec(&[2, 3]), f32_spec(&[2, 3])])
            .unwrap();
    assert_eq!(translated.output_specs[0].dims, vec![2, 6]);
}

#[test]
fn range_folds_to_a_constant() {
    let mut body = Graph::new();
    let start = const_f32(&mut body, "start", vec![], &[0.0]);
    let limit = const_f32(&mut body, "limit", vec![], &[4.0]);
    let delta = const_f32(&mut body, "delta", vec![], &[1.0]);
    let range = op(&mut body, "range", "Range", &[start, limit, delta]);
    retval(&mut body, "retval_0", 0, range, 0);

    let translated = translate_cluster(&cluster(body, 0, 1, 906), &[]).unwrap();
    assert_eq!(translated.func.parameters.len(), 0);
    assert_eq!(translated.func.body.len(), 1);
    assert!(matches!(translated.func.body[0].op, Operation::Constant(_)));

    let interpreter = engine::engine(engine::INTERPRETER).unwrap();
    let outputs = interpreter.execute(&translated.func, &[]).unwrap();
    assert_eq!(outputs[0].to_f32_vec().unwrap(), vec![0.0, 1.0, 2.0, 3.0]);
}

#[test]
fn reciprocal_and_rsqrt_lower_to_pow() {
    let mut body = Graph::new();
    let data = placeholder(&mut body, "arg_0", 0);
    let recip = op(&mut body, "recip", "Reciprocal", &[data]);
    let rsqrt = op(&mut body, "rsqrt", "Rsqrt", &[data]);
    retval(&mut body, "retval_0", 0, recip, 0);
    retval(&mut body, "retval_1", 1, rsqrt, 0);

    let translated =
        translate_cluster(&cluster(body, 1, 2, 909), &[f32_spec(&[2])]).unwrap();
    let pows = translated
        .func
        .body
        .iter()
        .filter(|inst| matches!(inst.op, Operation::Binary(ferry::ir::BinaryOp::Pow)))
        .count();
    assert_eq!(pows, 2);

    let interpreter = engine::engine(engine::INTERPRETER).unwrap();
    let outputs = interpreter
        .execute(&translated.func, &[TensorLiteral::from_f32(vec![2], &[2.0, 4.0])])
        .unwrap();
    assert_eq!(outputs[0].to_f32_vec().unwrap(), vec![0.5, 0.25]);
    assert_eq!(outputs[1].to_f32_vec().unwrap(), vec![0.70710677, 0.5]);
}

#[test]
fn reverse_flips_the_requested_axes() {
    let mut body = Graph::new();
    let data = placeholder(&mut body, "arg_0", 0);
    let axes = const_i64(&mut body, "axes", vec![1], &[-1]);
    let reverse = op(&mut body, "reverse", "ReverseV2", &[data, axes]);
    retval(&mut body, "retval_0", 0, reverse, 0);

    let translated =
        translate_cluster(&cluster(body, 1, 1, 910), &[f32_spec(&[2, 3])]).unwrap();
    assert_eq!(translated.output_specs[0].dims, vec![2, 3]);

    let interpreter = engine::engine(engine::INTERPRETER).unwrap();
    let outputs = interpreter
        .execute(
            &translated.func,
            &[TensorLiteral::from_f32(vec![2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0])],
        )
        .unwrap();
    assert_eq!(
        outputs[0].to_f32_vec().unwrap(),
        vec![3.0, 2.0, 1.0, 6.0, 5.0, 4.0]
    );
}

#[test]
fn top_k_rejects_k_beyond_the_axis_extent() {
    let mut body = Graph::new();
    let data = placeholder(&mut body, "arg_0", 0);
    let k = const_i64(&mut body, "k", vec![], &[5]);
    let topk = op(&mut body, "topk", "TopKV2", &[data, k]);
    retval(&mut body, "retval_0", 0, topk, 0);

    let result = translate_cluster(&cluster(body, 1, 1, 911), &[f32_spec(&[3])]);
    assert!(matches!(result, Err(TranslateError::Shape { .. })));
}

#[test]
fn batched_gather_picks_per_batch_rows() {
    let mut body = Graph::new();
    let params = placeholder(&mut body, "arg_0", 0);
    let indices = const_i64(&mut body, "indices", vec![2, 2], &[2, 0, 1, 1]);
    let axis = const_i64(&mut body, "axis", vec![], &[1]);
    let gather = op_with(
        &mut body,
        Node::new("gather", "GatherV2").with_attr("batch_dims", AttrValue::Int(1)),
        &[params, indices, axis],
    );
    retval(&mut body, "retval_0", 0, gather, 0);

    let translated =
        translate_cluster(&cluster(body, 1, 1, 912), &[f32_spec(&[2, 3])]).unwrap();
    assert_eq!(translated.output_specs[0].dims, vec![2, 2]);

    let interpreter = engine::engine(engine::INTERPRETER).unwrap();
    let outputs = interpreter
        .execute(
            &translated.func,
            &[TensorLiteral::from_f32(vec![2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0])],
        )
        .unwrap();
    assert_eq!(outputs[0].to_f32_vec().unwrap(), vec![3.0, 1.0, 5.0, 5.0]);
}

#[test]
fn zero_dim_boundaries_are_pruned() {
    let mut body = Graph::new();
    let data = placeholder(&mut body, "arg_0", 0);
    let empty = placeholder(&mut body, "arg_1", 1);
    let neg = op(&mut body, "neg", "Neg", &[data]);
    retval(&mut body, "retval_0", 0, neg, 0);
    retval(&mut body, "retval_1", 1, empty, 0);

    let translated = translate_cluster(
        &cluster(body, 2, 2, 907),
        &[f32_spec(&[2]), f32_spec(&[0])],
    )
    .unwrap();

    assert_eq!(translated.func.parameters.len(), 1);
    assert_eq!(translated.param_inputs, vec![0]);
    assert_eq!(translated.dropped_inputs, vec![1]);
    assert_eq!(translated.kept_outputs, vec![0]);
    assert_eq!(translated.output_specs[1].dims, vec![0]);
}

#[test]
fn unknown_interior_op_is_a_hard_error() {
    let mut body = Graph::new();
    let data = placeholder(&mut body, "arg_0", 0);
    let pred = placeholder(&mut body, "arg_1", 1);
    let sw = op(&mut body, "switch", "Switch", &[data, pred]);
    retval(&mut body, "retval_0", 0, sw, 0);

    let result = translate_cluster(
        &cluster(body, 2, 1, 908),
        &[f32_spec(&[2]), TensorSpec::new(DType::Bool, vec![])],
    );
    assert!(matches!(
        result,
        Err(TranslateError::NoTranslator { ref op_type, .. }) if op_type == "Switch"
    ));
}

#[test]
fn every_claimable_op_has_a_translator() {
    let confirmable: BTreeSet<&str> = confirmable_op_types().into_iter().collect();
    for op_type in &confirmable {
        assert!(has_translator(op_type), "no translator for {op_type}");
    }
    for op_type in registered_op_types() {
        assert!(
            confirmable.contains(op_type),
            "{op_type} is translatable but never claimed"
        );
    }
}
