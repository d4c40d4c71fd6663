//! Translators for elementwise math, comparisons, and reductions.
//!
//! Host ops with no IR counterpart lower through numeric identities:
//! reciprocal is `pow(x, -1)`, rsqrt is `pow(x, -0.5)`, log1p is
//! `log(1 + x)`, square is `x * x`, xdivy guards the division with a
//! select against zero.

use crate::graph::{Graph, NodeId};
use crate::ir::{
    ArgReduceKind, BinaryOp, CompareOp, DType, Operation, ReduceKind, ReduceSpec, TensorLiteral,
    TensorSpec, UnaryOp,
};
use crate::translate::{
    broadcast_dims, normalize_axis, Builder, TranslateError, TranslateResult,
};

pub(super) fn translate_unary(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let kind = match node.op_type.as_str() {
        "Abs" => UnaryOp::Abs,
        "Acos" => UnaryOp::Acos,
        "Acosh" => UnaryOp::Acosh,
        "Asin" => UnaryOp::Asin,
        "Asinh" => UnaryOp::Asinh,
        "Atan" => UnaryOp::Atan,
        "Atanh" => UnaryOp::Atanh,
        "Ceil" => UnaryOp::Ceil,
        "Cos" => UnaryOp::Cos,
        "Cosh" => UnaryOp::Cosh,
        "Erf" => UnaryOp::Erf,
        "Exp" => UnaryOp::Exp,
        "Floor" => UnaryOp::Floor,
        "Log" => UnaryOp::Log,
        "LogicalNot" => UnaryOp::Not,
        "Neg" => UnaryOp::Neg,
        "Relu" => UnaryOp::Relu,
        "Sigmoid" => UnaryOp::Sigmoid,
        "Sign" => UnaryOp::Sign,
        "Sin" => UnaryOp::Sin,
        "Sinh" => UnaryOp::Sinh,
        "Sqrt" => UnaryOp::Sqrt,
        "Tan" => UnaryOp::Tan,
        "Tanh" => UnaryOp::Tanh,
        other => {
            return Err(TranslateError::unsupported(
                &node.name,
                format!("{other} is not an elementwise unary op"),
            ))
        }
    };
    let input = builder.fetch_input(graph, id, 0)?;
    let out = builder.emit_unary(kind, input);
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_binary(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let kind = match node.op_type.as_str() {
        "Add" | "AddV2" => BinaryOp::Add,
        "Sub" => BinaryOp::Sub,
        "Mul" => BinaryOp::Mul,
        "RealDiv" => BinaryOp::Div,
        "FloorDiv" => BinaryOp::FloorDiv,
        "FloorMod" => BinaryOp::FloorMod,
        "Mod" => BinaryOp::Mod,
        "Maximum" => BinaryOp::Maximum,
        "Minimum" => BinaryOp::Minimum,
        "Pow" => BinaryOp::Pow,
        "SquaredDifference" => BinaryOp::SquaredDifference,
        "LogicalAnd" => BinaryOp::And,
        "LogicalOr" => BinaryOp::Or,
        other => {
            return Err(TranslateError::unsupported(
                &node.name,
                format!("{other} is not an elementwise binary op"),
            ))
        }
    };
    let lhs = builder.fetch_input(graph, id, 0)?;
    let rhs = builder.fetch_input(graph, id, 1)?;
    let out = builder.emit_binary(&node.name, kind, lhs, rhs)?;
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_compare(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let kind = match node.op_type.as_str() {
        "Less" => CompareOp::Less,
        "LessEqual" => CompareOp::LessEqual,
        "Equal" => CompareOp::Equal,
        "NotEqual" => CompareOp::NotEqual,
        "Greater" => CompareOp::Greater,
        "GreaterEqual" => CompareOp::GreaterEqual,
        other => {
            return Err(TranslateError::unsupported(
                &node.name,
                format!("{other} is not a comparison op"),
            ))
        }
    };
    let lhs = builder.fetch_input(graph, id, 0)?;
    let rhs = builder.fetch_input(graph, id, 1)?;
    let out = builder.emit_compare(&node.name, kind, lhs, rhs)?;
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_add_n(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let num_inputs = graph.num_inputs(id);
    if num_inputs == 0 {
        return Err(TranslateError::unsupported(&node.name, "AddN with no inputs"));
    }
    let mut acc = builder.fetch_input(graph, id, 0)?;
    for slot in 1..num_inputs {
        let next = builder.fetch_input(graph, id, slot)?;
        acc = builder.emit_binary(&node.name, BinaryOp::Add, acc, next)?;
    }
    builder.save(&node, vec![acc]);
    Ok(())
}

pub(super) fn translate_select(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let cond = builder.fetch_input(graph, id, 0)?;
    let then_value = builder.fetch_input(graph, id, 1)?;
    let else_value = builder.fetch_input(graph, id, 2)?;
    let dims = broadcast_dims(
        &node.name,
        &builder.spec(then_value).dims,
        &builder.spec(else_value).dims,
    )?;
    let dtype = builder.spec(then_value).dtype;
    let out = builder.emit(
        Operation::Select,
        vec![cond, then_value, else_value],
        TensorSpec::new(dtype, dims),
    );
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_reciprocal(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let input = builder.fetch_input(graph, id, 0)?;
    let exponent = builder.scalar_f32(-1.0);
    let out = builder.emit_binary(&node.name, BinaryOp::Pow, input, exponent)?;
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_rsqrt(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let input = builder.fetch_input(graph, id, 0)?;
    let exponent = builder.scalar_f32(-0.5);
    let out = builder.emit_binary(&node.name, BinaryOp::Pow, input, exponent)?;
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_log1p(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let input = builder.fetch_input(graph, id, 0)?;
    let one = builder.scalar_f32(1.0);
    let shifted = builder.emit_binary(&node.name, BinaryOp::Add, input, one)?;
    let out = builder.emit_unary(UnaryOp::Log, shifted);
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_square(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let input = builder.fetch_input(graph, id, 0)?;
    let out = builder.emit_binary(&node.name, BinaryOp::Mul, input, input)?;
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_xdivy(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let x = builder.fetch_input(graph, id, 0)?;
    let y = builder.fetch_input(graph, id, 1)?;
    let zero = builder.scalar_f32(0.0);
    let x_is_zero = builder.emit_compare(&node.name, CompareOp::Equal, x, zero)?;
    let quotient = builder.emit_binary(&node.name, BinaryOp::Div, x, y)?;
    let spec = builder.spec(quotient).clone();
    let out = builder.emit(Operation::Select, vec![x_is_zero, x, quotient], spec);
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_zeros_like(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let input = builder.fetch_input(graph, id, 0)?;
    let spec = builder.spec(input).clone();
    let out = builder.constant(TensorLiteral::zeroed(spec));
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_l2_loss(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let input = builder.fetch_input(graph, id, 0)?;
    let squared = builder.emit_binary(&node.name, BinaryOp::Mul, input, input)?;
    let rank = builder.spec(squared).rank();
    let dtype = builder.spec(squared).dtype;
    let summed = builder.emit(
        Operation::Reduce(ReduceSpec {
            kind: ReduceKind::Sum,
            axes: (0..rank).collect(),
            keep_dims: false,
        }),
        vec![squared],
        TensorSpec::scalar(dtype),
    );
    let half = builder.scalar_f32(0.5);
    let out = builder.emit_binary(&node.name, BinaryOp::Mul, summed, half)?;
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_cast(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let dtype = node
        .attr_type("DstT")
        .map(DType::from_host)
        .ok_or_else(|| TranslateError::unsupported(&node.name, "Cast without DstT"))?;
    let input = builder.fetch_input(graph, id, 0)?;
    let dims = builder.spec(input).dims.clone();
    let out = builder.emit(
        Operation::Cast { dtype },
        vec![input],
        TensorSpec::new(dtype, dims),
    );
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_matmul(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let transpose_a = node.attr_bool("transpose_a").unwrap_or(false);
    let transpose_b = node.attr_bool("transpose_b").unwrap_or(false);
    let lhs = builder.fetch_input(graph, id, 0)?;
    let rhs = builder.fetch_input(graph, id, 1)?;
    let a = &builder.spec(lhs).dims;
    let b = &builder.spec(rhs).dims;
    if a.len() != 2 || b.len() != 2 {
        return Err(TranslateError::shape(&node.name, "MatMul expects rank-2 inputs"));
    }
    let (m, ka) = if transpose_a { (a[1], a[0]) } else { (a[0], a[1]) };
    let (kb, n) = if transpose_b { (b[1], b[0]) } else { (b[0], b[1]) };
    if ka != kb {
        return Err(TranslateError::shape(
            &node.name,
            format!("contraction mismatch {ka} vs {kb}"),
        ));
    }
    let dtype = builder.spec(lhs).dtype;
    let out = builder.emit(
        Operation::MatMul {
            transpose_a,
            transpose_b,
        },
        vec![lhs, rhs],
        TensorSpec::new(dtype, vec![m, n]),
    );
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn reduce_output_dims(dims: &[usize], axes: &[usize], keep_dims: bool) -> Vec<usize> {
    dims.iter()
        .enumerate()
        .filter_map(|(axis, &dim)| {
            if axes.contains(&axis) {
                keep_dims.then_some(1)
            } else {
                Some(dim)
            }
        })
        .collect()
}

pub(super) fn translate_reduce(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let kind = match node.op_type.as_str() {
        "Sum" => ReduceKind::Sum,
        "Prod" => ReduceKind::Prod,
        "Max" => ReduceKind::Max,
        "Min" => ReduceKind::Min,
        "Mean" => ReduceKind::Mean,
        "Any" => ReduceKind::Any,
        "All" => ReduceKind::All,
        other => {
            return Err(TranslateError::unsupported(
                &node.name,
                format!("{other} is not a reduction"),
            ))
        }
    };
    let input = builder.fetch_input(graph, id, 0)?;
    let rank = builder.spec(input).rank();
    let mut axes = Vec::new();
    for axis in builder.static_input_i64(graph, id, 1)? {
        axes.push(normalize_axis(&node.name, axis, rank)?);
    }
    axes.sort_unstable();
    axes.dedup();
    let keep_dims = node.attr_bool("keep_dims").unwrap_or(false);
    let dims = reduce_output_dims(&builder.spec(input).dims, &axes, keep_dims);
    let dtype = builder.spec(input).dtype;
    let out = builder.emit(
        Operation::Reduce(ReduceSpec {
            kind,
            axes,
            keep_dims,
        }),
        vec![input],
        TensorSpec::new(dtype, dims),
    );
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_arg_reduce(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let kind = match node.op_type.as_str() {
        "ArgMax" => ArgReduceKind::Max,
        "ArgMin" => ArgReduceKind::Min,
        other => {
            return Err(TranslateError::unsupported(
                &node.name,
                format!("{other} is not an arg reduction"),
            ))
        }
    };
    let input = builder.fetch_input(graph, id, 0)?;
    let rank = builder.spec(input).rank();
    let axis_value = builder
        .static_input_i64(graph, id, 1)?
        .first()
        .copied()
        .ok_or_else(|| TranslateError::unsupported(&node.name, "empty axis input"))?;
    let axis = normalize_axis(&node.name, axis_value, rank)?;
    let index_dtype = node
        .attr_type("output_type")
        .map(DType::from_host)
        .unwrap_or(DType::I64);
    let dims = reduce_output_dims(&builder.spec(input).dims, &[axis], false);
    let out = builder.emit(
        Operation::ArgReduce {
            kind,
            axis,
            index_dtype,
        },
        vec![input],
        TensorSpec::new(index_dtype, dims),
    );
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_cumsum(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let input = builder.fetch_input(graph, id, 0)?;
    let rank = builder.spec(input).rank();
    let axis_value = builder
        .static_input_i64(graph, id, 1)?
        .first()
        .copied()
        .ok_or_else(|| TranslateError::unsupported(&node.name, "empty axis input"))?;
    let axis = normalize_axis(&node.name, axis_value, rank)?;
    let spec = builder.spec(input).clone();
    let out = builder.emit(
        Operation::CumSum {
            axis,
            exclusive: node.attr_bool("exclusive").unwrap_or(false),
            reverse: node.attr_bool("reverse").unwrap_or(false),
        },
        vec![input],
        spec,
    );
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_softmax(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let input = builder.fetch_input(graph, id, 0)?;
    let spec = builder.spec(input).clone();
    if spec.rank() == 0 {
        return Err(TranslateError::shape(&node.name, "softmax of a scalar"));
    }
    let axis = spec.rank() - 1;
    let out = builder.emit(Operation::Softmax { axis }, vec![input], spec);
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_log_softmax(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let input = builder.fetch_input(graph, id, 0)?;
    let spec = builder.spec(input).clone();
    if spec.rank() == 0 {
        return Err(TranslateError::shape(&node.name, "log softmax of a scalar"));
    }
    let axis = spec.rank() - 1;
    let softmax = builder.emit(Operation::Softmax { axis }, vec![input], spec);
    let out = builder.emit_unary(UnaryOp::Log, softmax);
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_relu6(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let input = builder.fetch_input(graph, id, 0)?;
    let spec = builder.spec(input).clone();
    let out = builder.emit(Operation::Clamp { min: 0.0, max: 6.0 }, vec![input], spec);
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_elu(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let input = builder.fetch_input(graph, id, 0)?;
    let spec = builder.spec(input).clone();
    let out = builder.emit(Operation::Elu { alpha: 1.0 }, vec![input], spec);
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_leaky_relu(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let alpha = node.attr_float("alpha").unwrap_or(0.2);
    let input = builder.fetch_input(graph, id, 0)?;
    let spec = builder.spec(input).clone();
    let out = builder.emit(Operation::LeakyRelu { alpha }, vec![input], spec);
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_softplus(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let input = builder.fetch_input(graph, id, 0)?;
    let spec = builder.spec(input).clone();
    let out = builder.emit(Operation::Softplus, vec![input], spec);
    builder.save(&node, vec![out]);
    Ok(())
}
