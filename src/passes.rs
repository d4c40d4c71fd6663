//! Finalization passes over freshly built functions.
//!
//! Translation emits naively: layout brackets around every spatial op and
//! literal arithmetic from folded host constants. Before a function is
//! handed to an engine, constants are folded, transpose chains composed
//! and cancelled, and unreferenced instructions stripped. Passes preserve
//! SSA ids; they only drop or rewrite instructions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::ir::{
    BinaryOp, FunctionIr, Operation, TensorLiteral, TensorSpec, UnaryOp, ValueId,
};

/// Replaces instructions whose operands are all literals with the computed
/// literal. Arithmetic folds are limited to f32; layout folds (reshape,
/// squeeze, unsqueeze, transpose) work on any element type.
pub fn fold_constants(func: &mut FunctionIr) {
    let mut known: HashMap<ValueId, TensorLiteral> = HashMap::new();

    for inst in &mut func.body {
        if let Operation::Constant(literal) = &inst.op {
            known.insert(inst.id, literal.clone());
            continue;
        }
        let operands: Option<Vec<&TensorLiteral>> =
            inst.operands.iter().map(|v| known.get(v)).collect();
        let Some(operands) = operands else { continue };

        let folded = match &inst.op {
            Operation::Reshape { .. } | Operation::Squeeze { .. } | Operation::Unsqueeze { .. } => {
                Some(TensorLiteral::new(
                    inst.output.clone(),
                    operands[0].bytes.clone(),
                ))
            }
            Operation::Transpose { perm } => {
                Some(permute_literal(operands[0], perm, &inst.output))
            }
            Operation::Unary(kind) => fold_unary(*kind, operands[0], &inst.output),
            Operation::Binary(kind) => {
                fold_binary(*kind, operands[0], operands[1], &inst.output)
            }
            _ => None,
        };
        if let Some(literal) = folded {
            known.insert(inst.id, literal.clone());
            inst.op = Operation::Constant(literal);
            inst.operands.clear();
        }
    }
}

fn permute_literal(input: &TensorLiteral, perm: &[usize], output: &TensorSpec) -> TensorLiteral {
    let elem = input.spec.dtype.size_in_bytes();
    let in_dims = &input.spec.dims;
    let out_dims = &output.dims;
    let count = output.element_count();

    let mut in_strides = vec![1usize; in_dims.len()];
    for axis in (0..in_dims.len().saturating_sub(1)).rev() {
        in_strides[axis] = in_strides[axis + 1] * in_dims[axis + 1];
    }

    let mut bytes = vec![0u8; count * elem];
    let mut coord = vec![0usize; out_dims.len()];
    for out_flat in 0..count {
        let in_flat: usize = coord
            .iter()
            .enumerate()
            .map(|(axis, &c)| c * in_strides[perm[axis]])
            .sum();
        bytes[out_flat * elem..(out_flat + 1) * elem]
            .copy_from_slice(&input.bytes[in_flat * elem..(in_flat + 1) * elem]);
        for axis in (0..out_dims.len()).rev() {
            coord[axis] += 1;
            if coord[axis] < out_dims[axis] {
                break;
            }
            coord[axis] = 0;
        }
    }
    TensorLiteral::new(output.clone(), Arc::from(bytes))
}

fn fold_unary(kind: UnaryOp, input: &TensorLiteral, output: &TensorSpec) -> Option<TensorLiteral> {
    let values = input.to_f32_vec()?;
    let op: fn(f32) -> f32 = match kind {
        UnaryOp::Neg => |v| -v,
        UnaryOp::Abs => f32::abs,
        UnaryOp::Sqrt => f32::sqrt,
        UnaryOp::Exp => f32::exp,
        UnaryOp::Log => f32::ln,
        UnaryOp::Floor => f32::floor,
        UnaryOp::Ceil => f32::ceil,
        UnaryOp::Relu => |v| v.max(0.0),
        _ => return None,
    };
    let out: Vec<f32> = values.into_iter().map(op).collect();
    Some(TensorLiteral::from_f32(output.dims.clone(), &out))
}

fn fold_binary(
    kind: BinaryOp,
    lhs: &TensorLiteral,
    rhs: &TensorLiteral,
    output: &TensorSpec,
) -> Option<TensorLiteral> {
    // Folding is worthwhile for the common same-shape and scalar cases;
    // general broadcasting stays with the engine.
    let a = lhs.to_f32_vec()?;
    let b = rhs.to_f32_vec()?;
    if !(a.len() == b.len() || a.len() == 1 || b.len() == 1) {
        return None;
    }
    let op: fn(f32, f32) -> f32 = match kind {
        BinaryOp::Add => |x, y| x + y,
        BinaryOp::Sub => |x, y| x - y,
        BinaryOp::Mul => |x, y| x * y,
        BinaryOp::Div => |x, y| x / y,
        BinaryOp::Maximum => f32::max,
        BinaryOp::Minimum => f32::min,
        BinaryOp::Pow => f32::powf,
        _ => return None,
    };
    let count = a.len().max(b.len());
    let out: Vec<f32> = (0..count)
        .map(|i| {
            op(
                a[if a.len() == 1 { 0 } else { i }],
                b[if b.len() == 1 { 0 } else { i }],
            )
        })
        .collect();
    Some(TensorLiteral::from_f32(output.dims.clone(), &out))
}

/// Composes transpose chains and drops those that compose to identity.
/// Adjacent spatial ops each bracket themselves with layout transposes;
/// this is where the brackets that meet cancel.
pub fn cancel_transposes(func: &mut FunctionIr) {
    let mut replace: HashMap<ValueId, ValueId> = HashMap::new();
    let mut chains: HashMap<ValueId, (ValueId, Vec<usize>)> = HashMap::new();
    let mut body = Vec::with_capacity(func.body.len());

    for mut inst in func.body.drain(..) {
        for operand in &mut inst.operands {
            if let Some(&target) = replace.get(operand) {
                *operand = target;
            }
        }
        if let Operation::Transpose { perm } = &inst.op {
            let src = inst.operands[0];
            let (base, composed) = match chains.get(&src) {
                Some((base, prev)) => {
                    (*base, perm.iter().map(|&axis| prev[axis]).collect::<Vec<_>>())
                }
                None => (src, perm.clone()),
            };
            if composed.iter().enumerate().all(|(axis, &p)| axis == p) {
                replace.insert(inst.id, base);
                continue;
            }
            chains.insert(inst.id, (base, composed.clone()));
            inst.op = Operation::Transpose { perm: composed };
            inst.operands = vec![base];
        }
        body.push(inst);
    }
    func.body = body;
    for result in &mut func.results {
        if let Some(&target) = replace.get(result) {
            *result = target;
        }
    }
}

/// Removes instructions no result transitively depends on.
pub fn strip_dead_instructions(func: &mut FunctionIr) {
    let producers: HashMap<ValueId, usize> = func
        .body
        .iter()
        .enumerate()
        .map(|(idx, inst)| (inst.id, idx))
        .collect();

    let mut live: HashSet<ValueId> = HashSet::new();
    let mut stack: Vec<ValueId> = func.results.clone();
    while let Some(value) = stack.pop() {
        if !live.insert(value) {
            continue;
        }
        if let Some(&idx) = producers.get(&value) {
            stack.extend(func.body[idx].operands.iter().copied());
        }
    }
    func.body.retain(|inst| live.contains(&inst.id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{DType, Instruction};

    fn value(id: u32) -> ValueId {
        ValueId(id)
    }

    fn transpose(id: u32, src: u32, perm: Vec<usize>, dims: Vec<usize>) -> Instruction {
        Instruction {
            id: value(id),
            op: Operation::Transpose { perm },
            operands: vec![value(src)],
            output: TensorSpec::new(DType::F32, dims),
        }
    }

    #[test]
    fn opposing_layout_transposes_cancel() {
        let mut func = FunctionIr::new("t");
        func.parameters.push(crate::ir::Parameter {
            id: value(0),
            spec: TensorSpec::new(DType::F32, vec![1, 2, 3, 4]),
            name: "x".into(),
        });
        func.body.push(transpose(1, 0, vec![0, 3, 1, 2], vec![1, 4, 2, 3]));
        func.body.push(transpose(2, 1, vec![0, 2, 3, 1], vec![1, 2, 3, 4]));
        func.results.push(value(2));

        cancel_transposes(&mut func);
        strip_dead_instructions(&mut func);
        assert!(func.body.is_empty());
        assert_eq!(func.results, vec![value(0)]);
    }

    #[test]
    fn constant_arithmetic_folds_and_strips() {
        let mut func = FunctionIr::new("t");
        let a = TensorLiteral::from_f32(vec![2], &[1.0, 2.0]);
        let b = TensorLiteral::from_f32(vec![2], &[3.0, 4.0]);
        func.body.push(Instruction {
            id: value(0),
            op: Operation::Constant(a),
            operands: vec![],
            output: TensorSpec::new(DType::F32, vec![2]),
        });
        func.body.push(Instruction {
            id: value(1),
            op: Operation::Constant(b),
            operands: vec![],
            output: TensorSpec::new(DType::F32, vec![2]),
        });
        func.body.push(Instruction {
            id: value(2),
            op: Operation::Binary(BinaryOp::Add),
            operands: vec![value(0), value(1)],
            output: TensorSpec::new(DType::F32, vec![2]),
        });
        func.results.push(value(2));

        fold_constants(&mut func);
        strip_dead_instructions(&mut func);
        assert_eq!(func.body.len(), 1);
        match &func.body[0].op {
            Operation::Constant(literal) => {
                assert_eq!(literal.to_f32_vec().unwrap(), vec![4.0, 6.0]);
            }
            other => panic!("expected folded constant, got {other:?}"),
        }
    }
}
