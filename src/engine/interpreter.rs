//! Reference CPU interpreter for the bridge IR.
//!
//! Straightforward nested loops over an f64 working representation. The
//! point is a correct executable baseline for tests and for hosts without
//! accelerator hardware, not throughput. Ops outside the implemented
//! subset report `EngineError::Unsupported`, which callers surface
//! verbatim.

use std::collections::HashMap;
use std::sync::Arc;

use super::{Engine, EngineError, INTERPRETER};
use crate::ir::{
    ArgReduceKind, BinaryOp, CompareOp, ConvSpec, DType, FunctionIr, Operation, PadMode,
    PoolSpec, ReduceKind, TensorLiteral, TensorSpec, UnaryOp, ValueId,
};

/// Working tensor: row-major f64 payload plus the declared spec.
#[derive(Debug, Clone)]
struct Value {
    dtype: DType,
    dims: Vec<usize>,
    data: Vec<f64>,
}

pub struct Interpreter;

impl Engine for Interpreter {
    fn name(&self) -> &str {
        INTERPRETER
    }

    fn execute(
        &self,
        func: &FunctionIr,
        inputs: &[TensorLiteral],
    ) -> Result<Vec<TensorLiteral>, EngineError> {
        if inputs.len() != func.parameters.len() {
            return Err(EngineError::Execution(format!(
                "expected {} inputs, got {}",
                func.parameters.len(),
                inputs.len()
            )));
        }
        let mut values: HashMap<ValueId, Value> = HashMap::new();
        for (index, (param, input)) in func.parameters.iter().zip(inputs).enumerate() {
            if input.spec.dims != param.spec.dims {
                return Err(EngineError::Input {
                    index,
                    message: format!(
                        "shape {:?} does not match parameter shape {:?}",
                        input.spec.dims, param.spec.dims
                    ),
                });
            }
            values.insert(param.id, decode(input)?);
        }
        for inst in &func.body {
            let operands: Vec<&Value> = inst
                .operands
                .iter()
                .map(|id| {
                    values.get(id).ok_or_else(|| {
                        EngineError::Execution(format!("value {id} missing"))
                    })
                })
                .collect::<Result<_, _>>()?;
            let out = eval(&inst.op, &operands, &inst.output)?;
            values.insert(inst.id, out);
        }
        func.results
            .iter()
            .map(|id| {
                let value = values
                    .get(id)
                    .ok_or_else(|| EngineError::Execution(format!("result {id} missing")))?;
                encode(value)
            })
            .collect()
    }
}

fn strides(dims: &[usize]) -> Vec<usize> {
    let mut out = vec![1usize; dims.len()];
    for axis in (0..dims.len().saturating_sub(1)).rev() {
        out[axis] = out[axis + 1] * dims[axis + 1];
    }
    out
}

fn decode(literal: &TensorLiteral) -> Result<Value, EngineError> {
    let count = literal.spec.element_count();
    let bytes = &literal.bytes;
    let data: Vec<f64> = match literal.spec.dtype {
        DType::F32 => bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
            .collect(),
        DType::F64 => bytes
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect(),
        DType::I32 => bytes
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
            .collect(),
        DType::I64 => bytes
            .chunks_exact(8)
            .map(|c| {
                i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f64
            })
            .collect(),
        DType::I8 => bytes.iter().map(|&b| b as i8 as f64).collect(),
        DType::U8 | DType::Bool => bytes.iter().map(|&b| b as f64).collect(),
        other => {
            return Err(EngineError::Execution(format!(
                "element type {other:?} is not supported by the interpreter"
            )))
        }
    };
    if data.len() != count {
        return Err(EngineError::Execution("payload length mismatch".into()));
    }
    Ok(Value {
        dtype: literal.spec.dtype,
        dims: literal.spec.dims.clone(),
        data,
    })
}

fn encode(value: &Value) -> Result<TensorLiteral, EngineError> {
    let spec = TensorSpec::new(value.dtype, value.dims.clone());
    let bytes: Vec<u8> = match value.dtype {
        DType::F32 => value
            .data
            .iter()
            .flat_map(|&v| (v as f32).to_le_bytes())
            .collect(),
        DType::F64 => value.data.iter().flat_map(|&v| v.to_le_bytes()).collect(),
        DType::I32 => value
            .data
            .iter()
            .flat_map(|&v| (v as i32).to_le_bytes())
            .collect(),
        DType::I64 => value
            .data
            .iter()
            .flat_map(|&v| (v as i64).to_le_bytes())
            .collect(),
        DType::I8 => value.data.iter().map(|&v| v as i8 as u8).collect(),
        DType::U8 => value.data.iter().map(|&v| v as u8).collect(),
        DType::Bool => value.data.iter().map(|&v| (v != 0.0) as u8).collect(),
        other => {
            return Err(EngineError::Execution(format!(
                "element type {other:?} is not supported by the interpreter"
            )))
        }
    };
    Ok(TensorLiteral::new(spec, Arc::from(bytes)))
}

fn broadcast_read(value: &Value, out_coord: &[usize]) -> f64 {
    let offset = out_coord.len() - value.dims.len();
    let mut flat = 0usize;
    for (axis, &dim) in value.dims.iter().enumerate() {
        let coord = if dim == 1 { 0 } else { out_coord[offset + axis] };
        flat = flat * dim + coord;
    }
    value.data[flat]
}

fn for_each_coord(dims: &[usize], mut body: impl FnMut(&[usize])) {
    let count: usize = dims.iter().product();
    let mut coord = vec![0usize; dims.len()];
    for _ in 0..count {
        body(&coord);
        for axis in (0..dims.len()).rev() {
            coord[axis] += 1;
            if coord[axis] < dims[axis] {
                break;
            }
            coord[axis] = 0;
        }
    }
}

fn erf(x: f64) -> f64 {
    // Abramowitz-Stegun 7.1.26.
    let sign = x.signum();
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.3275911 * x);
    let poly = t
        * (0.254829592
            + t * (-0.284496736 + t * (1.421413741 + t * (-1.453152027 + t * 1.061405429))));
    sign * (1.0 - poly * (-x * x).exp())
}

fn eval(op: &Operation, operands: &[&Value], output: &TensorSpec) -> Result<Value, EngineError> {
    let out = |data: Vec<f64>| Value {
        dtype: output.dtype,
        dims: output.dims.clone(),
        data,
    };
    let unsupported = || EngineError::Unsupported {
        op: op.mnemonic().to_string(),
    };

    let value = match op {
        Operation::Constant(literal) => decode(literal)?,
        Operation::Unary(kind) => {
            let f: fn(f64) -> f64 = match kind {
                UnaryOp::Neg => |v| -v,
                UnaryOp::Abs => f64::abs,
                UnaryOp::Exp => f64::exp,
                UnaryOp::Log => f64::ln,
                UnaryOp::Sqrt => f64::sqrt,
                UnaryOp::Sigmoid => |v| 1.0 / (1.0 + (-v).exp()),
                UnaryOp::Tanh => f64::tanh,
                UnaryOp::Relu => |v| v.max(0.0),
                UnaryOp::Floor => f64::floor,
                UnaryOp::Ceil => f64::ceil,
                UnaryOp::Round => f64::round,
                UnaryOp::Sign => f64::signum,
                UnaryOp::Sin => f64::sin,
                UnaryOp::Cos => f64::cos,
                UnaryOp::Tan => f64::tan,
                UnaryOp::Asin => f64::asin,
                UnaryOp::Acos => f64::acos,
                UnaryOp::Atan => f64::atan,
                UnaryOp::Sinh => f64::sinh,
                UnaryOp::Cosh => f64::cosh,
                UnaryOp::Asinh => f64::asinh,
                UnaryOp::Acosh => f64::acosh,
                UnaryOp::Atanh => f64::atanh,
                UnaryOp::Erf => erf,
                UnaryOp::Not => |v| (v == 0.0) as u8 as f64,
            };
            out(operands[0].data.iter().map(|&v| f(v)).collect())
        }
        Operation::Binary(kind) => {
            let f: fn(f64, f64) -> f64 = match kind {
                BinaryOp::Add => |a, b| a + b,
                BinaryOp::Sub => |a, b| a - b,
                BinaryOp::Mul => |a, b| a * b,
                BinaryOp::Div => |a, b| a / b,
                BinaryOp::FloorDiv => |a, b| (a / b).floor(),
                BinaryOp::FloorMod => |a, b| a - (a / b).floor() * b,
                BinaryOp::Mod => |a, b| a % b,
                BinaryOp::Pow => f64::powf,
                BinaryOp::Maximum => f64::max,
                BinaryOp::Minimum => f64::min,
                BinaryOp::SquaredDifference => |a, b| (a - b) * (a - b),
                BinaryOp::And => |a, b| ((a != 0.0) && (b != 0.0)) as u8 as f64,
                BinaryOp::Or => |a, b| ((a != 0.0) || (b != 0.0)) as u8 as f64,
            };
            let mut data = Vec::with_capacity(output.element_count());
            for_each_coord(&output.dims, |coord| {
                data.push(f(
                    broadcast_read(operands[0], coord),
                    broadcast_read(operands[1], coord),
                ));
            });
            out(data)
        }
        Operation::Compare(kind) => {
            let f: fn(f64, f64) -> bool = match kind {
                CompareOp::Less => |a, b| a < b,
                CompareOp::LessEqual => |a, b| a <= b,
                CompareOp::Equal => |a, b| a == b,
                CompareOp::NotEqual => |a, b| a != b,
                CompareOp::Greater => |a, b| a > b,
                CompareOp::GreaterEqual => |a, b| a >= b,
            };
            let mut data = Vec::with_capacity(output.element_count());
            for_each_coord(&output.dims, |coord| {
                data.push(f(
                    broadcast_read(operands[0], coord),
                    broadcast_read(operands[1], coord),
                ) as u8 as f64);
            });
            out(data)
        }
        Operation::Select => {
            let mut data = Vec::with_capacity(output.element_count());
            for_each_coord(&output.dims, |coord| {
                let cond = broadcast_read(operands[0], coord) != 0.0;
                data.push(if cond {
                    broadcast_read(operands[1], coord)
                } else {
                    broadcast_read(operands[2], coord)
                });
            });
            out(data)
        }
        Operation::MatMul {
            transpose_a,
            transpose_b,
        } => {
            let a = operands[0];
            let b = operands[1];
            let (m, k) = if *transpose_a {
                (a.dims[1], a.dims[0])
            } else {
                (a.dims[0], a.dims[1])
            };
            let n = if *transpose_b { b.dims[0] } else { b.dims[1] };
            let mut data = vec![0.0; m * n];
            for i in 0..m {
                for j in 0..n {
                    let mut acc = 0.0;
                    for p in 0..k {
                        let av = if *transpose_a {
                            a.data[p * a.dims[1] + i]
                        } else {
                            a.data[i * a.dims[1] + p]
                        };
                        let bv = if *transpose_b {
                            b.data[j * b.dims[1] + p]
                        } else {
                            b.data[p * b.dims[1] + j]
                        };
                        acc += av * bv;
                    }
                    data[i * n + j] = acc;
                }
            }
            out(data)
        }
        Operation::Convolution(spec) => conv(operands[0], operands[1], spec, output, 1)?,
        Operation::GroupConvolution(spec) => {
            let groups = operands[0].dims[1] / operands[1].dims[1].max(1);
            conv(operands[0], operands[1], spec, output, groups)?
        }
        Operation::AvgPool(spec) => pool(operands[0], spec, output, true)?,
        Operation::MaxPool(spec) => pool(operands[0], spec, output, false)?,
        Operation::BatchNormInference { epsilon } => {
            let x = operands[0];
            let (scale, offset, mean, variance) =
                (operands[1], operands[2], operands[3], operands[4]);
            let channel_stride: usize = x.dims[2..].iter().product();
            let channels = x.dims[1];
            let mut data = Vec::with_capacity(x.data.len());
            for (flat, &v) in x.data.iter().enumerate() {
                let c = (flat / channel_stride) % channels;
                let norm = (v - mean.data[c]) / (variance.data[c] + *epsilon as f64).sqrt();
                data.push(norm * scale.data[c] + offset.data[c]);
            }
            out(data)
        }
        Operation::Reduce(spec) => {
            let input = operands[0];
            let out_count = output.element_count().max(1);
            let init = match spec.kind {
                ReduceKind::Sum | ReduceKind::Mean | ReduceKind::Any => 0.0,
                ReduceKind::Prod => 1.0,
                ReduceKind::Max => f64::NEG_INFINITY,
                ReduceKind::Min => f64::INFINITY,
                ReduceKind::All => 1.0,
            };
            let mut acc = vec![init; out_count];
            let out_strides = strides(&output.dims);
            for_each_coord(&input.dims, |coord| {
                let mut out_flat = 0usize;
                let mut out_axis = 0usize;
                for (axis, &c) in coord.iter().enumerate() {
                    if spec.axes.contains(&axis) {
                        if spec.keep_dims {
                            out_axis += 1;
                        }
                        continue;
                    }
                    out_flat += c * out_strides[out_axis];
                    out_axis += 1;
                }
                let flat_in = coord
                    .iter()
                    .zip(strides(&input.dims))
                    .map(|(&c, s)| c * s)
                    .sum::<usize>();
                let v = input.data[flat_in];
                let slot = &mut acc[out_flat];
                *slot = match spec.kind {
                    ReduceKind::Sum | ReduceKind::Mean => *slot + v,
                    ReduceKind::Prod => *slot * v,
                    ReduceKind::Max => slot.max(v),
                    ReduceKind::Min => slot.min(v),
                    ReduceKind::Any => ((*slot != 0.0) || (v != 0.0)) as u8 as f64,
                    ReduceKind::All => ((*slot != 0.0) && (v != 0.0)) as u8 as f64,
                };
            });
            if spec.kind == ReduceKind::Mean {
                let reduced: usize = spec.axes.iter().map(|&a| input.dims[a]).product();
                for slot in &mut acc {
                    *slot /= reduced.max(1) as f64;
                }
            }
            out(acc)
        }
        Operation::ArgReduce { kind, axis, .. } => {
            let input = operands[0];
            let axis_len = input.dims[*axis];
            let in_strides = strides(&input.dims);
            let mut data = Vec::with_capacity(output.element_count());
            for_each_coord(&output.dims, |coord| {
                // Output coords are the input coords with `axis` removed.
                let mut base = 0usize;
                let mut out_axis = 0usize;
                for axis_in in 0..input.dims.len() {
                    if axis_in == *axis {
                        continue;
                    }
                    base += coord[out_axis] * in_strides[axis_in];
                    out_axis += 1;
                }
                let mut best = 0usize;
                let mut best_value = input.data[base];
                for i in 1..axis_len {
                    let v = input.data[base + i * in_strides[*axis]];
                    let better = match kind {
                        ArgReduceKind::Max => v > best_value,
                        ArgReduceKind::Min => v < best_value,
                    };
                    if better {
                        best = i;
                        best_value = v;
                    }
                }
                data.push(best as f64);
            });
            out(data)
        }
        Operation::Softmax { axis } => {
            let input = operands[0];
            let axis_len = input.dims[*axis];
            let in_strides = strides(&input.dims);
            let mut data = input.data.clone();
            let mut outer_dims = input.dims.clone();
            outer_dims[*axis] = 1;
            for_each_coord(&outer_dims, |coord| {
                let base: usize = coord
                    .iter()
                    .zip(&in_strides)
                    .map(|(&c, &s)| c * s)
                    .sum();
                let step = in_strides[*axis];
                let max = (0..axis_len)
                    .map(|i| input.data[base + i * step])
                    .fold(f64::NEG_INFINITY, f64::max);
                let sum: f64 = (0..axis_len)
                    .map(|i| (input.data[base + i * step] - max).exp())
                    .sum();
                for i in 0..axis_len {
                    data[base + i * step] = (input.data[base + i * step] - max).exp() / sum;
                }
            });
            out(data)
        }
        Operation::Clamp { min, max } => {
            out(operands[0].data.iter().map(|&v| v.clamp(*min, *max)).collect())
        }
        Operation::Elu { alpha } => out(operands[0]
            .data
            .iter()
            .map(|&v| if v < 0.0 { *alpha as f64 * (v.exp() - 1.0) } else { v })
            .collect()),
        Operation::LeakyRelu { alpha } => out(operands[0]
            .data
            .iter()
            .map(|&v| if v < 0.0 { *alpha as f64 * v } else { v })
            .collect()),
        Operation::Softplus => {
            out(operands[0].data.iter().map(|&v| v.exp().ln_1p()).collect())
        }
        Operation::Reshape { .. } | Operation::Squeeze { .. } | Operation::Unsqueeze { .. } => {
            out(operands[0].data.clone())
        }
        Operation::Transpose { perm } => {
            let input = operands[0];
            let in_strides = strides(&input.dims);
            let mut data = Vec::with_capacity(input.data.len());
            for_each_coord(&output.dims, |coord| {
                let flat: usize = coord
                    .iter()
                    .enumerate()
                    .map(|(axis, &c)| c * in_strides[perm[axis]])
                    .sum();
                data.push(input.data[flat]);
            });
            out(data)
        }
        Operation::Broadcast { .. } => {
            let mut data = Vec::with_capacity(output.element_count());
            for_each_coord(&output.dims, |coord| {
                data.push(broadcast_read(operands[0], coord));
            });
            out(data)
        }
        Operation::Slice(spec) => {
            let input = operands[0];
            let in_strides = strides(&input.dims);
            let mut data = Vec::with_capacity(output.element_count());
            for_each_coord(&output.dims, |coord| {
                let flat: usize = coord
                    .iter()
                    .enumerate()
                    .map(|(axis, &c)| (spec.begin[axis] + c * spec.strides[axis]) * in_strides[axis])
                    .sum();
                data.push(input.data[flat]);
            });
            out(data)
        }
        Operation::Concat { axis } => {
            let mut data = Vec::with_capacity(output.element_count());
            let mut offsets = Vec::with_capacity(operands.len());
            let mut running = 0usize;
            for operand in operands {
                offsets.push(running);
                running += operand.dims[*axis];
            }
            for_each_coord(&output.dims, |coord| {
                let pos = coord[*axis];
                let (part, operand) = offsets
                    .iter()
                    .zip(operands.iter())
                    .rev()
                    .find(|(&offset, _)| pos >= offset)
                    .map(|(&offset, op)| (pos - offset, op))
                    .unwrap_or((pos, &operands[0]));
                let mut in_coord = coord.to_vec();
                in_coord[*axis] = part;
                let flat: usize = in_coord
                    .iter()
                    .zip(strides(&operand.dims))
                    .map(|(&c, s)| c * s)
                    .sum();
                data.push(operand.data[flat]);
            });
            out(data)
        }
        Operation::Pad(spec) => {
            if spec.mode != PadMode::Constant {
                return Err(unsupported());
            }
            let input = operands[0];
            let in_strides = strides(&input.dims);
            let mut data = Vec::with_capacity(output.element_count());
            for_each_coord(&output.dims, |coord| {
                let mut flat = 0usize;
                let mut inside = true;
                for (axis, &c) in coord.iter().enumerate() {
                    if c < spec.begin[axis] || c >= spec.begin[axis] + input.dims[axis] {
                        inside = false;
                        break;
                    }
                    flat += (c - spec.begin[axis]) * in_strides[axis];
                }
                data.push(if inside { input.data[flat] } else { spec.value });
            });
            out(data)
        }
        Operation::Reverse { axes } => {
            let input = operands[0];
            let in_strides = strides(&input.dims);
            let mut data = Vec::with_capacity(output.element_count());
            for_each_coord(&output.dims, |coord| {
                let flat: usize = coord
                    .iter()
                    .enumerate()
                    .map(|(axis, &c)| {
                        let c = if axes.contains(&axis) {
                            input.dims[axis] - 1 - c
                        } else {
                            c
                        };
                        c * in_strides[axis]
                    })
                    .sum();
                data.push(input.data[flat]);
            });
            out(data)
        }
        Operation::Tile { .. } => {
            let input = operands[0];
            let in_strides = strides(&input.dims);
            let mut data = Vec::with_capacity(output.element_count());
            for_each_coord(&output.dims, |coord| {
                let flat: usize = coord
                    .iter()
                    .enumerate()
                    .map(|(axis, &c)| (c % input.dims[axis]) * in_strides[axis])
                    .sum();
                data.push(input.data[flat]);
            });
            out(data)
        }
        Operation::Cast { .. } => {
            let rounded = output.dtype.is_integer() || output.dtype == DType::Bool;
            out(operands[0]
                .data
                .iter()
                .map(|&v| if rounded { v.trunc() } else { v })
                .collect())
        }
        Operation::CumSum {
            axis,
            exclusive,
            reverse,
        } => {
            let input = operands[0];
            let axis_len = input.dims[*axis];
            let in_strides = strides(&input.dims);
            let step = in_strides[*axis];
            let mut data = vec![0.0; input.data.len()];
            let mut outer_dims = input.dims.clone();
            outer_dims[*axis] = 1;
            for_each_coord(&outer_dims, |coord| {
                let base: usize = coord
                    .iter()
                    .zip(&in_strides)
                    .map(|(&c, &s)| c * s)
                    .sum();
                let order: Vec<usize> = if *reverse {
                    (0..axis_len).rev().collect()
                } else {
                    (0..axis_len).collect()
                };
                let mut acc = 0.0;
                for &i in &order {
                    let v = input.data[base + i * step];
                    data[base + i * step] = if *exclusive { acc } else { acc + v };
                    acc += v;
                }
            });
            out(data)
        }
        Operation::Gather { axis, batch_dims } => {
            let params = operands[0];
            let indices = operands[1];
            let in_strides = strides(&params.dims);
            let idx_strides = strides(&indices.dims);
            // Leading batch axes are shared by params, indices, and output.
            let index_rank = indices.dims.len() - batch_dims;
            let mut data = Vec::with_capacity(output.element_count());
            for_each_coord(&output.dims, |coord| {
                // Output coords: params[..axis] ++ indices[batch..] ++
                // params[axis+1..].
                let mut index_flat = 0usize;
                for b in 0..*batch_dims {
                    index_flat += coord[b] * idx_strides[b];
                }
                for (i, s) in idx_strides[*batch_dims..].iter().enumerate() {
                    index_flat += coord[*axis + i] * s;
                }
                let picked = indices.data[index_flat] as usize;
                let mut flat = picked * in_strides[*axis];
                for (params_axis, s) in in_strides.iter().enumerate() {
                    if params_axis < *axis {
                        flat += coord[params_axis] * s;
                    } else if params_axis > *axis {
                        flat += coord[params_axis - 1 + index_rank] * s;
                    }
                }
                data.push(params.data[flat]);
            });
            out(data)
        }
        Operation::OneHot { axis, .. } => {
            let indices = operands[0];
            let on = operands[1].data[0];
            let off = operands[2].data[0];
            let mut data = Vec::with_capacity(output.element_count());
            for_each_coord(&output.dims, |coord| {
                let mut index_coord = coord.to_vec();
                let hot = index_coord.remove(*axis);
                let flat: usize = index_coord
                    .iter()
                    .zip(strides(&indices.dims))
                    .map(|(&c, s)| c * s)
                    .sum();
                data.push(if indices.data[flat] as usize == hot { on } else { off });
            });
            out(data)
        }
        _ => return Err(unsupported()),
    };
    Ok(value)
}

fn conv(
    input: &Value,
    filter: &Value,
    spec: &ConvSpec,
    output: &TensorSpec,
    groups: usize,
) -> Result<Value, EngineError> {
    let [n, in_c, in_h, in_w] = dims4(&input.dims)?;
    let [out_c, filt_c, k_h, k_w] = dims4(&filter.dims)?;
    let out_h = output.dims[2];
    let out_w = output.dims[3];
    let group_out = out_c / groups.max(1);

    let mut data = vec![0.0; n * out_c * out_h * out_w];
    for b in 0..n {
        for o in 0..out_c {
            let group = o / group_out.max(1);
            for y in 0..out_h {
                for x in 0..out_w {
                    let mut acc = 0.0;
                    for ic in 0..filt_c {
                        let c = group * filt_c + ic;
                        if c >= in_c {
                            continue;
                        }
                        for ky in 0..k_h {
                            for kx in 0..k_w {
                                let iy = (y * spec.strides[0] + ky * spec.dilations[0]) as i64
                                    - spec.pads_begin[0] as i64;
                                let ix = (x * spec.strides[1] + kx * spec.dilations[1]) as i64
                                    - spec.pads_begin[1] as i64;
                                if iy < 0 || ix < 0 || iy >= in_h as i64 || ix >= in_w as i64 {
                                    continue;
                                }
                                let input_flat = ((b * in_c + c) * in_h + iy as usize) * in_w
                                    + ix as usize;
                                let filter_flat = ((o * filt_c + ic) * k_h + ky) * k_w + kx;
                                acc += input.data[input_flat] * filter.data[filter_flat];
                            }
                        }
                    }
                    data[((b * out_c + o) * out_h + y) * out_w + x] = acc;
                }
            }
        }
    }
    Ok(Value {
        dtype: output.dtype,
        dims: output.dims.clone(),
        data,
    })
}

fn pool(
    input: &Value,
    spec: &PoolSpec,
    output: &TensorSpec,
    average: bool,
) -> Result<Value, EngineError> {
    let [n, channels, in_h, in_w] = dims4(&input.dims)?;
    let out_h = output.dims[2];
    let out_w = output.dims[3];

    let mut data = vec![0.0; n * channels * out_h * out_w];
    for b in 0..n {
        for c in 0..channels {
            for y in 0..out_h {
                for x in 0..out_w {
                    let mut acc = if average { 0.0 } else { f64::NEG_INFINITY };
                    let mut count = 0usize;
                    for ky in 0..spec.window[0] {
                        for kx in 0..spec.window[1] {
                            let iy = (y * spec.strides[0] + ky) as i64 - spec.pads_begin[0] as i64;
                            let ix = (x * spec.strides[1] + kx) as i64 - spec.pads_begin[1] as i64;
                            if iy < 0 || ix < 0 || iy >= in_h as i64 || ix >= in_w as i64 {
                                continue;
                            }
                            let flat =
                                ((b * channels + c) * in_h + iy as usize) * in_w + ix as usize;
                            if average {
                                acc += input.data[flat];
                                count += 1;
                            } else {
                                acc = acc.max(input.data[flat]);
                            }
                        }
                    }
                    if average {
                        let divisor = if spec.exclude_pad {
                            count.max(1)
                        } else {
                            spec.window[0] * spec.window[1]
                        };
                        acc /= divisor as f64;
                    }
                    data[((b * channels + c) * out_h + y) * out_w + x] = acc;
                }
            }
        }
    }
    Ok(Value {
        dtype: output.dtype,
        dims: output.dims.clone(),
        data,
    })
}

fn dims4(dims: &[usize]) -> Result<[usize; 4], EngineError> {
    <[usize; 4]>::try_from(dims)
        .map_err(|_| EngineError::Execution(format!("expected rank 4, got {:?}", dims)))
}
