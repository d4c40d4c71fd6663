//! Translators for constants, shape manipulation, and slicing.
//!
//! Shape-consuming ops read their shape arguments from constants (marking
//! guarantees this) and fold them away at translation time: `Shape`,
//! `Size`, `Rank`, and `Range` all become literals because every tensor
//! spec is static here.

use crate::graph::{Graph, NodeId, TensorData};
use crate::ir::{
    DType, Operation, PadMode, PadSpec, SliceSpec, TensorLiteral, TensorSpec, ValueId,
};
use crate::translate::{
    literal_from_tensor, normalize_axis, Builder, TranslateError, TranslateResult,
};

pub(super) fn translate_const(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let tensor = node
        .attr_tensor("value")
        .ok_or_else(|| TranslateError::unsupported(&node.name, "constant without a value"))?;
    let out = builder.constant(literal_from_tensor(tensor));
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_identity(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let input = builder.fetch_input(graph, id, 0)?;
    builder.save(&node, vec![input]);
    Ok(())
}

/// `NoOp` carries control edges only; it produces no values.
pub(super) fn translate_noop(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    builder.save(&node, Vec::new());
    Ok(())
}

pub(super) fn translate_reshape(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let input = builder.fetch_input(graph, id, 0)?;
    let requested = builder.static_input_i64(graph, id, 1)?;
    let element_count = builder.spec(input).element_count();

    let mut dims = Vec::with_capacity(requested.len());
    let mut infer_axis = None;
    let mut known: usize = 1;
    for (axis, &dim) in requested.iter().enumerate() {
        if dim == -1 {
            if infer_axis.is_some() {
                return Err(TranslateError::shape(&node.name, "more than one -1 in shape"));
            }
            infer_axis = Some(axis);
            dims.push(0);
        } else if dim < 0 {
            return Err(TranslateError::shape(&node.name, format!("negative dim {dim}")));
        } else {
            dims.push(dim as usize);
            known *= dim as usize;
        }
    }
    if let Some(axis) = infer_axis {
        if known == 0 || element_count % known != 0 {
            return Err(TranslateError::shape(
                &node.name,
                "shape does not divide the element count",
            ));
        }
        dims[axis] = element_count / known;
    } else if known != element_count {
        return Err(TranslateError::shape(&node.name, "element count mismatch"));
    }

    let out = builder.emit_reshape(input, dims);
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_shape(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let input = builder.fetch_input(graph, id, 0)?;
    let dims: Vec<i64> = builder.spec(input).dims.iter().map(|&d| d as i64).collect();
    let literal = match node.attr_type("out_type").map(DType::from_host) {
        Some(DType::I32) => {
            let dims32: Vec<i32> = dims.iter().map(|&d| d as i32).collect();
            TensorLiteral::from_i32(vec![dims32.len()], &dims32)
        }
        _ => TensorLiteral::from_i64(vec![dims.len()], &dims),
    };
    let out = builder.constant(literal);
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_size(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let input = builder.fetch_input(graph, id, 0)?;
    let count = builder.spec(input).element_count() as i64;
    let literal = match node.attr_type("out_type").map(DType::from_host) {
        Some(DType::I64) => TensorLiteral::from_i64(Vec::new(), &[count]),
        _ => TensorLiteral::from_i32(Vec::new(), &[count as i32]),
    };
    let out = builder.constant(literal);
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_rank(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let input = builder.fetch_input(graph, id, 0)?;
    let rank = builder.spec(input).rank() as i32;
    let out = builder.constant(TensorLiteral::from_i32(Vec::new(), &[rank]));
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_expand_dims(
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
    let axis = normalize_axis(&node.name, axis_value, rank + 1)?;
    let mut dims = builder.spec(input).dims.clone();
    dims.insert(axis, 1);
    let dtype = builder.spec(input).dtype;
    let out = builder.emit(
        Operation::Unsqueeze { axes: vec![axis] },
        vec![input],
        TensorSpec::new(dtype, dims),
    );
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_squeeze(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let input = builder.fetch_input(graph, id, 0)?;
    let in_dims = builder.spec(input).dims.clone();
    let requested = node
        .attr_int_list("squeeze_dims")
        .or_else(|| node.attr_int_list("axis"))
        .unwrap_or(&[]);

    let mut axes: Vec<usize> = if requested.is_empty() {
        (0..in_dims.len()).filter(|&a| in_dims[a] == 1).collect()
    } else {
        let mut axes = Vec::with_capacity(requested.len());
        for &axis in requested {
            let axis = normalize_axis(&node.name, axis, in_dims.len())?;
            if in_dims[axis] != 1 {
                return Err(TranslateError::shape(
                    &node.name,
                    format!("cannot squeeze axis {axis} of extent {}", in_dims[axis]),
                ));
            }
            axes.push(axis);
        }
        axes
    };
    axes.sort_unstable();
    axes.dedup();

    let dims: Vec<usize> = in_dims
        .iter()
        .enumerate()
        .filter(|(a, _)| !axes.contains(a))
        .map(|(_, &d)| d)
        .collect();
    let dtype = builder.spec(input).dtype;
    let out = builder.emit(
        Operation::Squeeze { axes },
        vec![input],
        TensorSpec::new(dtype, dims),
    );
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_fill(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let dims: Vec<usize> = builder
        .static_input_i64(graph, id, 0)?
        .into_iter()
        .map(|d| d as usize)
        .collect();
    let value = builder.fetch_input(graph, id, 1)?;
    let dtype = builder.spec(value).dtype;
    let out = builder.emit(
        Operation::Broadcast { dims: dims.clone() },
        vec![value],
        TensorSpec::new(dtype, dims),
    );
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_pack(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let num_inputs = graph.num_inputs(id);
    if num_inputs == 0 {
        return Err(TranslateError::unsupported(&node.name, "Pack with no inputs"));
    }
    let first = builder.fetch_input(graph, id, 0)?;
    let rank = builder.spec(first).rank();
    let axis = normalize_axis(&node.name, node.attr_int("axis").unwrap_or(0), rank + 1)?;

    let mut expanded = Vec::with_capacity(num_inputs);
    for slot in 0..num_inputs {
        let value = builder.fetch_input(graph, id, slot)?;
        let mut dims = builder.spec(value).dims.clone();
        dims.insert(axis, 1);
        let dtype = builder.spec(value).dtype;
        expanded.push(builder.emit(
            Operation::Unsqueeze { axes: vec![axis] },
            vec![value],
            TensorSpec::new(dtype, dims),
        ));
    }
    let mut dims = builder.spec(expanded[0]).dims.clone();
    dims[axis] = num_inputs;
    let dtype = builder.spec(expanded[0]).dtype;
    let out = builder.emit(
        Operation::Concat { axis },
        expanded,
        TensorSpec::new(dtype, dims),
    );
    builder.save(&node, vec![out]);
    Ok(())
}

/// One strided window copy; used by Split/SplitV/Unpack/StridedSlice.
fn emit_slice(
    builder: &mut Builder,
    input: ValueId,
    begin: Vec<usize>,
    end: Vec<usize>,
) -> ValueId {
    let dims: Vec<usize> = begin.iter().zip(&end).map(|(&b, &e)| e - b).collect();
    let dtype = builder.spec(input).dtype;
    let strides = vec![1; begin.len()];
    builder.emit(
        Operation::Slice(SliceSpec {
            begin,
            end,
            strides,
        }),
        vec![input],
        TensorSpec::new(dtype, dims),
    )
}

pub(super) fn translate_unpack(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let input = builder.fetch_input(graph, id, 0)?;
    let dims = builder.spec(input).dims.clone();
    let axis = normalize_axis(&node.name, node.attr_int("axis").unwrap_or(0), dims.len())?;
    let num = node.attr_int("num").unwrap_or(dims[axis] as i64) as usize;
    if num != dims[axis] {
        return Err(TranslateError::shape(
            &node.name,
            format!("num {num} does not match axis extent {}", dims[axis]),
        ));
    }

    let mut outputs = Vec::with_capacity(num);
    for part in 0..num {
        let mut begin = vec![0; dims.len()];
        let mut end = dims.clone();
        begin[axis] = part;
        end[axis] = part + 1;
        let slice = emit_slice(builder, input, begin, end);
        let mut out_dims = dims.clone();
        out_dims.remove(axis);
        let dtype = builder.spec(slice).dtype;
        outputs.push(builder.emit(
            Operation::Squeeze { axes: vec![axis] },
            vec![slice],
            TensorSpec::new(dtype, out_dims),
        ));
    }
    builder.save(&node, outputs);
    Ok(())
}

pub(super) fn translate_concat(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let num_inputs = graph.num_inputs(id);
    if num_inputs < 2 {
        return Err(TranslateError::unsupported(&node.name, "ConcatV2 needs values and an axis"));
    }
    let axis_value = builder
        .static_input_i64(graph, id, num_inputs - 1)?
        .first()
        .copied()
        .ok_or_else(|| TranslateError::unsupported(&node.name, "empty axis input"))?;

    let mut values = Vec::with_capacity(num_inputs - 1);
    for slot in 0..num_inputs - 1 {
        values.push(builder.fetch_input(graph, id, slot)?);
    }
    let rank = builder.spec(values[0]).rank();
    let axis = normalize_axis(&node.name, axis_value, rank)?;

    let mut dims = builder.spec(values[0]).dims.clone();
    dims[axis] = values.iter().map(|&v| builder.spec(v).dims[axis]).sum();
    let dtype = builder.spec(values[0]).dtype;
    let out = builder.emit(
        Operation::Concat { axis },
        values,
        TensorSpec::new(dtype, dims),
    );
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_slice(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let input = builder.fetch_input(graph, id, 0)?;
    let dims = builder.spec(input).dims.clone();
    let begin = builder.static_input_i64(graph, id, 1)?;
    let size = builder.static_input_i64(graph, id, 2)?;
    if begin.len() != dims.len() || size.len() != dims.len() {
        return Err(TranslateError::shape(&node.name, "begin/size rank mismatch"));
    }

    let mut begin_out = Vec::with_capacity(dims.len());
    let mut end_out = Vec::with_capacity(dims.len());
    for axis in 0..dims.len() {
        let b = begin[axis] as usize;
        let e = if size[axis] == -1 {
            dims[axis]
        } else {
            b + size[axis] as usize
        };
        if b > e || e > dims[axis] {
            return Err(TranslateError::shape(
                &node.name,
                format!("slice [{b}, {e}) out of range for axis {axis}"),
            ));
        }
        begin_out.push(b);
        end_out.push(e);
    }
    let out = emit_slice(builder, input, begin_out, end_out);
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_strided_slice(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    if node.attr_int("new_axis_mask").unwrap_or(0) != 0
        || node.attr_int("ellipsis_mask").unwrap_or(0) != 0
    {
        return Err(TranslateError::unsupported(
            &node.name,
            "new_axis_mask and ellipsis_mask are not supported",
        ));
    }
    let input = builder.fetch_input(graph, id, 0)?;
    let dims = builder.spec(input).dims.clone();
    let begin = builder.static_input_i64(graph, id, 1)?;
    let end = builder.static_input_i64(graph, id, 2)?;
    let strides = builder.static_input_i64(graph, id, 3)?;
    let begin_mask = node.attr_int("begin_mask").unwrap_or(0);
    let end_mask = node.attr_int("end_mask").unwrap_or(0);
    let shrink_mask = node.attr_int("shrink_axis_mask").unwrap_or(0);

    let mut begin_out = Vec::with_capacity(dims.len());
    let mut end_out = Vec::with_capacity(dims.len());
    let mut stride_out = Vec::with_capacity(dims.len());
    let mut shrink_axes = Vec::new();
    for axis in 0..dims.len() {
        let extent = dims[axis] as i64;
        let stride = strides.get(axis).copied().unwrap_or(1);
        if stride <= 0 {
            return Err(TranslateError::unsupported(
                &node.name,
                "non-positive strides are not supported",
            ));
        }
        let clamp = |v: i64| -> usize {
            let v = if v < 0 { v + extent } else { v };
            v.clamp(0, extent) as usize
        };
        let mut b = if axis < begin.len() && begin_mask & (1 << axis) == 0 {
            clamp(begin[axis])
        } else {
            0
        };
        let mut e = if axis < end.len() && end_mask & (1 << axis) == 0 {
            clamp(end[axis])
        } else {
            dims[axis]
        };
        if shrink_mask & (1 << axis) != 0 {
            b = clamp(begin[axis]);
            e = b + 1;
            shrink_axes.push(axis);
        }
        if b > e {
            e = b;
        }
        begin_out.push(b);
        end_out.push(e);
        stride_out.push(stride as usize);
    }

    let sliced_dims: Vec<usize> = (0..dims.len())
        .map(|axis| (end_out[axis] - begin_out[axis]).div_ceil(stride_out[axis]))
        .collect();
    let dtype = builder.spec(input).dtype;
    let mut out = builder.emit(
        Operation::Slice(SliceSpec {
            begin: begin_out,
            end: end_out,
            strides: stride_out,
        }),
        vec![input],
        TensorSpec::new(dtype, sliced_dims.clone()),
    );
    if !shrink_axes.is_empty() {
        let dims: Vec<usize> = sliced_dims
            .iter()
            .enumerate()
            .filter(|(a, _)| !shrink_axes.contains(a))
            .map(|(_, &d)| d)
            .collect();
        out = builder.emit(
            Operation::Squeeze {
                axes: shrink_axes,
            },
            vec![out],
            TensorSpec::new(dtype, dims),
        );
    }
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_split(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let axis_value = builder
        .static_input_i64(graph, id, 0)?
        .first()
        .copied()
        .ok_or_else(|| TranslateError::unsupported(&node.name, "empty axis input"))?;
    let input = builder.fetch_input(graph, id, 1)?;
    let dims = builder.spec(input).dims.clone();
    let axis = normalize_axis(&node.name, axis_value, dims.len())?;
    let parts = node
        .attr_int("num_split")
        .filter(|n| *n >= 1)
        .ok_or_else(|| TranslateError::unsupported(&node.name, "missing num_split"))?
        as usize;
    if dims[axis] % parts != 0 {
        return Err(TranslateError::shape(
            &node.name,
            format!("axis extent {} does not divide into {parts} parts", dims[axis]),
        ));
    }

    let part_len = dims[axis] / parts;
    let mut outputs = Vec::with_capacity(parts);
    for part in 0..parts {
        let mut begin = vec![0; dims.len()];
        let mut end = dims.clone();
        begin[axis] = part * part_len;
        end[axis] = (part + 1) * part_len;
        outputs.push(emit_slice(builder, input, begin, end));
    }
    builder.save(&node, outputs);
    Ok(())
}

pub(super) fn translate_split_v(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let input = builder.fetch_input(graph, id, 0)?;
    let dims = builder.spec(input).dims.clone();
    let mut lengths = builder.static_input_i64(graph, id, 1)?;
    let axis_value = builder
        .static_input_i64(graph, id, 2)?
        .first()
        .copied()
        .ok_or_else(|| TranslateError::unsupported(&node.name, "empty axis input"))?;
    let axis = normalize_axis(&node.name, axis_value, dims.len())?;

    let known: i64 = lengths.iter().filter(|&&l| l >= 0).sum();
    let wildcards = lengths.iter().filter(|&&l| l < 0).count();
    match wildcards {
        0 if known as usize == dims[axis] => {}
        1 => {
            let remainder = dims[axis] as i64 - known;
            if remainder < 0 {
                return Err(TranslateError::shape(&node.name, "split sizes exceed extent"));
            }
            for length in lengths.iter_mut() {
                if *length < 0 {
                    *length = remainder;
                }
            }
        }
        _ => {
            return Err(TranslateError::shape(
                &node.name,
                "split sizes do not cover the axis extent",
            ))
        }
    }

    let mut offset = 0usize;
    let mut outputs = Vec::with_capacity(lengths.len());
    for &length in &lengths {
        let mut begin = vec![0; dims.len()];
        let mut end = dims.clone();
        begin[axis] = offset;
        end[axis] = offset + length as usize;
        offset += length as usize;
        outputs.push(emit_slice(builder, input, begin, end));
    }
    builder.save(&node, outputs);
    Ok(())
}

pub(super) fn translate_tile(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let input = builder.fetch_input(graph, id, 0)?;
    let dims = builder.spec(input).dims.clone();
    let repeats: Vec<usize> = builder
        .static_input_i64(graph, id, 1)?
        .into_iter()
        .map(|r| r as usize)
        .collect();
    if repeats.len() != dims.len() {
        return Err(TranslateError::shape(&node.name, "multiples rank mismatch"));
    }
    let out_dims: Vec<usize> = dims.iter().zip(&repeats).map(|(&d, &r)| d * r).collect();
    let dtype = builder.spec(input).dtype;
    let out = builder.emit(
        Operation::Tile { repeats },
        vec![input],
        TensorSpec::new(dtype, out_dims),
    );
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_transpose(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let input = builder.fetch_input(graph, id, 0)?;
    let rank = builder.spec(input).rank();
    let raw = builder.static_input_i64(graph, id, 1)?;
    if raw.len() != rank {
        return Err(TranslateError::shape(&node.name, "permutation rank mismatch"));
    }
    let mut perm = Vec::with_capacity(rank);
    for axis in raw {
        perm.push(normalize_axis(&node.name, axis, rank)?);
    }
    let out = builder.emit_transpose(input, perm);
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_reverse(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let input = builder.fetch_input(graph, id, 0)?;
    let rank = builder.spec(input).rank();
    let mut axes = Vec::new();
    for axis in builder.static_input_i64(graph, id, 1)? {
        axes.push(normalize_axis(&node.name, axis, rank)?);
    }
    axes.sort_unstable();
    axes.dedup();
    let spec = builder.spec(input).clone();
    let out = builder.emit(Operation::Reverse { axes }, vec![input], spec);
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_gather(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let params = builder.fetch_input(graph, id, 0)?;
    let indices = builder.fetch_input(graph, id, 1)?;
    let params_dims = builder.spec(params).dims.clone();
    let axis = if node.op_type == "GatherV2" {
        let axis_value = builder
            .static_input_i64(graph, id, 2)?
            .first()
            .copied()
            .ok_or_else(|| TranslateError::unsupported(&node.name, "empty axis input"))?;
        normalize_axis(&node.name, axis_value, params_dims.len())?
    } else {
        0
    };
    let batch_dims = node.attr_int("batch_dims").unwrap_or(0) as usize;

    let indices_dims = builder.spec(indices).dims.clone();
    let mut dims = params_dims[..axis].to_vec();
    dims.extend_from_slice(&indices_dims[batch_dims..]);
    dims.extend_from_slice(&params_dims[axis + 1..]);
    let dtype = builder.spec(params).dtype;
    let out = builder.emit(
        Operation::Gather { axis, batch_dims },
        vec![params, indices],
        TensorSpec::new(dtype, dims),
    );
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_gather_nd(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let params = builder.fetch_input(graph, id, 0)?;
    let indices = builder.fetch_input(graph, id, 1)?;
    let params_dims = builder.spec(params).dims.clone();
    let indices_dims = builder.spec(indices).dims.clone();
    let index_depth = *indices_dims.last().ok_or_else(|| {
        TranslateError::shape(&node.name, "indices must have at least rank 1")
    })?;
    if index_depth > params_dims.len() {
        return Err(TranslateError::shape(&node.name, "index depth exceeds params rank"));
    }

    let mut dims = indices_dims[..indices_dims.len() - 1].to_vec();
    dims.extend_from_slice(&params_dims[index_depth..]);
    let dtype = builder.spec(params).dtype;
    let out = builder.emit(
        Operation::GatherNd { batch_dims: 0 },
        vec![params, indices],
        TensorSpec::new(dtype, dims),
    );
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_scatter_nd(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let indices = builder.fetch_input(graph, id, 0)?;
    let updates = builder.fetch_input(graph, id, 1)?;
    let dims: Vec<usize> = builder
        .static_input_i64(graph, id, 2)?
        .into_iter()
        .map(|d| d as usize)
        .collect();
    let dtype = builder.spec(updates).dtype;
    let out = builder.emit(
        Operation::ScatterNd,
        vec![indices, updates],
        TensorSpec::new(dtype, dims),
    );
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_pad(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let input = builder.fetch_input(graph, id, 0)?;
    let dims = builder.spec(input).dims.clone();
    let paddings = builder.static_input_i64(graph, id, 1)?;
    if paddings.len() != dims.len() * 2 {
        return Err(TranslateError::shape(&node.name, "paddings rank mismatch"));
    }
    let begin: Vec<usize> = paddings.iter().step_by(2).map(|&p| p as usize).collect();
    let end: Vec<usize> = paddings
        .iter()
        .skip(1)
        .step_by(2)
        .map(|&p| p as usize)
        .collect();

    let mode = match node.op_type.as_str() {
        "MirrorPad" => match node.attr_str("mode") {
            Some("REFLECT") => PadMode::Reflect,
            Some("SYMMETRIC") => PadMode::Symmetric,
            other => {
                return Err(TranslateError::unsupported(
                    &node.name,
                    format!("unsupported mirror mode {other:?}"),
                ))
            }
        },
        _ => PadMode::Constant,
    };
    let value = if node.op_type == "PadV2" {
        builder
            .static_input_f32(graph, id, 2)?
            .first()
            .copied()
            .unwrap_or(0.0) as f64
    } else {
        0.0
    };

    let out_dims: Vec<usize> = dims
        .iter()
        .enumerate()
        .map(|(axis, &d)| d + begin[axis] + end[axis])
        .collect();
    let dtype = builder.spec(input).dtype;
    let out = builder.emit(
        Operation::Pad(PadSpec {
            mode,
            begin,
            end,
            value,
        }),
        vec![input],
        TensorSpec::new(dtype, out_dims),
    );
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_range(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let start_tensor = builder.static_input_tensor(graph, id, 0)?;
    let float = start_tensor.dtype.is_float();
    let literal = if float {
        let read = |tensor: TensorData, slot: usize| -> TranslateResult<f32> {
            tensor
                .to_f32_vec()
                .and_then(|v| v.first().copied())
                .ok_or_else(|| TranslateError::NotStatic {
                    node: node.name.clone(),
                    input: slot,
                })
        };
        let start = read(start_tensor, 0)?;
        let limit = read(builder.static_input_tensor(graph, id, 1)?, 1)?;
        let delta = read(builder.static_input_tensor(graph, id, 2)?, 2)?;
        if delta == 0.0 {
            return Err(TranslateError::shape(&node.name, "range delta must be nonzero"));
        }
        let count = (((limit - start) / delta).ceil()).max(0.0) as usize;
        let values: Vec<f32> = (0..count).map(|i| start + delta * i as f32).collect();
        TensorLiteral::from_f32(vec![count], &values)
    } else {
        let read = |values: Vec<i64>, slot: usize| -> TranslateResult<i64> {
            values.first().copied().ok_or_else(|| TranslateError::NotStatic {
                node: node.name.clone(),
                input: slot,
            })
        };
        let start = read(start_tensor.to_i64_vec().unwrap_or_default(), 0)?;
        let limit = read(builder.static_input_i64(graph, id, 1)?, 1)?;
        let delta = read(builder.static_input_i64(graph, id, 2)?, 2)?;
        if delta == 0 {
            return Err(TranslateError::shape(&node.name, "range delta must be nonzero"));
        }
        let count = ((limit - start) as f64 / delta as f64).ceil().max(0.0) as usize;
        let values: Vec<i64> = (0..count).map(|i| start + delta * i as i64).collect();
        TensorLiteral::from_i64(vec![count], &values)
    };
    let out = builder.constant(literal);
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_one_hot(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let indices = builder.fetch_input(graph, id, 0)?;
    let depth = builder
        .static_input_i64(graph, id, 1)?
        .first()
        .copied()
        .filter(|&d| d >= 0)
        .ok_or_else(|| TranslateError::unsupported(&node.name, "depth must be a non-negative scalar"))?
        as usize;
    let on_value = builder.fetch_input(graph, id, 2)?;
    let off_value = builder.fetch_input(graph, id, 3)?;

    let rank = builder.spec(indices).rank();
    let axis = normalize_axis(&node.name, node.attr_int("axis").unwrap_or(-1), rank + 1)?;
    let mut dims = builder.spec(indices).dims.clone();
    dims.insert(axis, depth);
    let dtype = builder.spec(on_value).dtype;
    let out = builder.emit(
        Operation::OneHot { axis, depth },
        vec![indices, on_value, off_value],
        TensorSpec::new(dtype, dims),
    );
    builder.save(&node, vec![out]);
    Ok(())
}
