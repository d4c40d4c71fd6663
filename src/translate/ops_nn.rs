//! Translators for spatial and neural-net ops.
//!
//! Every spatial op is legalized to the accelerator's channel-first
//! contract: channels-last inputs are bracketed with transposes and
//! filters are converted from HWIO. The transpose-cancellation pass
//! removes the brackets that meet between adjacent spatial ops.

use crate::graph::{Graph, NodeId};
use crate::ir::{
    BinaryOp, ConvSpec, DType, DeconvSpec, LrnSpec, Operation, PoolSpec, SpaceBlockSpec,
    TensorSpec, TopKSpec,
};
use crate::translate::layout::{
    filter_to_oihw, is_channels_last, resolve_padding, spatial_pair, to_nchw, to_nhwc,
    windowed_dim,
};
use crate::translate::{Builder, TranslateError, TranslateResult};

pub(super) fn translate_conv2d(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let strides = spatial_pair(&node, "strides", 1)?;
    let dilations = spatial_pair(&node, "dilations", 1)?;

    let mut data = builder.fetch_input(graph, id, 0)?;
    let filter = builder.fetch_input(graph, id, 1)?;
    let channels_last = is_channels_last(&node);
    if channels_last {
        data = to_nchw(builder, data);
    }
    let filter = filter_to_oihw(builder, filter);

    let data_dims = builder.spec(data).dims.clone();
    let filter_dims = builder.spec(filter).dims.clone();
    if data_dims.len() != 4 || filter_dims.len() != 4 {
        return Err(TranslateError::shape(&node.name, "Conv2D expects rank-4 inputs"));
    }
    let input_hw = [data_dims[2], data_dims[3]];
    let window_hw = [filter_dims[2], filter_dims[3]];
    let pads = resolve_padding(&node, &input_hw, &window_hw, &strides, &dilations)?;

    let out_hw: Vec<usize> = (0..2)
        .map(|axis| {
            windowed_dim(
                input_hw[axis],
                window_hw[axis],
                strides[axis],
                dilations[axis],
                pads.begin[axis],
                pads.end[axis],
            )
        })
        .collect();
    let dtype = builder.spec(data).dtype;
    let mut out = builder.emit(
        Operation::Convolution(ConvSpec {
            strides: strides.to_vec(),
            dilations: dilations.to_vec(),
            pads_begin: pads.begin,
            pads_end: pads.end,
        }),
        vec![data, filter],
        TensorSpec::new(dtype, vec![data_dims[0], filter_dims[0], out_hw[0], out_hw[1]]),
    );
    if channels_last {
        out = to_nhwc(builder, out);
    }
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_depthwise_conv2d(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let strides = spatial_pair(&node, "strides", 1)?;
    let dilations = spatial_pair(&node, "dilations", 1)?;

    let mut data = builder.fetch_input(graph, id, 0)?;
    let filter = builder.fetch_input(graph, id, 1)?;
    let channels_last = is_channels_last(&node);
    if channels_last {
        data = to_nchw(builder, data);
    }
    // Filter arrives as [H, W, I, M]; group convolution wants one
    // single-channel filter per output channel: [I * M, 1, H, W].
    let filter_dims = builder.spec(filter).dims.clone();
    if filter_dims.len() != 4 {
        return Err(TranslateError::shape(&node.name, "depthwise filter must be rank 4"));
    }
    let (h, w, in_c, multiplier) =
        (filter_dims[0], filter_dims[1], filter_dims[2], filter_dims[3]);
    let filter = builder.emit_transpose(filter, vec![2, 3, 0, 1]);
    let filter = builder.emit_reshape(filter, vec![in_c * multiplier, 1, h, w]);

    let data_dims = builder.spec(data).dims.clone();
    if data_dims.len() != 4 {
        return Err(TranslateError::shape(&node.name, "depthwise input must be rank 4"));
    }
    let input_hw = [data_dims[2], data_dims[3]];
    let window_hw = [h, w];
    let pads = resolve_padding(&node, &input_hw, &window_hw, &strides, &dilations)?;
    let out_hw: Vec<usize> = (0..2)
        .map(|axis| {
            windowed_dim(
                input_hw[axis],
                window_hw[axis],
                strides[axis],
                dilations[axis],
                pads.begin[axis],
                pads.end[axis],
            )
        })
        .collect();
    let dtype = builder.spec(data).dtype;
    let mut out = builder.emit(
        Operation::GroupConvolution(ConvSpec {
            strides: strides.to_vec(),
            dilations: dilations.to_vec(),
            pads_begin: pads.begin,
            pads_end: pads.end,
        }),
        vec![data, filter],
        TensorSpec::new(
            dtype,
            vec![data_dims[0], in_c * multiplier, out_hw[0], out_hw[1]],
        ),
    );
    if channels_last {
        out = to_nhwc(builder, out);
    }
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_conv2d_backprop_input(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let strides = spatial_pair(&node, "strides", 1)?;
    let dilations = spatial_pair(&node, "dilations", 1)?;
    let channels_last = is_channels_last(&node);

    let output_shape = builder.static_input_i64(graph, id, 0)?;
    if output_shape.len() != 4 {
        return Err(TranslateError::shape(
            &node.name,
            "input_sizes must describe a rank-4 tensor",
        ));
    }
    // Reorder the requested output shape into NCHW.
    let out_nchw: Vec<usize> = if channels_last {
        vec![
            output_shape[0] as usize,
            output_shape[3] as usize,
            output_shape[1] as usize,
            output_shape[2] as usize,
        ]
    } else {
        output_shape.iter().map(|&d| d as usize).collect()
    };

    let filter = builder.fetch_input(graph, id, 1)?;
    let mut grad = builder.fetch_input(graph, id, 2)?;
    if channels_last {
        grad = to_nchw(builder, grad);
    }
    let filter = filter_to_oihw(builder, filter);
    let filter_dims = builder.spec(filter).dims.clone();

    // Pads are the forward convolution's pads over the requested output.
    let input_hw = [out_nchw[2], out_nchw[3]];
    let window_hw = [filter_dims[2], filter_dims[3]];
    let pads = resolve_padding(&node, &input_hw, &window_hw, &strides, &dilations)?;

    let dtype = builder.spec(grad).dtype;
    let mut out = builder.emit(
        Operation::ConvolutionBackpropData(DeconvSpec {
            strides: strides.to_vec(),
            dilations: dilations.to_vec(),
            pads_begin: pads.begin,
            pads_end: pads.end,
            output_shape: vec![out_nchw[2], out_nchw[3]],
        }),
        vec![grad, filter],
        TensorSpec::new(dtype, out_nchw),
    );
    if channels_last {
        out = to_nhwc(builder, out);
    }
    builder.save(&node, vec![out]);
    Ok(())
}

fn translate_pool2d(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
    average: bool,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let window = spatial_pair(&node, "ksize", 1)?;
    let strides = spatial_pair(&node, "strides", 1)?;
    let dilations = [1usize, 1];

    let mut data = builder.fetch_input(graph, id, 0)?;
    let channels_last = is_channels_last(&node);
    if channels_last {
        data = to_nchw(builder, data);
    }
    let data_dims = builder.spec(data).dims.clone();
    if data_dims.len() != 4 {
        return Err(TranslateError::shape(&node.name, "pooling input must be rank 4"));
    }
    let input_hw = [data_dims[2], data_dims[3]];
    let pads = resolve_padding(&node, &input_hw, &window, &strides, &dilations)?;
    let out_hw: Vec<usize> = (0..2)
        .map(|axis| {
            windowed_dim(
                input_hw[axis],
                window[axis],
                strides[axis],
                1,
                pads.begin[axis],
                pads.end[axis],
            )
        })
        .collect();
    let spec = PoolSpec {
        window: window.to_vec(),
        strides: strides.to_vec(),
        pads_begin: pads.begin,
        pads_end: pads.end,
        // Host average pooling never counts padding in the divisor.
        exclude_pad: true,
    };
    let op = if average {
        Operation::AvgPool(spec)
    } else {
        Operation::MaxPool(spec)
    };
    let dtype = builder.spec(data).dtype;
    let mut out = builder.emit(
        op,
        vec![data],
        TensorSpec::new(dtype, vec![data_dims[0], data_dims[1], out_hw[0], out_hw[1]]),
    );
    if channels_last {
        out = to_nhwc(builder, out);
    }
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_avg_pool(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    translate_pool2d(builder, graph, id, true)
}

pub(super) fn translate_max_pool(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    translate_pool2d(builder, graph, id, false)
}

pub(super) fn translate_fused_batch_norm(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let epsilon = node.attr_float("epsilon").unwrap_or(1e-4);
    let channels_last = is_channels_last(&node);

    let mut data = builder.fetch_input(graph, id, 0)?;
    let scale = builder.fetch_input(graph, id, 1)?;
    let offset = builder.fetch_input(graph, id, 2)?;
    let mean = builder.fetch_input(graph, id, 3)?;
    let variance = builder.fetch_input(graph, id, 4)?;
    if channels_last {
        data = to_nchw(builder, data);
    }
    let spec = builder.spec(data).clone();
    let mut out = builder.emit(
        Operation::BatchNormInference { epsilon },
        vec![data, scale, offset, mean, variance],
        spec,
    );
    if channels_last {
        out = to_nhwc(builder, out);
    }
    // Inference mode passes the input statistics through; the host expects
    // y, batch_mean, batch_variance, then reserved slots aliasing them.
    let mut outputs = vec![out, mean, variance, mean, variance];
    if node.op_type == "FusedBatchNormV3" {
        outputs.push(mean);
    }
    builder.save(&node, outputs);
    Ok(())
}

pub(super) fn translate_bias_add(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let data = builder.fetch_input(graph, id, 0)?;
    let bias = builder.fetch_input(graph, id, 1)?;
    let bias_dims = builder.spec(bias).dims.clone();
    if bias_dims.len() != 1 {
        return Err(TranslateError::shape(&node.name, "bias must be rank 1"));
    }
    let bias = if is_channels_last(&node) {
        bias
    } else {
        // Channel axis 1: reshape the bias so broadcasting lines up.
        let rank = builder.spec(data).rank();
        let mut dims = vec![1; rank];
        if rank >= 2 {
            dims[1] = bias_dims[0];
        }
        builder.emit_reshape(bias, dims)
    };
    let out = builder.emit_binary(&node.name, BinaryOp::Add, data, bias)?;
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_lrn(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let depth_radius = node.attr_int("depth_radius").unwrap_or(5) as usize;
    let bias = node.attr_float("bias").unwrap_or(1.0) as f64;
    let alpha = node.attr_float("alpha").unwrap_or(1.0) as f64;
    let beta = node.attr_float("beta").unwrap_or(0.5) as f64;
    let size = 2 * depth_radius + 1;

    // Host LRN normalizes over channels and is channels-last only.
    let data = builder.fetch_input(graph, id, 0)?;
    let data = to_nchw(builder, data);
    let spec = builder.spec(data).clone();
    let out = builder.emit(
        Operation::Lrn(LrnSpec {
            // The accelerator sums unscaled; fold the window size in.
            alpha: alpha * size as f64,
            beta,
            bias,
            size,
        }),
        vec![data],
        spec,
    );
    let out = to_nhwc(builder, out);
    builder.save(&node, vec![out]);
    Ok(())
}

fn block_op(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
    to_depth: bool,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let block = node
        .attr_int("block_size")
        .filter(|b| *b >= 1)
        .ok_or_else(|| TranslateError::unsupported(&node.name, "missing block_size"))?
        as usize;
    let mut data = builder.fetch_input(graph, id, 0)?;
    let channels_last = is_channels_last(&node);
    if channels_last {
        data = to_nchw(builder, data);
    }
    let dims = builder.spec(data).dims.clone();
    if dims.len() != 4 {
        return Err(TranslateError::shape(&node.name, "input must be rank 4"));
    }
    let (op, out_dims) = if to_depth {
        if dims[2] % block != 0 || dims[3] % block != 0 {
            return Err(TranslateError::shape(
                &node.name,
                "spatial dims must divide block_size",
            ));
        }
        (
            Operation::SpaceToDepth { block },
            vec![dims[0], dims[1] * block * block, dims[2] / block, dims[3] / block],
        )
    } else {
        if dims[1] % (block * block) != 0 {
            return Err(TranslateError::shape(
                &node.name,
                "channels must divide block_size squared",
            ));
        }
        (
            Operation::DepthToSpace { block },
            vec![dims[0], dims[1] / (block * block), dims[2] * block, dims[3] * block],
        )
    };
    let dtype = builder.spec(data).dtype;
    let mut out = builder.emit(op, vec![data], TensorSpec::new(dtype, out_dims));
    if channels_last {
        out = to_nhwc(builder, out);
    }
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_space_to_depth(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    block_op(builder, graph, id, true)
}

pub(super) fn translate_depth_to_space(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    block_op(builder, graph, id, false)
}

fn space_block_spec(
    builder: &Builder,
    graph: &Graph,
    id: NodeId,
    node_name: &str,
) -> TranslateResult<SpaceBlockSpec> {
    let block_shape: Vec<usize> = builder
        .static_input_i64(graph, id, 1)?
        .into_iter()
        .map(|b| b as usize)
        .collect();
    let pads = builder.static_input_i64(graph, id, 2)?;
    if pads.len() != block_shape.len() * 2 {
        return Err(TranslateError::shape(
            node_name,
            "paddings must pair up with block_shape",
        ));
    }
    let pads_begin = pads.iter().step_by(2).map(|&p| p as usize).collect();
    let pads_end = pads.iter().skip(1).step_by(2).map(|&p| p as usize).collect();
    Ok(SpaceBlockSpec {
        block_shape,
        pads_begin,
        pads_end,
    })
}

pub(super) fn translate_space_to_batch(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let data = builder.fetch_input(graph, id, 0)?;
    let spec = space_block_spec(builder, graph, id, &node.name)?;
    let dims = builder.spec(data).dims.clone();
    let block_product: usize = spec.block_shape.iter().product();

    let mut out_dims = vec![dims[0] * block_product];
    for (axis, &block) in spec.block_shape.iter().enumerate() {
        let padded = dims[axis + 1] + spec.pads_begin[axis] + spec.pads_end[axis];
        if padded % block != 0 {
            return Err(TranslateError::shape(
                &node.name,
                "padded spatial dim must divide its block",
            ));
        }
        out_dims.push(padded / block);
    }
    out_dims.extend_from_slice(&dims[1 + spec.block_shape.len()..]);

    let dtype = builder.spec(data).dtype;
    let out = builder.emit(
        Operation::SpaceToBatch(spec),
        vec![data],
        TensorSpec::new(dtype, out_dims),
    );
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_batch_to_space(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let data = builder.fetch_input(graph, id, 0)?;
    let spec = space_block_spec(builder, graph, id, &node.name)?;
    let dims = builder.spec(data).dims.clone();
    let block_product: usize = spec.block_shape.iter().product();
    if block_product == 0 || dims[0] % block_product != 0 {
        return Err(TranslateError::shape(
            &node.name,
            "batch must divide the block product",
        ));
    }

    let mut out_dims = vec![dims[0] / block_product];
    for (axis, &block) in spec.block_shape.iter().enumerate() {
        let expanded = dims[axis + 1] * block;
        let cropped = expanded
            .checked_sub(spec.pads_begin[axis] + spec.pads_end[axis])
            .ok_or_else(|| TranslateError::shape(&node.name, "crops exceed the expanded dim"))?;
        out_dims.push(cropped);
    }
    out_dims.extend_from_slice(&dims[1 + spec.block_shape.len()..]);

    let dtype = builder.spec(data).dtype;
    let out = builder.emit(
        Operation::BatchToSpace(spec),
        vec![data],
        TensorSpec::new(dtype, out_dims),
    );
    builder.save(&node, vec![out]);
    Ok(())
}

pub(super) fn translate_top_k(
    builder: &mut Builder,
    graph: &Graph,
    id: NodeId,
) -> TranslateResult<()> {
    let node = graph.node(id)?.clone();
    let data = builder.fetch_input(graph, id, 0)?;
    let k = builder
        .static_input_i64(graph, id, 1)?
        .first()
        .copied()
        .ok_or_else(|| TranslateError::unsupported(&node.name, "empty k input"))?;
    if k < 0 {
        return Err(TranslateError::shape(&node.name, "k must be non-negative"));
    }
    let dims = builder.spec(data).dims.clone();
    if dims.is_empty() {
        return Err(TranslateError::shape(&node.name, "TopK of a scalar"));
    }
    let axis = dims.len() - 1;
    if k as usize > dims[axis] {
        return Err(TranslateError::shape(
            &node.name,
            format!("k {k} exceeds axis extent {}", dims[axis]),
        ));
    }
    let spec = TopKSpec {
        k: k as usize,
        axis,
        largest: true,
        sorted: node.attr_bool("sorted").unwrap_or(true),
        index_dtype: DType::I32,
    };
    let mut out_dims = dims;
    out_dims[axis] = spec.k;
    let dtype = builder.spec(data).dtype;
    let values = builder.emit(
        Operation::TopKValues(spec.clone()),
        vec![data],
        TensorSpec::new(dtype, out_dims.clone()),
    );
    let indices = builder.emit(
        Operation::TopKIndices(spec),
        vec![data],
        TensorSpec::new(DType::I32, out_dims),
    );
    builder.save(&node, vec![values, indices]);
    Ok(())
}
