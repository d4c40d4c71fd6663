//! Layout legalization for spatial ops.
//!
//! The accelerator contract is channel-first (NCHW) with OIHW filters.
//! Host spatial ops default to channel-last, so translation brackets them
//! with transposes and converts filters from HWIO. Padding schemes are
//! resolved here into explicit per-axis begin/end pads.

use crate::graph::Node;
use crate::ir::ValueId;
use crate::translate::{Builder, TranslateError, TranslateResult};

pub const NHWC_TO_NCHW: [usize; 4] = [0, 3, 1, 2];
pub const NCHW_TO_NHWC: [usize; 4] = [0, 2, 3, 1];
pub const HWIO_TO_OIHW: [usize; 4] = [3, 2, 0, 1];

pub fn is_channels_last(node: &Node) -> bool {
    node.attr_str("data_format") != Some("NCHW")
}

pub fn to_nchw(builder: &mut Builder, value: ValueId) -> ValueId {
    builder.emit_transpose(value, NHWC_TO_NCHW.to_vec())
}

pub fn to_nhwc(builder: &mut Builder, value: ValueId) -> ValueId {
    builder.emit_transpose(value, NCHW_TO_NHWC.to_vec())
}

pub fn filter_to_oihw(builder: &mut Builder, value: ValueId) -> ValueId {
    builder.emit_transpose(value, HWIO_TO_OIHW.to_vec())
}

/// Resolved spatial padding, one entry per spatial axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Padding {
    pub begin: Vec<usize>,
    pub end: Vec<usize>,
}

/// Resolves a padding scheme into explicit pads.
///
/// SAME picks the smallest pads such that `out = ceil(in / stride)`;
/// excess is biased to the end, matching the host convention. EXPLICIT
/// reads per-axis pads from the node's `explicit_paddings` attribute
/// (stored NHWC-ordered as `[n0,n1,h0,h1,w0,w1,c0,c1]` or NCHW
/// equivalent; only the spatial entries are used).
pub fn resolve_padding(
    node: &Node,
    input_hw: &[usize],
    window_hw: &[usize],
    strides_hw: &[usize],
    dilations_hw: &[usize],
) -> TranslateResult<Padding> {
    let scheme = node.attr_str("padding").unwrap_or("VALID");
    match scheme {
        "VALID" => Ok(Padding {
            begin: vec![0; input_hw.len()],
            end: vec![0; input_hw.len()],
        }),
        "SAME" => {
            let mut begin = Vec::with_capacity(input_hw.len());
            let mut end = Vec::with_capacity(input_hw.len());
            for axis in 0..input_hw.len() {
                let stride = strides_hw[axis];
                let effective = (window_hw[axis] - 1) * dilations_hw[axis] + 1;
                let out = input_hw[axis].div_ceil(stride);
                let total =
                    ((out - 1) * stride + effective).saturating_sub(input_hw[axis]);
                begin.push(total / 2);
                end.push(total - total / 2);
            }
            Ok(Padding { begin, end })
        }
        "EXPLICIT" => {
            let pads = node.attr_int_list("explicit_paddings").ok_or_else(|| {
                TranslateError::unsupported(&node.name, "EXPLICIT padding without pads")
            })?;
            if pads.len() != 8 {
                return Err(TranslateError::unsupported(
                    &node.name,
                    "explicit_paddings must have 8 entries",
                ));
            }
            // Spatial entries sit at H/W positions of the data format.
            let (h, w) = if is_channels_last(node) { (2, 4) } else { (4, 6) };
            Ok(Padding {
                begin: vec![pads[h] as usize, pads[w] as usize],
                end: vec![pads[h + 1] as usize, pads[w + 1] as usize],
            })
        }
        other => Err(TranslateError::unsupported(
            &node.name,
            format!("unsupported padding \"{other}\""),
        )),
    }
}

/// Output extent of a strided window over a padded axis.
pub fn windowed_dim(
    input: usize,
    window: usize,
    stride: usize,
    dilation: usize,
    pad_begin: usize,
    pad_end: usize,
) -> usize {
    let effective = (window - 1) * dilation + 1;
    (input + pad_begin + pad_end).saturating_sub(effective) / stride + 1
}

/// Splits a length-4 attribute list into its spatial H/W entries for the
/// node's data format.
pub fn spatial_pair(node: &Node, attr: &str, default: i64) -> TranslateResult<[usize; 2]> {
    let values = match node.attr_int_list(attr) {
        Some(values) => values.to_vec(),
        None => vec![default; 4],
    };
    if values.len() != 4 {
        return Err(TranslateError::unsupported(
            &node.name,
            format!("{attr} must have 4 entries"),
        ));
    }
    let (h, w) = if is_channels_last(node) { (1, 2) } else { (2, 3) };
    Ok([values[h] as usize, values[w] as usize])
}
