//! Reference evaluator for host subgraphs.
//!
//! This is the native fallback path: when a cluster cannot be translated,
//! its registered subgraph is executed here instead of on the accelerator.
//! Coverage is the elementwise/math subset the host runtime executes
//! eagerly; structured ops stay on the accelerator path.

use std::collections::HashMap;

use super::{Graph, GraphError, NodeId, TensorData};

fn eval_err(node: &str, message: impl Into<String>) -> GraphError {
    GraphError::Eval {
        node: node.to_string(),
        message: message.into(),
    }
}

/// Numpy-style broadcast of two shapes.
fn broadcast_dims(node: &str, a: &[usize], b: &[usize]) -> Result<Vec<usize>, GraphError> {
    let rank = a.len().max(b.len());
    let mut out = vec![0usize; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        out[i] = if da == db || db == 1 {
            da
        } else if da == 1 {
            db
        } else {
            return Err(eval_err(node, format!("shapes {a:?} and {b:?} do not broadcast")));
        };
    }
    Ok(out)
}

fn broadcast_index(out_index: &[usize], dims: &[usize]) -> usize {
    let offset = out_index.len() - dims.len();
    let mut flat = 0usize;
    for (axis, &dim) in dims.iter().enumerate() {
        let coord = if dim == 1 { 0 } else { out_index[offset + axis] };
        flat = flat * dim + coord;
    }
    flat
}

fn binary_elementwise(
    node: &str,
    lhs: &TensorData,
    rhs: &TensorData,
    op: impl Fn(f32, f32) -> f32,
) -> Result<TensorData, GraphError> {
    let a = lhs
        .to_f32_vec()
        .ok_or_else(|| eval_err(node, "lhs dtype not convertible to f32"))?;
    let b = rhs
        .to_f32_vec()
        .ok_or_else(|| eval_err(node, "rhs dtype not convertible to f32"))?;
    let dims = broadcast_dims(node, &lhs.dims, &rhs.dims)?;
    let count: usize = dims.iter().product::<usize>().max(1);

    let mut out = Vec::with_capacity(count);
    let mut index = vec![0usize; dims.len()];
    for _ in 0..count {
        let x = a[broadcast_index(&index, &lhs.dims)];
        let y = b[broadcast_index(&index, &rhs.dims)];
        out.push(op(x, y));
        for axis in (0..dims.len()).rev() {
            index[axis] += 1;
            if index[axis] < dims[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    Ok(TensorData::from_f32(dims, &out))
}

fn unary_elementwise(
    node: &str,
    input: &TensorData,
    op: impl Fn(f32) -> f32,
) -> Result<TensorData, GraphError> {
    let values = input
        .to_f32_vec()
        .ok_or_else(|| eval_err(node, "dtype not convertible to f32"))?;
    let out: Vec<f32> = values.into_iter().map(op).collect();
    Ok(TensorData::from_f32(input.dims.clone(), &out))
}

/// Evaluates a subgraph with `Placeholder`/`Retval` boundary nodes on the
/// given feeds (ordered by the placeholders' `index` attributes). Returns
/// results ordered by the retvals' `index` attributes.
pub fn eval_graph(graph: &Graph, feeds: &[TensorData]) -> Result<Vec<TensorData>, GraphError> {
    let order = graph.topo_order()?;
    let mut values: HashMap<(NodeId, i32), TensorData> = HashMap::new();
    let mut results: Vec<(i64, TensorData)> = Vec::new();

    for id in order {
        let node = graph.node(id)?;
        let input = |slot: usize| -> Result<TensorData, GraphError> {
            let edge = graph.input_edge(id, slot)?;
            values
                .get(&(edge.src, edge.src_output))
                .cloned()
                .ok_or_else(|| eval_err(&node.name, format!("input {slot} not evaluated")))
        };

        let out = match node.op_type.as_str() {
            "Placeholder" => {
                let index = node.attr_int("index").ok_or_else(|| GraphError::MissingAttr {
                    node: node.name.clone(),
                    attr: "index".into(),
                })? as usize;
                feeds
                    .get(index)
                    .cloned()
                    .ok_or_else(|| eval_err(&node.name, format!("no feed for input {index}")))?
            }
            "Retval" => {
                let index = node.attr_int("index").ok_or_else(|| GraphError::MissingAttr {
                    node: node.name.clone(),
                    attr: "index".into(),
                })?;
                results.push((index, input(0)?));
                continue;
            }
            "Const" => node
                .attr_tensor("value")
                .cloned()
                .ok_or_else(|| GraphError::MissingAttr {
                    node: node.name.clone(),
                    attr: "value".into(),
                })?,
            "Identity" | "Snapshot" | "PreventGradient" | "NoOp" => input(0)?,
            "Add" | "AddV2" => binary_elementwise(&node.name, &input(0)?, &input(1)?, |a, b| a + b)?,
            "Sub" => binary_elementwise(&node.name, &input(0)?, &input(1)?, |a, b| a - b)?,
            "Mul" => binary_elementwise(&node.name, &input(0)?, &input(1)?, |a, b| a * b)?,
            "RealDiv" => binary_elementwise(&node.name, &input(0)?, &input(1)?, |a, b| a / b)?,
            "Maximum" => binary_elementwise(&node.name, &input(0)?, &input(1)?, f32::max)?,
            "Minimum" => binary_elementwise(&node.name, &input(0)?, &input(1)?, f32::min)?,
            "Pow" => binary_elementwise(&node.name, &input(0)?, &input(1)?, f32::powf)?,
            "SquaredDifference" => {
                binary_elementwise(&node.name, &input(0)?, &input(1)?, |a, b| (a - b) * (a - b))?
            }
            "AddN" => {
                let mut acc = input(0)?;
                for slot in 1..graph.num_inputs(id) {
                    acc = binary_elementwise(&node.name, &acc, &input(slot)?, |a, b| a + b)?;
                }
                acc
            }
            "Neg" => unary_elementwise(&node.name, &input(0)?, |v| -v)?,
            "Abs" => unary_elementwise(&node.name, &input(0)?, f32::abs)?,
            "Relu" => unary_elementwise(&node.name, &input(0)?, |v| v.max(0.0))?,
            "Relu6" => unary_elementwise(&node.name, &input(0)?, |v| v.clamp(0.0, 6.0))?,
            "Sqrt" => unary_elementwise(&node.name, &input(0)?, f32::sqrt)?,
            "Rsqrt" => unary_elementwise(&node.name, &input(0)?, |v| 1.0 / v.sqrt())?,
            "Exp" => unary_elementwise(&node.name, &input(0)?, f32::exp)?,
            "Log" => unary_elementwise(&node.name, &input(0)?, f32::ln)?,
            "Log1p" => unary_elementwise(&node.name, &input(0)?, f32::ln_1p)?,
            "Square" => unary_elementwise(&node.name, &input(0)?, |v| v * v)?,
            "Reciprocal" => unary_elementwise(&node.name, &input(0)?, |v| 1.0 / v)?,
            "Sigmoid" => unary_elementwise(&node.name, &input(0)?, |v| 1.0 / (1.0 + (-v).exp()))?,
            "Tanh" => unary_elementwise(&node.name, &input(0)?, f32::tanh)?,
            "Floor" => unary_elementwise(&node.name, &input(0)?, f32::floor)?,
            "Ceil" => unary_elementwise(&node.name, &input(0)?, f32::ceil)?,
            "ZerosLike" => {
                let x = input(0)?;
                TensorData::from_f32(x.dims.clone(), &vec![0.0; x.element_count()])
            }
            "Reshape" => {
                let x = input(0)?;
                let shape = input(1)?
                    .to_i64_vec()
                    .ok_or_else(|| eval_err(&node.name, "reshape shape must be integral"))?;
                let dims = resolve_reshape_dims(&node.name, &shape, x.element_count())?;
                TensorData::new(x.dtype, dims, x.bytes)
            }
            other => {
                return Err(eval_err(
                    &node.name,
                    format!("op type {other} not supported by the reference evaluator"),
                ))
            }
        };
        values.insert((id, 0), out);
    }

    results.sort_by_key(|(index, _)| *index);
    Ok(results.into_iter().map(|(_, t)| t).collect())
}

fn resolve_reshape_dims(
    node: &str,
    shape: &[i64],
    element_count: usize,
) -> Result<Vec<usize>, GraphError> {
    let mut dims = Vec::with_capacity(shape.len());
    let mut infer_axis = None;
    let mut known: usize = 1;
    for (axis, &dim) in shape.iter().enumerate() {
        if dim == -1 {
            if infer_axis.is_some() {
                return Err(eval_err(node, "more than one -1 in reshape shape"));
            }
            infer_axis = Some(axis);
            dims.push(0);
        } else {
            dims.push(dim as usize);
            known *= dim as usize;
        }
    }
    if let Some(axis) = infer_axis {
        if known == 0 || element_count % known != 0 {
            return Err(eval_err(node, "reshape shape does not divide element count"));
        }
        dims[axis] = element_count / known;
    } else if known != element_count {
        return Err(eval_err(node, "reshape element count mismatch"));
    }
    Ok(dims)
}
