//! Lazy lowering of encapsulated clusters into bridge IR.
//!
//! Translation walks the extracted body in deterministic topological
//! order, binds `Placeholder`s as IR parameters, dispatches interior nodes
//! to the translator registry, and collects `Retval`s in index order. The
//! op-map records, per host node name, the IR values standing in for its
//! outputs; host multi-output ops push several values. A missing
//! translator or op-map entry is a hard error, which the dispatcher turns
//! into a native fallback for the whole cluster.

mod layout;
mod ops_math;
mod ops_nn;
mod ops_shape;
mod registry;

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, trace};

use crate::encapsulate::ClusterSubgraph;
use crate::graph::{Graph, GraphError, Node, NodeId, TensorData};
use crate::ir::{
    BinaryOp, CompareOp, DType, FunctionIr, Instruction, IrError, Operation, Parameter,
    TensorLiteral, TensorSpec, UnaryOp, ValueId,
};
use crate::passes;

pub use registry::{has_translator, registered_op_types};

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("no translator registered for \"{node}\" ({op_type})")]
    NoTranslator { node: String, op_type: String },

    #[error("no value recorded for input {input} of \"{node}\"")]
    MissingValue { node: String, input: usize },

    #[error("input {input} of \"{node}\" is not statically known")]
    NotStatic { node: String, input: usize },

    #[error("cannot translate \"{node}\": {message}")]
    Unsupported { node: String, message: String },

    #[error("shape mismatch at \"{node}\": {message}")]
    Shape { node: String, message: String },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Ir(#[from] IrError),
}

impl TranslateError {
    pub fn unsupported(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unsupported {
            node: node.into(),
            message: message.into(),
        }
    }

    pub fn shape(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Shape {
            node: node.into(),
            message: message.into(),
        }
    }
}

pub type TranslateResult<T> = Result<T, TranslateError>;

/// Per-node lowering routine.
pub type TranslatorFn = fn(&mut Builder, &Graph, NodeId) -> TranslateResult<()>;

/// A lowered cluster plus the bookkeeping the dispatcher needs to marshal
/// host tensors across the pruned signature.
#[derive(Debug, Clone)]
pub struct TranslatedFunction {
    pub func: FunctionIr,
    /// Specs of every host output, dropped ones included.
    pub output_specs: Vec<TensorSpec>,
    /// Host output indices that survived into `func.results`.
    pub kept_outputs: Vec<usize>,
    /// Host input indices baked away (zero-dim), absent from parameters.
    pub dropped_inputs: Vec<usize>,
    /// Host input index feeding each parameter, in parameter order.
    pub param_inputs: Vec<usize>,
}

/// IR emission state threaded through the translators.
pub struct Builder {
    func: FunctionIr,
    next_value: u32,
    op_map: HashMap<String, Vec<ValueId>>,
    specs: HashMap<ValueId, TensorSpec>,
}

impl Builder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            func: FunctionIr::new(name),
            next_value: 0,
            op_map: HashMap::new(),
            specs: HashMap::new(),
        }
    }

    fn fresh(&mut self) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        id
    }

    fn add_parameter(&mut self, spec: TensorSpec, name: impl Into<String>) -> ValueId {
        let id = self.fresh();
        self.specs.insert(id, spec.clone());
        self.func.parameters.push(Parameter {
            id,
            spec,
            name: name.into(),
        });
        id
    }

    /// Appends an instruction and returns its value.
    pub fn emit(
        &mut self,
        op: Operation,
        operands: Vec<ValueId>,
        output: TensorSpec,
    ) -> ValueId {
        let id = self.fresh();
        self.specs.insert(id, output.clone());
        trace!(value = %id, op = op.mnemonic(), "emit");
        self.func.body.push(Instruction {
            id,
            op,
            operands,
            output,
        });
        id
    }

    pub fn constant(&mut self, literal: TensorLiteral) -> ValueId {
        let spec = literal.spec.clone();
        self.emit(Operation::Constant(literal), Vec::new(), spec)
    }

    pub fn scalar_f32(&mut self, value: f32) -> ValueId {
        self.constant(TensorLiteral::from_f32(Vec::new(), &[value]))
    }

    pub fn spec(&self, value: ValueId) -> &TensorSpec {
        &self.specs[&value]
    }

    /// Records the IR values standing in for `node`'s outputs.
    pub fn save(&mut self, node: &Node, values: Vec<ValueId>) {
        self.op_map.insert(node.name.clone(), values);
    }

    /// Resolves the IR value feeding `slot` of `id` through the op-map.
    pub fn fetch_input(
        &self,
        graph: &Graph,
        id: NodeId,
        slot: usize,
    ) -> TranslateResult<ValueId> {
        let edge = graph.input_edge(id, slot)?;
        let producer = graph.node(edge.src)?;
        self.op_map
            .get(&producer.name)
            .and_then(|values| values.get(edge.src_output as usize))
            .copied()
            .ok_or_else(|| TranslateError::MissingValue {
                node: graph
                    .node(id)
                    .map(|n| n.name.clone())
                    .unwrap_or_else(|_| id.to_string()),
                input: slot,
            })
    }

    /// Reads a static input as a host tensor by walking to its `Const`
    /// producer through pass-through nodes.
    pub fn static_input_tensor(
        &self,
        graph: &Graph,
        id: NodeId,
        slot: usize,
    ) -> TranslateResult<TensorData> {
        let mut current = graph.input_node(id, slot)?;
        loop {
            let node = graph.node(current)?;
            match node.op_type.as_str() {
                "Const" => {
                    return node.attr_tensor("value").cloned().ok_or_else(|| {
                        TranslateError::unsupported(&node.name, "constant without a value")
                    });
                }
                "Identity" | "Snapshot" | "PreventGradient" => {
                    current = graph.input_node(current, 0)?;
                }
                _ => {
                    return Err(TranslateError::NotStatic {
                        node: graph.node(id)?.name.clone(),
                        input: slot,
                    })
                }
            }
        }
    }

    pub fn static_input_i64(
        &self,
        graph: &Graph,
        id: NodeId,
        slot: usize,
    ) -> TranslateResult<Vec<i64>> {
        let tensor = self.static_input_tensor(graph, id, slot)?;
        tensor.to_i64_vec().ok_or_else(|| TranslateError::NotStatic {
            node: graph.node(id).map(|n| n.name.clone()).unwrap_or_default(),
            input: slot,
        })
    }

    pub fn static_input_f32(
        &self,
        graph: &Graph,
        id: NodeId,
        slot: usize,
    ) -> TranslateResult<Vec<f32>> {
        let tensor = self.static_input_tensor(graph, id, slot)?;
        tensor.to_f32_vec().ok_or_else(|| TranslateError::NotStatic {
            node: graph.node(id).map(|n| n.name.clone()).unwrap_or_default(),
            input: slot,
        })
    }

    /// Elementwise unary over `input`, keeping its spec (`Not` keeps Bool).
    pub fn emit_unary(&mut self, kind: UnaryOp, input: ValueId) -> ValueId {
        let spec = self.spec(input).clone();
        self.emit(Operation::Unary(kind), vec![input], spec)
    }

    /// Elementwise binary with numpy broadcasting.
    pub fn emit_binary(
        &mut self,
        node: &str,
        kind: BinaryOp,
        lhs: ValueId,
        rhs: ValueId,
    ) -> TranslateResult<ValueId> {
        let dims = broadcast_dims(node, &self.spec(lhs).dims, &self.spec(rhs).dims)?;
        let dtype = self.spec(lhs).dtype;
        Ok(self.emit(
            Operation::Binary(kind),
            vec![lhs, rhs],
            TensorSpec::new(dtype, dims),
        ))
    }

    /// Elementwise comparison; output is Bool over the broadcast shape.
    pub fn emit_compare(
        &mut self,
        node: &str,
        kind: CompareOp,
        lhs: ValueId,
        rhs: ValueId,
    ) -> TranslateResult<ValueId> {
        let dims = broadcast_dims(node, &self.spec(lhs).dims, &self.spec(rhs).dims)?;
        Ok(self.emit(
            Operation::Compare(kind),
            vec![lhs, rhs],
            TensorSpec::new(DType::Bool, dims),
        ))
    }

    /// Transpose with the output spec derived from the permutation.
    pub fn emit_transpose(&mut self, input: ValueId, perm: Vec<usize>) -> ValueId {
        let in_dims = &self.spec(input).dims;
        let dims: Vec<usize> = perm.iter().map(|&axis| in_dims[axis]).collect();
        let dtype = self.spec(input).dtype;
        self.emit(
            Operation::Transpose { perm },
            vec![input],
            TensorSpec::new(dtype, dims),
        )
    }

    pub fn emit_reshape(&mut self, input: ValueId, dims: Vec<usize>) -> ValueId {
        let dtype = self.spec(input).dtype;
        self.emit(
            Operation::Reshape { dims: dims.clone() },
            vec![input],
            TensorSpec::new(dtype, dims),
        )
    }
}

/// Numpy-style broadcast of two shapes.
pub fn broadcast_dims(node: &str, a: &[usize], b: &[usize]) -> TranslateResult<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut out = vec![0usize; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() {
            1
        } else {
            a[i - (rank - a.len())]
        };
        let db = if i < rank - b.len() {
            1
        } else {
            b[i - (rank - b.len())]
        };
        out[i] = if da == db || db == 1 {
            da
        } else if da == 1 {
            db
        } else {
            return Err(TranslateError::shape(
                node,
                format!("shapes {a:?} and {b:?} do not broadcast"),
            ));
        };
    }
    Ok(out)
}

/// Normalizes a possibly negative axis against `rank`.
pub fn normalize_axis(node: &str, axis: i64, rank: usize) -> TranslateResult<usize> {
    let adjusted = if axis < 0 { axis + rank as i64 } else { axis };
    if adjusted < 0 || adjusted as usize >= rank.max(1) {
        return Err(TranslateError::shape(
            node,
            format!("axis {axis} out of range for rank {rank}"),
        ));
    }
    Ok(adjusted as usize)
}

/// Converts a host tensor payload into an IR literal.
pub fn literal_from_tensor(tensor: &TensorData) -> TensorLiteral {
    TensorLiteral::new(
        TensorSpec::new(DType::from_host(tensor.dtype), tensor.dims.clone()),
        std::sync::Arc::from(tensor.bytes.clone()),
    )
}

/// Lowers one registered cluster body given the runtime input specs
/// (indexed by the body's `Placeholder` indices).
pub fn translate_cluster(
    cluster: &ClusterSubgraph,
    input_specs: &[TensorSpec],
) -> TranslateResult<TranslatedFunction> {
    let graph = &cluster.graph;
    let order = graph.topo_order()?;
    let mut builder = Builder::new(format!("{}", cluster.id));
    let mut dropped_inputs = Vec::new();
    let mut param_inputs = Vec::new();
    let mut results: Vec<Option<(ValueId, TensorSpec)>> = vec![None; cluster.num_outputs];

    for id in order {
        let node = graph.node(id)?.clone();
        match node.op_type.as_str() {
            "Placeholder" => {
                let index = node.attr_int("index").ok_or_else(|| {
                    TranslateError::unsupported(&node.name, "placeholder without an index")
                })? as usize;
                let spec = input_specs.get(index).cloned().ok_or_else(|| {
                    TranslateError::unsupported(
                        &node.name,
                        format!("no input spec for parameter {index}"),
                    )
                })?;
                // Structurally empty inputs carry no data; bake a zero
                // literal and drop the parameter from the signature.
                let value = if spec.has_zero_dim() {
                    dropped_inputs.push(index);
                    builder.constant(TensorLiteral::zeroed(spec))
                } else {
                    param_inputs.push(index);
                    builder.add_parameter(spec, &node.name)
                };
                builder.save(&node, vec![value]);
            }
            "Retval" => {
                let index = node.attr_int("index").ok_or_else(|| {
                    TranslateError::unsupported(&node.name, "retval without an index")
                })? as usize;
                let value = builder.fetch_input(graph, id, 0)?;
                let spec = builder.spec(value).clone();
                let slot = results.get_mut(index).ok_or_else(|| {
                    TranslateError::unsupported(
                        &node.name,
                        format!("retval index {index} out of range"),
                    )
                })?;
                *slot = Some((value, spec));
            }
            op_type => {
                let Some(translator) = registry::translator(op_type) else {
                    return Err(TranslateError::NoTranslator {
                        node: node.name.clone(),
                        op_type: op_type.to_string(),
                    });
                };
                translator(&mut builder, graph, id)?;
            }
        }
    }

    let mut output_specs = Vec::with_capacity(results.len());
    let mut kept_outputs = Vec::new();
    for (index, entry) in results.iter().enumerate() {
        let (value, spec) = entry.as_ref().ok_or_else(|| {
            TranslateError::shape(
                format!("{}", cluster.id),
                format!("output {index} was never produced"),
            )
        })?;
        output_specs.push(spec.clone());
        // Zero-dim results are reconstructed host-side from their spec.
        if !spec.has_zero_dim() {
            kept_outputs.push(index);
            builder.func.results.push(*value);
        }
    }

    let mut func = builder.func;
    passes::fold_constants(&mut func);
    passes::cancel_transposes(&mut func);
    passes::strip_dead_instructions(&mut func);
    func.validate_topology()?;

    debug!(
        cluster = %cluster.id,
        parameters = func.parameters.len(),
        instructions = func.body.len(),
        results = func.results.len(),
        "cluster translated"
    );

    Ok(TranslatedFunction {
        func,
        output_specs,
        kept_outputs,
        dropped_inputs,
        param_inputs,
    })
}
