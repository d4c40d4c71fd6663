//! Bridge IR consumed by accelerator engines.
//!
//! A shape-resolved, single-output SSA program: every instruction carries
//! its full output `TensorSpec`, so structural properties (padding
//! arithmetic, layout round-trips, arity) are checkable without running
//! anything. Dynamic dimensions never reach this IR; they are rejected
//! during marking.

use std::fmt;
use std::sync::Arc;

use itertools::Itertools;
use serde::{ser::SerializeStruct, Deserialize, Serialize};
use thiserror::Error;

use crate::graph::DataType;

/// Scalar element types supported by the accelerator contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    F16,
    F32,
    F64,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    Bool,
}

impl DType {
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::I8 | DType::U8 | DType::Bool => 1,
            DType::F16 | DType::I16 | DType::U16 => 2,
            DType::F32 | DType::I32 | DType::U32 => 4,
            DType::F64 | DType::I64 | DType::U64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F16 | DType::F32 | DType::F64)
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DType::I8
                | DType::I16
                | DType::I32
                | DType::I64
                | DType::U8
                | DType::U16
                | DType::U32
                | DType::U64
        )
    }

    /// Maps an accelerator element type back onto the host scalar type.
    pub fn to_host(self) -> DataType {
        match self {
            DType::F16 => DataType::F16,
            DType::F32 => DataType::F32,
            DType::F64 => DataType::F64,
            DType::I8 => DataType::I8,
            DType::I16 => DataType::I16,
            DType::I32 => DataType::I32,
            DType::I64 => DataType::I64,
            DType::U8 => DataType::U8,
            DType::U16 => DataType::U16,
            DType::U32 => DataType::U32,
            DType::U64 => DataType::U64,
            DType::Bool => DataType::Bool,
        }
    }

    /// Maps a host scalar type onto the accelerator element type.
    pub fn from_host(dtype: DataType) -> Self {
        match dtype {
            DataType::F16 => DType::F16,
            DataType::F32 => DType::F32,
            DataType::F64 => DType::F64,
            DataType::I8 => DType::I8,
            DataType::I16 => DType::I16,
            DataType::I32 => DType::I32,
            DataType::I64 => DType::I64,
            DataType::U8 => DType::U8,
            DataType::U16 => DType::U16,
            DataType::U32 => DType::U32,
            DataType::U64 => DType::U64,
            DataType::Bool => DType::Bool,
        }
    }
}

/// Tensor metadata: element type plus a fully static shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: DType,
    pub dims: Vec<usize>,
}

impl TensorSpec {
    pub fn new(dtype: DType, dims: Vec<usize>) -> Self {
        Self { dtype, dims }
    }

    pub fn scalar(dtype: DType) -> Self {
        Self::new(dtype, Vec::new())
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn element_count(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn byte_len(&self) -> usize {
        self.element_count() * self.dtype.size_in_bytes()
    }

    /// A zero extent anywhere makes the tensor structurally empty; such
    /// values are dropped from compiled signatures.
    pub fn has_zero_dim(&self) -> bool {
        self.dims.iter().any(|d| *d == 0)
    }
}

impl fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tensor<{:?}", self.dtype)?;
        for d in &self.dims {
            write!(f, " x{d}")?;
        }
        write!(f, ">")
    }
}

/// Dense literal payload.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorLiteral {
    pub spec: TensorSpec,
    pub bytes: Arc<[u8]>,
}

impl TensorLiteral {
    pub fn new(spec: TensorSpec, bytes: Arc<[u8]>) -> Self {
        Self { spec, bytes }
    }

    pub fn from_f32(dims: Vec<usize>, values: &[f32]) -> Self {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(TensorSpec::new(DType::F32, dims), Arc::from(bytes))
    }

    pub fn from_i64(dims: Vec<usize>, values: &[i64]) -> Self {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(TensorSpec::new(DType::I64, dims), Arc::from(bytes))
    }

    pub fn from_i32(dims: Vec<usize>, values: &[i32]) -> Self {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(TensorSpec::new(DType::I32, dims), Arc::from(bytes))
    }

    pub fn zeroed(spec: TensorSpec) -> Self {
        let bytes = vec![0u8; spec.byte_len()];
        Self::new(spec, Arc::from(bytes))
    }

    pub fn to_f32_vec(&self) -> Option<Vec<f32>> {
        match self.spec.dtype {
            DType::F32 => Some(
                self.bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            DType::F64 => Some(
                self.bytes
                    .chunks_exact(8)
                    .map(|c| {
                        f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32
                    })
                    .collect(),
            ),
            _ => self
                .to_i64_vec()
                .map(|v| v.into_iter().map(|x| x as f32).collect()),
        }
    }

    pub fn to_i64_vec(&self) -> Option<Vec<i64>> {
        match self.spec.dtype {
            DType::I32 => Some(
                self.bytes
                    .chunks_exact(4)
                    .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as i64)
                    .collect(),
            ),
            DType::I64 => Some(
                self.bytes
                    .chunks_exact(8)
                    .map(|c| {
                        i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]])
                    })
                    .collect(),
            ),
            DType::I8 => Some(self.bytes.iter().map(|b| *b as i8 as i64).collect()),
            DType::U8 | DType::Bool => Some(self.bytes.iter().map(|b| *b as i64).collect()),
            _ => None,
        }
    }
}

impl Serialize for TensorLiteral {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("TensorLiteral", 2)?;
        state.serialize_field("spec", &self.spec)?;
        state.serialize_field("bytes", &self.bytes.as_ref())?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for TensorLiteral {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct TensorLiteralHelper {
            spec: TensorSpec,
            bytes: Vec<u8>,
        }

        let helper = TensorLiteralHelper::deserialize(deserializer)?;
        Ok(TensorLiteral {
            spec: helper.spec,
            bytes: Arc::<[u8]>::from(helper.bytes),
        })
    }
}

/// Unique identifier for SSA values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Abs,
    Exp,
    Log,
    Sqrt,
    Sigmoid,
    Tanh,
    Relu,
    Floor,
    Ceil,
    Round,
    Sign,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Asinh,
    Acosh,
    Atanh,
    Erf,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    FloorMod,
    Mod,
    Pow,
    Maximum,
    Minimum,
    SquaredDifference,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Less,
    LessEqual,
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceKind {
    Sum,
    Prod,
    Max,
    Min,
    Mean,
    Any,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgReduceKind {
    Max,
    Min,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PadMode {
    Constant,
    Reflect,
    Symmetric,
}

/// Spatial-op configuration shared by convolution variants. Operands are
/// channel-first (NCHW); pads are per spatial axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvSpec {
    pub strides: Vec<usize>,
    pub dilations: Vec<usize>,
    pub pads_begin: Vec<usize>,
    pub pads_end: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeconvSpec {
    pub strides: Vec<usize>,
    pub dilations: Vec<usize>,
    pub pads_begin: Vec<usize>,
    pub pads_end: Vec<usize>,
    pub output_shape: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSpec {
    pub window: Vec<usize>,
    pub strides: Vec<usize>,
    pub pads_begin: Vec<usize>,
    pub pads_end: Vec<usize>,
    /// Average pooling only: exclude padded elements from the divisor.
    pub exclude_pad: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReduceSpec {
    pub kind: ReduceKind,
    pub axes: Vec<usize>,
    pub keep_dims: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LrnSpec {
    pub alpha: f64,
    pub beta: f64,
    pub bias: f64,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceSpec {
    pub begin: Vec<usize>,
    pub end: Vec<usize>,
    pub strides: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PadSpec {
    pub mode: PadMode,
    pub begin: Vec<usize>,
    pub end: Vec<usize>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopKSpec {
    pub k: usize,
    pub axis: usize,
    pub largest: bool,
    pub sorted: bool,
    pub index_dtype: DType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceBlockSpec {
    pub block_shape: Vec<usize>,
    pub pads_begin: Vec<usize>,
    pub pads_end: Vec<usize>,
}

/// Declarative bridge-IR operations. One output per instruction; host ops
/// with several outputs lower to several instructions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    Constant(TensorLiteral),
    Unary(UnaryOp),
    Binary(BinaryOp),
    Compare(CompareOp),
    Select,
    MatMul {
        transpose_a: bool,
        transpose_b: bool,
    },
    Convolution(ConvSpec),
    GroupConvolution(ConvSpec),
    ConvolutionBackpropData(DeconvSpec),
    AvgPool(PoolSpec),
    MaxPool(PoolSpec),
    BatchNormInference {
        epsilon: f32,
    },
    Lrn(LrnSpec),
    Reduce(ReduceSpec),
    ArgReduce {
        kind: ArgReduceKind,
        axis: usize,
        index_dtype: DType,
    },
    Softmax {
        axis: usize,
    },
    Clamp {
        min: f64,
        max: f64,
    },
    Elu {
        alpha: f32,
    },
    LeakyRelu {
        alpha: f32,
    },
    Softplus,
    Reshape {
        dims: Vec<usize>,
    },
    Transpose {
        perm: Vec<usize>,
    },
    Broadcast {
        dims: Vec<usize>,
    },
    Slice(SliceSpec),
    Concat {
        axis: usize,
    },
    Pad(PadSpec),
    Tile {
        repeats: Vec<usize>,
    },
    Gather {
        axis: usize,
        batch_dims: usize,
    },
    GatherNd {
        batch_dims: usize,
    },
    ScatterNd,
    OneHot {
        axis: usize,
        depth: usize,
    },
    Cast {
        dtype: DType,
    },
    Squeeze {
        axes: Vec<usize>,
    },
    Unsqueeze {
        axes: Vec<usize>,
    },
    CumSum {
        axis: usize,
        exclusive: bool,
        reverse: bool,
    },
    DepthToSpace {
        block: usize,
    },
    SpaceToDepth {
        block: usize,
    },
    BatchToSpace(SpaceBlockSpec),
    SpaceToBatch(SpaceBlockSpec),
    Reverse {
        axes: Vec<usize>,
    },
    TopKValues(TopKSpec),
    TopKIndices(TopKSpec),
}

impl Operation {
    /// Short mnemonic used in logs and the text dump.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Operation::Constant(_) => "constant",
            Operation::Unary(_) => "unary",
            Operation::Binary(_) => "binary",
            Operation::Compare(_) => "compare",
            Operation::Select => "select",
            Operation::MatMul { .. } => "matmul",
            Operation::Convolution(_) => "convolution",
            Operation::GroupConvolution(_) => "group_convolution",
            Operation::ConvolutionBackpropData(_) => "convolution_backprop_data",
            Operation::AvgPool(_) => "avg_pool",
            Operation::MaxPool(_) => "max_pool",
            Operation::BatchNormInference { .. } => "batch_norm_inference",
            Operation::Lrn(_) => "lrn",
            Operation::Reduce(_) => "reduce",
            Operation::ArgReduce { .. } => "arg_reduce",
            Operation::Softmax { .. } => "softmax",
            Operation::Clamp { .. } => "clamp",
            Operation::Elu { .. } => "elu",
            Operation::LeakyRelu { .. } => "leaky_relu",
            Operation::Softplus => "softplus",
            Operation::Reshape { .. } => "reshape",
            Operation::Transpose { .. } => "transpose",
            Operation::Broadcast { .. } => "broadcast",
            Operation::Slice(_) => "slice",
            Operation::Concat { .. } => "concat",
            Operation::Pad(_) => "pad",
            Operation::Tile { .. } => "tile",
            Operation::Gather { .. } => "gather",
            Operation::GatherNd { .. } => "gather_nd",
            Operation::ScatterNd => "scatter_nd",
            Operation::OneHot { .. } => "one_hot",
            Operation::Cast { .. } => "cast",
            Operation::Squeeze { .. } => "squeeze",
            Operation::Unsqueeze { .. } => "unsqueeze",
            Operation::CumSum { .. } => "cumsum",
            Operation::DepthToSpace { .. } => "depth_to_space",
            Operation::SpaceToDepth { .. } => "space_to_depth",
            Operation::BatchToSpace(_) => "batch_to_space",
            Operation::SpaceToBatch(_) => "space_to_batch",
            Operation::Reverse { .. } => "reverse",
            Operation::TopKValues(_) => "top_k_values",
            Operation::TopKIndices(_) => "top_k_indices",
        }
    }
}

/// Single SSA instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: ValueId,
    pub op: Operation,
    pub operands: Vec<ValueId>,
    pub output: TensorSpec,
}

/// Dynamic input of a compiled function, in host parameter-index order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub id: ValueId,
    pub spec: TensorSpec,
    /// Host node name the parameter was lowered from (provenance tag).
    pub name: String,
}

/// A lowered cluster: parameters, body in execution order, result values.
///
/// Results are stored in row-major (host-canonical) layout; engines must
/// produce buffers in that layout.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FunctionIr {
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub body: Vec<Instruction>,
    pub results: Vec<ValueId>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IrError {
    #[error("value {0} is used before it is defined")]
    UseBeforeDef(ValueId),
    #[error("duplicate definition of value {0}")]
    DuplicateDef(ValueId),
    #[error("result {0} is never defined")]
    UndefinedResult(ValueId),
}

impl FunctionIr {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// SSA discipline check: every operand defined before use, no
    /// duplicate ids, all results defined.
    pub fn validate_topology(&self) -> Result<(), IrError> {
        let mut defined = std::collections::HashSet::new();
        for param in &self.parameters {
            if !defined.insert(param.id) {
                return Err(IrError::DuplicateDef(param.id));
            }
        }
        for inst in &self.body {
            for operand in &inst.operands {
                if !defined.contains(operand) {
                    return Err(IrError::UseBeforeDef(*operand));
                }
            }
            if !defined.insert(inst.id) {
                return Err(IrError::DuplicateDef(inst.id));
            }
        }
        for result in &self.results {
            if !defined.contains(result) {
                return Err(IrError::UndefinedResult(*result));
            }
        }
        Ok(())
    }

    pub fn output_spec(&self, value: ValueId) -> Option<&TensorSpec> {
        if let Some(param) = self.parameters.iter().find(|p| p.id == value) {
            return Some(&param.spec);
        }
        self.body
            .iter()
            .find(|inst| inst.id == value)
            .map(|inst| &inst.output)
    }

    pub fn result_specs(&self) -> Vec<&TensorSpec> {
        self.results
            .iter()
            .filter_map(|id| self.output_spec(*id))
            .collect()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Stable content hash used in compiled-function cache keys.
    pub fn content_hash(&self) -> u64 {
        let bytes = bincode::serialize(self).unwrap_or_default();
        fnv_hash(&bytes)
    }
}

impl fmt::Display for FunctionIr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "func @{} {{", self.name)?;
        for param in &self.parameters {
            writeln!(f, "  param {}: {} // {}", param.id, param.spec, param.name)?;
        }
        for inst in &self.body {
            writeln!(
                f,
                "  {} = {}({}) -> {}",
                inst.id,
                inst.op.mnemonic(),
                inst.operands.iter().join(", "),
                inst.output
            )?;
        }
        writeln!(f, "  return {}", self.results.iter().join(", "))?;
        write!(f, "}}")
    }
}

pub fn fnv_hash(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    let mut hash = OFFSET;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}
