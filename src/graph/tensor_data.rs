use serde::{Deserialize, Serialize};

use super::DataType;

/// Dense host tensor: dtype, dims, and little-endian element bytes.
///
/// Carried by `Const` nodes and by the static-input snapshot handed to the
/// builder. Conversion accessors mirror how the host runtime reads scalar
/// lists out of arbitrary numeric tensors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorData {
    pub dtype: DataType,
    pub dims: Vec<usize>,
    pub bytes: Vec<u8>,
}

impl TensorData {
    pub fn new(dtype: DataType, dims: Vec<usize>, bytes: Vec<u8>) -> Self {
        Self { dtype, dims, bytes }
    }

    pub fn from_f32(dims: Vec<usize>, values: &[f32]) -> Self {
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(DataType::F32, dims, bytes)
    }

    pub fn from_f64(dims: Vec<usize>, values: &[f64]) -> Self {
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(DataType::F64, dims, bytes)
    }

    pub fn from_i32(dims: Vec<usize>, values: &[i32]) -> Self {
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(DataType::I32, dims, bytes)
    }

    pub fn from_i64(dims: Vec<usize>, values: &[i64]) -> Self {
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(DataType::I64, dims, bytes)
    }

    pub fn from_bool(dims: Vec<usize>, values: &[bool]) -> Self {
        let bytes = values.iter().map(|v| *v as u8).collect();
        Self::new(DataType::Bool, dims, bytes)
    }

    pub fn scalar_f32(value: f32) -> Self {
        Self::from_f32(Vec::new(), &[value])
    }

    pub fn scalar_i32(value: i32) -> Self {
        Self::from_i32(Vec::new(), &[value])
    }

    pub fn element_count(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Reads the elements as `i64`, converting from any integer dtype.
    pub fn to_i64_vec(&self) -> Option<Vec<i64>> {
        match self.dtype {
            DataType::I8 => Some(self.bytes.iter().map(|b| *b as i8 as i64).collect()),
            DataType::U8 => Some(self.bytes.iter().map(|b| *b as i64).collect()),
            DataType::I16 => Some(
                self.bytes
                    .chunks_exact(2)
                    .map(|c| i16::from_le_bytes([c[0], c[1]]) as i64)
                    .collect(),
            ),
            DataType::I32 => Some(
                self.bytes
                    .chunks_exact(4)
                    .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as i64)
                    .collect(),
            ),
            DataType::I64 => Some(
                self.bytes
                    .chunks_exact(8)
                    .map(|c| {
                        i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]])
                    })
                    .collect(),
            ),
            DataType::U32 => Some(
                self.bytes
                    .chunks_exact(4)
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]) as i64)
                    .collect(),
            ),
            DataType::Bool => Some(self.bytes.iter().map(|b| *b as i64).collect()),
            _ => None,
        }
    }

    /// Reads the elements as `f32`, converting from f64 or integer dtypes.
    pub fn to_f32_vec(&self) -> Option<Vec<f32>> {
        match self.dtype {
            DataType::F32 => Some(
                self.bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            DataType::F64 => Some(
                self.bytes
                    .chunks_exact(8)
                    .map(|c| {
                        f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32
                    })
                    .collect(),
            ),
            _ => self
                .to_i64_vec()
                .map(|ints| ints.into_iter().map(|v| v as f32).collect()),
        }
    }

    /// Single-element convenience accessor used by axis/scalar arguments.
    pub fn to_i64_scalar(&self) -> Option<i64> {
        let values = self.to_i64_vec()?;
        if values.len() == 1 {
            Some(values[0])
        } else {
            None
        }
    }
}
