//! Buffers and records: the values that flow through a pipeline.
//!
//! A `Buffer` owns its payload. `Clone` duplicates the payload (copy); moving
//! the value transfers ownership and keeps the same heap allocation (move).
//! Operators pick between the two per output position.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::DType;

/// Typed element storage, one variant per `DType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Bool(Vec<bool>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Utf8(Vec<String>),
}

impl Payload {
    pub fn dtype(&self) -> DType {
        match self {
            Payload::Bool(_) => DType::Bool,
            Payload::I32(_) => DType::Int32,
            Payload::I64(_) => DType::Int64,
            Payload::F32(_) => DType::Float32,
            Payload::F64(_) => DType::Float64,
            Payload::Utf8(_) => DType::Utf8,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Payload::Bool(v) => v.len(),
            Payload::I32(v) => v.len(),
            Payload::I64(v) => v.len(),
            Payload::F32(v) => v.len(),
            Payload::F64(v) => v.len(),
            Payload::Utf8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn data_addr(&self) -> usize {
        match self {
            Payload::Bool(v) => v.as_ptr() as usize,
            Payload::I32(v) => v.as_ptr() as usize,
            Payload::I64(v) => v.as_ptr() as usize,
            Payload::F32(v) => v.as_ptr() as usize,
            Payload::F64(v) => v.as_ptr() as usize,
            Payload::Utf8(v) => v.as_ptr() as usize,
        }
    }
}

/// A typed, shaped value. Immutable by convention once placed in a `Record`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Buffer {
    pub shape: Vec<usize>,
    pub payload: Payload,
}

impl Buffer {
    /// Build a buffer, checking that the element count matches the shape.
    pub fn new(shape: Vec<usize>, payload: Payload) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != payload.len() {
            return Err(Error::Buffer(format!(
                "shape {:?} needs {} elements, payload has {}",
                shape,
                expected,
                payload.len()
            )));
        }
        Ok(Self { shape, payload })
    }

    pub fn scalar_bool(v: bool) -> Self {
        Self {
            shape: vec![],
            payload: Payload::Bool(vec![v]),
        }
    }

    pub fn scalar_i32(v: i32) -> Self {
        Self {
            shape: vec![],
            payload: Payload::I32(vec![v]),
        }
    }

    pub fn scalar_i64(v: i64) -> Self {
        Self {
            shape: vec![],
            payload: Payload::I64(vec![v]),
        }
    }

    pub fn scalar_f32(v: f32) -> Self {
        Self {
            shape: vec![],
            payload: Payload::F32(vec![v]),
        }
    }

    pub fn scalar_f64(v: f64) -> Self {
        Self {
            shape: vec![],
            payload: Payload::F64(vec![v]),
        }
    }

    pub fn scalar_str(v: impl Into<String>) -> Self {
        Self {
            shape: vec![],
            payload: Payload::Utf8(vec![v.into()]),
        }
    }

    pub fn from_i64(shape: Vec<usize>, values: Vec<i64>) -> Result<Self> {
        Self::new(shape, Payload::I64(values))
    }

    pub fn from_f32(shape: Vec<usize>, values: Vec<f32>) -> Result<Self> {
        Self::new(shape, Payload::F32(values))
    }

    pub fn from_f64(shape: Vec<usize>, values: Vec<f64>) -> Result<Self> {
        Self::new(shape, Payload::F64(values))
    }

    pub fn dtype(&self) -> DType {
        self.payload.dtype()
    }

    pub fn num_elements(&self) -> usize {
        self.payload.len()
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        match &self.payload {
            Payload::I64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match &self.payload {
            Payload::F64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str_slice(&self) -> Option<&[String]> {
        match &self.payload {
            Payload::Utf8(v) => Some(v),
            _ => None,
        }
    }

    /// True if both buffers are backed by the same heap allocation, i.e. one
    /// was moved from the other rather than copied. Always false for empty
    /// payloads, which own no allocation.
    pub fn same_allocation(&self, other: &Buffer) -> bool {
        !self.payload.is_empty()
            && self.payload.dtype() == other.payload.dtype()
            && self.payload.data_addr() == other.payload.data_addr()
    }
}

/// One unit of the streamed sequence: an ordered tuple of buffers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    pub buffers: Vec<Buffer>,
}

impl Record {
    pub fn new(buffers: Vec<Buffer>) -> Self {
        Self { buffers }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Buffer> {
        self.buffers.get(idx)
    }

    pub fn into_buffers(self) -> Vec<Buffer> {
        self.buffers
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Buffer> {
        self.buffers.iter()
    }
}

impl From<Vec<Buffer>> for Record {
    fn from(buffers: Vec<Buffer>) -> Self {
        Self { buffers }
    }
}
