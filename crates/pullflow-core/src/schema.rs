//! Element types and output signatures. Pure data.
//!
//! Every dataset carries an `OutputSignature`; every `Record` it produces must
//! match it position by position (dtype exactly, shape compatibly).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::types::{Buffer, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
    Utf8,
}

impl DType {
    pub fn is_numeric(self) -> bool {
        !matches!(self, DType::Bool | DType::Utf8)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::Bool => "bool",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Utf8 => "utf8",
        };
        f.write_str(s)
    }
}

/// A shape that may be only partially known.
///
/// `dims == None` means the rank itself is unknown. A `None` entry inside the
/// dims means that dimension is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartialShape {
    pub dims: Option<Vec<Option<usize>>>,
}

impl PartialShape {
    pub fn unknown() -> Self {
        Self { dims: None }
    }

    pub fn scalar() -> Self {
        Self { dims: Some(vec![]) }
    }

    pub fn known(dims: &[usize]) -> Self {
        Self {
            dims: Some(dims.iter().map(|d| Some(*d)).collect()),
        }
    }

    pub fn rank(&self) -> Option<usize> {
        self.dims.as_ref().map(|d| d.len())
    }

    /// True if a concrete shape could be an instance of this partial shape.
    pub fn is_compatible_with(&self, shape: &[usize]) -> bool {
        match &self.dims {
            None => true,
            Some(dims) => {
                dims.len() == shape.len()
                    && dims
                        .iter()
                        .zip(shape)
                        .all(|(want, got)| want.map_or(true, |w| w == *got))
            }
        }
    }
}

impl fmt::Display for PartialShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.dims {
            None => f.write_str("<unknown>"),
            Some(dims) => {
                f.write_str("[")?;
                for (i, d) in dims.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match d {
                        Some(v) => write!(f, "{v}")?,
                        None => f.write_str("?")?,
                    }
                }
                f.write_str("]")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: DType,
    pub shape: PartialShape,
}

impl TensorSpec {
    pub fn new(dtype: DType, shape: PartialShape) -> Self {
        Self { dtype, shape }
    }

    pub fn scalar(dtype: DType) -> Self {
        Self::new(dtype, PartialShape::scalar())
    }

    pub fn matches(&self, buf: &Buffer) -> bool {
        buf.dtype() == self.dtype && self.shape.is_compatible_with(&buf.shape)
    }
}

/// Ordered (dtype, partial shape) pairs attached to every dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct OutputSignature {
    pub specs: Vec<TensorSpec>,
}

impl OutputSignature {
    pub fn new(specs: Vec<TensorSpec>) -> Self {
        Self { specs }
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn dtypes(&self) -> Vec<DType> {
        self.specs.iter().map(|s| s.dtype).collect()
    }

    pub fn shapes(&self) -> Vec<PartialShape> {
        self.specs.iter().map(|s| s.shape.clone()).collect()
    }

    /// Rebuild a signature from parallel dtype/shape lists (graph attrs).
    pub fn from_parts(dtypes: Vec<DType>, shapes: Vec<PartialShape>) -> Result<Self> {
        if dtypes.len() != shapes.len() {
            return Err(Error::Signature(format!(
                "{} output types but {} output shapes",
                dtypes.len(),
                shapes.len()
            )));
        }
        Ok(Self {
            specs: dtypes
                .into_iter()
                .zip(shapes)
                .map(|(dtype, shape)| TensorSpec { dtype, shape })
                .collect(),
        })
    }

    /// Check arity and per-position dtype/shape of a record.
    pub fn validate(&self, record: &Record) -> Result<()> {
        if record.len() != self.specs.len() {
            return Err(Error::Signature(format!(
                "record has {} components, signature expects {}",
                record.len(),
                self.specs.len()
            )));
        }
        for (i, (spec, buf)) in self.specs.iter().zip(record.buffers.iter()).enumerate() {
            if buf.dtype() != spec.dtype {
                return Err(Error::Signature(format!(
                    "component {i}: dtype {} does not match expected {}",
                    buf.dtype(),
                    spec.dtype
                )));
            }
            if !spec.shape.is_compatible_with(&buf.shape) {
                return Err(Error::Signature(format!(
                    "component {i}: shape {:?} is not compatible with {}",
                    buf.shape, spec.shape
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_shape_compatibility() {
        assert!(PartialShape::unknown().is_compatible_with(&[3, 4]));
        assert!(PartialShape::scalar().is_compatible_with(&[]));
        assert!(!PartialShape::scalar().is_compatible_with(&[1]));

        let half = PartialShape {
            dims: Some(vec![None, Some(4)]),
        };
        assert!(half.is_compatible_with(&[7, 4]));
        assert!(!half.is_compatible_with(&[7, 5]));
        assert!(!half.is_compatible_with(&[4]));
    }

    #[test]
    fn validate_rejects_wrong_arity_and_dtype() {
        let sig = OutputSignature::new(vec![
            TensorSpec::scalar(DType::Int64),
            TensorSpec::new(DType::Float32, PartialShape::known(&[2])),
        ]);

        let good = Record::new(vec![
            Buffer::scalar_i64(1),
            Buffer::from_f32(vec![2], vec![0.5, 1.5]).unwrap(),
        ]);
        assert!(sig.validate(&good).is_ok());

        let short = Record::new(vec![Buffer::scalar_i64(1)]);
        assert!(matches!(sig.validate(&short), Err(Error::Signature(_))));

        let wrong_type = Record::new(vec![Buffer::scalar_i64(1), Buffer::scalar_i64(2)]);
        assert!(matches!(sig.validate(&wrong_type), Err(Error::Signature(_))));
    }

    #[test]
    fn from_parts_requires_equal_lengths() {
        let err = OutputSignature::from_parts(vec![DType::Int64], vec![]).unwrap_err();
        assert!(err.to_string().contains("output shapes"));
    }
}
