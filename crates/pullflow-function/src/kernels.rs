//! Built-in element-wise kernels interpreted by `LocalExecutor`.
//!
//! Binary kernels accept two buffers of the same numeric dtype whose shapes
//! are equal, or where one side is a scalar (broadcast).

use pullflow_core::schema::DType;
use pullflow_core::types::{Buffer, Payload};

use crate::error::{FunctionError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
    Identity,
    Add,
    Sub,
    Mul,
    Neg,
    EndOfRange,
}

impl Kernel {
    pub fn from_op(op: &str) -> Option<Self> {
        Some(match op {
            "Identity" => Kernel::Identity,
            "Add" => Kernel::Add,
            "Sub" => Kernel::Sub,
            "Mul" => Kernel::Mul,
            "Neg" => Kernel::Neg,
            "EndOfRange" => Kernel::EndOfRange,
            _ => return None,
        })
    }

    /// Number of inputs the kernel takes; `None` accepts any count.
    pub fn arity(self) -> Option<usize> {
        match self {
            Kernel::Identity | Kernel::Neg => Some(1),
            Kernel::Add | Kernel::Sub | Kernel::Mul => Some(2),
            Kernel::EndOfRange => None,
        }
    }

    pub fn eval(self, inputs: &[&Buffer]) -> Result<Buffer> {
        match self {
            Kernel::Identity => Ok(inputs[0].clone()),
            Kernel::Neg => unary_neg(inputs[0]),
            Kernel::Add => binary(BinOp::Add, inputs[0], inputs[1]),
            Kernel::Sub => binary(BinOp::Sub, inputs[0], inputs[1]),
            Kernel::Mul => binary(BinOp::Mul, inputs[0], inputs[1]),
            Kernel::EndOfRange => Err(FunctionError::EndOfRange),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
}

trait Arith: Copy {
    fn bin(op: BinOp, a: Self, b: Self) -> Option<Self>;
    fn neg(a: Self) -> Option<Self>;
}

macro_rules! int_arith {
    ($t:ty) => {
        impl Arith for $t {
            fn bin(op: BinOp, a: Self, b: Self) -> Option<Self> {
                match op {
                    BinOp::Add => a.checked_add(b),
                    BinOp::Sub => a.checked_sub(b),
                    BinOp::Mul => a.checked_mul(b),
                }
            }
            fn neg(a: Self) -> Option<Self> {
                a.checked_neg()
            }
        }
    };
}

macro_rules! float_arith {
    ($t:ty) => {
        impl Arith for $t {
            fn bin(op: BinOp, a: Self, b: Self) -> Option<Self> {
                Some(match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                })
            }
            fn neg(a: Self) -> Option<Self> {
                Some(-a)
            }
        }
    };
}

int_arith!(i32);
int_arith!(i64);
float_arith!(f32);
float_arith!(f64);

fn overflow(dtype: DType) -> FunctionError {
    FunctionError::Failed(format!("{dtype} overflow"))
}

fn zip_with<T: Arith>(op: BinOp, dtype: DType, x: &[T], y: &[T]) -> Result<Vec<T>> {
    let f = |a: T, b: T| T::bin(op, a, b).ok_or_else(|| overflow(dtype));
    match (x.len(), y.len()) {
        (n, m) if n == m => x.iter().zip(y).map(|(a, b)| f(*a, *b)).collect(),
        (1, _) => y.iter().map(|b| f(x[0], *b)).collect(),
        (_, 1) => x.iter().map(|a| f(*a, y[0])).collect(),
        (n, m) => Err(FunctionError::InvalidArgument(format!(
            "cannot combine {n} and {m} elements"
        ))),
    }
}

fn broadcast_shape(a: &Buffer, b: &Buffer) -> Result<Vec<usize>> {
    if a.shape == b.shape {
        Ok(a.shape.clone())
    } else if a.shape.is_empty() {
        Ok(b.shape.clone())
    } else if b.shape.is_empty() {
        Ok(a.shape.clone())
    } else {
        Err(FunctionError::InvalidArgument(format!(
            "shapes {:?} and {:?} are not broadcastable",
            a.shape, b.shape
        )))
    }
}

fn binary(op: BinOp, a: &Buffer, b: &Buffer) -> Result<Buffer> {
    let dtype = a.dtype();
    if dtype != b.dtype() {
        return Err(FunctionError::InvalidArgument(format!(
            "{op:?} needs matching dtypes, got {dtype} and {}",
            b.dtype()
        )));
    }
    let shape = broadcast_shape(a, b)?;
    let payload = match (&a.payload, &b.payload) {
        (Payload::I32(x), Payload::I32(y)) => Payload::I32(zip_with(op, dtype, x, y)?),
        (Payload::I64(x), Payload::I64(y)) => Payload::I64(zip_with(op, dtype, x, y)?),
        (Payload::F32(x), Payload::F32(y)) => Payload::F32(zip_with(op, dtype, x, y)?),
        (Payload::F64(x), Payload::F64(y)) => Payload::F64(zip_with(op, dtype, x, y)?),
        _ => {
            return Err(FunctionError::InvalidArgument(format!(
                "{op:?} is not defined for {dtype}"
            )))
        }
    };
    Buffer::new(shape, payload).map_err(|e| FunctionError::Failed(e.to_string()))
}

fn negate<T: Arith>(dtype: DType, x: &[T]) -> Result<Vec<T>> {
    x.iter()
        .map(|a| T::neg(*a).ok_or_else(|| overflow(dtype)))
        .collect()
}

fn unary_neg(a: &Buffer) -> Result<Buffer> {
    let dtype = a.dtype();
    let payload = match &a.payload {
        Payload::I32(x) => Payload::I32(negate(dtype, x)?),
        Payload::I64(x) => Payload::I64(negate(dtype, x)?),
        Payload::F32(x) => Payload::F32(negate(dtype, x)?),
        Payload::F64(x) => Payload::F64(negate(dtype, x)?),
        _ => {
            return Err(FunctionError::InvalidArgument(format!(
                "Neg is not defined for {dtype}"
            )))
        }
    };
    Buffer::new(a.shape.clone(), payload).map_err(|e| FunctionError::Failed(e.to_string()))
}
