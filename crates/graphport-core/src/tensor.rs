use std::fmt;

use bytes::Bytes;
use half::f16;
use smallvec::SmallVec;

use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F16,
    I64,
    I32,
    U8,
}

impl DType {
    pub fn byte_size(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 => 2,
            DType::I64 => 8,
            DType::I32 => 4,
            DType::U8 => 1,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Shape(pub SmallVec<[usize; 6]>);

impl Shape {
    pub fn from_slice(d: &[usize]) -> Self {
        Self(d.iter().copied().collect())
    }

    pub fn scalar() -> Self {
        Self(SmallVec::new())
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Element count; a rank-0 shape holds one element.
    ///
    /// Only meaningful for shapes already known to fit in memory, such as the
    /// shape of a constructed [`Tensor`]. Use [`Shape::checked_numel`] for
    /// dims that come off the wire.
    pub fn numel(&self) -> usize {
        self.0.iter().product()
    }

    pub fn checked_numel(&self) -> Option<usize> {
        self.0.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    /// Size of a dense `dtype` buffer of this shape, `None` on overflow.
    pub fn checked_byte_len(&self, dtype: DType) -> Option<usize> {
        self.checked_numel()?.checked_mul(dtype.byte_size())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0.as_slice())
    }
}

impl From<&[usize]> for Shape {
    fn from(d: &[usize]) -> Self {
        Self::from_slice(d)
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(d: [usize; N]) -> Self {
        Self::from_slice(&d)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorDesc {
    pub dtype: DType,
    pub shape: Shape,
}

/// A dense, row-major, little-endian CPU tensor.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    pub desc: TensorDesc,
    pub data: Bytes,
}

fn byte_len(dtype: DType, shape: &Shape) -> Result<usize> {
    shape.checked_byte_len(dtype).ok_or_else(|| {
        Error::InvalidTensor(format!("{dtype:?} tensor of shape {shape} overflows usize"))
    })
}

impl Tensor {
    /// Zero-filled tensor. `shape` must have a size that fits in `usize`;
    /// [`Tensor::try_zeros`] checks this.
    pub fn zeros(dtype: DType, shape: Shape) -> Self {
        let byte_len = shape.numel() * dtype.byte_size();
        Self {
            desc: TensorDesc { dtype, shape },
            data: Bytes::from(vec![0u8; byte_len]),
        }
    }

    pub fn try_zeros(dtype: DType, shape: Shape) -> Result<Self> {
        let byte_len = byte_len(dtype, &shape)?;
        Ok(Self {
            desc: TensorDesc { dtype, shape },
            data: Bytes::from(vec![0u8; byte_len]),
        })
    }

    pub fn from_cpu_bytes(dtype: DType, shape: Shape, data: Bytes) -> Result<Self> {
        let expected = byte_len(dtype, &shape)?;
        if data.len() != expected {
            return Err(Error::InvalidTensor(format!(
                "{dtype:?} tensor of shape {shape} needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            desc: TensorDesc { dtype, shape },
            data,
        })
    }

    pub fn from_slice<T: Element>(shape: impl Into<Shape>, values: &[T]) -> Result<Self> {
        let shape = shape.into();
        let numel = byte_len(T::DTYPE, &shape)? / T::DTYPE.byte_size();
        if values.len() != numel {
            return Err(Error::InvalidTensor(format!(
                "shape {shape} holds {numel} elements, got {}",
                values.len()
            )));
        }
        let mut buf = Vec::with_capacity(values.len() * T::DTYPE.byte_size());
        for v in values {
            v.write_le(&mut buf);
        }
        Self::from_cpu_bytes(T::DTYPE, shape, Bytes::from(buf))
    }

    pub fn dtype(&self) -> DType {
        self.desc.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.desc.shape
    }

    pub fn numel(&self) -> usize {
        self.desc.shape.numel()
    }

    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if self.desc.dtype != T::DTYPE {
            return Err(Error::DTypeMismatch {
                expected: T::DTYPE,
                got: self.desc.dtype,
            });
        }
        Ok(self
            .data
            .chunks_exact(T::DTYPE.byte_size())
            .map(T::read_le)
            .collect())
    }

    /// Widens every element to `f64`, whatever the stored type.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        fn widen<T: Element>(data: &[u8]) -> Vec<f64> {
            data.chunks_exact(T::DTYPE.byte_size())
                .map(|b| T::read_le(b).to_f64())
                .collect()
        }
        match self.desc.dtype {
            DType::F32 => widen::<f32>(&self.data),
            DType::F16 => widen::<f16>(&self.data),
            DType::I64 => widen::<i64>(&self.data),
            DType::I32 => widen::<i32>(&self.data),
            DType::U8 => widen::<u8>(&self.data),
        }
    }
}

/// Scalar types a [`Tensor`] can be built from and read back as.
pub trait Element: Copy {
    const DTYPE: DType;

    fn write_le(self, out: &mut Vec<u8>);
    fn read_le(bytes: &[u8]) -> Self;
    fn to_f64(self) -> f64;
}

macro_rules! impl_element {
    ($ty:ty, $dtype:expr) => {
        impl Element for $ty {
            const DTYPE: DType = $dtype;

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_le_bytes(raw)
            }

            fn to_f64(self) -> f64 {
                self as f64
            }
        }
    };
}

impl_element!(f32, DType::F32);
impl_element!(i64, DType::I64);
impl_element!(i32, DType::I32);
impl_element!(u8, DType::U8);

impl Element for f16 {
    const DTYPE: DType = DType::F16;

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        f16::from_le_bytes([bytes[0], bytes[1]])
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }
}
