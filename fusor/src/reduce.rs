//! Element-wise reduction over typed byte slices.
//!
//! Host-side arithmetic for the simulation channel. Reads and writes go
//! through little-endian conversions so slices need no alignment.

use half::{bf16, f16};

use crate::error::{FusorError, Result};
use crate::types::{DataType, ReduceOp};

trait Reducible: Copy + 'static {
    const SIZE: usize;
    fn read_le(bytes: &[u8]) -> Self;
    fn write_le(self, bytes: &mut [u8]);
    fn reduce(a: Self, b: Self, op: ReduceOp) -> Self;
}

macro_rules! impl_reducible_int {
    ($($ty:ty),*) => {
        $(
            impl Reducible for $ty {
                const SIZE: usize = size_of::<$ty>();

                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    <$ty>::from_le_bytes(bytes[..Self::SIZE].try_into().unwrap())
                }

                #[inline]
                fn write_le(self, bytes: &mut [u8]) {
                    bytes[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn reduce(a: Self, b: Self, op: ReduceOp) -> Self {
                    match op {
                        ReduceOp::Sum => a.wrapping_add(b),
                        ReduceOp::Prod => a.wrapping_mul(b),
                        ReduceOp::Min => a.min(b),
                        ReduceOp::Max => a.max(b),
                    }
                }
            }
        )*
    };
}

macro_rules! impl_reducible_float {
    ($($ty:ty),*) => {
        $(
            impl Reducible for $ty {
                const SIZE: usize = size_of::<$ty>();

                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    <$ty>::from_le_bytes(bytes[..Self::SIZE].try_into().unwrap())
                }

                #[inline]
                fn write_le(self, bytes: &mut [u8]) {
                    bytes[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn reduce(a: Self, b: Self, op: ReduceOp) -> Self {
                    match op {
                        ReduceOp::Sum => a + b,
                        ReduceOp::Prod => a * b,
                        ReduceOp::Min => a.min(b),
                        ReduceOp::Max => a.max(b),
                    }
                }
            }
        )*
    };
}

// The 16-bit types carry arithmetic ops but not the full float method
// surface, so ordering goes through comparisons.
macro_rules! impl_reducible_half {
    ($($ty:ty),*) => {
        $(
            impl Reducible for $ty {
                const SIZE: usize = size_of::<$ty>();

                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    <$ty>::from_le_bytes(bytes[..Self::SIZE].try_into().unwrap())
                }

                #[inline]
                fn write_le(self, bytes: &mut [u8]) {
                    bytes[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn reduce(a: Self, b: Self, op: ReduceOp) -> Self {
                    match op {
                        ReduceOp::Sum => a + b,
                        ReduceOp::Prod => a * b,
                        ReduceOp::Min => if b < a { b } else { a },
                        ReduceOp::Max => if b > a { b } else { a },
                    }
                }
            }
        )*
    };
}

impl_reducible_int!(i8, u8, i32, i64);
impl_reducible_float!(f32, f64);
impl_reducible_half!(f16, bf16);

fn reduce_slice_typed<T: Reducible>(dst: &mut [u8], src: &[u8], count: usize, op: ReduceOp) {
    for i in 0..count {
        let off = i * T::SIZE;
        let a = T::read_le(&dst[off..]);
        let b = T::read_le(&src[off..]);
        T::reduce(a, b, op).write_le(&mut dst[off..]);
    }
}

/// `dst[i] = op(dst[i], src[i])` for `count` elements of `dtype`.
///
/// Both slices must contain exactly `count * dtype.size_in_bytes()` bytes.
pub(crate) fn reduce_slice(
    dst: &mut [u8],
    src: &[u8],
    count: usize,
    dtype: DataType,
    op: ReduceOp,
) -> Result<()> {
    let bytes = count * dtype.size_in_bytes();
    if dst.len() != bytes || src.len() != bytes {
        return Err(FusorError::InvalidBatch {
            reason: format!(
                "reduce length mismatch: want {bytes} bytes, dst {} src {}",
                dst.len(),
                src.len()
            ),
        });
    }
    match dtype {
        DataType::I8 => reduce_slice_typed::<i8>(dst, src, count, op),
        DataType::U8 => reduce_slice_typed::<u8>(dst, src, count, op),
        DataType::I32 => reduce_slice_typed::<i32>(dst, src, count, op),
        DataType::I64 => reduce_slice_typed::<i64>(dst, src, count, op),
        DataType::F16 => reduce_slice_typed::<f16>(dst, src, count, op),
        DataType::BF16 => reduce_slice_typed::<bf16>(dst, src, count, op),
        DataType::F32 => reduce_slice_typed::<f32>(dst, src, count, op),
        DataType::F64 => reduce_slice_typed::<f64>(dst, src, count, op),
    }
    Ok(())
}
