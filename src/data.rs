//! Typed numeric buffers returned by dataset reads.
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use ndarray::{ArrayViewD, IxDyn, Slice};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    BE,
    LE,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dtype {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl Dtype {
    pub fn dsize(&self) -> usize {
        use Dtype::*;

        match self {
            I8 | U8 => 1,
            I16 | U16 => 2,
            I32 | U32 | F32 => 4,
            I64 | U64 | F64 => 8,
        }
    }

    pub fn is_big_int(&self) -> bool {
        matches!(self, Dtype::I64 | Dtype::U64)
    }

    /// Byte order encoded in a NumPy style type string, if any.
    pub fn order_of(s: &str) -> Option<Order> {
        match s.chars().next() {
            Some('<') => Some(Order::LE),
            Some('>') => Some(Order::BE),
            _ => None,
        }
    }
}

impl FromStr for Dtype {
    type Err = anyhow::Error;

    /// Accepts NumPy type strings (`<f8`, `>i4`, `|u1`) and names (`float64`, `int32`).
    fn from_str(s: &str) -> Result<Dtype, Self::Err> {
        use Dtype::*;

        let code = s.trim_start_matches(['<', '>', '|', '=']);
        let dtype = match code {
            "i1" | "int8" => I8,
            "i2" | "int16" => I16,
            "i4" | "int32" => I32,
            "i8" | "int64" => I64,
            "u1" | "uint8" => U8,
            "u2" | "uint16" => U16,
            "u4" | "uint32" => U32,
            "u8" | "uint64" => U64,
            "f4" | "float32" => F32,
            "f8" | "float64" => F64,
            _ => return Err(anyhow!("unsupported dtype: {}", s)),
        };

        Ok(dtype)
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Dtype::*;

        let s = match self {
            I8 => "<i1",
            I16 => "<i2",
            I32 => "<i4",
            I64 => "<i8",
            U8 => "|u1",
            U16 => "<u2",
            U32 => "<u4",
            U64 => "<u8",
            F32 => "<f4",
            F64 => "<f8",
        };
        f.write_str(s)
    }
}

/// A dense, row-major buffer of one numeric type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataBuffer {
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

/// Apply `$body` to the vector inside any variant.
macro_rules! each_variant {
    ($buf: expr, $v: ident => $body: expr) => {
        match $buf {
            DataBuffer::I8($v) => $body,
            DataBuffer::I16($v) => $body,
            DataBuffer::I32($v) => $body,
            DataBuffer::I64($v) => $body,
            DataBuffer::U8($v) => $body,
            DataBuffer::U16($v) => $body,
            DataBuffer::U32($v) => $body,
            DataBuffer::U64($v) => $body,
            DataBuffer::F32($v) => $body,
            DataBuffer::F64($v) => $body,
        }
    };
}

/// Like `each_variant!`, but rewraps the result in the same variant.
macro_rules! map_variant {
    ($buf: expr, $v: ident => $body: expr) => {
        match $buf {
            DataBuffer::I8($v) => DataBuffer::I8($body),
            DataBuffer::I16($v) => DataBuffer::I16($body),
            DataBuffer::I32($v) => DataBuffer::I32($body),
            DataBuffer::I64($v) => DataBuffer::I64($body),
            DataBuffer::U8($v) => DataBuffer::U8($body),
            DataBuffer::U16($v) => DataBuffer::U16($body),
            DataBuffer::U32($v) => DataBuffer::U32($body),
            DataBuffer::U64($v) => DataBuffer::U64($body),
            DataBuffer::F32($v) => DataBuffer::F32($body),
            DataBuffer::F64($v) => DataBuffer::F64($body),
        }
    };
}

impl DataBuffer {
    pub fn dtype(&self) -> Dtype {
        use DataBuffer::*;

        match self {
            I8(_) => Dtype::I8,
            I16(_) => Dtype::I16,
            I32(_) => Dtype::I32,
            I64(_) => Dtype::I64,
            U8(_) => Dtype::U8,
            U16(_) => Dtype::U16,
            U32(_) => Dtype::U32,
            U64(_) => Dtype::U64,
            F32(_) => Dtype::F32,
            F64(_) => Dtype::F64,
        }
    }

    pub fn len(&self) -> usize {
        each_variant!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode raw bytes of `dtype` stored in `order`.
    pub fn from_bytes(dtype: Dtype, bytes: &[u8], order: Order) -> Result<DataBuffer, anyhow::Error> {
        let dsz = dtype.dsize();
        ensure!(
            bytes.len() % dsz == 0,
            "{} bytes is not a multiple of the {} byte element size",
            bytes.len(),
            dsz
        );
        let n = bytes.len() / dsz;

        macro_rules! read {
            ($variant: ident, $t: ty, $read: ident) => {{
                let mut dst: Vec<$t> = vec![Default::default(); n];
                match order {
                    Order::LE => LittleEndian::$read(bytes, &mut dst),
                    Order::BE => BigEndian::$read(bytes, &mut dst),
                }
                DataBuffer::$variant(dst)
            }};
        }

        Ok(match dtype {
            Dtype::I8 => DataBuffer::I8(bytes.iter().map(|&b| b as i8).collect()),
            Dtype::U8 => DataBuffer::U8(bytes.to_vec()),
            Dtype::I16 => read!(I16, i16, read_i16_into),
            Dtype::I32 => read!(I32, i32, read_i32_into),
            Dtype::I64 => read!(I64, i64, read_i64_into),
            Dtype::U16 => read!(U16, u16, read_u16_into),
            Dtype::U32 => read!(U32, u32, read_u32_into),
            Dtype::U64 => read!(U64, u64, read_u64_into),
            Dtype::F32 => read!(F32, f32, read_f32_into),
            Dtype::F64 => read!(F64, f64, read_f64_into),
        })
    }

    /// Element `i` as `f64`. 64-bit integers beyond 2^53 lose precision.
    pub fn get_f64(&self, i: usize) -> Option<f64> {
        each_variant!(self, v => v.get(i).map(|x| *x as f64))
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        each_variant!(self, v => v.iter().map(|x| *x as f64).collect())
    }

    /// Row-major sub-block of a buffer shaped `shape`.
    pub fn select(&self, shape: &[u64], ranges: &[Range<u64>]) -> Result<DataBuffer, anyhow::Error> {
        ensure!(
            shape.len() == ranges.len(),
            "{} ranges for a buffer of rank {}",
            ranges.len(),
            shape.len()
        );
        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        ensure!(
            dims.iter().product::<usize>() == self.len(),
            "buffer of length {} does not match shape {:?}",
            self.len(),
            shape
        );

        Ok(map_variant!(self, v => {
            let a = ArrayViewD::from_shape(IxDyn(&dims), v.as_slice())?;
            a.slice_each_axis(|ax| {
                let r = &ranges[ax.axis.index()];
                Slice::from(r.start as usize..r.end as usize)
            })
            .iter()
            .cloned()
            .collect()
        }))
    }

    /// Narrow 64-bit integer buffers to their 32-bit counterparts, other buffers are returned
    /// as is. Out of range values wrap modulo 2^32 unless `strict`, in which case the first
    /// one is reported as [`Error::Overflow`].
    pub fn narrow(self, strict: bool) -> Result<DataBuffer> {
        match self {
            DataBuffer::I64(v) => {
                let overflow = v.iter().position(|x| i32::try_from(*x).is_err());
                check_overflow(overflow, strict, |i| v[i] as i128, &v)?;
                Ok(DataBuffer::I32(v.iter().map(|x| *x as i32).collect()))
            }
            DataBuffer::U64(v) => {
                let overflow = v.iter().position(|x| u32::try_from(*x).is_err());
                check_overflow(overflow, strict, |i| v[i] as i128, &v)?;
                Ok(DataBuffer::U32(v.iter().map(|x| *x as u32).collect()))
            }
            other => Ok(other),
        }
    }
}

fn check_overflow<T, F>(first: Option<usize>, strict: bool, value: F, v: &[T]) -> Result<()>
where
    F: Fn(usize) -> i128,
{
    let Some(index) = first else {
        return Ok(());
    };

    if strict {
        return Err(Error::Overflow {
            index,
            value: value(index),
        });
    }

    warn!(
        "narrowing {} element buffer to 32 bits: value {} at index {} (and possibly more) wraps",
        v.len(),
        value(index),
        index
    );
    Ok(())
}

macro_rules! impl_from_vec {
    ($t: ty, $variant: ident) => {
        impl From<Vec<$t>> for DataBuffer {
            fn from(v: Vec<$t>) -> Self {
                DataBuffer::$variant(v)
            }
        }
    };
}

impl_from_vec!(i8, I8);
impl_from_vec!(i16, I16);
impl_from_vec!(i32, I32);
impl_from_vec!(i64, I64);
impl_from_vec!(u8, U8);
impl_from_vec!(u16, U16);
impl_from_vec!(u32, U32);
impl_from_vec!(u64, U64);
impl_from_vec!(f32, F32);
impl_from_vec!(f64, F64);
