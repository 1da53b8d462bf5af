//! Functions and utilities for working with [ndarray] objects.

use crate::element::Element;
use crate::error::DapError;
use crate::models::{DType, Slice};
use crate::types::{DValue, TryFromDValue};

use core::convert::TryFrom;
use ndarray::{ArcArray, IxDyn};

/// Materialized data of an atomic variable
///
/// Each variant holds a dynamically shaped, reference counted [ndarray] array. Slicing produces
/// views over the same buffer, and mutation goes through copy-on-write, so a view never
/// corrupts the array it was taken from.
#[derive(Clone, Debug, PartialEq)]
pub enum DapArray {
    Byte(ArcArray<u8, IxDyn>),
    Int8(ArcArray<i8, IxDyn>),
    Int16(ArcArray<i16, IxDyn>),
    UInt16(ArcArray<u16, IxDyn>),
    Int32(ArcArray<i32, IxDyn>),
    UInt32(ArcArray<u32, IxDyn>),
    Int64(ArcArray<i64, IxDyn>),
    UInt64(ArcArray<u64, IxDyn>),
    Float32(ArcArray<f32, IxDyn>),
    Float64(ArcArray<f64, IxDyn>),
    /// Strings and URLs
    String(ArcArray<String, IxDyn>),
}

/// Evaluate an expression on the typed array inside any variant.
macro_rules! with_array {
    ($array:expr, $a:ident => $body:expr) => {
        match $array {
            DapArray::Byte($a) => $body,
            DapArray::Int8($a) => $body,
            DapArray::Int16($a) => $body,
            DapArray::UInt16($a) => $body,
            DapArray::Int32($a) => $body,
            DapArray::UInt32($a) => $body,
            DapArray::Int64($a) => $body,
            DapArray::UInt64($a) => $body,
            DapArray::Float32($a) => $body,
            DapArray::Float64($a) => $body,
            DapArray::String($a) => $body,
        }
    };
}

/// Map the typed array inside any variant to a new array of the same variant.
macro_rules! map_array {
    ($array:expr, $a:ident => $body:expr) => {
        match $array {
            DapArray::Byte($a) => DapArray::Byte($body),
            DapArray::Int8($a) => DapArray::Int8($body),
            DapArray::Int16($a) => DapArray::Int16($body),
            DapArray::UInt16($a) => DapArray::UInt16($body),
            DapArray::Int32($a) => DapArray::Int32($body),
            DapArray::UInt32($a) => DapArray::UInt32($body),
            DapArray::Int64($a) => DapArray::Int64($body),
            DapArray::UInt64($a) => DapArray::UInt64($body),
            DapArray::Float32($a) => DapArray::Float32($body),
            DapArray::Float64($a) => DapArray::Float64($body),
            DapArray::String($a) => DapArray::String($body),
        }
    };
}

/// Build a dynamically shaped array from row-major values.
fn from_shape_vec<T>(shape: &[usize], values: Vec<T>) -> Result<ArcArray<T, IxDyn>, DapError> {
    Ok(ArcArray::from_shape_vec(IxDyn(shape), values)?)
}

/// Convert a [Slice] to an [ndarray::SliceInfoElem::Slice].
///
/// Bounds are clamped to the axis length, since ndarray panics on out of bounds slices.
fn to_ndarray_slice(slice: &Slice, length: usize) -> Result<ndarray::SliceInfoElem, DapError> {
    let (start, stop) = slice.resolve(length);
    Ok(ndarray::SliceInfoElem::Slice {
        start: isize::try_from(start)?,
        end: Some(isize::try_from(stop)?),
        step: isize::try_from(slice.step.max(1))?,
    })
}

/// Returns an [ndarray] SliceInfo object corresponding to the selection.
///
/// Dimensions without a slice are selected in full. Every dimension is kept, including those
/// selected with a single index.
pub fn build_slice_info(
    selection: &[Slice],
    shape: &[usize],
) -> Result<ndarray::SliceInfo<Vec<ndarray::SliceInfoElem>, IxDyn, IxDyn>, DapError> {
    let si = shape
        .iter()
        .enumerate()
        .map(|(axis, length)| {
            let slice = selection.get(axis).copied().unwrap_or_else(Slice::full);
            to_ndarray_slice(&slice, *length)
        })
        .collect::<Result<Vec<ndarray::SliceInfoElem>, DapError>>()?;
    Ok(ndarray::SliceInfo::try_from(si)?)
}

impl DapArray {
    /// Build an array from row-major typed values.
    pub fn from_vec<T: Element>(shape: &[usize], values: Vec<T>) -> Result<DapArray, DapError> {
        Ok(T::wrap(from_shape_vec(shape, values)?))
    }

    /// Build a string array from row-major values.
    pub fn from_strings(shape: &[usize], values: Vec<String>) -> Result<DapArray, DapError> {
        Ok(DapArray::String(from_shape_vec(shape, values)?))
    }

    /// Build an array of `dtype` from dynamically typed values.
    pub fn from_values(
        dtype: DType,
        shape: &[usize],
        values: &[DValue],
    ) -> Result<DapArray, DapError> {
        fn convert<T: Element>(shape: &[usize], values: &[DValue]) -> Result<DapArray, DapError> {
            let typed = values
                .iter()
                .map(T::try_from_dvalue)
                .collect::<Result<Vec<T>, DapError>>()?;
            DapArray::from_vec(shape, typed)
        }
        match dtype {
            DType::Byte => convert::<u8>(shape, values),
            DType::Int8 => convert::<i8>(shape, values),
            DType::Int16 => convert::<i16>(shape, values),
            DType::UInt16 => convert::<u16>(shape, values),
            DType::Int32 => convert::<i32>(shape, values),
            DType::UInt32 => convert::<u32>(shape, values),
            DType::Int64 => convert::<i64>(shape, values),
            DType::UInt64 => convert::<u64>(shape, values),
            DType::Float32 => convert::<f32>(shape, values),
            DType::Float64 => convert::<f64>(shape, values),
            DType::String | DType::Url => {
                let typed = values
                    .iter()
                    .map(String::try_from_dvalue)
                    .collect::<Result<Vec<String>, DapError>>()?;
                DapArray::from_strings(shape, typed)
            }
        }
    }

    /// An empty array of `dtype` with a zero length along the first axis of `shape`.
    pub fn empty(dtype: DType, shape: &[usize]) -> Result<DapArray, DapError> {
        let mut shape = shape.to_vec();
        if let Some(first) = shape.first_mut() {
            *first = 0;
        }
        let count: usize = shape.iter().product();
        if dtype.is_string() {
            DapArray::from_strings(&shape, vec![String::new(); count])
        } else {
            DapArray::from_values(dtype, &shape, &vec![DValue::Int(0); count])
        }
    }

    /// Returns the shape of the array.
    pub fn shape(&self) -> &[usize] {
        with_array!(self, a => a.shape())
    }

    /// Returns the number of elements in the array.
    pub fn len(&self) -> usize {
        with_array!(self, a => a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the stored element type can hold values of `dtype`.
    pub fn matches(&self, dtype: DType) -> bool {
        match self {
            DapArray::String(_) => dtype.is_string(),
            _ => self.element_type() == Some(dtype),
        }
    }

    /// The numeric element type, or `None` for strings.
    pub fn element_type(&self) -> Option<DType> {
        let dtype = match self {
            DapArray::Byte(_) => DType::Byte,
            DapArray::Int8(_) => DType::Int8,
            DapArray::Int16(_) => DType::Int16,
            DapArray::UInt16(_) => DType::UInt16,
            DapArray::Int32(_) => DType::Int32,
            DapArray::UInt32(_) => DType::UInt32,
            DapArray::Int64(_) => DType::Int64,
            DapArray::UInt64(_) => DType::UInt64,
            DapArray::Float32(_) => DType::Float32,
            DapArray::Float64(_) => DType::Float64,
            DapArray::String(_) => return None,
        };
        Some(dtype)
    }

    /// Slice the array, keeping every dimension.
    ///
    /// The result is a view sharing this array's buffer.
    pub fn slice(&self, selection: &[Slice]) -> Result<DapArray, DapError> {
        if selection.len() > self.shape().len() {
            return Err(DapError::InvalidHyperslab(format!(
                "{} slices for an array of {} dimensions",
                selection.len(),
                self.shape().len()
            )));
        }
        let info = build_slice_info(selection, self.shape())?;
        Ok(map_array!(self, a => a.clone().slice_move(&info)))
    }

    /// Copy the array into a new buffer.
    pub fn deep_copy(&self) -> DapArray {
        map_array!(self, a => a.to_owned().into_shared())
    }

    /// Values in logical row-major order.
    pub fn values(&self) -> Vec<DValue> {
        with_array!(self, a => a.iter().cloned().map(DValue::from).collect())
    }

    /// Numeric elements in logical row-major order.
    pub fn elements<T: Element>(&self) -> Option<Vec<T>> {
        T::unwrap(self).map(|a| a.iter().copied().collect())
    }

    /// String elements in logical row-major order.
    pub fn strings(&self) -> Option<Vec<&str>> {
        match self {
            DapArray::String(a) => Some(a.iter().map(String::as_str).collect()),
            _ => None,
        }
    }
}
