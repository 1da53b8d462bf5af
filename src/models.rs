//! Data types and associated functions and methods

use crate::error::DapError;

use std::fmt;
use std::ops::BitAnd;
use strum_macros::Display;

/// DAP atomic data types
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum DType {
    /// [u8]
    Byte,
    /// [i8]
    Int8,
    /// [i16]
    Int16,
    /// [u16]
    UInt16,
    /// [i32]
    Int32,
    /// [u32]
    UInt32,
    /// [i64]
    Int64,
    /// [u64]
    UInt64,
    /// [f32]
    Float32,
    /// [f64]
    Float64,
    /// Opaque byte string
    String,
    /// Opaque byte string holding a URL
    Url,
}

impl DType {
    /// Look up a type by its DDS, DAS or DMR name.
    ///
    /// Names are case-insensitive. `int` and `uint` are aliases for the 32-bit types, and the
    /// DAP4 `UInt8` and `Char` types map onto [DType::Byte].
    pub fn from_name(name: &str) -> Option<Self> {
        let dtype = match name.to_ascii_lowercase().as_str() {
            "byte" | "uint8" | "char" => Self::Byte,
            "int8" => Self::Int8,
            "int16" => Self::Int16,
            "uint16" => Self::UInt16,
            "int" | "int32" => Self::Int32,
            "uint" | "uint32" => Self::UInt32,
            "int64" => Self::Int64,
            "uint64" => Self::UInt64,
            "float32" => Self::Float32,
            "float64" => Self::Float64,
            "string" => Self::String,
            "url" => Self::Url,
            _ => return None,
        };
        Some(dtype)
    }

    /// Returns the size in bytes of one element on the wire, or `None` for variable length
    /// strings.
    ///
    /// 16-bit integers are promoted to 32 bits by XDR. Bytes are packed, with padding applied to
    /// the whole block.
    pub fn wire_size(self) -> Option<usize> {
        match self {
            Self::Byte | Self::Int8 => Some(1),
            Self::Int16 | Self::UInt16 | Self::Int32 | Self::UInt32 | Self::Float32 => Some(4),
            Self::Int64 | Self::UInt64 | Self::Float64 => Some(8),
            Self::String | Self::Url => None,
        }
    }

    /// Whether values of this type are strings.
    pub fn is_string(self) -> bool {
        matches!(self, Self::String | Self::Url)
    }

    /// Whether values of this type are floating point numbers.
    pub fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Whether values of this type are unsigned integers.
    pub fn is_unsigned(self) -> bool {
        matches!(self, Self::Byte | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }
}

/// A slice of a single dimension of an array
///
/// Slices use half-open semantics internally: `start <= i < stop`, in increments of `step`.
/// An absent `stop` is open and runs to the end of the dimension. The DAP hyperslab syntax
/// `[start:step:last]` uses an inclusive last index, see [Slice::from_hyperslab] and
/// [hyperslab].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Slice {
    /// Start of the slice
    pub start: usize,
    /// End of the slice (exclusive)
    pub stop: Option<usize>,
    /// Stride size
    pub step: usize,
}

impl Slice {
    /// Return a new Slice object.
    pub fn new(start: usize, stop: Option<usize>, step: usize) -> Self {
        Slice { start, stop, step }
    }

    /// A slice covering a whole dimension.
    pub fn full() -> Self {
        Slice::new(0, None, 1)
    }

    /// A slice selecting a single index while keeping the dimension.
    pub fn index(index: usize) -> Self {
        Slice::new(index, Some(index + 1), 1)
    }

    /// Build a slice from the inclusive bounds of a hyperslab clause.
    pub fn from_hyperslab(start: usize, step: usize, last: usize) -> Self {
        Slice::new(start, Some(last + 1), step)
    }

    /// Whether this slice selects the whole of any dimension.
    pub fn is_full(&self) -> bool {
        self.start == 0 && self.stop.is_none() && self.step == 1
    }

    /// Resolve the slice against a dimension of `length` elements.
    ///
    /// Returns `(start, stop)` clamped so that `start <= stop <= length`.
    pub fn resolve(&self, length: usize) -> (usize, usize) {
        let stop = self.stop.map_or(length, |stop| stop.min(length));
        let start = self.start.min(stop);
        (start, stop)
    }

    /// Number of elements selected from a dimension of `length` elements.
    pub fn len(&self, length: usize) -> usize {
        let (start, stop) = self.resolve(length);
        let step = self.step.max(1);
        (stop - start + step - 1) / step
    }

    /// Indices selected from a dimension of `length` elements.
    pub fn indices(&self, length: usize) -> impl Iterator<Item = usize> {
        let (start, stop) = self.resolve(length);
        (start..stop).step_by(self.step.max(1))
    }

    /// Compose two slices.
    ///
    /// The result selects from the raw dimension exactly what applying `self` and then `inner`
    /// would select. Offsets add, steps multiply and the more restrictive of the two stops
    /// wins. An open inner stop keeps the outer stop, and an open outer stop with a bounded
    /// inner stop yields `start + inner.stop * step`.
    pub fn compose(&self, inner: &Slice) -> Slice {
        let start = self.start + inner.start * self.step;
        let step = self.step * inner.step;
        let stop = match (self.stop, inner.stop) {
            (Some(outer), Some(inner_stop)) => Some(outer.min(self.start + inner_stop * self.step)),
            (Some(outer), None) => Some(outer),
            (None, Some(inner_stop)) => Some(self.start + inner_stop * self.step),
            (None, None) => None,
        };
        Slice { start, stop, step }
    }
}

/// Number of elements in an array of `shape`, or `None` if it overflows `usize`.
pub fn element_count(shape: &[usize]) -> Option<usize> {
    shape
        .iter()
        .try_fold(1usize, |count, &length| count.checked_mul(length))
}

/// Compose one slice per dimension, filling missing dimensions with full slices.
pub fn compose_slices(outer: &[Slice], inner: &[Slice]) -> Vec<Slice> {
    let ndim = outer.len().max(inner.len());
    (0..ndim)
        .map(|i| {
            let a = outer.get(i).copied().unwrap_or_else(Slice::full);
            let b = inner.get(i).copied().unwrap_or_else(Slice::full);
            a.compose(&b)
        })
        .collect()
}

/// Render a hyperslab constraint for a selection on an array of the given shape.
///
/// Trailing full slices are omitted. Returns `None` if any dimension selects nothing, since
/// the hyperslab syntax cannot express an empty selection.
pub fn hyperslab(slices: &[Slice], shape: &[usize]) -> Option<String> {
    let keep = slices
        .iter()
        .rposition(|slice| !slice.is_full())
        .map_or(0, |position| position + 1);
    let mut out = String::new();
    for (slice, length) in slices.iter().zip(shape).take(keep) {
        let (start, stop) = slice.resolve(*length);
        if stop <= start {
            return None;
        }
        let last = start + (slice.len(*length) - 1) * slice.step;
        out.push_str(&format!("[{}:{}:{}]", start, slice.step, last));
    }
    Some(out)
}

/// A serialized boolean predicate on remote data, e.g. `cast.lon>100`
///
/// Constraint expressions can be combined with a logical AND. The protocol has no logical OR.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConstraintExpression(String);

impl ConstraintExpression {
    /// Return a new ConstraintExpression.
    pub fn new(text: impl Into<String>) -> Self {
        ConstraintExpression(text.into())
    }

    /// The serialized predicate.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Individual predicates joined by this expression.
    pub fn clauses(&self) -> impl Iterator<Item = &str> {
        self.0.split('&').filter(|clause| !clause.is_empty())
    }

    /// Combine two expressions with a logical AND.
    pub fn and(&self, other: &ConstraintExpression) -> ConstraintExpression {
        ConstraintExpression(format!("{}&{}", self.0, other.0))
    }

    /// Logical OR always fails: DAP selections cannot express it.
    pub fn or(&self, other: &ConstraintExpression) -> Result<ConstraintExpression, DapError> {
        Err(DapError::DisallowedOr(format!("{}|{}", self.0, other.0)))
    }
}

impl BitAnd for ConstraintExpression {
    type Output = ConstraintExpression;

    fn bitand(self, rhs: Self) -> Self::Output {
        self.and(&rhs)
    }
}

impl fmt::Display for ConstraintExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
