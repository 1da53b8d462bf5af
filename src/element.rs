//! Numeric array elements and their XDR encoding.

use crate::array::DapArray;
use crate::error::DapError;
use crate::models::DType;
use crate::types::{DValue, TryFromDValue};

use bytes::{Buf, BufMut};
use ndarray::{ArcArray, IxDyn};

/// Trait for numeric array elements.
///
/// Each implementation knows its [DType], its size on the wire and how to move between the
/// typed [ndarray] storage of a [DapArray] and the dynamically typed [DValue].
pub trait Element:
    Clone
    + Copy
    + PartialOrd
    + std::fmt::Debug
    + Send
    + Sync
    + num_traits::ToPrimitive
    + TryFromDValue
    + Into<DValue>
    + 'static
{
    /// The DAP type stored by this element.
    const DTYPE: DType;

    /// Size of one element on the wire.
    const XDR_SIZE: usize;

    /// Append one element in XDR encoding.
    fn put_xdr(self, buf: &mut impl BufMut);

    /// Read one element in XDR encoding. `buf` must hold at least `XDR_SIZE` bytes.
    fn get_xdr(buf: &mut impl Buf) -> Self;

    /// Wrap typed storage in a [DapArray].
    fn wrap(array: ArcArray<Self, IxDyn>) -> DapArray;

    /// Borrow the typed storage of a [DapArray] holding this element type.
    fn unwrap(array: &DapArray) -> Option<&ArcArray<Self, IxDyn>>;
}

macro_rules! impl_element {
    ($t:ty, $dtype:ident, $size:expr, $put:ident, $get:ident, $wire:ty) => {
        impl Element for $t {
            const DTYPE: DType = DType::$dtype;
            const XDR_SIZE: usize = $size;

            fn put_xdr(self, buf: &mut impl BufMut) {
                buf.$put(self as $wire);
            }

            fn get_xdr(buf: &mut impl Buf) -> Self {
                buf.$get() as $t
            }

            fn wrap(array: ArcArray<Self, IxDyn>) -> DapArray {
                DapArray::$dtype(array)
            }

            fn unwrap(array: &DapArray) -> Option<&ArcArray<Self, IxDyn>> {
                match array {
                    DapArray::$dtype(array) => Some(array),
                    _ => None,
                }
            }
        }
    };
}

// Bytes are packed. 16-bit integers are promoted to 32 bits.
impl_element!(u8, Byte, 1, put_u8, get_u8, u8);
impl_element!(i8, Int8, 1, put_i8, get_i8, i8);
impl_element!(i16, Int16, 4, put_i32, get_i32, i32);
impl_element!(u16, UInt16, 4, put_u32, get_u32, u32);
impl_element!(i32, Int32, 4, put_i32, get_i32, i32);
impl_element!(u32, UInt32, 4, put_u32, get_u32, u32);
impl_element!(i64, Int64, 8, put_i64, get_i64, i64);
impl_element!(u64, UInt64, 8, put_u64, get_u64, u64);
impl_element!(f32, Float32, 4, put_f32, get_f32, f32);
impl_element!(f64, Float64, 8, put_f64, get_f64, f64);

/// Trait for operations over arrays of any numeric element type.
///
/// This trait provides an entry point into the type system based on the runtime `dtype` value.
pub trait NumVisitor {
    type Output;

    fn visit<T: Element>(self) -> Result<Self::Output, DapError>;
}

/// Dispatch a [NumVisitor] on a runtime [DType].
///
/// Strings have no numeric element type and produce a [DapError::UnsupportedOperation].
pub fn dispatch<V: NumVisitor>(dtype: DType, visitor: V) -> Result<V::Output, DapError> {
    match dtype {
        DType::Byte => visitor.visit::<u8>(),
        DType::Int8 => visitor.visit::<i8>(),
        DType::Int16 => visitor.visit::<i16>(),
        DType::UInt16 => visitor.visit::<u16>(),
        DType::Int32 => visitor.visit::<i32>(),
        DType::UInt32 => visitor.visit::<u32>(),
        DType::Int64 => visitor.visit::<i64>(),
        DType::UInt64 => visitor.visit::<u64>(),
        DType::Float32 => visitor.visit::<f32>(),
        DType::Float64 => visitor.visit::<f64>(),
        DType::String | DType::Url => Err(DapError::UnsupportedOperation {
            operation: "numeric dispatch",
            kind: "String",
            id: dtype.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<T: Element + PartialEq>(value: T, expected: &[u8]) {
        let mut buf = Vec::new();
        value.put_xdr(&mut buf);
        assert_eq!(expected, buf.as_slice());
        assert_eq!(T::XDR_SIZE, buf.len());
        assert_eq!(value, T::get_xdr(&mut buf.as_slice()));
    }

    #[test]
    fn xdr_u8() {
        roundtrip(0xab_u8, &[0xab]);
    }

    #[test]
    fn xdr_i16_promoted() {
        roundtrip(-2_i16, &[0xff, 0xff, 0xff, 0xfe]);
    }

    #[test]
    fn xdr_u16_promoted() {
        roundtrip(0x0102_u16, &[0, 0, 1, 2]);
    }

    #[test]
    fn xdr_i32() {
        roundtrip(0x01020304_i32, &[1, 2, 3, 4]);
    }

    #[test]
    fn xdr_u64() {
        roundtrip(0x0102030405060708_u64, &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn xdr_f32() {
        roundtrip(1.5_f32, &[0x3f, 0xc0, 0, 0]);
    }

    #[test]
    fn xdr_f64() {
        roundtrip(-2.0_f64, &[0xc0, 0, 0, 0, 0, 0, 0, 0]);
    }

    struct SizeOf;

    impl NumVisitor for SizeOf {
        type Output = usize;

        fn visit<T: Element>(self) -> Result<usize, DapError> {
            Ok(T::XDR_SIZE)
        }
    }

    #[test]
    fn dispatch_numeric() {
        assert_eq!(4, dispatch(DType::UInt16, SizeOf).unwrap());
        assert_eq!(8, dispatch(DType::Float64, SizeOf).unwrap());
    }

    #[test]
    fn dispatch_string_fails() {
        assert!(dispatch(DType::String, SizeOf).is_err());
    }
}
