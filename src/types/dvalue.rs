//! Data value representing a single value of any [DType](crate::models::DType)

use crate::error::DapError;

use std::cmp::Ordering;
use std::fmt;

/// A single value of any DType.
///
/// Integers keep their signedness so that the full range of [u64] and [i64] is representable.
/// Unlike JSON numbers, floats may be NaN or infinite, since both occur in real attribute
/// metadata.
#[derive(Clone, Debug, PartialEq)]
pub enum DValue {
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
}

impl DValue {
    /// Whether this value is numeric.
    pub fn is_number(&self) -> bool {
        !matches!(self, DValue::Str(_))
    }

    /// Parse a numeric literal.
    ///
    /// Accepts decimal and `0x` hexadecimal integers and floats. `nan` and `nan.` parse as NaN
    /// and `inf` as infinity, case-insensitively and with an optional sign.
    pub fn parse_number(token: &str) -> Option<DValue> {
        let token = token.trim();
        let (negative, unsigned) = match token.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, token.strip_prefix('+').unwrap_or(token)),
        };
        let lower = unsigned.to_ascii_lowercase();
        match lower.as_str() {
            "nan" | "nan." => return Some(DValue::Float(f64::NAN)),
            "inf" | "infinity" => {
                let inf = if negative {
                    f64::NEG_INFINITY
                } else {
                    f64::INFINITY
                };
                return Some(DValue::Float(inf));
            }
            _ => (),
        }
        if let Some(hex) = lower.strip_prefix("0x") {
            let magnitude = u64::from_str_radix(hex, 16).ok()?;
            return Some(Self::from_magnitude(negative, magnitude));
        }
        if !lower.is_empty() && lower.bytes().all(|b| b.is_ascii_digit()) {
            let magnitude = lower.parse::<u64>().ok()?;
            return Some(Self::from_magnitude(negative, magnitude));
        }
        token.parse::<f64>().ok().map(DValue::Float)
    }

    fn from_magnitude(negative: bool, magnitude: u64) -> DValue {
        if negative {
            match i64::try_from(magnitude) {
                Ok(value) => DValue::Int(-value),
                Err(_) if magnitude == i64::MIN.unsigned_abs() => DValue::Int(i64::MIN),
                Err(_) => DValue::Float(-(magnitude as f64)),
            }
        } else {
            match i64::try_from(magnitude) {
                Ok(value) => DValue::Int(value),
                Err(_) => DValue::UInt(magnitude),
            }
        }
    }

    /// Parse a selection operand literal: a number, or a string in double quotes.
    pub fn parse_literal(token: &str) -> Option<DValue> {
        let token = token.trim();
        if token.len() >= 2 && token.starts_with('"') && token.ends_with('"') {
            return Some(DValue::Str(token[1..token.len() - 1].to_string()));
        }
        Self::parse_number(token)
    }

    /// Compare two values.
    ///
    /// Numbers compare with numbers and strings with strings; mixing the two is an error, never
    /// an implicit coercion. Returns `Ok(None)` when either number is NaN.
    pub fn try_cmp(&self, other: &DValue) -> Result<Option<Ordering>, DapError> {
        use DValue::*;
        let ordering = match (self, other) {
            (Str(a), Str(b)) => Some(a.cmp(b)),
            (Int(a), Int(b)) => Some(a.cmp(b)),
            (UInt(a), UInt(b)) => Some(a.cmp(b)),
            (Int(a), UInt(b)) => Some(i128::from(*a).cmp(&i128::from(*b))),
            (UInt(a), Int(b)) => Some(i128::from(*a).cmp(&i128::from(*b))),
            (Str(_), _) | (_, Str(_)) => {
                return Err(DapError::TypeMismatch {
                    left: self.describe(),
                    right: other.describe(),
                })
            }
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        };
        Ok(ordering)
    }

    /// Numeric value as a float. Strings are NaN.
    pub fn as_f64(&self) -> f64 {
        match self {
            DValue::Int(v) => *v as f64,
            DValue::UInt(v) => *v as f64,
            DValue::Float(v) => *v,
            DValue::Str(_) => f64::NAN,
        }
    }

    /// Short description used in error messages.
    pub fn describe(&self) -> String {
        match self {
            DValue::Str(s) => format!("string \"{}\"", s),
            value => format!("number {}", value),
        }
    }
}

impl fmt::Display for DValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DValue::Int(v) => write!(f, "{}", v),
            DValue::UInt(v) => write!(f, "{}", v),
            DValue::Float(v) => write!(f, "{}", v),
            DValue::Str(v) => f.write_str(v),
        }
    }
}

macro_rules! impl_from_for_dvalue {
    ($variant:ident, $($t:ty),*) => {
        $(
            impl From<$t> for DValue {
                fn from(value: $t) -> Self {
                    DValue::$variant(value.into())
                }
            }
        )*
    };
}

impl_from_for_dvalue!(Int, i8, i16, i32, i64);
impl_from_for_dvalue!(UInt, u8, u16, u32, u64);
impl_from_for_dvalue!(Float, f32, f64);
impl_from_for_dvalue!(Str, String, &str);

fn incompatible(value: &DValue, dtype: &'static str) -> DapError {
    DapError::IncompatibleValue {
        value: value.to_string(),
        dtype,
    }
}

/// Attempt to convert from a [DValue] to a specific element type.
// This trait exists because we can't implement TryFrom<DValue> for numeric types because the trait
// and type are in external crates.
pub trait TryFromDValue: Sized {
    /// Try to convert from a [DValue] to an element type.
    fn try_from_dvalue(value: &DValue) -> Result<Self, DapError>;
}

macro_rules! impl_try_from_dvalue_int {
    ($($t:ty),*) => {
        $(
            impl TryFromDValue for $t {
                fn try_from_dvalue(value: &DValue) -> Result<Self, DapError> {
                    let converted = match value {
                        DValue::Int(v) => Self::try_from(*v).ok(),
                        DValue::UInt(v) => Self::try_from(*v).ok(),
                        _ => None,
                    };
                    converted.ok_or_else(|| incompatible(value, stringify!($t)))
                }
            }
        )*
    };
}

impl_try_from_dvalue_int!(i8, u8, i16, u16, i32, u32, i64, u64);

impl TryFromDValue for f32 {
    fn try_from_dvalue(value: &DValue) -> Result<Self, DapError> {
        if !value.is_number() {
            return Err(incompatible(value, "f32"));
        }
        let float = value.as_f64();
        // Finite values too large to be represented as an f32 would become infinity.
        let narrowed = float as f32;
        if float.is_finite() && !narrowed.is_finite() {
            Err(incompatible(value, "f32"))
        } else {
            Ok(narrowed)
        }
    }
}

impl TryFromDValue for f64 {
    fn try_from_dvalue(value: &DValue) -> Result<Self, DapError> {
        if value.is_number() {
            Ok(value.as_f64())
        } else {
            Err(incompatible(value, "f64"))
        }
    }
}

impl TryFromDValue for String {
    fn try_from_dvalue(value: &DValue) -> Result<Self, DapError> {
        match value {
            DValue::Str(s) => Ok(s.clone()),
            _ => Err(incompatible(value, "String")),
        }
    }
}
