//! Writers for the DAP metadata and text responses.
//!
//! Each writer is a single recursive `match` over [DapNode](crate::model::DapNode) variants.

pub mod ascii;
pub mod das;
pub mod dds;
pub mod dmr;

pub use ascii::render_ascii;
pub use das::render_das;
pub use dds::render_dds;
pub use dmr::render_dmr;

use crate::models::DType;
use crate::types::DValue;

/// Indentation unit of the text responses.
pub(crate) const INDENT: &str = "    ";

pub(crate) fn indent(level: usize) -> String {
    INDENT.repeat(level)
}

/// Narrowest type able to hold every value of an attribute.
///
/// Attribute values carry no declared type, so writers infer one: any string makes the
/// attribute a String, any float makes it a Float64, and integers use 32 bits when every
/// value fits.
pub(crate) fn infer_type(values: &[DValue]) -> DType {
    if values.iter().any(|value| matches!(value, DValue::Str(_))) {
        return DType::String;
    }
    if values.iter().any(|value| matches!(value, DValue::Float(_))) {
        return DType::Float64;
    }
    let signed = values.iter().any(|value| matches!(value, DValue::Int(_)));
    let fits_32 = values.iter().all(|value| match value {
        DValue::Int(v) => i32::try_from(*v).is_ok(),
        DValue::UInt(v) if signed => i32::try_from(*v).is_ok(),
        DValue::UInt(v) => u32::try_from(*v).is_ok(),
        _ => true,
    });
    match (signed, fits_32) {
        (true, true) => DType::Int32,
        (true, false) => DType::Int64,
        (false, true) => DType::UInt32,
        (false, false) => DType::UInt64,
    }
}

/// Text form of an attribute value, re-parseable by the DAS parser.
///
/// Floats use the shortest representation that parses back to the same value.
pub(crate) fn format_value(value: &DValue) -> String {
    match value {
        DValue::Float(v) => format!("{:?}", v),
        value => value.to_string(),
    }
}
