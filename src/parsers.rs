//! Metadata parsers for the DDS, DAS and DMR documents.

pub mod das;
pub mod dds;
pub mod dmr;

pub use das::{add_attributes, parse_das};
pub use dds::parse_dds;
pub use dmr::parse_dmr;

use crate::error::DapError;
use crate::models::DType;
use crate::types::{DValue, TryFromDValue};

use regex::Regex;

/// A minimal tokenizer for the whitespace-insensitive DAP2 grammars.
///
/// Patterns passed to [SimpleParser::peek] and [SimpleParser::consume] must be anchored with
/// `^`. Leading whitespace is skipped before every token.
pub struct SimpleParser<'a> {
    buffer: &'a str,
    what: &'static str,
}

impl<'a> SimpleParser<'a> {
    /// Return a new parser over `input`, reporting errors as errors parsing `what`.
    pub fn new(input: &'a str, what: &'static str) -> Self {
        SimpleParser {
            buffer: input,
            what,
        }
    }

    fn skip_whitespace(&mut self) {
        self.buffer = self.buffer.trim_start();
    }

    /// Whether only whitespace remains.
    pub fn is_empty(&mut self) -> bool {
        self.skip_whitespace();
        self.buffer.is_empty()
    }

    /// An error naming the unconsumed input.
    pub fn error(&self, message: impl Into<String>) -> DapError {
        DapError::parse(self.what, message, self.buffer)
    }

    /// Return the next token matching `pattern` without consuming it.
    pub fn peek(&mut self, pattern: &Regex) -> Option<&'a str> {
        self.skip_whitespace();
        let buffer = self.buffer;
        pattern.find(buffer).map(|m| &buffer[m.start()..m.end()])
    }

    /// Consume the next token, which must match `pattern`.
    pub fn consume(&mut self, pattern: &Regex, expected: &str) -> Result<&'a str, DapError> {
        let token = self
            .peek(pattern)
            .ok_or_else(|| self.error(format!("expected {}", expected)))?;
        self.buffer = &self.buffer[token.len()..];
        Ok(token)
    }

    /// Whether the next token is `literal`, compared case-insensitively.
    pub fn peek_literal(&mut self, literal: &str) -> bool {
        self.skip_whitespace();
        self.buffer
            .get(..literal.len())
            .map_or(false, |head| head.eq_ignore_ascii_case(literal))
    }

    /// Consume `literal`, compared case-insensitively.
    pub fn consume_literal(&mut self, literal: &str) -> Result<(), DapError> {
        if !self.peek_literal(literal) {
            return Err(self.error(format!("expected \"{}\"", literal)));
        }
        self.buffer = &self.buffer[literal.len()..];
        Ok(())
    }
}

/// Convert a parsed attribute value to its declared type.
///
/// NaN and infinities are accepted for any numeric type. Integers out of range for their
/// declared type, or floats declared as integers, are rejected.
pub(crate) fn convert_attribute(dtype: DType, value: DValue) -> Result<DValue, DapError> {
    if let DValue::Float(float) = value {
        if !float.is_finite() {
            return Ok(value);
        }
    }
    let converted: DValue = match dtype {
        DType::Byte => u8::try_from_dvalue(&value)?.into(),
        DType::Int8 => i8::try_from_dvalue(&value)?.into(),
        DType::Int16 => i16::try_from_dvalue(&value)?.into(),
        DType::UInt16 => u16::try_from_dvalue(&value)?.into(),
        DType::Int32 => i32::try_from_dvalue(&value)?.into(),
        DType::UInt32 => u32::try_from_dvalue(&value)?.into(),
        DType::Int64 => i64::try_from_dvalue(&value)?.into(),
        DType::UInt64 => u64::try_from_dvalue(&value)?.into(),
        DType::Float32 => {
            f32::try_from_dvalue(&value)?;
            DValue::Float(value.as_f64())
        }
        DType::Float64 => DValue::Float(f64::try_from_dvalue(&value)?),
        DType::String | DType::Url => value,
    };
    Ok(converted)
}

/// Parse one textual attribute value of the declared type.
///
/// Strings lose their surrounding double quotes and are otherwise kept verbatim.
pub(crate) fn parse_attribute_value(dtype: DType, token: &str) -> Result<DValue, DapError> {
    let token = token.trim();
    if dtype.is_string() {
        let unquoted = if token.len() >= 2 && token.starts_with('"') && token.ends_with('"') {
            &token[1..token.len() - 1]
        } else {
            token
        };
        return Ok(DValue::Str(unquoted.to_string()));
    }
    let value = DValue::parse_number(token).ok_or_else(|| DapError::IncompatibleValue {
        value: token.to_string(),
        dtype: "number",
    })?;
    convert_attribute(dtype, value)
}
