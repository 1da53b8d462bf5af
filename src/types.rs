pub mod attributes;
pub mod dvalue;

// Re-export types for convenience.
pub use crate::types::attributes::{AttrValue, Attributes};
pub use crate::types::dvalue::{DValue, TryFromDValue};
