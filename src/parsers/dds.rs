//! Recursive descent parser for the DAP2 Dataset Descriptor Structure.
//!
//! ```text
//! Dataset {
//!     Int32 a[x = 10];
//!     Structure { ... } s;
//!     Sequence { ... } seq;
//!     Grid { Array: <base> Maps: <base>* } g;
//! } name;
//! ```

use crate::error::DapError;
use crate::model::{unquote, BaseType, Container, DapNode, Dataset, Sequence, SequenceData};
use crate::models::{element_count, DType};
use crate::parsers::SimpleParser;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref WORD: Regex = Regex::new(r"^\w+").unwrap();
    static ref NAME: Regex = Regex::new(r"^[^;\[\]{}]+").unwrap();
    static ref DIMENSION: Regex = Regex::new(r"^[^\]]+").unwrap();
    static ref DATASET_NAME: Regex = Regex::new(r"^[^;]+").unwrap();
}

/// Parse a DDS into a dataless [Dataset].
#[tracing::instrument(level = "DEBUG", skip(text))]
pub fn parse_dds(text: &str) -> Result<Dataset, DapError> {
    let mut parser = SimpleParser::new(text, "DDS");
    parser.consume_literal("dataset")?;
    parser.consume_literal("{")?;
    let members = declarations(&mut parser)?;
    parser.consume_literal("}")?;
    let name = parser.consume(&DATASET_NAME, "dataset name")?.trim();
    parser.consume_literal(";")?;
    if !parser.is_empty() {
        return Err(parser.error("unexpected text after dataset"));
    }

    let mut dataset = Dataset::new(&unquote(name));
    for member in members {
        dataset.insert(member);
    }
    Ok(dataset)
}

/// Parse declarations up to the closing brace of the enclosing block.
fn declarations(parser: &mut SimpleParser) -> Result<Vec<DapNode>, DapError> {
    let mut members = vec![];
    while !parser.peek_literal("}") {
        if parser.is_empty() {
            return Err(parser.error("unexpected end of DDS"));
        }
        members.push(declaration(parser)?);
    }
    Ok(members)
}

fn declaration(parser: &mut SimpleParser) -> Result<DapNode, DapError> {
    let keyword = parser
        .peek(&WORD)
        .ok_or_else(|| parser.error("expected a declaration"))?;
    match keyword.to_ascii_lowercase().as_str() {
        "structure" => Ok(DapNode::Structure(constructor(parser, "structure")?)),
        "sequence" => Ok(DapNode::Sequence(Sequence {
            container: constructor(parser, "sequence")?,
            data: SequenceData::None,
        })),
        "grid" => grid(parser),
        _ => Ok(DapNode::Base(base(parser)?)),
    }
}

/// Parse `<keyword> { <decl>* } <name>;`.
fn constructor(parser: &mut SimpleParser, keyword: &str) -> Result<Container, DapError> {
    parser.consume_literal(keyword)?;
    parser.consume_literal("{")?;
    let members = declarations(parser)?;
    parser.consume_literal("}")?;
    let name = parser.consume(&NAME, "name")?.trim();
    parser.consume_literal(";")?;

    let mut container = Container::new(&unquote(name));
    for member in members {
        container.insert(member);
    }
    Ok(container)
}

fn grid(parser: &mut SimpleParser) -> Result<DapNode, DapError> {
    parser.consume_literal("grid")?;
    parser.consume_literal("{")?;
    parser.consume_literal("array")?;
    parser.consume_literal(":")?;
    let array = base(parser)?;
    parser.consume_literal("maps")?;
    parser.consume_literal(":")?;
    let mut maps = vec![];
    while !parser.peek_literal("}") {
        if parser.is_empty() {
            return Err(parser.error("unexpected end of DDS"));
        }
        maps.push(base(parser)?);
    }
    parser.consume_literal("}")?;
    let name = parser.consume(&NAME, "name")?.trim();
    parser.consume_literal(";")?;
    Ok(crate::model::grid(&unquote(name), array, maps))
}

/// Parse `<type> <name>[<dim>]*;`.
fn base(parser: &mut SimpleParser) -> Result<BaseType, DapError> {
    let type_name = parser
        .peek(&WORD)
        .ok_or_else(|| parser.error("expected a type"))?;
    let dtype = DType::from_name(type_name)
        .ok_or_else(|| parser.error(format!("unknown type {}", type_name)))?;
    parser.consume(&WORD, "type")?;
    let name = parser.consume(&NAME, "name")?.trim();

    let mut shape = vec![];
    let mut dims = vec![];
    while parser.peek_literal("[") {
        parser.consume_literal("[")?;
        let dimension = parser.consume(&DIMENSION, "dimension")?;
        let (dim_name, size) = match dimension.split_once('=') {
            Some((dim_name, size)) => (unquote(dim_name.trim()), size),
            None => (String::new(), dimension),
        };
        let size = size
            .trim()
            .parse::<usize>()
            .map_err(|_| parser.error(format!("invalid dimension size {}", size.trim())))?;
        parser.consume_literal("]")?;
        shape.push(size);
        dims.push(dim_name);
    }
    if element_count(&shape).is_none() {
        return Err(parser.error(format!("too many elements in {}", name.trim())));
    }
    parser.consume_literal(";")?;

    // Anonymous dimensions are only recorded alongside named ones.
    if dims.iter().all(String::is_empty) {
        dims.clear();
    }
    Ok(BaseType::new(&unquote(name), dtype, shape).with_dims(dims))
}
