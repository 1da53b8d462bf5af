//! Parser for the DAP2 Dataset Attribute Structure, and merging of attributes into a dataset.

use crate::error::DapError;
use crate::model::Dataset;
use crate::models::DType;
use crate::parsers::{parse_attribute_value, SimpleParser};
use crate::types::{AttrValue, Attributes, DValue};

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref WORD: Regex = Regex::new(r"^\w+").unwrap();
    static ref CONTAINER: Regex = Regex::new(r"^[^\s{};]+\s*\{").unwrap();
    static ref CONTAINER_NAME: Regex = Regex::new(r"^[^\s{};]+").unwrap();
    static ref ATTRIBUTE_NAME: Regex = Regex::new(r"^[^\s;,]+").unwrap();
    static ref STRING_VALUE: Regex = Regex::new(r#"^(?:"(?:[^"\\]|\\.)*"|[^;,]+)"#).unwrap();
    static ref NUMBER_VALUE: Regex = Regex::new(r"^[^;,\s]+").unwrap();
}

/// Parse a DAS into a tree of attribute containers.
///
/// Container names are kept exactly as written, so that they can be matched against variable
/// ids by [add_attributes].
#[tracing::instrument(level = "DEBUG", skip(text))]
pub fn parse_das(text: &str) -> Result<Attributes, DapError> {
    let mut parser = SimpleParser::new(text, "DAS");
    parser.consume_literal("attributes")?;
    parser.consume_literal("{")?;
    let attributes = body(&mut parser)?;
    parser.consume_literal("}")?;
    if !parser.is_empty() {
        return Err(parser.error("unexpected text after attributes"));
    }
    Ok(attributes)
}

fn body(parser: &mut SimpleParser) -> Result<Attributes, DapError> {
    let mut attributes = Attributes::new();
    while !parser.peek_literal("}") {
        if parser.is_empty() {
            return Err(parser.error("unexpected end of DAS"));
        }
        if parser.peek(&CONTAINER).is_some() {
            let name = parser.consume(&CONTAINER_NAME, "container name")?;
            parser.consume_literal("{")?;
            let inner = body(parser)?;
            parser.consume_literal("}")?;
            attributes.insert(name, inner);
        } else {
            let (name, values) = attribute(parser)?;
            attributes.insert(name, values);
        }
    }
    Ok(attributes)
}

/// Parse `<type> <name> <value>[, <value>]*;`.
fn attribute(parser: &mut SimpleParser) -> Result<(String, Vec<DValue>), DapError> {
    let type_name = parser
        .peek(&WORD)
        .ok_or_else(|| parser.error("expected an attribute type"))?;
    let dtype = DType::from_name(type_name)
        .ok_or_else(|| parser.error(format!("unknown type {}", type_name)))?;
    parser.consume(&WORD, "type")?;
    let name = parser.consume(&ATTRIBUTE_NAME, "attribute name")?;

    let pattern: &Regex = if dtype.is_string() {
        &STRING_VALUE
    } else {
        &NUMBER_VALUE
    };
    let mut values = vec![];
    loop {
        let token = parser
            .peek(pattern)
            .ok_or_else(|| parser.error("expected an attribute value"))?;
        let value = parse_attribute_value(dtype, token)
            .map_err(|err| parser.error(format!("invalid {} value: {}", dtype, err)))?;
        parser.consume(pattern, "attribute value")?;
        values.push(value);
        if parser.peek_literal(",") {
            parser.consume_literal(",")?;
        } else {
            parser.consume_literal(";")?;
            break;
        }
    }
    Ok((name.to_string(), values))
}

/// Remove the attribute container found by following `path` through nested containers.
///
/// Scalar and list attributes are never taken, even when their name matches.
fn take_nested(attributes: &mut Attributes, path: &[&str]) -> Option<Attributes> {
    match path {
        [] => None,
        [last] => {
            if !matches!(attributes.get(last), Some(AttrValue::Container(_))) {
                return None;
            }
            match attributes.remove(last) {
                Some(AttrValue::Container(inner)) => Some(inner),
                _ => None,
            }
        }
        [first, rest @ ..] => match attributes.get_mut(first) {
            Some(AttrValue::Container(inner)) => take_nested(inner, rest),
            _ => None,
        },
    }
}

/// Merge parsed DAS attributes into the nodes of a dataset.
///
/// Nodes are visited deepest first. Each node takes the nested container found by following
/// its path, then the flat container keyed by its exact dotted id; flat values win on
/// conflict. Every DAS entry is used at most once, and whatever remains is added to the
/// dataset's global attributes.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub fn add_attributes(dataset: &mut Dataset, mut attributes: Attributes) {
    let mut ids: Vec<String> = dataset
        .walk()
        .into_iter()
        .map(|node| node.id().to_string())
        .collect();
    ids.sort_by_key(|id| std::cmp::Reverse(id.matches('.').count()));

    for id in ids {
        let path: Vec<&str> = id.split('.').collect();
        let mut merged = take_nested(&mut attributes, &path).unwrap_or_default();
        if path.len() > 1 {
            if let Some(flat) = take_nested(&mut attributes, &[id.as_str()]) {
                merged.update(flat);
            }
        }
        if merged.is_empty() {
            continue;
        }
        if let Some(node) = dataset.find_mut(&id) {
            node.attributes_mut().update(merged);
        }
    }
    dataset.attributes.update(attributes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    #[test]
    fn parse_values() {
        let das = r#"Attributes {
    a {
        String units "meters";
        String comment "one, two; three";
        Float64 range -1.5, 2;
        Int16 missing 0xFF;
        Byte flags 1, 2, 4;
    }
}"#;
        let attributes = parse_das(das).unwrap();
        let a = attributes.get("a").unwrap().as_container().unwrap();
        assert_eq!(
            &AttrValue::Scalar(DValue::Str("meters".to_string())),
            a.get("units").unwrap()
        );
        assert_eq!(
            &AttrValue::Scalar(DValue::Str("one, two; three".to_string())),
            a.get("comment").unwrap()
        );
        assert_eq!(
            &AttrValue::List(vec![DValue::Float(-1.5), DValue::Float(2.0)]),
            a.get("range").unwrap()
        );
        assert_eq!(
            &AttrValue::Scalar(DValue::Int(255)),
            a.get("missing").unwrap()
        );
        assert_eq!(3, a.get("flags").unwrap().values().len());
    }

    #[test]
    fn parse_nan_and_inf() {
        let das = "Attributes { v { Float32 a NaN; Float64 b -nan, nan.; Int32 c -Inf; } }";
        let attributes = parse_das(das).unwrap();
        let v = attributes.get("v").unwrap().as_container().unwrap();
        assert!(v.get("a").unwrap().values()[0].as_f64().is_nan());
        let b = v.get("b").unwrap().values();
        assert_eq!(2, b.len());
        assert!(b.iter().all(|value| value.as_f64().is_nan()));
        assert_eq!(f64::NEG_INFINITY, v.get("c").unwrap().values()[0].as_f64());
    }

    #[test]
    fn value_out_of_range() {
        match parse_das("Attributes { v { Byte b 0x1FF; } }").unwrap_err() {
            DapError::Parse { what, fragment, .. } => {
                assert_eq!("DAS", what);
                assert_eq!("0x1FF; } }", fragment);
            }
            err => panic!("unexpected error {}", err),
        }
    }

    #[test]
    fn unknown_type() {
        assert!(parse_das("Attributes { v { Float16 b 1; } }").is_err());
    }

    #[test]
    fn missing_semicolon() {
        assert!(parse_das("Attributes { v { Int32 b 1 } }").is_err());
    }

    #[test]
    fn nested_containers() {
        let das = "Attributes { s { x { String units \"K\"; } String name \"s\"; } }";
        let attributes = parse_das(das).unwrap();
        let s = attributes.get("s").unwrap().as_container().unwrap();
        let x = s.get("x").unwrap().as_container().unwrap();
        assert_eq!(1, x.len());
        assert!(s.contains("name"));
    }

    #[test]
    fn merge_into_dataset() {
        let das = r#"Attributes {
    a { String units "m"; }
    s {
        String long_name "structure";
        x { Int32 valid 1; }
    }
    s.y { Float64 scale 2.5; }
    NC_GLOBAL { String title "simple"; }
}"#;
        let mut dataset = test_utils::simple_dataset();
        add_attributes(&mut dataset, parse_das(das).unwrap());

        let a = dataset.get("a").unwrap();
        assert!(a.get_attribute("units").is_some());
        let s = dataset.get("s").unwrap();
        assert!(s.get_attribute("long_name").is_some());
        assert!(s.get_attribute("x").is_none());
        assert!(dataset.find("s.x").unwrap().get_attribute("valid").is_some());
        assert!(dataset.find("s.y").unwrap().get_attribute("scale").is_some());
        assert!(dataset.get_attribute("NC_GLOBAL").is_some());
        assert!(dataset.get_attribute("s.y").is_none());
    }

    #[test]
    fn flat_wins_over_nested() {
        let das = r#"Attributes {
    s { x { Int32 v 1; Int32 w 2; } }
    s.x { Int32 v 3; }
}"#;
        let mut dataset = test_utils::simple_dataset();
        add_attributes(&mut dataset, parse_das(das).unwrap());
        let x = dataset.find("s.x").unwrap();
        assert_eq!(
            Some(&AttrValue::Scalar(DValue::Int(3))),
            x.get_attribute("v")
        );
        assert_eq!(
            Some(&AttrValue::Scalar(DValue::Int(2))),
            x.get_attribute("w")
        );
    }

    #[test]
    fn scalar_named_like_child_stays_with_parent() {
        let das = "Attributes { s { Int32 x 5; } }";
        let mut dataset = test_utils::simple_dataset();
        add_attributes(&mut dataset, parse_das(das).unwrap());
        assert!(dataset.find("s.x").unwrap().attributes().is_empty());
        assert_eq!(
            Some(&AttrValue::Scalar(DValue::Int(5))),
            dataset.get("s").unwrap().get_attribute("x")
        );
    }
}
