//! DAS writer.

use crate::model::{DapNode, Dataset};
use crate::models::DType;
use crate::responses::{format_value, indent, infer_type};
use crate::types::{AttrValue, Attributes, DValue};

use std::fmt::Write;

/// Render the attributes of `dataset` and its visible variables as a DAS.
///
/// Global attributes come first, then one container per variable, nested like the
/// variables themselves. Attribute types are inferred from their values.
pub fn render_das(dataset: &Dataset) -> String {
    let mut out = String::from("Attributes {\n");
    write_attributes(&mut out, &dataset.attributes, 1);
    for child in dataset.children() {
        write_node(&mut out, child, 1);
    }
    out.push_str("}\n");
    out
}

fn write_node(out: &mut String, node: &DapNode, level: usize) {
    let _ = writeln!(out, "{}{} {{", indent(level), node.key());
    write_attributes(out, node.attributes(), level + 1);
    if let Some(container) = node.container() {
        for child in container.children() {
            write_node(out, child, level + 1);
        }
    }
    let _ = writeln!(out, "{}}}", indent(level));
}

fn write_attributes(out: &mut String, attributes: &Attributes, level: usize) {
    for (name, value) in attributes.iter() {
        match value {
            AttrValue::Container(inner) => {
                let _ = writeln!(out, "{}{} {{", indent(level), name);
                write_attributes(out, inner, level + 1);
                let _ = writeln!(out, "{}}}", indent(level));
            }
            value => {
                let values = value.values();
                // An empty list has no representation in the DAS grammar.
                if values.is_empty() {
                    continue;
                }
                let dtype = infer_type(values);
                let rendered: Vec<String> = values
                    .iter()
                    .map(|value| render_value(dtype, value))
                    .collect();
                let _ = writeln!(
                    out,
                    "{}{} {} {};",
                    indent(level),
                    dtype,
                    name,
                    rendered.join(", ")
                );
            }
        }
    }
}

fn render_value(dtype: DType, value: &DValue) -> String {
    match value {
        DValue::Str(s) => format!("\"{}\"", s.replace('"', "\\\"")),
        value if dtype == DType::Float64 => format!("{:?}", value.as_f64()),
        value => format_value(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::{add_attributes, parse_das};
    use crate::test_utils;

    fn annotated() -> Dataset {
        let mut dataset = test_utils::simple_dataset();
        dataset.attributes.insert("title", DValue::from("Simple data"));
        let mut history = Attributes::new();
        history.insert("created", DValue::from("today"));
        dataset.attributes.insert("NC_GLOBAL", history);
        if let Some(node) = dataset.get_mut("a") {
            node.attributes_mut().insert("units", DValue::from("m"));
            node.attributes_mut()
                .insert("valid_range", vec![DValue::Int(0), DValue::Int(10)]);
            node.attributes_mut().insert("scale", DValue::Float(0.5));
        }
        if let Some(node) = dataset.find_mut("s.x") {
            node.attributes_mut().insert("_FillValue", DValue::Int(-1));
        }
        dataset
    }

    #[test]
    fn render_nested() {
        let expected = r#"Attributes {
    String title "Simple data";
    NC_GLOBAL {
        String created "today";
    }
    a {
        String units "m";
        Int32 valid_range 0, 10;
        Float64 scale 0.5;
    }
    b {
    }
    c {
    }
    s {
        x {
            Int32 _FillValue -1;
        }
        y {
        }
    }
}
"#;
        assert_eq!(expected, render_das(&annotated()));
    }

    #[test]
    fn mixed_numbers_render_as_float() {
        let mut dataset = Dataset::new("d");
        dataset
            .attributes
            .insert("range", vec![DValue::Int(1), DValue::Float(2.5)]);
        assert!(render_das(&dataset).contains("Float64 range 1.0, 2.5;"));
    }

    #[test]
    fn reparse_gives_same_attributes() {
        let source = annotated();
        let mut target = source.clone_structure();
        target.attributes = Attributes::new();
        for id in ["a", "s.x"] {
            if let Some(node) = target.find_mut(id) {
                *node.attributes_mut() = Attributes::new();
            }
        }
        add_attributes(&mut target, parse_das(&render_das(&source)).unwrap());
        assert_eq!(source.attributes, target.attributes);
        for id in ["a", "s.x", "b"] {
            assert_eq!(
                source.find(id).unwrap().attributes(),
                target.find(id).unwrap().attributes(),
                "attributes of {}",
                id
            );
        }
    }
}
