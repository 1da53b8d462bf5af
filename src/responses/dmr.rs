//! DMR writer.

use crate::model::{BaseType, Container, DapNode, Dataset};
use crate::responses::{format_value, indent, infer_type};
use crate::types::{AttrValue, Attributes, DValue};

use std::fmt::Write;

const DAP4_NAMESPACE: &str = "http://xml.opendap.org/ns/DAP/4.0#";

/// Escape text for use in XML content and attribute values.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Render the visible variables of `dataset` as a DMR.
///
/// Named dimensions that are used by variables but not declared, as in a dataset built from
/// a DDS, are declared at the root. Grids have no DAP4 equivalent and are written as
/// structures; their maps become `Map` references.
pub fn render_dmr(dataset: &Dataset) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(
        out,
        "<Dataset xmlns=\"{}\" dapVersion=\"4.0\" dmrVersion=\"1.0\" name=\"{}\">",
        DAP4_NAMESPACE,
        escape(dataset.name())
    );
    let mut dimensions = dataset.dimensions.clone();
    for node in dataset.walk() {
        if let DapNode::Base(var) = node {
            for (dim, size) in var.dims.iter().zip(&var.shape) {
                if !dim.is_empty()
                    && !dim.starts_with('/')
                    && !dimensions.iter().any(|(name, _)| name == dim)
                {
                    dimensions.push((dim.clone(), *size));
                }
            }
        }
    }
    write_dimensions(&mut out, &dimensions, 1);
    write_members(&mut out, dataset, 1);
    write_attributes(&mut out, &dataset.attributes, 1);
    out.push_str("</Dataset>\n");
    out
}

fn write_dimensions(out: &mut String, dimensions: &[(String, usize)], level: usize) {
    for (name, size) in dimensions {
        let _ = writeln!(
            out,
            "{}<Dimension name=\"{}\" size=\"{}\"/>",
            indent(level),
            escape(name),
            size
        );
    }
}

fn write_members(out: &mut String, container: &Container, level: usize) {
    for child in container.children() {
        write_node(out, child, level);
    }
}

fn write_node(out: &mut String, node: &DapNode, level: usize) {
    match node {
        DapNode::Base(var) => write_base(out, var, level),
        DapNode::Group(group) => {
            let _ = writeln!(out, "{}<Group name=\"{}\">", indent(level), escape(group.name()));
            write_dimensions(out, &group.dimensions, level + 1);
            write_members(out, group, level + 1);
            write_attributes(out, &group.attributes, level + 1);
            let _ = writeln!(out, "{}</Group>", indent(level));
        }
        node => {
            let tag = match node {
                DapNode::Sequence(_) => "Sequence",
                _ => "Structure",
            };
            if let Some(container) = node.container() {
                let _ = writeln!(
                    out,
                    "{}<{} name=\"{}\">",
                    indent(level),
                    tag,
                    escape(container.name())
                );
                write_members(out, container, level + 1);
                write_attributes(out, &container.attributes, level + 1);
                let _ = writeln!(out, "{}</{}>", indent(level), tag);
            }
        }
    }
}

fn write_base(out: &mut String, var: &BaseType, level: usize) {
    let inner = indent(level + 1);
    let _ = writeln!(out, "{}<{} name=\"{}\">", indent(level), var.dtype, escape(var.name()));
    for (axis, size) in var.shape.iter().enumerate() {
        match var.dims.get(axis).filter(|dim| !dim.is_empty()) {
            Some(dim) if dim.starts_with('/') => {
                let _ = writeln!(out, "{}<Dim name=\"{}\"/>", inner, escape(dim));
            }
            Some(dim) => {
                let _ = writeln!(out, "{}<Dim name=\"/{}\"/>", inner, escape(dim));
            }
            None => {
                let _ = writeln!(out, "{}<Dim size=\"{}\"/>", inner, size);
            }
        }
    }
    let mut attributes = var.attributes.clone();
    let maps = attributes.remove("maps");
    write_attributes(out, &attributes, level + 1);
    if let Some(maps) = maps {
        for map in maps.values() {
            let _ = writeln!(out, "{}<Map name=\"{}\"/>", inner, escape(&map.to_string()));
        }
    }
    let _ = writeln!(out, "{}</{}>", indent(level), var.dtype);
}

fn write_attributes(out: &mut String, attributes: &Attributes, level: usize) {
    for (name, value) in attributes.iter() {
        match value {
            AttrValue::Container(inner) => {
                let _ = writeln!(
                    out,
                    "{}<Attribute name=\"{}\" type=\"Container\">",
                    indent(level),
                    escape(name)
                );
                write_attributes(out, inner, level + 1);
                let _ = writeln!(out, "{}</Attribute>", indent(level));
            }
            value => {
                let values = value.values();
                let _ = writeln!(
                    out,
                    "{}<Attribute name=\"{}\" type=\"{}\">",
                    indent(level),
                    escape(name),
                    infer_type(values)
                );
                let float = values.iter().any(|value| matches!(value, DValue::Float(_)));
                for value in values {
                    let text = match value {
                        DValue::Str(_) => value.to_string(),
                        value if float => format!("{:?}", value.as_f64()),
                        value => format_value(value),
                    };
                    let _ = writeln!(out, "{}<Value>{}</Value>", indent(level + 1), escape(&text));
                }
                let _ = writeln!(out, "{}</Attribute>", indent(level));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Group, Sequence};
    use crate::models::DType;
    use crate::parsers::parse_dmr;
    use crate::test_utils;

    #[test]
    fn render_declares_dds_dimensions() {
        let dmr = render_dmr(&test_utils::grid_dataset());
        assert!(dmr.contains("<Dimension name=\"time\" size=\"2\"/>"));
        assert!(dmr.contains("<Dimension name=\"lat\" size=\"3\"/>"));
        assert!(dmr.contains("<Dim name=\"/time\"/>"));
        let dataset = parse_dmr(&dmr).unwrap();
        match dataset.find("sst.sst").unwrap() {
            DapNode::Base(var) => {
                assert_eq!(vec![2, 3], var.shape);
                assert_eq!(vec!["/time".to_string(), "/lat".to_string()], var.dims);
            }
            node => panic!("unexpected node {:?}", node),
        }
    }

    #[test]
    fn render_escapes_text() {
        let mut dataset = Dataset::new("a&b");
        dataset
            .attributes
            .insert("note", DValue::from("x < y"));
        let dmr = render_dmr(&dataset);
        assert!(dmr.contains("name=\"a&amp;b\""));
        assert!(dmr.contains("<Value>x &lt; y</Value>"));
        let reparsed = parse_dmr(&dmr).unwrap();
        assert_eq!("a&b", reparsed.name());
        assert_eq!(
            Some(&AttrValue::Scalar(DValue::from("x < y"))),
            reparsed.get_attribute("note")
        );
    }

    #[test]
    fn reparse_gives_same_tree() {
        let mut units = Attributes::new();
        units.insert("units", DValue::from("K"));
        let mut group = Group::new("g");
        group.dimensions.push(("n".to_string(), 4));
        let mut v = BaseType::new("v", DType::Int16, vec![4, 2])
            .with_dims(vec!["/g/n".to_string(), String::new()]);
        v.attributes.insert("valid_range", vec![DValue::Int(-5), DValue::Int(5)]);
        v.attributes.insert("meta", units);
        v.attributes.insert("maps", vec![DValue::from("/g/n"), DValue::from("/t")]);
        group.insert(v.into());
        let obs = Sequence::new("obs")
            .with(BaseType::new("depth", DType::Float32, vec![]))
            .with(BaseType::new("name", DType::String, vec![]));
        let mut source = Dataset::new("example").with(group).with(obs);
        source.dimensions.push(("t".to_string(), 2));
        source.attributes.insert("scale", DValue::Float(1.5));

        let reparsed = parse_dmr(&render_dmr(&source)).unwrap();
        assert_eq!(source.dimensions, reparsed.dimensions);
        assert_eq!(source.attributes, reparsed.attributes);
        match (source.find("g.v").unwrap(), reparsed.find("g.v").unwrap()) {
            (DapNode::Base(expected), DapNode::Base(found)) => {
                assert_eq!(expected.dtype, found.dtype);
                assert_eq!(expected.shape, found.shape);
                assert_eq!(expected.dims, found.dims);
                assert_eq!(expected.attributes, found.attributes);
            }
            nodes => panic!("unexpected nodes {:?}", nodes),
        }
        match reparsed.get("g").unwrap() {
            DapNode::Group(group) => assert_eq!(vec![("n".to_string(), 4)], group.dimensions),
            node => panic!("unexpected node {:?}", node),
        }
        assert_eq!("Sequence", reparsed.get("obs").unwrap().kind());
        assert!(reparsed.find("obs.name").is_some());
    }
}
