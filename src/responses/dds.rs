//! DDS writer.

use crate::model::{quote, BaseType, Container, DapNode, Dataset};
use crate::responses::indent;

use std::fmt::Write;

/// Render the visible variables of `dataset` as a DDS.
///
/// Names are written in quoted form. Groups have no DAP2 equivalent and are written as
/// structures.
pub fn render_dds(dataset: &Dataset) -> String {
    let mut out = String::from("Dataset {\n");
    for child in dataset.children() {
        write_node(&mut out, child, 1);
    }
    let _ = writeln!(out, "}} {};", dataset.key());
    out
}

fn write_node(out: &mut String, node: &DapNode, level: usize) {
    match node {
        DapNode::Base(var) => write_base(out, var, level),
        DapNode::Structure(c) => write_constructor(out, "Structure", c, level),
        DapNode::Group(group) => write_constructor(out, "Structure", &group.container, level),
        DapNode::Sequence(seq) => write_constructor(out, "Sequence", &seq.container, level),
        DapNode::Grid(c) => {
            let _ = writeln!(out, "{}Grid {{", indent(level));
            let mut children = c.children();
            if let Some(array) = children.next() {
                let _ = writeln!(out, "{}Array:", indent(level + 1));
                write_node(out, array, level + 2);
            }
            let _ = writeln!(out, "{}Maps:", indent(level + 1));
            for map in children {
                write_node(out, map, level + 2);
            }
            let _ = writeln!(out, "{}}} {};", indent(level), c.key());
        }
    }
}

fn write_constructor(out: &mut String, keyword: &str, container: &Container, level: usize) {
    let _ = writeln!(out, "{}{} {{", indent(level), keyword);
    for child in container.children() {
        write_node(out, child, level + 1);
    }
    let _ = writeln!(out, "{}}} {};", indent(level), container.key());
}

fn write_base(out: &mut String, var: &BaseType, level: usize) {
    let _ = write!(out, "{}{} {}", indent(level), var.dtype, var.key());
    for (axis, size) in var.shape.iter().enumerate() {
        match var.dims.get(axis).filter(|dim| !dim.is_empty()) {
            Some(dim) => {
                let _ = write!(out, "[{} = {}]", quote(dim.trim_start_matches('/')), size);
            }
            None => {
                let _ = write!(out, "[{}]", size);
            }
        }
    }
    out.push_str(";\n");
}
