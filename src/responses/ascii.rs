//! ASCII writer: the DDS followed by comma separated values.

use crate::error::DapError;
use crate::model::{BaseType, Container, DapNode, Dataset, Record, Value};
use crate::responses::dds::render_dds;
use crate::responses::format_value;
use crate::types::DValue;

use std::fmt::Write;

const SEPARATOR: &str = "---------------------------------------------\n";

/// Render the data of the visible variables of `dataset` as text.
///
/// Arrays are written one row per line, prefixed by the variable id and the indices of all
/// but the last dimension. Sequences are written as a header of column ids followed by one
/// line per record; nested sequences follow the record that holds them.
pub fn render_ascii(dataset: &Dataset) -> Result<String, DapError> {
    let mut out = render_dds(dataset);
    out.push_str(SEPARATOR);
    for child in dataset.children() {
        write_node(&mut out, child)?;
    }
    Ok(out)
}

fn render(value: &DValue) -> String {
    match value {
        DValue::Str(s) => format!("\"{}\"", s),
        value => format_value(value),
    }
}

fn write_node(out: &mut String, node: &DapNode) -> Result<(), DapError> {
    match node {
        DapNode::Base(var) => write_array(out, var),
        DapNode::Sequence(seq) => write_records(out, &seq.container, &seq.records()?),
        node => {
            if let Some(container) = node.container() {
                for child in container.children() {
                    write_node(out, child)?;
                }
            }
            Ok(())
        }
    }
}

/// Row-major indices of the `position`-th element of an array of `shape`.
fn unravel(mut position: usize, shape: &[usize]) -> Vec<usize> {
    let mut indices = vec![0; shape.len()];
    for (axis, size) in shape.iter().enumerate().rev() {
        if *size > 0 {
            indices[axis] = position % size;
            position /= size;
        }
    }
    indices
}

fn write_array(out: &mut String, var: &BaseType) -> Result<(), DapError> {
    let values: Vec<String> = var.array()?.values().iter().map(render).collect();
    match var.shape.split_last() {
        Some((row, outer)) if !outer.is_empty() => {
            if *row == 0 {
                return Ok(());
            }
            for (position, chunk) in values.chunks(*row).enumerate() {
                let index: String = unravel(position, outer)
                    .iter()
                    .map(|i| format!("[{}]", i))
                    .collect();
                let _ = writeln!(out, "{}{}, {}", var.id(), index, chunk.join(", "));
            }
        }
        _ if values.is_empty() => {
            let _ = writeln!(out, "{}", var.id());
        }
        _ => {
            let _ = writeln!(out, "{}, {}", var.id(), values.join(", "));
        }
    }
    Ok(())
}

/// Ids of the atomic columns of a sequence, with structures flattened.
fn columns(container: &Container, out: &mut Vec<String>) {
    for child in container.children() {
        match child {
            DapNode::Base(var) => out.push(var.id().to_string()),
            DapNode::Sequence(_) => {}
            node => {
                if let Some(inner) = node.container() {
                    columns(inner, out);
                }
            }
        }
    }
}

fn write_records(
    out: &mut String,
    container: &Container,
    records: &[Record],
) -> Result<(), DapError> {
    let mut header = vec![];
    columns(container, &mut header);
    let _ = writeln!(out, "{}", header.join(", "));
    for record in records {
        let mut atoms = vec![];
        let mut nested = vec![];
        flatten(container, record, &mut atoms, &mut nested)?;
        let _ = writeln!(out, "{}", atoms.join(", "));
        for (inner, records) in nested {
            write_records(out, inner, records)?;
        }
    }
    Ok(())
}

fn flatten<'a>(
    container: &'a Container,
    record: &'a [Value],
    atoms: &mut Vec<String>,
    nested: &mut Vec<(&'a Container, &'a [Record])>,
) -> Result<(), DapError> {
    for child in container.children() {
        let value = container
            .member_index(child.key())
            .and_then(|index| record.get(index))
            .ok_or_else(|| DapError::ShapeMismatch {
                id: container.id().to_string(),
                expected: container.len(),
                found: record.len(),
            })?;
        match (child, value) {
            (_, Value::Atom(atom)) => atoms.push(render(atom)),
            (DapNode::Sequence(seq), Value::Seq(records)) => {
                nested.push((&seq.container, records.as_slice()))
            }
            (node, Value::Struct(values)) if node.container().is_some() => {
                if let Some(inner) = node.container() {
                    flatten(inner, values, atoms, nested)?;
                }
            }
            (node, _) => {
                return Err(DapError::UnsupportedOperation {
                    operation: "ascii response",
                    kind: node.kind(),
                    id: node.id().to_string(),
                })
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    fn data_lines(text: &str) -> Vec<&str> {
        text.split(SEPARATOR).nth(1).unwrap().lines().collect()
    }

    #[test]
    fn render_arrays() {
        let text = render_ascii(&test_utils::simple_dataset()).unwrap();
        assert!(text.starts_with("Dataset {\n"));
        assert_eq!(
            vec![
                "a, 0, 1, 2, 3, 4",
                "b, 1.5",
                "c, \"one\", \"two\"",
                "s.x, -1, 0, 1",
                "s.y, 7",
            ],
            data_lines(&text)
        );
    }

    #[test]
    fn render_grid_rows() {
        let text = render_ascii(&test_utils::grid_dataset()).unwrap();
        assert_eq!(
            vec![
                "sst.sst[0], 1.0, 2.0, 3.0",
                "sst.sst[1], 4.0, 5.0, 6.0",
                "sst.time, 0.0, 1.0",
                "sst.lat, -10.0, 0.0, 10.0",
            ],
            data_lines(&text)
        );
    }

    #[test]
    fn render_nested_sequences() {
        let text = render_ascii(&test_utils::nested_sequence_dataset()).unwrap();
        assert_eq!(
            vec![
                "stations.id",
                "1",
                "stations.obs.t, stations.obs.q",
                "1.5, 0",
                "2.5, 1",
                "2",
                "stations.obs.t, stations.obs.q",
                "3.5, 1",
            ],
            data_lines(&text)
        );
    }

    #[test]
    fn unravel_indices() {
        assert_eq!(vec![1, 2], unravel(5, &[2, 3]));
        assert_eq!(vec![0, 0], unravel(0, &[2, 3]));
    }

    #[test]
    fn missing_data() {
        let mut dataset = test_utils::simple_dataset();
        dataset.insert(BaseType::new("z", crate::models::DType::Int32, vec![]).into());
        assert!(matches!(
            render_ascii(&dataset).unwrap_err(),
            DapError::MissingData(_)
        ));
    }
}
