//! Evaluation of parsed constraint expressions against a dataset.
//!
//! Evaluation never modifies its input. Selections filter sequence records into new record
//! vectors, and projections build a fresh tree whose atomic data are views over the input's
//! buffers.

use crate::constraint::{
    fix_shorthand, Operator, PathSegment, Projection, ProjectionItem, Selection, SelectionClause,
};
use crate::error::DapError;
use crate::functions::FunctionRegistry;
use crate::model::{
    remap_record, BaseType, Container, DapNode, Dataset, Group, Record, Sequence, SequenceData,
    Value,
};
use crate::models::{ConstraintExpression, Slice};
use crate::types::DValue;

use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

/// Apply a full constraint expression: shorthand expansion, then selection, then projection.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub fn apply_constraint(
    dataset: &Dataset,
    projection: &Projection,
    selection: &Selection,
    functions: &FunctionRegistry,
) -> Result<Dataset, DapError> {
    let projection = fix_shorthand(projection, dataset)?;
    let selected = apply_selection(dataset, selection, functions)?;
    apply_projection(&selected, &projection, functions)
}

type Predicate<'a> = (&'a str, Operator, &'a str);

/// Filter the records of every sequence with the selection clauses.
///
/// Selection functions run first, in order. Each predicate must name a field of a sequence
/// as its left operand; predicates on nested sequences filter the nested records inside each
/// outer record. Remote sequences receive their predicates as constraint expressions.
pub fn apply_selection(
    dataset: &Dataset,
    selection: &Selection,
    functions: &FunctionRegistry,
) -> Result<Dataset, DapError> {
    // Shares atomic buffers with `dataset`; filtered records replace the shared ones.
    let mut out = dataset.clone_structure();
    let mut predicates: Vec<Predicate> = vec![];
    for clause in selection {
        match clause {
            SelectionClause::Function(call) => out = functions.select(&out, call)?,
            SelectionClause::Predicate { left, op, right } => {
                predicates.push((left.as_str(), *op, right.as_str()))
            }
        }
    }
    if predicates.is_empty() {
        return Ok(out);
    }

    let mut used = vec![false; predicates.len()];
    for id in outer_sequences(&out) {
        let filtered = match out.find(&id) {
            Some(DapNode::Sequence(seq)) => filter_sequence(seq, &predicates, &mut used, &out)?,
            _ => None,
        };
        if let (Some(data), Some(DapNode::Sequence(seq))) = (filtered, out.find_mut(&id)) {
            seq.data = data;
        }
    }
    match used.iter().position(|used| !used) {
        Some(index) => Err(DapError::UnknownVariable(predicates[index].0.to_string())),
        None => Ok(out),
    }
}

/// Ids of the sequences that hold their own data, i.e. are not nested in another sequence.
fn outer_sequences(dataset: &Dataset) -> Vec<String> {
    let mut ids: Vec<String> = vec![];
    for node in dataset.walk() {
        if let DapNode::Sequence(seq) = node {
            let nested = ids
                .iter()
                .any(|outer| seq.id().starts_with(&format!("{}.", outer)));
            if !nested {
                ids.push(seq.id().to_string());
            }
        }
    }
    ids
}

fn filter_sequence(
    seq: &Sequence,
    predicates: &[Predicate],
    used: &mut [bool],
    dataset: &Dataset,
) -> Result<Option<SequenceData>, DapError> {
    let prefix = format!("{}.", seq.id());
    if !predicates.iter().any(|(left, ..)| left.starts_with(&prefix)) {
        return Ok(None);
    }
    match &seq.data {
        SequenceData::Records(records) => {
            let plan = FilterPlan::compile(&seq.container, predicates, used, dataset)?;
            Ok(Some(SequenceData::Records(Arc::new(plan.apply(records)?))))
        }
        SequenceData::Remote(proxy) => {
            let mut proxy = proxy.clone();
            for (index, (left, op, right)) in predicates.iter().enumerate() {
                if left.starts_with(&prefix) {
                    used[index] = true;
                    proxy = proxy.filter(&ConstraintExpression::new(format!(
                        "{}{}{}",
                        left, op, right
                    )));
                }
            }
            Ok(Some(SequenceData::Remote(proxy)))
        }
        SequenceData::None => Err(DapError::MissingData(seq.id().to_string())),
    }
}

enum Operand {
    Column(usize),
    Value(DValue),
}

struct Condition {
    column: usize,
    op: Operator,
    operand: Operand,
    regex: Option<Regex>,
}

/// Predicates compiled against the member layout of one sequence, and of its nested
/// sequences.
struct FilterPlan {
    conditions: Vec<Condition>,
    nested: Vec<(usize, FilterPlan)>,
}

/// Position of an atomic member of a sequence.
fn column_index(container: &Container, field: &str) -> Option<usize> {
    match container.get(field)? {
        DapNode::Base(var) => container.member_index(var.key()),
        _ => None,
    }
}

impl FilterPlan {
    fn compile(
        container: &Container,
        predicates: &[Predicate],
        used: &mut [bool],
        dataset: &Dataset,
    ) -> Result<FilterPlan, DapError> {
        let field_pattern = Regex::new(&format!(r"^{}\.([^.]+)$", regex::escape(container.id())))?;
        let mut conditions = vec![];
        for (index, (left, op, right)) in predicates.iter().enumerate() {
            let field = match field_pattern.captures(left).and_then(|c| c.get(1)) {
                Some(field) => field.as_str(),
                None => continue,
            };
            let column = column_index(container, field)
                .ok_or_else(|| DapError::UnknownVariable(left.to_string()))?;
            let operand = resolve_operand(container, &field_pattern, right, dataset)?;
            let regex = match (&operand, op) {
                (Operand::Value(DValue::Str(pattern)), Operator::Match) => {
                    Some(Regex::new(&format!("^(?:{})", pattern))?)
                }
                _ => None,
            };
            used[index] = true;
            conditions.push(Condition {
                column,
                op: *op,
                operand,
                regex,
            });
        }

        let mut nested = vec![];
        for (column, member) in container.members().iter().enumerate() {
            if let DapNode::Sequence(inner) = member {
                let prefix = format!("{}.", inner.id());
                if predicates.iter().any(|(left, ..)| left.starts_with(&prefix)) {
                    let plan = FilterPlan::compile(&inner.container, predicates, used, dataset)?;
                    nested.push((column, plan));
                }
            }
        }
        Ok(FilterPlan { conditions, nested })
    }

    fn apply(&self, records: &[Record]) -> Result<Vec<Record>, DapError> {
        let mut out = vec![];
        for record in records {
            if !self.matches(record)? {
                continue;
            }
            let mut record = record.clone();
            for (column, plan) in &self.nested {
                if let Some(Value::Seq(inner)) = record.get_mut(*column) {
                    *inner = plan.apply(inner)?;
                }
            }
            out.push(record);
        }
        Ok(out)
    }

    fn matches(&self, record: &[Value]) -> Result<bool, DapError> {
        for condition in &self.conditions {
            let left = atom(record, condition.column)?;
            let right = match &condition.operand {
                Operand::Column(column) => atom(record, *column)?,
                Operand::Value(value) => value,
            };
            if !compare(left, condition.op, right, condition.regex.as_ref())? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn atom(record: &[Value], column: usize) -> Result<&DValue, DapError> {
    record
        .get(column)
        .and_then(Value::as_atom)
        .ok_or_else(|| DapError::InvalidSelection(format!("no atomic value in column {}", column)))
}

/// Resolve the right operand as a field of the same sequence, then a scalar variable, then a
/// literal.
fn resolve_operand(
    container: &Container,
    field_pattern: &Regex,
    token: &str,
    dataset: &Dataset,
) -> Result<Operand, DapError> {
    if let Some(field) = field_pattern.captures(token).and_then(|c| c.get(1)) {
        if let Some(column) = column_index(container, field.as_str()) {
            return Ok(Operand::Column(column));
        }
    }
    if let Some(DapNode::Base(var)) = dataset.find(token) {
        return scalar_value(var).map(Operand::Value);
    }
    DValue::parse_literal(token)
        .map(Operand::Value)
        .ok_or_else(|| DapError::UnknownVariable(token.to_string()))
}

fn scalar_value(var: &BaseType) -> Result<DValue, DapError> {
    let mut values = var.array()?.values();
    if values.len() != 1 {
        return Err(DapError::InvalidSelection(format!(
            "{} is not a scalar",
            var.id()
        )));
    }
    Ok(values.remove(0))
}

/// Compare two values. Comparisons involving NaN are false, except `!=`.
fn compare(
    left: &DValue,
    op: Operator,
    right: &DValue,
    regex: Option<&Regex>,
) -> Result<bool, DapError> {
    if op == Operator::Match {
        return match (left, right) {
            (DValue::Str(text), DValue::Str(pattern)) => match regex {
                Some(regex) => Ok(regex.is_match(text)),
                None => Ok(Regex::new(&format!("^(?:{})", pattern))?.is_match(text)),
            },
            _ => Err(DapError::TypeMismatch {
                left: left.describe(),
                right: right.describe(),
            }),
        };
    }
    let ordering = match left.try_cmp(right)? {
        Some(ordering) => ordering,
        None => return Ok(op == Operator::Ne),
    };
    Ok(match op {
        Operator::Lt => ordering.is_lt(),
        Operator::Le => ordering.is_le(),
        Operator::Gt => ordering.is_gt(),
        Operator::Ge => ordering.is_ge(),
        Operator::Eq => ordering.is_eq(),
        Operator::Ne => ordering.is_ne(),
        Operator::Match => false,
    })
}

/// Build a new dataset holding only the projected variables.
///
/// An empty projection keeps every top level variable. Slices apply at the segment where they
/// are written. A grid is degraded to a structure when the path continues into one of its
/// members. Projected sequences keep only the projected columns, in projection order.
pub fn apply_projection(
    dataset: &Dataset,
    projection: &Projection,
    functions: &FunctionRegistry,
) -> Result<Dataset, DapError> {
    let mut out = Dataset::new(dataset.name());
    out.attributes = dataset.attributes.clone();
    out.dimensions = dataset.dimensions.clone();

    if projection.is_empty() {
        for child in dataset.children() {
            // Shares data buffers with `dataset`.
            out.insert(child.clone_structure());
        }
        return Ok(out);
    }

    // Source layouts of sequences whose columns were projected, by id.
    let mut layouts: HashMap<String, Container> = HashMap::new();
    for item in projection {
        match item {
            ProjectionItem::Function(call) => {
                let node = functions.project(dataset, call)?;
                out.insert(node);
            }
            ProjectionItem::Path(segments) => {
                project_path(&dataset.container, &mut out.container, segments, &mut layouts)?
            }
        }
    }
    remap_sequences(&mut out.container, &layouts)?;
    Ok(out)
}

fn project_path(
    source: &Container,
    target: &mut Container,
    segments: &[PathSegment],
    layouts: &mut HashMap<String, Container>,
) -> Result<(), DapError> {
    let (segment, rest) = match segments.split_first() {
        Some(split) => split,
        None => return Ok(()),
    };
    let node = source.get(&segment.name).ok_or_else(|| {
        DapError::UnknownVariable(match source.id() {
            "" => segment.name.clone(),
            id => format!("{}.{}", id, segment.name),
        })
    })?;
    if rest.is_empty() {
        target.insert(slice_node(node, &segment.slices)?);
        return Ok(());
    }

    let inner_source = match node {
        DapNode::Base(var) => {
            return Err(DapError::UnknownVariable(format!(
                "{}.{}",
                var.id(),
                rest[0].name
            )))
        }
        DapNode::Sequence(seq) => &seq.container,
        _ if !segment.slices.is_empty() => return Err(unsupported_slice(node)),
        node => node.container().ok_or_else(|| unsupported_slice(node))?,
    };
    if target.member_index(node.key()).is_none() {
        target.insert(shell(node, &segment.slices, layouts)?);
    }
    let inner_target = target
        .get_mut(node.key())
        .and_then(DapNode::container_mut)
        .ok_or_else(|| DapError::UnknownVariable(node.id().to_string()))?;
    project_path(inner_source, inner_target, rest, layouts)
}

fn unsupported_slice(node: &DapNode) -> DapError {
    DapError::UnsupportedOperation {
        operation: "slice",
        kind: node.kind(),
        id: node.id().to_string(),
    }
}

/// An empty container node standing in for `node` while its projected members are added.
fn shell(
    node: &DapNode,
    slices: &[Slice],
    layouts: &mut HashMap<String, Container>,
) -> Result<DapNode, DapError> {
    let shell = match node {
        DapNode::Structure(container) | DapNode::Grid(container) => {
            DapNode::Structure(container.empty_like())
        }
        DapNode::Group(group) => DapNode::Group(Group {
            container: group.empty_like(),
            dimensions: group.dimensions.clone(),
        }),
        DapNode::Sequence(seq) => {
            layouts.insert(seq.id().to_string(), seq.container.clone());
            DapNode::Sequence(Sequence {
                container: seq.empty_like(),
                data: slice_rows(seq, slices)?,
            })
        }
        DapNode::Base(var) => DapNode::Base(var.clone()),
    };
    Ok(shell)
}

/// Slice the node named by the last segment of a path.
fn slice_node(node: &DapNode, slices: &[Slice]) -> Result<DapNode, DapError> {
    match node {
        // A view over the source buffer.
        DapNode::Base(var) => Ok(DapNode::Base(var.slice(slices)?)),
        DapNode::Sequence(seq) => Ok(DapNode::Sequence(Sequence {
            container: seq.container.clone(),
            data: slice_rows(seq, slices)?,
        })),
        DapNode::Grid(grid) => slice_grid(grid, slices),
        DapNode::Structure(_) | DapNode::Group(_) if !slices.is_empty() => {
            Err(unsupported_slice(node))
        }
        node => Ok(node.clone_structure()),
    }
}

/// Slice a grid array, and each map along its own dimension.
fn slice_grid(grid: &Container, slices: &[Slice]) -> Result<DapNode, DapError> {
    if slices.is_empty() {
        return Ok(DapNode::Grid(grid.clone()));
    }
    let mut out = grid.empty_like();
    for (index, member) in grid.members().iter().enumerate() {
        let sliced = match member {
            DapNode::Base(array) if index == 0 => array.slice(slices)?,
            DapNode::Base(map) => match slices.get(index - 1) {
                Some(slice) => map.slice(std::slice::from_ref(slice))?,
                None => map.clone(),
            },
            node => return Err(unsupported_slice(node)),
        };
        out.insert(sliced.into());
    }
    Ok(DapNode::Grid(out))
}

/// Select rows of a sequence. A sequence takes at most one slice.
fn slice_rows(seq: &Sequence, slices: &[Slice]) -> Result<SequenceData, DapError> {
    let slice = match slices {
        [] => return Ok(seq.data.clone()),
        [slice] => slice,
        _ => {
            return Err(DapError::InvalidHyperslab(format!(
                "{} slices for sequence {}",
                slices.len(),
                seq.id()
            )))
        }
    };
    let data = match &seq.data {
        SequenceData::Records(records) => SequenceData::Records(Arc::new(
            slice
                .indices(records.len())
                .map(|index| records[index].clone())
                .collect(),
        )),
        SequenceData::Remote(proxy) => SequenceData::Remote(proxy.rows(*slice)),
        SequenceData::None => SequenceData::None,
    };
    Ok(data)
}

/// Rearrange the records of projected sequences to their projected columns.
fn remap_sequences(
    container: &mut Container,
    layouts: &HashMap<String, Container>,
) -> Result<(), DapError> {
    for member in container.members_mut() {
        match member {
            DapNode::Sequence(seq) => {
                let source = match layouts.get(seq.id()) {
                    Some(source) => source,
                    None => continue,
                };
                let data = match &seq.data {
                    SequenceData::Records(records) => SequenceData::Records(Arc::new(
                        records
                            .iter()
                            .map(|record| remap_record(record, source, &seq.container))
                            .collect::<Result<Vec<Record>, DapError>>()?,
                    )),
                    SequenceData::Remote(proxy) => {
                        SequenceData::Remote(proxy.project(seq.container.clone()))
                    }
                    SequenceData::None => SequenceData::None,
                };
                seq.data = data;
            }
            DapNode::Base(_) => (),
            node => {
                if let Some(inner) = node.container_mut() {
                    remap_sequences(inner, layouts)?;
                }
            }
        }
    }
    Ok(())
}
