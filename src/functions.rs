//! Server side functions callable from constraint expressions.
//!
//! Projection functions build a new variable from their arguments, e.g. `mean(sst,0)`.
//! Selection functions filter a whole dataset, e.g. `bounds(cast.lat,-10,10)`.

use crate::array::DapArray;
use crate::constraint::{split_top_level, Operator, SelectionClause};
use crate::element::{dispatch, Element, NumVisitor};
use crate::error::DapError;
use crate::evaluator::apply_selection;
use crate::model::{BaseType, DapNode, Dataset};
use crate::models::DType;
use crate::types::DValue;

use lazy_static::lazy_static;
use ndarray::{ArrayD, Axis, IxDyn};
use num_traits::ToPrimitive;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;

lazy_static! {
    static ref CALL: Regex = Regex::new(r"^\s*([\w.]+)\((.*)\)\s*$").unwrap();
}

/// A resolved function argument.
#[derive(Clone, Debug)]
pub enum FunctionArg {
    /// A variable of the dataset, sharing its data buffers
    Variable(DapNode),
    /// A number or quoted string
    Literal(DValue),
}

impl FunctionArg {
    fn variable(&self) -> Option<&DapNode> {
        match self {
            FunctionArg::Variable(node) => Some(node),
            FunctionArg::Literal(_) => None,
        }
    }

    fn literal(&self) -> Option<&DValue> {
        match self {
            FunctionArg::Variable(_) => None,
            FunctionArg::Literal(value) => Some(value),
        }
    }
}

pub type ProjectionFunction = fn(&Dataset, &[FunctionArg]) -> Result<DapNode, DapError>;
pub type SelectionFunction = fn(&Dataset, &[FunctionArg]) -> Result<Dataset, DapError>;

/// Functions available to constraint expressions, by name.
///
/// Built once at startup and shared by every request.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    projections: HashMap<String, ProjectionFunction>,
    selections: HashMap<String, SelectionFunction>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("projections", &self.projections.keys().collect::<Vec<_>>())
            .field("selections", &self.selections.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FunctionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built in `mean` and `bounds` functions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_projection("mean", mean);
        registry.register_selection("bounds", bounds);
        registry
    }

    pub fn register_projection(&mut self, name: &str, function: ProjectionFunction) {
        self.projections.insert(name.to_string(), function);
    }

    pub fn register_selection(&mut self, name: &str, function: SelectionFunction) {
        self.selections.insert(name.to_string(), function);
    }

    /// Evaluate a projection function call such as `mean(sst,0)`.
    pub fn project(&self, dataset: &Dataset, call: &str) -> Result<DapNode, DapError> {
        let (name, args) = parse_call(call)?;
        let function = self
            .projections
            .get(name)
            .ok_or_else(|| DapError::UnknownFunction(name.to_string()))?;
        function(dataset, &resolve_args(dataset, &args)?)
    }

    /// Evaluate a selection function call such as `bounds(cast.lat,0,10)`.
    pub fn select(&self, dataset: &Dataset, call: &str) -> Result<Dataset, DapError> {
        let (name, args) = parse_call(call)?;
        let function = self
            .selections
            .get(name)
            .ok_or_else(|| DapError::UnknownFunction(name.to_string()))?;
        function(dataset, &resolve_args(dataset, &args)?)
    }
}

fn parse_call(call: &str) -> Result<(&str, Vec<&str>), DapError> {
    let captures = CALL
        .captures(call)
        .ok_or_else(|| DapError::parse("function call", "expected name(args)", call))?;
    let name = captures.get(1).map_or("", |m| m.as_str());
    let inner = captures.get(2).map_or("", |m| m.as_str());
    let args = if inner.trim().is_empty() {
        vec![]
    } else {
        split_top_level(inner, ',').into_iter().map(str::trim).collect()
    };
    Ok((name, args))
}

/// Resolve arguments as variables first, then literals.
fn resolve_args(dataset: &Dataset, args: &[&str]) -> Result<Vec<FunctionArg>, DapError> {
    args.iter()
        .map(|arg| {
            if let Some(node) = dataset.find(arg) {
                return Ok(FunctionArg::Variable(node.clone_structure()));
            }
            DValue::parse_literal(arg)
                .map(FunctionArg::Literal)
                .ok_or_else(|| DapError::UnknownVariable(arg.to_string()))
        })
        .collect()
}

fn argument_error(function: &str, message: &str) -> DapError {
    DapError::InvalidSelection(format!("{}: {}", function, message))
}

/// `mean(var[, axis])`: arithmetic mean of a numeric array, over all elements or along one
/// axis.
fn mean(_dataset: &Dataset, args: &[FunctionArg]) -> Result<DapNode, DapError> {
    let var = match args.first().and_then(FunctionArg::variable) {
        Some(DapNode::Base(var)) => var,
        _ => return Err(argument_error("mean", "first argument must be an array")),
    };
    if var.dtype.is_string() {
        return Err(DapError::UnsupportedOperation {
            operation: "mean",
            kind: "String",
            id: var.id().to_string(),
        });
    }
    let values = dispatch(
        var.dtype,
        ToFloat {
            id: var.id(),
            array: &var.array()?,
        },
    )?;
    let array = ArrayD::from_shape_vec(IxDyn(&var.shape), values)?;

    let result = match args.get(1) {
        Some(arg) => {
            let axis = arg
                .literal()
                .and_then(|value| usize::try_from(value.as_f64() as i64).ok())
                .filter(|axis| *axis < var.shape.len())
                .ok_or_else(|| argument_error("mean", "axis out of range"))?;
            array
                .mean_axis(Axis(axis))
                .ok_or_else(|| argument_error("mean", "empty axis"))?
        }
        None => {
            let mean = array
                .mean()
                .ok_or_else(|| argument_error("mean", "empty array"))?;
            ArrayD::from_elem(IxDyn(&[]), mean)
        }
    };

    let name = format!("mean_{}", var.name());
    let shape = result.shape().to_vec();
    let data = DapArray::Float64(result.into_shared());
    Ok(BaseType::new(&name, DType::Float64, shape)
        .with_data(data)
        .into())
}

/// Convert the elements of a numeric array to `f64`.
struct ToFloat<'a> {
    id: &'a str,
    array: &'a DapArray,
}

impl NumVisitor for ToFloat<'_> {
    type Output = Vec<f64>;

    fn visit<T: Element>(self) -> Result<Vec<f64>, DapError> {
        let elements = self
            .array
            .elements::<T>()
            .ok_or_else(|| DapError::DTypeMismatch {
                id: self.id.to_string(),
                declared: T::DTYPE,
                found: format!("{:?}", self.array.element_type()),
            })?;
        Ok(elements
            .iter()
            .map(|element| element.to_f64().unwrap_or(f64::NAN))
            .collect())
    }
}

/// `bounds(seq.field, min, max)`: keep sequence records with `min <= field <= max`.
fn bounds(dataset: &Dataset, args: &[FunctionArg]) -> Result<Dataset, DapError> {
    let (field, min, max) = match args {
        [FunctionArg::Variable(field), FunctionArg::Literal(min), FunctionArg::Literal(max)] => {
            (field.id(), min, max)
        }
        _ => return Err(argument_error("bounds", "expected (variable, min, max)")),
    };
    let clauses = vec![
        SelectionClause::Predicate {
            left: field.to_string(),
            op: Operator::Ge,
            right: min.to_string(),
        },
        SelectionClause::Predicate {
            left: field.to_string(),
            op: Operator::Le,
            right: max.to_string(),
        },
    ];
    apply_selection(dataset, &clauses, &FunctionRegistry::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    #[test]
    fn parse_calls() {
        let (name, args) = parse_call("mean(sst, 0)").unwrap();
        assert_eq!("mean", name);
        assert_eq!(vec!["sst", "0"], args);
        let (name, args) = parse_call("now()").unwrap();
        assert_eq!("now", name);
        assert!(args.is_empty());
        assert!(parse_call("mean").is_err());
    }

    #[test]
    fn unknown_function() {
        let registry = FunctionRegistry::with_builtins();
        let dataset = test_utils::simple_dataset();
        match registry.project(&dataset, "median(a)").unwrap_err() {
            DapError::UnknownFunction(name) => assert_eq!("median", name),
            err => panic!("unexpected error {}", err),
        }
        assert!(registry.select(&dataset, "mean(a)").is_err());
    }

    #[test]
    fn mean_of_array() {
        let registry = FunctionRegistry::with_builtins();
        let dataset = test_utils::simple_dataset();
        match registry.project(&dataset, "mean(a)").unwrap() {
            DapNode::Base(var) => {
                assert_eq!("mean_a", var.name());
                assert!(var.shape.is_empty());
                assert_eq!(Some(vec![2.0]), var.array().unwrap().elements::<f64>());
            }
            node => panic!("unexpected node {:?}", node),
        }
    }

    #[test]
    fn mean_along_axis() {
        let registry = FunctionRegistry::with_builtins();
        let dataset = test_utils::grid_dataset();
        match registry.project(&dataset, "mean(sst.sst,0)").unwrap() {
            DapNode::Base(var) => {
                assert_eq!(vec![3], var.shape);
                assert_eq!(
                    Some(vec![2.5, 3.5, 4.5]),
                    var.array().unwrap().elements::<f64>()
                );
            }
            node => panic!("unexpected node {:?}", node),
        }
        assert!(registry.project(&dataset, "mean(sst.sst,2)").is_err());
    }

    #[test]
    fn mean_of_strings() {
        let registry = FunctionRegistry::with_builtins();
        let dataset = test_utils::simple_dataset();
        assert!(registry.project(&dataset, "mean(c)").is_err());
    }

    #[test]
    fn bounds_filters_records() {
        let registry = FunctionRegistry::with_builtins();
        let dataset = test_utils::sequence_dataset();
        let selected = registry.select(&dataset, "bounds(cast.n,5,10)").unwrap();
        match selected.get("cast").unwrap() {
            DapNode::Sequence(seq) => {
                let records = seq.records().unwrap();
                assert_eq!(2, records.len());
                assert_eq!(test_utils::int(10), records[0][0]);
                assert_eq!(test_utils::int(5), records[1][0]);
            }
            node => panic!("unexpected node {:?}", node),
        }
    }

    #[test]
    fn unresolved_argument() {
        let registry = FunctionRegistry::with_builtins();
        let dataset = test_utils::sequence_dataset();
        match registry.select(&dataset, "bounds(cast.m,5,10)").unwrap_err() {
            DapError::UnknownVariable(name) => assert_eq!("cast.m", name),
            err => panic!("unexpected error {}", err),
        }
    }
}
