//! Parsing of DAP2 constraint expressions.
//!
//! A constraint expression is the query string of a data request: an optional projection (a
//! comma separated list of variable paths with hyperslabs, or function calls) followed by
//! `&`-separated selection clauses.
//!
//! ```text
//! cast.lat,cast.lon,sst[0:1:10][2]&cast.lat>10&cast.name=~"ab.*"
//! ```

use crate::error::DapError;
use crate::model::Dataset;
use crate::models::Slice;

use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;

lazy_static! {
    static ref SEGMENT: Regex = Regex::new(r"^([^\[\]]+)((?:\[[^\[\]]*\])*)$").unwrap();
    static ref HYPERSLAB: Regex = Regex::new(r"\[([^\[\]]*)\]").unwrap();
    static ref OPERATOR: Regex = Regex::new(r"<=|>=|!=|=~|>|<|=").unwrap();
    static ref FUNCTION_CALL: Regex = Regex::new(r"^[\w.]+\(.*\)$").unwrap();
}

/// Relational operators of a selection clause.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operator {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    /// Regular expression match, anchored at the start of the string
    Match,
}

impl Operator {
    fn from_token(token: &str) -> Option<Self> {
        let operator = match token {
            "<" => Operator::Lt,
            "<=" => Operator::Le,
            ">" => Operator::Gt,
            ">=" => Operator::Ge,
            "=" => Operator::Eq,
            "!=" => Operator::Ne,
            "=~" => Operator::Match,
            _ => return None,
        };
        Some(operator)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Match => "=~",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One dot-separated segment of a projected path, with its hyperslab.
#[derive(Clone, Debug, PartialEq)]
pub struct PathSegment {
    pub name: String,
    pub slices: Vec<Slice>,
}

impl PathSegment {
    pub fn new(name: &str) -> Self {
        PathSegment {
            name: name.to_string(),
            slices: vec![],
        }
    }
}

/// One item of a projection.
#[derive(Clone, Debug, PartialEq)]
pub enum ProjectionItem {
    /// Path to a variable, from the dataset root
    Path(Vec<PathSegment>),
    /// Raw function call, e.g. `geogrid(sst,10,20,30,40)`
    Function(String),
}

/// One `&`-separated clause of a selection.
#[derive(Clone, Debug, PartialEq)]
pub enum SelectionClause {
    /// `left op right`; operands are variable ids or literals
    Predicate {
        left: String,
        op: Operator,
        right: String,
    },
    /// Raw function call
    Function(String),
}

impl fmt::Display for SelectionClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionClause::Predicate { left, op, right } => {
                write!(f, "{}{}{}", left, op, right)
            }
            SelectionClause::Function(call) => f.write_str(call),
        }
    }
}

pub type Projection = Vec<ProjectionItem>;
pub type Selection = Vec<SelectionClause>;

fn ce_error(message: impl Into<String>, remainder: &str) -> DapError {
    DapError::parse("constraint expression", message, remainder)
}

/// Split `text` on `separator`, ignoring separators inside parentheses, brackets and double
/// quoted strings.
pub(crate) fn split_top_level(text: &str, separator: char) -> Vec<&str> {
    let mut parts = vec![];
    let mut depth = 0_i32;
    let mut quoted = false;
    let mut start = 0;
    let mut escaped = false;
    for (index, c) in text.char_indices() {
        if quoted {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => quoted = false,
                _ => (),
            }
            continue;
        }
        match c {
            '"' => quoted = true,
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            _ if c == separator && depth == 0 => {
                parts.push(&text[start..index]);
                start = index + c.len_utf8();
            }
            _ => (),
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Whether a relational operator occurs outside parentheses and strings.
fn has_operator(token: &str) -> bool {
    let mut depth = 0_i32;
    let mut quoted = false;
    for c in token.chars() {
        match c {
            '"' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => depth -= 1,
            '<' | '>' | '=' if !quoted && depth == 0 => return true,
            _ => (),
        }
    }
    false
}

/// Parse a constraint expression from a raw, possibly percent-encoded, query string.
#[tracing::instrument(level = "DEBUG")]
pub fn parse_ce(query: &str) -> Result<(Projection, Selection), DapError> {
    let decoded = urlencoding::decode(query)
        .map_err(|_| ce_error("invalid percent encoding", query))?;
    let mut tokens = decoded.split('&').filter(|token| !token.trim().is_empty());

    let mut projection = vec![];
    let mut selection = vec![];
    if let Some(first) = tokens.next() {
        if has_operator(first) {
            selection.push(parse_selection(first)?);
        } else {
            projection = parse_projection(first)?;
        }
    }
    for token in tokens {
        selection.push(parse_selection(token)?);
    }
    Ok((projection, selection))
}

fn parse_projection(token: &str) -> Result<Projection, DapError> {
    split_top_level(token, ',')
        .into_iter()
        .map(|item| {
            let item = item.trim();
            if item.is_empty() {
                Err(ce_error("empty projection item", token))
            } else if item.contains('(') {
                Ok(ProjectionItem::Function(item.to_string()))
            } else {
                let segments = split_top_level(item, '.')
                    .into_iter()
                    .map(parse_segment)
                    .collect::<Result<Vec<PathSegment>, DapError>>()?;
                Ok(ProjectionItem::Path(segments))
            }
        })
        .collect()
}

fn parse_segment(text: &str) -> Result<PathSegment, DapError> {
    let captures = SEGMENT
        .captures(text.trim())
        .ok_or_else(|| ce_error("invalid variable name", text))?;
    let name = captures.get(1).map_or("", |m| m.as_str());
    let slices = match captures.get(2) {
        Some(hyperslabs) => HYPERSLAB
            .captures_iter(hyperslabs.as_str())
            .map(|c| parse_hyperslab(c.get(1).map_or("", |m| m.as_str())))
            .collect::<Result<Vec<Slice>, DapError>>()?,
        None => vec![],
    };
    Ok(PathSegment {
        name: name.to_string(),
        slices,
    })
}

/// Parse the body of one `[start]`, `[start:last]` or `[start:step:last]` clause.
///
/// Bounds are inclusive on the wire.
fn parse_hyperslab(text: &str) -> Result<Slice, DapError> {
    let numbers = text
        .split(':')
        .map(|part| part.trim().parse::<usize>())
        .collect::<Result<Vec<usize>, _>>()
        .map_err(|_| DapError::InvalidHyperslab(format!("[{}]", text)))?;
    let (start, step, last) = match numbers.as_slice() {
        [index] => (*index, 1, *index),
        [start, last] => (*start, 1, *last),
        [start, step, last] => (*start, *step, *last),
        _ => return Err(DapError::InvalidHyperslab(format!("[{}]", text))),
    };
    if step == 0 || last < start {
        return Err(DapError::InvalidHyperslab(format!("[{}]", text)));
    }
    Ok(Slice::from_hyperslab(start, step, last))
}

fn parse_selection(token: &str) -> Result<SelectionClause, DapError> {
    let token = token.trim();
    if split_top_level(token, '|').len() > 1 {
        return Err(DapError::DisallowedOr(token.to_string()));
    }
    if !has_operator(token) {
        if FUNCTION_CALL.is_match(token) {
            return Ok(SelectionClause::Function(token.to_string()));
        }
        return Err(DapError::InvalidSelection(token.to_string()));
    }
    let found = OPERATOR
        .find(token)
        .ok_or_else(|| DapError::InvalidSelection(token.to_string()))?;
    let op = Operator::from_token(found.as_str())
        .ok_or_else(|| DapError::InvalidSelection(token.to_string()))?;
    let left = token[..found.start()].trim();
    let right = token[found.end()..].trim();
    if left.is_empty() || right.is_empty() || right.starts_with(['<', '>', '=', '!']) {
        return Err(DapError::InvalidSelection(token.to_string()));
    }
    Ok(SelectionClause::Predicate {
        left: left.to_string(),
        op,
        right: right.to_string(),
    })
}

/// Expand bare variable names into full paths.
///
/// A single segment name that is not a top level variable is looked up by name among all
/// variables. One match is replaced by its full path, keeping the hyperslab on the last
/// segment; several matches are ambiguous. Names matching nothing are left for the evaluator
/// to report as unknown.
pub fn fix_shorthand(projection: &Projection, dataset: &Dataset) -> Result<Projection, DapError> {
    projection
        .iter()
        .map(|item| match item {
            ProjectionItem::Path(segments) if segments.len() == 1 => {
                let segment = &segments[0];
                if dataset.get(&segment.name).is_some() {
                    return Ok(item.clone());
                }
                let matches: Vec<&str> = dataset
                    .walk()
                    .into_iter()
                    .filter(|node| node.name() == segment.name || node.key() == segment.name)
                    .map(|node| node.id())
                    .collect();
                match matches.as_slice() {
                    [] => Ok(item.clone()),
                    [id] => {
                        let mut expanded: Vec<PathSegment> =
                            id.split('.').map(PathSegment::new).collect();
                        if let Some(last) = expanded.last_mut() {
                            last.slices = segment.slices.clone();
                        }
                        Ok(ProjectionItem::Path(expanded))
                    }
                    _ => Err(DapError::AmbiguousShorthand(segment.name.clone())),
                }
            }
            _ => Ok(item.clone()),
        })
        .collect()
}
