//! Lazy handles to remote arrays and sequences.

use crate::array::DapArray;
use crate::client::http::{fetch_checked, FetchResponse, Fetcher, ReqwestFetcher};
use crate::codec::decode::{decode_dods, RecordStream};
use crate::codec::stream::StreamReader;
use crate::codec::DATA_MARKER;
use crate::error::DapError;
use crate::model::{remap_record, Container, DapNode, Dataset, Record};
use crate::models::{compose_slices, hyperslab, ConstraintExpression, DType, Slice};
use crate::parsers::parse_dds;
use crate::types::DValue;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Records of a remote sequence, decoded as they are read.
pub type RecordIter = Box<dyn Iterator<Item = Result<Record, DapError>> + Send>;

/// A fetcher and the options of its requests, shared by every proxy of a dataset.
#[derive(Clone, Debug)]
pub struct Connection {
    fetcher: Arc<dyn Fetcher>,
    timeout: Option<Duration>,
}

impl Connection {
    /// Return a new Connection.
    ///
    /// # Arguments
    ///
    /// * `fetcher`: HTTP collaborator used for every request
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Connection {
            fetcher,
            timeout: None,
        }
    }

    /// A connection using a default [ReqwestFetcher].
    pub fn http() -> Self {
        Self::new(Arc::new(ReqwestFetcher::new()))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Fetch a URL, failing on unsuccessful responses.
    pub fn fetch(&self, url: &str) -> Result<FetchResponse, DapError> {
        fetch_checked(self.fetcher.as_ref(), url, self.timeout)
    }

    /// Fetch and decode a `.dods` response.
    pub(crate) fn fetch_dods(&self, url: &str) -> Result<Dataset, DapError> {
        let response = self.fetch(url)?;
        decode_dods(&mut StreamReader::new(response.body))
    }
}

/// Join the clauses of a selection into a query suffix.
fn selection_query(selection: &[String]) -> String {
    selection.iter().map(|clause| format!("&{}", clause)).collect()
}

/// Lazy handle to an array on a remote server.
///
/// Slicing composes with any previous slice and never fetches. The array is requested as
/// `<baseurl>.dods?<id><hyperslab>&<selection>` each time it is materialized.
#[derive(Clone, Debug)]
pub struct ArrayProxy {
    baseurl: String,
    id: String,
    dtype: DType,
    /// Shape of the whole remote array
    shape: Vec<usize>,
    /// Selection on the remote array, one slice per dimension
    slices: Vec<Slice>,
    selection: Vec<String>,
    connection: Connection,
}

impl ArrayProxy {
    /// Return a new ArrayProxy over a whole remote array.
    ///
    /// # Arguments
    ///
    /// * `baseurl`: URL of the dataset, without response suffix
    /// * `id`: Id of the variable on the server
    /// * `dtype`: Data type of the variable
    /// * `shape`: Shape of the variable
    /// * `connection`: Connection used to fetch the data
    pub fn new(
        baseurl: &str,
        id: &str,
        dtype: DType,
        shape: Vec<usize>,
        connection: Connection,
    ) -> Self {
        ArrayProxy {
            baseurl: baseurl.to_string(),
            id: id.to_string(),
            dtype,
            slices: vec![Slice::full(); shape.len()],
            shape,
            selection: vec![],
            connection,
        }
    }

    pub fn baseurl(&self) -> &str {
        &self.baseurl
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    /// Shape of the data this proxy will produce.
    pub fn shape(&self) -> Vec<usize> {
        self.shape
            .iter()
            .zip(&self.slices)
            .map(|(length, slice)| slice.len(*length))
            .collect()
    }

    pub(crate) fn selection(&self) -> &[String] {
        &self.selection
    }

    /// A proxy over a slice of this one.
    pub fn slice(&self, slices: &[Slice]) -> ArrayProxy {
        let mut out = self.clone();
        out.slices = compose_slices(&self.slices, slices);
        out
    }

    /// A proxy whose request carries an additional selection.
    pub fn filter(&self, expression: &ConstraintExpression) -> ArrayProxy {
        let mut out = self.clone();
        out.selection
            .extend(expression.clauses().map(str::to_string));
        out
    }

    /// The projection item requesting this array, or `None` if it selects nothing.
    pub fn projection(&self) -> Option<String> {
        hyperslab(&self.slices, &self.shape).map(|slab| format!("{}{}", self.id, slab))
    }

    /// URL of the data request, or `None` if the proxy selects nothing.
    pub fn url(&self) -> Option<String> {
        self.projection().map(|projection| {
            format!(
                "{}.dods?{}{}",
                self.baseurl,
                projection,
                selection_query(&self.selection)
            )
        })
    }

    /// An empty array of the proxy's shape, served without a request.
    pub(crate) fn empty(&self) -> Result<DapArray, DapError> {
        DapArray::from_values(self.dtype, &self.shape(), &[])
    }

    /// Take the data of this proxy out of a decoded response.
    pub(crate) fn extract(&self, dataset: &Dataset) -> Result<DapArray, DapError> {
        let node = dataset
            .find(&self.id)
            .ok_or_else(|| DapError::UnknownVariable(self.id.clone()))?;
        let array = match node {
            DapNode::Base(var) => var.array()?,
            node => {
                return Err(DapError::UnsupportedOperation {
                    operation: "array fetch",
                    kind: node.kind(),
                    id: self.id.clone(),
                })
            }
        };
        let expected = self.shape();
        if array.shape() != expected.as_slice() {
            return Err(DapError::ShapeMismatch {
                id: self.id.clone(),
                expected: expected.iter().product(),
                found: array.len(),
            });
        }
        Ok(array)
    }

    /// Fetch the selected data.
    ///
    /// The proxy is unchanged whether or not the fetch succeeds.
    #[tracing::instrument(level = "DEBUG", skip(self), fields(id = %self.id))]
    pub fn fetch(&self) -> Result<DapArray, DapError> {
        match self.url() {
            Some(url) => self.extract(&self.connection.fetch_dods(&url)?),
            None => self.empty(),
        }
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.connection
    }
}

/// Lazy handle to a sequence on a remote server.
///
/// Filters, row slices and projections are accumulated into the request. Records are
/// streamed from the response, with row slices applied as they arrive.
#[derive(Clone, Debug)]
pub struct SequenceProxy {
    baseurl: String,
    id: String,
    /// Layout of the records produced by this proxy
    template: Container,
    selection: Vec<String>,
    rows: Slice,
    connection: Connection,
}

impl SequenceProxy {
    /// Return a new SequenceProxy producing every column of a remote sequence.
    ///
    /// # Arguments
    ///
    /// * `baseurl`: URL of the dataset, without response suffix
    /// * `id`: Id of the sequence on the server
    /// * `template`: Members of the sequence
    /// * `connection`: Connection used to fetch the data
    pub fn new(baseurl: &str, id: &str, template: &Container, connection: Connection) -> Self {
        SequenceProxy {
            baseurl: baseurl.to_string(),
            id: id.to_string(),
            template: template.clone(),
            selection: vec![],
            rows: Slice::full(),
            connection,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Layout of the records produced by this proxy.
    pub fn template(&self) -> &Container {
        &self.template
    }

    /// A proxy that only produces records matching `expression`.
    pub fn filter(&self, expression: &ConstraintExpression) -> SequenceProxy {
        let mut out = self.clone();
        out.selection
            .extend(expression.clauses().map(str::to_string));
        out
    }

    /// A proxy that only produces the selected rows.
    pub fn rows(&self, slice: Slice) -> SequenceProxy {
        let mut out = self.clone();
        out.rows = self.rows.compose(&slice);
        out
    }

    /// A proxy producing records laid out like `template`, which holds a subset of the
    /// current members.
    pub fn project(&self, template: Container) -> SequenceProxy {
        let mut out = self.clone();
        out.template = template;
        out
    }

    /// A column of the sequence, for building selections.
    pub fn column(&self, name: &str) -> Result<Column, DapError> {
        let member = self
            .template
            .get(name)
            .ok_or_else(|| DapError::UnknownVariable(format!("{}.{}", self.id, name)))?;
        Ok(Column {
            id: format!("{}.{}", self.id, member.key()),
        })
    }

    /// URL of the data request.
    pub fn url(&self) -> String {
        let mut columns = vec![];
        leaf_ids(&self.template, &self.id, &mut columns);
        format!(
            "{}.dods?{}{}",
            self.baseurl,
            columns.join(","),
            selection_query(&self.selection)
        )
    }

    /// Fetch the records, decoding them lazily.
    ///
    /// Every call makes a new request.
    #[tracing::instrument(level = "DEBUG", skip(self), fields(id = %self.id))]
    pub fn records(&self) -> Result<RecordIter, DapError> {
        let response = self.connection.fetch(&self.url())?;
        let mut reader = StreamReader::new(response.body);
        let dds = reader.read_until(DATA_MARKER)?;
        let descriptor = parse_dds(&String::from_utf8(dds.to_vec())?)?;
        let remote = match descriptor.find(&self.id) {
            Some(DapNode::Sequence(seq)) => seq.container.clone(),
            _ => return Err(DapError::UnknownVariable(self.id.clone())),
        };

        let stream = RecordStream::new(reader, &remote);
        let source = stream.container().clone();
        let template = self.template.clone();
        let rows = self.rows;
        let step = rows.step.max(1);
        let records = stream
            .enumerate()
            .take_while(move |(index, _)| rows.stop.map_or(true, |stop| *index < stop))
            .filter_map(move |(index, record)| match record {
                Err(err) => Some(Err(err)),
                Ok(record) if index >= rows.start && (index - rows.start) % step == 0 => {
                    Some(remap_record(&record, &source, &template))
                }
                Ok(_) => None,
            });
        Ok(Box::new(records))
    }
}

/// Ids of the atomic members of `container`, relative to the remote id `prefix`.
fn leaf_ids(container: &Container, prefix: &str, out: &mut Vec<String>) {
    for member in container.members() {
        let id = format!("{}.{}", prefix, member.key());
        match member.container() {
            Some(inner) => leaf_ids(inner, &id, out),
            None => out.push(id),
        }
    }
}

/// Render a value as the right operand of a selection clause.
fn operand(value: DValue) -> String {
    match value {
        DValue::Str(s) => format!("\"{}\"", s.replace('"', "\\\"")),
        value => value.to_string(),
    }
}

/// Trait for building selection clauses on a remote variable.
///
/// Each method returns a [ConstraintExpression]; expressions combine with `&`.
pub trait Compare {
    /// Id of the variable on the server.
    fn remote_id(&self) -> &str;

    fn clause(&self, op: &str, value: impl Into<DValue>) -> ConstraintExpression {
        ConstraintExpression::new(format!("{}{}{}", self.remote_id(), op, operand(value.into())))
    }

    fn eq(&self, value: impl Into<DValue>) -> ConstraintExpression {
        self.clause("=", value)
    }

    fn ne(&self, value: impl Into<DValue>) -> ConstraintExpression {
        self.clause("!=", value)
    }

    fn lt(&self, value: impl Into<DValue>) -> ConstraintExpression {
        self.clause("<", value)
    }

    fn le(&self, value: impl Into<DValue>) -> ConstraintExpression {
        self.clause("<=", value)
    }

    fn gt(&self, value: impl Into<DValue>) -> ConstraintExpression {
        self.clause(">", value)
    }

    fn ge(&self, value: impl Into<DValue>) -> ConstraintExpression {
        self.clause(">=", value)
    }

    /// Regular expression match on a string variable.
    fn matches(&self, pattern: &str) -> ConstraintExpression {
        self.clause("=~", pattern)
    }
}

/// A column of a remote sequence.
#[derive(Clone, Debug)]
pub struct Column {
    id: String,
}

impl Compare for Column {
    fn remote_id(&self) -> &str {
        &self.id
    }
}

impl Compare for ArrayProxy {
    fn remote_id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
