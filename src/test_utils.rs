use crate::array::DapArray;
use crate::client::http::{ChunkIter, FetchResponse, Fetcher};
use crate::codec::dods_response;
use crate::constraint::parse_ce;
use crate::error::DapError;
use crate::evaluator::apply_constraint;
use crate::functions::FunctionRegistry;
use crate::model::*;
use crate::models::DType;
use crate::types::DValue;

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub(crate) fn int(value: i64) -> Value {
    Value::Atom(DValue::Int(value))
}

pub(crate) fn float(value: f64) -> Value {
    Value::Atom(DValue::Float(value))
}

pub(crate) fn string(value: &str) -> Value {
    Value::Atom(DValue::Str(value.to_string()))
}

/// Atomic variables and a structure, all with data.
///
/// ```text
/// Dataset {
///     Int32 a[5];
///     Float64 b;
///     String c[2];
///     Structure {
///         Int16 x[3];
///         Byte y;
///     } s;
/// } simple;
/// ```
pub(crate) fn simple_dataset() -> Dataset {
    let a = BaseType::new("a", DType::Int32, vec![5])
        .with_data(DapArray::from_vec(&[5], vec![0_i32, 1, 2, 3, 4]).unwrap());
    let b = BaseType::new("b", DType::Float64, vec![])
        .with_data(DapArray::from_vec(&[], vec![1.5_f64]).unwrap());
    let c = BaseType::new("c", DType::String, vec![2]).with_data(
        DapArray::from_strings(&[2], vec!["one".to_string(), "two".to_string()]).unwrap(),
    );
    let x = BaseType::new("x", DType::Int16, vec![3])
        .with_data(DapArray::from_vec(&[3], vec![-1_i16, 0, 1]).unwrap());
    let y = BaseType::new("y", DType::Byte, vec![])
        .with_data(DapArray::from_vec(&[], vec![7_u8]).unwrap());
    let s = Container::new("s").with(x).with(y);
    Dataset::new("simple")
        .with(a)
        .with(b)
        .with(c)
        .with(structure(s))
}

/// A sequence of `(n, label)` records: `(10, "x")`, `(20, "y")`, `(5, "z")`.
pub(crate) fn sequence_dataset() -> Dataset {
    let cast = Sequence::new("cast")
        .with(BaseType::new("n", DType::Int32, vec![]))
        .with(BaseType::new("label", DType::String, vec![]))
        .with_records(vec![
            vec![int(10), string("x")],
            vec![int(20), string("y")],
            vec![int(5), string("z")],
        ]);
    Dataset::new("seqs").with(cast)
}

/// A sequence with fields `a`, `b` and `c`.
pub(crate) fn columns_dataset() -> Dataset {
    let seq = Sequence::new("seq")
        .with(BaseType::new("a", DType::Int32, vec![]))
        .with(BaseType::new("b", DType::Float64, vec![]))
        .with(BaseType::new("c", DType::String, vec![]))
        .with_records(vec![
            vec![int(1), float(1.5), string("one")],
            vec![int(2), float(2.5), string("two")],
            vec![int(3), float(3.5), string("three")],
        ]);
    Dataset::new("columns").with(seq)
}

/// A sequence of stations, each with a nested sequence of observations.
pub(crate) fn nested_sequence_dataset() -> Dataset {
    let obs = Sequence::new("obs")
        .with(BaseType::new("t", DType::Float64, vec![]))
        .with(BaseType::new("q", DType::Int32, vec![]));
    let stations = Sequence::new("stations")
        .with(BaseType::new("id", DType::Int32, vec![]))
        .with(obs)
        .with_records(vec![
            vec![
                int(1),
                Value::Seq(vec![vec![float(1.5), int(0)], vec![float(2.5), int(1)]]),
            ],
            vec![int(2), Value::Seq(vec![vec![float(3.5), int(1)]])],
        ]);
    Dataset::new("nested").with(stations)
}

/// A grid of sea surface temperatures with time and latitude maps.
pub(crate) fn grid_dataset() -> Dataset {
    let sst = BaseType::new("sst", DType::Float32, vec![2, 3])
        .with_dims(vec!["time".to_string(), "lat".to_string()])
        .with_data(
            DapArray::from_vec(&[2, 3], vec![1.0_f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap(),
        );
    let time = BaseType::new("time", DType::Float64, vec![2])
        .with_dims(vec!["time".to_string()])
        .with_data(DapArray::from_vec(&[2], vec![0.0_f64, 1.0]).unwrap());
    let lat = BaseType::new("lat", DType::Float64, vec![3])
        .with_dims(vec!["lat".to_string()])
        .with_data(DapArray::from_vec(&[3], vec![-10.0_f64, 0.0, 10.0]).unwrap());
    Dataset::new("grids").with(grid("sst", sst, vec![time, lat]))
}

/// Two structures that both own a child named `c`.
pub(crate) fn ambiguous_dataset() -> Dataset {
    let s1 = Container::new("s1").with(
        BaseType::new("c", DType::Int32, vec![])
            .with_data(DapArray::from_vec(&[], vec![1_i32]).unwrap()),
    );
    let s2 = Container::new("s2").with(
        BaseType::new("c", DType::Int32, vec![])
            .with_data(DapArray::from_vec(&[], vec![2_i32]).unwrap()),
    );
    Dataset::new("ambiguous")
        .with(structure(s1))
        .with(structure(s2))
}

/// Split a payload into chunks of at most `chunk_size` bytes.
pub(crate) fn chunks(payload: &Bytes, chunk_size: usize) -> ChunkIter {
    let chunk_size = chunk_size.max(1);
    let payload = payload.clone();
    let mut offset = 0;
    Box::new(std::iter::from_fn(move || {
        if offset >= payload.len() {
            return None;
        }
        let end = (offset + chunk_size).min(payload.len());
        let chunk = payload.slice(offset..end);
        offset = end;
        Some(Ok(chunk))
    }))
}

/// A [Fetcher] serving canned responses, delivered in fixed size chunks.
#[derive(Debug, Default)]
pub(crate) struct StaticFetcher {
    responses: HashMap<String, (u16, Bytes)>,
    chunk_size: usize,
    /// Requested URLs, in order
    pub requests: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub(crate) fn new(chunk_size: usize) -> Self {
        StaticFetcher {
            chunk_size,
            ..Default::default()
        }
    }

    pub(crate) fn respond(mut self, url: &str, status: u16, body: impl Into<Bytes>) -> Self {
        self.responses.insert(url.to_string(), (status, body.into()));
        self
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Fetcher for StaticFetcher {
    fn fetch(&self, url: &str, timeout: Option<Duration>) -> Result<FetchResponse, DapError> {
        self.requests.lock().unwrap().push(url.to_string());
        if timeout == Some(Duration::ZERO) {
            return Err(DapError::Timeout {
                url: url.to_string(),
            });
        }
        let (status, body) = self.responses.get(url).cloned().unwrap_or_else(|| {
            (
                404,
                Bytes::from("Error {\n    code = 1001;\n    message = \"not found\";\n};\n"),
            )
        });
        Ok(FetchResponse {
            status,
            headers: Default::default(),
            body: chunks(&body, self.chunk_size),
        })
    }
}

/// A [StaticFetcher] serving the `.dods` response of `dataset` to each constraint expression,
/// as a server at `base` would.
pub(crate) fn serve_dods(base: &str, dataset: &Dataset, queries: &[&str]) -> StaticFetcher {
    let mut fetcher = StaticFetcher::new(3);
    for query in queries {
        let (projection, selection) = parse_ce(query).unwrap();
        let constrained =
            apply_constraint(dataset, &projection, &selection, &FunctionRegistry::new()).unwrap();
        fetcher = fetcher.respond(
            &format!("{}.dods?{}", base, query),
            200,
            dods_response(&constrained).unwrap(),
        );
    }
    fetcher
}
