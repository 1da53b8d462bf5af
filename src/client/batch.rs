//! Batching of array fetches.

use crate::array::DapArray;
use crate::client::proxy::{ArrayProxy, Connection};
use crate::error::DapError;

/// A queue of pending array fetches against one dataset.
///
/// Proxies are queued with [BatchQueue::push] and fetched together in a single request by
/// [BatchQueue::flush]. Nothing is sent until the queue is flushed.
#[derive(Debug)]
pub struct BatchQueue {
    baseurl: String,
    connection: Connection,
    pending: Vec<ArrayProxy>,
}

impl BatchQueue {
    /// Return a new, empty BatchQueue.
    ///
    /// # Arguments
    ///
    /// * `baseurl`: URL of the dataset, without response suffix
    /// * `connection`: Connection used for the batched request
    pub fn new(baseurl: &str, connection: Connection) -> Self {
        BatchQueue {
            baseurl: baseurl.to_string(),
            connection,
            pending: vec![],
        }
    }

    /// Queue a proxy, returning its position in the results of the next flush.
    ///
    /// The proxy must belong to this queue's dataset and carry no selection of its own. Each
    /// variable may be queued once per batch.
    pub fn push(&mut self, proxy: &ArrayProxy) -> Result<usize, DapError> {
        if proxy.baseurl() != self.baseurl {
            return Err(DapError::UnsupportedOperation {
                operation: "batching",
                kind: "foreign dataset",
                id: proxy.id().to_string(),
            });
        }
        if !proxy.selection().is_empty() {
            return Err(DapError::UnsupportedOperation {
                operation: "batching",
                kind: "filtered array",
                id: proxy.id().to_string(),
            });
        }
        if self.pending.iter().any(|pending| pending.id() == proxy.id()) {
            return Err(DapError::UnsupportedOperation {
                operation: "batching",
                kind: "duplicate variable",
                id: proxy.id().to_string(),
            });
        }
        self.pending.push(proxy.clone());
        Ok(self.pending.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// URL of the batched request, or `None` if no queued proxy needs the server.
    pub fn url(&self) -> Option<String> {
        let projections: Vec<String> = self
            .pending
            .iter()
            .filter_map(ArrayProxy::projection)
            .collect();
        if projections.is_empty() {
            return None;
        }
        Some(format!("{}.dods?{}", self.baseurl, projections.join(",")))
    }

    /// Fetch every queued array in one request.
    ///
    /// Results are in the order the proxies were pushed. The queue is emptied only when the
    /// fetch succeeds.
    #[tracing::instrument(
        level = "DEBUG",
        skip(self),
        fields(baseurl = %self.baseurl, pending = self.pending.len())
    )]
    pub fn flush(&mut self) -> Result<Vec<DapArray>, DapError> {
        let response = match self.url() {
            Some(url) => Some(self.connection.fetch_dods(&url)?),
            None => None,
        };
        let results = self
            .pending
            .iter()
            .map(|proxy| match (&response, proxy.projection()) {
                (Some(dataset), Some(_)) => proxy.extract(dataset),
                _ => proxy.empty(),
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.pending.clear();
        Ok(results)
    }
}
