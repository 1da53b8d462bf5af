//! The HTTP collaborator used to fetch remote responses.

use crate::error::{DapError, ErrorPayload};

use bytes::{Bytes, BytesMut};
use std::fmt;
use std::io::Read;
use std::time::Duration;

pub use crate::codec::stream::ChunkIter;

/// Default size of the chunks read from a response body.
const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// A response from the HTTP collaborator, with a body delivered in chunks.
pub struct FetchResponse {
    pub status: u16,
    pub headers: reqwest::header::HeaderMap,
    pub body: ChunkIter,
}

impl fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish()
    }
}

impl FetchResponse {
    /// Read the whole body.
    pub fn bytes(self) -> Result<Bytes, DapError> {
        let mut buf = BytesMut::new();
        for chunk in self.body {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Read the whole body as UTF-8 text.
    pub fn text(self) -> Result<String, DapError> {
        Ok(String::from_utf8(self.bytes()?.to_vec())?)
    }
}

/// Trait for fetching URLs.
///
/// Session handling, redirects, caching and retries are the business of the implementation.
pub trait Fetcher: Send + Sync + fmt::Debug {
    /// Fetch a URL.
    ///
    /// Returns the response whatever its status.
    ///
    /// # Arguments
    ///
    /// * `url`: URL to fetch
    /// * `timeout`: Optional limit on the duration of the request
    fn fetch(&self, url: &str, timeout: Option<Duration>) -> Result<FetchResponse, DapError>;
}

/// Fetch a URL, turning unsuccessful responses into errors.
///
/// A body holding a DAP `Error { ... }` object becomes a [DapError::Server]; any other
/// unsuccessful response becomes a [DapError::HttpStatus].
#[tracing::instrument(level = "DEBUG", skip(fetcher))]
pub fn fetch_checked(
    fetcher: &dyn Fetcher,
    url: &str,
    timeout: Option<Duration>,
) -> Result<FetchResponse, DapError> {
    let response = fetcher.fetch(url, timeout)?;
    if (200..300).contains(&response.status) {
        return Ok(response);
    }
    let status = response.status;
    let body = response.text().unwrap_or_default();
    match ErrorPayload::parse(&body) {
        Some(payload) => Err(payload.into()),
        None => Err(DapError::HttpStatus {
            url: url.to_string(),
            status,
        }),
    }
}

/// HTTP fetcher backed by a blocking [reqwest] client.
#[derive(Debug)]
pub struct ReqwestFetcher {
    client: reqwest::blocking::Client,
    chunk_size: usize,
}

impl ReqwestFetcher {
    /// Create a new HTTP fetcher.
    pub fn new() -> Self {
        Self::with_client(reqwest::blocking::Client::new())
    }

    /// Create an HTTP fetcher using a preconfigured client, e.g. one holding session cookies.
    pub fn with_client(client: reqwest::blocking::Client) -> Self {
        Self {
            client,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Default for ReqwestFetcher {
    /// Create a default HTTP fetcher.
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher for ReqwestFetcher {
    #[tracing::instrument(level = "DEBUG", skip(self))]
    fn fetch(&self, url: &str, timeout: Option<Duration>) -> Result<FetchResponse, DapError> {
        let mut request = self.client.get(url);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().map_err(|err| {
            if err.is_timeout() {
                DapError::Timeout {
                    url: url.to_string(),
                }
            } else {
                DapError::from(err)
            }
        })?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        Ok(FetchResponse {
            status,
            headers,
            body: Box::new(ReadChunks::new(response, self.chunk_size, url)),
        })
    }
}

/// Iterator over the chunks of a blocking reader.
struct ReadChunks<R> {
    reader: R,
    chunk_size: usize,
    url: String,
    done: bool,
}

impl<R: Read> ReadChunks<R> {
    fn new(reader: R, chunk_size: usize, url: &str) -> Self {
        ReadChunks {
            reader,
            chunk_size: chunk_size.max(1),
            url: url.to_string(),
            done: false,
        }
    }
}

impl<R: Read> Iterator for ReadChunks<R> {
    type Item = Result<Bytes, DapError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = vec![0; self.chunk_size];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(n) => {
                    buf.truncate(n);
                    return Some(Ok(Bytes::from(buf)));
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.done = true;
                    if err.kind() == std::io::ErrorKind::TimedOut {
                        return Some(Err(DapError::Timeout {
                            url: self.url.clone(),
                        }));
                    }
                    return Some(Err(err.into()));
                }
            }
        }
    }
}
