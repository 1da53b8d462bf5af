//! Client side access to remote DAP datasets.
//!
//! Datasets opened with [open_url] hold lazy proxies instead of data. Slicing, filtering and
//! projecting a proxy only rewrites the request it will eventually make; data is fetched when
//! it is materialized, one round trip at a time.

pub mod batch;
pub mod http;
pub mod open;
pub mod proxy;

pub use batch::BatchQueue;
pub use http::{fetch_checked, FetchResponse, Fetcher, ReqwestFetcher};
pub use open::open_url;
pub use proxy::{ArrayProxy, Column, Compare, Connection, SequenceProxy};
