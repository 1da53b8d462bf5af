//! This crate implements the Data Access Protocol (DAP2, with DAP4 metadata), used to access
//! remote scientific datasets made of multi-dimensional arrays, nested records, grids and
//! groups.
//!
//! The core of the crate is a constraint expression engine and the DODS wire codec:
//!
//! * [parsers] build a dataless [model::Dataset] from DDS, DAS and DMR metadata.
//! * [constraint] parses constraint expressions into projections and selections, which
//!   [evaluator] applies to a dataset without materializing its data.
//! * [codec] encodes and decodes the binary DODS payload, streaming sequences whose length is
//!   not known in advance.
//! * [client] opens remote datasets as trees of lazy proxies.
//! * [responses] render DDS, DAS, DMR and ASCII responses.
//!
//! A thin DAP server is built on top of these components.
//!
//! * [Tokio](tokio), the most popular asynchronous Rust runtime.
//! * [Axum](axum) web framework, built by the Tokio team, on top of the [hyper] HTTP library.
//! * [reqwest] performs blocking HTTP requests for the client.
//! * [ndarray] provides [NumPy](https://numpy.org)-like n-dimensional arrays holding variable
//!   data.
//! * [roxmltree] parses DMR documents.

pub mod app;
pub mod app_state;
pub mod array;
pub mod cli;
pub mod client;
pub mod codec;
pub mod constraint;
pub mod element;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod handlers;
pub mod metrics;
pub mod model;
pub mod models;
pub mod parsers;
pub mod responses;
pub mod server;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
pub mod types;

pub use client::{open_url, ArrayProxy, BatchQueue, Connection, SequenceProxy};
pub use codec::{decode, dods_response, encode, StreamReader};
pub use constraint::parse_ce;
pub use error::DapError;
pub use evaluator::apply_constraint;
pub use functions::FunctionRegistry;
pub use model::Dataset;
pub use parsers::{add_attributes, parse_das, parse_dds, parse_dmr};

/// Value of the `XDODS-Server` header sent with every response.
pub const XDODS_SERVER: &str = concat!("dapwire/", env!("CARGO_PKG_VERSION"));
