//! The DAP server router.
//!
//! Every dataset is served at `/<name>.<suffix>?<constraint expression>`, where the suffix
//! selects the response. Datasets are built and encoded on the blocking thread pool.

use crate::app_state::{AppState, SharedAppState};
use crate::codec::dods_response;
use crate::constraint::parse_ce;
use crate::error::DapError;
use crate::evaluator::apply_constraint;
use crate::handlers::DatasetHandler;
use crate::metrics::{
    metrics_handler, record_dap_response, record_response_metrics, request_counter,
};
use crate::responses::{render_ascii, render_das, render_dds, render_dmr};
use crate::XDODS_SERVER;

use axum::{
    extract::{Path, RawQuery, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use strum_macros::Display;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

static HEADER_CONTENT_DESCRIPTION: header::HeaderName =
    header::HeaderName::from_static("content-description");
static HEADER_XDODS_SERVER: header::HeaderName = header::HeaderName::from_static("xdods-server");

const DMR_CONTENT_TYPE: &str = "application/vnd.opendap.dap4.dataset-metadata+xml";

/// The responses a dataset can be served as.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum ResponseKind {
    Dds,
    Das,
    Dods,
    Dmr,
    Ascii,
    Version,
}

impl ResponseKind {
    /// The response requested by a URL suffix.
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "dds" => Some(Self::Dds),
            "das" => Some(Self::Das),
            "dods" => Some(Self::Dods),
            "dmr" => Some(Self::Dmr),
            "asc" | "ascii" => Some(Self::Ascii),
            "ver" => Some(Self::Version),
            _ => None,
        }
    }

    fn content_type(self) -> String {
        match self {
            Self::Dods => mime::APPLICATION_OCTET_STREAM.to_string(),
            Self::Dmr => DMR_CONTENT_TYPE.to_string(),
            Self::Version => mime::APPLICATION_JSON.to_string(),
            _ => mime::TEXT_PLAIN_UTF_8.to_string(),
        }
    }

    fn description(self) -> &'static str {
        match self {
            Self::Dds => "dods_dds",
            Self::Das => "dods_das",
            Self::Dods => "dods_data",
            Self::Dmr => "dods_dmr",
            Self::Ascii => "dods_ascii",
            Self::Version => "dods_version",
        }
    }
}

/// A rendered DAP response.
#[derive(Debug)]
pub struct DapResponse {
    kind: ResponseKind,
    body: Bytes,
}

impl IntoResponse for DapResponse {
    fn into_response(self) -> Response {
        (
            [
                (&header::CONTENT_TYPE, self.kind.content_type()),
                (
                    &HEADER_CONTENT_DESCRIPTION,
                    self.kind.description().to_string(),
                ),
                (&HEADER_XDODS_SERVER, XDODS_SERVER.to_string()),
            ],
            self.body,
        )
            .into_response()
    }
}

/// Build the router serving the datasets of `state`.
pub fn router(state: SharedAppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/*path", get(dap))
        .with_state(state)
        .layer(
            ServiceBuilder::new().layer(
                TraceLayer::new_for_http()
                    .on_request(request_counter)
                    .on_response(record_response_metrics),
            ),
        )
}

/// The service served by [crate::server::serve].
pub type Service = Router;

/// Return the service for an [AppState].
pub fn service(state: AppState) -> Service {
    router(Arc::new(state))
}

/// Serve one DAP response.
async fn dap(
    State(state): State<SharedAppState>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<DapResponse, DapError> {
    let (name, suffix) = path
        .rsplit_once('.')
        .ok_or_else(|| DapError::UnsupportedResponse(path.clone()))?;
    let kind = ResponseKind::from_suffix(suffix)
        .ok_or_else(|| DapError::UnsupportedResponse(suffix.to_string()))?;
    let handler = state
        .store
        .get(name)
        .ok_or_else(|| DapError::DatasetNotFound(name.to_string()))?;
    // Percent-decoded once, by parse_ce.
    let query = query.unwrap_or_default();

    let body = tokio::task::spawn_blocking(move || {
        build_response(handler.as_ref(), kind, &query, &state)
    })
    .await??;
    record_dap_response(&kind.to_string());
    Ok(DapResponse { kind, body })
}

/// Body of the `.ver` response
#[derive(Serialize)]
struct VersionInfo {
    /// Server implementation and version
    server: &'static str,
    /// Supported protocol versions
    dap: &'static [&'static str],
}

/// Build, constrain and render a dataset.
#[tracing::instrument(level = "DEBUG", skip(handler, state))]
fn build_response(
    handler: &dyn DatasetHandler,
    kind: ResponseKind,
    query: &str,
    state: &AppState,
) -> Result<Bytes, DapError> {
    if kind == ResponseKind::Version {
        let version = VersionInfo {
            server: XDODS_SERVER,
            dap: &["2.0", "4.0"],
        };
        return Ok(serde_json::to_vec(&version)?.into());
    }
    let (projection, selection) = parse_ce(query)?;
    let dataset = apply_constraint(
        &handler.dataset()?,
        &projection,
        &selection,
        &state.functions,
    )?;
    Ok(match kind {
        ResponseKind::Dds => render_dds(&dataset).into(),
        ResponseKind::Das => render_das(&dataset).into(),
        ResponseKind::Dmr => render_dmr(&dataset).into(),
        ResponseKind::Ascii => render_ascii(&dataset)?.into(),
        ResponseKind::Dods | ResponseKind::Version => dods_response(&dataset)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::CommandLineArgs;
    use crate::codec::{decode_dods, StreamReader};
    use crate::handlers::{DatasetStore, MemoryHandler};
    use crate::model::DapNode;
    use crate::test_utils;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use clap::Parser;
    use regex::Regex;
    use tower::ServiceExt; // for `oneshot`

    fn test_router() -> Router {
        let store = DatasetStore::new()
            .with("simple", MemoryHandler::new(test_utils::simple_dataset()))
            .with("nested/seqs", MemoryHandler::new(test_utils::sequence_dataset()))
            .with("grids", MemoryHandler::new(test_utils::grid_dataset()));
        let args = CommandLineArgs::parse_from(["dapwire"]);
        service(AppState::with_store(&args, store))
    }

    async fn request(uri: &str) -> Response {
        test_router()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Bytes {
        hyper::body::to_bytes(response.into_body()).await.unwrap()
    }

    async fn body_string(response: Response) -> String {
        String::from_utf8(body_bytes(response).await.to_vec()).unwrap()
    }

    fn header<'a>(response: &'a Response, name: &str) -> &'a str {
        response.headers()[name].to_str().unwrap()
    }

    #[tokio::test]
    async fn dds() {
        let response = request("/simple.dds").await;
        assert_eq!(StatusCode::OK, response.status());
        assert_eq!("dods_dds", header(&response, "content-description"));
        assert_eq!(XDODS_SERVER, header(&response, "xdods-server"));
        assert_eq!(
            render_dds(&test_utils::simple_dataset()),
            body_string(response).await
        );
    }

    #[tokio::test]
    async fn constrained_dds() {
        let response = request("/simple.dds?a%5B0:1:1%5D").await;
        assert_eq!(StatusCode::OK, response.status());
        assert_eq!(
            "Dataset {\n    Int32 a[2];\n} simple;\n",
            body_string(response).await
        );
    }

    #[tokio::test]
    async fn dods() {
        let response = request("/simple.dods?s.x").await;
        assert_eq!(StatusCode::OK, response.status());
        assert_eq!(
            mime::APPLICATION_OCTET_STREAM.as_ref(),
            header(&response, "content-type")
        );
        let body = body_bytes(response).await;
        let dataset = decode_dods(&mut StreamReader::from_bytes(body)).unwrap();
        match dataset.find("s.x").unwrap() {
            DapNode::Base(var) => {
                assert_eq!(Some(vec![-1, 0, 1]), var.array().unwrap().elements::<i16>())
            }
            node => panic!("unexpected node {:?}", node),
        }
        assert!(dataset.find("a").is_none());
    }

    #[tokio::test]
    async fn dods_sequence_selection() {
        let response = request("/nested/seqs.dods?cast.label&cast.n%3E5").await;
        assert_eq!(StatusCode::OK, response.status());
        let body = body_bytes(response).await;
        let dataset = decode_dods(&mut StreamReader::from_bytes(body)).unwrap();
        match dataset.get("cast").unwrap() {
            DapNode::Sequence(seq) => assert_eq!(
                vec![vec![test_utils::string("x")], vec![test_utils::string("y")]],
                seq.records().unwrap()
            ),
            node => panic!("unexpected node {:?}", node),
        }
    }

    async fn selected_labels(uri: &str) -> Vec<crate::model::Record> {
        let response = request(uri).await;
        assert_eq!(StatusCode::OK, response.status());
        let body = body_bytes(response).await;
        let dataset = decode_dods(&mut StreamReader::from_bytes(body)).unwrap();
        match dataset.get("cast").unwrap() {
            DapNode::Sequence(seq) => seq.records().unwrap(),
            node => panic!("unexpected node {:?}", node),
        }
    }

    #[tokio::test]
    async fn selection_literal_decoded_once() {
        // "%78" is an encoded "x".
        assert_eq!(
            vec![vec![test_utils::string("x")]],
            selected_labels("/nested/seqs.dods?cast.label&cast.label=%22%78%22").await
        );
        // "%2578" is the literal text "%78", which no label holds.
        assert!(selected_labels("/nested/seqs.dods?cast.label&cast.label=%22%2578%22")
            .await
            .is_empty());
        // An encoded "%26" stays inside the literal instead of splitting the expression.
        assert!(selected_labels("/nested/seqs.dods?cast.label&cast.label=%22x%2526%22")
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn das_dmr_ascii_version() {
        let response = request("/grids.das").await;
        assert_eq!("dods_das", header(&response, "content-description"));
        assert!(body_string(response).await.starts_with("Attributes {\n"));

        let response = request("/grids.dmr").await;
        assert_eq!(DMR_CONTENT_TYPE, header(&response, "content-type"));
        assert!(body_string(response).await.contains("<Dimension name=\"time\" size=\"2\"/>"));

        let response = request("/grids.asc?sst.time").await;
        assert_eq!("dods_ascii", header(&response, "content-description"));
        let body = body_string(response).await;
        assert!(body.ends_with("sst.time, 0.0, 1.0\n"), "body: {body}");

        let response = request("/grids.ver").await;
        assert_eq!(mime::APPLICATION_JSON.as_ref(), header(&response, "content-type"));
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(XDODS_SERVER, body["server"]);
        assert_eq!(serde_json::json!(["2.0", "4.0"]), body["dap"]);
    }

    #[tokio::test]
    async fn unknown_dataset() {
        let response = request("/missing.dds").await;
        assert_eq!(StatusCode::NOT_FOUND, response.status());
        assert_eq!("dods_error", header(&response, "content-description"));
        let body = body_string(response).await;
        let re = Regex::new(r#"code = 1001;\s+message = "dataset missing not found";"#).unwrap();
        assert!(re.is_match(&body), "body: {body}");
    }

    #[tokio::test]
    async fn unknown_suffix() {
        for uri in ["/simple.nc", "/simple"] {
            let response = request(uri).await;
            assert_eq!(StatusCode::NOT_FOUND, response.status());
            assert!(body_string(response).await.starts_with("Error {\n"));
        }
    }

    #[tokio::test]
    async fn bad_constraint() {
        let response = request("/simple.dds?nothere").await;
        assert_eq!(StatusCode::BAD_REQUEST, response.status());
        let body = body_string(response).await;
        let re = Regex::new(r"nothere").unwrap();
        assert!(re.is_match(&body), "body: {body}");

        let response = request("/nested/seqs.dods?cast.n%3E5%7Ccast.n%3C2").await;
        assert_eq!(StatusCode::BAD_REQUEST, response.status());
    }

    #[tokio::test]
    async fn metrics() {
        let response = request("/metrics").await;
        assert_eq!(StatusCode::OK, response.status());
    }

    #[test]
    fn suffixes() {
        assert_eq!(Some(ResponseKind::Ascii), ResponseKind::from_suffix("asc"));
        assert_eq!(Some(ResponseKind::Ascii), ResponseKind::from_suffix("ascii"));
        assert_eq!(None, ResponseKind::from_suffix("html"));
        assert_eq!("dods", ResponseKind::Dods.to_string());
    }
}
