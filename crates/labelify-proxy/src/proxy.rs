//! Reverse proxy handler: forwards every request upstream and runs the
//! enrichment pipeline over responses from the enrichable routes.

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::Response;
use tracing::{debug, error, warn};

use labelify_core::Outcome;

use crate::state::{AppState, SharedState};

/// Largest request body we buffer before forwarding.
const MAX_REQUEST_BODY: usize = 32 * 1024 * 1024;

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub(crate) fn router(state: SharedState) -> Router {
    Router::new().fallback(forward).with_state(state)
}

pub(crate) async fn forward(State(state): AppState, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let body = match axum::body::to_bytes(body, MAX_REQUEST_BODY).await {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %e, "failed to read request body");
            return error_response(StatusCode::BAD_REQUEST, "bad_data", &e.to_string());
        }
    };

    // The query only exists on the request; capture it before forwarding.
    let query = extract_query(&parts, &body);
    let path = parts.uri.path().to_owned();
    let url = state.upstream_url(&path, parts.uri.query());

    let mut headers = parts.headers.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);

    let upstream = state
        .client
        .request(parts.method.clone(), url)
        .headers(headers)
        .body(body)
        .send()
        .await;

    let upstream = match upstream {
        Ok(r) => r,
        Err(e) => {
            warn!(path = %path, error = %e, "upstream request failed");
            return error_response(StatusCode::BAD_GATEWAY, "unavailable", &e.to_string());
        }
    };

    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    strip_hop_by_hop(&mut headers);

    if !state.should_enrich(&path) {
        return build_response(status, headers, Body::from_stream(upstream.bytes_stream()));
    }

    let raw = match upstream.bytes().await {
        Ok(b) => b,
        Err(e) => {
            warn!(path = %path, error = %e, "failed to read upstream body");
            return error_response(StatusCode::BAD_GATEWAY, "unavailable", &e.to_string());
        }
    };

    let encoding = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let pipeline = state.pipeline.clone();
    let input = raw.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        pipeline.process(&input, encoding.as_deref(), &query)
    })
    .await;

    match outcome {
        Ok(Ok(Outcome::Unchanged)) => build_response(status, headers, Body::from(raw)),
        Ok(Ok(Outcome::Rewritten(body))) => {
            debug!(path = %path, bytes_in = raw.len(), bytes_out = body.len(), "response rewritten");
            headers.remove(header::CONTENT_ENCODING);
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
            build_response(status, headers, Body::from(body))
        }
        Ok(Err(e)) => {
            error!(path = %path, error = %e, "enrichment failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal", &e.to_string())
        }
        Err(e) => {
            error!(path = %path, error = %e, "enrichment task panicked");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal", "enrichment failed")
        }
    }
}

/// `query` parameter from the URL, or from a form-encoded request body.
fn extract_query(parts: &Parts, body: &Bytes) -> String {
    if let Some(q) = parts.uri.query()
        && let Some(v) = find_query_param(q.as_bytes())
    {
        return v;
    }
    let is_form = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
    if is_form && let Some(v) = find_query_param(body) {
        return v;
    }
    String::new()
}

fn find_query_param(input: &[u8]) -> Option<String> {
    url::form_urlencoded::parse(input)
        .find(|(k, _)| k == "query")
        .map(|(_, v)| v.into_owned())
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Error in the backend's own envelope so query clients can show it.
fn error_response(status: StatusCode, kind: &str, message: &str) -> Response {
    let body = serde_json::json!({"status": "error", "errorType": kind, "error": message}).to_string();
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    build_response(status, headers, Body::from(body))
}
