//! The HTTP surface: `/query`, `/cube`, `/cube.json`, `/ping`, `/metrics`.
//!
//! Grounded on the same shape as the wider workspace's `ServerType::route_http_request`: a
//! single async function matching method and path, taking and returning `hyper` body types.

use hyper::{Body, Method, Request, Response, StatusCode};
use hypercube_core::{ErrorClass, QueryRouter, Rowset};
use observability_deps::tracing::{error, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared state every request handler reads from.
#[derive(Debug, Clone)]
pub struct AppState {
    pub router: Arc<QueryRouter>,
    /// Source table for the `/cube` and `/cube.json` convenience endpoints.
    pub source_table: String,
}

/// Dispatch one request. Never panics: every error path is converted into a response.
pub async fn route(state: Arc<AppState>, req: Request<Body>) -> Response<Body> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let result = match (&method, path.as_str()) {
        (&Method::POST, "/query") => handle_query(&state, req).await,
        (&Method::GET, "/cube") => handle_cube(&state, req, false).await,
        (&Method::GET, "/cube.json") => handle_cube(&state, req, true).await,
        (&Method::GET, "/ping") => Ok(handle_ping(&state)),
        (&Method::GET, "/metrics") => Ok(handle_metrics(&state)),
        _ => Ok(text_response(StatusCode::NOT_FOUND, "not found")),
    };

    result.unwrap_or_else(|e| {
        error!(error=%e, "unhandled error while building response");
        text_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    })
}

#[derive(Debug, serde::Deserialize)]
struct QueryRequest {
    sql: String,
}

async fn handle_query(state: &AppState, req: Request<Body>) -> Result<Response<Body>, hyper::Error> {
    let body = hyper::body::to_bytes(req.into_body()).await?;
    let parsed: Result<QueryRequest, _> = serde_json::from_slice(&body);
    let Ok(parsed) = parsed else {
        return Ok(text_response(StatusCode::BAD_REQUEST, "invalid JSON body, expected {\"sql\": \"...\"}"));
    };

    Ok(run_and_render(state, &parsed.sql, false).await)
}

async fn handle_cube(
    state: &AppState,
    req: Request<Body>,
    as_json: bool,
) -> Result<Response<Body>, hyper::Error> {
    let query_pairs: HashMap<String, String> = req
        .uri()
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    let Some(dims) = query_pairs.get("dims").filter(|s| !s.is_empty()) else {
        return Ok(text_response(StatusCode::BAD_REQUEST, "missing required query parameter: dims"));
    };
    let Some(metrics) = query_pairs.get("metrics").filter(|s| !s.is_empty()) else {
        return Ok(text_response(StatusCode::BAD_REQUEST, "missing required query parameter: metrics"));
    };
    let filters = query_pairs.get("filters").map(String::as_str);

    let sql = build_cube_query(&state.source_table, dims, metrics, filters);
    Ok(run_and_render(state, &sql, as_json).await)
}

/// Build `SELECT <dims>,<metrics> FROM <source_table> [WHERE <filters>] GROUP BY <dims>`.
fn build_cube_query(source_table: &str, dims: &str, metrics: &str, filters: Option<&str>) -> String {
    let where_clause = filters.map(|f| format!(" WHERE {f}")).unwrap_or_default();
    format!("SELECT {dims},{metrics} FROM {source_table}{where_clause} GROUP BY {dims}")
}

async fn run_and_render(state: &AppState, sql: &str, as_json: bool) -> Response<Body> {
    match state.router.query(sql).await {
        Ok(rowset) => {
            if as_json {
                render_json(&rowset)
            } else {
                render_csv(&rowset)
            }
        }
        Err(e) => {
            let status = match e.class() {
                ErrorClass::Client => StatusCode::BAD_REQUEST,
                ErrorClass::Server => StatusCode::INTERNAL_SERVER_ERROR,
            };
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                warn!(error=%e, "query failed");
            }
            text_response(status, &e.to_string())
        }
    }
}

fn handle_ping(state: &AppState) -> Response<Body> {
    #[derive(Serialize)]
    struct Ping {
        status: &'static str,
        tables_cached: usize,
    }
    let stats = state.router.cache_stats();
    json_response(&Ping {
        status: "ok",
        tables_cached: stats.tables_cached,
    })
}

fn handle_metrics(state: &AppState) -> Response<Body> {
    #[derive(Serialize)]
    struct Metrics {
        cache_hits: u64,
        cache_misses: u64,
        tables_cached: usize,
        bytes_cached: usize,
    }
    let stats = state.router.cache_stats();
    json_response(&Metrics {
        cache_hits: stats.hits,
        cache_misses: stats.misses,
        tables_cached: stats.tables_cached,
        bytes_cached: stats.bytes_cached,
    })
}

/// Render as CSV with a UTF-8 byte-order mark, per the design's streamed-CSV contract.
fn render_csv(rowset: &Rowset) -> Response<Body> {
    let mut writer = csv::WriterBuilder::new().from_writer(vec![]);
    if writer.write_record(&rowset.columns).is_err() {
        return text_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode CSV header");
    }
    for row in &rowset.rows {
        if writer.write_record(row).is_err() {
            return text_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode CSV row");
        }
    }
    let Ok(mut body) = writer.into_inner() else {
        return text_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to finalize CSV");
    };

    let mut bytes = b"\xEF\xBB\xBF".to_vec();
    bytes.append(&mut body);

    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/csv; charset=utf-8")
        .body(Body::from(bytes))
        .unwrap_or_else(|_| text_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to build response"))
}

fn render_json(rowset: &Rowset) -> Response<Body> {
    let records: Vec<serde_json::Map<String, serde_json::Value>> = rowset
        .rows
        .iter()
        .map(|row| {
            rowset
                .columns
                .iter()
                .zip(row.iter())
                .map(|(col, val)| (col.clone(), serde_json::Value::String(val.clone())))
                .collect()
        })
        .collect();
    json_response(&records)
}

fn json_response<T: Serialize>(value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap_or_else(|_| text_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to build response")),
        Err(_) => text_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode JSON"),
    }
}

fn text_response(status: StatusCode, message: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain; charset=utf-8")
        .body(Body::from(message.to_string()))
        .expect("building a text response with a fixed status/header never fails")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_cube_query_without_filter() {
        let sql = build_cube_query("public.facts_agg", "p1,p2", "SUM(count)", None);
        assert_eq!(
            sql,
            "SELECT p1,p2,SUM(count) FROM public.facts_agg GROUP BY p1,p2"
        );
    }

    #[test]
    fn build_cube_query_with_filter() {
        let sql = build_cube_query("public.facts_agg", "p1", "SUM(count)", Some("p1 > 0"));
        assert_eq!(
            sql,
            "SELECT p1,SUM(count) FROM public.facts_agg WHERE p1 > 0 GROUP BY p1"
        );
    }

    #[test]
    fn csv_rendering_includes_utf8_bom() {
        let rowset = Rowset {
            columns: vec!["a".to_string()],
            rows: vec![vec!["1".to_string()]],
        };
        let response = render_csv(&rowset);
        assert_eq!(response.status(), StatusCode::OK);
    }
}
