use crate::apis::build_adapter;
use crate::app::cache_store::CacheStore;
use crate::app::history::WeatherHistoryRecorder;
use crate::app::ports::{Clock, CounterStorePort, HistoryStorePort, HttpClientPort};
use crate::app::proxy_handler::{ProxyHandler, Served};
use crate::config::Config;
use crate::constants::{
    all_resources, select_resource, ResourcePolicy, WEATHER_HISTORY_RETENTION, WEATHER_STATIONS_KEY,
    WEATHER_SUMMARY_WINDOW,
};
use crate::error::ProxyError;
use crate::gate::{AccessGate, GateDecision};
use crate::tasks::BackgroundTasks;
use crate::types::RequestContext;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{
        header::{self, HeaderName, HeaderValue},
        HeaderMap, Method, StatusCode,
    },
    response::{IntoResponse, Json, Response},
    routing::{get, post, MethodRouter},
    Router,
};
use chrono::SecondsFormat;
use hyper::Server;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const FORBIDDEN_MESSAGE: &str = "Access denied: This API is only available from authorized origins.";
const TOP_CAMERAS_DEFAULT: usize = 10;
const TOP_CAMERAS_MAX: usize = 100;
const VIEW_CAMERA_KEY: &str = "view-camera";
const TOP_CAMERAS_KEY: &str = "get-top-cameras";
const WEATHER_HISTORY_KEY: &str = "weather-history";
const WEATHER_SUMMARY_KEY: &str = "weather-summary";

/// Everything request handlers need, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub handlers: Arc<HashMap<&'static str, Arc<ProxyHandler>>>,
    pub gate: Arc<AccessGate>,
    pub counters: Arc<dyn CounterStorePort>,
    pub history: Arc<dyn HistoryStorePort>,
    pub clock: Arc<dyn Clock>,
    pub tasks: BackgroundTasks,
}

impl AppState {
    /// One proxy handler per resource, all sharing the HTTP client, cache store and task set.
    /// Weather-station refreshes also feed the history store.
    pub fn build(
        config: &Config,
        http: Arc<dyn HttpClientPort>,
        store: Arc<CacheStore>,
        counters: Arc<dyn CounterStorePort>,
        history: Arc<dyn HistoryStorePort>,
        clock: Arc<dyn Clock>,
    ) -> crate::error::Result<Self> {
        let tasks = BackgroundTasks::new();
        let recorder = Arc::new(WeatherHistoryRecorder::new(history.clone()));
        let mut handlers = HashMap::new();
        for policy in all_resources() {
            let adapter = build_adapter(policy.key, http.clone(), &config.upstream).ok_or_else(|| {
                ProxyError::Configuration(format!("no adapter for resource {}", policy.key))
            })?;
            let mut handler = ProxyHandler::new(policy, adapter, store.clone(), clock.clone(), tasks.clone());
            if policy.key == WEATHER_STATIONS_KEY {
                handler = handler.with_observer(recorder.clone());
            }
            handlers.insert(policy.key, Arc::new(handler));
        }
        Ok(Self {
            handlers: Arc::new(handlers),
            gate: Arc::new(AccessGate::new(config.access.allowed_origins.iter().cloned())),
            counters,
            history,
            clock,
            tasks,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

#[derive(Serialize)]
struct Envelope<'a> {
    success: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    kind: Option<&'a str>,
    count: usize,
    timestamp: String,
    data: &'a RawValue,
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "road-camera-proxy",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn metrics_endpoint() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::metrics::render(),
    )
}

fn request_context(headers: &HeaderMap, method: &Method, resource_key: &str) -> RequestContext {
    let header_text = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    RequestContext {
        origin: header_text(header::ORIGIN),
        referer: header_text(header::REFERER),
        method: method.to_string(),
        resource_key: resource_key.to_string(),
    }
}

fn with_headers(mut resp: Response, headers: impl IntoIterator<Item = (&'static str, String)>) -> Response {
    for (name, value) in headers {
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                resp.headers_mut().insert(HeaderName::from_static(name), value);
            }
            Err(_) => warn!(header = name, "dropping header with invalid value"),
        }
    }
    resp
}

fn json_response(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, JSON_CONTENT_TYPE)], body).into_response()
}

fn error_body(status: StatusCode, error: &str, message: Option<String>) -> Response {
    let body = ErrorBody {
        error: error.to_string(),
        message,
        status: Some(status.as_u16()),
    };
    match serde_json::to_string(&body) {
        Ok(text) => json_response(status, text),
        Err(_) => status.into_response(),
    }
}

/// 403 without any CORS headers, so browsers enforce the rejection too.
fn forbidden() -> Response {
    error_body(StatusCode::FORBIDDEN, "Forbidden", Some(FORBIDDEN_MESSAGE.to_string()))
}

/// 200 JSON body with the given caching policy and the gate's CORS headers.
fn json_ok<T: Serialize>(value: &T, cache_control: &'static str, decision: &GateDecision) -> Response {
    match serde_json::to_string(value) {
        Ok(body) => {
            let mut headers = vec![("cache-control", cache_control.to_string())];
            headers.extend(decision.cors_headers());
            with_headers(json_response(StatusCode::OK, body), headers)
        }
        Err(e) => proxy_error_response(&ProxyError::from(e), decision),
    }
}

fn proxy_error_response(err: &ProxyError, decision: &GateDecision) -> Response {
    if matches!(err, ProxyError::AccessDenied { .. }) {
        return forbidden();
    }
    let status = err.status_code();
    let label = status.canonical_reason().unwrap_or("Error");
    with_headers(
        error_body(status, label, Some(err.to_string())),
        decision.cors_headers(),
    )
}

async fn method_not_allowed() -> Response {
    let resp = error_body(
        StatusCode::METHOD_NOT_ALLOWED,
        "Method Not Allowed",
        Some("Only GET and OPTIONS are supported".to_string()),
    );
    with_headers(resp, [("allow", "GET, OPTIONS".to_string())])
}

async fn not_found() -> Response {
    error_body(StatusCode::NOT_FOUND, "Not Found", None)
}

/// Strong ETag for a response body.
pub fn etag_for(body: &[u8]) -> String {
    format!("\"{}\"", hex::encode(Sha256::digest(body)))
}

fn if_none_match_hits(headers: &HeaderMap, etag: &str) -> bool {
    let Some(value) = headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    value.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.trim_start_matches("W/") == etag
    })
}

/// Serialize the cached payload into the response envelope without re-parsing records.
fn envelope_body(policy: &ResourcePolicy, served: &Served) -> Result<String, ProxyError> {
    let data: &RawValue = serde_json::from_str(&served.entry.payload)?;
    let count = serde_json::from_str::<Vec<&RawValue>>(data.get())?.len();
    let envelope = Envelope {
        success: true,
        kind: policy.type_label,
        count,
        timestamp: served
            .entry
            .written_at
            .to_rfc3339_opts(SecondsFormat::Millis, true),
        data,
    };
    Ok(serde_json::to_string(&envelope)?)
}

async fn serve_resource(state: AppState, key: &'static str, method: Method, headers: HeaderMap) -> Response {
    let ctx = request_context(&headers, &method, key);
    let decision = match state.gate.authorize(&ctx) {
        Ok(decision) => decision,
        Err(_) => return forbidden(),
    };
    let Some(handler) = state.handlers.get(key) else {
        error!(resource = key, "route registered without a handler");
        return error_body(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error", None);
    };

    let served = match handler.serve().await {
        Ok(served) => served,
        Err(e) => return proxy_error_response(&e, &decision),
    };
    let body = match envelope_body(handler.policy(), &served) {
        Ok(body) => body,
        Err(e) => {
            error!(resource = key, error = %e, "cached payload could not be rendered");
            return proxy_error_response(&e, &decision);
        }
    };

    let etag = etag_for(body.as_bytes());
    let mut response_headers = vec![
        ("cache-control", handler.policy().cache_control()),
        ("x-cache", served.status.as_str().to_string()),
        ("etag", etag.clone()),
    ];
    response_headers.extend(decision.cors_headers());

    let resp = if if_none_match_hits(&headers, &etag) {
        StatusCode::NOT_MODIFIED.into_response()
    } else {
        json_response(StatusCode::OK, body)
    };
    with_headers(resp, response_headers)
}

async fn preflight(state: AppState, key: &'static str, methods: &'static str, headers: HeaderMap) -> Response {
    let ctx = request_context(&headers, &Method::OPTIONS, key);
    match state.gate.check(&ctx) {
        GateDecision::Rejected => forbidden(),
        decision => with_headers(
            StatusCode::NO_CONTENT.into_response(),
            decision.cors_headers_with_methods(methods),
        ),
    }
}

/// Routes that front several resources, picked by one query parameter.
async fn serve_selected(
    state: AppState,
    route: &'static str,
    param: &'static str,
    method: Method,
    headers: HeaderMap,
    query: HashMap<String, String>,
) -> Response {
    let value = query.get(param).map(|v| v.trim()).filter(|v| !v.is_empty());
    if let Some(policy) = select_resource(route, value) {
        return serve_resource(state, policy.key, method, headers).await;
    }

    let ctx = request_context(&headers, &method, route);
    let decision = match state.gate.authorize(&ctx) {
        Ok(decision) => decision,
        Err(_) => return forbidden(),
    };
    let choices: Vec<&str> = all_resources()
        .filter(|r| r.route == route)
        .filter_map(|r| r.selector.map(|s| s.value))
        .collect();
    let resp = error_body(
        StatusCode::BAD_REQUEST,
        "Bad Request",
        Some(format!("`{}` must be one of: {}", param, choices.join(", "))),
    );
    with_headers(resp, decision.cors_headers())
}

fn selected_route(route: &'static str, param: &'static str) -> MethodRouter<AppState> {
    get(
        move |State(state): State<AppState>,
              method: Method,
              headers: HeaderMap,
              Query(query): Query<HashMap<String, String>>| {
            serve_selected(state, route, param, method, headers, query)
        },
    )
    .options(move |State(state): State<AppState>, headers: HeaderMap| {
        preflight(state, route, crate::gate::CORS_ALLOW_METHODS, headers)
    })
    .fallback(method_not_allowed)
}

fn resource_route(key: &'static str) -> MethodRouter<AppState> {
    get(move |State(state): State<AppState>, method: Method, headers: HeaderMap| {
        serve_resource(state, key, method, headers)
    })
    .options(move |State(state): State<AppState>, headers: HeaderMap| {
        preflight(state, key, crate::gate::CORS_ALLOW_METHODS, headers)
    })
    .fallback(method_not_allowed)
}

#[derive(Debug, Deserialize)]
struct ViewCameraRequest {
    id: Option<serde_json::Value>,
    camera_id: Option<serde_json::Value>,
}

fn camera_id_of(req: &ViewCameraRequest) -> Option<String> {
    [&req.id, &req.camera_id]
        .into_iter()
        .flatten()
        .find_map(|v| match v {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

async fn view_camera(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let ctx = request_context(&headers, &Method::POST, VIEW_CAMERA_KEY);
    let decision = match state.gate.authorize(&ctx) {
        Ok(decision) => decision,
        Err(_) => return forbidden(),
    };
    let cors = decision.cors_headers_with_methods("POST, OPTIONS");

    let req: ViewCameraRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            let resp = error_body(StatusCode::BAD_REQUEST, "Invalid JSON", Some(e.to_string()));
            return with_headers(resp, cors);
        }
    };
    let Some(camera_id) = camera_id_of(&req) else {
        let resp = error_body(
            StatusCode::BAD_REQUEST,
            "Missing camera id",
            Some("Body must contain a non-empty `id` or `camera_id`".to_string()),
        );
        return with_headers(resp, cors);
    };

    match state.counters.increment(&camera_id).await {
        Ok(new_views) => {
            let body = serde_json::json!({
                "success": true,
                "camera_id": camera_id,
                "new_views": new_views,
            });
            let mut headers = vec![("cache-control", "no-cache".to_string())];
            headers.extend(cors);
            with_headers(json_response(StatusCode::OK, body.to_string()), headers)
        }
        Err(e) => {
            error!(camera_id = %camera_id, error = %e, "view counter update failed");
            proxy_error_response(&e, &decision)
        }
    }
}

#[derive(Debug, Deserialize)]
struct TopCamerasQuery {
    limit: Option<String>,
}

/// Requested limit, defaulting on garbage and clamped to 1..=100.
fn top_limit(raw: Option<&str>) -> usize {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .map(|n| n.clamp(1, TOP_CAMERAS_MAX as i64) as usize)
        .unwrap_or(TOP_CAMERAS_DEFAULT)
}

async fn top_cameras(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TopCamerasQuery>,
) -> Response {
    let ctx = request_context(&headers, &Method::GET, TOP_CAMERAS_KEY);
    let decision = match state.gate.authorize(&ctx) {
        Ok(decision) => decision,
        Err(_) => return forbidden(),
    };

    let limit = top_limit(query.limit.as_deref());
    match state.counters.top_n(limit).await {
        Ok(rows) => json_ok(&rows, "max-age=60, stale-while-revalidate=120", &decision),
        Err(e) => {
            error!(error = %e, "top cameras query failed");
            proxy_error_response(&e, &decision)
        }
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    station_id: Option<String>,
}

/// One station's readings, or hourly island-wide averages when no station is named.
async fn weather_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let ctx = request_context(&headers, &Method::GET, WEATHER_HISTORY_KEY);
    let decision = match state.gate.authorize(&ctx) {
        Ok(decision) => decision,
        Err(_) => return forbidden(),
    };

    let station = query.station_id.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let series = match station {
        Some(id) => state.history.station_series(id).await,
        None => {
            let since = state.clock.now() - chrono::Duration::seconds(WEATHER_HISTORY_RETENTION.as_secs() as i64);
            state.history.hourly_series(since).await
        }
    };
    match series {
        Ok(points) => json_ok(&points, "public, max-age=300", &decision),
        Err(e) => {
            error!(station = ?station, error = %e, "weather history query failed");
            proxy_error_response(&e, &decision)
        }
    }
}

async fn weather_summary(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let ctx = request_context(&headers, &Method::GET, WEATHER_SUMMARY_KEY);
    let decision = match state.gate.authorize(&ctx) {
        Ok(decision) => decision,
        Err(_) => return forbidden(),
    };

    let since = state.clock.now() - chrono::Duration::seconds(WEATHER_SUMMARY_WINDOW.as_secs() as i64);
    match state.history.summary(since).await {
        Ok(summary) => json_ok(&summary, "public, max-age=60", &decision),
        Err(e) => {
            error!(error = %e, "weather summary query failed");
            proxy_error_response(&e, &decision)
        }
    }
}

fn gated_get(handler: MethodRouter<AppState>, key: &'static str) -> MethodRouter<AppState> {
    handler
        .options(move |State(state): State<AppState>, headers: HeaderMap| {
            preflight(state, key, crate::gate::CORS_ALLOW_METHODS, headers)
        })
        .fallback(method_not_allowed)
}

/// Create the HTTP router with every data, counter and operational route.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route(
            "/api/view-camera",
            post(view_camera)
                .options(|State(state): State<AppState>, headers: HeaderMap| {
                    preflight(state, VIEW_CAMERA_KEY, "POST, OPTIONS", headers)
                })
                .fallback(method_not_allowed),
        )
        .route("/api/get-top-cameras", gated_get(get(top_cameras), TOP_CAMERAS_KEY))
        .route("/api/weather/history", gated_get(get(weather_history), WEATHER_HISTORY_KEY))
        .route("/api/weather/summary", gated_get(get(weather_summary), WEATHER_SUMMARY_KEY));

    let mut selector_routes: Vec<(&'static str, &'static str)> = Vec::new();
    for policy in all_resources() {
        match policy.selector {
            None => router = router.route(policy.route, resource_route(policy.key)),
            Some(selector) => {
                if !selector_routes.iter().any(|(route, _)| *route == policy.route) {
                    selector_routes.push((policy.route, selector.param));
                }
            }
        }
    }
    for (route, param) in selector_routes {
        router = router.route(route, selected_route(route, param));
    }

    router
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

/// Serve until Ctrl-C, then wait for in-flight background refreshes.
pub async fn run(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let tasks = state.tasks.clone();
    let app = create_router(state);

    info!("road-camera-proxy listening on http://{}", addr);
    Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(pending = tasks.pending(), "draining background refreshes");
    tasks.drain().await;
    info!("shutdown complete");
    Ok(())
}
