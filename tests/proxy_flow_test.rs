use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use chrono::{Duration as ChronoDuration, Utc};
use road_camera_proxy::app::cache_store::CacheStore;
use road_camera_proxy::app::ports::{CacheTier, HttpClientPort, HttpGetResult};
use road_camera_proxy::config::Config;
use road_camera_proxy::infra::clock::SystemClock;
use road_camera_proxy::infra::memory_cache::MemoryCache;
use road_camera_proxy::infra::sqlite_store::SqliteStore;
use road_camera_proxy::server::{create_router, AppState};
use road_camera_proxy::types::CacheEntry;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

const ALLOWED_ORIGIN: &str = "https://road-camera.pages.dev";

/// Upstream double: answers by URL substring and counts calls.
struct RoutedHttp {
    routes: Mutex<Vec<(String, Result<HttpGetResult, String>)>>,
    calls: AtomicUsize,
}

impl RoutedHttp {
    fn new() -> Self {
        Self {
            routes: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    fn reply(self, url_part: &str, content_type: &str, body: &str) -> Self {
        self.routes.lock().unwrap().push((
            url_part.to_string(),
            Ok(HttpGetResult {
                status: 200,
                bytes: body.as_bytes().to_vec(),
                content_type: content_type.to_string(),
            }),
        ));
        self
    }

    fn fail(self, url_part: &str, status: u16) -> Self {
        self.routes.lock().unwrap().push((
            url_part.to_string(),
            Ok(HttpGetResult {
                status,
                bytes: b"<html><body>Service Unavailable</body></html>".to_vec(),
                content_type: "text/html".to_string(),
            }),
        ));
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpClientPort for RoutedHttp {
    async fn get(&self, url: &str) -> Result<HttpGetResult, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let routes = self.routes.lock().unwrap();
        routes
            .iter()
            .find(|(part, _)| url.contains(part.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| Err(format!("connection refused: {url}")))
    }
}

struct Harness {
    router: Router,
    state: AppState,
    http: Arc<RoutedHttp>,
    store: Arc<CacheStore>,
    _dir: tempfile::TempDir,
}

fn harness(http: RoutedHttp) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let sqlite = SqliteStore::open(dir.path().join("proxy.db")).unwrap();
    let store = Arc::new(CacheStore::new(
        Arc::new(MemoryCache::new()),
        Some(Arc::new(sqlite.clone())),
    ));

    let mut config = Config::default();
    config.upstream.cwa_api_key = Some("CWA-TEST-KEY".to_string());
    config.upstream.moenv_api_key = Some("MOENV-TEST-KEY".to_string());

    let http = Arc::new(http);
    let state = AppState::build(
        &config,
        http.clone(),
        store.clone(),
        Arc::new(sqlite.clone()),
        Arc::new(sqlite),
        Arc::new(SystemClock),
    )
    .unwrap();

    Harness {
        router: create_router(state.clone()),
        state,
        http,
        store,
        _dir: dir,
    }
}

fn get(uri: &str, origin: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(origin) = origin {
        builder = builder.header("origin", origin);
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(router: &Router, req: Request<Body>) -> Response {
    router.clone().oneshot(req).await.unwrap()
}

async fn body_text(resp: Response) -> String {
    let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn header<'a>(resp: &'a Response, name: &str) -> Option<&'a str> {
    resp.headers().get(name).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn weather_stations_end_to_end() {
    let h = harness(RoutedHttp::new().reply(
        "O-A0003-001",
        "application/json",
        include_str!("resources/weather_stations.json"),
    ));

    let first = send(&h.router, get("/api/weather-stations", Some(ALLOWED_ORIGIN))).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(header(&first, "x-cache"), Some("MISS"));
    assert!(header(&first, "cache-control").unwrap().contains("max-age=300"));
    assert_eq!(header(&first, "access-control-allow-origin"), Some(ALLOWED_ORIGIN));
    assert_eq!(
        header(&first, "content-type"),
        Some("application/json; charset=utf-8")
    );
    let first_body = body_text(first).await;

    let json: Value = serde_json::from_str(&first_body).unwrap();
    assert_eq!(json["success"], true);
    assert!(json.get("type").is_none());
    assert_eq!(json["count"], 2);
    let ids: Vec<&str> = json["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["466920", "467300"]);

    let taipei = &json["data"][0];
    assert_eq!(taipei["lat"], 25.0377);
    assert_eq!(taipei["rain"], 0.0);
    assert_eq!(taipei["wind_dir"], 990.0);
    assert!(taipei["uvi"].is_null());
    let dongji = &json["data"][1];
    assert_eq!(dongji["rain"], 0.0);
    assert!(dongji["wind_speed"].is_null());
    assert_eq!(dongji["temp"], 21.8);

    let second = send(&h.router, get("/api/weather-stations", Some(ALLOWED_ORIGIN))).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(header(&second, "x-cache"), Some("HIT"));
    assert_eq!(body_text(second).await, first_body);
    assert_eq!(h.http.calls(), 1);
}

#[tokio::test]
async fn rejected_origin_never_reaches_upstream() {
    let h = harness(RoutedHttp::new().reply(
        "O-A0003-001",
        "application/json",
        include_str!("resources/weather_stations.json"),
    ));

    let resp = send(&h.router, get("/api/weather-stations", Some("https://evil.example"))).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(header(&resp, "access-control-allow-origin").is_none());
    let json: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(json["error"], "Forbidden");
    assert_eq!(json["status"], 403);

    let resp = send(&h.router, get("/api/weather-stations", None)).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(h.http.calls(), 0);
    assert!(h.store.get("weather-stations").await.unwrap().is_none());
}

#[tokio::test]
async fn referer_only_requests_are_served_without_cors() {
    let h = harness(RoutedHttp::new().reply(
        "CCTV.xml",
        "application/xml",
        include_str!("resources/freeway_cctv.xml"),
    ));
    let req = Request::builder()
        .uri("/api/cctv-freeway")
        .header("referer", "http://localhost:8788/index.html")
        .body(Body::empty())
        .unwrap();
    let resp = send(&h.router, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(header(&resp, "access-control-allow-origin").is_none());

    let json: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(json["type"], "國道");
    assert_eq!(json["count"], 2);
    assert_eq!(json["data"][0]["name"], "國道1號 N 0K+850 (基隆端)");
    assert_eq!(json["data"][1]["name"], "國道3號 S 12K+300");
    assert_eq!(json["data"][1]["type"], "國道");
}

#[tokio::test]
async fn preflight_mirrors_gate_decision() {
    let h = harness(RoutedHttp::new());

    let allowed = Request::builder()
        .method("OPTIONS")
        .uri("/api/cctv-provincial")
        .header("origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let resp = send(&h.router, allowed).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        header(&resp, "access-control-allow-origin"),
        Some("http://localhost:3000")
    );
    assert_eq!(header(&resp, "access-control-allow-methods"), Some("GET, OPTIONS"));
    assert_eq!(header(&resp, "access-control-max-age"), Some("3600"));

    let rejected = Request::builder()
        .method("OPTIONS")
        .uri("/api/cctv-provincial")
        .header("origin", "https://evil.example")
        .body(Body::empty())
        .unwrap();
    let resp = send(&h.router, rejected).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(header(&resp, "access-control-allow-origin").is_none());
    assert_eq!(h.http.calls(), 0);
}

#[tokio::test]
async fn matching_etag_yields_not_modified() {
    let h = harness(RoutedHttp::new().reply(
        "CCTV.xml",
        "application/xml",
        include_str!("resources/freeway_cctv.xml"),
    ));
    let first = send(&h.router, get("/api/cctv-freeway", Some(ALLOWED_ORIGIN))).await;
    let etag = header(&first, "etag").unwrap().to_string();

    let req = Request::builder()
        .uri("/api/cctv-freeway")
        .header("origin", ALLOWED_ORIGIN)
        .header("if-none-match", etag.as_str())
        .body(Body::empty())
        .unwrap();
    let resp = send(&h.router, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(header(&resp, "etag"), Some(etag.as_str()));
    assert!(body_text(resp).await.is_empty());
}

#[tokio::test]
async fn upstream_outage_without_cache_is_a_503() {
    let h = harness(RoutedHttp::new().fail("opendataCCTVs.xml", 503));

    let resp = send(&h.router, get("/api/cctv-provincial", Some(ALLOWED_ORIGIN))).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(header(&resp, "access-control-allow-origin"), Some(ALLOWED_ORIGIN));
    let json: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(json["status"], 503);
    assert!(json["message"].as_str().unwrap().contains("provincial-cctv"));
    assert!(h.store.get("provincial-cctv").await.unwrap().is_none());
}

#[tokio::test]
async fn stale_entry_survives_failed_refresh() {
    let h = harness(RoutedHttp::new().fail("opendataCCTVs.xml", 502));
    let old = CacheEntry::new(
        "provincial-cctv",
        r#"[{"id":"THB-1","name":"省道監視器 (THB-1)","url":"https://thb/1","lat":24.1,"lon":120.6,"direction":null,"type":"省道","source":"THB"}]"#,
        Utc::now() - ChronoDuration::hours(2),
    );
    h.store.put(&old).await.unwrap();

    let resp = send(&h.router, get("/api/cctv-provincial", Some(ALLOWED_ORIGIN))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "x-cache"), Some("STALE"));
    let json: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(json["type"], "省道");
    assert_eq!(json["data"][0]["id"], "THB-1");

    h.state.tasks.drain().await;
    assert_eq!(h.http.calls(), 1);
    assert_eq!(h.store.get("provincial-cctv").await.unwrap(), Some(old));
}

#[tokio::test]
async fn view_counter_round_trip() {
    let h = harness(RoutedHttp::new());

    for id in ["CCTV-N1-N-0.85-M", "CCTV-N1-N-0.85-M", "THB-7"] {
        let req = Request::builder()
            .method("POST")
            .uri("/api/view-camera")
            .header("origin", ALLOWED_ORIGIN)
            .header("content-type", "application/json")
            .body(Body::from(format!(r#"{{"id":"{id}"}}"#)))
            .unwrap();
        let resp = send(&h.router, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(header(&resp, "cache-control"), Some("no-cache"));
    }

    let resp = send(&h.router, get("/api/get-top-cameras?limit=1", Some(ALLOWED_ORIGIN))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    let rows = json.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["camera_id"], "CCTV-N1-N-0.85-M");
    assert_eq!(rows[0]["views"], 2);

    let bad = Request::builder()
        .method("POST")
        .uri("/api/view-camera")
        .header("origin", ALLOWED_ORIGIN)
        .body(Body::from("{}"))
        .unwrap();
    assert_eq!(send(&h.router, bad).await.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn operational_routes_and_methods() {
    let h = harness(RoutedHttp::new());

    let resp = send(&h.router, get("/health", None)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(json["status"], "healthy");

    let delete = Request::builder()
        .method("DELETE")
        .uri("/api/radar")
        .header("origin", ALLOWED_ORIGIN)
        .body(Body::empty())
        .unwrap();
    let resp = send(&h.router, delete).await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    let json: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(json["status"], 405);

    let resp = send(&h.router, get("/api/tdx-token", Some(ALLOWED_ORIGIN))).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(h.http.calls(), 0);
}

fn earthquake_body(number: u32, lat: f64) -> String {
    serde_json::json!({"success": "true", "records": {"Earthquake": [{
        "EarthquakeNo": number,
        "ReportContent": "花蓮縣近海發生規模4.8有感地震",
        "EarthquakeInfo": {
            "OriginTime": "2025-12-01 10:00:00",
            "FocalDepth": 12.0,
            "Epicenter": {"Location": "花蓮縣政府東方 20.0 公里", "EpicenterLatitude": lat, "EpicenterLongitude": 121.8},
            "EarthquakeMagnitude": {"MagnitudeValue": 4.8}
        }
    }]}})
    .to_string()
}

#[tokio::test]
async fn earthquake_type_selects_the_report_feed() {
    let h = harness(
        RoutedHttp::new()
            .reply("E-A0015-001", "application/json", &earthquake_body(114123, 23.9))
            .reply("E-A0016-001", "application/json", &earthquake_body(114000, 24.2)),
    );

    let resp = send(&h.router, get("/api/earthquake", Some(ALLOWED_ORIGIN))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(header(&resp, "cache-control").unwrap().contains("max-age=90"));
    let json: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(json["count"], 1);
    assert_eq!(json["data"][0]["id"], "114123");
    assert_eq!(json["data"][0]["magnitude"], 4.8);

    let resp = send(&h.router, get("/api/earthquake?type=minor", Some(ALLOWED_ORIGIN))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(json["data"][0]["id"], "114000@2025-12-01 10:00:00");

    assert!(h.store.get("earthquake-significant").await.unwrap().is_some());
    assert!(h.store.get("earthquake-minor").await.unwrap().is_some());
    assert_eq!(h.http.calls(), 2);
}

#[tokio::test]
async fn unknown_selector_values_are_rejected() {
    let h = harness(RoutedHttp::new());

    let resp = send(&h.router, get("/api/earthquake?type=huge", Some(ALLOWED_ORIGIN))).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(header(&resp, "access-control-allow-origin"), Some(ALLOWED_ORIGIN));
    let json: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(json["status"], 400);
    assert!(json["message"].as_str().unwrap().contains("significant, minor"));

    let resp = send(&h.router, get("/api/weather", Some(ALLOWED_ORIGIN))).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let resp = send(&h.router, get("/api/weather?dataset=W-C0033-001", Some(ALLOWED_ORIGIN))).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = send(&h.router, get("/api/weather?dataset=huge", Some("https://evil.example"))).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(h.http.calls(), 0);
}

#[tokio::test]
async fn forecast_dataset_is_cached_under_its_id() {
    let h = harness(RoutedHttp::new().reply(
        "datastore/F-C0032-001",
        "application/json",
        r#"{"success":"true","records":{"datasetDescription":"三十六小時天氣預報","location":[{"locationName":"臺北市"}]}}"#,
    ));

    for expected in ["MISS", "HIT"] {
        let resp = send(&h.router, get("/api/weather?dataset=F-C0032-001", Some(ALLOWED_ORIGIN))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(header(&resp, "x-cache"), Some(expected));
        assert!(header(&resp, "cache-control").unwrap().contains("max-age=1800"));
        let json: Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(json["count"], 1);
        assert_eq!(json["data"][0]["id"], "F-C0032-001");
        assert_eq!(json["data"][0]["records"]["location"][0]["locationName"], "臺北市");
    }
    assert!(h.store.get("F-C0032-001").await.unwrap().is_some());
    assert_eq!(h.http.calls(), 1);
}

#[tokio::test]
async fn weather_refresh_feeds_history_and_summary() {
    let h = harness(RoutedHttp::new().reply(
        "O-A0003-001",
        "application/json",
        include_str!("resources/weather_stations.json"),
    ));

    let resp = send(&h.router, get("/api/weather/summary", Some(ALLOWED_ORIGIN))).await;
    let json: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(json["station_count"], 0);
    assert_eq!(json["avg_temp"], 0.0);

    let resp = send(&h.router, get("/api/weather-stations", Some(ALLOWED_ORIGIN))).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = send(&h.router, get("/api/weather/summary", Some(ALLOWED_ORIGIN))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "cache-control"), Some("public, max-age=60"));
    let json: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(json["station_count"], 2);
    assert_eq!(json["max_temp"], 22.4);
    assert_eq!(json["min_temp"], 21.8);
    assert_eq!(json["avg_temp"], 22.1);
    assert_eq!(json["raining_stations"], 0);
    assert_eq!(json["abnormal_count"], 0);

    let resp = send(&h.router, get("/api/weather/history?station_id=467300", Some(ALLOWED_ORIGIN))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "cache-control"), Some("public, max-age=300"));
    let json: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    let points = json.as_array().unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0]["temperature"], 21.8);
    assert!(points[0]["wind_speed"].is_null());

    let resp = send(&h.router, get("/api/weather/history", Some(ALLOWED_ORIGIN))).await;
    let json: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0]["humidity"], 79.5);

    let resp = send(&h.router, get("/api/weather/history", None)).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(h.http.calls(), 1);
}
