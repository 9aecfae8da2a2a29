//! Resource table: one row per exposed endpoint.
//!
//! TTLs sit strictly above each upstream's published minimum re-fetch interval.
//! Going below that floor gets the proxy's address blocked for every user, so
//! `Config::validate` refuses to start with a table that violates it.

use std::time::Duration;

// Cache keys (one per upstream resource)
pub const FREEWAY_CCTV_KEY: &str = "freeway-cctv";
pub const PROVINCIAL_CCTV_KEY: &str = "provincial-cctv";
pub const WEATHER_STATIONS_KEY: &str = "weather-stations";
pub const WATER_CCTV_KEY: &str = "wra_cctv";
pub const AIR_QUALITY_KEY: &str = "moenv_air_quality";
pub const RADAR_KEY: &str = "radar";
pub const EARTHQUAKE_SIGNIFICANT_KEY: &str = "earthquake-significant";
pub const EARTHQUAKE_MINOR_KEY: &str = "earthquake-minor";

// Upstream endpoints
pub const FREEWAY_CCTV_URL: &str = "https://tisvcloud.freeway.gov.tw/history/motc20/CCTV.xml";
pub const PROVINCIAL_CCTV_URL: &str = "https://cctv-maintain.thb.gov.tw/opendataCCTVs.xml";
pub const CWA_FILE_API_BASE: &str = "https://opendata.cwa.gov.tw/fileapi/v1/opendataapi";
pub const CWA_DATASTORE_BASE: &str = "https://opendata.cwa.gov.tw/api/v1/rest/datastore";
pub const WATER_CCTV_URL: &str =
    "https://opendata.wra.gov.tw/api/v2/f71b74eb-cbe5-42c6-8be5-7500450e7db0?sort=_importdate%20asc&format=JSON";
pub const AIR_QUALITY_URL: &str =
    "https://data.moenv.gov.tw/api/v2/aqx_p_432?limit=1000&sort=ImportDate%20desc&format=JSON";

pub const WEATHER_STATIONS_DATASET: &str = "O-A0003-001";
pub const EARTHQUAKE_SIGNIFICANT_DATASET: &str = "E-A0015-001";
pub const EARTHQUAKE_MINOR_DATASET: &str = "E-A0016-001";
/// Reports kept per earthquake feed.
pub const EARTHQUAKE_REPORT_LIMIT: usize = 10;

// Weather history kept from weather-station refreshes
pub const WEATHER_HISTORY_RETENTION: Duration = Duration::from_secs(26 * 3600);
pub const WEATHER_SUMMARY_WINDOW: Duration = Duration::from_secs(2 * 3600);

// Labels carried in the `type` field of CCTV responses
pub const FREEWAY_TYPE_LABEL: &str = "國道";
pub const PROVINCIAL_TYPE_LABEL: &str = "省道";

pub const UNKNOWN_ID: &str = "未知";

/// Which upstream secret a resource needs, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Secret {
    Cwa,
    Moenv,
}

/// Picks one of several resources sharing a route, by query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selector {
    pub param: &'static str,
    pub value: &'static str,
    /// Served when the parameter is absent.
    pub default: bool,
}

/// How a CWA dataset is fetched and what the cache keeps of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    /// Datastore JSON; its `records` object is cached as-is.
    Document,
    /// File-API product; only the image link and observation time are kept.
    Chart,
}

/// One CWA dataset reachable through `/api/weather?dataset=`.
#[derive(Debug, Clone, Copy)]
pub struct CwaDataset {
    pub id: &'static str,
    pub name: &'static str,
    pub kind: DatasetKind,
}

pub const CWA_DATASETS: [CwaDataset; 8] = [
    CwaDataset { id: "O-A0001-001", name: "自動氣象站觀測", kind: DatasetKind::Document },
    CwaDataset { id: "O-A0002-001", name: "自動雨量站觀測", kind: DatasetKind::Document },
    CwaDataset { id: "F-C0032-001", name: "一般天氣預報 今明36小時", kind: DatasetKind::Document },
    CwaDataset { id: "F-C0035-003", name: "天氣圖 地面分析", kind: DatasetKind::Chart },
    CwaDataset { id: "F-C0035-015", name: "天氣圖 24小時預測", kind: DatasetKind::Chart },
    CwaDataset { id: "F-C0035-017", name: "天氣圖 36小時預測", kind: DatasetKind::Chart },
    CwaDataset { id: "F-C0035-023", name: "天氣圖 48小時預測", kind: DatasetKind::Chart },
    CwaDataset { id: "F-C0035-024", name: "天氣圖 72小時預測", kind: DatasetKind::Chart },
];

pub fn dataset_by_id(id: &str) -> Option<CwaDataset> {
    CWA_DATASETS.into_iter().find(|d| d.id == id)
}

/// Freshness and header policy for one cached resource.
#[derive(Debug, Clone, Copy)]
pub struct ResourcePolicy {
    pub key: &'static str,
    pub route: &'static str,
    pub selector: Option<Selector>,
    pub upstream_min_interval: Duration,
    pub ttl: Duration,
    pub stale_while_revalidate: Duration,
    pub type_label: Option<&'static str>,
    pub secret: Option<Secret>,
}

impl ResourcePolicy {
    /// `Cache-Control` value matching the internal TTL so CDNs agree with the proxy.
    pub fn cache_control(&self) -> String {
        let ttl = self.ttl.as_secs();
        format!(
            "public, max-age={ttl}, s-maxage={ttl}, stale-while-revalidate={}",
            self.stale_while_revalidate.as_secs()
        )
    }

    pub fn respects_upstream_floor(&self) -> bool {
        self.ttl > self.upstream_min_interval
    }
}

pub const FREEWAY_CCTV: ResourcePolicy = ResourcePolicy {
    key: FREEWAY_CCTV_KEY,
    route: "/api/cctv-freeway",
    selector: None,
    upstream_min_interval: Duration::from_secs(40),
    ttl: Duration::from_secs(60),
    stale_while_revalidate: Duration::from_secs(300),
    type_label: Some(FREEWAY_TYPE_LABEL),
    secret: None,
};

pub const PROVINCIAL_CCTV: ResourcePolicy = ResourcePolicy {
    key: PROVINCIAL_CCTV_KEY,
    route: "/api/cctv-provincial",
    selector: None,
    upstream_min_interval: Duration::from_secs(60),
    ttl: Duration::from_secs(70),
    stale_while_revalidate: Duration::from_secs(300),
    type_label: Some(PROVINCIAL_TYPE_LABEL),
    secret: None,
};

pub const WEATHER_STATIONS: ResourcePolicy = ResourcePolicy {
    key: WEATHER_STATIONS_KEY,
    route: "/api/weather-stations",
    selector: None,
    upstream_min_interval: Duration::from_secs(240),
    ttl: Duration::from_secs(300),
    stale_while_revalidate: Duration::from_secs(600),
    type_label: None,
    secret: Some(Secret::Cwa),
};

pub const WATER_CCTV: ResourcePolicy = ResourcePolicy {
    key: WATER_CCTV_KEY,
    route: "/api/cctv-water",
    selector: None,
    upstream_min_interval: Duration::from_secs(240),
    ttl: Duration::from_secs(300),
    stale_while_revalidate: Duration::from_secs(600),
    type_label: None,
    secret: None,
};

pub const AIR_QUALITY: ResourcePolicy = ResourcePolicy {
    key: AIR_QUALITY_KEY,
    route: "/api/air-quality",
    selector: None,
    upstream_min_interval: Duration::from_secs(540),
    ttl: Duration::from_secs(600),
    stale_while_revalidate: Duration::from_secs(600),
    type_label: None,
    secret: Some(Secret::Moenv),
};

pub const RADAR: ResourcePolicy = ResourcePolicy {
    key: RADAR_KEY,
    route: "/api/radar",
    selector: None,
    upstream_min_interval: Duration::from_secs(540),
    ttl: Duration::from_secs(600),
    stale_while_revalidate: Duration::from_secs(600),
    type_label: None,
    secret: Some(Secret::Cwa),
};

const fn earthquake(key: &'static str, value: &'static str, default: bool) -> ResourcePolicy {
    ResourcePolicy {
        key,
        route: "/api/earthquake",
        selector: Some(Selector { param: "type", value, default }),
        upstream_min_interval: Duration::from_secs(60),
        ttl: Duration::from_secs(90),
        stale_while_revalidate: Duration::from_secs(300),
        type_label: None,
        secret: Some(Secret::Cwa),
    }
}

pub const EARTHQUAKE_SIGNIFICANT: ResourcePolicy = earthquake(EARTHQUAKE_SIGNIFICANT_KEY, "significant", true);
pub const EARTHQUAKE_MINOR: ResourcePolicy = earthquake(EARTHQUAKE_MINOR_KEY, "minor", false);

/// Observations refresh every ten minutes upstream; forecasts and charts hourly.
const fn cwa_dataset_policy(dataset: &CwaDataset) -> ResourcePolicy {
    let observation = matches!(dataset.id.as_bytes()[0], b'O');
    let (floor, ttl) = if observation { (540, 600) } else { (1500, 1800) };
    ResourcePolicy {
        key: dataset.id,
        route: "/api/weather",
        selector: Some(Selector { param: "dataset", value: dataset.id, default: false }),
        upstream_min_interval: Duration::from_secs(floor),
        ttl: Duration::from_secs(ttl),
        stale_while_revalidate: Duration::from_secs(ttl),
        type_label: None,
        secret: Some(Secret::Cwa),
    }
}

pub static RESOURCES: [ResourcePolicy; 16] = [
    FREEWAY_CCTV,
    PROVINCIAL_CCTV,
    WEATHER_STATIONS,
    WATER_CCTV,
    AIR_QUALITY,
    RADAR,
    EARTHQUAKE_SIGNIFICANT,
    EARTHQUAKE_MINOR,
    cwa_dataset_policy(&CWA_DATASETS[0]),
    cwa_dataset_policy(&CWA_DATASETS[1]),
    cwa_dataset_policy(&CWA_DATASETS[2]),
    cwa_dataset_policy(&CWA_DATASETS[3]),
    cwa_dataset_policy(&CWA_DATASETS[4]),
    cwa_dataset_policy(&CWA_DATASETS[5]),
    cwa_dataset_policy(&CWA_DATASETS[6]),
    cwa_dataset_policy(&CWA_DATASETS[7]),
];

/// Every resource the proxy exposes.
pub fn all_resources() -> impl Iterator<Item = ResourcePolicy> {
    RESOURCES.iter().copied()
}

pub fn resource_by_key(key: &str) -> Option<ResourcePolicy> {
    all_resources().find(|r| r.key == key)
}

/// Resource behind `route` for the given query value, if the route is
/// selector-based and the value (or its absence) names one.
pub fn select_resource(route: &str, value: Option<&str>) -> Option<ResourcePolicy> {
    all_resources()
        .filter(|r| r.route == route)
        .find(|r| match (r.selector, value) {
            (Some(sel), Some(v)) => sel.value == v,
            (Some(sel), None) => sel.default,
            (None, _) => false,
        })
}
