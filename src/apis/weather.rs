use super::fields::{coordinate, text};
use super::geo::TAIWAN;
use super::sentinel::{CWA_OBSERVATION, CWA_WIND_DIRECTION};
use super::{fetch_body, outcome_of, parse_json_body, FetchOutcome, ParseReport, SkipReason, SourceAdapter};
use crate::app::ports::HttpClientPort;
use crate::constants::{CWA_FILE_API_BASE, UNKNOWN_ID, WEATHER_STATIONS_DATASET, WEATHER_STATIONS_KEY};
use crate::error::{ProxyError, Result};
use crate::types::{NormalizedRecord, SourceTag, WeatherStation};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// CWA manned weather-station observations (file API, JSON).
pub struct WeatherStationsAdapter {
    http: Arc<dyn HttpClientPort>,
    api_key: Option<String>,
    base_url: String,
}

impl WeatherStationsAdapter {
    pub fn new(http: Arc<dyn HttpClientPort>, api_key: Option<String>) -> Self {
        Self::with_base_url(http, api_key, CWA_FILE_API_BASE)
    }

    pub fn with_base_url(http: Arc<dyn HttpClientPort>, api_key: Option<String>, base_url: &str) -> Self {
        Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, api_key: &str) -> String {
        format!(
            "{}/{}?Authorization={}&downloadType=WEB&format=JSON",
            self.base_url, WEATHER_STATIONS_DATASET, api_key
        )
    }

    /// Walk `cwaopendata.dataset.Station[]`.
    pub fn parse(root: &Value) -> Result<ParseReport> {
        let stations = root
            .pointer("/cwaopendata/dataset/Station")
            .ok_or_else(|| ProxyError::malformed(WEATHER_STATIONS_KEY, "missing cwaopendata.dataset.Station"))?;
        let stations: Vec<&Value> = match stations {
            Value::Array(items) => items.iter().collect(),
            Value::Object(_) => vec![stations],
            _ => {
                return Err(ProxyError::malformed(
                    WEATHER_STATIONS_KEY,
                    "cwaopendata.dataset.Station is not a list",
                ))
            }
        };

        let mut report = ParseReport::default();
        for (idx, station) in stations.into_iter().enumerate() {
            let item = Self::parse_station(station);
            if let Err(reason) = &item {
                debug!(index = idx, %reason, "skipping weather station");
            }
            report.push(item);
        }
        Ok(report)
    }

    fn parse_station(st: &Value) -> std::result::Result<NormalizedRecord, SkipReason> {
        let id = text(st, "StationId").ok_or(SkipReason::MissingField("StationId"))?;
        let geo = st.get("GeoInfo").ok_or(SkipReason::MissingField("GeoInfo"))?;
        let coords = wgs84_coordinates(geo).ok_or(SkipReason::MissingField("GeoInfo.Coordinates"))?;
        let lat = coordinate(coords.get("StationLatitude"), "StationLatitude")?;
        let lon = coordinate(coords.get("StationLongitude"), "StationLongitude")?;
        let (lat, lon) = TAIWAN.check(lat, lon)?;

        let we = st.get("WeatherElement").unwrap_or(&Value::Null);
        let obs = |key: &str| we.get(key).and_then(|v| CWA_OBSERVATION.translate(v));

        Ok(NormalizedRecord::Weather(WeatherStation {
            name: text(st, "StationName").unwrap_or_else(|| UNKNOWN_ID.to_string()),
            id,
            city: text(geo, "CountyName"),
            town: text(geo, "TownName"),
            lat,
            lon,
            temp: obs("AirTemperature"),
            humid: obs("RelativeHumidity"),
            pressure: obs("AirPressure"),
            wind_speed: obs("WindSpeed"),
            wind_dir: we
                .get("WindDirection")
                .and_then(|v| CWA_WIND_DIRECTION.translate(v)),
            rain: we
                .pointer("/Now/Precipitation")
                .and_then(|v| CWA_OBSERVATION.translate(v)),
            uvi: obs("UVIndex"),
            time: st.pointer("/ObsTime/DateTime").and_then(|v| v.as_str()).map(str::to_string),
            source: SourceTag::Cwa,
        }))
    }
}

/// The WGS84 entry of `GeoInfo.Coordinates`, else the first one listed.
fn wgs84_coordinates(geo: &Value) -> Option<&Value> {
    match geo.get("Coordinates")? {
        Value::Array(items) => items
            .iter()
            .find(|c| c.get("CoordinateName").and_then(|n| n.as_str()) == Some("WGS84"))
            .or_else(|| items.first()),
        obj @ Value::Object(_) => Some(obj),
        _ => None,
    }
}

#[async_trait]
impl SourceAdapter for WeatherStationsAdapter {
    fn source_key(&self) -> &'static str {
        WEATHER_STATIONS_KEY
    }

    fn source_tag(&self) -> SourceTag {
        SourceTag::Cwa
    }

    #[instrument(skip(self), fields(source = WEATHER_STATIONS_KEY))]
    async fn fetch(&self) -> FetchOutcome {
        let Some(api_key) = self.api_key.as_deref() else {
            return FetchOutcome::Failed(ProxyError::Configuration(
                "CWA_API_KEY is not set".to_string(),
            ));
        };
        let resp = match fetch_body(self.http.as_ref(), WEATHER_STATIONS_KEY, &self.url(api_key)).await {
            Ok(resp) => resp,
            Err(e) => return FetchOutcome::Failed(e),
        };
        let parsed = parse_json_body(WEATHER_STATIONS_KEY, &resp).and_then(|root| Self::parse(&root));
        if let Ok(report) = &parsed {
            info!("Parsed {} weather stations", report.records.len());
        }
        outcome_of(WEATHER_STATIONS_KEY, parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::testing::StubHttp;
    use serde_json::json;

    fn station(id: &str, lat: Value, lon: Value, we: Value) -> Value {
        json!({
            "StationId": id,
            "StationName": format!("站{id}"),
            "GeoInfo": {
                "CountyName": "臺北市",
                "TownName": "中正區",
                "Coordinates": [
                    {"CoordinateName": "TWD67", "StationLatitude": 0.0, "StationLongitude": 0.0},
                    {"CoordinateName": "WGS84", "StationLatitude": lat, "StationLongitude": lon}
                ]
            },
            "WeatherElement": we,
            "ObsTime": {"DateTime": "2025-11-22T10:00:00+08:00"}
        })
    }

    fn doc(stations: Vec<Value>) -> Value {
        json!({"cwaopendata": {"dataset": {"Station": stations}}})
    }

    fn only_weather(report: &ParseReport) -> Vec<&WeatherStation> {
        report
            .records
            .iter()
            .map(|r| match r {
                NormalizedRecord::Weather(w) => w,
                _ => panic!("wrong record type"),
            })
            .collect()
    }

    #[test]
    fn translates_sentinels_per_field() {
        let we = json!({
            "AirTemperature": -99,
            "RelativeHumidity": "-98",
            "AirPressure": 1012.3,
            "WindSpeed": "X",
            "WindDirection": 990,
            "Now": {"Precipitation": "T"},
            "UVIndex": 3
        });
        let report = WeatherStationsAdapter::parse(&doc(vec![station("466920", json!(25.04), json!(121.51), we)])).unwrap();
        let st = only_weather(&report)[0];
        assert_eq!(st.temp, None);
        assert_eq!(st.humid, Some(0.0));
        assert_eq!(st.pressure, Some(1012.3));
        assert_eq!(st.wind_speed, None);
        assert_eq!(st.wind_dir, Some(990.0));
        assert_eq!(st.rain, Some(0.0));
        assert_eq!(st.uvi, Some(3.0));
    }

    #[test]
    fn prefers_wgs84_coordinates() {
        let report = WeatherStationsAdapter::parse(&doc(vec![station("1", json!("24.15"), json!("120.68"), json!({}))])).unwrap();
        let st = only_weather(&report)[0];
        assert_eq!((st.lat, st.lon), (24.15, 120.68));
    }

    #[test]
    fn broken_station_is_skipped_not_fatal() {
        let mut broken = station("2", json!(24.0), json!(121.0), json!({}));
        broken.as_object_mut().unwrap().remove("GeoInfo");
        let report = WeatherStationsAdapter::parse(&doc(vec![
            station("1", json!(25.0), json!(121.5), json!({})),
            broken,
            station("3", json!(22.6), json!(120.3), json!({})),
        ]))
        .unwrap();
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.skipped, vec![SkipReason::MissingField("GeoInfo")]);
    }

    #[test]
    fn missing_station_list_is_malformed() {
        assert!(WeatherStationsAdapter::parse(&json!({"records": []})).is_err());
    }

    #[tokio::test]
    async fn missing_key_is_a_configuration_error() {
        let http = Arc::new(StubHttp::ok("application/json", "{}"));
        let adapter = WeatherStationsAdapter::new(http.clone(), None);
        match adapter.fetch().await {
            FetchOutcome::Failed(ProxyError::Configuration(_)) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(http.calls(), 0);
    }

    #[tokio::test]
    async fn key_is_sent_as_authorization() {
        let body = doc(vec![station("1", json!(25.0), json!(121.5), json!({}))]).to_string();
        let http = Arc::new(StubHttp::ok("application/json", &body));
        let adapter = WeatherStationsAdapter::with_base_url(http.clone(), Some("CWA-KEY".into()), "http://cwa.test/");
        assert!(matches!(adapter.fetch().await, FetchOutcome::Records(_)));
        let urls = http.urls.lock().unwrap();
        assert_eq!(
            urls[0],
            "http://cwa.test/O-A0003-001?Authorization=CWA-KEY&downloadType=WEB&format=JSON"
        );
    }
}
