//! Keeps a rolling history of weather-station readings.
//!
//! Every successful weather-stations refresh appends one row per station to
//! the history store and prunes rows past the retention window.

use crate::app::ports::{HistoryStorePort, RefreshObserver};
use crate::constants::{WEATHER_HISTORY_RETENTION, WEATHER_STATIONS_KEY};
use crate::types::{NormalizedRecord, WeatherSample};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct WeatherHistoryRecorder {
    store: Arc<dyn HistoryStorePort>,
}

impl WeatherHistoryRecorder {
    pub fn new(store: Arc<dyn HistoryStorePort>) -> Self {
        Self { store }
    }
}

/// History samples for the weather-station records in `records`.
pub fn samples_from(records: &[NormalizedRecord]) -> Vec<WeatherSample> {
    records
        .iter()
        .filter_map(|r| match r {
            NormalizedRecord::Weather(st) => Some(WeatherSample {
                station_id: st.id.clone(),
                station_name: st.name.clone(),
                temperature: st.temp,
                wind_speed: st.wind_speed,
                rain: Some(st.rain.unwrap_or(0.0).max(0.0)),
                humidity: st.humid,
            }),
            _ => None,
        })
        .collect()
}

#[async_trait]
impl RefreshObserver for WeatherHistoryRecorder {
    async fn on_refresh(&self, key: &str, written_at: DateTime<Utc>, records: &[NormalizedRecord]) {
        if key != WEATHER_STATIONS_KEY {
            return;
        }
        let samples = samples_from(records);
        match self.store.record(written_at, &samples).await {
            Ok(rows) => debug!(rows, "weather history recorded"),
            Err(e) => {
                warn!(error = %e, "could not record weather history");
                return;
            }
        }

        let cutoff = written_at - chrono::Duration::seconds(WEATHER_HISTORY_RETENTION.as_secs() as i64);
        if let Err(e) = self.store.prune(cutoff).await {
            warn!(error = %e, "could not prune weather history");
        }
    }
}
