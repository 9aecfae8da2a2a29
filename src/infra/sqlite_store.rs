use crate::app::ports::{CacheTier, CounterStorePort, HistoryStorePort};
use crate::error::{ProxyError, Result};
use crate::types::{CacheEntry, CameraViews, HistoryPoint, WeatherSample, WeatherSummary};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Local SQLite database backing the durable cache tier, the view counter and
/// the weather history.
///
/// rusqlite is synchronous; every call runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

const SCHEMA: &str = r#"
    PRAGMA journal_mode=WAL;
    CREATE TABLE IF NOT EXISTS api_cache (
        key         TEXT PRIMARY KEY,
        data        TEXT NOT NULL,
        updated_at  INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS camera_views (
        camera_id     TEXT PRIMARY KEY,
        views         INTEGER NOT NULL DEFAULT 0,
        last_updated  INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_camera_views_views ON camera_views (views DESC);
    CREATE TABLE IF NOT EXISTS weather_history (
        station_id    TEXT NOT NULL,
        station_name  TEXT NOT NULL,
        timestamp     INTEGER NOT NULL,
        temperature   REAL,
        wind_speed    REAL,
        rain          REAL,
        humidity      REAL,
        PRIMARY KEY (station_id, timestamp)
    );
    CREATE INDEX IF NOT EXISTS idx_weather_history_time ON weather_history (timestamp);
"#;

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| ProxyError::Storage("sqlite connection mutex poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| ProxyError::Storage(format!("sqlite task failed: {e}")))?
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| ProxyError::Storage(format!("invalid timestamp {ms}")))
}

#[async_trait]
impl CacheTier for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let row: Option<(String, i64)> = conn
                .query_row(
                    "SELECT data, updated_at FROM api_cache WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            match row {
                Some((data, updated_at)) => Ok(Some(CacheEntry::new(&key, data, from_millis(updated_at)?))),
                None => Ok(None),
            }
        })
        .await
    }

    async fn put(&self, entry: &CacheEntry) -> Result<()> {
        let entry = entry.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO api_cache (key, data, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET data=excluded.data, updated_at=excluded.updated_at",
                params![entry.key, &*entry.payload, entry.written_at.timestamp_millis()],
            )?;
            Ok(())
        })
        .await
    }

    async fn put_if_newer(&self, entry: &CacheEntry) -> Result<bool> {
        let entry = entry.clone();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "INSERT INTO api_cache (key, data, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET data=excluded.data, updated_at=excluded.updated_at
                 WHERE excluded.updated_at > api_cache.updated_at",
                params![entry.key, &*entry.payload, entry.written_at.timestamp_millis()],
            )?;
            Ok(changed > 0)
        })
        .await
    }
}

#[async_trait]
impl CounterStorePort for SqliteStore {
    async fn increment(&self, camera_id: &str) -> Result<i64> {
        let camera_id = camera_id.to_string();
        let now = Utc::now().timestamp_millis();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO camera_views (camera_id, views, last_updated) VALUES (?1, 1, ?2)
                 ON CONFLICT(camera_id) DO UPDATE SET views=views + 1, last_updated=excluded.last_updated",
                params![camera_id, now],
            )?;
            let views: i64 = conn.query_row(
                "SELECT views FROM camera_views WHERE camera_id = ?1",
                params![camera_id],
                |row| row.get(0),
            )?;
            Ok(views)
        })
        .await
    }

    async fn top_n(&self, limit: usize) -> Result<Vec<CameraViews>> {
        let limit = limit as i64;
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT camera_id, views, last_updated FROM camera_views
                 ORDER BY views DESC, camera_id ASC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (camera_id, views, last_updated) = row?;
                out.push(CameraViews {
                    camera_id,
                    views,
                    last_updated: from_millis(last_updated)?,
                });
            }
            Ok(out)
        })
        .await
    }
}

fn history_point(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryPoint> {
    Ok(HistoryPoint {
        timestamp: row.get(0)?,
        temperature: row.get(1)?,
        rain: row.get(2)?,
        humidity: row.get(3)?,
        wind_speed: row.get(4)?,
    })
}

#[async_trait]
impl HistoryStorePort for SqliteStore {
    async fn record(&self, at: DateTime<Utc>, samples: &[WeatherSample]) -> Result<usize> {
        let samples = samples.to_vec();
        let at = at.timestamp_millis();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let mut written = 0;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR IGNORE INTO weather_history
                     (station_id, station_name, timestamp, temperature, wind_speed, rain, humidity)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for s in &samples {
                    written += stmt.execute(params![
                        s.station_id,
                        s.station_name,
                        at,
                        s.temperature,
                        s.wind_speed,
                        s.rain,
                        s.humidity
                    ])?;
                }
            }
            tx.commit()?;
            Ok(written)
        })
        .await
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<usize> {
        let before = before.timestamp_millis();
        self.with_conn(move |conn| {
            Ok(conn.execute("DELETE FROM weather_history WHERE timestamp < ?1", params![before])?)
        })
        .await
    }

    async fn station_series(&self, station_id: &str) -> Result<Vec<HistoryPoint>> {
        let station_id = station_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT timestamp, temperature, rain, humidity, wind_speed FROM weather_history
                 WHERE station_id = ?1 ORDER BY timestamp ASC",
            )?;
            let rows = stmt.query_map(params![station_id], history_point)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn hourly_series(&self, since: DateTime<Utc>) -> Result<Vec<HistoryPoint>> {
        let since = since.timestamp_millis();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT (timestamp / 3600000) * 3600000 AS bucket,
                        AVG(temperature), MAX(rain), AVG(humidity), AVG(wind_speed)
                 FROM weather_history
                 WHERE timestamp > ?1
                 GROUP BY bucket
                 ORDER BY bucket ASC",
            )?;
            let rows = stmt.query_map(params![since], history_point)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn summary(&self, since: DateTime<Utc>) -> Result<WeatherSummary> {
        let since = since.timestamp_millis();
        self.with_conn(move |conn| {
            let summary = conn.query_row(
                "SELECT COUNT(DISTINCT station_id),
                        AVG(temperature), MAX(temperature), MIN(temperature),
                        COUNT(DISTINCT CASE WHEN rain > 0 THEN station_id END),
                        MAX(rain),
                        COUNT(DISTINCT CASE WHEN temperature IS NULL THEN station_id END)
                 FROM weather_history
                 WHERE timestamp > ?1",
                params![since],
                |row| {
                    let avg: Option<f64> = row.get(1)?;
                    Ok(WeatherSummary {
                        station_count: row.get(0)?,
                        avg_temp: avg.map(|t| (t * 10.0).round() / 10.0).unwrap_or(0.0),
                        max_temp: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                        min_temp: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                        raining_stations: row.get(4)?,
                        max_rainfall: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
                        abnormal_count: row.get(6)?,
                    })
                },
            )?;
            Ok(summary)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str, temperature: Option<f64>, rain: Option<f64>) -> WeatherSample {
        WeatherSample {
            station_id: id.to_string(),
            station_name: format!("站{id}"),
            temperature,
            wind_speed: Some(2.0),
            rain,
            humidity: Some(70.0),
        }
    }

    #[tokio::test]
    async fn cache_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("proxy.db");
        let written_at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .put(&CacheEntry::new("weather-stations", "[{\"id\":\"466920\"}]", written_at))
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let entry = store.get("weather-stations").await.unwrap().unwrap();
        assert_eq!(&*entry.payload, "[{\"id\":\"466920\"}]");
        assert_eq!(entry.written_at, written_at);
        assert_eq!(store.get("radar").await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_replaces_the_whole_entry() {
        let store = SqliteStore::open_in_memory().unwrap();
        let t0 = Utc.timestamp_millis_opt(1_000).unwrap();
        let t1 = Utc.timestamp_millis_opt(2_000).unwrap();
        store.put(&CacheEntry::new("radar", "[1]", t0)).await.unwrap();
        store.put(&CacheEntry::new("radar", "[2]", t1)).await.unwrap();
        assert_eq!(
            store.get("radar").await.unwrap(),
            Some(CacheEntry::new("radar", "[2]", t1))
        );
    }

    #[tokio::test]
    async fn conditional_put_never_goes_back_in_time() {
        let store = SqliteStore::open_in_memory().unwrap();
        let t0 = Utc.timestamp_millis_opt(1_000).unwrap();
        let t1 = Utc.timestamp_millis_opt(2_000).unwrap();

        assert!(store.put_if_newer(&CacheEntry::new("radar", "[2]", t1)).await.unwrap());
        assert!(!store.put_if_newer(&CacheEntry::new("radar", "[1]", t0)).await.unwrap());
        assert_eq!(
            store.get("radar").await.unwrap(),
            Some(CacheEntry::new("radar", "[2]", t1))
        );
    }

    #[tokio::test]
    async fn view_counter_ranks_by_views() {
        let store = SqliteStore::open_in_memory().unwrap();
        for id in ["CCTV-1", "CCTV-2", "CCTV-2", "CCTV-3", "CCTV-2", "CCTV-3"] {
            store.increment(id).await.unwrap();
        }
        assert_eq!(store.increment("CCTV-1").await.unwrap(), 2);

        let top = store.top_n(2).await.unwrap();
        let ids: Vec<_> = top.iter().map(|r| (r.camera_id.as_str(), r.views)).collect();
        assert_eq!(ids, vec![("CCTV-2", 3), ("CCTV-1", 2)]);
    }

    #[tokio::test]
    async fn history_series_and_summary() {
        let store = SqliteStore::open_in_memory().unwrap();
        let hour = |h: i64| Utc.timestamp_millis_opt(1_700_000_000_000 / 3_600_000 * 3_600_000 + h * 3_600_000).unwrap();

        store
            .record(hour(0), &[sample("466920", Some(20.0), Some(0.0)), sample("467300", Some(24.0), None)])
            .await
            .unwrap();
        store
            .record(hour(1), &[sample("466920", Some(22.0), Some(1.5)), sample("467300", None, Some(0.0))])
            .await
            .unwrap();
        // Same station and instant: ignored.
        assert_eq!(store.record(hour(1), &[sample("466920", Some(99.0), None)]).await.unwrap(), 0);

        let series = store.station_series("466920").await.unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[1].temperature, Some(22.0));
        assert_eq!(series[1].timestamp, hour(1).timestamp_millis());

        let hourly = store.hourly_series(hour(-1)).await.unwrap();
        assert_eq!(hourly.len(), 2);
        assert_eq!(hourly[0].temperature, Some(22.0));
        assert_eq!(hourly[1].rain, Some(1.5));

        let summary = store.summary(hour(-1)).await.unwrap();
        assert_eq!(summary.station_count, 2);
        assert_eq!(summary.avg_temp, 22.0);
        assert_eq!(summary.max_temp, 24.0);
        assert_eq!(summary.min_temp, 20.0);
        assert_eq!(summary.raining_stations, 1);
        assert_eq!(summary.max_rainfall, 1.5);
        assert_eq!(summary.abnormal_count, 1);

        assert_eq!(store.prune(hour(1)).await.unwrap(), 2);
        assert_eq!(store.station_series("466920").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_history_summarizes_to_zero() {
        let store = SqliteStore::open_in_memory().unwrap();
        let summary = store.summary(Utc::now()).await.unwrap();
        assert_eq!(summary.station_count, 0);
        assert_eq!(summary.avg_temp, 0.0);
        assert_eq!(summary.abnormal_count, 0);
    }
}
