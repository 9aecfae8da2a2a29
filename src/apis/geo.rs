use super::SkipReason;

/// Bounding box a record's coordinates must fall in (inclusive).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoEnvelope {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

/// Taiwan plus the outlying islands, WGS84.
pub const TAIWAN: GeoEnvelope = GeoEnvelope {
    min_lat: 20.0,
    max_lat: 26.0,
    min_lon: 118.0,
    max_lon: 123.0,
};

/// Taiwan and the surrounding seas, where CWA locates reported epicenters.
pub const TAIWAN_SEAS: GeoEnvelope = GeoEnvelope {
    min_lat: 19.0,
    max_lat: 27.0,
    min_lon: 117.0,
    max_lon: 125.0,
};

impl GeoEnvelope {
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat.is_finite()
            && lon.is_finite()
            && (self.min_lat..=self.max_lat).contains(&lat)
            && (self.min_lon..=self.max_lon).contains(&lon)
    }

    /// Out-of-envelope points are dropped, never clamped.
    pub fn check(&self, lat: f64, lon: f64) -> Result<(f64, f64), SkipReason> {
        if self.contains(lat, lon) {
            Ok((lat, lon))
        } else {
            Err(SkipReason::OutOfEnvelope { lat, lon })
        }
    }
}
