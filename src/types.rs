use chrono::NaiveDateTime;
use geo::MultiPolygon;
use serde::Serialize;
use std::fmt;

/// Popup label for points without a usable category.
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// A point row as read from CSV, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPoint {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub category: Option<String>,
    pub timestamp: Option<NaiveDateTime>,
}

impl RawPoint {
    pub fn new(latitude: f64, longitude: f64, category: &str) -> Self {
        Self {
            latitude: Some(latitude),
            longitude: Some(longitude),
            category: Some(category.to_string()),
            timestamp: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SkipReason {
    MissingCoordinate,
    NonFiniteCoordinate,
    LatitudeOutOfRange,
    LongitudeOutOfRange,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MissingCoordinate => "missing coordinate",
            Self::NonFiniteCoordinate => "non-finite coordinate",
            Self::LatitudeOutOfRange => "latitude out of range",
            Self::LongitudeOutOfRange => "longitude out of range",
        };
        f.write_str(s)
    }
}

/// A validated incident location.
#[derive(Debug, Clone, PartialEq)]
pub struct PointRecord {
    latitude: f64,
    longitude: f64,
    category: Option<String>,
    timestamp: Option<NaiveDateTime>,
}

impl PointRecord {
    pub fn validate(raw: RawPoint) -> Result<Self, SkipReason> {
        let (lat, lon) = match (raw.latitude, raw.longitude) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => return Err(SkipReason::MissingCoordinate),
        };
        if !lat.is_finite() || !lon.is_finite() {
            return Err(SkipReason::NonFiniteCoordinate);
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(SkipReason::LatitudeOutOfRange);
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(SkipReason::LongitudeOutOfRange);
        }
        Ok(Self {
            latitude: lat,
            longitude: lon,
            category: raw.category,
            timestamp: raw.timestamp,
        })
    }

    /// The category, or [`UNKNOWN_CATEGORY`] when absent or blank.
    pub fn label(&self) -> &str {
        match self.category.as_deref().map(str::trim) {
            Some(c) if !c.is_empty() => c,
            _ => UNKNOWN_CATEGORY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub lat: f64,
    pub lon: f64,
    pub popup: String,
    /// Shown under the category when the record had a timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

impl From<&PointRecord> for Marker {
    fn from(record: &PointRecord) -> Self {
        Self {
            lat: record.latitude,
            lon: record.longitude,
            popup: record.label().to_string(),
            when: record
                .timestamp
                .map(|ts| ts.format("%Y-%m-%d %H:%M").to_string()),
        }
    }
}

/// The marker layer handed to the map's proximity clustering.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterGroup {
    pub name: String,
    pub disable_clustering_at_zoom: u8,
    pub markers: Vec<Marker>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionValue {
    pub region_key: String,
    pub value: f64,
}

impl RegionValue {
    pub fn new(region_key: impl Into<String>, value: f64) -> Self {
        Self {
            region_key: region_key.into(),
            value,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegionGeometry {
    pub region_key: String,
    pub name: Option<String>,
    pub boundary: MultiPolygon<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_range_edges() {
        assert!(PointRecord::validate(RawPoint::new(90.0, 180.0, "a")).is_ok());
        assert!(PointRecord::validate(RawPoint::new(-90.0, -180.0, "a")).is_ok());
    }

    #[test]
    fn test_validate_reasons() {
        let cases = [
            (RawPoint::new(91.0, 0.0, "x"), SkipReason::LatitudeOutOfRange),
            (RawPoint::new(0.0, -180.5, "x"), SkipReason::LongitudeOutOfRange),
            (RawPoint::new(f64::NAN, 0.0, "x"), SkipReason::NonFiniteCoordinate),
            (
                RawPoint {
                    latitude: Some(1.0),
                    ..RawPoint::default()
                },
                SkipReason::MissingCoordinate,
            ),
        ];
        for (raw, reason) in cases {
            assert_eq!(PointRecord::validate(raw), Err(reason));
        }
    }

    #[test]
    fn test_label_falls_back_to_unknown() {
        let blank = PointRecord::validate(RawPoint::new(1.0, 1.0, "   ")).unwrap();
        assert_eq!(blank.label(), UNKNOWN_CATEGORY);

        let missing = PointRecord::validate(RawPoint {
            latitude: Some(1.0),
            longitude: Some(1.0),
            ..RawPoint::default()
        })
        .unwrap();
        assert_eq!(missing.label(), UNKNOWN_CATEGORY);

        let named = PointRecord::validate(RawPoint::new(1.0, 1.0, " Larceny ")).unwrap();
        assert_eq!(Marker::from(&named).popup, "Larceny");
    }
}
