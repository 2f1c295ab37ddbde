//! Joins per-region values onto region geometry for colour-scale binding.

use crate::types::{RegionGeometry, RegionValue};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// How duplicate rows for one region key collapse into a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    #[default]
    Sum,
    Mean,
    Max,
    /// Last row in input order.
    Latest,
}

/// What a region with geometry but no values gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingRegionPolicy {
    /// Value 0, shaded and counted in the range.
    #[default]
    Zero,
    /// Left out of the mapping and drawn transparent.
    Unshaded,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChoroplethBinding {
    pub values: BTreeMap<String, f64>,
    /// `None` when the mapping is empty.
    pub range: Option<ValueRange>,
    /// Keys with values but no geometry.
    pub dropped_keys: BTreeSet<String>,
    /// Keys with geometry but no values, under [`MissingRegionPolicy::Unshaded`].
    pub unshaded: BTreeSet<String>,
    /// Non-finite inputs coerced to 0.
    pub anomalies: usize,
    /// Geometry keys that received at least one input value.
    pub matched: usize,
}

impl ChoroplethBinding {
    /// True when no input value reached any region, even if zero-filled
    /// regions are left in the mapping.
    pub fn is_empty(&self) -> bool {
        self.matched == 0
    }

    pub fn log(&self) {
        info!(
            "Choropleth: {} regions bound ({} with data), {} unshaded, {} keys without geometry, \
             {} anomalies",
            self.values.len(),
            self.matched,
            self.unshaded.len(),
            self.dropped_keys.len(),
            self.anomalies
        );
        if self.anomalies > 0 {
            warn!("{} non-numeric or missing values were treated as 0", self.anomalies);
        }
        if let Some(range) = self.range {
            info!("Value range: {} to {}", range.min, range.max);
        }
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    sum: f64,
    count: usize,
    max: f64,
    latest: f64,
}

impl Accumulator {
    fn push(&mut self, value: f64) {
        self.max = if self.count == 0 { value } else { self.max.max(value) };
        self.sum += value;
        self.latest = value;
        self.count += 1;
    }

    fn finish(&self, reducer: Reducer) -> f64 {
        let value = match reducer {
            Reducer::Sum => self.sum,
            Reducer::Mean => self.sum / self.count as f64,
            Reducer::Max => self.max,
            Reducer::Latest => self.latest,
        };
        clamp_finite(value)
    }
}

/// Overflowed sums saturate at the largest finite value.
fn clamp_finite(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(f64::MIN, f64::MAX)
    }
}

/// Reduces `values` per key and inner-joins them onto `geometries`.
pub fn bind_regions(
    values: &[RegionValue],
    geometries: &[RegionGeometry],
    reducer: Reducer,
    policy: MissingRegionPolicy,
) -> ChoroplethBinding {
    let mut anomalies = 0;
    let mut reduced: BTreeMap<&str, Accumulator> = BTreeMap::new();

    for row in values {
        let value = if row.value.is_finite() {
            row.value
        } else {
            debug!("Non-numeric value for region {} treated as 0", row.region_key);
            anomalies += 1;
            0.0
        };
        reduced.entry(row.region_key.as_str()).or_default().push(value);
    }

    let known: BTreeSet<&str> = geometries.iter().map(|g| g.region_key.as_str()).collect();

    let mut dropped_keys = BTreeSet::new();
    for key in reduced.keys().filter(|k| !known.contains(*k)) {
        warn!("Region {} has values but no geometry, dropped", key);
        dropped_keys.insert(key.to_string());
    }

    let mut bound = BTreeMap::new();
    let mut unshaded = BTreeSet::new();
    let mut matched = 0;
    for key in known {
        match (reduced.get(key), policy) {
            (Some(acc), _) => {
                matched += 1;
                bound.insert(key.to_string(), acc.finish(reducer));
            }
            (None, MissingRegionPolicy::Zero) => {
                bound.insert(key.to_string(), 0.0);
            }
            (None, MissingRegionPolicy::Unshaded) => {
                unshaded.insert(key.to_string());
            }
        }
    }

    let range = bound.values().fold(None, |range: Option<ValueRange>, &v| {
        Some(match range {
            None => ValueRange { min: v, max: v },
            Some(r) => ValueRange { min: r.min.min(v), max: r.max.max(v) },
        })
    });

    ChoroplethBinding {
        values: bound,
        range,
        dropped_keys,
        unshaded,
        anomalies,
        matched,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, MultiPolygon};

    fn region(key: &str) -> RegionGeometry {
        RegionGeometry {
            region_key: key.to_string(),
            name: None,
            boundary: MultiPolygon::new(vec![polygon![
                (x: 0.0, y: 0.0),
                (x: 1.0, y: 0.0),
                (x: 1.0, y: 1.0),
            ]]),
        }
    }

    fn world() -> Vec<RegionGeometry> {
        vec![region("CHN"), region("IND"), region("USA")]
    }

    fn rows() -> Vec<RegionValue> {
        vec![
            RegionValue::new("CHN", 100.0),
            RegionValue::new("CHN", 50.0),
            RegionValue::new("IND", 80.0),
        ]
    }

    #[test]
    fn test_sum_with_zero_for_missing_regions() {
        let binding = bind_regions(&rows(), &world(), Reducer::Sum, MissingRegionPolicy::Zero);

        let expected: BTreeMap<String, f64> = [("CHN", 150.0), ("IND", 80.0), ("USA", 0.0)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(binding.values, expected);
        assert_eq!(binding.range, Some(ValueRange { min: 0.0, max: 150.0 }));
        assert!(binding.dropped_keys.is_empty());
        assert_eq!(binding.anomalies, 0);
    }

    #[test]
    fn test_unshaded_policy_leaves_regions_out() {
        let binding = bind_regions(&rows(), &world(), Reducer::Sum, MissingRegionPolicy::Unshaded);
        assert_eq!(binding.values.len(), 2);
        assert!(binding.unshaded.contains("USA"));
        assert_eq!(binding.range, Some(ValueRange { min: 80.0, max: 150.0 }));
    }

    #[test]
    fn test_keys_without_geometry_are_dropped() {
        let mut values = rows();
        values.push(RegionValue::new("ATA", 7.0));
        let geometries = world();
        let binding = bind_regions(&values, &geometries, Reducer::Sum, MissingRegionPolicy::Zero);

        assert!(binding.dropped_keys.contains("ATA"));
        for key in binding.values.keys() {
            assert!(geometries.iter().any(|g| &g.region_key == key));
        }
    }

    #[test]
    fn test_reducers() {
        let values = vec![
            RegionValue::new("CHN", 10.0),
            RegionValue::new("CHN", 40.0),
            RegionValue::new("CHN", 25.0),
        ];
        let geometries = vec![region("CHN")];
        let value = |reducer| {
            bind_regions(&values, &geometries, reducer, MissingRegionPolicy::Zero).values["CHN"]
        };
        assert_eq!(value(Reducer::Sum), 75.0);
        assert_eq!(value(Reducer::Mean), 25.0);
        assert_eq!(value(Reducer::Max), 40.0);
        assert_eq!(value(Reducer::Latest), 25.0);
    }

    #[test]
    fn test_non_finite_values_become_zero() {
        let values = vec![
            RegionValue::new("CHN", f64::NAN),
            RegionValue::new("IND", f64::INFINITY),
            RegionValue::new("IND", 5.0),
        ];
        let binding = bind_regions(&values, &world(), Reducer::Max, MissingRegionPolicy::Zero);

        assert_eq!(binding.anomalies, 2);
        assert_eq!(binding.values["CHN"], 0.0);
        assert_eq!(binding.values["IND"], 5.0);
        assert!(binding.values.values().all(|v| v.is_finite()));
    }

    #[test]
    fn test_overflowing_sum_saturates() {
        let values = vec![RegionValue::new("CHN", f64::MAX), RegionValue::new("CHN", f64::MAX)];
        let binding = bind_regions(&values, &world(), Reducer::Sum, MissingRegionPolicy::Zero);
        assert_eq!(binding.values["CHN"], f64::MAX);
    }

    #[test]
    fn test_binding_is_idempotent() {
        let first = bind_regions(&rows(), &world(), Reducer::Sum, MissingRegionPolicy::Zero);
        let second = bind_regions(&rows(), &world(), Reducer::Sum, MissingRegionPolicy::Zero);
        assert_eq!(first, second);
    }

    #[test]
    fn test_zero_filled_regions_alone_are_empty() {
        let values = vec![RegionValue::new("ZZZ", 100.0), RegionValue::new("YYY", 5.0)];
        let binding =
            bind_regions(&values, &[region("CHN")], Reducer::Sum, MissingRegionPolicy::Zero);

        assert_eq!(binding.values.len(), 1);
        assert_eq!(binding.matched, 0);
        assert!(binding.is_empty());

        let binding = bind_regions(&rows(), &world(), Reducer::Sum, MissingRegionPolicy::Zero);
        assert_eq!(binding.matched, 2);
        assert!(!binding.is_empty());
    }

    #[test]
    fn test_no_geometry_gives_empty_binding() {
        let binding = bind_regions(&rows(), &[], Reducer::Sum, MissingRegionPolicy::Zero);
        assert!(binding.is_empty());
        assert_eq!(binding.range, None);
        assert_eq!(binding.dropped_keys.len(), 2);
    }
}
