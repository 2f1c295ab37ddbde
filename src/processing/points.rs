use crate::config::{ClusterStyle, PointSchema};
use crate::processing::median;
use crate::types::{ClusterGroup, Marker, PointRecord, RawPoint, SkipReason};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Lazily validates raw rows into markers, counting what it skips.
///
/// The counters are only complete once the iterator has been drained.
pub struct PointShaper<I> {
    rows: I,
    seen: usize,
    skipped: BTreeMap<SkipReason, usize>,
}

pub fn shape_points<I>(rows: I) -> PointShaper<I::IntoIter>
where
    I: IntoIterator<Item = RawPoint>,
{
    PointShaper {
        rows: rows.into_iter(),
        seen: 0,
        skipped: BTreeMap::new(),
    }
}

impl<I> PointShaper<I> {
    pub fn seen(&self) -> usize {
        self.seen
    }

    pub fn skipped(&self) -> usize {
        self.skipped.values().sum()
    }

    pub fn skip_counts(&self) -> &BTreeMap<SkipReason, usize> {
        &self.skipped
    }
}

impl<I: Iterator<Item = RawPoint>> Iterator for PointShaper<I> {
    type Item = Marker;

    fn next(&mut self) -> Option<Marker> {
        loop {
            let raw = self.rows.next()?;
            self.seen += 1;
            match PointRecord::validate(raw) {
                Ok(record) => return Some(Marker::from(&record)),
                Err(reason) => {
                    debug!("Skipping point row {}: {}", self.seen, reason);
                    *self.skipped.entry(reason).or_default() += 1;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointSummary {
    pub input: usize,
    pub rendered: usize,
    pub skipped: BTreeMap<SkipReason, usize>,
    /// Valid points left out by the `max_points` cap.
    pub sampled_out: usize,
}

impl PointSummary {
    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }

    pub fn log(&self) {
        info!(
            "Points: {} read, {} rendered, {} skipped, {} sampled out",
            self.input,
            self.rendered,
            self.skipped_total(),
            self.sampled_out
        );
        for (reason, count) in &self.skipped {
            warn!("  {} rows skipped: {}", count, reason);
        }
    }
}

#[derive(Debug, Clone)]
pub struct PointLayer {
    pub group: ClusterGroup,
    /// `[lat, lon]` the map opens on.
    pub center: [f64; 2],
    pub summary: PointSummary,
}

pub fn build_cluster_group(
    schema: &PointSchema,
    style: &ClusterStyle,
    rows: Vec<RawPoint>,
) -> PointLayer {
    let mut shaper = shape_points(rows);
    let mut markers: Vec<Marker> = shaper.by_ref().collect();

    let mut sampled_out = 0;
    if let Some(cap) = schema.max_points {
        if markers.len() > cap {
            sampled_out = markers.len() - cap;
            markers = sample_markers(markers, cap, schema.sample_seed);
            info!(
                "Sampled {} of {} valid points (seed {})",
                cap,
                cap + sampled_out,
                schema.sample_seed
            );
        }
    }

    let center = map_center(&markers).unwrap_or(style.default_center);

    let summary = PointSummary {
        input: shaper.seen(),
        rendered: markers.len(),
        skipped: shaper.skip_counts().clone(),
        sampled_out,
    };

    PointLayer {
        group: ClusterGroup {
            name: style.layer_name.clone(),
            disable_clustering_at_zoom: style.disable_clustering_at_zoom,
            markers,
        },
        center,
        summary,
    }
}

/// Seeded sample that keeps the input order of the survivors.
fn sample_markers(markers: Vec<Marker>, cap: usize, seed: u64) -> Vec<Marker> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut keep = index::sample(&mut rng, markers.len(), cap).into_vec();
    keep.sort_unstable();

    let mut keep = keep.into_iter().peekable();
    markers
        .into_iter()
        .enumerate()
        .filter_map(|(i, m)| {
            if keep.peek() == Some(&i) {
                keep.next();
                Some(m)
            } else {
                None
            }
        })
        .collect()
}

fn map_center(markers: &[Marker]) -> Option<[f64; 2]> {
    let mut lats: Vec<f64> = markers.iter().map(|m| m.lat).collect();
    let mut lons: Vec<f64> = markers.iter().map(|m| m.lon).collect();
    Some([median(&mut lats)?, median(&mut lons)?])
}
