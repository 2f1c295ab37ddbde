pub mod choropleth;
pub mod points;

pub use choropleth::{bind_regions, ChoroplethBinding, MissingRegionPolicy, Reducer, ValueRange};
pub use points::{build_cluster_group, shape_points, PointLayer, PointShaper, PointSummary};

/// Median of a non-empty slice; the mean of the middle pair for even lengths.
pub(crate) fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median() {
        assert_eq!(median(&mut []), None);
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 2.0, 3.0]), Some(2.5));
    }
}
