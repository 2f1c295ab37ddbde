//! The two map pipelines: load, shape or bind, render, save.

use crate::config::AppConfig;
use crate::data;
use crate::error::{self, MapError};
use crate::processing::{self, ChoroplethBinding, PointSummary};
use crate::render;
use anyhow::{anyhow, Result};
use std::path::Path;
use tracing::{error, info, warn};

pub fn run_cluster(config: &AppConfig, input: &Path, output: &Path) -> Result<PointSummary> {
    let rows = data::load_points(input, &config.points)?;

    let layer = processing::build_cluster_group(&config.points, &config.style.cluster, rows);
    layer.summary.log();

    let html = render::render_cluster_map(&config.style.cluster, &layer)?;
    render::save_document(output, &html)?;

    if layer.group.markers.is_empty() {
        warn!("Every point was filtered out");
        return Err(MapError::EmptyResult {
            what: "points",
            path: output.to_path_buf(),
        }
        .into());
    }
    Ok(layer.summary)
}

pub fn run_choropleth(
    config: &AppConfig,
    input: &Path,
    geometry: &Path,
    output: &Path,
) -> Result<ChoroplethBinding> {
    let rows = data::load_region_values(input, &config.regions)?;
    let regions = data::load_geometry(geometry, &config.geometry)?;

    let binding = processing::bind_regions(
        &rows.values,
        &regions,
        config.regions.reducer,
        config.regions.missing_region,
    );
    binding.log();

    let html = render::render_choropleth_map(&config.style.choropleth, &binding, &regions)?;
    render::save_document(output, &html)?;

    if binding.is_empty() {
        warn!("No region could be bound to a value");
        return Err(MapError::EmptyResult {
            what: "regions",
            path: output.to_path_buf(),
        }
        .into());
    }
    Ok(binding)
}

/// Runs both pipelines from the paths in `config`. One failing does not stop
/// the other. A fatal failure wins over an empty result.
pub fn run_all(config: &AppConfig) -> Result<()> {
    let input = &config.input;
    let missing = |key: &str| anyhow!("[input] {} is required by the `all` command", key);

    let cluster = match &input.points_csv {
        Some(points) => run_cluster(config, points, &config.output.cluster_map).map(|_| ()),
        None => Err(missing("points_csv")),
    };
    if let Err(e) = &cluster {
        error!("Cluster map failed: {:#}", e);
    }

    let choropleth = match (&input.regions_csv, &input.geometry) {
        (Some(regions), Some(geometry)) => {
            run_choropleth(config, regions, geometry, &config.output.choropleth_map).map(|_| ())
        }
        (None, _) => Err(missing("regions_csv")),
        (_, None) => Err(missing("geometry")),
    };
    if let Err(e) = &choropleth {
        error!("Choropleth map failed: {:#}", e);
    }

    match (cluster, choropleth) {
        (Ok(()), Ok(())) => {
            info!("Both maps generated");
            Ok(())
        }
        (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
        (Err(a), Err(b)) => {
            if error::exit_code(&b) < error::exit_code(&a) {
                Err(b)
            } else {
                Err(a)
            }
        }
    }
}
