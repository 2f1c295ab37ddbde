use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::fs;
use anyhow::{Context, Result, anyhow};

use crate::processing::choropleth::{MissingRegionPolicy, Reducer};
use crate::render::Palette;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub input: InputConfig,
    pub output: OutputConfig,
    pub points: PointSchema,
    pub regions: RegionSchema,
    pub geometry: GeometrySchema,
    pub style: MapStyle,
}

/// Input paths used by the `all` command. The single-pipeline commands take
/// them from the command line instead.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct InputConfig {
    pub points_csv: Option<PathBuf>,
    pub regions_csv: Option<PathBuf>,
    pub geometry: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub cluster_map: PathBuf,
    pub choropleth_map: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            cluster_map: PathBuf::from("outputs/sf_crime_map.html"),
            choropleth_map: PathBuf::from("outputs/world_choropleth.html"),
        }
    }
}

/// Which CSV columns hold the point fields.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PointSchema {
    pub latitude_column: String,
    pub longitude_column: String,
    pub category_column: Option<String>,
    pub timestamp_column: Option<String>,
    /// Keep at most this many valid points, sampled with `sample_seed`.
    pub max_points: Option<usize>,
    pub sample_seed: u64,
}

impl Default for PointSchema {
    fn default() -> Self {
        Self {
            latitude_column: "latitude".to_string(),
            longitude_column: "longitude".to_string(),
            category_column: Some("category".to_string()),
            timestamp_column: None,
            max_points: None,
            sample_seed: 1,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RegionSchema {
    pub key_column: String,
    /// Every listed column contributes one value per row, e.g. one column per year.
    pub value_columns: Vec<String>,
    pub reducer: Reducer,
    pub missing_region: MissingRegionPolicy,
}

impl Default for RegionSchema {
    fn default() -> Self {
        Self {
            key_column: "country".to_string(),
            value_columns: vec!["value".to_string()],
            reducer: Reducer::default(),
            missing_region: MissingRegionPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeometrySchema {
    /// Feature property holding the region key. `"id"` falls back to the feature id.
    pub key_property: String,
    pub name_property: Option<String>,
}

impl Default for GeometrySchema {
    fn default() -> Self {
        Self {
            key_property: "iso_a3".to_string(),
            name_property: Some("name".to_string()),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MapStyle {
    pub cluster: ClusterStyle,
    pub choropleth: ChoroplethStyle,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct TileLayer {
    pub url: String,
    pub attribution: String,
}

impl TileLayer {
    fn carto(variant: &str) -> Self {
        Self {
            url: format!("https://{{s}}.basemaps.cartocdn.com/{}/{{z}}/{{x}}/{{y}}{{r}}.png", variant),
            attribution: "&copy; OpenStreetMap contributors &copy; CARTO".to_string(),
        }
    }
}

impl Default for TileLayer {
    fn default() -> Self {
        Self::carto("light_all")
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClusterStyle {
    pub title: String,
    pub tiles: TileLayer,
    /// Used when no valid point is left to take the median of.
    pub default_center: [f64; 2],
    pub zoom_start: u8,
    pub layer_name: String,
    pub disable_clustering_at_zoom: u8,
    pub marker_color: String,
    pub marker_radius: f64,
    pub fill_opacity: f64,
}

impl Default for ClusterStyle {
    fn default() -> Self {
        Self {
            title: "Crime Incidents".to_string(),
            tiles: TileLayer::carto("dark_all"),
            default_center: [37.77, -122.42],
            zoom_start: 12,
            layer_name: "Crime Incidents".to_string(),
            disable_clustering_at_zoom: 16,
            marker_color: "#ff7800".to_string(),
            marker_radius: 4.0,
            fill_opacity: 0.7,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChoroplethStyle {
    pub title: String,
    pub tiles: TileLayer,
    pub center: [f64; 2],
    pub zoom_start: u8,
    pub palette: Palette,
    pub bins: usize,
    pub fill_opacity: f64,
    pub line_opacity: f64,
    pub legend_name: String,
}

impl Default for ChoroplethStyle {
    fn default() -> Self {
        Self {
            title: "Migration to Canada".to_string(),
            tiles: TileLayer::default(),
            center: [20.0, 0.0],
            zoom_start: 2,
            palette: Palette::default(),
            bins: 6,
            fill_opacity: 0.8,
            line_opacity: 0.2,
            legend_name: "Migration to Canada (sample period)".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Uses the file when one is given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.regions.value_columns.is_empty() {
            return Err(anyhow!("[regions] value_columns must name at least one column"));
        }
        let bins = self.style.choropleth.bins;
        if !(2..=self.style.choropleth.palette.colors().len()).contains(&bins) {
            return Err(anyhow!(
                "[style.choropleth] bins must be between 2 and {}, got {}",
                self.style.choropleth.palette.colors().len(),
                bins
            ));
        }
        if self.points.max_points == Some(0) {
            return Err(anyhow!("[points] max_points must be greater than zero"));
        }
        Ok(())
    }
}
