use crate::config::{ChoroplethStyle, ClusterStyle, TileLayer};
use crate::error::MapError;
use crate::processing::{ChoroplethBinding, PointLayer, ValueRange};
use crate::types::RegionGeometry;
use anyhow::{Context, Result};
use geo::BoundingRect;
use geojson::{Feature, FeatureCollection, Geometry, JsonObject};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tera::{Context as TeraContext, Tera};
use tracing::info;

const CLUSTER_TEMPLATE: &str = include_str!("../templates/cluster_map.html");
const CHOROPLETH_TEMPLATE: &str = include_str!("../templates/choropleth_map.html");

/// Sequential ColorBrewer schemes, nine classes each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Palette {
    #[default]
    YlOrRd,
    YlGnBu,
    BuPu,
    Greens,
    Blues,
}

impl Palette {
    pub fn colors(&self) -> &'static [&'static str] {
        match self {
            Palette::YlOrRd => &[
                "#ffffcc", "#ffeda0", "#fed976", "#feb24c", "#fd8d3c",
                "#fc4e2a", "#e31a1c", "#bd0026", "#800026",
            ],
            Palette::YlGnBu => &[
                "#ffffd9", "#edf8b1", "#c7e9b4", "#7fcdbb", "#41b6c4",
                "#1d91c0", "#225ea8", "#253494", "#081d58",
            ],
            Palette::BuPu => &[
                "#f7fcfd", "#e0ecf4", "#bfd3e6", "#9ebcda", "#8c96c6",
                "#8c6bb1", "#88419d", "#810f7c", "#4d004b",
            ],
            Palette::Greens => &[
                "#f7fcf5", "#e5f5e0", "#c7e9c0", "#a1d99b", "#74c476",
                "#41ab5d", "#238b45", "#006d2c", "#00441b",
            ],
            Palette::Blues => &[
                "#f7fbff", "#deebf7", "#c6dbef", "#9ecae1", "#6baed6",
                "#4292c6", "#2171b5", "#08519c", "#08306b",
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LegendEntry {
    pub color: &'static str,
    pub label: String,
}

/// Equal-width bins between the observed min and max.
#[derive(Debug, Clone)]
pub struct ColorScale {
    range: ValueRange,
    colors: Vec<&'static str>,
}

impl ColorScale {
    pub fn new(range: ValueRange, palette: Palette, bins: usize) -> Self {
        let all = palette.colors();
        let bins = bins.clamp(2, all.len());
        let step = (all.len() - 1) as f64 / (bins - 1) as f64;
        let colors = (0..bins)
            .map(|i| all[(i as f64 * step).round() as usize])
            .collect();
        Self { range, colors }
    }

    /// Half of `max - min`, which stays finite for any finite range.
    fn half_span(&self) -> f64 {
        self.range.max / 2.0 - self.range.min / 2.0
    }

    pub fn color_for(&self, value: f64) -> &'static str {
        let half_span = self.half_span();
        if half_span <= 0.0 || !half_span.is_finite() {
            return self.colors[0];
        }
        let bins = self.colors.len();
        let pos = ((value / 2.0 - self.range.min / 2.0) / half_span * bins as f64).floor();
        let idx = if pos.is_finite() { pos.max(0.0) as usize } else { 0 };
        self.colors[idx.min(bins - 1)]
    }

    pub fn legend(&self) -> Vec<LegendEntry> {
        let bins = self.colors.len();
        let half_width = self.half_span() / bins as f64;
        let edge = |i: usize| (self.range.min / 2.0 + half_width * i as f64) * 2.0;
        self.colors
            .iter()
            .enumerate()
            .map(|(i, &color)| {
                let from = edge(i);
                let to = if i + 1 == bins { self.range.max } else { edge(i + 1) };
                LegendEntry {
                    color,
                    label: format!("{} – {}", format_value(from), format_value(to)),
                }
            })
            .collect()
    }
}

fn format_value(v: f64) -> String {
    if v.abs() >= 1e15 {
        format!("{:.3e}", v)
    } else if v.fract() == 0.0 {
        format!("{:.0}", v)
    } else {
        format!("{:.2}", v)
    }
}

fn templates() -> Result<Tera> {
    let mut tera = Tera::default();
    tera.add_raw_template("cluster_map.html", CLUSTER_TEMPLATE)
        .context("Invalid cluster map template")?;
    tera.add_raw_template("choropleth_map.html", CHOROPLETH_TEMPLATE)
        .context("Invalid choropleth map template")?;
    Ok(tera)
}

/// JSON that can sit inside a `<script>` element.
fn script_json(value: &Value) -> Result<String> {
    let s = serde_json::to_string(value).context("Failed to serialize map data")?;
    Ok(s.replace("</", "<\\/"))
}

fn tiles_json(tiles: &TileLayer) -> Value {
    json!({ "url": tiles.url, "attribution": tiles.attribution })
}

pub fn render_cluster_map(style: &ClusterStyle, layer: &PointLayer) -> Result<String> {
    let payload = json!({
        "center": layer.center,
        "zoom": style.zoom_start,
        "tiles": tiles_json(&style.tiles),
        "cluster": {
            "name": layer.group.name,
            "disableClusteringAtZoom": layer.group.disable_clustering_at_zoom,
        },
        "marker": {
            "color": style.marker_color,
            "radius": style.marker_radius,
            "fillOpacity": style.fill_opacity,
        },
        "markers": layer.group.markers,
    });

    let mut context = TeraContext::new();
    context.insert("title", &style.title);
    context.insert("payload", &script_json(&payload)?);

    templates()?
        .render("cluster_map.html", &context)
        .context("Failed to render cluster map")
}

fn region_features(
    binding: &ChoroplethBinding,
    scale: Option<&ColorScale>,
    regions: &[RegionGeometry],
) -> FeatureCollection {
    let features = regions
        .iter()
        .map(|region| {
            let value = binding.values.get(&region.region_key).copied();
            let color = value.and_then(|v| scale.map(|s| s.color_for(v)));

            let mut properties = JsonObject::new();
            properties.insert("key".to_string(), json!(region.region_key));
            properties.insert("name".to_string(), json!(region.name));
            properties.insert("value".to_string(), json!(value));
            properties.insert("color".to_string(), json!(color));

            Feature {
                bbox: None,
                geometry: Some(Geometry::new(geojson::Value::from(&region.boundary))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// `[[south, west], [north, east]]` around every region.
fn region_bounds(regions: &[RegionGeometry]) -> Option<[[f64; 2]; 2]> {
    regions
        .iter()
        .filter_map(|r| r.boundary.bounding_rect())
        .map(|rect| [[rect.min().y, rect.min().x], [rect.max().y, rect.max().x]])
        .reduce(|a, b| {
            [
                [a[0][0].min(b[0][0]), a[0][1].min(b[0][1])],
                [a[1][0].max(b[1][0]), a[1][1].max(b[1][1])],
            ]
        })
}

pub fn render_choropleth_map(
    style: &ChoroplethStyle,
    binding: &ChoroplethBinding,
    regions: &[RegionGeometry],
) -> Result<String> {
    let scale = binding
        .range
        .map(|range| ColorScale::new(range, style.palette, style.bins));

    let collection = region_features(binding, scale.as_ref(), regions);
    let payload = json!({
        "center": style.center,
        "zoom": style.zoom_start,
        "bounds": region_bounds(regions),
        "tiles": tiles_json(&style.tiles),
        "fillOpacity": style.fill_opacity,
        "lineOpacity": style.line_opacity,
        "regions": collection,
    });

    let mut context = TeraContext::new();
    context.insert("title", &style.title);
    context.insert("legend_name", &style.legend_name);
    context.insert(
        "legend",
        &scale.map(|s| s.legend()).unwrap_or_default(),
    );
    context.insert("payload", &script_json(&payload)?);

    templates()?
        .render("choropleth_map.html", &context)
        .context("Failed to render choropleth map")
}

/// Writes the document, creating parent directories as needed.
pub fn save_document(path: &Path, html: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| MapError::io(parent, e))?;
    }
    let file = File::create(path).map_err(|e| MapError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(html.as_bytes())
        .and_then(|_| writer.flush())
        .map_err(|e| MapError::io(path, e))?;
    info!("Saved map to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PointSchema;
    use crate::processing::{bind_regions, build_cluster_group, MissingRegionPolicy, Reducer};
    use crate::types::{RawPoint, RegionValue};
    use geo::{polygon, MultiPolygon};

    fn region(key: &str, x: f64) -> RegionGeometry {
        RegionGeometry {
            region_key: key.to_string(),
            name: Some(format!("{} land", key)),
            boundary: MultiPolygon::new(vec![polygon![
                (x: x, y: 0.0),
                (x: x + 1.0, y: 0.0),
                (x: x + 1.0, y: 1.0),
            ]]),
        }
    }

    fn scale() -> ColorScale {
        ColorScale::new(ValueRange { min: 0.0, max: 150.0 }, Palette::YlOrRd, 6)
    }

    #[test]
    fn test_color_scale_edges() {
        let scale = scale();
        assert_eq!(scale.color_for(0.0), "#ffffcc");
        assert_eq!(scale.color_for(150.0), "#800026");
        assert_eq!(scale.color_for(-5.0), "#ffffcc");
        assert_eq!(scale.legend().len(), 6);
        assert_eq!(scale.legend()[0].label, "0 – 25");
        assert_eq!(scale.legend()[5].label, "125 – 150");
    }

    #[test]
    fn test_full_f64_range_stays_finite() {
        let scale = ColorScale::new(
            ValueRange { min: -f64::MAX, max: f64::MAX },
            Palette::YlOrRd,
            6,
        );
        assert_eq!(scale.color_for(-f64::MAX), "#ffffcc");
        assert_eq!(scale.color_for(0.0), "#fc4e2a");
        assert_eq!(scale.color_for(f64::MAX), "#800026");

        let legend = scale.legend();
        assert_eq!(legend.len(), 6);
        for entry in &legend {
            assert!(!entry.label.contains("inf"), "{}", entry.label);
            assert!(!entry.label.contains("NaN"), "{}", entry.label);
        }
    }

    #[test]
    fn test_flat_range_uses_first_color() {
        let scale = ColorScale::new(ValueRange { min: 3.0, max: 3.0 }, Palette::Blues, 4);
        assert_eq!(scale.color_for(3.0), "#f7fbff");
    }

    #[test]
    fn test_cluster_map_embeds_markers() {
        let rows = vec![
            RawPoint::new(37.77, -122.41, "Larceny</script><b>"),
            RawPoint::new(91.0, 0.0, "Assault"),
        ];
        let style = ClusterStyle::default();
        let layer = build_cluster_group(&PointSchema::default(), &style, rows);

        let html = render_cluster_map(&style, &layer).unwrap();
        assert!(html.contains("L.markerClusterGroup"));
        assert!(html.contains("\"disableClusteringAtZoom\":16"));
        assert!(html.contains("37.77"));
        assert!(!html.contains("Larceny</script>"));
        assert!(!html.contains("Assault"));
    }

    #[test]
    fn test_choropleth_map_colors_and_unshaded() {
        let regions = vec![region("CHN", 0.0), region("IND", 2.0), region("USA", 4.0)];
        let values = vec![RegionValue::new("CHN", 150.0), RegionValue::new("IND", 80.0)];
        let binding = bind_regions(&values, &regions, Reducer::Sum, MissingRegionPolicy::Unshaded);

        let collection = region_features(&binding, binding.range.map(|r| {
            ColorScale::new(r, Palette::YlOrRd, 6)
        }).as_ref(), &regions);
        let props = |i: usize| collection.features[i].properties.clone().unwrap();
        assert_eq!(props(0)["color"], json!("#800026"));
        assert_eq!(props(2)["value"], Value::Null);
        assert_eq!(props(2)["color"], Value::Null);

        let html = render_choropleth_map(&ChoroplethStyle::default(), &binding, &regions).unwrap();
        assert!(html.contains("Migration to Canada (sample period)"));
        assert!(html.contains("L.geoJSON"));
    }

    #[test]
    fn test_region_bounds() {
        let regions = vec![region("A", -10.0), region("B", 20.0)];
        assert_eq!(region_bounds(&regions), Some([[0.0, -10.0], [1.0, 21.0]]));
        assert_eq!(region_bounds(&[]), None);
    }

    #[test]
    fn test_empty_choropleth_still_renders() {
        let binding = ChoroplethBinding::default();
        let html = render_choropleth_map(&ChoroplethStyle::default(), &binding, &[]).unwrap();
        assert!(html.contains("\"features\":[]"));
    }

    #[test]
    fn test_save_document_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/map.html");
        save_document(&path, "<html></html>").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "<html></html>");
    }
}
