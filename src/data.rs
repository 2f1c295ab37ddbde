use crate::config::{GeometrySchema, PointSchema, RegionSchema};
use crate::error::MapError;
use crate::types::{RawPoint, RegionGeometry, RegionValue};
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord};
use geo::MultiPolygon;
use std::fs::File;
use std::path::Path;
use tracing::{debug, info, warn};

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

fn open_csv(path: &Path) -> Result<(csv::Reader<File>, StringRecord)> {
    let file = File::open(path).map_err(|e| MapError::io(path, e))?;
    let mut rdr = ReaderBuilder::new().flexible(true).trim(csv::Trim::All).from_reader(file);
    let headers = rdr.headers()
        .with_context(|| format!("Failed to read CSV header: {:?}", path))?
        .clone();
    Ok((rdr, headers))
}

fn column_index(headers: &StringRecord, column: &str, path: &Path) -> Result<usize, MapError> {
    headers.iter().position(|h| h == column).ok_or_else(|| MapError::MissingColumn {
        column: column.to_string(),
        path: path.to_path_buf(),
        available: headers.iter().collect::<Vec<_>>().join(", "),
    })
}

fn field<'a>(record: &'a StringRecord, idx: usize) -> Option<&'a str> {
    record.get(idx).filter(|s| !s.is_empty())
}

pub fn parse_coordinate(s: &str) -> Option<f64> {
    s.parse::<f64>().ok()
}

/// Unparseable or blank cells come back as NaN so the binder can count them.
pub fn parse_value(s: &str) -> f64 {
    let cleaned: String = s.chars().filter(|c| *c != ',' && *c != '_').collect();
    cleaned.trim().parse::<f64>().unwrap_or(f64::NAN)
}

pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    TIMESTAMP_FORMATS.iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            DATE_FORMATS.iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Reads every point row. Rows the parser rejects still count as input,
/// with no coordinates.
pub fn load_points(path: &Path, schema: &PointSchema) -> Result<Vec<RawPoint>> {
    info!("Loading point data from {:?}", path);
    let (mut rdr, headers) = open_csv(path)?;

    let lat_idx = column_index(&headers, &schema.latitude_column, path)?;
    let lon_idx = column_index(&headers, &schema.longitude_column, path)?;
    let cat_idx = schema.category_column.as_deref()
        .map(|c| column_index(&headers, c, path))
        .transpose()?;
    let ts_idx = schema.timestamp_column.as_deref()
        .map(|c| column_index(&headers, c, path))
        .transpose()?;

    let mut points = Vec::new();
    let mut bad_timestamps = 0usize;

    for (line, result) in rdr.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) if e.is_io_error() => {
                return Err(e).with_context(|| format!("Failed to read {:?}", path));
            }
            Err(e) => {
                debug!("Row {} in {:?} is malformed: {}", line + 2, path, e);
                points.push(RawPoint::default());
                continue;
            }
        };

        let timestamp = ts_idx.and_then(|i| field(&record, i)).and_then(|s| {
            let parsed = parse_timestamp(s);
            if parsed.is_none() {
                bad_timestamps += 1;
            }
            parsed
        });

        points.push(RawPoint {
            latitude: field(&record, lat_idx).and_then(parse_coordinate),
            longitude: field(&record, lon_idx).and_then(parse_coordinate),
            category: cat_idx.and_then(|i| field(&record, i)).map(str::to_string),
            timestamp,
        });
    }

    if bad_timestamps > 0 {
        warn!("{} timestamps in {:?} could not be parsed and were ignored", bad_timestamps, path);
    }
    info!("Loaded {} point rows", points.len());
    Ok(points)
}

/// Region values plus the rows that could not contribute any.
#[derive(Debug, Clone, Default)]
pub struct RegionRows {
    pub values: Vec<RegionValue>,
    /// Rows the CSV parser rejected.
    pub malformed: usize,
    /// Rows with a blank key.
    pub keyless: usize,
}

/// One `RegionValue` per (row, value column). Rows without a key are skipped.
pub fn load_region_values(path: &Path, schema: &RegionSchema) -> Result<RegionRows> {
    info!("Loading region values from {:?}", path);
    let (mut rdr, headers) = open_csv(path)?;

    let key_idx = column_index(&headers, &schema.key_column, path)?;
    let value_idx = schema.value_columns.iter()
        .map(|c| column_index(&headers, c, path))
        .collect::<Result<Vec<_>, _>>()?;

    let mut values = Vec::new();
    let mut keyless = 0usize;
    let mut malformed = 0usize;

    for (line, result) in rdr.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) if e.is_io_error() => {
                return Err(e).with_context(|| format!("Failed to read {:?}", path));
            }
            Err(e) => {
                debug!("Row {} in {:?} is malformed: {}", line + 2, path, e);
                malformed += 1;
                continue;
            }
        };

        let key = match field(&record, key_idx) {
            Some(k) => k,
            None => {
                keyless += 1;
                continue;
            }
        };

        for &idx in &value_idx {
            let value = record.get(idx).map(parse_value).unwrap_or(f64::NAN);
            values.push(RegionValue::new(key, value));
        }
    }

    if malformed > 0 {
        warn!("Skipped {} malformed rows in {:?}", malformed, path);
    }
    if keyless > 0 {
        warn!("Skipped {} rows without a '{}' value", keyless, schema.key_column);
    }
    info!("Loaded {} region values", values.len());
    Ok(RegionRows { values, malformed, keyless })
}

pub fn load_geometry(path: &Path, schema: &GeometrySchema) -> Result<Vec<RegionGeometry>> {
    let extension = path.extension()
        .and_then(|e| e.to_str())
        .map(|s: &str| s.to_lowercase())
        .ok_or_else(|| MapError::UnsupportedGeometry(format!("{:?} has no extension", path)))?;

    let regions = match extension.as_str() {
        "shp" => load_shapefile(path, schema)?,
        "json" | "geojson" => load_geojson(path, schema)?,
        _ => return Err(MapError::UnsupportedGeometry(extension).into()),
    };

    info!("Loaded geometry for {} regions", regions.len());
    Ok(regions)
}

fn load_shapefile(path: &Path, schema: &GeometrySchema) -> Result<Vec<RegionGeometry>> {
    use shapefile::dbase::FieldValue;
    use shapefile::{Reader, Shape};

    let mut reader = Reader::from_path(path)
        .with_context(|| format!("Failed to open Shapefile: {:?}", path))?;

    let mut regions = Vec::new();

    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result
            .with_context(|| format!("Failed to read Shapefile record: {:?}", path))?;

        let region_key = match record.get(&schema.key_property) {
            Some(FieldValue::Character(Some(s))) if !s.trim().is_empty() => s.trim().to_string(),
            Some(FieldValue::Numeric(Some(n))) => n.to_string(),
            Some(_) => continue,
            None => {
                return Err(MapError::MissingProperty {
                    property: schema.key_property.clone(),
                    path: path.to_path_buf(),
                }
                .into())
            }
        };

        let name = schema.name_property.as_deref()
            .and_then(|p| record.get(p))
            .and_then(|v| match v {
                FieldValue::Character(Some(s)) => Some(s.trim().to_string()),
                _ => None,
            });

        let invalid = |e: &dyn std::fmt::Debug| MapError::InvalidGeometry {
            path: path.to_path_buf(),
            reason: format!("{:?}", e),
        };

        let boundary: MultiPolygon<f64> = match shape {
            Shape::Polygon(polygon) => polygon.try_into().map_err(|e| invalid(&e))?,
            Shape::PolygonM(polygon) => polygon.try_into().map_err(|e| invalid(&e))?,
            Shape::PolygonZ(polygon) => polygon.try_into().map_err(|e| invalid(&e))?,
            _ => {
                debug!("Skipping non-polygon shape for region {}", region_key);
                continue;
            }
        };

        regions.push(RegionGeometry { region_key, name, boundary });
    }

    Ok(regions)
}

fn load_geojson(path: &Path, schema: &GeometrySchema) -> Result<Vec<RegionGeometry>> {
    use geojson::{feature::Id, GeoJson, Value};
    use std::io::BufReader;

    info!("Loading GeoJSON from {:?}", path);
    let file = File::open(path).map_err(|e| MapError::io(path, e))?;
    let geojson = GeoJson::from_reader(BufReader::new(file))
        .map_err(|e| MapError::InvalidGeometry {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => {
            return Err(MapError::InvalidGeometry {
                path: path.to_path_buf(),
                reason: "GeoJSON must be a FeatureCollection".to_string(),
            }
            .into())
        }
    };

    let total = collection.features.len();
    let mut keyed = 0usize;
    let mut regions = Vec::new();

    for feature in collection.features {
        let props = feature.properties.as_ref();

        let region_key = match props.and_then(|p| p.get(&schema.key_property)) {
            Some(serde_json::Value::String(s)) => Some(s.trim().to_string()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ if schema.key_property == "id" => match &feature.id {
                Some(Id::String(s)) => Some(s.trim().to_string()),
                Some(Id::Number(n)) => Some(n.to_string()),
                None => None,
            },
            _ => None,
        };
        let region_key = match region_key {
            Some(k) if !k.is_empty() => k,
            _ => continue,
        };
        keyed += 1;

        let name = schema.name_property.as_deref()
            .and_then(|p| props.and_then(|props| props.get(p)))
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let geometry = match feature.geometry {
            Some(g) => g,
            None => continue,
        };

        let boundary = match geometry.value {
            Value::Polygon(_) | Value::MultiPolygon(_) => {
                let geo_geom: geo::Geometry<f64> = geometry.value.try_into()
                    .map_err(|e: geojson::Error| MapError::InvalidGeometry {
                        path: path.to_path_buf(),
                        reason: format!("region {}: {}", region_key, e),
                    })?;
                match geo_geom {
                    geo::Geometry::MultiPolygon(mp) => mp,
                    geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
                    _ => continue,
                }
            }
            _ => {
                debug!("Skipping non-polygon geometry for region {}", region_key);
                continue;
            }
        };

        regions.push(RegionGeometry { region_key, name, boundary });
    }

    if total > 0 && keyed == 0 {
        return Err(MapError::MissingProperty {
            property: schema.key_property.clone(),
            path: path.to_path_buf(),
        }
        .into());
    }

    Ok(regions)
}
