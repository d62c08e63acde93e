//! Geometry parsing and per-record point resolution.
//!
//! Geometry text arrives as WKT (sometimes in the `Point (x y)` spelling some
//! exporters produce) or as GeoJSON, either as a string or as an embedded
//! JSON object. Everything is reduced to a closed [`Shape`] so callers can
//! match exhaustively.

use std::str::FromStr;

use geo::Centroid;
use geo_types::{Coord, Geometry, GeometryCollection, LineString, MultiPolygon, Point, Polygon};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::records::Record;

/// Record field holding a precomputed representative point.
pub const CENTROID_FIELD: &str = "centroid";

/// Record fields holding the full geometry, tried in order.
pub const GEOMETRY_FIELDS: [&str; 2] = ["geometry_geojson", "geometry"];

/// Errors from geometry parsing and resolution.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    /// Text is neither valid WKT nor valid GeoJSON.
    #[error("Geometry parse error: {0}")]
    Parse(String),

    /// Parsed fine, but the type has no meaning here (e.g. a line string).
    #[error("Unsupported geometry type: {0}")]
    UnsupportedGeometryType(String),

    /// Neither the centroid nor the geometry field yields a point.
    #[error("Record {id} has no resolvable geometry")]
    UnresolvableGeometry { id: String },

    /// The user-supplied filter geometry could not be parsed.
    #[error("Invalid filter geometry: {0}")]
    InvalidFilterGeometry(String),
}

/// The geometry kinds the engine understands.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Point(Point<f64>),
    Polygon(Polygon<f64>),
    MultiPolygon(MultiPolygon<f64>),
    Collection(GeometryCollection<f64>),
}

impl Shape {
    /// Narrows a `geo_types` geometry to a [`Shape`].
    pub fn from_geometry(geometry: Geometry<f64>) -> Result<Self, GeometryError> {
        match geometry {
            Geometry::Point(p) => Ok(Self::Point(p)),
            Geometry::Polygon(p) => Ok(Self::Polygon(p)),
            Geometry::MultiPolygon(mp) => Ok(Self::MultiPolygon(mp)),
            Geometry::GeometryCollection(gc) => Ok(Self::Collection(gc)),
            Geometry::Rect(r) => Ok(Self::Polygon(r.to_polygon())),
            Geometry::Triangle(t) => Ok(Self::Polygon(t.to_polygon())),
            other => Err(GeometryError::UnsupportedGeometryType(
                geometry_type_name(&other).to_string(),
            )),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Point(_) => "Point",
            Self::Polygon(_) => "Polygon",
            Self::MultiPolygon(_) => "MultiPolygon",
            Self::Collection(_) => "GeometryCollection",
        }
    }

    /// Representative point: the point itself, or the centroid of an areal shape.
    pub fn representative_point(&self) -> Option<Point<f64>> {
        match self {
            Self::Point(p) => Some(*p),
            Self::Polygon(p) => p.centroid(),
            Self::MultiPolygon(mp) => mp.centroid(),
            Self::Collection(gc) => gc.centroid(),
        }
    }
}

fn geometry_type_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

/// Rewrites the geometry tag so the WKT parser accepts it.
///
/// `Point (388000 5819000)` becomes `POINT(388000 5819000)`. Text without a
/// parenthesis is returned trimmed.
pub fn normalize_wkt(text: &str) -> String {
    let trimmed = text.trim();
    let Some(open) = trimmed.find('(') else {
        return trimmed.to_string();
    };

    let tag = trimmed[..open].split_whitespace().collect::<Vec<_>>().join(" ");
    format!("{}{}", tag.to_uppercase(), &trimmed[open..])
}

/// Parses WKT into a `geo_types` geometry.
pub fn parse_wkt(text: &str) -> Result<Geometry<f64>, GeometryError> {
    wkt::Wkt::<f64>::from_str(&normalize_wkt(text))
        .map_err(|e| GeometryError::Parse(format!("{:?}", e)))
        .and_then(|w| {
            w.try_into()
                .map_err(|e: wkt::conversion::Error| GeometryError::Parse(format!("{:?}", e)))
        })
}

/// Parses geometry text, GeoJSON if it looks like an object and WKT otherwise.
pub fn parse_shape(text: &str) -> Result<Shape, GeometryError> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        let value: Value =
            serde_json::from_str(trimmed).map_err(|e| GeometryError::Parse(e.to_string()))?;
        return shape_from_geojson(&value);
    }
    Shape::from_geometry(parse_wkt(trimmed)?)
}

/// Parses a filter geometry supplied by the caller.
///
/// # Errors
///
/// Unparsable text is `InvalidFilterGeometry`; a parsable but unknown type is
/// `UnsupportedGeometryType`.
pub fn parse_filter_geometry(text: &str) -> Result<Shape, GeometryError> {
    parse_shape(text).map_err(|e| match e {
        GeometryError::Parse(msg) => GeometryError::InvalidFilterGeometry(msg),
        other => other,
    })
}

/// Resolves the single point that stands for `record`.
///
/// Tries the `centroid` field first and falls through to the full geometry
/// when it is missing, unparsable or not a point. Areal geometries are reduced
/// to their centroid.
pub fn resolve_point(record: &Record) -> Result<Point<f64>, GeometryError> {
    let centroid = match record.get(CENTROID_FIELD) {
        Some(Value::String(text)) => parse_shape(text).ok(),
        Some(value @ Value::Object(_)) => shape_from_geojson(value).ok(),
        _ => None,
    };
    if let Some(Shape::Point(p)) = centroid {
        return Ok(p);
    }

    for field in GEOMETRY_FIELDS {
        let shape = match record.get(field) {
            Some(Value::String(text)) if !text.trim().is_empty() => parse_shape(text),
            Some(value @ Value::Object(_)) => shape_from_geojson(value),
            _ => continue,
        };
        if let Some(point) = shape.ok().and_then(|s| s.representative_point()) {
            return Ok(point);
        }
    }

    Err(GeometryError::UnresolvableGeometry {
        id: record_id(record),
    })
}

fn record_id(record: &Record) -> String {
    match record.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "unknown".to_string(),
        Some(other) => other.to_string(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum GeoJson {
    Point {
        coordinates: Vec<f64>,
    },
    Polygon {
        coordinates: Vec<Vec<Vec<f64>>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<Vec<f64>>>>,
    },
    GeometryCollection {
        geometries: Vec<GeoJson>,
    },
    Feature {
        geometry: Box<GeoJson>,
    },
    #[serde(other)]
    Unsupported,
}

/// Converts a GeoJSON value into a [`Shape`].
pub fn shape_from_geojson(value: &Value) -> Result<Shape, GeometryError> {
    let parsed = GeoJson::deserialize(value).map_err(|e| GeometryError::Parse(e.to_string()))?;
    let type_name = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    Shape::from_geometry(geojson_to_geometry(parsed, &type_name)?)
}

fn geojson_to_geometry(geojson: GeoJson, type_name: &str) -> Result<Geometry<f64>, GeometryError> {
    match geojson {
        GeoJson::Point { coordinates } => Ok(Geometry::Point(Point::from(coord(&coordinates)?))),
        GeoJson::Polygon { coordinates } => Ok(Geometry::Polygon(polygon(&coordinates)?)),
        GeoJson::MultiPolygon { coordinates } => {
            let polygons = coordinates
                .iter()
                .map(|rings| polygon(rings))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Geometry::MultiPolygon(MultiPolygon::new(polygons)))
        }
        GeoJson::GeometryCollection { geometries } => {
            let members = geometries
                .into_iter()
                .map(|g| geojson_to_geometry(g, type_name))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Geometry::GeometryCollection(GeometryCollection::new_from(members)))
        }
        GeoJson::Feature { geometry } => geojson_to_geometry(*geometry, type_name),
        GeoJson::Unsupported => Err(GeometryError::UnsupportedGeometryType(type_name.to_string())),
    }
}

fn coord(position: &[f64]) -> Result<Coord<f64>, GeometryError> {
    match position {
        [x, y, ..] => Ok(Coord { x: *x, y: *y }),
        _ => Err(GeometryError::Parse(format!(
            "position needs two coordinates, got {}",
            position.len()
        ))),
    }
}

fn polygon(rings: &[Vec<Vec<f64>>]) -> Result<Polygon<f64>, GeometryError> {
    let mut rings = rings.iter().map(|ring| {
        ring.iter()
            .map(|p| coord(p))
            .collect::<Result<Vec<_>, _>>()
            .map(LineString::new)
    });
    let exterior = rings
        .next()
        .ok_or_else(|| GeometryError::Parse("polygon without rings".to_string()))??;
    let interiors = rings.collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon::new(exterior, interiors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn normalize_wkt_fixes_mixed_case_tag_with_space() {
        assert_eq!(normalize_wkt("Point (388000 5819000)"), "POINT(388000 5819000)");
        assert_eq!(normalize_wkt("  POINT(1 2) "), "POINT(1 2)");
        assert_eq!(normalize_wkt("POINT EMPTY"), "POINT EMPTY");
    }

    #[test]
    fn parse_shape_reads_wkt_polygon() {
        let shape = parse_shape("POLYGON((0 0, 10 0, 10 10, 0 10, 0 0))").unwrap();
        assert_eq!(shape.type_name(), "Polygon");
    }

    #[test]
    fn parse_shape_reads_geojson_text() {
        let shape = parse_shape(r#"{"type": "Point", "coordinates": [13.4, 52.5]}"#).unwrap();
        assert_eq!(shape, Shape::Point(Point::new(13.4, 52.5)));
    }

    #[test]
    fn parse_shape_rejects_line_strings() {
        let result = parse_shape("LINESTRING(0 0, 1 1)");
        assert_eq!(
            result,
            Err(GeometryError::UnsupportedGeometryType("LineString".to_string()))
        );
    }

    #[test]
    fn parse_filter_geometry_maps_parse_errors() {
        let result = parse_filter_geometry("POLYGON((0 0, 1 0");
        assert!(matches!(result, Err(GeometryError::InvalidFilterGeometry(_))));
    }

    #[test]
    fn resolve_point_prefers_centroid() {
        let rec = record(json!({
            "centroid": "Point (388000 5819000)",
            "geometry_geojson": "POINT(0 0)"
        }));
        assert_eq!(resolve_point(&rec).unwrap(), Point::new(388000.0, 5819000.0));
    }

    #[test]
    fn resolve_point_falls_through_bad_centroid() {
        let rec = record(json!({
            "centroid": "not a point",
            "geometry_geojson": "POINT(5 6)"
        }));
        assert_eq!(resolve_point(&rec).unwrap(), Point::new(5.0, 6.0));
    }

    #[test]
    fn resolve_point_reads_decoded_geojson_centroid() {
        let rec = record(json!({
            "id": "b1",
            "centroid": {"type": "Point", "coordinates": [1.0, 2.0]}
        }));
        assert_eq!(resolve_point(&rec).unwrap(), Point::new(1.0, 2.0));
    }

    #[test]
    fn resolve_point_skips_areal_geojson_centroid() {
        let rec = record(json!({
            "centroid": {
                "type": "Polygon",
                "coordinates": [[[0.0, 0.0], [4.0, 0.0], [4.0, 4.0], [0.0, 4.0], [0.0, 0.0]]]
            },
            "geometry": "POINT(7 8)"
        }));
        assert_eq!(resolve_point(&rec).unwrap(), Point::new(7.0, 8.0));
    }

    #[test]
    fn resolve_point_uses_polygon_centroid() {
        let rec = record(json!({
            "geometry_geojson": "MULTIPOLYGON(((0 0, 10 0, 10 10, 0 10, 0 0)))"
        }));
        assert_eq!(resolve_point(&rec).unwrap(), Point::new(5.0, 5.0));
    }

    #[test]
    fn resolve_point_reads_embedded_geojson_object() {
        let rec = record(json!({
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[0.0, 0.0], [4.0, 0.0], [4.0, 4.0], [0.0, 4.0], [0.0, 0.0]]]
            }
        }));
        assert_eq!(resolve_point(&rec).unwrap(), Point::new(2.0, 2.0));
    }

    #[test]
    fn resolve_point_reads_geometry_collection() {
        let rec = record(json!({
            "geometry_geojson": "GEOMETRYCOLLECTION(POINT(2 2))"
        }));
        assert_eq!(resolve_point(&rec).unwrap(), Point::new(2.0, 2.0));
    }

    #[test]
    fn resolve_point_fails_without_geometry() {
        let rec = record(json!({"id": "BUILDING_404", "centroid": null}));
        assert_eq!(
            resolve_point(&rec),
            Err(GeometryError::UnresolvableGeometry {
                id: "BUILDING_404".to_string()
            })
        );
    }

    #[test]
    fn resolve_point_fails_when_both_fields_are_garbage() {
        let rec = record(json!({"centroid": "Point (x y)", "geometry_geojson": "{broken"}));
        assert!(matches!(
            resolve_point(&rec),
            Err(GeometryError::UnresolvableGeometry { .. })
        ));
    }

    #[test]
    fn geojson_feature_unwraps_geometry() {
        let value = json!({
            "type": "Feature",
            "geometry": {"type": "Point", "coordinates": [1.0, 2.0, 30.0]}
        });
        assert_eq!(shape_from_geojson(&value).unwrap(), Shape::Point(Point::new(1.0, 2.0)));
    }

    #[test]
    fn geojson_unknown_type_is_unsupported() {
        let value = json!({"type": "LineString", "coordinates": [[0.0, 0.0], [1.0, 1.0]]});
        assert_eq!(
            shape_from_geojson(&value),
            Err(GeometryError::UnsupportedGeometryType("LineString".to_string()))
        );
    }
}
