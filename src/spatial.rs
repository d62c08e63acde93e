//! Post-retrieval spatial reduction of a record collection.
//!
//! The filter geometry decides the mode: polygons and multi-polygons keep the
//! records inside them, a point keeps either the K nearest records or the
//! records within a radius. Records without a resolvable point are dropped,
//! never reported as errors.

use geo::Intersects;
use geo_types::{MultiPolygon, Point, Polygon};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::geometry::{GeometryError, Shape, resolve_point};
use crate::records::{Record, RecordSet};

/// Transient field holding the distance from the filter point.
pub const DISTANCE_FIELD: &str = "_distance";

/// How a point filter reduces the records.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointMode {
    Nearest { count: usize },
    Radius { radius: f64 },
}

/// A point mode plus the oracle's explanation for it, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct PointDecision {
    pub mode: PointMode,
    pub reasoning: Option<String>,
}

impl PointDecision {
    /// The decision used when the oracle gives no usable answer.
    pub fn fallback(nearest_default: usize) -> Self {
        Self {
            mode: PointMode::Nearest {
                count: nearest_default,
            },
            reasoning: None,
        }
    }

    /// Reads an oracle reply of the form `{"mode": ..., "value": ..., "reasoning": ...}`.
    ///
    /// Missing or unknown `mode` means nearest. A missing, non-numeric or
    /// non-positive `value` takes the matching default.
    pub fn from_reply(reply: &Map<String, Value>, nearest_default: usize, radius_default: f64) -> Self {
        let value = reply.get("value").and_then(number);
        let mode = match reply.get("mode").and_then(Value::as_str).map(str::to_lowercase) {
            Some(mode) if mode == "radius" => PointMode::Radius {
                radius: value.filter(|v| *v > 0.0).unwrap_or(radius_default),
            },
            _ => PointMode::Nearest {
                count: value
                    .filter(|v| *v >= 1.0)
                    .map(|v| v as usize)
                    .unwrap_or(nearest_default),
            },
        };
        let reasoning = reply
            .get("reasoning")
            .and_then(Value::as_str)
            .map(str::to_string)
            .filter(|s| !s.trim().is_empty());

        Self { mode, reasoning }
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Areal filter geometry.
#[derive(Debug, Clone, PartialEq)]
pub enum Area {
    Polygon(Polygon<f64>),
    MultiPolygon(MultiPolygon<f64>),
}

impl Area {
    /// Boundary-inclusive containment test.
    pub fn contains_point(&self, point: &Point<f64>) -> bool {
        match self {
            Self::Polygon(p) => p.intersects(point),
            Self::MultiPolygon(mp) => mp.intersects(point),
        }
    }
}

/// The reduction to perform, decided from the filter geometry.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterPlan {
    Containment(Area),
    Nearest { origin: Point<f64>, count: usize },
    Radius { origin: Point<f64>, radius: f64 },
}

impl FilterPlan {
    /// Builds the plan for `shape`.
    ///
    /// `decide` is only consulted for point geometries.
    ///
    /// # Errors
    ///
    /// Geometry collections are `UnsupportedGeometryType`.
    pub fn for_shape(shape: Shape, decide: impl FnOnce() -> PointMode) -> Result<Self, GeometryError> {
        match shape {
            Shape::Polygon(p) => Ok(Self::Containment(Area::Polygon(p))),
            Shape::MultiPolygon(mp) => Ok(Self::Containment(Area::MultiPolygon(mp))),
            Shape::Point(origin) => Ok(match decide() {
                PointMode::Nearest { count } => Self::Nearest { origin, count },
                PointMode::Radius { radius } => Self::Radius { origin, radius },
            }),
            other @ Shape::Collection(_) => Err(GeometryError::UnsupportedGeometryType(
                other.type_name().to_string(),
            )),
        }
    }

    /// Applies the plan, returning the reduced set in the input's shape.
    pub fn apply(&self, set: &RecordSet) -> RecordSet {
        let records = set.records();
        let kept = match self {
            Self::Containment(area) => contained(records, area),
            Self::Nearest { origin, count } => nearest(records, origin, *count),
            Self::Radius { origin, radius } => within_radius(records, origin, *radius),
        };
        set.with_records(kept)
    }

    fn mode_name(&self) -> &'static str {
        match self {
            Self::Containment(_) => "polygon_containment",
            Self::Nearest { .. } => "nearest",
            Self::Radius { .. } => "radius",
        }
    }
}

/// Metadata describing one filter invocation, used by answer rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpatialSummary {
    pub mode: String,
    pub geometry_type: String,
    pub original_count: usize,
    pub filtered_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl SpatialSummary {
    pub fn new(
        plan: &FilterPlan,
        geometry_type: &str,
        original_count: usize,
        filtered_count: usize,
        reasoning: Option<String>,
    ) -> Self {
        let (count, radius) = match plan {
            FilterPlan::Containment(_) => (None, None),
            FilterPlan::Nearest { count, .. } => (Some(*count), None),
            FilterPlan::Radius { radius, .. } => (None, Some(*radius)),
        };
        Self {
            mode: plan.mode_name().to_string(),
            geometry_type: geometry_type.to_string(),
            original_count,
            filtered_count,
            count,
            radius,
            reasoning,
        }
    }
}

/// Records whose resolved point lies inside `area`, in input order.
pub fn contained(records: &[Record], area: &Area) -> Vec<Record> {
    records
        .iter()
        .filter(|record| {
            resolve_point(record)
                .map(|point| area.contains_point(&point))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

/// The `count` records closest to `origin`, nearest first.
///
/// Ties keep input order.
pub fn nearest(records: &[Record], origin: &Point<f64>, count: usize) -> Vec<Record> {
    let mut ranked = with_distances(records, origin);
    ranked.truncate(count);
    ranked.into_iter().map(|(record, _)| record).collect()
}

/// Records at most `radius` from `origin`, nearest first.
pub fn within_radius(records: &[Record], origin: &Point<f64>, radius: f64) -> Vec<Record> {
    with_distances(records, origin)
        .into_iter()
        .take_while(|(_, distance)| *distance <= radius)
        .map(|(record, _)| record)
        .collect()
}

/// Planar Euclidean distance.
pub fn distance(a: &Point<f64>, b: &Point<f64>) -> f64 {
    (a.x() - b.x()).hypot(a.y() - b.y())
}

/// Resolvable records with [`DISTANCE_FIELD`] attached, sorted ascending and stable.
fn with_distances(records: &[Record], origin: &Point<f64>) -> Vec<(Record, f64)> {
    let mut ranked: Vec<(Record, f64)> = records
        .iter()
        .filter_map(|record| {
            let point = resolve_point(record).ok()?;
            let d = distance(origin, &point);
            let mut record = record.clone();
            record.insert(DISTANCE_FIELD.to_string(), Value::from(d));
            Some((record, d))
        })
        .collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
    ranked
}
