//! Descriptive statistics over building records.
//!
//! Every field is optional on every record. Values that are missing, null or
//! not numeric are skipped one by one; a bad record never spoils the batch.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::records::{Record, RecordSet};

pub const AREA_FIELD: &str = "area";
pub const FLOORS_FIELD: &str = "floors_above";
pub const HOUSE_NUMBER_FIELD: &str = "house_number";

/// Attachment name of the statistics map in the wrapped output.
pub const STATISTICS_KEY: &str = "statistics";

static LEADING_DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("valid digit pattern"));

/// Aggregates over one record collection. Absent fields had no valid value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildingStatistics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub floors_above_min: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub floors_above_max: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub floors_above_mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub house_number_min: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub house_number_max: Option<i64>,
    /// Number of records considered, valid values or not.
    pub building_count: usize,
}

impl BuildingStatistics {
    /// Computes statistics over `records`.
    pub fn compute(records: &[Record]) -> Self {
        let areas: Vec<f64> = records
            .iter()
            .filter_map(|r| r.get(AREA_FIELD).and_then(as_area))
            .collect();
        let floors: Vec<i64> = records
            .iter()
            .filter_map(|r| r.get(FLOORS_FIELD).and_then(as_floor_count))
            .collect();
        let house_numbers: Vec<i64> = records
            .iter()
            .filter_map(|r| r.get(HOUSE_NUMBER_FIELD).and_then(as_house_number))
            .collect();

        Self {
            area_min: fold_min(&areas).map(round2),
            area_max: fold_max(&areas).map(round2),
            area_mean: mean(areas.iter().copied()).map(round2),
            floors_above_min: floors.iter().copied().min(),
            floors_above_max: floors.iter().copied().max(),
            floors_above_mean: mean(floors.iter().map(|f| *f as f64)).map(round2),
            house_number_min: house_numbers.iter().copied().min(),
            house_number_max: house_numbers.iter().copied().max(),
            building_count: records.len(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Computes statistics and wraps them next to the records.
///
/// The output is always the wrapped shape: flat input is wrapped under
/// `buildings`, wrapped input keeps its key and attachments.
pub fn aggregate(set: RecordSet) -> (RecordSet, BuildingStatistics) {
    let statistics = BuildingStatistics::compute(set.records());
    let wrapped = set.wrap_with(STATISTICS_KEY, statistics.to_value());
    (wrapped, statistics)
}

fn as_area(value: &Value) -> Option<f64> {
    let area = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    area.is_finite().then_some(area)
}

fn as_floor_count(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Leading numeric run of a house number: `"12a"` is 12, `"a"` is nothing.
///
/// Numbers go through their text form, so a REAL `12.0` is 12.
fn as_house_number(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => leading_digits(&n.to_string()),
        Value::String(s) => leading_digits(s),
        _ => None,
    }
}

fn leading_digits(text: &str) -> Option<i64> {
    LEADING_DIGITS
        .find(text)
        .and_then(|m| m.as_str().parse::<i64>().ok())
}

fn fold_min(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

fn fold_max(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
