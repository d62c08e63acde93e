//! Record collections as returned by the store.
//!
//! Stores answer either with a flat list of row objects or with a single row
//! wrapping a named list of them (`[{"buildings": [...]}]`). [`RecordSet`]
//! captures both so every consumer handles them the same way and writes back
//! the shape it was given.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::geometry::{CENTROID_FIELD, GEOMETRY_FIELDS};

/// One row from the store. The schema is not known statically.
pub type Record = Map<String, Value>;

/// Key used when a flat collection has to be wrapped.
pub const DEFAULT_WRAP_KEY: &str = "buildings";

/// Records plus the shape they arrived in.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordSet {
    /// `[record, record, ...]`
    Flat(Vec<Record>),
    /// `[{key: [record, ...], ..attachments}]`
    Wrapped {
        key: String,
        records: Vec<Record>,
        /// Sibling fields of the wrapped list, e.g. `statistics`.
        attachments: Record,
    },
}

impl Default for RecordSet {
    fn default() -> Self {
        Self::Flat(Vec::new())
    }
}

impl RecordSet {
    /// Normalizes raw store rows.
    ///
    /// A single object row holding a `buildings` list, or exactly one
    /// array-of-objects field and no geometry of its own, is the wrapped
    /// form; everything else is flat. Non-object rows are kept under
    /// a `value` field so nothing silently disappears.
    pub fn from_rows(rows: Vec<Value>) -> Self {
        if let [Value::Object(row)] = rows.as_slice()
            && let Some(key) = wrapped_key(row)
        {
            let mut attachments = row.clone();
            let records = match attachments.remove(&key) {
                Some(Value::Array(items)) => items.into_iter().filter_map(into_record).collect(),
                _ => Vec::new(),
            };
            return Self::Wrapped {
                key,
                records,
                attachments,
            };
        }

        Self::Flat(
            rows.into_iter()
                .map(|row| match row {
                    Value::Object(map) => map,
                    other => {
                        let mut map = Map::new();
                        map.insert("value".to_string(), other);
                        map
                    }
                })
                .collect(),
        )
    }

    pub fn records(&self) -> &[Record] {
        match self {
            Self::Flat(records) => records,
            Self::Wrapped { records, .. } => records,
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    pub fn is_wrapped(&self) -> bool {
        matches!(self, Self::Wrapped { .. })
    }

    /// Replaces the records, keeping the shape (and attachments) of `self`.
    pub fn with_records(&self, records: Vec<Record>) -> Self {
        match self {
            Self::Flat(_) => Self::Flat(records),
            Self::Wrapped {
                key, attachments, ..
            } => Self::Wrapped {
                key: key.clone(),
                records,
                attachments: attachments.clone(),
            },
        }
    }

    /// Returns the wrapped form with `name` attached next to the records.
    ///
    /// Flat sets are wrapped under [`DEFAULT_WRAP_KEY`].
    pub fn wrap_with(self, name: &str, value: Value) -> Self {
        let (key, records, mut attachments) = match self {
            Self::Flat(records) => (DEFAULT_WRAP_KEY.to_string(), records, Map::new()),
            Self::Wrapped {
                key,
                records,
                attachments,
            } => (key, records, attachments),
        };
        attachments.insert(name.to_string(), value);
        Self::Wrapped {
            key,
            records,
            attachments,
        }
    }

    /// Looks up an attachment of a wrapped set.
    pub fn attachment(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Flat(_) => None,
            Self::Wrapped { attachments, .. } => attachments.get(name),
        }
    }

    /// The store-shaped JSON value: a list of rows, or a one-element list
    /// holding the wrapper object.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Flat(records) => {
                Value::Array(records.iter().cloned().map(Value::Object).collect())
            }
            Self::Wrapped {
                key,
                records,
                attachments,
            } => {
                let mut wrapper = attachments.clone();
                wrapper.insert(
                    key.clone(),
                    Value::Array(records.iter().cloned().map(Value::Object).collect()),
                );
                Value::Array(vec![Value::Object(wrapper)])
            }
        }
    }
}

impl Serialize for RecordSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

/// Finds the field of `row` that wraps the records.
///
/// A `buildings` list always wraps, even when empty. Otherwise the row must
/// not look like a record itself and must have exactly one non-empty list
/// made only of objects.
fn wrapped_key(row: &Record) -> Option<String> {
    if matches!(row.get(DEFAULT_WRAP_KEY), Some(Value::Array(_))) {
        return Some(DEFAULT_WRAP_KEY.to_string());
    }
    if looks_like_record(row) {
        return None;
    }

    let mut candidates = row.iter().filter(|(_, value)| match value {
        Value::Array(items) => !items.is_empty() && items.iter().all(Value::is_object),
        _ => false,
    });
    let (key, _) = candidates.next()?;
    if candidates.next().is_some() {
        return None;
    }
    Some(key.clone())
}

/// A row with an id or any geometry is a building, whatever lists it carries.
fn looks_like_record(row: &Record) -> bool {
    row.contains_key("id")
        || row.contains_key(CENTROID_FIELD)
        || GEOMETRY_FIELDS.iter().any(|field| row.contains_key(*field))
}

fn into_record(value: Value) -> Option<Record> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(value: Value) -> Vec<Value> {
        match value {
            Value::Array(items) => items,
            _ => panic!("expected array"),
        }
    }

    #[test]
    fn flat_rows_stay_flat() {
        let set = RecordSet::from_rows(rows(json!([{"id": "a"}, {"id": "b"}])));
        assert!(!set.is_wrapped());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn single_wrapper_row_is_detected() {
        let set = RecordSet::from_rows(rows(json!([
            {"buildings": [{"id": "a"}, {"id": "b"}], "district": "Pankow"}
        ])));

        assert!(set.is_wrapped());
        assert_eq!(set.len(), 2);
        assert_eq!(set.attachment("district"), Some(&json!("Pankow")));
    }

    #[test]
    fn single_flat_row_with_scalar_fields_is_flat() {
        let set = RecordSet::from_rows(rows(json!([{"id": "a", "floors_above": 3}])));
        assert!(!set.is_wrapped());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn empty_wrapped_list_is_still_wrapped() {
        let set = RecordSet::from_rows(rows(json!([{"buildings": []}])));
        assert!(set.is_wrapped());
        assert!(set.is_empty());
    }

    #[test]
    fn empty_list_field_on_a_plain_row_is_not_a_wrapper() {
        let set = RecordSet::from_rows(rows(json!([{"id": "a", "tags": []}])));
        assert!(!set.is_wrapped());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn two_list_fields_are_not_a_wrapper() {
        let set = RecordSet::from_rows(rows(json!([{"a": [{"x": 1}], "b": [{"y": 2}]}])));
        assert!(!set.is_wrapped());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn single_building_with_nested_list_stays_flat() {
        let set = RecordSet::from_rows(rows(json!([{
            "id": "b1",
            "centroid": "POINT(0 0)",
            "floors_above": 3,
            "functions": [{"code": 1000, "name": "Wohngebäude"}]
        }])));

        assert!(!set.is_wrapped());
        assert_eq!(set.len(), 1);
        assert_eq!(set.records()[0]["floors_above"], json!(3));

        let geometry_only = RecordSet::from_rows(rows(json!([{
            "geometry": "POLYGON((0 0, 1 0, 1 1, 0 0))",
            "functions": [{"code": 1000}]
        }])));
        assert!(!geometry_only.is_wrapped());
    }

    #[test]
    fn scalar_rows_are_kept_under_value() {
        let set = RecordSet::from_rows(rows(json!([42])));
        assert_eq!(set.records()[0]["value"], json!(42));
    }

    #[test]
    fn with_records_preserves_shape() {
        let wrapped = RecordSet::from_rows(rows(json!([{"items": [{"id": 1}, {"id": 2}], "note": "x"}])));
        let kept = wrapped.with_records(vec![wrapped.records()[1].clone()]);

        assert_eq!(kept.to_value(), json!([{"items": [{"id": 2}], "note": "x"}]));

        let flat = RecordSet::Flat(vec![]);
        assert!(!flat.with_records(vec![Map::new()]).is_wrapped());
    }

    #[test]
    fn wrap_with_uses_default_key_for_flat_sets() {
        let set = RecordSet::from_rows(rows(json!([{"id": 1}])));
        let wrapped = set.wrap_with("statistics", json!({"building_count": 1}));

        assert_eq!(
            wrapped.to_value(),
            json!([{"buildings": [{"id": 1}], "statistics": {"building_count": 1}}])
        );
    }

    #[test]
    fn serializes_in_store_shape() {
        let set = RecordSet::Flat(vec![]);
        assert_eq!(serde_json::to_value(&set).unwrap(), json!([]));
    }
}
