//! Run state, partial updates and run-level errors.

use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;

use crate::functions::FunctionEntry;
use crate::geometry::GeometryError;
use crate::oracle::OracleError;
use crate::records::RecordSet;
use crate::spatial::SpatialSummary;
use crate::statistics::BuildingStatistics;
use crate::store::StoreError;

/// Classification of a question, selecting the query-building prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// Buildings in administrative districts.
    #[default]
    District,
    /// Buildings near a location.
    Nearby,
    /// Buildings inside a user-defined area.
    CustomArea,
    /// Aggregations: counts, averages, extremes.
    Statistics,
}

impl QueryType {
    /// Parse from string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "district" => Some(Self::District),
            "nearby" => Some(Self::Nearby),
            "custom_area" | "customarea" => Some(Self::CustomArea),
            "statistics" => Some(Self::Statistics),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::District => write!(f, "district"),
            Self::Nearby => write!(f, "nearby"),
            Self::CustomArea => write!(f, "custom_area"),
            Self::Statistics => write!(f, "statistics"),
        }
    }
}

/// Everything one run knows. Owned by the run; never shared between runs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunState {
    pub query: String,
    /// Filter geometry as WKT (or GeoJSON), in the store's CRS.
    pub spatial_filter: Option<String>,
    pub attributes: BTreeSet<String>,
    pub needs_function_lookup: bool,
    pub function_hint: Option<String>,
    /// Parallel to `function_names`.
    pub function_codes: Vec<i64>,
    pub function_names: Vec<String>,
    pub query_type: QueryType,
    pub structured_query: String,
    pub records: RecordSet,
    /// The records as fetched, before spatial filtering.
    pub pre_filter_records: Option<RecordSet>,
    pub spatial_summary: Option<SpatialSummary>,
    pub statistics: Option<BuildingStatistics>,
    pub final_answer: String,
    pub error: Option<String>,
    /// Progress log, appended by every node in execution order.
    pub messages: Vec<String>,
}

impl RunState {
    pub fn new(query: impl Into<String>, spatial_filter: Option<String>) -> Self {
        Self {
            query: query.into(),
            spatial_filter,
            ..Self::default()
        }
    }

    /// The filter geometry, if one was given and is not blank.
    pub fn spatial_filter(&self) -> Option<&str> {
        self.spatial_filter
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Merges a node's update: set fields replace, messages append.
    pub fn apply(&mut self, update: StateUpdate) {
        let StateUpdate {
            attributes,
            needs_function_lookup,
            function_hint,
            functions,
            query_type,
            structured_query,
            records,
            pre_filter_records,
            spatial_summary,
            statistics,
            final_answer,
            error,
            messages,
        } = update;

        if let Some(attributes) = attributes {
            self.attributes = attributes;
        }
        if let Some(needs) = needs_function_lookup {
            self.needs_function_lookup = needs;
        }
        if let Some(hint) = function_hint {
            self.function_hint = Some(hint);
        }
        if let Some(entries) = functions {
            (self.function_codes, self.function_names) =
                entries.into_iter().map(|e| (e.code, e.name)).unzip();
        }
        if let Some(query_type) = query_type {
            self.query_type = query_type;
        }
        if let Some(query) = structured_query {
            self.structured_query = query;
        }
        if let Some(records) = records {
            self.records = records;
        }
        if let Some(records) = pre_filter_records {
            self.pre_filter_records = Some(records);
        }
        if let Some(summary) = spatial_summary {
            self.spatial_summary = Some(summary);
        }
        if let Some(statistics) = statistics {
            self.statistics = Some(statistics);
        }
        if let Some(answer) = final_answer {
            self.final_answer = answer;
        }
        if let Some(error) = error {
            self.error = Some(error);
        }
        self.messages.extend(messages);
    }
}

/// The fields one node changed. `None` leaves the current value alone.
#[derive(Debug, Default)]
pub struct StateUpdate {
    pub attributes: Option<BTreeSet<String>>,
    pub needs_function_lookup: Option<bool>,
    pub function_hint: Option<String>,
    /// Replaces codes and names together.
    pub functions: Option<Vec<FunctionEntry>>,
    pub query_type: Option<QueryType>,
    pub structured_query: Option<String>,
    pub records: Option<RecordSet>,
    pub pre_filter_records: Option<RecordSet>,
    pub spatial_summary: Option<SpatialSummary>,
    pub statistics: Option<BuildingStatistics>,
    pub final_answer: Option<String>,
    pub error: Option<String>,
    pub messages: Vec<String>,
}

impl StateUpdate {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
            ..Self::default()
        }
    }

    /// An update carrying `error` both as the run error and as a message.
    pub fn failed(error: &WorkflowError) -> Self {
        let text = error.to_string();
        Self {
            error: Some(text.clone()),
            messages: vec![text],
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    /// Merges a later update into this one, the later one winning.
    pub fn then(self, later: StateUpdate) -> Self {
        let mut messages = self.messages;
        messages.extend(later.messages);
        Self {
            attributes: later.attributes.or(self.attributes),
            needs_function_lookup: later.needs_function_lookup.or(self.needs_function_lookup),
            function_hint: later.function_hint.or(self.function_hint),
            functions: later.functions.or(self.functions),
            query_type: later.query_type.or(self.query_type),
            structured_query: later.structured_query.or(self.structured_query),
            records: later.records.or(self.records),
            pre_filter_records: later.pre_filter_records.or(self.pre_filter_records),
            spatial_summary: later.spatial_summary.or(self.spatial_summary),
            statistics: later.statistics.or(self.statistics),
            final_answer: later.final_answer.or(self.final_answer),
            error: later.error.or(self.error),
            messages,
        }
    }
}

/// Run-level failures. The `Display` text is what lands in `RunState::error`.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Error in {stage}: {source}")]
    OracleFailure {
        stage: &'static str,
        #[source]
        source: OracleError,
    },

    #[error("{}", store_failure_text(.0))]
    StoreFailure(#[source] StoreError),

    #[error("Unresolvable geometry for record {0}")]
    UnresolvableGeometry(String),

    #[error("Unsupported filter geometry type: {0}")]
    UnsupportedGeometryType(String),

    #[error("Invalid filter geometry: {0}")]
    InvalidFilterGeometry(String),

    #[error("No query to execute")]
    NoQueryToExecute,
}

impl WorkflowError {
    pub fn oracle(stage: &'static str, source: OracleError) -> Self {
        Self::OracleFailure { stage, source }
    }
}

impl From<StoreError> for WorkflowError {
    fn from(error: StoreError) -> Self {
        Self::StoreFailure(error)
    }
}

impl From<GeometryError> for WorkflowError {
    fn from(error: GeometryError) -> Self {
        match error {
            GeometryError::Parse(msg) | GeometryError::InvalidFilterGeometry(msg) => {
                Self::InvalidFilterGeometry(msg)
            }
            GeometryError::UnsupportedGeometryType(kind) => Self::UnsupportedGeometryType(kind),
            GeometryError::UnresolvableGeometry { id } => Self::UnresolvableGeometry(id),
        }
    }
}

fn store_failure_text(error: &StoreError) -> String {
    if error.is_syntax_error() {
        format!("Query syntax error: {}", error)
    } else if error.is_unknown_label() {
        format!("Unknown label in query: {}", error)
    } else {
        format!("Query execution error: {}", error)
    }
}
