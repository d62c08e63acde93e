//! axploration - natural-language questions over a building dataset.
//!
//! A run interprets the question with a decision oracle, resolves it to a
//! store query, fetches records, then filters them spatially and aggregates
//! statistics before rendering the answer. See [`workflow::Workflow`].

pub mod config;
pub mod doctor;
pub mod functions;
pub mod geometry;
pub mod oracle;
pub mod records;
pub mod spatial;
pub mod statistics;
pub mod store;
pub mod telemetry;
pub mod workflow;

pub use config::Settings;
pub use functions::{FunctionEntry, FunctionResolution, FunctionResolver, SelectionPolicy};
pub use oracle::{ChatMessage, OllamaClient, OllamaClientBuilder, OracleClientTrait, OracleError};
pub use records::{Record, RecordSet};
pub use store::{Neo4jHttpStore, RecordStore, SqliteRecordStore, StoreError};
pub use workflow::{NodeId, RunState, StepUpdate, Workflow, WorkflowError};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn types_accessible_from_crate_root() {
        let state = RunState::new("Wohngebäude in Pankow", None);
        assert_eq!(state.query, "Wohngebäude in Pankow");
        assert!(state.messages.is_empty());

        let records = RecordSet::default();
        assert!(records.is_empty());

        let settings = Settings::default();
        assert_eq!(settings.nearest_default, 10);
        assert_eq!(NodeId::ResolveAttributes.to_string(), "resolve_attributes");
    }
}
