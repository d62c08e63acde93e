//! Query orchestration.
//!
//! A run walks a fixed state machine:
//!
//! ```text
//! resolve_attributes ─┬─> resolve_function ─┐
//!                     └─────────────────────┴─> build_query -> fetch_records ─┬─> spatial_filter ─┐
//!                                                                             └───────────────────┴─> aggregate_statistics -> render_answer
//! ```
//!
//! Nodes never abort the run. A failing node records `error`, leaves a safe
//! fallback in the fields it owns and the run continues; `render_answer`
//! always runs and turns the error into the final answer.
mod answer;
mod nodes;
mod prompts;
mod routing;
mod state;

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::info;

use crate::config::Settings;
use crate::functions::FunctionResolver;
use crate::oracle::OracleClientTrait;
use crate::store::RecordStore;

pub use answer::{NO_RESULTS_ANSWER, error_answer, fallback_answer};
pub use routing::{FunctionRoute, NodeId, SpatialRoute, successor};
pub use state::{QueryType, RunState, StateUpdate, WorkflowError};

/// The state after one node completed.
#[derive(Debug, Clone, Serialize)]
pub struct StepUpdate {
    pub node: NodeId,
    pub state: RunState,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
}

/// Runs questions against an oracle and a record store.
///
/// One `Workflow` is built at startup and shared; every run owns its own
/// [`RunState`].
pub struct Workflow {
    oracle: Arc<dyn OracleClientTrait>,
    store: Arc<dyn RecordStore>,
    settings: Settings,
    resolver: FunctionResolver,
}

impl Workflow {
    pub fn new(oracle: Arc<dyn OracleClientTrait>, store: Arc<dyn RecordStore>, settings: Settings) -> Self {
        let resolver = FunctionResolver::new(Arc::clone(&oracle), Arc::clone(&store), &settings);
        Self {
            oracle,
            store,
            settings,
            resolver,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Runs to completion and returns the terminal state.
    pub fn run(&self, query: &str, spatial_filter: Option<&str>) -> RunState {
        self.steps(query, spatial_filter).finish()
    }

    /// Incremental mode: yields the full state after every node.
    pub fn steps(&self, query: &str, spatial_filter: Option<&str>) -> RunSteps<'_> {
        RunSteps {
            workflow: self,
            state: RunState::new(query, spatial_filter.map(str::to_string)),
            next: Some(NodeId::START),
        }
    }

    fn execute(&self, node: NodeId, state: &RunState) -> StateUpdate {
        info!(node = %node, "executing node");

        match node {
            NodeId::ResolveAttributes => self.resolve_attributes(state),
            NodeId::ResolveFunction => self.resolve_function(state),
            NodeId::BuildQuery => self.build_query(state),
            NodeId::FetchRecords => self.fetch_records(state),
            NodeId::SpatialFilter => self.spatial_filter(state),
            NodeId::AggregateStatistics => self.aggregate_statistics(state),
            NodeId::RenderAnswer => self.render_answer(state),
        }
    }
}

/// A run in progress. Dropping it abandons the run at a node boundary.
pub struct RunSteps<'a> {
    workflow: &'a Workflow,
    state: RunState,
    next: Option<NodeId>,
}

impl RunSteps<'_> {
    /// Executes the next node, returning its id, or `None` when done.
    fn advance(&mut self) -> Option<NodeId> {
        let node = self.next?;
        let update = self.workflow.execute(node, &self.state);
        self.state.apply(update);
        self.next = successor(node, &self.state);
        Some(node)
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Drives the remaining nodes and returns the terminal state.
    pub fn finish(mut self) -> RunState {
        while self.advance().is_some() {}
        self.state
    }
}

impl Iterator for RunSteps<'_> {
    type Item = StepUpdate;

    fn next(&mut self) -> Option<StepUpdate> {
        let node = self.advance()?;
        Some(StepUpdate {
            node,
            state: self.state.clone(),
            completed_at: OffsetDateTime::now_utc(),
        })
    }
}
