//! Node identifiers and the transition table.

use serde::Serialize;

use super::state::RunState;

/// The steps of a run, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    ResolveAttributes,
    ResolveFunction,
    BuildQuery,
    FetchRecords,
    SpatialFilter,
    AggregateStatistics,
    RenderAnswer,
}

impl NodeId {
    /// First node of every run.
    pub const START: Self = Self::ResolveAttributes;
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ResolveAttributes => "resolve_attributes",
            Self::ResolveFunction => "resolve_function",
            Self::BuildQuery => "build_query",
            Self::FetchRecords => "fetch_records",
            Self::SpatialFilter => "spatial_filter",
            Self::AggregateStatistics => "aggregate_statistics",
            Self::RenderAnswer => "render_answer",
        };
        write!(f, "{}", name)
    }
}

/// Branch taken after attribute resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionRoute {
    NeedsFunction,
    NoFunction,
}

impl FunctionRoute {
    pub fn for_state(state: &RunState) -> Self {
        if state.needs_function_lookup {
            Self::NeedsFunction
        } else {
            Self::NoFunction
        }
    }
}

/// Branch taken after fetching records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialRoute {
    ApplyFilter,
    SkipFilter,
}

impl SpatialRoute {
    pub fn for_state(state: &RunState) -> Self {
        if state.spatial_filter().is_some() {
            Self::ApplyFilter
        } else {
            Self::SkipFilter
        }
    }
}

/// The node to run after `node`, or `None` once the run is complete.
pub fn successor(node: NodeId, state: &RunState) -> Option<NodeId> {
    match node {
        NodeId::ResolveAttributes => Some(match FunctionRoute::for_state(state) {
            FunctionRoute::NeedsFunction => NodeId::ResolveFunction,
            FunctionRoute::NoFunction => NodeId::BuildQuery,
        }),
        NodeId::ResolveFunction => Some(NodeId::BuildQuery),
        NodeId::BuildQuery => Some(NodeId::FetchRecords),
        NodeId::FetchRecords => Some(match SpatialRoute::for_state(state) {
            SpatialRoute::ApplyFilter => NodeId::SpatialFilter,
            SpatialRoute::SkipFilter => NodeId::AggregateStatistics,
        }),
        NodeId::SpatialFilter => Some(NodeId::AggregateStatistics),
        NodeId::AggregateStatistics => Some(NodeId::RenderAnswer),
        NodeId::RenderAnswer => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(state: &RunState) -> Vec<NodeId> {
        let mut nodes = vec![NodeId::START];
        while let Some(next) = successor(*nodes.last().unwrap(), state) {
            nodes.push(next);
        }
        nodes
    }

    #[test]
    fn shortest_path_skips_optional_nodes() {
        let state = RunState::new("Wie viele Gebäude hat Pankow?", None);
        assert_eq!(
            path(&state),
            vec![
                NodeId::ResolveAttributes,
                NodeId::BuildQuery,
                NodeId::FetchRecords,
                NodeId::AggregateStatistics,
                NodeId::RenderAnswer,
            ]
        );
    }

    #[test]
    fn full_path_visits_every_node() {
        let mut state = RunState::new("Schulen am Punkt", Some("POINT(0 0)".to_string()));
        state.needs_function_lookup = true;

        assert_eq!(
            path(&state),
            vec![
                NodeId::ResolveAttributes,
                NodeId::ResolveFunction,
                NodeId::BuildQuery,
                NodeId::FetchRecords,
                NodeId::SpatialFilter,
                NodeId::AggregateStatistics,
                NodeId::RenderAnswer,
            ]
        );
    }

    #[test]
    fn blank_filter_is_skipped() {
        let state = RunState::new("q", Some(String::new()));
        assert_eq!(SpatialRoute::for_state(&state), SpatialRoute::SkipFilter);
    }

    #[test]
    fn display_is_snake_case() {
        assert_eq!(NodeId::AggregateStatistics.to_string(), "aggregate_statistics");
        assert_eq!(
            serde_json::to_value(NodeId::RenderAnswer).unwrap(),
            serde_json::json!("render_answer")
        );
    }
}
