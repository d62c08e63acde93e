//! The node implementations.
//!
//! Every node reads the full [`RunState`] and returns a [`StateUpdate`].
//! Collaborator failures are caught here and turned into `error` plus the
//! node's fallback values.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::answer::{NO_RESULTS_ANSWER, error_answer, fallback_answer, results_context};
use super::Workflow;
use super::prompts;
use super::state::{QueryType, RunState, StateUpdate, WorkflowError};
use crate::functions::FunctionResolution;
use crate::geometry::parse_filter_geometry;
use crate::oracle::{ChatMessage, OracleError, ResponseFormat, chat_json};
use crate::records::RecordSet;
use crate::spatial::{FilterPlan, PointDecision, SpatialSummary};
use crate::statistics;

impl Workflow {
    #[instrument(skip_all)]
    pub(super) fn resolve_attributes(&self, state: &RunState) -> StateUpdate {
        let messages = [
            ChatMessage::system(prompts::ATTRIBUTES_SYSTEM),
            ChatMessage::user(prompts::ATTRIBUTES_USER.replace("{query}", &state.query)),
        ];

        match chat_json(self.oracle.as_ref(), &self.settings.chat_model, &messages) {
            Ok(reply) => {
                let attributes = string_set(reply.get("attributes"));
                let needs = reply
                    .get("needs_building_function")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let hint = reply
                    .get("building_function_hint")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);

                info!(attributes = attributes.len(), needs_function = needs, "attributes identified");
                let message = format!(
                    "Identified attributes: {:?}",
                    attributes.iter().collect::<Vec<_>>()
                );
                StateUpdate {
                    attributes: Some(attributes),
                    needs_function_lookup: Some(needs),
                    function_hint: hint,
                    ..StateUpdate::message(message)
                }
            }
            Err(e) => {
                warn!(error = %e, "attribute identification failed");
                StateUpdate {
                    attributes: Some(BTreeSet::new()),
                    needs_function_lookup: Some(false),
                    ..StateUpdate::failed(&WorkflowError::oracle("attribute identification", e))
                }
            }
        }
    }

    #[instrument(skip_all)]
    pub(super) fn resolve_function(&self, state: &RunState) -> StateUpdate {
        let hint = state.function_hint.as_deref().unwrap_or(&state.query);

        match self.resolver.resolve(hint) {
            Ok(FunctionResolution::Resolved { entries, source }) => {
                let codes: Vec<i64> = entries.iter().map(|e| e.code).collect();
                let message = format!("Found building functions via {}: {:?}", source, codes);
                StateUpdate {
                    functions: Some(entries),
                    ..StateUpdate::message(message)
                }
            }
            Ok(FunctionResolution::NoMatch) => StateUpdate {
                functions: Some(Vec::new()),
                ..StateUpdate::message("No specific building function identified, proceeding without filter")
            },
            Err(e) => {
                warn!(error = %e, "function resolution failed");
                StateUpdate {
                    functions: Some(Vec::new()),
                    ..StateUpdate::message(format!(
                        "Function search failed: {}, proceeding without filter",
                        e
                    ))
                }
            }
        }
    }

    /// Classifies the query, then has the oracle write the store query.
    #[instrument(skip_all)]
    pub(super) fn build_query(&self, state: &RunState) -> StateUpdate {
        let classified = self.classify(state);
        let query_type = classified.query_type.unwrap_or_default();
        classified.then(self.generate_query(state, query_type))
    }

    fn classify(&self, state: &RunState) -> StateUpdate {
        let attributes = state.attributes.iter().cloned().collect::<Vec<_>>().join(", ");
        let functions = if state.function_names.is_empty() {
            "keine".to_string()
        } else {
            state.function_names.join(", ")
        };
        let messages = [
            ChatMessage::system(prompts::INTERPRET_SYSTEM),
            ChatMessage::user(
                prompts::INTERPRET_USER
                    .replace("{query}", &state.query)
                    .replace("{attributes}", &attributes)
                    .replace("{functions}", &functions),
            ),
        ];

        match chat_json(self.oracle.as_ref(), &self.settings.chat_model, &messages) {
            Ok(reply) => {
                let query_type = reply
                    .get("query_type")
                    .and_then(Value::as_str)
                    .and_then(QueryType::parse)
                    .unwrap_or_default();
                let reasoning = reply.get("reasoning").and_then(Value::as_str).unwrap_or("");

                info!(%query_type, "query classified");
                StateUpdate {
                    query_type: Some(query_type),
                    ..StateUpdate::message(format!("Query type: {} ({})", query_type, reasoning))
                }
            }
            Err(e) => {
                warn!(error = %e, "query interpretation failed");
                let error = WorkflowError::oracle("query interpretation", e);
                StateUpdate {
                    query_type: Some(QueryType::default()),
                    error: Some(error.to_string()),
                    ..StateUpdate::message(format!("{}, defaulting to '{}'", error, QueryType::default()))
                }
            }
        }
    }

    fn generate_query(&self, state: &RunState, query_type: QueryType) -> StateUpdate {
        let attributes = state.attributes.iter().cloned().collect::<Vec<_>>().join(", ");
        let messages = [
            ChatMessage::system(prompts::query_system(self.store.dialect(), query_type)),
            ChatMessage::user(
                prompts::QUERY_USER
                    .replace("{query}", &state.query)
                    .replace("{attributes}", &attributes)
                    .replace("{functions}", &format!("{:?}", state.function_codes)),
            ),
        ];

        let generated = self
            .oracle
            .chat(&self.settings.chat_model, &messages, ResponseFormat::Text)
            .map(|reply| strip_code_fences(&reply))
            .and_then(|query| {
                if query.is_empty() {
                    Err(OracleError::Api {
                        message: "empty query".to_string(),
                    })
                } else {
                    Ok(query)
                }
            });

        match generated {
            Ok(query) => {
                debug!(query = %query, "store query generated");
                StateUpdate {
                    structured_query: Some(query),
                    ..StateUpdate::message(format!("Generated {} query", self.store.dialect()))
                }
            }
            Err(e) => {
                warn!(error = %e, "query generation failed");
                StateUpdate {
                    structured_query: Some(String::new()),
                    ..StateUpdate::failed(&WorkflowError::oracle("query generation", e))
                }
            }
        }
    }

    #[instrument(skip_all)]
    pub(super) fn fetch_records(&self, state: &RunState) -> StateUpdate {
        let query = state.structured_query.trim();
        if query.is_empty() {
            return StateUpdate {
                records: Some(RecordSet::default()),
                ..StateUpdate::failed(&WorkflowError::NoQueryToExecute)
            }
            .with_message("Error: No query available to execute");
        }

        match self.store.execute(query) {
            Ok(rows) => {
                let records = RecordSet::from_rows(rows);
                info!(count = records.len(), wrapped = records.is_wrapped(), "records fetched");
                let message = format!("Query executed successfully, returned {} results", records.len());
                StateUpdate {
                    records: Some(records),
                    ..StateUpdate::message(message)
                }
            }
            Err(e) => {
                warn!(error = %e, "query execution failed");
                StateUpdate {
                    records: Some(RecordSet::default()),
                    ..StateUpdate::failed(&WorkflowError::from(e))
                }
            }
        }
    }

    #[instrument(skip_all)]
    pub(super) fn spatial_filter(&self, state: &RunState) -> StateUpdate {
        let Some(filter) = state.spatial_filter() else {
            return StateUpdate::message("No spatial filter provided, skipping spatial filtering");
        };

        let shape = match parse_filter_geometry(filter) {
            Ok(shape) => shape,
            Err(e) => return StateUpdate::failed(&WorkflowError::from(e)),
        };

        if state.records.is_empty() {
            return StateUpdate::message("No records to filter");
        }

        let geometry_type = shape.type_name();
        let mut reasoning = None;
        let plan = FilterPlan::for_shape(shape, || {
            let decision = self.decide_point_mode(state, filter);
            reasoning = decision.reasoning;
            decision.mode
        });

        let plan = match plan {
            Ok(plan) => plan,
            Err(e) => return StateUpdate::failed(&WorkflowError::from(e)),
        };

        let filtered = plan.apply(&state.records);
        let summary = SpatialSummary::new(
            &plan,
            geometry_type,
            state.records.len(),
            filtered.len(),
            reasoning,
        );
        info!(
            mode = %summary.mode,
            original = summary.original_count,
            filtered = summary.filtered_count,
            "spatial filter applied"
        );

        let message = format!(
            "Applied {} filter: {} of {} records kept",
            summary.mode, summary.filtered_count, summary.original_count
        );
        StateUpdate {
            records: Some(filtered),
            pre_filter_records: Some(state.records.clone()),
            spatial_summary: Some(summary),
            ..StateUpdate::message(message)
        }
    }

    /// Asks the oracle whether a point filter means nearest-K or radius.
    fn decide_point_mode(&self, state: &RunState, geometry: &str) -> PointDecision {
        let nearest_default = self.settings.nearest_default;
        let radius_default = self.settings.radius_default;
        let prompt = prompts::POINT_MODE_USER
            .replace("{query}", &state.query)
            .replace("{geometry}", geometry)
            .replace("{nearest_default}", &nearest_default.to_string())
            .replace("{radius_default}", &radius_default.to_string());

        match chat_json(
            self.oracle.as_ref(),
            &self.settings.chat_model,
            &[ChatMessage::user(prompt)],
        ) {
            Ok(reply) => PointDecision::from_reply(&reply, nearest_default, radius_default),
            Err(e) => {
                warn!(error = %e, "point mode decision failed, using nearest default");
                PointDecision {
                    reasoning: Some(format!("Fallback due to error: {}", e)),
                    ..PointDecision::fallback(nearest_default)
                }
            }
        }
    }

    #[instrument(skip_all)]
    pub(super) fn aggregate_statistics(&self, state: &RunState) -> StateUpdate {
        let (records, stats) = statistics::aggregate(state.records.clone());
        let message = format!("Calculated statistics for {} buildings", stats.building_count);
        StateUpdate {
            records: Some(records),
            statistics: Some(stats),
            ..StateUpdate::message(message)
        }
    }

    #[instrument(skip_all)]
    pub(super) fn render_answer(&self, state: &RunState) -> StateUpdate {
        if let Some(error) = &state.error {
            return StateUpdate {
                final_answer: Some(error_answer(error)),
                ..StateUpdate::message("Generated error response")
            };
        }

        if state.records.is_empty() {
            return StateUpdate {
                final_answer: Some(NO_RESULTS_ANSWER.to_string()),
                ..StateUpdate::message("No results found, generated empty response")
            };
        }

        let messages = [
            ChatMessage::system(prompts::ANSWER_SYSTEM),
            ChatMessage::user(
                prompts::ANSWER_USER
                    .replace("{query}", &state.query)
                    .replace(
                        "{results}",
                        &results_context(state, self.settings.answer_record_limit),
                    ),
            ),
        ];

        let reply = self
            .oracle
            .chat(&self.settings.chat_model, &messages, ResponseFormat::Text)
            .and_then(|reply| {
                let reply = reply.trim().to_string();
                if reply.is_empty() {
                    Err(OracleError::Api {
                        message: "empty answer".to_string(),
                    })
                } else {
                    Ok(reply)
                }
            });

        match reply {
            Ok(answer) => StateUpdate {
                final_answer: Some(answer),
                ..StateUpdate::message(format!("Generated answer for {} results", state.records.len()))
            },
            Err(e) => {
                warn!(error = %e, "answer generation failed, using fallback");
                StateUpdate {
                    final_answer: Some(fallback_answer(state)),
                    ..StateUpdate::failed(&WorkflowError::oracle("answer generation", e))
                }
            }
        }
    }
}

/// Strings of a JSON array; anything else is empty.
fn string_set(value: Option<&Value>) -> BTreeSet<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Removes a surrounding markdown code fence, if any.
fn strip_code_fences(reply: &str) -> String {
    let reply = reply.trim();
    if !reply.starts_with("```") {
        return reply.to_string();
    }

    let mut lines: Vec<&str> = reply.lines().skip(1).collect();
    if lines.last().is_some_and(|line| line.trim() == "```") {
        lines.pop();
    }
    lines.join("\n").trim().to_string()
}
