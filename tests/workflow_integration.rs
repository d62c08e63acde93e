//! End-to-end runs against an in-memory SQLite store and a scripted oracle.
//!
//! The fixture holds five buildings in EPSG:25833 around (388000, 5819000):
//!
//! | id | offset from center | floors | house number | area  | district |
//! |----|--------------------|--------|--------------|-------|----------|
//! | b1 | (0, 0)             | 3      | 12a          | 250.5 | Pankow   |
//! | b2 | (100, 0)           | 5      | 5            | 410.0 | Pankow   |
//! | b3 | (0, 100)           | 2      | ""           | 120.0 | Pankow   |
//! | b4 | (500, 0)           | 4      | 7            | 300.0 | Mitte    |
//! | b5 | (-200, -200)       | NULL   | NULL         | NULL  | Mitte    |

use std::sync::{Arc, Mutex};

use axploration::oracle::{ChatMessage, ResponseFormat};
use axploration::statistics::BuildingStatistics;
use axploration::workflow::{NO_RESULTS_ANSWER, NodeId, QueryType};
use axploration::{
    OracleClientTrait, OracleError, RecordStore, RunState, Settings, SqliteRecordStore, Workflow,
};
use rusqlite::Connection;

const SELECT_ALL: &str = "SELECT * FROM buildings";
const SELECT_PANKOW: &str = "```sql\nSELECT * FROM buildings WHERE district = 'Pankow'\n```";
const SQUARE_AROUND_CENTER: &str =
    "POLYGON((387950 5818950, 388150 5818950, 388150 5819150, 387950 5819150, 387950 5818950))";
const CENTER_POINT: &str = "POINT(388000 5819000)";

/// Replies per prompt kind. `None` makes that call fail.
#[derive(Clone)]
struct Script {
    attributes: Option<String>,
    interpret: Option<String>,
    query: Option<String>,
    point_mode: Option<String>,
    answer: Option<String>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            attributes: Some(r#"{"attributes": ["floors_above", "area"], "needs_building_function": false}"#.to_string()),
            interpret: Some(r#"{"query_type": "district", "reasoning": "Bezirk genannt"}"#.to_string()),
            query: Some(SELECT_ALL.to_string()),
            point_mode: Some(r#"{"mode": "nearest", "value": 3, "reasoning": "drei genannt"}"#.to_string()),
            answer: Some("Es gibt passende Gebäude.".to_string()),
        }
    }
}

/// Oracle that answers by recognizing the prompt and logs every user prompt.
struct ScriptedOracle {
    script: Script,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    fn new(script: Script) -> Self {
        Self {
            script,
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn prompts_containing(&self, needle: &str) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.contains(needle))
            .cloned()
            .collect()
    }
}

impl OracleClientTrait for ScriptedOracle {
    fn chat(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        _format: ResponseFormat,
    ) -> Result<String, OracleError> {
        let text: String = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.prompts.lock().unwrap().push(text.clone());

        let reply = if text.contains("Bestimme aus der Anfrage") {
            &self.script.attributes
        } else if text.contains("Du klassifizierst") {
            &self.script.interpret
        } else if text.contains("-Abfragen für eine Gebäudedatenbank") {
            &self.script.query
        } else if text.contains("Bestimme, welche räumliche Filterung") {
            &self.script.point_mode
        } else if text.contains("Du erklärst Ergebnisse") {
            &self.script.answer
        } else {
            panic!("unexpected prompt: {}", text);
        };

        reply.clone().ok_or_else(|| OracleError::Api {
            message: "scripted failure".to_string(),
        })
    }
}

fn building_store() -> SqliteRecordStore {
    let store = SqliteRecordStore::from_connection(Connection::open_in_memory().unwrap());
    store
        .connection()
        .execute_batch(
            "CREATE TABLE buildings (
                id TEXT PRIMARY KEY,
                centroid TEXT,
                floors_above INTEGER,
                house_number TEXT,
                street_name TEXT,
                post_code TEXT,
                area REAL,
                geometry_geojson TEXT,
                district TEXT,
                function_code INTEGER
            );
            INSERT INTO buildings VALUES ('b1', 'Point (388000 5819000)', 3, '12a', 'Breite Straße', '13187', 250.5, NULL, 'Pankow', 1000);
            INSERT INTO buildings VALUES ('b2', 'Point (388100 5819000)', 5, '5', 'Breite Straße', '13187', 410.0, NULL, 'Pankow', 3000);
            INSERT INTO buildings VALUES ('b3', 'Point (388000 5819100)', 2, '', 'Florastraße', '13187', 120.0, NULL, 'Pankow', 1000);
            INSERT INTO buildings VALUES ('b4', 'Point (388500 5819000)', 4, '7', 'Torstraße', '10119', 300.0, NULL, 'Mitte', 3000);
            INSERT INTO buildings VALUES ('b5', 'Point (387800 5818800)', NULL, NULL, 'Torstraße', '10119', NULL, NULL, 'Mitte', 1000);

            CREATE TABLE functions (
                code INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT
            );
            INSERT INTO functions VALUES (1000, 'Wohngebäude', 'Gebäude zum Wohnen');
            INSERT INTO functions VALUES (3000, 'Schule', 'Gebäude für Unterricht');
            INSERT INTO functions VALUES (3010, 'Berufsschule', 'Gebäude für berufliche Bildung');",
        )
        .unwrap();
    store
}

fn workflow(script: Script) -> (Workflow, Arc<ScriptedOracle>) {
    let oracle = Arc::new(ScriptedOracle::new(script));
    let store: Arc<dyn RecordStore> = Arc::new(building_store());
    let workflow = Workflow::new(oracle.clone(), store, Settings::default());
    (workflow, oracle)
}

fn ids(state: &RunState) -> Vec<String> {
    state
        .records
        .records()
        .iter()
        .map(|r| r["id"].as_str().unwrap().to_string())
        .collect()
}

fn has_message(state: &RunState, needle: &str) -> bool {
    state.messages.iter().any(|m| m.contains(needle))
}

#[test]
fn statistics_question_without_filter() {
    let (workflow, oracle) = workflow(Script {
        interpret: Some(r#"{"query_type": "statistics", "reasoning": "Durchschnitt gefragt"}"#.to_string()),
        query: Some(SELECT_PANKOW.to_string()),
        answer: Some("Im Schnitt haben die Gebäude 3,33 Stockwerke.".to_string()),
        ..Script::default()
    });

    let state = workflow.run("Wie viele Stockwerke haben Gebäude in Pankow im Schnitt?", None);

    assert_eq!(state.error, None);
    assert_eq!(state.query_type, QueryType::Statistics);
    assert_eq!(
        state.structured_query,
        "SELECT * FROM buildings WHERE district = 'Pankow'"
    );
    assert_eq!(state.final_answer, "Im Schnitt haben die Gebäude 3,33 Stockwerke.");

    let stats = state.statistics.as_ref().unwrap();
    assert_eq!(stats.building_count, 3);
    assert_eq!(stats.floors_above_min, Some(2));
    assert_eq!(stats.floors_above_max, Some(5));
    assert_eq!(stats.floors_above_mean, Some(3.33));
    assert_eq!(stats.house_number_min, Some(5));
    assert_eq!(stats.house_number_max, Some(12));

    assert!(state.records.is_wrapped());
    assert_eq!(state.records.attachment("statistics").unwrap()["building_count"], 3);
    assert!(state.pre_filter_records.is_none());

    assert!(has_message(&state, "Query type: statistics (Durchschnitt gefragt)"));
    assert!(has_message(&state, "Query executed successfully, returned 3 results"));
    assert!(has_message(&state, "Calculated statistics for 3 buildings"));

    let answer_prompt = &oracle.prompts_containing("Du erklärst Ergebnisse")[0];
    assert!(answer_prompt.contains("\"building_count\": 3"));
}

#[test]
fn polygon_filter_keeps_contained_buildings() {
    let (workflow, oracle) = workflow(Script::default());

    let state = workflow.run("Gebäude in diesem Gebiet", Some(SQUARE_AROUND_CENTER));

    assert_eq!(state.error, None);
    assert_eq!(ids(&state), vec!["b1", "b2", "b3"]);
    assert_eq!(state.pre_filter_records.as_ref().unwrap().len(), 5);

    let summary = state.spatial_summary.as_ref().unwrap();
    assert_eq!(summary.mode, "polygon_containment");
    assert_eq!(summary.geometry_type, "Polygon");
    assert_eq!((summary.original_count, summary.filtered_count), (5, 3));

    assert!(oracle.prompts_containing("Bestimme, welche räumliche Filterung").is_empty());
    let answer_prompt = &oracle.prompts_containing("Du erklärst Ergebnisse")[0];
    assert!(answer_prompt.contains(
        "Räumliche Filterung: 5 Gebäude gefunden, 3 innerhalb der angegebenen Geometrie"
    ));
}

#[test]
fn point_filter_in_radius_mode_sorts_by_distance() {
    let (workflow, _) = workflow(Script {
        point_mode: Some(r#"{"mode": "radius", "value": 300, "reasoning": "300 Meter genannt"}"#.to_string()),
        ..Script::default()
    });

    let state = workflow.run("Gebäude im Umkreis von 300 Metern", Some(CENTER_POINT));

    assert_eq!(state.error, None);
    assert_eq!(ids(&state), vec!["b1", "b2", "b3", "b5"]);

    let distances: Vec<f64> = state
        .records
        .records()
        .iter()
        .map(|r| r["_distance"].as_f64().unwrap())
        .collect();
    assert!(distances.windows(2).all(|w| w[0] <= w[1]));
    assert!(distances.iter().all(|d| *d <= 300.0));

    let summary = state.spatial_summary.as_ref().unwrap();
    assert_eq!(summary.mode, "radius");
    assert_eq!(summary.radius, Some(300.0));
    assert_eq!(summary.reasoning.as_deref(), Some("300 Meter genannt"));
}

#[test]
fn point_filter_in_nearest_mode_starts_at_center() {
    let (workflow, _) = workflow(Script::default());

    let state = workflow.run("Die drei nächsten Gebäude", Some(CENTER_POINT));

    assert_eq!(ids(&state), vec!["b1", "b2", "b3"]);
    assert_eq!(state.spatial_summary.as_ref().unwrap().count, Some(3));
    assert_eq!(state.statistics.as_ref().unwrap().building_count, 3);
}

#[test]
fn point_mode_failure_falls_back_to_nearest_default() {
    let (workflow, _) = workflow(Script {
        point_mode: None,
        ..Script::default()
    });

    let state = workflow.run("Gebäude hier", Some(CENTER_POINT));

    assert_eq!(state.error, None);
    let summary = state.spatial_summary.as_ref().unwrap();
    assert_eq!(summary.mode, "nearest");
    assert_eq!(summary.count, Some(10));
    assert!(summary
        .reasoning
        .as_deref()
        .unwrap()
        .starts_with("Fallback due to error"));
    assert_eq!(state.records.len(), 5);
}

#[test]
fn function_hint_resolves_through_keywords() {
    let (workflow, oracle) = workflow(Script {
        attributes: Some(
            r#"{"attributes": ["function"], "needs_building_function": true, "building_function_hint": "Schulen"}"#
                .to_string(),
        ),
        ..Script::default()
    });

    let state = workflow.run("Wo sind Schulen?", None);

    assert_eq!(state.function_codes, vec![3000, 3010]);
    assert_eq!(state.function_names, vec!["Schule", "Berufsschule"]);
    assert!(has_message(&state, "Found building functions via keyword matching: [3000, 3010]"));

    let query_prompt = &oracle.prompts_containing("-Abfragen für eine Gebäudedatenbank")[0];
    assert!(query_prompt.contains("[3000, 3010]"));
    assert!(query_prompt.contains("SQLite SQL"));
}

#[test]
fn unmatched_function_hint_proceeds_without_filter() {
    let (workflow, _) = workflow(Script {
        attributes: Some(
            r#"{"needs_building_function": true, "building_function_hint": "Sternwarte"}"#.to_string(),
        ),
        ..Script::default()
    });

    let state = workflow.run("Wo ist die Sternwarte?", None);

    assert_eq!(state.error, None);
    assert!(state.function_codes.is_empty());
    assert!(state.function_names.is_empty());
    assert!(has_message(
        &state,
        "No specific building function identified, proceeding without filter"
    ));
}

#[test]
fn syntax_error_becomes_error_answer_without_oracle_call() {
    let (workflow, oracle) = workflow(Script {
        query: Some("SELEC * FROM buildings".to_string()),
        ..Script::default()
    });

    let state = workflow.run("Alle Gebäude", None);

    let error = state.error.as_deref().unwrap();
    assert!(error.starts_with("Query syntax error"), "{}", error);
    assert!(state.records.is_empty());
    assert_eq!(state.statistics.as_ref().unwrap().building_count, 0);
    assert!(state.final_answer.starts_with("Es ist ein Fehler aufgetreten: Query syntax error"));
    assert!(oracle.prompts_containing("Du erklärst Ergebnisse").is_empty());
}

#[test]
fn unknown_table_is_reported_as_unknown_label() {
    let (workflow, _) = workflow(Script {
        query: Some("SELECT * FROM gebaeude".to_string()),
        ..Script::default()
    });

    let state = workflow.run("Alle Gebäude", None);

    assert!(state.error.as_deref().unwrap().starts_with("Unknown label in query"));
}

#[test]
fn failed_query_generation_leaves_nothing_to_execute() {
    let (workflow, _) = workflow(Script {
        query: None,
        ..Script::default()
    });

    let state = workflow.run("Alle Gebäude", None);

    assert_eq!(state.structured_query, "");
    assert!(has_message(&state, "Error in query generation"));
    assert!(has_message(&state, "Error: No query available to execute"));
    assert_eq!(state.error.as_deref(), Some("No query to execute"));
    assert!(state.final_answer.starts_with("Es ist ein Fehler aufgetreten"));
}

#[test]
fn interpretation_failure_defaults_to_district() {
    let (workflow, _) = workflow(Script {
        interpret: None,
        ..Script::default()
    });

    let state = workflow.run("Gebäude in Mitte", None);

    assert_eq!(state.query_type, QueryType::District);
    assert!(state.error.as_deref().unwrap().starts_with("Error in query interpretation"));
    assert!(has_message(&state, "defaulting to 'district'"));
    assert_eq!(state.records.len(), 5);
}

#[test]
fn attribute_failure_skips_function_lookup() {
    let (workflow, _) = workflow(Script {
        attributes: None,
        ..Script::default()
    });

    let nodes: Vec<NodeId> = workflow.steps("Gebäude", None).map(|s| s.node).collect();

    assert!(!nodes.contains(&NodeId::ResolveFunction));
    assert_eq!(nodes.last(), Some(&NodeId::RenderAnswer));
}

#[test]
fn answer_failure_uses_templated_fallback() {
    let (workflow, _) = workflow(Script {
        query: Some(SELECT_PANKOW.to_string()),
        answer: None,
        ..Script::default()
    });

    let state = workflow.run("Gebäude in Pankow", None);

    assert_eq!(
        state.final_answer,
        "Ihre Anfrage ergab 3 Ergebnisse.\nDurchschnittliche Stockwerke: 3.3\nDurchschnittliche Fläche: 260.17"
    );
    assert!(state.error.as_deref().unwrap().starts_with("Error in answer generation"));
}

#[test]
fn empty_answer_counts_as_failure() {
    let (workflow, _) = workflow(Script {
        answer: Some("   ".to_string()),
        ..Script::default()
    });

    let state = workflow.run("Alle Gebäude", None);

    assert!(state.final_answer.starts_with("Ihre Anfrage ergab 5 Ergebnisse."));
    assert!(state.error.is_some());
}

#[test]
fn empty_result_into_filter_reports_no_records() {
    let (workflow, oracle) = workflow(Script {
        query: Some("SELECT * FROM buildings WHERE district = 'Spandau'".to_string()),
        ..Script::default()
    });

    let state = workflow.run("Gebäude in Spandau", Some(CENTER_POINT));

    assert_eq!(state.error, None);
    assert!(has_message(&state, "No records to filter"));
    assert_eq!(state.final_answer, NO_RESULTS_ANSWER);
    assert!(oracle.prompts_containing("Bestimme, welche räumliche Filterung").is_empty());
}

#[test]
fn invalid_filter_geometry_keeps_records_and_sets_error() {
    let (workflow, _) = workflow(Script::default());

    let state = workflow.run("Gebäude", Some("POLYGON((oops"));

    assert!(state.error.as_deref().unwrap().starts_with("Invalid filter geometry"));
    assert_eq!(state.records.len(), 5);
    assert!(state.spatial_summary.is_none());
}

#[test]
fn geometry_collection_filter_is_unsupported() {
    let (workflow, _) = workflow(Script::default());

    let state = workflow.run(
        "Gebäude",
        Some("GEOMETRYCOLLECTION(POINT(388000 5819000))"),
    );

    assert_eq!(
        state.error.as_deref(),
        Some("Unsupported filter geometry type: GeometryCollection")
    );
}

#[test]
fn steps_surface_every_node_with_growing_messages() {
    let (workflow, _) = workflow(Script::default());

    let steps: Vec<_> = workflow.steps("Gebäude hier", Some(CENTER_POINT)).collect();

    let nodes: Vec<NodeId> = steps.iter().map(|s| s.node).collect();
    assert_eq!(
        nodes,
        vec![
            NodeId::ResolveAttributes,
            NodeId::BuildQuery,
            NodeId::FetchRecords,
            NodeId::SpatialFilter,
            NodeId::AggregateStatistics,
            NodeId::RenderAnswer,
        ]
    );

    for (index, step) in steps.iter().enumerate() {
        assert!(step.state.messages.len() > index);
    }
    assert!(steps
        .windows(2)
        .all(|w| w[0].state.messages.len() <= w[1].state.messages.len()));

    let last = &steps.last().unwrap().state;
    let ran = workflow.run("Gebäude hier", Some(CENTER_POINT));
    assert_eq!(last.final_answer, ran.final_answer);
    assert_eq!(last.messages, ran.messages);
}

#[test]
fn final_state_serializes_for_clients() {
    let (workflow, _) = workflow(Script::default());

    let state = workflow.run("Gebäude", Some(SQUARE_AROUND_CENTER));
    let json = serde_json::to_value(&state).unwrap();

    assert_eq!(json["query_type"], "district");
    assert_eq!(json["spatial_summary"]["mode"], "polygon_containment");
    assert_eq!(json["records"][0]["buildings"].as_array().unwrap().len(), 3);
    assert_eq!(json["statistics"]["building_count"], 3);
}

#[test]
fn statistics_match_direct_computation() {
    let (workflow, _) = workflow(Script::default());

    let state = workflow.run("Gebäude", Some(SQUARE_AROUND_CENTER));
    let direct = BuildingStatistics::compute(state.records.records());

    assert_eq!(state.statistics.as_ref(), Some(&direct));
}
