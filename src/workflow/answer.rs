//! Answer texts and the context handed to the oracle for rendering.

use serde_json::Value;

use super::state::RunState;
use crate::records::RecordSet;
use crate::spatial::SpatialSummary;

pub const NO_RESULTS_ANSWER: &str = "Leider wurden keine Ergebnisse für Ihre Anfrage gefunden. \
     Bitte versuchen Sie es mit einer anderen Suchanfrage.";

pub fn error_answer(error: &str) -> String {
    format!("Es ist ein Fehler aufgetreten: {}", error)
}

/// Answer used when the oracle cannot render one.
pub fn fallback_answer(state: &RunState) -> String {
    let mut answer = format!("Ihre Anfrage ergab {} Ergebnisse.", state.records.len());

    if let Some(stats) = &state.statistics {
        if let Some(floors) = stats.floors_above_mean {
            answer.push_str(&format!("\nDurchschnittliche Stockwerke: {:.1}", floors));
        }
        if let Some(area) = stats.area_mean {
            answer.push_str(&format!("\nDurchschnittliche Fläche: {:.2}", area));
        }
    }

    answer
}

/// `Gesuchte Gebäudefunktionen: name (Code: c), ...`, when functions were resolved.
pub fn function_line(codes: &[i64], names: &[String]) -> Option<String> {
    if codes.is_empty() || codes.len() != names.len() {
        return None;
    }
    let functions = codes
        .iter()
        .zip(names)
        .map(|(code, name)| format!("{} (Code: {})", name, code))
        .collect::<Vec<_>>()
        .join(", ");
    Some(format!("Gesuchte Gebäudefunktionen: {}", functions))
}

pub fn spatial_narrative(summary: &SpatialSummary) -> Option<String> {
    let SpatialSummary {
        original_count,
        filtered_count,
        ..
    } = summary;

    match summary.mode.as_str() {
        "polygon_containment" => Some(format!(
            "Räumliche Filterung: {} Gebäude gefunden, {} innerhalb der angegebenen Geometrie",
            original_count, filtered_count
        )),
        "nearest" => Some(format!(
            "Räumliche Filterung: Die {} nächstgelegenen Gebäude von {} gefundenen Gebäuden",
            summary.count.unwrap_or(*filtered_count),
            original_count
        )),
        "radius" => Some(format!(
            "Räumliche Filterung: {} von {} Gebäuden innerhalb von {}m Radius",
            filtered_count,
            original_count,
            summary.radius.unwrap_or_default()
        )),
        _ => None,
    }
}

/// The data section of the answer prompt.
///
/// Shows at most `limit` records; attachments such as the statistics are
/// always included.
pub fn results_context(state: &RunState, limit: usize) -> String {
    let mut sections = Vec::new();

    if let Some(line) = function_line(&state.function_codes, &state.function_names) {
        sections.push(line);
    }
    if let Some(narrative) = state.spatial_summary.as_ref().and_then(spatial_narrative) {
        sections.push(narrative);
    }

    let shown = truncated(&state.records, limit);
    sections.push(serde_json::to_string_pretty(&shown).unwrap_or_else(|_| shown.to_string()));

    let total = state.records.len();
    if total > limit {
        sections.push(format!("(Zeige {} von {} Ergebnissen)", limit, total));
    }

    sections.join("\n\n")
}

fn truncated(records: &RecordSet, limit: usize) -> Value {
    let kept = records.records().iter().take(limit).cloned().collect();
    records.with_records(kept).to_value()
}
