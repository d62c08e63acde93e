//! Prompt templates for oracle calls.
//!
//! Placeholders in braces are filled with `str::replace`.

use super::state::QueryType;
use crate::store::QueryDialect;

pub const ATTRIBUTES_SYSTEM: &str = r#"Du bist ein Experte für die Analyse von Anfragen zu ALKIS-Gebäudedaten.

Bestimme aus der Anfrage:
1. Welche Gebäudeattribute werden gesucht?
2. Wird eine bestimmte Gebäudefunktion benötigt (Wohngebäude, Schule, Büro, ...)?

Mögliche Attribute: function, district, floors_above, house_number, street_name,
post_code, area, centroid, geometry_geojson

Antworte im JSON-Format:
{
    "attributes": ["liste", "der", "attribute"],
    "needs_building_function": true,
    "building_function_hint": "kurze Beschreibung der gesuchten Funktion"
}"#;

pub const ATTRIBUTES_USER: &str = "Analysiere diese Anfrage: {query}";

pub const INTERPRET_SYSTEM: &str = r#"Du klassifizierst Anfragen an eine Gebäudedatenbank.

Kategorien:
- "district": Gebäude in bestimmten Bezirken
- "nearby": Gebäude in der Nähe eines Ortes oder Punktes
- "custom_area": Gebäude innerhalb einer benutzerdefinierten Fläche
- "statistics": Anzahl, Durchschnitt, Summe, Extremwerte

Antworte im JSON-Format:
{
    "query_type": "district|nearby|custom_area|statistics",
    "reasoning": "kurze Begründung"
}"#;

pub const INTERPRET_USER: &str = "Anfrage: {query}
Identifizierte Attribute: {attributes}
Gebäudefunktionen: {functions}";

pub const QUERY_SYSTEM: &str = r#"Du schreibst {dialect}-Abfragen für eine Gebäudedatenbank.

{schema}

Aufgabe: {guidance}

Regeln:
- Funktionscodes sind Ganzzahlen: [1010, 2020], nicht ['1010', '2020']
- Gib die Eigenschaften zurück, die für die Antwort relevant sind, immer inklusive id und centroid
- Begrenze das Ergebnis auf höchstens 100 Gebäude, wenn nichts anderes verlangt ist
- Koordinaten liegen in EPSG:25833 vor

Antworte NUR mit der Abfrage, ohne Erklärungen."#;

pub const QUERY_USER: &str = "Anfrage: {query}
Attribute: {attributes}
Gebäudefunktionen (Codes): {functions}";

const CYPHER_SCHEMA: &str = r#"Schema:
- (:Buildings {id, centroid, floors_above, house_number, street_name, post_code, area, geometry_geojson})
- (:Districts {Gemeinde_name, Gemeinde_schluessel, WKT, centroid})
- (:Functions {code, name, description})
- (Buildings)-[:IN_DISTRICT]->(Districts)
- (Buildings)-[:HAS_FUNCTION]->(Functions)
- (Functions)-[:HAS_SUBFUNCTION]->(Functions)
Labels stehen im Plural. Bezirksname: Gemeinde_name.
centroid hat das Format "Point (x y)"."#;

const SQL_SCHEMA: &str = r#"Schema (SQLite):
- buildings(id TEXT, centroid TEXT, floors_above INTEGER, house_number TEXT, street_name TEXT,
  post_code TEXT, area REAL, geometry_geojson TEXT, district TEXT, function_code INTEGER)
- districts(name TEXT, key TEXT, wkt TEXT, centroid TEXT)
- functions(code INTEGER, name TEXT, description TEXT)
centroid hat das Format "Point (x y)". Für eine Gebäudeliste neben Kennzahlen nutze
json_group_array(json_object(...)) AS buildings."#;

pub const POINT_MODE_USER: &str = r#"Bestimme, welche räumliche Filterung die Anfrage verlangt.

Anfrage: "{query}"
Filter: Punktgeometrie (WKT: {geometry})

Entweder die nächstgelegenen X Gebäude ("nearest") oder alle Gebäude im Umkreis von X Metern ("radius").
Ohne konkrete Zahl: nearest mit {nearest_default}, radius mit {radius_default}.

Antworte NUR im JSON-Format:
{"mode": "nearest" oder "radius", "value": <Zahl>, "reasoning": "kurze Erklärung"}"#;

pub const ANSWER_SYSTEM: &str = r#"Du erklärst Ergebnisse von Gebäudedaten-Analysen.

Regeln:
- Antworte auf Deutsch
- Sei präzise und informativ
- Formatiere Zahlen lesbar (1.234 statt 1234)
- Fasse große Ergebnismengen zusammen"#;

pub const ANSWER_USER: &str = "Ursprüngliche Anfrage: {query}

Gefundene Daten:
{results}

Formuliere eine hilfreiche Antwort.";

pub fn schema_for(dialect: QueryDialect) -> &'static str {
    match dialect {
        QueryDialect::Cypher => CYPHER_SCHEMA,
        QueryDialect::Sql => SQL_SCHEMA,
    }
}

pub fn guidance_for(query_type: QueryType) -> &'static str {
    match query_type {
        QueryType::District => {
            "Finde Gebäude in den genannten Bezirken. Gib nur Gebäude zurück, die zum gesuchten Bezirk gehören."
        }
        QueryType::Nearby => {
            "Finde Gebäude in der Nähe des genannten Ortes. Die genaue räumliche Filterung erfolgt nachträglich, gib daher ausreichend Kandidaten mit centroid zurück."
        }
        QueryType::CustomArea => {
            "Finde Gebäude in einem benutzerdefinierten Gebiet. geometry_geojson enthält MULTIPOLYGON-Text."
        }
        QueryType::Statistics => {
            "Berechne die verlangten Kennzahlen mit count, avg, sum, min, max oder collect."
        }
    }
}

/// System prompt for building a store query of `query_type`.
pub fn query_system(dialect: QueryDialect, query_type: QueryType) -> String {
    QUERY_SYSTEM
        .replace("{dialect}", &dialect.to_string())
        .replace("{schema}", schema_for(dialect))
        .replace("{guidance}", guidance_for(query_type))
}
