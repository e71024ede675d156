//! Versioned decoding of stored session documents.
//!
//! Version 1 documents carry no `schemaVersion` field and may store a score as a bare number
//! of runs. They are rewritten into the current shape before typed decoding so read sites
//! never branch on field presence.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value, json};
use thiserror::Error;

use super::{QuizState, SCHEMA_VERSION};

const VERSION_FIELD: &str = "schemaVersion";
const LEGACY_VERSION: u64 = 1;

/// Failures raised while decoding a stored document.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The document is not a JSON object.
    #[error("session document must be a JSON object")]
    NotAnObject,
    /// The document was written by a newer, unknown schema.
    #[error("unsupported session schema version {0}")]
    UnsupportedVersion(u64),
    /// The migrated document still does not match the current schema.
    #[error("malformed session document")]
    Malformed(#[source] serde_json::Error),
}

/// Decode a stored document of any known version into the current [`QuizState`].
pub fn decode(value: Value) -> Result<QuizState, SchemaError> {
    let Value::Object(mut document) = value else {
        return Err(SchemaError::NotAnObject);
    };

    let version = document
        .get(VERSION_FIELD)
        .and_then(Value::as_u64)
        .unwrap_or(LEGACY_VERSION);

    match version {
        LEGACY_VERSION => migrate_v1(&mut document),
        v if v == u64::from(SCHEMA_VERSION) => {}
        other => return Err(SchemaError::UnsupportedVersion(other)),
    }

    serde_json::from_value(Value::Object(document)).map_err(SchemaError::Malformed)
}

/// Serde adapter running [`decode`] on a required state field.
pub fn deserialize<'de, D>(deserializer: D) -> Result<QuizState, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    decode(value).map_err(serde::de::Error::custom)
}

/// Serde adapter running [`decode`] on an optional state field.
pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<QuizState>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    value
        .filter(|value| !value.is_null())
        .map(decode)
        .transpose()
        .map_err(serde::de::Error::custom)
}

fn migrate_v1(document: &mut Map<String, Value>) {
    if let Some(scores) = document.get_mut("scores") {
        upgrade_matrix(scores);
    }
    if let Some(Value::Array(rounds)) = document.get_mut("rounds") {
        for round in rounds.iter_mut() {
            if let Some(scores) = round.get_mut("scores") {
                upgrade_matrix(scores);
            }
        }
    }
    document.insert(VERSION_FIELD.into(), json!(SCHEMA_VERSION));
}

fn upgrade_matrix(matrix: &mut Value) {
    let Value::Object(rows) = matrix else {
        return;
    };
    for row in rows.values_mut() {
        let Value::Object(cells) = row else {
            continue;
        };
        for cell in cells.values_mut() {
            if let Value::Number(runs) = cell {
                let runs = runs.as_i64().unwrap_or(0);
                *cell = json!({ "runs": runs, "isWicket": false });
            }
        }
    }
}
