// SPDX-License-Identifier: MIT

use forge_core::CoreError;

/// Maps a `sqlx` failure onto the stable taxonomy (§7): unique-constraint
/// violations become `Conflict`, everything else is `Storage`.
pub fn from_sqlx(err: sqlx::Error) -> CoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            CoreError::Conflict(db_err.message().to_string())
        }
        sqlx::Error::RowNotFound => CoreError::NotFound("row not found".to_string()),
        other => CoreError::Storage(other.to_string()),
    }
}

pub fn json_error(err: serde_json::Error) -> CoreError {
    CoreError::Storage(format!("json (de)serialization failed: {err}"))
}
