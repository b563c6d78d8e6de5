//! Row and error mapping shared by the SQLite-backed store.

use marcus_core::error::MarcusError;

/// Map a `sqlx::Error` onto the Integration kind the core treats durable
/// storage failures as.
pub fn sqlx_error_to_marcus_error(err: sqlx::Error) -> MarcusError {
    match &err {
        sqlx::Error::Database(db_err) => {
            MarcusError::PersistenceError(format!("database constraint error: {}", db_err.message()))
        }
        sqlx::Error::PoolTimedOut => MarcusError::Timeout { operation: "acquire persistence connection".into() },
        other => MarcusError::PersistenceError(other.to_string()),
    }
}

pub fn parse_json(raw: &str) -> Result<serde_json::Value, MarcusError> {
    serde_json::from_str(raw).map_err(|e| MarcusError::PersistenceError(format!("corrupt stored value: {e}")))
}
