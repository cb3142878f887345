use thiserror::Error;

use crate::model::AgentRole;

pub type Result<T> = std::result::Result<T, ExchangeError>;

/// Error taxonomy for the orchestration layer.
///
/// Every variant maps to a stable HTTP status regardless of which
/// orchestrator raised it. Runtime failures that are not one of the
/// recognized protocol conditions are wrapped into `Internal` with the
/// original message preserved.
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("{0} agent already initialized")]
    Conflict(AgentRole),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Record {id} is not in {expected} state. Current state: {actual}")]
    State {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("Timed out after {waited_ms}ms waiting for {what}")]
    Timeout { what: String, waited_ms: u64 },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExchangeError {
    pub fn agent_not_initialized(role: AgentRole) -> Self {
        ExchangeError::NotFound(format!(
            "{role} agent not initialized. Initialize it first"
        ))
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ExchangeError::Conflict(_) => 409,
            ExchangeError::NotFound(_) => 404,
            ExchangeError::Validation(_)
            | ExchangeError::State { .. }
            | ExchangeError::BadRequest(_) => 400,
            ExchangeError::Timeout { .. } => 504,
            ExchangeError::Internal(_) => 500,
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_is_stable() {
        assert_eq!(ExchangeError::Conflict(AgentRole::Acme).http_status(), 409);
        assert_eq!(ExchangeError::NotFound("x".into()).http_status(), 404);
        assert_eq!(ExchangeError::Validation("x".into()).http_status(), 400);
        assert_eq!(ExchangeError::BadRequest("x".into()).http_status(), 400);
        let state = ExchangeError::State {
            id: "r1".into(),
            expected: "offer-received".into(),
            actual: "done".into(),
        };
        assert_eq!(state.http_status(), 400);
        let timeout = ExchangeError::Timeout {
            what: "connection".into(),
            waited_ms: 100,
        };
        assert_eq!(timeout.http_status(), 504);
        assert_eq!(ExchangeError::Internal("x".into()).http_status(), 500);
    }

    #[test]
    fn state_error_names_actual_state() {
        let err = ExchangeError::State {
            id: "abc".into(),
            expected: "request-received".into(),
            actual: "presentation-sent".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("presentation-sent"));
        assert!(msg.contains("request-received"));
    }
}
