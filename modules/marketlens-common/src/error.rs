use thiserror::Error;

/// Closed error taxonomy for the engine. Backend adapters classify vendor
/// errors into these kinds; nothing else crosses a crate boundary.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Backend '{backend}' unavailable: {detail}")]
    BackendUnavailable { backend: String, detail: String },

    #[error("Backend '{backend}' timed out after {elapsed_ms}ms")]
    Timeout { backend: String, elapsed_ms: u64 },

    #[error("Query error: {0}")]
    Query(String),

    #[error("Circuit open for backend '{backend}'")]
    CircuitOpen { backend: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Overloaded, retry after {retry_after_s}s")]
    Overload { retry_after_s: u64 },

    #[error("Cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn unavailable(backend: &str, detail: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend: backend.to_string(),
            detail: detail.into(),
        }
    }

    pub fn timeout(backend: &str, elapsed_ms: u64) -> Self {
        Self::Timeout {
            backend: backend.to_string(),
            elapsed_ms,
        }
    }

    /// Whether the retry layer may re-attempt this failure.
    /// Only timeouts and transient unavailability qualify; everything else
    /// would fail the same way again or has already been decided (breaker).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Timeout { .. } | EngineError::BackendUnavailable { .. }
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_retryable() {
        assert!(EngineError::timeout("graph", 500).is_retryable());
    }

    #[test]
    fn circuit_open_is_not_retryable() {
        let e = EngineError::CircuitOpen {
            backend: "search".into(),
        };
        assert!(!e.is_retryable());
    }

    #[test]
    fn validation_is_not_retryable() {
        assert!(!EngineError::Validation("empty query".into()).is_retryable());
    }
}
