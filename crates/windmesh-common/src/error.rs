use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Payload too large: limit is {0} bytes")]
    PayloadTooLarge(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MeshError {
    /// Returns `true` for failures caused by the network rather than by the
    /// peer's answer.
    pub fn is_transport(&self) -> bool {
        matches!(self, MeshError::Transport(_) | MeshError::Timeout(_) | MeshError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, MeshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MeshError::UnexpectedStatus {
            status: 503,
            body: "down".to_string(),
        };
        assert_eq!(err.to_string(), "Unexpected status 503: down");
        assert_eq!(MeshError::Timeout(5000).to_string(), "Request timeout after 5000ms");
    }

    #[test]
    fn test_is_transport() {
        assert!(MeshError::Transport("refused".to_string()).is_transport());
        assert!(MeshError::Timeout(10).is_transport());
        assert!(!MeshError::ServiceUnavailable("svc".to_string()).is_transport());
        assert!(!MeshError::UnexpectedStatus { status: 404, body: String::new() }.is_transport());
    }
}
