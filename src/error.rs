use thiserror::Error;

/// Main error type for RAGMcp
#[derive(Error, Debug)]
pub enum RagmcpError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    
    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
    
    /// Embedding API errors
    #[error("Embedding API error: {0}")]
    Embedding(String),
    
    /// Document not found
    #[error("Document not found: {0}")]
    DocumentNotFound(String),
    
    /// Chunk not found
    #[error("Chunk not found: {0}")]
    ChunkNotFound(String),
    
    /// Parse errors
    #[error("Parse error: {0}")]
    Parse(String),
    
    /// MCP protocol errors
    #[error("MCP protocol error: {0}")]
    McpProtocol(String),
    
    /// Search errors
    #[error("Search error: {0}")]
    Search(String),
    
    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A required external dependency (embedder, LLM, vector store, cache) is
    /// unreachable. Callers handling this at the orchestrator boundary degrade
    /// rather than fail outright (see `Answer::status = "degraded"`).
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// Exhausted retry policy against a remote service (LLM or embedder).
    #[error("Retryable operation exhausted after {attempts} attempts: {message}")]
    RetryExhausted { attempts: u32, message: String },

    /// Request-level validation failure (empty question, out-of-range k, unknown variant).
    #[error("Validation error: {0}")]
    Validation(String),

    /// HTTP/transport-level failure talking to an external provider.
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Convenient Result type using RagmcpError
pub type Result<T> = std::result::Result<T, RagmcpError>;

impl crate::core::retry::Retryable for RagmcpError {
    /// Transport failures and 5xx/429 responses are retryable (spec §7
    /// "Retryable-transport"); validation and configuration failures are
    /// surfaced immediately.
    fn is_retryable(&self) -> bool {
        match self {
            RagmcpError::Http(_) => true,
            RagmcpError::Embedding(msg) | RagmcpError::Search(msg) => {
                msg.contains("429")
                    || msg.contains("500")
                    || msg.contains("502")
                    || msg.contains("503")
                    || msg.contains("504")
                    || msg.contains("Network error")
                    || msg.contains("timed out")
            }
            RagmcpError::DependencyUnavailable(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_error_display() {
        let err = RagmcpError::Config("Test error".to_string());
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("Test error"));
    }
    
    #[test]
    fn test_error_from_rusqlite() {
        let rusqlite_err = rusqlite::Error::InvalidQuery;
        let ragmcp_err: RagmcpError = rusqlite_err.into();
        assert!(matches!(ragmcp_err, RagmcpError::Database(_)));
    }
    
    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let ragmcp_err: RagmcpError = io_err.into();
        assert!(matches!(ragmcp_err, RagmcpError::Io(_)));
    }

    #[test]
    fn test_retry_exhausted_display() {
        let err = RagmcpError::RetryExhausted {
            attempts: 3,
            message: "timeout".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains('3'));
        assert!(msg.contains("timeout"));
    }

    #[test]
    fn test_validation_display() {
        let err = RagmcpError::Validation("question must not be empty".to_string());
        assert!(err.to_string().contains("Validation error"));
    }
}
