use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, EngramError>;

#[derive(Debug, Error)]
pub enum EngramError {
    #[error("Storage error: {0}")]
    Storage(#[from] redb::Error),

    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Storage operation error: {0}")]
    StorageOperation(#[from] redb::StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Node not found: {0}")]
    NodeNotFound(Uuid),

    #[error("Edge not found: {0}")]
    EdgeNotFound(Uuid),

    #[error("Episode not found: {0}")]
    EpisodeNotFound(Uuid),

    /// A mutation would break a graph invariant (orphan edge, privacy
    /// violation, confidence out of range). Rejected and surfaced.
    #[error("Invariant violation: {reason}")]
    InvariantViolation { reason: String },

    /// Unparseable input that could not be repaired.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Extraction output failed span/count verification.
    #[error("Hallucination detected: {0}")]
    HallucinationDetected(String),

    /// A dependency (LLM tier, verifier, queue) is temporarily unavailable.
    /// Retried with backoff behind a circuit breaker.
    #[error("Transient external failure in {dependency}: {reason}")]
    TransientExternal { dependency: String, reason: String },

    /// Circuit breaker for the named dependency is open.
    #[error("Circuit open for {0}")]
    CircuitOpen(String),

    /// Daily token budget for the named LLM tier is exhausted.
    #[error("Token budget exhausted for {0}")]
    BudgetExhausted(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl EngramError {
    /// Transient failures degrade gracefully; everything else surfaces.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngramError::TransientExternal { .. }
                | EngramError::CircuitOpen(_)
                | EngramError::BudgetExhausted(_)
        )
    }
}
