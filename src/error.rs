//! Error types for the warranty desk.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Intake error: {0}")]
    Intake(#[from] IntakeError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Mail-intake errors.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("Message not found: {0}")]
    NotFound(String),

    #[error("Malformed message {id}: {reason}")]
    Malformed { id: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasoning-capability errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Reasoning call timed out after {0:?}")]
    Timeout(Duration),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Policy-retrieval errors.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("Index build failed: {0}")]
    IndexBuild(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pipeline orchestration errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Unknown claim: {0}")]
    UnknownClaim(String),

    #[error("Claim {claim_id} is not awaiting {expected}")]
    NotInterrupted { claim_id: String, expected: String },

    #[error("Claim {0} requires a return label before dispatch")]
    LabelRequired(String),

    #[error("Stage {stage} failed: {reason}")]
    Stage { stage: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Outbound dispatch errors.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("No recipient could be resolved")]
    NoRecipient,

    #[error("Provider {provider} failed: {reason}")]
    Provider { provider: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Artifact-rendering errors.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the warranty desk.
pub type Result<T> = std::result::Result<T, Error>;
