use axum::http::StatusCode;
use thiserror::Error;

use crate::clients::auth::AuthError;
use crate::clients::{ClientError, ObjectRef};
use crate::config::ValidationError;

/// Result type alias for pipeline operations
pub type Result<T, E = IngestError> = std::result::Result<T, E>;

/// Errors that can occur while processing a notification
#[derive(Error, Debug)]
pub enum IngestError {
    /// The envelope is malformed or lacks the object reference. The only
    /// error that is the caller's fault.
    #[error("{0}")]
    BadRequest(String),

    /// The body or its `data` payload cannot be decoded
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Object {0} not found")]
    NotFound(ObjectRef),

    /// A sink precondition is unmet (missing session id, missing dataset)
    #[error("{0}")]
    Validation(String),

    /// The sink rejected some or all of the rows
    #[error("Failed to insert rows into {table}: {details}")]
    Sink { table: String, details: String },

    #[error("CSV parse error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),
}

impl IngestError {
    /// Stable name of the error class, used in logs, metrics and failure records.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::BadRequest(_) => "BadRequest",
            IngestError::MalformedEnvelope(_) => "MalformedEnvelope",
            IngestError::NotFound(_) => "NotFound",
            IngestError::Validation(_) => "ValidationError",
            IngestError::Sink { .. } => "SinkError",
            IngestError::Csv(_) => "CsvError",
            IngestError::Serialization(_) => "SerializationError",
            IngestError::Client(_) => "ClientError",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            IngestError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Errors that prevent the service from starting
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ValidationError),

    #[error("Could not initialize credentials: {0}")]
    Auth(#[from] AuthError),

    #[error("No project id configured and none found in the credentials or the metadata server")]
    MissingProject,

    #[error("Could not build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
