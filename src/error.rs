use thiserror::Error;
use uuid::Uuid;

use crate::models::alert::AlertType;

/// Failures raised by the persistence backends (ledger, registry,
/// telemetry store, push tokens).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("an open {alert_type} alert already exists for animal {animal_id}")]
    Conflict { animal_id: Uuid, alert_type: AlertType },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row in {table}: {message}")]
    Corrupt { table: &'static str, message: String },

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn corrupt(table: &'static str, message: impl Into<String>) -> Self {
        Self::Corrupt {
            table,
            message: message.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Reasons an inbound payload is dropped before reaching the pipeline.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid protobuf payload: {0}")]
    Protobuf(#[from] prost::DecodeError),

    #[error("missing device identifier")]
    MissingImei,

    #[error("malformed IMEI '{0}' (expected 15 digits)")]
    MalformedImei(String),

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("invalid value for '{field}': {value}")]
    InvalidField { field: &'static str, value: String },
}

impl DecodeError {
    pub fn invalid(field: &'static str, value: impl ToString) -> Self {
        Self::InvalidField {
            field,
            value: value.to_string(),
        }
    }
}

/// Push provider failures. Always logged, never propagated to ingestion.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("push transport rejected the message: {0}")]
    Transport(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
