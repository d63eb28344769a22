//! Error taxonomy surfaced to callers.
//!
//! Every variant carries a stable machine-readable internal code alongside the
//! human description, so the HTTP layer can emit
//! `{internalErrorCode, message, description}` without guessing. `NotFound`
//! and `TransitionNotAllowed` are routine outcomes; `Adapter` wraps the
//! upstream payload for diagnosis and maps to a distinct code range.

/// Transition-denial messages reused across the lifecycle and signature layers.
pub mod messages {
    pub const CONTRACT_MODIFICATION_NOT_ALLOWED: &str = "Contract modification not allowed";
    pub const SEND_CONTRACT_NOT_ALLOWED: &str = "Send contract not allowed";
    pub const PUT_USAGE_NOT_ALLOWED: &str = "Put usage not allowed";
    pub const USAGE_MODIFICATION_NOT_ALLOWED: &str = "Usage modification not allowed";
    pub const SEND_SETTLEMENT_NOT_ALLOWED: &str = "Send settlement not allowed";
    pub const SETTLEMENT_MODIFICATION_NOT_ALLOWED: &str = "Settlement modification not allowed";
    pub const UPDATE_SIGNATURES_NOT_ALLOWED: &str = "Update signatures not allowed";
    pub const GET_SIGNATURES_NOT_ALLOWED: &str = "Get signatures not allowed";
    pub const RECEIVED_SIGNATURE_ON_TO_MSP_ONLY: &str =
        "For RECEIVED contract update signature only allowed on toMsp";
    pub const SENT_SIGNATURE_ON_FROM_MSP_ONLY: &str =
        "For SENT contract update signature only allowed on fromMsp";
}

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("{0}")]
    TransitionNotAllowed(&'static str),
    #[error("Resource not found")]
    NotFound,
    #[error("This signature Id doesn't exist")]
    SignatureNotFound,
    #[error("Concurrent modification detected")]
    Conflict,
    #[error("Ledger adapter call failed: {0}")]
    Adapter(#[source] anyhow::Error),
    #[error("Storage failure")]
    Storage(#[from] sled::Error),
    #[error("Codec failure: {0}")]
    Codec(String),
}

impl EngineError {
    /// Stable internal code for the `{internalErrorCode, ...}` error envelope.
    pub fn internal_error_code(&self) -> u32 {
        match self {
            EngineError::Validation(_) => 2000,
            EngineError::TransitionNotAllowed(_) => 2010,
            EngineError::NotFound => 2020,
            EngineError::SignatureNotFound => 2021,
            EngineError::Conflict => 2030,
            EngineError::Adapter(_) => 3000,
            EngineError::Storage(_) => 3010,
            EngineError::Codec(_) => 3020,
        }
    }

    /// Human description paired with the code.
    pub fn description(&self) -> String {
        self.to_string()
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(value: serde_json::Error) -> Self {
        EngineError::Codec(value.to_string())
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for EngineError {
    fn from(value: minicbor::encode::Error<E>) -> Self {
        EngineError::Codec(value.to_string())
    }
}

impl From<minicbor::decode::Error> for EngineError {
    fn from(value: minicbor::decode::Error) -> Self {
        EngineError::Codec(value.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
