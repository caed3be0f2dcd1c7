//! Error types for the faucet service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Which cooldown key blocked a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownKind {
    Identity,
    Address,
}

impl fmt::Display for CooldownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CooldownKind::Identity => f.write_str("requester"),
            CooldownKind::Address => f.write_str("address"),
        }
    }
}

/// Faucet service errors
#[derive(Error, Debug)]
pub enum FaucetError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Human verification failed")]
    VerificationFailed,

    #[error("Cooldown active for {0}")]
    Cooldown(CooldownKind),

    #[error("Transfer submission failed: {0}")]
    Submission(String),

    /// Funds left the faucet but the cooldown was not recorded.
    #[error("Ledger commit failed after tx {tx_hash} to {address} (identity {identity}, ts {timestamp}): {source}")]
    Consistency {
        identity: String,
        address: String,
        tx_hash: String,
        timestamp: i64,
        #[source]
        source: Box<FaucetError>,
    },

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FaucetError {
    /// Stable, client-facing reason code.
    pub fn reason(&self) -> &'static str {
        match self {
            FaucetError::InvalidAddress(_) => "invalid_address",
            FaucetError::VerificationFailed => "verification_failed",
            FaucetError::Cooldown(CooldownKind::Identity) => "cooldown_identity",
            FaucetError::Cooldown(CooldownKind::Address) => "cooldown_address",
            FaucetError::Submission(_) => "submission_error",
            FaucetError::Consistency { .. }
            | FaucetError::Database(_)
            | FaucetError::Rpc(_)
            | FaucetError::Config(_)
            | FaucetError::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            FaucetError::InvalidAddress(_) | FaucetError::VerificationFailed => StatusCode::BAD_REQUEST,
            FaucetError::Cooldown(_) => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to the requester. Internal diagnostics stay in the logs.
    fn public_message(&self) -> String {
        match self {
            FaucetError::InvalidAddress(_) => "Invalid address".to_string(),
            FaucetError::VerificationFailed => "Human verification failed".to_string(),
            FaucetError::Cooldown(kind) => {
                format!("Only one request per cooldown window is allowed for this {}", kind)
            }
            FaucetError::Submission(_) => "Faucet failed to send the transfer, please retry".to_string(),
            _ => "Internal error".to_string(),
        }
    }
}

impl IntoResponse for FaucetError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.public_message(),
            "reason": self.reason(),
        }));

        (self.status_code(), body).into_response()
    }
}

pub type FaucetResult<T> = Result<T, FaucetError>;
