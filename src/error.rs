//! Typed error taxonomy for each component boundary. Call sites that need
//! rich context wrap these in `anyhow::Result` with `.context(...)`; callers
//! that need to branch on the failure class match the variants directly.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transient exchange error: {0}")]
    Transient(String),

    #[error("order rejected: {0}")]
    LogicalReject(String),

    #[error("cancel race on order {0}: treated as success")]
    CancelRace(String),

    #[error("stream disconnected: {0}")]
    StreamDisconnect(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),
}

impl GatewayError {
    /// Cancel races are not failures from the reconciler's point of view.
    pub fn is_cancel_race(&self) -> bool {
        matches!(self, GatewayError::CancelRace(_))
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("gateway call failed: {0}")]
    Gateway(#[from] GatewayError),

    #[error("no resting order found for key")]
    NoSuchOrder,
}

#[derive(Debug, Error)]
pub enum PnlError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("match {0} not found")]
    MatchNotFound(String),

    #[error("mid-price oracle failed: {0}")]
    OracleFailed(String),
}

#[derive(Debug, Error)]
pub enum OddsError {
    #[error("odds refresh failed: {0}")]
    RefreshFailed(String),

    #[error("no bookmaker odds available")]
    NoData,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}
