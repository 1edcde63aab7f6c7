//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Simulator process launch, discovery, or teardown failure.
    Fleet(String),
    /// Checkpoint dump/restore or saved-image failure.
    Checkpoint(String),
    /// Telemetry channel or MAVLink framing failure.
    Telemetry(String),
    /// Mission upload or start failure.
    Mission(String),
    /// Parameter injection failure.
    Param(String),
    /// Worker pool task failure (panic or abort).
    Pool(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// A bounded wait elapsed before the awaited event arrived.
    Timeout(String),
    /// The operation was interrupted by a shutdown request.
    Cancelled(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Fleet(msg) => write!(f, "fleet: {msg}"),
            Self::Checkpoint(msg) => write!(f, "checkpoint: {msg}"),
            Self::Telemetry(msg) => write!(f, "telemetry: {msg}"),
            Self::Mission(msg) => write!(f, "mission: {msg}"),
            Self::Param(msg) => write!(f, "param: {msg}"),
            Self::Pool(msg) => write!(f, "pool: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(format!("invalid json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
