#![forbid(unsafe_code)]

//! SITL fleet lifecycle, checkpoint/restore, and telemetry fitness scoring
//! for flight-controller parameter search.

pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod fleet;
pub mod mavlink;
pub mod mission;
pub mod models;
pub mod pool;
pub mod scoring;
pub mod trial;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
