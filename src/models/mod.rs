//! Domain model module declarations.

pub mod instance;
pub mod score;
pub mod trial;

pub use instance::Instance;
pub use score::{FailureReason, ScoreOutcome, ScoreRecord, FAILURE_SENTINEL};
pub use trial::TrialReport;
