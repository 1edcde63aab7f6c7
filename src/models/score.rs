//! Per-instance scoring outcomes.

use serde::Serialize;

/// Score reported for an instance whose telemetry could not be scored.
pub const FAILURE_SENTINEL: f64 = 0.0;

/// Why an instance produced no score.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum FailureReason {
    /// A required telemetry message did not arrive within the read timeout.
    TelemetryTimeout(String),
    /// The telemetry channel could not be opened.
    ConnectionFailed(String),
    /// The window elapsed before a single complete sample was taken.
    NoSamples,
    /// The window averaged to a NaN or infinite divergence.
    NonFiniteTelemetry,
    /// The scoring task itself failed.
    TaskFailed(String),
}

/// Result of one scoring window.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ScoreOutcome {
    /// Normalized score in `[0, 100]` over `samples` aligned samples.
    Scored {
        /// Weighted normalized divergence.
        score: f64,
        /// Number of aligned samples averaged.
        samples: u32,
    },
    /// Scoring was abandoned; the sentinel stands in for the score.
    Failed {
        /// Failure cause, for logs and reports.
        reason: FailureReason,
    },
}

/// One instance's score for one trial.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ScoreRecord {
    /// Fleet index the score belongs to.
    pub instance_index: usize,
    /// Scored value or failure reason.
    pub outcome: ScoreOutcome,
}

impl ScoreRecord {
    /// Successful record.
    #[must_use]
    pub fn scored(instance_index: usize, score: f64, samples: u32) -> Self {
        Self {
            instance_index,
            outcome: ScoreOutcome::Scored { score, samples },
        }
    }

    /// Failed record carrying the sentinel score.
    #[must_use]
    pub fn failed(instance_index: usize, reason: FailureReason) -> Self {
        Self {
            instance_index,
            outcome: ScoreOutcome::Failed { reason },
        }
    }

    /// Score value, [`FAILURE_SENTINEL`] on failure.
    #[must_use]
    pub fn score(&self) -> f64 {
        match self.outcome {
            ScoreOutcome::Scored { score, .. } => score,
            ScoreOutcome::Failed { .. } => FAILURE_SENTINEL,
        }
    }

    /// Whether scoring failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, ScoreOutcome::Failed { .. })
    }
}
