//! Trial report returned to the search process.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::score::ScoreRecord;

/// Outcome of one trial over a parameter batch.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct TrialReport {
    /// Unique trial identifier.
    pub trial_id: Uuid,
    /// Trial start timestamp.
    pub started_at: DateTime<Utc>,
    /// Trial end timestamp.
    pub finished_at: DateTime<Utc>,
    /// One record per parameter vector, in input order.
    pub records: Vec<ScoreRecord>,
    /// Indices whose scoring failed.
    pub failed_indices: Vec<usize>,
}

impl TrialReport {
    /// Build a report from records already ordered by index.
    #[must_use]
    pub fn new(started_at: DateTime<Utc>, records: Vec<ScoreRecord>) -> Self {
        let failed_indices = records
            .iter()
            .filter(|record| record.is_failure())
            .map(|record| record.instance_index)
            .collect();
        Self {
            trial_id: Uuid::new_v4(),
            started_at,
            finished_at: Utc::now(),
            records,
            failed_indices,
        }
    }

    /// Plain score array, index-aligned with the parameter batch.
    #[must_use]
    pub fn scores(&self) -> Vec<f64> {
        self.records.iter().map(ScoreRecord::score).collect()
    }
}
