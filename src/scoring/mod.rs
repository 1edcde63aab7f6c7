//! Telemetry fitness scoring.
//!
//! Each instance is scored by one pass of a small state machine: open the
//! instance's telemetry channel, repeatedly read one fresh report of each of
//! the four scored kinds and accumulate the divergence between estimated and
//! commanded state, then reduce the window to a single normalized score.
//! A missing report fails the window immediately with the sentinel score,
//! and so does a window whose divergence is not finite.

pub mod axes;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::mavlink::{ChannelFactory, TelemetryChannel};
use crate::models::{FailureReason, ScoreRecord};
use crate::pool::WorkerPool;
use crate::AppError;

pub use axes::{AxisVector, Calibration, DivergenceAccumulator};
pub use state::{TelemetryKind, TelemetryState};

/// Windowed divergence scorer.
#[derive(Debug, Clone)]
pub struct FitnessScorer {
    read_timeout: Duration,
    window: Duration,
    calibration: Calibration,
}

impl FitnessScorer {
    /// Scorer with the default calibration table.
    #[must_use]
    pub fn new(read_timeout: Duration, window: Duration) -> Self {
        Self {
            read_timeout,
            window,
            calibration: Calibration::default(),
        }
    }

    /// Scorer using the configured read timeout and a one-simulated-second window.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self::new(config.read_timeout(), config.score_window())
    }

    /// Replace the calibration table.
    #[must_use]
    pub fn with_calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = calibration;
        self
    }

    /// Calibration in use.
    #[must_use]
    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Score one window of telemetry from an already open channel.
    pub async fn score_channel(
        &self,
        index: usize,
        channel: &mut dyn TelemetryChannel,
    ) -> ScoreRecord {
        let mut state = TelemetryState::default();
        let mut accumulator = DivergenceAccumulator::default();
        let started = Instant::now();

        loop {
            if let Err(err) = state.refresh(channel, self.read_timeout).await {
                warn!(index, %err, "scoring window abandoned");
                let reason = match err {
                    AppError::Timeout(msg) => FailureReason::TelemetryTimeout(msg),
                    other => FailureReason::ConnectionFailed(other.to_string()),
                };
                return ScoreRecord::failed(index, reason);
            }

            if let (Some(current), Some(setpoint)) = (state.current(), state.setpoint()) {
                accumulator.add(current, setpoint);
            }

            if started.elapsed() >= self.window {
                break;
            }
        }

        let Some(average) = accumulator.average() else {
            warn!(index, "scoring window closed without samples");
            return ScoreRecord::failed(index, FailureReason::NoSamples);
        };

        let normalized = self.calibration.normalize(&average);
        for (axis, value) in axes::AXIS_NAMES.iter().zip(normalized.iter()) {
            debug!(index, axis, value, "axis score");
        }
        let score = self.calibration.combine(&normalized);
        if !score.is_finite() || !average.is_finite() {
            warn!(index, score, "non-finite divergence in scoring window");
            return ScoreRecord::failed(index, FailureReason::NonFiniteTelemetry);
        }
        info!(index, score, samples = accumulator.samples(), "instance scored");
        ScoreRecord::scored(index, score, accumulator.samples())
    }

    /// Open the channel for `index` and score it.
    ///
    /// A channel that cannot be opened yields the sentinel score.
    pub async fn score_instance(&self, index: usize, factory: &dyn ChannelFactory) -> ScoreRecord {
        match factory.open(index).await {
            Ok(mut channel) => self.score_channel(index, channel.as_mut()).await,
            Err(err) => {
                warn!(index, %err, "telemetry channel unavailable");
                ScoreRecord::failed(index, FailureReason::ConnectionFailed(err.to_string()))
            }
        }
    }

    /// Score every index on the shared pool; records follow `indices` order.
    pub async fn score_fleet(
        &self,
        pool: &WorkerPool,
        factory: Arc<dyn ChannelFactory>,
        indices: &[usize],
    ) -> Vec<ScoreRecord> {
        let span = info_span!("score_fleet", count = indices.len());
        let scorer = self.clone();
        let outcomes = pool
            .run_indexed(indices.to_vec(), move |index| {
                let scorer = scorer.clone();
                let factory = Arc::clone(&factory);
                async move { Ok(scorer.score_instance(index, factory.as_ref()).await) }
            })
            .instrument(span)
            .await;

        indices
            .iter()
            .zip(outcomes)
            .map(|(&index, outcome)| {
                outcome.unwrap_or_else(|err| {
                    ScoreRecord::failed(index, FailureReason::TaskFailed(err.to_string()))
                })
            })
            .collect()
    }
}
