//! Latest-value cache of the four telemetry kinds the scorer aligns.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use ::mavlink::common::{
    MavMessage, ATTITUDE_DATA, ATTITUDE_TARGET_DATA, LOCAL_POSITION_NED_DATA,
    POSITION_TARGET_LOCAL_NED_DATA,
};

use super::axes::{current_state, setpoint_state, AxisVector};
use crate::mavlink::{recv_until, TelemetryChannel};
use crate::Result;

/// Telemetry kinds read for every sample, in read order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryKind {
    /// `ATTITUDE`
    Attitude,
    /// `ATTITUDE_TARGET`
    AttitudeTarget,
    /// `POSITION_TARGET_LOCAL_NED`
    PositionTarget,
    /// `LOCAL_POSITION_NED`
    LocalPosition,
}

impl TelemetryKind {
    /// Read order of one sample.
    pub const SAMPLE_ORDER: [Self; 4] = [
        Self::Attitude,
        Self::AttitudeTarget,
        Self::PositionTarget,
        Self::LocalPosition,
    ];

    /// MAVLink message name.
    #[must_use]
    pub fn message_name(self) -> &'static str {
        match self {
            Self::Attitude => "ATTITUDE",
            Self::AttitudeTarget => "ATTITUDE_TARGET",
            Self::PositionTarget => "POSITION_TARGET_LOCAL_NED",
            Self::LocalPosition => "LOCAL_POSITION_NED",
        }
    }
}

impl Display for TelemetryKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message_name())
    }
}

/// Most recent report of each scored kind for one instance.
#[derive(Debug, Clone, Default)]
pub struct TelemetryState {
    attitude: Option<ATTITUDE_DATA>,
    attitude_target: Option<ATTITUDE_TARGET_DATA>,
    position_target: Option<POSITION_TARGET_LOCAL_NED_DATA>,
    local_position: Option<LOCAL_POSITION_NED_DATA>,
}

impl TelemetryState {
    /// Store `message` if it is one of the scored kinds.
    pub fn observe(&mut self, message: &MavMessage) -> Option<TelemetryKind> {
        match message {
            MavMessage::ATTITUDE(m) => {
                self.attitude = Some(m.clone());
                Some(TelemetryKind::Attitude)
            }
            MavMessage::ATTITUDE_TARGET(m) => {
                self.attitude_target = Some(m.clone());
                Some(TelemetryKind::AttitudeTarget)
            }
            MavMessage::POSITION_TARGET_LOCAL_NED(m) => {
                self.position_target = Some(m.clone());
                Some(TelemetryKind::PositionTarget)
            }
            MavMessage::LOCAL_POSITION_NED(m) => {
                self.local_position = Some(m.clone());
                Some(TelemetryKind::LocalPosition)
            }
            _ => None,
        }
    }

    /// Read one fresh report of each kind, in [`TelemetryKind::SAMPLE_ORDER`].
    ///
    /// Each read has its own `timeout`; frames of other kinds received while
    /// waiting are cached but do not satisfy the wait.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Timeout`](crate::AppError::Timeout) naming the
    /// missing kind, or the channel's receive error.
    pub async fn refresh(
        &mut self,
        channel: &mut dyn TelemetryChannel,
        timeout: Duration,
    ) -> Result<()> {
        for wanted in TelemetryKind::SAMPLE_ORDER {
            recv_until(channel, timeout, wanted.message_name(), |frame| {
                (self.observe(&frame.message) == Some(wanted)).then_some(())
            })
            .await?;
        }
        Ok(())
    }

    /// Estimated state, once attitude and local position are known.
    #[must_use]
    pub fn current(&self) -> Option<AxisVector> {
        Some(current_state(
            self.local_position.as_ref()?,
            self.attitude.as_ref()?,
        ))
    }

    /// Commanded state, once both targets are known.
    #[must_use]
    pub fn setpoint(&self) -> Option<AxisVector> {
        Some(setpoint_state(
            self.position_target.as_ref()?,
            self.attitude_target.as_ref()?,
        ))
    }
}
