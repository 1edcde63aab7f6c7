//! Mission upload and parameter injection over a telemetry channel.

use std::time::Duration;

use ::mavlink::common::{
    MavCmd, MavMessage, MavMissionResult, MavModeFlag, MavResult, COMMAND_LONG_DATA,
    MISSION_COUNT_DATA,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::plan::MissionPlan;
use crate::mavlink::codec::GCS_SYSTEM_ID;
use crate::mavlink::messages::{
    param_set_real32, PX4_CUSTOM_MAIN_MODE_AUTO, PX4_CUSTOM_SUB_MODE_AUTO_MISSION,
};
use crate::mavlink::{recv_until, TelemetryChannel};
use crate::{AppError, Result};

/// How long to wait for a `COMMAND_ACK` before carrying on.
pub const COMMAND_ACK_WAIT: Duration = Duration::from_secs(1);

/// Autopilot address learned from its heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    /// Autopilot system id.
    pub system_id: u8,
    /// Autopilot component id.
    pub component_id: u8,
}

/// Wait for the first autopilot heartbeat.
///
/// Heartbeats from ground-station ids are ignored.
///
/// # Errors
///
/// Returns `AppError::Timeout` if no heartbeat arrives within `timeout`.
pub async fn wait_heartbeat(channel: &mut dyn TelemetryChannel, timeout: Duration) -> Result<Target> {
    recv_until(channel, timeout, "HEARTBEAT", |frame| match &frame.message {
        MavMessage::HEARTBEAT(_) if frame.system_id != GCS_SYSTEM_ID => Some(Target {
            system_id: frame.system_id,
            component_id: frame.component_id,
        }),
        _ => None,
    })
    .await
}

/// Upload `plan`, switch to mission mode, and start the mission.
///
/// The upload follows the autopilot's item requests until it acknowledges
/// the mission. Missing command acknowledgements are logged only.
///
/// # Errors
///
/// Returns `AppError::Mission` if the plan is empty, the autopilot requests
/// an item that does not exist, or rejects the mission;
/// `AppError::Timeout` if the exchange does not finish within `timeout`.
pub async fn upload_and_start(
    channel: &mut dyn TelemetryChannel,
    target: Target,
    plan: &MissionPlan,
    timeout: Duration,
) -> Result<()> {
    upload(channel, target, plan, timeout).await?;

    send_command(
        channel,
        target,
        MavCmd::MAV_CMD_DO_SET_MODE,
        [
            f32::from(MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits()),
            f32::from(PX4_CUSTOM_MAIN_MODE_AUTO),
            f32::from(PX4_CUSTOM_SUB_MODE_AUTO_MISSION),
            0.0,
            0.0,
            0.0,
            0.0,
        ],
    )
    .await?;
    send_command(channel, target, MavCmd::MAV_CMD_MISSION_START, [0.0; 7]).await?;
    info!(items = plan.len(), "mission started");
    Ok(())
}

async fn upload(
    channel: &mut dyn TelemetryChannel,
    target: Target,
    plan: &MissionPlan,
    timeout: Duration,
) -> Result<()> {
    let count = u16::try_from(plan.len())
        .ok()
        .filter(|&count| count > 0)
        .ok_or_else(|| AppError::Mission(format!("cannot upload {} items", plan.len())))?;

    channel
        .send(MavMessage::MISSION_COUNT(MISSION_COUNT_DATA {
            count,
            target_system: target.system_id,
            target_component: target.component_id,
            ..MISSION_COUNT_DATA::default()
        }))
        .await?;

    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let reply = recv_until(channel, remaining, "mission request or ack", |frame| {
            match &frame.message {
                MavMessage::MISSION_REQUEST(req) => Some(Ok(req.seq)),
                MavMessage::MISSION_REQUEST_INT(req) => Some(Ok(req.seq)),
                MavMessage::MISSION_ACK(ack) => Some(Err(ack.mavtype)),
                _ => None,
            }
        })
        .await?;

        match reply {
            Ok(seq) => {
                let item = plan
                    .item(seq, target.system_id, target.component_id)
                    .ok_or_else(|| {
                        AppError::Mission(format!("autopilot requested missing item {seq}"))
                    })?;
                debug!(seq, "sending mission item");
                channel.send(MavMessage::MISSION_ITEM_INT(item)).await?;
            }
            Err(MavMissionResult::MAV_MISSION_ACCEPTED) => return Ok(()),
            Err(result) => {
                return Err(AppError::Mission(format!(
                    "mission rejected with result {result:?}"
                )))
            }
        }
    }
}

async fn send_command(
    channel: &mut dyn TelemetryChannel,
    target: Target,
    command: MavCmd,
    params: [f32; 7],
) -> Result<()> {
    channel
        .send(MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
            param1: params[0],
            param2: params[1],
            param3: params[2],
            param4: params[3],
            param5: params[4],
            param6: params[5],
            param7: params[6],
            command,
            target_system: target.system_id,
            target_component: target.component_id,
            confirmation: 0,
        }))
        .await?;

    let ack = recv_until(channel, COMMAND_ACK_WAIT, "COMMAND_ACK", |frame| {
        match &frame.message {
            MavMessage::COMMAND_ACK(ack) if ack.command == command => Some(ack.result),
            _ => None,
        }
    })
    .await;

    match ack {
        Ok(MavResult::MAV_RESULT_ACCEPTED) => debug!(?command, "command accepted"),
        Ok(result) => warn!(?command, ?result, "command not accepted"),
        Err(AppError::Timeout(_)) => debug!(?command, "no command acknowledgement"),
        Err(err) => return Err(err),
    }
    Ok(())
}

/// Send one `PARAM_SET` per `(name, value)`, pausing `interval` after each.
///
/// # Errors
///
/// Returns the channel's send error; parameters already sent stay applied.
pub async fn apply_params(
    channel: &mut dyn TelemetryChannel,
    target: Target,
    params: &[(&str, f32)],
    interval: Duration,
) -> Result<usize> {
    for &(name, value) in params {
        channel
            .send(MavMessage::PARAM_SET(param_set_real32(
                target.system_id,
                target.component_id,
                name,
                value,
            )))
            .await
            .map_err(|err| AppError::Param(format!("failed to set {name}: {err}")))?;
        debug!(name, value, "parameter sent");
        tokio::time::sleep(interval).await;
    }
    Ok(params.len())
}
