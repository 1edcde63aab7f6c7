//! Integration tests for mission upload and parameter injection against the
//! simulated autopilot.

use std::time::Duration;

use mavlink::common::{MavCmd, MavMessage};
use sitl_fleet::config::{MissionConfig, ParamDefaults};
use sitl_fleet::mavlink::messages::param_name;
use sitl_fleet::mavlink::ChannelFactory;
use sitl_fleet::mission::{self, MissionPlan, Target};
use sitl_fleet::AppError;

use super::test_helpers::{AutopilotBehavior, SimulatedFleet, PARAMS_JSON};

const EXCHANGE: Duration = Duration::from_secs(1);

#[tokio::test]
async fn heartbeat_reveals_autopilot_address() {
    let fleet = SimulatedFleet::new();
    let mut channel = fleet.open(0).await.expect("open");

    let target = mission::wait_heartbeat(channel.as_mut(), EXCHANGE)
        .await
        .expect("heartbeat");
    assert_eq!(
        target,
        Target {
            system_id: 1,
            component_id: 1
        }
    );
}

#[tokio::test]
async fn silent_autopilot_times_out() {
    let fleet = SimulatedFleet::new().with_behavior(
        0,
        AutopilotBehavior {
            silent: true,
            ..AutopilotBehavior::default()
        },
    );
    let mut channel = fleet.open(0).await.expect("open");

    let err = mission::wait_heartbeat(channel.as_mut(), Duration::from_millis(50))
        .await
        .expect_err("no heartbeat");
    assert!(matches!(err, AppError::Timeout(_)));
}

#[tokio::test]
async fn upload_follows_item_requests_then_starts_mission() {
    let fleet = SimulatedFleet::new();
    let plan = MissionPlan::from_config(&MissionConfig::default());
    let mut channel = fleet.open(0).await.expect("open");

    let target = mission::wait_heartbeat(channel.as_mut(), EXCHANGE)
        .await
        .expect("heartbeat");
    mission::upload_and_start(channel.as_mut(), target, &plan, EXCHANGE)
        .await
        .expect("mission started");

    let sent = fleet.sent(0);
    assert!(matches!(&sent[0], MavMessage::MISSION_COUNT(c) if c.count == 2));
    let item_seqs: Vec<u16> = sent
        .iter()
        .filter_map(|m| match m {
            MavMessage::MISSION_ITEM_INT(item) => Some(item.seq),
            _ => None,
        })
        .collect();
    assert_eq!(item_seqs, vec![0, 1]);

    let commands: Vec<(MavCmd, [f32; 3])> = sent
        .iter()
        .filter_map(|m| match m {
            MavMessage::COMMAND_LONG(c) => Some((c.command, [c.param1, c.param2, c.param3])),
            _ => None,
        })
        .collect();
    assert_eq!(commands.len(), 2);
    assert_eq!(commands[0].0, MavCmd::MAV_CMD_DO_SET_MODE);
    assert!(commands[0]
        .1
        .iter()
        .zip([1.0_f32, 4.0, 4.0])
        .all(|(got, want)| (got - want).abs() < f32::EPSILON));
    assert_eq!(commands[1].0, MavCmd::MAV_CMD_MISSION_START);
}

#[tokio::test]
async fn rejected_mission_is_an_error() {
    let fleet = SimulatedFleet::new().with_behavior(
        0,
        AutopilotBehavior {
            reject_mission: true,
            ..AutopilotBehavior::default()
        },
    );
    let plan = MissionPlan::from_config(&MissionConfig::default());
    let mut channel = fleet.open(0).await.expect("open");
    let target = mission::wait_heartbeat(channel.as_mut(), EXCHANGE)
        .await
        .expect("heartbeat");

    let err = mission::upload_and_start(channel.as_mut(), target, &plan, EXCHANGE)
        .await
        .expect_err("rejected");
    assert!(matches!(err, AppError::Mission(_)));
    assert!(!fleet
        .sent(0)
        .iter()
        .any(|m| matches!(m, MavMessage::COMMAND_LONG(_))));
}

#[tokio::test]
async fn params_are_sent_in_declaration_order() {
    let fleet = SimulatedFleet::new();
    let defaults = ParamDefaults::from_json_str(PARAMS_JSON).expect("params");
    let values = [9.8, 9.4, 0.1];
    let pairs = defaults.zip_values(&values).expect("zip");
    let mut channel = fleet.open(3).await.expect("open");
    let target = mission::wait_heartbeat(channel.as_mut(), EXCHANGE)
        .await
        .expect("heartbeat");

    let applied = mission::apply_params(channel.as_mut(), target, &pairs, Duration::from_millis(1))
        .await
        .expect("params applied");
    assert_eq!(applied, 3);

    let sent: Vec<(String, f32)> = fleet
        .sent(3)
        .iter()
        .filter_map(|m| match m {
            MavMessage::PARAM_SET(p) => Some((param_name(&p.param_id), p.param_value)),
            _ => None,
        })
        .collect();
    let names: Vec<&str> = sent.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["MC_ROLLRATE_P", "MC_PITCHRATE_P", "MPC_XY_P"]);
    for ((_, got), want) in sent.iter().zip(values) {
        assert!((got - want).abs() < f32::EPSILON);
    }
}

#[tokio::test]
async fn unreachable_instance_fails_to_open() {
    let fleet = SimulatedFleet::new().with_unreachable(1);
    assert!(fleet.open(0).await.is_ok());
    let err = fleet.open(1).await.err().expect("unreachable");
    assert!(matches!(err, AppError::Telemetry(_)));
}
