use std::time::Duration;

use sitl_fleet::config::{GlobalConfig, ParamDefaults};
use sitl_fleet::AppError;

fn sample_toml(root: &str) -> String {
    format!(
        r#"
[paths]
root_dir = '{root}'
working_dir = "work"
build_dir = "build"
images_dir = "images"
param_file = "params.json"

[simulation]
speed = 4.0
instance_count = 3
daemon = true
base_port = 61000

[pool]
max_concurrency = 2

[telemetry]
read_timeout_ms = 250

[settle]
mission_ms = 100
params_ms = 50

[checkpoint]
criu_binary = "/usr/sbin/criu"
use_sudo = false
leave_running = true

[mission]
accept_radius = 2.5

[[mission.waypoints]]
lat = 10.0
lon = 20.0
alt = 5.0
"#
    )
}

fn minimal_toml(root: &str) -> String {
    format!(
        r#"
[paths]
root_dir = '{root}'
working_dir = "work"
build_dir = "build"
images_dir = "images"
param_file = "params.json"

[simulation]
"#
    )
}

#[test]
fn parses_valid_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_str().expect("utf8 path");

    let config = GlobalConfig::from_toml_str(&sample_toml(root)).expect("config parses");

    assert!((config.simulation.speed - 4.0).abs() < f64::EPSILON);
    assert_eq!(config.simulation.instance_count, 3);
    assert_eq!(config.simulation.base_port, 61000);
    assert_eq!(config.pool.max_concurrency, 2);
    assert_eq!(config.telemetry.read_timeout_ms, 250);
    assert_eq!(config.settle.mission_ms, 100);
    assert_eq!(config.settle.params_ms, 50);
    assert_eq!(config.checkpoint.criu_binary, "/usr/sbin/criu");
    assert!(!config.checkpoint.use_sudo);
    assert!(config.checkpoint.leave_running);
    assert_eq!(config.mission.waypoints.len(), 1);
    assert!((config.mission.accept_radius - 2.5).abs() < f32::EPSILON);
}

#[test]
fn defaults_fill_omitted_sections() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_str().expect("utf8 path");

    let config = GlobalConfig::from_toml_str(&minimal_toml(root)).expect("config parses");

    assert!((config.simulation.speed - 1.0).abs() < f64::EPSILON);
    assert_eq!(config.simulation.instance_count, 1);
    assert!(config.simulation.daemon);
    assert_eq!(config.simulation.base_port, 60000);
    assert_eq!(config.simulation.autostart_id, 10040);
    assert_eq!(config.simulation.simulator, "sihsim");
    assert_eq!(config.pool.max_concurrency, 0);
    assert_eq!(config.telemetry.read_timeout_ms, 500);
    assert_eq!(config.telemetry.param_send_interval_ms, 100);
    assert_eq!(config.settle.mission_ms, 15_000);
    assert_eq!(config.settle.params_ms, 5_000);
    assert_eq!(config.checkpoint.criu_binary, "criu");
    assert!(config.checkpoint.use_sudo);
    assert!(!config.checkpoint.leave_running);
    assert_eq!(config.mission.waypoints.len(), 2);
    assert!((config.mission.waypoints[0].lat - 45.467_117_2).abs() < 1e-9);
    assert!((config.mission.accept_radius - 5.0).abs() < f32::EPSILON);
}

#[test]
fn relative_paths_resolve_against_root() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_str().expect("utf8 path");

    let config = GlobalConfig::from_toml_str(&minimal_toml(root)).expect("config parses");

    assert_eq!(config.paths.working_dir, temp.path().join("work"));
    assert_eq!(config.paths.build_dir, temp.path().join("build"));
    assert_eq!(config.paths.images_dir, temp.path().join("images"));
    assert_eq!(config.paths.param_file, temp.path().join("params.json"));
    assert_eq!(
        config.simulator_binary(),
        temp.path().join("build").join("bin").join("px4")
    );
}

#[test]
fn derived_durations_follow_settings() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_str().expect("utf8 path");

    let config = GlobalConfig::from_toml_str(&sample_toml(root)).expect("config parses");

    assert_eq!(config.score_window(), Duration::from_millis(250));
    assert_eq!(config.read_timeout(), Duration::from_millis(250));
    assert_eq!(config.heartbeat_timeout(), Duration::from_millis(30_000));
}

#[test]
fn telemetry_port_offsets_from_base() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_str().expect("utf8 path");
    let config = GlobalConfig::from_toml_str(&sample_toml(root)).expect("config parses");

    assert_eq!(config.telemetry_port(0).expect("port"), 61000);
    assert_eq!(config.telemetry_port(7).expect("port"), 61007);
    assert!(matches!(
        config.telemetry_port(10_000),
        Err(AppError::Config(_))
    ));
}

#[test]
fn rejects_non_positive_speed() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_str().expect("utf8 path");
    let toml = sample_toml(root).replace("speed = 4.0", "speed = 0.0");

    let result = GlobalConfig::from_toml_str(&toml);
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("speed")));
}

#[test]
fn rejects_zero_instance_count() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_str().expect("utf8 path");
    let toml = sample_toml(root).replace("instance_count = 3", "instance_count = 0");

    let result = GlobalConfig::from_toml_str(&toml);
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("instance_count")));
}

#[test]
fn rejects_fleet_that_overflows_port_range() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_str().expect("utf8 path");
    let toml = sample_toml(root)
        .replace("base_port = 61000", "base_port = 65530")
        .replace("instance_count = 3", "instance_count = 10");

    assert!(matches!(
        GlobalConfig::from_toml_str(&toml),
        Err(AppError::Config(_))
    ));
}

#[test]
fn rejects_image_dir_equal_to_working_dir() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_str().expect("utf8 path");
    let toml = minimal_toml(root).replace(r#"images_dir = "images""#, r#"images_dir = "work""#);

    let result = GlobalConfig::from_toml_str(&toml);
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("images_dir")));
}

#[test]
fn invalid_toml_is_config_error() {
    let result = GlobalConfig::from_toml_str("[paths\nroot_dir = 1");
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn missing_config_file_is_config_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let result = GlobalConfig::load_from_path(temp.path().join("absent.toml"));
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn load_from_path_reads_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_str().expect("utf8 path");
    let path = temp.path().join("config.toml");
    std::fs::write(&path, sample_toml(root)).expect("write config");

    let config = GlobalConfig::load_from_path(&path).expect("config loads");
    assert_eq!(config.simulation.instance_count, 3);
}

// ── Parameter file ──────────────────────────────────────────

#[test]
fn param_file_preserves_key_order() {
    let params = ParamDefaults::from_json_str(
        r#"{"MC_ROLLRATE_P": 0.15, "MC_PITCHRATE_P": 0.15, "MPC_XY_P": 0.95, "A_LAST": 1}"#,
    )
    .expect("params parse");

    let names: Vec<&str> = params.names().collect();
    assert_eq!(
        names,
        vec!["MC_ROLLRATE_P", "MC_PITCHRATE_P", "MPC_XY_P", "A_LAST"]
    );
    assert_eq!(params.default_vector(), vec![0.15, 0.15, 0.95, 1.0]);
    assert_eq!(params.len(), 4);
    assert!(!params.is_empty());
}

#[test]
fn param_file_rejects_non_numeric_default() {
    let result = ParamDefaults::from_json_str(r#"{"MC_ROLLRATE_P": "fast"}"#);
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("MC_ROLLRATE_P")));
}

#[test]
fn param_file_rejects_overlong_name() {
    let result = ParamDefaults::from_json_str(r#"{"THIS_NAME_IS_TOO_LONG": 1.0}"#);
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn param_file_rejects_non_object() {
    assert!(matches!(
        ParamDefaults::from_json_str("[1, 2, 3]"),
        Err(AppError::Config(_))
    ));
}

#[test]
fn zip_values_pairs_in_order() {
    let params = ParamDefaults::from_json_str(r#"{"A": 1, "B": 2, "C": 3}"#).expect("parse");

    let pairs = params.zip_values(&[9.8, 9.4, 0.1]).expect("zip");
    assert_eq!(pairs, vec![("A", 9.8), ("B", 9.4), ("C", 0.1)]);
}

#[test]
fn zip_values_allows_shorter_vector() {
    let params = ParamDefaults::from_json_str(r#"{"A": 1, "B": 2, "C": 3}"#).expect("parse");

    let pairs = params.zip_values(&[0.5]).expect("zip");
    assert_eq!(pairs, vec![("A", 0.5)]);
}

#[test]
fn zip_values_rejects_longer_vector() {
    let params = ParamDefaults::from_json_str(r#"{"A": 1}"#).expect("parse");

    assert!(matches!(
        params.zip_values(&[1.0, 2.0]),
        Err(AppError::Param(_))
    ));
}

#[test]
fn load_param_defaults_uses_configured_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_str().expect("utf8 path");
    std::fs::write(temp.path().join("params.json"), r#"{"MPC_Z_P": 1.0}"#).expect("write");
    let config = GlobalConfig::from_toml_str(&minimal_toml(root)).expect("config parses");

    let params = config.load_param_defaults().expect("params load");
    assert_eq!(params.names().collect::<Vec<_>>(), vec!["MPC_Z_P"]);
}
