//! Mission upload and parameter injection for simulator instances.

pub mod client;
pub mod plan;

pub use client::{apply_params, upload_and_start, wait_heartbeat, Target};
pub use plan::{bearing_deg, MissionPlan};
