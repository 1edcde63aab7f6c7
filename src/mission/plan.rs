//! Fixed waypoint mission built from configuration.

use ::mavlink::common::{MavCmd, MavFrame, MISSION_ITEM_INT_DATA};

use crate::config::{MissionConfig, WaypointConfig};

/// Initial bearing from one point to another, degrees in `[0, 360)`.
#[must_use]
pub fn bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lat2) = (lat1.to_radians(), lat2.to_radians());
    let d_lon = (lon2 - lon1).to_radians();
    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();
    y.atan2(x).to_degrees().rem_euclid(360.0)
}

/// One waypoint with its commanded heading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedWaypoint {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Altitude relative to home in metres.
    pub alt: f32,
    /// Heading in degrees.
    pub yaw_deg: f32,
}

/// Ordered waypoints plus acceptance radius.
#[derive(Debug, Clone, PartialEq)]
pub struct MissionPlan {
    waypoints: Vec<PlannedWaypoint>,
    accept_radius: f32,
}

impl MissionPlan {
    /// Plan from the configured mission.
    ///
    /// Each waypoint faces the next one; the last keeps the heading of the
    /// final leg, and a single waypoint faces north.
    #[must_use]
    pub fn from_config(config: &MissionConfig) -> Self {
        Self::new(&config.waypoints, config.accept_radius)
    }

    /// Plan from explicit waypoints.
    #[must_use]
    pub fn new(points: &[WaypointConfig], accept_radius: f32) -> Self {
        let waypoints = points
            .iter()
            .enumerate()
            .map(|(i, wp)| {
                let yaw = match (points.get(i + 1), i.checked_sub(1).and_then(|p| points.get(p))) {
                    (Some(next), _) => bearing_deg(wp.lat, wp.lon, next.lat, next.lon),
                    (None, Some(prev)) => bearing_deg(prev.lat, prev.lon, wp.lat, wp.lon),
                    (None, None) => 0.0,
                };
                #[allow(clippy::cast_possible_truncation)]
                let yaw_deg = yaw as f32;
                PlannedWaypoint {
                    lat: wp.lat,
                    lon: wp.lon,
                    alt: wp.alt,
                    yaw_deg,
                }
            })
            .collect();
        Self {
            waypoints,
            accept_radius,
        }
    }

    /// Planned waypoints in order.
    #[must_use]
    pub fn waypoints(&self) -> &[PlannedWaypoint] {
        &self.waypoints
    }

    /// Number of mission items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    /// Whether the plan has no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    /// `MISSION_ITEM_INT` for sequence number `seq`, if it exists.
    #[must_use]
    pub fn item(
        &self,
        seq: u16,
        target_system: u8,
        target_component: u8,
    ) -> Option<MISSION_ITEM_INT_DATA> {
        let wp = self.waypoints.get(usize::from(seq))?;
        Some(MISSION_ITEM_INT_DATA {
            param1: 0.0,
            param2: self.accept_radius,
            param3: 0.0,
            param4: wp.yaw_deg,
            x: scale_degrees(wp.lat),
            y: scale_degrees(wp.lon),
            z: wp.alt,
            seq,
            command: MavCmd::MAV_CMD_NAV_WAYPOINT,
            target_system,
            target_component,
            frame: MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT_INT,
            current: 0,
            autocontinue: 1,
            ..MISSION_ITEM_INT_DATA::default()
        })
    }
}

#[allow(clippy::cast_possible_truncation)]
fn scale_degrees(degrees: f64) -> i32 {
    (degrees * 1e7).round() as i32
}
