//! Helpers over the `mavlink` crate's `common` dialect for the mission and
//! parameter exchanges.

use ::mavlink::common::{MavParamType, PARAM_SET_DATA};

/// Length of the fixed `param_id` character array in `PARAM_SET`.
pub const PARAM_ID_LEN: usize = 16;

/// PX4 custom main mode `AUTO`.
pub const PX4_CUSTOM_MAIN_MODE_AUTO: u8 = 4;
/// PX4 custom sub mode `AUTO_MISSION`.
pub const PX4_CUSTOM_SUB_MODE_AUTO_MISSION: u8 = 4;

/// Build a `REAL32` parameter write; names longer than 16 bytes are cut.
#[must_use]
pub fn param_set_real32(
    target_system: u8,
    target_component: u8,
    name: &str,
    value: f32,
) -> PARAM_SET_DATA {
    let mut param_id = [0u8; PARAM_ID_LEN];
    let bytes = name.as_bytes();
    let len = bytes.len().min(PARAM_ID_LEN);
    param_id[..len].copy_from_slice(&bytes[..len]);
    PARAM_SET_DATA {
        param_value: value,
        target_system,
        target_component,
        param_id,
        param_type: MavParamType::MAV_PARAM_TYPE_REAL32,
    }
}

/// Parameter name from a NUL-padded `param_id`.
#[must_use]
pub fn param_name(param_id: &[u8]) -> String {
    let end = param_id
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(param_id.len());
    String::from_utf8_lossy(&param_id[..end]).into_owned()
}
