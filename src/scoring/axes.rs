//! Twelve-axis state vectors, divergence accumulation, and score reduction.

use std::f64::consts::PI;
use std::ops::{Index, Sub};

use ::mavlink::common::{
    ATTITUDE_DATA, ATTITUDE_TARGET_DATA, LOCAL_POSITION_NED_DATA, POSITION_TARGET_LOCAL_NED_DATA,
};

/// Number of scored axes.
pub const AXIS_COUNT: usize = 12;

/// Axis names in vector order, used for logging.
pub const AXIS_NAMES: [&str; AXIS_COUNT] = [
    "x",
    "y",
    "z",
    "vx",
    "vy",
    "vz",
    "roll",
    "pitch",
    "yaw",
    "rollspeed",
    "pitchspeed",
    "yawspeed",
];

/// Position (m), velocity (m/s), attitude (rad), and body rates (rad/s).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AxisVector(pub [f64; AXIS_COUNT]);

impl AxisVector {
    /// All-zero vector.
    pub const ZERO: Self = Self([0.0; AXIS_COUNT]);

    /// Component-wise absolute value.
    #[must_use]
    pub fn abs(self) -> Self {
        Self(self.0.map(f64::abs))
    }

    /// Whether every component is neither NaN nor infinite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    /// Iterate components in axis order.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.0.iter().copied()
    }
}

impl Sub for AxisVector {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        let mut out = [0.0; AXIS_COUNT];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.0[i] - rhs.0[i];
        }
        Self(out)
    }
}

impl Index<usize> for AxisVector {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.0[index]
    }
}

/// Per-axis normalization bounds and weights.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    /// Divergence mapped to score 0.
    pub min: AxisVector,
    /// Divergence mapped to score 100.
    pub max: AxisVector,
    /// Relative weight of each axis in the combined score.
    pub weights: AxisVector,
}

impl Default for Calibration {
    fn default() -> Self {
        let deg = PI / 180.0;
        Self {
            min: AxisVector::ZERO,
            max: AxisVector([
                9.18,
                9.18,
                3.49,
                4.62,
                4.62,
                4.21,
                2.03 * deg,
                4.31 * deg,
                6.23 * deg,
                3.65 * deg,
                15.41 * deg,
                14.32 * deg,
            ]),
            weights: AxisVector([1.0; AXIS_COUNT]),
        }
    }
}

impl Calibration {
    /// Map each averaged divergence into `[0, 100]`.
    #[must_use]
    pub fn normalize(&self, average: &AxisVector) -> AxisVector {
        let mut out = [0.0; AXIS_COUNT];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = normalize_axis(average[i], self.min[i], self.max[i]);
        }
        AxisVector(out)
    }

    /// Weighted mean of normalized axis scores.
    #[must_use]
    pub fn combine(&self, normalized: &AxisVector) -> f64 {
        let total_weight: f64 = self.weights.iter().sum();
        if total_weight <= 0.0 {
            return 0.0;
        }
        let weighted: f64 = normalized
            .iter()
            .zip(self.weights.iter())
            .map(|(score, weight)| score * weight)
            .sum();
        weighted / total_weight
    }

    /// Normalize then combine.
    #[must_use]
    pub fn score(&self, average: &AxisVector) -> f64 {
        self.combine(&self.normalize(average))
    }
}

/// `100 * (value - min) / (max - min)` clamped to `[0, 100]`.
#[must_use]
pub fn normalize_axis(value: f64, min: f64, max: f64) -> f64 {
    let span = max - min;
    if span <= 0.0 {
        return if value > min { 100.0 } else { 0.0 };
    }
    (100.0 * (value - min) / span).clamp(0.0, 100.0)
}

/// Roll and pitch (rad) of a `[w, x, y, z]` quaternion.
#[must_use]
pub fn quaternion_roll_pitch(q: [f32; 4]) -> (f64, f64) {
    let [w, x, y, z] = q.map(f64::from);
    let roll = (2.0 * (w * x + y * z)).atan2(1.0 - 2.0 * (x * x + y * y));
    let pitch = (2.0 * (w * y - z * x)).clamp(-1.0, 1.0).asin();
    (roll, pitch)
}

/// Estimated vehicle state from `LOCAL_POSITION_NED` and `ATTITUDE`.
#[must_use]
pub fn current_state(
    position: &LOCAL_POSITION_NED_DATA,
    attitude: &ATTITUDE_DATA,
) -> AxisVector {
    AxisVector(
        [
            position.x,
            position.y,
            position.z,
            position.vx,
            position.vy,
            position.vz,
            attitude.roll,
            attitude.pitch,
            attitude.yaw,
            attitude.rollspeed,
            attitude.pitchspeed,
            attitude.yawspeed,
        ]
        .map(f64::from),
    )
}

/// Commanded state from `POSITION_TARGET_LOCAL_NED` and `ATTITUDE_TARGET`.
///
/// Roll and pitch come from the target quaternion; yaw from the position target.
#[must_use]
pub fn setpoint_state(
    position: &POSITION_TARGET_LOCAL_NED_DATA,
    attitude: &ATTITUDE_TARGET_DATA,
) -> AxisVector {
    let (roll, pitch) = quaternion_roll_pitch(attitude.q);
    AxisVector([
        f64::from(position.x),
        f64::from(position.y),
        f64::from(position.z),
        f64::from(position.vx),
        f64::from(position.vy),
        f64::from(position.vz),
        roll,
        pitch,
        f64::from(position.yaw),
        f64::from(attitude.body_roll_rate),
        f64::from(attitude.body_pitch_rate),
        f64::from(attitude.body_yaw_rate),
    ])
}

/// Running sum of absolute divergences over one window.
#[derive(Debug, Clone, Default)]
pub struct DivergenceAccumulator {
    total: AxisVector,
    samples: u32,
}

impl DivergenceAccumulator {
    /// Add `|current - setpoint|` as one sample.
    pub fn add(&mut self, current: AxisVector, setpoint: AxisVector) {
        let divergence = (current - setpoint).abs();
        for (slot, value) in self.total.0.iter_mut().zip(divergence.iter()) {
            *slot += value;
        }
        self.samples = self.samples.saturating_add(1);
    }

    /// Samples accumulated so far.
    #[must_use]
    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Per-axis mean divergence, `None` before the first sample.
    #[must_use]
    pub fn average(&self) -> Option<AxisVector> {
        if self.samples == 0 {
            return None;
        }
        let n = f64::from(self.samples);
        Some(AxisVector(self.total.0.map(|sum| sum / n)))
    }
}
