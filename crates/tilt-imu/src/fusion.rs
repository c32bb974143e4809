use crate::error::ImuError;
use crate::types::{OrientationRecord, RawSample, Vector3};
use std::collections::{vec_deque, VecDeque};
use std::f64::consts::PI;

pub const ACCEL_CUTOFF_HZ: f64 = 20.0;
pub const GYRO_CUTOFF_HZ: f64 = 100.0;
/// Weight of the gyro prediction in the complementary blend.
pub const COMPLEMENTARY_ALPHA: f64 = 0.96;

/// Tuning for [`OrientationEstimator`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionSettings {
    pub accel_cutoff_hz: f64,
    pub gyro_cutoff_hz: f64,
    pub complementary_alpha: f64,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            accel_cutoff_hz: ACCEL_CUTOFF_HZ,
            gyro_cutoff_hz: GYRO_CUTOFF_HZ,
            complementary_alpha: COMPLEMENTARY_ALPHA,
        }
    }
}

/// Exponential low-pass filter whose weight follows the sample interval.
///
/// The very first call returns its input untouched but seeds the state
/// with `alpha * input`, so the second output is pulled towards zero.
/// That one-sample dip is part of the expected output.
#[derive(Debug, Clone)]
pub struct LowPassFilter {
    cutoff_angular_freq: f64,
    last_output: Option<Vector3>,
}

impl LowPassFilter {
    pub fn new(cutoff_hz: f64) -> Result<Self, ImuError> {
        if !(cutoff_hz.is_finite() && cutoff_hz > 0.0) {
            return Err(ImuError::InvalidCutoff(cutoff_hz));
        }
        Ok(Self {
            cutoff_angular_freq: cutoff_hz / (2.0 * PI),
            last_output: None,
        })
    }

    /// Filter `input` observed `dt_s` seconds after the previous call.
    pub fn apply(&mut self, input: Vector3, dt_s: f64) -> Vector3 {
        let dt_s = dt_s.max(0.0);
        let alpha = dt_s / (1.0 / self.cutoff_angular_freq + dt_s);

        match self.last_output {
            None => {
                self.last_output = Some(input.scale(alpha));
                input
            }
            Some(previous) => {
                let output = input.scale(alpha).add(previous.scale(1.0 - alpha));
                self.last_output = Some(output);
                output
            }
        }
    }
}

/// Tilt estimation by complementary filtering of gyro and gravity.
///
/// Feed calibrated samples via `update`, then collect the emitted records
/// via `drain`. Yaw about the gravity axis is never corrected, it comes
/// from gyro integration alone.
#[derive(Debug)]
pub struct OrientationEstimator {
    accel_filter: LowPassFilter,
    gyro_filter: LowPassFilter,
    complementary_alpha: f64,
    elapsed_time_ms: f64,
    last_timestamp: Option<u32>,
    unfiltered_orientation: Vector3,
    low_pass_gyro_orientation: Vector3,
    fused_orientation: Vector3,
    pending: VecDeque<OrientationRecord>,
}

impl OrientationEstimator {
    pub fn new() -> Self {
        Self::build(
            LowPassFilter {
                cutoff_angular_freq: ACCEL_CUTOFF_HZ / (2.0 * PI),
                last_output: None,
            },
            LowPassFilter {
                cutoff_angular_freq: GYRO_CUTOFF_HZ / (2.0 * PI),
                last_output: None,
            },
            COMPLEMENTARY_ALPHA,
        )
    }

    pub fn with_settings(settings: FusionSettings) -> Result<Self, ImuError> {
        let alpha = settings.complementary_alpha;
        if !(0.0..=1.0).contains(&alpha) {
            return Err(ImuError::InvalidBlendWeight(alpha));
        }
        Ok(Self::build(
            LowPassFilter::new(settings.accel_cutoff_hz)?,
            LowPassFilter::new(settings.gyro_cutoff_hz)?,
            alpha,
        ))
    }

    fn build(accel_filter: LowPassFilter, gyro_filter: LowPassFilter, alpha: f64) -> Self {
        Self {
            accel_filter,
            gyro_filter,
            complementary_alpha: alpha,
            elapsed_time_ms: 0.0,
            last_timestamp: None,
            unfiltered_orientation: Vector3::ZERO,
            low_pass_gyro_orientation: Vector3::ZERO,
            fused_orientation: Vector3::ZERO,
            pending: VecDeque::new(),
        }
    }

    /// Fuse one calibrated sample and queue the resulting record.
    pub fn update(&mut self, sample: RawSample) {
        let dt_ms = match self.last_timestamp {
            Some(last) => sample.timestamp_ms.wrapping_sub(last) as f64,
            None => 0.0,
        };
        self.last_timestamp = Some(sample.timestamp_ms);
        self.elapsed_time_ms += dt_ms;
        let dt_s = dt_ms / 1000.0;

        let filtered_accel = self.accel_filter.apply(sample.accel, dt_s);
        let filtered_gyro = self.gyro_filter.apply(sample.gyro, dt_s);

        self.unfiltered_orientation = self.unfiltered_orientation.add(sample.gyro.scale(dt_s));
        self.low_pass_gyro_orientation = self
            .low_pass_gyro_orientation
            .add(filtered_gyro.scale(dt_s));

        let predicted = self.fused_orientation.add(sample.gyro.scale(dt_s));
        // Gravity says nothing about rotation around itself.
        let tilt = gravity_tilt(filtered_accel).with_x(predicted.x());

        let alpha = self.complementary_alpha;
        self.fused_orientation = predicted.scale(alpha).add(tilt.scale(1.0 - alpha));

        self.pending.push_back(OrientationRecord {
            elapsed_time_ms: self.elapsed_time_ms,
            accel: sample.accel,
            gyro: sample.gyro,
            fused_orientation: self.fused_orientation,
            integrated_gyro_orientation: self.unfiltered_orientation,
            gravity_tilt_orientation: tilt,
            low_pass_gyro_orientation: self.low_pass_gyro_orientation,
            low_pass_accel: filtered_accel,
            low_pass_gyro: filtered_gyro,
        });
    }

    /// Take every record emitted since the last drain.
    pub fn drain(&mut self) -> vec_deque::Drain<'_, OrientationRecord> {
        self.pending.drain(..)
    }

    /// Current complementary filter output (degrees).
    pub fn orientation(&self) -> Vector3 {
        self.fused_orientation
    }

    pub fn elapsed_time_ms(&self) -> f64 {
        self.elapsed_time_ms
    }
}

impl Default for OrientationEstimator {
    fn default() -> Self {
        Self::new()
    }
}

/// Orientation angles (degrees) implied by the direction of gravity.
fn gravity_tilt(accel: Vector3) -> Vector3 {
    let (x, y, z) = (accel.x(), accel.y(), accel.z());
    let roll = (-y / (x * x + z * z).sqrt()).atan();
    let pitch = (z / (x * x + y * y).sqrt()).atan();
    // Z deliberately repeats the X formula.
    Vector3::new(roll, pitch, roll).scale(180.0 / PI)
}
