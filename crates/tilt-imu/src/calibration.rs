use crate::error::ImuError;
use crate::types::{RawSample, Vector3};

/// Accelerometer reading of a sensor at rest: 1 g along +X.
pub const REFERENCE_ACCEL: Vector3 = Vector3::X;
/// Gyroscope reading of a sensor at rest.
pub const REFERENCE_GYRO: Vector3 = Vector3::ZERO;

/// Static bias estimation.
///
/// The first `total_samples` readings are averaged and swallowed; every
/// later reading comes back with the averaged bias removed. Swallowed
/// samples are never corrected or re-emitted.
#[derive(Debug)]
pub struct Calibrator {
    total_samples: u32,
    state: CalibrationState,
}

#[derive(Debug)]
enum CalibrationState {
    Collecting {
        accel_sum: Vector3,
        gyro_sum: Vector3,
        sample_count: u32,
    },
    Calibrated {
        accel_offset: Vector3,
        gyro_offset: Vector3,
    },
}

impl Calibrator {
    pub fn new(total_samples: u32) -> Result<Self, ImuError> {
        if total_samples == 0 {
            return Err(ImuError::ZeroCalibrationSamples);
        }
        tracing::info!(total_samples, "Calibration started, keep the sensor still");
        Ok(Self {
            total_samples,
            state: CalibrationState::Collecting {
                accel_sum: Vector3::ZERO,
                gyro_sum: Vector3::ZERO,
                sample_count: 0,
            },
        })
    }

    /// Accumulate `sample` while collecting, or return it bias-corrected
    /// once calibrated.
    pub fn observe_or_correct(&mut self, sample: RawSample) -> Option<RawSample> {
        match &mut self.state {
            CalibrationState::Collecting {
                accel_sum,
                gyro_sum,
                sample_count,
            } => {
                *accel_sum = accel_sum.add(sample.accel);
                *gyro_sum = gyro_sum.add(sample.gyro);
                *sample_count += 1;

                if *sample_count == self.total_samples {
                    let n = *sample_count as f64;
                    let accel_offset = accel_sum.divide(n).sub(REFERENCE_ACCEL);
                    let gyro_offset = gyro_sum.divide(n).sub(REFERENCE_GYRO);
                    tracing::info!(
                        samples = self.total_samples,
                        accel_offset = ?accel_offset.to_array(),
                        gyro_offset = ?gyro_offset.to_array(),
                        "IMU calibration complete"
                    );
                    self.state = CalibrationState::Calibrated {
                        accel_offset,
                        gyro_offset,
                    };
                }
                None
            }
            CalibrationState::Calibrated {
                accel_offset,
                gyro_offset,
            } => Some(RawSample {
                timestamp_ms: sample.timestamp_ms,
                accel: sample.accel.sub(*accel_offset),
                gyro: sample.gyro.sub(*gyro_offset),
            }),
        }
    }

    /// Whether calibration is complete.
    pub fn is_calibrated(&self) -> bool {
        matches!(self.state, CalibrationState::Calibrated { .. })
    }

    /// `(accel_offset, gyro_offset)` once calibrated.
    pub fn offsets(&self) -> Option<(Vector3, Vector3)> {
        match self.state {
            CalibrationState::Calibrated {
                accel_offset,
                gyro_offset,
            } => Some((accel_offset, gyro_offset)),
            CalibrationState::Collecting { .. } => None,
        }
    }

    /// Samples collected so far, saturating at the target.
    pub fn collected(&self) -> u32 {
        match self.state {
            CalibrationState::Collecting { sample_count, .. } => sample_count,
            CalibrationState::Calibrated { .. } => self.total_samples,
        }
    }

    pub fn total_samples(&self) -> u32 {
        self.total_samples
    }
}
