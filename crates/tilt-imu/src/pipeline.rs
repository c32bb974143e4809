use crate::calibration::Calibrator;
use crate::error::ImuError;
use crate::fusion::{FusionSettings, OrientationEstimator};
use crate::types::{OrientationRecord, RawSample};
use std::collections::vec_deque;

/// Settings for the calibrate-then-fuse stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuSettings {
    /// Stationary samples averaged into the bias estimate.
    pub calibration_samples: u32,
    pub fusion: FusionSettings,
}

impl Default for ImuSettings {
    fn default() -> Self {
        Self {
            calibration_samples: 500,
            fusion: FusionSettings::default(),
        }
    }
}

/// Calibrator followed by the orientation estimator.
///
/// Samples are accepted from any origin, live or replayed, and treated
/// identically.
#[derive(Debug)]
pub struct FusionPipeline {
    calibrator: Calibrator,
    estimator: OrientationEstimator,
    samples_seen: u64,
}

impl FusionPipeline {
    pub fn new(settings: ImuSettings) -> Result<Self, ImuError> {
        Ok(Self {
            calibrator: Calibrator::new(settings.calibration_samples)?,
            estimator: OrientationEstimator::with_settings(settings.fusion)?,
            samples_seen: 0,
        })
    }

    /// Route one raw sample through calibration and, once calibrated,
    /// into the estimator.
    pub fn push(&mut self, sample: RawSample) {
        self.samples_seen += 1;
        if let Some(corrected) = self.calibrator.observe_or_correct(sample) {
            self.estimator.update(corrected);
        }
    }

    /// Records produced since the last drain.
    pub fn drain(&mut self) -> vec_deque::Drain<'_, OrientationRecord> {
        self.estimator.drain()
    }

    pub fn calibrator(&self) -> &Calibrator {
        &self.calibrator
    }

    pub fn estimator(&self) -> &OrientationEstimator {
        &self.estimator
    }

    /// Raw samples pushed so far, including those spent on calibration.
    pub fn samples_seen(&self) -> u64 {
        self.samples_seen
    }
}
