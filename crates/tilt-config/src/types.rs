use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Serial link to the sensor board.
    pub serial: SerialConfig,
    /// Calibration and filter tuning.
    pub imu: ImuConfig,
    /// Live preview window.
    pub preview: PreviewConfig,
    /// Capture-to-file settings.
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port name, e.g. `COM11` or `/dev/ttyACM0`.
    pub port: String,
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "COM11".into(),
            baud_rate: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImuConfig {
    /// Number of stationary samples for bias calibration.
    pub calibration_samples: u32,
    /// Accelerometer low-pass cutoff (Hz).
    pub accel_cutoff_hz: f64,
    /// Gyroscope low-pass cutoff (Hz).
    pub gyro_cutoff_hz: f64,
    /// Weight of the gyro prediction in the complementary filter (0-1).
    pub complementary_alpha: f64,
}

impl Default for ImuConfig {
    fn default() -> Self {
        Self {
            calibration_samples: 500,
            accel_cutoff_hz: 20.0,
            gyro_cutoff_hz: 100.0,
            complementary_alpha: 0.96,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Seconds of history kept for display.
    pub window_s: f64,
    /// How often the latest orientation is logged.
    pub log_interval_ms: u64,
}

impl PreviewConfig {
    pub fn window_ms(&self) -> f64 {
        self.window_s * 1000.0
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            window_s: 5.0,
            log_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Seconds of fused data to record before stopping.
    pub sampling_time_s: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sampling_time_s: 10.0,
        }
    }
}
