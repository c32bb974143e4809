mod types;

pub use types::*;

use anyhow::{ensure, Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "TILT_CONFIG";

const APP_DIR: &str = "tilt-app";

/// Per-user config directory, e.g. `~/.config/tilt-app/`. Created on demand.
pub fn config_dir() -> Result<PathBuf> {
    let dir = dirs::config_dir()
        .context("Could not determine config directory")?
        .join(APP_DIR);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    Ok(dir)
}

/// `$TILT_CONFIG` if set, else `<config_dir>/config.toml`.
pub fn config_path() -> Result<PathBuf> {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) => Ok(PathBuf::from(path)),
        None => Ok(config_dir()?.join("config.toml")),
    }
}

pub fn load_config() -> Result<AppConfig> {
    load_config_from(&config_path()?)
}

/// Missing file means defaults; a file that exists must parse and validate.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        info!(?path, "No config found, using defaults");
        return Ok(AppConfig::default());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config =
        parse_config(&contents).with_context(|| format!("Invalid config {}", path.display()))?;
    info!(?path, "Loaded config");
    Ok(config)
}

pub fn save_config(config: &AppConfig) -> Result<()> {
    save_config_to(config, &config_path()?)
}

pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<()> {
    std::fs::write(path, render_config(config)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!(?path, "Saved config");
    Ok(())
}

/// Parse TOML text. Missing keys take their defaults.
pub fn parse_config(contents: &str) -> Result<AppConfig> {
    let config: AppConfig = toml::from_str(contents)?;
    validate(&config)?;
    Ok(config)
}

pub fn render_config(config: &AppConfig) -> Result<String> {
    Ok(toml::to_string_pretty(config)?)
}

fn validate(config: &AppConfig) -> Result<()> {
    ensure!(!config.serial.port.is_empty(), "serial.port is empty");
    ensure!(config.serial.baud_rate > 0, "serial.baud_rate must be positive");
    ensure!(
        config.imu.calibration_samples > 0,
        "imu.calibration_samples must be at least 1"
    );
    ensure!(
        (0.0..=1.0).contains(&config.imu.complementary_alpha),
        "imu.complementary_alpha must lie in [0, 1]"
    );
    ensure!(
        config.preview.window_s.is_finite() && config.preview.window_s >= 0.0,
        "preview.window_s must be a non-negative number"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_toml() {
        let mut config = AppConfig::default();
        config.serial.port = "/dev/ttyACM0".into();
        config.imu.calibration_samples = 200;
        config.preview.window_s = 1.5;

        let parsed = parse_config(&render_config(&config).unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let parsed = parse_config("[serial]\nport = \"COM3\"\n").unwrap();

        assert_eq!(parsed.serial.port, "COM3");
        assert_eq!(parsed.serial.baud_rate, 1_000_000);
        assert_eq!(parsed.imu, ImuConfig::default());
        assert_eq!(parsed.preview.window_ms(), 5_000.0);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_config("imu = 3").is_err());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(parse_config("[imu]\ncalibration_samples = 0\n").is_err());
        assert!(parse_config("[imu]\ncomplementary_alpha = 1.5\n").is_err());
        assert!(parse_config("[preview]\nwindow_s = -1.0\n").is_err());
    }

    #[test]
    fn missing_file_loads_defaults() {
        let path = std::env::temp_dir().join("tilt-config-test-does-not-exist.toml");
        assert_eq!(load_config_from(&path).unwrap(), AppConfig::default());
    }

    #[test]
    fn saved_file_loads_back() {
        let path = std::env::temp_dir().join(format!("tilt-config-test-{}.toml", std::process::id()));
        let mut config = AppConfig::default();
        config.capture.sampling_time_s = 2.5;

        save_config_to(&config, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded, config);
    }
}
