use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    coordinates::FixedPosition,
    drive::{AxisCalibration, CalibrationKind, DirectionConvention},
    models::Axis,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found at {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to read configuration file: {source}")]
    ReadError { source: std::io::Error },

    #[error("Failed to parse configuration: {source}")]
    ParseError { source: toml::de::Error },

    #[error("Failed to serialize configuration: {source}")]
    SerializeError { source: toml::ser::Error },

    #[error("Failed to write configuration file: {source}")]
    WriteError { source: std::io::Error },

    #[error("Configuration validation failed: {message}")]
    ValidationError { message: String },
}

/// Connection and calibration of one axis controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveConfig {
    pub node_name: String,
    pub ip: String,
    pub port: u16,
    pub timeout_ms: u64,
    pub interrupt_timeout_ms: u64,
    pub socket_backoff_ms: u64,
    pub calibration: CalibrationKind,
    pub direction: DirectionConvention,
    pub tilt_zero: f64,
    pub east_scaling: f64,
    pub west_scaling: f64,
    pub minimum_count_limit: u32,
    pub slow_drive_limit: u32,
    pub socket_count_warning: u8,
    pub socket_count_limit: u8,
}

impl DriveConfig {
    pub fn ns_default() -> Self {
        Self {
            node_name: "NSDRIVE".to_string(),
            ip: "192.168.1.10".to_string(),
            port: 7000,
            timeout_ms: 5000,
            interrupt_timeout_ms: 5000,
            socket_backoff_ms: 300,
            calibration: CalibrationKind::Affine,
            direction: DirectionConvention::IncreasingIsZero,
            tilt_zero: 8_388_608.0,
            east_scaling: 6_000_000.0,
            west_scaling: 6_000_000.0,
            minimum_count_limit: 40,
            slow_drive_limit: 400,
            socket_count_warning: 14,
            socket_count_limit: 18,
        }
    }

    pub fn md_default() -> Self {
        Self {
            node_name: "MDDRIVE".to_string(),
            ip: "192.168.1.11".to_string(),
            calibration: CalibrationKind::Sinusoidal,
            direction: DirectionConvention::IncreasingIsOne,
            east_scaling: 8_000_000.0,
            west_scaling: 8_000_000.0,
            ..Self::ns_default()
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn axis_calibration(&self) -> AxisCalibration {
        AxisCalibration {
            kind: self.calibration,
            tilt_zero: self.tilt_zero,
            east_scaling: self.east_scaling,
            west_scaling: self.west_scaling,
            direction: self.direction,
        }
    }

    fn validate(&self, axis: Axis) -> Result<(), ConfigError> {
        let fail = |message: String| {
            Err(ConfigError::ValidationError {
                message: format!("{} drive: {}", axis, message),
            })
        };

        if self.node_name.is_empty() {
            return fail("node_name must not be empty".to_string());
        }
        if !(self.east_scaling > 0.0 && self.west_scaling > 0.0) {
            return fail("scalings must be positive".to_string());
        }
        if self.slow_drive_limit < self.minimum_count_limit {
            return fail(format!(
                "slow_drive_limit {} is below minimum_count_limit {}",
                self.slow_drive_limit, self.minimum_count_limit
            ));
        }
        if self.socket_count_warning >= self.socket_count_limit {
            return fail(format!(
                "socket_count_warning {} must be below socket_count_limit {}",
                self.socket_count_warning, self.socket_count_limit
            ));
        }
        if self.timeout_ms == 0 {
            return fail("timeout_ms must be positive".to_string());
        }
        Ok(())
    }
}

/// Rate, tolerance and travel limits of one axis. Angles in radians, rates in
/// radians per second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisTrackingConfig {
    pub max_rate: f64,
    pub tolerance: f64,
    pub soft_lower: f64,
    pub soft_upper: f64,
    pub hard_lower: f64,
    pub hard_upper: f64,
}

impl AxisTrackingConfig {
    pub fn ns_default() -> Self {
        Self {
            max_rate: 5f64.to_radians() / 60.0,
            tolerance: 0.4f64.to_radians(),
            soft_lower: (-53f64).to_radians(),
            soft_upper: 53f64.to_radians(),
            hard_lower: (-54f64).to_radians(),
            hard_upper: 54f64.to_radians(),
        }
    }

    pub fn md_default() -> Self {
        Self {
            max_rate: 3f64.to_radians() / 60.0,
            tolerance: 0.1f64.to_radians(),
            soft_lower: (-64f64).to_radians(),
            soft_upper: 64f64.to_radians(),
            hard_lower: (-65f64).to_radians(),
            hard_upper: 65f64.to_radians(),
        }
    }

    pub fn clamp_to_soft_limits(&self, angle: f64) -> f64 {
        angle.clamp(self.soft_lower, self.soft_upper)
    }

    pub fn beyond_hard_limits(&self, angle: f64) -> bool {
        angle < self.hard_lower || angle > self.hard_upper
    }

    fn validate(&self, axis: Axis) -> Result<(), ConfigError> {
        let ordered = self.hard_lower <= self.soft_lower
            && self.soft_lower < self.soft_upper
            && self.soft_upper <= self.hard_upper;
        if !(self.max_rate > 0.0 && self.tolerance > 0.0) || !ordered {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "{} tracking: rate and tolerance must be positive and limits ordered hard <= soft",
                    axis
                ),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingConfig {
    pub slew_poll_ms: u64,
    pub track_poll_ms: u64,
    pub max_lead_s: f64,
    pub stop_grace_ms: u64,
    pub ns: AxisTrackingConfig,
    pub md: AxisTrackingConfig,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            slew_poll_ms: 1000,
            track_poll_ms: 1000,
            max_lead_s: 3600.0,
            stop_grace_ms: 2000,
            ns: AxisTrackingConfig::ns_default(),
            md: AxisTrackingConfig::md_default(),
        }
    }
}

impl TrackingConfig {
    pub fn axis(&self, axis: Axis) -> &AxisTrackingConfig {
        match axis {
            Axis::Ns => &self.ns,
            Axis::Md => &self.md,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StowConfig {
    pub wind: FixedPosition,
    pub maintenance: FixedPosition,
}

impl Default for StowConfig {
    fn default() -> Self {
        Self {
            wind: FixedPosition { ns: 0.0, md: 0.0 },
            maintenance: FixedPosition {
                ns: 45f64.to_radians(),
                md: 0.0,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Used when `RUST_LOG` is not set.
    pub level: String,
    pub directory: Option<PathBuf>,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelescopeConfig {
    pub ns: DriveConfig,
    pub md: DriveConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub stow: StowConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TelescopeConfig {
    fn default() -> Self {
        Self {
            ns: DriveConfig::ns_default(),
            md: DriveConfig::md_default(),
            tracking: TrackingConfig::default(),
            stow: StowConfig::default(),
            monitor: MonitorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl TelescopeConfig {
    pub fn drive(&self, axis: Axis) -> &DriveConfig {
        match axis {
            Axis::Ns => &self.ns,
            Axis::Md => &self.md,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for axis in Axis::ALL {
            self.drive(axis).validate(axis)?;
            self.tracking.axis(axis).validate(axis)?;
        }
        if self.tracking.max_lead_s <= 0.0 {
            return Err(ConfigError::ValidationError {
                message: "tracking.max_lead_s must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct ConfigOptions {
    pub config_path: PathBuf,
    pub create_if_missing: bool,
}

impl Default for ConfigOptions {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            create_if_missing: true,
        }
    }
}

impl ConfigOptions {
    pub fn default_config_path() -> PathBuf {
        std::env::var("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("default_config.toml"))
    }
}

#[derive(Debug)]
pub struct ConfigManager {
    options: ConfigOptions,
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            options: ConfigOptions::default(),
        }
    }

    pub fn with_options(options: ConfigOptions) -> Self {
        Self { options }
    }

    pub fn path(&self) -> &Path {
        &self.options.config_path
    }

    pub fn load(&self) -> Result<TelescopeConfig, ConfigError> {
        let config_path = &self.options.config_path;

        if !config_path.exists() {
            if self.options.create_if_missing {
                let default_config = TelescopeConfig::default();
                self.save(&default_config)?;
                return Ok(default_config);
            }
            return Err(ConfigError::FileNotFound {
                path: config_path.clone(),
            });
        }

        let content =
            fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError { source: e })?;

        let config: TelescopeConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError { source: e })?;
        config.validate()?;

        Ok(config)
    }

    pub fn save(&self, config: &TelescopeConfig) -> Result<(), ConfigError> {
        let config_path = &self.options.config_path;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError { source: e })?;
        }

        let content = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::SerializeError { source: e })?;

        fs::write(config_path, content).map_err(|e| ConfigError::WriteError { source: e })?;

        Ok(())
    }
}

pub fn init_config() -> anyhow::Result<(ConfigManager, TelescopeConfig)> {
    let manager = ConfigManager::new();
    let config = manager.load()?;
    Ok((manager, config))
}

pub fn create_default_config<P: AsRef<Path>>(path: Option<P>) -> anyhow::Result<()> {
    let config_path = path
        .map(|p| p.as_ref().to_path_buf())
        .unwrap_or_else(ConfigOptions::default_config_path);

    let manager = ConfigManager::with_options(ConfigOptions {
        config_path,
        create_if_missing: true,
    });
    manager.save(&TelescopeConfig::default())?;

    Ok(())
}
