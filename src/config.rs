//! Configuration system using Figment.
//!
//! Settings are loaded from:
//! 1. a TOML file (default `config/goniospec.toml`)
//! 2. environment variables prefixed with `GONIOSPEC_`, with `__` separating
//!    nesting levels (e.g. `GONIOSPEC_ACQUISITION__AVERAGING_POINTS=64`)
//!
//! Every field carries a default matching the instrument this tool was built
//! around, so a minimal file only needs to set what differs. The two
//! historical operating modes share one schema: `sweep.mode` selects
//! mode-specific defaults for settle time, averaging, boxcar width and
//! integration time, and any of those can be overridden explicitly.
//!
//! # Example
//! ```no_run
//! use goniospec::config::Settings;
//!
//! let settings = Settings::load()?;
//! settings.validate()?;
//! println!("mode: {}", settings.sweep.mode);
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{GonioError, GonioResult};

/// Top-level settings tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationSettings,
    /// Sweep geometry and mode
    #[serde(default)]
    pub sweep: SweepSettings,
    /// Spectrometer acquisition parameters
    #[serde(default)]
    pub acquisition: AcquisitionSettings,
    /// Goniometer mount calibration
    #[serde(default)]
    pub mount: MountSettings,
    /// Spectrometer identity and detector constants
    #[serde(default)]
    pub spectrometer: SpectrometerSettings,
    /// CSV output settings
    #[serde(default)]
    pub storage: StorageSettings,
    /// Live plot settings
    #[serde(default)]
    pub display: DisplaySettings,
}

/// Application-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Which sweep the runner performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepMode {
    /// Azimuth parked, altitude stepped; heavy averaging and smoothing.
    AltitudeOnly,
    /// Full grid: outer azimuth loop, inner altitude sweep, single reads.
    DualAxis,
}

impl fmt::Display for SweepMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepMode::AltitudeOnly => write!(f, "altitude_only"),
            SweepMode::DualAxis => write!(f, "dual_axis"),
        }
    }
}

/// An inclusive stepped angle range in user-frame degrees.
///
/// The end angle is included when the step lands on it; the generated
/// sequence may overshoot `end_deg` by less than one step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AngleRange {
    /// First angle of the sweep.
    pub start_deg: f64,
    /// Last angle of the sweep (inclusive).
    pub end_deg: f64,
    /// Step between angles; must be positive.
    pub step_deg: f64,
}

/// Sweep geometry and mode selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSettings {
    /// Operating mode
    #[serde(default = "default_mode")]
    pub mode: SweepMode,
    /// Azimuth range (dual_axis mode)
    #[serde(default = "default_azimuth_range")]
    pub azimuth: AngleRange,
    /// Altitude range (both modes)
    #[serde(default = "default_altitude_range")]
    pub altitude: AngleRange,
    /// Settling time after each move, seconds. Unset: 1.0 (altitude_only)
    /// or 0.2 (dual_axis).
    #[serde(default)]
    pub settle_s: Option<f64>,
    /// Where the azimuth stage parks during an altitude_only sweep.
    #[serde(default)]
    pub azimuth_park_deg: f64,
}

/// Spectrometer acquisition parameters.
///
/// Unset fields resolve per mode; see the accessors on [`Settings`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AcquisitionSettings {
    /// Integration time in microseconds. Unset: 5000 (altitude_only) or
    /// 100000 (dual_axis).
    #[serde(default)]
    pub integration_time_us: Option<u64>,
    /// Readings averaged per angle. Unset: 128 (altitude_only) or 1
    /// (dual_axis).
    #[serde(default)]
    pub averaging_points: Option<u32>,
    /// Boxcar smoothing window in pixels. Unset: 10 (altitude_only) or 1
    /// (dual_axis).
    #[serde(default)]
    pub boxcar_width: Option<usize>,
}

/// One rotation axis of the mount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountAxisSettings {
    /// Zaber device serial number on the chain (0 = not configured).
    #[serde(default)]
    pub serial_number: u32,
    /// Mounting offset: device angle = user angle - offset.
    pub offset_deg: f64,
    /// Software travel limit, user frame.
    pub min_deg: f64,
    /// Software travel limit, user frame.
    pub max_deg: f64,
    /// Maximum speed applied at connect, degrees per second.
    #[serde(default)]
    pub maxspeed_deg_s: Option<f64>,
    /// Acceleration and deceleration applied at connect, degrees per
    /// second squared.
    #[serde(default)]
    pub accel_deg_s2: Option<f64>,
}

/// Goniometer mount calibration and chain identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountSettings {
    /// USB serial number of the Zaber chain's serial adapter.
    #[serde(default)]
    pub usb_serial: String,
    /// Explicit serial port path, for setups where enumeration fails.
    #[serde(default)]
    pub port: Option<String>,
    /// Chain baud rate.
    #[serde(default = "default_chain_baud")]
    pub baud_rate: u32,
    /// Stage resolution; both stages are the same model.
    #[serde(default = "default_microsteps_per_degree")]
    pub microsteps_per_degree: f64,
    /// Turn the stage status LEDs off while measuring (stray light).
    #[serde(default)]
    pub disable_led_during_sweep: bool,
    /// Azimuth stage
    #[serde(default = "default_azimuth_axis")]
    pub azimuth: MountAxisSettings,
    /// Altitude stage
    #[serde(default = "default_altitude_axis")]
    pub altitude: MountAxisSettings,
}

/// Spectrometer identity and detector constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectrometerSettings {
    /// USB serial number to discover the device by (takes precedence over
    /// `port` when both are set).
    #[serde(default)]
    pub usb_serial: String,
    /// Explicit serial port path, for setups where enumeration fails.
    #[serde(default)]
    pub port: Option<String>,
    /// Port baud rate.
    #[serde(default = "default_spectrometer_baud")]
    pub baud_rate: u32,
    /// Detector pixel count (model constant).
    #[serde(default = "default_pixels")]
    pub pixels: usize,
    /// Detector saturation value, used as the plot ceiling.
    #[serde(default = "default_max_intensity")]
    pub max_intensity: f64,
}

/// CSV output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Directory data files are written into (created if missing).
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Filename prefix; a local timestamp is appended.
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

/// Live plot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplaySettings {
    /// Show the live spectrum window during a run.
    #[serde(default = "default_display_enabled")]
    pub enabled: bool,
}

// Default value functions

fn default_log_level() -> String {
    "info".to_string()
}

fn default_mode() -> SweepMode {
    SweepMode::AltitudeOnly
}

fn default_azimuth_range() -> AngleRange {
    AngleRange {
        start_deg: 0.0,
        end_deg: 90.0,
        step_deg: 1.0,
    }
}

fn default_altitude_range() -> AngleRange {
    AngleRange {
        start_deg: -80.0,
        end_deg: 80.0,
        step_deg: 0.2,
    }
}

fn default_chain_baud() -> u32 {
    115_200
}

// Zaber X-RSW series default resolution, microsteps per degree.
fn default_microsteps_per_degree() -> f64 {
    1.0 / 0.000_234_375
}

fn default_azimuth_axis() -> MountAxisSettings {
    MountAxisSettings {
        serial_number: 0,
        offset_deg: 0.0,
        min_deg: -5.0,
        max_deg: 90.0,
        maxspeed_deg_s: None,
        accel_deg_s2: None,
    }
}

// The altitude stage is mounted 45 degrees off its index mark.
fn default_altitude_axis() -> MountAxisSettings {
    MountAxisSettings {
        serial_number: 0,
        offset_deg: -45.0,
        min_deg: -90.0,
        max_deg: 90.0,
        maxspeed_deg_s: None,
        accel_deg_s2: None,
    }
}

fn default_spectrometer_baud() -> u32 {
    115_200
}

fn default_pixels() -> usize {
    1024
}

// 14-bit detector.
fn default_max_intensity() -> f64 {
    16383.0
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_file_prefix() -> String {
    "goniometer_data".to_string()
}

fn default_display_enabled() -> bool {
    true
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            azimuth: default_azimuth_range(),
            altitude: default_altitude_range(),
            settle_s: None,
            azimuth_park_deg: 0.0,
        }
    }
}

impl Default for MountSettings {
    fn default() -> Self {
        Self {
            usb_serial: String::new(),
            port: None,
            baud_rate: default_chain_baud(),
            microsteps_per_degree: default_microsteps_per_degree(),
            disable_led_during_sweep: false,
            azimuth: default_azimuth_axis(),
            altitude: default_altitude_axis(),
        }
    }
}

impl Default for SpectrometerSettings {
    fn default() -> Self {
        Self {
            usb_serial: String::new(),
            port: None,
            baud_rate: default_spectrometer_baud(),
            pixels: default_pixels(),
            max_intensity: default_max_intensity(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            file_prefix: default_file_prefix(),
        }
    }
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            enabled: default_display_enabled(),
        }
    }
}

impl Settings {
    /// Load configuration from `config/goniospec.toml` and environment
    /// variables.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from("config/goniospec.toml")
    }

    /// Load configuration from a specific file path.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("GONIOSPEC_").split("__"))
            .extract()
    }

    /// Settling time after each move, mode-resolved.
    pub fn settle_s(&self) -> f64 {
        self.sweep.settle_s.unwrap_or(match self.sweep.mode {
            SweepMode::AltitudeOnly => 1.0,
            SweepMode::DualAxis => 0.2,
        })
    }

    /// Readings averaged per angle, mode-resolved.
    pub fn averaging_points(&self) -> u32 {
        self.acquisition
            .averaging_points
            .unwrap_or(match self.sweep.mode {
                SweepMode::AltitudeOnly => 128,
                SweepMode::DualAxis => 1,
            })
    }

    /// Boxcar window width in pixels, mode-resolved.
    pub fn boxcar_width(&self) -> usize {
        self.acquisition
            .boxcar_width
            .unwrap_or(match self.sweep.mode {
                SweepMode::AltitudeOnly => 10,
                SweepMode::DualAxis => 1,
            })
    }

    /// Integration time in microseconds, mode-resolved.
    pub fn integration_time_us(&self) -> u64 {
        self.acquisition
            .integration_time_us
            .unwrap_or(match self.sweep.mode {
                SweepMode::AltitudeOnly => 5_000,
                SweepMode::DualAxis => 100_000,
            })
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> GonioResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(GonioError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        validate_range("sweep.altitude", &self.sweep.altitude)?;
        if self.sweep.mode == SweepMode::DualAxis {
            validate_range("sweep.azimuth", &self.sweep.azimuth)?;
        }

        if let Some(settle) = self.sweep.settle_s {
            if !settle.is_finite() || settle < 0.0 {
                return Err(GonioError::Configuration(format!(
                    "Invalid settle_s {settle}. Must be non-negative"
                )));
            }
        }
        if self.averaging_points() == 0 {
            return Err(GonioError::Configuration(
                "averaging_points must be at least 1".to_string(),
            ));
        }
        if self.boxcar_width() == 0 {
            return Err(GonioError::Configuration(
                "boxcar_width must be at least 1".to_string(),
            ));
        }
        if self.integration_time_us() == 0 {
            return Err(GonioError::Configuration(
                "integration_time_us must be positive".to_string(),
            ));
        }

        validate_axis("mount.azimuth", &self.mount.azimuth)?;
        validate_axis("mount.altitude", &self.mount.altitude)?;
        if !(self.mount.microsteps_per_degree.is_finite()
            && self.mount.microsteps_per_degree > 0.0)
        {
            return Err(GonioError::Configuration(format!(
                "Invalid microsteps_per_degree {}. Must be positive",
                self.mount.microsteps_per_degree
            )));
        }

        // Sweep geometry has to stay inside the software travel limits.
        self.check_within("sweep.altitude", &self.sweep.altitude, &self.mount.altitude)?;
        match self.sweep.mode {
            SweepMode::DualAxis => {
                self.check_within("sweep.azimuth", &self.sweep.azimuth, &self.mount.azimuth)?;
            }
            SweepMode::AltitudeOnly => {
                let park = self.sweep.azimuth_park_deg;
                if park < self.mount.azimuth.min_deg || park > self.mount.azimuth.max_deg {
                    return Err(GonioError::Configuration(format!(
                        "azimuth_park_deg {park} outside azimuth limits [{}, {}]",
                        self.mount.azimuth.min_deg, self.mount.azimuth.max_deg
                    )));
                }
            }
        }

        if self.spectrometer.pixels == 0 {
            return Err(GonioError::Configuration(
                "spectrometer.pixels must be positive".to_string(),
            ));
        }
        if !(self.spectrometer.max_intensity.is_finite() && self.spectrometer.max_intensity > 0.0)
        {
            return Err(GonioError::Configuration(format!(
                "Invalid max_intensity {}. Must be positive",
                self.spectrometer.max_intensity
            )));
        }
        if self.storage.file_prefix.is_empty() {
            return Err(GonioError::Configuration(
                "storage.file_prefix must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    fn check_within(
        &self,
        name: &str,
        range: &AngleRange,
        axis: &MountAxisSettings,
    ) -> GonioResult<()> {
        if range.start_deg < axis.min_deg || range.end_deg > axis.max_deg {
            return Err(GonioError::Configuration(format!(
                "{name} [{}, {}] outside travel limits [{}, {}]",
                range.start_deg, range.end_deg, axis.min_deg, axis.max_deg
            )));
        }
        Ok(())
    }
}

fn validate_range(name: &str, range: &AngleRange) -> GonioResult<()> {
    if !(range.step_deg.is_finite() && range.step_deg > 0.0) {
        return Err(GonioError::Configuration(format!(
            "{name}.step_deg {} must be positive",
            range.step_deg
        )));
    }
    if range.end_deg < range.start_deg {
        return Err(GonioError::Configuration(format!(
            "{name} start {} exceeds end {}",
            range.start_deg, range.end_deg
        )));
    }
    Ok(())
}

fn validate_axis(name: &str, axis: &MountAxisSettings) -> GonioResult<()> {
    if axis.min_deg >= axis.max_deg {
        return Err(GonioError::Configuration(format!(
            "{name} limits [{}, {}] are inverted",
            axis.min_deg, axis.max_deg
        )));
    }
    if let Some(speed) = axis.maxspeed_deg_s {
        if !(speed.is_finite() && speed > 0.0) {
            return Err(GonioError::Configuration(format!(
                "{name}.maxspeed_deg_s {speed} must be positive"
            )));
        }
    }
    if let Some(accel) = axis.accel_deg_s2 {
        if !(accel.is_finite() && accel > 0.0) {
            return Err(GonioError::Configuration(format!(
                "{name}.accel_deg_s2 {accel} must be positive"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Settings {
        Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .unwrap()
    }

    #[test]
    fn empty_config_gets_defaults() {
        let settings = parse("");
        assert_eq!(settings.sweep.mode, SweepMode::AltitudeOnly);
        assert_eq!(settings.sweep.altitude.step_deg, 0.2);
        assert_eq!(settings.mount.altitude.offset_deg, -45.0);
        assert_eq!(settings.storage.file_prefix, "goniometer_data");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn shipped_sample_config_parses_and_validates() {
        let settings = parse(include_str!("../config/goniospec.toml"));
        assert!(settings.validate().is_ok());
        assert_eq!(settings.mount.usb_serial, "A10NGBR4A");
        assert_eq!(settings.mount.azimuth.serial_number, 132_636);
        assert_eq!(settings.mount.altitude.serial_number, 132_641);
        assert_eq!(settings.mount.altitude.offset_deg, -45.0);
        // Motion tuning stays commented out in the sample; unset means the
        // stages keep their stored settings.
        assert_eq!(settings.mount.altitude.maxspeed_deg_s, None);
    }

    #[test]
    fn mode_resolves_acquisition_defaults() {
        let altitude_only = parse("[sweep]\nmode = \"altitude_only\"\n");
        assert_eq!(altitude_only.settle_s(), 1.0);
        assert_eq!(altitude_only.averaging_points(), 128);
        assert_eq!(altitude_only.boxcar_width(), 10);
        assert_eq!(altitude_only.integration_time_us(), 5_000);

        let dual = parse("[sweep]\nmode = \"dual_axis\"\n");
        assert_eq!(dual.settle_s(), 0.2);
        assert_eq!(dual.averaging_points(), 1);
        assert_eq!(dual.boxcar_width(), 1);
        assert_eq!(dual.integration_time_us(), 100_000);
    }

    #[test]
    fn explicit_values_override_mode_defaults() {
        let settings = parse(
            "[sweep]\nmode = \"dual_axis\"\nsettle_s = 0.5\n\
             [acquisition]\naveraging_points = 16\n",
        );
        assert_eq!(settings.settle_s(), 0.5);
        assert_eq!(settings.averaging_points(), 16);
        assert_eq!(settings.boxcar_width(), 1);
    }

    #[test]
    fn rejects_non_positive_step() {
        let settings = parse("[sweep.altitude]\nstart_deg = 0.0\nend_deg = 10.0\nstep_deg = 0.0\n");
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_inverted_range() {
        let settings =
            parse("[sweep.altitude]\nstart_deg = 50.0\nend_deg = -50.0\nstep_deg = 1.0\n");
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_zero_boxcar() {
        let settings = parse("[acquisition]\nboxcar_width = 0\n");
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_zero_averaging() {
        let settings = parse("[acquisition]\naveraging_points = 0\n");
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_sweep_outside_travel_limits() {
        let settings = parse(
            "[sweep]\nmode = \"dual_axis\"\n\
             [sweep.azimuth]\nstart_deg = -30.0\nend_deg = 90.0\nstep_deg = 1.0\n",
        );
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("travel limits"));
    }

    #[test]
    fn rejects_park_outside_azimuth_limits() {
        let settings = parse("[sweep]\nazimuth_park_deg = -30.0\n");
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_bad_log_level() {
        let settings = parse("[application]\nlog_level = \"verbose\"\n");
        assert!(settings.validate().is_err());
    }

    #[test]
    fn axis_settings_deserialize_from_a_toml_table() {
        let value = toml::Value::Table(toml::toml! {
            serial_number = 132636
            offset_deg = 0.0
            min_deg = -5.0
            max_deg = 90.0
        });
        let axis: MountAxisSettings = value.try_into().unwrap();
        assert_eq!(axis.serial_number, 132_636);
        assert_eq!(axis.maxspeed_deg_s, None);
        assert_eq!(axis.accel_deg_s2, None);
    }
}
