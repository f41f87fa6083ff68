//! Hardware capability traits.
//!
//! The sweep logic never talks to a concrete driver. It is written against
//! two small traits, one per role on the bench:
//!
//! - A rotation stage implements [`RotationStage`]
//! - The spectrometer implements [`Spectrometer`]
//!
//! This keeps the orchestration hardware-agnostic: the same sweep runs
//! against the Zaber chain and the OBP spectrometer in the lab, and against
//! the mocks in tests and demos.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Takes `&self`; implementations use interior mutability for device state
//! - Uses anyhow::Result for errors

use anyhow::Result;
use async_trait::async_trait;

/// Capability: Rotary Motion Control
///
/// One rotation axis of the goniometer mount.
///
/// # Contract
/// - All angles are in device-frame degrees; mounting offsets live a layer
///   up in [`crate::mount::GonioMount`]
/// - `move_abs`, `move_rel` and `home` block until the motion has finished
/// - `position` may be read while idle or moving
#[async_trait]
pub trait RotationStage: Send + Sync {
    /// Move to an absolute angle and wait for completion.
    ///
    /// # Arguments
    /// * `angle_deg` - Target angle in device-frame degrees
    ///
    /// # Returns
    /// - Ok(()) once the stage reports idle at the target
    /// - Err if the target violates the device's limits or on hardware error
    async fn move_abs(&self, angle_deg: f64) -> Result<()>;

    /// Move by a relative angle and wait for completion.
    async fn move_rel(&self, delta_deg: f64) -> Result<()>;

    /// Current angle in device-frame degrees.
    async fn position(&self) -> Result<f64>;

    /// Home the axis and wait for completion.
    ///
    /// Establishes the device's zero reference. Callers are responsible for
    /// checking that homing is safe from the current position (see
    /// [`crate::mount::GonioMount::initialize`]).
    async fn home(&self) -> Result<()>;

    /// Apply software travel limits in device-frame degrees.
    ///
    /// Later moves outside `[min_deg, max_deg]` are rejected by the device.
    async fn set_limits(&self, min_deg: f64, max_deg: f64) -> Result<()>;
}

/// Capability: Spectral Readout
///
/// A fiber spectrometer producing one intensity value per detector pixel.
///
/// # Contract
/// - `wavelengths` has a fixed length for the life of the device and is
///   index-aligned with every `intensities` reading
/// - `intensities` blocks for at least the configured integration time
/// - `set_integration_time` applies to subsequent readings; validate against
///   `integration_time_limits` before calling
#[async_trait]
pub trait Spectrometer: Send + Sync {
    /// Wavelength calibration, one value per pixel, in nanometers.
    async fn wavelengths(&self) -> Result<Vec<f64>>;

    /// Acquire one spectrum, one intensity count per pixel.
    async fn intensities(&self) -> Result<Vec<f64>>;

    /// Set the integration time for subsequent readings.
    ///
    /// # Arguments
    /// * `micros` - Integration time in microseconds
    ///
    /// # Returns
    /// - Ok(()) if the device accepted the value
    /// - Err on hardware error; out-of-range values are the caller's job to
    ///   reject first
    async fn set_integration_time(&self, micros: u64) -> Result<()>;

    /// Supported integration time range `(min, max)` in microseconds.
    async fn integration_time_limits(&self) -> Result<(u64, u64)>;

    /// Detector saturation value in counts. Used as the plot ceiling.
    fn max_intensity(&self) -> f64;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SpinStage {
        angle: std::sync::Mutex<f64>,
    }

    #[async_trait]
    impl RotationStage for SpinStage {
        async fn move_abs(&self, angle_deg: f64) -> Result<()> {
            *self.angle.lock().unwrap() = angle_deg;
            Ok(())
        }

        async fn move_rel(&self, delta_deg: f64) -> Result<()> {
            *self.angle.lock().unwrap() += delta_deg;
            Ok(())
        }

        async fn position(&self) -> Result<f64> {
            Ok(*self.angle.lock().unwrap())
        }

        async fn home(&self) -> Result<()> {
            *self.angle.lock().unwrap() = 0.0;
            Ok(())
        }

        async fn set_limits(&self, _min_deg: f64, _max_deg: f64) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn rotation_stage_trait_is_object_safe() {
        let stage: Box<dyn RotationStage> = Box::new(SpinStage {
            angle: std::sync::Mutex::new(0.0),
        });

        stage.move_abs(30.0).await.unwrap();
        assert_eq!(stage.position().await.unwrap(), 30.0);

        stage.move_rel(-10.0).await.unwrap();
        assert_eq!(stage.position().await.unwrap(), 20.0);

        stage.home().await.unwrap();
        assert_eq!(stage.position().await.unwrap(), 0.0);
    }
}
