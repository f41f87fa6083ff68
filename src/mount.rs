//! Goniometer mount: angle conventions and homing safety.
//!
//! The mount layer turns two bare rotation stages into the instrument's
//! azimuth/altitude frame. Each axis carries a mounting offset (the altitude
//! stage sits 45 degrees off its index mark) and software travel limits.
//! User-frame angles are what the operator and the sweep configuration speak;
//! `device = user - offset` is what goes over the wire.
//!
//! Homing deserves care on this mount: the fiber bundle wraps around the
//! altitude axis, so commanding a home from a wild position (for example
//! after a power cycle mid-rotation) could wind it up. `initialize` refuses
//! to home any axis reporting more than half a turn from zero, and
//! approaches the reference from the positive side.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::config::MountSettings;
use crate::error::GonioError;
use crate::hardware::capabilities::RotationStage;

/// Positions at or beyond this magnitude abort homing.
const HOMING_SAFE_LIMIT_DEG: f64 = 180.0;

/// Homing approaches zero from this angle on the positive side.
const HOMING_APPROACH_DEG: f64 = 5.0;

struct MountAxis {
    name: &'static str,
    stage: Arc<dyn RotationStage>,
    offset_deg: f64,
    min_deg: f64,
    max_deg: f64,
}

impl MountAxis {
    fn to_device(&self, user_deg: f64) -> f64 {
        user_deg - self.offset_deg
    }

    fn to_user(&self, device_deg: f64) -> f64 {
        device_deg + self.offset_deg
    }

    async fn apply_limits(&self) -> Result<()> {
        let min = self.to_device(self.min_deg);
        let max = self.to_device(self.max_deg);
        self.stage
            .set_limits(min, max)
            .await
            .with_context(|| format!("applying travel limits to {} stage", self.name))
    }

    /// Home the axis, refusing from positions that could wrap the fiber.
    async fn safe_home(&self) -> Result<()> {
        let position = self
            .stage
            .position()
            .await
            .with_context(|| format!("reading {} stage position before homing", self.name))?;

        if position.abs() >= HOMING_SAFE_LIMIT_DEG {
            return Err(GonioError::HomingUnsafe {
                axis: self.name.to_string(),
                position_deg: position,
            }
            .into());
        }

        // Come at the reference mark from the positive side so the homing
        // direction is always the same.
        if position < 0.0 {
            self.stage
                .move_rel(-position + HOMING_APPROACH_DEG)
                .await
                .with_context(|| format!("pre-positioning {} stage for homing", self.name))?;
        }

        info!(axis = self.name, from_deg = position, "homing stage");
        self.stage
            .home()
            .await
            .with_context(|| format!("homing {} stage", self.name))
    }

    async fn move_to(&self, user_deg: f64) -> Result<()> {
        if user_deg < self.min_deg || user_deg > self.max_deg {
            bail!(
                "{} angle {user_deg:.2} deg outside [{:.2}, {:.2}] deg",
                self.name,
                self.min_deg,
                self.max_deg
            );
        }
        self.stage
            .move_abs(self.to_device(user_deg))
            .await
            .with_context(|| format!("moving {} stage to {user_deg:.2} deg", self.name))
    }

    async fn position(&self) -> Result<f64> {
        Ok(self.to_user(self.stage.position().await?))
    }
}

/// Two-axis goniometer mount.
pub struct GonioMount {
    azimuth: MountAxis,
    altitude: MountAxis,
}

impl GonioMount {
    /// Build a mount from two stage handles and the mount calibration.
    pub fn new(
        azimuth_stage: Arc<dyn RotationStage>,
        altitude_stage: Arc<dyn RotationStage>,
        settings: &MountSettings,
    ) -> Self {
        Self {
            azimuth: MountAxis {
                name: "azimuth",
                stage: azimuth_stage,
                offset_deg: settings.azimuth.offset_deg,
                min_deg: settings.azimuth.min_deg,
                max_deg: settings.azimuth.max_deg,
            },
            altitude: MountAxis {
                name: "altitude",
                stage: altitude_stage,
                offset_deg: settings.altitude.offset_deg,
                min_deg: settings.altitude.min_deg,
                max_deg: settings.altitude.max_deg,
            },
        }
    }

    /// Apply software limits to both axes, then home them.
    ///
    /// Limits go on first so a bad homing approach cannot exceed the travel
    /// range. Azimuth homes before altitude.
    pub async fn initialize(&self) -> Result<()> {
        self.azimuth.apply_limits().await?;
        self.altitude.apply_limits().await?;
        self.azimuth.safe_home().await?;
        self.altitude.safe_home().await?;
        Ok(())
    }

    /// Move the azimuth axis to a user-frame angle.
    pub async fn set_azimuth(&self, user_deg: f64) -> Result<()> {
        self.azimuth.move_to(user_deg).await
    }

    /// Move the altitude axis to a user-frame angle.
    pub async fn set_altitude(&self, user_deg: f64) -> Result<()> {
        self.altitude.move_to(user_deg).await
    }

    /// Current azimuth in user-frame degrees.
    pub async fn azimuth(&self) -> Result<f64> {
        self.azimuth.position().await
    }

    /// Current altitude in user-frame degrees.
    pub async fn altitude(&self) -> Result<f64> {
        self.altitude.position().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MountSettings;
    use crate::hardware::mock::MockStage;

    fn fast_stage() -> Arc<MockStage> {
        Arc::new(MockStage::with_speed(100_000.0))
    }

    fn default_settings() -> MountSettings {
        MountSettings::default()
    }

    #[tokio::test]
    async fn moves_are_offset_corrected() {
        let azimuth = fast_stage();
        let altitude = fast_stage();
        let mount = GonioMount::new(azimuth.clone(), altitude.clone(), &default_settings());

        // Altitude offset is -45: user 0 puts the device at +45.
        mount.set_altitude(0.0).await.unwrap();
        assert_eq!(altitude.position().await.unwrap(), 45.0);

        mount.set_azimuth(30.0).await.unwrap();
        assert_eq!(azimuth.position().await.unwrap(), 30.0);

        assert_eq!(mount.altitude().await.unwrap(), 0.0);
        assert_eq!(mount.azimuth().await.unwrap(), 30.0);
    }

    #[tokio::test]
    async fn initialize_applies_device_frame_limits() {
        let azimuth = fast_stage();
        let altitude = fast_stage();
        let mount = GonioMount::new(azimuth.clone(), altitude.clone(), &default_settings());

        mount.initialize().await.unwrap();

        assert_eq!(azimuth.applied_limits().await, Some((-5.0, 90.0)));
        assert_eq!(altitude.applied_limits().await, Some((-45.0, 135.0)));
        assert_eq!(azimuth.home_calls(), 1);
        assert_eq!(altitude.home_calls(), 1);
    }

    #[tokio::test]
    async fn homing_refuses_far_from_zero() {
        let azimuth = fast_stage();
        let altitude = Arc::new(MockStage::with_position(231.7));
        let mount = GonioMount::new(azimuth, altitude.clone(), &default_settings());

        let err = mount.initialize().await.unwrap_err();
        match err.downcast_ref::<GonioError>() {
            Some(GonioError::HomingUnsafe { axis, position_deg }) => {
                assert_eq!(axis, "altitude");
                assert_eq!(*position_deg, 231.7);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // The unsafe axis must not have been homed.
        assert_eq!(altitude.home_calls(), 0);
    }

    #[tokio::test]
    async fn homing_from_negative_side_crosses_zero_first() {
        let altitude = Arc::new(MockStage::with_position(-30.0));
        let mount = GonioMount::new(fast_stage(), altitude.clone(), &default_settings());

        // Slow stage would make this take a second; tolerable for one test.
        mount.initialize().await.unwrap();

        assert_eq!(altitude.position().await.unwrap(), 0.0);
        assert_eq!(altitude.home_calls(), 1);
    }

    #[tokio::test]
    async fn rejects_user_angles_outside_limits() {
        let mount = GonioMount::new(fast_stage(), fast_stage(), &default_settings());
        assert!(mount.set_altitude(95.0).await.is_err());
        assert!(mount.set_azimuth(-10.0).await.is_err());
    }
}
