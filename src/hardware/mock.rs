//! Mock Hardware Implementations
//!
//! Simulated devices for running sweeps without the goniometer attached.
//! All mocks use async-safe operations (tokio::time::sleep, not
//! std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockStage` - rotation stage with finite travel speed and software limits
//! - `MockSpectrometer` - synthetic spectra, or a fixed reading for tests
//!
//! Both record enough of what was done to them (applied limits, home calls,
//! integration-time writes) for tests to assert on.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use rand::Rng;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};
use tracing::debug;

use crate::hardware::capabilities::{RotationStage, Spectrometer};

// =============================================================================
// MockStage - Simulated Rotation Stage
// =============================================================================

/// Mock rotation stage with realistic timing.
///
/// Simulates a rotary stage with:
/// - Finite travel speed (default 90 deg/sec)
/// - Software limit enforcement once limits are applied
/// - Thread-safe position tracking
///
/// # Example
///
/// ```rust,ignore
/// let stage = MockStage::new();
/// stage.move_abs(45.0).await?; // takes ~0.5s
/// assert_eq!(stage.position().await?, 45.0);
/// ```
pub struct MockStage {
    position: Arc<RwLock<f64>>,
    limits: Arc<RwLock<Option<(f64, f64)>>>,
    speed_deg_per_sec: f64,
    home_calls: AtomicU32,
}

impl MockStage {
    /// Create a new mock stage at 0.0 degrees.
    pub fn new() -> Self {
        Self::with_position(0.0)
    }

    /// Create a new mock stage at the given initial angle.
    ///
    /// Useful for exercising the homing-safety path, which depends on where
    /// the stage last stopped.
    pub fn with_position(initial_deg: f64) -> Self {
        Self {
            position: Arc::new(RwLock::new(initial_deg)),
            limits: Arc::new(RwLock::new(None)),
            speed_deg_per_sec: 90.0,
            home_calls: AtomicU32::new(0),
        }
    }

    /// Create a mock stage with a custom travel speed.
    pub fn with_speed(speed_deg_per_sec: f64) -> Self {
        Self {
            position: Arc::new(RwLock::new(0.0)),
            limits: Arc::new(RwLock::new(None)),
            speed_deg_per_sec,
            home_calls: AtomicU32::new(0),
        }
    }

    /// Software limits applied via `set_limits`, if any.
    pub async fn applied_limits(&self) -> Option<(f64, f64)> {
        *self.limits.read().await
    }

    /// How many times `home` has been called.
    pub fn home_calls(&self) -> u32 {
        self.home_calls.load(Ordering::SeqCst)
    }

    async fn travel_to(&self, target: f64) -> Result<()> {
        if let Some((min, max)) = *self.limits.read().await {
            if target < min || target > max {
                bail!(
                    "MockStage: target {target:.2} deg outside limits [{min:.2}, {max:.2}]"
                );
            }
        }

        let current = *self.position.read().await;
        let distance = (target - current).abs();
        let delay_ms = (distance / self.speed_deg_per_sec * 1000.0) as u64;
        debug!(from = current, to = target, delay_ms, "MockStage: moving");

        sleep(Duration::from_millis(delay_ms)).await;

        *self.position.write().await = target;
        Ok(())
    }
}

impl Default for MockStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RotationStage for MockStage {
    async fn move_abs(&self, angle_deg: f64) -> Result<()> {
        self.travel_to(angle_deg).await
    }

    async fn move_rel(&self, delta_deg: f64) -> Result<()> {
        let current = *self.position.read().await;
        self.travel_to(current + delta_deg).await
    }

    async fn position(&self) -> Result<f64> {
        Ok(*self.position.read().await)
    }

    async fn home(&self) -> Result<()> {
        self.home_calls.fetch_add(1, Ordering::SeqCst);
        // Homing ignores software limits; the device seeks its reference
        // mark directly.
        let current = *self.position.read().await;
        let delay_ms = (current.abs() / self.speed_deg_per_sec * 1000.0) as u64;
        debug!(from = current, delay_ms, "MockStage: homing");

        sleep(Duration::from_millis(delay_ms)).await;

        *self.position.write().await = 0.0;
        Ok(())
    }

    async fn set_limits(&self, min_deg: f64, max_deg: f64) -> Result<()> {
        if min_deg >= max_deg {
            bail!("MockStage: inverted limits [{min_deg:.2}, {max_deg:.2}]");
        }
        *self.limits.write().await = Some((min_deg, max_deg));
        Ok(())
    }
}

// =============================================================================
// MockSpectrometer - Simulated Fiber Spectrometer
// =============================================================================

/// Mock spectrometer.
///
/// Two operating modes:
/// - **Synthetic** (`new`): a Gaussian emission peak over a visible-range
///   wavelength grid, with per-pixel noise. Good for demos and the live
///   plot.
/// - **Fixed** (`with_fixed_reading`): every acquisition returns the same
///   vector. Good for asserting exact pipeline output.
///
/// Integration-time writes are counted so tests can prove a rejected value
/// never reached the device.
pub struct MockSpectrometer {
    wavelengths: Vec<f64>,
    fixed_reading: Option<Vec<f64>>,
    integration_us: RwLock<u64>,
    integration_limits: (u64, u64),
    set_calls: AtomicU32,
    max_intensity: f64,
}

/// Integration-time range of the simulated detector, microseconds.
const MOCK_INTEGRATION_LIMITS: (u64, u64) = (10, 10_000_000);

impl MockSpectrometer {
    /// Create a synthetic spectrometer with `pixels` points spanning
    /// 350-1000 nm.
    pub fn new(pixels: usize) -> Self {
        let pixels = pixels.max(2);
        let wavelengths = (0..pixels)
            .map(|i| 350.0 + 650.0 * i as f64 / (pixels - 1) as f64)
            .collect();
        Self {
            wavelengths,
            fixed_reading: None,
            integration_us: RwLock::new(100_000),
            integration_limits: MOCK_INTEGRATION_LIMITS,
            set_calls: AtomicU32::new(0),
            max_intensity: 16383.0,
        }
    }

    /// Create a spectrometer that always returns `reading`.
    ///
    /// `wavelengths` must be index-aligned with `reading`.
    pub fn with_fixed_reading(wavelengths: Vec<f64>, reading: Vec<f64>) -> Self {
        Self {
            wavelengths,
            fixed_reading: Some(reading),
            integration_us: RwLock::new(100_000),
            integration_limits: MOCK_INTEGRATION_LIMITS,
            set_calls: AtomicU32::new(0),
            max_intensity: 16383.0,
        }
    }

    /// Override the reported integration-time limits.
    pub fn with_integration_limits(mut self, min_us: u64, max_us: u64) -> Self {
        self.integration_limits = (min_us, max_us);
        self
    }

    /// Override the detector saturation value.
    pub fn with_max_intensity(mut self, max_intensity: f64) -> Self {
        self.max_intensity = max_intensity;
        self
    }

    /// How many times `set_integration_time` reached the device.
    pub fn set_calls(&self) -> u32 {
        self.set_calls.load(Ordering::SeqCst)
    }

    /// Currently applied integration time, microseconds.
    pub async fn integration_time(&self) -> u64 {
        *self.integration_us.read().await
    }

    fn synthetic_reading(&self) -> Vec<f64> {
        let mut rng = rand::thread_rng();
        let peak_nm = 650.0;
        let sigma_nm = 40.0;
        let amplitude = self.max_intensity * 0.6;
        self.wavelengths
            .iter()
            .map(|w| {
                let d = (w - peak_nm) / sigma_nm;
                let signal = amplitude * (-0.5 * d * d).exp();
                let noise: f64 = rng.gen_range(-1.0..1.0) * self.max_intensity * 0.01;
                (signal + noise + 120.0).clamp(0.0, self.max_intensity)
            })
            .collect()
    }
}

#[async_trait]
impl Spectrometer for MockSpectrometer {
    async fn wavelengths(&self) -> Result<Vec<f64>> {
        Ok(self.wavelengths.clone())
    }

    async fn intensities(&self) -> Result<Vec<f64>> {
        match &self.fixed_reading {
            Some(reading) => Ok(reading.clone()),
            None => Ok(self.synthetic_reading()),
        }
    }

    async fn set_integration_time(&self, micros: u64) -> Result<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        *self.integration_us.write().await = micros;
        debug!(micros, "MockSpectrometer: integration time set");
        Ok(())
    }

    async fn integration_time_limits(&self) -> Result<(u64, u64)> {
        Ok(self.integration_limits)
    }

    fn max_intensity(&self) -> f64 {
        self.max_intensity
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stage_tracks_absolute_and_relative_moves() {
        let stage = MockStage::with_speed(10_000.0);

        assert_eq!(stage.position().await.unwrap(), 0.0);

        stage.move_abs(10.0).await.unwrap();
        assert_eq!(stage.position().await.unwrap(), 10.0);

        stage.move_rel(-3.5).await.unwrap();
        assert_eq!(stage.position().await.unwrap(), 6.5);
    }

    #[tokio::test]
    async fn stage_enforces_applied_limits() {
        let stage = MockStage::with_speed(10_000.0);
        stage.set_limits(-5.0, 90.0).await.unwrap();
        assert_eq!(stage.applied_limits().await, Some((-5.0, 90.0)));

        assert!(stage.move_abs(-10.0).await.is_err());
        assert!(stage.move_abs(45.0).await.is_ok());
        assert!(stage.move_rel(50.0).await.is_err());
    }

    #[tokio::test]
    async fn stage_home_returns_to_zero() {
        let stage = MockStage::with_position(12.0);
        stage.home().await.unwrap();
        assert_eq!(stage.position().await.unwrap(), 0.0);
        assert_eq!(stage.home_calls(), 1);
    }

    #[tokio::test]
    async fn fixed_reading_is_returned_verbatim() {
        let spec =
            MockSpectrometer::with_fixed_reading(vec![400.0, 500.0], vec![10.0, 20.0]);
        assert_eq!(spec.intensities().await.unwrap(), vec![10.0, 20.0]);
        assert_eq!(spec.wavelengths().await.unwrap(), vec![400.0, 500.0]);
    }

    #[tokio::test]
    async fn synthetic_reading_stays_within_detector_range() {
        let spec = MockSpectrometer::new(256);
        let reading = spec.intensities().await.unwrap();
        assert_eq!(reading.len(), 256);
        assert!(reading
            .iter()
            .all(|v| *v >= 0.0 && *v <= spec.max_intensity()));
    }

    #[tokio::test]
    async fn integration_time_writes_are_counted() {
        let spec = MockSpectrometer::new(16);
        assert_eq!(spec.set_calls(), 0);

        spec.set_integration_time(5_000).await.unwrap();
        assert_eq!(spec.set_calls(), 1);
        assert_eq!(spec.integration_time().await, 5_000);
    }
}
