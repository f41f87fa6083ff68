//! Spectral post-processing: averaging and boxcar smoothing.
//!
//! Pure functions over intensity vectors. The acquisition loop feeds raw
//! readings through [`RunningMean`] (so a long average never holds more than
//! one reading in memory) and then through [`boxcar_smooth`] before a row is
//! written or plotted.

use crate::error::{GonioError, GonioResult};

/// Incremental elementwise mean over equally sized readings.
#[derive(Debug, Default)]
pub struct RunningMean {
    sum: Vec<f64>,
    count: u32,
}

impl RunningMean {
    /// Empty accumulator; the first `add` fixes the pixel count.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate one reading.
    ///
    /// Returns an error when the reading's length differs from earlier ones,
    /// which would mean the device changed shape mid-acquisition.
    pub fn add(&mut self, reading: &[f64]) -> GonioResult<()> {
        if self.count == 0 {
            self.sum = reading.to_vec();
        } else {
            if reading.len() != self.sum.len() {
                return Err(GonioError::Processing(format!(
                    "reading length {} does not match accumulator length {}",
                    reading.len(),
                    self.sum.len()
                )));
            }
            for (acc, value) in self.sum.iter_mut().zip(reading) {
                *acc += value;
            }
        }
        self.count += 1;
        Ok(())
    }

    /// Number of readings accumulated so far.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Consume the accumulator and return the elementwise mean.
    pub fn mean(self) -> GonioResult<Vec<f64>> {
        if self.count == 0 {
            return Err(GonioError::Processing(
                "cannot average zero readings".to_string(),
            ));
        }
        let n = f64::from(self.count);
        Ok(self.sum.into_iter().map(|v| v / n).collect())
    }
}

/// Valid-mode moving average with a uniform window of `width` samples.
///
/// A width of 1 returns the input unchanged. Wider windows produce
/// `samples.len() - width + 1` means and must not exceed the sample count;
/// a width of zero is an error.
pub fn boxcar_smooth(samples: &[f64], width: usize) -> GonioResult<Vec<f64>> {
    if width == 0 {
        return Err(GonioError::Processing(
            "boxcar width must be at least 1".to_string(),
        ));
    }
    if width == 1 {
        return Ok(samples.to_vec());
    }
    if width > samples.len() {
        return Err(GonioError::Processing(format!(
            "boxcar width {width} exceeds sample count {}",
            samples.len()
        )));
    }
    Ok(samples
        .windows(width)
        .map(|w| w.iter().sum::<f64>() / width as f64)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_of_identical_readings_is_the_reading() {
        let mut acc = RunningMean::new();
        for _ in 0..128 {
            acc.add(&[10.0, 20.0, 30.0]).unwrap();
        }
        assert_eq!(acc.count(), 128);
        assert_eq!(acc.mean().unwrap(), vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn mean_of_two_readings() {
        let mut acc = RunningMean::new();
        acc.add(&[1.0, 3.0]).unwrap();
        acc.add(&[3.0, 5.0]).unwrap();
        assert_eq!(acc.mean().unwrap(), vec![2.0, 4.0]);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let mut acc = RunningMean::new();
        acc.add(&[1.0, 2.0]).unwrap();
        assert!(acc.add(&[1.0, 2.0, 3.0]).is_err());
    }

    #[test]
    fn empty_accumulator_cannot_produce_a_mean() {
        assert!(RunningMean::new().mean().is_err());
    }

    #[test]
    fn boxcar_width_one_is_identity() {
        let input = vec![4.0, 8.0, 15.0, 16.0, 23.0, 42.0];
        assert_eq!(boxcar_smooth(&input, 1).unwrap(), input);
    }

    #[test]
    fn boxcar_width_one_accepts_empty_input() {
        assert!(boxcar_smooth(&[], 1).unwrap().is_empty());
    }

    #[test]
    fn boxcar_on_constant_input_stays_constant() {
        let input = vec![7.5; 20];
        let out = boxcar_smooth(&input, 6).unwrap();
        assert_eq!(out.len(), 15);
        assert!(out.iter().all(|v| (v - 7.5).abs() < 1e-12));
    }

    #[test]
    fn boxcar_computes_window_means() {
        let out = boxcar_smooth(&[1.0, 2.0, 3.0, 4.0], 2).unwrap();
        assert_eq!(out, vec![1.5, 2.5, 3.5]);
    }

    #[test]
    fn boxcar_rejects_zero_width() {
        assert!(boxcar_smooth(&[1.0, 2.0], 0).is_err());
    }

    #[test]
    fn boxcar_rejects_window_wider_than_input() {
        assert!(boxcar_smooth(&[1.0, 2.0], 3).is_err());
    }
}
