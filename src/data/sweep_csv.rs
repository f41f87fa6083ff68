//! Sweep data CSV writer.
//!
//! One file per sweep, named `<prefix>_<local timestamp>.csv`. The header
//! carries the angle column(s) for the active mode followed by one label per
//! wavelength. Rows are written through a fresh append-mode handle that is
//! flushed and closed before `append_row` returns, so a crash or power cut
//! mid-sweep never loses rows that were already reported written.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::info;

use crate::config::SweepMode;
use crate::error::{GonioError, GonioResult};

/// Build the header row for a sweep file.
///
/// The angle columns depend on the mode; wavelength labels render the
/// calibration values as-is, e.g. `400.1 nm`.
pub fn header_labels(mode: SweepMode, wavelengths: &[f64]) -> Vec<String> {
    let mut labels: Vec<String> = match mode {
        SweepMode::AltitudeOnly => vec!["Altitude (deg)".to_string()],
        SweepMode::DualAxis => vec!["Azimuth (deg)".to_string(), "Altitude (deg)".to_string()],
    };
    labels.extend(wavelengths.iter().map(|w| format!("{w} nm")));
    labels
}

/// Writer for one sweep's CSV file.
pub struct SweepCsvWriter {
    path: PathBuf,
    angle_columns: usize,
    intensity_columns: usize,
    rows_written: u64,
}

impl SweepCsvWriter {
    /// Create the output file and write its header.
    ///
    /// The directory is created if missing. `wavelengths` must already be
    /// the smoothed axis so labels line up with the rows that follow.
    pub fn create(
        dir: &Path,
        prefix: &str,
        mode: SweepMode,
        wavelengths: &[f64],
    ) -> GonioResult<Self> {
        if !dir.exists() {
            std::fs::create_dir_all(dir)
                .map_err(|e| GonioError::Storage(format!("creating {}: {e}", dir.display())))?;
        }

        let file_name = format!(
            "{}_{}.csv",
            prefix,
            Local::now().format("%Y_%m_%dT%H%M%S")
        );
        let path = dir.join(file_name);

        let labels = header_labels(mode, wavelengths);
        let angle_columns = labels.len() - wavelengths.len();

        let file = File::create(&path)
            .map_err(|e| GonioError::Storage(format!("creating {}: {e}", path.display())))?;
        let mut writer = csv::Writer::from_writer(file);
        writer
            .write_record(&labels)
            .map_err(|e| GonioError::Storage(format!("writing header: {e}")))?;
        writer
            .flush()
            .map_err(|e| GonioError::Storage(format!("flushing header: {e}")))?;

        info!(path = %path.display(), columns = labels.len(), "created sweep data file");

        Ok(Self {
            path,
            angle_columns,
            intensity_columns: wavelengths.len(),
            rows_written: 0,
        })
    }

    /// Append one data row and sync it to disk.
    pub fn append_row(&mut self, angles: &[f64], intensities: &[f64]) -> GonioResult<()> {
        if angles.len() != self.angle_columns {
            return Err(GonioError::Storage(format!(
                "row has {} angle values, file expects {}",
                angles.len(),
                self.angle_columns
            )));
        }
        if intensities.len() != self.intensity_columns {
            return Err(GonioError::Storage(format!(
                "row has {} intensity values, file expects {}",
                intensities.len(),
                self.intensity_columns
            )));
        }

        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| GonioError::Storage(format!("opening {}: {e}", self.path.display())))?;
        let mut writer = csv::Writer::from_writer(file);
        writer
            .write_record(
                angles
                    .iter()
                    .chain(intensities.iter())
                    .map(|v| v.to_string()),
            )
            .map_err(|e| GonioError::Storage(format!("writing row: {e}")))?;
        writer
            .flush()
            .map_err(|e| GonioError::Storage(format!("flushing row: {e}")))?;

        self.rows_written += 1;
        Ok(())
    }

    /// Path of the file being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Data rows written so far (header excluded).
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn altitude_only_header_labels() {
        let labels = header_labels(SweepMode::AltitudeOnly, &[400.1, 450.2, 500.3]);
        assert_eq!(
            labels,
            vec!["Altitude (deg)", "400.1 nm", "450.2 nm", "500.3 nm"]
        );
    }

    #[test]
    fn dual_axis_header_has_both_angle_columns() {
        let labels = header_labels(SweepMode::DualAxis, &[400.1]);
        assert_eq!(labels, vec!["Azimuth (deg)", "Altitude (deg)", "400.1 nm"]);
    }

    #[test]
    fn rows_are_on_disk_as_soon_as_append_returns() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SweepCsvWriter::create(
            dir.path(),
            "sweep_test",
            SweepMode::AltitudeOnly,
            &[400.1, 450.2],
        )
        .unwrap();

        writer.append_row(&[-1.0], &[10.0, 20.0]).unwrap();

        // No handle is held between appends; the file is already complete.
        let contents = std::fs::read_to_string(writer.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "Altitude (deg),400.1 nm,450.2 nm");
        assert_eq!(lines[1], "-1,10,20");

        writer.append_row(&[0.0], &[11.0, 21.0]).unwrap();
        assert_eq!(writer.rows_written(), 2);
        let contents = std::fs::read_to_string(writer.path()).unwrap();
        assert_eq!(contents.lines().count(), 3);
    }

    #[test]
    fn mismatched_row_shapes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SweepCsvWriter::create(
            dir.path(),
            "sweep_test",
            SweepMode::DualAxis,
            &[400.1, 450.2],
        )
        .unwrap();

        // Dual-axis rows need two angle values.
        assert!(writer.append_row(&[1.0], &[10.0, 20.0]).is_err());
        // And exactly one intensity per wavelength label.
        assert!(writer.append_row(&[1.0, 2.0], &[10.0]).is_err());
        assert_eq!(writer.rows_written(), 0);
    }

    #[test]
    fn output_directory_is_created_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("data").join("runs");
        let writer =
            SweepCsvWriter::create(&nested, "sweep_test", SweepMode::AltitudeOnly, &[500.0])
                .unwrap();
        assert!(writer.path().exists());
        assert!(writer.path().starts_with(&nested));
    }
}
