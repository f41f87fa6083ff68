//! Stepped angle sequence generation.

/// Generate the inclusive stepped sequence `start, start + step, ...` up to
/// and including `end` (when the step lands on it).
///
/// Matches half-open stepping against an end bound of `end + step`: the
/// element count is `ceil((end + step - start) / step)`, each value is
/// `start + i * step`. The end angle is part of the sweep whenever it is
/// reachable; floating-point stepping can leave the final angle a hair
/// beyond `end`, never a full step.
///
/// A non-positive step or an end before `start` yields an empty sequence;
/// configuration validation rejects both before a sweep ever starts.
pub fn angle_sequence(start_deg: f64, end_deg: f64, step_deg: f64) -> Vec<f64> {
    if !step_deg.is_finite() || step_deg <= 0.0 {
        return Vec::new();
    }
    let count = ((end_deg + step_deg - start_deg) / step_deg).ceil();
    if !(count > 0.0) {
        return Vec::new();
    }
    (0..count as usize)
        .map(|i| start_deg + i as f64 * step_deg)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fine_altitude_sweep_has_expected_shape() {
        let angles = angle_sequence(-80.0, 80.0, 0.2);
        assert_eq!(angles.len(), 801);
        assert_eq!(angles[0], -80.0);
        assert!(angles.windows(2).all(|w| w[1] > w[0]));
        let last = *angles.last().unwrap();
        assert!(last >= 80.0);
        assert!(last < 80.0 + 0.2);
    }

    #[test]
    fn whole_degree_sweep_includes_both_ends() {
        let angles = angle_sequence(0.0, 90.0, 1.0);
        assert_eq!(angles.len(), 91);
        assert_eq!(angles[0], 0.0);
        assert_eq!(angles[90], 90.0);
    }

    #[test]
    fn single_point_when_start_equals_end() {
        assert_eq!(angle_sequence(5.0, 5.0, 1.0), vec![5.0]);
    }

    #[test]
    fn reversed_range_is_empty() {
        assert!(angle_sequence(10.0, 5.0, 1.0).is_empty());
    }

    #[test]
    fn non_positive_step_is_empty() {
        assert!(angle_sequence(0.0, 10.0, 0.0).is_empty());
        assert!(angle_sequence(0.0, 10.0, -1.0).is_empty());
    }
}
