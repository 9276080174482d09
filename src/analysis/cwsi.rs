//! Crop Water Stress Index.

// ---

/// CWSI = (T_canopy - T_wet) / (T_dry - T_wet), clamped to `[0, 1]`.
///
/// A collapsed envelope (`t_dry <= t_wet`) yields 0, as does any non-finite
/// input, so the result is always a valid index.
pub fn compute(t_canopy: f64, t_wet: f64, t_dry: f64) -> f64 {
    // ---
    if !(t_dry > t_wet) {
        return 0.0;
    }
    let cwsi = (t_canopy - t_wet) / (t_dry - t_wet);
    if cwsi.is_nan() {
        return 0.0;
    }
    cwsi.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_inside_envelope() {
        // ---
        assert_relative_eq!(compute(27.0, 22.0, 30.0), 0.625);
        assert_relative_eq!(compute(22.0, 22.0, 30.0), 0.0);
        assert_relative_eq!(compute(30.0, 22.0, 30.0), 1.0);
    }

    #[test]
    fn test_outside_envelope_is_clipped() {
        // ---
        assert_eq!(compute(18.0, 22.0, 30.0), 0.0);
        assert_eq!(compute(35.0, 22.0, 30.0), 1.0);
    }

    #[test]
    fn test_degenerate_envelope_is_zero() {
        // ---
        assert_eq!(compute(27.0, 30.0, 30.0), 0.0);
        assert_eq!(compute(27.0, 30.0, 22.0), 0.0);
    }

    #[test]
    fn test_always_in_unit_interval() {
        // ---
        let temps = [-40.0, -1.5, 0.0, 12.3, 22.0, 29.9, 30.0, 45.0, 1.0e6];
        for &canopy in &temps {
            for &wet in &temps {
                for &dry in &temps {
                    let cwsi = compute(canopy, wet, dry);
                    assert!((0.0..=1.0).contains(&cwsi), "cwsi({canopy}, {wet}, {dry}) = {cwsi}");
                }
            }
        }
        assert_eq!(compute(f64::NAN, 22.0, 30.0), 0.0);
        assert_eq!(compute(25.0, f64::NAN, 30.0), 0.0);
    }
}
