use serde::{Deserialize, Serialize};

use crate::models::Arm;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationKind {
    /// `count = zero + scaling * tilt`
    #[default]
    Affine,
    /// `count = zero + scaling * sin(tilt)`
    Sinusoidal,
}

/// Which direction bit the controller expects for a move towards higher counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionConvention {
    #[default]
    IncreasingIsZero,
    IncreasingIsOne,
}

impl DirectionConvention {
    pub fn direction(self, offset: i64) -> u8 {
        let increasing = offset >= 0;
        match (self, increasing) {
            (DirectionConvention::IncreasingIsZero, true) => 0,
            (DirectionConvention::IncreasingIsZero, false) => 1,
            (DirectionConvention::IncreasingIsOne, true) => 1,
            (DirectionConvention::IncreasingIsOne, false) => 0,
        }
    }
}

/// Tick/angle conversion for the two arms of one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisCalibration {
    pub kind: CalibrationKind,
    pub tilt_zero: f64,
    pub east_scaling: f64,
    pub west_scaling: f64,
    pub direction: DirectionConvention,
}

impl AxisCalibration {
    fn scaling(&self, arm: Arm) -> f64 {
        match arm {
            Arm::East => self.east_scaling,
            Arm::West => self.west_scaling,
        }
    }

    /// Encoder count for `tilt` radians, truncated towards zero.
    ///
    /// The result is not range checked; callers reject counts outside 24 bits.
    pub fn tilt_to_count(&self, arm: Arm, tilt: f64) -> i64 {
        let projected = match self.kind {
            CalibrationKind::Affine => tilt,
            CalibrationKind::Sinusoidal => tilt.sin(),
        };
        (self.tilt_zero + self.scaling(arm) * projected) as i64
    }

    pub fn count_to_tilt(&self, arm: Arm, count: u32) -> f64 {
        let projected = (f64::from(count) - self.tilt_zero) / self.scaling(arm);
        match self.kind {
            CalibrationKind::Affine => projected,
            CalibrationKind::Sinusoidal => projected.clamp(-1.0, 1.0).asin(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn calibration(kind: CalibrationKind) -> AxisCalibration {
        AxisCalibration {
            kind,
            tilt_zero: 8_388_608.0,
            east_scaling: 6_000_000.0,
            west_scaling: 5_000_000.0,
            direction: DirectionConvention::IncreasingIsZero,
        }
    }

    #[test]
    fn affine_conversion_uses_each_arms_scaling() {
        let cal = calibration(CalibrationKind::Affine);
        assert_eq!(cal.tilt_to_count(Arm::East, 0.5), 11_388_608);
        assert_eq!(cal.tilt_to_count(Arm::West, 0.5), 10_888_608);
        assert_abs_diff_eq!(cal.count_to_tilt(Arm::West, 10_888_608), 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(cal.count_to_tilt(Arm::East, 8_388_608), 0.0);
    }

    #[test]
    fn affine_truncates_towards_zero() {
        let cal = calibration(CalibrationKind::Affine);
        let tilt = 0.1 / cal.east_scaling;
        assert_eq!(cal.tilt_to_count(Arm::East, tilt), 8_388_608);
        assert_eq!(cal.tilt_to_count(Arm::East, -tilt), 8_388_607);
    }

    #[test]
    fn sinusoidal_round_trips_within_one_count() {
        let cal = calibration(CalibrationKind::Sinusoidal);
        for degrees in [-60.0_f64, -12.5, 0.0, 33.0, 64.0] {
            let tilt = degrees.to_radians();
            let count = cal.tilt_to_count(Arm::East, tilt) as u32;
            assert_abs_diff_eq!(
                cal.count_to_tilt(Arm::East, count),
                tilt,
                epsilon = 5.0 / cal.east_scaling
            );
        }
    }

    #[test]
    fn sinusoidal_saturates_beyond_scaling() {
        let cal = calibration(CalibrationKind::Sinusoidal);
        assert_abs_diff_eq!(
            cal.count_to_tilt(Arm::East, 16_000_000),
            std::f64::consts::FRAC_PI_2,
            epsilon = 1e-12
        );
    }

    #[test]
    fn direction_conventions() {
        assert_eq!(DirectionConvention::IncreasingIsZero.direction(10), 0);
        assert_eq!(DirectionConvention::IncreasingIsZero.direction(-10), 1);
        assert_eq!(DirectionConvention::IncreasingIsOne.direction(0), 1);
        assert_eq!(DirectionConvention::IncreasingIsOne.direction(-1), 0);
    }
}
