use ez80::UpdatePayload;
use serde::Serialize;

use crate::{drive::calibration::AxisCalibration, models::Arm};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ArmStatus {
    pub status_byte: u8,
    pub count: u32,
    pub tilt: f64,
}

/// Last reported position of both arms. Replaced as a whole on every update frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AxisStatus {
    pub east: ArmStatus,
    pub west: ArmStatus,
}

impl AxisStatus {
    pub fn from_update(update: &UpdatePayload, calibration: &AxisCalibration) -> Self {
        Self {
            east: ArmStatus {
                status_byte: update.east_status,
                count: update.east_count,
                tilt: calibration.count_to_tilt(Arm::East, update.east_count),
            },
            west: ArmStatus {
                status_byte: update.west_status,
                count: update.west_count,
                tilt: calibration.count_to_tilt(Arm::West, update.west_count),
            },
        }
    }

    pub fn arm(&self, arm: Arm) -> &ArmStatus {
        match arm {
            Arm::East => &self.east,
            Arm::West => &self.west,
        }
    }
}
