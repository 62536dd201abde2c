pub mod calibration;
pub mod error;
pub mod interface;
pub mod link;
pub mod status;

#[cfg(test)]
pub(crate) mod mock;

pub use calibration::{AxisCalibration, CalibrationKind, DirectionConvention};
pub use error::{DriveError, DriveFault};
pub use interface::{CommandOutcome, DriveInterface};
pub use status::{ArmStatus, AxisStatus};
