use crate::{command::Command, error::ProtocolError, ticks::pack_ticks};

/// Motor speed bit of a drive request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Speed {
    Fast = 0,
    Slow = 1,
}

/// Direction and speed bits for one arm.
///
/// `direction` is the controller's raw direction bit; which physical sense
/// 0 and 1 stand for depends on the axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmDrive {
    pub direction: u8,
    pub speed: Speed,
}

impl ArmDrive {
    pub fn new(direction: u8, speed: Speed) -> Self {
        Self {
            direction: direction & 1,
            speed,
        }
    }

    fn east_bits(self) -> u8 {
        2 * (self.direction & 1) + self.speed as u8
    }

    fn west_bits(self) -> u8 {
        8 * (self.direction & 1) + 4 * self.speed as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmTarget {
    pub count: u32,
    pub drive: ArmDrive,
}

/// A motion command for one or both arms of an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveRequest {
    Both { east: ArmTarget, west: ArmTarget },
    East(ArmTarget),
    West(ArmTarget),
}

impl DriveRequest {
    pub fn command(&self) -> Command {
        match self {
            DriveRequest::Both { .. } => Command::DriveBoth,
            DriveRequest::East(_) => Command::DriveEast,
            DriveRequest::West(_) => Command::DriveWest,
        }
    }

    /// Target counts (east first) followed by the packed direction/speed byte
    /// `2*eastDir + eastSpeed + 8*westDir + 4*westSpeed`.
    pub fn payload(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut payload = Vec::with_capacity(7);
        match self {
            DriveRequest::Both { east, west } => {
                payload.extend_from_slice(&pack_ticks(east.count)?);
                payload.extend_from_slice(&pack_ticks(west.count)?);
                payload.push(east.drive.east_bits() + west.drive.west_bits());
            }
            DriveRequest::East(east) => {
                payload.extend_from_slice(&pack_ticks(east.count)?);
                payload.push(east.drive.east_bits());
            }
            DriveRequest::West(west) => {
                payload.extend_from_slice(&pack_ticks(west.count)?);
                payload.push(west.drive.west_bits());
            }
        }
        Ok(payload)
    }
}

/// Arm selection for the zero-drives command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZeroSelection {
    East,
    West,
    Both,
}

impl ZeroSelection {
    pub fn payload(self, start: u8) -> [u8; 2] {
        let arm = match self {
            ZeroSelection::East => b'E',
            ZeroSelection::West => b'W',
            ZeroSelection::Both => b'B',
        };
        [arm, start]
    }
}
