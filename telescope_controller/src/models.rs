use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Ns,
    Md,
}

impl Axis {
    pub const ALL: [Axis; 2] = [Axis::Ns, Axis::Md];

    pub fn name(self) -> &'static str {
        match self {
            Axis::Ns => "NS",
            Axis::Md => "MD",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arm {
    East,
    West,
}

impl Arm {
    pub const ALL: [Arm; 2] = [Arm::East, Arm::West];
}

impl fmt::Display for Arm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arm::East => f.write_str("east"),
            Arm::West => f.write_str("west"),
        }
    }
}

/// Operator-selected drive mode of a single arm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArmState {
    #[default]
    Auto,
    Slow,
    Disabled,
}

impl ArmState {
    pub fn is_enabled(self) -> bool {
        self != ArmState::Disabled
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ArmSettings {
    pub state: ArmState,
    /// Pointing offset in radians added to the target angle for this arm.
    pub offset: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AxisSettings {
    pub east: ArmSettings,
    pub west: ArmSettings,
}

impl AxisSettings {
    pub fn arm(&self, arm: Arm) -> &ArmSettings {
        match arm {
            Arm::East => &self.east,
            Arm::West => &self.west,
        }
    }

    pub fn arm_mut(&mut self, arm: Arm) -> &mut ArmSettings {
        match arm {
            Arm::East => &mut self.east,
            Arm::West => &mut self.west,
        }
    }
}
