//! Serializable snapshot of the whole telescope for status consumers.

use serde::Serialize;

use crate::{
    config::AxisTrackingConfig,
    drive::{AxisStatus, DriveFault},
    models::{Arm, ArmState, AxisSettings},
    tracker::TrackerPhase,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ArmReport {
    pub count: u32,
    pub tilt: f64,
    pub driving: bool,
    pub state: ArmState,
    pub offset: f64,
    pub on_target: bool,
    pub controller_status: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AxisReport {
    pub east: ArmReport,
    pub west: ArmReport,
    /// Empty when the drive is not latched in error.
    pub last_error: String,
    /// The requested target lies outside the soft limits and was clamped.
    pub at_limit: bool,
    pub phase: Option<TrackerPhase>,
}

/// Inputs gathered from one axis at a single instant.
pub struct AxisSample<'a> {
    pub status: AxisStatus,
    pub settings: AxisSettings,
    pub driving: bool,
    pub fault: Option<DriveFault>,
    pub limits: &'a AxisTrackingConfig,
    /// Unclamped target angle, when a target is set.
    pub target: Option<f64>,
    pub phase: Option<TrackerPhase>,
}

impl AxisReport {
    pub fn new(sample: AxisSample<'_>) -> Self {
        let target = sample
            .target
            .map(|target| sample.limits.clamp_to_soft_limits(target));

        let arm = |arm: Arm| {
            let status = sample.status.arm(arm);
            let settings = sample.settings.arm(arm);
            let on_target = settings.state.is_enabled()
                && target.is_some_and(|target| {
                    (status.tilt - settings.offset - target).abs() <= sample.limits.tolerance
                });
            ArmReport {
                count: status.count,
                tilt: status.tilt,
                driving: sample.driving && settings.state.is_enabled(),
                state: settings.state,
                offset: settings.offset,
                on_target,
                controller_status: status.status_byte,
            }
        };

        Self {
            east: arm(Arm::East),
            west: arm(Arm::West),
            last_error: sample
                .fault
                .map(|fault| fault.to_string())
                .unwrap_or_default(),
            at_limit: sample.target.is_some_and(|t| target != Some(t)),
            phase: sample.phase,
        }
    }

    /// True when every enabled arm is on target and at least one is enabled.
    pub fn on_target(&self) -> bool {
        let enabled: Vec<&ArmReport> = [&self.east, &self.west]
            .into_iter()
            .filter(|arm| arm.state.is_enabled())
            .collect();
        !enabled.is_empty() && enabled.iter().all(|arm| arm.on_target)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelescopeStatus {
    pub ns: AxisReport,
    pub md: AxisReport,
    /// Slewing while either axis slews, then tracking while either tracks.
    pub phase: Option<TrackerPhase>,
    pub on_target: bool,
}

impl TelescopeStatus {
    pub fn new(ns: AxisReport, md: AxisReport) -> Self {
        let phases = [ns.phase, md.phase];
        let phase = [
            TrackerPhase::Slewing,
            TrackerPhase::Tracking,
            TrackerPhase::Finished,
        ]
        .into_iter()
        .find(|phase| phases.contains(&Some(*phase)));

        let on_target = ns.on_target() && md.on_target();
        Self {
            ns,
            md,
            phase,
            on_target,
        }
    }
}
