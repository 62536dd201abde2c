//! Predictive pointing loop for one axis.
//!
//! The drives are slow compared with the motion of a target, so every
//! command aims at where the target will be once the drive gets there.

use serde::Serialize;
use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};
use tokio::{sync::watch, task::JoinHandle, time::timeout};
use tracing::{debug, error, info, warn};
use utilities::minimize::minimize_bounded;

use crate::{
    config::{AxisTrackingConfig, TrackingConfig},
    coordinates::CoordinateProvider,
    drive::{AxisStatus, DriveError, DriveInterface},
    models::{Arm, Axis, AxisSettings},
};

/// Resolution of the lead-time search, in seconds.
const LEAD_RESOLUTION: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerPhase {
    Slewing,
    Tracking,
    Finished,
}

#[derive(Debug)]
pub enum TrackerExit {
    /// Reached the target and no continuous tracking was requested.
    Completed,
    Stopped,
    Failed(DriveError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerSettings {
    pub limits: AxisTrackingConfig,
    pub slew_poll: Duration,
    pub track_poll: Duration,
    pub max_lead: Duration,
    pub stop_grace: Duration,
}

impl TrackerSettings {
    pub fn new(config: &TrackingConfig, axis: Axis) -> Self {
        Self {
            limits: *config.axis(axis),
            slew_poll: Duration::from_millis(config.slew_poll_ms),
            track_poll: Duration::from_millis(config.track_poll_ms),
            max_lead: Duration::from_secs_f64(config.max_lead_s),
            stop_grace: Duration::from_millis(config.stop_grace_ms),
        }
    }
}

/// The enabled arm furthest from `target`, as its offset-corrected angle and
/// its distance from the target. `None` when both arms are disabled.
pub fn worst_arm(status: &AxisStatus, settings: &AxisSettings, target: f64) -> Option<(f64, f64)> {
    Arm::ALL
        .into_iter()
        .filter(|arm| settings.arm(*arm).state.is_enabled())
        .map(|arm| {
            let position = status.arm(arm).tilt - settings.arm(arm).offset;
            (position, (position - target).abs())
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

/// True when every enabled arm is within `tolerance` of its offset target.
pub fn on_target(status: &AxisStatus, settings: &AxisSettings, target: f64, tolerance: f64) -> bool {
    worst_arm(status, settings, target).is_some_and(|(_, distance)| distance <= tolerance)
}

/// Lead time at which a drive at `furthest`, moving at `rate`, would just
/// reach the predicted target.
fn slew_lead(furthest: f64, rate: f64, max_lead: f64, predict: impl Fn(f64) -> f64) -> f64 {
    minimize_bounded(
        |dt| ((furthest - predict(dt)).abs() - dt * rate).abs(),
        0.0,
        max_lead,
        LEAD_RESOLUTION,
    )
}

/// Lead time after which the target will have moved about one tolerance width.
fn track_lead(tolerance: f64, max_lead: f64, predict: impl Fn(f64) -> f64) -> f64 {
    let here = predict(0.0);
    minimize_bounded(
        |dt| ((predict(dt) - here).abs() - tolerance).abs(),
        0.0,
        max_lead,
        LEAD_RESOLUTION,
    )
}

struct Tracker {
    drive: Arc<DriveInterface>,
    target: Arc<dyn CoordinateProvider>,
    settings: TrackerSettings,
    track: bool,
    stop: watch::Receiver<bool>,
    phase: watch::Sender<TrackerPhase>,
}

impl Tracker {
    fn axis(&self) -> Axis {
        self.drive.axis()
    }

    fn target_at(&self, at: SystemTime) -> f64 {
        self.settings
            .limits
            .clamp_to_soft_limits(self.target.position_at(self.axis(), at))
    }

    fn stopped(&self) -> bool {
        *self.stop.borrow() || self.stop.has_changed().is_err()
    }

    async fn pause(&mut self, period: Duration) {
        let _ = timeout(period, self.stop.wait_for(|stop| *stop)).await;
    }

    async fn run(mut self) -> TrackerExit {
        let exit = self.slew_then_track().await;
        self.phase.send_replace(TrackerPhase::Finished);
        info!(axis = %self.axis(), ?exit, "Tracker finished");
        exit
    }

    async fn slew_then_track(&mut self) -> TrackerExit {
        let limits = self.settings.limits;
        let max_lead = self.settings.max_lead.as_secs_f64();

        self.phase.send_replace(TrackerPhase::Slewing);
        info!(axis = %self.axis(), "Slewing to target");
        loop {
            if self.stopped() {
                return TrackerExit::Stopped;
            }
            if let Some(fault) = self.drive.fault() {
                return self.fail(DriveError::Fault(fault)).await;
            }
            if self.drive.is_driving() {
                self.pause(self.settings.slew_poll).await;
                continue;
            }

            let status = match self.drive.get_status().await {
                Ok(status) => status,
                Err(e) => {
                    if let Some(exit) = self.on_error(e).await {
                        return exit;
                    }
                    self.pause(self.settings.slew_poll).await;
                    continue;
                }
            };

            let now = SystemTime::now();
            let Some((furthest, distance)) =
                worst_arm(&status, &self.drive.settings(), self.target_at(now))
            else {
                return self.give_up(DriveError::ArmsDisabled).await;
            };
            if distance <= limits.tolerance {
                info!(axis = %self.axis(), "On target");
                break;
            }

            let dt = slew_lead(furthest, limits.max_rate, max_lead, |dt| {
                self.target_at(now + Duration::from_secs_f64(dt))
            });
            debug!(axis = %self.axis(), distance, lead = dt, "Commanding slew");
            if let Err(e) = self.command(now + Duration::from_secs_f64(dt)).await {
                if let Some(exit) = self.on_error(e).await {
                    return exit;
                }
            }
            self.pause(self.settings.slew_poll).await;
        }

        if !self.track {
            return TrackerExit::Completed;
        }

        self.phase.send_replace(TrackerPhase::Tracking);
        info!(axis = %self.axis(), "Tracking target");
        loop {
            if self.stopped() {
                return TrackerExit::Stopped;
            }
            if let Some(fault) = self.drive.fault() {
                return self.fail(DriveError::Fault(fault)).await;
            }
            if self.drive.is_driving() {
                self.pause(self.settings.track_poll).await;
                continue;
            }

            let status = match self.drive.get_status().await {
                Ok(status) => status,
                Err(e) => {
                    if let Some(exit) = self.on_error(e).await {
                        return exit;
                    }
                    self.pause(self.settings.track_poll).await;
                    continue;
                }
            };

            let now = SystemTime::now();
            if on_target(
                &status,
                &self.drive.settings(),
                self.target_at(now),
                limits.tolerance,
            ) {
                self.pause(self.settings.track_poll).await;
                continue;
            }

            let dt = track_lead(limits.tolerance, max_lead, |dt| {
                self.target_at(now + Duration::from_secs_f64(dt))
            });
            debug!(axis = %self.axis(), lead = dt, "Commanding track step");
            if let Err(e) = self.command(now + Duration::from_secs_f64(dt)).await {
                if let Some(exit) = self.on_error(e).await {
                    return exit;
                }
            }
            self.pause(self.settings.track_poll).await;
        }
    }

    async fn command(&self, at: SystemTime) -> Result<(), DriveError> {
        let target = self.target_at(at);
        let settings = self.drive.settings();
        let limits = &self.settings.limits;

        let east = limits.clamp_to_soft_limits(target + settings.east.offset);
        let west = limits.clamp_to_soft_limits(target + settings.west.offset);
        self.drive.set_tilts(east, west).await?;
        Ok(())
    }

    /// Decides whether an error ends the tracker. Deadband refusals do not.
    async fn on_error(&self, error: DriveError) -> Option<TrackerExit> {
        match error {
            DriveError::Count { .. } => {
                debug!(axis = %self.axis(), "Move inside deadband, waiting");
                None
            }
            DriveError::Fault(_) => Some(self.fail(error).await),
            e if e.is_link_failure() => {
                error!(axis = %self.axis(), "Lost contact with drive: {}", e);
                self.drive.latch_link_fault(e.to_string());
                Some(self.fail(e).await)
            }
            e => Some(self.give_up(e).await),
        }
    }

    /// Ends on an error the drive did not latch itself, latching it so the
    /// axis reports the failure until the next motion request.
    async fn give_up(&self, error: DriveError) -> TrackerExit {
        warn!(axis = %self.axis(), "Tracker giving up: {}", error);
        self.drive.latch_tracking_fault(error.to_string());
        self.fail(error).await
    }

    async fn fail(&self, error: DriveError) -> TrackerExit {
        warn!(axis = %self.axis(), "Stopping drive after error: {}", error);
        if let Err(e) = self.drive.stop().await {
            warn!(axis = %self.axis(), "Failed to stop drive: {}", e);
        }
        TrackerExit::Failed(error)
    }
}

/// Handle to a running tracker task. Ending or waiting consumes the handle.
pub struct TrackerHandle {
    axis: Axis,
    drive: Arc<DriveInterface>,
    stop: watch::Sender<bool>,
    phase: watch::Receiver<TrackerPhase>,
    task: JoinHandle<TrackerExit>,
    grace: Duration,
}

impl TrackerHandle {
    pub fn spawn(
        drive: Arc<DriveInterface>,
        target: Arc<dyn CoordinateProvider>,
        settings: TrackerSettings,
        track: bool,
    ) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let (phase_tx, phase) = watch::channel(TrackerPhase::Slewing);

        let tracker = Tracker {
            drive: Arc::clone(&drive),
            target,
            settings,
            track,
            stop: stop_rx,
            phase: phase_tx,
        };
        let task = tokio::spawn(tracker.run());

        Self {
            axis: drive.axis(),
            drive,
            stop,
            phase,
            task,
            grace: settings.stop_grace,
        }
    }

    pub fn phase(&self) -> TrackerPhase {
        *self.phase.borrow()
    }

    /// Receiver that follows the phase without holding the handle.
    pub fn watch_phase(&self) -> watch::Receiver<TrackerPhase> {
        self.phase.clone()
    }

    /// Waits for the tracker to finish on its own.
    pub async fn wait(self) -> Option<TrackerExit> {
        match self.task.await {
            Ok(exit) => Some(exit),
            Err(e) => {
                warn!(axis = %self.axis, "Tracker task failed: {}", e);
                None
            }
        }
    }

    /// Asks the tracker to stop, waits up to the grace period for it, then
    /// stops the drive.
    pub async fn end(self) -> Result<Option<TrackerExit>, DriveError> {
        self.stop.send_replace(true);

        let mut task = self.task;
        let exit = match timeout(self.grace, &mut task).await {
            Ok(Ok(exit)) => Some(exit),
            Ok(Err(e)) => {
                warn!(axis = %self.axis, "Tracker task failed: {}", e);
                None
            }
            Err(_) => {
                warn!(axis = %self.axis, "Tracker still busy after {:?}, aborting", self.grace);
                task.abort();
                None
            }
        };

        self.drive.stop().await?;
        Ok(exit)
    }
}
