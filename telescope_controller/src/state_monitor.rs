use anyhow::Result;
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};
use utilities::shutdown::ShutdownSignal;

use crate::{
    config::{AxisTrackingConfig, MonitorConfig},
    controller::TelescopeController,
    drive::AxisStatus,
    models::{Arm, Axis},
};

/// First arm found beyond the hard travel limits.
fn arm_beyond_hard_limits(status: &AxisStatus, limits: &AxisTrackingConfig) -> Option<Arm> {
    Arm::ALL
        .into_iter()
        .find(|arm| limits.beyond_hard_limits(status.arm(*arm).tilt))
}

/// Keeps the cached drive status fresh while the drives are idle and stops
/// the telescope when an arm leaves its hard limits.
pub async fn run_state_monitor(
    controller: Arc<TelescopeController>,
    config: MonitorConfig,
    mut shutdown: ShutdownSignal,
) -> Result<()> {
    let mut interval = tokio::time::interval(Duration::from_millis(config.interval_ms));
    let mut beyond_limits = false;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.wait() => break,
        }

        let mut violation = None;
        for axis in Axis::ALL {
            let drive = controller.drive(axis);

            let status = if drive.is_driving() || drive.fault().is_some() {
                drive.snapshot()
            } else {
                match drive.get_status().await {
                    Ok(status) => status,
                    Err(e) => {
                        warn!(%axis, "Failed to refresh drive status: {}", e);
                        drive.snapshot()
                    }
                }
            };

            if let Some(arm) = arm_beyond_hard_limits(&status, controller.tracking().axis(axis)) {
                violation.get_or_insert((axis, arm, status.arm(arm).tilt));
            }
        }

        match violation {
            Some((axis, arm, tilt)) if !beyond_limits => {
                error!(%axis, %arm, tilt, "Arm beyond hard limit, stopping telescope");
                beyond_limits = true;
                if let Err(e) = controller.stop().await {
                    error!("Failed to stop telescope: {}", e);
                }
            }
            Some(_) => debug!("Arm still beyond hard limit"),
            None if beyond_limits => {
                info!("All arms back within hard limits");
                beyond_limits = false;
            }
            None => {}
        }
    }

    info!("State monitor stopped");
    Ok(())
}
