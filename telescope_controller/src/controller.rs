use std::{sync::Arc, time::SystemTime};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use ez80::ZeroSelection;
use tokio::sync::{Mutex, watch};
use tracing::{info, instrument, warn};
use utilities::shutdown::ReleaseOnShutdown;

use crate::{
    config::{StowConfig, TelescopeConfig, TrackingConfig},
    coordinates::CoordinateProvider,
    drive::{DriveError, DriveInterface},
    models::{Arm, ArmState, Axis},
    report::{AxisReport, AxisSample, TelescopeStatus},
    tracker::{TrackerHandle, TrackerPhase, TrackerSettings},
};

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("{axis} drive: {source}")]
    Drive {
        axis: Axis,
        #[source]
        source: DriveError,
    },
}

impl ControllerError {
    fn drive(axis: Axis) -> impl FnOnce(DriveError) -> Self {
        move |source| ControllerError::Drive { axis, source }
    }
}

/// The pair of trackers of the current observation.
struct Session {
    ns: TrackerHandle,
    md: TrackerHandle,
}

impl Session {
    /// Ends both trackers, reporting the first failure.
    async fn end(self) -> Result<(), ControllerError> {
        let ns = self.ns.end().await;
        let md = self.md.end().await;
        ns.map_err(ControllerError::drive(Axis::Ns))?;
        md.map_err(ControllerError::drive(Axis::Md))?;
        Ok(())
    }
}

/// The current target and tracker phases, published for status readers.
struct Observation {
    target: Arc<dyn CoordinateProvider>,
    ns: watch::Receiver<TrackerPhase>,
    md: watch::Receiver<TrackerPhase>,
}

impl Observation {
    fn phase(&self, axis: Axis) -> TrackerPhase {
        match axis {
            Axis::Ns => *self.ns.borrow(),
            Axis::Md => *self.md.borrow(),
        }
    }
}

/// Coordinates the NS and MD axes. At most one pair of trackers runs at a
/// time; any new motion request ends the previous pair first.
///
/// Motion requests are serialised by the session lock. Status reads never
/// take it.
pub struct TelescopeController {
    ns: Arc<DriveInterface>,
    md: Arc<DriveInterface>,
    tracking: TrackingConfig,
    stow: StowConfig,
    session: Mutex<Option<Session>>,
    observation: ArcSwapOption<Observation>,
}

impl TelescopeController {
    pub fn new(config: &TelescopeConfig) -> Self {
        Self {
            ns: Arc::new(DriveInterface::new(Axis::Ns, &config.ns)),
            md: Arc::new(DriveInterface::new(Axis::Md, &config.md)),
            tracking: config.tracking.clone(),
            stow: config.stow.clone(),
            session: Mutex::new(None),
            observation: ArcSwapOption::empty(),
        }
    }

    pub fn drive(&self, axis: Axis) -> &Arc<DriveInterface> {
        match axis {
            Axis::Ns => &self.ns,
            Axis::Md => &self.md,
        }
    }

    pub fn tracking(&self) -> &TrackingConfig {
        &self.tracking
    }

    /// Ends the running pair, if any. A drive that could not be reached while
    /// stopping is latched so it is not trusted afterwards.
    async fn end_session(&self, session: &mut Option<Session>) -> Result<(), ControllerError> {
        self.observation.store(None);
        let Some(previous) = session.take() else {
            return Ok(());
        };

        let ended = previous.end().await;
        if let Err(ControllerError::Drive { axis, source }) = &ended {
            warn!(%axis, "Failed to end observation: {}", source);
            if source.is_link_failure() {
                self.drive(*axis).latch_link_fault(source.to_string());
            }
        }
        ended
    }

    /// Points both axes at `target`, keeping them there when `track` is set.
    ///
    /// If the previous observation cannot be ended cleanly nothing new is
    /// started and the drive errors stay latched.
    #[instrument(skip(self, target))]
    pub async fn observe(
        &self,
        target: Arc<dyn CoordinateProvider>,
        track: bool,
    ) -> Result<(), ControllerError> {
        let mut session = self.session.lock().await;
        self.end_session(&mut session).await?;

        for axis in Axis::ALL {
            self.drive(axis).clear_error();
        }

        let spawn = |axis: Axis| {
            TrackerHandle::spawn(
                Arc::clone(self.drive(axis)),
                Arc::clone(&target),
                TrackerSettings::new(&self.tracking, axis),
                track,
            )
        };
        let ns = spawn(Axis::Ns);
        let md = spawn(Axis::Md);

        self.observation.store(Some(Arc::new(Observation {
            target,
            ns: ns.watch_phase(),
            md: md.watch_phase(),
        })));
        *session = Some(Session { ns, md });
        info!("Started observation");
        Ok(())
    }

    pub async fn wind_stow(&self) -> Result<(), ControllerError> {
        info!("Moving to wind stow");
        self.observe(Arc::new(self.stow.wind), false).await
    }

    pub async fn maintenance_stow(&self) -> Result<(), ControllerError> {
        info!("Moving to maintenance stow");
        self.observe(Arc::new(self.stow.maintenance), false).await
    }

    /// Ends the observation and stops both drives. Both are always attempted.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<(), ControllerError> {
        let mut session = self.session.lock().await;
        let ended = self.end_session(&mut session).await;

        let ns = self.ns.stop().await;
        let md = self.md.stop().await;

        ended?;
        ns.map_err(ControllerError::drive(Axis::Ns))?;
        md.map_err(ControllerError::drive(Axis::Md))?;
        info!("Telescope stopped");
        Ok(())
    }

    pub fn set_arm_state(&self, axis: Axis, arm: Arm, state: ArmState) {
        self.drive(axis).set_arm_state(arm, state);
    }

    pub fn set_arm_offset(&self, axis: Axis, arm: Arm, offset: f64) {
        self.drive(axis).set_arm_offset(arm, offset);
    }

    /// Ends any observation, then sends the selected arms of `axis` home.
    #[instrument(skip(self))]
    pub async fn zero_drives(
        &self,
        axis: Axis,
        selection: ZeroSelection,
        start: u8,
    ) -> Result<(), ControllerError> {
        let mut session = self.session.lock().await;
        self.end_session(&mut session).await?;
        self.drive(axis)
            .zero_drives(selection, start)
            .await
            .map_err(ControllerError::drive(axis))
    }

    /// Snapshot of both axes from published state. Never waits on the drives
    /// or on a motion request in progress.
    pub fn status(&self) -> TelescopeStatus {
        let observation = self.observation.load();
        let now = SystemTime::now();

        let report = |axis: Axis| {
            let drive = self.drive(axis);
            AxisReport::new(AxisSample {
                status: drive.snapshot(),
                settings: drive.settings(),
                driving: drive.is_driving(),
                fault: drive.fault(),
                limits: self.tracking.axis(axis),
                target: observation
                    .as_ref()
                    .map(|observation| observation.target.position_at(axis, now)),
                phase: observation
                    .as_ref()
                    .map(|observation| observation.phase(axis)),
            })
        };

        TelescopeStatus::new(report(Axis::Ns), report(Axis::Md))
    }
}

#[async_trait]
impl ReleaseOnShutdown for TelescopeController {
    fn name(&self) -> String {
        "telescope".to_string()
    }

    async fn release(&self) -> anyhow::Result<()> {
        self.stop().await?;
        Ok(())
    }
}
