use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use arc_swap::{ArcSwap, ArcSwapOption};
use ez80::{
    ArmDrive, ArmTarget, Command, DriveRequest, Frame, MAX_TICKS, ProtocolError, Speed,
    UpdatePayload, ZeroSelection,
};
use tokio::{
    sync::{Mutex, Notify},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    config::DriveConfig,
    drive::{
        calibration::AxisCalibration,
        error::{DriveError, DriveFault},
        link::DriveLink,
        status::AxisStatus,
    },
    models::{Arm, ArmState, Axis, AxisSettings},
};

/// Non-fault result of a command: either the controller accepted it, or it
/// was pre-empted before acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Accepted,
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Reply {
    Status { command: Command, code: u8 },
    Update(AxisStatus),
    Interrupted,
}

impl Reply {
    fn is_idle(&self) -> bool {
        matches!(
            self,
            Reply::Status {
                command: Command::Status,
                code: 0
            }
        )
    }

    fn is_status(&self) -> bool {
        matches!(
            self,
            Reply::Status {
                command: Command::Status,
                ..
            }
        )
    }
}

#[derive(Default)]
struct Interrupt {
    requested: AtomicBool,
    notify: Notify,
}

impl Interrupt {
    fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenerExit {
    Completed,
    Interrupted,
    Failed,
}

struct ActiveCommand {
    request: DriveRequest,
    handle: JoinHandle<ListenerExit>,
    interrupt: Arc<Interrupt>,
}

impl ActiveCommand {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// State reachable from both foreground calls and the background listener.
struct Shared {
    axis: Axis,
    node: String,
    address: String,
    timeout: Duration,
    socket_count_warning: u8,
    socket_count_limit: u8,
    socket_backoff: Duration,
    calibration: AxisCalibration,

    status: ArcSwap<AxisStatus>,
    fault: ArcSwapOption<DriveFault>,
    driving: AtomicBool,
}

impl Shared {
    async fn open_link(&self) -> Result<DriveLink, DriveError> {
        DriveLink::open(&self.node, &self.address, self.timeout).await
    }

    fn latch(&self, fault: DriveFault) -> DriveError {
        error!(axis = %self.axis, %fault, "Drive entering error state");
        self.fault.store(Some(Arc::new(fault.clone())));
        DriveError::Fault(fault)
    }

    async fn handle(&self, frame: Frame, interrupt_expected: bool) -> Result<Reply, DriveError> {
        let command = frame.command();
        match command {
            Command::Update => {
                let update = UpdatePayload::decode(&frame.payload)?;
                let status = AxisStatus::from_update(&update, &self.calibration);
                self.status.store(Arc::new(status));
                debug!(
                    axis = %self.axis,
                    east_count = status.east.count,
                    west_count = status.west.count,
                    "Position update"
                );
                Ok(Reply::Update(status))
            }
            Command::Error => {
                let code = frame.code()?;
                if code != 0 {
                    return Err(self.latch(DriveFault::Hardware { code }));
                }
                if interrupt_expected {
                    debug!(axis = %self.axis, "Interrupt acknowledged");
                } else {
                    warn!(axis = %self.axis, "Controller interrupted a command nobody pre-empted");
                }
                Ok(Reply::Interrupted)
            }
            Command::SocketCount => {
                let count = frame.code()?;
                if count > self.socket_count_limit {
                    return Err(self.latch(DriveFault::SocketCountLimit {
                        count,
                        limit: self.socket_count_limit,
                    }));
                }
                if count > self.socket_count_warning {
                    warn!(axis = %self.axis, count, "High controller socket count, backing off");
                    tokio::time::sleep(self.socket_backoff).await;
                } else {
                    debug!(axis = %self.axis, count, "Controller socket count");
                }
                Ok(Reply::Status { command, code: count })
            }
            Command::Warning => {
                let code = frame.code()?;
                warn!(axis = %self.axis, code, "Controller warning");
                Ok(Reply::Status { command, code })
            }
            Command::Info | Command::Verbose | Command::Status | Command::Stop => {
                let code = frame.code()?;
                debug!(axis = %self.axis, %command, code, "Controller status");
                Ok(Reply::Status { command, code })
            }
            other => Err(ProtocolError::UnexpectedCommand(other.as_char()).into()),
        }
    }
}

/// Reads status frames for an accepted drive until the controller reports
/// idle, the command is interrupted, or the link fails.
async fn listen(shared: Arc<Shared>, mut link: DriveLink, interrupt: Arc<Interrupt>) -> ListenerExit {
    let exit = loop {
        if interrupt.is_requested() {
            break ListenerExit::Interrupted;
        }

        let received = tokio::select! {
            _ = interrupt.notify.notified() => break ListenerExit::Interrupted,
            received = link.receive() => received,
        };

        let reply = match received {
            Ok(frame) => shared.handle(frame, interrupt.is_requested()).await,
            Err(e) => Err(e),
        };

        match reply {
            Ok(reply) if reply.is_idle() => break ListenerExit::Completed,
            Ok(Reply::Interrupted) => break ListenerExit::Interrupted,
            Ok(_) => {}
            Err(DriveError::Fault(_)) => break ListenerExit::Failed,
            Err(_) if interrupt.is_requested() => break ListenerExit::Interrupted,
            Err(e) => {
                shared.latch(DriveFault::Link {
                    message: e.to_string(),
                });
                break ListenerExit::Failed;
            }
        }
    };

    shared.driving.store(false, Ordering::SeqCst);
    if let Err(e) = link.close().await {
        debug!(axis = %shared.axis, "Failed to close drive link: {}", e);
    }
    debug!(axis = %shared.axis, ?exit, "Drive listener finished");
    exit
}

/// Protocol state machine for the controller of one axis.
///
/// Commands and queries are serialised by the `active` lock. A new command
/// first retires the running one (interrupt, then join) so stale frames can
/// never overwrite the status of a newer command. The status snapshot is
/// published atomically and can be read at any time without the lock.
pub struct DriveInterface {
    shared: Arc<Shared>,
    settings: ArcSwap<AxisSettings>,
    minimum_count_limit: u32,
    slow_drive_limit: u32,
    interrupt_timeout: Duration,
    active: Mutex<Option<ActiveCommand>>,
}

impl DriveInterface {
    pub fn new(axis: Axis, config: &DriveConfig) -> Self {
        let shared = Shared {
            axis,
            node: config.node_name.clone(),
            address: config.address(),
            timeout: config.timeout(),
            socket_count_warning: config.socket_count_warning,
            socket_count_limit: config.socket_count_limit,
            socket_backoff: Duration::from_millis(config.socket_backoff_ms),
            calibration: config.axis_calibration(),
            status: ArcSwap::from_pointee(AxisStatus::default()),
            fault: ArcSwapOption::empty(),
            driving: AtomicBool::new(false),
        };

        Self {
            shared: Arc::new(shared),
            settings: ArcSwap::from_pointee(AxisSettings::default()),
            minimum_count_limit: config.minimum_count_limit,
            slow_drive_limit: config.slow_drive_limit,
            interrupt_timeout: Duration::from_millis(config.interrupt_timeout_ms),
            active: Mutex::new(None),
        }
    }

    pub fn axis(&self) -> Axis {
        self.shared.axis
    }

    pub fn calibration(&self) -> &AxisCalibration {
        &self.shared.calibration
    }

    /// Last published status, without contacting the controller.
    pub fn snapshot(&self) -> AxisStatus {
        **self.shared.status.load()
    }

    pub fn is_driving(&self) -> bool {
        self.shared.driving.load(Ordering::SeqCst)
    }

    pub fn fault(&self) -> Option<DriveFault> {
        self.shared.fault.load_full().map(|fault| (*fault).clone())
    }

    pub fn clear_error(&self) {
        if let Some(fault) = self.shared.fault.swap(None) {
            info!(axis = %self.shared.axis, %fault, "Clearing drive error");
        }
    }

    /// Marks the axis untrustworthy after a failure seen outside the drive.
    pub fn latch_link_fault(&self, message: impl Into<String>) {
        self.shared.latch(DriveFault::Link {
            message: message.into(),
        });
    }

    /// Marks the axis untrustworthy after its tracker abandoned a target.
    pub fn latch_tracking_fault(&self, message: impl Into<String>) {
        self.shared.latch(DriveFault::Tracking {
            message: message.into(),
        });
    }

    pub fn settings(&self) -> AxisSettings {
        **self.settings.load()
    }

    pub fn set_arm_state(&self, arm: Arm, state: ArmState) {
        info!(axis = %self.shared.axis, %arm, ?state, "Setting arm state");
        self.settings.rcu(|current| {
            let mut settings = **current;
            settings.arm_mut(arm).state = state;
            settings
        });
    }

    pub fn set_arm_offset(&self, arm: Arm, offset: f64) {
        info!(axis = %self.shared.axis, %arm, offset, "Setting arm offset");
        self.settings.rcu(|current| {
            let mut settings = **current;
            settings.arm_mut(arm).offset = offset;
            settings
        });
    }

    fn check_fault(&self) -> Result<(), DriveError> {
        match self.fault() {
            Some(fault) => Err(DriveError::Fault(fault)),
            None => Ok(()),
        }
    }

    pub async fn set_tilts(&self, east: f64, west: f64) -> Result<CommandOutcome, DriveError> {
        let calibration = &self.shared.calibration;
        self.command_arms(
            Some(calibration.tilt_to_count(Arm::East, east)),
            Some(calibration.tilt_to_count(Arm::West, west)),
        )
        .await
    }

    pub async fn set_east_tilt(&self, east: f64) -> Result<CommandOutcome, DriveError> {
        let count = self.shared.calibration.tilt_to_count(Arm::East, east);
        self.command_arms(Some(count), None).await
    }

    pub async fn set_west_tilt(&self, west: f64) -> Result<CommandOutcome, DriveError> {
        let count = self.shared.calibration.tilt_to_count(Arm::West, west);
        self.command_arms(None, Some(count)).await
    }

    pub async fn set_tilts_from_counts(
        &self,
        east: i64,
        west: i64,
    ) -> Result<CommandOutcome, DriveError> {
        self.command_arms(Some(east), Some(west)).await
    }

    pub async fn set_east_tilt_from_counts(&self, east: i64) -> Result<CommandOutcome, DriveError> {
        self.command_arms(Some(east), None).await
    }

    pub async fn set_west_tilt_from_counts(&self, west: i64) -> Result<CommandOutcome, DriveError> {
        self.command_arms(None, Some(west)).await
    }

    #[instrument(skip(self), fields(axis = %self.shared.axis))]
    async fn command_arms(
        &self,
        east: Option<i64>,
        west: Option<i64>,
    ) -> Result<CommandOutcome, DriveError> {
        self.check_fault()?;

        let settings = self.settings();
        let east_enabled = settings.east.state.is_enabled();
        let west_enabled = settings.west.state.is_enabled();
        match (east, west) {
            (Some(_), Some(_)) if !east_enabled && !west_enabled => {
                return Err(DriveError::ArmsDisabled);
            }
            (Some(_), None) if !east_enabled => {
                return Err(DriveError::ArmDisabled { arm: Arm::East });
            }
            (None, Some(_)) if !west_enabled => {
                return Err(DriveError::ArmDisabled { arm: Arm::West });
            }
            _ => {}
        }

        let east = east.filter(|_| east_enabled).map(to_ticks).transpose()?;
        let west = west.filter(|_| west_enabled).map(to_ticks).transpose()?;

        let mut active = self.active.lock().await;
        let current = match active.as_ref() {
            Some(command) if command.is_running() => self.snapshot(),
            _ => self.query(&mut active).await?,
        };

        let east = east.and_then(|count| self.plan(count, current.east.count, settings.east.state));
        let west = west.and_then(|count| self.plan(count, current.west.count, settings.west.state));

        let request = match (east, west) {
            (Some(east), Some(west)) => DriveRequest::Both { east, west },
            (Some(east), None) => DriveRequest::East(east),
            (None, Some(west)) => DriveRequest::West(west),
            (None, None) => {
                debug!(
                    "Requested move within {} count deadband",
                    self.minimum_count_limit
                );
                return Err(DriveError::Count {
                    limit: self.minimum_count_limit,
                });
            }
        };

        self.start(&mut active, request).await
    }

    /// Direction and speed towards `target`, or `None` inside the deadband.
    fn plan(&self, target: u32, current: u32, state: ArmState) -> Option<ArmTarget> {
        let offset = i64::from(target) - i64::from(current);
        let distance = offset.unsigned_abs();
        if distance <= u64::from(self.minimum_count_limit) {
            return None;
        }

        let speed = if distance <= u64::from(self.slow_drive_limit) || state == ArmState::Slow {
            Speed::Slow
        } else {
            Speed::Fast
        };
        let direction = self.shared.calibration.direction.direction(offset);

        Some(ArmTarget {
            count: target,
            drive: ArmDrive::new(direction, speed),
        })
    }

    async fn start(
        &self,
        active: &mut Option<ActiveCommand>,
        request: DriveRequest,
    ) -> Result<CommandOutcome, DriveError> {
        let payload = request.payload()?;
        self.retire(active).await?;

        let mut link = self.shared.open_link().await?;
        link.send(request.command(), &payload).await?;

        loop {
            let reply = self.shared.handle(link.receive().await?, false).await?;
            if reply.is_idle() {
                break;
            }
            if reply == Reply::Interrupted {
                info!(axis = %self.shared.axis, ?request, "Command interrupted before acceptance");
                if let Err(e) = link.close().await {
                    debug!("Failed to close drive link: {}", e);
                }
                return Ok(CommandOutcome::Interrupted);
            }
        }

        info!(axis = %self.shared.axis, ?request, "Drive command accepted");
        self.shared.driving.store(true, Ordering::SeqCst);
        let interrupt = Arc::new(Interrupt::default());
        let handle = tokio::spawn(listen(
            Arc::clone(&self.shared),
            link,
            Arc::clone(&interrupt),
        ));
        *active = Some(ActiveCommand {
            request,
            handle,
            interrupt,
        });

        Ok(CommandOutcome::Accepted)
    }

    /// Interrupts the running command and waits, bounded, for its listener.
    /// On timeout the command is kept and nothing may be sent.
    async fn retire(&self, active: &mut Option<ActiveCommand>) -> Result<(), DriveError> {
        let Some(command) = active.as_mut() else {
            return Ok(());
        };

        if command.is_running() {
            debug!(axis = %self.shared.axis, request = ?command.request, "Interrupting running command");
        }
        command.interrupt.request();

        match timeout(self.interrupt_timeout, &mut command.handle).await {
            Ok(Ok(exit)) => debug!(axis = %self.shared.axis, ?exit, "Retired previous command"),
            Ok(Err(e)) => warn!(axis = %self.shared.axis, "Drive listener task failed: {}", e),
            Err(_) => {
                warn!(
                    axis = %self.shared.axis,
                    "Drive listener did not stop within {:?}", self.interrupt_timeout
                );
                return Err(DriveError::InterruptTimeout(self.interrupt_timeout));
            }
        }

        *active = None;
        self.shared.driving.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn query(&self, active: &mut Option<ActiveCommand>) -> Result<AxisStatus, DriveError> {
        self.retire(active).await?;

        let mut link = self.shared.open_link().await?;
        link.send(Command::Update, &[]).await?;

        let mut latest = None;
        let status = loop {
            match self.shared.handle(link.receive().await?, false).await? {
                Reply::Update(status) => latest = Some(status),
                reply if reply.is_status() => {
                    if let Some(status) = latest {
                        break status;
                    }
                }
                _ => {}
            }
        };

        link.close().await?;
        Ok(status)
    }

    /// Current status. While a drive is running this is the cached snapshot;
    /// otherwise the controller is queried.
    #[instrument(skip(self), fields(axis = %self.shared.axis))]
    pub async fn get_status(&self) -> Result<AxisStatus, DriveError> {
        self.check_fault()?;

        let mut active = self.active.lock().await;
        if let Some(command) = active.as_ref() {
            if command.is_running() {
                return Ok(self.snapshot());
            }
        }
        self.query(&mut active).await
    }

    /// Sends a single command and waits for the controller's status reply.
    async fn exchange(&self, command: Command, payload: &[u8]) -> Result<(), DriveError> {
        let mut active = self.active.lock().await;
        self.retire(&mut active).await?;

        let mut link = self.shared.open_link().await?;
        link.send(command, payload).await?;
        loop {
            if self.shared.handle(link.receive().await?, true).await?.is_status() {
                break;
            }
        }

        link.close().await?;
        Ok(())
    }

    /// Interrupts any running command and stops both arms. Allowed while in
    /// error state.
    #[instrument(skip(self), fields(axis = %self.shared.axis))]
    pub async fn stop(&self) -> Result<(), DriveError> {
        self.exchange(Command::Stop, &[]).await?;
        info!(axis = %self.shared.axis, "Drive stopped");
        Ok(())
    }

    pub async fn set_verbose(&self, level: u8) -> Result<(), DriveError> {
        self.exchange(Command::Verbose, &[level]).await
    }

    /// Drives the selected arms to their zero reference.
    #[instrument(skip(self), fields(axis = %self.shared.axis))]
    pub async fn zero_drives(&self, selection: ZeroSelection, start: u8) -> Result<(), DriveError> {
        self.check_fault()?;
        self.exchange(Command::ZeroDrives, &selection.payload(start))
            .await
    }
}

fn to_ticks(count: i64) -> Result<u32, DriveError> {
    u32::try_from(count)
        .ok()
        .filter(|ticks| *ticks <= MAX_TICKS)
        .ok_or(DriveError::CountOutOfRange { count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::{
        calibration::DirectionConvention,
        mock::{MockController, Script, drive_config, idle_at, obedient, status, update},
    };
    use approx::assert_abs_diff_eq;
    use std::time::Instant;

    const NODE: &str = "TESTDRIVE";
    const ZERO: u32 = 8_388_608;

    fn drive_for(mock: &MockController, direction: DirectionConvention) -> DriveInterface {
        let config = DriveConfig {
            direction,
            ..drive_config(NODE, mock.port, DriveConfig::ns_default())
        };
        DriveInterface::new(Axis::Ns, &config)
    }

    async fn start(script: Script) -> (MockController, DriveInterface) {
        let mock = MockController::start(NODE, script).await;
        let drive = drive_for(&mock, DirectionConvention::IncreasingIsZero);
        (mock, drive)
    }

    async fn wait_until_idle(drive: &DriveInterface) {
        for _ in 0..200 {
            if !drive.is_driving() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("drive never went idle");
    }

    #[tokio::test]
    async fn moves_inside_deadband_send_no_motion() {
        let (mock, drive) = start(idle_at(ZERO, ZERO)).await;
        let zero = i64::from(ZERO);

        let result = drive.set_tilts_from_counts(zero + 40, zero - 40).await;
        assert!(matches!(result, Err(DriveError::Count { limit: 40 })));
        assert_eq!(mock.commands(), vec![Command::Update]);
        assert!(!drive.is_driving());
    }

    #[tokio::test]
    async fn deadband_boundary_for_each_arm() {
        use ArmState::{Auto, Disabled};

        let cases = [
            (40, -40, Auto, Auto, None),
            (-40, 40, Auto, Auto, None),
            (41, 0, Auto, Auto, Some(Command::DriveEast)),
            (0, -41, Auto, Auto, Some(Command::DriveWest)),
            (41, -41, Auto, Auto, Some(Command::DriveBoth)),
            (-41, 40, Auto, Auto, Some(Command::DriveEast)),
            (5000, 40, Disabled, Auto, None),
            (5000, 41, Disabled, Auto, Some(Command::DriveWest)),
            (-40, 5000, Auto, Disabled, None),
        ];

        let zero = i64::from(ZERO);
        for (east, west, east_state, west_state, expected) in cases {
            let (mock, drive) = start(idle_at(ZERO, ZERO)).await;
            drive.set_arm_state(Arm::East, east_state);
            drive.set_arm_state(Arm::West, west_state);

            let result = drive.set_tilts_from_counts(zero + east, zero + west).await;
            match expected {
                None => {
                    assert!(
                        matches!(result, Err(DriveError::Count { limit: 40 })),
                        "({east}, {west}) gave {result:?}"
                    );
                    assert_eq!(mock.commands(), vec![Command::Update]);
                    assert!(!drive.is_driving());
                }
                Some(command) => {
                    assert_eq!(result.unwrap(), CommandOutcome::Accepted);
                    assert_eq!(mock.commands(), vec![Command::Update, command]);
                }
            }
        }
    }

    #[tokio::test]
    async fn deadband_while_driving_plans_from_snapshot() {
        let (mock, drive) = start(idle_at(ZERO, ZERO)).await;
        let zero = i64::from(ZERO);

        drive.set_tilts_from_counts(zero + 5000, zero + 5000).await.unwrap();
        assert!(drive.is_driving());

        let result = drive.set_tilts_from_counts(zero + 40, zero - 40).await;
        assert!(matches!(result, Err(DriveError::Count { limit: 40 })));

        // the running drive is neither retired nor joined by a new frame
        assert!(drive.is_driving());
        let conversations = mock.conversations();
        assert_eq!(conversations.len(), 2);
        assert_eq!(conversations[1].len(), 1);
        assert_eq!(conversations[1][0].0, Command::DriveBoth);
    }

    #[tokio::test]
    async fn mixed_offsets_pack_fast_east_and_slow_west() {
        let (mock, drive) = start(idle_at(ZERO, ZERO)).await;

        let outcome = drive
            .set_tilts_from_counts(9_000_000, i64::from(ZERO) + 50)
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Accepted);
        assert!(drive.is_driving());

        let conversations = mock.conversations();
        let (command, payload) = &conversations[1][0];
        assert_eq!(*command, Command::DriveBoth);
        assert_eq!(&payload[..3], &ez80::pack_ticks(9_000_000).unwrap());
        assert_eq!(&payload[3..6], &ez80::pack_ticks(ZERO + 50).unwrap());
        // north (0) fast for east, north (0) slow for west
        assert_eq!(payload[6], 4);
    }

    #[tokio::test]
    async fn direction_convention_sets_direction_bits() {
        let mock = MockController::start(NODE, idle_at(ZERO, ZERO)).await;
        let drive = drive_for(&mock, DirectionConvention::IncreasingIsOne);

        drive
            .set_tilts_from_counts(9_000_000, i64::from(ZERO) + 50)
            .await
            .unwrap();

        let conversations = mock.conversations();
        assert_eq!(conversations[1][0].1[6], 2 + 8 + 4);
    }

    #[tokio::test]
    async fn single_enabled_arm_gets_single_arm_command() {
        let (mock, drive) = start(idle_at(ZERO, ZERO)).await;
        drive.set_arm_state(Arm::West, ArmState::Disabled);

        let target = i64::from(ZERO) - 1000;
        drive.set_tilts_from_counts(target, target).await.unwrap();

        let conversations = mock.conversations();
        let (command, payload) = &conversations[1][0];
        assert_eq!(*command, Command::DriveEast);
        assert_eq!(payload.len(), 4);
        assert_eq!(&payload[..3], &ez80::pack_ticks(ZERO - 1000).unwrap());
        assert_eq!(payload[3], 2);
    }

    #[tokio::test]
    async fn arm_inside_deadband_is_left_out() {
        let (mock, drive) = start(idle_at(ZERO, ZERO)).await;

        let zero = i64::from(ZERO);
        drive.set_tilts_from_counts(zero + 30, zero + 1000).await.unwrap();

        let conversations = mock.conversations();
        let (command, payload) = &conversations[1][0];
        assert_eq!(*command, Command::DriveWest);
        assert_eq!(payload[3], 0);
    }

    #[tokio::test]
    async fn slow_arm_state_forces_slow_speed() {
        let (mock, drive) = start(idle_at(ZERO, ZERO)).await;
        drive.set_arm_state(Arm::East, ArmState::Slow);

        let zero = i64::from(ZERO);
        drive.set_tilts_from_counts(zero + 5000, zero + 5000).await.unwrap();

        assert_eq!(mock.conversations()[1][0].1[6], 1);
    }

    #[tokio::test]
    async fn disabled_arms_are_refused_without_contact() {
        let (mock, drive) = start(idle_at(ZERO, ZERO)).await;
        drive.set_arm_state(Arm::East, ArmState::Disabled);
        drive.set_arm_state(Arm::West, ArmState::Disabled);

        assert!(matches!(
            drive.set_tilts(0.1, 0.1).await,
            Err(DriveError::ArmsDisabled)
        ));
        assert!(matches!(
            drive.set_east_tilt(0.1).await,
            Err(DriveError::ArmDisabled { arm: Arm::East })
        ));
        assert!(mock.conversations().is_empty());
    }

    #[tokio::test]
    async fn out_of_range_count_is_refused() {
        let (_mock, drive) = start(idle_at(ZERO, ZERO)).await;
        assert!(matches!(
            drive.set_tilts_from_counts(-1, 0).await,
            Err(DriveError::CountOutOfRange { count: -1 })
        ));
    }

    #[tokio::test]
    async fn listener_publishes_updates_until_idle() {
        let (_mock, drive) = start(obedient(ZERO, ZERO)).await;

        let zero = i64::from(ZERO);
        drive.set_tilts_from_counts(zero + 6000, zero - 3000).await.unwrap();
        wait_until_idle(&drive).await;

        let status = drive.snapshot();
        assert_eq!(status.east.count, ZERO + 6000);
        assert_eq!(status.west.count, ZERO - 3000);
        assert_abs_diff_eq!(status.east.tilt, 0.001, epsilon = 1e-12);
        assert_abs_diff_eq!(status.west.tilt, -0.0005, epsilon = 1e-12);
        assert!(drive.fault().is_none());
    }

    #[tokio::test]
    async fn new_command_retires_the_running_one_first() {
        let (mock, drive) = start(idle_at(ZERO, ZERO)).await;
        let zero = i64::from(ZERO);

        drive.set_tilts_from_counts(zero + 5000, zero + 5000).await.unwrap();
        assert!(drive.is_driving());

        // The mock serves one connection at a time, so this only completes
        // if the first listener let go of its connection.
        let second = timeout(
            Duration::from_secs(3),
            drive.set_tilts_from_counts(zero - 5000, zero - 5000),
        )
        .await
        .expect("second command stalled behind the first");
        assert_eq!(second.unwrap(), CommandOutcome::Accepted);

        let conversations = mock.conversations();
        assert_eq!(conversations.len(), 3);
        assert_eq!(conversations[0], vec![(Command::Update, vec![])]);
        for conversation in &conversations[1..] {
            assert_eq!(conversation.len(), 1);
            assert_eq!(conversation[0].0, Command::DriveBoth);
        }
    }

    #[tokio::test]
    async fn status_while_driving_comes_from_cache() {
        let (mock, drive) = start(idle_at(ZERO + 7, ZERO + 9)).await;
        let zero = i64::from(ZERO);

        drive.set_tilts_from_counts(zero + 5000, zero + 5000).await.unwrap();
        let status = drive.get_status().await.unwrap();

        assert_eq!(status.east.count, ZERO + 7);
        assert_eq!(status.west.count, ZERO + 9);
        assert_eq!(mock.conversations().len(), 2);
    }

    #[tokio::test]
    async fn interrupt_acknowledgement_is_not_a_fault() {
        let script: Script = Box::new(|frame: &Frame| match frame.command() {
            Command::Update => vec![update(ZERO, ZERO), status(0)],
            Command::Stop => vec![(Command::Error, vec![0]), status(0)],
            _ => vec![status(0), (Command::Error, vec![0])],
        });
        let (_mock, drive) = start(script).await;
        let zero = i64::from(ZERO);

        drive.set_tilts_from_counts(zero + 5000, zero + 5000).await.unwrap();
        wait_until_idle(&drive).await;
        assert!(drive.fault().is_none());

        drive.stop().await.unwrap();
        assert!(drive.fault().is_none());
    }

    #[tokio::test]
    async fn hardware_error_latches_until_cleared() {
        let mut failed = false;
        let script: Script = Box::new(move |frame: &Frame| match frame.command() {
            Command::Update => vec![update(ZERO, ZERO), status(0)],
            _ if !failed => {
                failed = true;
                vec![(Command::Error, vec![7])]
            }
            _ => vec![status(0)],
        });
        let (mock, drive) = start(script).await;
        let zero = i64::from(ZERO);

        let result = drive.set_tilts_from_counts(zero + 5000, zero + 5000).await;
        assert!(matches!(
            result,
            Err(DriveError::Fault(DriveFault::Hardware { code: 7 }))
        ));

        let contacts = mock.conversations().len();
        assert!(matches!(
            drive.get_status().await,
            Err(DriveError::Fault(DriveFault::Hardware { code: 7 }))
        ));
        assert!(matches!(
            drive.set_tilts_from_counts(zero + 5000, zero + 5000).await,
            Err(DriveError::Fault(DriveFault::Hardware { code: 7 }))
        ));
        assert_eq!(mock.conversations().len(), contacts);

        drive.clear_error();
        assert!(drive.get_status().await.is_ok());
    }

    #[tokio::test]
    async fn socket_count_over_limit_is_fatal() {
        let script: Script = Box::new(|frame: &Frame| match frame.command() {
            Command::Update => vec![(Command::SocketCount, vec![19]), update(ZERO, ZERO), status(0)],
            _ => vec![status(0)],
        });
        let (mock, drive) = start(script).await;

        assert!(matches!(
            drive.get_status().await,
            Err(DriveError::Fault(DriveFault::SocketCountLimit {
                count: 19,
                limit: 18
            }))
        ));
        assert_eq!(
            drive.fault(),
            Some(DriveFault::SocketCountLimit {
                count: 19,
                limit: 18
            })
        );

        drive.stop().await.unwrap();
        assert_eq!(mock.commands().last(), Some(&Command::Stop));
        assert!(drive.fault().is_some());
    }

    #[tokio::test]
    async fn high_socket_count_backs_off() {
        let script: Script = Box::new(|frame: &Frame| match frame.command() {
            Command::Update => vec![(Command::SocketCount, vec![15]), update(ZERO, ZERO), status(0)],
            _ => vec![status(0)],
        });
        let (_mock, drive) = start(script).await;

        let started = Instant::now();
        drive.get_status().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(drive.fault().is_none());
    }

    #[tokio::test]
    async fn unexpected_reply_is_a_protocol_error() {
        let script: Script = Box::new(|_: &Frame| vec![(Command::DriveBoth, vec![])]);
        let (_mock, drive) = start(script).await;

        assert!(matches!(
            drive.get_status().await,
            Err(DriveError::Protocol(ProtocolError::UnexpectedCommand('1')))
        ));
        assert!(drive.fault().is_none());
    }

    #[tokio::test]
    async fn auxiliary_commands_carry_their_payloads() {
        let (mock, drive) = start(idle_at(ZERO, ZERO)).await;

        drive.set_verbose(2).await.unwrap();
        drive.zero_drives(ZeroSelection::Both, 1).await.unwrap();

        let conversations = mock.conversations();
        assert_eq!(conversations[0], vec![(Command::Verbose, vec![2])]);
        assert_eq!(conversations[1], vec![(Command::ZeroDrives, vec![b'B', 1])]);
    }
}
