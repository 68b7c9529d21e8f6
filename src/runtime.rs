// 10 Hz loop with watchdog
// Every tick pulses the base (heartbeat), applies the latest base command and
// publishes a fresh SIP. Arm moves can block for seconds while arrival is
// confirmed, so they run on their own worker thread.

use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::block_in_place;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::arm::{ArmDriver, ArmError, ArrivalConfig, JointActuator};
use crate::base::{BaseDriver, BaseError, Decoded, RetryPolicy};
use crate::config::{
    ARM_BAUD, BASE_BAUD, CMD_TIMEOUT, LOOP_HZ, TOPIC_CMD_ARM, TOPIC_CMD_BASE, TOPIC_HEALTH,
    TOPIC_STATE_ARM, TOPIC_STATE_BASE,
};
use crate::messages::{
    ArmCommand, ArmPreset, ArmReport, ArmResult, BaseCommand, BaseState, HealthReport,
    RuntimeHealth,
};
use crate::transport::{CancelToken, Transport};

/// Which devices to drive and where they are
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub base_port: Option<String>,
    pub base_baud: u32,
    pub arm_port: Option<String>,
    pub arm_baud: u32,
    /// Confirm arm arrival after every move
    pub checking: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            base_port: None,
            base_baud: BASE_BAUD,
            arm_port: None,
            arm_baud: ARM_BAUD,
            checking: false,
        }
    }
}

/// Base command bookkeeping and watchdog
pub struct Runtime {
    pending: Option<BaseCommand>,
    cmd_received_at: Instant,
    moving: bool,
    health: RuntimeHealth,
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            pending: None,
            cmd_received_at: Instant::now(),
            moving: false,
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    /// Process incoming command
    fn on_command(&mut self, cmd: BaseCommand, now: Instant) {
        debug!("Received base command: {:?}", &cmd);
        self.pending = Some(cmd);
        self.cmd_received_at = now;
    }

    /// Command to apply to the base this tick, if any
    fn next_action(&mut self, now: Instant) -> Option<BaseCommand> {
        if let Some(cmd) = self.pending.take() {
            self.moving = cmd.is_continuous();
            self.health = RuntimeHealth::Ok;
            return Some(cmd);
        }

        let cmd_age = now.saturating_duration_since(self.cmd_received_at);
        if cmd_age > CMD_TIMEOUT {
            // Watchdog triggered - stop the robot once
            if self.health != RuntimeHealth::CmdStale {
                warn!("Command stale ({:?} old)", cmd_age);
            }
            self.health = RuntimeHealth::CmdStale;
            if self.moving {
                warn!("Stopping base");
                self.moving = false;
                return Some(BaseCommand::Stop);
            }
        }
        None
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_base_command<T: Transport>(
    base: &mut BaseDriver<T>,
    cmd: BaseCommand,
) -> Result<(), BaseError> {
    match cmd {
        BaseCommand::Velocity { mm_per_sec } => base.drive(mm_per_sec),
        BaseCommand::RotateVelocity { deg_per_sec } => base.rotate_velocity(deg_per_sec),
        BaseCommand::Wheels { left, right } => base.set_wheels(left, right),
        BaseCommand::Nudge { mm } => base.nudge(mm),
        BaseCommand::Head { degrees } => base.head(degrees),
        BaseCommand::Rotate { degrees } => base.rotate(degrees),
        BaseCommand::Sonar { enabled } => base.enable_sonar(enabled),
        BaseCommand::Stop => base.stop(),
    }
}

/// Heartbeat, then ask for a SIP
fn base_tick<T: Transport>(base: &mut BaseDriver<T>) -> Result<Option<BaseState>, BaseError> {
    base.pulse()?;
    let state = match base.request_telemetry()? {
        Decoded::Frame(telemetry) => Some(BaseState {
            truncated: false,
            telemetry,
        }),
        Decoded::Truncated(telemetry) => Some(BaseState {
            truncated: true,
            telemetry,
        }),
        Decoded::NoFrame => None,
    };
    Ok(state)
}

/// Run one arm command to completion
pub fn execute_arm_command<J: JointActuator>(
    arm: &mut ArmDriver<J>,
    cmd: ArmCommand,
) -> Result<ArmResult, ArmError> {
    let result = match cmd {
        ArmCommand::MoveTo { target } => ArmResult::Target {
            report: arm.move_to_target(target)?,
        },
        ArmCommand::Joints { angles } => ArmResult::Moved {
            outcome: arm.move_to(angles)?,
        },
        ArmCommand::MoveJoint {
            joint,
            position,
            speed,
        } => {
            match speed {
                Some(speed) => arm.move_joint_at_speed(joint, position, speed)?,
                None => arm.move_joint(joint, position)?,
            }
            ArmResult::Done
        }
        ArmCommand::MoveJointRelative { joint, delta, speed } => {
            match speed {
                Some(speed) => arm.move_joint_relative_at_speed(joint, delta, speed)?,
                None => arm.move_joint_relative(joint, delta)?,
            }
            ArmResult::Done
        }
        ArmCommand::Preset { preset } => {
            match preset {
                ArmPreset::Home => arm.home()?,
                ArmPreset::HomeHold => arm.home_hold()?,
                ArmPreset::DrawReady => arm.draw_ready()?,
                ArmPreset::Draw => arm.draw()?,
                ArmPreset::OpenClaw => arm.open_claw()?,
                ArmPreset::CloseClaw => arm.close_claw()?,
            }
            ArmResult::Done
        }
        ArmCommand::SetChecking { enabled } => {
            info!("Arm arrival checking {}", if enabled { "on" } else { "off" });
            arm.dispatcher().set_checking(enabled);
            ArmResult::Done
        }
        ArmCommand::Telemetry => ArmResult::Telemetry {
            joints: arm.poll_telemetry()?,
        },
        ArmCommand::Reset => {
            arm.reset()?;
            ArmResult::Done
        }
        ArmCommand::Limp => {
            arm.limp()?;
            ArmResult::Done
        }
        ArmCommand::Hold => {
            arm.hold()?;
            ArmResult::Done
        }
    };
    Ok(result)
}

/// Arm worker: executes commands in order until the command channel closes
fn arm_worker<J: JointActuator>(
    mut arm: ArmDriver<J>,
    commands: std_mpsc::Receiver<ArmCommand>,
    reports: mpsc::UnboundedSender<ArmReport>,
) {
    if let Err(e) = arm.configure() {
        error!("Failed to configure arm: {}", e);
    }

    for command in commands {
        let result = match execute_arm_command(&mut arm, command) {
            Ok(result) => result,
            Err(e) => {
                warn!("Arm command {:?} failed: {}", command, e);
                ArmResult::Error {
                    message: e.to_string(),
                }
            }
        };
        if reports.send(ArmReport { command, result }).is_err() {
            break;
        }
    }

    info!("Arm worker stopping");
    if let Err(e) = arm.terminate() {
        warn!("Failed to reset arm: {}", e);
    }
}

pub async fn run(options: RuntimeOptions) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, shutting down");
                cancel.cancel();
            }
        });
    }

    // Base: open and handshake off the async threads
    let mut base = match options.base_port.clone() {
        Some(port) => {
            info!("Connecting to base on {} at {} baud", port, options.base_baud);
            let baud = options.base_baud;
            let handshake_cancel = cancel.clone();
            let base = tokio::task::spawn_blocking(move || -> Result<_, BaseError> {
                let mut base = BaseDriver::open(&port, baud)?;
                let ready = base.initialize(RetryPolicy::default(), handshake_cancel)?;
                info!(
                    "Base ready, controller identified itself with {} bytes",
                    ready.identification.len()
                );
                Ok(base)
            })
            .await??;
            Some(base)
        }
        None => {
            info!("Running without base");
            None
        }
    };

    // Arm: dedicated worker thread
    let (arm_tx, arm_rx) = std_mpsc::channel::<ArmCommand>();
    let (report_tx, mut report_rx) = mpsc::unbounded_channel::<ArmReport>();
    let mut arm_cancel = None;
    let arm_worker_handle = match options.arm_port.clone() {
        Some(port) => {
            let config = ArrivalConfig {
                checking: options.checking,
                ..ArrivalConfig::default()
            };
            let mut arm = ArmDriver::open(&port, options.arm_baud, config)?;
            arm_cancel = Some(arm.dispatcher().cancel_token());
            Some(thread::spawn(move || arm_worker(arm, arm_rx, report_tx)))
        }
        None => {
            info!("Running without arm");
            None
        }
    };

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let sub_base = session.declare_subscriber(TOPIC_CMD_BASE).await?;
    let sub_arm = session.declare_subscriber(TOPIC_CMD_ARM).await?;
    let pub_base = session.declare_publisher(TOPIC_STATE_BASE).await?;
    let pub_arm = session.declare_publisher(TOPIC_STATE_ARM).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut runtime = Runtime::new();
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        LOOP_HZ,
        CMD_TIMEOUT.as_millis()
    );
    info!("Subscribed to: {}, {}", TOPIC_CMD_BASE, TOPIC_CMD_ARM);
    info!(
        "Publishing to: {}, {}, {}",
        TOPIC_STATE_BASE, TOPIC_STATE_ARM, TOPIC_HEALTH
    );

    while !cancel.is_cancelled() {
        tick.tick().await;

        // 1. Drain all pending base commands (non-blocking), keep latest
        while let Ok(Some(sample)) = sub_base.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<BaseCommand>(&payload) {
                Ok(cmd) => runtime.on_command(cmd, Instant::now()),
                Err(e) => warn!("Failed to parse base command: {}", e),
            }
        }

        // 2. Forward arm commands to the worker, in order
        while let Ok(Some(sample)) = sub_arm.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<ArmCommand>(&payload) {
                Ok(cmd) if arm_cancel.is_some() => {
                    if arm_tx.send(cmd).is_err() {
                        warn!("Arm worker is gone, dropping {:?}", cmd);
                    }
                }
                Ok(cmd) => warn!("No arm connected, ignoring {:?}", cmd),
                Err(e) => warn!("Failed to parse arm command: {}", e),
            }
        }

        // 3. Watchdog + heartbeat + telemetry
        let action = runtime.next_action(Instant::now());
        if let Some(driver) = base.as_mut() {
            let state = block_in_place(|| {
                if let Some(cmd) = action {
                    apply_base_command(driver, cmd)?;
                }
                base_tick(driver)
            })?;
            if let Some(state) = state {
                pub_base.put(serde_json::to_string(&state)?).await?;
            }
        }

        // 4. Publish finished arm commands
        while let Ok(report) = report_rx.try_recv() {
            pub_arm.put(serde_json::to_string(&report)?).await?;
        }

        // 5. Publish health
        let health = HealthReport {
            health: runtime.health(),
            base_online: base.is_some(),
            arm_online: arm_worker_handle.as_ref().is_some_and(|h| !h.is_finished()),
        };
        pub_health.put(serde_json::to_string(&health)?).await?;
    }

    info!("Shutting down");
    if let Some(token) = arm_cancel {
        token.cancel();
    }
    drop(arm_tx);
    if let Some(handle) = arm_worker_handle {
        if handle.join().is_err() {
            error!("Arm worker panicked");
        }
    }
    if let Some(mut driver) = base.take() {
        block_in_place(|| driver.terminate())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm::actuator::fake::FakeJoint;
    use crate::arm::kinematics::JOINT_COUNT;
    use crate::arm::{ArrivalOutcome, CartesianTarget, Joint, JointAngles};
    use crate::base::{CommandCode, FrameCodec};
    use crate::transport::mock::MockTransport;

    #[test]
    fn test_watchdog_stops_once() {
        let start = Instant::now();
        let mut rt = Runtime::new();

        rt.on_command(BaseCommand::Velocity { mm_per_sec: 200 }, start);
        assert_eq!(
            rt.next_action(start),
            Some(BaseCommand::Velocity { mm_per_sec: 200 })
        );
        assert_eq!(rt.health(), RuntimeHealth::Ok);

        let fresh = start + CMD_TIMEOUT / 2;
        assert_eq!(rt.next_action(fresh), None);
        assert_eq!(rt.health(), RuntimeHealth::Ok);

        let stale = start + CMD_TIMEOUT + Duration::from_millis(1);
        assert_eq!(rt.next_action(stale), Some(BaseCommand::Stop));
        assert_eq!(rt.health(), RuntimeHealth::CmdStale);
        assert_eq!(rt.next_action(stale + Duration::from_secs(1)), None);
    }

    #[test]
    fn test_watchdog_ignores_discrete_commands() {
        let start = Instant::now();
        let mut rt = Runtime::new();

        rt.on_command(BaseCommand::Nudge { mm: 100 }, start);
        assert_eq!(rt.next_action(start), Some(BaseCommand::Nudge { mm: 100 }));
        assert_eq!(rt.next_action(start + CMD_TIMEOUT * 2), None);
        assert_eq!(rt.health(), RuntimeHealth::CmdStale);
    }

    #[test]
    fn test_apply_base_command() {
        let mock = MockTransport::new();
        let mut base = BaseDriver::new(mock.clone());

        apply_base_command(&mut base, BaseCommand::Rotate { degrees: -90 }).unwrap();
        apply_base_command(&mut base, BaseCommand::Stop).unwrap();

        let codec = FrameCodec::p2os();
        let written = mock.written();
        assert_eq!(
            written[0],
            codec.encode(CommandCode::Rotate, -90, None).unwrap().into_bytes()
        );
        assert_eq!(written[1], codec.stop().into_bytes());
    }

    #[test]
    fn test_execute_arm_commands() {
        let joints: [FakeJoint; JOINT_COUNT] = Default::default();
        let mut arm = ArmDriver::new(joints.clone(), ArrivalConfig::default());

        let result = execute_arm_command(
            &mut arm,
            ArmCommand::Preset {
                preset: ArmPreset::DrawReady,
            },
        )
        .unwrap();
        assert_eq!(result, ArmResult::Done);
        assert_eq!(joints[1].commands(), vec!["move -350 speed 50"]);

        let result = execute_arm_command(
            &mut arm,
            ArmCommand::Joints {
                angles: JointAngles([0, -350, 450, 0, 0]),
            },
        )
        .unwrap();
        assert_eq!(
            result,
            ArmResult::Moved {
                outcome: ArrivalOutcome::Dispatched
            }
        );

        execute_arm_command(
            &mut arm,
            ArmCommand::MoveJointRelative {
                joint: Joint::Gripper,
                delta: -140,
                speed: None,
            },
        )
        .unwrap();
        assert_eq!(joints[4].commands().last().map(String::as_str), Some("move_rel -140"));
    }

    #[test]
    fn test_execute_unreachable_target() {
        let joints: [FakeJoint; JOINT_COUNT] = Default::default();
        let mut arm = ArmDriver::new(joints, ArrivalConfig::default());

        let err = execute_arm_command(
            &mut arm,
            ArmCommand::MoveTo {
                target: CartesianTarget::new(100.0, 0.0, 100.0, 0.0),
            },
        )
        .unwrap_err();
        assert!(matches!(err, ArmError::Kinematics(_)));
    }
}
