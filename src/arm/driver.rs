// High-level driver for the five-joint drawing arm
//
// Combines the IK solver, the motion dispatcher and the LSS bus into a
// simple API with named poses.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::actuator::{ActuatorError, JointActuator, JointTelemetry};
use super::dispatcher::{ArrivalConfig, ArrivalOutcome, MotionDispatcher, MoveProfile};
use super::kinematics::{CartesianTarget, IkError, IkSolution, IkSolver, JOINT_COUNT, Joint, JointAngles};
use super::lss::{LssBus, LssServo};
use crate::transport::TransportError;

/// Folded rest pose
pub const HOME_POSE: JointAngles = JointAngles([0, -900, 900, 0, 0]);
/// Raised pose, waiting to draw
pub const DRAW_READY_POSE: JointAngles = JointAngles([0, -350, 450, 0, 0]);
/// Pen on the surface
pub const DRAW_POSE: JointAngles = JointAngles([0, -20, 100, 700, 0]);

/// Gripper delta that opens the claw to receive a pen
pub const OPEN_CLAW_DELTA: [i32; JOINT_COUNT] = [0, 0, 0, 0, -140];
pub const CLOSE_CLAW_DELTA: [i32; JOINT_COUNT] = [0, 0, 0, 0, 140];

/// Speed for the home, ready and claw moves
pub const PRESET_SPEED: u32 = 50;
/// Speed when lowering into the drawing pose
pub const DRAW_SPEED: u32 = 20;

/// Minimum filter position count; travel distance is added on top
pub const BASE_FPC: u32 = 15;

#[derive(Debug, thiserror::Error)]
pub enum ArmError {
    #[error("Actuator error: {0}")]
    Actuator(#[from] ActuatorError),

    #[error("Kinematics error: {0}")]
    Kinematics(#[from] IkError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, ArmError>;

/// Outcome of a Cartesian move
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TargetMove {
    pub solution: IkSolution,
    pub fpc: u32,
    pub outcome: ArrivalOutcome,
}

/// High-level driver for the arm
pub struct ArmDriver<J: JointActuator = LssServo> {
    dispatcher: MotionDispatcher<J>,
    solver: IkSolver,
    profile: MoveProfile,
    last_target: Option<CartesianTarget>,
    terminated: bool,
}

impl ArmDriver<LssServo> {
    /// Open the servo bus and create one handle per joint
    pub fn open(port: &str, baudrate: u32, config: ArrivalConfig) -> Result<Self> {
        info!("Opening arm bus on {} at {} baud", port, baudrate);
        let bus = LssBus::open(port, baudrate)?.shared();
        let joints = Joint::ALL.map(|joint| LssServo::new(joint.servo_id(), bus.clone()));
        Ok(Self::new(joints, config))
    }
}

impl<J: JointActuator> ArmDriver<J> {
    /// Joints in base, shoulder, elbow, wrist, gripper order
    pub fn new(joints: [J; JOINT_COUNT], config: ArrivalConfig) -> Self {
        Self {
            dispatcher: MotionDispatcher::new(joints, config),
            solver: IkSolver::default(),
            profile: MoveProfile::default(),
            last_target: None,
            terminated: false,
        }
    }

    pub fn with_solver(mut self, solver: IkSolver) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_profile(mut self, profile: MoveProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn dispatcher(&mut self) -> &mut MotionDispatcher<J> {
        &mut self.dispatcher
    }

    /// Apply the safety settings used for drawing
    pub fn configure(&mut self) -> Result<()> {
        info!("Configuring arm servos");
        for joint in self.dispatcher.joints_mut().iter_mut() {
            joint.set_holding_stiffness(0)?;
            joint.set_max_speed(100)?;
        }
        self.dispatcher.joint_mut(Joint::Base).set_max_speed(60)?;
        self.dispatcher.joint_mut(Joint::Shoulder).set_motion_control(false)?;
        self.dispatcher.joint_mut(Joint::Elbow).set_motion_control(false)?;
        Ok(())
    }

    fn each_joint(
        &mut self,
        mut f: impl FnMut(usize, &mut J) -> std::result::Result<(), ActuatorError>,
    ) -> Result<()> {
        for (i, joint) in self.dispatcher.joints_mut().iter_mut().enumerate() {
            f(i, joint)?;
        }
        Ok(())
    }

    pub fn reset(&mut self) -> Result<()> {
        info!("Resetting arm");
        self.each_joint(|_, j| j.reset())
    }

    pub fn limp(&mut self) -> Result<()> {
        info!("Arm going limp");
        self.each_joint(|_, j| j.limp())
    }

    pub fn hold(&mut self) -> Result<()> {
        self.each_joint(|_, j| j.hold())
    }

    pub fn move_absolute(&mut self, angles: JointAngles) -> Result<()> {
        self.each_joint(|i, j| j.move_absolute(angles.0[i] as i32))
    }

    pub fn move_relative(&mut self, deltas: [i32; JOINT_COUNT]) -> Result<()> {
        self.each_joint(|i, j| j.move_relative(deltas[i]))
    }

    pub fn move_absolute_at_speed(&mut self, angles: JointAngles, speed: u32) -> Result<()> {
        self.each_joint(|i, j| j.move_at_speed(angles.0[i] as i32, speed))
    }

    pub fn move_relative_at_speed(&mut self, deltas: [i32; JOINT_COUNT], speed: u32) -> Result<()> {
        self.each_joint(|i, j| j.move_relative_at_speed(deltas[i], speed))
    }

    pub fn move_joint(&mut self, joint: Joint, position: i32) -> Result<()> {
        Ok(self.dispatcher.joint_mut(joint).move_absolute(position)?)
    }

    pub fn move_joint_relative(&mut self, joint: Joint, delta: i32) -> Result<()> {
        Ok(self.dispatcher.joint_mut(joint).move_relative(delta)?)
    }

    pub fn move_joint_at_speed(&mut self, joint: Joint, position: i32, speed: u32) -> Result<()> {
        Ok(self.dispatcher.joint_mut(joint).move_at_speed(position, speed)?)
    }

    pub fn move_joint_relative_at_speed(&mut self, joint: Joint, delta: i32, speed: u32) -> Result<()> {
        Ok(self
            .dispatcher
            .joint_mut(joint)
            .move_relative_at_speed(delta, speed)?)
    }

    pub fn home(&mut self) -> Result<()> {
        self.move_absolute_at_speed(HOME_POSE, PRESET_SPEED)
    }

    /// Go home, then lock every joint in place
    pub fn home_hold(&mut self) -> Result<()> {
        self.home()?;
        self.hold()
    }

    pub fn draw_ready(&mut self) -> Result<()> {
        self.move_absolute_at_speed(DRAW_READY_POSE, PRESET_SPEED)
    }

    pub fn draw(&mut self) -> Result<()> {
        self.move_absolute_at_speed(DRAW_POSE, DRAW_SPEED)
    }

    pub fn open_claw(&mut self) -> Result<()> {
        self.move_relative_at_speed(OPEN_CLAW_DELTA, PRESET_SPEED)
    }

    pub fn close_claw(&mut self) -> Result<()> {
        self.move_relative_at_speed(CLOSE_CLAW_DELTA, PRESET_SPEED)
    }

    /// Dispatch joint angles with the driver's move profile
    pub fn move_to(&mut self, angles: JointAngles) -> Result<ArrivalOutcome> {
        Ok(self.dispatcher.move_to(angles, self.profile)?)
    }

    /// Solve IK for `target` and move there.
    ///
    /// Shoulder and elbow smoothing grows with the planar distance from the
    /// previous target (origin on the first move).
    pub fn move_to_target(&mut self, target: CartesianTarget) -> Result<TargetMove> {
        let solution = self.solver.solve(target)?;
        if let IkSolution::Clamped { clamped, .. } = &solution {
            warn!("Target {:?} clamped on {:?}", target, clamped);
        }

        let fpc = filter_position_count(self.last_target, target);
        debug!("Setting shoulder/elbow FPC to {}", fpc);
        self.dispatcher.joint_mut(Joint::Shoulder).set_filter_position_count(fpc)?;
        self.dispatcher.joint_mut(Joint::Elbow).set_filter_position_count(fpc)?;

        let outcome = self.move_to(solution.angles())?;
        self.last_target = Some(target);
        Ok(TargetMove {
            solution,
            fpc,
            outcome,
        })
    }

    /// Position, speed and current of every joint
    pub fn poll_telemetry(&mut self) -> Result<[JointTelemetry; JOINT_COUNT]> {
        let mut telemetry = [JointTelemetry::default(); JOINT_COUNT];
        for (i, joint) in self.dispatcher.joints_mut().iter_mut().enumerate() {
            telemetry[i] = joint.telemetry()?;
        }
        Ok(telemetry)
    }

    /// True when every joint reports exactly the given position
    pub fn is_in_position(&mut self, angles: JointAngles) -> Result<bool> {
        for (i, joint) in self.dispatcher.joints_mut().iter_mut().enumerate() {
            if joint.position()? != Some(angles.0[i] as i32) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Reset every servo. Also attempted on drop.
    pub fn terminate(&mut self) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        self.reset()?;
        self.terminated = true;
        Ok(())
    }
}

impl<J: JointActuator> Drop for ArmDriver<J> {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            warn!("Failed to reset arm on drop: {}", e);
        }
    }
}

fn filter_position_count(from: Option<CartesianTarget>, to: CartesianTarget) -> u32 {
    let (x0, y0) = from.map_or((0.0, 0.0), |t| (t.x, t.y));
    let distance = ((x0 - to.x).powi(2) + (y0 - to.y).powi(2)).sqrt();
    distance as u32 + BASE_FPC
}
