// Drawing arm module (Lynxmotion LSS servos)
//
// Provides:
// - Inverse kinematics for the fixed-pitch 4-DOF arm
// - Joint actuator boundary and LSS serial protocol
// - Motion dispatch with arrival confirmation
// - High-level arm driver API with named poses

pub mod actuator;
pub mod dispatcher;
mod driver;
pub mod kinematics;
pub mod lss;

pub use actuator::{ActuatorError, JointActuator, JointStatus, JointTelemetry, LedColor};
pub use dispatcher::{ArrivalConfig, ArrivalOutcome, MotionDispatcher, MoveProfile, Tolerances};
pub use driver::{ArmDriver, ArmError, TargetMove};
pub use kinematics::{CartesianTarget, IkError, IkSolution, IkSolver, Joint, JointAngles};
pub use lss::{LssBus, LssServo};
