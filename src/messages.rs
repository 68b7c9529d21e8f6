// Define message types for the runtime

use serde::{Deserialize, Serialize};

use crate::arm::{ArrivalOutcome, CartesianTarget, Joint, JointAngles, JointTelemetry, TargetMove};
use crate::arm::kinematics::JOINT_COUNT;
use crate::base::Telemetry;

// Command from teleop/scripts -> runtime (mobile base)
// Velocities in mm/s and deg/s, distances in mm, angles in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BaseCommand {
    Velocity { mm_per_sec: i32 },
    RotateVelocity { deg_per_sec: i32 },
    Wheels { left: i32, right: i32 },
    Nudge { mm: i32 },
    Head { degrees: i32 },
    Rotate { degrees: i32 },
    Sonar { enabled: bool },
    Stop,
}

impl BaseCommand {
    /// Keeps the base moving until told otherwise, so it falls under the watchdog
    pub fn is_continuous(&self) -> bool {
        matches!(
            self,
            BaseCommand::Velocity { .. } | BaseCommand::RotateVelocity { .. } | BaseCommand::Wheels { .. }
        )
    }
}

/// Named arm poses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmPreset {
    Home,
    HomeHold,
    DrawReady,
    Draw,
    OpenClaw,
    CloseClaw,
}

// Command from teleop/scripts -> runtime (arm)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArmCommand {
    /// Cartesian move through IK
    MoveTo { target: CartesianTarget },
    /// Joint-space move through the dispatcher
    Joints { angles: JointAngles },
    MoveJoint {
        joint: Joint,
        position: i32,
        speed: Option<u32>,
    },
    MoveJointRelative {
        joint: Joint,
        delta: i32,
        speed: Option<u32>,
    },
    Preset { preset: ArmPreset },
    SetChecking { enabled: bool },
    Telemetry,
    Reset,
    Limp,
    Hold,
}

/// What an arm command produced
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ArmResult {
    Done,
    Moved { outcome: ArrivalOutcome },
    Target { report: TargetMove },
    Telemetry { joints: [JointTelemetry; JOINT_COUNT] },
    Error { message: String },
}

// Arm report from runtime -> subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArmReport {
    pub command: ArmCommand,
    #[serde(flatten)]
    pub result: ArmResult,
}

// Base state from runtime -> subscribers
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BaseState {
    /// The last frame was cut short; fields not in it keep their previous value
    pub truncated: bool,
    #[serde(flatten)]
    pub telemetry: Telemetry,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct HealthReport {
    pub health: RuntimeHealth,
    pub base_online: bool,
    pub arm_online: bool,
}
