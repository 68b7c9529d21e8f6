// Per-joint servo capability set
//
// The dispatcher and arm driver only talk to servos through `JointActuator`.
// `LssServo` is the hardware implementation; tests use scripted fakes.

use serde::Serialize;

use crate::transport::TransportError;

/// Servo status code reported while holding the commanded position
pub const STATUS_HOLDING: i32 = 6;

#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Servo bus for joint {id} is unavailable")]
    BusUnavailable { id: u8 },
}

pub type Result<T> = std::result::Result<T, ActuatorError>;

/// Servo status as reported by a status query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JointStatus {
    Unknown,
    Limp,
    FreeMoving,
    Accelerating,
    Travelling,
    Decelerating,
    Holding,
    OutsideLimits,
    Stuck,
    Blocked,
    SafeMode,
    Other(i32),
}

impl JointStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => JointStatus::Unknown,
            1 => JointStatus::Limp,
            2 => JointStatus::FreeMoving,
            3 => JointStatus::Accelerating,
            4 => JointStatus::Travelling,
            5 => JointStatus::Decelerating,
            6 => JointStatus::Holding,
            7 => JointStatus::OutsideLimits,
            8 => JointStatus::Stuck,
            9 => JointStatus::Blocked,
            10 => JointStatus::SafeMode,
            other => JointStatus::Other(other),
        }
    }

    /// Outside limits, stuck, blocked or in safe mode
    pub fn is_fault(code: i32) -> bool {
        code > STATUS_HOLDING
    }
}

/// Servo LED colours
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LedColor {
    Black = 0,
    Red = 1,
    Green = 2,
    Blue = 3,
    Yellow = 4,
    Cyan = 5,
    Magenta = 6,
    White = 7,
}

/// One poll of a joint's live state. `None` means the servo did not answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct JointTelemetry {
    pub position: Option<i32>,
    pub speed: Option<i32>,
    pub current: Option<i32>,
}

/// Capabilities of one servo joint.
///
/// Positions are in tenths of a degree. Queries return `Ok(None)` when the
/// servo gives no usable reply; transport failures are errors.
pub trait JointActuator: Send {
    fn reset(&mut self) -> Result<()>;

    /// Release torque
    fn limp(&mut self) -> Result<()>;

    /// Lock at the current position
    fn hold(&mut self) -> Result<()>;

    fn move_absolute(&mut self, position: i32) -> Result<()>;

    fn move_relative(&mut self, delta: i32) -> Result<()>;

    fn move_at_speed(&mut self, position: i32, speed: u32) -> Result<()>;

    fn move_relative_at_speed(&mut self, delta: i32, speed: u32) -> Result<()>;

    /// Move, halting and holding if the current reaches `current_ma` before arrival
    fn move_with_current_limit(&mut self, position: i32, current_ma: u32) -> Result<()>;

    fn position(&mut self) -> Result<Option<i32>>;

    fn status(&mut self) -> Result<Option<i32>>;

    fn current(&mut self) -> Result<Option<i32>>;

    fn speed(&mut self) -> Result<Option<i32>>;

    fn set_color(&mut self, color: LedColor) -> Result<()>;

    /// Servo-side smoothing for multi-step moves
    fn set_filter_position_count(&mut self, count: u32) -> Result<()>;

    fn set_max_speed(&mut self, speed: u32) -> Result<()>;

    fn set_motion_control(&mut self, enabled: bool) -> Result<()>;

    fn set_holding_stiffness(&mut self, stiffness: i32) -> Result<()>;

    /// Position, speed and current in one go
    fn telemetry(&mut self) -> Result<JointTelemetry> {
        Ok(JointTelemetry {
            position: self.position()?,
            speed: self.speed()?,
            current: self.current()?,
        })
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    pub struct FakeState {
        pub statuses: VecDeque<Option<i32>>,
        pub last_status: Option<i32>,
        pub positions: VecDeque<Option<i32>>,
        pub last_position: Option<i32>,
        pub commands: Vec<String>,
        pub colors: Vec<LedColor>,
        pub status_reads: usize,
    }

    /// Scripted joint. Status and position queues repeat their last value once drained.
    #[derive(Debug, Clone, Default)]
    pub struct FakeJoint(pub Arc<Mutex<FakeState>>);

    impl FakeJoint {
        pub fn holding_at(position: i32) -> Self {
            let joint = Self::default();
            {
                let mut s = joint.0.lock().unwrap();
                s.last_status = Some(STATUS_HOLDING);
                s.last_position = Some(position);
            }
            joint
        }

        pub fn script_statuses(&self, statuses: &[Option<i32>]) {
            self.0.lock().unwrap().statuses.extend(statuses.iter().copied());
        }

        pub fn script_positions(&self, positions: &[Option<i32>]) {
            self.0.lock().unwrap().positions.extend(positions.iter().copied());
        }

        pub fn commands(&self) -> Vec<String> {
            self.0.lock().unwrap().commands.clone()
        }

        pub fn colors(&self) -> Vec<LedColor> {
            self.0.lock().unwrap().colors.clone()
        }

        pub fn status_reads(&self) -> usize {
            self.0.lock().unwrap().status_reads
        }

        fn record(&self, command: String) -> Result<()> {
            self.0.lock().unwrap().commands.push(command);
            Ok(())
        }
    }

    impl JointActuator for FakeJoint {
        fn reset(&mut self) -> Result<()> {
            self.record("reset".into())
        }

        fn limp(&mut self) -> Result<()> {
            self.record("limp".into())
        }

        fn hold(&mut self) -> Result<()> {
            self.record("hold".into())
        }

        fn move_absolute(&mut self, position: i32) -> Result<()> {
            self.record(format!("move {position}"))
        }

        fn move_relative(&mut self, delta: i32) -> Result<()> {
            self.record(format!("move_rel {delta}"))
        }

        fn move_at_speed(&mut self, position: i32, speed: u32) -> Result<()> {
            self.record(format!("move {position} speed {speed}"))
        }

        fn move_relative_at_speed(&mut self, delta: i32, speed: u32) -> Result<()> {
            self.record(format!("move_rel {delta} speed {speed}"))
        }

        fn move_with_current_limit(&mut self, position: i32, current_ma: u32) -> Result<()> {
            self.record(format!("move {position} current {current_ma}"))
        }

        fn position(&mut self) -> Result<Option<i32>> {
            let mut s = self.0.lock().unwrap();
            if let Some(next) = s.positions.pop_front() {
                s.last_position = next;
            }
            Ok(s.last_position)
        }

        fn status(&mut self) -> Result<Option<i32>> {
            let mut s = self.0.lock().unwrap();
            s.status_reads += 1;
            if let Some(next) = s.statuses.pop_front() {
                s.last_status = next;
            }
            Ok(s.last_status)
        }

        fn current(&mut self) -> Result<Option<i32>> {
            Ok(Some(120))
        }

        fn speed(&mut self) -> Result<Option<i32>> {
            Ok(Some(0))
        }

        fn set_color(&mut self, color: LedColor) -> Result<()> {
            self.0.lock().unwrap().colors.push(color);
            Ok(())
        }

        fn set_filter_position_count(&mut self, count: u32) -> Result<()> {
            self.record(format!("fpc {count}"))
        }

        fn set_max_speed(&mut self, speed: u32) -> Result<()> {
            self.record(format!("max_speed {speed}"))
        }

        fn set_motion_control(&mut self, enabled: bool) -> Result<()> {
            self.record(format!("motion_control {enabled}"))
        }

        fn set_holding_stiffness(&mut self, stiffness: i32) -> Result<()> {
            self.record(format!("stiffness {stiffness}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeJoint;
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(JointStatus::from_code(6), JointStatus::Holding);
        assert_eq!(JointStatus::from_code(9), JointStatus::Blocked);
        assert_eq!(JointStatus::from_code(42), JointStatus::Other(42));
        assert!(!JointStatus::is_fault(6));
        assert!(JointStatus::is_fault(7));
        assert!(JointStatus::is_fault(10));
    }

    #[test]
    fn test_default_telemetry_poll() {
        let mut joint = FakeJoint::holding_at(-350);
        let telemetry = joint.telemetry().unwrap();
        assert_eq!(
            telemetry,
            JointTelemetry {
                position: Some(-350),
                speed: Some(0),
                current: Some(120),
            }
        );
    }
}
