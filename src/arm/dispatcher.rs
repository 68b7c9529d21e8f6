// Joint motion dispatch with optional arrival confirmation
//
// One move command per joint, then (in checking mode) a bounded poll of
// status and position until the arm holds at the target or something
// goes wrong.

use serde::Serialize;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::actuator::{JointActuator, JointStatus, LedColor, Result, STATUS_HOLDING};
use super::kinematics::{JOINT_COUNT, Joint, JointAngles};
use crate::config::{
    ARRIVAL_MAX_POLLS, ARRIVAL_POLL_INTERVAL, ARRIVAL_TIMEOUT, UNKNOWN_STATUS_LIMIT,
};
use crate::transport::CancelToken;

/// Order in which joints receive their move commands
pub const DISPATCH_ORDER: [Joint; JOINT_COUNT] = [
    Joint::Wrist,
    Joint::Shoulder,
    Joint::Elbow,
    Joint::Base,
    Joint::Gripper,
];

/// Current-halt limits (mA) used by the default move profile
pub const DEFAULT_CURRENT_LIMITS: [u32; JOINT_COUNT] = [1000, 1600, 1600, 1000, 500];

/// How each joint is driven to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveProfile {
    /// Move at a per-joint speed
    Speed([u32; JOINT_COUNT]),
    /// Move, halting and holding if the per-joint current limit is reached
    CurrentLimit([u32; JOINT_COUNT]),
}

impl MoveProfile {
    pub fn uniform_speed(speed: u32) -> Self {
        MoveProfile::Speed([speed; JOINT_COUNT])
    }
}

impl Default for MoveProfile {
    fn default() -> Self {
        MoveProfile::CurrentLimit(DEFAULT_CURRENT_LIMITS)
    }
}

/// Allowed position error (protocol units) before a holding joint counts as off target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tolerances {
    pub base: u32,
    pub shoulder: u32,
    pub elbow: u32,
    pub wrist: u32,
    /// Tighter bound applied to shoulder and elbow on the obstacle recheck
    pub recheck: u32,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            base: 20,
            shoulder: 50,
            elbow: 50,
            wrist: 20,
            recheck: 40,
        }
    }
}

impl Tolerances {
    fn for_joint(&self, joint: Joint) -> Option<u32> {
        match joint {
            Joint::Base => Some(self.base),
            Joint::Shoulder => Some(self.shoulder),
            Joint::Elbow => Some(self.elbow),
            Joint::Wrist => Some(self.wrist),
            Joint::Gripper => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArrivalConfig {
    /// Poll until arrival instead of returning right after dispatch
    pub checking: bool,
    pub max_polls: u32,
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub unknown_limit: u32,
    /// Signal motion state on the servo LEDs
    pub indicate: bool,
    pub tolerances: Tolerances,
}

impl Default for ArrivalConfig {
    fn default() -> Self {
        Self {
            checking: false,
            max_polls: ARRIVAL_MAX_POLLS,
            poll_interval: ARRIVAL_POLL_INTERVAL,
            timeout: ARRIVAL_TIMEOUT,
            unknown_limit: UNKNOWN_STATUS_LIMIT,
            indicate: true,
            tolerances: Tolerances::default(),
        }
    }
}

/// Result of a dispatched move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ArrivalOutcome {
    /// Commands sent, arrival not checked
    Dispatched,
    Arrived { polls: u32 },
    /// Servo reported outside limits, stuck, blocked or safe mode
    JointFault { joint: Joint, status: i32 },
    /// Joint holds but short of its target, likely pressing on something
    ObstacleSuspected { joint: Joint, deviation: u32 },
    StatusUnreadable { joint: Joint },
    TimedOut { polls: u32 },
    Cancelled,
}

impl ArrivalOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ArrivalOutcome::Dispatched | ArrivalOutcome::Arrived { .. })
    }

    /// The arm should be reset before the next move
    pub fn recommends_reset(&self) -> bool {
        matches!(
            self,
            ArrivalOutcome::JointFault { .. } | ArrivalOutcome::StatusUnreadable { .. }
        )
    }
}

/// Drives the five joints of the arm
pub struct MotionDispatcher<J: JointActuator> {
    joints: [J; JOINT_COUNT],
    config: ArrivalConfig,
    cancel: CancelToken,
}

impl<J: JointActuator> MotionDispatcher<J> {
    /// Joints in base, shoulder, elbow, wrist, gripper order
    pub fn new(joints: [J; JOINT_COUNT], config: ArrivalConfig) -> Self {
        Self {
            joints,
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ArrivalConfig {
        &self.config
    }

    pub fn set_checking(&mut self, checking: bool) {
        self.config.checking = checking;
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn joint_mut(&mut self, joint: Joint) -> &mut J {
        &mut self.joints[joint.index()]
    }

    pub fn joints_mut(&mut self) -> &mut [J; JOINT_COUNT] {
        &mut self.joints
    }

    /// Set the same LED colour on every joint
    pub fn indicate(&mut self, color: LedColor) -> Result<()> {
        if !self.config.indicate {
            return Ok(());
        }
        for joint in self.joints.iter_mut() {
            joint.set_color(color)?;
        }
        Ok(())
    }

    /// Command every joint toward `angles`, then confirm arrival in checking mode
    pub fn move_to(&mut self, angles: JointAngles, profile: MoveProfile) -> Result<ArrivalOutcome> {
        debug!("Dispatching {:?} with {:?}", angles, profile);
        self.indicate(LedColor::Cyan)?;

        for joint in DISPATCH_ORDER {
            let i = joint.index();
            let target = angles.get(joint) as i32;
            match profile {
                MoveProfile::Speed(speeds) => self.joints[i].move_at_speed(target, speeds[i])?,
                MoveProfile::CurrentLimit(limits) => {
                    self.joints[i].move_with_current_limit(target, limits[i])?
                }
            }
        }

        if !self.config.checking {
            return Ok(ArrivalOutcome::Dispatched);
        }

        let outcome = self.await_arrival(angles)?;
        match outcome {
            ArrivalOutcome::Arrived { polls } => {
                info!("Arm arrived after {} polls", polls);
                self.indicate(LedColor::Green)?;
            }
            ArrivalOutcome::ObstacleSuspected { joint, deviation } => {
                warn!("Obstacle suspected at {:?} ({} units off)", joint, deviation);
                self.indicate(LedColor::Magenta)?;
            }
            ArrivalOutcome::JointFault { joint, status } => {
                warn!("{:?} fault: {:?}", joint, JointStatus::from_code(status));
                self.indicate(LedColor::Red)?;
            }
            ArrivalOutcome::StatusUnreadable { joint } => {
                warn!("{:?} status unreadable", joint);
                self.indicate(LedColor::Red)?;
            }
            ArrivalOutcome::TimedOut { polls } => {
                warn!("Arrival not confirmed after {} polls", polls);
                self.indicate(LedColor::Red)?;
            }
            ArrivalOutcome::Cancelled => info!("Arrival check cancelled"),
            ArrivalOutcome::Dispatched => {}
        }
        Ok(outcome)
    }

    fn await_arrival(&mut self, angles: JointAngles) -> Result<ArrivalOutcome> {
        let started = Instant::now();
        let mut polls = 0;
        let mut unknown_streak = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(ArrivalOutcome::Cancelled);
            }
            if polls >= self.config.max_polls || started.elapsed() >= self.config.timeout {
                return Ok(ArrivalOutcome::TimedOut { polls });
            }
            polls += 1;

            if let Some(outcome) = self.poll_once(angles, polls, &mut unknown_streak)? {
                return Ok(outcome);
            }

            if !self.config.poll_interval.is_zero() {
                thread::sleep(self.config.poll_interval);
            }
        }
    }

    /// One pass over every joint. `None` means keep polling.
    fn poll_once(
        &mut self,
        angles: JointAngles,
        polls: u32,
        unknown_streak: &mut u32,
    ) -> Result<Option<ArrivalOutcome>> {
        let mut statuses = [None; JOINT_COUNT];
        for joint in Joint::ALL {
            statuses[joint.index()] = self.joints[joint.index()].status()?;
        }

        for joint in Joint::ALL {
            if let Some(status) = statuses[joint.index()] {
                if JointStatus::is_fault(status) {
                    return Ok(Some(ArrivalOutcome::JointFault { joint, status }));
                }
            }
        }

        if let Some(joint) = Joint::ALL.into_iter().find(|j| statuses[j.index()].is_none()) {
            *unknown_streak += 1;
            if *unknown_streak >= self.config.unknown_limit {
                return Ok(Some(ArrivalOutcome::StatusUnreadable { joint }));
            }
            return Ok(None);
        }
        *unknown_streak = 0;

        if statuses.iter().any(|s| *s != Some(STATUS_HOLDING)) {
            return Ok(None);
        }

        let mut off_target = false;
        for joint in Joint::ALL {
            let Some(tolerance) = self.config.tolerances.for_joint(joint) else {
                continue;
            };
            let Some(position) = self.joints[joint.index()].position()? else {
                return Ok(None);
            };
            let deviation = position.abs_diff(angles.get(joint) as i32);
            if deviation > tolerance {
                debug!("{:?} holding {} units off target", joint, deviation);
                off_target = true;
            }
        }

        if !off_target {
            return Ok(Some(ArrivalOutcome::Arrived { polls }));
        }

        self.recheck_obstacle(angles)
    }

    /// Shoulder and elbow both holding and still well off target means an obstacle
    fn recheck_obstacle(&mut self, angles: JointAngles) -> Result<Option<ArrivalOutcome>> {
        const RECHECKED: [Joint; 2] = [Joint::Shoulder, Joint::Elbow];

        for joint in RECHECKED {
            if self.joints[joint.index()].status()? != Some(STATUS_HOLDING) {
                return Ok(None);
            }
        }

        for joint in RECHECKED {
            let Some(position) = self.joints[joint.index()].position()? else {
                return Ok(None);
            };
            let deviation = position.abs_diff(angles.get(joint) as i32);
            if deviation > self.config.tolerances.recheck {
                return Ok(Some(ArrivalOutcome::ObstacleSuspected { joint, deviation }));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm::actuator::fake::FakeJoint;

    const TARGET: JointAngles = JointAngles([0, -350, 450, 0, 0]);

    fn holding_at(angles: JointAngles) -> [FakeJoint; JOINT_COUNT] {
        angles.as_array().map(|a| FakeJoint::holding_at(a as i32))
    }

    fn checking() -> ArrivalConfig {
        ArrivalConfig {
            checking: true,
            max_polls: 10,
            poll_interval: Duration::ZERO,
            ..ArrivalConfig::default()
        }
    }

    fn dispatcher(joints: &[FakeJoint; JOINT_COUNT], config: ArrivalConfig) -> MotionDispatcher<FakeJoint> {
        MotionDispatcher::new(joints.clone(), config)
    }

    #[test]
    fn test_arrived() {
        let joints = holding_at(TARGET);
        let mut d = dispatcher(&joints, checking());

        let outcome = d.move_to(TARGET, MoveProfile::default()).unwrap();
        assert_eq!(outcome, ArrivalOutcome::Arrived { polls: 1 });
        assert!(outcome.is_success());

        assert_eq!(joints[1].commands(), vec!["move -350 current 1600"]);
        assert_eq!(joints[4].commands(), vec!["move 0 current 500"]);
        assert_eq!(joints[2].colors(), vec![LedColor::Cyan, LedColor::Green]);
    }

    #[test]
    fn test_speed_profile() {
        let joints = holding_at(TARGET);
        let mut d = dispatcher(&joints, checking());

        d.move_to(TARGET, MoveProfile::uniform_speed(50)).unwrap();
        assert_eq!(joints[2].commands(), vec!["move 450 speed 50"]);
    }

    #[test]
    fn test_dispatch_order_starts_at_wrist() {
        assert_eq!(DISPATCH_ORDER[0], Joint::Wrist);
        assert_eq!(DISPATCH_ORDER[4], Joint::Gripper);
        let mut seen: Vec<usize> = DISPATCH_ORDER.iter().map(|j| j.index()).collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_joint_fault() {
        let joints = holding_at(TARGET);
        joints[2].script_statuses(&[Some(9)]);
        let mut d = dispatcher(&joints, checking());

        let outcome = d.move_to(TARGET, MoveProfile::default()).unwrap();
        assert_eq!(
            outcome,
            ArrivalOutcome::JointFault {
                joint: Joint::Elbow,
                status: 9
            }
        );
        assert!(outcome.recommends_reset());
        assert_eq!(joints[0].colors().last(), Some(&LedColor::Red));
    }

    #[test]
    fn test_obstacle_suspected() {
        let joints = holding_at(TARGET);
        joints[1].script_positions(&[Some(-350 + 60)]);
        let mut d = dispatcher(&joints, checking());

        let outcome = d.move_to(TARGET, MoveProfile::default()).unwrap();
        assert_eq!(
            outcome,
            ArrivalOutcome::ObstacleSuspected {
                joint: Joint::Shoulder,
                deviation: 60
            }
        );
        assert!(!outcome.recommends_reset());
        assert_eq!(joints[0].colors().last(), Some(&LedColor::Magenta));
    }

    #[test]
    fn test_obstacle_needs_both_positions() {
        let joints = holding_at(TARGET);
        // Shoulder answers the first position read, then goes quiet
        joints[1].script_positions(&[Some(-350), None]);
        joints[2].script_positions(&[Some(450 + 60)]);
        let mut d = dispatcher(&joints, checking());

        let outcome = d.move_to(TARGET, MoveProfile::default()).unwrap();
        assert_eq!(outcome, ArrivalOutcome::TimedOut { polls: 10 });
    }

    #[test]
    fn test_extreme_position_does_not_overflow() {
        let joints = holding_at(TARGET);
        joints[1].script_positions(&[Some(i32::MAX)]);
        let mut d = dispatcher(&joints, checking());

        let outcome = d.move_to(TARGET, MoveProfile::default()).unwrap();
        assert_eq!(
            outcome,
            ArrivalOutcome::ObstacleSuspected {
                joint: Joint::Shoulder,
                deviation: i32::MAX.abs_diff(-350)
            }
        );
    }

    #[test]
    fn test_base_off_target_times_out() {
        let joints = holding_at(TARGET);
        joints[0].script_positions(&[Some(25)]);
        let mut d = dispatcher(&joints, checking());

        let outcome = d.move_to(TARGET, MoveProfile::default()).unwrap();
        assert_eq!(outcome, ArrivalOutcome::TimedOut { polls: 10 });
        assert_eq!(joints[3].colors().last(), Some(&LedColor::Red));
    }

    #[test]
    fn test_status_unreadable_after_consecutive_misses() {
        let joints = holding_at(TARGET);
        joints[3].script_statuses(&[None]);
        let mut d = dispatcher(&joints, checking());

        let outcome = d.move_to(TARGET, MoveProfile::default()).unwrap();
        assert_eq!(outcome, ArrivalOutcome::StatusUnreadable { joint: Joint::Wrist });
        assert_eq!(joints[3].status_reads(), 5);
    }

    #[test]
    fn test_unknown_streak_resets() {
        let joints = holding_at(TARGET);
        joints[3].script_statuses(&[None, None, None, None, Some(6)]);
        let mut d = dispatcher(&joints, checking());

        let outcome = d.move_to(TARGET, MoveProfile::default()).unwrap();
        assert_eq!(outcome, ArrivalOutcome::Arrived { polls: 5 });
    }

    #[test]
    fn test_dispatch_without_checking() {
        let joints = holding_at(TARGET);
        let config = ArrivalConfig {
            checking: false,
            ..checking()
        };
        let mut d = dispatcher(&joints, config);

        assert_eq!(
            d.move_to(TARGET, MoveProfile::default()).unwrap(),
            ArrivalOutcome::Dispatched
        );
        assert_eq!(joints[0].status_reads(), 0);
        assert_eq!(joints[0].colors(), vec![LedColor::Cyan]);
    }

    #[test]
    fn test_cancelled() {
        let joints = holding_at(TARGET);
        joints[0].script_statuses(&[Some(4)]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut d = dispatcher(&joints, checking()).with_cancel(cancel);

        assert_eq!(
            d.move_to(TARGET, MoveProfile::default()).unwrap(),
            ArrivalOutcome::Cancelled
        );
        assert_eq!(joints[0].status_reads(), 0);
    }

    #[test]
    fn test_indicator_disabled() {
        let joints = holding_at(TARGET);
        let config = ArrivalConfig {
            indicate: false,
            ..checking()
        };
        let mut d = dispatcher(&joints, config);

        d.move_to(TARGET, MoveProfile::default()).unwrap();
        assert!(joints[0].colors().is_empty());
    }
}
