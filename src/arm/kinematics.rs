// Inverse kinematics for the 5-joint drawing arm
// Converts a Cartesian target (x, y, z, gripper) into joint angles, with the
// gripper held at a fixed pitch so the wrist angle follows from shoulder and elbow.

use serde::{Deserialize, Serialize};

/// Joints in protocol order
pub const JOINT_COUNT: usize = 5;

/// Mechanical joint limits (degrees)
pub const ANGLE_MIN: f64 = -90.0;
pub const ANGLE_MAX: f64 = 90.0;

/// Protocol units per degree
const UNITS_PER_DEG: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Joint {
    Base,
    Shoulder,
    Elbow,
    Wrist,
    Gripper,
}

impl Joint {
    pub const ALL: [Joint; JOINT_COUNT] = [
        Joint::Base,
        Joint::Shoulder,
        Joint::Elbow,
        Joint::Wrist,
        Joint::Gripper,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Servo bus ID as configured on the arm
    pub fn servo_id(self) -> u8 {
        self as u8 + 1
    }
}

/// Joint angles in protocol units (tenths of a degree)
/// Order: base, shoulder, elbow, wrist, gripper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JointAngles(pub [i16; JOINT_COUNT]);

impl JointAngles {
    pub fn new(base: i16, shoulder: i16, elbow: i16, wrist: i16, gripper: i16) -> Self {
        Self([base, shoulder, elbow, wrist, gripper])
    }

    pub fn get(&self, joint: Joint) -> i16 {
        self.0[joint.index()]
    }

    pub fn base(&self) -> i16 {
        self.0[0]
    }

    pub fn shoulder(&self) -> i16 {
        self.0[1]
    }

    pub fn elbow(&self) -> i16 {
        self.0[2]
    }

    pub fn wrist(&self) -> i16 {
        self.0[3]
    }

    pub fn gripper(&self) -> i16 {
        self.0[4]
    }

    pub fn as_array(&self) -> [i16; JOINT_COUNT] {
        self.0
    }
}

/// Desired end-effector position and gripper aperture
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CartesianTarget {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub gripper: f64,
}

impl CartesianTarget {
    pub fn new(x: f64, y: f64, z: f64, gripper: f64) -> Self {
        Self { x, y, z, gripper }
    }
}

/// Arm link lengths
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkLengths {
    /// Bottom to shoulder
    pub d1: f64,
    /// Shoulder to elbow
    pub d2: f64,
    /// Elbow to wrist
    pub d3: f64,
    /// Wrist to end of gripper
    pub d4: f64,
}

impl Default for LinkLengths {
    fn default() -> Self {
        Self {
            d1: 4.13,
            d2: 5.61,
            d3: 6.39,
            d4: 4.52,
        }
    }
}

impl LinkLengths {
    /// Shoulder-to-wrist distances the two middle links can span
    pub fn reach(&self) -> (f64, f64) {
        ((self.d2 - self.d3).abs(), self.d2 + self.d3)
    }
}

/// Solver geometry and tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IkParams {
    pub links: LinkLengths,
    /// Fixed gripper pitch (degrees)
    pub pitch_deg: f64,
    /// Shoulder-elbow axis offset (degrees)
    pub shoulder_offset_deg: f64,
    /// Wrist-gripper offset (degrees)
    pub wrist_offset_deg: f64,
}

impl Default for IkParams {
    fn default() -> Self {
        Self {
            links: LinkLengths::default(),
            pitch_deg: 80.0,
            shoulder_offset_deg: 15.0,
            wrist_offset_deg: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IkError {
    #[error("Target unreachable: shoulder-wrist distance {reach:.3} outside [{min:.3}, {max:.3}]")]
    Unreachable { reach: f64, min: f64, max: f64 },

    #[error("Target has a non-finite coordinate")]
    NonFinite,
}

/// A solved pose, tagged with whether any joint had to be clamped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IkSolution {
    Exact { angles: JointAngles },
    Clamped {
        angles: JointAngles,
        clamped: [bool; JOINT_COUNT],
    },
}

impl IkSolution {
    pub fn angles(&self) -> JointAngles {
        match self {
            IkSolution::Exact { angles } => *angles,
            IkSolution::Clamped { angles, .. } => *angles,
        }
    }

    pub fn is_clamped(&self) -> bool {
        matches!(self, IkSolution::Clamped { .. })
    }
}

/// Convert degrees to protocol units, truncating toward zero
fn deg_to_units(deg: f64) -> i16 {
    (deg * UNITS_PER_DEG) as i16
}

fn units_to_deg(units: i16) -> f64 {
    units as f64 / UNITS_PER_DEG
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IkSolver {
    params: IkParams,
}

impl IkSolver {
    pub fn new(params: IkParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &IkParams {
        &self.params
    }

    /// Solve joint angles for a target.
    ///
    /// Angles outside the joint limits are clamped to the limit; the result
    /// says which joints were clamped. Targets the shoulder and elbow links
    /// cannot span are rejected.
    pub fn solve(&self, target: CartesianTarget) -> Result<IkSolution, IkError> {
        let CartesianTarget { x, y, z, gripper } = target;
        if !(x.is_finite() && y.is_finite() && z.is_finite() && gripper.is_finite()) {
            return Err(IkError::NonFinite);
        }

        let p = &self.params;
        let LinkLengths { d1, d2, d3, d4 } = p.links;

        // Base angle, straight up is defined as facing forward
        let q1 = if x == 0.0 && y == 0.0 {
            0.0
        } else {
            y.atan2(x).to_degrees()
        };

        // Radius from the base axis in the xy plane
        let xyr = x.hypot(y);

        // Gripper components in the xz plane
        let pitch = p.pitch_deg.to_radians();
        let lx = d4 * pitch.cos();
        let lz = d4 * pitch.sin();

        // Wrist coordinates relative to the shoulder axis
        let x1 = xyr - lx;
        let z1 = z + lz - d1;

        let h = x1.hypot(z1);
        let (min, max) = p.links.reach();
        if h <= 0.0 || h < min || h > max {
            return Err(IkError::Unreachable { reach: h, min, max });
        }

        let a1 = z1.atan2(x1);
        let a2 = ((d2 * d2 - d3 * d3 + h * h) / (2.0 * d2 * h))
            .clamp(-1.0, 1.0)
            .acos();
        let q2 = (a1 + a2).to_degrees();

        let a3 = ((d2 * d2 + d3 * d3 - h * h) / (2.0 * d2 * d3))
            .clamp(-1.0, 1.0)
            .acos();
        let q3 = 180.0 - a3.to_degrees();

        // Wrist keeps the gripper at the fixed pitch
        let q4 = p.pitch_deg - (q3 - q2) + p.wrist_offset_deg;
        let q2 = q2 + p.shoulder_offset_deg;

        let raw = [q1, 90.0 - q2, q3 - 90.0, q4, gripper];

        let mut clamped = [false; JOINT_COUNT];
        let mut units = [0i16; JOINT_COUNT];
        for (i, &deg) in raw.iter().enumerate() {
            clamped[i] = !(ANGLE_MIN..=ANGLE_MAX).contains(&deg);
            units[i] = deg_to_units(deg.clamp(ANGLE_MIN, ANGLE_MAX));
        }

        let angles = JointAngles(units);
        if clamped.iter().any(|&c| c) {
            Ok(IkSolution::Clamped { angles, clamped })
        } else {
            Ok(IkSolution::Exact { angles })
        }
    }

    /// End-effector position for a set of joint angles.
    ///
    /// Uses the same fixed-pitch geometry as `solve`, so the wrist joint does
    /// not enter the position.
    pub fn forward(&self, angles: JointAngles) -> CartesianTarget {
        let p = &self.params;
        let LinkLengths { d1, d2, d3, d4 } = p.links;

        let q1 = units_to_deg(angles.base()).to_radians();
        let q2 = 90.0 - units_to_deg(angles.shoulder()) - p.shoulder_offset_deg;
        let q3 = units_to_deg(angles.elbow()) + 90.0;

        let upper = q2.to_radians();
        let fore = (q2 - q3).to_radians();
        let wrist_x = d2 * upper.cos() + d3 * fore.cos();
        let wrist_z = d2 * upper.sin() + d3 * fore.sin();

        let pitch = p.pitch_deg.to_radians();
        let xyr = wrist_x + d4 * pitch.cos();
        let z = wrist_z - d4 * pitch.sin() + d1;

        CartesianTarget {
            x: xyr * q1.cos(),
            y: xyr * q1.sin(),
            z,
            gripper: units_to_deg(angles.gripper()),
        }
    }
}
