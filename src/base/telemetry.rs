// Server Information Packet (SIP) decoder
//
// SIP layout, offsets from the header:
// [0xFA, 0xFB, Len, Type, XPos(2), YPos(2), Heading(2), LVel(2), RVel(2),
//  Battery, StallBumpers(2), Control(2), Flags(2), Compass, ..., CkHi, CkLo]
//
// The tail of the packet (gripper and IO block) is addressed from the frame end.

use serde::Serialize;

use super::codec::{FrameDialect, P2osDialect};

/// Smallest length byte that still holds the fixed block and the tail block
pub const MIN_SIP_LEN: usize = 29;

/// Decoded robot state, merged across packets
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Telemetry {
    /// Packet type: 0x32 when stopped, 0x33 when moving
    pub packet_type: u8,
    pub x_pos: i16,
    pub y_pos: i16,
    pub heading: i16,
    pub left_velocity: i16,
    pub right_velocity: i16,
    /// Battery charge in tenths of a volt
    pub battery: u8,
    pub stall_bumpers: u16,
    pub control: i16,
    pub flags: u16,
    pub compass: u8,
    pub grip_state: u8,
    pub analog_port: u8,
    pub analog: u8,
    pub digital_in: u8,
    pub digital_out: u8,
    pub battery_x10: u16,
}

impl Telemetry {
    pub fn is_moving(&self) -> bool {
        self.packet_type & 0x0F == 3
    }

    pub fn motors_enabled(&self) -> bool {
        self.flags & 0x01 != 0
    }

    pub fn battery_volts(&self) -> f32 {
        self.battery as f32 / 10.0
    }
}

/// Result of scanning one read buffer
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A complete, checksum-valid packet was found
    Frame(Telemetry),
    /// A header was found but the buffer ended early; only fields present were updated
    Truncated(Telemetry),
    /// No header in the buffer
    NoFrame,
}

/// Stateful SIP decoder. Fields missing from a short read keep their last value.
#[derive(Debug, Clone, Default)]
pub struct SipDecoder<D: FrameDialect = P2osDialect> {
    dialect: D,
    latest: Telemetry,
}

impl SipDecoder<P2osDialect> {
    pub fn p2os() -> Self {
        Self::new(P2osDialect)
    }
}

impl<D: FrameDialect> SipDecoder<D> {
    pub fn new(dialect: D) -> Self {
        Self {
            dialect,
            latest: Telemetry::default(),
        }
    }

    /// Latest merged state
    pub fn latest(&self) -> &Telemetry {
        &self.latest
    }

    /// Scan `bytes` for a SIP and merge it into the latest state.
    ///
    /// Header candidates with an implausible length or a bad checksum are
    /// skipped, so header bytes inside payload data cannot derail the scan.
    pub fn decode(&mut self, bytes: &[u8]) -> Decoded {
        let header = self.dialect.header();
        let mut truncated_at = None;
        let mut i = 0;

        while i + 1 < bytes.len() {
            if bytes[i] != header[0] || bytes[i + 1] != header[1] {
                i += 1;
                continue;
            }

            let Some(&len) = bytes.get(i + 2) else {
                truncated_at.get_or_insert(i);
                break;
            };
            let len = len as usize;
            if len < MIN_SIP_LEN {
                i += 1;
                continue;
            }

            let end = i + 3 + len;
            if end > bytes.len() {
                truncated_at.get_or_insert(i);
                i += 1;
                continue;
            }

            let frame = &bytes[i..end];
            let n = frame.len();
            if self.dialect.checksum(&frame[3..n - 2]) != [frame[n - 2], frame[n - 1]] {
                i += 1;
                continue;
            }

            self.apply(frame);
            return Decoded::Frame(self.latest);
        }

        match truncated_at {
            Some(start) => {
                self.apply(&bytes[start..]);
                Decoded::Truncated(self.latest)
            }
            None => Decoded::NoFrame,
        }
    }

    /// Copy every field that lies inside `frame` into the latest state
    fn apply(&mut self, frame: &[u8]) {
        let t = &mut self.latest;

        if let Some(v) = byte_at(frame, 3) {
            t.packet_type = v;
        }
        if let Some(v) = i16_at(frame, 4) {
            t.x_pos = v;
        }
        if let Some(v) = i16_at(frame, 6) {
            t.y_pos = v;
        }
        if let Some(v) = i16_at(frame, 8) {
            t.heading = v;
        }
        if let Some(v) = i16_at(frame, 10) {
            t.left_velocity = v;
        }
        if let Some(v) = i16_at(frame, 12) {
            t.right_velocity = v;
        }
        if let Some(v) = byte_at(frame, 14) {
            t.battery = v;
        }
        if let Some(v) = u16_at(frame, 15) {
            t.stall_bumpers = v;
        }
        if let Some(v) = i16_at(frame, 17) {
            t.control = v;
        }
        if let Some(v) = u16_at(frame, 19) {
            t.flags = v;
        }
        if let Some(v) = byte_at(frame, 21) {
            t.compass = v;
        }

        // Tail block, only reachable when the length byte was read
        let Some(&len) = frame.get(2) else {
            return;
        };
        let end = 3 + len as usize;
        if end < MIN_SIP_LEN + 3 {
            return;
        }
        if let Some(v) = byte_at(frame, end - 10) {
            t.grip_state = v;
        }
        if let Some(v) = byte_at(frame, end - 9) {
            t.analog_port = v;
        }
        if let Some(v) = byte_at(frame, end - 8) {
            t.analog = v;
        }
        if let Some(v) = byte_at(frame, end - 7) {
            t.digital_in = v;
        }
        if let Some(v) = byte_at(frame, end - 6) {
            t.digital_out = v;
        }
        if let Some(v) = u16_at(frame, end - 5) {
            t.battery_x10 = v;
        }
    }
}

fn byte_at(frame: &[u8], idx: usize) -> Option<u8> {
    frame.get(idx).copied()
}

fn u16_at(frame: &[u8], idx: usize) -> Option<u16> {
    let bytes = frame.get(idx..idx + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn i16_at(frame: &[u8], idx: usize) -> Option<i16> {
    u16_at(frame, idx).map(|v| v as i16)
}
