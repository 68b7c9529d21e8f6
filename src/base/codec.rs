// Command frame codec for the mobile-base controller (P2OS dialect)
//
// Frame format: [0xFA, 0xFB, ByteCount, Command, ArgType, ArgLo, ArgHi, CkHi, CkLo]
// Short frame:  [0xFA, 0xFB, 0x03, Command, CkHi, CkLo]
//
// ByteCount covers everything after itself, checksum included.

use std::fmt;

/// Frame header bytes
pub const HEADER: [u8; 2] = [0xFA, 0xFB];

/// Argument type bytes
pub const POSITIVE: u8 = 0x3B;
pub const NEGATIVE: u8 = 0x1B;

/// Byte count of a command carrying a 2-byte integer argument
pub const LONG_COUNT: u8 = 6;
/// Byte count of a bare command
pub const SHORT_COUNT: u8 = 3;

/// Gripper IO request code used by the stock controller firmware
pub const P2OS_GRIPPER_IO_REQUEST: u8 = 37;

/// Controller command set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCode {
    /// SYNC0 before the connection is open, heartbeat afterwards
    Pulse,
    /// SYNC1 before the connection is open
    Open,
    /// SYNC2 before the connection is open
    Close,
    Enable,
    SetA,
    SetV,
    Move,
    Rotate,
    SetRv,
    Vel,
    Head,
    DHead,
    Config,
    Encoder,
    RVel,
    SetRa,
    Sonar,
    Stop,
    /// Independent wheel velocities: bits 0-7 right, bits 8-15 left
    Vel2,
    Gripper,
    IoRequest,
    BumpStall,
    HostBaud,
    EStop,
    /// Codes the controller accepts but the manual does not name
    Raw(u8),
}

impl CommandCode {
    pub const SYNC0: CommandCode = CommandCode::Pulse;
    pub const SYNC1: CommandCode = CommandCode::Open;
    pub const SYNC2: CommandCode = CommandCode::Close;

    pub fn code(self) -> u8 {
        match self {
            CommandCode::Pulse => 0,
            CommandCode::Open => 1,
            CommandCode::Close => 2,
            CommandCode::Enable => 4,
            CommandCode::SetA => 5,
            CommandCode::SetV => 6,
            CommandCode::Move => 8,
            CommandCode::Rotate => 9,
            CommandCode::SetRv => 10,
            CommandCode::Vel => 11,
            CommandCode::Head => 12,
            CommandCode::DHead => 13,
            CommandCode::Config => 18,
            CommandCode::Encoder => 19,
            CommandCode::RVel => 21,
            CommandCode::SetRa => 23,
            CommandCode::Sonar => 28,
            CommandCode::Stop => 29,
            CommandCode::Vel2 => 32,
            CommandCode::Gripper => 33,
            CommandCode::IoRequest => 40,
            CommandCode::BumpStall => 44,
            CommandCode::HostBaud => 50,
            CommandCode::EStop => 55,
            CommandCode::Raw(code) => code,
        }
    }
}

/// Which wheel a VEL2 magnitude is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wheel {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Value {value} does not fit the argument of {code:?} (max magnitude {max})")]
    ValueOutOfRange {
        code: CommandCode,
        value: i32,
        max: u32,
    },
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Checksum over the span after the byte count.
///
/// Two independent mod-256 sums: even-indexed bytes in the first checksum
/// byte, odd-indexed bytes in the second. A trailing unpaired byte is added
/// to the second sum, so a short frame `[code]` checksums to `[0, code]`.
pub fn checksum(payload: &[u8]) -> [u8; 2] {
    let mut even: u8 = 0;
    let mut odd: u8 = 0;
    let mut pairs = payload.chunks_exact(2);
    for pair in &mut pairs {
        even = even.wrapping_add(pair[0]);
        odd = odd.wrapping_add(pair[1]);
    }
    if let [last] = pairs.remainder() {
        odd = odd.wrapping_add(*last);
    }
    [even, odd]
}

/// Byte layout choices that differ between controller firmwares
pub trait FrameDialect: Send + Sync {
    fn header(&self) -> [u8; 2] {
        HEADER
    }

    fn positive(&self) -> u8 {
        POSITIVE
    }

    fn negative(&self) -> u8 {
        NEGATIVE
    }

    /// Command code that requests gripper IO packets
    fn gripper_io_request(&self) -> u8;

    fn checksum(&self, payload: &[u8]) -> [u8; 2] {
        checksum(payload)
    }
}

/// Stock Pioneer 2 operating system dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct P2osDialect;

impl FrameDialect for P2osDialect {
    fn gripper_io_request(&self) -> u8 {
        P2OS_GRIPPER_IO_REQUEST
    }
}

/// A complete frame ready to be written to the transport
#[derive(Clone, PartialEq, Eq)]
pub struct CommandFrame(Vec<u8>);

impl CommandFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Command code byte
    pub fn code(&self) -> u8 {
        self.0[3]
    }

    /// Command through last argument byte (the checksummed span)
    pub fn payload(&self) -> &[u8] {
        &self.0[3..self.0.len() - 2]
    }

    /// Trailing checksum bytes
    pub fn checksum(&self) -> [u8; 2] {
        let n = self.0.len();
        [self.0[n - 2], self.0[n - 1]]
    }
}

impl AsRef<[u8]> for CommandFrame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandFrame({:02X?})", self.0)
    }
}

/// Builds command frames for one dialect
#[derive(Debug, Clone, Default)]
pub struct FrameCodec<D: FrameDialect = P2osDialect> {
    dialect: D,
}

impl FrameCodec<P2osDialect> {
    pub fn p2os() -> Self {
        Self::new(P2osDialect)
    }
}

impl<D: FrameDialect> FrameCodec<D> {
    pub fn new(dialect: D) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> &D {
        &self.dialect
    }

    /// Prepend header and byte count, append checksum
    fn assemble(&self, payload: &[u8]) -> CommandFrame {
        let mut frame = Vec::with_capacity(payload.len() + 5);
        frame.extend_from_slice(&self.dialect.header());
        frame.push((payload.len() + 2) as u8);
        frame.extend_from_slice(payload);
        frame.extend_from_slice(&self.dialect.checksum(payload));
        CommandFrame(frame)
    }

    /// Encode a command with a signed integer argument.
    ///
    /// Without a wheel the magnitude is a little-endian u16. With a wheel the
    /// magnitude must fit a byte: right goes to the low byte, left to the high byte.
    pub fn encode(&self, code: CommandCode, value: i32, wheel: Option<Wheel>) -> Result<CommandFrame> {
        let sign = if value >= 0 {
            self.dialect.positive()
        } else {
            self.dialect.negative()
        };
        let magnitude = value.unsigned_abs();

        let (lo, hi) = match wheel {
            None => {
                if magnitude > u16::MAX as u32 {
                    return Err(CodecError::ValueOutOfRange {
                        code,
                        value,
                        max: u16::MAX as u32,
                    });
                }
                let [lo, hi] = (magnitude as u16).to_le_bytes();
                (lo, hi)
            }
            Some(wheel) => {
                if magnitude > u8::MAX as u32 {
                    return Err(CodecError::ValueOutOfRange {
                        code,
                        value,
                        max: u8::MAX as u32,
                    });
                }
                match wheel {
                    Wheel::Right => (magnitude as u8, 0),
                    Wheel::Left => (0, magnitude as u8),
                }
            }
        };

        Ok(self.assemble(&[code.code(), sign, lo, hi]))
    }

    /// VEL2 with both wheels at once (signed bytes, right in the low byte)
    pub fn encode_vel2(&self, left: i8, right: i8) -> CommandFrame {
        self.assemble(&[
            CommandCode::Vel2.code(),
            self.dialect.positive(),
            right as u8,
            left as u8,
        ])
    }

    /// Command without argument
    pub fn encode_short(&self, code: CommandCode) -> CommandFrame {
        self.assemble(&[code.code()])
    }

    /// Heartbeat pulse, also SYNC0
    pub fn heartbeat(&self) -> CommandFrame {
        self.encode_short(CommandCode::Pulse)
    }

    /// All-stop
    pub fn stop(&self) -> CommandFrame {
        self.encode_short(CommandCode::Stop)
    }

    /// Close the client connection
    pub fn close_down(&self) -> CommandFrame {
        self.encode_short(CommandCode::Close)
    }

    /// Request one encoder SIP
    pub fn sip_request(&self) -> CommandFrame {
        self.assemble(&[CommandCode::Encoder.code(), self.dialect.positive(), 1, 0])
    }

    /// Request gripper IO packets (0 stops the stream)
    pub fn gripper_io_request(&self, value: u8) -> CommandFrame {
        self.assemble(&[self.dialect.gripper_io_request(), self.dialect.positive(), value, 0])
    }

    /// Check header, byte count and checksum of a frame received or built elsewhere
    pub fn verify(&self, bytes: &[u8]) -> bool {
        if bytes.len() < 6 || bytes[..2] != self.dialect.header() {
            return false;
        }
        let count = bytes[2] as usize;
        if count < 3 || bytes.len() != count + 3 {
            return false;
        }
        let n = bytes.len();
        self.dialect.checksum(&bytes[3..n - 2]) == [bytes[n - 2], bytes[n - 1]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_frames_match_controller() {
        let codec = FrameCodec::p2os();
        assert_eq!(codec.heartbeat().as_bytes(), &[0xFA, 0xFB, 0x03, 0x00, 0x00, 0x00]);
        assert_eq!(
            codec.encode_short(CommandCode::SYNC1).as_bytes(),
            &[0xFA, 0xFB, 0x03, 0x01, 0x00, 0x01]
        );
        assert_eq!(codec.close_down().as_bytes(), &[0xFA, 0xFB, 0x03, 0x02, 0x00, 0x02]);
        assert_eq!(codec.stop().as_bytes(), &[0xFA, 0xFB, 0x03, 0x1D, 0x00, 0x1D]);
    }

    #[test]
    fn test_long_frames_match_controller() {
        let codec = FrameCodec::p2os();
        // SETV 500 mm/s
        let frame = codec.encode(CommandCode::SetV, 500, None).unwrap();
        assert_eq!(
            frame.as_bytes(),
            &[0xFA, 0xFB, 0x06, 0x06, 0x3B, 0xF4, 0x01, 0xFA, 0x3C]
        );
        // SETA -300 mm/s/s (deceleration)
        let frame = codec.encode(CommandCode::SetA, -300, None).unwrap();
        assert_eq!(
            frame.as_bytes(),
            &[0xFA, 0xFB, 0x06, 0x05, 0x1B, 0x2C, 0x01, 0x31, 0x1C]
        );
        assert_eq!(
            codec.sip_request().as_bytes(),
            &[0xFA, 0xFB, 0x06, 0x13, 0x3B, 0x01, 0x00, 0x14, 0x3B]
        );
        assert_eq!(
            codec.gripper_io_request(0).as_bytes(),
            &[0xFA, 0xFB, 0x06, 0x25, 0x3B, 0x00, 0x00, 0x25, 0x3B]
        );
    }

    #[test]
    fn test_zero_value_is_positive() {
        let codec = FrameCodec::p2os();
        let frame = codec.encode(CommandCode::Vel, 0, None).unwrap();
        assert_eq!(frame.as_bytes()[4], POSITIVE);
        assert_eq!(frame.checksum(), [0x0B, 0x3B]);
    }

    #[test]
    fn test_move_checksum_recomputes() {
        let codec = FrameCodec::p2os();
        let frame = codec.encode(CommandCode::Move, 10, None).unwrap();
        assert_eq!(frame.len(), 9);
        assert_eq!(frame.as_bytes()[2], LONG_COUNT);
        assert_eq!(frame.payload(), &[8, POSITIVE, 10, 0]);
        assert_eq!(checksum(frame.payload()), frame.checksum());
        // Even lane 8 + 10, odd lane 59 + 0
        assert_eq!(frame.checksum(), [18, 59]);
        assert!(codec.verify(frame.as_bytes()));
    }

    #[test]
    fn test_checksum_lanes_wrap_independently() {
        let codec = FrameCodec::p2os();
        let frame = codec.encode(CommandCode::SetV, 0xC500, None).unwrap();
        assert_eq!(frame.payload(), &[0x06, POSITIVE, 0x00, 0xC5]);
        // Odd lane 0x3B + 0xC5 wraps to 0x00 without touching the even lane
        assert_eq!(frame.checksum(), [0x06, 0x00]);
        assert!(codec.verify(frame.as_bytes()));

        assert_eq!(checksum(&[0xFF, 0xFF, 0x02, 0x02]), [0x01, 0x01]);
        assert_eq!(checksum(&[0x80, 0x01, 0x80]), [0x80, 0x81]);
    }

    #[test]
    fn test_single_bit_flip_changes_checksum() {
        let codec = FrameCodec::p2os();
        let frame = codec.encode(CommandCode::Move, 10, None).unwrap();
        let original = frame.checksum();
        let payload = frame.payload().to_vec();

        for byte in 0..payload.len() {
            for bit in 0..8 {
                let mut corrupted = payload.clone();
                corrupted[byte] ^= 1 << bit;
                assert_ne!(
                    checksum(&corrupted),
                    original,
                    "flip of bit {} in byte {} went undetected",
                    bit,
                    byte
                );
            }
        }
    }

    #[test]
    fn test_verify_rejects_corruption() {
        let codec = FrameCodec::p2os();
        let mut bytes = codec.encode(CommandCode::RVel, -20, None).unwrap().into_bytes();
        assert!(codec.verify(&bytes));
        bytes[5] ^= 0x04;
        assert!(!codec.verify(&bytes));
        assert!(!codec.verify(&bytes[..4]));
    }

    #[test]
    fn test_two_byte_magnitude() {
        let codec = FrameCodec::p2os();
        let frame = codec.encode(CommandCode::Head, -1000, None).unwrap();
        assert_eq!(frame.payload(), &[12, NEGATIVE, 0xE8, 0x03]);

        let err = codec.encode(CommandCode::Move, 70_000, None).unwrap_err();
        assert_eq!(
            err,
            CodecError::ValueOutOfRange {
                code: CommandCode::Move,
                value: 70_000,
                max: 65_535
            }
        );
    }

    #[test]
    fn test_wheel_byte_routing() {
        let codec = FrameCodec::p2os();
        let right = codec.encode(CommandCode::Vel2, 5, Some(Wheel::Right)).unwrap();
        assert_eq!(right.payload(), &[32, POSITIVE, 5, 0]);

        let left = codec.encode(CommandCode::Vel2, -5, Some(Wheel::Left)).unwrap();
        assert_eq!(left.payload(), &[32, NEGATIVE, 0, 5]);

        assert!(codec.encode(CommandCode::Vel2, 300, Some(Wheel::Left)).is_err());
    }

    #[test]
    fn test_vel2_both_wheels() {
        let codec = FrameCodec::p2os();
        let frame = codec.encode_vel2(10, -10);
        // right (-10 as two's complement) in the low byte, left in the high byte
        assert_eq!(frame.payload(), &[32, POSITIVE, 0xF6, 0x0A]);
        assert!(codec.verify(frame.as_bytes()));
    }

    #[test]
    fn test_raw_code_passthrough() {
        let codec = FrameCodec::p2os();
        let frame = codec.encode(CommandCode::Raw(62), 1, None).unwrap();
        assert_eq!(
            frame.as_bytes(),
            &[0xFA, 0xFB, 0x06, 0x3E, 0x3B, 0x01, 0x00, 0x3F, 0x3B]
        );
    }

    #[test]
    fn test_custom_dialect() {
        struct AltDialect;
        impl FrameDialect for AltDialect {
            fn gripper_io_request(&self) -> u8 {
                41
            }
        }

        let codec = FrameCodec::new(AltDialect);
        assert_eq!(codec.gripper_io_request(2).payload(), &[41, POSITIVE, 2, 0]);
    }
}
