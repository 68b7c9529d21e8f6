// High-level driver for the mobile base
//
// Combines the frame codec, handshake and SIP decoder into a simple API
// for driving the base.

use std::thread::sleep;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::codec::{CodecError, CommandCode, FrameCodec, FrameDialect, P2osDialect};
use super::handshake::{Handshake, HandshakeError, Ready, RetryPolicy};
use super::telemetry::{Decoded, SipDecoder, Telemetry};
use crate::transport::{CancelToken, SerialTransport, Transport, TransportError};

/// Time the controller needs to answer a SIP request
const SIP_SETTLE: Duration = Duration::from_millis(10);
/// Maximum SIP read size
const SIP_READ_MAX: usize = 255;
/// How long a step command runs before the base is stopped
pub const STEP_DURATION: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum BaseError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Frame encoding failed: {0}")]
    Codec(#[from] CodecError),

    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
}

pub type Result<T> = std::result::Result<T, BaseError>;

/// High-level driver for the wheeled base
pub struct BaseDriver<T: Transport, D: FrameDialect = P2osDialect> {
    transport: T,
    codec: FrameCodec<D>,
    decoder: SipDecoder<D>,
    terminated: bool,
}

impl BaseDriver<SerialTransport> {
    /// Open the controller's serial port
    pub fn open(port: &str, baudrate: u32) -> Result<Self> {
        info!("Opening base controller on {}", port);
        let transport = SerialTransport::open(port, baudrate)?;
        Ok(Self::new(transport))
    }
}

impl<T: Transport> BaseDriver<T> {
    pub fn new(transport: T) -> Self {
        Self::with_dialect(transport, P2osDialect)
    }
}

impl<T: Transport, D: FrameDialect> BaseDriver<T, D> {
    pub fn with_dialect(transport: T, dialect: D) -> Self
    where
        D: Clone,
    {
        Self {
            transport,
            codec: FrameCodec::new(dialect.clone()),
            decoder: SipDecoder::new(dialect),
            terminated: false,
        }
    }

    /// Run the connection handshake.
    ///
    /// Must be called before any motion command.
    pub fn initialize(&mut self, retry: RetryPolicy, cancel: CancelToken) -> Result<Ready> {
        info!("Initializing base controller");
        let ready = Handshake::new(&self.codec)
            .with_retry(retry)
            .with_cancel(cancel)
            .run(&mut self.transport)?;
        self.terminated = false;
        Ok(ready)
    }

    fn send_value(&mut self, code: CommandCode, value: i32) -> Result<()> {
        let frame = self.codec.encode(code, value, None)?;
        debug!("Sending {:?} {}: {:?}", code, value, frame);
        self.transport.write(frame.as_bytes())?;
        Ok(())
    }

    /// Heartbeat, must be sent on a fixed cadence to keep the link alive
    pub fn pulse(&mut self) -> Result<()> {
        self.transport.write(self.codec.heartbeat().as_bytes())?;
        Ok(())
    }

    /// Translate forward (+) or back (-) by `mm` at the SETV speed
    pub fn nudge(&mut self, mm: i32) -> Result<()> {
        self.send_value(CommandCode::Move, mm)
    }

    /// Drive forward (+) or reverse (-) in mm/s
    pub fn drive(&mut self, mm_per_sec: i32) -> Result<()> {
        self.send_value(CommandCode::Vel, mm_per_sec)
    }

    /// Rotate counter-clockwise (+) or clockwise (-) in deg/s
    pub fn rotate_velocity(&mut self, deg_per_sec: i32) -> Result<()> {
        self.send_value(CommandCode::RVel, deg_per_sec)
    }

    /// Turn to an absolute heading in degrees (+ = ccw)
    pub fn head(&mut self, degrees: i32) -> Result<()> {
        self.send_value(CommandCode::Head, degrees)
    }

    /// Rotate by a relative angle in degrees
    pub fn rotate(&mut self, degrees: i32) -> Result<()> {
        self.send_value(CommandCode::Rotate, degrees)
    }

    /// Independent wheel velocities in one VEL2 frame
    pub fn set_wheels(&mut self, left: i32, right: i32) -> Result<()> {
        debug!("Setting wheel velocities: left={}, right={}", left, right);
        let frame = self.codec.encode_vel2(wheel_byte(left)?, wheel_byte(right)?);
        self.transport.write(frame.as_bytes())?;
        Ok(())
    }

    pub fn enable_sonar(&mut self, enabled: bool) -> Result<()> {
        self.send_value(CommandCode::Sonar, enabled as i32)
    }

    /// Stop all motion immediately
    pub fn stop(&mut self) -> Result<()> {
        info!("Stopping base");
        self.transport.write(self.codec.stop().as_bytes())?;
        Ok(())
    }

    /// Short nudge then stop, for button-style control
    pub fn step(&mut self, mm: i32) -> Result<()> {
        self.nudge(mm)?;
        sleep(STEP_DURATION);
        self.stop()
    }

    /// Short spin then stop
    pub fn step_turn(&mut self, deg_per_sec: i32) -> Result<()> {
        self.rotate_velocity(deg_per_sec)?;
        sleep(STEP_DURATION);
        self.stop()
    }

    /// Request one SIP and decode whatever comes back
    pub fn request_telemetry(&mut self) -> Result<Decoded> {
        self.transport.write(self.codec.sip_request().as_bytes())?;
        sleep(SIP_SETTLE);
        self.read_telemetry()
    }

    /// Decode whatever SIP data is waiting, without requesting
    pub fn read_telemetry(&mut self) -> Result<Decoded> {
        let bytes = self.transport.read(SIP_READ_MAX)?;
        self.transport.flush_inbound()?;
        let decoded = self.decoder.decode(&bytes);
        if let Decoded::Truncated(_) = decoded {
            debug!("Truncated SIP ({} bytes)", bytes.len());
        }
        Ok(decoded)
    }

    /// Latest decoded state
    pub fn telemetry(&self) -> &Telemetry {
        self.decoder.latest()
    }

    /// Stop and close the client connection
    pub fn terminate(&mut self) -> Result<()> {
        info!("Closing base connection");
        self.transport.write(self.codec.stop().as_bytes())?;
        self.transport.write(self.codec.close_down().as_bytes())?;
        self.terminated = true;
        Ok(())
    }
}

/// VEL2 carries each wheel as one signed byte
fn wheel_byte(value: i32) -> Result<i8> {
    i8::try_from(value).map_err(|_| {
        BaseError::Codec(CodecError::ValueOutOfRange {
            code: CommandCode::Vel2,
            value,
            max: i8::MAX as u32,
        })
    })
}

impl<T: Transport, D: FrameDialect> Drop for BaseDriver<T, D> {
    fn drop(&mut self) {
        if self.terminated {
            return;
        }
        if let Err(e) = self.terminate() {
            warn!("Failed to close base on drop: {}", e);
        }
    }
}
