// Client connection handshake for the mobile-base controller
//
// 1. SYNC0, SYNC1, SYNC2 (the controller echoes the first two and answers
//    SYNC2 with its identification packet)
// 2. Open the connection and request config/IO packets
// 3. Configure motor parameters and enable the motors
//
// Every batch is written once and then read back until the controller echoes it.

use std::thread::sleep;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::codec::{CodecError, CommandCode, FrameCodec, FrameDialect};
use crate::config::{HANDSHAKE_MAX_ATTEMPTS, HANDSHAKE_RETRY_DELAY};
use crate::transport::{CancelToken, Transport, TransportError};

/// Maximum bytes read per attempt
const READ_MAX: usize = 255;

/// Bounded retry for echo confirmation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: HANDSHAKE_MAX_ATTEMPTS,
            delay: HANDSHAKE_RETRY_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Sync,
    Open,
    Configure,
}

/// What counts as confirmation of a written batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// The read must equal the written bytes exactly
    Echo,
    /// Any packet carrying this command code
    Reply(u8),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeStep {
    pub stage: Stage,
    pub bytes: Vec<u8>,
    pub expect: Expect,
}

/// Connection is open and the motors are configured
#[derive(Debug, Clone, PartialEq)]
pub struct Ready {
    /// Identification packet returned for SYNC2
    pub identification: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("No confirmation for {stage:?} batch {batch} after {attempts} attempts")]
    ProtocolMismatch {
        stage: Stage,
        batch: usize,
        attempts: u32,
    },

    #[error("Handshake cancelled")]
    Cancelled,

    #[error("Frame encoding failed: {0}")]
    Codec(#[from] CodecError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, HandshakeError>;

fn batch<D: FrameDialect>(
    codec: &FrameCodec<D>,
    commands: &[(CommandCode, i32)],
) -> std::result::Result<Vec<u8>, CodecError> {
    let mut bytes = Vec::new();
    for &(code, value) in commands {
        bytes.extend_from_slice(codec.encode(code, value, None)?.as_bytes());
    }
    Ok(bytes)
}

/// The full startup sequence, in send order
pub fn startup_sequence<D: FrameDialect>(
    codec: &FrameCodec<D>,
) -> std::result::Result<Vec<HandshakeStep>, CodecError> {
    use CommandCode::*;

    let mut steps = vec![
        HandshakeStep {
            stage: Stage::Sync,
            bytes: codec.encode_short(CommandCode::SYNC0).into_bytes(),
            expect: Expect::Echo,
        },
        HandshakeStep {
            stage: Stage::Sync,
            bytes: codec.encode_short(CommandCode::SYNC1).into_bytes(),
            expect: Expect::Echo,
        },
        HandshakeStep {
            stage: Stage::Sync,
            bytes: codec.encode_short(CommandCode::SYNC2).into_bytes(),
            expect: Expect::Reply(CommandCode::SYNC2.code()),
        },
    ];

    let mut host_baud = batch(codec, &[(HostBaud, 2)])?;
    host_baud.extend_from_slice(codec.heartbeat().as_bytes());

    let open = [
        batch(codec, &[(Open, 1), (IoRequest, 1), (Encoder, 0)])?,
        batch(codec, &[(Config, 1)])?,
        host_baud,
    ];

    let mut enable = codec.gripper_io_request(0).into_bytes();
    enable.extend(batch(codec, &[(Raw(62), 1), (Enable, 1)])?);

    let configure = [
        enable,
        batch(
            codec,
            &[
                (SetV, 500),
                (SetA, 300),
                (SetA, -300),
                (Vel, 0),
                (SetRv, 100),
                (SetRa, 100),
                (SetRa, -100),
            ],
        )?,
    ];

    steps.extend(open.into_iter().map(|bytes| HandshakeStep {
        stage: Stage::Open,
        bytes,
        expect: Expect::Echo,
    }));
    steps.extend(configure.into_iter().map(|bytes| HandshakeStep {
        stage: Stage::Configure,
        bytes,
        expect: Expect::Echo,
    }));

    Ok(steps)
}

/// Drives the startup sequence over a transport
pub struct Handshake<'a, D: FrameDialect> {
    codec: &'a FrameCodec<D>,
    retry: RetryPolicy,
    cancel: CancelToken,
}

impl<'a, D: FrameDialect> Handshake<'a, D> {
    pub fn new(codec: &'a FrameCodec<D>) -> Self {
        Self {
            codec,
            retry: RetryPolicy::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run<T: Transport + ?Sized>(&self, transport: &mut T) -> Result<Ready> {
        let steps = startup_sequence(self.codec)?;
        let header = self.codec.dialect().header();
        let mut identification = Vec::new();
        let mut last_stage = None;
        let mut batch_idx = 0;

        for step in &steps {
            if last_stage != Some(step.stage) {
                info!("Handshake stage {:?}", step.stage);
                last_stage = Some(step.stage);
                batch_idx = 0;
            }

            debug!("Sending {:?} batch {}: {:02X?}", step.stage, batch_idx, step.bytes);
            transport.write(&step.bytes)?;

            let reply = self.await_confirmation(transport, step, &header, batch_idx)?;
            if step.expect != Expect::Echo {
                identification = reply;
            }
            batch_idx += 1;
        }

        // Keep the link alive until the caller's own heartbeat takes over
        transport.write(self.codec.heartbeat().as_bytes())?;
        info!("Handshake complete, base ready");

        Ok(Ready { identification })
    }

    fn await_confirmation<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        step: &HandshakeStep,
        header: &[u8; 2],
        batch: usize,
    ) -> Result<Vec<u8>> {
        let mut attempts = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(HandshakeError::Cancelled);
            }

            attempts += 1;
            let reply = transport.read(READ_MAX)?;
            transport.flush_inbound()?;

            let confirmed = match step.expect {
                Expect::Echo => reply == step.bytes,
                Expect::Reply(code) => {
                    reply.len() >= 4 && reply[..2] == header[..] && reply[3] == code
                }
            };
            if confirmed {
                debug!("{:?} batch {} confirmed after {} attempts", step.stage, batch, attempts);
                return Ok(reply);
            }

            if attempts >= self.retry.max_attempts {
                warn!(
                    "{:?} batch {} unconfirmed after {} attempts",
                    step.stage, batch, attempts
                );
                return Err(HandshakeError::ProtocolMismatch {
                    stage: step.stage,
                    batch,
                    attempts,
                });
            }
            sleep(self.retry.delay);
        }
    }
}
