// Mobile base module (Pioneer-style controller)
//
// Provides:
// - Command frame codec with pluggable dialect
// - Connection handshake with bounded echo confirmation
// - Server Information Packet (SIP) decoding
// - High-level base driver API

pub mod codec;
mod driver;
pub mod handshake;
pub mod telemetry;

pub use codec::{CodecError, CommandCode, CommandFrame, FrameCodec, FrameDialect, P2osDialect, Wheel};
pub use driver::{BaseDriver, BaseError, STEP_DURATION};
pub use handshake::{Handshake, HandshakeError, Ready, RetryPolicy};
pub use telemetry::{Decoded, SipDecoder, Telemetry};
