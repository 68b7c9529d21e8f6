// Lynxmotion Smart Servo (LSS) serial protocol implementation
//
// ASCII protocol, one command per line:
// Action: #<ID><CMD>[value][<MOD>value]\r
// Query:  #<ID><CMD>\r   ->   *<ID><CMD><value>\r

use std::sync::{Arc, Mutex};
use tracing::debug;

use super::actuator::{ActuatorError, JointActuator, LedColor, Result};
use crate::transport::{SerialTransport, Transport, TransportError};

/// Default serial configuration for LSS servos
pub const DEFAULT_BAUDRATE: u32 = 115_200;

/// ID that addresses every servo on the bus
pub const BROADCAST_ID: u8 = 254;

/// Reads to wait for a query reply before giving up
const REPLY_READS: usize = 5;
const READ_CHUNK: usize = 64;

/// Action commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Reset,
    Limp,
    Hold,
    Move,
    MoveRelative,
    ColorLed,
    FilterPositionCount,
    MaxSpeed,
    MotionControl,
    AngularHoldingStiffness,
}

impl Action {
    fn mnemonic(self) -> &'static str {
        match self {
            Action::Reset => "RESET",
            Action::Limp => "L",
            Action::Hold => "H",
            Action::Move => "D",
            Action::MoveRelative => "MD",
            Action::ColorLed => "LED",
            Action::FilterPositionCount => "FPC",
            Action::MaxSpeed => "SD",
            Action::MotionControl => "EM",
            Action::AngularHoldingStiffness => "AH",
        }
    }
}

/// Modifiers appended to a move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    /// Speed in degrees per second
    Speed,
    /// Halt and hold when current reaches the value (mA)
    CurrentHold,
}

impl Modifier {
    fn mnemonic(self) -> &'static str {
        match self {
            Modifier::Speed => "SD",
            Modifier::CurrentHold => "CH",
        }
    }
}

/// Query commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    Status,
    Position,
    Current,
    Speed,
}

impl Query {
    fn mnemonic(self) -> &'static str {
        match self {
            Query::Status => "Q",
            Query::Position => "QD",
            Query::Current => "QC",
            Query::Speed => "QWD",
        }
    }
}

/// Format one command line
fn build_command(id: u8, cmd: &str, value: Option<i32>, modifier: Option<(Modifier, i64)>) -> String {
    let mut line = format!("#{id}{cmd}");
    if let Some(value) = value {
        line.push_str(&value.to_string());
    }
    if let Some((modifier, value)) = modifier {
        line.push_str(modifier.mnemonic());
        line.push_str(&value.to_string());
    }
    line.push('\r');
    line
}

/// Parse `*<id><query><value>`; anything else is not our reply
fn parse_reply(line: &str, id: u8, query: Query) -> Option<i32> {
    let rest = line.trim().strip_prefix('*')?;
    let rest = rest.strip_prefix(id.to_string().as_str())?;
    let value = rest.strip_prefix(query.mnemonic())?;
    value.parse().ok()
}

/// LSS bus - handles serial communication with the servos
pub struct LssBus {
    transport: Box<dyn Transport>,
    pending: Vec<u8>,
}

impl LssBus {
    /// Open a new connection to the servo bus
    pub fn open(port_name: &str, baudrate: u32) -> std::result::Result<Self, TransportError> {
        let transport = SerialTransport::open(port_name, baudrate)?;
        Ok(Self::new(Box::new(transport)))
    }

    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            pending: Vec::new(),
        }
    }

    /// Share the bus between joint handles
    pub fn shared(self) -> Arc<Mutex<LssBus>> {
        Arc::new(Mutex::new(self))
    }

    fn send(&mut self, line: &str) -> std::result::Result<(), TransportError> {
        debug!("LSS TX {:?}", line);
        self.transport.write(line.as_bytes())
    }

    /// Send an action with an optional value
    pub fn action(
        &mut self,
        id: u8,
        action: Action,
        value: Option<i32>,
    ) -> std::result::Result<(), TransportError> {
        self.send(&build_command(id, action.mnemonic(), value, None))
    }

    /// Send a move-type action with a modifier
    pub fn action_with(
        &mut self,
        id: u8,
        action: Action,
        value: i32,
        modifier: Modifier,
        modifier_value: u32,
    ) -> std::result::Result<(), TransportError> {
        self.send(&build_command(
            id,
            action.mnemonic(),
            Some(value),
            Some((modifier, modifier_value as i64)),
        ))
    }

    /// Query a value. `Ok(None)` if the servo does not answer in time.
    pub fn query(&mut self, id: u8, query: Query) -> std::result::Result<Option<i32>, TransportError> {
        self.pending.clear();
        self.transport.flush_inbound()?;
        self.send(&build_command(id, query.mnemonic(), None, None))?;

        for _ in 0..REPLY_READS {
            let chunk = self.transport.read(READ_CHUNK)?;
            self.pending.extend_from_slice(&chunk);

            while let Some(end) = self.pending.iter().position(|&b| b == b'\r') {
                let line: Vec<u8> = self.pending.drain(..=end).collect();
                let line = String::from_utf8_lossy(&line);
                if let Some(value) = parse_reply(&line, id, query) {
                    return Ok(Some(value));
                }
                debug!("LSS ignoring reply {:?}", line);
            }
        }

        debug!("No {:?} reply from servo {}", query, id);
        Ok(None)
    }
}

/// One servo on a shared LSS bus
#[derive(Clone)]
pub struct LssServo {
    id: u8,
    bus: Arc<Mutex<LssBus>>,
}

impl LssServo {
    pub fn new(id: u8, bus: Arc<Mutex<LssBus>>) -> Self {
        Self { id, bus }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    fn with_bus<R>(
        &self,
        f: impl FnOnce(&mut LssBus) -> std::result::Result<R, TransportError>,
    ) -> Result<R> {
        let mut bus = self
            .bus
            .lock()
            .map_err(|_| ActuatorError::BusUnavailable { id: self.id })?;
        Ok(f(&mut *bus)?)
    }

    fn action(&self, action: Action, value: Option<i32>) -> Result<()> {
        self.with_bus(|bus| bus.action(self.id, action, value))
    }

    fn query(&self, query: Query) -> Result<Option<i32>> {
        self.with_bus(|bus| bus.query(self.id, query))
    }
}

impl JointActuator for LssServo {
    fn reset(&mut self) -> Result<()> {
        self.action(Action::Reset, None)
    }

    fn limp(&mut self) -> Result<()> {
        self.action(Action::Limp, None)
    }

    fn hold(&mut self) -> Result<()> {
        self.action(Action::Hold, None)
    }

    fn move_absolute(&mut self, position: i32) -> Result<()> {
        self.action(Action::Move, Some(position))
    }

    fn move_relative(&mut self, delta: i32) -> Result<()> {
        self.action(Action::MoveRelative, Some(delta))
    }

    fn move_at_speed(&mut self, position: i32, speed: u32) -> Result<()> {
        self.with_bus(|bus| bus.action_with(self.id, Action::Move, position, Modifier::Speed, speed))
    }

    fn move_relative_at_speed(&mut self, delta: i32, speed: u32) -> Result<()> {
        self.with_bus(|bus| {
            bus.action_with(self.id, Action::MoveRelative, delta, Modifier::Speed, speed)
        })
    }

    fn move_with_current_limit(&mut self, position: i32, current_ma: u32) -> Result<()> {
        self.with_bus(|bus| {
            bus.action_with(self.id, Action::Move, position, Modifier::CurrentHold, current_ma)
        })
    }

    fn position(&mut self) -> Result<Option<i32>> {
        self.query(Query::Position)
    }

    fn status(&mut self) -> Result<Option<i32>> {
        self.query(Query::Status)
    }

    fn current(&mut self) -> Result<Option<i32>> {
        self.query(Query::Current)
    }

    fn speed(&mut self) -> Result<Option<i32>> {
        self.query(Query::Speed)
    }

    fn set_color(&mut self, color: LedColor) -> Result<()> {
        self.action(Action::ColorLed, Some(color as i32))
    }

    fn set_filter_position_count(&mut self, count: u32) -> Result<()> {
        self.action(Action::FilterPositionCount, Some(count as i32))
    }

    fn set_max_speed(&mut self, speed: u32) -> Result<()> {
        self.action(Action::MaxSpeed, Some(speed as i32))
    }

    fn set_motion_control(&mut self, enabled: bool) -> Result<()> {
        self.action(Action::MotionControl, Some(enabled as i32))
    }

    fn set_holding_stiffness(&mut self, stiffness: i32) -> Result<()> {
        self.action(Action::AngularHoldingStiffness, Some(stiffness))
    }
}
