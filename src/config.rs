// Timeouts, topics, serial ports and motion limits
use std::time::Duration;

// Runtime loop frequency, also the base heartbeat cadence
pub const LOOP_HZ: u64 = 10;

// Base command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(500);

// Zenoh topics
pub const TOPIC_CMD_BASE: &str = "rerobot/cmd/base"; // base commands
pub const TOPIC_CMD_ARM: &str = "rerobot/cmd/arm"; // arm commands
pub const TOPIC_STATE_BASE: &str = "rerobot/state/base"; // decoded SIPs
pub const TOPIC_STATE_ARM: &str = "rerobot/state/arm"; // arm move reports
pub const TOPIC_HEALTH: &str = "rerobot/state/health"; // health status

// Serial ports (selected by the launcher, these are only defaults)
pub const BASE_PORT: &str = "/dev/ttyUSB0";
pub const BASE_BAUD: u32 = 9600;
pub const ARM_PORT: &str = "/dev/ttyUSB1";
pub const ARM_BAUD: u32 = 115_200;

// Handshake echo confirmation
pub const HANDSHAKE_MAX_ATTEMPTS: u32 = 50;
pub const HANDSHAKE_RETRY_DELAY: Duration = Duration::from_millis(100);

// Arrival confirmation (checking mode)
pub const ARRIVAL_MAX_POLLS: u32 = 400;
pub const ARRIVAL_POLL_INTERVAL: Duration = Duration::from_millis(25);
pub const ARRIVAL_TIMEOUT: Duration = Duration::from_secs(15);

// Consecutive unreadable status polls before the move is abandoned
pub const UNKNOWN_STATUS_LIMIT: u32 = 5;
