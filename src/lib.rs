pub mod arm;
pub mod base;
pub mod config;
pub mod messages;
pub mod runtime;
pub mod transport;
