//! Workload console capture and the duplex console protocol.

pub mod buffer;
pub mod protocol;

pub use buffer::{ConsoleBuffer, ConsoleConfig, ConsoleEntry, ConsoleReplay, ConsoleSubscription};
pub use protocol::{dispatch, parse_frame, stat_frame, InboundFrame, OutboundFrame};
