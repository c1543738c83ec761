//! Process-wide UDP services backing every active session.
//!
//! Both services live from engine init to engine shutdown. The timing
//! service answers NTP-style queries on its own; the control service only
//! parses retransmit requests and forwards them to the engine, which is
//! the sole owner of the session list.

mod control;
mod timing;

#[cfg(test)]
mod tests;

pub use control::{ControlService, RetransmitRequest};
pub use timing::{NtpTime, TimingService, timing_reply};
