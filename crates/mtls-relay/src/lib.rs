//! Connection relay shared by both ends of the mTLS tunnel
//!
//! A session pairs a "front" connection (the one that was accepted) with a
//! "back" connection (the one dialed outward) and copies bytes in both
//! directions until each side has reached end-of-stream or failed.

mod format;
mod listener;
mod relay;
mod session;

pub use format::format_bytes;
pub use listener::{accept_loop, port_of};
pub use relay::{relay, run_session, Direction, DirectionOutcome, SessionReport};
pub use session::{DirectionLabels, PeerIdentity, SessionContext, SessionIdGenerator};
