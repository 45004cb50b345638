//! Client end of the mTLS tunnel
//!
//! Accepts plaintext connections on a local address and relays each one over
//! a freshly dialed, mutually authenticated TLS connection to the tunnel
//! server.

mod forwarder;

pub use forwarder::{ClientForwarder, ClientForwarderConfig, ClientForwarderError, DialError};
