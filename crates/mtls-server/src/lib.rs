//! Server end of the mTLS tunnel
//!
//! Terminates TLS from tunnel clients, requiring a certificate signed by the
//! configured CA, and forwards each authenticated session to a plaintext
//! backend.

mod forwarder;

pub use forwarder::{BackendError, ServerForwarder, ServerForwarderConfig, ServerForwarderError};
