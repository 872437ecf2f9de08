//! Utilities for testing code on top of the transport: message types with decoders, and accept
//!  handlers that hand accepted connections over to the test code.
//!
//! They are used for testing the transport itself, but they are also exported for application
//!  testing, which is why they are part of the crate's regular (non-#[cfg(test)]) code.

pub mod handler;
pub mod message;
