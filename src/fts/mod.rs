//! File Transfer Service client implementation.
//!
//! This module contains everything the recorder-facing protocol needs:
//! wire definitions, response decoding, fragment queues, the transport
//! capability, and the client itself.

pub mod client;
pub mod mailbox;
pub mod parser;
pub mod protocol;
pub mod transport;
