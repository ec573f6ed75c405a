//! Error types for the file transfer client.
//!
//! This module defines all error types that can occur while talking to a
//! recorder, including Bluetooth, I/O, configuration, and protocol errors.

use thiserror::Error;

use crate::fts::{parser::ProtoError, protocol::ChannelId};

/// Main error type for the file transfer client.
#[derive(Error, Debug)]
pub enum FtsError {
   #[error("Bluetooth error: {0}")]
   Bluetooth(#[from] bluer::Error),

   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error("Protocol error: {0}")]
   Proto(#[from] ProtoError),

   #[error("Required channel missing on device: {0}")]
   ChannelMissing(ChannelId),

   #[error("File transfer service not present on device")]
   ServiceNotFound,

   #[error("No recorder found")]
   DeviceNotFound,

   #[error("Invalid device address: {0}")]
   InvalidAddress(String),

   #[error("Services were not resolved in time")]
   ServicesNotResolved,

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),
}

/// Convenience type alias for Results with `FtsError`.
pub type Result<T> = std::result::Result<T, FtsError>;
