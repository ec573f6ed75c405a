//! Bluetooth communication layer.
//!
//! This module provides adapter setup, recorder discovery, and the GATT
//! transport backing the transfer client.

pub mod discovery;
pub mod gatt;
