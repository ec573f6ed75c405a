//! Configuration management for the file transfer client.
//!
//! This module handles loading and saving configuration from disk, including
//! the target recorder, output location, and transfer timing constants.

use std::{
   env, fs,
   path::{Path, PathBuf},
   time::Duration,
};

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::error::{FtsError, Result};

/// Main configuration structure for the client.
#[derive(Serialize, Deserialize, Clone)]
pub struct Config {
   /// Bluetooth adapter to use; the default adapter when unset.
   #[serde(default)]
   pub adapter: Option<SmolStr>,

   /// Address of the recorder; discovery runs when unset.
   #[serde(default)]
   pub device_address: Option<SmolStr>,

   /// Device name prefix accepted during discovery, in addition to devices
   /// advertising the transfer service.
   #[serde(default)]
   pub device_prefix: Option<SmolStr>,

   /// Directory fetched recordings are written to.
   #[serde(default = "default_output_dir")]
   pub output_dir: PathBuf,

   #[serde(default = "default_discovery_timeout")]
   pub discovery_timeout_sec: u64,

   #[serde(default = "default_connect_attempts")]
   pub connect_attempts: u32,

   #[serde(default)]
   pub timing: TransferTimings,
}

/// Per-operation timeout constants.
///
/// These mirror the response times observed on real recorders rather than
/// anything the protocol guarantees, hence they are configuration and not
/// code constants.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct TransferTimings {
   #[serde(default = "default_list_timeout_ms")]
   pub list_timeout_ms: u64,

   #[serde(default = "default_info_timeout_ms")]
   pub info_timeout_ms: u64,

   #[serde(default = "default_status_timeout_ms")]
   pub status_timeout_ms: u64,

   /// Data transfers get this much time per requested byte...
   #[serde(default = "default_data_ms_per_byte")]
   pub data_ms_per_byte: u64,

   /// ...but never less than this in total.
   #[serde(default = "default_data_floor_ms")]
   pub data_floor_ms: u64,
}

fn default_output_dir() -> PathBuf {
   PathBuf::from("recordings")
}

const fn default_discovery_timeout() -> u64 {
   30
}

const fn default_connect_attempts() -> u32 {
   3
}

const fn default_list_timeout_ms() -> u64 {
   10_000
}

const fn default_info_timeout_ms() -> u64 {
   10_000
}

const fn default_status_timeout_ms() -> u64 {
   2_000
}

const fn default_data_ms_per_byte() -> u64 {
   100
}

const fn default_data_floor_ms() -> u64 {
   2_000
}

impl Default for Config {
   fn default() -> Self {
      Self {
         adapter: None,
         device_address: None,
         device_prefix: None,
         output_dir: default_output_dir(),
         discovery_timeout_sec: default_discovery_timeout(),
         connect_attempts: default_connect_attempts(),
         timing: TransferTimings::default(),
      }
   }
}

impl Default for TransferTimings {
   fn default() -> Self {
      Self {
         list_timeout_ms: default_list_timeout_ms(),
         info_timeout_ms: default_info_timeout_ms(),
         status_timeout_ms: default_status_timeout_ms(),
         data_ms_per_byte: default_data_ms_per_byte(),
         data_floor_ms: default_data_floor_ms(),
      }
   }
}

impl TransferTimings {
   pub fn list_timeout(&self) -> Duration {
      Duration::from_millis(self.list_timeout_ms)
   }

   pub fn info_timeout(&self) -> Duration {
      Duration::from_millis(self.info_timeout_ms)
   }

   pub fn status_timeout(&self) -> Duration {
      Duration::from_millis(self.status_timeout_ms)
   }

   /// Timeout for a data transfer of `size` bytes, proportional to the
   /// payload with a lower bound for tiny files.
   pub fn data_timeout(&self, size: usize) -> Duration {
      let proportional = Duration::from_millis(self.data_ms_per_byte.saturating_mul(size as u64));
      proportional.max(Duration::from_millis(self.data_floor_ms))
   }
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load() -> Result<Self> {
      let config_path = Self::config_path()?;

      if config_path.exists() {
         Self::load_path(&config_path)
      } else {
         // Create default config
         let config = Self::default();
         config.save()?;
         Ok(config)
      }
   }

   /// Saves the current configuration to disk.
   pub fn save(&self) -> Result<()> {
      self.save_path(&Self::config_path()?)
   }

   fn load_path(path: &Path) -> Result<Self> {
      let contents = fs::read_to_string(path)?;
      Ok(toml::from_str(&contents)?)
   }

   fn save_path(&self, path: &Path) -> Result<()> {
      // Ensure directory exists
      if let Some(parent) = path.parent() {
         fs::create_dir_all(parent)?;
      }

      let contents = toml::to_string_pretty(self)?;
      fs::write(path, contents)?;

      Ok(())
   }

   fn config_path() -> Result<PathBuf> {
      let config_dir = if let Ok(fts_home) = env::var("BLEFTS_HOME") {
         PathBuf::from(fts_home)
      } else if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
         PathBuf::from(config_home)
      } else if let Ok(home) = env::var("HOME") {
         PathBuf::from(home).join(".config")
      } else {
         return Err(FtsError::ConfigDirNotFound);
      };

      Ok(config_dir.join("blefts").join("config.toml"))
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_defaults() {
      let config = Config::default();
      assert!(config.device_address.is_none());
      assert_eq!(config.timing.list_timeout(), Duration::from_secs(10));
      assert_eq!(config.timing.info_timeout(), Duration::from_secs(10));
      assert_eq!(config.timing.status_timeout(), Duration::from_secs(2));
   }

   #[test]
   fn test_data_timeout_scales_with_size() {
      let timing = TransferTimings::default();
      assert_eq!(timing.data_timeout(0), Duration::from_millis(2_000));
      assert_eq!(timing.data_timeout(10), Duration::from_millis(2_000));
      assert_eq!(timing.data_timeout(1_000), Duration::from_millis(100_000));
   }

   #[test]
   fn test_partial_toml_fills_defaults() {
      let config: Config = toml::from_str(
         r#"
            device_address = "E3:50:C2:D4:E1:B9"

            [timing]
            status_timeout_ms = 500
         "#,
      )
      .unwrap();
      assert_eq!(config.device_address.as_deref(), Some("E3:50:C2:D4:E1:B9"));
      assert_eq!(config.timing.status_timeout_ms, 500);
      assert_eq!(config.timing.list_timeout_ms, default_list_timeout_ms());
      assert_eq!(config.output_dir, default_output_dir());
   }

   #[test]
   fn test_save_load_roundtrip() {
      let dir = tempfile::tempdir().unwrap();
      let path = dir.path().join("blefts").join("config.toml");

      let mut config = Config::default();
      config.device_prefix = Some("memo".into());
      config.timing.data_ms_per_byte = 50;
      config.save_path(&path).unwrap();

      let loaded = Config::load_path(&path).unwrap();
      assert_eq!(loaded.device_prefix.as_deref(), Some("memo"));
      assert_eq!(loaded.timing.data_ms_per_byte, 50);
   }
}
