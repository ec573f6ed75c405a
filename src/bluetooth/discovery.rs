//! Recorder discovery and connection setup.
//!
//! This module handles Bluetooth adapter selection, recognizing recorder
//! devices during discovery, and bringing a device to the point where its
//! GATT services are usable.

use std::time::Duration;

use bluer::{Adapter, AdapterEvent, Device, Session};
use futures::{StreamExt, pin_mut};
use log::{debug, info, warn};
use tokio::time::{self, Instant};

use crate::{
   config::Config,
   error::{FtsError, Result},
   fts::protocol::FTS_SERVICE_UUID,
};

/// Time to wait for GATT service resolution after connecting
const SERVICE_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);
/// Poll interval while waiting for service resolution
const SERVICE_RESOLVE_POLL: Duration = Duration::from_millis(250);
/// Delay between connect attempts
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Opens the configured adapter, powering it on if needed.
pub async fn adapter(session: &Session, config: &Config) -> Result<Adapter> {
   let adapter = match &config.adapter {
      Some(name) => session.adapter(name)?,
      None => session.default_adapter().await?,
   };
   if !adapter.is_powered().await? {
      adapter.set_powered(true).await?;
      info!("Powered on adapter {}", adapter.name());
   }
   Ok(adapter)
}

/// Checks whether `device` looks like a recorder we can talk to.
async fn is_recorder(device: &Device, name_prefix: Option<&str>) -> bool {
   // 1. The advertised transfer service is definitive
   if let Ok(Some(uuids)) = device.uuids().await
      && uuids.contains(&FTS_SERVICE_UUID)
   {
      debug!("Recorder detected via service UUID");
      return true;
   }

   // 2. Name/alias prefix fallback for firmware that does not put the
   //    service into its advertisement
   let Some(prefix) = name_prefix else {
      return false;
   };
   if let Ok(Some(mut name)) = device.name().await {
      name.make_ascii_lowercase();
      if name.starts_with(prefix) {
         debug!("Recorder detected via name prefix: {name}");
         return true;
      }
   }
   if let Ok(mut alias) = device.alias().await {
      alias.make_ascii_lowercase();
      if alias.starts_with(prefix) {
         debug!("Recorder detected via alias prefix: {alias}");
         return true;
      }
   }
   false
}

/// Returns the recorder to talk to: the configured address when set,
/// otherwise the first discovered device that passes recognition.
pub async fn find_recorder(adapter: &Adapter, config: &Config) -> Result<Device> {
   if let Some(address) = &config.device_address {
      let address = address
         .parse()
         .map_err(|e| FtsError::InvalidAddress(format!("{address}: {e}")))?;
      return Ok(adapter.device(address)?);
   }

   info!("Scanning for recorders...");
   let deadline = Instant::now() + Duration::from_secs(config.discovery_timeout_sec);
   let prefix = config
      .device_prefix
      .as_deref()
      .map(str::to_ascii_lowercase);

   let events = adapter.discover_devices().await?;
   pin_mut!(events);

   loop {
      let Ok(Some(event)) = time::timeout_at(deadline, events.next()).await else {
         return Err(FtsError::DeviceNotFound);
      };
      if let AdapterEvent::DeviceAdded(address) = event {
         let device = adapter.device(address)?;
         if is_recorder(&device, prefix.as_deref()).await {
            let name = device
               .name()
               .await
               .ok()
               .flatten()
               .unwrap_or_else(|| address.to_string());
            info!("Found recorder: {name} ({address})");
            return Ok(device);
         }
         debug!("Ignoring {address}");
      }
   }
}

/// Connects to `device` and waits until its GATT services are resolved.
pub async fn connect(device: &Device, attempts: u32) -> Result<()> {
   let attempts = attempts.max(1);
   for attempt in 1..=attempts {
      if device.is_connected().await? {
         break;
      }
      match device.connect().await {
         Ok(()) => {
            info!("Connected to {}", device.address());
            break;
         },
         Err(e) if attempt < attempts => {
            warn!("Connect attempt {attempt} failed: {e}");
            time::sleep(CONNECT_RETRY_DELAY).await;
         },
         Err(e) => return Err(e.into()),
      }
   }

   let deadline = Instant::now() + SERVICE_RESOLVE_TIMEOUT;
   while !device.is_services_resolved().await? {
      if Instant::now() >= deadline {
         return Err(FtsError::ServicesNotResolved);
      }
      time::sleep(SERVICE_RESOLVE_POLL).await;
   }
   Ok(())
}
