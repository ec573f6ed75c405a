//! GATT transport for the File Transfer Service.
//!
//! This module maps the client's channel operations onto BlueZ GATT
//! characteristic writes and notification streams. Characteristics are
//! resolved once, when the transport is built for a connected device.

use std::{collections::HashMap, sync::Arc};

use bluer::{Address, Device, gatt::remote::Characteristic};
use futures::{StreamExt, pin_mut};
use log::{debug, warn};
use parking_lot::Mutex;
use strum::IntoEnumIterator;
use tokio::task::JoinHandle;

use crate::{
   error::{FtsError, Result},
   fts::{
      mailbox::Mailboxes,
      protocol::{ChannelId, FTS_SERVICE_UUID},
      transport::FtsTransport,
   },
};

/// [`FtsTransport`] implementation over a connected BlueZ GATT device.
pub struct GattTransport {
   address: Address,
   chars: HashMap<ChannelId, Characteristic>,
   mailboxes: Arc<Mailboxes>,
   watchers: Mutex<HashMap<ChannelId, JoinHandle<()>>>,
}

impl GattTransport {
   /// Resolves the transfer service on `device`.
   ///
   /// Fails if the service is absent or a required characteristic is
   /// missing; the optional file-info characteristic may be absent.
   pub async fn resolve(device: &Device, mailboxes: Arc<Mailboxes>) -> Result<Self> {
      let address = device.address();
      let mut chars = HashMap::new();

      for service in device.services().await? {
         if service.uuid().await? != FTS_SERVICE_UUID {
            continue;
         }
         for characteristic in service.characteristics().await? {
            let uuid = characteristic.uuid().await?;
            if let Some(channel) = ChannelId::iter().find(|ch| ch.uuid() == uuid) {
               debug!("{address}: resolved {channel} ({uuid})");
               chars.insert(channel, characteristic);
            } else {
               debug!("{address}: ignoring unknown characteristic {uuid}");
            }
         }
      }

      if chars.is_empty() {
         return Err(FtsError::ServiceNotFound);
      }
      for channel in ChannelId::iter() {
         if channel.is_required() && !chars.contains_key(&channel) {
            return Err(FtsError::ChannelMissing(channel));
         }
      }

      Ok(Self {
         address,
         chars,
         mailboxes,
         watchers: Mutex::new(HashMap::new()),
      })
   }

   fn characteristic(&self, channel: ChannelId) -> Result<&Characteristic> {
      self
         .chars
         .get(&channel)
         .ok_or(FtsError::ChannelMissing(channel))
   }
}

impl FtsTransport for GattTransport {
   async fn write(&self, channel: ChannelId, bytes: &[u8]) -> Result<()> {
      let characteristic = self.characteristic(channel)?;
      debug!("→ {} {channel}: {}", self.address, hex::encode(bytes));
      characteristic.write(bytes).await?;
      Ok(())
   }

   async fn set_notify(&self, channel: ChannelId, enabled: bool) -> Result<()> {
      if !enabled {
         if let Some(handle) = self.watchers.lock().remove(&channel) {
            handle.abort();
            debug!("{}: {channel} notifications disabled", self.address);
         }
         return Ok(());
      }

      if self.watchers.lock().contains_key(&channel) {
         return Ok(());
      }
      // The forwarder task owns the subscription; the notify session ends
      // when the task is aborted.
      let characteristic = self.characteristic(channel)?.clone();
      let handle = tokio::spawn(forward_notifications(
         self.address,
         channel,
         characteristic,
         self.mailboxes.clone(),
      ));
      if let Some(previous) = self.watchers.lock().insert(channel, handle) {
         previous.abort();
      }
      debug!("{}: {channel} notifications enabled", self.address);
      Ok(())
   }

   fn channel_present(&self, channel: ChannelId) -> bool {
      self.chars.contains_key(&channel)
   }
}

impl Drop for GattTransport {
   fn drop(&mut self) {
      for (_, handle) in self.watchers.lock().drain() {
         handle.abort();
      }
   }
}

async fn forward_notifications(
   address: Address,
   channel: ChannelId,
   characteristic: Characteristic,
   mailboxes: Arc<Mailboxes>,
) {
   let stream = match characteristic.notify().await {
      Ok(stream) => stream,
      Err(e) => {
         warn!("{address}: {channel}: failed to subscribe: {e}");
         return;
      },
   };
   pin_mut!(stream);
   while let Some(value) = stream.next().await {
      debug!("← {address} {channel}: {}", hex::encode(&value));
      mailboxes.deliver(channel, &value);
   }
   debug!("{address}: {channel} notification stream ended");
}
