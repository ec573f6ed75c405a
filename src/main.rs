//! BLE File Transfer Service fetch tool.
//!
//! Connects to a recorder device, queries its filesystem, and downloads
//! every stored file into the output directory as raw codec payloads.

use std::sync::Arc;

use log::{debug, info, warn};

use bluetooth::{discovery, gatt::GattTransport};
use config::Config;
use error::Result;
use fts::{client::FtsClient, mailbox::Mailboxes, transport::FtsTransport};

mod bluetooth;
mod config;
mod error;
mod fts;

#[tokio::main]
async fn main() -> Result<()> {
   env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

   let mut config = Config::load()?;
   if let Some(address) = std::env::args().nth(1) {
      config.device_address = Some(address.into());
   }

   let session = bluer::Session::new().await?;
   let adapter = discovery::adapter(&session, &config).await?;
   let device = discovery::find_recorder(&adapter, &config).await?;
   discovery::connect(&device, config.connect_attempts).await?;

   let mailboxes = Arc::new(Mailboxes::new());
   let transport = GattTransport::resolve(&device, mailboxes.clone()).await?;
   let client = FtsClient::new(transport, mailboxes, config.timing).await?;

   let fetched = fetch_all(&client, &config).await?;
   info!(
      "Fetched {fetched} recordings into {}",
      config.output_dir.display()
   );

   if let Err(e) = client.finish_transfer().await {
      warn!("Failed to signal transfer completion: {e}");
   }
   if let Err(e) = device.disconnect().await {
      warn!("Disconnect failed: {e}");
   }
   Ok(())
}

async fn fetch_all<T: FtsTransport>(client: &FtsClient<T>, config: &Config) -> Result<usize> {
   let status = client.fs_status().await;
   info!(
      "Filesystem: {} files, {} blocks free, {} occupied",
      status.file_count, status.free_space, status.occupied_space
   );

   let files = client.list_files().await;
   if files.is_empty() {
      info!("Nothing to fetch");
      return Ok(0);
   }
   info!("Recorder lists {} files", files.len());

   tokio::fs::create_dir_all(&config.output_dir).await?;

   let mut fetched = 0usize;
   for id in files {
      let file_info = client.file_info(id).await;
      if file_info.is_empty() {
         warn!("{id}: no file info, skipping");
         continue;
      }
      debug!(
         "{id}: {} bytes, {} Hz, codec {}",
         file_info.size, file_info.frequency, file_info.codec
      );

      let data = client.file_data(id, file_info.size as usize).await;
      if data.len() < file_info.size as usize {
         warn!(
            "{id}: short read ({} of {} bytes), keeping partial file",
            data.len(),
            file_info.size
         );
      }
      if data.is_empty() {
         continue;
      }

      let path = config.output_dir.join(format!("{id}.raw"));
      tokio::fs::write(&path, &data).await?;
      info!("{id}: stored {} bytes at {}", data.len(), path.display());
      fetched += 1;

      if let Some(push) = client.take_device_status().await {
         debug!(
            "Device status: code {:#04x}, file {:?}, param {:?}",
            push.code, push.file_id, push.param
         );
      }
   }
   Ok(fetched)
}
