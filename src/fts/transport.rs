//! Transport capability consumed by the FTS client.
//!
//! The client never owns the radio; it composes over a small write/subscribe
//! surface. The production implementation lives in [`crate::bluetooth::gatt`];
//! tests substitute a scripted transport.

use crate::{error::Result, fts::protocol::ChannelId};

/// Write and notification primitives of one connected recorder.
///
/// Inbound fragments are not part of this trait: implementations push them
/// straight into the shared [`crate::fts::mailbox::Mailboxes`].
#[allow(async_fn_in_trait)]
pub trait FtsTransport {
   /// Writes `bytes` to the characteristic backing `channel`.
   async fn write(&self, channel: ChannelId, bytes: &[u8]) -> Result<()>;

   /// Enables or disables notification delivery for `channel`.
   async fn set_notify(&self, channel: ChannelId, enabled: bool) -> Result<()>;

   /// Whether `channel` was resolved on the connected device.
   fn channel_present(&self, channel: ChannelId) -> bool;
}
