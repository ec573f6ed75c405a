//! Per-channel fragment queues.
//!
//! Notification fragments arrive on the transport's delivery tasks and are
//! consumed by whichever operation is in flight. Each notification channel
//! gets a bounded FIFO queue paired with an async wakeup, so no fragment is
//! lost to a slow consumer short of outright overflow, and the consumer
//! sleeps instead of polling.

use std::collections::HashMap;

use crossbeam::queue::ArrayQueue;
use log::{debug, warn};
use smallvec::SmallVec;
use strum::IntoEnumIterator;
use tokio::{
   sync::Notify,
   time::{self, Instant},
};

use crate::fts::protocol::ChannelId;

/// One notification fragment as delivered by the transport.
pub type Fragment = SmallVec<[u8; 32]>;

/// Fragments a channel may hold before the producer starts dropping.
const FRAGMENT_QUEUE_DEPTH: usize = 64;

struct Slot {
   queue: ArrayQueue<Fragment>,
   bell: Notify,
}

impl Slot {
   fn new() -> Self {
      Self {
         queue: ArrayQueue::new(FRAGMENT_QUEUE_DEPTH),
         bell: Notify::new(),
      }
   }
}

/// Fragment queues for every notification-capable channel.
///
/// Shared between the transport's delivery tasks (producers) and the client
/// (consumer); the client's in-flight guard keeps the consumer side single.
pub struct Mailboxes {
   slots: HashMap<ChannelId, Slot>,
}

impl Mailboxes {
   pub fn new() -> Self {
      let slots = ChannelId::iter()
         .filter(|ch| ch.accepts_notifications())
         .map(|ch| (ch, Slot::new()))
         .collect();
      Self { slots }
   }

   /// Enqueues a fragment for `channel`. Never blocks; on overflow the
   /// fragment is dropped with a warning.
   pub fn deliver(&self, channel: ChannelId, bytes: &[u8]) {
      let Some(slot) = self.slots.get(&channel) else {
         debug!("{channel}: dropping fragment for non-notifying channel");
         return;
      };
      if slot.queue.push(Fragment::from_slice(bytes)).is_err() {
         warn!(
            "{channel}: fragment queue full, dropping {} bytes",
            bytes.len()
         );
         return;
      }
      slot.bell.notify_one();
   }

   /// Discards everything queued for `channel`.
   pub fn drain(&self, channel: ChannelId) {
      let Some(slot) = self.slots.get(&channel) else {
         return;
      };
      let mut stale = 0usize;
      while slot.queue.pop().is_some() {
         stale += 1;
      }
      if stale > 0 {
         debug!("{channel}: discarded {stale} stale fragments");
      }
   }

   /// Takes the next queued fragment, if any, without waiting.
   pub fn try_recv(&self, channel: ChannelId) -> Option<Fragment> {
      self.slots.get(&channel)?.queue.pop()
   }

   /// Waits for the next fragment on `channel`, up to `deadline`.
   ///
   /// Returns `None` once the deadline has passed and the queue is empty.
   pub async fn recv_until(&self, channel: ChannelId, deadline: Instant) -> Option<Fragment> {
      let slot = self.slots.get(&channel)?;
      loop {
         if let Some(fragment) = slot.queue.pop() {
            return Some(fragment);
         }
         let notified = slot.bell.notified();
         // A fragment may have slipped in between the pop and the listener
         // registration.
         if let Some(fragment) = slot.queue.pop() {
            return Some(fragment);
         }
         if time::timeout_at(deadline, notified).await.is_err() {
            return slot.queue.pop();
         }
      }
   }
}

impl Default for Mailboxes {
   fn default() -> Self {
      Self::new()
   }
}
