//! File Transfer Service client.
//!
//! This module implements the request/response engine: opcode requests go
//! out on the control channel, and the fragmented notification responses are
//! reassembled into typed results under per-operation deadlines. Transfer
//! failures degrade to empty or partial results; only construction against a
//! device missing required channels is a hard error.

use std::{sync::Arc, time::Duration};

use log::{debug, warn};
use strum::IntoEnumIterator;
use tokio::{sync::Mutex, time::Instant};

use crate::{
   config::TransferTimings,
   error::{FtsError, Result},
   fts::{
      mailbox::Mailboxes,
      parser,
      protocol::{
         self, ChannelId, DeviceStatusRecord, FileId, FileInfoRecord, FsStatusRecord,
         INFO_HEADER_LEN, LIST_HEADER_LEN, Opcode, RequestFrame,
      },
      transport::FtsTransport,
   },
};

/// How a response's total length is determined.
#[derive(Debug, Clone, Copy)]
enum SizeRule {
   /// Leading u32 file count; total is `(count + 1) * 8`.
   ListHeader,
   /// Leading u16 JSON length; total is `length + 2`.
   JsonHeader,
   /// Caller already knows the total.
   Exact(usize),
   /// The response is a single notification.
   SingleFragment,
}

/// Client for the File Transfer Service of one connected recorder.
///
/// Operations are serialized: the in-flight guard admits one request at a
/// time, since responses share the control channel and the per-channel
/// fragment queues assume a single consumer.
pub struct FtsClient<T> {
   transport: T,
   mailboxes: Arc<Mailboxes>,
   timings: TransferTimings,
   op_guard: Mutex<()>,
}

impl<T: FtsTransport> FtsClient<T> {
   /// Creates a client over a resolved transport.
   ///
   /// Fails if the device lacks any required channel. General-status
   /// notifications are armed here and stay on for the client's lifetime.
   pub async fn new(
      transport: T,
      mailboxes: Arc<Mailboxes>,
      timings: TransferTimings,
   ) -> Result<Self> {
      for channel in ChannelId::iter() {
         if channel.is_required() && !transport.channel_present(channel) {
            return Err(FtsError::ChannelMissing(channel));
         }
      }

      if let Err(e) = transport.set_notify(ChannelId::Status, true).await {
         warn!("status: could not arm notifications: {e}");
      }

      Ok(Self {
         transport,
         mailboxes,
         timings,
         op_guard: Mutex::new(()),
      })
   }

   /// Requests the ids of all files stored on the recorder, newest first as
   /// the device reports them.
   ///
   /// Returns an empty list on timeout and whatever complete ids arrived on
   /// a partial response.
   pub async fn list_files(&self) -> Vec<FileId> {
      let _guard = self.op_guard.lock().await;

      let frame = protocol::request_frame(Opcode::FilesList, None);
      let response = self
         .collect_response(
            Opcode::FilesList,
            ChannelId::FileList,
            &frame,
            SizeRule::ListHeader,
            self.timings.list_timeout(),
         )
         .await;

      if response.len() < LIST_HEADER_LEN {
         if !response.is_empty() {
            warn!("files_list: response truncated before the id array");
         }
         return Vec::new();
      }

      let count = parser::count_from_header(&response).unwrap_or(0) as usize;
      let ids: Vec<FileId> = parser::file_ids_from_bytes(&response[LIST_HEADER_LEN..])
         .take(count)
         .collect();
      if ids.len() < count {
         warn!("files_list: device announced {count} files, decoded {}", ids.len());
      }
      debug!("files_list: {} files", ids.len());
      ids
   }

   /// Requests size/frequency/codec metadata for one file.
   ///
   /// Returns the empty record when the info channel is absent, the transfer
   /// times out, or the JSON does not decode.
   pub async fn file_info(&self, id: FileId) -> FileInfoRecord {
      let _guard = self.op_guard.lock().await;

      if !self.transport.channel_present(ChannelId::FileInfo) {
         warn!("file_info: channel not present on this device");
         return FileInfoRecord::default();
      }

      let frame = protocol::request_frame(Opcode::FileInfo, Some(id));
      let response = self
         .collect_response(
            Opcode::FileInfo,
            ChannelId::FileInfo,
            &frame,
            SizeRule::JsonHeader,
            self.timings.info_timeout(),
         )
         .await;

      if response.len() <= INFO_HEADER_LEN {
         return FileInfoRecord::default();
      }
      match parser::file_info_from_json(&response[INFO_HEADER_LEN..]) {
         Ok(record) => {
            debug!("file_info: {id}: {record:?}");
            record
         },
         Err(e) => {
            warn!("file_info: {id}: undecodable info: {e}");
            FileInfoRecord::default()
         },
      }
   }

   /// Requests the raw contents of one file. `size` comes from
   /// [`Self::file_info`]; the response carries no length of its own.
   ///
   /// Returns exactly `size` bytes unless the transfer timed out, in which
   /// case the buffer holds whatever arrived; callers must check the length.
   pub async fn file_data(&self, id: FileId, size: usize) -> Vec<u8> {
      let _guard = self.op_guard.lock().await;

      // Silence channels whose chatter would interleave with the bulk
      // transfer, and forget half-delivered responses from earlier attempts.
      for channel in [ChannelId::FileList, ChannelId::FileInfo] {
         if self.transport.channel_present(channel)
            && let Err(e) = self.transport.set_notify(channel, false).await
         {
            warn!("file_data: failed to silence {channel}: {e}");
         }
      }

      let frame = protocol::request_frame(Opcode::FileData, Some(id));
      let timeout = self.timings.data_timeout(size);
      let data = self
         .collect_response(
            Opcode::FileData,
            ChannelId::FileData,
            &frame,
            SizeRule::Exact(size),
            timeout,
         )
         .await;

      if data.len() < size {
         warn!("file_data: {id}: received {} of {size} bytes", data.len());
      }
      data
   }

   /// Requests the filesystem occupancy snapshot.
   ///
   /// Returns the empty record on timeout or a malformed response.
   pub async fn fs_status(&self) -> FsStatusRecord {
      let _guard = self.op_guard.lock().await;

      let frame = protocol::request_frame(Opcode::FsStatus, None);
      let response = self
         .collect_response(
            Opcode::FsStatus,
            ChannelId::FsStatus,
            &frame,
            SizeRule::SingleFragment,
            self.timings.status_timeout(),
         )
         .await;

      match parser::fs_status_from_bytes(&response) {
         Ok(record) => {
            debug!("fs_status: {record:?}");
            record
         },
         Err(e) => {
            if !response.is_empty() {
               warn!("fs_status: undecodable record: {e}");
            }
            FsStatusRecord::default()
         },
      }
   }

   /// Tells the recorder the transfer session is over. The device is free to
   /// drop the connection once it has processed this.
   pub async fn finish_transfer(&self) -> Result<()> {
      let _guard = self.op_guard.lock().await;

      let frame = protocol::request_frame(Opcode::ReceiveComplete, None);
      self.transport.write(ChannelId::Control, &frame).await
   }

   /// Returns the most recent general-status push from the device,
   /// discarding older queued ones. `None` if nothing arrived since the
   /// last call.
   pub async fn take_device_status(&self) -> Option<DeviceStatusRecord> {
      let _guard = self.op_guard.lock().await;

      let mut latest = None;
      while let Some(fragment) = self.mailboxes.try_recv(ChannelId::Status) {
         match parser::status_from_bytes(&fragment) {
            Ok(record) => latest = Some(record),
            Err(e) => warn!("status: undecodable push: {e}"),
         }
      }
      latest
   }

   /// Shared transaction engine: arm, request, reassemble until the expected
   /// size is reached or the deadline passes.
   ///
   /// Must be called with the in-flight guard held.
   async fn collect_response(
      &self,
      op: Opcode,
      channel: ChannelId,
      request: &RequestFrame,
      rule: SizeRule,
      timeout: Duration,
   ) -> Vec<u8> {
      if let Err(e) = self.transport.set_notify(channel, true).await {
         warn!("{op}: failed to arm notifications on {channel}: {e}");
         return Vec::new();
      }
      self.mailboxes.drain(channel);

      if let Err(e) = self.transport.write(ChannelId::Control, request).await {
         warn!("{op}: control write failed: {e}");
         return Vec::new();
      }
      debug!("{op}: request issued, awaiting response on {channel}");

      let mut expected = match rule {
         SizeRule::Exact(size) => Some(size),
         _ => None,
      };
      if expected == Some(0) {
         return Vec::new();
      }

      let deadline = Instant::now() + timeout;
      let mut response: Vec<u8> = Vec::new();

      loop {
         let Some(fragment) = self.mailboxes.recv_until(channel, deadline).await else {
            match expected {
               Some(total) => warn!(
                  "{op}: timed out after {timeout:?} with {} of {total} bytes",
                  response.len()
               ),
               None => warn!("{op}: timed out after {timeout:?} awaiting the response header"),
            }
            break;
         };

         if response.is_empty() {
            let header = match rule {
               SizeRule::ListHeader => Some(
                  parser::count_from_header(&fragment)
                     .map(|count| (count as usize + 1) * FileId::WIRE_SIZE),
               ),
               SizeRule::JsonHeader => Some(
                  parser::json_len_from_header(&fragment)
                     .map(|len| len as usize + INFO_HEADER_LEN),
               ),
               SizeRule::Exact(_) | SizeRule::SingleFragment => None,
            };
            match header {
               Some(Ok(total)) => expected = Some(total),
               Some(Err(e)) => {
                  warn!("{op}: bad response header: {e}");
                  break;
               },
               None => {},
            }
         }

         response.extend_from_slice(&fragment);

         if matches!(rule, SizeRule::SingleFragment) {
            break;
         }
         if let Some(total) = expected
            && response.len() >= total
         {
            response.truncate(total);
            break;
         }
      }
      response
   }
}

#[cfg(test)]
mod tests {
   use std::collections::HashMap;

   use parking_lot::Mutex as SyncMutex;

   use super::*;

   struct MockInner {
      mailboxes: Arc<Mailboxes>,
      responses: SyncMutex<HashMap<u8, (ChannelId, Vec<Vec<u8>>)>>,
      absent: SyncMutex<Vec<ChannelId>>,
      notify_log: SyncMutex<Vec<(ChannelId, bool)>>,
      writes: SyncMutex<Vec<Vec<u8>>>,
   }

   /// Transport that answers control writes with pre-scripted fragments.
   #[derive(Clone)]
   struct MockTransport {
      inner: Arc<MockInner>,
   }

   impl MockTransport {
      fn new(mailboxes: Arc<Mailboxes>) -> Self {
         Self {
            inner: Arc::new(MockInner {
               mailboxes,
               responses: SyncMutex::new(HashMap::new()),
               absent: SyncMutex::new(Vec::new()),
               notify_log: SyncMutex::new(Vec::new()),
               writes: SyncMutex::new(Vec::new()),
            }),
         }
      }

      fn script(&self, op: Opcode, channel: ChannelId, fragments: &[&[u8]]) {
         self.inner.responses.lock().insert(
            op as u8,
            (channel, fragments.iter().map(|f| f.to_vec()).collect()),
         );
      }

      fn mark_absent(&self, channel: ChannelId) {
         self.inner.absent.lock().push(channel);
      }

      fn notified(&self, channel: ChannelId, enabled: bool) -> bool {
         self.inner.notify_log.lock().contains(&(channel, enabled))
      }
   }

   impl FtsTransport for MockTransport {
      async fn write(&self, channel: ChannelId, bytes: &[u8]) -> Result<()> {
         assert_eq!(channel, ChannelId::Control, "requests go to the control channel");
         self.inner.writes.lock().push(bytes.to_vec());
         if let Some((target, fragments)) = self.inner.responses.lock().remove(&bytes[0]) {
            for fragment in fragments {
               self.inner.mailboxes.deliver(target, &fragment);
            }
         }
         Ok(())
      }

      async fn set_notify(&self, channel: ChannelId, enabled: bool) -> Result<()> {
         self.inner.notify_log.lock().push((channel, enabled));
         Ok(())
      }

      fn channel_present(&self, channel: ChannelId) -> bool {
         !self.inner.absent.lock().contains(&channel)
      }
   }

   fn test_timings() -> TransferTimings {
      TransferTimings {
         list_timeout_ms: 100,
         info_timeout_ms: 100,
         status_timeout_ms: 100,
         data_ms_per_byte: 1,
         data_floor_ms: 100,
      }
   }

   async fn new_client() -> (FtsClient<MockTransport>, MockTransport) {
      let mailboxes = Arc::new(Mailboxes::new());
      let mock = MockTransport::new(mailboxes.clone());
      let client = FtsClient::new(mock.clone(), mailboxes, test_timings())
         .await
         .unwrap();
      (client, mock)
   }

   #[tokio::test]
   async fn test_construction_requires_channels() {
      let mailboxes = Arc::new(Mailboxes::new());
      let mock = MockTransport::new(mailboxes.clone());
      mock.mark_absent(ChannelId::FileData);

      let result = FtsClient::new(mock, mailboxes, test_timings()).await;
      assert!(matches!(
         result,
         Err(FtsError::ChannelMissing(ChannelId::FileData))
      ));
   }

   #[tokio::test]
   async fn test_construction_arms_status_channel() {
      let (_client, mock) = new_client().await;
      assert!(mock.notified(ChannelId::Status, true));
   }

   #[tokio::test]
   async fn test_list_reassembles_split_fragments() {
      let (client, mock) = new_client().await;
      // The worked example split unevenly, including a cut inside an id.
      mock.script(
         Opcode::FilesList,
         ChannelId::FileList,
         &[
            &[0x02, 0x00, 0x00, 0x00, 0x00],
            &[0x00, 0x00, 0x00, 0x08, 0x07, 0x06, 0x05, 0x04],
            &[0x03, 0x02, 0x01, 0x18, 0x17, 0x16, 0x15, 0x14, 0x13, 0x12, 0x11],
         ],
      );

      let ids = client.list_files().await;
      assert_eq!(
         ids,
         vec![FileId(0x0102030405060708), FileId(0x1112131415161718)]
      );
      assert!(mock.notified(ChannelId::FileList, true));
   }

   #[tokio::test]
   async fn test_list_with_zero_files() {
      let (client, mock) = new_client().await;
      mock.script(
         Opcode::FilesList,
         ChannelId::FileList,
         &[&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]],
      );

      assert!(client.list_files().await.is_empty());
   }

   #[tokio::test]
   async fn test_list_timeout_returns_empty() {
      let (client, _mock) = new_client().await;
      let start = Instant::now();
      assert!(client.list_files().await.is_empty());
      assert!(start.elapsed() >= Duration::from_millis(100));
      assert!(start.elapsed() < Duration::from_secs(5));
   }

   #[tokio::test]
   async fn test_info_decodes_prefixed_json() {
      let (client, mock) = new_client().await;
      let body = br#"{"s":512,"f":16000,"c":1}"#;
      let mut first = vec![body.len() as u8, 0x00];
      first.extend_from_slice(&body[..10]);
      mock.script(
         Opcode::FileInfo,
         ChannelId::FileInfo,
         &[&first, &body[10..]],
      );

      let record = client.file_info(FileId(7)).await;
      assert_eq!(record.size, 512);
      assert_eq!(record.frequency, 16000);
      assert_eq!(record.codec, 1);
      // The request carries the id, little-endian, after the opcode.
      let writes = mock.inner.writes.lock();
      assert_eq!(writes[0][0], 0x02);
      assert_eq!(&writes[0][1..], &FileId(7).to_le_bytes());
   }

   #[tokio::test]
   async fn test_info_decode_failure_is_soft() {
      let (client, mock) = new_client().await;
      mock.script(
         Opcode::FileInfo,
         ChannelId::FileInfo,
         &[&[0x04, 0x00, b'j', b'u', b'n', b'k']],
      );

      let record = client.file_info(FileId(1)).await;
      assert!(record.is_empty());
   }

   #[tokio::test]
   async fn test_info_absent_channel_is_soft() {
      let mailboxes = Arc::new(Mailboxes::new());
      let mock = MockTransport::new(mailboxes.clone());
      mock.mark_absent(ChannelId::FileInfo);
      let client = FtsClient::new(mock.clone(), mailboxes, test_timings())
         .await
         .unwrap();

      let start = Instant::now();
      assert!(client.file_info(FileId(1)).await.is_empty());
      // No request was issued at all.
      assert!(mock.inner.writes.lock().is_empty());
      assert!(start.elapsed() < Duration::from_millis(50));
   }

   #[tokio::test]
   async fn test_data_complete_transfer() {
      let (client, mock) = new_client().await;
      mock.script(
         Opcode::FileData,
         ChannelId::FileData,
         &[&[1, 2, 3, 4], &[5, 6], &[7, 8, 9, 10]],
      );

      let data = client.file_data(FileId(3), 10).await;
      assert_eq!(data, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
      // Unrelated channels were silenced first.
      assert!(mock.notified(ChannelId::FileList, false));
      assert!(mock.notified(ChannelId::FileInfo, false));
   }

   #[tokio::test]
   async fn test_data_never_exceeds_requested_size() {
      let (client, mock) = new_client().await;
      mock.script(
         Opcode::FileData,
         ChannelId::FileData,
         &[&[1, 2, 3, 4, 5, 6], &[7, 8, 9, 10, 11, 12]],
      );

      let data = client.file_data(FileId(3), 10).await;
      assert_eq!(data.len(), 10);
      assert_eq!(data[9], 10);
   }

   #[tokio::test]
   async fn test_data_timeout_yields_short_buffer() {
      let (client, mock) = new_client().await;
      mock.script(Opcode::FileData, ChannelId::FileData, &[&[1, 2, 3]]);

      let data = client.file_data(FileId(3), 10).await;
      assert_eq!(data, vec![1, 2, 3]);
   }

   #[tokio::test]
   async fn test_fs_status_takes_single_notification() {
      let (client, mock) = new_client().await;
      let record = [
         0x0e, 0x00, //
         100, 0, 0, 0xff, //
         200, 0, 0, 0xff, //
         2, 0, 0, 0xff,
      ];
      mock.script(
         Opcode::FsStatus,
         ChannelId::FsStatus,
         &[&record, &[0xde, 0xad]],
      );

      let status = client.fs_status().await;
      assert_eq!(status.free_space, 100);
      assert_eq!(status.occupied_space, 200);
      assert_eq!(status.file_count, 2);
   }

   #[tokio::test]
   async fn test_fs_status_timeout_yields_empty_record() {
      let (client, _mock) = new_client().await;
      let status = client.fs_status().await;
      assert_eq!(status, FsStatusRecord::default());
   }

   #[tokio::test]
   async fn test_finish_transfer_writes_opcode() {
      let (client, mock) = new_client().await;
      client.finish_transfer().await.unwrap();
      assert_eq!(mock.inner.writes.lock().as_slice(), &[vec![0x05]]);
   }

   #[tokio::test]
   async fn test_device_status_returns_latest_push() {
      let (client, mock) = new_client().await;
      assert!(client.take_device_status().await.is_none());

      mock.inner.mailboxes.deliver(ChannelId::Status, &[0x01]);
      let mut push = vec![0x02];
      push.extend_from_slice(&FileId(9).to_le_bytes());
      mock.inner.mailboxes.deliver(ChannelId::Status, &push);

      let status = client.take_device_status().await.unwrap();
      assert_eq!(status.code, 0x02);
      assert_eq!(status.file_id, Some(FileId(9)));
      assert!(client.take_device_status().await.is_none());
   }

   #[tokio::test]
   async fn test_stale_fragments_are_discarded_before_request() {
      let (client, mock) = new_client().await;
      // Leftovers from an aborted earlier exchange must not leak into the
      // next response.
      mock.inner.mailboxes.deliver(ChannelId::FileList, &[0xff; 8]);
      mock.script(
         Opcode::FilesList,
         ChannelId::FileList,
         &[&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]],
      );

      assert!(client.list_files().await.is_empty());
   }
}
