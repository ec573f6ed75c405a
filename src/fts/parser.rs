//! Response decoding for the File Transfer Service.
//!
//! Pure functions turning reassembled response bytes into typed records.
//! Every decoder is deterministic and side-effect-free; callers absorb the
//! errors into empty results.

use thiserror::Error;

use crate::fts::protocol::{DeviceStatusRecord, FileId, FileInfoRecord, FsStatusRecord};

/// Error type for response decoding.
#[derive(Error, Debug)]
pub enum ProtoError {
   /// Header slot is smaller than the self-describing length field.
   #[error("Header too short: expected at least {expected} bytes, got {actual}")]
   HeaderTooShort { expected: usize, actual: usize },

   /// Fixed-layout record is smaller than its defined extent.
   #[error("Record too short: expected at least {expected} bytes, got {actual}")]
   RecordTooShort { expected: usize, actual: usize },

   /// File-info body is not the JSON object the device is expected to send.
   #[error("Invalid file info JSON: {0}")]
   InvalidJson(#[from] serde_json::Error),
}

/// Number of file ids announced by the leading slot of a file-list response.
pub fn count_from_header(bytes: &[u8]) -> Result<u32, ProtoError> {
   let header: [u8; 4] = bytes
      .get(..4)
      .and_then(|b| b.try_into().ok())
      .ok_or(ProtoError::HeaderTooShort {
         expected: 4,
         actual: bytes.len(),
      })?;
   Ok(u32::from_le_bytes(header))
}

/// Length of the JSON body announced by a file-info response prefix.
pub fn json_len_from_header(bytes: &[u8]) -> Result<u16, ProtoError> {
   let header: [u8; 2] = bytes
      .get(..2)
      .and_then(|b| b.try_into().ok())
      .ok_or(ProtoError::HeaderTooShort {
         expected: 2,
         actual: bytes.len(),
      })?;
   Ok(u16::from_le_bytes(header))
}

/// Decodes consecutive 8-byte little-endian file ids. A trailing partial id
/// (from a timed-out transfer) is ignored.
pub fn file_ids_from_bytes(bytes: &[u8]) -> impl Iterator<Item = FileId> + '_ {
   bytes
      .chunks_exact(FileId::WIRE_SIZE)
      .map(|chunk| FileId::from_le_bytes(chunk.try_into().expect("chunk is 8 bytes")))
}

const FS_STATUS_LEN: usize = 13;

fn u24_le(bytes: &[u8]) -> u32 {
   u32::from(bytes[0]) | u32::from(bytes[1]) << 8 | u32::from(bytes[2]) << 16
}

/// Decodes a filesystem-status record.
///
/// The record carries three 24-bit little-endian counters at byte offsets
/// 2, 6 and 10; the bytes between them are reserved by the device and their
/// contents are ignored.
pub fn fs_status_from_bytes(bytes: &[u8]) -> Result<FsStatusRecord, ProtoError> {
   if bytes.len() < FS_STATUS_LEN {
      return Err(ProtoError::RecordTooShort {
         expected: FS_STATUS_LEN,
         actual: bytes.len(),
      });
   }
   Ok(FsStatusRecord {
      free_space: u24_le(&bytes[2..5]),
      occupied_space: u24_le(&bytes[6..9]),
      file_count: u24_le(&bytes[10..13]),
   })
}

/// Decodes the UTF-8 JSON body of a file-info response.
pub fn file_info_from_json(bytes: &[u8]) -> Result<FileInfoRecord, ProtoError> {
   Ok(serde_json::from_slice(bytes)?)
}

/// Decodes a general-status push. One code byte, optionally followed by a
/// one-byte parameter or the 8-byte little-endian id of the affected file.
pub fn status_from_bytes(bytes: &[u8]) -> Result<DeviceStatusRecord, ProtoError> {
   let (&code, rest) = bytes.split_first().ok_or(ProtoError::RecordTooShort {
      expected: 1,
      actual: 0,
   })?;
   let mut record = DeviceStatusRecord {
      code,
      file_id: None,
      param: None,
   };
   if let Ok(id) = <[u8; FileId::WIRE_SIZE]>::try_from(rest) {
      record.file_id = Some(FileId::from_le_bytes(id));
   } else if let [param] = rest {
      record.param = Some(*param);
   }
   Ok(record)
}
