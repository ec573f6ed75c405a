//! File Transfer Service protocol definitions and data structures.
//!
//! This module contains the protocol-specific constants, channel layout,
//! request framing, and typed records exchanged with recorder devices.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// UUID of the File Transfer Service hosted by the recorder.
pub const FTS_SERVICE_UUID: Uuid = Uuid::from_u128(0xa0451001_b822_4820_8782_bd8faf68807b);

const CONTROL_CHAR_UUID: Uuid = Uuid::from_u128(0x00001002_0000_1000_8000_00805f9b34fb);
const FILE_LIST_CHAR_UUID: Uuid = Uuid::from_u128(0x00001003_0000_1000_8000_00805f9b34fb);
const FILE_INFO_CHAR_UUID: Uuid = Uuid::from_u128(0x00001004_0000_1000_8000_00805f9b34fb);
const FILE_DATA_CHAR_UUID: Uuid = Uuid::from_u128(0x00001005_0000_1000_8000_00805f9b34fb);
const FS_STATUS_CHAR_UUID: Uuid = Uuid::from_u128(0x00001006_0000_1000_8000_00805f9b34fb);
const STATUS_CHAR_UUID: Uuid = Uuid::from_u128(0x00001007_0000_1000_8000_00805f9b34fb);

/// Length of the header slot preceding the id array in a file-list response.
pub const LIST_HEADER_LEN: usize = 8;
/// Length of the length prefix preceding the JSON body in a file-info response.
pub const INFO_HEADER_LEN: usize = 2;

/// Logical streams exposed by the File Transfer Service.
///
/// `Control` is write-only; the rest deliver notification fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum ChannelId {
   Control,
   FileList,
   FileInfo,
   FileData,
   FsStatus,
   Status,
}

impl ChannelId {
   /// GATT characteristic backing this channel.
   pub const fn uuid(self) -> Uuid {
      match self {
         Self::Control => CONTROL_CHAR_UUID,
         Self::FileList => FILE_LIST_CHAR_UUID,
         Self::FileInfo => FILE_INFO_CHAR_UUID,
         Self::FileData => FILE_DATA_CHAR_UUID,
         Self::FsStatus => FS_STATUS_CHAR_UUID,
         Self::Status => STATUS_CHAR_UUID,
      }
   }

   /// Channels whose absence makes the client unusable. `FileInfo` is the
   /// one characteristic older firmware may omit.
   pub const fn is_required(self) -> bool {
      !matches!(self, Self::FileInfo)
   }

   pub const fn accepts_notifications(self) -> bool {
      !matches!(self, Self::Control)
   }
}

/// Control-point opcodes understood by the recorder.
#[repr(u8)]
#[derive(
   Debug, Clone, Copy, PartialEq, Eq, strum::FromRepr, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum Opcode {
   FilesList = 0x01,
   FileInfo = 0x02,
   FileData = 0x03,
   FsStatus = 0x04,
   ReceiveComplete = 0x05,
}

/// Identifier of a file stored on the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct FileId(pub u64);

impl FileId {
   pub const WIRE_SIZE: usize = 8;

   pub fn from_le_bytes(bytes: [u8; Self::WIRE_SIZE]) -> Self {
      Self(u64::from_le_bytes(bytes))
   }

   pub fn to_le_bytes(self) -> [u8; Self::WIRE_SIZE] {
      self.0.to_le_bytes()
   }
}

impl fmt::Display for FileId {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "{:016x}", self.0)
   }
}

/// A control-point request: one opcode byte plus an optional file id.
pub type RequestFrame = heapless::Vec<u8, { 1 + FileId::WIRE_SIZE }>;

/// Builds the control-point frame for a request.
pub fn request_frame(op: Opcode, file_id: Option<FileId>) -> RequestFrame {
   let mut frame = RequestFrame::new();
   let _ = frame.push(op as u8);
   if let Some(id) = file_id {
      let _ = frame.extend_from_slice(&id.to_le_bytes());
   }
   frame
}

/// Per-file metadata, transferred as a JSON object with single-letter keys.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfoRecord {
   /// File size in bytes.
   #[serde(rename = "s")]
   pub size: u64,
   /// Sampling frequency of the recording, Hz.
   #[serde(rename = "f")]
   pub frequency: u32,
   /// Codec the recording was stored with.
   #[serde(rename = "c")]
   pub codec: u8,
}

impl FileInfoRecord {
   pub const fn is_empty(&self) -> bool {
      self.size == 0 && self.frequency == 0 && self.codec == 0
   }
}

/// Filesystem occupancy snapshot. Each field is a 24-bit counter on the wire.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsStatusRecord {
   pub free_space: u32,
   pub occupied_space: u32,
   pub file_count: u32,
}

/// Unsolicited general-status push from the recorder's status channel.
///
/// The code's meaning is firmware-defined; the optional trailing bytes carry
/// either a one-byte parameter or the file id the status refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatusRecord {
   pub code: u8,
   pub file_id: Option<FileId>,
   pub param: Option<u8>,
}
