//! Sub-commands and payload shapes used inside the SYNC sub-protocol, which
//! rides as raw bytes inside ordinary `WRTE` frames on a `sync:` stream.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageSubcommand {
    Send = 0x444e_4553,
    Recv = 0x5643_4552,
    Data = 0x4154_4144,
    Done = 0x454e_4f44,
    Fail = 0x4c49_4146,
    Stat = 0x5441_5453,
    Quit = 0x5449_5551,
}

/// `id | u32 arg` header shared by every SYNC sub-command frame.
#[derive(Debug, Serialize, Deserialize)]
pub struct SyncSubcommandHeader {
    pub id: u32,
    pub arg: u32,
}

impl MessageSubcommand {
    pub fn with_arg(self, arg: u32) -> SyncSubcommandHeader {
        SyncSubcommandHeader {
            id: self as u32,
            arg,
        }
    }
}

/// Response to a `STAT` SYNC request: POSIX mode bits, size, and mtime,
/// exactly as returned on the wire (little-endian, 3x u32).
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct AdbStatResponse {
    pub file_mode: u32,
    pub file_size: u32,
    pub file_modification_time: u32,
}
