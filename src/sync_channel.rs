//! SYNC Channel: file push/pull/stat over a dedicated `sync:` stream, using
//! the SEND/RECV/DATA/DONE/STAT/FAIL sub-protocol that rides inside ordinary
//! `WRTE` frames (spec §4.7).

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::connection::Connection;
use crate::constants::{SYNC_THROTTLE_EVERY, SYNC_THROTTLE_SLEEP};
use crate::device::adb_message_device::{bincode_deserialize_from_slice, bincode_serialize_to_vec};
use crate::device::{AdbStatResponse, MessageSubcommand};
use crate::error::{Result, RustADBError};

/// Rewrites the legacy `/storage/emulated/0/` prefix to `/sdcard/` and
/// collapses any run of repeated slashes, matching what real devices expect
/// on the wire regardless of which form a caller passes in.
fn normalize_remote_path(path: &str) -> String {
    let rewritten = if let Some(stripped) = path.strip_prefix("/storage/emulated/0/") {
        format!("/sdcard/{stripped}")
    } else if path == "/storage/emulated/0" {
        "/sdcard".to_string()
    } else {
        path.to_string()
    };
    collapse_slashes(&rewritten)
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut previous_was_slash = false;
    for c in path.chars() {
        if c == '/' {
            if previous_was_slash {
                continue;
            }
            previous_was_slash = true;
        } else {
            previous_was_slash = false;
        }
        out.push(c);
    }
    out
}

fn unix_mtime(path: &Path) -> Result<u32> {
    let modified = std::fs::metadata(path)?.modified()?;
    let secs = modified
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    Ok(u32::try_from(secs).unwrap_or(u32::MAX))
}

pub struct SyncChannel {
    connection: Arc<Connection>,
}

impl SyncChannel {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    /// Pushes `local_path` to `remote_path` with POSIX `mode` bits (e.g.
    /// `0o100644`), reporting `(bytes_sent, total_bytes)` after every chunk.
    pub fn push(
        &self,
        local_path: &Path,
        remote_path: &str,
        mode: u32,
        mut progress: impl FnMut(u64, u64),
    ) -> Result<()> {
        let remote_path = normalize_remote_path(remote_path);
        let mut file = File::open(local_path)?;
        let total_bytes = file.metadata()?.len();
        let timeout = self.connection.config().stream_open_timeout;
        let chunk_size = self.connection.config().sync_chunk_bytes;

        let stream = self.connection.open_stream("sync:")?;

        // Literal wire layout: "SEND" | u32 path_len | path_bytes | u32 mode.
        let send_header = MessageSubcommand::Send.with_arg(remote_path.len() as u32);
        let mut frame = bincode_serialize_to_vec(&send_header)?;
        frame.extend_from_slice(remote_path.as_bytes());
        frame.write_u32::<LittleEndian>(mode)?;
        self.connection.write_to_stream(&stream, &frame, timeout)?;

        let mut sent = 0u64;
        let mut buffer = vec![0u8; chunk_size];
        let mut chunks_sent = 0usize;

        loop {
            if let Some(err) = stream.sync_failure() {
                return Err(RustADBError::SyncFail(err));
            }
            let n = file.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            let data_header = MessageSubcommand::Data.with_arg(n as u32);
            let mut data_frame = bincode_serialize_to_vec(&data_header)?;
            data_frame.extend_from_slice(&buffer[..n]);
            self.connection.write_to_stream(&stream, &data_frame, timeout)?;

            sent += n as u64;
            progress(sent, total_bytes);
            chunks_sent += 1;
            if chunks_sent % SYNC_THROTTLE_EVERY == 0 {
                thread::sleep(SYNC_THROTTLE_SLEEP);
            }
        }

        if let Some(err) = stream.sync_failure() {
            return Err(RustADBError::SyncFail(err));
        }
        if sent != total_bytes {
            return Err(RustADBError::TransferIncomplete {
                sent,
                total: total_bytes,
            });
        }

        let done_header = MessageSubcommand::Done.with_arg(unix_mtime(local_path)?);
        let done_frame = bincode_serialize_to_vec(&done_header)?;
        self.connection.write_to_stream(&stream, &done_frame, timeout)?;

        // Some peers never send an explicit DONE acknowledgement before
        // closing the stream; a missing ack is not itself a failure, but we
        // verify the transfer landed via STAT rather than trust silence.
        match stream.pop_inbound(self.connection.config().done_ack_timeout) {
            Ok(Some(ack)) if ack.starts_with(b"FAIL") => {
                let error = String::from_utf8_lossy(&ack[4..]).to_string();
                self.connection.close_stream(&stream);
                return Err(RustADBError::SyncFail(error));
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                log::debug!("no DONE acknowledgement for {remote_path}, verifying via STAT");
            }
            Err(_) => {}
        }
        self.connection.close_stream(&stream);

        if let Ok(stat) = self.stat(&remote_path) {
            if u64::from(stat.file_size) != total_bytes {
                return Err(RustADBError::NoDoneAck);
            }
        }

        Ok(())
    }

    /// Pulls `remote_path` into `local_path`, reporting `(bytes_received,
    /// total_bytes)` after every chunk. `total_bytes` comes from a leading
    /// `STAT` call; it is `0` if the peer reports an unreadable file.
    pub fn pull(
        &self,
        remote_path: &str,
        local_path: &Path,
        mut progress: impl FnMut(u64, u64),
    ) -> Result<()> {
        let remote_path = normalize_remote_path(remote_path);
        let timeout = self.connection.config().stream_open_timeout;
        let total_bytes = self.stat(&remote_path).map(|s| u64::from(s.file_size)).unwrap_or(0);

        let stream = self.connection.open_stream("sync:")?;
        let recv_header = MessageSubcommand::Recv.with_arg(remote_path.len() as u32);
        let mut frame = bincode_serialize_to_vec(&recv_header)?;
        frame.extend_from_slice(remote_path.as_bytes());
        self.connection.write_to_stream(&stream, &frame, timeout)?;

        let mut output = File::create(local_path)?;
        let mut received = 0u64;

        loop {
            if let Some(err) = stream.sync_failure() {
                self.connection.close_stream(&stream);
                return Err(RustADBError::SyncFail(err));
            }
            let chunk = match stream.pop_inbound(timeout)? {
                Some(chunk) => chunk,
                None => {
                    self.connection.close_stream(&stream);
                    return Err(RustADBError::ReadTimeout);
                }
            };
            if chunk.starts_with(b"FAIL") {
                self.connection.close_stream(&stream);
                return Err(RustADBError::SyncFail(
                    String::from_utf8_lossy(&chunk[4..]).to_string(),
                ));
            }
            if chunk.len() < 8 {
                continue;
            }
            let header: crate::device::SyncSubcommandHeader =
                bincode_deserialize_from_slice(&chunk[..8])?;
            if header.id == MessageSubcommand::Done as u32 {
                break;
            }
            if header.id == MessageSubcommand::Data as u32 {
                let data = &chunk[8..];
                use std::io::Write;
                output.write_all(data)?;
                received += data.len() as u64;
                progress(received, total_bytes);
            }
        }

        self.connection.close_stream(&stream);
        Ok(())
    }

    /// Issues a standalone `STAT` request for `remote_path`.
    pub fn stat(&self, remote_path: &str) -> Result<AdbStatResponse> {
        let remote_path = normalize_remote_path(remote_path);
        let timeout = self.connection.config().stream_open_timeout;

        let stream = self.connection.open_stream("sync:")?;
        let header = MessageSubcommand::Stat.with_arg(remote_path.len() as u32);
        let mut frame = bincode_serialize_to_vec(&header)?;
        frame.extend_from_slice(remote_path.as_bytes());
        self.connection.write_to_stream(&stream, &frame, timeout)?;

        let response = stream
            .pop_inbound(timeout)?
            .ok_or(RustADBError::ReadTimeout)?;
        self.connection.close_stream(&stream);

        if response.len() < 16 {
            return Err(RustADBError::ADBRequestFailed(
                "short STAT response".to_string(),
            ));
        }
        // First 4 bytes are the literal "STAT" echoed back.
        bincode_deserialize_from_slice(&response[4..16])
    }
}

#[cfg(test)]
mod tests {
    use super::normalize_remote_path;

    #[test]
    fn rewrites_emulated_storage_prefix() {
        assert_eq!(
            normalize_remote_path("/storage/emulated/0/Download/file.txt"),
            "/sdcard/Download/file.txt"
        );
    }

    #[test]
    fn leaves_other_paths_untouched() {
        assert_eq!(normalize_remote_path("/data/local/tmp/x"), "/data/local/tmp/x");
    }

    #[test]
    fn collapses_duplicate_slashes() {
        assert_eq!(normalize_remote_path("/sdcard//a///b"), "/sdcard/a/b");
    }
}
