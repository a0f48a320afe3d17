//! Native Rust ADB (Android Debug Bridge) client.
//!
//! Speaks the wire protocol directly over TCP: RSA-backed AUTH handshake
//! with trust-on-first-use, a multiplexed stream layer for concurrent
//! `shell:`/`sync:` channels, and a `Supervisor` that keeps a connection
//! alive across drops with exponential backoff and a circuit breaker.
//!
//! ```no_run
//! use std::net::SocketAddr;
//! use std::path::Path;
//! use adb_client::{AdbClient, ClientConfig};
//!
//! # fn main() -> adb_client::Result<()> {
//! let addr: SocketAddr = "127.0.0.1:5555".parse().unwrap();
//! let client = AdbClient::connect(addr, Path::new("./adb_data"), ClientConfig::default())?;
//! let output = client.shell().execute_sync("echo hello", std::time::Duration::from_secs(5))?;
//! println!("{}", String::from_utf8_lossy(&output));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod constants;
pub mod device;
pub mod error;
pub mod mux;
pub mod shell;
pub mod supervisor;
pub mod sync_channel;
pub mod transport;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub use config::ClientConfig;
pub use connection::{Connection, ConnectionState};
pub use device::{ADBRsaKey, AdbStatResponse};
pub use error::{Result, RustADBError, UserErrorCategory};
pub use mux::Stream;
pub use shell::ShellChannel;
pub use supervisor::{should_redispatch, Supervisor, SupervisorState};
pub use sync_channel::SyncChannel;
pub use transport::{ADBMessageTransport, TcpTransport};

/// Single-connection façade wiring together the key store, `Connection`,
/// and the two higher-level channels. Most callers that don't need the
/// reconnect/heartbeat machinery of `Supervisor` want this.
pub struct AdbClient {
    connection: Arc<Connection>,
    shell: ShellChannel,
    sync: SyncChannel,
}

impl AdbClient {
    /// Loads (or generates) the RSA key pair under `data_dir`, connects to
    /// `addr`, and runs the AUTH handshake. On success, records the
    /// trust-on-first-use sentinel if a public-key presentation round was
    /// required.
    pub fn connect(addr: SocketAddr, data_dir: &Path, config: ClientConfig) -> Result<Self> {
        let key = ADBRsaKey::ensure_keys(data_dir)?;
        let (connection, presented_pubkey) = Connection::connect(addr, key, config)?;

        let shell = ShellChannel::new(connection.clone());
        let sync = SyncChannel::new(connection.clone());

        if presented_pubkey {
            ADBRsaKey::mark_trust_established(data_dir)?;
            push_public_key_best_effort(&shell, connection.key());
        }

        Ok(Self {
            connection,
            shell,
            sync,
        })
    }

    pub fn shell(&self) -> &ShellChannel {
        &self.shell
    }

    pub fn sync(&self) -> &SyncChannel {
        &self.sync
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }
}

/// Writes our public key into the device's own `adb_keys` file over the
/// shell we just opened, so trust survives a device-side wipe of its
/// in-memory AUTH state (spec §4.4 step 5). Best-effort: a failure here
/// does not affect the session we already authenticated.
fn push_public_key_best_effort(shell: &ShellChannel, key: &ADBRsaKey) {
    let blob = match key.public_key_adb_blob() {
        Ok(blob) => blob,
        Err(e) => {
            log::warn!("could not encode public key for adb_keys push: {e}");
            return;
        }
    };
    let line = blob.trim_end_matches('\0');
    let command = format!("mkdir -p /data/misc/adb && echo '{line}' >> /data/misc/adb/adb_keys\n");
    if let Err(e) = shell.execute_sync(&command, Duration::from_secs(5)) {
        log::warn!("best-effort adb_keys push failed: {e}");
    }
}
