//! The low-level ADB primitives: wire codec, key store, and the AUTH
//! handshake function driving them before any stream is multiplexed.

pub(crate) mod adb_message_device;
mod adb_rsa_key;
mod adb_transport_message;
mod models;

pub use adb_rsa_key::ADBRsaKey;
pub use adb_transport_message::{
    ADBTransportMessage, ADBTransportMessageHeader, MessageCommand, AUTH_RSAPUBLICKEY,
    AUTH_SIGNATURE, AUTH_TOKEN,
};
pub use models::{AdbStatResponse, MessageSubcommand, SyncSubcommandHeader};
