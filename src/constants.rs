//! Wire-level constants shared across the codec, auth engine and channels.

use std::time::Duration;

/// Maximum single message payload this crate will ever decode. The wire
/// format allows up to 2^24 bytes; we clamp much lower as a defensive bound.
pub const MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Read buffer size used when streaming file contents into `WRTE`/`DATA`
/// frames. Matches the SYNC chunk ceiling described in the sync protocol.
pub const BUFFER_SIZE: usize = 32 * 1024;

/// ADB protocol version advertised in our `CNXN` banner.
pub const ADB_VERSION: u32 = 0x0100_0000;

/// `max_payload` advertised in our `CNXN` banner.
pub const ADB_CNXN_MAX_PAYLOAD: u32 = 4096;

/// `systemtype::serial::banner` string sent in the `CNXN` payload.
pub const ADB_CNXN_BANNER: &[u8] = b"host::\0";

/// 15-byte ASN.1 DigestInfo prefix for SHA-1, prepended to the raw token
/// before RSA-encrypting it during the AUTH handshake.
pub const SHA1_DIGEST_INFO_PREFIX: [u8; 15] = [
    0x30, 0x21, 0x30, 0x09, 0x06, 0x05, 0x2b, 0x0e, 0x03, 0x02, 0x1a, 0x05, 0x00, 0x04, 0x14,
];

/// Size in bytes of an RSA-2048 signature block.
pub const RSA_KEY_SIZE_BYTES: usize = 256;

/// Number of 32-bit words used to represent a 2048-bit RSA modulus in the
/// ADB public-key blob.
pub const ADB_PUBKEY_WORD_COUNT: u32 = 64;

/// Suffix appended after the base64 public-key blob, as the device expects
/// an email-like identity string terminated by a NUL byte.
pub const ADB_PUBKEY_SUFFIX: &str = " unknown@unknown\0";

/// Maximum number of AUTH round-trips before giving up on the handshake.
pub const MAX_AUTH_ROUNDS: u32 = 5;

/// On-disk directory name (relative to the caller-supplied data dir) holding
/// key material and the trust sentinel.
pub const KEY_DIR_NAME: &str = "adb_keys";
pub const PRIVATE_KEY_FILE: &str = "adbkey";
pub const PUBLIC_KEY_FILE: &str = "adbkey.pub";
pub const PUBLIC_KEY_ADB_FILE: &str = "adbkey.pub.adb";
pub const TRUST_SENTINEL_FILE: &str = "trust_established";

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_AUTH_READ_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_STREAM_OPEN_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SEND_OKAY_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_DONE_OKAY_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SHELL_QUIET_PERIOD: Duration = Duration::from_millis(100);
pub const DEFAULT_SHELL_OVERALL_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
pub const MAX_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(120);
pub const DEFAULT_CIRCUIT_BREAKER_FAILURES: u32 = 5;
pub const DEFAULT_CIRCUIT_BREAKER_WINDOW: Duration = Duration::from_secs(30);
pub const DEFAULT_RECONNECT_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// SYNC DATA chunk size; the protocol tolerates up to 64 KiB but in practice
/// 32 KiB is the stable ceiling across peers.
pub const DEFAULT_SYNC_CHUNK_BYTES: usize = 32 * 1024;
/// Sleep inserted every `SYNC_THROTTLE_EVERY` DATA chunks to avoid
/// overwhelming constrained peers.
pub const SYNC_THROTTLE_EVERY: usize = 20;
pub const SYNC_THROTTLE_SLEEP: Duration = Duration::from_millis(5);
