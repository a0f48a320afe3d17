//! Runtime configuration knobs (spec §6). Plain struct with `Default`,
//! following the teacher's preference for constructor parameters and
//! constants over a configuration-file layer.

use std::time::Duration;

use crate::constants::*;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    pub read_timeout_during_auth: Duration,
    pub heartbeat_interval: Duration,
    pub max_payload_bytes: usize,
    pub sync_chunk_bytes: usize,
    /// `None` means unlimited reconnect attempts.
    pub reconnect_max_attempts: Option<u32>,
    pub circuit_breaker_failures: u32,
    pub circuit_breaker_window: Duration,
    pub reconnect_backoff_cap: Duration,
    pub stream_open_timeout: Duration,
    pub shell_quiet_period: Duration,
    pub shell_overall_timeout: Duration,
    /// How long `push()` waits for an explicit SYNC acknowledgement after
    /// `DONE` before falling back to a `STAT`-based verification.
    pub done_ack_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout_during_auth: DEFAULT_AUTH_READ_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            max_payload_bytes: MAX_PAYLOAD_BYTES,
            sync_chunk_bytes: DEFAULT_SYNC_CHUNK_BYTES,
            reconnect_max_attempts: None,
            circuit_breaker_failures: DEFAULT_CIRCUIT_BREAKER_FAILURES,
            circuit_breaker_window: DEFAULT_CIRCUIT_BREAKER_WINDOW,
            reconnect_backoff_cap: DEFAULT_RECONNECT_BACKOFF_CAP,
            stream_open_timeout: DEFAULT_STREAM_OPEN_TIMEOUT,
            shell_quiet_period: DEFAULT_SHELL_QUIET_PERIOD,
            shell_overall_timeout: DEFAULT_SHELL_OVERALL_TIMEOUT,
            done_ack_timeout: DEFAULT_DONE_OKAY_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Clamps `heartbeat_interval` into the documented 10s-120s range.
    pub fn normalized(mut self) -> Self {
        if self.heartbeat_interval < MIN_HEARTBEAT_INTERVAL {
            self.heartbeat_interval = MIN_HEARTBEAT_INTERVAL;
        }
        if self.heartbeat_interval > MAX_HEARTBEAT_INTERVAL {
            self.heartbeat_interval = MAX_HEARTBEAT_INTERVAL;
        }
        self
    }
}
