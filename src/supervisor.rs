//! Supervisor: owns the reconnect loop around a `Connection`, a heartbeat
//! timer, and a circuit breaker, all driven from a single background thread
//! in the same style as the Reader/Writer threads in `connection.rs`.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionState};
use crate::device::ADBRsaKey;
use crate::error::RustADBError;
use crate::shell::ShellChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

struct CircuitBreaker {
    failures: VecDeque<Instant>,
    threshold: u32,
    window: Duration,
    open_until: Option<Instant>,
}

impl CircuitBreaker {
    fn new(threshold: u32, window: Duration) -> Self {
        Self {
            failures: VecDeque::new(),
            threshold,
            window,
            open_until: None,
        }
    }

    fn record_failure(&mut self, now: Instant) {
        self.failures.push_back(now);
        while let Some(&front) = self.failures.front() {
            if now.duration_since(front) > self.window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
        if self.failures.len() as u32 >= self.threshold {
            self.open_until = Some(now + self.window);
        }
    }

    fn record_success(&mut self) {
        self.failures.clear();
        self.open_until = None;
    }

    fn is_open(&self, now: Instant) -> bool {
        matches!(self.open_until, Some(until) if now < until)
    }
}

/// Reconnects to the same device (by `ADBRsaKey` fingerprint), replays a
/// heartbeat over the shell channel, and tracks a circuit breaker across
/// repeated failures within a short window (spec §4.8).
pub struct Supervisor {
    addr: SocketAddr,
    key: ADBRsaKey,
    config: ClientConfig,
    state: Mutex<SupervisorState>,
    connection: Mutex<Option<Arc<Connection>>>,
    shell: Mutex<Option<Arc<ShellChannel>>>,
    breaker: Mutex<CircuitBreaker>,
    stop: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    /// Spawns the background thread and returns immediately; the first
    /// connection attempt happens asynchronously, observable via `state()`.
    pub fn start(addr: SocketAddr, key: ADBRsaKey, config: ClientConfig) -> Arc<Self> {
        let config = config.normalized();
        let breaker = CircuitBreaker::new(config.circuit_breaker_failures, config.circuit_breaker_window);

        let supervisor = Arc::new(Self {
            addr,
            key,
            config,
            state: Mutex::new(SupervisorState::Disconnected),
            connection: Mutex::new(None),
            shell: Mutex::new(None),
            breaker: Mutex::new(breaker),
            stop: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        });

        let worker_sup = supervisor.clone();
        let handle = thread::spawn(move || worker_sup.run());
        *supervisor.worker.lock().unwrap() = Some(handle);
        supervisor
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.lock().unwrap()
    }

    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.connection.lock().unwrap().clone()
    }

    pub fn shell(&self) -> Option<Arc<ShellChannel>> {
        self.shell.lock().unwrap().clone()
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(conn) = self.connection.lock().unwrap().take() {
            conn.shutdown();
        }
    }

    fn run(self: Arc<Self>) {
        let mut attempt: u32 = 0;

        while !self.stop.load(Ordering::SeqCst) {
            let now = Instant::now();
            if self.breaker.lock().unwrap().is_open(now) {
                *self.state.lock().unwrap() = SupervisorState::Error;
                thread::sleep(Duration::from_millis(200));
                continue;
            }

            if let Some(max) = self.config.reconnect_max_attempts {
                if attempt >= max {
                    *self.state.lock().unwrap() = SupervisorState::Error;
                    return;
                }
            }

            *self.state.lock().unwrap() = SupervisorState::Connecting;
            match Connection::connect(self.addr, self.key.clone(), self.config.clone()) {
                Ok((conn, _presented_pubkey)) => {
                    attempt = 0;
                    self.breaker.lock().unwrap().record_success();
                    *self.state.lock().unwrap() = SupervisorState::Connected;
                    let shell = Arc::new(ShellChannel::new(conn.clone()));
                    *self.connection.lock().unwrap() = Some(conn.clone());
                    *self.shell.lock().unwrap() = Some(shell.clone());

                    self.heartbeat_until_lost(&conn, &shell);

                    *self.connection.lock().unwrap() = None;
                    *self.shell.lock().unwrap() = None;
                    if self.stop.load(Ordering::SeqCst) {
                        return;
                    }
                    self.breaker.lock().unwrap().record_failure(Instant::now());
                }
                Err(e) => {
                    log::warn!("connect attempt {attempt} to {} failed: {e}", self.addr);
                    self.breaker.lock().unwrap().record_failure(Instant::now());
                }
            }

            *self.state.lock().unwrap() = SupervisorState::Error;
            let backoff = backoff_delay(attempt, self.config.reconnect_backoff_cap);
            attempt = attempt.saturating_add(1);
            thread::sleep(backoff);
        }
    }

    /// Sends a heartbeat over `shell` every `heartbeat_interval`; returns
    /// once the connection is observed lost.
    fn heartbeat_until_lost(&self, conn: &Arc<Connection>, shell: &Arc<ShellChannel>) {
        loop {
            if self.stop.load(Ordering::SeqCst) || conn.state() != ConnectionState::Connected {
                return;
            }
            match shell.execute_sync("echo heartbeat", self.config.shell_overall_timeout) {
                Ok(_) => {}
                Err(e) if e.is_transport_lost() => return,
                Err(e) => log::debug!("heartbeat failed, continuing: {e}"),
            }
            thread::sleep(self.config.heartbeat_interval);
        }
    }
}

/// Classifies an error the caller observed while dispatching a command
/// through a `Supervisor`-owned connection: should it retry once
/// reconnected, or is it a command-level failure to surface directly?
pub fn should_redispatch(error: &RustADBError) -> bool {
    error.is_transport_lost()
}

fn backoff_delay(attempt: u32, cap: Duration) -> Duration {
    let millis = 1000u64.saturating_mul(1u64 << attempt.min(20));
    Duration::from_millis(millis).min(cap)
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_cap() {
        let cap = Duration::from_secs(30);
        assert_eq!(backoff_delay(0, cap), Duration::from_secs(1));
        assert_eq!(backoff_delay(1, cap), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, cap), Duration::from_secs(4));
        assert_eq!(backoff_delay(10, cap), cap);
    }

    #[test]
    fn circuit_breaker_opens_after_threshold() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        let base = Instant::now();
        assert!(!breaker.is_open(base));
        breaker.record_failure(base);
        breaker.record_failure(base);
        assert!(!breaker.is_open(base));
        breaker.record_failure(base);
        assert!(breaker.is_open(base));
    }

    #[test]
    fn circuit_breaker_resets_on_success() {
        let mut breaker = CircuitBreaker::new(2, Duration::from_secs(30));
        let base = Instant::now();
        breaker.record_failure(base);
        breaker.record_failure(base);
        assert!(breaker.is_open(base));
        breaker.record_success();
        assert!(!breaker.is_open(base));
    }

    #[test]
    fn circuit_breaker_expires_old_failures_outside_window() {
        let mut breaker = CircuitBreaker::new(2, Duration::from_millis(50));
        let base = Instant::now();
        breaker.record_failure(base);
        let later = base + Duration::from_millis(200);
        breaker.record_failure(later);
        // The first failure should have aged out of the window by `later`.
        assert!(!breaker.is_open(later));
    }
}
