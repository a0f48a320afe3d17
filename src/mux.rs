//! Stream Multiplexer: local stream id allocation, the `local_id -> Stream`
//! table, and the per-stream ready/write-ready/data latches the Reader
//! thread feeds and the Shell/SYNC channels wait on.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::{Result, RustADBError};

const FIRST_LOCAL_ID: u32 = 1;
const WRAP_AT: u32 = 1000;

#[derive(Debug, Default)]
struct StreamInner {
    remote_id: u32,
    ready: bool,
    write_ready: bool,
    inbound_data: VecDeque<Vec<u8>>,
    closed: bool,
    sync_failed: bool,
    sync_error: Option<String>,
    connection_lost: bool,
}

/// One logical multiplexed channel. Lives for the duration of an OPEN..CLSE
/// pair; at most one `WRTE` may be outstanding (awaiting `OKAY`) at a time.
#[derive(Debug)]
pub struct Stream {
    pub local_id: u32,
    inner: Mutex<StreamInner>,
    cvar: Condvar,
}

impl Stream {
    fn new(local_id: u32) -> Arc<Self> {
        Arc::new(Self {
            local_id,
            inner: Mutex::new(StreamInner::default()),
            cvar: Condvar::new(),
        })
    }

    pub fn remote_id(&self) -> u32 {
        self.inner.lock().unwrap().remote_id
    }

    pub fn is_ready(&self) -> bool {
        self.inner.lock().unwrap().ready
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    /// Invoked by the Reader on the first `OKAY` referencing this stream.
    pub(crate) fn bind_remote(&self, remote_id: u32) {
        let mut guard = self.inner.lock().unwrap();
        guard.remote_id = remote_id;
        guard.ready = true;
        guard.write_ready = true;
        self.cvar.notify_all();
    }

    /// Invoked by the Reader on every subsequent `OKAY`: unblocks whoever is
    /// waiting to send the next `WRTE`.
    pub(crate) fn mark_write_ready(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.write_ready = true;
        self.cvar.notify_all();
    }

    pub(crate) fn push_inbound(&self, data: Vec<u8>) {
        let mut guard = self.inner.lock().unwrap();
        guard.inbound_data.push_back(data);
        self.cvar.notify_all();
    }

    pub(crate) fn mark_sync_failed(&self, error: String) {
        let mut guard = self.inner.lock().unwrap();
        guard.sync_failed = true;
        guard.sync_error = Some(error);
        self.cvar.notify_all();
    }

    pub(crate) fn mark_closed(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.closed = true;
        self.cvar.notify_all();
    }

    pub(crate) fn mark_connection_lost(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.connection_lost = true;
        guard.closed = true;
        self.cvar.notify_all();
    }

    fn check_failure(guard: &StreamInner) -> Result<()> {
        if guard.connection_lost {
            return Err(RustADBError::ConnectionLost);
        }
        if guard.closed {
            return Err(RustADBError::StreamClosed);
        }
        Ok(())
    }

    /// Blocks until the peer's first `OKAY` binds this stream, or the
    /// deadline elapses.
    pub fn wait_ready(&self, deadline: Duration) -> Result<()> {
        let guard = self.inner.lock().unwrap();
        let (guard, timeout) = self
            .cvar
            .wait_timeout_while(guard, deadline, |g| !g.ready && !g.closed)
            .unwrap();
        Self::check_failure(&guard)?;
        if timeout.timed_out() && !guard.ready {
            return Err(RustADBError::OpenFailed);
        }
        Ok(())
    }

    /// Blocks until a `WRTE` may legally be sent on this stream (the caller
    /// must clear `write_ready` itself right before sending).
    pub fn wait_write_ready(&self, deadline: Duration) -> Result<()> {
        let guard = self.inner.lock().unwrap();
        let (mut guard, timeout) = self
            .cvar
            .wait_timeout_while(guard, deadline, |g| !g.write_ready && !g.closed)
            .unwrap();
        Self::check_failure(&guard)?;
        if timeout.timed_out() && !guard.write_ready {
            return Err(RustADBError::WriteNotReady);
        }
        guard.write_ready = false;
        Ok(())
    }

    /// Pops the next inbound data chunk, waiting up to `deadline` for one to
    /// arrive. Returns `Ok(None)` on timeout rather than an error, since a
    /// quiet period is an expected terminal condition for shell output.
    pub fn pop_inbound(&self, deadline: Duration) -> Result<Option<Vec<u8>>> {
        let guard = self.inner.lock().unwrap();
        let (mut guard, timeout) = self
            .cvar
            .wait_timeout_while(guard, deadline, |g| g.inbound_data.is_empty() && !g.closed)
            .unwrap();
        if guard.connection_lost {
            return Err(RustADBError::ConnectionLost);
        }
        if let Some(chunk) = guard.inbound_data.pop_front() {
            return Ok(Some(chunk));
        }
        if timeout.timed_out() {
            return Ok(None);
        }
        // Closed with nothing left to drain.
        Ok(None)
    }

    pub fn sync_failure(&self) -> Option<String> {
        let guard = self.inner.lock().unwrap();
        if guard.sync_failed {
            Some(guard.sync_error.clone().unwrap_or_default())
        } else {
            None
        }
    }
}

/// Holds the `local_id -> Stream` table plus the single-slot
/// `pending_stream` workaround described in spec §4.3: some peers don't
/// bind `local_id` correctly in the first `OKAY`'s `arg1`, so the first
/// `OKAY` whose `local_id` is not already a key in the table is routed to
/// whichever stream is currently pending an open.
#[derive(Default)]
pub struct Multiplexer {
    streams: HashMap<u32, Arc<Stream>>,
    pending_stream: Option<Arc<Stream>>,
    next_id: u32,
}

impl Multiplexer {
    pub fn new() -> Self {
        Self {
            streams: HashMap::new(),
            pending_stream: None,
            next_id: FIRST_LOCAL_ID,
        }
    }

    fn allocate_id(&mut self) -> u32 {
        loop {
            let candidate = self.next_id;
            self.next_id = if self.next_id + 1 >= WRAP_AT {
                FIRST_LOCAL_ID
            } else {
                self.next_id + 1
            };
            if candidate != 0 && !self.streams.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Registers a freshly allocated stream and arms the pending-stream
    /// slot; returns the stream handle the caller should wait on.
    pub fn register_pending(&mut self) -> Arc<Stream> {
        let local_id = self.allocate_id();
        let stream = Stream::new(local_id);
        self.streams.insert(local_id, stream.clone());
        self.pending_stream = Some(stream.clone());
        stream
    }

    pub fn get(&self, local_id: u32) -> Option<Arc<Stream>> {
        self.streams.get(&local_id).cloned()
    }

    pub fn remove(&mut self, local_id: u32) {
        self.streams.remove(&local_id);
        if let Some(pending) = &self.pending_stream {
            if pending.local_id == local_id {
                self.pending_stream = None;
            }
        }
    }

    /// Dispatch rule for an inbound `OKAY`: bind by `local_id` if present in
    /// the table; otherwise fall back to the pending-stream workaround.
    pub fn resolve_okay_target(&mut self, local_id: u32) -> Option<Arc<Stream>> {
        if let Some(stream) = self.streams.get(&local_id) {
            return Some(stream.clone());
        }
        self.pending_stream.take()
    }

    pub fn clear_pending_if(&mut self, local_id: u32) {
        if let Some(pending) = &self.pending_stream {
            if pending.local_id == local_id {
                self.pending_stream = None;
            }
        }
    }

    /// Tears down every stream on connection loss, waking all waiters.
    pub fn fail_all(&mut self) {
        for stream in self.streams.values() {
            stream.mark_connection_lost();
        }
        self.streams.clear();
        self.pending_stream = None;
    }
}
