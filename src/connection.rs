//! Connection: owns the socket (via the Reader/Writer threads), the key
//! store handle, and the stream table. This is the Framer/Transport
//! component plus the steady-state half of the Auth Engine (the handshake
//! itself lives in `device::adb_message_device::auth_handshake`).

use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::ClientConfig;
use crate::constants::{ADB_CNXN_BANNER, ADB_CNXN_MAX_PAYLOAD, ADB_VERSION};
use crate::device::adb_message_device::auth_handshake;
use crate::device::{ADBRsaKey, ADBTransportMessage, MessageCommand};
use crate::error::{Result, RustADBError};
use crate::mux::{Multiplexer, Stream};
use crate::transport::{ADBMessageTransport, TcpTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    Error,
}

pub struct Connection {
    config: ClientConfig,
    addr: SocketAddr,
    key: ADBRsaKey,
    state: Mutex<ConnectionState>,
    mux: Mutex<Multiplexer>,
    writer_tx: Mutex<Option<std::sync::mpsc::Sender<ADBTransportMessage>>>,
    shutdown_socket: Mutex<Option<TcpStream>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    /// Connects, performs the AUTH handshake, and spawns the long-lived
    /// Reader and Writer threads. Returns whether a public-key presentation
    /// round happened, so callers can decide whether to write the
    /// trust-established sentinel.
    pub fn connect(addr: SocketAddr, key: ADBRsaKey, config: ClientConfig) -> Result<(Arc<Self>, bool)> {
        let conn = Arc::new(Self {
            config,
            addr,
            key,
            state: Mutex::new(ConnectionState::Disconnected),
            mux: Mutex::new(Multiplexer::new()),
            writer_tx: Mutex::new(None),
            shutdown_socket: Mutex::new(None),
            threads: Mutex::new(Vec::new()),
        });
        let presented_pubkey = conn.establish()?;
        Ok((conn, presented_pubkey))
    }

    fn establish(self: &Arc<Self>) -> Result<bool> {
        *self.state.lock().unwrap() = ConnectionState::Connecting;

        let mut transport = TcpTransport::connect(self.addr, self.config.connect_timeout)?
            .with_max_payload_bytes(self.config.max_payload_bytes);
        *self.shutdown_socket.lock().unwrap() = Some(transport.raw_clone()?);
        transport.set_read_timeout(Some(self.config.read_timeout_during_auth))?;

        *self.state.lock().unwrap() = ConnectionState::Authenticating;
        let cnxn = ADBTransportMessage::new(
            MessageCommand::Cnxn,
            ADB_VERSION,
            ADB_CNXN_MAX_PAYLOAD,
            ADB_CNXN_BANNER,
        );
        transport.write_message(cnxn)?;
        let first = transport.read_message_with_timeout(self.config.read_timeout_during_auth)?;
        let presented_pubkey = auth_handshake(&mut transport, first, &self.key)?;

        transport.set_read_timeout(None)?;
        let (read_half, write_half) = transport.into_split()?;

        let (tx, rx) = std::sync::mpsc::channel::<ADBTransportMessage>();
        *self.writer_tx.lock().unwrap() = Some(tx);

        let writer_conn: Weak<Connection> = Arc::downgrade(self);
        let writer_handle = thread::spawn(move || {
            let mut write_half = write_half;
            for msg in rx {
                if write_half.write_message(msg).is_err() {
                    if let Some(conn) = writer_conn.upgrade() {
                        conn.on_io_error();
                    }
                    break;
                }
            }
        });

        let reader_conn: Weak<Connection> = Arc::downgrade(self);
        let reader_handle = thread::spawn(move || {
            let mut read_half = read_half;
            loop {
                match read_half.read_message() {
                    Ok(msg) => match reader_conn.upgrade() {
                        Some(conn) => conn.dispatch_inbound(msg),
                        None => break,
                    },
                    Err(_) => {
                        if let Some(conn) = reader_conn.upgrade() {
                            conn.on_io_error();
                        }
                        break;
                    }
                }
            }
        });

        {
            let mut threads = self.threads.lock().unwrap();
            threads.push(writer_handle);
            threads.push(reader_handle);
        }

        *self.state.lock().unwrap() = ConnectionState::Connected;
        Ok(presented_pubkey)
    }

    fn dispatch_inbound(self: &Arc<Self>, msg: ADBTransportMessage) {
        match msg.header().command() {
            MessageCommand::Okay => {
                let local_id = msg.header().arg1();
                let remote_id = msg.header().arg0();
                let mut mux = self.mux.lock().unwrap();
                if let Some(stream) = mux.resolve_okay_target(local_id) {
                    let first_sighting = !stream.is_ready();
                    if first_sighting {
                        stream.bind_remote(remote_id);
                    } else {
                        stream.mark_write_ready();
                    }
                    mux.clear_pending_if(stream.local_id);
                } else {
                    log::debug!("OKAY for unknown stream {local_id}, dropping");
                }
            }
            MessageCommand::Write => {
                let local_id = msg.header().arg1();
                let stream = { self.mux.lock().unwrap().get(local_id) };
                match stream {
                    Some(stream) => {
                        let payload = msg.into_payload();
                        if payload.starts_with(b"FAIL") {
                            let error = String::from_utf8_lossy(&payload[4..]).to_string();
                            stream.mark_sync_failed(error);
                        } else {
                            stream.push_inbound(payload);
                        }
                        let reply = ADBTransportMessage::new(
                            MessageCommand::Okay,
                            stream.local_id,
                            stream.remote_id(),
                            &[],
                        );
                        let _ = self.send_frame(reply);
                    }
                    None => log::debug!("WRTE for unknown stream {local_id}, dropping"),
                }
            }
            MessageCommand::Clse => {
                let local_id = msg.header().arg1();
                let mut mux = self.mux.lock().unwrap();
                if let Some(stream) = mux.get(local_id) {
                    stream.mark_closed();
                }
                mux.remove(local_id);
            }
            other => {
                log::debug!("dropping unexpected {other} frame during steady state");
            }
        }
    }

    fn on_io_error(self: &Arc<Self>) {
        *self.state.lock().unwrap() = ConnectionState::Error;
        self.mux.lock().unwrap().fail_all();
        *self.writer_tx.lock().unwrap() = None;
    }

    pub(crate) fn send_frame(&self, msg: ADBTransportMessage) -> Result<()> {
        let guard = self.writer_tx.lock().unwrap();
        match guard.as_ref() {
            Some(tx) => tx.send(msg).map_err(|_| RustADBError::ConnectionLost),
            None => Err(RustADBError::ConnectionLost),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    pub fn key(&self) -> &ADBRsaKey {
        &self.key
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Opens a fresh multiplexed stream for `service` (e.g. `"shell:"` or
    /// `"sync:"`), blocking until the peer's first `OKAY` binds it.
    pub fn open_stream(self: &Arc<Self>, service: &str) -> Result<Arc<Stream>> {
        if self.state() != ConnectionState::Connected {
            return Err(RustADBError::ConnectionLost);
        }

        let stream = self.mux.lock().unwrap().register_pending();
        let mut payload = service.as_bytes().to_vec();
        payload.push(0);

        if let Err(e) = self.send_frame(ADBTransportMessage::new(
            MessageCommand::Open,
            stream.local_id,
            0,
            &payload,
        )) {
            self.mux.lock().unwrap().remove(stream.local_id);
            return Err(e);
        }

        match stream.wait_ready(self.config.stream_open_timeout) {
            Ok(()) => Ok(stream),
            Err(_) => {
                self.mux.lock().unwrap().remove(stream.local_id);
                Err(RustADBError::OpenFailed)
            }
        }
    }

    /// Emits `CLSE` and removes the stream from the table. A stream the
    /// peer already closed (observed via an inbound `CLSE`) is just removed
    /// rather than re-sent a frame it cannot act on.
    pub fn close_stream(&self, stream: &Stream) {
        if !stream.is_closed() {
            let _ = self.send_frame(ADBTransportMessage::new(
                MessageCommand::Clse,
                stream.local_id,
                stream.remote_id(),
                &[],
            ));
        }
        self.mux.lock().unwrap().remove(stream.local_id);
    }

    /// Writes a `WRTE` on `stream`, observing the one-in-flight discipline:
    /// blocks until `write_ready`, clears it, then sends.
    pub fn write_to_stream(&self, stream: &Stream, payload: &[u8], timeout: Duration) -> Result<()> {
        stream.wait_write_ready(timeout)?;
        self.send_frame(ADBTransportMessage::new(
            MessageCommand::Write,
            stream.local_id,
            stream.remote_id(),
            payload,
        ))
    }

    /// Tears down the connection: marks every stream closed, wakes all
    /// waiters with `ErrConnectionLost`, and forces the socket shut so the
    /// Reader/Writer threads unblock.
    pub fn shutdown(&self) {
        *self.state.lock().unwrap() = ConnectionState::Disconnected;
        self.mux.lock().unwrap().fail_all();
        *self.writer_tx.lock().unwrap() = None;
        if let Some(sock) = self.shutdown_socket.lock().unwrap().take() {
            let _ = sock.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown();
        for handle in self.threads.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
    }
}
