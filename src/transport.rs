//! Framer/Transport: owns the TCP socket, exposes a small
//! `ADBMessageTransport` trait over it for the Auth Engine, and a
//! `TcpTransport` implementation used both standalone (during the
//! handshake) and, post-handshake, split into a dedicated read half and
//! write half for the Connection's Reader/Writer threads.

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use crate::constants::MAX_PAYLOAD_BYTES;
use crate::device::ADBTransportMessage;
use crate::error::Result;

/// Abstraction the Auth Engine drives the handshake over. Kept as a trait
/// (rather than hard-coding `TcpStream`) so tests can substitute an in-memory
/// pair of pipes without touching a real socket.
pub trait ADBMessageTransport: Send {
    fn read_message(&mut self) -> Result<ADBTransportMessage>;
    fn read_message_with_timeout(&mut self, timeout: Duration) -> Result<ADBTransportMessage>;
    fn write_message(&mut self, message: ADBTransportMessage) -> Result<()>;
}

/// A TCP-backed transport. Reads and writes go through buffered wrappers,
/// one 24-byte-header-plus-payload frame at a time; there is no partial
/// frame ever surfaced to a caller.
pub struct TcpTransport {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    max_payload_bytes: usize,
}

impl TcpTransport {
    pub fn connect(addr: SocketAddr, connect_timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect_timeout(&addr, connect_timeout)?;
        stream.set_nodelay(true)?;
        let write_half = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer: BufWriter::new(write_half),
            max_payload_bytes: MAX_PAYLOAD_BYTES,
        })
    }

    pub fn with_max_payload_bytes(mut self, max_payload_bytes: usize) -> Self {
        self.max_payload_bytes = max_payload_bytes;
        self
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.reader.get_ref().set_read_timeout(timeout)?;
        Ok(())
    }

    /// A clone of the underlying socket kept purely so the Connection can
    /// force a shutdown (unblocking the Reader/Writer threads) without
    /// owning either half directly.
    pub fn raw_clone(&self) -> Result<TcpStream> {
        Ok(self.reader.get_ref().try_clone()?)
    }

    /// Splits this transport into an owned read half and write half, each
    /// wrapping a clone of the same underlying socket. Used once, right
    /// after the handshake, to hand the read half to the Reader thread and
    /// the write half to the Writer thread.
    pub fn into_split(self) -> Result<(TcpTransport, TcpTransport)> {
        let read_stream = self.reader.into_inner();
        let write_stream = read_stream.try_clone()?;
        let max_payload_bytes = self.max_payload_bytes;

        let read_half = TcpTransport {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(write_stream.try_clone()?),
            max_payload_bytes,
        };
        let write_half = TcpTransport {
            reader: BufReader::new(write_stream.try_clone()?),
            writer: BufWriter::new(write_stream),
            max_payload_bytes,
        };
        Ok((read_half, write_half))
    }
}

impl ADBMessageTransport for TcpTransport {
    fn read_message(&mut self) -> Result<ADBTransportMessage> {
        ADBTransportMessage::decode(&mut self.reader, self.max_payload_bytes)
    }

    fn read_message_with_timeout(&mut self, timeout: Duration) -> Result<ADBTransportMessage> {
        self.set_read_timeout(Some(timeout))?;
        let result = ADBTransportMessage::decode(&mut self.reader, self.max_payload_bytes);
        self.set_read_timeout(None)?;
        result
    }

    fn write_message(&mut self, message: ADBTransportMessage) -> Result<()> {
        use std::io::Write;
        message.encode(&mut self.writer)?;
        self.writer.flush()?;
        Ok(())
    }
}
