//! The ADB wire message: 24-byte header plus payload, and the little-endian
//! framing/checksum rules that go with it. This is the Wire Codec component.

use std::fmt;
use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Result, RustADBError};

pub const AUTH_TOKEN: u32 = 1;
pub const AUTH_SIGNATURE: u32 = 2;
pub const AUTH_RSAPUBLICKEY: u32 = 3;

const HEADER_SIZE: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageCommand {
    Cnxn = 0x4e58_4e43,
    Auth = 0x4854_5541,
    Open = 0x4e45_504f,
    Okay = 0x5941_4b4f,
    Write = 0x4554_5257,
    Clse = 0x4553_4c43,
}

impl MessageCommand {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for MessageCommand {
    type Error = RustADBError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            v if v == MessageCommand::Cnxn as u32 => Ok(MessageCommand::Cnxn),
            v if v == MessageCommand::Auth as u32 => Ok(MessageCommand::Auth),
            v if v == MessageCommand::Open as u32 => Ok(MessageCommand::Open),
            v if v == MessageCommand::Okay as u32 => Ok(MessageCommand::Okay),
            v if v == MessageCommand::Write as u32 => Ok(MessageCommand::Write),
            v if v == MessageCommand::Clse as u32 => Ok(MessageCommand::Clse),
            _ => Err(RustADBError::UnexpectedCommand),
        }
    }
}

impl fmt::Display for MessageCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageCommand::Cnxn => "CNXN",
            MessageCommand::Auth => "AUTH",
            MessageCommand::Open => "OPEN",
            MessageCommand::Okay => "OKAY",
            MessageCommand::Write => "WRTE",
            MessageCommand::Clse => "CLSE",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ADBTransportMessageHeader {
    command: u32,
    arg0: u32,
    arg1: u32,
    data_length: u32,
    checksum: u32,
    magic: u32,
}

impl ADBTransportMessageHeader {
    pub fn command(&self) -> MessageCommand {
        // Validated on decode; encode-side callers only ever build valid
        // headers through `ADBTransportMessage::new`.
        MessageCommand::try_from(self.command).expect("header built with a valid command")
    }

    pub fn arg0(&self) -> u32 {
        self.arg0
    }

    pub fn arg1(&self) -> u32 {
        self.arg1
    }

    pub fn data_length(&self) -> u32 {
        self.data_length
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn magic(&self) -> u32 {
        self.magic
    }
}

/// A fully decoded ADB frame: header plus payload, already checksum- and
/// magic-validated.
#[derive(Debug, Clone)]
pub struct ADBTransportMessage {
    header: ADBTransportMessageHeader,
    payload: Vec<u8>,
}

fn payload_checksum(payload: &[u8]) -> u32 {
    payload.iter().fold(0u32, |acc, &b| acc.wrapping_add(b as u32))
}

impl ADBTransportMessage {
    pub fn new(command: MessageCommand, arg0: u32, arg1: u32, payload: &[u8]) -> Self {
        let command = command.as_u32();
        Self {
            header: ADBTransportMessageHeader {
                command,
                arg0,
                arg1,
                data_length: payload.len() as u32,
                checksum: payload_checksum(payload),
                magic: !command,
            },
            payload: payload.to_vec(),
        }
    }

    pub fn header(&self) -> &ADBTransportMessageHeader {
        &self.header
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Writes the 24-byte header followed by the payload, little-endian.
    pub fn encode<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_u32::<LittleEndian>(self.header.command)?;
        writer.write_u32::<LittleEndian>(self.header.arg0)?;
        writer.write_u32::<LittleEndian>(self.header.arg1)?;
        writer.write_u32::<LittleEndian>(self.header.data_length)?;
        writer.write_u32::<LittleEndian>(self.header.checksum)?;
        writer.write_u32::<LittleEndian>(self.header.magic)?;
        writer.write_all(&self.payload)?;
        Ok(())
    }

    /// Reads exactly one frame: 24-byte header, then `data_length` payload
    /// bytes (looped until full). Never returns a partially read message.
    pub fn decode<R: Read>(mut reader: R, max_payload_bytes: usize) -> Result<Self> {
        let command = reader.read_u32::<LittleEndian>()?;
        let arg0 = reader.read_u32::<LittleEndian>()?;
        let arg1 = reader.read_u32::<LittleEndian>()?;
        let data_length = reader.read_u32::<LittleEndian>()?;
        let checksum = reader.read_u32::<LittleEndian>()?;
        let magic = reader.read_u32::<LittleEndian>()?;

        if magic != !command {
            return Err(RustADBError::BadMagic);
        }

        if data_length as usize > max_payload_bytes {
            return Err(RustADBError::OversizedPayload(data_length as usize));
        }

        let mut payload = vec![0u8; data_length as usize];
        reader.read_exact(&mut payload)?;

        if payload_checksum(&payload) != checksum {
            return Err(RustADBError::Checksum);
        }

        let command = MessageCommand::try_from(command)?;

        Ok(Self {
            header: ADBTransportMessageHeader {
                command: command.as_u32(),
                arg0,
                arg1,
                data_length,
                checksum,
                magic,
            },
            payload,
        })
    }
}

#[allow(dead_code)]
const _HEADER_SIZE_ASSERT: usize = HEADER_SIZE;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let msg = ADBTransportMessage::new(MessageCommand::Write, 1, 2, b"hello world");
        let mut buf = Vec::new();
        msg.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + 11);

        let decoded = ADBTransportMessage::decode(&buf[..], 16 * 1024 * 1024).unwrap();
        assert_eq!(decoded.header().command(), MessageCommand::Write);
        assert_eq!(decoded.header().arg0(), 1);
        assert_eq!(decoded.header().arg1(), 2);
        assert_eq!(decoded.payload(), b"hello world");
    }

    #[test]
    fn empty_payload_roundtrip() {
        let msg = ADBTransportMessage::new(MessageCommand::Okay, 1, 2, &[]);
        let mut buf = Vec::new();
        msg.encode(&mut buf).unwrap();
        let decoded = ADBTransportMessage::decode(&buf[..], 16 * 1024 * 1024).unwrap();
        assert!(decoded.payload().is_empty());
    }

    #[test]
    fn rejects_bad_magic() {
        let msg = ADBTransportMessage::new(MessageCommand::Cnxn, 0, 0, b"abc");
        let mut buf = Vec::new();
        msg.encode(&mut buf).unwrap();
        buf[20] ^= 0xff; // corrupt magic
        let err = ADBTransportMessage::decode(&buf[..], 16 * 1024 * 1024).unwrap_err();
        assert!(matches!(err, RustADBError::BadMagic));
    }

    #[test]
    fn rejects_bad_checksum() {
        let msg = ADBTransportMessage::new(MessageCommand::Cnxn, 0, 0, b"abc");
        let mut buf = Vec::new();
        msg.encode(&mut buf).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xff; // corrupt payload after checksum was computed
        let err = ADBTransportMessage::decode(&buf[..], 16 * 1024 * 1024).unwrap_err();
        assert!(matches!(err, RustADBError::Checksum));
    }

    #[test]
    fn rejects_oversized_payload() {
        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>(MessageCommand::Write.as_u32()).unwrap();
        buf.write_u32::<LittleEndian>(0).unwrap();
        buf.write_u32::<LittleEndian>(0).unwrap();
        buf.write_u32::<LittleEndian>(17 * 1024 * 1024).unwrap();
        buf.write_u32::<LittleEndian>(0).unwrap();
        buf.write_u32::<LittleEndian>(!MessageCommand::Write.as_u32()).unwrap();
        let err = ADBTransportMessage::decode(&buf[..], 16 * 1024 * 1024).unwrap_err();
        assert!(matches!(err, RustADBError::OversizedPayload(_)));
    }

    #[test]
    fn checksum_matches_sum_of_bytes() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let expected: u32 = payload.iter().map(|&b| b as u32).sum();
        assert_eq!(payload_checksum(&payload), expected);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    const COMMANDS: [MessageCommand; 6] = [
        MessageCommand::Cnxn,
        MessageCommand::Auth,
        MessageCommand::Open,
        MessageCommand::Okay,
        MessageCommand::Write,
        MessageCommand::Clse,
    ];

    fn any_command() -> impl Strategy<Value = MessageCommand> {
        (0..COMMANDS.len()).prop_map(|i| COMMANDS[i])
    }

    proptest! {
        /// Spec §8 item 1: `encode ∘ decode = identity` for every well-formed
        /// message whose payload fits under the codec's cap.
        #[test]
        fn encode_decode_is_identity(
            command in any_command(),
            arg0 in any::<u32>(),
            arg1 in any::<u32>(),
            payload in proptest::collection::vec(any::<u8>(), 0..4096),
        ) {
            let msg = ADBTransportMessage::new(command, arg0, arg1, &payload);
            let mut buf = Vec::new();
            msg.encode(&mut buf).unwrap();

            let decoded = ADBTransportMessage::decode(&buf[..], 16 * 1024 * 1024).unwrap();
            prop_assert_eq!(decoded.header().command(), command);
            prop_assert_eq!(decoded.header().arg0(), arg0);
            prop_assert_eq!(decoded.header().arg1(), arg1);
            prop_assert_eq!(decoded.payload(), payload.as_slice());
        }

        /// Spec §8 item 2: the checksum is always the byte-sum of the
        /// payload, and `magic == !command`, for any payload and command.
        #[test]
        fn checksum_and_magic_hold_for_arbitrary_payload(
            command in any_command(),
            payload in proptest::collection::vec(any::<u8>(), 0..4096),
        ) {
            let msg = ADBTransportMessage::new(command, 0, 0, &payload);
            let expected_checksum = payload_checksum(&payload);
            prop_assert_eq!(msg.header().checksum(), expected_checksum);
            prop_assert_eq!(msg.header().magic(), !command.as_u32());
        }
    }
}
