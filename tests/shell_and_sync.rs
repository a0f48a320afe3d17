//! End-to-end tests against a hand-rolled fake device speaking just enough
//! of the wire protocol to exercise the handshake, shell channel, and SYNC
//! push path over a real loopback TCP socket.

use std::io::Write as _;
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use adb_client::device::{
    ADBTransportMessage, MessageCommand, MessageSubcommand, AUTH_SIGNATURE, AUTH_TOKEN,
};
use adb_client::{AdbClient, ClientConfig};
use byteorder::{LittleEndian, WriteBytesExt};

fn read_frame(sock: &mut TcpStream) -> ADBTransportMessage {
    ADBTransportMessage::decode(sock, 16 * 1024 * 1024).unwrap()
}

fn write_frame(sock: &mut TcpStream, msg: ADBTransportMessage) {
    msg.encode(sock).unwrap();
}

/// Runs the fake device's side of the AUTH handshake: token challenge,
/// accept whatever signature comes back (this test does not exercise
/// signature verification, only protocol shape), then CNXN success.
fn fake_handshake(sock: &mut TcpStream) {
    let cnxn = read_frame(sock);
    assert_eq!(cnxn.header().command(), MessageCommand::Cnxn);

    write_frame(
        sock,
        ADBTransportMessage::new(MessageCommand::Auth, AUTH_TOKEN, 0, &[0x42u8; 20]),
    );

    let sig = read_frame(sock);
    assert_eq!(sig.header().command(), MessageCommand::Auth);
    assert_eq!(sig.header().arg0(), AUTH_SIGNATURE);

    write_frame(
        sock,
        ADBTransportMessage::new(MessageCommand::Cnxn, 0x0100_0000, 4096, b"device::ro.product=test"),
    );
}

fn sync_subcommand_header(id: u32, arg: u32) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(8);
    bytes.write_u32::<LittleEndian>(id).unwrap();
    bytes.write_u32::<LittleEndian>(arg).unwrap();
    bytes
}

#[test]
fn handshake_and_shell_roundtrip() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (mut sock, _) = listener.accept().unwrap();
        fake_handshake(&mut sock);

        // OPEN "shell:"
        let open = read_frame(&mut sock);
        assert_eq!(open.header().command(), MessageCommand::Open);
        let local_id = open.header().arg0();
        let remote_id = 9001u32;
        write_frame(
            &mut sock,
            ADBTransportMessage::new(MessageCommand::Okay, remote_id, local_id, &[]),
        );

        // Command arrives as a single WRTE.
        let cmd = read_frame(&mut sock);
        assert_eq!(cmd.header().command(), MessageCommand::Write);
        assert_eq!(cmd.payload(), b"echo hi\n");
        write_frame(
            &mut sock,
            ADBTransportMessage::new(MessageCommand::Okay, remote_id, local_id, &[]),
        );

        // Reply with output, then close.
        write_frame(
            &mut sock,
            ADBTransportMessage::new(MessageCommand::Write, remote_id, local_id, b"hi\n"),
        );
        let ack = read_frame(&mut sock);
        assert_eq!(ack.header().command(), MessageCommand::Okay);

        write_frame(
            &mut sock,
            ADBTransportMessage::new(MessageCommand::Clse, remote_id, local_id, &[]),
        );
    });

    let data_dir = tempfile::tempdir().unwrap();
    let client = AdbClient::connect(addr, data_dir.path(), ClientConfig::default()).unwrap();

    let output = client
        .shell()
        .execute_sync("echo hi", Duration::from_secs(5))
        .unwrap();
    assert_eq!(output, b"hi\n");

    server.join().unwrap();
}

#[test]
fn sync_push_completes_with_stat_verification() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let contents = b"hello from a pushed file\n".to_vec();
    let contents_for_server = contents.clone();

    let server = thread::spawn(move || {
        let (mut sock, _) = listener.accept().unwrap();
        fake_handshake(&mut sock);

        // OPEN "sync:"
        let open = read_frame(&mut sock);
        assert_eq!(open.header().command(), MessageCommand::Open);
        let local_id = open.header().arg0();
        let remote_id = 9002u32;
        write_frame(
            &mut sock,
            ADBTransportMessage::new(MessageCommand::Okay, remote_id, local_id, &[]),
        );

        // SEND header: "SEND" | u32 path_len | path_bytes | u32 mode.
        let send = read_frame(&mut sock);
        assert_eq!(send.header().command(), MessageCommand::Write);
        let remote_path = "/sdcard/payload.txt";
        assert_eq!(
            &send.payload()[..4],
            &sync_subcommand_header(MessageSubcommand::Send as u32, 0)[..4]
        );
        assert_eq!(
            u32::from_le_bytes(send.payload()[4..8].try_into().unwrap()),
            remote_path.len() as u32
        );
        assert_eq!(&send.payload()[8..8 + remote_path.len()], remote_path.as_bytes());
        assert_eq!(
            u32::from_le_bytes(send.payload()[8 + remote_path.len()..].try_into().unwrap()),
            0o100644
        );
        write_frame(
            &mut sock,
            ADBTransportMessage::new(MessageCommand::Okay, remote_id, local_id, &[]),
        );

        // Single DATA chunk (file is smaller than one chunk).
        let data = read_frame(&mut sock);
        assert_eq!(
            &data.payload()[..4],
            &sync_subcommand_header(MessageSubcommand::Data as u32, 0)[..4]
        );
        assert_eq!(&data.payload()[8..], contents_for_server.as_slice());
        write_frame(
            &mut sock,
            ADBTransportMessage::new(MessageCommand::Okay, remote_id, local_id, &[]),
        );

        // DONE.
        let done = read_frame(&mut sock);
        assert_eq!(
            &done.payload()[..4],
            &sync_subcommand_header(MessageSubcommand::Done as u32, 0)[..4]
        );
        write_frame(
            &mut sock,
            ADBTransportMessage::new(MessageCommand::Okay, remote_id, local_id, &[]),
        );
        // Peer never sends a SYNC-level DONE acknowledgement payload; client
        // is expected to fall back to STAT.
        write_frame(
            &mut sock,
            ADBTransportMessage::new(MessageCommand::Clse, remote_id, local_id, &[]),
        );

        // Post-verify STAT on a fresh sync: stream.
        let open2 = read_frame(&mut sock);
        assert_eq!(open2.header().command(), MessageCommand::Open);
        let local_id2 = open2.header().arg0();
        let remote_id2 = 9003u32;
        write_frame(
            &mut sock,
            ADBTransportMessage::new(MessageCommand::Okay, remote_id2, local_id2, &[]),
        );
        let stat_req = read_frame(&mut sock);
        assert_eq!(
            &stat_req.payload()[..4],
            &sync_subcommand_header(MessageSubcommand::Stat as u32, 0)[..4]
        );
        write_frame(
            &mut sock,
            ADBTransportMessage::new(MessageCommand::Okay, remote_id2, local_id2, &[]),
        );
        let mut stat_response = b"STAT".to_vec();
        stat_response.write_u32::<LittleEndian>(0o100644).unwrap();
        stat_response
            .write_u32::<LittleEndian>(contents_for_server.len() as u32)
            .unwrap();
        stat_response.write_u32::<LittleEndian>(1_700_000_000).unwrap();
        write_frame(
            &mut sock,
            ADBTransportMessage::new(MessageCommand::Write, remote_id2, local_id2, &stat_response),
        );
        let ack = read_frame(&mut sock);
        assert_eq!(ack.header().command(), MessageCommand::Okay);
    });

    let data_dir = tempfile::tempdir().unwrap();
    let client = AdbClient::connect(addr, data_dir.path(), ClientConfig::default()).unwrap();

    let mut local_file = data_dir.path().to_path_buf();
    local_file.push("payload.txt");
    std::fs::write(&local_file, &contents).unwrap();

    let mut progress_calls = Vec::new();
    client
        .sync()
        .push(&local_file, "/sdcard/payload.txt", 0o100644, |sent, total| {
            progress_calls.push((sent, total));
        })
        .unwrap();

    assert_eq!(progress_calls.last(), Some(&(contents.len() as u64, contents.len() as u64)));
    server.join().unwrap();
}

#[test]
fn corrupted_magic_during_handshake_is_rejected() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (mut sock, _) = listener.accept().unwrap();
        let _cnxn = read_frame(&mut sock);
        // Raw garbage frame: valid-looking header with a deliberately wrong
        // magic value instead of `!command`.
        sock.write_all(&[0u8; 24]).unwrap();
    });

    let data_dir = tempfile::tempdir().unwrap();
    let err = AdbClient::connect(addr, data_dir.path(), ClientConfig::default()).unwrap_err();
    assert!(matches!(err, adb_client::RustADBError::BadMagic));

    server.join().unwrap();
}
