//! Tests for the TCP socket adapter against a real loopback connection.

use std::io::Write;
use std::net::{Shutdown, TcpListener, TcpStream};
use std::time::{Duration as StdDuration, Instant};

use wireline::{
    Socket, SocketCloseReason, SocketEvent, TcpSocket, VirtualClock, END_OF_STREAM_GRACE,
};

fn loopback_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).unwrap();
    let (server, _) = listener.accept().unwrap();
    (client, server)
}

/// Polls `read_chunk` until it yields an event or five seconds pass.
fn wait_for_event<C: wireline::Clock>(socket: &mut TcpSocket<C>) -> SocketEvent {
    let deadline = Instant::now() + StdDuration::from_secs(5);
    loop {
        if let Some(event) = socket.read_chunk().unwrap() {
            return event;
        }
        assert!(Instant::now() < deadline, "timed out waiting for socket event");
        std::thread::sleep(StdDuration::from_millis(5));
    }
}

#[test]
fn test_read_chunk_delivers_written_bytes() {
    let (mut client, server) = loopback_pair();
    let mut socket = TcpSocket::new(server).unwrap();

    client.write_all(b"over the wire").unwrap();
    client.flush().unwrap();

    let mut got = Vec::new();
    while got.len() < 13 {
        match wait_for_event(&mut socket) {
            SocketEvent::Data(data) => got.extend_from_slice(&data),
            SocketEvent::Closed(reason) => panic!("unexpected close: {reason:?}"),
        }
    }
    assert_eq!(&got, b"over the wire");
}

#[test]
fn test_write_reaches_peer() {
    use std::io::Read;

    let (mut client, server) = loopback_pair();
    let mut socket = TcpSocket::new(server).unwrap();

    socket.write(b"reply").unwrap();

    let mut buf = [0u8; 5];
    client
        .set_read_timeout(Some(StdDuration::from_secs(5)))
        .unwrap();
    client.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"reply");
}

#[test]
fn test_half_close_reported_once() {
    let (client, server) = loopback_pair();
    let mut socket = TcpSocket::new(server).unwrap();

    client.shutdown(Shutdown::Write).unwrap();

    assert_eq!(
        wait_for_event(&mut socket),
        SocketEvent::Closed(SocketCloseReason::PeerHangUp)
    );
    // The hang-up is edge-triggered; later polls stay quiet.
    assert_eq!(socket.read_chunk().unwrap(), None);
}

#[test]
fn test_half_open_socket_force_closed_after_grace() {
    let (client, server) = loopback_pair();
    let clock = VirtualClock::new();
    let mut socket = TcpSocket::with_clock(server, clock.clone()).unwrap();

    client.shutdown(Shutdown::Write).unwrap();
    assert_eq!(
        wait_for_event(&mut socket),
        SocketEvent::Closed(SocketCloseReason::PeerHangUp)
    );

    // Still writable during the grace window.
    socket.tick();
    socket.write(b"still open").unwrap();

    clock.advance(END_OF_STREAM_GRACE + std::time::Duration::from_secs(1));
    socket.tick();
    assert!(socket.write(b"too late").is_err());
}

#[test]
fn test_dispose_shuts_the_stream_down() {
    let (_client, server) = loopback_pair();
    let mut socket = TcpSocket::new(server).unwrap();

    socket.dispose();
    assert!(socket.write(b"x").is_err());
    assert_eq!(socket.read_chunk().unwrap(), None);
}
