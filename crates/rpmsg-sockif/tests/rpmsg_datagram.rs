//! Datagram-specific scenarios (spec.md §8 scenario 3): oversize rejection
//! and truncate-and-discard semantics on partial reads.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rpmsg_sockif::loopback::LoopbackBus;
use rpmsg_sockif::{Config, RpmsgDatagram, Substrate};

fn two_node_bus(server: &str, client: &str) -> (Arc<dyn Substrate>, Arc<dyn Substrate>) {
    let bus = LoopbackBus::new();
    (bus.cpu(server), bus.cpu(client))
}

#[test]
fn oversize_datagram_fails_with_too_big() {
    let (server_substrate, client_substrate) = two_node_bus("dgram-server", "dgram-client");

    let server_addr = rpmsg_sockif::SocketAddrRpmsg::new("", "dg").unwrap();
    let server = RpmsgDatagram::bind(server_substrate, server_addr, Config { recv_buf_size: 4096 }).unwrap();

    // Keep the server draining so the connect handshake can complete.
    let drain = thread::spawn(move || {
        let mut buf = [0u8; 64];
        let _ = server.recv_from(&mut buf);
    });

    let peer_addr = rpmsg_sockif::SocketAddrRpmsg::new("dgram-server", "dg").unwrap();
    let client = RpmsgDatagram::connect(client_substrate, peer_addr, Config { recv_buf_size: 4096 }).unwrap();

    let huge = vec![0xABu8; 8192];
    let err = client.send(&huge, false).unwrap_err();
    assert_eq!(err, rpmsg_sockif::Error::TooBig);

    let small = vec![0x11u8; 64];
    client.send(&small, false).unwrap();
    drain.join().unwrap();
}

#[test]
fn short_read_discards_remainder_without_corrupting_next_datagram() {
    let (server_substrate, client_substrate) = two_node_bus("dgram-server2", "dgram-client2");

    let server_addr = rpmsg_sockif::SocketAddrRpmsg::new("", "dg2").unwrap();
    let server = RpmsgDatagram::bind(server_substrate, server_addr, Config { recv_buf_size: 4096 }).unwrap();

    let peer_addr = rpmsg_sockif::SocketAddrRpmsg::new("dgram-server2", "dg2").unwrap();
    let client_thread = thread::spawn(move || {
        let client = RpmsgDatagram::connect(client_substrate, peer_addr, Config { recv_buf_size: 4096 }).unwrap();
        let first = vec![0xAAu8; 1024];
        client.send(&first, false).unwrap();
        // Give the server a moment to consume the first datagram with a
        // short buffer before the second one lands.
        thread::sleep(Duration::from_millis(50));
        client.send(b"ping", false).unwrap();
    });

    let mut short_buf = [0u8; 512];
    let (n, _from) = server.recv_from(&mut short_buf).unwrap();
    assert_eq!(n, 512);
    assert!(short_buf.iter().all(|&b| b == 0xAA));

    let mut next_buf = [0u8; 64];
    let (n2, _from2) = server.recv_from(&mut next_buf).unwrap();
    assert_eq!(n2, 4);
    assert_eq!(&next_buf[..4], b"ping");

    client_thread.join().unwrap();
}
