//! End-to-end scenarios run over the in-process [`loopback`] substrate,
//! exercising the socket interface the way a real `AF_RPMSG` caller would:
//! bind/listen/accept, full-duplex stream echo, and credential round-trip.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rpmsg_sockif::loopback::LoopbackBus;
use rpmsg_sockif::{Config, RpmsgListener, RpmsgStream, Substrate};

fn two_node_bus(server: &str, client: &str) -> (Arc<dyn Substrate>, Arc<dyn Substrate>, LoopbackBus) {
    let bus = LoopbackBus::new();
    let server_substrate: Arc<dyn Substrate> = bus.cpu(server);
    let client_substrate: Arc<dyn Substrate> = bus.cpu(client);
    (server_substrate, client_substrate, bus)
}

#[test]
fn bind_listen_accept_happy_path() {
    let (server_substrate, client_substrate, _bus) = two_node_bus("server", "client");

    let server_addr = rpmsg_sockif::SocketAddrRpmsg::new("", "svc").unwrap();
    let listener = RpmsgListener::bind(server_substrate, server_addr, Config::default()).unwrap();
    listener.listen(2).unwrap();

    let peer_addr = rpmsg_sockif::SocketAddrRpmsg::new("server", "svc").unwrap();
    let client_substrate2 = client_substrate.clone();
    let client_thread =
        thread::spawn(move || RpmsgStream::connect(client_substrate2, peer_addr, Config::default()).unwrap());

    let (server_stream, peer) = listener.accept().unwrap();
    let client_stream = client_thread.join().unwrap();

    assert!(peer.name.as_str().starts_with("svc:"), "accepted peer name was {}", peer.name.as_str());
    assert!(server_stream.is_connected());
    assert!(client_stream.is_connected());

    let cred = server_stream.peer_cred().unwrap();
    assert_eq!(cred, rpmsg_sockif::Credentials {
        pid: std::process::id(),
        uid: unsafe { libc::getuid() },
        gid: unsafe { libc::getgid() },
    });
}

#[test]
fn stream_echo_reassembles_exact_byte_sequence_then_reports_eof() {
    let (server_substrate, client_substrate, _bus) = two_node_bus("server2", "client2");

    let server_addr = rpmsg_sockif::SocketAddrRpmsg::new("", "echo").unwrap();
    let listener = RpmsgListener::bind(server_substrate, server_addr, Config { recv_buf_size: 8192 }).unwrap();
    listener.listen(1).unwrap();

    let peer_addr = rpmsg_sockif::SocketAddrRpmsg::new("server2", "echo").unwrap();
    let client_thread = thread::spawn(move || {
        let client = RpmsgStream::connect(client_substrate, peer_addr, Config { recv_buf_size: 8192 }).unwrap();
        let payload: Vec<u8> = (0..=255u8).cycle().take(65536).collect();
        let mut sent = 0;
        while sent < payload.len() {
            let n = client.send(&payload[sent..], false).unwrap();
            assert!(n > 0);
            sent += n;
        }
        drop(client);
    });

    let (server_stream, _peer) = listener.accept().unwrap();
    server_stream.set_read_timeout(Some(Duration::from_secs(10)));

    let expected: Vec<u8> = (0..=255u8).cycle().take(65536).collect();
    let mut received = Vec::with_capacity(expected.len());
    let mut buf = [0u8; 4096];
    loop {
        let n = server_stream.recv(&mut buf, false).unwrap();
        if n == 0 {
            break;
        }
        received.extend_from_slice(&buf[..n]);
        if received.len() >= expected.len() {
            break;
        }
    }

    client_thread.join().unwrap();
    assert_eq!(received, expected);

    // client dropped -> next recv observes EOF (peer hangup with no more data).
    let n = server_stream.recv(&mut buf, false).unwrap();
    assert_eq!(n, 0);
}
