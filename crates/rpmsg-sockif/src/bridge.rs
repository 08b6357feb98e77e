//! Endpoint bridge (spec.md §4.2): the callback-driven glue between a
//! [`crate::substrate::Substrate`] and a [`Connection`]. Four small types
//! stand in for the original driver's `rpmsg_ept_cb`/`rpmsg_device_created`/
//! `rpmsg_device_destroyed`/`rpmsg_ns_match`/`rpmsg_ns_bind` callback
//! quintet, each owning an `Arc<Connection>` instead of a raw `void *priv`
//! back-reference.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::addr::{SERVICE_PREFIX, SocketAddrRpmsg};
use crate::connection::{Connection, Credentials, SocketKind};
use crate::flowcontrol;
use crate::frame::{DATA_HEADER_LEN, Frame, SyncFrame};
use crate::substrate::{DeviceWatcher, Endpoint, EndpointOwner, NameServiceServer, Substrate};

/// Sends our SYNC handshake frame over a freshly created endpoint, advertising
/// our receive-buffer capacity and local credentials. Used by both the
/// connecting client and the accepting server, each right after it creates
/// its own half of the channel — this port's [`Substrate::create_endpoint`]
/// returns a usable endpoint synchronously, which is where the original
/// driver's separate "name-service bound" continuation collapses to here.
pub fn send_sync(endpoint: &dyn Endpoint, conn: &Connection) {
    let cred = conn.local_credentials();
    let sync = SyncFrame { size: conn.config().recv_buf_size, pid: cred.pid, uid: cred.uid, gid: cred.gid };
    let bytes = sync.encode();
    let result = endpoint.send_with(&mut |buf| {
        buf[..bytes.len()].copy_from_slice(&bytes);
        bytes.len()
    });
    if let Err(err) = result {
        warn!(%err, "failed to send SYNC frame");
    }
}

/// Sends a standalone zero-length DATA frame carrying only the updated
/// `recvpos`, used to re-advertise credit once we've consumed more than half
/// of the peer's window without otherwise having data to send back.
fn send_standalone_ack(endpoint: &dyn Endpoint, recvpos: u32) {
    let result = endpoint.send_with(&mut |buf| {
        if buf.len() < DATA_HEADER_LEN {
            return 0;
        }
        crate::frame::DataHeader { pos: recvpos, len: 0 }.encode_into(&mut buf[..DATA_HEADER_LEN]);
        DATA_HEADER_LEN
    });
    if let Err(err) = result {
        debug!(%err, "failed to send standalone ack");
    }
}

/// Implements [`EndpointOwner`] for a single connection: every inbound frame
/// for that connection's endpoint, and the unbind notification, funnel
/// through here. Shared by clients, listeners' accepted children, and
/// datagram sockets alike — the dispatch itself doesn't care about role.
pub struct ConnDispatcher {
    pub conn: Arc<Connection>,
}

impl EndpointOwner for ConnDispatcher {
    fn on_message(&self, data: &[u8]) {
        let frame = match Frame::parse(data) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%err, "dropping malformed frame");
                return;
            }
        };

        match frame {
            Frame::Sync(sync) => {
                self.conn.set_peer_credentials(Credentials { pid: sync.pid, uid: sync.uid, gid: sync.gid });
                self.conn.mark_connected(sync.size);
            }
            Frame::Data { header, payload } => {
                self.conn.apply_ack(header.pos);
                if payload.is_empty() {
                    return;
                }
                // spec.md §4.2: `len` must equal the stream payload length or
                // the datagram length plus its 4-byte prefix; anything else
                // is a protocol violation and the frame is dropped rather
                // than delivered.
                if self.conn.kind == SocketKind::Datagram && crate::frame::decode_datagram(payload).is_err() {
                    warn!(len = payload.len(), "dropping datagram frame with inconsistent length prefix");
                    return;
                }
                let (recvpos, lastpos, own_recv_capacity) = self.conn.deliver(payload);
                if flowcontrol::ack_owed(recvpos, lastpos, own_recv_capacity) {
                    if let Some(endpoint) = self.conn.endpoint() {
                        send_standalone_ack(endpoint.as_ref(), recvpos);
                        self.conn.mark_ack_sent(recvpos);
                    }
                }
            }
        }
    }

    fn on_unbind(&self) {
        debug!("endpoint unbound by peer");
        self.conn.mark_unbound();
    }
}

/// Registered by a connecting client (spec.md §4.2 "device-created /
/// device-destroyed hooks"). On the target CPU coming up, creates our half
/// of the channel and sends our SYNC; on it going down, tears the channel
/// down and wakes any waiter with reset semantics.
pub struct ClientDeviceWatcher {
    pub conn: Arc<Connection>,
    pub ept_name: String,
}

impl DeviceWatcher for ClientDeviceWatcher {
    fn on_device_created(&self, substrate: &dyn Substrate, cpu: &str) {
        let Some(peer) = self.conn.peer_addr() else { return };
        if peer.cpu.as_str() != cpu && !peer.cpu.is_empty() {
            return;
        }
        if self.conn.endpoint().is_some() {
            return;
        }

        let owner: Arc<dyn EndpointOwner> = Arc::new(ConnDispatcher { conn: self.conn.clone() });
        match substrate.create_endpoint(&self.ept_name, cpu, None, owner) {
            Ok(endpoint) => {
                send_sync(endpoint.as_ref(), &self.conn);
                self.conn.set_endpoint(endpoint);
            }
            Err(err) => warn!(%err, cpu, "failed to create client endpoint"),
        }
    }

    fn on_device_destroyed(&self, cpu: &str) {
        let Some(peer) = self.conn.peer_addr() else { return };
        if peer.cpu.as_str() != cpu && !peer.cpu.is_empty() {
            return;
        }
        if let Some(endpoint) = self.conn.endpoint() {
            endpoint.destroy();
        }
        self.conn.mark_unbound();
    }
}

/// Registered on an accepted child connection only (spec.md §4.4 `accept`:
/// "register only the device-destroyed callback on it" — its endpoint
/// already exists, created during [`ListenerNameService::bind`]).
pub struct ChildDeviceWatcher {
    pub conn: Arc<Connection>,
}

impl DeviceWatcher for ChildDeviceWatcher {
    fn on_device_created(&self, _substrate: &dyn Substrate, _cpu: &str) {}

    fn on_device_destroyed(&self, cpu: &str) {
        let Some(peer) = self.conn.peer_addr() else { return };
        if peer.cpu.as_str() != cpu {
            return;
        }
        if let Some(endpoint) = self.conn.endpoint() {
            endpoint.destroy();
        }
        self.conn.mark_unbound();
    }
}

/// Registered by a listening socket (spec.md §4.2 "Name-service match/bind").
/// `matches` decides whether an incoming bind request names our service;
/// `bind` builds the accepted child connection and enqueues it.
pub struct ListenerNameService {
    pub listener: Arc<Connection>,
    pub service_name: String,
    pub bound_cpu: Option<String>,
}

impl NameServiceServer for ListenerNameService {
    fn matches(&self, cpu: &str, name: &str) -> bool {
        let prefixed = format!("{SERVICE_PREFIX}{}", self.service_name);
        if !name.starts_with(&prefixed) {
            return false;
        }
        match &self.bound_cpu {
            Some(bound) if !bound.is_empty() => bound == cpu,
            _ => true,
        }
    }

    fn bind(&self, substrate: &dyn Substrate, cpu: &str, ept_name: &str, dest: u32) {
        let child = Connection::new(SocketKind::Stream, self.listener.config());

        let remote_name = ept_name.strip_prefix(SERVICE_PREFIX).unwrap_or(ept_name);
        let Ok(peer_addr) = SocketAddrRpmsg::new(cpu, remote_name) else {
            warn!(cpu, ept_name, "rejecting ns-bind with unrepresentable peer address");
            return;
        };
        child.set_peer_addr(peer_addr);

        let Ok(local_addr) = SocketAddrRpmsg::new(&substrate.local_cpu_name(), &self.service_name) else {
            return;
        };
        child.set_local_addr(local_addr);

        let owner: Arc<dyn EndpointOwner> = Arc::new(ConnDispatcher { conn: child.clone() });
        let endpoint = match substrate.create_endpoint(ept_name, cpu, Some(dest), owner) {
            Ok(endpoint) => endpoint,
            Err(err) => {
                warn!(%err, cpu, ept_name, "failed to create accepted endpoint");
                return;
            }
        };
        child.set_endpoint(endpoint.clone());

        send_sync(endpoint.as_ref(), &child);

        if let Err(err) = self.listener.push_pending(child) {
            debug!(%err, "accept backlog full, rejecting peer");
            endpoint.destroy();
        }
    }
}

/// Registered by a bound datagram socket (spec.md §4.4 `bind`: datagram
/// sockets have no `listen`/`accept` pair, so `bind` itself must make the
/// socket reachable). Unlike [`ListenerNameService`], there is no backlog or
/// child connection — the one bound [`Connection`] becomes connected in
/// place the first time a peer's `connect` reaches it.
pub struct DatagramNameService {
    pub conn: Arc<Connection>,
    pub service_name: String,
    pub bound_cpu: Option<String>,
}

impl NameServiceServer for DatagramNameService {
    fn matches(&self, cpu: &str, name: &str) -> bool {
        let prefixed = format!("{SERVICE_PREFIX}{}", self.service_name);
        if !name.starts_with(&prefixed) {
            return false;
        }
        match &self.bound_cpu {
            Some(bound) if !bound.is_empty() => bound == cpu,
            _ => true,
        }
    }

    fn bind(&self, substrate: &dyn Substrate, cpu: &str, ept_name: &str, dest: u32) {
        if self.conn.endpoint().is_some() {
            debug!(cpu, ept_name, "datagram socket already paired, ignoring connect");
            return;
        }

        let remote_name = ept_name.strip_prefix(SERVICE_PREFIX).unwrap_or(ept_name);
        let Ok(peer_addr) = SocketAddrRpmsg::new(cpu, remote_name) else {
            warn!(cpu, ept_name, "rejecting ns-bind with unrepresentable peer address");
            return;
        };
        self.conn.set_peer_addr(peer_addr);

        let owner: Arc<dyn EndpointOwner> = Arc::new(ConnDispatcher { conn: self.conn.clone() });
        let endpoint = match substrate.create_endpoint(ept_name, cpu, Some(dest), owner) {
            Ok(endpoint) => endpoint,
            Err(err) => {
                warn!(%err, cpu, ept_name, "failed to create datagram endpoint");
                return;
            }
        };
        self.conn.set_endpoint(endpoint.clone());
        send_sync(endpoint.as_ref(), &self.conn);
    }
}

/// Unregisters the callback set appropriate to a connection's role, mirroring
/// `rpmsg_socket_close`'s role-dependent teardown (spec.md §4.4 `close`).
pub enum RegisteredCallbacks {
    None,
    Client { substrate: Arc<dyn Substrate>, watcher_id: crate::substrate::WatcherId },
    Listening { substrate: Arc<dyn Substrate>, watcher_id: crate::substrate::WatcherId },
    Accepted { substrate: Arc<dyn Substrate>, watcher_id: crate::substrate::WatcherId },
    DatagramBound { substrate: Arc<dyn Substrate>, watcher_id: crate::substrate::WatcherId },
}

impl RegisteredCallbacks {
    pub fn unregister(&self) {
        match self {
            RegisteredCallbacks::None => {}
            RegisteredCallbacks::Client { substrate, watcher_id }
            | RegisteredCallbacks::Accepted { substrate, watcher_id } => {
                substrate.unregister_device_watcher(*watcher_id);
            }
            RegisteredCallbacks::Listening { substrate, watcher_id }
            | RegisteredCallbacks::DatagramBound { substrate, watcher_id } => {
                substrate.unregister_name_service(*watcher_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Config;
    use crate::frame::Frame;

    #[test]
    fn malformed_datagram_length_prefix_is_dropped_not_delivered() {
        let conn = Connection::new(SocketKind::Datagram, Config::default());
        let dispatcher = ConnDispatcher { conn: conn.clone() };

        // dglen prefix claims 10 bytes but only 3 follow.
        let mut bad_payload = 10u32.to_le_bytes().to_vec();
        bad_payload.extend_from_slice(b"abc");
        let frame = Frame::encode_data(0, &bad_payload);

        dispatcher.on_message(&frame);

        assert_eq!(conn.recv_available(), 0);
    }

    #[test]
    fn well_formed_datagram_is_delivered() {
        let conn = Connection::new(SocketKind::Datagram, Config::default());
        let dispatcher = ConnDispatcher { conn: conn.clone() };

        let datagram = crate::frame::encode_datagram(b"hi");
        let frame = Frame::encode_data(0, &datagram);

        dispatcher.on_message(&frame);

        assert_eq!(conn.recv_available(), datagram.len());
    }
}
