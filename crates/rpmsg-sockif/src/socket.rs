//! Socket interface (spec.md §4.4): the three public handles this crate
//! exposes — [`RpmsgListener`], [`RpmsgStream`], [`RpmsgDatagram`] — each a
//! thin role-specific wrapper around a shared [`Socket`] that plays the part
//! of `struct socket` + `sock_intf_s`'s vtable dispatch, collapsed into plain
//! methods the way `flux_network::tcp::{TcpConnector, TcpStream}` collapse
//! the same surface for TCP.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::addr::{SERVICE_PREFIX, SocketAddrRpmsg, next_suffix};
use crate::bridge::{
    ChildDeviceWatcher, ClientDeviceWatcher, DatagramNameService, ListenerNameService, RegisteredCallbacks,
};
use crate::connection::{Config, Connection, Credentials, Role, SocketKind};
use crate::error::{Error, Result};
use crate::flowcontrol;
use crate::frame::{DATA_HEADER_LEN, DataHeader, encode_datagram};
use crate::poll::{PollEvents, PollSlot, PollWaiter};
use crate::substrate::Substrate;

/// `SO_PEERCRED`-equivalent and friends; the only `getsockopt` surface
/// spec.md §6 names. Modeled as a closed enum rather than the original
/// integer `level`/`optname` pair, per REDESIGN FLAGS.
#[derive(Clone, Copy, Debug)]
pub enum SockOpt {
    PeerCred,
}

/// `ioctl` request surface spec.md §6 names.
#[derive(Clone, Copy, Debug)]
pub enum IoctlRequest {
    /// `FIONREAD` — bytes currently readable.
    FionRead,
    /// `FIONSPACE` — bytes currently writable.
    FionSpace,
    /// `FIOC_FILEPATH` — diagnostic path string.
    FilePath,
}

#[derive(Clone, Debug)]
pub enum IoctlResponse {
    Int(i32),
    Path(String),
}

/// Shared state and vtable-style operations behind all three public socket
/// types. Not exported directly — always reached through
/// [`RpmsgListener`]/[`RpmsgStream`]/[`RpmsgDatagram`], the way a caller
/// never touches `sock_intf_s` directly either.
struct Socket {
    kind: SocketKind,
    substrate: Arc<dyn Substrate>,
    conn: Arc<Connection>,
    callbacks: Mutex<RegisteredCallbacks>,
    recv_timeout: Mutex<Option<Duration>>,
    send_timeout: Mutex<Option<Duration>>,
}

impl Socket {
    fn new(kind: SocketKind, substrate: Arc<dyn Substrate>, config: Config) -> Self {
        Self {
            kind,
            substrate,
            conn: Connection::new(kind, config),
            callbacks: Mutex::new(RegisteredCallbacks::None),
            recv_timeout: Mutex::new(None),
            send_timeout: Mutex::new(None),
        }
    }

    fn from_connection(substrate: Arc<dyn Substrate>, conn: Arc<Connection>) -> Self {
        let kind = conn.kind;
        Self {
            kind,
            substrate,
            conn,
            callbacks: Mutex::new(RegisteredCallbacks::None),
            recv_timeout: Mutex::new(None),
            send_timeout: Mutex::new(None),
        }
    }

    fn set_nonblocking(&self, value: bool) {
        self.conn.set_nonblocking(value);
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) {
        *self.recv_timeout.lock().unwrap() = timeout;
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) {
        *self.send_timeout.lock().unwrap() = timeout;
    }

    fn read_timeout(&self) -> Option<Duration> {
        *self.recv_timeout.lock().unwrap()
    }

    fn write_timeout(&self) -> Option<Duration> {
        *self.send_timeout.lock().unwrap()
    }

    /// For stream sockets, `bind` only records the address — reachability
    /// comes later from `listen`. Datagram sockets have no `listen`/`accept`
    /// pair, so `bind` registers the name-service match itself, the way
    /// a UDP-style socket is reachable as soon as it's bound.
    fn bind(&self, addr: SocketAddrRpmsg) -> Result<()> {
        if !matches!(self.conn.role(), Role::Unbound) {
            return Err(Error::Invalid);
        }
        self.conn.set_local_addr(addr);
        self.conn.set_role(Role::Bound);

        if self.kind == SocketKind::Datagram {
            let ns = Arc::new(DatagramNameService {
                conn: self.conn.clone(),
                service_name: addr.name.as_str().to_string(),
                bound_cpu: if addr.is_any_cpu() { None } else { Some(addr.cpu.as_str().to_string()) },
            });
            let watcher_id = self.substrate.register_name_service(ns);
            *self.callbacks.lock().unwrap() =
                RegisteredCallbacks::DatagramBound { substrate: self.substrate.clone(), watcher_id };
        }
        Ok(())
    }

    fn listen(&self, backlog: i32) -> Result<()> {
        if !matches!(self.conn.role(), Role::Bound) {
            return Err(Error::Invalid);
        }
        if self.kind != SocketKind::Stream {
            return Err(Error::NotSupported);
        }
        if backlog <= 0 {
            return Err(Error::Invalid);
        }

        let local = self.conn.local_addr();
        let ns = Arc::new(ListenerNameService {
            listener: self.conn.clone(),
            service_name: local.name.as_str().to_string(),
            bound_cpu: if local.is_any_cpu() { None } else { Some(local.cpu.as_str().to_string()) },
        });
        let watcher_id = self.substrate.register_name_service(ns);
        *self.callbacks.lock().unwrap() =
            RegisteredCallbacks::Listening { substrate: self.substrate.clone(), watcher_id };

        self.conn.set_role(Role::Listening { backlog });
        Ok(())
    }

    fn accept(&self) -> Result<Arc<Connection>> {
        let timeout = self.read_timeout();
        let child = self.conn.accept(timeout)?;
        child.set_role(Role::Accepted);

        if child.send_window().0 == 0 {
            child.wait_for_sync(timeout)?;
        }

        Ok(child)
    }

    /// Builds the client-side endpoint name and, for stream sockets, the
    /// suffix id appended to make repeated connects to the same service
    /// unique, matching `rpmsg_socket_setaddr`'s `suffix` flag.
    fn client_endpoint_name(&self, peer: &SocketAddrRpmsg) -> (String, String) {
        if self.kind == SocketKind::Stream {
            let suffix = next_suffix();
            let ept_name = format!("{SERVICE_PREFIX}{}:{suffix:x}", peer.name.as_str());
            let nameid = format!(":{suffix:x}");
            (ept_name, nameid)
        } else {
            (format!("{SERVICE_PREFIX}{}", peer.name.as_str()), String::new())
        }
    }

    fn connect(&self, peer: SocketAddrRpmsg, dontwait: bool) -> Result<()> {
        if self.conn.is_connected() {
            return Err(Error::AlreadyConnected);
        }

        let (ept_name, nameid) = self.client_endpoint_name(&peer);
        self.conn.set_peer_addr(peer);
        self.conn.set_nameid(nameid);
        if matches!(self.conn.role(), Role::Unbound | Role::Bound) {
            self.conn.set_role(Role::Client);
        }

        let watcher = Arc::new(ClientDeviceWatcher { conn: self.conn.clone(), ept_name });
        let watcher_id = self.substrate.register_device_watcher(peer.cpu.as_str(), watcher);
        *self.callbacks.lock().unwrap() =
            RegisteredCallbacks::Client { substrate: self.substrate.clone(), watcher_id };

        if self.conn.send_window().0 != 0 {
            return Ok(());
        }
        if dontwait || self.conn.is_nonblocking() {
            return Err(Error::InProgress);
        }

        match self.conn.wait_for_sync(self.read_timeout()) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.callbacks.lock().unwrap().unregister();
                Err(err)
            }
        }
    }

    fn ensure_connected_endpoint(&self) -> Result<Arc<dyn crate::substrate::Endpoint>> {
        if self.conn.is_hung_up() {
            return Err(Error::ConnectionReset);
        }
        self.conn.endpoint().ok_or(Error::NotConnected)
    }

    /// Sends `data` with `dontwait` forced onto the connection for the
    /// duration of the call — temporarily overriding the socket's own
    /// non-blocking setting the same way `MSG_DONTWAIT` overrides `O_NONBLOCK`
    /// for a single call rather than changing the fd's mode.
    fn send_stream(&self, data: &[u8], dontwait: bool) -> Result<usize> {
        let saved_nonblocking = self.conn.is_nonblocking();
        if dontwait {
            self.conn.set_nonblocking(true);
        }
        let timeout = self.write_timeout();
        let result = self.send_stream_inner(data, timeout);
        if dontwait {
            self.conn.set_nonblocking(saved_nonblocking);
        }
        result
    }

    fn send_stream_inner(&self, data: &[u8], timeout: Option<Duration>) -> Result<usize> {
        let mut sent = 0usize;

        while sent < data.len() {
            if self.conn.is_hung_up() {
                if sent > 0 {
                    return Ok(sent);
                }
                return Err(Error::ConnectionReset);
            }

            match self.conn.reserve_send(1, timeout) {
                Ok(_) => {}
                Err(err) => {
                    if sent > 0 {
                        return Ok(sent);
                    }
                    return Err(err);
                }
            }

            let endpoint = self.ensure_connected_endpoint()?;
            let (sendsize, sendpos, ackpos) = self.conn.send_window();
            let space = flowcontrol::space(sendsize, sendpos, ackpos) as usize;
            if space == 0 {
                continue;
            }
            let header_room = endpoint.tx_capacity().saturating_sub(DATA_HEADER_LEN);
            let block = (data.len() - sent).min(space).min(header_room);
            if block == 0 {
                continue;
            }

            let chunk = &data[sent..sent + block];
            let recvpos = self.conn.recvpos();
            let snapshot = self.conn.send_snapshot();
            self.conn.advance_sendpos(block as u32);

            match send_data_frame(endpoint.as_ref(), recvpos, chunk) {
                Ok(()) => {
                    self.conn.mark_ack_sent(recvpos);
                    sent += block;
                }
                Err(err) => {
                    self.conn.restore_sendpos(snapshot);
                    if sent > 0 {
                        return Ok(sent);
                    }
                    return Err(err);
                }
            }
        }

        Ok(sent)
    }

    fn send_datagram(&self, data: &[u8], dontwait: bool) -> Result<usize> {
        if !self.conn.is_connected() {
            return Err(Error::NotConnected);
        }
        let (sendsize, _, _) = self.conn.send_window();
        let total = data.len() + DATA_HEADER_LEN + 4;
        if total as u32 > sendsize {
            return Err(Error::TooBig);
        }

        let saved_nonblocking = self.conn.is_nonblocking();
        if dontwait {
            self.conn.set_nonblocking(true);
        }
        let timeout = self.write_timeout();
        let need = (total - DATA_HEADER_LEN) as u32;
        let reserved = self.conn.reserve_send(need, timeout);
        if dontwait {
            self.conn.set_nonblocking(saved_nonblocking);
        }
        reserved?;

        let endpoint = self.ensure_connected_endpoint()?;
        let (sendsize, sendpos, ackpos) = self.conn.send_window();
        let space = flowcontrol::space(sendsize, sendpos, ackpos) as usize;
        let tx_cap = endpoint.tx_capacity();
        let clamped_total = total.min(space + DATA_HEADER_LEN).min(tx_cap);
        let len = clamped_total.saturating_sub(DATA_HEADER_LEN + 4);
        let body = &data[..len.min(data.len())];
        let payload = encode_datagram(body);

        let recvpos = self.conn.recvpos();
        let snapshot = self.conn.send_snapshot();
        self.conn.advance_sendpos(payload.len() as u32);

        match send_data_frame(endpoint.as_ref(), recvpos, &payload) {
            Ok(()) => {
                self.conn.mark_ack_sent(recvpos);
                Ok(body.len())
            }
            Err(err) => {
                self.conn.restore_sendpos(snapshot);
                Err(err)
            }
        }
    }

    fn recv_stream(&self, out: &mut [u8], dontwait: bool) -> Result<usize> {
        let saved_nonblocking = self.conn.is_nonblocking();
        if dontwait {
            self.conn.set_nonblocking(true);
        }
        let timeout = self.read_timeout();
        let result = self.conn.recv_into(out, timeout);
        if dontwait {
            self.conn.set_nonblocking(saved_nonblocking);
        }
        let n = result?;
        if n > 0 {
            self.maybe_send_ack();
        }
        Ok(n)
    }

    fn recv_datagram(&self, out: &mut [u8]) -> Result<(usize, Option<SocketAddrRpmsg>)> {
        let timeout = self.read_timeout();
        let n = self.conn.recv_datagram(out, timeout)?;
        if n > 0 {
            self.maybe_send_ack();
        }
        Ok((n, self.conn.peer_addr()))
    }

    /// After a successful receive, re-advertise credit if we've consumed
    /// more than half our own receive-buffer capacity since the last ack
    /// (spec.md §4.3).
    fn maybe_send_ack(&self) {
        let recvpos = self.conn.recvpos();
        let own_recv_capacity = self.conn.config().recv_buf_size;
        let lastpos = self.conn.ack_lastpos();
        if flowcontrol::ack_owed(recvpos, lastpos, own_recv_capacity) {
            if let Some(endpoint) = self.conn.endpoint() {
                let result = endpoint.send_with(&mut |buf| {
                    if buf.len() < DATA_HEADER_LEN {
                        return 0;
                    }
                    DataHeader { pos: recvpos, len: 0 }.encode_into(&mut buf[..DATA_HEADER_LEN]);
                    DATA_HEADER_LEN
                });
                if result.is_ok() {
                    self.conn.mark_ack_sent(recvpos);
                }
            }
        }
    }

    fn poll_events(&self) -> Result<PollEvents> {
        match self.conn.role() {
            Role::Listening { .. } => {
                Ok(if self.conn.has_pending() { PollEvents::READABLE } else { PollEvents::NONE })
            }
            Role::ListenClosed => Err(Error::ConnectionReset),
            _ => {
                let mut events = PollEvents::NONE;
                if self.conn.is_hung_up() {
                    events |= PollEvents::HANGUP;
                }
                if self.conn.is_connected() {
                    let (sendsize, sendpos, ackpos) = self.conn.send_window();
                    if flowcontrol::space(sendsize, sendpos, ackpos) > 0 {
                        events |= PollEvents::WRITABLE;
                    }
                    if self.conn.recv_available() > 0 {
                        events |= PollEvents::READABLE;
                    }
                }
                Ok(events)
            }
        }
    }

    fn poll_register(&self, waiter: Arc<dyn PollWaiter>) -> Result<(PollSlot, PollEvents)> {
        let events = self.poll_events()?;
        let slot = self.conn.poll.register(waiter).ok_or(Error::Busy)?;
        Ok((slot, events))
    }

    fn poll_unregister(&self, slot: PollSlot) {
        self.conn.poll.unregister(slot);
    }

    fn ioctl(&self, req: IoctlRequest) -> Result<IoctlResponse> {
        match req {
            IoctlRequest::FionRead => Ok(IoctlResponse::Int(self.conn.recv_available() as i32)),
            IoctlRequest::FionSpace => {
                let (sendsize, sendpos, ackpos) = self.conn.send_window();
                Ok(IoctlResponse::Int(flowcontrol::space(sendsize, sendpos, ackpos) as i32))
            }
            IoctlRequest::FilePath => Ok(IoctlResponse::Path(self.diag_path())),
        }
    }

    fn getsockopt(&self, opt: SockOpt) -> Result<Credentials> {
        match opt {
            SockOpt::PeerCred => self.conn.peer_credentials().ok_or(Error::NotConnected),
        }
    }

    fn getsockname(&self) -> SocketAddrRpmsg {
        let addr = self.conn.local_addr();
        SocketAddrRpmsg::new(&self.substrate.local_cpu_name(), addr.name.as_str()).unwrap_or(addr)
    }

    fn getconnname(&self) -> Option<SocketAddrRpmsg> {
        self.conn.peer_addr()
    }

    /// `FIOC_FILEPATH`: reproduces `rpmsg_socket_path`'s two layouts
    /// verbatim — "server" (`conn->backlog != 0`, i.e. any non-client role)
    /// renders `<svc><suffix>` inside the local bracket, "client" renders it
    /// inside the peer bracket.
    fn diag_path(&self) -> String {
        let local_cpu = self.substrate.local_cpu_name();
        let peer = self.conn.peer_addr().unwrap_or_default();
        let nameid = self.conn.nameid();
        let is_server = !matches!(self.conn.role(), Role::Client | Role::Unbound | Role::Bound);
        format_diag_path(&local_cpu, &peer, &nameid, is_server)
    }

    fn close(&self) {
        if self.conn.release() > 0 {
            return;
        }
        if matches!(self.conn.role(), Role::Listening { .. }) {
            self.conn.set_role(Role::ListenClosed);
        }
        self.callbacks.lock().unwrap().unregister();
        self.conn.close();
    }
}

fn send_data_frame(
    endpoint: &dyn crate::substrate::Endpoint,
    pos: u32,
    payload: &[u8],
) -> Result<()> {
    endpoint.send_with(&mut |buf| {
        let total = DATA_HEADER_LEN + payload.len();
        if buf.len() < total {
            return 0;
        }
        DataHeader { pos, len: payload.len() as u32 }.encode_into(&mut buf[..DATA_HEADER_LEN]);
        buf[DATA_HEADER_LEN..total].copy_from_slice(payload);
        total
    })
}

// ---------------------------------------------------------------------
// Public handles
// ---------------------------------------------------------------------

/// A listening stream socket, analogous to `AF_RPMSG`/`SOCK_STREAM` after
/// `bind` + `listen`. Produces [`RpmsgStream`]s via [`RpmsgListener::accept`].
pub struct RpmsgListener {
    inner: Socket,
}

impl RpmsgListener {
    pub fn bind(substrate: Arc<dyn Substrate>, addr: SocketAddrRpmsg, config: Config) -> Result<Self> {
        let socket = Socket::new(SocketKind::Stream, substrate, config);
        socket.bind(addr)?;
        Ok(Self { inner: socket })
    }

    pub fn listen(&self, backlog: i32) -> Result<()> {
        self.inner.listen(backlog)
    }

    pub fn set_nonblocking(&self, value: bool) {
        self.inner.set_nonblocking(value);
    }

    pub fn set_accept_timeout(&self, timeout: Option<Duration>) {
        self.inner.set_read_timeout(timeout);
    }

    /// Blocks (respecting [`Self::set_accept_timeout`] and non-blocking
    /// mode) until a peer has connected, returning a ready-to-use
    /// [`RpmsgStream`].
    pub fn accept(&self) -> Result<(RpmsgStream, SocketAddrRpmsg)> {
        let child = self.inner.accept()?;
        let peer = child.peer_addr().unwrap_or_default();

        let watcher: Arc<dyn crate::substrate::DeviceWatcher> =
            Arc::new(ChildDeviceWatcher { conn: child.clone() });
        let watcher_id =
            self.inner.substrate.register_device_watcher(peer.cpu.as_str(), watcher);

        let socket = Socket::from_connection(self.inner.substrate.clone(), child);
        *socket.callbacks.lock().unwrap() =
            RegisteredCallbacks::Accepted { substrate: self.inner.substrate.clone(), watcher_id };

        Ok((RpmsgStream { inner: socket }, peer))
    }

    pub fn local_addr(&self) -> SocketAddrRpmsg {
        self.inner.getsockname()
    }

    pub fn ioctl(&self, req: IoctlRequest) -> Result<IoctlResponse> {
        self.inner.ioctl(req)
    }

    pub fn poll_register(&self, waiter: Arc<dyn PollWaiter>) -> Result<(PollSlot, PollEvents)> {
        self.inner.poll_register(waiter)
    }

    pub fn poll_unregister(&self, slot: PollSlot) {
        self.inner.poll_unregister(slot);
    }
}

impl Drop for RpmsgListener {
    fn drop(&mut self) {
        self.inner.close();
    }
}

/// A connected (or connecting) stream socket.
pub struct RpmsgStream {
    inner: Socket,
}

impl RpmsgStream {
    pub fn connect(substrate: Arc<dyn Substrate>, peer: SocketAddrRpmsg, config: Config) -> Result<Self> {
        let socket = Socket::new(SocketKind::Stream, substrate, config);
        socket.connect(peer, false)?;
        Ok(Self { inner: socket })
    }

    pub fn connect_nonblocking(
        substrate: Arc<dyn Substrate>,
        peer: SocketAddrRpmsg,
        config: Config,
    ) -> Result<Self> {
        let socket = Socket::new(SocketKind::Stream, substrate, config);
        socket.set_nonblocking(true);
        match socket.connect(peer, false) {
            Ok(()) | Err(Error::InProgress) => Ok(Self { inner: socket }),
            Err(err) => Err(err),
        }
    }

    pub fn set_nonblocking(&self, value: bool) {
        self.inner.set_nonblocking(value);
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) {
        self.inner.set_read_timeout(timeout);
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) {
        self.inner.set_write_timeout(timeout);
    }

    pub fn is_connected(&self) -> bool {
        self.inner.conn.is_connected()
    }

    /// Sends as much of `data` as the current window allows, blocking for
    /// more credit unless `dontwait` (`MSG_DONTWAIT`) is set. Returns the
    /// number of bytes actually sent, which may be less than `data.len()`.
    pub fn send(&self, data: &[u8], dontwait: bool) -> Result<usize> {
        self.inner.send_stream(data, dontwait)
    }

    pub fn recv(&self, out: &mut [u8], dontwait: bool) -> Result<usize> {
        self.inner.recv_stream(out, dontwait)
    }

    pub fn local_addr(&self) -> SocketAddrRpmsg {
        self.inner.getsockname()
    }

    pub fn peer_addr(&self) -> Option<SocketAddrRpmsg> {
        self.inner.getconnname()
    }

    pub fn peer_cred(&self) -> Result<Credentials> {
        self.inner.getsockopt(SockOpt::PeerCred)
    }

    pub fn ioctl(&self, req: IoctlRequest) -> Result<IoctlResponse> {
        self.inner.ioctl(req)
    }

    pub fn poll_register(&self, waiter: Arc<dyn PollWaiter>) -> Result<(PollSlot, PollEvents)> {
        self.inner.poll_register(waiter)
    }

    pub fn poll_unregister(&self, slot: PollSlot) {
        self.inner.poll_unregister(slot);
    }
}

impl Drop for RpmsgStream {
    fn drop(&mut self) {
        self.inner.close();
    }
}

/// A datagram socket. Always has an implicit peer once [`Self::connect`] is
/// called; spec.md's `AF_RPMSG` datagram surface has no "receive from any
/// sender" mode, so `recv` always reads from the connected peer.
pub struct RpmsgDatagram {
    inner: Socket,
}

impl RpmsgDatagram {
    pub fn bind(substrate: Arc<dyn Substrate>, addr: SocketAddrRpmsg, config: Config) -> Result<Self> {
        let socket = Socket::new(SocketKind::Datagram, substrate, config);
        socket.bind(addr)?;
        Ok(Self { inner: socket })
    }

    pub fn connect(substrate: Arc<dyn Substrate>, peer: SocketAddrRpmsg, config: Config) -> Result<Self> {
        let socket = Socket::new(SocketKind::Datagram, substrate, config);
        socket.connect(peer, false)?;
        Ok(Self { inner: socket })
    }

    pub fn set_nonblocking(&self, value: bool) {
        self.inner.set_nonblocking(value);
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) {
        self.inner.set_read_timeout(timeout);
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) {
        self.inner.set_write_timeout(timeout);
    }

    /// Sends one datagram. `EFBIG` if it can never fit in the peer's
    /// advertised window regardless of current occupancy.
    pub fn send(&self, data: &[u8], dontwait: bool) -> Result<usize> {
        self.inner.send_datagram(data, dontwait)
    }

    pub fn recv_from(&self, out: &mut [u8]) -> Result<(usize, Option<SocketAddrRpmsg>)> {
        self.inner.recv_datagram(out)
    }

    pub fn local_addr(&self) -> SocketAddrRpmsg {
        self.inner.getsockname()
    }

    pub fn peer_addr(&self) -> Option<SocketAddrRpmsg> {
        self.inner.getconnname()
    }

    pub fn ioctl(&self, req: IoctlRequest) -> Result<IoctlResponse> {
        self.inner.ioctl(req)
    }

    pub fn poll_register(&self, waiter: Arc<dyn PollWaiter>) -> Result<(PollSlot, PollEvents)> {
        self.inner.poll_register(waiter)
    }

    pub fn poll_unregister(&self, slot: PollSlot) {
        self.inner.poll_unregister(slot);
    }
}

impl Drop for RpmsgDatagram {
    fn drop(&mut self) {
        self.inner.close();
    }
}

/// Diagnostic path string format, exposed standalone for tests; real callers
/// go through [`RpmsgStream::ioctl`] et al.
pub fn format_diag_path(local_cpu: &str, peer: &SocketAddrRpmsg, nameid: &str, is_server: bool) -> String {
    if is_server {
        format!("rpmsg:[{local_cpu}:[{}{nameid}]<->{}]", peer.name.as_str(), peer.cpu.as_str())
    } else {
        format!("rpmsg:[{local_cpu}<->{}:[{}{nameid}]]", peer.cpu.as_str(), peer.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diag_path_server_layout() {
        let peer = SocketAddrRpmsg::new("cpu1", "echo:7").unwrap();
        let path = format_diag_path("cpu0", &peer, "", true);
        assert_eq!(path, "rpmsg:[cpu0:[echo:7]<->cpu1]");
    }

    #[test]
    fn diag_path_client_layout() {
        let peer = SocketAddrRpmsg::new("cpu1", "echo").unwrap();
        let path = format_diag_path("cpu0", &peer, ":7", false);
        assert_eq!(path, "rpmsg:[cpu0<->cpu1:[echo:7]]");
    }
}
