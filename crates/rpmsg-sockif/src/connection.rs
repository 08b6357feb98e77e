//! The connection object (spec.md §4.1): per-socket state shared between
//! the calling thread and the substrate's dispatch thread, split into small
//! independently-locked pieces rather than one coarse lock, the way
//! `rpmsg_socket_conn_s` splits `recvlock`/`sendlock`/`polllock`.
//!
//! Lock ordering when more than one is needed: `recv` before `send`;
//! `poll`'s internal lock (see [`crate::poll::PollSet`]) is never held
//! across a blocking wait. No lock is ever held across a
//! [`crate::sync::LevelSemaphore::wait`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flux_utils::safe_panic;
use tracing::debug;

use crate::addr::SocketAddrRpmsg;
use crate::error::{Error, Result};
use crate::poll::{PollEvents, PollSet};
use crate::ringbuf::RingBuffer;
use crate::substrate::Endpoint;
use crate::sync::{LevelSemaphore, WaitOutcome};

/// Runtime knobs, replacing the original driver's `CONFIG_NET_RPMSG_*`
/// compile-time macros.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    pub recv_buf_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self { recv_buf_size: 4096 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketKind {
    Stream,
    Datagram,
}

/// Mirrors the role tagging spec.md's Data Model table assigns to
/// `rpmsg_socket_conn_s`: unbound, bound, listening with a backlog,
/// listen-closed, accepted (server side of an established connection), or
/// client (the connecting side).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Unbound,
    Bound,
    Listening { backlog: i32 },
    ListenClosed,
    Accepted,
    Client,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Credentials {
    pub pid: u32,
    pub uid: u32,
    pub gid: u32,
}

pub fn local_credentials() -> Credentials {
    // Safety: getpid/getuid/getgid never fail.
    unsafe { Credentials { pid: libc::getpid() as u32, uid: libc::getuid(), gid: libc::getgid() } }
}

/// A blocked reader's destination buffer, published so the dispatch thread
/// can copy an incoming frame straight into it instead of through the ring
/// buffer. Valid only while the owning `recv` call holds the wait; always
/// cleared before that call returns, by whichever side consumes it.
struct RecvDirect {
    ptr: *mut u8,
    len: usize,
}

// Safety: the pointer is only ever dereferenced while the `RecvState` mutex
// that guards this value is held, and only for the lifetime of the
// `recv`/`recv_from` call that installed it.
unsafe impl Send for RecvDirect {}

struct RecvState {
    buf: RingBuffer,
    recvpos: u32,
    lastpos: u32,
    direct: Option<RecvDirect>,
    direct_written: usize,
    peer_hung_up: bool,
}

impl RecvState {
    fn new(cap: u32) -> Self {
        let mut buf = RingBuffer::new();
        buf.resize(cap as usize).expect("initial recv buffer alloc");
        Self { buf, recvpos: 0, lastpos: 0, direct: None, direct_written: 0, peer_hung_up: false }
    }
}

struct SendState {
    /// Peer's advertised receive window (their `recv_buf_size`).
    sendsize: u32,
    sendpos: u32,
    ackpos: u32,
}

impl Default for SendState {
    fn default() -> Self {
        Self { sendsize: 0, sendpos: 0, ackpos: 0 }
    }
}

/// The spec's `struct rpmsg_socket_conn_s`, reworked into Rust's idiom: one
/// `Arc<Connection>` shared between whichever socket object owns it and the
/// substrate dispatch thread that delivers inbound frames.
pub struct Connection {
    pub kind: SocketKind,
    config: Config,

    role: Mutex<Role>,
    local_addr: Mutex<SocketAddrRpmsg>,
    peer_addr: Mutex<Option<SocketAddrRpmsg>>,
    /// `":%x"`-formatted suffix, set on stream clients only (see
    /// [`crate::addr::next_suffix`]); kept separately from `peer_addr`
    /// because `FIOC_FILEPATH` renders it as its own bracketed segment.
    nameid: Mutex<String>,

    endpoint: Mutex<Option<Arc<dyn Endpoint>>>,
    unbind: AtomicBool,
    connected: AtomicBool,
    nonblocking: AtomicBool,

    recv: Mutex<RecvState>,
    send: Mutex<SendState>,
    pub(crate) poll: PollSet,

    send_sem: LevelSemaphore,
    recv_sem: LevelSemaphore,

    local_cred: Credentials,
    peer_cred: Mutex<Option<Credentials>>,

    accept_queue: Mutex<VecDeque<Arc<Connection>>>,
    accept_sem: LevelSemaphore,

    crefs: AtomicU32,
}

impl Connection {
    pub fn new(kind: SocketKind, config: Config) -> Arc<Self> {
        Arc::new(Self {
            kind,
            config,
            role: Mutex::new(Role::Unbound),
            local_addr: Mutex::new(SocketAddrRpmsg::default()),
            peer_addr: Mutex::new(None),
            nameid: Mutex::new(String::new()),
            endpoint: Mutex::new(None),
            unbind: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            nonblocking: AtomicBool::new(false),
            recv: Mutex::new(RecvState::new(config.recv_buf_size)),
            send: Mutex::new(SendState::default()),
            poll: PollSet::new(),
            send_sem: LevelSemaphore::new(),
            recv_sem: LevelSemaphore::new(),
            local_cred: local_credentials(),
            peer_cred: Mutex::new(None),
            accept_queue: Mutex::new(VecDeque::new()),
            accept_sem: LevelSemaphore::new(),
            crefs: AtomicU32::new(1),
        })
    }

    pub fn addref(&self) {
        self.crefs.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the refcount after releasing; callers drop all owned state
    /// once this reaches zero, mirroring `rpmsg_socket_free`.
    pub fn release(&self) -> u32 {
        self.crefs.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn role(&self) -> Role {
        *self.role.lock().unwrap()
    }

    pub fn set_role(&self, role: Role) {
        *self.role.lock().unwrap() = role;
    }

    pub fn local_addr(&self) -> SocketAddrRpmsg {
        *self.local_addr.lock().unwrap()
    }

    pub fn set_local_addr(&self, addr: SocketAddrRpmsg) {
        *self.local_addr.lock().unwrap() = addr;
    }

    pub fn peer_addr(&self) -> Option<SocketAddrRpmsg> {
        *self.peer_addr.lock().unwrap()
    }

    pub fn set_peer_addr(&self, addr: SocketAddrRpmsg) {
        *self.peer_addr.lock().unwrap() = Some(addr);
    }

    pub fn nameid(&self) -> String {
        self.nameid.lock().unwrap().clone()
    }

    pub fn set_nameid(&self, nameid: String) {
        *self.nameid.lock().unwrap() = nameid;
    }

    pub fn is_nonblocking(&self) -> bool {
        self.nonblocking.load(Ordering::Relaxed)
    }

    pub fn set_nonblocking(&self, value: bool) {
        self.nonblocking.store(value, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn is_unbound_from_substrate(&self) -> bool {
        self.unbind.load(Ordering::Acquire)
    }

    /// Hangup condition for `poll` (spec.md §4.4): true once the endpoint is
    /// gone, never existed yet and the peer already unbound, or the
    /// substrate reported the peer dead.
    pub fn is_hung_up(&self) -> bool {
        self.is_unbound_from_substrate() || !self.endpoint().is_some_and(|ep| ep.is_alive())
    }

    pub fn local_credentials(&self) -> Credentials {
        self.local_cred
    }

    pub fn peer_credentials(&self) -> Option<Credentials> {
        *self.peer_cred.lock().unwrap()
    }

    pub fn set_peer_credentials(&self, cred: Credentials) {
        *self.peer_cred.lock().unwrap() = Some(cred);
    }

    pub fn config(&self) -> Config {
        self.config
    }

    pub fn endpoint(&self) -> Option<Arc<dyn Endpoint>> {
        self.endpoint.lock().unwrap().clone()
    }

    pub fn set_endpoint(&self, endpoint: Arc<dyn Endpoint>) {
        *self.endpoint.lock().unwrap() = Some(endpoint);
    }

    /// Marks the connection established: flips `connected`, clears any
    /// handshake-in-progress indication, and wakes anyone blocked in
    /// `connect()`/`poll()`.
    pub fn mark_connected(&self, peer_sendsize: u32) {
        {
            let mut send = self.send.lock().unwrap();
            send.sendsize = peer_sendsize;
        }
        self.connected.store(true, Ordering::Release);
        self.send_sem.post();
        self.poll.notify(PollEvents::WRITABLE);
    }

    /// Substrate-side teardown: called once, either because the peer closed
    /// its endpoint or the remote CPU went away.
    pub fn mark_unbound(&self) {
        self.unbind.store(true, Ordering::Release);
        self.connected.store(false, Ordering::Release);
        {
            let mut recv = self.recv.lock().unwrap();
            recv.peer_hung_up = true;
        }
        self.send_sem.post();
        self.recv_sem.post();
        self.accept_sem.post();
        self.poll.notify(PollEvents::READABLE | PollEvents::WRITABLE | PollEvents::HANGUP);
    }

    // ---- accept queue (server side only) ----

    pub fn push_pending(&self, child: Arc<Connection>) -> Result<()> {
        let backlog = match self.role() {
            Role::Listening { backlog } => backlog,
            _ => return Err(Error::Invalid),
        };
        let mut queue = self.accept_queue.lock().unwrap();
        if queue.len() as i32 >= backlog {
            return Err(Error::Busy);
        }
        queue.push_back(child);
        drop(queue);
        self.accept_sem.post();
        self.poll.notify(PollEvents::READABLE);
        Ok(())
    }

    pub fn try_pop_pending(&self) -> Option<Arc<Connection>> {
        self.accept_queue.lock().unwrap().pop_front()
    }

    pub fn has_pending(&self) -> bool {
        !self.accept_queue.lock().unwrap().is_empty()
    }

    pub fn accept(&self, timeout: Option<Duration>) -> Result<Arc<Connection>> {
        loop {
            match self.role() {
                Role::Listening { .. } => {}
                Role::ListenClosed => return Err(Error::ConnectionReset),
                _ => return Err(Error::Invalid),
            }
            if let Some(child) = self.try_pop_pending() {
                return Ok(child);
            }
            if self.is_nonblocking() {
                return Err(Error::WouldBlock);
            }
            match self.accept_sem.wait(timeout) {
                WaitOutcome::Woken => continue,
                WaitOutcome::TimedOut => return Err(Error::TimedOut),
            }
        }
    }

    /// Blocks until a SYNC has been received from the peer (`sendsize`
    /// becomes nonzero), used by both `connect` and `accept` (spec.md §4.4:
    /// "wait for its SYNC if sendsize == 0").
    pub fn wait_for_sync(&self, timeout: Option<Duration>) -> Result<()> {
        loop {
            if self.is_connected() {
                return Ok(());
            }
            if self.is_unbound_from_substrate() {
                return Err(Error::ConnectionReset);
            }
            match self.send_sem.wait(timeout) {
                WaitOutcome::Woken => continue,
                WaitOutcome::TimedOut => return Err(Error::TimedOut),
            }
        }
    }

    // ---- send-side flow control ----

    pub fn send_window(&self) -> (u32, u32, u32) {
        let send = self.send.lock().unwrap();
        (send.sendsize, send.sendpos, send.ackpos)
    }

    /// Reserves `len` bytes of send window, returning the position the
    /// frame should be tagged with. Blocks (respecting non-blocking mode)
    /// until enough window is available.
    pub fn reserve_send(&self, len: u32, timeout: Option<Duration>) -> Result<u32> {
        loop {
            {
                let send = self.send.lock().unwrap();
                if crate::flowcontrol::space(send.sendsize, send.sendpos, send.ackpos) >= len {
                    return Ok(send.sendpos);
                }
            }
            if self.is_unbound_from_substrate() {
                return Err(Error::ConnectionReset);
            }
            if self.is_nonblocking() {
                return Err(Error::WouldBlock);
            }
            match self.send_sem.wait(timeout) {
                WaitOutcome::Woken => continue,
                WaitOutcome::TimedOut => return Err(Error::TimedOut),
            }
        }
    }

    pub fn advance_sendpos(&self, len: u32) {
        let mut send = self.send.lock().unwrap();
        send.sendpos = send.sendpos.wrapping_add(len);
    }

    /// Snapshot taken before a substrate send attempt, so the caller can
    /// roll back on failure instead of leaving the window accounting ahead
    /// of what the peer actually received.
    pub fn send_snapshot(&self) -> u32 {
        self.send.lock().unwrap().sendpos
    }

    pub fn restore_sendpos(&self, sendpos: u32) {
        self.send.lock().unwrap().sendpos = sendpos;
    }

    pub fn apply_ack(&self, ackpos: u32) {
        let mut send = self.send.lock().unwrap();
        send.ackpos = ackpos;
        drop(send);
        self.send_sem.post();
        self.poll.notify(PollEvents::WRITABLE);
    }

    // ---- receive-side ----

    /// Appends inbound stream/datagram-framed bytes, writing straight into a
    /// blocked reader's buffer if one is registered, otherwise into the
    /// ring buffer. Returns the `recvpos`/`lastpos` pair to decide whether a
    /// standalone ack is owed.
    ///
    /// Both stream and datagram connections consume exactly one frame per
    /// call: a registered direct buffer is satisfied with `min(frame len,
    /// buffer len)` bytes and cleared immediately, any remainder goes to the
    /// ring buffer, and the reader's wait is posted right away rather than
    /// accumulating across frames to fill the buffer — matching
    /// `rpmsg_sockif.c`'s `rpmsg_socket_recv_msg`, which clears
    /// `conn->recvdata` and posts `recvsem` after a single message. Per
    /// spec.md §4.2, the direct path skips the 4-byte length prefix the
    /// buffered path still has to carry into the ring buffer.
    pub fn deliver(&self, data: &[u8]) -> (u32, u32, u32) {
        let mut recv = self.recv.lock().unwrap();

        match self.kind {
            SocketKind::Stream => {
                if let Some(direct) = recv.direct.take() {
                    let n = data.len().min(direct.len);
                    // Safety: `direct` was published by a live `recv_into`
                    // call still waiting on `recv_sem`, whose buffer
                    // outlives this call.
                    unsafe {
                        std::ptr::copy_nonoverlapping(data.as_ptr(), direct.ptr, n);
                    }
                    if n < data.len() {
                        Self::write_to_ring(&mut recv.buf, &data[n..]);
                    }
                    recv.direct_written = n;
                    recv.recvpos = recv.recvpos.wrapping_add(data.len() as u32);
                    drop(recv);
                    self.recv_sem.post();
                    let ack = self.ack_state();
                    self.poll.notify(PollEvents::READABLE);
                    return ack;
                } else {
                    Self::write_to_ring(&mut recv.buf, data);
                    recv.recvpos = recv.recvpos.wrapping_add(data.len() as u32);
                }
            }
            SocketKind::Datagram => {
                if data.len() >= 4 {
                    if let Some(direct) = recv.direct.take() {
                        let dglen = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
                        let body = &data[4..];
                        let n = body.len().min(dglen).min(direct.len);
                        // Safety: see stream arm above.
                        unsafe { std::ptr::copy_nonoverlapping(body.as_ptr(), direct.ptr, n) };
                        recv.direct_written = n;
                        recv.recvpos = recv.recvpos.wrapping_add(data.len() as u32);
                        drop(recv);
                        self.recv_sem.post();
                        let ack = self.ack_state();
                        self.poll.notify(PollEvents::READABLE);
                        return ack;
                    }
                }
                Self::write_to_ring(&mut recv.buf, data);
                recv.recvpos = recv.recvpos.wrapping_add(data.len() as u32);
            }
        }

        drop(recv);
        self.recv_sem.post();
        self.poll.notify(PollEvents::READABLE);
        self.ack_state()
    }

    /// Writes into the ring buffer, flagging the protocol violation spec.md
    /// §7 describes: credit-based pacing should keep the peer from ever
    /// filling the window, so a short write here means a frame arrived with
    /// no reader and no space. Mirrors `flux_communication::queue`'s
    /// `log_and_recover` idiom — panic in debug builds, log and carry on
    /// (silently truncated, per spec) in release.
    fn write_to_ring(buf: &mut RingBuffer, data: &[u8]) {
        let written = buf.write(data);
        if written < data.len() {
            safe_panic!(
                "recv buffer overflow: dropped {} of {} bytes (no reader, no space)",
                data.len() - written,
                data.len()
            );
        }
    }

    /// `recvpos`/`lastpos` plus our own receive-buffer capacity, the basis
    /// `flowcontrol::ack_owed` uses for its threshold — `rpmsg_socket_wakeup`
    /// compares against `circbuf_size(&conn->recvbuf)`, not the peer's
    /// advertised send window.
    fn ack_state(&self) -> (u32, u32, u32) {
        let recv = self.recv.lock().unwrap();
        (recv.recvpos, recv.lastpos, self.config.recv_buf_size)
    }

    pub fn mark_ack_sent(&self, recvpos: u32) {
        self.recv.lock().unwrap().lastpos = recvpos;
    }

    /// `recvpos` as of the last standalone or piggy-backed ack we sent, used
    /// to decide whether another one is owed yet.
    pub fn ack_lastpos(&self) -> u32 {
        self.recv.lock().unwrap().lastpos
    }

    /// Current `recvpos`, used as the ack piggy-backed on outbound DATA
    /// frame headers.
    pub fn recvpos(&self) -> u32 {
        self.recv.lock().unwrap().recvpos
    }

    pub fn recv_available(&self) -> usize {
        self.recv.lock().unwrap().buf.len()
    }

    pub fn peer_hung_up(&self) -> bool {
        self.recv.lock().unwrap().peer_hung_up
    }

    /// Copies buffered bytes into `out`, falling back to registering a
    /// direct fast-path buffer and blocking if nothing is buffered yet.
    /// Stream connections only: a single call may return fewer bytes than
    /// `out.len()`.
    pub fn recv_into(&self, out: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        debug_assert_eq!(self.kind, SocketKind::Stream);
        loop {
            {
                let mut recv = self.recv.lock().unwrap();
                if !recv.buf.is_empty() {
                    return Ok(recv.buf.read(out));
                }
                if recv.peer_hung_up {
                    return Ok(0);
                }
            }
            if self.is_nonblocking() {
                return Err(Error::WouldBlock);
            }

            {
                let mut recv = self.recv.lock().unwrap();
                if recv.buf.is_empty() && !recv.peer_hung_up {
                    recv.direct = Some(RecvDirect { ptr: out.as_mut_ptr(), len: out.len() });
                    recv.direct_written = 0;
                }
            }

            match self.recv_sem.wait(timeout) {
                WaitOutcome::Woken => {
                    let mut recv = self.recv.lock().unwrap();
                    let written = recv.direct_written;
                    recv.direct = None;
                    if written > 0 {
                        return Ok(written);
                    }
                    // spurious wake (e.g. hangup with nothing delivered yet);
                    // loop back and let the top-of-loop checks decide.
                }
                WaitOutcome::TimedOut => {
                    self.recv.lock().unwrap().direct = None;
                    return Err(Error::TimedOut);
                }
            }
        }
    }

    /// Datagram receive path (spec.md §4.3): reads one length-prefixed
    /// datagram, truncating to `out.len()` and discarding the remainder if
    /// the datagram was bigger, and always advancing `recvpos` by the full
    /// `dglen + 4` regardless of how much the caller asked for.
    pub fn recv_datagram(&self, out: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        debug_assert_eq!(self.kind, SocketKind::Datagram);
        loop {
            {
                let mut recv = self.recv.lock().unwrap();
                if let Some(n) = Self::try_take_datagram(&mut recv.buf, out) {
                    return Ok(n);
                }
                if recv.peer_hung_up {
                    return Ok(0);
                }
            }
            if self.is_nonblocking() {
                return Err(Error::WouldBlock);
            }

            {
                let mut recv = self.recv.lock().unwrap();
                if recv.buf.is_empty() && !recv.peer_hung_up {
                    recv.direct = Some(RecvDirect { ptr: out.as_mut_ptr(), len: out.len() });
                    recv.direct_written = 0;
                }
            }

            match self.recv_sem.wait(timeout) {
                WaitOutcome::Woken => {
                    let mut recv = self.recv.lock().unwrap();
                    let written = recv.direct_written;
                    recv.direct = None;
                    if written > 0 {
                        return Ok(written);
                    }
                    // nothing delivered directly; a datagram may still
                    // have landed in the ring buffer via another path
                    if let Some(n) = Self::try_take_datagram(&mut recv.buf, out) {
                        return Ok(n);
                    }
                }
                WaitOutcome::TimedOut => {
                    self.recv.lock().unwrap().direct = None;
                    return Err(Error::TimedOut);
                }
            }
        }
    }

    /// Pops one `u32`-length-prefixed datagram off the front of `buf` into
    /// `out`, if one is fully buffered; returns `None` if nothing has
    /// arrived yet. Extra bytes beyond `out.len()` are discarded.
    fn try_take_datagram(buf: &mut RingBuffer, out: &mut [u8]) -> Option<usize> {
        if buf.len() < 4 {
            return None;
        }
        let mut prefix = [0u8; 4];
        buf.peek(&mut prefix);
        let dglen = u32::from_le_bytes(prefix) as usize;
        if buf.len() < 4 + dglen {
            return None;
        }
        buf.skip(4);
        let n = dglen.min(out.len());
        let mut scratch = vec![0u8; dglen];
        buf.read(&mut scratch);
        out[..n].copy_from_slice(&scratch[..n]);
        Some(n)
    }

    pub fn close(&self) {
        debug!(kind = ?self.kind, "closing connection");
        if let Some(endpoint) = self.endpoint() {
            endpoint.destroy();
        }
        self.mark_unbound();
    }
}
