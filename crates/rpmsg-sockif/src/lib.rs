//! `AF_RPMSG` stream and datagram sockets over a pluggable named-endpoint
//! message substrate.
//!
//! The public surface is the three handle types in [`socket`] —
//! [`RpmsgListener`], [`RpmsgStream`], [`RpmsgDatagram`] — built on a
//! [`Substrate`] implementation. [`loopback`] ships an in-process substrate
//! good enough for tests and single-binary demos; a real shared-memory
//! transport is out of scope for this crate.

mod addr;
mod bridge;
mod connection;
mod error;
mod flowcontrol;
mod frame;
pub mod loopback;
mod poll;
mod ringbuf;
mod socket;
mod substrate;
mod sync;

pub use addr::{CPU_SIZE, NAME_SIZE, SocketAddrRpmsg};
pub use connection::{Config, Credentials};
pub use error::{Error, Result};
pub use poll::{NPOLLWAITERS, PollEvents, PollSlot, PollWaiter};
pub use socket::{IoctlRequest, IoctlResponse, RpmsgDatagram, RpmsgListener, RpmsgStream, SockOpt};
pub use substrate::{DeviceWatcher, Endpoint, EndpointOwner, NameServiceServer, Substrate, WatcherId};
