//! Trait surface standing in for the real RPMsg bus and name service — both
//! external collaborators this crate never implements directly (the actual
//! shared-memory transport underneath RPMsg is an explicit Non-goal).
//!
//! Reshapes the original driver's callback-from-a-raw-`void *priv`-pointer
//! design (`rpmsg_ept_cb`, `rpmsg_device_created`, `rpmsg_ns_match`, ...)
//! into owned trait objects, per REDESIGN FLAGS: replace the raw back
//! reference with a handle plus a weak reference the callee upgrades.

use std::sync::Arc;

use crate::error::Error;

/// One end of an established rpmsg channel. Endpoints are created through
/// [`Substrate::create_endpoint`] and destroyed through [`Endpoint::destroy`]
/// or by dropping the last `Arc`.
pub trait Endpoint: Send + Sync {
    /// Bytes currently available in the substrate's TX buffer, used to size
    /// outbound frames the way `rpmsg_socket_get_iovlen` caps writes to
    /// `rpmsg_get_buffer_size`.
    fn tx_capacity(&self) -> usize;

    fn is_alive(&self) -> bool;

    /// Acquires a TX buffer, hands it to `fill` to serialise a frame into,
    /// and sends exactly `fill`'s return value worth of bytes, zero-copy.
    /// Mirrors the acquire/fill/send-nocopy sequence around
    /// `rpmsg_get_tx_payload_buffer`/`rpmsg_send_nocopy`.
    fn send_with(&self, fill: &mut dyn FnMut(&mut [u8]) -> usize) -> Result<(), Error>;

    fn destroy(&self);
}

/// Registered by a connection when it creates an endpoint, so the substrate
/// can deliver inbound frames and an unbind notification back to it without
/// either side holding a raw pointer to the other.
pub trait EndpointOwner: Send + Sync {
    fn on_message(&self, data: &[u8]);
    fn on_unbind(&self);
}

/// Registered by a connecting client so it learns when the remote CPU it
/// wants to talk to comes up or goes down, matching
/// `rpmsg_socket_device_created`/`_destroy`.
pub trait DeviceWatcher: Send + Sync {
    fn on_device_created(&self, substrate: &dyn Substrate, cpu: &str);
    fn on_device_destroyed(&self, cpu: &str);
}

/// Registered by a listening server so the substrate can ask "is this bind
/// request mine?" and, if so, hand it a freshly accepted endpoint. Mirrors
/// `rpmsg_socket_ns_match`/`rpmsg_socket_ns_bind`.
pub trait NameServiceServer: Send + Sync {
    fn matches(&self, cpu: &str, name: &str) -> bool;
    fn bind(&self, substrate: &dyn Substrate, cpu: &str, ept_name: &str, dest: u32);
}

/// Opaque token returned by registration calls, passed back to unregister.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WatcherId(pub u64);

/// The bus itself: creates endpoints and dispatches device/name-service
/// notifications. One `Substrate` instance represents the local CPU's view
/// of the bus.
pub trait Substrate: Send + Sync {
    fn local_cpu_name(&self) -> String;

    /// Creates and binds an endpoint named `name` talking to `dest_cpu`
    /// (optionally addressed by a specific `dest` if known, e.g. after a
    /// name-service bind handed one over).
    fn create_endpoint(
        &self,
        name: &str,
        dest_cpu: &str,
        dest: Option<u32>,
        owner: Arc<dyn EndpointOwner>,
    ) -> Result<Arc<dyn Endpoint>, Error>;

    fn register_device_watcher(&self, dest_cpu: &str, watcher: Arc<dyn DeviceWatcher>) -> WatcherId;
    fn unregister_device_watcher(&self, id: WatcherId);

    fn register_name_service(&self, server: Arc<dyn NameServiceServer>) -> WatcherId;
    fn unregister_name_service(&self, id: WatcherId);
}
