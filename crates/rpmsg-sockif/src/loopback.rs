//! In-process substrate used by tests and demos: a handful of named "CPU"
//! nodes exchanging frames over `mpsc` channels and dispatch threads, one
//! per node, instead of real shared memory. This is explicitly NOT an
//! attempt at the real RPMsg transport (a Non-goal) — it plays the same
//! role a loopback `TcpListener`/`TcpStream` pair plays in this crate's own
//! integration tests.
//!
//! Endpoints on both sides of a channel share the same name (mirroring how
//! real RPMsg endpoints are created with matching names so the bus can pair
//! them up); routing is therefore keyed by `(cpu, name)`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};

use flux_utils::{ThreadPriority, thread_boot};
use tracing::{debug, warn};

use crate::error::Error;
use crate::substrate::{DeviceWatcher, Endpoint, EndpointOwner, NameServiceServer, Substrate, WatcherId};

struct Dispatched {
    target_name: String,
    data: Vec<u8>,
}

struct EndpointSlot {
    owner: Arc<dyn EndpointOwner>,
    alive: Arc<AtomicBool>,
}

#[derive(Default)]
struct Registry {
    endpoints: HashMap<(String, String), Arc<EndpointSlot>>,
    device_watchers: HashMap<String, Vec<(u64, Arc<dyn DeviceWatcher>)>>,
    name_services: HashMap<String, Vec<(u64, Arc<dyn NameServiceServer>)>>,
    cpus: HashMap<String, Arc<LoopbackCpu>>,
    up: std::collections::HashSet<String>,
    next_id: u64,
}

/// Shared bus connecting every [`LoopbackCpu`] created from it.
#[derive(Clone)]
pub struct LoopbackBus {
    inner: Arc<Mutex<Registry>>,
}

impl Default for LoopbackBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackBus {
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(Registry::default())) }
    }

    /// Returns the node named `name`, creating (and bringing up) it on
    /// first use.
    pub fn cpu(&self, name: &str) -> Arc<LoopbackCpu> {
        let mut reg = self.inner.lock().unwrap();
        if let Some(cpu) = reg.cpus.get(name) {
            return cpu.clone();
        }

        let (tx, rx) = mpsc::channel::<Dispatched>();
        let cpu = Arc::new(LoopbackCpu { name: name.to_string(), bus: self.inner.clone(), sender: tx });

        reg.up.insert(name.to_string());
        reg.cpus.insert(name.to_string(), cpu.clone());

        let bus = self.inner.clone();
        let cpu_name = name.to_string();
        let _ = std::thread::Builder::new().name(format!("rpmsg-loop-{cpu_name}")).spawn(move || {
            thread_boot(None, ThreadPriority::OSDefault);
            while let Ok(msg) = rx.recv() {
                let owner = {
                    let reg = bus.lock().unwrap();
                    reg.endpoints
                        .get(&(cpu_name.clone(), msg.target_name.clone()))
                        .filter(|slot| slot.alive.load(Ordering::Acquire))
                        .map(|slot| slot.owner.clone())
                };
                match owner {
                    Some(owner) => owner.on_message(&msg.data),
                    None => debug!(cpu = %cpu_name, name = %msg.target_name, "dropped message, no live endpoint"),
                }
            }
        });

        cpu
    }

    /// Simulates the remote CPU disappearing: every endpoint on it is
    /// unbound and every watcher of it is told the device is gone.
    pub fn take_down(&self, name: &str) {
        let (endpoints, watchers) = {
            let mut reg = self.inner.lock().unwrap();
            reg.up.remove(name);
            let endpoints: Vec<_> = reg
                .endpoints
                .iter()
                .filter(|((cpu, _), _)| cpu == name)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            for (key, _) in &endpoints {
                reg.endpoints.remove(key);
            }
            let watchers = reg.device_watchers.get(name).cloned().unwrap_or_default();
            (endpoints, watchers)
        };

        for (_, slot) in endpoints {
            slot.alive.store(false, Ordering::Release);
            slot.owner.on_unbind();
        }
        for (_, watcher) in watchers {
            watcher.on_device_destroyed(name);
        }
    }
}

/// One node's view of the bus; implements [`Substrate`].
pub struct LoopbackCpu {
    name: String,
    bus: Arc<Mutex<Registry>>,
    sender: Sender<Dispatched>,
}

impl Substrate for LoopbackCpu {
    fn local_cpu_name(&self) -> String {
        self.name.clone()
    }

    fn create_endpoint(
        &self,
        name: &str,
        dest_cpu: &str,
        _dest: Option<u32>,
        owner: Arc<dyn EndpointOwner>,
    ) -> Result<Arc<dyn Endpoint>, Error> {
        let key = (self.name.clone(), name.to_string());
        let alive = Arc::new(AtomicBool::new(true));

        let matched_server = {
            let mut reg = self.bus.lock().unwrap();
            if reg.endpoints.contains_key(&key) {
                return Err(Error::AddressInUse);
            }
            reg.endpoints.insert(key.clone(), Arc::new(EndpointSlot { owner, alive: alive.clone() }));

            if reg.up.contains(dest_cpu) {
                reg.name_services
                    .get(dest_cpu)
                    .into_iter()
                    .flatten()
                    .find(|(_, server)| server.matches(&self.name, name))
                    .map(|(_, server)| server.clone())
            } else {
                None
            }
        };

        if let Some(server) = matched_server {
            if let Some(dest_substrate) = self.bus.lock().unwrap().cpus.get(dest_cpu).cloned() {
                server.bind(dest_substrate.as_ref(), &self.name, name, 0);
            }
        }

        Ok(Arc::new(LoopbackEndpoint {
            bus: self.bus.clone(),
            my_key: key,
            peer_cpu: dest_cpu.to_string(),
            alive,
        }))
    }

    fn register_device_watcher(&self, dest_cpu: &str, watcher: Arc<dyn DeviceWatcher>) -> WatcherId {
        let mut reg = self.bus.lock().unwrap();
        let id = reg.next_id;
        reg.next_id += 1;
        reg.device_watchers.entry(dest_cpu.to_string()).or_default().push((id, watcher.clone()));
        let already_up = reg.up.contains(dest_cpu);
        drop(reg);

        if already_up {
            watcher.on_device_created(self, dest_cpu);
        }
        WatcherId(id)
    }

    fn unregister_device_watcher(&self, id: WatcherId) {
        let mut reg = self.bus.lock().unwrap();
        for watchers in reg.device_watchers.values_mut() {
            watchers.retain(|(wid, _)| *wid != id.0);
        }
    }

    fn register_name_service(&self, server: Arc<dyn NameServiceServer>) -> WatcherId {
        let mut reg = self.bus.lock().unwrap();
        let id = reg.next_id;
        reg.next_id += 1;
        reg.name_services.entry(self.name.clone()).or_default().push((id, server));
        WatcherId(id)
    }

    fn unregister_name_service(&self, id: WatcherId) {
        let mut reg = self.bus.lock().unwrap();
        for servers in reg.name_services.values_mut() {
            servers.retain(|(wid, _)| *wid != id.0);
        }
    }
}

struct LoopbackEndpoint {
    bus: Arc<Mutex<Registry>>,
    my_key: (String, String),
    peer_cpu: String,
    alive: Arc<AtomicBool>,
}

impl Endpoint for LoopbackEndpoint {
    fn tx_capacity(&self) -> usize {
        4096
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn send_with(&self, fill: &mut dyn FnMut(&mut [u8]) -> usize) -> Result<(), Error> {
        if !self.is_alive() {
            return Err(Error::ConnectionReset);
        }

        let mut buf = vec![0u8; self.tx_capacity()];
        let n = fill(&mut buf);
        buf.truncate(n);

        let peer_sender = {
            let reg = self.bus.lock().unwrap();
            reg.cpus.get(&self.peer_cpu).map(|cpu| cpu.sender.clone())
        };

        match peer_sender {
            Some(sender) => sender
                .send(Dispatched { target_name: self.my_key.1.clone(), data: buf })
                .map_err(|_| Error::ConnectionReset),
            None => {
                warn!(peer = %self.peer_cpu, "send to cpu with no registered dispatcher");
                Err(Error::ConnectionReset)
            }
        }
    }

    /// Tears down our half of the channel and tells the peer's half it's
    /// gone, the way the real RPMsg core notifies both sides' endpoint
    /// callbacks when either one destroys its endpoint — a single-endpoint
    /// destroy is observable on the other side, not just a local no-op.
    fn destroy(&self) {
        self.alive.store(false, Ordering::Release);
        let peer_slot = {
            let mut reg = self.bus.lock().unwrap();
            reg.endpoints.remove(&self.my_key);
            reg.endpoints.remove(&(self.peer_cpu.clone(), self.my_key.1.clone()))
        };
        if let Some(slot) = peer_slot {
            slot.alive.store(false, Ordering::Release);
            slot.owner.on_unbind();
        }
    }
}
