use std::sync::atomic::{AtomicU64, Ordering};

use flux_utils::ArrayStr;

use crate::error::Error;

/// Max length of the remote CPU name field, mirroring `RPMSG_SOCKET_CPU_SIZE`.
pub const CPU_SIZE: usize = 16;
/// Max length of the rpmsg endpoint/service name, mirroring
/// `RPMSG_SOCKET_NAME_SIZE`.
pub const NAME_SIZE: usize = 32;

/// Prefix every stream/datagram service name is registered under, matching
/// the original driver's `"rpmsg-socket:"` + per-process suffix scheme, here
/// shortened to the idiom this port actually uses.
pub const SERVICE_PREFIX: &str = "sk:";

/// `AF_RPMSG` socket address: a remote CPU name plus an rpmsg service name.
///
/// Both fields are fixed-capacity so the type stays `Copy` and requires no
/// allocation, the same tradeoff `sockaddr_rpmsg`'s two fixed `char[]` arrays
/// make in the original driver.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct SocketAddrRpmsg {
    pub cpu: ArrayStr<CPU_SIZE>,
    pub name: ArrayStr<NAME_SIZE>,
}

impl SocketAddrRpmsg {
    pub fn new(cpu: &str, name: &str) -> Result<Self, Error> {
        Ok(Self {
            cpu: ArrayStr::try_from(cpu).map_err(|_| Error::Invalid)?,
            name: ArrayStr::try_from(name).map_err(|_| Error::Invalid)?,
        })
    }

    /// `cpu` is empty for any-cpu / loopback-server binds.
    pub fn is_any_cpu(&self) -> bool {
        self.cpu.is_empty()
    }
}

impl std::fmt::Display for SocketAddrRpmsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.cpu.as_str(), self.name.as_str())
    }
}

static SUFFIX: AtomicU64 = AtomicU64::new(0);

/// Process-wide monotonic counter appended to stream service names on
/// connect, so two connections from the same process to the same server
/// name don't collide. Mirrors `rpmsg_socket_setaddr`'s `g_rpmsg_socket_id`.
pub fn next_suffix() -> u64 {
    SUFFIX.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_cpu_colon_name() {
        let addr = SocketAddrRpmsg::new("cpu0", "echo").unwrap();
        assert_eq!(addr.to_string(), "cpu0:echo");
    }

    #[test]
    fn any_cpu_is_empty_cpu_field() {
        let addr = SocketAddrRpmsg::new("", "echo").unwrap();
        assert!(addr.is_any_cpu());
    }

    #[test]
    fn name_too_long_is_invalid() {
        let long = "x".repeat(NAME_SIZE + 1);
        assert_eq!(SocketAddrRpmsg::new("cpu0", &long), Err(Error::Invalid));
    }

    #[test]
    fn suffixes_are_monotonic_and_unique() {
        let a = next_suffix();
        let b = next_suffix();
        assert!(b > a);
    }
}
