use thiserror::Error;

/// Errors a socket operation can return.
///
/// Named after the POSIX errno a caller porting from the original RPMsg
/// socket driver would expect, not after internal implementation details.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid argument")]
    Invalid,

    #[error("out of memory")]
    NoMemory,

    #[error("socket is already connected")]
    AlreadyConnected,

    #[error("socket is not connected")]
    NotConnected,

    #[error("connection reset by peer")]
    ConnectionReset,

    #[error("operation would block")]
    WouldBlock,

    #[error("connection attempt in progress")]
    InProgress,

    #[error("message too large for datagram socket")]
    TooBig,

    #[error("address already in use")]
    AddressInUse,

    #[error("resource temporarily unavailable")]
    Busy,

    #[error("operation not supported")]
    NotSupported,

    #[error("protocol not supported")]
    ProtocolNotSupported,

    #[error("no route to peer ({0})")]
    NoSuchDevice(String),

    #[error("operation timed out")]
    TimedOut,
}

pub type Result<T> = std::result::Result<T, Error>;
