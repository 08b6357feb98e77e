//! Pure arithmetic for the credit-based flow control protocol (spec.md
//! §4.3): `sendpos`/`ackpos`/`sendsize` on the sending side keep
//! `0 <= sendpos - ackpos <= sendsize`, and `recvpos`/`lastpos` on the
//! receiving side decide when a standalone ack is owed.
//!
//! All positions are wrapping 32-bit counters, the same as the original
//! driver's `uint32_t sendpos`/`recvpos` fields, so every comparison here
//! uses wrapping arithmetic rather than assuming no overflow.

/// Bytes the sender is still allowed to push without a fresh ack, i.e. how
/// much of `sendsize` between `ackpos` and `sendpos` remains unused.
/// Mirrors `rpmsg_socket_get_space`.
pub fn space(sendsize: u32, sendpos: u32, ackpos: u32) -> u32 {
    let in_flight = sendpos.wrapping_sub(ackpos);
    sendsize.saturating_sub(in_flight)
}

/// Whether a standalone zero-length ack DATA frame is owed: we haven't told
/// the peer about more than half our own receive-buffer capacity's worth of
/// received bytes yet. Mirrors `rpmsg_socket_wakeup`'s
/// `recvpos - lastpos > sendsize / 2` check, where `sendsize` there is
/// `circbuf_size(&conn->recvbuf)` — our own recv buffer's capacity, not the
/// peer's advertised window.
pub fn ack_owed(recvpos: u32, lastpos: u32, own_recv_capacity: u32) -> bool {
    recvpos.wrapping_sub(lastpos) > own_recv_capacity / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn space_shrinks_as_sendpos_advances() {
        assert_eq!(space(100, 0, 0), 100);
        assert_eq!(space(100, 40, 0), 60);
        assert_eq!(space(100, 40, 40), 100);
    }

    #[test]
    fn space_saturates_at_zero_if_over_budget() {
        assert_eq!(space(10, 50, 0), 0);
    }

    #[test]
    fn ack_not_owed_below_half_window() {
        assert!(!ack_owed(10, 0, 100));
    }

    #[test]
    fn ack_owed_above_half_window() {
        assert!(ack_owed(60, 0, 100));
    }

    #[test]
    fn wraparound_is_handled() {
        let lastpos = u32::MAX - 5;
        let recvpos = 10u32; // wrapped past u32::MAX
        assert_eq!(recvpos.wrapping_sub(lastpos), 16);
        assert!(!ack_owed(recvpos, lastpos, 100));
    }
}
