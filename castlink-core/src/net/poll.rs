//! Multiplexed readiness polling over a batch of sockets.

use std::io;
use std::time::Duration;

use bitflags::bitflags;
use socket2::Socket;

use super::sys;

bitflags! {
    /// Readiness conditions, requested in [`PollFd::events`] and
    /// reported in [`PollFd::revents`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PollEvents: u16 {
        /// Data may be read.
        const IN = 0x0001;
        /// Data may be written.
        const OUT = 0x0002;
        /// Normal data may be read.
        const RDNORM = 0x0004;
        /// Normal data may be written.
        const WRNORM = 0x0008;
        /// Error condition; also how a failed non-blocking connect is
        /// reported on platforms that signal it as an exception.
        const ERR = 0x0010;
        /// Peer hung up.
        const HUP = 0x0020;
        /// Descriptor is not open.
        const NVAL = 0x0040;
    }
}

impl PollEvents {
    /// Any of the readable conditions.
    pub fn is_readable(self) -> bool {
        self.intersects(Self::IN | Self::RDNORM)
    }

    /// Any of the writable conditions.
    pub fn is_writable(self) -> bool {
        self.intersects(Self::OUT | Self::WRNORM)
    }
}

/// One entry in a [`poll_sockets`] batch.
#[derive(Debug, Clone, Copy)]
pub struct PollFd {
    pub(crate) handle: sys::RawHandle,
    /// Conditions to wait for.
    pub events: PollEvents,
    /// Conditions observed; cleared on every call.
    pub revents: PollEvents,
}

impl PollFd {
    /// Watch `socket` for `events`.
    ///
    /// The entry holds the raw handle only; `socket` must stay open
    /// for as long as the entry is polled.
    pub fn new(socket: &Socket, events: PollEvents) -> Self {
        Self {
            handle: sys::raw_handle(socket),
            events,
            revents: PollEvents::empty(),
        }
    }
}

/// Wait until at least one entry is ready or `timeout` elapses.
///
/// `None` waits indefinitely. Returns the number of ready entries,
/// `0` on timeout.
pub fn poll_sockets(fds: &mut [PollFd], timeout: Option<Duration>) -> io::Result<usize> {
    sys::poll(fds, timeout)
}

/// Clamp a timeout to the millisecond range accepted by the OS.
pub(crate) fn timeout_ms(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(d) => i32::try_from(d.as_millis()).unwrap_or(i32::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use socket2::{Domain, Protocol, SockAddr, Type};
    use std::net::SocketAddr;

    fn bound_udp() -> Socket {
        let s = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).unwrap();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        s.bind(&addr.into()).unwrap();
        s
    }

    #[test]
    fn timeout_conversion() {
        assert_eq!(timeout_ms(None), -1);
        assert_eq!(timeout_ms(Some(Duration::from_millis(250))), 250);
        assert_eq!(timeout_ms(Some(Duration::from_secs(u64::MAX))), i32::MAX);
    }

    #[test]
    fn idle_socket_times_out() {
        let s = bound_udp();
        let mut fds = [PollFd::new(&s, PollEvents::IN)];
        let n = poll_sockets(&mut fds, Some(Duration::from_millis(20))).unwrap();
        assert_eq!(n, 0);
        assert!(fds[0].revents.is_empty());
    }

    #[test]
    fn udp_socket_is_writable_and_becomes_readable() {
        let rx = bound_udp();
        let tx = bound_udp();
        let rx_addr: SockAddr = rx.local_addr().unwrap();

        let mut fds = [PollFd::new(&tx, PollEvents::OUT)];
        assert_eq!(poll_sockets(&mut fds, Some(Duration::from_secs(1))).unwrap(), 1);
        assert!(fds[0].revents.is_writable());

        tx.send_to(b"ping", &rx_addr).unwrap();

        let mut fds = [
            PollFd::new(&tx, PollEvents::IN),
            PollFd::new(&rx, PollEvents::IN),
        ];
        let n = poll_sockets(&mut fds, Some(Duration::from_secs(1))).unwrap();
        assert_eq!(n, 1);
        assert!(!fds[0].revents.is_readable());
        assert!(fds[1].revents.is_readable());
    }
}
