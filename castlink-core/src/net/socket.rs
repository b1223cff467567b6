//! Socket construction, connect, send and receive primitives.
//!
//! Every function works on a caller-owned [`socket2::Socket`]. Sockets
//! are closed when dropped, so every early return below releases the
//! handle it created.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, warn};

use super::poll::{PollEvents, PollFd, poll_sockets};
use super::sys;
use crate::error::LinkError;

// ── Constants ────────────────────────────────────────────────────

/// Smallest TCP segment every IPv4 path must carry (RFC 879).
pub const TCP_V4_MSS: u32 = 536;

/// Smallest TCP segment every IPv6 path must carry (RFC 2460).
pub const TCP_V6_MSS: u32 = 1220;

/// Floor for the adaptive receive buffer request.
pub const RCV_BUFFER_SIZE_MIN: usize = 32767;

/// Amount the receive buffer request shrinks by after each rejection.
pub const RCV_BUFFER_SIZE_STEP: usize = 16384;

/// Longest a poll-mode UDP receive waits before reporting a timeout.
pub const UDP_RECV_POLL_TIMEOUT: Duration = Duration::from_millis(100);

// ── Creation ─────────────────────────────────────────────────────

/// Create a socket, optionally in non-blocking mode.
pub fn create_socket(
    domain: Domain,
    ty: Type,
    protocol: Protocol,
    nonblocking: bool,
) -> io::Result<Socket> {
    let socket = Socket::new(domain, ty, Some(protocol)).inspect_err(|e| {
        warn!("socket() failed: {e}");
    })?;
    sys::configure_new_socket(&socket);

    if nonblocking {
        set_socket_nonblocking(&socket, true)?;
    }
    Ok(socket)
}

pub fn set_socket_nonblocking(socket: &Socket, nonblocking: bool) -> io::Result<()> {
    socket.set_nonblocking(nonblocking)
}

/// Bind a UDP socket to the wildcard address of `domain`.
///
/// The receive buffer is sized by [`negotiate_recv_buffer`]; failing to
/// get any particular size is not an error.
pub fn bind_udp_socket(domain: Domain, buffer_size: usize) -> Result<Socket, LinkError> {
    let wildcard: SocketAddr = if domain == Domain::IPV6 {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    } else {
        debug_assert!(domain == Domain::IPV4, "UDP sockets are IPv4 or IPv6");
        (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
    };

    let socket = create_socket(domain, Type::DGRAM, Protocol::UDP, false)?;
    socket.bind(&wildcard.into()).inspect_err(|e| {
        warn!("bind() failed: {e}");
    })?;

    match negotiate_recv_buffer(buffer_size, |size| socket.set_recv_buffer_size(size)) {
        Some(size) => debug!("selected receive buffer size: {size}"),
        None => warn!("unable to set a receive buffer size"),
    }

    Ok(socket)
}

/// Step a receive-buffer request down until `apply` accepts it.
///
/// Starts at `requested` and shrinks by [`RCV_BUFFER_SIZE_STEP`] after
/// each rejection. [`RCV_BUFFER_SIZE_MIN`] is tried exactly once as the
/// final attempt. Returns the accepted size.
pub fn negotiate_recv_buffer<F>(requested: usize, mut apply: F) -> Option<usize>
where
    F: FnMut(usize) -> io::Result<()>,
{
    let mut size = requested;
    loop {
        match apply(size) {
            Ok(()) => return Some(size),
            Err(_) if size <= RCV_BUFFER_SIZE_MIN => return None,
            Err(_) => {
                size = size
                    .saturating_sub(RCV_BUFFER_SIZE_STEP)
                    .max(RCV_BUFFER_SIZE_MIN);
            }
        }
    }
}

// ── TCP connect ──────────────────────────────────────────────────

/// Segment size clamp for a destination.
pub fn min_segment_size(addr: &SocketAddr) -> u32 {
    if addr.is_ipv4() { TCP_V4_MSS } else { TCP_V6_MSS }
}

/// Connect to `addr`, giving up after `timeout`.
///
/// The connect is issued non-blocking with the segment size clamped to
/// the path minimum, which keeps broken routers that drop rather than
/// fragment (and eat the ICMP that would tell us) from stalling the
/// session. The returned socket is back in blocking mode.
///
/// The clamp only limits what the peer sends us; our own writes must go
/// through [`send_mtu_safe`] on a no-delay socket.
pub fn connect_tcp_socket(addr: SocketAddr, timeout: Duration) -> Result<Socket, LinkError> {
    let socket = create_socket(Domain::for_address(addr), Type::STREAM, Protocol::TCP, true)?;

    let mss = min_segment_size(&addr);
    if let Err(e) = sys::clamp_segment_size(&socket, mss) {
        warn!("unable to clamp TCP segment size to {mss}: {e}");
    }

    match socket.connect(&addr.into()) {
        Ok(()) => {}
        Err(e) if sys::is_connect_in_progress(&e) => {}
        Err(e) => {
            debug!("connect({addr}) failed: {e}");
            return Err(e.into());
        }
    }

    let mut fds = [PollFd::new(&socket, PollEvents::OUT)];
    let polled = poll_sockets(&mut fds, Some(timeout));
    let pending = match polled {
        Ok(n) if n > 0 => socket.take_error()?,
        _ => None,
    };
    finish_connect(addr, timeout, polled, pending, fds[0].revents).inspect_err(|e| {
        debug!("connect({addr}) failed: {e}");
    })?;

    set_socket_nonblocking(&socket, false)?;
    Ok(socket)
}

/// Decide the outcome of a non-blocking connect from the poll result,
/// the pending socket error and the reported events.
fn finish_connect(
    addr: SocketAddr,
    timeout: Duration,
    polled: io::Result<usize>,
    pending: Option<io::Error>,
    revents: PollEvents,
) -> Result<(), LinkError> {
    match polled {
        Err(e) => {
            warn!("poll failed while connecting to {addr}: {e}");
            Err(e.into())
        }
        Ok(0) => {
            warn!(
                "connection timed out after {:?} (TCP port {})",
                timeout,
                addr.port()
            );
            Err(LinkError::ConnectTimeout { addr, timeout })
        }
        Ok(_) => match pending {
            Some(e) => Err(e.into()),
            None if revents.contains(PollEvents::ERR) => Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connect failed without a reported socket error",
            )
            .into()),
            None => Ok(()),
        },
    }
}

// ── TCP send ─────────────────────────────────────────────────────

/// Disable Nagle's algorithm so each write leaves as its own segment.
pub fn enable_no_delay(socket: &Socket) -> io::Result<()> {
    socket.set_nodelay(true)
}

/// Write `buf` in chunks no larger than [`TCP_V4_MSS`].
///
/// The sink must have no-delay enabled or the chunks get coalesced
/// again. Stops at the first failed write. Returns the number of bytes
/// written, which on success is `buf.len()`.
pub fn send_mtu_safe<W: Write>(mut sink: W, buf: &[u8]) -> io::Result<usize> {
    let mut sent = 0;
    for chunk in buf.chunks(TCP_V4_MSS as usize) {
        sink.write_all(chunk)?;
        sent += chunk.len();
    }
    Ok(sent)
}

/// Shut down both directions, waking any thread blocked on the socket.
pub fn shutdown_tcp_socket(socket: &Socket) {
    if let Err(e) = socket.shutdown(Shutdown::Both) {
        debug!("shutdown() failed: {e}");
    }
}

// ── Receive ──────────────────────────────────────────────────────

/// How [`recv_udp_socket`] waits for a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvMode {
    /// Poll for up to [`UDP_RECV_POLL_TIMEOUT`], then read.
    Poll,
    /// Read directly, relying on a timeout already set on the socket.
    SocketTimeout,
}

/// Set a receive timeout that leaves the socket usable after it fires.
///
/// Returns [`LinkError::Unsupported`] where that cannot be guaranteed.
pub fn set_nonfatal_recv_timeout(socket: &Socket, timeout: Duration) -> Result<(), LinkError> {
    sys::set_nonfatal_recv_timeout(socket, timeout)
}

/// Set a blocking receive timeout in whole seconds. Failure is logged.
pub fn set_recv_timeout(socket: &Socket, seconds: u64) {
    if let Err(e) = socket.set_read_timeout(Some(Duration::from_secs(seconds))) {
        warn!("setsockopt(SO_RCVTIMEO) failed: {e}");
    }
}

fn is_timeout_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
    )
}

/// Receive one datagram into `buf`.
///
/// Returns `Ok(0)` when nothing arrived in time. Errors caused by an
/// earlier ICMP port unreachable are skipped: they say nothing about
/// whether the peer is alive, and real peer loss is detected by the
/// protocols above.
pub fn recv_udp_socket(socket: &Socket, buf: &mut [u8], mode: RecvMode) -> io::Result<usize> {
    let mut reader: &Socket = socket;
    loop {
        let result = match mode {
            RecvMode::Poll => {
                let mut fds = [PollFd::new(socket, PollEvents::IN)];
                if poll_sockets(&mut fds, Some(UDP_RECV_POLL_TIMEOUT))? == 0 {
                    return Ok(0);
                }
                reader.read(buf)
            }
            RecvMode::SocketTimeout => match reader.read(buf) {
                Err(e) if is_timeout_error(&e) => return Ok(0),
                other => other,
            },
        };

        match result {
            Err(e) if sys::is_icmp_unreachable(&e) => continue,
            other => return other,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    /// Records the size of every write; fails the write at `fail_at`.
    #[derive(Default)]
    struct RecordingSink {
        writes: Vec<usize>,
        fail_at: Option<usize>,
    }

    impl Write for RecordingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_at == Some(self.writes.len()) {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            self.writes.push(buf.len());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn mtu_safe_send_splits_into_safe_chunks() {
        let mut sink = RecordingSink::default();
        let data = vec![7u8; 2000];

        let sent = send_mtu_safe(&mut sink, &data).unwrap();

        assert_eq!(sent, 2000);
        assert_eq!(sink.writes, vec![536, 536, 536, 392]);
        assert!(sink.writes.iter().all(|&n| n <= TCP_V4_MSS as usize));
        assert_eq!(sink.writes.iter().sum::<usize>(), data.len());
    }

    #[test]
    fn mtu_safe_send_stops_on_failure() {
        let mut sink = RecordingSink {
            fail_at: Some(1),
            ..Default::default()
        };

        let result = send_mtu_safe(&mut sink, &[0u8; 1500]);

        assert!(result.is_err());
        assert_eq!(sink.writes, vec![536]);
    }

    #[test]
    fn mtu_safe_send_small_and_empty() {
        let mut sink = RecordingSink::default();
        assert_eq!(send_mtu_safe(&mut sink, &[1, 2, 3]).unwrap(), 3);
        assert_eq!(send_mtu_safe(&mut sink, &[]).unwrap(), 0);
        assert_eq!(sink.writes, vec![3]);
    }

    #[test]
    fn buffer_below_floor_tries_once() {
        let mut attempts = Vec::new();
        let got = negotiate_recv_buffer(4096, |size| {
            attempts.push(size);
            Err(io::Error::other("rejected"))
        });
        assert_eq!(got, None);
        assert_eq!(attempts, vec![4096]);
    }

    #[test]
    fn buffer_steps_down_to_floor_once() {
        let requested = 1024 * 1024;
        let mut attempts = Vec::new();
        let got = negotiate_recv_buffer(requested, |size| {
            attempts.push(size);
            Err(io::Error::other("rejected"))
        });

        assert_eq!(got, None);
        assert_eq!(attempts[0], requested);
        assert_eq!(*attempts.last().unwrap(), RCV_BUFFER_SIZE_MIN);
        assert_eq!(
            attempts.iter().filter(|&&s| s == RCV_BUFFER_SIZE_MIN).count(),
            1
        );
        assert!(attempts.windows(2).all(|w| w[0] > w[1]));
        let bound = (requested - RCV_BUFFER_SIZE_MIN).div_ceil(RCV_BUFFER_SIZE_STEP) + 1;
        assert!(attempts.len() <= bound);
    }

    #[test]
    fn buffer_settles_on_first_accepted_size() {
        let limit = 200_000;
        let got = negotiate_recv_buffer(256 * 1024, |size| {
            if size <= limit {
                Ok(())
            } else {
                Err(io::Error::other("too big"))
            }
        });
        assert_eq!(got, Some(256 * 1024 - 4 * RCV_BUFFER_SIZE_STEP));
    }

    #[test]
    fn connect_timeout_is_never_success() {
        let addr: SocketAddr = "10.0.0.9:47984".parse().unwrap();
        let timeout = Duration::from_millis(50);

        let r = finish_connect(addr, timeout, Ok(0), None, PollEvents::empty());
        assert!(matches!(r, Err(LinkError::ConnectTimeout { .. })));

        // Stale event bits on a timed-out poll still mean timeout.
        let r = finish_connect(addr, timeout, Ok(0), None, PollEvents::WRNORM);
        assert!(matches!(r, Err(LinkError::ConnectTimeout { .. })));
    }

    #[test]
    fn connect_outcome_classification() {
        let addr: SocketAddr = "10.0.0.9:47984".parse().unwrap();
        let timeout = Duration::from_millis(50);

        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        let r = finish_connect(addr, timeout, Ok(1), Some(refused), PollEvents::OUT);
        assert!(r.unwrap_err().is_refused());

        let r = finish_connect(addr, timeout, Ok(1), None, PollEvents::WRNORM | PollEvents::ERR);
        assert!(matches!(r, Err(LinkError::Io(_))));

        let r = finish_connect(addr, timeout, Err(io::Error::other("poll")), None, PollEvents::empty());
        assert!(matches!(r, Err(LinkError::Io(_))));

        assert!(finish_connect(addr, timeout, Ok(1), None, PollEvents::OUT).is_ok());
    }

    #[test]
    fn segment_size_by_family() {
        assert_eq!(min_segment_size(&"1.2.3.4:1".parse().unwrap()), 536);
        assert_eq!(min_segment_size(&"[::1]:1".parse().unwrap()), 1220);
    }

    #[test]
    fn connect_to_listener_returns_blocking_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let socket = connect_tcp_socket(addr, Duration::from_secs(3)).unwrap();
        assert_eq!(socket.peer_addr().unwrap().as_socket(), Some(addr));
        #[cfg(unix)]
        assert!(!socket.nonblocking().unwrap());
    }

    #[test]
    fn connect_refused_surfaces_refusal() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = connect_tcp_socket(addr, Duration::from_secs(3)).unwrap_err();
        assert!(err.is_refused(), "unexpected error: {err}");
        assert!(!err.is_timeout());
    }
}
