//! POSIX socket primitives.

use std::ffi::{CStr, CString};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::{AsRawFd, RawFd};
use std::ptr;
use std::time::Duration;

use socket2::Socket;

use crate::config::AddressFamily;
use crate::error::{ErrorCode, GENERIC_FAILURE, LinkError};
use crate::net::poll::{PollEvents, PollFd, timeout_ms};

pub(crate) type RawHandle = RawFd;

pub(crate) fn raw_handle(socket: &Socket) -> RawHandle {
    socket.as_raw_fd()
}

// ── Poll ─────────────────────────────────────────────────────────

const EVENT_MAP: [(PollEvents, libc::c_short); 7] = [
    (PollEvents::IN, libc::POLLIN),
    (PollEvents::OUT, libc::POLLOUT),
    (PollEvents::RDNORM, libc::POLLRDNORM),
    (PollEvents::WRNORM, libc::POLLWRNORM),
    (PollEvents::ERR, libc::POLLERR),
    (PollEvents::HUP, libc::POLLHUP),
    (PollEvents::NVAL, libc::POLLNVAL),
];

fn to_native(events: PollEvents) -> libc::c_short {
    EVENT_MAP
        .iter()
        .filter(|(ours, _)| events.contains(*ours))
        .fold(0, |acc, (_, native)| acc | native)
}

fn from_native(revents: libc::c_short) -> PollEvents {
    EVENT_MAP
        .iter()
        .filter(|(_, native)| revents & native != 0)
        .fold(PollEvents::empty(), |acc, (ours, _)| acc | *ours)
}

pub(crate) fn poll(fds: &mut [PollFd], timeout: Option<Duration>) -> io::Result<usize> {
    let mut native: Vec<libc::pollfd> = fds
        .iter()
        .map(|fd| libc::pollfd {
            fd: fd.handle,
            events: to_native(fd.events),
            revents: 0,
        })
        .collect();

    // SAFETY: `native` is a live, correctly sized array of pollfd.
    let rc = unsafe {
        libc::poll(
            native.as_mut_ptr(),
            native.len() as libc::nfds_t,
            timeout_ms(timeout),
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    for (fd, n) in fds.iter_mut().zip(&native) {
        fd.revents = from_native(n.revents);
    }
    Ok(rc as usize)
}

// ── Socket options ───────────────────────────────────────────────

pub(crate) fn configure_new_socket(socket: &Socket) {
    #[cfg(target_vendor = "apple")]
    if let Err(e) = socket.set_nosigpipe(true) {
        tracing::warn!("setsockopt(SO_NOSIGPIPE) failed: {e}");
    }
    #[cfg(not(target_vendor = "apple"))]
    let _ = socket;
}

#[cfg(any(target_vendor = "apple", target_os = "freebsd"))]
fn set_int_option(socket: &Socket, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> io::Result<()> {
    // SAFETY: `value` outlives the call and the length matches its type.
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            name,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Force the smallest segment size the path must support.
///
/// BSD-derived stacks ignore TCP_MAXSEG on outbound connects, so there
/// the SYN is stripped of options instead, which makes the peer fall
/// back to the protocol minimum.
#[cfg(any(target_vendor = "apple", target_os = "freebsd"))]
pub(crate) fn clamp_segment_size(socket: &Socket, _mss: u32) -> io::Result<()> {
    set_int_option(socket, libc::IPPROTO_TCP, libc::TCP_NOOPT, 1)
}

#[cfg(not(any(target_vendor = "apple", target_os = "freebsd")))]
pub(crate) fn clamp_segment_size(socket: &Socket, mss: u32) -> io::Result<()> {
    socket.set_mss(mss)
}

pub(crate) fn set_nonfatal_recv_timeout(socket: &Socket, timeout: Duration) -> Result<(), LinkError> {
    socket.set_read_timeout(Some(timeout))?;
    Ok(())
}

// ── Name resolution ──────────────────────────────────────────────

/// `getaddrinfo` for TCP with `AI_ADDRCONFIG`, so families with no
/// configured interface are never offered as candidates.
///
/// Failures carry the resolver's status code alongside the error.
pub(crate) fn lookup_host(
    host: &str,
    family: AddressFamily,
) -> Result<Vec<SocketAddr>, (ErrorCode, io::Error)> {
    let c_host = CString::new(host)
        .map_err(|e| (GENERIC_FAILURE, io::Error::new(io::ErrorKind::InvalidInput, e)))?;

    // SAFETY: addrinfo is plain data; all-zero is the documented empty hint.
    let mut hints: libc::addrinfo = unsafe { std::mem::zeroed() };
    hints.ai_family = match family {
        AddressFamily::Any => libc::AF_UNSPEC,
        AddressFamily::V4 => libc::AF_INET,
        AddressFamily::V6 => libc::AF_INET6,
    };
    hints.ai_flags = libc::AI_ADDRCONFIG;
    hints.ai_socktype = libc::SOCK_STREAM;
    hints.ai_protocol = libc::IPPROTO_TCP;

    let mut res: *mut libc::addrinfo = ptr::null_mut();
    // SAFETY: `c_host` and `hints` outlive the call; `res` is freed below.
    let rc = unsafe { libc::getaddrinfo(c_host.as_ptr(), ptr::null(), &hints, &mut res) };
    if rc != 0 {
        let source = if rc == libc::EAI_SYSTEM {
            io::Error::last_os_error()
        } else {
            // SAFETY: gai_strerror returns a static NUL-terminated string.
            let msg = unsafe { CStr::from_ptr(libc::gai_strerror(rc)) };
            io::Error::other(msg.to_string_lossy().into_owned())
        };
        return Err((rc, source));
    }

    let mut addrs = Vec::new();
    let mut cur = res;
    while !cur.is_null() {
        // SAFETY: `cur` walks the list getaddrinfo returned.
        let ai = unsafe { &*cur };
        // SAFETY: `ai_addr` points at a sockaddr of family `ai_family`.
        if let Some(addr) = unsafe { to_socket_addr(ai) } {
            addrs.push(addr);
        }
        cur = ai.ai_next;
    }
    // SAFETY: `res` came from a successful getaddrinfo and is freed once.
    unsafe { libc::freeaddrinfo(res) };
    Ok(addrs)
}

/// Copy an addrinfo entry out, scope id included.
///
/// # Safety
/// `ai.ai_addr` must be null or point at a sockaddr of `ai.ai_family`.
unsafe fn to_socket_addr(ai: &libc::addrinfo) -> Option<SocketAddr> {
    if ai.ai_addr.is_null() {
        return None;
    }
    match ai.ai_family {
        libc::AF_INET => {
            // SAFETY: family checked above.
            let sin = unsafe { &*(ai.ai_addr as *const libc::sockaddr_in) };
            Some(SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)),
                u16::from_be(sin.sin_port),
            )))
        }
        libc::AF_INET6 => {
            // SAFETY: family checked above.
            let sin6 = unsafe { &*(ai.ai_addr as *const libc::sockaddr_in6) };
            Some(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(sin6.sin6_addr.s6_addr),
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        _ => None,
    }
}

// ── Error classification ─────────────────────────────────────────

/// A receive error left behind by an earlier ICMP port unreachable.
pub(crate) fn is_icmp_unreachable(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ECONNREFUSED)
}

pub(crate) fn is_connect_in_progress(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EINPROGRESS)
}

// ── Process-wide state ───────────────────────────────────────────

/// Ignore SIGPIPE so a write to a dead peer returns EPIPE instead of
/// killing the process.
pub(crate) fn init_sockets() -> io::Result<()> {
    // SAFETY: installs SIG_IGN with an empty mask; no handler code runs.
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = libc::SIG_IGN;
        sa.sa_flags = 0;
        libc::sigemptyset(&mut sa.sa_mask);
        if libc::sigaction(libc::SIGPIPE, &sa, std::ptr::null_mut()) == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

pub(crate) fn cleanup_sockets() {}

/// Nothing to tune on POSIX targets.
#[derive(Debug, Default)]
pub(crate) struct LowLatencyState;

impl LowLatencyState {
    pub(crate) fn enter() -> Self {
        Self
    }

    pub(crate) fn exit(&mut self) {}

    pub(crate) fn tuned_interfaces(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_mapping_is_symmetric() {
        let all = PollEvents::all();
        assert_eq!(from_native(to_native(all)), all);
        assert_eq!(to_native(PollEvents::IN), libc::POLLIN);
        assert_eq!(from_native(libc::POLLOUT | libc::POLLERR), PollEvents::OUT | PollEvents::ERR);
    }

    #[test]
    fn unknown_host_reports_resolver_code() {
        let (code, _) = lookup_host("no-such-host.invalid", AddressFamily::Any).unwrap_err();
        assert_ne!(code, 0);
        assert_ne!(code, GENERIC_FAILURE);
    }

    #[test]
    fn interior_nul_is_rejected() {
        let (code, err) = lookup_host("bad\0host", AddressFamily::Any).unwrap_err();
        assert_eq!(code, GENERIC_FAILURE);
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn icmp_error_classification() {
        assert!(is_icmp_unreachable(&io::Error::from_raw_os_error(libc::ECONNREFUSED)));
        assert!(!is_icmp_unreachable(&io::Error::from_raw_os_error(libc::ECONNRESET)));
        assert!(is_connect_in_progress(&io::Error::from_raw_os_error(libc::EINPROGRESS)));
    }
}
