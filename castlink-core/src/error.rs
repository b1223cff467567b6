//! Domain-specific error types for castlink.
//!
//! Socket and resolution primitives return `Result<T, LinkError>`.
//! A failed session bring-up is reported as a [`StartError`] carrying
//! the stage that failed and the collaborator's integer code.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::stage::Stage;

/// Integer error code exchanged with stream subsystems and listeners.
///
/// `0` is never used for a failure; codes are forwarded unchanged.
pub type ErrorCode = i32;

/// Code used when no more specific OS error is available.
pub const GENERIC_FAILURE: ErrorCode = -1;

/// The canonical error type for the socket primitive layer.
#[derive(Debug, Error)]
pub enum LinkError {
    // ── Resolution Errors ────────────────────────────────────────
    /// The resolver itself failed (unknown host, resolver unreachable).
    ///
    /// `code` is the resolver's own status (a `getaddrinfo` code on
    /// POSIX, a Winsock error on Windows).
    #[error("name resolution failed for {host} ({code}): {source}")]
    Dns {
        host: String,
        code: ErrorCode,
        #[source]
        source: io::Error,
    },

    /// The resolver succeeded without producing a usable address.
    #[error("no addresses returned for {host}")]
    NoAddresses { host: String },

    /// Every candidate address failed its reachability test.
    #[error("no reachable address found for {host}")]
    NoReachableAddress { host: String },

    // ── Connection Errors ────────────────────────────────────────
    /// A non-blocking connect did not complete before its deadline.
    #[error("connection to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: SocketAddr, timeout: Duration },

    /// The operation cannot be performed safely on this platform.
    #[error("unsupported on this platform: {0}")]
    Unsupported(&'static str),

    /// The socket layer reported an error.
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

impl LinkError {
    /// Integer code reported through stage-failed notifications.
    ///
    /// Uses the OS error number when there is one.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Dns { code, .. } => *code,
            Self::Io(e) => e.raw_os_error().unwrap_or(GENERIC_FAILURE),
            Self::ConnectTimeout { .. } => timed_out_code(),
            Self::NoAddresses { .. } | Self::NoReachableAddress { .. } | Self::Unsupported(_) => {
                GENERIC_FAILURE
            }
        }
    }

    /// Returns `true` for the dedicated connect-timeout outcome.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectTimeout { .. })
    }

    /// Returns `true` when the remote end actively refused the connection.
    pub fn is_refused(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == io::ErrorKind::ConnectionRefused)
    }
}

#[cfg(unix)]
fn timed_out_code() -> ErrorCode {
    libc::ETIMEDOUT
}

#[cfg(windows)]
fn timed_out_code() -> ErrorCode {
    windows::Win32::Networking::WinSock::WSAETIMEDOUT.0
}

#[cfg(not(any(unix, windows)))]
fn timed_out_code() -> ErrorCode {
    GENERIC_FAILURE
}

// ── StartError ────────────────────────────────────────────────────

/// A session bring-up failure.
///
/// By the time this is returned every stage reached before `stage` has
/// already been torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{stage} failed with code {code}")]
pub struct StartError {
    /// The stage whose action failed.
    pub stage: Stage,
    /// The code reported by the failing action.
    pub code: ErrorCode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = LinkError::NoReachableAddress {
            host: "pc.local".into(),
        };
        assert!(e.to_string().contains("pc.local"));

        let e = LinkError::ConnectTimeout {
            addr: "10.0.0.2:47984".parse().unwrap(),
            timeout: Duration::from_secs(3),
        };
        assert!(e.to_string().contains("10.0.0.2:47984"));
        assert!(e.is_timeout());
        assert!(!e.is_refused());
    }

    #[test]
    fn from_io() {
        let io_err = io::Error::from(io::ErrorKind::ConnectionRefused);
        let e: LinkError = io_err.into();
        assert!(e.is_refused());
        assert_eq!(e.code(), GENERIC_FAILURE);
    }

    #[test]
    fn os_error_code_is_forwarded() {
        let e = LinkError::Io(io::Error::from_raw_os_error(111));
        assert_eq!(e.code(), 111);
    }

    #[test]
    fn resolution_failures_are_distinct() {
        let dns = LinkError::Dns {
            host: "x".into(),
            code: -2,
            source: io::Error::other("lookup failed"),
        };
        assert_eq!(dns.code(), -2);
        let unreachable = LinkError::NoReachableAddress { host: "x".into() };
        assert!(!matches!(dns, LinkError::NoReachableAddress { .. }));
        assert!(!matches!(unreachable, LinkError::Dns { .. }));
    }

    #[test]
    fn start_error_display() {
        let e = StartError {
            stage: Stage::RtspHandshake,
            code: 404,
        };
        assert_eq!(e.to_string(), "RTSP handshake failed with code 404");
    }
}
