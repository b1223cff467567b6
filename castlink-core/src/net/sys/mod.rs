//! Per-platform implementations of the socket primitives.
//!
//! Each file exposes the same set of items; the rest of the crate
//! never branches on the target OS.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub(crate) use unix::*;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub(crate) use self::windows::*;
