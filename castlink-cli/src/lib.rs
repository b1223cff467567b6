//! # castlink-cli
//!
//! Command-line front end for `castlink-core`. Resolves and probes a
//! streaming host, and runs a full session bring-up against it using
//! subsystems that open the real socket for every stream.

pub mod config;
pub mod probing;
