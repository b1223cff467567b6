//! # castlink-core
//!
//! Connection bring-up and socket primitives for a game-streaming client.
//!
//! This crate contains:
//! - **Session**: `Session`, a staged start/stop state machine with rollback
//! - **Stages**: `Stage`, the ordered bring-up steps and their names
//! - **Callbacks**: `ConnectionListener`, `VideoRenderer`, `AudioRenderer`,
//!   `PlatformCallbacks` and the `CallbackSet` bundling them
//! - **Config**: `StreamConfiguration` and the resolution options it carries
//! - **Network**: socket creation, polling, UDP receive, TCP connect with
//!   timeout, name resolution with reachability probing, address helpers
//! - **Error**: `LinkError` and `StartError`, typed `thiserror` errors

pub mod callbacks;
pub mod config;
pub mod error;
pub mod net;
pub mod session;
pub mod stage;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use callbacks::{
    AudioRenderer, CallbackSet, ConnectionListener, DecoderFlags, LatchedListener, Noop,
    PlatformCallbacks, RenderContext, VideoRenderer,
};
pub use config::{AddressFamily, AudioConfiguration, ReachabilityProbe, StreamConfiguration};
pub use error::{ErrorCode, GENERIC_FAILURE, LinkError, StartError};
pub use session::{HostResolver, Session, SessionContext, StreamSubsystems, SystemResolver};
pub use stage::{Stage, stage_name};
