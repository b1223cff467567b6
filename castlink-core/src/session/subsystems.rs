//! The collaborators a session drives through its stages.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::callbacks::{
    AudioRenderer, CallbackSet, DecoderFlags, LatchedListener, PlatformCallbacks, RenderContext,
    VideoRenderer,
};
use crate::config::{AddressFamily, ReachabilityProbe, StreamConfiguration};
use crate::error::{ErrorCode, LinkError};
use crate::net::resolve_host_name;

// ── SessionContext ───────────────────────────────────────────────

/// Everything a session owns: copies of the caller's configuration
/// and callbacks, and what was learned while connecting.
pub struct SessionContext {
    /// Host name or address literal the session was started with.
    pub host: String,
    pub config: StreamConfiguration,
    pub server_major_version: u32,
    /// Set once name resolution succeeds; reused by every stream.
    ///
    /// The port is 0. Streams replace only the port, which keeps an
    /// IPv6 scope id intact.
    pub remote_addr: Option<SocketAddr>,
    /// Lifecycle listener. Stream workers report loss through
    /// `connection_terminated`, which reaches the caller at most once.
    pub listener: Arc<LatchedListener>,
    pub video: Arc<dyn VideoRenderer>,
    pub audio: Arc<dyn AudioRenderer>,
    pub platform: Arc<dyn PlatformCallbacks>,
}

impl SessionContext {
    pub(crate) fn new(
        host: &str,
        config: &StreamConfiguration,
        callbacks: &CallbackSet,
        server_major_version: u32,
    ) -> Self {
        Self {
            host: host.to_string(),
            config: config.clone(),
            server_major_version,
            remote_addr: None,
            listener: Arc::new(LatchedListener::new(callbacks.listener.clone())),
            video: callbacks.video.clone(),
            audio: callbacks.audio.clone(),
            platform: callbacks.platform.clone(),
        }
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new("", &StreamConfiguration::default(), &CallbackSet::default(), 0)
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("host", &self.host)
            .field("server_major_version", &self.server_major_version)
            .field("remote_addr", &self.remote_addr)
            .finish_non_exhaustive()
    }
}

// ── StreamSubsystems ─────────────────────────────────────────────

/// Entry points of the platform layer, the RTSP handshake and the four
/// stream workers.
///
/// The session calls `initialize`/`start` on the way up and the paired
/// `stop`/`destroy`/`cleanup`/`terminate` on the way down, each at most
/// once per bring-up. Video, audio and input initialization cannot
/// fail; every other step reports failure with an opaque code that is
/// forwarded to the caller unchanged.
pub trait StreamSubsystems: Send {
    fn initialize_platform(&mut self) -> Result<(), ErrorCode>;
    fn cleanup_platform(&mut self);

    fn perform_rtsp_handshake(&mut self, ctx: &SessionContext) -> Result<(), ErrorCode>;
    fn terminate_rtsp_handshake(&mut self);

    fn initialize_control_stream(&mut self, ctx: &SessionContext) -> Result<(), ErrorCode>;
    fn start_control_stream(&mut self, ctx: &SessionContext) -> Result<(), ErrorCode>;
    fn stop_control_stream(&mut self);
    fn destroy_control_stream(&mut self);

    fn initialize_video_stream(&mut self, ctx: &SessionContext);
    fn start_video_stream(
        &mut self,
        ctx: &SessionContext,
        render_context: Option<&RenderContext>,
        flags: DecoderFlags,
    ) -> Result<(), ErrorCode>;
    fn stop_video_stream(&mut self);
    fn destroy_video_stream(&mut self);

    fn initialize_audio_stream(&mut self, ctx: &SessionContext);
    fn start_audio_stream(&mut self, ctx: &SessionContext) -> Result<(), ErrorCode>;
    fn stop_audio_stream(&mut self);
    fn destroy_audio_stream(&mut self);

    /// `key` and `iv` protect the input stream.
    fn initialize_input_stream(&mut self, ctx: &SessionContext, key: &[u8], iv: &[u8]);
    fn start_input_stream(&mut self, ctx: &SessionContext) -> Result<(), ErrorCode>;
    fn stop_input_stream(&mut self);
    fn destroy_input_stream(&mut self);
}

// ── HostResolver ─────────────────────────────────────────────────

/// Name resolution used by the session's resolution stage.
pub trait HostResolver: Send {
    fn resolve(
        &self,
        host: &str,
        family: AddressFamily,
        probe: Option<ReachabilityProbe>,
    ) -> Result<SocketAddr, LinkError>;
}

/// Resolves through the system resolver with reachability probing.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl HostResolver for SystemResolver {
    fn resolve(
        &self,
        host: &str,
        family: AddressFamily,
        probe: Option<ReachabilityProbe>,
    ) -> Result<SocketAddr, LinkError> {
        resolve_host_name(host, family, probe)
    }
}

impl<F> HostResolver for F
where
    F: Fn(&str, AddressFamily, Option<ReachabilityProbe>) -> Result<SocketAddr, LinkError> + Send,
{
    fn resolve(
        &self,
        host: &str,
        family: AddressFamily,
        probe: Option<ReachabilityProbe>,
    ) -> Result<SocketAddr, LinkError> {
        self(host, family, probe)
    }
}
