//! Session bring-up and teardown.
//!
//! [`Session::start`] walks every [`Stage`] in ascending order. Each
//! successful stage pushes its compensating action onto a rollback
//! stack; the first failure pops and runs that stack, so the caller
//! never sees a half-started session. [`Session::stop`] runs the same
//! stack from wherever the session currently is.

mod subsystems;

pub use subsystems::{HostResolver, SessionContext, StreamSubsystems, SystemResolver};

use std::net::SocketAddr;

use tracing::{info, warn};

use crate::callbacks::{CallbackSet, ConnectionListener, DecoderFlags, RenderContext};
use crate::config::StreamConfiguration;
use crate::error::{ErrorCode, StartError};
use crate::stage::Stage;

// ── Teardown ─────────────────────────────────────────────────────

/// The action that undoes one completed stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    CleanupPlatform,
    ForgetAddress,
    TerminateRtsp,
    DestroyControl,
    DestroyVideo,
    DestroyAudio,
    DestroyInput,
    StopControl,
    StopVideo,
    StopAudio,
    StopInput,
}

impl Teardown {
    /// The compensating action for `stage`.
    fn undoing(stage: Stage) -> Option<Self> {
        Some(match stage {
            Stage::None => return None,
            Stage::PlatformInit => Self::CleanupPlatform,
            Stage::NameResolution => Self::ForgetAddress,
            Stage::RtspHandshake => Self::TerminateRtsp,
            Stage::ControlStreamInit => Self::DestroyControl,
            Stage::VideoStreamInit => Self::DestroyVideo,
            Stage::AudioStreamInit => Self::DestroyAudio,
            Stage::InputStreamInit => Self::DestroyInput,
            Stage::ControlStreamStart => Self::StopControl,
            Stage::VideoStreamStart => Self::StopVideo,
            Stage::AudioStreamStart => Self::StopAudio,
            Stage::InputStreamStart => Self::StopInput,
        })
    }

    fn stage(self) -> Stage {
        match self {
            Self::CleanupPlatform => Stage::PlatformInit,
            Self::ForgetAddress => Stage::NameResolution,
            Self::TerminateRtsp => Stage::RtspHandshake,
            Self::DestroyControl => Stage::ControlStreamInit,
            Self::DestroyVideo => Stage::VideoStreamInit,
            Self::DestroyAudio => Stage::AudioStreamInit,
            Self::DestroyInput => Stage::InputStreamInit,
            Self::StopControl => Stage::ControlStreamStart,
            Self::StopVideo => Stage::VideoStreamStart,
            Self::StopAudio => Stage::AudioStreamStart,
            Self::StopInput => Stage::InputStreamStart,
        }
    }

    fn description(self) -> &'static str {
        match self {
            Self::CleanupPlatform => "cleaning up platform",
            Self::ForgetAddress => "forgetting resolved address",
            Self::TerminateRtsp => "terminating RTSP handshake",
            Self::DestroyControl => "cleaning up control stream",
            Self::DestroyVideo => "cleaning up video stream",
            Self::DestroyAudio => "cleaning up audio stream",
            Self::DestroyInput => "cleaning up input stream",
            Self::StopControl => "stopping control stream",
            Self::StopVideo => "stopping video stream",
            Self::StopAudio => "stopping audio stream",
            Self::StopInput => "stopping input stream",
        }
    }

    fn run(self, subsystems: &mut dyn StreamSubsystems, ctx: &mut SessionContext) {
        match self {
            Self::CleanupPlatform => subsystems.cleanup_platform(),
            Self::ForgetAddress => ctx.remote_addr = None,
            Self::TerminateRtsp => subsystems.terminate_rtsp_handshake(),
            Self::DestroyControl => subsystems.destroy_control_stream(),
            Self::DestroyVideo => subsystems.destroy_video_stream(),
            Self::DestroyAudio => subsystems.destroy_audio_stream(),
            Self::DestroyInput => subsystems.destroy_input_stream(),
            Self::StopControl => subsystems.stop_control_stream(),
            Self::StopVideo => subsystems.stop_video_stream(),
            Self::StopAudio => subsystems.stop_audio_stream(),
            Self::StopInput => subsystems.stop_input_stream(),
        }
    }
}

// ── Session ──────────────────────────────────────────────────────

/// A streaming session against one host.
///
/// Bring-up and teardown are synchronous and must not overlap; the
/// `&mut self` receivers enforce that. Only the termination latch in
/// [`SessionContext::listener`] is shared with other threads.
pub struct Session {
    subsystems: Box<dyn StreamSubsystems>,
    resolver: Box<dyn HostResolver>,
    stage: Stage,
    rollback: Vec<Teardown>,
    context: SessionContext,
}

impl Session {
    /// A session that resolves hosts through the system resolver.
    pub fn new(subsystems: Box<dyn StreamSubsystems>) -> Self {
        Self::with_resolver(subsystems, Box::new(SystemResolver))
    }

    pub fn with_resolver(
        subsystems: Box<dyn StreamSubsystems>,
        resolver: Box<dyn HostResolver>,
    ) -> Self {
        Self {
            subsystems,
            resolver,
            stage: Stage::None,
            rollback: Vec::with_capacity(Stage::LAST.index()),
            context: SessionContext::default(),
        }
    }

    /// The highest stage reached and not yet torn down.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Whether every stage completed and the session is live.
    pub fn is_started(&self) -> bool {
        self.stage == Stage::LAST
    }

    /// The address chosen by name resolution, while it is in effect.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.context.remote_addr
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Bring the session up against `host`.
    ///
    /// Configuration and callbacks are copied in. The listener hears
    /// `stage_starting` and then `stage_complete` or `stage_failed` for
    /// each stage attempted, and `connection_started` on success. On
    /// failure every completed stage is torn down, without further
    /// listener notifications, before the failing stage's code is
    /// returned.
    pub fn start(
        &mut self,
        host: &str,
        config: &StreamConfiguration,
        callbacks: &CallbackSet,
        render_context: Option<RenderContext>,
        flags: DecoderFlags,
        server_major_version: u32,
    ) -> Result<(), StartError> {
        if self.stage != Stage::None {
            warn!("starting over a live session at {}; stopping it first", self.stage);
            self.stop();
        }

        self.context = SessionContext::new(host, config, callbacks, server_major_version);
        let listener = self.context.listener.clone();

        for &stage in &Stage::ALL[1..] {
            info!("{stage}: starting");
            listener.stage_starting(stage);

            if let Err(code) = self.perform(stage, render_context.as_ref(), flags) {
                warn!("{stage} failed: {code}");
                listener.stage_failed(stage, code);
                listener.latch();
                self.unwind();
                return Err(StartError { stage, code });
            }

            self.complete(stage);
            listener.stage_complete(stage);
            info!("{stage}: done");
        }

        listener.connection_started();
        Ok(())
    }

    /// Tear the session down from whatever stage it reached.
    ///
    /// Suppresses any termination notification still in flight from a
    /// stream worker. Calling this on an idle session does nothing.
    pub fn stop(&mut self) {
        self.context.listener.latch();
        if self.stage == Stage::None {
            return;
        }
        info!("stopping connection from {}", self.stage);
        self.unwind();
    }

    /// Run the action for `stage`.
    fn perform(
        &mut self,
        stage: Stage,
        render_context: Option<&RenderContext>,
        flags: DecoderFlags,
    ) -> Result<(), ErrorCode> {
        let subsystems = self.subsystems.as_mut();
        let ctx = &mut self.context;

        match stage {
            Stage::None => Ok(()),
            Stage::PlatformInit => subsystems.initialize_platform(),
            Stage::NameResolution => {
                let addr = self
                    .resolver
                    .resolve(&ctx.host, ctx.config.address_family, ctx.config.reachability)
                    .map_err(|e| e.code())?;
                info!("resolved {} to {addr}", ctx.host);
                ctx.remote_addr = Some(addr);
                Ok(())
            }
            Stage::RtspHandshake => subsystems.perform_rtsp_handshake(ctx),
            Stage::ControlStreamInit => subsystems.initialize_control_stream(ctx),
            Stage::VideoStreamInit => {
                subsystems.initialize_video_stream(ctx);
                Ok(())
            }
            Stage::AudioStreamInit => {
                subsystems.initialize_audio_stream(ctx);
                Ok(())
            }
            Stage::InputStreamInit => {
                let key = ctx.config.remote_input_aes_key;
                let iv = ctx.config.remote_input_aes_iv;
                subsystems.initialize_input_stream(ctx, &key, &iv);
                Ok(())
            }
            Stage::ControlStreamStart => subsystems.start_control_stream(ctx),
            Stage::VideoStreamStart => subsystems.start_video_stream(ctx, render_context, flags),
            Stage::AudioStreamStart => subsystems.start_audio_stream(ctx),
            Stage::InputStreamStart => subsystems.start_input_stream(ctx),
        }
    }

    /// Record `stage` as done: push its compensation, advance one step.
    fn complete(&mut self, stage: Stage) {
        debug_assert_eq!(self.stage.next(), Some(stage), "stages advance one at a time");
        if let Some(teardown) = Teardown::undoing(stage) {
            self.rollback.push(teardown);
        }
        self.stage.advance();
        debug_assert_eq!(self.stage, stage);
        debug_assert_eq!(self.rollback.len(), self.stage.index());
    }

    /// Pop and run compensations until the session is back at `None`,
    /// then drop the session context.
    fn unwind(&mut self) {
        while let Some(teardown) = self.rollback.pop() {
            debug_assert_eq!(teardown.stage(), self.stage, "teardown out of step with stage");
            info!("{}", teardown.description());
            teardown.run(self.subsystems.as_mut(), &mut self.context);
            self.stage.retreat();
            debug_assert_eq!(self.rollback.len(), self.stage.index());
        }
        debug_assert_eq!(self.stage, Stage::None, "teardown must end at stage none");
        self.context = SessionContext::default();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("stage", &self.stage)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

// ── Tests ────────────────────────────────────────────────────────
