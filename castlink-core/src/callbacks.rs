//! Capability interfaces supplied by the embedding application.
//!
//! Every method has a no-op default, so an implementation only
//! overrides what it cares about and the session can call any member
//! unconditionally. [`CallbackSet`] bundles the four interfaces and
//! substitutes no-op implementations for the ones not supplied.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bitflags::bitflags;

use crate::config::StreamConfiguration;
use crate::error::ErrorCode;
use crate::stage::Stage;

/// Opaque renderer state passed through to the video stream at start.
pub type RenderContext = Arc<dyn Any + Send + Sync>;

bitflags! {
    /// Decoder capabilities passed through to the video stream at start.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DecoderFlags: u32 {
        /// Decode units are submitted on the receive thread.
        const DIRECT_SUBMIT = 0x1;
        /// Decoder can recover from H.264 reference frame invalidation.
        const REFERENCE_FRAME_INVALIDATION_AVC = 0x2;
        /// Decoder can recover from HEVC reference frame invalidation.
        const REFERENCE_FRAME_INVALIDATION_HEVC = 0x4;

        const _ = !0;
    }
}

// ── Capability traits ────────────────────────────────────────────

/// Connection lifecycle notifications.
pub trait ConnectionListener: Send + Sync {
    fn stage_starting(&self, _stage: Stage) {}
    fn stage_complete(&self, _stage: Stage) {}
    fn stage_failed(&self, _stage: Stage, _code: ErrorCode) {}
    fn connection_started(&self) {}
    /// The established connection was lost.
    ///
    /// Delivered at most once per session.
    fn connection_terminated(&self, _code: ErrorCode) {}
}

/// Video decoder and renderer hooks.
pub trait VideoRenderer: Send + Sync {
    fn setup(
        &self,
        _config: &StreamConfiguration,
        _render_context: Option<&RenderContext>,
        _flags: DecoderFlags,
    ) -> Result<(), ErrorCode> {
        Ok(())
    }
    fn start(&self) {}
    fn stop(&self) {}
    fn cleanup(&self) {}
    /// Hand one complete decode unit to the decoder.
    fn submit_decode_unit(&self, _unit: &[u8]) -> Result<(), ErrorCode> {
        Ok(())
    }
}

/// Audio decoder and renderer hooks.
pub trait AudioRenderer: Send + Sync {
    fn init(&self, _config: &StreamConfiguration) -> Result<(), ErrorCode> {
        Ok(())
    }
    fn start(&self) {}
    fn stop(&self) {}
    fn cleanup(&self) {}
    fn decode_and_play_sample(&self, _sample: &[u8]) {}
}

/// Platform hooks.
pub trait PlatformCallbacks: Send + Sync {
    /// A stream worker thread named `name` has started running.
    fn thread_started(&self, _name: &str) {}
}

/// Implements every capability trait with the default no-ops.
#[derive(Debug, Clone, Copy, Default)]
pub struct Noop;

impl ConnectionListener for Noop {}
impl VideoRenderer for Noop {}
impl AudioRenderer for Noop {}
impl PlatformCallbacks for Noop {}

// ── CallbackSet ──────────────────────────────────────────────────

/// The four capability sets a session is started with.
///
/// Unset members are [`Noop`].
#[derive(Clone)]
pub struct CallbackSet {
    pub listener: Arc<dyn ConnectionListener>,
    pub video: Arc<dyn VideoRenderer>,
    pub audio: Arc<dyn AudioRenderer>,
    pub platform: Arc<dyn PlatformCallbacks>,
}

impl Default for CallbackSet {
    fn default() -> Self {
        Self {
            listener: Arc::new(Noop),
            video: Arc::new(Noop),
            audio: Arc::new(Noop),
            platform: Arc::new(Noop),
        }
    }
}

impl CallbackSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listener(mut self, listener: Arc<dyn ConnectionListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn with_video(mut self, video: Arc<dyn VideoRenderer>) -> Self {
        self.video = video;
        self
    }

    pub fn with_audio(mut self, audio: Arc<dyn AudioRenderer>) -> Self {
        self.audio = audio;
        self
    }

    pub fn with_platform(mut self, platform: Arc<dyn PlatformCallbacks>) -> Self {
        self.platform = platform;
        self
    }
}

impl std::fmt::Debug for CallbackSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSet").finish_non_exhaustive()
    }
}

// ── LatchedListener ──────────────────────────────────────────────

/// Wraps the caller's listener so that `connection_terminated` is
/// delivered at most once.
///
/// The latch is a single atomic flag; the first writer wins, whether
/// that is a stream worker reporting loss or the session being
/// stopped. Every other notification is forwarded unchanged.
pub struct LatchedListener {
    inner: Arc<dyn ConnectionListener>,
    terminated: AtomicBool,
}

impl LatchedListener {
    pub fn new(inner: Arc<dyn ConnectionListener>) -> Self {
        Self {
            inner,
            terminated: AtomicBool::new(false),
        }
    }

    /// Suppress any later termination notification.
    pub fn latch(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    /// Whether termination has been reported or suppressed.
    pub fn is_latched(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

impl ConnectionListener for LatchedListener {
    fn stage_starting(&self, stage: Stage) {
        self.inner.stage_starting(stage);
    }

    fn stage_complete(&self, stage: Stage) {
        self.inner.stage_complete(stage);
    }

    fn stage_failed(&self, stage: Stage, code: ErrorCode) {
        self.inner.stage_failed(stage, code);
    }

    fn connection_started(&self) {
        self.inner.connection_started();
    }

    fn connection_terminated(&self, code: ErrorCode) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.connection_terminated(code);
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingListener {
        terminated: AtomicUsize,
        codes: Mutex<Vec<ErrorCode>>,
    }

    impl ConnectionListener for CountingListener {
        fn connection_terminated(&self, code: ErrorCode) {
            self.terminated.fetch_add(1, Ordering::SeqCst);
            self.codes.lock().unwrap().push(code);
        }
    }

    #[test]
    fn termination_delivered_once() {
        let inner = Arc::new(CountingListener::default());
        let latched = LatchedListener::new(inner.clone());

        latched.connection_terminated(5);
        latched.connection_terminated(6);
        latched.connection_terminated(7);

        assert_eq!(inner.terminated.load(Ordering::SeqCst), 1);
        assert_eq!(*inner.codes.lock().unwrap(), vec![5]);
    }

    #[test]
    fn latch_suppresses_termination() {
        let inner = Arc::new(CountingListener::default());
        let latched = LatchedListener::new(inner.clone());

        latched.latch();
        latched.connection_terminated(1);

        assert!(latched.is_latched());
        assert_eq!(inner.terminated.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn concurrent_termination_fires_once() {
        let inner = Arc::new(CountingListener::default());
        let latched = Arc::new(LatchedListener::new(inner.clone()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let latched = latched.clone();
                std::thread::spawn(move || latched.connection_terminated(i))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(inner.terminated.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_set_is_callable() {
        let set = CallbackSet::new();
        set.listener.stage_starting(Stage::PlatformInit);
        set.listener.connection_terminated(-1);
        assert!(
            set.video
                .setup(&StreamConfiguration::default(), None, DecoderFlags::empty())
                .is_ok()
        );
        assert!(set.audio.init(&StreamConfiguration::default()).is_ok());
        set.platform.thread_started("video");
    }

    #[test]
    fn unknown_decoder_bits_are_preserved() {
        let flags = DecoderFlags::from_bits_retain(0x8001);
        assert!(flags.contains(DecoderFlags::DIRECT_SUBMIT));
        assert_eq!(flags.bits(), 0x8001);
    }
}
