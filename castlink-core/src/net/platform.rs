//! Process-wide socket runtime setup and low-latency tuning.

use std::io;

use tracing::{debug, info};

use super::sys;

/// Best-effort OS tuning that reduces network jitter while streaming.
///
/// Entering never fails; whatever could not be changed is left alone.
/// Dropping the value (or calling [`exit`](Self::exit)) reverts exactly
/// what was changed.
pub struct LowLatencyMode {
    state: sys::LowLatencyState,
}

impl LowLatencyMode {
    pub fn enter() -> Self {
        let state = sys::LowLatencyState::enter();
        debug!(
            "low latency mode entered ({} wireless interfaces tuned)",
            state.tuned_interfaces()
        );
        Self { state }
    }

    /// Number of wireless interfaces switched to media-streaming mode.
    pub fn tuned_interfaces(&self) -> usize {
        self.state.tuned_interfaces()
    }

    pub fn exit(mut self) {
        self.state.exit();
    }
}

impl Drop for LowLatencyMode {
    fn drop(&mut self) {
        self.state.exit();
    }
}

impl std::fmt::Debug for LowLatencyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LowLatencyMode")
            .field("tuned_interfaces", &self.tuned_interfaces())
            .finish()
    }
}

/// Socket runtime initialization paired with low-latency mode.
///
/// Holds both for the lifetime of a session and releases them in
/// reverse order on drop.
#[derive(Debug)]
pub struct PlatformSockets {
    low_latency: Option<LowLatencyMode>,
}

impl PlatformSockets {
    pub fn initialize() -> io::Result<Self> {
        sys::init_sockets()?;
        info!("platform sockets initialized");
        Ok(Self {
            low_latency: Some(LowLatencyMode::enter()),
        })
    }
}

impl Drop for PlatformSockets {
    fn drop(&mut self) {
        if let Some(mode) = self.low_latency.take() {
            mode.exit();
        }
        sys::cleanup_sockets();
        info!("platform sockets cleaned up");
    }
}
