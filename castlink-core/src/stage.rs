//! Connection stages.
//!
//! A session moves through these stages strictly in order while it
//! is being brought up, and back down them in reverse while it is
//! being torn down.
//!
//! ```text
//!  None ─► PlatformInit ─► NameResolution ─► RtspHandshake
//!       ─► ControlStreamInit ─► VideoStreamInit ─► AudioStreamInit ─► InputStreamInit
//!       ─► ControlStreamStart ─► VideoStreamStart ─► AudioStreamStart ─► InputStreamStart
//! ```

use serde::{Deserialize, Serialize};

// ── Stage ────────────────────────────────────────────────────────

/// One ordered step of connection bring-up and teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Stage {
    /// Nothing is set up. Initial and terminal state.
    #[default]
    None = 0,
    PlatformInit,
    NameResolution,
    RtspHandshake,
    ControlStreamInit,
    VideoStreamInit,
    AudioStreamInit,
    InputStreamInit,
    ControlStreamStart,
    VideoStreamStart,
    AudioStreamStart,
    InputStreamStart,
}

impl Stage {
    /// Every stage in ascending order, starting with [`Stage::None`].
    pub const ALL: [Stage; 12] = [
        Stage::None,
        Stage::PlatformInit,
        Stage::NameResolution,
        Stage::RtspHandshake,
        Stage::ControlStreamInit,
        Stage::VideoStreamInit,
        Stage::AudioStreamInit,
        Stage::InputStreamInit,
        Stage::ControlStreamStart,
        Stage::VideoStreamStart,
        Stage::AudioStreamStart,
        Stage::InputStreamStart,
    ];

    /// The last stage of a complete bring-up.
    pub const LAST: Stage = Stage::InputStreamStart;

    /// Numeric index of this stage (`None` is 0).
    pub fn index(self) -> usize {
        self as usize
    }

    /// Look up a stage by index.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// The stage that follows this one, if any.
    pub fn next(self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }

    /// The stage that precedes this one, if any.
    pub fn prev(self) -> Option<Self> {
        self.index().checked_sub(1).and_then(Self::from_index)
    }

    /// Human-readable name for UI and diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::PlatformInit => "platform initialization",
            Self::NameResolution => "name resolution",
            Self::RtspHandshake => "RTSP handshake",
            Self::ControlStreamInit => "control stream initialization",
            Self::VideoStreamInit => "video stream initialization",
            Self::AudioStreamInit => "audio stream initialization",
            Self::InputStreamInit => "input stream initialization",
            Self::ControlStreamStart => "control stream establishment",
            Self::VideoStreamStart => "video stream establishment",
            Self::AudioStreamStart => "audio stream establishment",
            Self::InputStreamStart => "input stream establishment",
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Move up exactly one stage.
    ///
    /// Returns the new stage, or `None` when already at [`Stage::LAST`].
    pub(crate) fn advance(&mut self) -> Option<Self> {
        let next = self.next()?;
        *self = next;
        Some(next)
    }

    /// Move down exactly one stage.
    ///
    /// Returns the stage that was left, or `None` when already at
    /// [`Stage::None`].
    pub(crate) fn retreat(&mut self) -> Option<Self> {
        let left = *self;
        *self = self.prev()?;
        Some(left)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Name of the stage at `index`, for callers that only hold the number.
pub fn stage_name(index: usize) -> Option<&'static str> {
    Stage::from_index(index).map(Stage::name)
}

// ── Tests ────────────────────────────────────────────────────────
