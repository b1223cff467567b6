//! Stream configuration handed to a session at start.

use serde::{Deserialize, Serialize};

/// Length in bytes of the remote-input AES key and IV.
pub const INPUT_KEY_LEN: usize = 16;

/// Default port probed when a host resolves to several addresses.
pub const DEFAULT_TEST_PORT: u16 = 47984;

/// Everything the stream subsystems need to know about the session.
///
/// A session keeps its own copy; the caller's value may be dropped or
/// reused once [`Session::start`](crate::Session::start) returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfiguration {
    /// Horizontal resolution in pixels.
    pub width: u32,
    /// Vertical resolution in pixels.
    pub height: u32,
    /// Target frame rate.
    pub fps: u32,
    /// Video bitrate in kbps.
    pub bitrate_kbps: u32,
    /// Maximum video packet size in bytes.
    pub packet_size: u32,
    /// Host is reached over a WAN rather than the local network.
    pub streaming_remotely: bool,
    /// Audio channel layout.
    pub audio: AudioConfiguration,
    /// Request HEVC instead of H.264.
    pub supports_hevc: bool,
    /// AES key protecting the input stream.
    pub remote_input_aes_key: [u8; INPUT_KEY_LEN],
    /// AES IV protecting the input stream.
    pub remote_input_aes_iv: [u8; INPUT_KEY_LEN],
    /// Which address families name resolution may return.
    pub address_family: AddressFamily,
    /// Reachability probe used during name resolution.
    pub reachability: Option<ReachabilityProbe>,
}

impl Default for StreamConfiguration {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 60,
            bitrate_kbps: 10_000,
            packet_size: 1024,
            streaming_remotely: false,
            audio: AudioConfiguration::Stereo,
            supports_hevc: false,
            remote_input_aes_key: [0; INPUT_KEY_LEN],
            remote_input_aes_iv: [0; INPUT_KEY_LEN],
            address_family: AddressFamily::Any,
            reachability: Some(ReachabilityProbe::new(DEFAULT_TEST_PORT)),
        }
    }
}

/// Audio channel layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioConfiguration {
    #[default]
    Stereo,
    Surround51,
}

impl AudioConfiguration {
    pub fn channel_count(self) -> u8 {
        match self {
            Self::Stereo => 2,
            Self::Surround51 => 6,
        }
    }
}

/// Address-family filter for name resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressFamily {
    #[default]
    Any,
    V4,
    V6,
}

impl AddressFamily {
    /// Whether an address of the given family passes this filter.
    pub fn accepts(self, addr: &std::net::IpAddr) -> bool {
        match self {
            Self::Any => true,
            Self::V4 => addr.is_ipv4(),
            Self::V6 => addr.is_ipv6(),
        }
    }
}

/// TCP port probed to confirm a resolved address is actually usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReachabilityProbe {
    /// Port to connect to.
    pub port: u16,
    /// Probe even when the host resolves to a single address.
    #[serde(default)]
    pub always_test: bool,
}

impl ReachabilityProbe {
    /// Probe `port`, but only when there is more than one candidate.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            always_test: false,
        }
    }

    /// Probe `port` for every candidate, including a lone one.
    pub fn always(port: u16) -> Self {
        Self {
            port,
            always_test: true,
        }
    }
}
