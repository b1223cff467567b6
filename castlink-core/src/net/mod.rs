//! Socket primitives.
//!
//! Stateless per call: each function operates on a socket the caller
//! owns, and may run concurrently with calls on other sockets.

pub mod address;
pub mod platform;
pub mod poll;
pub mod resolve;
pub mod socket;
mod sys;

pub use address::{is_private_network_address, url_safe_host, url_safe_string};
pub use platform::{LowLatencyMode, PlatformSockets};
pub use poll::{PollEvents, PollFd, poll_sockets};
pub use resolve::{TEST_PORT_TIMEOUT, resolve_host_name};
pub use socket::{
    RecvMode, TCP_V4_MSS, TCP_V6_MSS, bind_udp_socket, connect_tcp_socket, create_socket,
    enable_no_delay, recv_udp_socket, send_mtu_safe, set_nonfatal_recv_timeout, set_recv_timeout,
    shutdown_tcp_socket,
};
