//! Stream subsystems that open the real sockets for every stream.
//!
//! No media protocol is spoken: the RTSP stage sends a single OPTIONS
//! request and waits for a status line, the control and input stages
//! open their TCP connections, and the video and audio stages bind UDP
//! sockets, connect them to the host and run a receive worker that
//! hands every datagram to the renderers. This is enough to tell
//! whether a host is reachable on every port a session needs.

use std::io::Read;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use castlink_core::net::{
    PlatformSockets, RecvMode, bind_udp_socket, connect_tcp_socket, enable_no_delay,
    recv_udp_socket, send_mtu_safe, set_recv_timeout, shutdown_tcp_socket, url_safe_host,
};
use castlink_core::{
    ConnectionListener, DecoderFlags, ErrorCode, GENERIC_FAILURE, LinkError, RenderContext,
    SessionContext, StreamSubsystems,
};
use socket2::{Domain, Socket};
use tracing::{debug, info, warn};

use crate::config::PortConfig;

/// Receive buffer requested for the media sockets.
const MEDIA_RECV_BUFFER: usize = 1 << 20;

/// Seconds the RTSP stage waits for a reply.
const RTSP_REPLY_TIMEOUT_SECS: u64 = 5;

// ── UDP receive worker ───────────────────────────────────────────

/// A bound UDP socket and, once started, the thread draining it.
struct MediaStream {
    name: &'static str,
    socket: Arc<Socket>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl MediaStream {
    fn bind(name: &'static str, remote: SocketAddr) -> Result<Self, LinkError> {
        let domain = if remote.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        Ok(Self {
            name,
            socket: Arc::new(bind_udp_socket(domain, MEDIA_RECV_BUFFER)?),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }

    /// Point the socket at the host, send a wake-up datagram and start
    /// draining. `sink` sees every datagram received.
    fn start<F>(&mut self, ctx: &SessionContext, peer: SocketAddr, sink: F) -> Result<(), LinkError>
    where
        F: Fn(&[u8]) + Send + 'static,
    {
        self.socket.connect(&peer.into())?;
        self.socket.send(b"PING")?;

        self.running.store(true, Ordering::SeqCst);
        let socket = self.socket.clone();
        let running = self.running.clone();
        let listener = ctx.listener.clone();
        let platform = ctx.platform.clone();
        let name = self.name;

        let worker = std::thread::Builder::new()
            .name(format!("{name} receive"))
            .spawn(move || {
                platform.thread_started(name);
                let mut buf = vec![0u8; 2048];
                while running.load(Ordering::SeqCst) {
                    match recv_udp_socket(&socket, &mut buf, RecvMode::Poll) {
                        Ok(0) => {}
                        Ok(n) => sink(&buf[..n]),
                        Err(e) => {
                            if running.load(Ordering::SeqCst) {
                                warn!("{name} receive failed: {e}");
                                listener.connection_terminated(LinkError::from(e).code());
                            }
                            break;
                        }
                    }
                }
                debug!("{name} receive worker exiting");
            })?;
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("{} receive worker panicked", self.name);
            }
        }
    }
}

impl Drop for MediaStream {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── ProbingSubsystems ────────────────────────────────────────────

/// Opens one socket per stream against the resolved host.
pub struct ProbingSubsystems {
    ports: PortConfig,
    connect_timeout: Duration,
    platform: Option<PlatformSockets>,
    rtsp: Option<Socket>,
    control: Option<Socket>,
    video: Option<MediaStream>,
    audio: Option<MediaStream>,
    input: Option<Socket>,
    input_keyed: bool,
}

impl ProbingSubsystems {
    pub fn new(ports: PortConfig, connect_timeout: Duration) -> Self {
        Self {
            ports,
            connect_timeout,
            platform: None,
            rtsp: None,
            control: None,
            video: None,
            audio: None,
            input: None,
            input_keyed: false,
        }
    }

    /// The host address with `port` swapped in. Only the port changes,
    /// so a link-local host keeps its scope id.
    fn remote(ctx: &SessionContext, port: u16) -> Result<SocketAddr, ErrorCode> {
        let mut addr = ctx.remote_addr.ok_or(GENERIC_FAILURE)?;
        addr.set_port(port);
        Ok(addr)
    }

    fn connect(&self, ctx: &SessionContext, port: u16) -> Result<Socket, ErrorCode> {
        let addr = Self::remote(ctx, port)?;
        let socket = connect_tcp_socket(addr, self.connect_timeout).map_err(|e| {
            warn!("connect to {addr} failed: {e}");
            e.code()
        })?;
        enable_no_delay(&socket).map_err(|e| LinkError::from(e).code())?;
        Ok(socket)
    }

    fn close(socket: Option<Socket>) {
        if let Some(socket) = socket {
            shutdown_tcp_socket(&socket);
        }
    }
}

/// Send an RTSP OPTIONS request and read the status line.
fn rtsp_options(socket: &Socket, host: IpAddr, port: u16) -> Result<String, LinkError> {
    let request = format!(
        "OPTIONS rtsp://{}:{port} RTSP/1.0\r\nCSeq: 1\r\n\r\n",
        url_safe_host(&host)
    );
    send_mtu_safe(socket, request.as_bytes())?;
    set_recv_timeout(socket, RTSP_REPLY_TIMEOUT_SECS);

    let mut reply = [0u8; 512];
    let mut reader: &Socket = socket;
    let n = reader.read(&mut reply)?;
    let text = String::from_utf8_lossy(&reply[..n]);
    let status = text.lines().next().unwrap_or_default().to_string();
    if status.starts_with("RTSP/1.0") {
        Ok(status)
    } else {
        Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "not an RTSP reply").into())
    }
}

impl StreamSubsystems for ProbingSubsystems {
    fn initialize_platform(&mut self) -> Result<(), ErrorCode> {
        let platform = PlatformSockets::initialize().map_err(|e| LinkError::from(e).code())?;
        self.platform = Some(platform);
        Ok(())
    }

    fn cleanup_platform(&mut self) {
        self.platform = None;
    }

    fn perform_rtsp_handshake(&mut self, ctx: &SessionContext) -> Result<(), ErrorCode> {
        let host = Self::remote(ctx, self.ports.rtsp)?.ip();
        let socket = self.connect(ctx, self.ports.rtsp)?;
        let status = rtsp_options(&socket, host, self.ports.rtsp).map_err(|e| {
            warn!("RTSP OPTIONS failed: {e}");
            e.code()
        })?;
        info!("RTSP reply: {status}");
        self.rtsp = Some(socket);
        Ok(())
    }

    fn terminate_rtsp_handshake(&mut self) {
        Self::close(self.rtsp.take());
    }

    fn initialize_control_stream(&mut self, ctx: &SessionContext) -> Result<(), ErrorCode> {
        Self::remote(ctx, self.ports.control).map(drop)
    }

    fn start_control_stream(&mut self, ctx: &SessionContext) -> Result<(), ErrorCode> {
        self.control = Some(self.connect(ctx, self.ports.control)?);
        Ok(())
    }

    fn stop_control_stream(&mut self) {
        Self::close(self.control.take());
    }

    fn destroy_control_stream(&mut self) {}

    fn initialize_video_stream(&mut self, ctx: &SessionContext) {
        if let Some(remote) = ctx.remote_addr {
            self.video = MediaStream::bind("video", remote)
                .inspect_err(|e| warn!("unable to bind video socket: {e}"))
                .ok();
        }
    }

    fn start_video_stream(
        &mut self,
        ctx: &SessionContext,
        render_context: Option<&RenderContext>,
        flags: DecoderFlags,
    ) -> Result<(), ErrorCode> {
        let peer = Self::remote(ctx, self.ports.video)?;
        let video = self.video.as_mut().ok_or(GENERIC_FAILURE)?;

        ctx.video.setup(&ctx.config, render_context, flags)?;
        let renderer = ctx.video.clone();
        video
            .start(ctx, peer, move |unit| {
                if let Err(code) = renderer.submit_decode_unit(unit) {
                    debug!("decode unit rejected: {code}");
                }
            })
            .map_err(|e| {
                ctx.video.cleanup();
                e.code()
            })?;
        ctx.video.start();
        Ok(())
    }

    fn stop_video_stream(&mut self) {
        if let Some(video) = self.video.as_mut() {
            video.stop();
        }
    }

    fn destroy_video_stream(&mut self) {
        self.video = None;
    }

    fn initialize_audio_stream(&mut self, ctx: &SessionContext) {
        if let Some(remote) = ctx.remote_addr {
            self.audio = MediaStream::bind("audio", remote)
                .inspect_err(|e| warn!("unable to bind audio socket: {e}"))
                .ok();
        }
    }

    fn start_audio_stream(&mut self, ctx: &SessionContext) -> Result<(), ErrorCode> {
        let peer = Self::remote(ctx, self.ports.audio)?;
        let audio = self.audio.as_mut().ok_or(GENERIC_FAILURE)?;

        ctx.audio.init(&ctx.config)?;
        let renderer = ctx.audio.clone();
        audio
            .start(ctx, peer, move |sample| renderer.decode_and_play_sample(sample))
            .map_err(|e| {
                ctx.audio.cleanup();
                e.code()
            })?;
        ctx.audio.start();
        Ok(())
    }

    fn stop_audio_stream(&mut self) {
        if let Some(audio) = self.audio.as_mut() {
            audio.stop();
        }
    }

    fn destroy_audio_stream(&mut self) {
        self.audio = None;
    }

    fn initialize_input_stream(&mut self, _ctx: &SessionContext, key: &[u8], iv: &[u8]) {
        self.input_keyed = key.iter().chain(iv).any(|&b| b != 0);
        if !self.input_keyed {
            debug!("input stream key is all zeros");
        }
    }

    fn start_input_stream(&mut self, ctx: &SessionContext) -> Result<(), ErrorCode> {
        self.input = Some(self.connect(ctx, self.ports.input)?);
        Ok(())
    }

    fn stop_input_stream(&mut self) {
        Self::close(self.input.take());
    }

    fn destroy_input_stream(&mut self) {
        self.input_keyed = false;
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;

    use castlink_core::{CallbackSet, Session, Stage, StreamConfiguration};

    fn ports_on(rtsp: u16) -> PortConfig {
        PortConfig {
            rtsp,
            ..PortConfig::default()
        }
    }

    #[test]
    fn rtsp_reply_is_read() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 256];
            let n = stream.read(&mut buf).unwrap();
            assert!(buf[..n].starts_with(b"OPTIONS rtsp://127.0.0.1:"));
            stream.write_all(b"RTSP/1.0 200 OK\r\nCSeq: 1\r\n\r\n").unwrap();
        });

        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let socket = connect_tcp_socket(addr, Duration::from_secs(3)).unwrap();
        let status = rtsp_options(&socket, addr.ip(), port).unwrap();
        assert_eq!(status, "RTSP/1.0 200 OK");
        server.join().unwrap();
    }

    #[test]
    fn session_stops_at_rtsp_when_nothing_listens() {
        let closed = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = closed.local_addr().unwrap().port();
        drop(closed);

        let subsystems = ProbingSubsystems::new(ports_on(port), Duration::from_secs(2));
        let mut session = Session::new(Box::new(subsystems));
        let err = session
            .start(
                "127.0.0.1",
                &StreamConfiguration::default(),
                &CallbackSet::default(),
                None,
                DecoderFlags::empty(),
                7,
            )
            .unwrap_err();
        assert_eq!(err.stage, Stage::RtspHandshake);
        assert_eq!(session.stage(), Stage::None);
    }

    #[test]
    fn media_stream_delivers_datagrams() {
        use std::net::UdpSocket;
        use std::sync::mpsc;

        let host = UdpSocket::bind("127.0.0.1:0").unwrap();
        let peer = host.local_addr().unwrap();
        let mut stream = MediaStream::bind("video", peer).unwrap();

        let (tx, rx) = mpsc::channel();
        let tx = std::sync::Mutex::new(tx);
        let ctx = SessionContext::default();
        stream
            .start(&ctx, peer, move |d| {
                let _ = tx.lock().unwrap().send(d.to_vec());
            })
            .unwrap();

        // The wake-up datagram tells the host where to send.
        let mut buf = [0u8; 16];
        let (n, client) = host.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"PING");
        host.send_to(b"frame-1", client).unwrap();

        let got = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(got, b"frame-1");
        stream.stop();
        assert!(stream.worker.is_none());
    }
}
