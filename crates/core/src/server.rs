use std::net::{IpAddr, SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::error::{Result, StreamError};
use crate::session::SessionHandle;
use crate::transport::UdpTransport;
use crate::transport::tcp;

/// Server-level configuration used by the connection engine and handlers.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Largest header block accepted before the blank line.
    pub max_header_size: usize,
    /// Largest `Content-length` accepted.
    pub max_body_size: usize,
    /// Idle limit for a connection waiting on its next request.
    /// `None` waits until the peer disconnects.
    pub read_timeout: Option<Duration>,
    /// Advertised in the `Session` header; not enforced.
    pub session_timeout_secs: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_header_size: 8 * 1024,
            max_body_size: 64 * 1024,
            read_timeout: None,
            session_timeout_secs: 90,
        }
    }
}

/// Handshake server for one client session.
///
/// Owns the listener thread and the UDP sender. Every accepted connection
/// gets its own thread and its own [`CommandHandler`](crate::protocol::CommandHandler),
/// all reading the same [`SessionHandle`].
pub struct Server {
    session: SessionHandle,
    running: Arc<AtomicBool>,
    bind_addr: String,
    udp: Option<UdpTransport>,
    config: Arc<ServerConfig>,
}

impl Server {
    pub fn new(bind_addr: &str, session: SessionHandle) -> Self {
        Self::with_config(bind_addr, session, ServerConfig::default())
    }

    pub fn with_config(bind_addr: &str, session: SessionHandle, config: ServerConfig) -> Self {
        Self {
            session,
            running: Arc::new(AtomicBool::new(false)),
            bind_addr: bind_addr.to_string(),
            udp: None,
            config: Arc::new(config),
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(StreamError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.bind_addr)?;
        listener.set_nonblocking(true)?;
        self.udp = Some(UdpTransport::bind()?);

        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let session = self.session.clone();
        let config = self.config.clone();

        tracing::info!(
            addr = %self.bind_addr,
            session_id = session.load().session_id,
            "handshake server listening"
        );

        thread::spawn(move || {
            tcp::accept_loop(listener, session, config, running);
        });

        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("server stopping");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Send finished audio packets to the client's negotiated audio port.
    pub fn send_audio_packets<P: AsRef<[u8]>>(&self, packets: &[P]) -> Result<usize> {
        let state = self.session.load();
        self.send_to_client(&state.ip, state.audio_port, packets)
    }

    /// Send finished video packets to the client's negotiated video port.
    pub fn send_video_packets<P: AsRef<[u8]>>(&self, packets: &[P]) -> Result<usize> {
        let state = self.session.load();
        self.send_to_client(&state.ip, state.video_port, packets)
    }

    fn send_to_client<P: AsRef<[u8]>>(&self, ip: &str, port: u16, packets: &[P]) -> Result<usize> {
        let udp = self.udp.as_ref().ok_or(StreamError::NotStarted)?;
        let ip: IpAddr = ip
            .parse()
            .map_err(|_| StreamError::Config(format!("invalid client address {ip:?}")))?;
        udp.send_all(packets, SocketAddr::new(ip, port))
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Returns the server's protocol configuration.
    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }
}

#[cfg(test)]
mod tests {
    use crate::session::BroadcastEventBus;
    use crate::session::test_support::test_state;

    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_header_size, 8192);
        assert_eq!(config.max_body_size, 65536);
        assert_eq!(config.read_timeout, None);
        assert_eq!(config.session_timeout_secs, 90);
    }

    #[test]
    fn sending_before_start_is_rejected() {
        let session = SessionHandle::new(test_state(Arc::new(BroadcastEventBus::default())));
        let server = Server::new("127.0.0.1:0", session);
        assert!(!server.is_running());
        assert!(matches!(
            server.send_audio_packets(&[b"x"]),
            Err(StreamError::NotStarted)
        ));
    }

    #[test]
    fn failed_bind_leaves_server_stopped() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        let session = SessionHandle::new(test_state(Arc::new(BroadcastEventBus::default())));
        let mut server = Server::new(&addr, session);

        assert!(matches!(server.start(), Err(StreamError::Io(_))));
        assert!(!server.is_running());
        assert!(matches!(
            server.send_video_packets(&[b"x"]),
            Err(StreamError::NotStarted)
        ));
    }

    #[test]
    fn unusable_client_address_is_a_config_error() {
        let session = SessionHandle::new(test_state(Arc::new(BroadcastEventBus::default())));
        let mut server = Server::new("127.0.0.1:0", session.clone());
        server.start().unwrap();

        session.update(|state| state.ip = "not-an-ip".to_string());
        assert!(matches!(
            server.send_audio_packets(&[b"x"]),
            Err(StreamError::Config(_))
        ));

        server.stop();
    }
}
