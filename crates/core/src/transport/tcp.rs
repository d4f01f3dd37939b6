use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::error::StreamError;
use crate::protocol::packet::Packet;
use crate::protocol::{CommandHandler, parser};
use crate::server::ServerConfig;
use crate::session::SessionHandle;
use crate::transport::framing::MessageFramer;

/// Non-blocking TCP accept loop.
///
/// Checks the `running` flag between accepts with a 50ms poll interval
/// so that [`crate::server::Server::stop`] can terminate it promptly.
pub fn accept_loop(
    listener: TcpListener,
    session: SessionHandle,
    config: Arc<ServerConfig>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let s = session.clone();
                let c = config.clone();
                let r = running.clone();
                thread::spawn(move || {
                    Connection::handle(stream, s, c, r);
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// One handshake connection: frames requests, answers them in order.
struct Connection {
    framer: MessageFramer<TcpStream>,
    writer: TcpStream,
    handler: CommandHandler,
    peer_addr: SocketAddr,
}

impl Connection {
    pub fn handle(
        stream: TcpStream,
        session: SessionHandle,
        config: Arc<ServerConfig>,
        running: Arc<AtomicBool>,
    ) {
        let peer_addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(_) => return,
        };

        if let Err(e) = stream.set_read_timeout(config.read_timeout) {
            tracing::warn!(%peer_addr, error = %e, "could not apply read timeout");
        }

        let reader_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(_) => return,
        };

        tracing::info!(%peer_addr, "client connected");

        let mut conn = Connection {
            framer: MessageFramer::new(reader_stream, config.max_header_size, config.max_body_size),
            writer: stream,
            handler: CommandHandler::new(session, config),
            peer_addr,
        };

        let reason = conn.run(&running);
        tracing::info!(%peer_addr, reason, token = ?conn.handler.token(), "client disconnected");
    }

    /// Request/response loop. Returns the reason for exiting.
    fn run(&mut self, running: &Arc<AtomicBool>) -> &'static str {
        while running.load(Ordering::SeqCst) {
            let raw = match self.framer.next_message() {
                Ok(Some(raw)) => raw,
                Ok(None) => return "connection closed by client",
                Err(StreamError::Io(e)) => {
                    tracing::debug!(peer = %self.peer_addr, error = %e, "read failed");
                    return "read error";
                }
                Err(e) => {
                    tracing::warn!(peer = %self.peer_addr, error = %e, "framing error");
                    let cseq = parser::sequence_hint(self.framer.buffered()).unwrap_or(0);
                    self.send(&Packet::bad_request(cseq));
                    return "framing error";
                }
            };

            let Some(request) = parser::parse(&raw) else {
                tracing::warn!(
                    peer = %self.peer_addr,
                    error = %StreamError::Parse,
                    len = raw.len(),
                    "rejecting message"
                );
                let cseq = parser::sequence_hint(&raw).unwrap_or(0);
                self.send(&Packet::bad_request(cseq));
                return "malformed request";
            };

            tracing::debug!(
                peer = %self.peer_addr,
                cseq = request.sequence_number,
                command = request.as_request().map(|r| r.command.as_str()),
                "request"
            );

            let response = self.handler.handle(&request);

            tracing::debug!(
                peer = %self.peer_addr,
                cseq = response.sequence_number,
                status = response.status_code(),
                "response"
            );

            if !self.send(&response) {
                return "write error";
            }
        }

        "server shutting down"
    }

    fn send(&mut self, packet: &Packet) -> bool {
        match self.writer.write_all(parser::to_string(packet).as_bytes()) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(peer = %self.peer_addr, error = %e, "write failed");
                false
            }
        }
    }
}
