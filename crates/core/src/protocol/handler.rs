use std::sync::Arc;

use crate::protocol::packet::{Packet, Request};
use crate::protocol::sdp::{self, StreamSettings};
use crate::server::ServerConfig;
use crate::session::{SessionEvent, SessionHandle, SessionState};

const PUBLIC_COMMANDS: &str = "OPTIONS, DESCRIBE, SETUP, ANNOUNCE";

/// Handles handshake commands for a single TCP connection.
///
/// The only state kept between requests is the connection's session token,
/// issued on the first successful SETUP and required to match on every
/// SETUP after that. Everything else is read from the shared
/// [`SessionState`].
pub struct CommandHandler {
    session: SessionHandle,
    config: Arc<ServerConfig>,
    token: Option<String>,
}

impl CommandHandler {
    pub fn new(session: SessionHandle, config: Arc<ServerConfig>) -> Self {
        CommandHandler {
            session,
            config,
            token: None,
        }
    }

    /// Session token issued on this connection, if any SETUP succeeded.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Answer one packet. Responses sent by the peer are rejected with 400.
    pub fn handle(&mut self, packet: &Packet) -> Packet {
        let cseq = packet.sequence_number;
        let Some(request) = packet.as_request() else {
            tracing::warn!(cseq, "peer sent a response where a request was expected");
            return Packet::bad_request(cseq);
        };

        let state = self.session.load();

        match request.command.to_ascii_uppercase().as_str() {
            "OPTIONS" => self.handle_options(cseq),
            "DESCRIBE" => self.handle_describe(cseq, &state),
            "SETUP" => self.handle_setup(cseq, packet, request, &state),
            "ANNOUNCE" => self.handle_announce(cseq, packet, &state),
            _ => {
                tracing::warn!(command = %request.command, cseq, "unsupported command");
                Packet::not_found(cseq)
            }
        }
    }

    fn handle_options(&self, cseq: u32) -> Packet {
        tracing::debug!(cseq, "OPTIONS");
        Packet::ok(cseq).with_option("Public", PUBLIC_COMMANDS)
    }

    fn handle_describe(&self, cseq: u32, state: &SessionState) -> Packet {
        tracing::debug!(cseq, session_id = state.session_id, "DESCRIBE");

        let mut response = Packet::ok(cseq).with_option("Content-type", "application/sdp");
        response.payloads = sdp::describe_payloads(state);
        response.with_content_length()
    }

    fn handle_setup(
        &mut self,
        cseq: u32,
        packet: &Packet,
        request: &Request,
        state: &SessionState,
    ) -> Packet {
        let Some(stream_type) = request.target.stream_type() else {
            tracing::warn!(cseq, target = %request.target, "SETUP without a stream target");
            return Packet::not_found(cseq);
        };

        let port = match stream_type {
            "audio" => state.audio_port,
            "video" => state.video_port,
            "control" => state.control_port,
            other => {
                tracing::warn!(cseq, stream = other, "SETUP for unknown stream type");
                return Packet::not_found(cseq);
            }
        };
        if port == 0 {
            tracing::warn!(cseq, stream = stream_type, "SETUP for stream without an assigned port");
            return Packet::not_found(cseq);
        }

        let presented = packet
            .option("Session")
            .map(|value| value.split(';').next().unwrap_or(value).trim());

        let token = match (self.token.clone(), presented) {
            (Some(token), Some(presented)) if token == presented => token,
            (Some(token), presented) => {
                tracing::warn!(
                    cseq,
                    stream = stream_type,
                    presented = presented.unwrap_or("<none>"),
                    "SETUP presented a session token not issued on this connection"
                );
                return Packet::session_not_found(cseq)
                    .with_option("Session", &self.session_header(&token));
            }
            (None, presented) => {
                let token = generate_token();
                if let Some(presented) = presented {
                    tracing::debug!(presented, issued = %token, "replacing client session token");
                }
                tracing::info!(session_id = state.session_id, token = %token, "session token issued");
                self.token = Some(token.clone());
                token
            }
        };

        tracing::info!(cseq, stream = stream_type, port, "stream set up");

        Packet::ok(cseq)
            .with_option("Session", &self.session_header(&token))
            .with_option("Transport", &format!("server_port={}", port))
    }

    fn handle_announce(&self, cseq: u32, packet: &Packet, state: &SessionState) -> Packet {
        if packet.payloads.is_empty() {
            tracing::warn!(cseq, "ANNOUNCE without a session description");
            return Packet::bad_request(cseq);
        }

        let settings = StreamSettings::from_payloads(&packet.payloads);
        let video = settings.video_params(state);
        let audio = settings.audio_params(state);

        tracing::info!(
            session_id = state.session_id,
            width = video.display_mode.width,
            height = video.display_mode.height,
            fps = video.display_mode.refresh_rate,
            codec = ?video.codec,
            bitrate_kbps = video.bitrate_kbps,
            audio_channels = audio.channels,
            encrypt_audio = audio.encrypt,
            "stream announced"
        );

        state
            .event_bus
            .publish(SessionEvent::VideoSessionReady(video));
        state
            .event_bus
            .publish(SessionEvent::AudioSessionReady(audio));

        Packet::ok(cseq)
    }

    /// `Session` header value; the timeout is advisory and never enforced.
    fn session_header(&self, token: &str) -> String {
        format!("{};timeout = {}", token, self.config.session_timeout_secs)
    }
}

/// Twelve upper-case hex digits, e.g. `DEADBEEFCAFE`.
fn generate_token() -> String {
    let value = rand::random::<u64>() & 0xFFFF_FFFF_FFFF;
    format!("{:012X}", value)
}
