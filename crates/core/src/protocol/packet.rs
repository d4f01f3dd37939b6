use std::fmt;

use indexmap::IndexMap;

/// Version tag carried by every request line and response status line.
pub const PROTOCOL_TAG: &str = "RTSP/1.0";

/// Header carrying the sequence number that pairs a response with its request.
pub const SEQUENCE_HEADER: &str = "CSeq";

/// Prefix of a request target naming a logical stream.
pub const STREAM_TARGET_PREFIX: &str = "streamid=";

/// Header-block options, keyed by case-sensitive name in insertion order.
///
/// Re-inserting an existing name overwrites its value in place.
pub type Options = IndexMap<String, String>;

/// A request or response of the handshake dialect.
///
/// ```text
/// SETUP streamid=audio/0/0 RTSP/1.0\r\n      <- first line (kind)
/// CSeq: 3\r\n                                 <- sequence_number
/// Transport: unicast;X-GS-ClientPort=...\r\n  <- options
/// \r\n
/// v=0\r\n                                     <- payloads
/// ```
///
/// Payloads are body lines kept as ordered `(key, value)` pairs: unlike
/// options, keys repeat (every SDP attribute is keyed `a`) and order matters.
///
/// The fields are public, so a packet can hold values the wire form cannot
/// carry. [`is_well_formed`](Self::is_well_formed) states exactly which
/// packets survive `parse(to_string(p)) == Some(p)`; everything
/// [`parse`](crate::protocol::parse) returns is well formed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    pub sequence_number: u32,
    pub options: Options,
    pub payloads: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketKind {
    Request(Request),
    Response(Response),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Command verb as received (`OPTIONS`, `SETUP`, ...).
    pub command: String,
    pub target: Target,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status_code: u16,
    pub status_message: String,
}

/// What a request is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// `rtsp://10.1.2.49:48010`
    ByUri {
        protocol: String,
        ip: String,
        port: u16,
    },
    /// `streamid=audio/0/0`: `stream_type` is `audio`, `params` is `/0/0`.
    ByStream { stream_type: String, params: String },
}

impl Target {
    /// Logical stream type for [`Target::ByStream`] targets.
    pub fn stream_type(&self) -> Option<&str> {
        match self {
            Self::ByStream { stream_type, .. } => Some(stream_type),
            Self::ByUri { .. } => None,
        }
    }
}

impl Target {
    fn is_well_formed(&self) -> bool {
        match self {
            Self::ByUri { protocol, ip, .. } => {
                is_token(protocol)
                    && !protocol.contains("://")
                    && !protocol.starts_with(STREAM_TARGET_PREFIX)
                    && is_token(ip)
            }
            Self::ByStream {
                stream_type,
                params,
            } => {
                is_token(stream_type)
                    && !stream_type.contains('/')
                    && (params.is_empty() || (params.starts_with('/') && is_token(params)))
            }
        }
    }
}

/// Non-empty, no whitespace.
fn is_token(value: &str) -> bool {
    !value.is_empty() && !value.contains(char::is_whitespace)
}

fn is_trimmed_line(value: &str) -> bool {
    value.trim() == value && !value.contains('\n')
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByUri { protocol, ip, port } => write!(f, "{protocol}://{ip}:{port}"),
            Self::ByStream {
                stream_type,
                params,
            } => write!(f, "streamid={stream_type}{params}"),
        }
    }
}

impl Packet {
    pub fn request(command: &str, target: Target, sequence_number: u32) -> Self {
        Self {
            kind: PacketKind::Request(Request {
                command: command.to_string(),
                target,
            }),
            sequence_number,
            options: Options::new(),
            payloads: Vec::new(),
        }
    }

    pub fn response(status_code: u16, status_message: &str, sequence_number: u32) -> Self {
        Self {
            kind: PacketKind::Response(Response {
                status_code,
                status_message: status_message.to_string(),
            }),
            sequence_number,
            options: Options::new(),
            payloads: Vec::new(),
        }
    }

    /// 200 OK echoing `sequence_number`.
    pub fn ok(sequence_number: u32) -> Self {
        Self::response(200, "OK", sequence_number)
    }

    /// 400 Bad Request: malformed or missing required content.
    pub fn bad_request(sequence_number: u32) -> Self {
        Self::response(400, "Bad Request", sequence_number)
    }

    /// 404 Not Found: unknown command or unavailable stream.
    pub fn not_found(sequence_number: u32) -> Self {
        Self::response(404, "Not Found", sequence_number)
    }

    /// 454 Session Not Found: the presented session token is not this connection's.
    pub fn session_not_found(sequence_number: u32) -> Self {
        Self::response(454, "Session Not Found", sequence_number)
    }

    /// Set an option. The sequence header is carried by `sequence_number`
    /// alone, so an option of that name (any case) is ignored.
    pub fn with_option(mut self, name: &str, value: &str) -> Self {
        if name.trim().eq_ignore_ascii_case(SEQUENCE_HEADER) {
            tracing::warn!(name, value, "ignoring sequence header set as an option");
            return self;
        }
        self.options.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_payload(mut self, key: &str, value: &str) -> Self {
        self.payloads.push((key.to_string(), value.to_string()));
        self
    }

    /// Set `Content-length` to the byte length of the rendered payload block,
    /// so a peer can frame the body.
    pub fn with_content_length(self) -> Self {
        let length = self.render_payloads().len();
        self.with_option("Content-length", &length.to_string())
    }

    /// Look up an option by name, ignoring ASCII case.
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn as_request(&self) -> Option<&Request> {
        match &self.kind {
            PacketKind::Request(request) => Some(request),
            PacketKind::Response(_) => None,
        }
    }

    pub fn as_response(&self) -> Option<&Response> {
        match &self.kind {
            PacketKind::Response(response) => Some(response),
            PacketKind::Request(_) => None,
        }
    }

    /// Status code for responses, `None` for requests.
    pub fn status_code(&self) -> Option<u16> {
        self.as_response().map(|response| response.status_code)
    }

    /// Whether the packet round-trips through its wire form.
    ///
    /// - Requests: `command` is non-empty, has no whitespace and does not
    ///   start with [`PROTOCOL_TAG`]. A `ByUri` target has a non-empty
    ///   `protocol` without whitespace or `://` that does not start with
    ///   `streamid=`, and a non-empty `ip` without whitespace. A `ByStream`
    ///   target has a non-empty `stream_type` without whitespace or `/`, and
    ///   `params` is empty or starts with `/` and has no whitespace.
    /// - Responses: `status_code` has three digits (100..=999) and
    ///   `status_message` is a single trimmed line.
    /// - Option names are non-empty, trimmed, free of `:` and line breaks,
    ///   and not the sequence header. Option values are trimmed single lines.
    /// - Payload keys are trimmed and free of `=`, `:` and line breaks.
    ///   Payload values are trimmed single lines.
    pub fn is_well_formed(&self) -> bool {
        let kind_ok = match &self.kind {
            PacketKind::Request(request) => {
                is_token(&request.command)
                    && !request.command.starts_with(PROTOCOL_TAG)
                    && request.target.is_well_formed()
            }
            PacketKind::Response(response) => {
                (100..=999).contains(&response.status_code)
                    && is_trimmed_line(&response.status_message)
            }
        };

        let options_ok = self.options.iter().all(|(name, value)| {
            !name.is_empty()
                && is_trimmed_line(name)
                && !name.contains(':')
                && !name.eq_ignore_ascii_case(SEQUENCE_HEADER)
                && is_trimmed_line(value)
        });

        let payloads_ok = self.payloads.iter().all(|(key, value)| {
            is_trimmed_line(key) && !key.contains(['=', ':']) && is_trimmed_line(value)
        });

        kind_ok && options_ok && payloads_ok
    }

    /// Body block in canonical `key=value\r\n` form.
    pub(crate) fn render_payloads(&self) -> String {
        let mut body = String::new();
        for (key, value) in &self.payloads {
            body.push_str(key);
            body.push('=');
            body.push_str(value);
            body.push_str("\r\n");
        }
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_display() {
        let uri = Target::ByUri {
            protocol: "rtsp".to_string(),
            ip: "10.1.2.49".to_string(),
            port: 48010,
        };
        assert_eq!(uri.to_string(), "rtsp://10.1.2.49:48010");
        assert_eq!(uri.stream_type(), None);

        let stream = Target::ByStream {
            stream_type: "audio".to_string(),
            params: "/0/0".to_string(),
        };
        assert_eq!(stream.to_string(), "streamid=audio/0/0");
        assert_eq!(stream.stream_type(), Some("audio"));
    }

    #[test]
    fn duplicate_option_overwrites_in_place() {
        let packet = Packet::ok(1)
            .with_option("Session", "A")
            .with_option("Transport", "server_port=3")
            .with_option("Session", "B");
        let keys: Vec<&str> = packet.options.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["Session", "Transport"]);
        assert_eq!(packet.option("session"), Some("B"));
    }

    #[test]
    fn payloads_keep_duplicates_and_order() {
        let packet = Packet::ok(1)
            .with_payload("a", "first")
            .with_payload("a", "second");
        assert_eq!(packet.payloads.len(), 2);
        assert_eq!(packet.payloads[1].1, "second");
    }

    #[test]
    fn content_length_matches_rendered_body() {
        let packet = Packet::ok(2)
            .with_payload("sprop-parameter-sets", "AAAAAU")
            .with_content_length();
        assert_eq!(packet.option("Content-length"), Some("29"));
        assert_eq!(packet.render_payloads(), "sprop-parameter-sets=AAAAAU\r\n");
    }

    #[test]
    fn sequence_header_is_not_an_option() {
        let packet = Packet::ok(1)
            .with_option("cseq", "7")
            .with_option(" CSeq ", "8")
            .with_option("Session", "A");
        assert_eq!(packet.sequence_number, 1);
        assert_eq!(packet.options.len(), 1);
        assert!(packet.is_well_formed());
    }

    #[test]
    fn values_without_a_wire_form_are_not_well_formed() {
        for status in [0, 42, 99, 1000, u16::MAX] {
            assert!(!Packet::response(status, "X", 1).is_well_formed(), "status {status}");
        }
        assert!(Packet::response(100, "Continue", 1).is_well_formed());
        assert!(!Packet::response(200, " OK", 1).is_well_formed());
        assert!(!Packet::response(200, "O\nK", 1).is_well_formed());

        let stream = |stream_type: &str, params: &str| {
            Packet::request(
                "SETUP",
                Target::ByStream {
                    stream_type: stream_type.to_string(),
                    params: params.to_string(),
                },
                1,
            )
        };
        assert!(stream("audio", "/0/0").is_well_formed());
        assert!(stream("audio", "").is_well_formed());
        assert!(!stream("audio", "0").is_well_formed());
        assert!(!stream("", "/0").is_well_formed());
        assert!(!stream("au dio", "/0").is_well_formed());
        assert!(!stream("audio", "/0 0").is_well_formed());

        let uri = |protocol: &str, ip: &str| {
            Packet::request(
                "OPTIONS",
                Target::ByUri {
                    protocol: protocol.to_string(),
                    ip: ip.to_string(),
                    port: 1,
                },
                1,
            )
        };
        assert!(uri("rtsp", "10.1.2.49").is_well_formed());
        assert!(!uri("streamid=x", "10.1.2.49").is_well_formed());
        assert!(!uri("a://b", "10.1.2.49").is_well_formed());
        assert!(!uri("rtsp", "").is_well_formed());

        let mut options = Packet::ok(1);
        options.options.insert("CSeq".to_string(), "2".to_string());
        assert!(!options.is_well_formed());
        assert!(!Packet::ok(1).with_option("Na:me", "v").is_well_formed());
        assert!(!Packet::ok(1).with_payload("a=b", "c").is_well_formed());
        assert!(!Packet::ok(1).with_payload("a", " c").is_well_formed());
        assert!(!Packet::request("RTSP/1.0x", uri("rtsp", "h").as_request().unwrap().target.clone(), 1).is_well_formed());
    }

    #[test]
    fn kind_accessors() {
        let response = Packet::not_found(9);
        assert_eq!(response.status_code(), Some(404));
        assert!(response.as_request().is_none());

        let request = Packet::request(
            "OPTIONS",
            Target::ByStream {
                stream_type: "video".to_string(),
                params: String::new(),
            },
            1,
        );
        assert_eq!(request.status_code(), None);
        assert_eq!(request.as_request().map(|r| r.command.as_str()), Some("OPTIONS"));
    }
}
