//! Wire codec for [`Packet`]s.
//!
//! Parsing is total: malformed input yields `None`, never a panic or an
//! error the caller has to unwind. Serialization is deterministic and
//! `parse(to_string(p)) == Some(p)` holds for every packet that
//! [`Packet::is_well_formed`] accepts, which includes everything `parse`
//! returns.

use std::fmt;

use super::packet::{
    Options, PROTOCOL_TAG, Packet, PacketKind, Request, Response, SEQUENCE_HEADER,
    STREAM_TARGET_PREFIX, Target,
};

/// Parse one complete message (header block, blank line, optional body).
///
/// Accepts `\n` and `\r\n` line endings, mixed freely. Returns `None` when
/// the first line is neither a request nor a status line, when a request
/// target is malformed, or when the `CSeq` header is missing or not numeric.
pub fn parse(raw: &[u8]) -> Option<Packet> {
    let text = std::str::from_utf8(raw).ok()?;
    let text = text.replace("\r\n", "\n");
    let text = text.trim_start_matches('\n');

    let (head, body) = text.split_once("\n\n").unwrap_or((text, ""));
    let mut lines = head.lines();

    let kind = parse_first_line(lines.next()?.trim())?;

    let mut sequence_number = None;
    let mut options = Options::new();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.is_empty() {
            continue;
        }
        if name.eq_ignore_ascii_case(SEQUENCE_HEADER) {
            sequence_number = Some(value.parse::<u32>().ok()?);
        } else {
            options.insert(name.to_string(), value.to_string());
        }
    }

    Some(Packet {
        kind,
        sequence_number: sequence_number?,
        options,
        payloads: parse_payloads(body),
    })
}

/// Render a packet in canonical wire form.
///
/// The `CSeq` header always follows the first line and is written from
/// `sequence_number` only; options spelled like it are skipped. Options and
/// payloads keep their stored order and every line ends in `\r\n`.
pub fn to_string(packet: &Packet) -> String {
    let mut out = match &packet.kind {
        PacketKind::Request(request) => {
            format!("{} {} {}\r\n", request.command, request.target, PROTOCOL_TAG)
        }
        PacketKind::Response(response) => format!(
            "{} {} {}\r\n",
            PROTOCOL_TAG, response.status_code, response.status_message
        ),
    };

    out.push_str(&format!("{}: {}\r\n", SEQUENCE_HEADER, packet.sequence_number));
    for (name, value) in &packet.options {
        if name.trim().eq_ignore_ascii_case(SEQUENCE_HEADER) {
            continue;
        }
        out.push_str(&format!("{}: {}\r\n", name, value));
    }
    out.push_str("\r\n");
    out.push_str(&packet.render_payloads());
    out
}

impl Packet {
    /// Parse a packet from raw bytes. See [`parse`].
    pub fn parse(raw: &[u8]) -> Option<Self> {
        parse(raw)
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_string(self))
    }
}

/// Best-effort `CSeq` lookup in bytes that did not parse as a packet, so an
/// error response can still echo the client's sequence number.
pub fn sequence_hint(raw: &[u8]) -> Option<u32> {
    String::from_utf8_lossy(raw)
        .lines()
        .take_while(|line| !line.trim().is_empty())
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case(SEQUENCE_HEADER))
        .and_then(|(_, value)| value.trim().parse().ok())
}

fn parse_first_line(line: &str) -> Option<PacketKind> {
    if let Some(status) = line.strip_prefix(PROTOCOL_TAG) {
        return parse_status_line(status).map(PacketKind::Response);
    }

    let mut parts = line.split_whitespace();
    let command = parts.next()?;
    let target = parse_target(parts.next()?)?;
    let version = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    if version != PROTOCOL_TAG {
        tracing::warn!(version, "request line carries unexpected protocol tag");
    }

    Some(PacketKind::Request(Request {
        command: command.to_string(),
        target,
    }))
}

/// `" 404 NOT OK"` -> status 404, message `NOT OK`.
fn parse_status_line(rest: &str) -> Option<Response> {
    let rest = rest.strip_prefix(' ')?.trim_start();
    let code = rest.get(..3)?;
    if !code.bytes().all(|b| b.is_ascii_digit()) || code.starts_with('0') {
        return None;
    }
    let message = &rest[3..];
    if !message.is_empty() && !message.starts_with(char::is_whitespace) {
        return None;
    }

    Some(Response {
        status_code: code.parse().ok()?,
        status_message: message.trim().to_string(),
    })
}

fn parse_target(raw: &str) -> Option<Target> {
    if let Some(stream) = raw.strip_prefix(STREAM_TARGET_PREFIX) {
        let (stream_type, params) = match stream.find('/') {
            Some(slash) => stream.split_at(slash),
            None => (stream, ""),
        };
        if stream_type.is_empty() {
            return None;
        }
        return Some(Target::ByStream {
            stream_type: stream_type.to_string(),
            params: params.to_string(),
        });
    }

    let (protocol, authority) = raw.split_once("://")?;
    let (ip, port) = authority.rsplit_once(':')?;
    if protocol.is_empty() || ip.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    Some(Target::ByUri {
        protocol: protocol.to_string(),
        ip: ip.to_string(),
        port: port.parse().ok()?,
    })
}

/// Body lines split on whichever of `=` or `:` comes first, so both
/// `v=0` and `x-key:value` dialects are accepted.
fn parse_payloads(body: &str) -> Vec<(String, String)> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.find(['=', ':']) {
            Some(pos) => (
                line[..pos].trim().to_string(),
                line[pos + 1..].trim().to_string(),
            ),
            None => (line.to_string(), String::new()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trips(packet: &Packet) {
        let wire = to_string(packet);
        assert_eq!(parse(wire.as_bytes()).as_ref(), Some(packet), "wire: {wire:?}");
    }

    #[test]
    fn basic_request() {
        let raw = "MissingNo rtsp://1.1.1.1:1234 RTSP/1.0\r\nCSeq: 1993\r\n\r\n";
        let packet = parse(raw.as_bytes()).unwrap();
        let request = packet.as_request().unwrap();

        assert_eq!(request.command, "MissingNo");
        assert_eq!(
            request.target,
            Target::ByUri {
                protocol: "rtsp".to_string(),
                ip: "1.1.1.1".to_string(),
                port: 1234,
            }
        );
        assert_eq!(packet.sequence_number, 1993);
        assert!(packet.options.is_empty());
        assert!(packet.payloads.is_empty());
        round_trips(&packet);
    }

    #[test]
    fn stream_target() {
        let raw = "MissingNo streamid=audio/1/2/3 RTSP/1.0\r\nCSeq: 1993\r\n\r\n";
        let packet = parse(raw.as_bytes()).unwrap();

        assert_eq!(
            packet.as_request().unwrap().target,
            Target::ByStream {
                stream_type: "audio".to_string(),
                params: "/1/2/3".to_string(),
            }
        );
        assert_eq!(packet.sequence_number, 1993);
        round_trips(&packet);
    }

    #[test]
    fn stream_target_without_params() {
        let packet = parse(b"SETUP streamid=control RTSP/1.0\nCSeq: 5\n\n").unwrap();
        assert_eq!(packet.as_request().unwrap().target.stream_type(), Some("control"));
        round_trips(&packet);
    }

    #[test]
    fn complete_request_with_mixed_line_endings() {
        let raw = "OPTIONS rtsp://10.1.2.49:48010 RTSP/1.0\n\
                   CSeq: 1\n\
                   X-GS-ClientVersion: 14\n\
                   Host: 10.1.2.49\r\n\r\n\
                   v=0\n\
                   o=android 0 14 IN IPv4 0.0.0.0\n\
                   s=NVIDIA Streaming Client\n\
                   a=x-nv-video[0].clientViewportWd:1920\n\
                   a=x-nv-video[0].clientViewportHt:1080";
        let packet = parse(raw.as_bytes()).unwrap();

        assert_eq!(packet.as_request().unwrap().command, "OPTIONS");
        assert_eq!(packet.sequence_number, 1);
        assert_eq!(packet.options["X-GS-ClientVersion"], "14");
        assert_eq!(packet.options["Host"], "10.1.2.49");

        let values: Vec<&str> = packet.payloads.iter().map(|(_, v)| v.as_str()).collect();
        assert_eq!(
            values,
            vec![
                "0",
                "android 0 14 IN IPv4 0.0.0.0",
                "NVIDIA Streaming Client",
                "x-nv-video[0].clientViewportWd:1920",
                "x-nv-video[0].clientViewportHt:1080",
            ]
        );
        assert_eq!(packet.payloads[3].0, "a");
        round_trips(&packet);
    }

    #[test]
    fn basic_response() {
        let packet = parse(b"RTSP/1.0 200 OK\r\nCSeq: 123\r\n\r\n").unwrap();
        let response = packet.as_response().unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(response.status_message, "OK");
        assert_eq!(packet.sequence_number, 123);
        assert!(packet.options.is_empty());
        assert!(packet.payloads.is_empty());
        round_trips(&packet);
    }

    #[test]
    fn complete_response() {
        let raw = "RTSP/1.0 404 NOT OK\n\
                   CSeq: 1\n\
                   X-GS-ClientVersion: 14\n\
                   Host: 10.1.2.49\r\n\r\n\
                   v=0\n\
                   s=NVIDIA Streaming Client\n";
        let packet = parse(raw.as_bytes()).unwrap();
        let response = packet.as_response().unwrap();

        assert_eq!(response.status_code, 404);
        assert_eq!(response.status_message, "NOT OK");
        assert_eq!(packet.options["Host"], "10.1.2.49");
        assert_eq!(packet.payloads[1], ("s".to_string(), "NVIDIA Streaming Client".to_string()));
        round_trips(&packet);
    }

    #[test]
    fn missing_sequence_is_rejected() {
        assert!(parse(b"OPTIONS rtsp://10.1.2.49:48010 RTSP/1.0").is_none());
        assert!(parse(b"RTSP/1.0 200 OK").is_none());
        assert!(parse(b"OPTIONS rtsp://10.1.2.49:48010 RTSP/1.0\r\nHost: x\r\n\r\nCSeq: 1\r\n").is_none());
        assert!(parse(b"RTSP/1.0 200 OK\r\nCSeq: one\r\n\r\n").is_none());
    }

    #[test]
    fn malformed_targets_are_rejected() {
        for target in [
            "rtsp://10.1.2.49",
            "rtsp://10.1.2.49:port",
            "rtsp://10.1.2.49:99999",
            "10.1.2.49:48010",
            "://10.1.2.49:48010",
            "streamid=/0/0",
        ] {
            let raw = format!("OPTIONS {target} RTSP/1.0\r\nCSeq: 1\r\n\r\n");
            assert!(parse(raw.as_bytes()).is_none(), "accepted {target}");
        }
    }

    #[test]
    fn malformed_first_lines_are_rejected() {
        assert!(parse(b"").is_none());
        assert!(parse(b"OPTIONS\r\nCSeq: 1\r\n\r\n").is_none());
        assert!(parse(b"RTSP/1.0 2x0 OK\r\nCSeq: 1\r\n\r\n").is_none());
        assert!(parse(b"RTSP/1.0 2000 OK\r\nCSeq: 1\r\n\r\n").is_none());
        assert!(parse(b"\xff\xfe rtsp://1.1.1.1:1 RTSP/1.0\r\nCSeq: 1\r\n\r\n").is_none());
    }

    #[test]
    fn colon_and_equals_payload_dialects_share_canonical_form() {
        let colon = parse(b"RTSP/1.0 200 OK\nCSeq: 7\n\nsprop-parameter-sets:AAAAAU\n").unwrap();
        let equals = parse(b"RTSP/1.0 200 OK\nCSeq: 7\n\nsprop-parameter-sets=AAAAAU\n").unwrap();
        assert_eq!(colon, equals);
        assert!(to_string(&colon).ends_with("\r\n\r\nsprop-parameter-sets=AAAAAU\r\n"));
    }

    #[test]
    fn built_packets_round_trip() {
        let packets = [
            Packet::ok(3)
                .with_option("Session", "DEADBEEFCAFE;timeout = 90")
                .with_option("Transport", "server_port=48000"),
            Packet::ok(2)
                .with_payload("sprop-parameter-sets", "AAAAAU")
                .with_payload("a", "fmtp:97 surround-params=21101")
                .with_content_length(),
            Packet::request(
                "ANNOUNCE",
                Target::ByStream {
                    stream_type: "control".to_string(),
                    params: "/13/0".to_string(),
                },
                6,
            )
            .with_option("Session", "DEADBEEFCAFE")
            .with_payload("v", "0")
            .with_payload("a", "x-nv-video[0].maxFPS:60"),
            Packet::response(503, "", 0),
        ];
        for packet in &packets {
            round_trips(packet);
        }
    }

    #[test]
    fn serialized_form() {
        let packet = Packet::ok(4).with_option("Transport", "server_port=4");
        assert_eq!(
            packet.to_string(),
            "RTSP/1.0 200 OK\r\nCSeq: 4\r\nTransport: server_port=4\r\n\r\n"
        );
    }

    #[test]
    fn sequence_header_options_never_reach_the_wire() {
        let mut packet = Packet::ok(1).with_option("Session", "A");
        packet.options.insert("cseq".to_string(), "7".to_string());

        let wire = to_string(&packet);
        assert_eq!(wire, "RTSP/1.0 200 OK\r\nCSeq: 1\r\nSession: A\r\n\r\n");
        let parsed = parse(wire.as_bytes()).unwrap();
        assert_eq!(parsed.sequence_number, 1);
        assert_eq!(parsed.options.len(), 1);

        round_trips(&Packet::ok(1).with_option("cseq", "7"));
    }

    #[test]
    fn status_codes_need_three_significant_digits() {
        assert!(parse(b"RTSP/1.0 042 Low\r\nCSeq: 1\r\n\r\n").is_none());
        assert!(parse(b"RTSP/1.0 42 Low\r\nCSeq: 1\r\n\r\n").is_none());
        assert_eq!(
            parse(b"RTSP/1.0 100 Continue\r\nCSeq: 1\r\n\r\n").and_then(|p| p.status_code()),
            Some(100)
        );
    }

    #[test]
    fn stream_params_without_slash_do_not_round_trip() {
        let packet = Packet::request(
            "SETUP",
            Target::ByStream {
                stream_type: "audio".to_string(),
                params: "0".to_string(),
            },
            1,
        );
        assert!(!packet.is_well_formed());
        assert_ne!(parse(to_string(&packet).as_bytes()), Some(packet));
    }

    #[test]
    fn sequence_hint_from_unparseable_bytes() {
        assert_eq!(sequence_hint(b"GARBAGE\r\nCSeq: 17\r\n\r\n"), Some(17));
        assert_eq!(sequence_hint(b"GARBAGE\r\n\r\n"), None);
    }

    mod proptests {
        use super::*;
        use crate::protocol::packet::{Options, Request, Response};
        use proptest::prelude::*;

        /// Printable, trimmed, single line; may contain `=` and `:`.
        const LINE: &str = "([!-~]{1,8}( [!-~]{1,8}){0,2})?";

        fn target() -> impl Strategy<Value = Target> {
            prop_oneof![
                ("[a-z][a-z0-9+.-]{0,7}", "[0-9a-f.:]{1,20}", any::<u16>())
                    .prop_map(|(protocol, ip, port)| Target::ByUri { protocol, ip, port }),
                ("[a-z]{1,8}", "(/[0-9a-z]{1,4}){0,3}").prop_map(|(stream_type, params)| {
                    Target::ByStream {
                        stream_type,
                        params,
                    }
                }),
            ]
        }

        fn kind() -> impl Strategy<Value = PacketKind> {
            prop_oneof![
                ("[A-Za-z][A-Za-z_-]{0,10}", target())
                    .prop_map(|(command, target)| PacketKind::Request(Request { command, target })),
                (100u16..=999, LINE).prop_map(|(status_code, status_message)| {
                    PacketKind::Response(Response {
                        status_code,
                        status_message,
                    })
                }),
            ]
        }

        fn packet() -> impl Strategy<Value = Packet> {
            (
                kind(),
                any::<u32>(),
                proptest::collection::vec(("[A-Za-z][A-Za-z0-9-]{0,15}", LINE), 0..6),
                proptest::collection::vec(("[a-z0-9.\\[\\]-]{0,12}", LINE), 0..8),
            )
                .prop_map(|(kind, sequence_number, options, payloads)| {
                    let options: Options = options
                        .into_iter()
                        .filter(|(name, _)| !name.eq_ignore_ascii_case(SEQUENCE_HEADER))
                        .collect();
                    Packet {
                        kind,
                        sequence_number,
                        options,
                        payloads,
                    }
                })
        }

        proptest! {
            #[test]
            fn well_formed_packets_round_trip(packet in packet()) {
                prop_assert!(packet.is_well_formed());
                let wire = to_string(&packet);
                prop_assert_eq!(parse(wire.as_bytes()), Some(packet));
            }

            #[test]
            fn parsed_packets_are_fixed_points(
                packet in packet(),
                at in any::<proptest::sample::Index>(),
                noise in "[ -~\r\n]{0,6}",
            ) {
                let mut wire = to_string(&packet);
                wire.insert_str(at.index(wire.len() + 1), &noise);

                if let Some(parsed) = parse(wire.as_bytes()) {
                    prop_assert!(parsed.is_well_formed(), "{:?}", parsed);
                    let again = to_string(&parsed);
                    prop_assert_eq!(parse(again.as_bytes()), Some(parsed));
                }
            }
        }
    }
}
