//! The RTSP-derived handshake dialect spoken by game-streaming clients.
//!
//! Messages follow RTSP/1.0 syntax, with two differences from RFC 2326:
//! targets may name a logical stream instead of a URI, and bodies are parsed
//! into ordered `key=value` pairs rather than kept as opaque text.
//!
//! ```text
//! SETUP streamid=audio/0/0 RTSP/1.0\r\n
//! CSeq: 3\r\n
//! Transport: unicast;X-GS-ClientPort=50000-50001\r\n
//! \r\n
//! ```
//!
//! ## Supported commands
//!
//! | Command | Purpose |
//! |---------|---------|
//! | OPTIONS | Capability discovery |
//! | DESCRIBE | Stream descriptors derived from the session's display and audio mode |
//! | SETUP | Hand out the server port of `audio`, `video` or `control` and the session token |
//! | ANNOUNCE | Client's stream settings; starts the media pipelines |

pub mod handler;
pub mod packet;
pub mod parser;
pub mod sdp;

pub use handler::CommandHandler;
pub use packet::{Packet, PacketKind, Request, Response, Target};
pub use parser::{parse, to_string};
pub use sdp::StreamSettings;
