//! Network transport for the handshake and the media streams.
//!
//! - **TCP** ([`tcp`]): carries the handshake request/response exchange,
//!   one thread per connection. [`framing`] cuts each connection's byte
//!   stream into complete messages.
//!
//! - **UDP** ([`udp`]): carries audio and video packets to the ports the
//!   client was given during SETUP.

pub mod framing;
pub mod tcp;
pub mod udp;

pub use framing::MessageFramer;
pub use udp::UdpTransport;
