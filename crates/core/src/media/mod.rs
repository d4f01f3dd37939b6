//! Media packetization: RTP headers, forward error correction and the
//! audio payloader built from them.
//!
//! Every packet sent to the client starts with a 12-byte RTP fixed header
//! ([`rtp::RtpHeader`]):
//!
//! - **Sequence number** (16-bit, wrapping): loss detection and FEC block
//!   correlation.
//! - **Timestamp** (32-bit): media clock, in milliseconds for audio.
//! - **SSRC** (32-bit): always 0 on this transport.
//!
//! Frames are protected with a systematic Reed-Solomon code ([`fec`]) so that
//! any `data_shards` packets of a block are enough to rebuild it.
//!
//! | Stream | Module | Data + parity | Generator |
//! |--------|--------|---------------|-----------|
//! | Audio | [`audio`] | 4 + 2 | fixed matrix |
//! | Other | [`fec::FecPacketizer`] | configurable | Cauchy |

pub mod audio;
pub mod fec;
pub mod rtp;

pub use audio::AudioPayloader;
pub use fec::{FecConfig, FecPacketizer, ParityMatrix, ReedSolomon, ShardPacket, ShardSet};
