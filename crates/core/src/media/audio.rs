//! RTP payloader for the encoded audio stream.
//!
//! Each encoded frame becomes one RTP packet (payload type 97). After every
//! [`AUDIO_DATA_SHARDS`] data packets the block is protected by
//! [`AUDIO_FEC_SHARDS`] parity packets (payload type 127):
//!
//! ```text
//! RTP header (12) | FEC header (12) | parity shard
//!
//! FEC header: shard index (1) | payload type 97 (1) | base sequence (2, BE)
//!             | base timestamp (4, BE) | SSRC (4, BE)
//! ```
//!
//! Parity sequence numbers continue from the last data packet of the block;
//! they do not advance the data sequence counter.

use std::sync::Arc;

use crate::crypto::{AES_BLOCK_SIZE, CryptoService};
use crate::error::Result;
use crate::media::fec::{AUDIO_DATA_SHARDS, AUDIO_FEC_SHARDS, FecConfig, ReedSolomon};
use crate::media::rtp::{RTP_HEADER_LEN, RtpHeader, encode_header};
use crate::protocol::sdp::AUDIO_PAYLOAD_TYPE;
use crate::session::AudioSessionParams;

/// Payload type of the audio parity packets.
pub const FEC_PAYLOAD_TYPE: u8 = 127;
pub const AUDIO_FEC_HEADER_LEN: usize = 12;

const AUDIO_SSRC: u32 = 0;

struct AudioCipher {
    key: Vec<u8>,
    key_id: u32,
}

impl AudioCipher {
    /// IV for the packet with sequence `sequence`: `key_id + sequence`
    /// big-endian in the first four bytes, the rest zero.
    fn iv(&self, sequence: u16) -> [u8; AES_BLOCK_SIZE] {
        let mut iv = [0u8; AES_BLOCK_SIZE];
        iv[..4].copy_from_slice(&self.key_id.wrapping_add(u32::from(sequence)).to_be_bytes());
        iv
    }
}

/// Turns encoded audio frames into data and parity RTP packets.
pub struct AudioPayloader {
    rtp: RtpHeader,
    codec: ReedSolomon,
    packet_duration: u32,
    cipher: Option<AudioCipher>,
    crypto: Arc<dyn CryptoService>,
    /// Payloads of the current FEC block.
    block: Vec<Vec<u8>>,
    block_timestamp: u32,
}

impl AudioPayloader {
    pub fn new(params: &AudioSessionParams, crypto: Arc<dyn CryptoService>) -> Result<Self> {
        let codec = ReedSolomon::from_config(&FecConfig::audio())?;
        let cipher = params.encrypt.then(|| AudioCipher {
            key: params.aes_key.clone(),
            key_id: params.key_id,
        });

        tracing::info!(
            session_id = params.session_id,
            packet_duration_ms = params.packet_duration_ms,
            encrypt = params.encrypt,
            "audio payloader created"
        );

        Ok(Self {
            rtp: RtpHeader::new(AUDIO_PAYLOAD_TYPE, AUDIO_SSRC),
            codec,
            packet_duration: params.packet_duration_ms,
            cipher,
            crypto,
            block: Vec::with_capacity(AUDIO_DATA_SHARDS),
            block_timestamp: 0,
        })
    }

    /// Sequence number of the next data packet.
    pub fn sequence(&self) -> u16 {
        self.rtp.sequence()
    }

    /// Payload one encoded frame.
    ///
    /// Returns the data packet, followed by the block's parity packets when
    /// this frame completes a block.
    pub fn payload(&mut self, frame: &[u8]) -> Result<Vec<Vec<u8>>> {
        let sequence = self.rtp.sequence();
        let timestamp = self.rtp.timestamp();

        let body = match &self.cipher {
            Some(cipher) => self
                .crypto
                .encrypt_cbc(frame, &cipher.key, &cipher.iv(sequence), true)?,
            None => frame.to_vec(),
        };

        let mut packet = Vec::with_capacity(RTP_HEADER_LEN + body.len());
        packet.extend_from_slice(&self.rtp.write(false));
        packet.extend_from_slice(&body);
        self.rtp.advance_timestamp(self.packet_duration);

        if self.block.is_empty() {
            self.block_timestamp = timestamp;
        }
        self.block.push(body);

        let mut packets = vec![packet];
        if self.block.len() == AUDIO_DATA_SHARDS {
            packets.extend(self.parity_packets(sequence)?);
            self.block.clear();
        }
        Ok(packets)
    }

    fn parity_packets(&self, last_sequence: u16) -> Result<Vec<Vec<u8>>> {
        let shard_len = self.block.iter().map(Vec::len).max().unwrap_or(0);
        let shards: Vec<Vec<u8>> = self
            .block
            .iter()
            .map(|payload| {
                let mut shard = payload.clone();
                shard.resize(shard_len, 0);
                shard
            })
            .collect();
        let parity = self.codec.encode(&shards)?;

        let base_sequence = last_sequence
            .wrapping_add(1)
            .wrapping_sub(AUDIO_DATA_SHARDS as u16);

        let packets = parity
            .into_iter()
            .enumerate()
            .map(|(index, shard)| {
                let sequence = last_sequence.wrapping_add(1 + index as u16);
                let mut packet =
                    Vec::with_capacity(RTP_HEADER_LEN + AUDIO_FEC_HEADER_LEN + shard.len());
                packet.extend_from_slice(&encode_header(
                    FEC_PAYLOAD_TYPE,
                    false,
                    sequence,
                    0,
                    AUDIO_SSRC,
                ));
                packet.push(index as u8);
                packet.push(AUDIO_PAYLOAD_TYPE);
                packet.extend_from_slice(&base_sequence.to_be_bytes());
                packet.extend_from_slice(&self.block_timestamp.to_be_bytes());
                packet.extend_from_slice(&AUDIO_SSRC.to_be_bytes());
                packet.extend_from_slice(&shard);
                packet
            })
            .collect::<Vec<_>>();

        tracing::trace!(
            base_sequence,
            shard_len,
            parity = AUDIO_FEC_SHARDS,
            "audio FEC block emitted"
        );
        Ok(packets)
    }
}
