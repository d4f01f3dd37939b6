//! Session-description bodies of the handshake.
//!
//! DESCRIBE answers with a short list of stream descriptors:
//!
//! ```text
//! sprop-parameter-sets=AAAAAU                  <- codec parameter placeholder
//! a=fmtp:97 surround-params=21101              <- channels, streams, coupled, mapping
//! a=x-nv-video[0].refPicInvalidation:1         <- only when HEVC is offered
//! ```
//!
//! ANNOUNCE carries the client's choices as `a=x-nv-*:<value>` attributes,
//! which [`StreamSettings`] collects into the parameters the media
//! pipelines are started with.

use std::collections::HashMap;

use crate::session::{AudioSessionParams, SessionState, VideoCodec, VideoSessionParams};

/// Payload type the audio stream is advertised under.
pub const AUDIO_PAYLOAD_TYPE: u8 = 97;

const SPROP_PARAMETER_SETS: &str = "AAAAAU";

const DEFAULT_PACKET_SIZE: u32 = 1024;
const DEFAULT_BITRATE_KBPS: u32 = 15_500;
const DEFAULT_AUDIO_PACKET_DURATION_MS: u32 = 5;

/// Audio bit of `x-ss-general.encryptionEnabled`.
const ENCRYPT_AUDIO_FLAG: u32 = 0x04;

/// Payload pairs of a DESCRIBE response for the given session.
pub fn describe_payloads(state: &SessionState) -> Vec<(String, String)> {
    let audio = &state.audio_mode;
    let mapping: String = audio
        .speakers
        .iter()
        .map(|speaker| (*speaker as u8).to_string())
        .collect();

    let mut payloads = vec![
        (
            "sprop-parameter-sets".to_string(),
            SPROP_PARAMETER_SETS.to_string(),
        ),
        (
            "a".to_string(),
            format!(
                "fmtp:{} surround-params={}{}{}{}",
                AUDIO_PAYLOAD_TYPE, audio.channels, audio.streams, audio.coupled_streams, mapping
            ),
        ),
    ];

    if state.display_mode.hevc_supported {
        payloads.push((
            "a".to_string(),
            "x-nv-video[0].refPicInvalidation:1".to_string(),
        ));
    }

    payloads
}

/// Client stream choices read from an ANNOUNCE body.
#[derive(Debug, Default)]
pub struct StreamSettings {
    attributes: HashMap<String, String>,
}

impl StreamSettings {
    /// Collect every `a=<name>:<value>` payload. Later duplicates win.
    pub fn from_payloads(payloads: &[(String, String)]) -> Self {
        let attributes = payloads
            .iter()
            .filter(|(key, _)| key == "a")
            .filter_map(|(_, value)| value.split_once(':'))
            .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
            .collect();
        Self { attributes }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    fn number(&self, name: &str) -> Option<u32> {
        let value = self.get(name)?;
        match value.parse() {
            Ok(number) => Some(number),
            Err(_) => {
                tracing::warn!(attribute = name, value, "ignoring non-numeric SDP attribute");
                None
            }
        }
    }

    /// Video parameters, falling back to the session's display mode.
    pub fn video_params(&self, state: &SessionState) -> VideoSessionParams {
        let mut display_mode = state.display_mode;
        if let Some(width) = self.number("x-nv-video[0].clientViewportWd") {
            display_mode.width = width;
        }
        if let Some(height) = self.number("x-nv-video[0].clientViewportHt") {
            display_mode.height = height;
        }
        if let Some(fps) = self.number("x-nv-video[0].maxFPS") {
            display_mode.refresh_rate = fps;
        }

        let wants_hevc = self.number("x-nv-clientSupportHevc").unwrap_or(0) != 0
            || self.number("x-nv-vqos[0].bitStreamFormat").unwrap_or(0) == 1;
        let codec = if wants_hevc && display_mode.hevc_supported {
            VideoCodec::Hevc
        } else {
            VideoCodec::H264
        };

        VideoSessionParams {
            session_id: state.session_id,
            display_mode,
            codec,
            packet_size: self
                .number("x-nv-video[0].packetSize")
                .unwrap_or(DEFAULT_PACKET_SIZE),
            bitrate_kbps: self
                .number("x-nv-vqos[0].bw.maximumBitrateKbps")
                .or_else(|| self.number("x-nv-video[0].initialBitrateKbps"))
                .unwrap_or(DEFAULT_BITRATE_KBPS),
            fec_enabled: self.number("x-nv-vqos[0].fec.enable").unwrap_or(1) != 0,
            min_required_fec_packets: self
                .number("x-nv-vqos[0].fec.minRequiredFecPackets")
                .unwrap_or(0),
            slices_per_frame: self
                .number("x-nv-video[0].videoEncoderSlicesPerFrame")
                .unwrap_or(1),
            client_ip: state.ip.clone(),
            port: state.video_port,
        }
    }

    /// Audio parameters, falling back to the session's audio mode.
    ///
    /// Audio is encrypted unless the client sends an encryption bitmask
    /// without the audio bit.
    pub fn audio_params(&self, state: &SessionState) -> AudioSessionParams {
        let channels = self
            .number("x-nv-audio.surround.numChannels")
            .and_then(|n| u8::try_from(n).ok())
            .unwrap_or(state.audio_mode.channels);
        let encrypt = self
            .number("x-ss-general.encryptionEnabled")
            .is_none_or(|flags| flags & ENCRYPT_AUDIO_FLAG != 0);

        AudioSessionParams {
            session_id: state.session_id,
            channels,
            channel_mask: self
                .number("x-nv-audio.surround.channelMask")
                .unwrap_or_else(|| state.audio_mode.channel_mask()),
            packet_duration_ms: self
                .number("x-nv-aqos.packetDuration")
                .unwrap_or(DEFAULT_AUDIO_PACKET_DURATION_MS),
            encrypt,
            aes_key: state.gcm_key.clone(),
            key_id: state.audio_key_id(),
            client_ip: state.ip.clone(),
            port: state.audio_port,
        }
    }
}
