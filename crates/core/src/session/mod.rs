//! Per-client streaming session state.
//!
//! A [`SessionState`] is built once when a client starts a session and is
//! never mutated afterwards. The RTSP connection handlers and the media
//! payloaders all read it through a [`SessionHandle`]; a change (e.g. port
//! renegotiation) publishes a whole new value that readers pick up on their
//! next [`load`](SessionHandle::load).
//!
//! ```text
//! SessionHandle ──load()──> Arc<SessionState>   (snapshot, lock released)
//!      │
//!      └─update(f)──> clone, apply f, swap in new Arc, publish SessionUpdated
//! ```

pub mod events;

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

pub use events::{
    AudioSessionParams, BroadcastEventBus, EventBus, SessionEvent, VideoCodec, VideoSessionParams,
};

/// Requested display mode of the streamed application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMode {
    pub width: u32,
    pub height: u32,
    pub refresh_rate: u32,
    /// The host can encode HEVC for this session.
    pub hevc_supported: bool,
}

/// Speaker positions, numbered as they appear in the Opus channel mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Speaker {
    FrontLeft = 0,
    FrontRight = 1,
    FrontCenter = 2,
    LowFrequency = 3,
    BackLeft = 4,
    BackRight = 5,
    SideLeft = 6,
    SideRight = 7,
}

/// Multistream Opus layout negotiated for audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioMode {
    pub channels: u8,
    pub streams: u8,
    pub coupled_streams: u8,
    pub speakers: Vec<Speaker>,
}

impl AudioMode {
    /// Two channels carried in one coupled stream.
    pub fn stereo() -> Self {
        Self {
            channels: 2,
            streams: 1,
            coupled_streams: 1,
            speakers: vec![Speaker::FrontLeft, Speaker::FrontRight],
        }
    }

    /// Standard layout for 2 (stereo), 6 (5.1) or 8 (7.1) channels.
    pub fn for_channels(channels: u8) -> Option<Self> {
        use Speaker::*;
        let (streams, coupled_streams, speakers) = match channels {
            2 => return Some(Self::stereo()),
            6 => (
                4,
                2,
                vec![FrontLeft, FrontRight, FrontCenter, LowFrequency, BackLeft, BackRight],
            ),
            8 => (
                5,
                3,
                vec![
                    FrontLeft,
                    FrontRight,
                    FrontCenter,
                    LowFrequency,
                    BackLeft,
                    BackRight,
                    SideLeft,
                    SideRight,
                ],
            ),
            _ => return None,
        };
        Some(Self {
            channels,
            streams,
            coupled_streams,
            speakers,
        })
    }

    /// Bitmask of the configured speakers, one bit per [`Speaker`] position.
    pub fn channel_mask(&self) -> u32 {
        self.speakers
            .iter()
            .fold(0, |mask, speaker| mask | (1 << *speaker as u32))
    }
}

/// The application launched for this session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct App {
    pub id: String,
    pub title: String,
}

/// Everything negotiated for one client session.
///
/// `gcm_key` and `gcm_iv_key` are raw bytes handed over by the pairing layer
/// and are opaque to this crate apart from keying the audio cipher.
#[derive(Clone)]
pub struct SessionState {
    pub session_id: u64,
    pub event_bus: Arc<dyn EventBus>,
    pub display_mode: DisplayMode,
    pub audio_mode: AudioMode,
    pub app: App,
    pub gcm_key: Vec<u8>,
    pub gcm_iv_key: Vec<u8>,
    pub unique_id: String,
    pub ip: String,
    pub rtsp_port: u16,
    pub control_port: u16,
    pub audio_port: u16,
    pub video_port: u16,
}

impl SessionState {
    /// Key id mixed into the audio cipher IV: the leading (up to) four bytes
    /// of `gcm_iv_key`, big-endian.
    pub fn audio_key_id(&self) -> u32 {
        self.gcm_iv_key
            .iter()
            .take(4)
            .fold(0u32, |id, byte| (id << 8) | u32::from(*byte))
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("session_id", &self.session_id)
            .field("display_mode", &self.display_mode)
            .field("audio_mode", &self.audio_mode)
            .field("app", &self.app)
            .field("unique_id", &self.unique_id)
            .field("ip", &self.ip)
            .field("rtsp_port", &self.rtsp_port)
            .field("control_port", &self.control_port)
            .field("audio_port", &self.audio_port)
            .field("video_port", &self.video_port)
            .finish_non_exhaustive()
    }
}

/// Shared, copy-on-write reference to the current [`SessionState`].
///
/// The lock is only held long enough to clone or swap the inner `Arc`, so
/// readers never wait on a writer building a new state.
#[derive(Clone)]
pub struct SessionHandle {
    current: Arc<RwLock<Arc<SessionState>>>,
}

impl SessionHandle {
    pub fn new(state: SessionState) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(state))),
        }
    }

    /// Snapshot of the current state.
    pub fn load(&self) -> Arc<SessionState> {
        self.current.read().clone()
    }

    /// Publish a new state derived from the current one.
    ///
    /// Snapshots taken before the update keep seeing the old value.
    pub fn update(&self, apply: impl FnOnce(&mut SessionState)) -> Arc<SessionState> {
        let next = {
            let mut current = self.current.write();
            let mut next = SessionState::clone(&current);
            apply(&mut next);
            let next = Arc::new(next);
            *current = next.clone();
            next
        };

        tracing::debug!(session_id = next.session_id, "session state replaced");
        next.event_bus.publish(SessionEvent::SessionUpdated {
            session_id: next.session_id,
        });
        next
    }
}
