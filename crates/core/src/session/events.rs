use std::fmt;

use tokio::sync::broadcast;

use super::DisplayMode;

/// Receives notifications published by the RTSP handlers.
///
/// Implementations must not block: `publish` is called from inside a
/// connection's request/response cycle.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: SessionEvent);
}

/// Notifications emitted as a session is negotiated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// ANNOUNCE completed: the video pipeline can start.
    VideoSessionReady(VideoSessionParams),
    /// ANNOUNCE completed: the audio pipeline can start.
    AudioSessionReady(AudioSessionParams),
    /// A new [`SessionState`](super::SessionState) was published.
    SessionUpdated { session_id: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    Hevc,
}

/// Video stream parameters agreed during ANNOUNCE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSessionParams {
    pub session_id: u64,
    pub display_mode: DisplayMode,
    pub codec: VideoCodec,
    /// Maximum RTP payload per video packet.
    pub packet_size: u32,
    pub bitrate_kbps: u32,
    pub fec_enabled: bool,
    pub min_required_fec_packets: u32,
    pub slices_per_frame: u32,
    pub client_ip: String,
    pub port: u16,
}

/// Audio stream parameters agreed during ANNOUNCE.
///
/// `Debug` leaves out `aes_key`.
#[derive(Clone, PartialEq, Eq)]
pub struct AudioSessionParams {
    pub session_id: u64,
    pub channels: u8,
    pub channel_mask: u32,
    pub packet_duration_ms: u32,
    pub encrypt: bool,
    pub aes_key: Vec<u8>,
    pub key_id: u32,
    pub client_ip: String,
    pub port: u16,
}

impl fmt::Debug for AudioSessionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSessionParams")
            .field("session_id", &self.session_id)
            .field("channels", &self.channels)
            .field("channel_mask", &self.channel_mask)
            .field("packet_duration_ms", &self.packet_duration_ms)
            .field("encrypt", &self.encrypt)
            .field("key_id", &self.key_id)
            .field("client_ip", &self.client_ip)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

/// [`EventBus`] fanning events out to every subscribed receiver.
///
/// Events published while nobody is subscribed are dropped; a receiver that
/// falls more than `capacity` events behind loses the oldest ones.
pub struct BroadcastEventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EventBus for BroadcastEventBus {
    fn publish(&self, event: SessionEvent) {
        match self.sender.send(event) {
            Ok(receivers) => tracing::trace!(receivers, "event published"),
            Err(broadcast::error::SendError(event)) => {
                tracing::debug!(?event, "event dropped, no subscribers");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_receive_events_in_order() {
        let bus = BroadcastEventBus::new(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(SessionEvent::SessionUpdated { session_id: 1 });
        bus.publish(SessionEvent::SessionUpdated { session_id: 2 });

        for receiver in [&mut first, &mut second] {
            assert_eq!(
                receiver.try_recv().unwrap(),
                SessionEvent::SessionUpdated { session_id: 1 }
            );
            assert_eq!(
                receiver.try_recv().unwrap(),
                SessionEvent::SessionUpdated { session_id: 2 }
            );
        }
    }

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let bus = BroadcastEventBus::default();
        bus.publish(SessionEvent::SessionUpdated { session_id: 1 });

        let mut late = bus.subscribe();
        assert!(late.try_recv().is_err());
    }

    #[test]
    fn audio_params_debug_hides_key() {
        let event = SessionEvent::AudioSessionReady(AudioSessionParams {
            session_id: 1,
            channels: 2,
            channel_mask: 0x3,
            packet_duration_ms: 5,
            encrypt: true,
            aes_key: vec![0xab; 16],
            key_id: 0x1234,
            client_ip: "10.0.0.2".to_string(),
            port: 48000,
        });

        let shown = format!("{event:?}");
        assert!(!shown.contains("aes_key"), "{shown}");
        assert!(!shown.contains("171"), "{shown}");
        assert!(shown.contains("key_id: 4660"), "{shown}");
        assert!(shown.contains("port: 48000"), "{shown}");
    }
}
