use std::io;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use gamestream::crypto::hex_decode;
use gamestream::session::{App, AudioMode, DisplayMode};
use gamestream::{BroadcastEventBus, Server, SessionHandle, SessionState};
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(
    name = "gamestream-host",
    about = "Handshake server for a single game-streaming session"
)]
struct Args {
    /// Bind address (host:port)
    #[arg(long, short, default_value = "0.0.0.0:48010")]
    bind: String,

    #[arg(long, default_value_t = 1)]
    session_id: u64,

    /// Address the media streams are sent to
    #[arg(long, default_value = "127.0.0.1")]
    client_ip: String,

    #[arg(long, default_value_t = 1920)]
    width: u32,

    #[arg(long, default_value_t = 1080)]
    height: u32,

    #[arg(long, default_value_t = 60)]
    fps: u32,

    /// Offer HEVC to the client
    #[arg(long)]
    hevc: bool,

    /// 2, 6 or 8
    #[arg(long, default_value_t = 2)]
    audio_channels: u8,

    #[arg(long, default_value_t = 47999)]
    control_port: u16,

    #[arg(long, default_value_t = 48000)]
    audio_port: u16,

    #[arg(long, default_value_t = 47998)]
    video_port: u16,

    /// AES-128 session key, hex
    #[arg(long, default_value = "00000000000000000000000000000000")]
    aes_key: String,

    /// Key id mixed into the audio IV, hex
    #[arg(long, default_value = "0")]
    key_id: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let Some(audio_mode) = AudioMode::for_channels(args.audio_channels) else {
        eprintln!("Unsupported audio channel count: {}", args.audio_channels);
        return;
    };
    let gcm_key = match hex_decode(&args.aes_key, false) {
        Ok(key) => key,
        Err(e) => {
            eprintln!("Invalid --aes-key: {}", e);
            return;
        }
    };
    let gcm_iv_key = match hex_decode(&args.key_id, false) {
        Ok(key_id) => key_id,
        Err(e) => {
            eprintln!("Invalid --key-id: {}", e);
            return;
        }
    };

    let rtsp_port = args
        .bind
        .rsplit_once(':')
        .and_then(|(_, port)| port.parse().ok())
        .unwrap_or(0);

    let bus = Arc::new(BroadcastEventBus::default());
    let mut events = bus.subscribe();
    thread::spawn(move || {
        loop {
            match events.blocking_recv() {
                Ok(event) => tracing::info!(?event, "session event"),
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "events dropped"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let session = SessionHandle::new(SessionState {
        session_id: args.session_id,
        event_bus: bus,
        display_mode: DisplayMode {
            width: args.width,
            height: args.height,
            refresh_rate: args.fps,
            hevc_supported: args.hevc,
        },
        audio_mode,
        app: App::default(),
        gcm_key,
        gcm_iv_key,
        unique_id: String::new(),
        ip: args.client_ip,
        rtsp_port,
        control_port: args.control_port,
        audio_port: args.audio_port,
        video_port: args.video_port,
    });

    let mut server = Server::new(&args.bind, session);

    if let Err(e) = server.start() {
        eprintln!("Failed to start server: {}", e);
        return;
    }

    println!("Handshake server on {}, press Enter to stop", args.bind);
    let mut input = String::new();
    if let Err(e) = io::stdin().read_line(&mut input) {
        eprintln!("Failed to read stdin: {}", e);
    }

    server.stop();
}
