pub mod crypto;
pub mod error;
pub mod media;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use crypto::{CryptoService, RustCrypto};
pub use error::{Result, StreamError};
pub use protocol::{CommandHandler, Packet};
pub use server::{Server, ServerConfig};
pub use session::{BroadcastEventBus, EventBus, SessionEvent, SessionHandle, SessionState};
