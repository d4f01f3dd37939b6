//! Error types for the streaming host library.

use std::fmt;

/// Errors that can occur in the streaming host library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Transport**: [`Io`](Self::Io), [`Framing`](Self::Framing): socket
///   failures and byte streams that never form a complete message.
/// - **Protocol**: [`Parse`](Self::Parse),
///   [`ProtocolViolation`](Self::ProtocolViolation): malformed packets and
///   well-formed packets that are invalid for the connection's state.
/// - **Media**: [`Fec`](Self::Fec), [`Crypto`](Self::Crypto): shard
///   configuration mismatches and cipher failures.
/// - **Server**: [`Config`](Self::Config), [`NotStarted`](Self::NotStarted),
///   [`AlreadyRunning`](Self::AlreadyRunning).
///
/// None of these are process-fatal: each one is scoped to a single
/// connection or a single packetization call.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The byte stream could not be split into a complete message.
    #[error("framing error: {kind}")]
    Framing { kind: FramingErrorKind },

    /// A framed message was not a valid packet.
    #[error("malformed RTSP packet")]
    Parse,

    /// A well-formed request that the connection's state does not allow.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Invalid shard configuration or input for the FEC packetizer.
    #[error("FEC error: {kind}")]
    Fec { kind: FecErrorKind },

    /// Encryption or decryption failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Session or server settings that cannot be used, such as a client
    /// address that is not an IP.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// [`Server::start`](crate::Server::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,
}

/// Specific kind of framing failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramingErrorKind {
    /// No blank-line terminator within the configured header limit.
    HeaderTooLarge { limit: usize },
    /// Declared `Content-length` exceeds the configured body limit.
    BodyTooLarge { declared: usize, limit: usize },
    /// `Content-length` was present but not a decimal byte count.
    InvalidContentLength(String),
    /// The peer closed the connection part-way through a message.
    UnexpectedEof { buffered: usize },
}

impl fmt::Display for FramingErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeaderTooLarge { limit } => {
                write!(f, "header block exceeds {limit} bytes")
            }
            Self::BodyTooLarge { declared, limit } => {
                write!(f, "declared body of {declared} bytes exceeds {limit} bytes")
            }
            Self::InvalidContentLength(value) => {
                write!(f, "invalid Content-length: {value:?}")
            }
            Self::UnexpectedEof { buffered } => {
                write!(f, "connection closed with {buffered} bytes of a partial message")
            }
        }
    }
}

/// Specific kind of FEC failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FecErrorKind {
    /// Data or parity shard count is zero.
    ZeroShards,
    /// More shards than GF(2^8) can address.
    TooManyShards { total: usize },
    /// A fixed parity matrix does not have `fec_shards` x `data_shards` entries.
    MatrixShape { expected: usize, actual: usize },
    /// Payload does not fit in `data_shards * max_block_size` bytes.
    PayloadTooLarge { len: usize, capacity: usize },
    /// Shards handed to the codec are not all the same length.
    ShardLengthMismatch,
    /// The codec was given a different number of shards than configured.
    ShardCountMismatch { expected: usize, actual: usize },
    /// Fewer than `data_shards` shards survived.
    TooFewShards { present: usize, required: usize },
    /// The decode sub-matrix had no inverse.
    SingularMatrix,
}

impl fmt::Display for FecErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroShards => write!(f, "shard counts must be non-zero"),
            Self::TooManyShards { total } => {
                write!(f, "{total} shards exceed the 256 addressable in GF(2^8)")
            }
            Self::MatrixShape { expected, actual } => {
                write!(f, "parity matrix has {actual} entries, expected {expected}")
            }
            Self::PayloadTooLarge { len, capacity } => {
                write!(f, "payload of {len} bytes exceeds shard capacity {capacity}")
            }
            Self::ShardLengthMismatch => write!(f, "shards differ in length"),
            Self::ShardCountMismatch { expected, actual } => {
                write!(f, "expected {expected} shards, got {actual}")
            }
            Self::TooFewShards { present, required } => {
                write!(f, "{present} shards present, {required} required")
            }
            Self::SingularMatrix => write!(f, "decode matrix is singular"),
        }
    }
}

/// Convenience alias for `Result<T, StreamError>`.
pub type Result<T> = std::result::Result<T, StreamError>;
