use thiserror::Error;

/// Result type for receiver operations
pub type Result<T> = std::result::Result<T, AvrError>;

/// Errors that can occur when interacting with a receiver.
///
/// HTTP and socket failures on the discovery and fallback paths are logged
/// and retried or skipped where they happen; only conditions the caller can
/// act on surface here.
#[derive(Error, Debug)]
pub enum AvrError {
    /// Persistent channel was closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// Descriptor XML was missing required fields
    #[error("Malformed descriptor: {0}")]
    MalformedDescriptor(String),

    /// Fallback channel retries exhausted
    #[error("Request failed after {attempts} attempts")]
    RequestExhausted {
        /// Number of attempts made before giving up
        attempts: u32,
    },

    /// No device registered under the given identifier
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Intent referenced an unknown zone or input
    #[error("Invalid intent: {0}")]
    InvalidIntent(String),

    /// Channel receive error
    #[error("Channel error: {0}")]
    ChannelError(String),
}
