/// Errors coming from the low level transport layer: HTTP request/response
/// plumbing and the raw WebSocket connection used by the reconnecting
/// producer. Higher level, chain-specific errors (JSON-RPC `error` objects,
/// schema validation failures) are the `icon` crate's concern.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An error coming from the underlying HTTP client.
    #[error("RPC error: client error: {0}")]
    Client(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
    /// The connection was lost; the caller (the state machine) decides
    /// whether and how to reconnect.
    #[error("RPC error: connection lost: {0}")]
    Disconnected(String),
    /// Cannot deserialize the response.
    #[error("RPC error: cannot deserialize response: {0}")]
    Deserialization(#[from] serde_json::Error),
    /// The requested URL is insecure, or otherwise not a valid endpoint.
    #[error("RPC error: invalid URL: {0}")]
    InvalidUrl(String),
    /// A WebSocket-level error (handshake, frame decode, close).
    #[error("RPC error: websocket error: {0}")]
    WebSocket(String),
    /// A JSON text frame was received where a specific shape was expected.
    #[error("RPC error: unexpected frame: {0}")]
    UnexpectedFrame(String),
}
