//! Message channel abstraction.
//!
//! The connection driver talks to the server through a [`Channel`]: an
//! ordered, bidirectional stream of text frames. Implementations:
//!
//! - [`WebSocketChannel`](crate::websocket::WebSocketChannel): the
//!   dispatcher's native transport
//! - [`MemoryChannel`]: in-process pair, for tests and embedding

use std::future::Future;

use tokio::sync::mpsc;

/// Errors raised by a channel
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("Frame is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("Channel closed")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

/// A bidirectional text-frame channel owned by one connection.
///
/// `recv` must be cancel safe: it is polled inside `tokio::select!`.
pub trait Channel: Send + 'static {
    /// Send one frame.
    fn send(&mut self, text: String) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receive the next frame. `None` means the peer closed the channel.
    fn recv(&mut self) -> impl Future<Output = Option<Result<String, TransportError>>> + Send;

    /// Close the channel. Further sends fail.
    fn close(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Client end of an in-memory channel pair
#[derive(Debug)]
pub struct MemoryChannel {
    outbound: Option<mpsc::UnboundedSender<String>>,
    inbound: mpsc::UnboundedReceiver<String>,
}

/// Server end of an in-memory channel pair
#[derive(Debug)]
pub struct MemoryPeer {
    outbound: Option<mpsc::UnboundedSender<String>>,
    inbound: mpsc::UnboundedReceiver<String>,
}

/// Create a connected client/server channel pair.
#[must_use]
pub fn memory_pair() -> (MemoryChannel, MemoryPeer) {
    let (to_peer, from_client) = mpsc::unbounded_channel();
    let (to_client, from_peer) = mpsc::unbounded_channel();

    let channel = MemoryChannel {
        outbound: Some(to_peer),
        inbound: from_peer,
    };
    let peer = MemoryPeer {
        outbound: Some(to_client),
        inbound: from_client,
    };
    (channel, peer)
}

impl Channel for MemoryChannel {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let outbound = self.outbound.as_ref().ok_or(TransportError::Closed)?;
        outbound.send(text).map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.outbound = None;
        Ok(())
    }
}

impl MemoryPeer {
    /// Deliver a frame to the client.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] if either side has closed.
    pub fn send(&self, text: impl Into<String>) -> Result<(), TransportError> {
        let outbound = self.outbound.as_ref().ok_or(TransportError::Closed)?;
        outbound.send(text.into()).map_err(|_| TransportError::Closed)
    }

    /// Next frame sent by the client, or `None` once the client has closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    /// Frame already sent by the client, without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        self.inbound.try_recv().ok()
    }

    /// Close the server side. The client sees end of stream.
    pub fn close(&mut self) {
        self.outbound = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_pair_carries_frames_both_ways() {
        let (mut channel, mut peer) = memory_pair();

        channel.send("hello".to_string()).await.unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some("hello"));

        peer.send("world").unwrap();
        assert_eq!(channel.recv().await.unwrap().unwrap(), "world");
    }

    #[tokio::test]
    async fn test_peer_close_ends_client_stream() {
        let (mut channel, mut peer) = memory_pair();
        peer.close();

        assert!(channel.recv().await.is_none());
        assert!(peer.send("late").is_err());
    }

    #[tokio::test]
    async fn test_client_close_ends_peer_stream() {
        let (mut channel, mut peer) = memory_pair();
        channel.close().await.unwrap();

        assert!(peer.recv().await.is_none());
        assert!(matches!(
            channel.send("late".to_string()).await,
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Closed;
        assert_eq!(err.to_string(), "Channel closed");

        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: TransportError = io_err.into();
        assert!(err.to_string().contains("reset"));
    }
}
