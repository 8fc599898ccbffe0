//! WebSocket transport.
//!
//! The dispatcher listens on `ws://<host>:5000/socket`. Frames are sent as
//! text; inbound binary frames are accepted when they hold UTF-8.

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use crate::transport::{Channel, TransportError};

/// [`Channel`] over a WebSocket stream
pub struct WebSocketChannel<S = MaybeTlsStream<TcpStream>> {
    stream: WebSocketStream<S>,
}

impl WebSocketChannel {
    /// Open a WebSocket connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::WebSocket`] if the TCP connection or the
    /// WebSocket handshake fails.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        debug!("Opening WebSocket {}", url);
        let (stream, response) = tokio_tungstenite::connect_async(url).await?;
        trace!("Handshake response: {:?}", response.status());
        Ok(Self { stream })
    }
}

impl<S> WebSocketChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap an already negotiated WebSocket stream.
    #[must_use]
    pub fn from_stream(stream: WebSocketStream<S>) -> Self {
        Self { stream }
    }
}

impl<S> Channel for WebSocketChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    return None;
                }
                Err(e) => return Some(Err(e.into())),
            };

            match message {
                Message::Text(text) => return Some(Ok(text)),
                Message::Binary(bytes) => {
                    return Some(String::from_utf8(bytes).map_err(TransportError::from));
                }
                Message::Close(frame) => {
                    debug!("WebSocket closed by peer: {:?}", frame);
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.stream.close(None).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::{accept_async, client_async};

    async fn duplex_pair() -> (
        WebSocketChannel<tokio::io::DuplexStream>,
        WebSocketStream<tokio::io::DuplexStream>,
    ) {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (client, server) = tokio::join!(
            client_async("ws://localhost:5000/socket", client_io),
            accept_async(server_io)
        );
        let (client, _) = client.unwrap();
        (WebSocketChannel::from_stream(client), server.unwrap())
    }

    #[tokio::test]
    async fn test_text_frames_both_ways() {
        let (mut channel, mut server) = duplex_pair().await;

        channel.send("hello".to_string()).await.unwrap();
        let received = server.next().await.unwrap().unwrap();
        assert_eq!(received, Message::Text("hello".to_string()));

        server.send(Message::Text("world".to_string())).await.unwrap();
        assert_eq!(channel.recv().await.unwrap().unwrap(), "world");
    }

    #[tokio::test]
    async fn test_binary_frames_are_decoded() {
        let (mut channel, mut server) = duplex_pair().await;

        server
            .send(Message::Binary(b"{\"a\":1}".to_vec()))
            .await
            .unwrap();
        assert_eq!(channel.recv().await.unwrap().unwrap(), "{\"a\":1}");

        server.send(Message::Binary(vec![0xff, 0xfe])).await.unwrap();
        assert!(matches!(
            channel.recv().await,
            Some(Err(TransportError::InvalidUtf8(_)))
        ));
    }

    #[tokio::test]
    async fn test_pings_are_skipped() {
        let (mut channel, mut server) = duplex_pair().await;

        server.send(Message::Ping(vec![1, 2, 3])).await.unwrap();
        server.send(Message::Text("after".to_string())).await.unwrap();

        assert_eq!(channel.recv().await.unwrap().unwrap(), "after");
    }

    #[tokio::test]
    async fn test_server_close_ends_stream() {
        let (mut channel, mut server) = duplex_pair().await;

        server.close(None).await.unwrap();
        assert!(channel.recv().await.is_none());
    }
}
