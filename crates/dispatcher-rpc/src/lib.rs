//! Client for the middleware dispatcher's multiplexed RPC and event protocol.
//!
//! One connection carries request/response calls, error replies, server
//! pushed events and subscription control, all as JSON envelopes of the form
//! `{"namespace", "name", "id", "args"}`.
//!
//! # Architecture
//!
//! - [`client`]: connection lifecycle and the public [`DispatcherClient`] API
//! - [`calls`]: in-flight call registry with per-call deadlines
//! - [`subscriptions`]: reference-counted event subscriptions
//! - [`events`]: named event handlers and dispatch
//! - [`protocol`]: envelope and frame types, [`RpcException`], [`Session`]
//! - [`errno`]: errno names and codes used in RPC errors
//! - [`transport`]: the [`Channel`] abstraction and an in-memory pair
//! - [`websocket`]: WebSocket channel, the dispatcher's native transport
//! - [`config`]: [`ClientConfig`]
//! - [`error`]: [`ClientError`] and asynchronous [`ErrorReport`]s
//!
//! # Example
//!
//! ```no_run
//! use dispatcher_rpc::{ClientConfig, ClientEvent, DispatcherClient};
//! use serde_json::json;
//!
//! # async fn example() -> dispatcher_rpc::Result<()> {
//! let mut client = DispatcherClient::new(ClientConfig::default());
//! client.connect("freenas.local").await?;
//! client.login("root", "secret")?;
//!
//! let info = client.call("system.info.version", vec![]).await?;
//! println!("version: {info}");
//!
//! client.register_event_handler("task.progress", |args| {
//!     println!("progress: {args}");
//! })?;
//!
//! while let Some(event) = client.recv().await {
//!     if let ClientEvent::Disconnected = event {
//!         break;
//!     }
//! }
//! # let _ = json!(null);
//! # Ok(())
//! # }
//! ```

pub mod calls;
pub mod client;
pub mod config;
pub mod errno;
pub mod error;
pub mod events;
pub mod id;
pub mod protocol;
pub mod subscriptions;
pub mod transport;
pub mod websocket;

// Re-export client types
pub use client::{ClientEvent, ConnectionState, DispatcherClient};
pub use config::{ClientConfig, ConfigError};

// Re-export error types
pub use error::{ClientError, ErrorKind, ErrorReport, Result};

// Re-export protocol types
pub use calls::CallResult;
pub use id::{CallId, Cookie};
pub use protocol::{Envelope, EventArgs, Frame, RpcException, Session};

// Re-export transport types
pub use transport::{Channel, MemoryChannel, MemoryPeer, TransportError, memory_pair};
pub use websocket::WebSocketChannel;
