//! Dispatcher client.
//!
//! A [`DispatcherClient`] owns at most one connection at a time. Each
//! connection is served by a driver task that exclusively owns the channel,
//! the call registry, the subscription registry and the event handlers.
//! Inbound frames, call deadlines and commands from the client handle are
//! processed one at a time by that task, in arrival order.
//!
//! Lifecycle notifications and asynchronous faults are delivered as
//! [`ClientEvent`]s through [`DispatcherClient::recv`].

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::calls::{CallCallback, CallRegistry, CallResult, Completion, Settled, TimedOut};
use crate::config::ClientConfig;
use crate::error::{ClientError, ErrorKind, ErrorReport, Result};
use crate::events::{EventDispatcher, EventHandler};
use crate::id::{CallId, Cookie};
use crate::protocol::{
    AuthArgs, AuthTokenArgs, CallArgs, Envelope, EventArgs, EventBurstArgs, Frame, RpcException,
    Session,
};
use crate::subscriptions::SubscriptionRegistry;
use crate::transport::Channel;
use crate::websocket::WebSocketChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Notifications produced by a client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The transport is open
    Connected,
    /// The transport closed; every pending call has been failed
    Disconnected,
    /// A login call succeeded
    LoggedIn(Session),
    /// An inbound event, delivered after its named handlers ran
    Event { name: String, args: Value },
    /// An asynchronous fault
    Error(ErrorReport),
}

enum Command {
    Call {
        method: String,
        args: Vec<Value>,
        callback: CallCallback,
    },
    Login {
        frame: Frame,
        principal: String,
    },
    Emit(Frame),
    Subscribe(String),
    Unsubscribe {
        pattern: String,
        reply: oneshot::Sender<Result<()>>,
    },
    RegisterHandler {
        name: String,
        cookie: Cookie,
        handler: EventHandler,
    },
    UnregisterHandler {
        name: String,
        cookie: Cookie,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect,
}

struct Connection {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

/// Client for the dispatcher's multiplexed RPC and event protocol
pub struct DispatcherClient {
    config: ClientConfig,
    connection: Option<Connection>,
    state: Arc<watch::Sender<ConnectionState>>,
    session: Arc<watch::Sender<Option<Session>>>,
    events_tx: mpsc::UnboundedSender<ClientEvent>,
    events_rx: mpsc::UnboundedReceiver<ClientEvent>,
}

impl Default for DispatcherClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl DispatcherClient {
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            connection: None,
            state: Arc::new(watch::channel(ConnectionState::Disconnected).0),
            session: Arc::new(watch::channel(None).0),
            events_tx,
            events_rx,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Session issued by the last successful login, until the server logs
    /// it out.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.session.borrow().clone()
    }

    /// Connect to the dispatcher on `hostname` over WebSocket.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::AlreadyConnected`] if a connection is open,
    /// [`ClientError::ConnectionTimeout`] if the transport does not open in
    /// time, or [`ClientError::Transport`] if it fails to open.
    pub async fn connect(&mut self, hostname: &str) -> Result<()> {
        self.ensure_disconnected()?;

        let url = self.config.url(hostname);
        let timeout = self.config.connect_timeout();
        info!("Connecting to {}", url);
        self.state.send_replace(ConnectionState::Connecting);

        match tokio::time::timeout(timeout, WebSocketChannel::connect(&url)).await {
            Ok(Ok(channel)) => {
                self.attach(channel);
                Ok(())
            }
            Ok(Err(e)) => {
                warn!("Failed to connect to {}: {}", url, e);
                self.state.send_replace(ConnectionState::Disconnected);
                Err(e.into())
            }
            Err(_) => {
                warn!("Connecting to {} timed out after {:?}", url, timeout);
                self.state.send_replace(ConnectionState::Disconnected);
                self.notify(ClientEvent::Error(ErrorReport::new(
                    ErrorKind::ConnectionTimeout,
                    format!("Connecting to {url} timed out"),
                )));
                Err(ClientError::ConnectionTimeout(timeout))
            }
        }
    }

    /// Run a connection over an already open channel.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::AlreadyConnected`] if a connection is open.
    pub fn connect_with<C: Channel>(&mut self, channel: C) -> Result<()> {
        self.ensure_disconnected()?;
        self.attach(channel);
        Ok(())
    }

    /// Close the connection and wait until its close path has run.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] if there is no connection.
    pub async fn disconnect(&mut self) -> Result<()> {
        let connection = self.connection.take().ok_or(ClientError::NotConnected)?;

        // The driver may already be gone if the server closed first
        let _ = connection.commands.send(Command::Disconnect);

        if let Err(e) = connection.task.await {
            error!("Connection task failed: {}", e);
            self.state.send_replace(ConnectionState::Disconnected);
        }
        Ok(())
    }

    /// Authenticate with a username and password.
    ///
    /// Success is signalled by [`ClientEvent::LoggedIn`]; rejection by an
    /// [`ErrorKind::RpcCallError`] report.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] if there is no connection.
    pub fn login(&self, username: &str, password: &str) -> Result<()> {
        let frame = Frame::Auth(AuthArgs {
            username: username.to_string(),
            password: password.to_string(),
            resource: self.config.resource.clone(),
        });
        self.submit(Command::Login {
            frame,
            principal: username.to_string(),
        })
    }

    /// Authenticate with a token issued by an earlier login.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] if there is no connection.
    pub fn login_token(&self, token: &str) -> Result<()> {
        let frame = Frame::AuthToken(AuthTokenArgs {
            token: token.to_string(),
            resource: self.config.resource.clone(),
        });
        self.submit(Command::Login {
            frame,
            principal: "token".to_string(),
        })
    }

    /// Issue a call and deliver its outcome to `callback`.
    ///
    /// The callback runs exactly once: with the result, the server's error,
    /// a timeout exception, or a connection-reset exception.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] if there is no connection. The
    /// callback is then dropped without running.
    pub fn call_with<F>(&self, method: impl Into<String>, args: Vec<Value>, callback: F) -> Result<()>
    where
        F: FnOnce(CallResult) + Send + 'static,
    {
        self.submit(Command::Call {
            method: method.into(),
            args,
            callback: Box::new(callback),
        })
    }

    /// Issue a call and wait for its result.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Rpc`] when the call fails remotely, times out
    /// or is reset by connection close, and [`ClientError::NotConnected`] if
    /// there is no connection.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        self.call_with(method, args, move |result| {
            let _ = tx.send(result);
        })?;

        let result = rx.await.map_err(|_| ClientError::ConnectionClosed)?;
        Ok(result?)
    }

    /// Issue a call and deserialize its result.
    ///
    /// # Errors
    ///
    /// Same as [`call`](Self::call), plus [`ClientError::Json`] if the result
    /// does not match `T`.
    pub async fn request<T: DeserializeOwned>(&self, method: &str, args: Vec<Value>) -> Result<T> {
        let value = self.call(method, args).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Take a reference on an event pattern.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] if there is no connection.
    pub fn subscribe(&self, pattern: &str) -> Result<()> {
        self.submit(Command::Subscribe(pattern.to_string()))
    }

    /// Release a reference on an event pattern.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NoSuchSubscription`] if `pattern` is not
    /// subscribed.
    pub async fn unsubscribe(&self, pattern: &str) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Unsubscribe {
            pattern: pattern.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| ClientError::ConnectionClosed)?
    }

    /// Send an event. No acknowledgement is expected.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] if there is no connection.
    pub fn emit_event(&self, name: &str, args: Value) -> Result<()> {
        self.submit(Command::Emit(Frame::Event(EventArgs::new(name, args))))
    }

    /// Send several events in one frame.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] if there is no connection.
    pub fn emit_event_burst(&self, events: Vec<EventArgs>) -> Result<()> {
        self.submit(Command::Emit(Frame::EventBurst(EventBurstArgs { events })))
    }

    /// Run `handler` for every inbound event named `name`.
    ///
    /// Registering implicitly subscribes to `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] if there is no connection.
    pub fn register_event_handler<F>(&self, name: &str, handler: F) -> Result<Cookie>
    where
        F: FnMut(&Value) + Send + 'static,
    {
        let cookie = Cookie::new();
        self.submit(Command::RegisterHandler {
            name: name.to_string(),
            cookie: cookie.clone(),
            handler: Box::new(handler),
        })?;
        Ok(cookie)
    }

    /// Remove a handler and release its subscription reference.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NoHandlersForName`] or
    /// [`ClientError::NoSuchCookie`] if no such handler is registered.
    pub async fn unregister_event_handler(&self, name: &str, cookie: &Cookie) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::UnregisterHandler {
            name: name.to_string(),
            cookie: cookie.clone(),
            reply,
        })?;
        rx.await.map_err(|_| ClientError::ConnectionClosed)?
    }

    /// Wait for the next notification.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.events_rx.recv().await
    }

    /// Next notification, if one is already queued.
    pub fn try_recv(&mut self) -> Option<ClientEvent> {
        self.events_rx.try_recv().ok()
    }

    fn ensure_disconnected(&mut self) -> Result<()> {
        if self.state() != ConnectionState::Disconnected {
            return Err(ClientError::AlreadyConnected);
        }
        self.connection = None;
        Ok(())
    }

    fn attach<C: Channel>(&mut self, channel: C) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let driver = Driver {
            channel,
            calls: CallRegistry::new(),
            subscriptions: SubscriptionRegistry::new(),
            dispatcher: EventDispatcher::new(),
            call_timeout: self.config.call_timeout(),
            events: self.events_tx.clone(),
            state: self.state.clone(),
            session: self.session.clone(),
        };

        self.state.send_replace(ConnectionState::Connected);
        info!("Connection established");
        self.notify(ClientEvent::Connected);

        let task = tokio::spawn(driver.run(command_rx));
        self.connection = Some(Connection { commands, task });
    }

    fn submit(&self, command: Command) -> Result<()> {
        let connection = self.connection.as_ref().ok_or(ClientError::NotConnected)?;
        connection
            .commands
            .send(command)
            .map_err(|_| ClientError::NotConnected)
    }

    fn notify(&self, event: ClientEvent) {
        let _ = self.events_tx.send(event);
    }
}

/// Per-connection task state
struct Driver<C> {
    channel: C,
    calls: CallRegistry,
    subscriptions: SubscriptionRegistry,
    dispatcher: EventDispatcher,
    call_timeout: Duration,
    events: mpsc::UnboundedSender<ClientEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    session: Arc<watch::Sender<Option<Session>>>,
}

impl<C: Channel> Driver<C> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => {
                    // All handles gone: same as an explicit disconnect
                    let command = command.unwrap_or(Command::Disconnect);
                    if self.handle_command(command).await.is_break() {
                        break;
                    }
                }
                inbound = self.channel.recv() => match inbound {
                    Some(Ok(text)) => self.handle_frame(&text),
                    Some(Err(e)) => {
                        warn!("Transport failure: {}", e);
                        self.report(ErrorReport::new(ErrorKind::ConnectionClosed, e.to_string()));
                        break;
                    }
                    None => {
                        debug!("Server closed the connection");
                        break;
                    }
                },
                timed_out = self.calls.next_timeout() => self.handle_timeout(timed_out),
            }
        }

        // Commands queued behind the close still get exactly one outcome
        commands.close();
        while let Ok(command) = commands.try_recv() {
            self.abandon(command);
        }

        self.close();
    }

    /// Settle a command that arrived after the connection went down.
    fn abandon(&mut self, command: Command) {
        match command {
            Command::Call {
                method,
                args,
                callback,
            } => {
                debug!("Call '{}' queued behind close", method);
                // Reset by the close path along with every other pending call
                self.calls.register(
                    CallId::new(),
                    method,
                    args,
                    Completion::Reply(callback),
                    self.call_timeout,
                );
            }
            Command::Login { frame, principal } => {
                debug!("Login queued behind close");
                self.calls.register(
                    CallId::new(),
                    frame.name().to_string(),
                    vec![Value::String(principal)],
                    Completion::Login,
                    self.call_timeout,
                );
            }
            Command::Unsubscribe { reply, .. } | Command::UnregisterHandler { reply, .. } => {
                let _ = reply.send(Err(ClientError::ConnectionClosed));
            }
            Command::Emit(_)
            | Command::Subscribe(_)
            | Command::RegisterHandler { .. }
            | Command::Disconnect => {}
        }
    }

    async fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Call {
                method,
                args,
                callback,
            } => {
                let frame = Frame::Call(CallArgs {
                    method: method.clone(),
                    args: args.clone(),
                });
                self.start_call(frame, method, args, Completion::Reply(callback))
                    .await
            }
            Command::Login { frame, principal } => {
                let method = frame.name().to_string();
                self.start_call(frame, method, vec![Value::String(principal)], Completion::Login)
                    .await
            }
            Command::Emit(frame) => self.send(frame).await,
            Command::Subscribe(pattern) => {
                let frame = self.subscriptions.subscribe(&pattern);
                self.send_control(frame).await
            }
            Command::Unsubscribe { pattern, reply } => {
                match self.subscriptions.unsubscribe(&pattern) {
                    Ok(frame) => {
                        let _ = reply.send(Ok(()));
                        self.send_control(frame).await
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        ControlFlow::Continue(())
                    }
                }
            }
            Command::RegisterHandler {
                name,
                cookie,
                handler,
            } => {
                let frame =
                    self.dispatcher
                        .register(&name, cookie, handler, &mut self.subscriptions);
                self.send_control(frame).await
            }
            Command::UnregisterHandler {
                name,
                cookie,
                reply,
            } => match self
                .dispatcher
                .unregister(&name, &cookie, &mut self.subscriptions)
            {
                Ok(frame) => {
                    let _ = reply.send(Ok(()));
                    self.send_control(frame).await
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                    ControlFlow::Continue(())
                }
            },
            Command::Disconnect => {
                info!("Disconnecting");
                if let Err(e) = self.channel.close().await {
                    debug!("Error while closing channel: {}", e);
                }
                ControlFlow::Break(())
            }
        }
    }

    async fn start_call(
        &mut self,
        frame: Frame,
        method: String,
        args: Vec<Value>,
        completion: Completion,
    ) -> ControlFlow<()> {
        let id = CallId::new();
        let encoded = Envelope::new(frame, Some(id.clone())).encode();
        let label = method.clone();
        self.calls
            .register(id.clone(), method, args, completion, self.call_timeout);

        match encoded {
            Ok(text) => self.transmit(text).await,
            Err(e) => {
                error!("Failed to encode call '{}': {}", label, e);
                self.report(ErrorReport::new(
                    ErrorKind::Other,
                    format!("Failed to encode call '{label}': {e}"),
                ));
                if let Some(Settled::Login(result)) = self
                    .calls
                    .complete(&id, Err(RpcException::from_errno("EINVAL")))
                {
                    self.finish_login(result);
                }
                ControlFlow::Continue(())
            }
        }
    }

    async fn send_control(&mut self, frame: Option<Frame>) -> ControlFlow<()> {
        match frame {
            Some(frame) => self.send(frame).await,
            None => ControlFlow::Continue(()),
        }
    }

    async fn send(&mut self, frame: Frame) -> ControlFlow<()> {
        match Envelope::new(frame, None).encode() {
            Ok(text) => self.transmit(text).await,
            Err(e) => {
                error!("Failed to encode frame: {}", e);
                self.report(ErrorReport::new(ErrorKind::Other, e.to_string()));
                ControlFlow::Continue(())
            }
        }
    }

    async fn transmit(&mut self, text: String) -> ControlFlow<()> {
        trace!("-> {}", text);
        match self.channel.send(text).await {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => {
                warn!("Failed to send frame: {}", e);
                self.report(ErrorReport::new(ErrorKind::Other, e.to_string()));
                ControlFlow::Break(())
            }
        }
    }

    fn handle_frame(&mut self, text: &str) {
        trace!("<- {}", text);

        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Malformed response: \"{}\": {}", text, e);
                self.report(ErrorReport::new(ErrorKind::InvalidResponse, e.to_string()));
                return;
            }
        };

        match envelope.frame {
            Frame::Event(event) => self.dispatch_event(event),
            Frame::EventBurst(burst) => {
                for event in burst.events {
                    self.dispatch_event(event);
                }
            }
            Frame::Logout(args) => {
                let reason = args
                    .reason
                    .unwrap_or_else(|| "Session logged out".to_string());
                info!("Logged out by server: {}", reason);
                self.session.send_replace(None);
                self.report(ErrorReport::new(ErrorKind::SessionLoggedOut, reason));
            }
            Frame::Call(call) => {
                error!("Server functionality is not supported (call to '{}')", call.method);
                self.report(ErrorReport::new(
                    ErrorKind::SpuriousResponse,
                    format!("Unexpected inbound call to '{}'", call.method),
                ));
            }
            Frame::Response(result) => self.settle(envelope.id, Ok(result)),
            Frame::Error(error) => self.settle(envelope.id, Err(error.into())),
            other => {
                warn!(
                    "Unexpected {}/{} frame from server",
                    other.namespace(),
                    other.name()
                );
                self.report(ErrorReport::new(
                    ErrorKind::InvalidResponse,
                    format!("Unexpected {}/{} frame", other.namespace(), other.name()),
                ));
            }
        }
    }

    fn settle(&mut self, id: Option<CallId>, result: CallResult) {
        let Some(id) = id else {
            warn!("Spurious RPC response without id");
            self.report(ErrorReport::new(
                ErrorKind::SpuriousResponse,
                "Response without id",
            ));
            return;
        };

        match self.calls.complete(&id, result) {
            Some(Settled::Delivered) => {}
            Some(Settled::Login(result)) => self.finish_login(result),
            None => {
                warn!("Spurious RPC response: {}", id);
                self.report(ErrorReport::new(
                    ErrorKind::SpuriousResponse,
                    format!("No pending call with id {id}"),
                ));
            }
        }
    }

    fn finish_login(&mut self, result: CallResult) {
        match result {
            Ok(value) => {
                let session = Session::from_login_response(&value);
                info!("Logged in as {}", session.username);
                self.session.send_replace(Some(session.clone()));
                self.notify(ClientEvent::LoggedIn(session));
            }
            Err(exception) => {
                warn!("Login failed: {}", exception);
                self.report(ErrorReport::new(
                    ErrorKind::RpcCallError,
                    exception.to_string(),
                ));
            }
        }
    }

    fn handle_timeout(&mut self, timed_out: TimedOut) {
        warn!(
            "RPC call {} ({}) timed out",
            timed_out.id, timed_out.method
        );
        self.report(
            ErrorReport::new(ErrorKind::RpcCallTimeout, RpcException::timed_out().message)
                .with_call(timed_out.method, timed_out.args),
        );
    }

    fn dispatch_event(&mut self, event: EventArgs) {
        let events = &self.events;
        self.dispatcher.dispatch(&event.name, &event.args, |name, args| {
            let _ = events.send(ClientEvent::Event {
                name: name.to_string(),
                args: args.clone(),
            });
        });
    }

    fn close(&mut self) {
        let reset = self.calls.drain_on_close().len();
        if reset > 0 {
            debug!("Reset {} pending calls", reset);
        }

        info!("Connection closed");
        self.state.send_replace(ConnectionState::Disconnected);
        self.notify(ClientEvent::Disconnected);
    }

    fn report(&self, report: ErrorReport) {
        self.notify(ClientEvent::Error(report));
    }

    fn notify(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory_pair;

    #[test]
    fn test_new_client_is_disconnected() {
        let client = DispatcherClient::default();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.session().is_none());
        assert_eq!(client.config().port, 5000);
    }

    #[tokio::test]
    async fn test_state_watch_follows_lifecycle() {
        let mut client = DispatcherClient::default();
        let mut state = client.watch_state();
        let (channel, mut peer) = memory_pair();

        client.connect_with(channel).unwrap();
        assert_eq!(*state.borrow_and_update(), ConnectionState::Connected);

        peer.close();
        state.changed().await.unwrap();
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_register_requires_connection() {
        let client = DispatcherClient::default();
        let result = client.register_event_handler("task.progress", |_| {});
        assert!(matches!(result, Err(ClientError::NotConnected)));
    }
}
