//! Event handler registry and dispatch.
//!
//! Handlers are registered per event name and identified by a [`Cookie`].
//! Registering a handler takes a reference on the subscription for that
//! name; unregistering releases it.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};

use serde_json::Value;
use tracing::{debug, error};

use crate::error::ClientError;
use crate::id::Cookie;
use crate::protocol::Frame;
use crate::subscriptions::SubscriptionRegistry;

/// Callback invoked with the `args` of each matching event
pub type EventHandler = Box<dyn FnMut(&Value) + Send + 'static>;

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<String, Vec<(Cookie, EventHandler)>>,
}

impl EventDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `handler` under `name` and subscribe to `name`.
    ///
    /// Returns the `subscribe` frame to send, if this is the first interest
    /// in `name`.
    pub fn register(
        &mut self,
        name: &str,
        cookie: Cookie,
        handler: EventHandler,
        subscriptions: &mut SubscriptionRegistry,
    ) -> Option<Frame> {
        debug!("Registering handler {} for {}", cookie, name);
        self.handlers
            .entry(name.to_string())
            .or_default()
            .push((cookie, handler));
        subscriptions.subscribe(name)
    }

    /// Remove one handler and release its subscription reference.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NoHandlersForName`] if nothing is registered
    /// under `name`, or [`ClientError::NoSuchCookie`] if `cookie` is not one
    /// of its handlers.
    pub fn unregister(
        &mut self,
        name: &str,
        cookie: &Cookie,
        subscriptions: &mut SubscriptionRegistry,
    ) -> Result<Option<Frame>, ClientError> {
        let handlers = self
            .handlers
            .get_mut(name)
            .ok_or_else(|| ClientError::NoHandlersForName(name.to_string()))?;

        let position = handlers
            .iter()
            .position(|(c, _)| c == cookie)
            .ok_or_else(|| ClientError::NoSuchCookie {
                name: name.to_string(),
                cookie: cookie.clone(),
            })?;

        // Release the subscription first so a failure leaves the handler in place
        let frame = subscriptions.unsubscribe(name)?;

        handlers.remove(position);
        if handlers.is_empty() {
            self.handlers.remove(name);
        }

        debug!("Unregistered handler {} for {}", cookie, name);
        Ok(frame)
    }

    /// Deliver one event to every handler registered under `name`, then to
    /// `catch_all`.
    ///
    /// A handler that panics is logged and skipped; the remaining handlers
    /// and the catch-all still run. Returns the number of handlers that ran
    /// to completion.
    pub fn dispatch(
        &mut self,
        name: &str,
        args: &Value,
        catch_all: impl FnOnce(&str, &Value),
    ) -> usize {
        let mut delivered = 0;

        if let Some(handlers) = self.handlers.get_mut(name) {
            for (cookie, handler) in handlers.iter_mut() {
                match catch_unwind(AssertUnwindSafe(|| handler(args))) {
                    Ok(()) => delivered += 1,
                    Err(_) => error!("Event handler {} for {} panicked", cookie, name),
                }
            }
        }

        catch_all(name, args);
        delivered
    }

    #[must_use]
    pub fn handler_count(&self, name: &str) -> usize {
        self.handlers.get(name).map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<&str, usize> = self
            .handlers
            .iter()
            .map(|(name, handlers)| (name.as_str(), handlers.len()))
            .collect();
        f.debug_struct("EventDispatcher")
            .field("handlers", &counts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn recorder(log: &Arc<Mutex<Vec<String>>>, label: &str) -> EventHandler {
        let log = log.clone();
        let label = label.to_string();
        Box::new(move |args| log.lock().unwrap().push(format!("{label}:{args}")))
    }

    #[test]
    fn test_register_subscribes_once_per_name() {
        let mut dispatcher = EventDispatcher::new();
        let mut subscriptions = SubscriptionRegistry::new();
        let log = Arc::default();

        let first = dispatcher.register(
            "task.progress",
            Cookie::new(),
            recorder(&log, "a"),
            &mut subscriptions,
        );
        let second = dispatcher.register(
            "task.progress",
            Cookie::new(),
            recorder(&log, "b"),
            &mut subscriptions,
        );

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(subscriptions.refcount("task.progress"), 2);
        assert_eq!(dispatcher.handler_count("task.progress"), 2);
    }

    #[test]
    fn test_dispatch_reaches_all_handlers_and_catch_all() {
        let mut dispatcher = EventDispatcher::new();
        let mut subscriptions = SubscriptionRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        dispatcher.register("task.progress", Cookie::new(), recorder(&log, "a"), &mut subscriptions);
        dispatcher.register("task.progress", Cookie::new(), recorder(&log, "b"), &mut subscriptions);

        let mut catch_all = Vec::new();
        let delivered = dispatcher.dispatch("task.progress", &json!({"percent": 50}), |n, a| {
            catch_all.push((n.to_string(), a.clone()));
        });

        assert_eq!(delivered, 2);
        assert_eq!(
            *log.lock().unwrap(),
            vec![r#"a:{"percent":50}"#, r#"b:{"percent":50}"#]
        );
        assert_eq!(catch_all, vec![("task.progress".to_string(), json!({"percent": 50}))]);
    }

    #[test]
    fn test_dispatch_only_matches_own_name() {
        let mut dispatcher = EventDispatcher::new();
        let mut subscriptions = SubscriptionRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        dispatcher.register("disk.changed", Cookie::new(), recorder(&log, "disk"), &mut subscriptions);
        dispatcher.register("task.progress", Cookie::new(), recorder(&log, "task"), &mut subscriptions);

        dispatcher.dispatch("task.progress", &json!(1), |_, _| {});

        assert_eq!(*log.lock().unwrap(), vec!["task:1"]);
    }

    #[test]
    fn test_catch_all_runs_without_handlers() {
        let mut dispatcher = EventDispatcher::new();
        let mut seen = None;

        let delivered = dispatcher.dispatch("nobody.listens", &json!(null), |n, _| {
            seen = Some(n.to_string());
        });

        assert_eq!(delivered, 0);
        assert_eq!(seen.as_deref(), Some("nobody.listens"));
    }

    #[test]
    fn test_panicking_handler_does_not_stop_delivery() {
        let mut dispatcher = EventDispatcher::new();
        let mut subscriptions = SubscriptionRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        dispatcher.register(
            "task.progress",
            Cookie::new(),
            Box::new(|_| panic!("handler exploded")),
            &mut subscriptions,
        );
        dispatcher.register("task.progress", Cookie::new(), recorder(&log, "ok"), &mut subscriptions);

        let mut caught = false;
        let delivered = dispatcher.dispatch("task.progress", &json!(7), |_, _| caught = true);

        assert_eq!(delivered, 1);
        assert_eq!(*log.lock().unwrap(), vec!["ok:7"]);
        assert!(caught);
    }

    #[test]
    fn test_unregister_releases_subscription_last() {
        let mut dispatcher = EventDispatcher::new();
        let mut subscriptions = SubscriptionRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = Cookie::new();
        let second = Cookie::new();

        dispatcher.register("a", first.clone(), recorder(&log, "1"), &mut subscriptions);
        dispatcher.register("a", second.clone(), recorder(&log, "2"), &mut subscriptions);

        assert_eq!(dispatcher.unregister("a", &first, &mut subscriptions).unwrap(), None);
        dispatcher.dispatch("a", &json!(0), |_, _| {});
        assert_eq!(*log.lock().unwrap(), vec!["2:0"]);

        let frame = dispatcher.unregister("a", &second, &mut subscriptions).unwrap();
        assert_eq!(frame, Some(Frame::Unsubscribe(vec!["a".to_string()])));
        assert_eq!(dispatcher.handler_count("a"), 0);
        assert!(subscriptions.is_empty());
    }

    #[test]
    fn test_unregister_unknown_name() {
        let mut dispatcher = EventDispatcher::new();
        let mut subscriptions = SubscriptionRegistry::new();

        let result = dispatcher.unregister("missing", &Cookie::new(), &mut subscriptions);
        assert!(matches!(result, Err(ClientError::NoHandlersForName(n)) if n == "missing"));
    }

    #[test]
    fn test_unregister_unknown_cookie() {
        let mut dispatcher = EventDispatcher::new();
        let mut subscriptions = SubscriptionRegistry::new();
        dispatcher.register("a", Cookie::new(), Box::new(|_| {}), &mut subscriptions);

        let stranger = Cookie::new();
        let result = dispatcher.unregister("a", &stranger, &mut subscriptions);

        assert!(matches!(result, Err(ClientError::NoSuchCookie { cookie, .. }) if cookie == stranger));
        assert_eq!(dispatcher.handler_count("a"), 1);
        assert_eq!(subscriptions.refcount("a"), 1);
    }

    #[test]
    fn test_failed_unregister_keeps_handler() {
        let mut dispatcher = EventDispatcher::new();
        let mut subscriptions = SubscriptionRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let cookie = Cookie::new();

        dispatcher.register("pool.changed", cookie.clone(), recorder(&log, "a"), &mut subscriptions);
        subscriptions.unsubscribe("pool.changed").unwrap();

        let result = dispatcher.unregister("pool.changed", &cookie, &mut subscriptions);
        assert!(matches!(result, Err(ClientError::NoSuchSubscription(_))));
        assert_eq!(dispatcher.handler_count("pool.changed"), 1);

        dispatcher.dispatch("pool.changed", &json!(1), |_, _| {});
        assert_eq!(*log.lock().unwrap(), vec!["a:1"]);
    }
}
