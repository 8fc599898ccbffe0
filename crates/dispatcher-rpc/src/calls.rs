//! In-flight call tracking.
//!
//! Every outbound `rpc/call` or login owns one [`PendingCall`] until exactly
//! one of four things happens: a response, a server error, its deadline, or
//! connection close. The completion is moved out of the map before it runs,
//! so a second settlement for the same id finds nothing.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use futures_util::future::poll_fn;
use serde_json::Value;
use tokio_util::time::{DelayQueue, delay_queue};
use tracing::{debug, error, warn};

use crate::id::CallId;
use crate::protocol::RpcException;

pub type CallResult = Result<Value, RpcException>;

/// Single-use completion callback for one call
pub type CallCallback = Box<dyn FnOnce(CallResult) + Send + 'static>;

/// What to do when a call settles
pub enum Completion {
    /// Hand the result to the caller
    Reply(CallCallback),
    /// Result belongs to the connection itself (login)
    Login,
}

impl Completion {
    fn settle(self, method: &str, result: CallResult) -> Settled {
        match self {
            Completion::Reply(callback) => {
                if catch_unwind(AssertUnwindSafe(|| callback(result))).is_err() {
                    error!("Completion callback for '{}' panicked", method);
                }
                Settled::Delivered
            }
            Completion::Login => Settled::Login(result),
        }
    }
}

/// Outcome of settling a call
#[derive(Debug)]
pub enum Settled {
    /// The caller's callback has run
    Delivered,
    /// A login finished; the connection must act on the result
    Login(CallResult),
}

/// A call whose deadline passed
#[derive(Debug)]
pub struct TimedOut {
    pub id: CallId,
    pub method: String,
    pub args: Vec<Value>,
    pub settled: Settled,
}

struct PendingCall {
    method: String,
    args: Vec<Value>,
    completion: Completion,
    timer: delay_queue::Key,
}

/// Registry of calls awaiting a response
#[derive(Default)]
pub struct CallRegistry {
    pending: HashMap<CallId, PendingCall>,
    timers: DelayQueue<CallId>,
}

impl CallRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a call and start its deadline.
    pub fn register(
        &mut self,
        id: CallId,
        method: String,
        args: Vec<Value>,
        completion: Completion,
        timeout: Duration,
    ) {
        debug!("Registering call {} ({}), timeout {:?}", id, method, timeout);
        let timer = self.timers.insert(id.clone(), timeout);
        let call = PendingCall {
            method,
            args,
            completion,
            timer,
        };

        if let Some(previous) = self.pending.insert(id.clone(), call) {
            // Identifier collision; keep one timer per id
            warn!("Call id {} reused while '{}' was pending", id, previous.method);
            self.timers.remove(&previous.timer);
        }
    }

    /// Settle a call with the server's answer.
    ///
    /// Returns `None` when no call with this id is pending. The answer is
    /// then spurious and has been dropped.
    pub fn complete(&mut self, id: &CallId, result: CallResult) -> Option<Settled> {
        let call = self.pending.remove(id)?;
        self.timers.remove(&call.timer);
        debug!("Call {} ({}) completed", id, call.method);
        Some(call.completion.settle(&call.method, result))
    }

    /// Wait for the next deadline and fail that call with `ETIMEDOUT`.
    ///
    /// Stays pending while no deadlines are running, so it can sit in a
    /// `select!` loop unguarded. Cancel safe: nothing is removed until a
    /// deadline has fired.
    pub async fn next_timeout(&mut self) -> TimedOut {
        loop {
            if self.timers.is_empty() {
                std::future::pending::<()>().await;
            }

            let Some(expired) = poll_fn(|cx| self.timers.poll_expired(cx)).await else {
                continue;
            };
            let id = expired.into_inner();
            let Some(call) = self.pending.remove(&id) else {
                continue;
            };

            let settled = call
                .completion
                .settle(&call.method, Err(RpcException::timed_out()));

            return TimedOut {
                id,
                method: call.method,
                args: call.args,
                settled,
            };
        }
    }

    /// Fail every pending call with `ECONNRESET` and empty the registry.
    pub fn drain_on_close(&mut self) -> Vec<Settled> {
        self.timers.clear();
        self.pending
            .drain()
            .map(|(id, call)| {
                debug!("Resetting call {} ({})", id, call.method);
                call.completion
                    .settle(&call.method, Err(RpcException::connection_reset()))
            })
            .collect()
    }

    #[must_use]
    pub fn contains(&self, id: &CallId) -> bool {
        self.pending.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
