//! Reference-counted event subscriptions.
//!
//! Any number of local consumers may want the same pattern. Only the first
//! `subscribe` and the last `unsubscribe` of a pattern reach the wire.

use std::collections::HashMap;

use tracing::debug;

use crate::error::ClientError;
use crate::protocol::Frame;

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    refcounts: HashMap<String, usize>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one reference to `pattern`.
    ///
    /// Returns the `subscribe` frame to send when this is the first reference.
    pub fn subscribe(&mut self, pattern: &str) -> Option<Frame> {
        let mut frame = None;
        let refcount = self.refcounts.entry(pattern.to_string()).or_insert_with(|| {
            debug!("Subscribing to {}", pattern);
            frame = Some(Frame::Subscribe(vec![pattern.to_string()]));
            0
        });
        *refcount += 1;
        frame
    }

    /// Drop one reference to `pattern`.
    ///
    /// Returns the `unsubscribe` frame to send when this was the last
    /// reference.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NoSuchSubscription`] if `pattern` has no
    /// references.
    pub fn unsubscribe(&mut self, pattern: &str) -> Result<Option<Frame>, ClientError> {
        let refcount = self
            .refcounts
            .get_mut(pattern)
            .ok_or_else(|| ClientError::NoSuchSubscription(pattern.to_string()))?;

        *refcount -= 1;
        if *refcount > 0 {
            return Ok(None);
        }

        debug!("Unsubscribing from {}", pattern);
        self.refcounts.remove(pattern);
        Ok(Some(Frame::Unsubscribe(vec![pattern.to_string()])))
    }

    #[must_use]
    pub fn refcount(&self, pattern: &str) -> usize {
        self.refcounts.get(pattern).copied().unwrap_or(0)
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.refcounts.keys().map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.refcounts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_subscribe_emits_frame() {
        let mut registry = SubscriptionRegistry::new();

        let frame = registry.subscribe("task.*");
        assert_eq!(frame, Some(Frame::Subscribe(vec!["task.*".to_string()])));
        assert_eq!(registry.refcount("task.*"), 1);
    }

    #[test]
    fn test_n_subscribes_and_unsubscribes_emit_one_frame_each() {
        let mut registry = SubscriptionRegistry::new();
        let mut frames = Vec::new();

        for _ in 0..5 {
            frames.extend(registry.subscribe("disk.changed"));
        }
        assert_eq!(registry.refcount("disk.changed"), 5);

        for _ in 0..5 {
            frames.extend(registry.unsubscribe("disk.changed").unwrap());
        }

        assert_eq!(
            frames,
            vec![
                Frame::Subscribe(vec!["disk.changed".to_string()]),
                Frame::Unsubscribe(vec!["disk.changed".to_string()]),
            ]
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unsubscribe_unknown_pattern_fails() {
        let mut registry = SubscriptionRegistry::new();

        let result = registry.unsubscribe("never.subscribed");
        assert!(matches!(result, Err(ClientError::NoSuchSubscription(p)) if p == "never.subscribed"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unsubscribe_after_last_reference_fails() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe("a");
        registry.unsubscribe("a").unwrap();

        assert!(registry.unsubscribe("a").is_err());
    }

    #[test]
    fn test_patterns_are_independent() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe("a");
        registry.subscribe("b");
        registry.subscribe("b");

        assert_eq!(registry.unsubscribe("b").unwrap(), None);
        assert!(registry.unsubscribe("a").unwrap().is_some());

        let remaining: Vec<_> = registry.patterns().collect();
        assert_eq!(remaining, ["b"]);
    }
}
