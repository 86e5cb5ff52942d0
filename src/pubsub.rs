//! # Subscription table
//!
//! Maps glob patterns to the set of PUBSUB connections subscribed to them.
//! There is one row per (pattern, connection); duplicate subscriptions from
//! the same connection collapse into one row, so every publish is delivered
//! at most once per pattern per subscriber.
use crate::protocol;
use bytes::Bytes;
use glob::Pattern;
use log::{info, warn};
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;

/// Identifier assigned to each PUBSUB connection for its lifetime.
pub type SubscriberId = u64;

#[derive(Debug)]
struct PatternRow {
    matcher: Pattern,
    subscribers: HashMap<SubscriberId, UnboundedSender<Bytes>>,
}

/// Subscription table.
///
/// Not internally synchronized; the broker guards it with the single broker
/// lock so broadcasts iterate the table inside the same critical section
/// that accepts the publish.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    patterns: HashMap<String, PatternRow>,
}

impl SubscriptionTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a (pattern, connection) row. Subscribing twice to the same
    /// pattern replaces the previous row. A pattern that does not parse as a
    /// glob is logged and never matches, so it is not registered.
    pub fn subscribe(&mut self, pattern: &str, id: SubscriberId, sender: UnboundedSender<Bytes>) {
        if !self.patterns.contains_key(pattern) {
            let matcher = match Pattern::new(pattern) {
                Ok(matcher) => matcher,
                Err(_) => {
                    warn!("'{}' is not a valid pattern", pattern);
                    return;
                }
            };
            self.patterns.insert(
                pattern.to_owned(),
                PatternRow { matcher, subscribers: HashMap::new() },
            );
        }
        if let Some(row) = self.patterns.get_mut(pattern) {
            row.subscribers.insert(id, sender);
            info!("client {} subscribed to '{}'", id, pattern);
        }
    }

    /// Removes the (pattern, connection) row. Idempotent.
    pub fn unsubscribe(&mut self, pattern: &str, id: SubscriberId) {
        if let Some(row) = self.patterns.get_mut(pattern) {
            if row.subscribers.remove(&id).is_some() {
                info!("client {} unsubscribed from '{}'", id, pattern);
            }
            if row.subscribers.is_empty() {
                self.patterns.remove(pattern);
            }
        }
    }

    /// Drops every row held by a connection whose socket closed.
    pub fn remove_connection(&mut self, id: SubscriberId) {
        self.patterns.retain(|_, row| {
            row.subscribers.remove(&id);
            !row.subscribers.is_empty()
        });
    }

    /// Broadcasts `PUB key value` to every subscriber whose pattern matches
    /// `key`. A subscriber whose channel is gone is removed from that
    /// pattern's set; the rest still receive the frame. Returns the number
    /// of deliveries.
    pub fn publish(&mut self, key: &str, value: &str) -> usize {
        let frame = protocol::pub_frame(key, value);
        let mut delivered = 0;

        self.patterns.retain(|pattern, row| {
            if !row.matcher.matches(key) {
                return true;
            }
            row.subscribers.retain(|id, sender| {
                if sender.send(frame.clone()).is_ok() {
                    delivered += 1;
                    true
                } else {
                    info!("dropping dead subscriber {} from '{}'", id, pattern);
                    false
                }
            });
            !row.subscribers.is_empty()
        });

        delivered
    }

    /// Number of (pattern, connection) rows currently held.
    pub fn len(&self) -> usize {
        self.patterns.values().map(|row| row.subscribers.len()).sum()
    }

    /// True when nobody is subscribed to anything.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::Bytes;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn subscriber(
        table: &mut SubscriptionTable,
        pattern: &str,
        id: SubscriberId,
    ) -> UnboundedReceiver<Bytes> {
        let (tx, rx) = unbounded_channel();
        table.subscribe(pattern, id, tx);
        rx
    }

    #[tokio::test]
    async fn fan_out_with_globs() {
        let mut table = SubscriptionTable::new();
        let mut wide = subscriber(&mut table, "streams/*", 1);
        let mut narrow = subscriber(&mut table, "streams/camera0/*", 2);

        assert_eq!(2, table.publish("streams/camera0/frame", "blob"));
        assert_eq!(
            Bytes::from("PUB streams/camera0/frame blob\n".to_owned()),
            wide.recv().await.expect("frame")
        );
        assert_eq!(
            Bytes::from("PUB streams/camera0/frame blob\n".to_owned()),
            narrow.recv().await.expect("frame")
        );

        assert_eq!(1, table.publish("streams/other", "1"));
        assert_eq!(
            Bytes::from("PUB streams/other 1\n".to_owned()),
            wide.recv().await.expect("frame")
        );
        assert!(narrow.try_recv().is_err());
    }

    #[tokio::test]
    async fn duplicate_subscriptions_deliver_once() {
        let mut table = SubscriptionTable::new();
        let (tx, mut rx) = unbounded_channel();
        table.subscribe("x", 1, tx.clone());
        table.subscribe("x", 1, tx);

        assert_eq!(1, table.publish("x", "v"));
        rx.recv().await.expect("frame");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dead_subscribers_are_isolated() {
        let mut table = SubscriptionTable::new();
        let mut alive = subscriber(&mut table, "x", 1);
        let dead = subscriber(&mut table, "x", 2);
        drop(dead);

        assert_eq!(1, table.publish("x", "v"));
        assert_eq!(Bytes::from("PUB x v\n".to_owned()), alive.recv().await.expect("frame"));
        assert_eq!(1, table.len());
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let mut table = SubscriptionTable::new();
        let _rx = subscriber(&mut table, "p", 1);

        table.unsubscribe("p", 1);
        assert!(table.is_empty());
        table.unsubscribe("p", 1);
        assert!(table.is_empty());
    }

    #[test]
    fn remove_connection_drops_all_rows() {
        let mut table = SubscriptionTable::new();
        let _a = subscriber(&mut table, "a/*", 1);
        let _b = subscriber(&mut table, "b/*", 1);
        let _c = subscriber(&mut table, "b/*", 2);

        table.remove_connection(1);
        assert_eq!(1, table.len());
    }

    #[test]
    fn invalid_pattern_is_not_registered() {
        let mut table = SubscriptionTable::new();
        let (tx, _rx) = unbounded_channel();
        table.subscribe("[unclosed", 1, tx);
        assert!(table.is_empty());
    }
}
