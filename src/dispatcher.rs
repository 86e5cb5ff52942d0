//! # Command dispatcher
//!
//! Executes SETGET and PUBSUB commands against the shared broker state. A
//! single lock protects the keystore and the subscription table together:
//! broadcasts iterate the table inside the same critical section that
//! accepts the publish, which is what gives a total order on publishes and
//! preserves per-subscriber delivery order. Critical sections are short, one
//! map operation plus bounded per-subscriber channel sends.
use crate::{
    protocol::{self, Reply, Request},
    pubsub::{SubscriberId, SubscriptionTable},
    store::Keystore,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Duration;

#[derive(Debug, Default)]
struct State {
    store: Keystore,
    subscriptions: SubscriptionTable,
}

/// Shared broker state: keystore plus subscription table behind the broker
/// lock. One instance per running server, shared by every connection task.
#[derive(Debug, Default)]
pub struct Broker {
    state: Mutex<State>,
    subscriber_counter: AtomicU64,
}

impl Broker {
    /// Creates an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns an identifier to a new PUBSUB connection.
    pub fn register_subscriber(&self) -> SubscriberId {
        self.subscriber_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Executes one SETGET command and returns the reply frame.
    pub fn dispatch_setget(&self, request: &Request) -> Reply {
        let mut state = self.state.lock();
        let store = &mut state.store;

        match request.command.as_str() {
            "SET" => match (request.key_arg(), &request.value) {
                (Some(key), Some(value)) => {
                    store.set(key, value.clone());
                    Reply::Ok
                }
                _ => Reply::Error(protocol::ERR_INVALID_COMMAND),
            },
            "SETX" => match (request.key_arg(), &request.value) {
                (Some(key), Some(rest)) => match split_ttl(rest) {
                    Some((ttl, value)) => {
                        store.set_with_ttl(key, value, ttl);
                        Reply::Ok
                    }
                    None => Reply::Error(protocol::ERR_INVALID_COMMAND),
                },
                _ => Reply::Error(protocol::ERR_INVALID_COMMAND),
            },
            "GET" => match request.key_arg() {
                Some(key) => match store.get(key) {
                    Some(value) => Reply::Value(value.to_owned()),
                    None => Reply::Error(protocol::ERR_KEY_NOT_FOUND),
                },
                None => Reply::Error(protocol::ERR_INVALID_COMMAND),
            },
            "DEL" => match request.key_arg() {
                Some(key) => {
                    store.del(key);
                    Reply::Ok
                }
                None => Reply::Error(protocol::ERR_INVALID_COMMAND),
            },
            "CLR" => {
                store.clear();
                Reply::Ok
            }
            "GKC" => Reply::Count(store.count()),
            "GAK" => Reply::Keys(store.keys()),
            "KEY" => match request.key_arg() {
                Some(pattern) => Reply::Keys(store.matching(pattern)),
                None => Reply::Error(protocol::ERR_INVALID_COMMAND),
            },
            "PING" => Reply::Pong,
            "RDY" => Reply::Ok,
            _ => Reply::Error(protocol::ERR_INVALID_COMMAND),
        }
    }

    /// Executes one PUBSUB command on behalf of connection `id`, whose
    /// broadcast channel is `sender`. `SUB` and `UNSUB` are accepted
    /// silently (`Reply::None`); `PUB` never touches the keystore.
    pub fn dispatch_pubsub(
        &self,
        request: &Request,
        id: SubscriberId,
        sender: &UnboundedSender<Bytes>,
    ) -> Reply {
        let mut state = self.state.lock();

        match request.command.as_str() {
            "SUB" => match request.key_arg() {
                Some(pattern) => {
                    state.subscriptions.subscribe(pattern, id, sender.clone());
                    Reply::None
                }
                None => Reply::Error(protocol::ERR_INVALID_PUBSUB),
            },
            "UNSUB" => match request.key_arg() {
                Some(pattern) => {
                    state.subscriptions.unsubscribe(pattern, id);
                    Reply::None
                }
                None => Reply::Error(protocol::ERR_INVALID_PUBSUB),
            },
            "PUB" => match (request.key_arg(), &request.value) {
                (Some(key), Some(value)) => {
                    state.subscriptions.publish(key, value);
                    Reply::Ok
                }
                _ => Reply::Error(protocol::ERR_INVALID_PUBSUB),
            },
            "PING" => Reply::Pong,
            "RDY" => Reply::Ok,
            _ => Reply::Error(protocol::ERR_INVALID_PUBSUB),
        }
    }

    /// Removes every subscription row held by a closed connection.
    pub fn disconnect_subscriber(&self, id: SubscriberId) {
        self.state.lock().subscriptions.remove_connection(id);
    }

    /// Claims memory back for expired keys. Called by the periodic sweep,
    /// under the same broker lock as everything else.
    pub fn purge(&self) -> usize {
        self.state.lock().store.remove_expired()
    }
}

/// Splits the trailing field of a `SETX` frame into its TTL and value. The
/// TTL is whole milliseconds and must be positive.
fn split_ttl(rest: &str) -> Option<(Duration, String)> {
    let mut parts = rest.splitn(2, ' ');
    let ttl_ms: u64 = parts.next()?.parse().ok()?;
    let value = parts.next()?;
    if ttl_ms == 0 {
        return None;
    }
    Some((Duration::from_millis(ttl_ms), value.to_owned()))
}
