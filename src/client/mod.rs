//! # Communication client
//!
//! Typed client for the bus. Request/reply keystore access is multiplexed on
//! one socket, publish/subscribe on another; polled hooks report changes to
//! keys that are `SET` rather than published. All operations take `&self`
//! and may be called from concurrent tasks; callbacks run on listener or
//! hook tasks and must be treated as concurrent with the caller's own code.
mod core;
mod hooks;

use self::core::{ClientCore, FrameCallback};
use crate::error::Error;
use crate::sendable::{Envelope, Sendable, SendableRegistry};
use log::{error, info, trace, warn};
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};

/// Callback invoked with a typed record when a subscription frame arrives.
pub type SubscribeCallback = Arc<dyn Fn(&str, Sendable) + Send + Sync>;
/// Callback invoked when a hooked key changes; `None` reports that the key
/// disappeared.
pub type HookCallback = Arc<dyn Fn(&str, Option<Sendable>) + Send + Sync>;
/// Callback invoked on connection state transitions.
pub type ConnectionCallback = Arc<dyn Fn() + Send + Sync>;

/// Builder for `/`-separated keys.
///
/// ```
/// use botbus::client::KeyPath;
///
/// let key = KeyPath::new("joysticks").join("0").join("buttons");
/// assert_eq!("joysticks/0/buttons", key.as_str());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPath(String);

impl KeyPath {
    /// Starts a path from its root segment.
    pub fn new(root: impl Into<String>) -> Self {
        Self(root.into())
    }

    /// Appends a segment, normalizing the `/` between them.
    pub fn join(self, segment: &str) -> Self {
        Self(format!(
            "{}/{}",
            self.0.trim_end_matches('/'),
            segment.trim_start_matches('/')
        ))
    }

    /// The assembled key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for KeyPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<KeyPath> for String {
    fn from(path: KeyPath) -> String {
        path.0
    }
}

/// One registered hook: a watched key, the expected type tag and the
/// callback to run when the raw value changes.
#[derive(Clone)]
pub(crate) struct Hook {
    pub(crate) key: String,
    pub(crate) did: String,
    pub(crate) callback: HookCallback,
}

/// The client's belief that the broker is reachable.
struct Liveness {
    dead: AtomicBool,
    on_disconnect: Option<ConnectionCallback>,
}

impl Liveness {
    /// Flips the dead flag; the user callback fires on the rising edge only.
    fn mark_dead(&self) {
        if !self.dead.swap(true, Ordering::SeqCst) {
            if let Some(callback) = &self.on_disconnect {
                callback();
            }
        }
    }

    fn mark_alive(&self) {
        self.dead.store(false, Ordering::SeqCst);
    }

    fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct SubscriptionEntry {
    did: String,
    callback: SubscribeCallback,
}

pub(crate) struct ClientInner {
    address: RwLock<(String, u16)>,
    timeout: Duration,
    core: RwLock<Option<Arc<ClientCore>>>,
    registry: RwLock<SendableRegistry>,
    subscriptions: RwLock<HashMap<String, SubscriptionEntry>>,
    pub(crate) hooks: RwLock<Vec<Hook>>,
    liveness: Liveness,
    on_connect: Option<ConnectionCallback>,
    pub(crate) running: AtomicBool,
}

impl ClientInner {
    pub(crate) fn core_handle(&self) -> Option<Arc<ClientCore>> {
        self.core.read().clone()
    }

    fn address(&self) -> (String, u16) {
        self.address.read().clone()
    }

    /// Parses a raw value as an envelope and constructs the typed record,
    /// yielding `None` on decode failure or when the tag differs from `did`.
    pub(crate) fn decode_typed(&self, raw: &str, did: &str) -> Option<Sendable> {
        let envelope: Envelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("undecodable payload: {}", e);
                return None;
            }
        };
        if envelope.did != did {
            trace!("{}", Error::TypeMismatch { expected: did.to_owned(), got: envelope.did });
            return None;
        }
        self.registry.read().decode(&envelope)
    }

    /// Logs a failed operation and flips the dead flag when the error means
    /// the broker is unreachable.
    pub(crate) fn note_error(&self, action: &str, key: &str, e: &Error) {
        error!("cannot {} {}: {}", action, key, e);
        if e.is_transport() {
            self.liveness.mark_dead();
        }
    }
}

/// Bus client: typed keystore access, publish/subscribe and change hooks
/// over two broker connections.
pub struct CommClient {
    inner: Arc<ClientInner>,
}

impl CommClient {
    /// Creates a disconnected client with a 2 second read timeout.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::with_callbacks(host, port, None, None)
    }

    /// Creates a disconnected client with connection state callbacks.
    /// `on_disconnect` fires on the rising edge of the dead flag and when
    /// the client is closed; `on_connect` after every successful connect.
    pub fn with_callbacks(
        host: impl Into<String>,
        port: u16,
        on_connect: Option<ConnectionCallback>,
        on_disconnect: Option<ConnectionCallback>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                address: RwLock::new((host.into(), port)),
                timeout: Duration::from_secs(2),
                core: RwLock::new(None),
                registry: RwLock::new(SendableRegistry::new()),
                subscriptions: RwLock::new(HashMap::new()),
                hooks: RwLock::new(Vec::new()),
                liveness: Liveness { dead: AtomicBool::new(false), on_disconnect },
                on_connect,
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Opens both sockets, starts the hook engine and re-registers every
    /// known subscription.
    pub async fn connect(&self) -> Result<(), Error> {
        let (host, port) = self.inner.address();
        let core = Arc::new(ClientCore::connect(&host, port, self.inner.timeout).await?);
        *self.inner.core.write() = Some(core.clone());
        self.inner.liveness.mark_alive();

        if !self.inner.running.swap(true, Ordering::SeqCst) {
            tokio::spawn(hooks::run(self.inner.clone()));
        }

        let subscriptions: Vec<(String, SubscriptionEntry)> = self
            .inner
            .subscriptions
            .read()
            .iter()
            .map(|(pattern, entry)| (pattern.clone(), entry.clone()))
            .collect();
        for (pattern, entry) in subscriptions {
            if let Err(e) = self.register_listener(&core, &pattern, entry).await {
                warn!("failed to re-subscribe to {}: {}", pattern, e);
            }
        }

        if let Some(callback) = &self.inner.on_connect {
            callback();
        }
        Ok(())
    }

    /// Closes both sockets and reconnects, restoring subscriptions.
    pub async fn reset_connection(&self) -> Result<(), Error> {
        self.close_transport().await;
        self.connect().await
    }

    /// Stops all listeners and the hook engine, then closes both sockets.
    pub async fn close(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.close_transport().await;
        if let Some(callback) = &self.inner.liveness.on_disconnect {
            callback();
        }
    }

    async fn close_transport(&self) {
        let core = self.inner.core.write().take();
        if let Some(core) = core {
            core.close().await;
            info!("disconnected from broker");
        }
    }

    /// `(sockets open) AND NOT dead`.
    pub fn is_connected(&self) -> bool {
        self.inner.core.read().is_some() && !self.inner.liveness.is_dead()
    }

    /// Round-trip probe; true when the broker answered `PONG`.
    pub async fn ping(&self) -> bool {
        let core = match self.inner.core_handle() {
            Some(core) => core,
            None => return false,
        };
        match core.ping().await {
            Ok(pong) => {
                if pong {
                    self.inner.liveness.mark_alive();
                }
                pong
            }
            Err(e) => {
                self.inner.note_error("ping", "broker", &e);
                false
            }
        }
    }

    /// Measured round trip of `PING`, when the broker answers.
    pub async fn get_latency(&self) -> Option<Duration> {
        let started = Instant::now();
        if self.ping().await {
            Some(started.elapsed())
        } else {
            None
        }
    }

    /// Polls `PING` until it succeeds. The only loudly-failing operation:
    /// exceeding `timeout` is a handshake-timeout error.
    pub async fn wait_until_connected(&self, timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;
        while !self.ping().await {
            if Instant::now() > deadline {
                self.inner.liveness.mark_dead();
                return Err(Error::HandshakeTimeout);
            }
            sleep(Duration::from_millis(20)).await;
        }
        Ok(())
    }

    /// Stores a record. A record with a TTL becomes a `SETX`. Failures are
    /// logged; the return value is true when the broker acknowledged.
    pub async fn set(&self, key: impl AsRef<str>, sendable: &Sendable) -> bool {
        let key = key.as_ref();
        let core = match self.inner.core_handle() {
            Some(core) => core,
            None => {
                error!("cannot set {}: client is not connected", key);
                return false;
            }
        };
        let json = match sendable.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!("cannot set {}: {}", key, e);
                return false;
            }
        };
        let ttl_ms = sendable
            .timeout
            .map(|seconds| (seconds * 1000.0) as u64)
            .filter(|ms| *ms > 0);
        match core.set(key, &json, ttl_ms).await {
            Ok(acknowledged) => {
                self.inner.liveness.mark_alive();
                acknowledged
            }
            Err(e) => {
                self.inner.note_error("set", key, &e);
                false
            }
        }
    }

    /// Retrieves and decodes a record, yielding `None` when the key is
    /// missing, undecodable or carries a different type tag than `did`.
    pub async fn get(&self, key: impl AsRef<str>, did: &str) -> Option<Sendable> {
        let key = key.as_ref();
        let raw = self.get_raw_string(key).await?;
        self.inner.decode_typed(&raw, did)
    }

    /// Retrieves the raw JSON object for a key, skipping typed decoding.
    pub async fn get_raw(&self, key: impl AsRef<str>) -> Option<JsonValue> {
        let key = key.as_ref();
        let raw = self.get_raw_string(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("cannot parse value of {}: {}", key, e);
                None
            }
        }
    }

    async fn get_raw_string(&self, key: &str) -> Option<String> {
        let core = self.inner.core_handle()?;
        match core.get(key).await {
            Ok(value) => {
                self.inner.liveness.mark_alive();
                value
            }
            Err(e) => {
                self.inner.note_error("get", key, &e);
                None
            }
        }
    }

    /// All keys currently in the broker.
    pub async fn get_all_keys(&self) -> Vec<String> {
        let core = match self.inner.core_handle() {
            Some(core) => core,
            None => return vec![],
        };
        match core.get_all_keys().await {
            Ok(keys) => {
                self.inner.liveness.mark_alive();
                keys
            }
            Err(e) => {
                self.inner.note_error("list", "keys", &e);
                vec![]
            }
        }
    }

    /// Every key with its raw JSON value. Enumerates and then fetches one
    /// key at a time; may be slow on large keyspaces.
    pub async fn get_all_raw(&self) -> Option<HashMap<String, JsonValue>> {
        self.inner.core_handle()?;
        let mut result = HashMap::new();
        for key in self.get_all_keys().await {
            if let Some(value) = self.get_raw(&key).await {
                result.insert(key, value);
            }
        }
        Some(result)
    }

    /// Deletes a key; missing keys are not an error.
    pub async fn delete(&self, key: impl AsRef<str>) -> bool {
        let key = key.as_ref();
        let core = match self.inner.core_handle() {
            Some(core) => core,
            None => {
                error!("cannot delete {}: client is not connected", key);
                return false;
            }
        };
        match core.delete(key).await {
            Ok(acknowledged) => {
                self.inner.liveness.mark_alive();
                acknowledged
            }
            Err(e) => {
                self.inner.note_error("delete", key, &e);
                false
            }
        }
    }

    /// Removes every key in the broker.
    pub async fn wipeall(&self) -> bool {
        let core = match self.inner.core_handle() {
            Some(core) => core,
            None => {
                error!("cannot wipe: client is not connected");
                return false;
            }
        };
        match core.clear().await {
            Ok(acknowledged) => {
                self.inner.liveness.mark_alive();
                acknowledged
            }
            Err(e) => {
                self.inner.note_error("wipe", "keys", &e);
                false
            }
        }
    }

    /// Broadcasts a record to every matching subscriber. Publishes are never
    /// stored; a TTL on a published record is ignored with a warning.
    pub async fn publish(&self, key: impl AsRef<str>, sendable: &Sendable) -> bool {
        let key = key.as_ref();
        if sendable.timeout.is_some() {
            warn!("publishing a sendable with a timeout; pub/sub does not support expiry");
        }
        let core = match self.inner.core_handle() {
            Some(core) => core,
            None => {
                error!("cannot publish to {}: client is not connected", key);
                return false;
            }
        };
        let json = match sendable.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!("cannot publish to {}: {}", key, e);
                return false;
            }
        };
        match core.publish(key, &json).await {
            Ok(acknowledged) => {
                self.inner.liveness.mark_alive();
                acknowledged
            }
            Err(e) => {
                self.inner.note_error("publish to", key, &e);
                false
            }
        }
    }

    /// Subscribes to a glob pattern. Each `PUB` frame whose key matches is
    /// decoded and, when its tag equals `did`, handed to `callback` on the
    /// listener task. The subscription is remembered and re-registered after
    /// a reconnect.
    pub async fn subscribe(
        &self,
        pattern: impl AsRef<str>,
        did: &str,
        callback: impl Fn(&str, Sendable) + Send + Sync + 'static,
    ) {
        let pattern = pattern.as_ref();
        let entry = SubscriptionEntry { did: did.to_owned(), callback: Arc::new(callback) };
        self.inner
            .subscriptions
            .write()
            .insert(pattern.to_owned(), entry.clone());

        match self.inner.core_handle() {
            Some(core) => {
                if let Err(e) = self.register_listener(&core, pattern, entry).await {
                    self.inner.note_error("subscribe to", pattern, &e);
                }
            }
            None => error!("can't subscribe to {}, client is not connected", pattern),
        }
    }

    async fn register_listener(
        &self,
        core: &ClientCore,
        pattern: &str,
        entry: SubscriptionEntry,
    ) -> Result<(), Error> {
        let inner = self.inner.clone();
        let on_frame: FrameCallback = Arc::new(move |key, value| {
            match inner.decode_typed(&value, &entry.did) {
                Some(sendable) => (entry.callback)(&key, sendable),
                None => trace!("dropping frame for {} with unexpected payload", key),
            }
        });
        core.subscribe(pattern, on_frame).await
    }

    /// Stops the pattern's listener and tells the broker to drop the row.
    pub async fn unsubscribe(&self, pattern: impl AsRef<str>) {
        let pattern = pattern.as_ref();
        self.inner.subscriptions.write().remove(pattern);
        if let Some(core) = self.inner.core_handle() {
            core.unsubscribe(pattern).await;
        }
    }

    /// Watches a key: on every hook tick the key is re-read and the callback
    /// fires when the raw value changed. `None` reports the key vanishing.
    pub fn add_hook(
        &self,
        key: impl AsRef<str>,
        did: &str,
        callback: impl Fn(&str, Option<Sendable>) + Send + Sync + 'static,
    ) {
        self.inner.hooks.write().push(Hook {
            key: key.as_ref().to_owned(),
            did: did.to_owned(),
            callback: Arc::new(callback),
        });
    }

    /// Registers a sendable constructor for a custom type tag.
    pub fn register_type(&self, did: impl Into<String>, constructor: crate::sendable::Constructor) {
        self.inner.registry.write().register(did, constructor);
    }

    /// Broker host.
    pub fn host(&self) -> String {
        self.inner.address.read().0.clone()
    }

    /// Broker port.
    pub fn port(&self) -> u16 {
        self.inner.address.read().1
    }

    /// Points the client at a different host and reconnects.
    pub async fn set_host(&self, host: impl Into<String>) -> Result<(), Error> {
        self.inner.address.write().0 = host.into();
        self.reset_connection().await
    }

    /// Points the client at a different port and reconnects.
    pub async fn set_port(&self, port: u16) -> Result<(), Error> {
        self.inner.address.write().1 = port;
        self.reset_connection().await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dispatcher::Broker;
    use crate::sendable::dtype;
    use crate::server;
    use std::sync::Mutex as StdMutex;
    use tokio::net::TcpListener;

    async fn start_broker() -> (String, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        tokio::spawn(server::serve_on(listener, Arc::new(Broker::new())));
        ("127.0.0.1".to_owned(), port)
    }

    async fn connected_pair() -> (CommClient, CommClient) {
        let (host, port) = start_broker().await;
        let a = CommClient::new(host.clone(), port);
        let b = CommClient::new(host, port);
        a.connect().await.expect("connect a");
        b.connect().await.expect("connect b");
        (a, b)
    }

    async fn wait_for(condition: impl Fn() -> bool) {
        for _ in 0..300 {
            if condition() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn key_paths_join_with_slashes() {
        let key = KeyPath::new("joysticks/").join("/0").join("buttons");
        assert_eq!("joysticks/0/buttons", key.as_str());
        assert_eq!("joysticks/0/buttons", key.to_string());
    }

    #[tokio::test]
    async fn typed_round_trip_between_clients() {
        let (a, b) = connected_pair().await;

        assert!(a.set("state/count", &Sendable::int(42)).await);

        let fetched = b.get("state/count", dtype::INT).await.expect("record");
        assert_eq!(Some(42), fetched.as_int());

        // requesting the wrong type yields absent, raw access still works
        assert!(b.get("state/count", dtype::BOOL).await.is_none());
        let raw = b.get_raw("state/count").await.expect("raw");
        assert_eq!(Some(dtype::INT), raw["did"].as_str());

        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn key_enumeration_and_deletion() {
        let (a, _b) = connected_pair().await;

        a.set(KeyPath::new("imu").join("yaw"), &Sendable::float(3.5)).await;
        a.set("imu/pitch", &Sendable::float(0.25)).await;

        let mut keys = a.get_all_keys().await;
        keys.sort();
        assert_eq!(vec!["imu/pitch".to_owned(), "imu/yaw".to_owned()], keys);

        let all = a.get_all_raw().await.expect("map");
        assert_eq!(2, all.len());
        assert_eq!(Some(3.5), all["imu/yaw"]["value"].as_f64());

        assert!(a.delete("imu/yaw").await);
        assert!(a.delete("imu/yaw").await); // idempotent
        assert!(a.wipeall().await);
        assert!(a.get_all_keys().await.is_empty());

        a.close().await;
    }

    #[tokio::test]
    async fn ttl_in_sendable_becomes_setx() {
        let (a, b) = connected_pair().await;

        a.set("ephemeral", &Sendable::string("hi").with_timeout(0.1)).await;
        assert!(b.get("ephemeral", dtype::STR).await.is_some());

        sleep(Duration::from_millis(200)).await;
        assert!(b.get("ephemeral", dtype::STR).await.is_none());

        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn subscriptions_deliver_matching_publishes() {
        let (subscriber, publisher) = connected_pair().await;

        let received: Arc<StdMutex<Vec<(String, Sendable)>>> = Arc::new(StdMutex::new(vec![]));
        let sink = received.clone();
        subscriber
            .subscribe("streams/*", dtype::STR, move |key, sendable| {
                sink.lock().expect("sink").push((key.to_owned(), sendable));
            })
            .await;

        assert!(publisher.publish("streams/camera0/frame", &Sendable::string("blob")).await);
        wait_for(|| !received.lock().expect("sink").is_empty()).await;

        {
            let frames = received.lock().expect("sink");
            assert_eq!("streams/camera0/frame", frames[0].0);
            assert_eq!(Some("blob"), frames[0].1.as_str());
        }

        // a publish that does not match the pattern is not delivered
        publisher.publish("other/topic", &Sendable::string("x")).await;
        // neither is one with a different type tag
        publisher.publish("streams/count", &Sendable::int(1)).await;
        sleep(Duration::from_millis(100)).await;
        assert_eq!(1, received.lock().expect("sink").len());

        subscriber.close().await;
        publisher.close().await;
    }

    #[tokio::test]
    async fn publish_never_stores() {
        let (a, b) = connected_pair().await;
        a.publish("transient", &Sendable::int(1)).await;
        assert!(b.get("transient", dtype::INT).await.is_none());
        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn hooks_fire_on_change_and_removal() {
        let (watcher, peer) = connected_pair().await;

        let events: Arc<StdMutex<Vec<Option<bool>>>> = Arc::new(StdMutex::new(vec![]));
        let sink = events.clone();
        watcher.add_hook("state/enabled", dtype::BOOL, move |_key, sendable| {
            sink.lock().expect("sink").push(sendable.and_then(|s| s.as_bool()));
        });

        peer.set("state/enabled", &Sendable::boolean(true)).await;
        wait_for(|| events.lock().expect("sink").len() == 1).await;
        assert_eq!(Some(Some(true)), events.lock().expect("sink").first().cloned());

        // the identical record again: memo unchanged, no second callback
        peer.set("state/enabled", &Sendable::boolean(true)).await;
        sleep(Duration::from_millis(100)).await;
        assert_eq!(1, events.lock().expect("sink").len());

        peer.delete("state/enabled").await;
        wait_for(|| events.lock().expect("sink").len() == 2).await;
        assert_eq!(Some(None), events.lock().expect("sink").get(1).cloned());

        watcher.close().await;
        peer.close().await;
    }

    #[tokio::test]
    async fn reconnect_preserves_subscriptions() {
        let (subscriber, publisher) = connected_pair().await;

        let received: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(vec![]));
        let sink = received.clone();
        subscriber
            .subscribe("a/*", dtype::INT, move |key, _| {
                sink.lock().expect("sink").push(key.to_owned());
            })
            .await;

        subscriber.reset_connection().await.expect("reconnect");

        assert!(publisher.publish("a/b", &Sendable::int(7)).await);
        wait_for(|| !received.lock().expect("sink").is_empty()).await;
        assert_eq!("a/b", received.lock().expect("sink")[0]);

        subscriber.close().await;
        publisher.close().await;
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let (subscriber, publisher) = connected_pair().await;

        let received: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(vec![]));
        let sink = received.clone();
        subscriber
            .subscribe("x", dtype::INT, move |key, _| {
                sink.lock().expect("sink").push(key.to_owned());
            })
            .await;

        publisher.publish("x", &Sendable::int(1)).await;
        wait_for(|| !received.lock().expect("sink").is_empty()).await;

        subscriber.unsubscribe("x").await;
        sleep(Duration::from_millis(50)).await;
        publisher.publish("x", &Sendable::int(2)).await;
        sleep(Duration::from_millis(100)).await;
        assert_eq!(1, received.lock().expect("sink").len());

        subscriber.close().await;
        publisher.close().await;
    }

    #[tokio::test]
    async fn ping_and_latency() {
        let (a, _b) = connected_pair().await;
        assert!(a.ping().await);
        assert!(a.get_latency().await.is_some());
        assert!(a.is_connected());
        a.close().await;
    }

    #[tokio::test]
    async fn wait_until_connected_fails_loudly() {
        let client = CommClient::new("127.0.0.1", 1);
        let result = client.wait_until_connected(Duration::from_millis(100)).await;
        assert!(matches!(result, Err(Error::HandshakeTimeout)));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn custom_types_round_trip() {
        fn decode_frame(
            envelope: &Envelope,
        ) -> Result<Sendable, Error> {
            Ok(Sendable {
                did: envelope.did.clone(),
                payload: crate::sendable::Payload::Other(envelope.value.clone()),
                timeout: envelope.timeout,
                hint: envelope.hint.clone(),
                flags: envelope.flags.clone(),
            })
        }

        let (a, b) = connected_pair().await;
        a.register_type("example.vendor.frame", decode_frame);
        b.register_type("example.vendor.frame", decode_frame);

        let mut record = Sendable::int(0);
        record.did = "example.vendor.frame".to_owned();
        assert!(a.set("vision/frame", &record).await);

        // known only to clients that registered the tag
        assert!(b.get("vision/frame", "example.vendor.frame").await.is_some());
        assert!(b.get("vision/frame", dtype::INT).await.is_none());

        a.close().await;
        b.close().await;
    }
}
