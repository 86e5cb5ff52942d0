//! Client transport core.
//!
//! Owns the two broker sockets. The SETGET socket is strictly request/reply
//! and serialized by a mutex so concurrent callers cannot interleave bytes;
//! each subscription gets a fresh PUBSUB socket owned by a dedicated
//! listener task, which lets the listener block on reads without a
//! multiplexer and lets unsubscribing be a frame plus a close.
use crate::error::Error;
use crate::protocol::Role;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

/// Callback fed with the (key, value) of each broadcast frame a
/// subscription receives.
pub(crate) type FrameCallback = Arc<dyn Fn(String, String) + Send + Sync>;

struct LineSocket {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl LineSocket {
    async fn connect(host: &str, port: u16, role: Role, limit: Duration) -> Result<Self, Error> {
        let stream = timeout(limit, TcpStream::connect((host, port)))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|e| Error::TransportDown(e.to_string()))?;
        let (read, write) = stream.into_split();
        let mut socket = LineSocket { reader: BufReader::new(read), writer: write };
        socket.send(&format!("ROLE {}", role.as_str())).await?;
        Ok(socket)
    }

    async fn send(&mut self, line: &str) -> Result<(), Error> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        Ok(())
    }

    async fn recv(&mut self, limit: Duration) -> Result<String, Error> {
        let mut line = String::new();
        let read = timeout(limit, self.reader.read_line(&mut line))
            .await
            .map_err(|_| Error::Timeout)??;
        if read == 0 {
            return Err(Error::TransportDown("connection closed by broker".to_owned()));
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }
}

/// Splits a `PUB key value` frame and hands it to the callback. Anything
/// else on a subscription socket is ignored.
fn dispatch_frame(line: &str, on_frame: &FrameCallback) {
    if let Some(rest) = line.strip_prefix("PUB ") {
        let mut parts = rest.splitn(2, ' ');
        if let (Some(key), Some(value)) = (parts.next(), parts.next()) {
            on_frame(key.to_owned(), value.to_owned());
        }
    }
}

struct Subscription {
    writer: OwnedWriteHalf,
    listener: JoinHandle<()>,
}

/// The two sockets of a connected client, plus one extra socket per live
/// subscription.
pub(crate) struct ClientCore {
    host: String,
    port: u16,
    timeout: Duration,
    setget: Mutex<LineSocket>,
    pubsub: Mutex<LineSocket>,
    subscriptions: parking_lot::Mutex<HashMap<String, Subscription>>,
}

impl ClientCore {
    /// Opens both sockets and declares their roles.
    pub(crate) async fn connect(host: &str, port: u16, limit: Duration) -> Result<Self, Error> {
        let setget = LineSocket::connect(host, port, Role::SetGet, limit).await?;
        info!("connected SETGET socket to {}:{}", host, port);
        let pubsub = LineSocket::connect(host, port, Role::PubSub, limit).await?;
        info!("connected PUBSUB socket to {}:{}", host, port);

        Ok(Self {
            host: host.to_owned(),
            port,
            timeout: limit,
            setget: Mutex::new(setget),
            pubsub: Mutex::new(pubsub),
            subscriptions: parking_lot::Mutex::new(HashMap::new()),
        })
    }

    /// One request/reply exchange on the SETGET socket.
    pub(crate) async fn request(&self, line: &str) -> Result<String, Error> {
        let mut socket = self.setget.lock().await;
        socket.send(line).await?;
        socket.recv(self.timeout).await
    }

    /// One request/reply exchange on the PUBSUB socket.
    async fn pubsub_request(&self, line: &str) -> Result<String, Error> {
        let mut socket = self.pubsub.lock().await;
        socket.send(line).await?;
        socket.recv(self.timeout).await
    }

    pub(crate) async fn set(
        &self,
        key: &str,
        value: &str,
        ttl_ms: Option<u64>,
    ) -> Result<bool, Error> {
        let line = match ttl_ms {
            Some(ms) => format!("SETX {} {} {}", key, ms, value),
            None => format!("SET {} {}", key, value),
        };
        Ok(self.request(&line).await? == "OK")
    }

    /// Reads a key; `Ok(None)` when the broker reports it missing.
    pub(crate) async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let response = self.request(&format!("GET {}", key)).await?;
        if response.starts_with("ERROR") {
            Ok(None)
        } else {
            Ok(Some(response))
        }
    }

    pub(crate) async fn delete(&self, key: &str) -> Result<bool, Error> {
        Ok(self.request(&format!("DEL {}", key)).await? == "OK")
    }

    pub(crate) async fn clear(&self) -> Result<bool, Error> {
        Ok(self.request("CLR").await? == "OK")
    }

    pub(crate) async fn get_all_keys(&self) -> Result<Vec<String>, Error> {
        let response = self.request("GAK").await?;
        Ok(response.split_whitespace().map(|key| key.to_owned()).collect())
    }

    pub(crate) async fn ping(&self) -> Result<bool, Error> {
        Ok(self.request("PING").await? == "PONG")
    }

    pub(crate) async fn publish(&self, key: &str, value: &str) -> Result<bool, Error> {
        Ok(self.pubsub_request(&format!("PUB {} {}", key, value)).await? == "OK")
    }

    /// Opens a fresh PUBSUB socket subscribed to `pattern` and spawns a
    /// listener that feeds every `PUB key value` frame to `on_frame`. The
    /// callback runs on the listener task.
    pub(crate) async fn subscribe(
        &self,
        pattern: &str,
        on_frame: FrameCallback,
    ) -> Result<(), Error> {
        if self.subscriptions.lock().contains_key(pattern) {
            warn!("already subscribed to {}", pattern);
            return Ok(());
        }

        let mut socket = LineSocket::connect(&self.host, self.port, Role::PubSub, self.timeout).await?;
        socket.send(&format!("SUB {}", pattern)).await?;

        // SUB is not acknowledged; the RDY round trip proves the broker has
        // the subscription registered before this call returns. A broadcast
        // can still land ahead of the OK, so those frames are kept.
        socket.send("RDY").await?;
        let mut backlog = vec![];
        loop {
            let line = socket.recv(self.timeout).await?;
            if line == "OK" {
                break;
            }
            backlog.push(line);
        }

        let LineSocket { mut reader, writer } = socket;
        let pattern_name = pattern.to_owned();
        let listener = tokio::spawn(async move {
            for line in backlog {
                dispatch_frame(&line, &on_frame);
            }
            loop {
                let mut line = String::new();
                match reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                while line.ends_with('\n') || line.ends_with('\r') {
                    line.pop();
                }
                dispatch_frame(&line, &on_frame);
            }
            info!("subscription to {} closed", pattern_name);
        });

        self.subscriptions
            .lock()
            .insert(pattern.to_owned(), Subscription { writer, listener });
        Ok(())
    }

    /// Tells the broker to drop the subscription and closes its socket.
    pub(crate) async fn unsubscribe(&self, pattern: &str) {
        let subscription = self.subscriptions.lock().remove(pattern);
        if let Some(mut subscription) = subscription {
            let _ = subscription
                .writer
                .write_all(format!("UNSUB {}\n", pattern).as_bytes())
                .await;
            subscription.listener.abort();
        }
    }

    /// Patterns with a live subscription socket.
    pub(crate) fn subscribed_patterns(&self) -> Vec<String> {
        self.subscriptions.lock().keys().cloned().collect()
    }

    /// Stops every listener; the two main sockets close when the core is
    /// dropped.
    pub(crate) async fn close(&self) {
        for pattern in self.subscribed_patterns() {
            self.unsubscribe(&pattern).await;
        }
    }
}
