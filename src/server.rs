//! # Server
//!
//! TCP broker server: newline-framed transport, role handshake and one task
//! per connection. PUBSUB connections multiplex their own frames with
//! broadcast frames arriving on an unbounded channel.
use crate::{
    config::Config,
    dispatcher::Broker,
    error::Error,
    protocol::{self, Reply, Request, Role},
};
use bytes::{Bytes, BytesMut};
use futures::{future, SinkExt};
use log::{info, trace, warn};
use std::{io, sync::Arc};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time::{sleep, Duration},
};
use tokio_stream::StreamExt;
use tokio_util::codec::{Decoder, Encoder, Framed};

/// Newline-delimited frame Encoder/Decoder
struct LineParser;

impl Encoder<Reply> for LineParser {
    type Error = io::Error;

    fn encode(&mut self, reply: Reply, dst: &mut BytesMut) -> io::Result<()> {
        if let Some(frame) = reply.render() {
            dst.extend_from_slice(&frame);
        }
        Ok(())
    }
}

impl Decoder for LineParser {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<String>> {
        let pos = match src.iter().position(|b| *b == b'\n') {
            Some(pos) => pos,
            None => return Ok(None),
        };
        let line = src.split_to(pos + 1);
        let mut line = &line[..pos];
        if line.ends_with(b"\r") {
            line = &line[..line.len() - 1];
        }
        Ok(Some(String::from_utf8_lossy(line).into_owned()))
    }
}

/// Handles a new connection: reads the mandatory role declaration and hands
/// the transport to the matching dispatcher loop.
async fn handle_connection<A: ToString>(socket: TcpStream, broker: Arc<Broker>, addr: A) {
    let addr = addr.to_string();
    let mut transport = Framed::new(socket, LineParser);
    info!("accepted connection from {}", addr);

    let role = match transport.next().await {
        Some(Ok(line)) => Role::parse(&line),
        _ => return,
    };

    match role {
        Some(Role::SetGet) => handle_setget(transport, broker, &addr).await,
        Some(Role::PubSub) => handle_pubsub(transport, broker, &addr).await,
        None => {
            let _ = transport.send(Reply::Error(protocol::ERR_UNKNOWN_ROLE)).await;
        }
    }
}

/// Request/reply loop for a SETGET connection.
async fn handle_setget<T: AsyncRead + AsyncWrite + Unpin>(
    mut transport: Framed<T, LineParser>,
    broker: Arc<Broker>,
    addr: &str,
) {
    while let Some(result) = transport.next().await {
        let line = match result {
            Ok(line) => line,
            Err(e) => {
                warn!("error decoding from {}; error = {:?}", addr, e);
                break;
            }
        };
        let request = match Request::parse(&line) {
            Some(request) => request,
            None => continue,
        };
        trace!("{} -> {}", addr, request.command);
        if transport.send(broker.dispatch_setget(&request)).await.is_err() {
            break;
        }
    }
    info!("closing SETGET connection for {}", addr);
}

/// Loop for a PUBSUB connection, multiplexing its own frames with broadcast
/// frames from other publishers.
async fn handle_pubsub<T: AsyncRead + AsyncWrite + Unpin>(
    mut transport: Framed<T, LineParser>,
    broker: Arc<Broker>,
    addr: &str,
) {
    let id = broker.register_subscriber();
    let (sender, mut broadcasts) = mpsc::unbounded_channel::<Bytes>();

    loop {
        tokio::select! {
            Some(frame) = broadcasts.recv() => {
                if transport.send(Reply::Broadcast(frame)).await.is_err() {
                    break;
                }
            }
            result = transport.next() => match result {
                Some(Ok(line)) => {
                    let request = match Request::parse(&line) {
                        Some(request) => request,
                        None => continue,
                    };
                    trace!("{} -> {}", addr, request.command);
                    let reply = broker.dispatch_pubsub(&request, id, &sender);
                    if reply != Reply::None && transport.send(reply).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!("error decoding from {}; error = {:?}", addr, e);
                    break;
                }
                None => break,
            }
        }
    }

    broker.disconnect_subscriber(id);
    info!("closing PUBSUB connection for {}", addr);
}

/// Accepts connections on an already-bound listener. Useful for embedding
/// the broker (tests bind port 0 and read the local address back).
pub async fn serve_on(listener: TcpListener, broker: Arc<Broker>) -> Result<(), Error> {
    loop {
        match listener.accept().await {
            Ok((socket, addr)) => {
                let broker = broker.clone();
                tokio::spawn(async move {
                    handle_connection(socket, broker, addr).await;
                });
            }
            Err(e) => warn!("error accepting socket; error = {:?}", e),
        }
    }
}

async fn serve_tcp(addr: &str, broker: Arc<Broker>) -> Result<(), Error> {
    let listener = TcpListener::bind(addr).await?;
    info!("ready to accept connections on {}", addr);
    serve_on(listener, broker).await
}

/// Spawn the broker server.
///
/// Creates the shared broker state, the expired-key sweep and one TCP
/// listener per configured address. This function blocks the task and never
/// returns under normal operation.
pub async fn serve(config: Config) -> Result<(), Error> {
    let broker = Arc::new(Broker::new());

    let sweep_interval = Duration::from_millis(config.sweep_interval_ms);
    let broker_for_sweep = broker.clone();
    tokio::spawn(async move {
        loop {
            sleep(sweep_interval).await;
            let removed = broker_for_sweep.purge();
            if removed > 0 {
                trace!("sweep removed {} expired keys", removed);
            }
        }
    });

    let mut services = vec![];
    for host in config.get_tcp_hostnames() {
        let broker = broker.clone();
        services.push(tokio::spawn(async move { serve_tcp(&host, broker).await }));
    }

    future::join_all(services).await;

    Ok(())
}
