//! Websocket front end and the router actor.
//!
//! Each accepted connection runs one `tokio::select!` loop: inbound frames
//! are forwarded to the router actor as commands, outbound frames arrive
//! pre-encoded over an unbounded channel and are written back out. The actor
//! task is the sole owner of the [`MessageRouter`], so session state is
//! mutated from exactly one task and commands apply in arrival order, each
//! run to completion.
//!
//! A plain `GET /status` probe on the same port is answered with a JSON body
//! instead of a websocket upgrade.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::oneshot;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use crate::bot::BotBridge;
use crate::protocol::{ClientId, ProtocolError};
use crate::router::MessageRouter;

/// Runtime configuration for the relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the websocket listener binds to.
    pub bind_addr: String,
    /// Interval between bot simulation steps.
    pub bot_tick: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9080".to_owned(),
            bot_tick: Duration::from_millis(100),
        }
    }
}

/// Counters published by the relay, snapshotted for `/status` and logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub frames_received: u64,
    pub active_sessions: u64,
    pub denied_edits: u64,
}

#[derive(Default)]
struct AtomicRelayStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    frames_received: AtomicU64,
    active_sessions: AtomicU64,
    denied_edits: AtomicU64,
}

impl AtomicRelayStats {
    fn record_connect(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Gauges mirror the router's view after every applied command.
    fn store_gauges(&self, sessions: usize, connections: usize, denied: u64) {
        self.active_sessions.store(sessions as u64, Ordering::Relaxed);
        self.active_connections.store(connections as u64, Ordering::Relaxed);
        self.denied_edits.store(denied, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RelayStats {
        RelayStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            denied_edits: self.denied_edits.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("router actor is gone")]
    RouterGone,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Commands delivered to the router actor over its inbox.
enum RelayCommand {
    Connect {
        outbound: UnboundedSender<Arc<str>>,
        reply: oneshot::Sender<ClientId>,
    },
    Frame {
        client_id: ClientId,
        text: String,
    },
    Disconnect {
        client_id: ClientId,
    },
    Tick,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    sessions: u64,
    clients: u64,
}

/// Websocket relay server. Accepts connections, spawns the router actor,
/// and shuttles frames between the two.
pub struct RelayServer {
    config: RelayConfig,
    stats: Arc<AtomicRelayStats>,
    bots: Option<Box<dyn BotBridge + Send>>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            stats: Arc::new(AtomicRelayStats::default()),
            bots: None,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Install a live bot simulation; the tick task only runs when one is
    /// present.
    pub fn with_bots(mut self, bots: Box<dyn BotBridge + Send>) -> Self {
        self.bots = Some(bots);
        self
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn stats(&self) -> RelayStats {
        self.stats.snapshot()
    }

    /// Bind, spawn the router actor (and the bot ticker when enabled), then
    /// accept connections until the listener fails.
    pub async fn run(self) -> Result<(), RelayError> {
        let RelayServer { config, stats, bots } = self;
        let bots_enabled = bots.is_some();

        let listener = TcpListener::bind(&config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        log::info!("relay listening on ws://{local_addr}");

        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<RelayCommand>();

        let actor_stats = Arc::clone(&stats);
        tokio::spawn(async move {
            let mut router = match bots {
                Some(bots) => {
                    log::info!("{} simulated players enabled", bots.bot_ids().len());
                    MessageRouter::with_bots(bots)
                }
                None => MessageRouter::new(),
            };
            while let Some(command) = command_rx.recv().await {
                match command {
                    RelayCommand::Connect { outbound, reply } => {
                        let client_id = router.connect(outbound);
                        actor_stats.record_connect();
                        let _ = reply.send(client_id);
                    }
                    RelayCommand::Frame { client_id, text } => {
                        actor_stats.record_frame();
                        router.handle_frame(client_id, &text);
                    }
                    RelayCommand::Disconnect { client_id } => {
                        router.disconnect(client_id);
                    }
                    RelayCommand::Tick => router.handle_tick(),
                }
                actor_stats.store_gauges(
                    router.session_count(),
                    router.connection_count(),
                    router.denied_edits(),
                );
            }
            log::debug!("router actor stopped");
        });

        if bots_enabled {
            let tick_tx = command_tx.clone();
            let tick = config.bot_tick;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(tick);
                loop {
                    ticker.tick().await;
                    if tick_tx.send(RelayCommand::Tick).is_err() {
                        break;
                    }
                }
            });
        }

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("tcp connection from {addr}");
            let commands = command_tx.clone();
            let stats = Arc::clone(&stats);
            tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, addr, commands, stats).await {
                    log::debug!("connection {addr} ended: {err}");
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    commands: UnboundedSender<RelayCommand>,
    stats: Arc<AtomicRelayStats>,
) -> Result<(), RelayError> {
    // Plain HTTP status probes share the port. Peek leaves the bytes in
    // place for the websocket handshake when this is not one.
    let mut head = [0u8; 16];
    let n = stream.peek(&mut head).await?;
    if head[..n].starts_with(b"GET /status") {
        return answer_status(stream, &stats).await;
    }

    let ws = accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Arc<str>>();
    let (reply_tx, reply_rx) = oneshot::channel();
    commands
        .send(RelayCommand::Connect {
            outbound: outbound_tx,
            reply: reply_tx,
        })
        .map_err(|_| RelayError::RouterGone)?;
    let client_id = reply_rx.await.map_err(|_| RelayError::RouterGone)?;
    log::debug!("{addr} registered as client {client_id}");

    loop {
        tokio::select! {
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if commands
                            .send(RelayCommand::Frame { client_id, text: text.to_string() })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if ws_tx.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary and pong frames are ignored
                    Some(Err(err)) => {
                        log::debug!("client {client_id}: websocket error: {err}");
                        break;
                    }
                }
            }
            frame = outbound_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if ws_tx.send(Message::Text(frame.as_ref().into())).await.is_err() {
                            break;
                        }
                    }
                    // Sender side dropped: the router let go of this client.
                    None => break,
                }
            }
        }
    }

    let _ = commands.send(RelayCommand::Disconnect { client_id });
    log::debug!("{addr} (client {client_id}) connection closed");
    Ok(())
}

/// Answer a `GET /status` probe with session and client counts, then close.
async fn answer_status(mut stream: TcpStream, stats: &AtomicRelayStats) -> Result<(), RelayError> {
    let mut request = [0u8; 512];
    let _ = stream.read(&mut request).await?;

    let snapshot = stats.snapshot();
    let report = StatusReport {
        sessions: snapshot.active_sessions,
        clients: snapshot.active_connections,
    };
    let body = serde_json::to_string(&report)
        .map_err(|err| ProtocolError::Serialize(err.to_string()))?;
    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}
