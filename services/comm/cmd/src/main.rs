//! Comm node binary.
//!
//! Runs either a listening node that wraps every accepted session in a
//! communication client and evicts idle ones, or a connecting node that
//! sends a stream of messages through a single client.

use bytes::Bytes;
use clap::Parser;
use comm_client::{CommunicationClient, MessageClient, SendOutcome, SessionClient};
use comm_transport::{
    listen_tcp, AckCallback, BytesMessage, IoStream, SessionEvent, StreamSession,
    TransportSession,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::CommConfig;
use logging::CommLogFormatter;

/// Type code of messages sent by the connect mode
const MSG_TYPE_DATA: u16 = 1;

type ClientMap = Arc<RwLock<HashMap<u64, Arc<SessionClient>>>>;

/// Node-to-node communication client node
#[derive(Parser, Debug)]
#[command(name = "comm-node", version, about = "Session-backed node-to-node communication node")]
struct Args {
    /// Listen address, e.g. 0.0.0.0:47100 (overrides config)
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Connect to a peer and send messages instead of listening
    #[arg(long)]
    connect: Option<SocketAddr>,

    /// Number of messages to send in connect mode
    #[arg(long, default_value = "10")]
    count: u32,

    /// Payload size in bytes for each message
    #[arg(long, default_value = "64")]
    payload_size: usize,

    /// Delay between messages, e.g. 100ms
    #[arg(long, default_value = "100ms")]
    interval: humantime::Duration,

    /// Idle eviction threshold, e.g. 30s (overrides config)
    #[arg(long)]
    idle_timeout: Option<humantime::Duration>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("comm_node={}", args.log_level).parse()?)
        .add_directive(format!("comm_client={}", args.log_level).parse()?)
        .add_directive(format!("comm_transport={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .event_format(CommLogFormatter::new("comm"))
        .init();

    info!("Starting comm node v{}", env!("CARGO_PKG_VERSION"));

    let mut config = CommConfig::load_from_file(&args.config)?;
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(idle) = args.idle_timeout {
        config.idle_timeout_ms = u64::try_from(Duration::from(idle).as_millis()).unwrap_or(u64::MAX);
    }

    match args.connect {
        Some(peer) => run_connect(&config, &args, peer).await,
        None => run_listen(&config).await,
    }
}

async fn run_listen(config: &CommConfig) -> anyhow::Result<()> {
    let listener = listen_tcp(config.listen_addr).await?;
    info!("Node {} listening on {}", config.node_id, listener.local_addr()?);

    let clients: ClientMap = Arc::new(RwLock::new(HashMap::new()));
    let (event_tx, event_rx) = mpsc::channel(config.session.event_channel_capacity);

    tokio::spawn(handle_events(event_rx, clients.clone()));
    tokio::spawn(evict_idle(
        clients.clone(),
        config.idle_timeout(),
        config.sweep_interval(),
    ));

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        continue;
                    }
                };

                match StreamSession::start(IoStream::Plain(socket), config.session.clone(), event_tx.clone()) {
                    Ok(session) => {
                        let session_id = session.id();
                        let client = Arc::new(SessionClient::new(session));
                        component_info!("pool", "Accepted {} as {}", peer, client);
                        clients.write().await.insert(session_id, client);
                    }
                    Err(e) => warn!("Failed to start session for {}: {}", peer, e),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    for (_, client) in clients.write().await.drain() {
        client.close();
    }
    Ok(())
}

async fn handle_events(mut event_rx: mpsc::Receiver<SessionEvent>, clients: ClientMap) {
    while let Some(event) = event_rx.recv().await {
        match event {
            SessionEvent::MessageReceived { session_id, frame } => {
                debug!(
                    "Received message type {} ({} bytes) on session {}",
                    frame.type_code,
                    frame.body.len(),
                    session_id
                );
            }
            SessionEvent::Closed { session_id, reason } => {
                if let Some(client) = clients.write().await.remove(&session_id) {
                    client.force_close();
                    component_info!(
                        "pool",
                        "Dropped {} ({})",
                        client,
                        reason.as_deref().unwrap_or("closed")
                    );
                }
            }
        }
    }
}

async fn evict_idle(clients: ClientMap, idle_timeout: Duration, sweep_interval: Duration) {
    let mut ticker = tokio::time::interval(sweep_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let idle: Vec<u64> = clients
            .read()
            .await
            .iter()
            .filter(|(_, client)| client.idle_time() > idle_timeout)
            .map(|(id, _)| *id)
            .collect();

        if idle.is_empty() {
            continue;
        }

        let mut map = clients.write().await;
        for session_id in idle {
            if let Some(client) = map.remove(&session_id) {
                let idle_for = client.idle_time();
                if client.close() {
                    component_info!("pool", "Evicted {} after {:?} idle", client, idle_for);
                }
            }
        }
    }
}

async fn run_connect(config: &CommConfig, args: &Args, peer: SocketAddr) -> anyhow::Result<()> {
    let (event_tx, mut event_rx) = mpsc::channel(config.session.event_channel_capacity);
    let session = StreamSession::connect(
        peer,
        config.session.clone(),
        config.connect_timeout(),
        event_tx,
    )
    .await?;
    let client = SessionClient::new(session.clone());
    info!("Connected {}", client);

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if let SessionEvent::Closed { reason, .. } = event {
                warn!("Session closed: {}", reason.as_deref().unwrap_or("locally"));
            }
        }
    });

    let acked = Arc::new(AtomicU64::new(0));
    let failed = Arc::new(AtomicU64::new(0));
    let payload = Bytes::from(vec![b'x'; args.payload_size]);

    for seq in 0..args.count {
        let ack = ack_callback(seq, acked.clone(), failed.clone());
        let msg = Box::new(BytesMessage::new(MSG_TYPE_DATA, payload.clone()));

        match client.send_message(None, msg, Some(ack)) {
            Ok(SendOutcome::NeedsReconnect(cause)) => {
                component_warn!(
                    "client",
                    "Message {} needs reconnect: {} (session: {})",
                    seq,
                    cause,
                    session.last_error().as_deref().map(String::as_str).unwrap_or("open")
                );
                client.force_close();
                break;
            }
            Ok(outcome) => debug!("Message {} -> {:?}", seq, outcome),
            Err(e) => {
                error!("Message {} rejected: {:#}", seq, anyhow::Error::new(e));
                break;
            }
        }

        tokio::time::sleep(args.interval.into()).await;
    }

    // Give outstanding acknowledgments a moment to arrive.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stats = client.stats();
    info!(
        "Sent {} messages: accepted={}, in_flight={}, acked={}, failed={}, reconnects={}, idle={:?}",
        stats.issued,
        stats.accepted,
        stats.in_flight,
        acked.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        stats.reconnects,
        client.idle_time()
    );
    info!("Session stats: {:?}", session.stats());

    client.close();
    Ok(())
}

fn ack_callback(seq: u32, acked: Arc<AtomicU64>, failed: Arc<AtomicU64>) -> AckCallback {
    Box::new(move |res| match res {
        Ok(()) => {
            acked.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            failed.fetch_add(1, Ordering::Relaxed);
            warn!("Message {} failed after send: {}", seq, e);
        }
    })
}
