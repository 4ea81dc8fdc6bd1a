//! WebSocket host loop
//!
//! Owns the socket the session core treats as an abstract transport:
//! connects, pumps inbound frames into the session, forwards outbound
//! frames, and reconnects with exponential backoff. The session core
//! performs no reconnection of its own; re-announcing subscriptions on
//! a fresh connection is its job, redialing is ours.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use docsync_core::{SessionConfig, SyncSession, Transport, TransportError};

/// Initial reconnect delay
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// Maximum reconnect delay
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Transport backed by an outbound channel to the socket writer
struct WsTransport {
    outbound: mpsc::UnboundedSender<String>,
    open: Arc<AtomicBool>,
}

impl Transport for WsTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        self.outbound
            .send(frame.to_string())
            .map_err(|_| TransportError::new("outbound channel closed"))
    }
}

enum Outcome {
    /// Ctrl-C
    Shutdown,
    /// The peer closed or the socket failed; redial
    Disconnected,
}

/// Connect to the sync server and keep the listed documents in sync
pub async fn run(url: &str, data_file: &Path, ids: Vec<String>) -> Result<()> {
    let saved_data = match std::fs::read_to_string(data_file) {
        Ok(blob) => Some(blob),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => {
            return Err(err)
                .with_context(|| format!("Failed to read data file {:?}", data_file));
        }
    };

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let open = Arc::new(AtomicBool::new(false));
    let transport = WsTransport {
        outbound: outbound_tx,
        open: open.clone(),
    };

    let mut config = SessionConfig::new(transport);
    config.saved_data = saved_data;
    config.save = Some(persist_to(data_file.to_path_buf()));
    config.on_change = Some(Box::new(|id: &str, _doc: &automerge::AutoCommit| {
        info!("document '{}' changed", id);
    }));

    let mut session = SyncSession::new(config).context("Failed to load saved documents")?;
    session.subscribe(&ids);

    let mut reconnect_delay = INITIAL_RECONNECT_DELAY;
    loop {
        match connect_and_pump(url, &mut session, &mut outbound_rx, &open).await {
            Ok(Outcome::Shutdown) => {
                info!("shutting down");
                return Ok(());
            }
            Ok(Outcome::Disconnected) => {
                // Connection was established, reset the backoff
                reconnect_delay = INITIAL_RECONNECT_DELAY;
            }
            Err(err) => {
                warn!("connection failed: {}", err);
            }
        }

        info!("reconnecting in {:?}", reconnect_delay);
        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {
                reconnect_delay = (reconnect_delay * 2).min(MAX_RECONNECT_DELAY);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(());
            }
        }
    }
}

fn persist_to(path: PathBuf) -> docsync_core::SaveFn {
    Box::new(move |blob: &str| {
        if let Some(parent) = path.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                warn!("failed to create data directory {:?}: {}", parent, err);
                return;
            }
        }
        if let Err(err) = std::fs::write(&path, blob) {
            warn!("failed to persist document blob to {:?}: {}", path, err);
        }
    })
}

/// Run one connection until it drops or the user interrupts
async fn connect_and_pump(
    url: &str,
    session: &mut SyncSession<WsTransport>,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    open: &Arc<AtomicBool>,
) -> Result<Outcome> {
    let (ws_stream, _) = connect_async(url)
        .await
        .context("Failed to connect to sync server")?;
    let (mut write, mut read) = ws_stream.split();
    info!("connected to {}", url);

    // Frames queued while disconnected belong to a dead connection
    while outbound_rx.try_recv().is_ok() {}

    open.store(true, Ordering::SeqCst);
    session.handle_open();

    let outcome = loop {
        tokio::select! {
            Some(frame) = outbound_rx.recv() => {
                if let Err(err) = write.send(Message::Text(frame)).await {
                    session.handle_error(&err.to_string());
                    break Outcome::Disconnected;
                }
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => session.handle_message(&text),
                Some(Ok(Message::Close(_))) | None => break Outcome::Disconnected,
                Some(Err(err)) => {
                    session.handle_error(&err.to_string());
                    break Outcome::Disconnected;
                }
                _ => {}
            },
            _ = tokio::signal::ctrl_c() => break Outcome::Shutdown,
        }
    };

    open.store(false, Ordering::SeqCst);
    session.handle_close();
    write.close().await.ok();

    Ok(outcome)
}
