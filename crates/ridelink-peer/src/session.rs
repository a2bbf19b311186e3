//! Direct peer sessions and the one-session-per-client slot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};

use ridelink_core::wire::{read_json, write_json, PeerMessage};

use crate::error::NegotiateError;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A live direct connection to one other client.
pub struct PeerSession {
    local: String,
    peer: String,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    closed: AtomicBool,
    established_at: Instant,
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("local", &self.local)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PeerSession {
    pub fn new(local: &str, peer: &str, stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            local: local.to_string(),
            peer: peer.to_string(),
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
            established_at: Instant::now(),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn uptime(&self) -> Duration {
        self.established_at.elapsed()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn send(&self, msg: &PeerMessage) -> Result<(), NegotiateError> {
        let mut writer = self.writer.lock().await;
        if let Err(e) = write_json(&mut *writer, msg).await {
            self.closed.store(true, Ordering::Release);
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn send_chat(&self, text: &str) -> Result<(), NegotiateError> {
        self.send(&PeerMessage::Chat {
            from: self.local.clone(),
            text: text.to_string(),
            sent_at: now_secs(),
        })
        .await
    }

    /// Next message from the peer; `None` once the peer hangs up.
    pub async fn recv(&self) -> Result<Option<PeerMessage>, NegotiateError> {
        let mut reader = self.reader.lock().await;
        match read_json(&mut *reader).await {
            Ok(Some(msg)) => Ok(Some(msg)),
            Ok(None) => {
                self.closed.store(true, Ordering::Release);
                Ok(None)
            }
            Err(e) => {
                self.closed.store(true, Ordering::Release);
                Err(e.into())
            }
        }
    }

    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _ = self.writer.lock().await.shutdown().await;
    }
}

/// Holds this client's single peer session.
///
/// The first session installed wins; later ones are refused until the
/// current one is closed.
#[derive(Clone)]
pub struct SessionSlot {
    tx: Arc<watch::Sender<Option<Arc<PeerSession>>>>,
}

impl Default for SessionSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionSlot {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Current live session, if any.
    pub fn current(&self) -> Option<Arc<PeerSession>> {
        self.tx.borrow().as_ref().filter(|s| !s.is_closed()).cloned()
    }

    /// Install `session` unless a live one is already held. On refusal the
    /// held session is returned.
    pub fn install(&self, session: Arc<PeerSession>) -> Result<Arc<PeerSession>, Arc<PeerSession>> {
        let mut existing = None;
        let candidate = session.clone();
        self.tx.send_if_modified(|slot| match slot {
            Some(current) if !current.is_closed() => {
                existing = Some(current.clone());
                false
            }
            _ => {
                *slot = Some(candidate);
                true
            }
        });
        match existing {
            Some(current) => Err(current),
            None => {
                tracing::info!(peer = session.peer(), "peer session established");
                Ok(session)
            }
        }
    }

    /// Wait up to `timeout` for a live session with `peer`.
    pub async fn wait_for(&self, peer: &str, timeout: Duration) -> Option<Arc<PeerSession>> {
        let mut rx = self.tx.subscribe();
        let found = tokio::time::timeout(
            timeout,
            rx.wait_for(|slot| {
                slot.as_ref()
                    .is_some_and(|s| !s.is_closed() && s.peer() == peer)
            }),
        )
        .await;
        match found {
            Ok(Ok(slot)) => slot.clone(),
            _ => None,
        }
    }

    /// Close and drop the held session.
    pub async fn release(&self) {
        let held = self.tx.send_replace(None);
        if let Some(session) = held {
            session.close().await;
            tracing::info!(peer = session.peer(), "peer session released");
        }
    }
}
