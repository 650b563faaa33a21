//! Mirror of the gateway's active backend connections.
//!
//! The board is owned by the gateway and only ever replaced wholesale by a
//! refresh. A close removes a single entry locally once the gateway confirms
//! it. A close racing a refresh may be undone by that refresh; the next
//! refresh settles it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, BackendError};

/// Default period between automatic refreshes.
pub const DEFAULT_REFRESH_PERIOD: Duration = Duration::from_secs(10);

/// One open connection as rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEntry {
    pub address: String,
    /// A close for this entry is in flight.
    pub closing: bool,
    /// Hover hint bound to the entry's close control.
    pub hint: String,
}

impl ConnectionEntry {
    fn new(address: String) -> Self {
        let hint = format!("close connection to {address}");
        Self {
            address,
            closing: false,
            hint,
        }
    }
}

/// Rendered list of active connections plus its displayed count.
#[derive(Debug, Default, Clone)]
pub struct ConnectionBoard {
    entries: Vec<ConnectionEntry>,
    count: usize,
    refreshed: u64,
}

impl ConnectionBoard {
    /// Replace every entry (and its hint) with `addresses`.
    pub fn replace(&mut self, addresses: Vec<String>) {
        self.count = addresses.len();
        self.entries = addresses.into_iter().map(ConnectionEntry::new).collect();
        self.refreshed += 1;
    }

    /// Remove `address` and recount. Returns whether it was present.
    pub fn remove(&mut self, address: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.address != address);
        self.count = self.entries.len();
        before != self.entries.len()
    }

    fn set_closing(&mut self, address: &str, closing: bool) -> bool {
        match self.entries.iter_mut().find(|e| e.address == address) {
            Some(entry) => {
                entry.closing = closing;
                true
            }
            None => false,
        }
    }

    pub fn entries(&self) -> &[ConnectionEntry] {
        &self.entries
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn contains(&self, address: &str) -> bool {
        self.entries.iter().any(|e| e.address == address)
    }

    /// How many full refreshes have been applied.
    pub fn refresh_count(&self) -> u64 {
        self.refreshed
    }
}

/// Refreshes and closes active connections through the gateway.
#[derive(Clone)]
pub struct ConnectionMonitor {
    backend: Backend,
    board: Arc<Mutex<ConnectionBoard>>,
}

impl ConnectionMonitor {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            board: Arc::new(Mutex::new(ConnectionBoard::default())),
        }
    }

    /// Copy of the board as currently rendered.
    pub fn snapshot(&self) -> ConnectionBoard {
        self.board.lock().clone()
    }

    /// Fetch the list and replace the board. Returns the new count.
    pub async fn refresh(&self) -> Result<usize, BackendError> {
        let addresses = self.backend.active_connections().await?;
        let mut board = self.board.lock();
        board.replace(addresses);
        tracing::debug!(count = board.count(), "active connections refreshed");
        Ok(board.count())
    }

    /// Ask the gateway to close `address`.
    ///
    /// The entry is marked busy while the request is in flight. It is removed
    /// only when the gateway confirms with `success: true`; otherwise it
    /// stays and the busy mark is cleared.
    pub async fn close(&self, address: &str) -> Result<bool, BackendError> {
        if !self.board.lock().set_closing(address, true) {
            tracing::debug!(%address, "closing a connection that is not on the board");
        }

        let result = self.backend.close_connection(address).await;

        let mut board = self.board.lock();
        match result {
            Ok(true) => {
                board.remove(address);
                tracing::info!(%address, count = board.count(), "connection closed");
                Ok(true)
            }
            Ok(false) => {
                board.set_closing(address, false);
                tracing::warn!(%address, "gateway declined to close connection");
                Ok(false)
            }
            Err(e) => {
                board.set_closing(address, false);
                Err(e)
            }
        }
    }

    /// Start refreshing every `period` (first refresh one period from now)
    /// until the returned task is stopped or dropped.
    pub fn spawn_refresh(&self, period: Duration) -> RefreshTask {
        let cancel = CancellationToken::new();
        let monitor = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = monitor.refresh().await {
                            tracing::warn!(error = %e, "failed to update active connections");
                        }
                    }
                }
            }
            tracing::debug!("connection refresh stopped");
        });
        RefreshTask {
            cancel,
            handle: Some(handle),
        }
    }
}

/// Handle to the periodic refresh. Dropping it stops the task.
pub struct RefreshTask {
    cancel: CancellationToken,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl RefreshTask {
    /// Signal the refresh loop to stop.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for RefreshTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
