//! Transport abstraction between the session and the network.
//!
//! The session never touches sockets: it hands outbound messages to a
//! [`SyncTransport`] and is fed inbound messages and close events by
//! whatever owns the connection (a WebSocket adapter, a test harness).

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use replidb_sync_protocol::ClientMessage;
use std::sync::atomic::{AtomicBool, Ordering};

/// Sends client messages over some connection.
pub trait SyncTransport: Send + Sync {
    /// Sends one message.
    fn send(&self, message: &ClientMessage) -> SyncResult<()>;

    /// Whether the underlying connection is currently usable.
    fn is_connected(&self) -> bool;

    /// Closes the underlying connection.
    fn close(&self) -> SyncResult<()>;
}

/// An in-memory transport for tests: records every sent message and lets
/// the test toggle connectivity.
#[derive(Debug, Default)]
pub struct MockTransport {
    connected: AtomicBool,
    sent: Mutex<Vec<ClientMessage>>,
}

impl MockTransport {
    /// Creates a connected mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Toggles connectivity.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Drains and returns everything sent so far.
    pub fn take_sent(&self) -> Vec<ClientMessage> {
        std::mem::take(&mut self.sent.lock())
    }

    /// Number of messages sent so far.
    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

impl SyncTransport for MockTransport {
    fn send(&self, message: &ClientMessage) -> SyncResult<()> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
