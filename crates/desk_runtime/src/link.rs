//! Device Link
//!
//! The capability the runtime consumes to talk to one physical desk. The
//! runtime never speaks the radio protocol itself; a transport implements
//! [`DeskLink`] and a [`LinkConnector`] opens one per device address.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────────────
// Link Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors surfaced by a transport
#[derive(Debug, Clone, thiserror::Error)]
pub enum LinkError {
    #[error("Failed to connect to {address}: {reason}")]
    ConnectFailed { address: String, reason: String },

    #[error("Link is not connected")]
    NotConnected,

    #[error("Height notifications already subscribed")]
    AlreadySubscribed,

    #[error("Height notifications not subscribed")]
    NotSubscribed,

    #[error("Write to {characteristic} failed: {reason}")]
    WriteFailed {
        characteristic: String,
        reason: String,
    },

    #[error("Read from {characteristic} failed: {reason}")]
    ReadFailed {
        characteristic: String,
        reason: String,
    },

    #[error("Malformed payload: {0}")]
    Protocol(String),

    #[error("Transport error: {0}")]
    Other(String),
}

/// Result type for link operations
pub type LinkResult<T> = Result<T, LinkError>;

// ─────────────────────────────────────────────────────────────────────────────
// Desk Link
// ─────────────────────────────────────────────────────────────────────────────

/// Operations against one connected desk.
///
/// Heights are absolute millimeters. A link supports at most one active
/// notification subscription; every decoded height notification is pushed
/// into the queue passed to [`DeskLink::subscribe`] until
/// [`DeskLink::unsubscribe`] is called or the link goes away, at which point
/// the sender is dropped and the receiving side observes the end of stream.
#[async_trait]
pub trait DeskLink: Send + Sync + 'static {
    /// Read the current height from the device
    async fn read_height(&self) -> LinkResult<i32>;

    /// Start (or keep) moving up
    async fn move_up(&self) -> LinkResult<()>;

    /// Start (or keep) moving down
    async fn move_down(&self) -> LinkResult<()>;

    /// Stop any movement
    async fn stop(&self) -> LinkResult<()>;

    /// Subscribe to height change notifications
    async fn subscribe(&self, queue: mpsc::Sender<i32>) -> LinkResult<()>;

    /// Cancel the height notification subscription
    async fn unsubscribe(&self) -> LinkResult<()>;

    /// Release the underlying connection
    async fn close(&self) -> LinkResult<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Link Connector
// ─────────────────────────────────────────────────────────────────────────────

/// Opens a [`DeskLink`] for a device address.
///
/// The registry calls this at most once per successfully started desk.
#[async_trait]
pub trait LinkConnector: Send + Sync + 'static {
    /// Connect to the desk at `address`
    async fn connect(&self, address: &str) -> LinkResult<Arc<dyn DeskLink>>;
}
