//! Desk Actor
//!
//! One actor owns one desk. A single control loop task applies height
//! notifications and accepts move commands; each accepted move runs in its
//! own short-lived task that only talks to the link and reads the cached
//! height.
//!
//! # Lifecycle
//!
//! `Created → Starting → Running → Stopped` (on close) or `Failed` (when
//! initialization fails or the link drops its notification stream). A
//! closed actor is never restarted.

mod control;
mod movement;

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{DeskError, DeskResult};
use crate::link::DeskLink;
use crate::options::{DeskOptions, MoveScope};

const COMMAND_BUFFER: usize = 16;

// ─────────────────────────────────────────────────────────────────────────────
// Desk State
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a desk actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum DeskState {
    /// Constructed, never started
    Created = 0,
    /// Reading the initial height and subscribing
    Starting = 1,
    /// Control loop active
    Running = 2,
    /// Closed
    Stopped = 3,
    /// Initialization failed or the link went away
    Failed = 4,
}

impl DeskState {
    /// Convert from u8
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Created,
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopped,
            _ => Self::Failed,
        }
    }

    /// Check if the control loop is active
    pub fn is_running(&self) -> bool {
        *self == DeskState::Running
    }
}

impl std::fmt::Display for DeskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeskState::Created => write!(f, "created"),
            DeskState::Starting => write!(f, "starting"),
            DeskState::Running => write!(f, "running"),
            DeskState::Stopped => write!(f, "stopped"),
            DeskState::Failed => write!(f, "failed"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Move Command
// ─────────────────────────────────────────────────────────────────────────────

/// A move handed from a caller to the control loop
pub(crate) struct MoveCommand {
    pub target: i32,
    pub scope: MoveScope,
    pub reply: oneshot::Sender<DeskResult<()>>,
}

struct Subscription {
    id: Uuid,
    queue: mpsc::Sender<i32>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Actor Internals
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) struct ActorInner {
    address: String,
    options: DeskOptions,
    link: Arc<dyn DeskLink>,

    /// Lifecycle state (atomic for lock-free reads)
    state: AtomicU8,

    /// Last height reported by the device
    height: RwLock<i32>,

    subscribers: Mutex<Vec<Subscription>>,

    /// Sender into the running control loop
    command_tx: Mutex<Option<mpsc::Sender<MoveCommand>>>,

    loop_handle: Mutex<Option<JoinHandle<()>>>,

    /// Serializes concurrent `start` calls
    start_lock: tokio::sync::Mutex<()>,

    shutdown: CancellationToken,
}

impl ActorInner {
    pub(crate) fn state(&self) -> DeskState {
        DeskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: DeskState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub(crate) fn height(&self) -> i32 {
        *self.height.read()
    }

    pub(crate) fn update_height(&self, height: i32) {
        *self.height.write() = height;
    }

    /// Push a height to every subscriber, dropping those whose queue is gone.
    ///
    /// A full queue blocks delivery until shutdown, which abandons the rest.
    pub(crate) async fn publish(&self, height: i32) {
        let queues: Vec<(Uuid, mpsc::Sender<i32>)> = self
            .subscribers
            .lock()
            .iter()
            .map(|sub| (sub.id, sub.queue.clone()))
            .collect();

        let mut closed = Vec::new();
        for (id, queue) in queues {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    tracing::debug!(address = %self.address, height, "Shutdown while publishing height");
                    return;
                }

                sent = queue.send(height) => {
                    if sent.is_err() {
                        closed.push(id);
                    }
                }
            }
        }

        if !closed.is_empty() {
            tracing::debug!(
                address = %self.address,
                count = closed.len(),
                "Dropping closed height subscribers"
            );
            self.subscribers
                .lock()
                .retain(|sub| !closed.contains(&sub.id));
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Desk Actor
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to the actor that owns one desk
///
/// Cheap to clone; all clones refer to the same actor.
#[derive(Clone)]
pub struct DeskActor {
    inner: Arc<ActorInner>,
}

impl DeskActor {
    /// Create an actor around a connected link. The actor is idle until
    /// [`DeskActor::start`] succeeds.
    pub fn new(address: impl Into<String>, link: Arc<dyn DeskLink>, options: DeskOptions) -> Self {
        Self {
            inner: Arc::new(ActorInner {
                address: address.into(),
                options,
                link,
                state: AtomicU8::new(DeskState::Created as u8),
                height: RwLock::new(0),
                subscribers: Mutex::new(Vec::new()),
                command_tx: Mutex::new(None),
                loop_handle: Mutex::new(None),
                start_lock: tokio::sync::Mutex::new(()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Device address this actor controls
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    /// Options fixed at construction
    pub fn options(&self) -> &DeskOptions {
        &self.inner.options
    }

    /// Current lifecycle state
    pub fn state(&self) -> DeskState {
        self.inner.state()
    }

    /// Check if the control loop is active
    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Start the control loop.
    ///
    /// Returns once the initial height has been read and notifications are
    /// subscribed. Calling it on a running actor is a no-op.
    pub async fn start(&self) -> DeskResult<()> {
        let _guard = self.inner.start_lock.lock().await;

        match self.state() {
            DeskState::Running => {
                tracing::info!(address = %self.inner.address, "Desk service is already running");
                return Ok(());
            }
            DeskState::Stopped => return Err(DeskError::NotRunning),
            _ => {}
        }

        self.inner.set_state(DeskState::Starting);

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (ready_tx, ready_rx) = oneshot::channel();

        *self.inner.command_tx.lock() = Some(command_tx);

        let handle = tokio::spawn(control::run_control_loop(
            Arc::clone(&self.inner),
            command_rx,
            ready_tx,
        ));

        let result = ready_rx.await.unwrap_or_else(|_| {
            Err(DeskError::Internal(
                "control loop exited before reporting readiness".to_string(),
            ))
        });

        match result {
            Ok(()) => {
                *self.inner.loop_handle.lock() = Some(handle);
                tracing::info!(address = %self.inner.address, "Desk service running");
                Ok(())
            }
            Err(e) => {
                self.inner.command_tx.lock().take();
                self.inner.set_state(DeskState::Failed);
                tracing::error!(address = %self.inner.address, error = %e, "Desk service failed to start");
                Err(e)
            }
        }
    }

    /// Last known height in millimeters, served from the cache
    pub fn read_height(&self) -> DeskResult<i32> {
        if !self.is_running() {
            return Err(DeskError::NotRunning);
        }

        Ok(self.inner.height())
    }

    /// Move to `target` and wait for the outcome.
    ///
    /// A newer move on the same actor cancels this one, which then resolves
    /// with [`DeskError::Cancelled`].
    pub async fn move_to(&self, target: i32, scope: MoveScope) -> DeskResult<()> {
        let options = &self.inner.options;
        if !options.is_valid_height(target) {
            return Err(DeskError::InvalidHeight {
                height: target,
                min: options.min_height,
                max: options.max_height,
            });
        }

        if !self.is_running() {
            return Err(DeskError::NotRunning);
        }

        let command_tx = self
            .inner
            .command_tx
            .lock()
            .clone()
            .ok_or(DeskError::NotRunning)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        command_tx
            .send(MoveCommand {
                target,
                scope,
                reply: reply_tx,
            })
            .await
            .map_err(|_| DeskError::NotRunning)?;

        reply_rx.await.map_err(|_| DeskError::NotRunning)?
    }

    /// Register a queue for height notifications
    pub fn subscribe(&self, queue: mpsc::Sender<i32>) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.subscribers.lock().push(Subscription { id, queue });
        id
    }

    /// Remove a subscription; unknown ids are ignored
    pub fn unsubscribe(&self, id: Uuid) {
        self.inner.subscribers.lock().retain(|sub| sub.id != id);
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Stop the control loop and release the connection.
    ///
    /// A second call may surface a transport error from the link.
    pub async fn close(&self) -> DeskResult<()> {
        self.inner.shutdown.cancel();

        let handle = self.inner.loop_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(address = %self.inner.address, error = ?e, "Control loop panicked");
            }
        }

        self.inner.command_tx.lock().take();
        self.inner.set_state(DeskState::Stopped);

        self.inner.link.close().await?;

        tracing::info!(address = %self.inner.address, "Desk service closed");
        Ok(())
    }
}

impl std::fmt::Debug for DeskActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeskActor")
            .field("address", &self.inner.address)
            .field("state", &self.state())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
