//! Control loop
//!
//! The only task that writes the cached height and decides which move is
//! active.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::{ActorInner, DeskState, MoveCommand, movement};
use crate::error::{DeskError, DeskResult};

/// Initialize the desk, report readiness, then serve notifications and
/// move commands until shutdown or until the link drops its notifications.
pub(super) async fn run_control_loop(
    inner: Arc<ActorInner>,
    mut commands: mpsc::Receiver<MoveCommand>,
    ready: oneshot::Sender<DeskResult<()>>,
) {
    let address = inner.address.clone();

    let height = match inner.link.read_height().await {
        Ok(height) => height,
        Err(source) => {
            inner.set_state(DeskState::Failed);
            let _ = ready.send(Err(DeskError::Initialization {
                stage: "reading initial height",
                source,
            }));
            return;
        }
    };
    inner.update_height(height);

    let (notify_tx, mut notifications) = mpsc::channel(inner.options.notification_buffer);
    if let Err(source) = inner.link.subscribe(notify_tx).await {
        inner.set_state(DeskState::Failed);
        let _ = ready.send(Err(DeskError::Initialization {
            stage: "subscribing to height updates",
            source,
        }));
        return;
    }

    inner.set_state(DeskState::Running);
    tracing::debug!(address = %address, height, "Desk initialized");
    let _ = ready.send(Ok(()));

    let shutdown = inner.shutdown.clone();
    let mut active_move: Option<CancellationToken> = None;

    let exit_state = loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                tracing::info!(address = %address, "Desk service stopped");
                break DeskState::Stopped;
            }

            update = notifications.recv() => {
                match update {
                    Some(height) => {
                        tracing::debug!(address = %address, height, "Received height update");
                        inner.update_height(height);
                        inner.publish(height).await;
                    }
                    None => {
                        tracing::warn!(address = %address, "Height notification stream ended");
                        break DeskState::Failed;
                    }
                }
            }

            Some(command) = commands.recv() => {
                tracing::debug!(
                    address = %address,
                    target_height = command.target,
                    "Received move command"
                );

                if let Some(previous) = active_move.take() {
                    tracing::debug!(address = %address, "Cancelling previous move command");
                    previous.cancel();
                }

                let cancel = command.scope.cancel_token().child_token();
                let deadline = command.scope.effective_deadline(inner.options.move_timeout);
                active_move = Some(cancel.clone());

                tokio::spawn(movement::run_move(
                    Arc::clone(&inner),
                    command.target,
                    cancel,
                    deadline,
                    command.reply,
                ));
            }
        }
    };

    if let Some(active) = active_move.take() {
        active.cancel();
    }

    inner.set_state(exit_state);

    if let Err(e) = inner.link.unsubscribe().await {
        tracing::error!(
            address = %address,
            error = %e,
            "Error unsubscribing from height updates"
        );
    }
}
