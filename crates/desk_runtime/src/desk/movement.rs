//! Move-to-target task
//!
//! Drives the desk in one direction, re-asserting the direction on every
//! poll tick because the controller drops motion on its own, until the
//! cached height enters the tolerance band.

use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::{self, Instant, MissedTickBehavior, Sleep};
use tokio_util::sync::CancellationToken;

use super::ActorInner;
use crate::error::{DeskError, DeskResult};
use crate::link::DeskLink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

impl Direction {
    fn toward(current: i32, target: i32) -> Self {
        if target > current {
            Direction::Up
        } else {
            Direction::Down
        }
    }

    async fn drive(self, link: &dyn DeskLink) -> DeskResult<()> {
        match self {
            Direction::Up => link.move_up().await?,
            Direction::Down => link.move_down().await?,
        }
        Ok(())
    }
}

pub(super) async fn run_move(
    inner: Arc<ActorInner>,
    target: i32,
    cancel: CancellationToken,
    deadline: Instant,
    reply: oneshot::Sender<DeskResult<()>>,
) {
    let result = move_to_target(&inner, target, &cancel, deadline).await;

    if let Err(e) = &result {
        tracing::debug!(address = %inner.address, target_height = target, error = %e, "Move finished without reaching target");
    }

    if reply.send(result).is_err() {
        tracing::debug!(address = %inner.address, "Move caller went away before the result");
    }
}

async fn move_to_target(
    inner: &ActorInner,
    target: i32,
    cancel: &CancellationToken,
    deadline: Instant,
) -> DeskResult<()> {
    let options = &inner.options;
    let current = inner.height();

    if options.in_target_range(current, target) {
        tracing::info!(
            address = %inner.address,
            current_height = current,
            target_height = target,
            "Desk is already in target range"
        );
        return Ok(());
    }

    if cancel.is_cancelled() {
        return Err(DeskError::Cancelled);
    }
    if Instant::now() >= deadline {
        return Err(DeskError::TimedOut);
    }

    tracing::info!(address = %inner.address, from = current, to = target, "Moving desk");

    let expired = time::sleep_until(deadline);
    tokio::pin!(expired);

    let drive = Direction::toward(current, target).drive(&*inner.link);
    let outcome = match interruptible(drive, cancel, expired.as_mut()).await {
        Ok(()) => poll_until_arrival(inner, target, cancel, expired.as_mut()).await,
        // Nothing was set in motion
        Err(e @ DeskError::Transport(_)) => return Err(e),
        Err(e) => Err(e),
    };

    if let Err(e) = inner.link.stop().await {
        tracing::error!(address = %inner.address, error = %e, "Error stopping desk");
    }

    outcome
}

/// Run a link write unless the move is cancelled or expires first
async fn interruptible<F>(write: F, cancel: &CancellationToken, expired: Pin<&mut Sleep>) -> DeskResult<()>
where
    F: Future<Output = DeskResult<()>>,
{
    tokio::select! {
        biased;

        _ = cancel.cancelled() => Err(DeskError::Cancelled),
        _ = expired => Err(DeskError::TimedOut),
        result = write => result,
    }
}

async fn poll_until_arrival(
    inner: &ActorInner,
    target: i32,
    cancel: &CancellationToken,
    mut expired: Pin<&mut Sleep>,
) -> DeskResult<()> {
    let options = &inner.options;

    let mut ticker = time::interval_at(Instant::now() + options.poll_interval, options.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = ticker.tick() => {
                let current = inner.height();

                if options.in_target_range(current, target) {
                    tracing::debug!(
                        address = %inner.address,
                        current_height = current,
                        target_height = target,
                        "Desk reached target range"
                    );
                    return Ok(());
                }

                let drive = Direction::toward(current, target).drive(&*inner.link);
                interruptible(drive, cancel, expired.as_mut()).await?;
            }

            _ = cancel.cancelled() => {
                tracing::debug!(address = %inner.address, "Move command cancelled");
                return Err(DeskError::Cancelled);
            }

            _ = expired.as_mut() => {
                tracing::debug!(address = %inner.address, "Move command timed out");
                return Err(DeskError::TimedOut);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_toward_target() {
        assert_eq!(Direction::toward(7000, 8000), Direction::Up);
        assert_eq!(Direction::toward(8000, 7000), Direction::Down);
        assert_eq!(Direction::toward(7000, 7000), Direction::Down);
    }
}
