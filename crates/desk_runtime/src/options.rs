//! Desk Options
//!
//! Per-actor tuning plus the caller-supplied scope of a move command.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Lowest height the reference desk reports, in millimeters
pub const MIN_DESK_HEIGHT: i32 = 6150;

/// Highest height the reference desk reports, in millimeters
pub const MAX_DESK_HEIGHT: i32 = 12700;

/// Default tolerance band around a target
pub const DEFAULT_MARGIN: i32 = 10;

/// Default interval between position checks while moving
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default ceiling on how long a single move may run
pub const DEFAULT_MOVE_TIMEOUT: Duration = Duration::from_secs(30);

// ─────────────────────────────────────────────────────────────────────────────
// Desk Options
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration fixed at actor construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeskOptions {
    /// Accepted distance from the target, in millimeters
    pub margin: i32,

    /// Lowest accepted target height
    pub min_height: i32,

    /// Highest accepted target height
    pub max_height: i32,

    /// Interval between position checks while moving
    pub poll_interval: Duration,

    /// Upper bound on the duration of a single move
    pub move_timeout: Duration,

    /// Capacity of the notification queue handed to the link
    pub notification_buffer: usize,
}

impl Default for DeskOptions {
    fn default() -> Self {
        Self {
            margin: DEFAULT_MARGIN,
            min_height: MIN_DESK_HEIGHT,
            max_height: MAX_DESK_HEIGHT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            move_timeout: DEFAULT_MOVE_TIMEOUT,
            notification_buffer: 64,
        }
    }
}

impl DeskOptions {
    /// Set the tolerance band
    pub fn with_margin(mut self, margin: i32) -> Self {
        self.margin = margin;
        self
    }

    /// Set the legal height range (inclusive)
    pub fn with_height_range(mut self, min: i32, max: i32) -> Self {
        self.min_height = min;
        self.max_height = max;
        self
    }

    /// Set the poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the per-move ceiling
    pub fn with_move_timeout(mut self, timeout: Duration) -> Self {
        self.move_timeout = timeout;
        self
    }

    /// Whether `height` lies in the legal range
    pub fn is_valid_height(&self, height: i32) -> bool {
        (self.min_height..=self.max_height).contains(&height)
    }

    /// Whether `current` is within the tolerance band around `target`
    pub fn in_target_range(&self, current: i32, target: i32) -> bool {
        current >= target - self.margin && current <= target + self.margin
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Move Scope
// ─────────────────────────────────────────────────────────────────────────────

/// Cancellation token and optional deadline a caller attaches to a move
#[derive(Debug, Clone, Default)]
pub struct MoveScope {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl MoveScope {
    /// A scope with a fresh token and no deadline of its own
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing cancellation token
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Give up at `deadline`
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Give up after `timeout` from now
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Token the caller can trigger to abandon the move
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Caller deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Deadline after clamping to a ceiling measured from now
    pub(crate) fn effective_deadline(&self, ceiling: Duration) -> Instant {
        let ceiling = Instant::now() + ceiling;
        match self.deadline {
            Some(deadline) if deadline < ceiling => deadline,
            _ => ceiling,
        }
    }
}
