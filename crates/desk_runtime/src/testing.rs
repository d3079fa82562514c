//! In-memory links for unit tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::link::{DeskLink, LinkConnector, LinkError, LinkResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkCall {
    ReadHeight,
    MoveUp,
    MoveDown,
    Stop,
    Subscribe,
    Unsubscribe,
    Close,
}

/// Records every call. Each directional command moves the desk by `step`
/// millimeters and emits a notification, which stands in for a desk that
/// moves a fixed distance per poll tick.
pub(crate) struct MockLink {
    height: Mutex<i32>,
    step: i32,
    calls: Mutex<Vec<LinkCall>>,
    queue: Mutex<Option<mpsc::Sender<i32>>>,
    connected: AtomicBool,
    fail_reads: AtomicBool,
    fail_subscribe: AtomicBool,
    fail_moves: AtomicBool,
    hang_moves: AtomicBool,
    fail_close: AtomicBool,
}

impl MockLink {
    pub fn new(height: i32) -> Self {
        Self {
            height: Mutex::new(height),
            step: 0,
            calls: Mutex::new(Vec::new()),
            queue: Mutex::new(None),
            connected: AtomicBool::new(true),
            fail_reads: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            fail_moves: AtomicBool::new(false),
            hang_moves: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
        }
    }

    pub fn with_step(mut self, step: i32) -> Self {
        self.step = step;
        self
    }

    pub fn calls(&self) -> Vec<LinkCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: LinkCall) -> usize {
        self.calls.lock().iter().filter(|c| **c == call).count()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    pub fn fail_moves(&self, fail: bool) {
        self.fail_moves.store(fail, Ordering::SeqCst);
    }

    /// Make directional writes never complete
    pub fn hang_moves(&self, hang: bool) {
        self.hang_moves.store(hang, Ordering::SeqCst);
    }

    pub fn fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Emit a height notification as the device would
    pub async fn notify(&self, height: i32) {
        *self.height.lock() = height;
        let queue = self.queue.lock().clone();
        if let Some(queue) = queue {
            let _ = queue.send(height).await;
        }
    }

    /// Simulate the device dropping its notification stream
    pub fn drop_subscription(&self) {
        self.queue.lock().take();
    }

    fn record(&self, call: LinkCall) {
        self.calls.lock().push(call);
    }

    async fn step_by(&self, delta: i32) -> LinkResult<()> {
        if self.hang_moves.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_moves.load(Ordering::SeqCst) {
            return Err(LinkError::WriteFailed {
                characteristic: "control".to_string(),
                reason: "injected failure".to_string(),
            });
        }
        if delta != 0 {
            let height = *self.height.lock() + delta;
            self.notify(height).await;
        }
        Ok(())
    }
}

#[async_trait]
impl DeskLink for MockLink {
    async fn read_height(&self) -> LinkResult<i32> {
        self.record(LinkCall::ReadHeight);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(LinkError::ReadFailed {
                characteristic: "height".to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(*self.height.lock())
    }

    async fn move_up(&self) -> LinkResult<()> {
        self.record(LinkCall::MoveUp);
        self.step_by(self.step).await
    }

    async fn move_down(&self) -> LinkResult<()> {
        self.record(LinkCall::MoveDown);
        self.step_by(-self.step).await
    }

    async fn stop(&self) -> LinkResult<()> {
        self.record(LinkCall::Stop);
        Ok(())
    }

    async fn subscribe(&self, queue: mpsc::Sender<i32>) -> LinkResult<()> {
        self.record(LinkCall::Subscribe);
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(LinkError::Other("injected failure".to_string()));
        }
        *self.queue.lock() = Some(queue);
        Ok(())
    }

    async fn unsubscribe(&self) -> LinkResult<()> {
        self.record(LinkCall::Unsubscribe);
        self.queue
            .lock()
            .take()
            .map(|_| ())
            .ok_or(LinkError::NotSubscribed)
    }

    async fn close(&self) -> LinkResult<()> {
        self.record(LinkCall::Close);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(LinkError::Other("injected failure".to_string()));
        }
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Err(LinkError::NotConnected);
        }
        Ok(())
    }
}

/// Hands out [`MockLink`]s and counts connection attempts
pub(crate) struct MockConnector {
    height: i32,
    delay: Duration,
    failures_left: AtomicUsize,
    fail_start: AtomicBool,
    connects: AtomicUsize,
    links: Mutex<Vec<(String, Arc<MockLink>)>>,
}

impl MockConnector {
    pub fn new(height: i32) -> Self {
        Self {
            height,
            delay: Duration::ZERO,
            failures_left: AtomicUsize::new(0),
            fail_start: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            links: Mutex::new(Vec::new()),
        }
    }

    /// Make every connection take `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the next `count` connection attempts
    pub fn failing(self, count: usize) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    /// Hand out links whose initial height read fails
    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn links(&self) -> Vec<(String, Arc<MockLink>)> {
        self.links.lock().clone()
    }

    pub fn link(&self, address: &str) -> Option<Arc<MockLink>> {
        self.links
            .lock()
            .iter()
            .rev()
            .find(|(a, _)| a == address)
            .map(|(_, link)| Arc::clone(link))
    }
}

#[async_trait]
impl LinkConnector for MockConnector {
    async fn connect(&self, address: &str) -> LinkResult<Arc<dyn DeskLink>> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(LinkError::ConnectFailed {
                address: address.to_string(),
                reason: "injected failure".to_string(),
            });
        }

        let link = Arc::new(MockLink::new(self.height));
        link.fail_reads(self.fail_start.load(Ordering::SeqCst));
        self.links
            .lock()
            .push((address.to_string(), Arc::clone(&link)));

        Ok(link)
    }
}
