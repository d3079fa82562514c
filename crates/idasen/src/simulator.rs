//! Simulated desk
//!
//! An in-process stand-in for a Linak controller. Control writes and height
//! values go through the same wire encoding a radio transport would see.
//! Like the real controller, a single move command only runs the motor for a
//! short burst, so callers have to keep re-asserting the direction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use desk_runtime::{DeskLink, LinkConnector, LinkError, LinkResult, MAX_DESK_HEIGHT, MIN_DESK_HEIGHT};

use crate::config::SimulatorConfig;
use crate::protocol::{self, CONTROL_CHARACTERISTIC, Command, HEIGHT_CHARACTERISTIC, HeightReading};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Motion {
    Idle,
    Moving { up: bool, until: Instant },
}

struct Panel {
    height: i32,
    motion: Motion,
    connected: bool,
    subscriber: Option<mpsc::Sender<i32>>,
}

impl Panel {
    /// Advance one physics tick; returns the notification payload and its
    /// destination when the desk moved
    fn step(&mut self, speed: i32, now: Instant) -> Option<([u8; 4], Option<mpsc::Sender<i32>>)> {
        let Motion::Moving { up, until } = self.motion else {
            return None;
        };

        if now >= until {
            self.motion = Motion::Idle;
            return None;
        }

        let delta = if up { speed } else { -speed };
        let next = (self.height + delta).clamp(MIN_DESK_HEIGHT, MAX_DESK_HEIGHT);
        if next == self.height {
            self.motion = Motion::Idle;
            return None;
        }
        self.height = next;

        let reading = HeightReading {
            height: next,
            speed: delta as i16,
        };
        let payload = protocol::encode_height(reading).ok()?;

        Some((payload, self.subscriber.clone()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Simulated Link
// ─────────────────────────────────────────────────────────────────────────────

/// A [`DeskLink`] backed by a virtual desk
pub struct SimulatedLink {
    address: String,
    burst: Duration,
    panel: Arc<Mutex<Panel>>,
    physics: CancellationToken,
}

impl SimulatedLink {
    /// Power up a virtual desk and start its physics task
    pub fn spawn(address: impl Into<String>, config: &SimulatorConfig) -> Arc<Self> {
        let address = address.into();
        let panel = Arc::new(Mutex::new(Panel {
            height: config
                .initial_height_mm
                .clamp(MIN_DESK_HEIGHT, MAX_DESK_HEIGHT),
            motion: Motion::Idle,
            connected: true,
            subscriber: None,
        }));
        let physics = CancellationToken::new();

        tokio::spawn(run_physics(
            address.clone(),
            Arc::clone(&panel),
            config.speed_mm_per_tick,
            Duration::from_millis(config.tick_ms),
            physics.clone(),
        ));

        Arc::new(Self {
            address,
            burst: Duration::from_millis(config.motion_burst_ms),
            panel,
            physics,
        })
    }

    /// Address the virtual desk answers to
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Current physical height, bypassing the link
    pub fn physical_height(&self) -> i32 {
        self.panel.lock().height
    }

    fn write_control(&self, payload: [u8; 2]) -> LinkResult<()> {
        let command = Command::decode(&payload).map_err(|e| LinkError::WriteFailed {
            characteristic: CONTROL_CHARACTERISTIC.to_string(),
            reason: e.to_string(),
        })?;

        let mut panel = self.panel.lock();
        if !panel.connected {
            return Err(LinkError::NotConnected);
        }

        panel.motion = match command {
            Command::Up => Motion::Moving {
                up: true,
                until: Instant::now() + self.burst,
            },
            Command::Down => Motion::Moving {
                up: false,
                until: Instant::now() + self.burst,
            },
            Command::Stop => Motion::Idle,
        };

        Ok(())
    }
}

impl Drop for SimulatedLink {
    fn drop(&mut self) {
        self.physics.cancel();
    }
}

#[async_trait]
impl DeskLink for SimulatedLink {
    async fn read_height(&self) -> LinkResult<i32> {
        let payload = {
            let panel = self.panel.lock();
            if !panel.connected {
                return Err(LinkError::NotConnected);
            }
            protocol::encode_height(HeightReading {
                height: panel.height,
                speed: 0,
            })
        };

        let reading = payload
            .and_then(|bytes| protocol::decode_height(&bytes))
            .map_err(|e| LinkError::ReadFailed {
                characteristic: HEIGHT_CHARACTERISTIC.to_string(),
                reason: e.to_string(),
            })?;

        Ok(reading.height)
    }

    async fn move_up(&self) -> LinkResult<()> {
        self.write_control(Command::Up.payload())
    }

    async fn move_down(&self) -> LinkResult<()> {
        self.write_control(Command::Down.payload())
    }

    async fn stop(&self) -> LinkResult<()> {
        self.write_control(Command::Stop.payload())
    }

    async fn subscribe(&self, queue: mpsc::Sender<i32>) -> LinkResult<()> {
        let mut panel = self.panel.lock();
        if !panel.connected {
            return Err(LinkError::NotConnected);
        }
        if panel.subscriber.is_some() {
            return Err(LinkError::AlreadySubscribed);
        }
        panel.subscriber = Some(queue);
        Ok(())
    }

    async fn unsubscribe(&self) -> LinkResult<()> {
        self.panel
            .lock()
            .subscriber
            .take()
            .map(|_| ())
            .ok_or(LinkError::NotSubscribed)
    }

    async fn close(&self) -> LinkResult<()> {
        let mut panel = self.panel.lock();
        if !panel.connected {
            return Err(LinkError::NotConnected);
        }

        panel.connected = false;
        panel.motion = Motion::Idle;
        panel.subscriber = None;
        self.physics.cancel();

        tracing::debug!(address = %self.address, "Simulated desk disconnected");
        Ok(())
    }
}

async fn run_physics(
    address: String,
    panel: Arc<Mutex<Panel>>,
    speed: i32,
    tick: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = time::interval(tick);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,

            _ = ticker.tick() => {
                let moved = panel.lock().step(speed, Instant::now());

                let Some((payload, Some(queue))) = moved else {
                    continue;
                };

                match protocol::decode_height(&payload) {
                    Ok(reading) => {
                        if queue.send(reading.height).await.is_err() {
                            tracing::debug!(address = %address, "Height subscriber went away");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(address = %address, error = %e, "Parsing height");
                    }
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Simulated Connector
// ─────────────────────────────────────────────────────────────────────────────

/// Connects every address to a fresh virtual desk
pub struct SimulatedConnector {
    config: SimulatorConfig,
}

impl SimulatedConnector {
    pub fn new(config: SimulatorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl LinkConnector for SimulatedConnector {
    async fn connect(&self, address: &str) -> LinkResult<Arc<dyn DeskLink>> {
        tracing::info!(
            address,
            height = self.config.initial_height_mm,
            "Connecting to simulated desk"
        );

        Ok(SimulatedLink::spawn(address, &self.config))
    }
}
