//! Desk Registry
//!
//! Maps device addresses to their actor. Actors are created on first use;
//! concurrent first requests for one address construct exactly one actor.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::desk::{DeskActor, DeskState};
use crate::error::{DeskError, DeskResult};
use crate::link::LinkConnector;
use crate::options::{DeskOptions, MoveScope};

/// Central directory of desk actors
///
/// The DeskRegistry is responsible for:
/// - Connecting and starting one actor per address on first use
/// - Routing reads, moves and subscriptions to the right actor
/// - Closing every actor at shutdown
pub struct DeskRegistry {
    connector: Arc<dyn LinkConnector>,

    options: DeskOptions,

    /// Started actors indexed by address
    actors: DashMap<String, DeskActor>,

    /// Per-address guards held while an actor is being constructed
    init_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DeskRegistry {
    /// Create a registry that builds actors with default options
    pub fn new(connector: Arc<dyn LinkConnector>) -> Self {
        Self::with_options(connector, DeskOptions::default())
    }

    /// Create a registry that builds actors with `options`
    pub fn with_options(connector: Arc<dyn LinkConnector>, options: DeskOptions) -> Self {
        Self {
            connector,
            options,
            actors: DashMap::new(),
            init_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Options handed to every actor
    pub fn options(&self) -> &DeskOptions {
        &self.options
    }

    /// Return the actor for `address`, connecting and starting it first if
    /// needed. A failed attempt is not remembered; the next call retries.
    /// An actor that failed after starting (lost link) is replaced.
    pub async fn get_or_create(&self, address: &str) -> DeskResult<DeskActor> {
        if let Some(actor) = self.live_actor(address) {
            return Ok(actor);
        }

        let init_lock = {
            let mut locks = self.init_locks.lock();
            Arc::clone(locks.entry(address.to_string()).or_default())
        };
        let _guard = init_lock.lock().await;

        // Another caller may have finished construction while we waited
        if let Some(actor) = self.live_actor(address) {
            return Ok(actor);
        }

        if let Some((_, failed)) = self
            .actors
            .remove_if(address, |_, actor| actor.state() == DeskState::Failed)
        {
            tracing::warn!(address, "Desk service failed, reconnecting");
            if let Err(e) = failed.close().await {
                tracing::debug!(address, error = %e, "Error closing failed desk service");
            }
        }

        let actor = self
            .create(address)
            .await
            .map_err(|source| DeskError::NotFound {
                address: address.to_string(),
                source: Box::new(source),
            })?;

        self.actors.insert(address.to_string(), actor.clone());
        tracing::info!(address, "Desk service initialized");

        Ok(actor)
    }

    fn live_actor(&self, address: &str) -> Option<DeskActor> {
        self.actors
            .get(address)
            .map(|entry| entry.value().clone())
            .filter(|actor| actor.state() != DeskState::Failed)
    }

    async fn create(&self, address: &str) -> DeskResult<DeskActor> {
        let link = self.connector.connect(address).await?;
        let actor = DeskActor::new(address, link, self.options.clone());

        if let Err(e) = actor.start().await {
            if let Err(close_err) = actor.close().await {
                tracing::warn!(address, error = %close_err, "Error closing link after failed start");
            }
            return Err(e);
        }

        Ok(actor)
    }

    /// Last known height of the desk at `address`
    pub async fn read_height(&self, address: &str) -> DeskResult<i32> {
        let actor = self.get_or_create(address).await?;
        actor.read_height()
    }

    /// Move the desk at `address` to `target` and return the height
    /// observed once the move resolved
    pub async fn move_to(&self, address: &str, target: i32, scope: MoveScope) -> DeskResult<i32> {
        let actor = self.get_or_create(address).await?;
        actor.move_to(target, scope).await?;

        match actor.read_height() {
            Ok(height) => Ok(height),
            Err(e) => {
                tracing::error!(address, error = %e, "Error reading height after move");
                Ok(target)
            }
        }
    }

    /// Register a queue for height notifications from `address`
    pub async fn subscribe(&self, address: &str, queue: mpsc::Sender<i32>) -> DeskResult<Uuid> {
        let actor = self.get_or_create(address).await?;
        let id = actor.subscribe(queue);

        tracing::info!(address, subscription_id = %id, "Subscribed to desk service");
        Ok(id)
    }

    /// Remove a subscription from `address`
    pub async fn unsubscribe(&self, address: &str, id: Uuid) -> DeskResult<()> {
        let actor = self.get_or_create(address).await?;
        actor.unsubscribe(id);

        tracing::debug!(address, subscription_id = %id, "Unsubscribed from desk service");
        Ok(())
    }

    /// Close every known actor.
    ///
    /// All actors are closed even when some fail; the first error is
    /// returned after the sweep.
    pub async fn close_all(&self) -> DeskResult<()> {
        let actors: Vec<DeskActor> = self.actors.iter().map(|entry| entry.value().clone()).collect();

        let mut first_error = None;
        for actor in actors {
            if let Err(e) = actor.close().await {
                tracing::error!(address = actor.address(), error = %e, "Error closing desk service");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::info!("All desk services closed");
                Ok(())
            }
        }
    }

    /// Known addresses with their actor state
    pub fn list(&self) -> Vec<(String, DeskState)> {
        let mut desks: Vec<_> = self
            .actors
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state()))
            .collect();
        desks.sort_by(|a, b| a.0.cmp(&b.0));
        desks
    }

    /// Get the number of known desks
    pub fn len(&self) -> usize {
        self.actors.len()
    }

    /// Check if no desk has been created yet
    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::link::LinkError;
    use crate::testing::{LinkCall, MockConnector};

    const DESK_A: &str = "AA:BB:CC:DD:EE:01";
    const DESK_B: &str = "AA:BB:CC:DD:EE:02";

    fn registry(connector: &Arc<MockConnector>) -> Arc<DeskRegistry> {
        Arc::new(DeskRegistry::new(Arc::clone(connector) as Arc<dyn LinkConnector>))
    }

    #[tokio::test]
    async fn test_read_height_creates_actor_lazily() {
        let connector = Arc::new(MockConnector::new(7200));
        let registry = registry(&connector);
        assert!(registry.is_empty());

        assert_eq!(registry.read_height(DESK_A).await.unwrap(), 7200);
        assert_eq!(registry.read_height(DESK_A).await.unwrap(), 7200);

        assert_eq!(connector.connects(), 1);
        assert_eq!(registry.list(), vec![(DESK_A.to_string(), DeskState::Running)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_access_constructs_once() {
        let connector = Arc::new(MockConnector::new(7000).with_delay(Duration::from_millis(20)));
        let registry = registry(&connector);

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.get_or_create(DESK_A).await })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(connector.connects(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_distinct_addresses_get_distinct_actors() {
        let connector = Arc::new(MockConnector::new(7000));
        let registry = registry(&connector);

        let (a, b) = tokio::join!(registry.get_or_create(DESK_A), registry.get_or_create(DESK_B));

        assert_eq!(a.unwrap().address(), DESK_A);
        assert_eq!(b.unwrap().address(), DESK_B);
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test]
    async fn test_connect_failure_is_not_cached() {
        let connector = Arc::new(MockConnector::new(7000).failing(1));
        let registry = registry(&connector);

        let first = registry.read_height(DESK_A).await;
        assert!(matches!(
            first,
            Err(DeskError::NotFound { ref source, .. })
                if matches!(**source, DeskError::Transport(LinkError::ConnectFailed { .. }))
        ));
        assert!(registry.is_empty());

        assert_eq!(registry.read_height(DESK_A).await.unwrap(), 7000);
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test]
    async fn test_start_failure_closes_link_and_retries() {
        let connector = Arc::new(MockConnector::new(7000));
        connector.fail_start(true);
        let registry = registry(&connector);

        let first = registry.read_height(DESK_A).await;
        assert!(matches!(first, Err(DeskError::NotFound { .. })));

        let failed_link = connector.link(DESK_A).unwrap();
        assert_eq!(failed_link.count(LinkCall::Close), 1);

        connector.fail_start(false);
        assert_eq!(registry.read_height(DESK_A).await.unwrap(), 7000);
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test]
    async fn test_failed_actor_is_replaced() {
        let connector = Arc::new(MockConnector::new(7000));
        let registry = registry(&connector);

        let dead = registry.get_or_create(DESK_A).await.unwrap();
        let lost_link = connector.link(DESK_A).unwrap();
        lost_link.drop_subscription();

        for _ in 0..100 {
            if dead.state() == DeskState::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(dead.state(), DeskState::Failed);

        assert_eq!(registry.read_height(DESK_A).await.unwrap(), 7000);

        assert_eq!(connector.connects(), 2);
        assert_eq!(lost_link.count(LinkCall::Close), 1);
        assert_eq!(registry.list(), vec![(DESK_A.to_string(), DeskState::Running)]);
    }

    #[tokio::test]
    async fn test_move_to_returns_height_after_move() {
        let connector = Arc::new(MockConnector::new(7000));
        let registry = registry(&connector);

        let height = registry.move_to(DESK_A, 7004, MoveScope::new()).await.unwrap();

        assert_eq!(height, 7000);
    }

    #[tokio::test]
    async fn test_move_to_propagates_invalid_height() {
        let connector = Arc::new(MockConnector::new(7000));
        let registry = registry(&connector);

        let result = registry.move_to(DESK_A, 20000, MoveScope::new()).await;

        assert!(matches!(result, Err(DeskError::InvalidHeight { height: 20000, .. })));
    }

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe_through_registry() {
        let connector = Arc::new(MockConnector::new(7000));
        let registry = registry(&connector);

        let (tx, mut rx) = mpsc::channel(4);
        let id = registry.subscribe(DESK_A, tx).await.unwrap();

        let link = connector.link(DESK_A).unwrap();
        link.notify(7600).await;
        assert_eq!(rx.recv().await, Some(7600));

        registry.unsubscribe(DESK_A, id).await.unwrap();
        let actor = registry.get_or_create(DESK_A).await.unwrap();
        assert_eq!(actor.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_close_all_is_best_effort() {
        let connector = Arc::new(MockConnector::new(7000));
        let registry = registry(&connector);

        registry.get_or_create(DESK_A).await.unwrap();
        registry.get_or_create(DESK_B).await.unwrap();
        connector.link(DESK_A).unwrap().fail_close(true);

        let result = registry.close_all().await;

        assert!(matches!(result, Err(DeskError::Transport(_))));
        for (_, link) in connector.links() {
            assert_eq!(link.count(LinkCall::Close), 1);
        }
        assert!(registry.list().iter().all(|(_, state)| *state == DeskState::Stopped));
    }

    #[tokio::test]
    async fn test_close_all_with_no_desks() {
        let connector = Arc::new(MockConnector::new(7000));
        let registry = registry(&connector);

        registry.close_all().await.unwrap();
    }
}
