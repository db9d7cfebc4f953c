use super::{ConnectionState, Connector, Handle, LinkStatus, TcpConnector};
use crate::config::{PoolConfig, PoolOverrides};
use crate::error::StoreResult;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

/// Owns the single live [`Handle`] for one store endpoint.
///
/// Data operations only take the `current` read lock on the fast path.
/// Lifecycle changes (connect, reconfigure, disconnect) are serialized behind
/// an async mutex so concurrent first callers trigger exactly one connect.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    /// Environment layer, captured once at construction
    env: PoolOverrides,
    lifecycle: AsyncMutex<Lifecycle>,
    current: RwLock<Option<Active>>,
    state: Mutex<ConnectionState>,
}

struct Lifecycle {
    explicit: PoolOverrides,
    generation: u64,
}

struct Active {
    handle: Handle,
    config: PoolConfig,
}

impl ConnectionManager {
    /// TCP manager configured from the process environment
    pub fn from_env() -> StoreResult<Self> {
        Self::new(TcpConnector)
    }

    /// Manager over `connector`, with the environment layer read now
    pub fn new(connector: impl Connector) -> StoreResult<Self> {
        Ok(Self::with_layers(Arc::new(connector), PoolOverrides::from_env()?))
    }

    /// Manager with an explicit environment layer instead of the process one
    pub fn with_layers(connector: Arc<dyn Connector>, env: PoolOverrides) -> Self {
        ConnectionManager {
            connector,
            env,
            lifecycle: AsyncMutex::new(Lifecycle {
                explicit: PoolOverrides::default(),
                generation: 0,
            }),
            current: RwLock::new(None),
            state: Mutex::new(ConnectionState::Uninitialized),
        }
    }

    /// Connect now unless the effective configuration is lazy.
    pub async fn start(&self) -> StoreResult<()> {
        let lazy = {
            let lifecycle = self.lifecycle.lock().await;
            self.resolve(&lifecycle.explicit)?.lazy_connect
        };
        if lazy {
            debug!("lazy connect enabled, deferring until first use");
            return Ok(());
        }
        self.handle().await.map(|_| ())
    }

    pub async fn handle(&self) -> StoreResult<Handle> {
        self.handle_with(None).await
    }

    /// Return the live handle, initializing one if there is none.
    ///
    /// `overrides` replace the explicit layer only when an initialization
    /// actually happens; a live handle is returned as is. A link that is
    /// reconnecting in the background still counts as live.
    pub async fn handle_with(&self, overrides: Option<&PoolOverrides>) -> StoreResult<Handle> {
        if let Some(handle) = self.live_handle() {
            return Ok(handle);
        }

        let mut lifecycle = self.lifecycle.lock().await;
        // Another caller may have connected while we waited for the lock
        if let Some(handle) = self.live_handle() {
            return Ok(handle);
        }
        if let Some(overrides) = overrides {
            lifecycle.explicit = overrides.clone();
        }
        self.initialize(&mut lifecycle).await
    }

    /// Tear down the current handle and initialize with new explicit overrides
    pub async fn reconfigure(&self, overrides: PoolOverrides) -> StoreResult<Handle> {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Err(err) = self.shutdown_current().await {
            warn!(error = %err, "previous connection did not close cleanly");
        }
        lifecycle.explicit = overrides;
        self.initialize(&mut lifecycle).await
    }

    /// Graceful QUIT if connected. Leaves no handle behind even when QUIT
    /// fails; the failure is still returned.
    pub async fn disconnect(&self) -> StoreResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.shutdown_current().await
    }

    /// Lifecycle state. A `Ready` manager whose link has dropped reports
    /// `Disconnected`.
    pub fn state(&self) -> ConnectionState {
        let state = *self.state.lock();
        if state != ConnectionState::Ready {
            return state;
        }
        match self.current.read().as_ref().map(|active| active.handle.status()) {
            Some(LinkStatus::Ready) => ConnectionState::Ready,
            _ => ConnectionState::Disconnected,
        }
    }

    /// Configuration the current handle was created with
    pub fn current_config(&self) -> Option<PoolConfig> {
        self.current.read().as_ref().map(|active| active.config.clone())
    }

    fn live_handle(&self) -> Option<Handle> {
        self.current
            .read()
            .as_ref()
            .filter(|active| active.handle.status() != LinkStatus::Closed)
            .map(|active| active.handle.clone())
    }

    fn resolve(&self, explicit: &PoolOverrides) -> StoreResult<PoolConfig> {
        PoolConfig::resolve(&[&self.env, explicit])
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    async fn initialize(&self, lifecycle: &mut Lifecycle) -> StoreResult<Handle> {
        let stale = self.current.write().take();
        if let Some(stale) = stale {
            debug!(generation = stale.handle.generation(), "discarding closed handle");
        }

        let config = self.resolve(&lifecycle.explicit).map_err(|err| {
            error!(error = %err, "cannot resolve connection configuration");
            err
        })?;
        let endpoint = config.endpoint.redacted();

        self.set_state(ConnectionState::Connecting);
        info!(endpoint = %endpoint, "connecting");

        match self.connector.connect(&config).await {
            Ok(link) => {
                lifecycle.generation += 1;
                let handle = Handle::new(link, lifecycle.generation);
                *self.current.write() = Some(Active {
                    handle: handle.clone(),
                    config,
                });
                self.set_state(ConnectionState::Ready);
                info!(endpoint = %endpoint, generation = handle.generation(), "ready");
                Ok(handle)
            }
            Err(err) => {
                self.set_state(ConnectionState::Errored);
                error!(endpoint = %endpoint, error = %err, "connect failed");
                Err(err)
            }
        }
    }

    async fn shutdown_current(&self) -> StoreResult<()> {
        let taken = self.current.write().take();
        let Some(active) = taken else {
            let mut state = self.state.lock();
            if *state != ConnectionState::Uninitialized {
                *state = ConnectionState::Disconnected;
            }
            return Ok(());
        };

        let endpoint = active.config.endpoint.redacted();
        let generation = active.handle.generation();
        let result = match active.handle.status() {
            LinkStatus::Closed => Ok(()),
            LinkStatus::Ready | LinkStatus::Reconnecting => active.handle.quit().await,
        };
        self.set_state(ConnectionState::Disconnected);

        match &result {
            Ok(()) => info!(endpoint = %endpoint, generation, "disconnected"),
            Err(err) => {
                warn!(endpoint = %endpoint, generation, error = %err, "disconnected with error")
            }
        }
        result
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{MemoryConnector, MemoryStore};

    fn manager(store: &MemoryStore) -> ConnectionManager {
        ConnectionManager::with_layers(
            Arc::new(MemoryConnector::new(store.clone())),
            PoolOverrides::default().with_port(6390),
        )
    }

    #[tokio::test]
    async fn test_handle_is_reused_while_connected() {
        let store = MemoryStore::new();
        let manager = manager(&store);
        assert_eq!(manager.state(), ConnectionState::Uninitialized);

        let first = manager.handle().await.unwrap();
        let second = manager.handle().await.unwrap();
        assert!(first.same_link(&second));
        assert_eq!(first.generation(), 1);
        assert_eq!(store.connects(), 1);
        assert_eq!(manager.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_failed_connect_is_errored_then_retried() {
        let store = MemoryStore::new();
        store.refuse_connects(1);
        let manager = manager(&store);

        assert!(manager.handle().await.unwrap_err().is_retryable());
        assert_eq!(manager.state(), ConnectionState::Errored);

        let handle = manager.handle().await.unwrap();
        assert_eq!(handle.generation(), 1);
        assert_eq!(manager.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_disconnect_before_connect_is_noop() {
        let store = MemoryStore::new();
        let manager = manager(&store);
        manager.disconnect().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Uninitialized);
        assert_eq!(store.quits(), 0);
    }

    #[tokio::test]
    async fn test_missing_endpoint_is_configuration_error() {
        let store = MemoryStore::new();
        let manager = ConnectionManager::with_layers(
            Arc::new(MemoryConnector::new(store.clone())),
            PoolOverrides::default(),
        );
        let err = manager.handle().await.unwrap_err();
        assert!(matches!(err, crate::error::StoreError::Configuration(_)));
        assert_eq!(store.connects(), 0);
        assert_eq!(manager.state(), ConnectionState::Uninitialized);
    }
}
