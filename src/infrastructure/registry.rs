use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::domain::{
    translate, ApiError, ClientError, ClusterClients, ClusterHandle, ClusterResolver, Operation, Result,
};
use crate::infrastructure::config::{ClusterConfig, GatewayConfig};

/// Builds the client set for one cluster
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self, config: &ClusterConfig) -> Result<ClusterClients, ClientError>;
}

/// Lazily connects to configured clusters and shares one handle per cluster.
///
/// Concurrent first requests for the same cluster wait on a single connect; a failed
/// connect is not cached, so the next request tries again.
pub struct ClusterRegistry {
    configs: BTreeMap<String, ClusterConfig>,
    factory: Arc<dyn ClientFactory>,
    handles: DashMap<String, Arc<OnceCell<Arc<ClusterHandle>>>>,
    closed: AtomicBool,
    shutdown_timeout: Duration,
}

impl ClusterRegistry {
    pub fn new(config: &GatewayConfig, factory: Arc<dyn ClientFactory>) -> Self {
        let configs = config
            .clusters
            .iter()
            .map(|cluster| (cluster.name.clone(), cluster.clone()))
            .collect();
        Self {
            configs,
            factory,
            handles: DashMap::new(),
            closed: AtomicBool::new(false),
            shutdown_timeout: config.timeouts.shutdown_timeout(),
        }
    }

    pub fn cluster_names(&self) -> Vec<String> {
        self.configs.keys().cloned().collect()
    }

    /// Number of clusters with a live handle
    pub fn connected_count(&self) -> usize {
        self.handles.iter().filter(|entry| entry.value().initialized()).count()
    }

    async fn connect(&self, config: &ClusterConfig) -> Result<Arc<ClusterHandle>> {
        info!("Connecting to cluster '{}' at {}", config.name, config.bootstrap_servers());
        let clients = self
            .factory
            .connect(config)
            .await
            .map_err(|e| translate(Operation::Connect, &config.name, e))?;
        Ok(Arc::new(ClusterHandle::new(config.name.clone(), clients, config.settings())))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(ApiError::registry_closed())
        } else {
            Ok(())
        }
    }

    /// An already connected handle, as long as shutdown has not started
    fn cached(&self, cluster: &str) -> Result<Option<Arc<ClusterHandle>>> {
        let handle = self.handles.get(cluster).and_then(|cell| cell.get().cloned());
        if handle.is_some() {
            self.ensure_open()?;
        }
        Ok(handle)
    }
}

#[async_trait]
impl ClusterResolver for ClusterRegistry {
    async fn resolve(&self, cluster: &str) -> Result<Arc<ClusterHandle>> {
        self.ensure_open()?;
        let config = self
            .configs
            .get(cluster)
            .ok_or_else(|| ApiError::unknown_cluster(cluster))?;

        if let Some(handle) = self.cached(cluster)? {
            return Ok(handle);
        }

        // Clone the cell out so no map guard is held across the await
        let cell = self.handles.entry(cluster.to_string()).or_default().value().clone();
        let handle = cell.get_or_try_init(|| self.connect(config)).await?.clone();

        // Shutdown may have drained the map while we were connecting
        if self.closed.load(Ordering::SeqCst) {
            handle.shutdown(self.shutdown_timeout).await;
            return Err(ApiError::registry_closed());
        }
        debug!("Resolved cluster '{}'", cluster);
        Ok(handle)
    }

    fn clusters(&self) -> BTreeMap<String, Vec<String>> {
        self.configs
            .iter()
            .map(|(name, config)| (name.clone(), config.brokers.clone()))
            .collect()
    }

    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let cells: Vec<_> = self.handles.iter().map(|entry| entry.value().clone()).collect();
        self.handles.clear();

        for handle in cells.iter().filter_map(|cell| cell.get()) {
            info!("Closing clients of cluster '{}'", handle.name());
            handle.shutdown(self.shutdown_timeout).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ErrorKind, FailureCode};
    use crate::infrastructure::memory::InMemoryClientFactory;
    use std::sync::atomic::AtomicUsize;

    fn gateway_config() -> GatewayConfig {
        GatewayConfig::single("local", vec!["localhost:9092".to_string()])
    }

    struct FlakyFactory {
        attempts: AtomicUsize,
        inner: InMemoryClientFactory,
    }

    #[async_trait]
    impl ClientFactory for FlakyFactory {
        async fn connect(&self, config: &ClusterConfig) -> Result<ClusterClients, ClientError> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(ClientError::kafka(FailureCode::AllBrokersDown, "all brokers down"));
            }
            self.inner.connect(config).await
        }
    }

    #[tokio::test]
    async fn reuses_the_handle_after_first_connect() {
        let factory = Arc::new(InMemoryClientFactory::default());
        let registry = ClusterRegistry::new(&gateway_config(), factory.clone());

        let first = registry.resolve("local").await.unwrap();
        let second = registry.resolve("local").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.connect_count(), 1);
        assert_eq!(registry.connected_count(), 1);
    }

    #[tokio::test]
    async fn unknown_cluster_never_connects() {
        let factory = Arc::new(InMemoryClientFactory::default());
        let registry = ClusterRegistry::new(&gateway_config(), factory.clone());

        let err = registry.resolve("staging").await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::UnknownCluster);
        assert_eq!(factory.connect_count(), 0);
    }

    #[tokio::test]
    async fn failed_connect_is_retried_on_next_resolve() {
        let factory = Arc::new(FlakyFactory {
            attempts: AtomicUsize::new(0),
            inner: InMemoryClientFactory::default(),
        });
        let registry = ClusterRegistry::new(&gateway_config(), factory);

        let err = registry.resolve("local").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BrokerUnavailable);
        assert_eq!(err.root_cause, "_ALL_BROKERS_DOWN");

        assert!(registry.resolve("local").await.is_ok());
    }

    #[tokio::test]
    async fn resolve_fails_after_shutdown() {
        let registry = ClusterRegistry::new(&gateway_config(), Arc::new(InMemoryClientFactory::default()));
        registry.resolve("local").await.unwrap();

        registry.shutdown().await;
        let err = registry.resolve("local").await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(err.root_cause, "gateway.RegistryClosed");
        assert_eq!(registry.connected_count(), 0);
    }

    #[tokio::test]
    async fn cached_handle_is_withheld_once_closing_starts() {
        let registry = ClusterRegistry::new(&gateway_config(), Arc::new(InMemoryClientFactory::default()));
        registry.resolve("local").await.unwrap();
        assert!(registry.cached("local").unwrap().is_some());

        // Flag flipped, handles not yet drained
        registry.closed.store(true, Ordering::SeqCst);
        let err = registry.cached("local").unwrap_err();

        assert_eq!(err.root_cause, "gateway.RegistryClosed");
        assert_eq!(registry.connected_count(), 1);
    }
}
