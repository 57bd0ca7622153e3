#![allow(dead_code)]

use kafka_gateway::application::KafkaOperations;
use kafka_gateway::infrastructure::{GatewayConfig, InMemoryClientFactory, InMemoryCluster};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const CLUSTER: &str = "local";

/// Operations wired to an in-memory cluster, with the handles tests poke at directly
pub struct Harness {
    pub operations: KafkaOperations,
    pub factory: Arc<InMemoryClientFactory>,
    pub cluster: InMemoryCluster,
}

pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::single(CLUSTER, vec!["localhost:9092".to_string()]);
    config.timeouts.consume_timeout_ms = 1_000;
    config.timeouts.poll_interval_ms = 50;
    config
}

pub fn harness() -> Harness {
    harness_with(test_config(), InMemoryCluster::new(3))
}

pub fn harness_with(config: GatewayConfig, cluster: InMemoryCluster) -> Harness {
    let factory = Arc::new(InMemoryClientFactory::new(1).with_cluster(CLUSTER, cluster.clone()));
    let operations = kafka_gateway::operations(&config, factory.clone());
    Harness {
        operations,
        factory,
        cluster,
    }
}

/// Polls `condition` every `interval` until it holds or `timeout` elapses
pub async fn await_condition<F, Fut>(timeout: Duration, interval: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}
