use async_trait::async_trait;
use log::warn;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::{
    entities::*,
    errors::{ClientError, Result},
    serialization::{Codec, SerdeFormat},
    value_objects::*,
};

/// Topic management against one cluster
#[async_trait]
pub trait TopicAdmin: Send + Sync {
    async fn create_topic(&self, topic: &NewTopic, timeout: Duration) -> Result<(), ClientError>;

    async fn delete_topic(&self, topic: &str, timeout: Duration) -> Result<(), ClientError>;

    /// Metadata for every topic and broker. Never triggers topic auto-creation.
    async fn fetch_metadata(&self, timeout: Duration) -> Result<ClusterMetadata, ClientError>;

    async fn describe_topic_config(
        &self,
        topic: &str,
        timeout: Duration,
    ) -> Result<BTreeMap<String, String>, ClientError>;

    /// Sets the given entries, leaving other dynamic overrides in place
    async fn alter_topic_config(
        &self,
        topic: &str,
        config: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<(), ClientError>;
}

/// Consumer group administration against one cluster
#[async_trait]
pub trait GroupAdmin: Send + Sync {
    async fn list_groups(&self, timeout: Duration) -> Result<Vec<ConsumerGroup>, ClientError>;

    /// Committed offsets of `group` on `partitions`, each with the partition's log end.
    /// Partitions the group never committed on are left out.
    async fn group_offsets(
        &self,
        group: &str,
        partitions: &[TopicPartition],
        timeout: Duration,
    ) -> Result<Vec<GroupOffset>, ClientError>;

    async fn delete_group(&self, group: &str, timeout: Duration) -> Result<(), ClientError>;
}

/// Shared producer; safe for concurrent sends
#[async_trait]
pub trait RecordProducer: Send + Sync {
    /// Sends one record and waits for its acknowledgment
    async fn send(
        &self,
        record: OutgoingRecord,
        timeout: Duration,
    ) -> Result<DeliveryReport, ClientError>;

    async fn flush(&self, timeout: Duration) -> Result<(), ClientError>;
}

/// A private consumer owned by exactly one consume call
#[async_trait]
pub trait RecordConsumer: Send {
    /// Pins the start offset of every partition before returning. For
    /// [`StartPosition::Latest`] that is the log end as of this call.
    async fn assign(
        &mut self,
        partitions: &[TopicPartition],
        start: StartPosition,
        timeout: Duration,
    ) -> Result<(), ClientError>;

    /// Waits at most `timeout` for the next record; `None` when nothing arrived
    async fn poll(&mut self, timeout: Duration) -> Result<Option<IncomingRecord>, ClientError>;

    /// Releases the assignment and any group/session resources
    async fn close(&mut self);
}

pub trait ConsumerFactory: Send + Sync {
    fn create_consumer(&self) -> Result<Box<dyn RecordConsumer>, ClientError>;
}

/// The client set built for one cluster
#[derive(Clone)]
pub struct ClusterClients {
    pub admin: Arc<dyn TopicAdmin>,
    pub groups: Arc<dyn GroupAdmin>,
    pub producer: Arc<dyn RecordProducer>,
    pub consumers: Arc<dyn ConsumerFactory>,
}

/// Per-cluster behaviour taken from configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterSettings {
    pub key_format: SerdeFormat,
    pub value_format: SerdeFormat,
    pub hide_internal_topics: bool,
}

/// Clients bound to one cluster, shared by every in-flight request for it
pub struct ClusterHandle {
    name: String,
    clients: ClusterClients,
    settings: ClusterSettings,
}

impl std::fmt::Debug for ClusterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterHandle")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ClusterHandle {
    pub fn new(name: impl Into<String>, clients: ClusterClients, settings: ClusterSettings) -> Self {
        Self {
            name: name.into(),
            clients,
            settings,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn admin(&self) -> &dyn TopicAdmin {
        self.clients.admin.as_ref()
    }

    pub fn groups(&self) -> &dyn GroupAdmin {
        self.clients.groups.as_ref()
    }

    pub fn producer(&self) -> &dyn RecordProducer {
        self.clients.producer.as_ref()
    }

    pub fn consumers(&self) -> &dyn ConsumerFactory {
        self.clients.consumers.as_ref()
    }

    pub fn key_codec(&self) -> &'static dyn Codec {
        self.settings.key_format.codec()
    }

    pub fn value_codec(&self) -> &'static dyn Codec {
        self.settings.value_format.codec()
    }

    pub fn hides_internal_topics(&self) -> bool {
        self.settings.hide_internal_topics
    }

    /// Flushes pending produce requests; the clients close once the last reference drops
    pub async fn shutdown(&self, timeout: Duration) {
        if let Err(e) = self.clients.producer.flush(timeout).await {
            warn!("Failed to flush producer for cluster '{}': {}", self.name, e);
        }
    }
}

/// Resolves cluster names to their shared handles
#[async_trait]
pub trait ClusterResolver: Send + Sync {
    async fn resolve(&self, cluster: &str) -> Result<Arc<ClusterHandle>>;

    /// Configured clusters mapped to their broker addresses
    fn clusters(&self) -> BTreeMap<String, Vec<String>>;

    async fn shutdown(&self);
}
