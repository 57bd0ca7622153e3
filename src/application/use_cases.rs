use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::{
    ApiError, BrokerInfo, ClusterResolver, ConsumerGroup, ConsumerService, ErrorKind, GroupAdminService, GroupOffset,
    ProducerService, Result, ServiceTimeouts, TopicAdminService, TopicInfo, TopicList, TopicName,
};

use super::dto::*;

/// Entry point for every gateway operation.
///
/// Each call resolves the named cluster through the registry, runs the matching
/// service, and returns either a response or exactly one [`ApiError`].
pub struct KafkaOperations {
    resolver: Arc<dyn ClusterResolver>,
    admin: TopicAdminService,
    groups: GroupAdminService,
    producer: ProducerService,
    consumer: ConsumerService,
}

impl KafkaOperations {
    pub fn new(resolver: Arc<dyn ClusterResolver>, timeouts: ServiceTimeouts) -> Self {
        Self {
            resolver,
            admin: TopicAdminService::new(timeouts),
            groups: GroupAdminService::new(timeouts),
            producer: ProducerService::new(timeouts),
            consumer: ConsumerService::new(timeouts),
        }
    }

    pub fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Configured cluster names mapped to their broker addresses
    pub fn clusters(&self) -> BTreeMap<String, Vec<String>> {
        self.resolver.clusters()
    }

    pub async fn list_topics(&self, cluster: &str) -> Result<TopicList> {
        let handle = self.resolver.resolve(cluster).await?;
        self.admin.list_topics(&handle).await
    }

    pub async fn describe_topic(&self, cluster: &str, topic: &str) -> Result<TopicInfo> {
        let topic = topic_name(topic, ErrorKind::InvalidRequest)?;
        let handle = self.resolver.resolve(cluster).await?;
        self.admin.describe_topic(&handle, &topic).await
    }

    pub async fn create_topic(&self, cluster: &str, request: CreateTopicRequest) -> Result<()> {
        let topic = request.validate()?;
        let handle = self.resolver.resolve(cluster).await?;
        self.admin.create_topic(&handle, topic).await
    }

    pub async fn delete_topic(&self, cluster: &str, topic: &str) -> Result<()> {
        let topic = topic_name(topic, ErrorKind::InvalidRequest)?;
        let handle = self.resolver.resolve(cluster).await?;
        self.admin.delete_topic(&handle, &topic).await
    }

    pub async fn update_topic_config(&self, cluster: &str, request: UpdateTopicConfigRequest) -> Result<()> {
        let topic = request.validate()?;
        let handle = self.resolver.resolve(cluster).await?;
        self.admin.update_topic_config(&handle, &topic, &request.config).await
    }

    pub async fn list_brokers(&self, cluster: &str) -> Result<Vec<BrokerInfo>> {
        let handle = self.resolver.resolve(cluster).await?;
        self.admin.list_brokers(&handle).await
    }

    pub async fn list_consumer_groups(&self, cluster: &str) -> Result<Vec<ConsumerGroup>> {
        let handle = self.resolver.resolve(cluster).await?;
        self.groups.list_groups(&handle).await
    }

    pub async fn consumer_groups_for_topic(&self, cluster: &str, topic: &str) -> Result<Vec<ConsumerGroup>> {
        let topic = topic_name(topic, ErrorKind::InvalidRequest)?;
        let handle = self.resolver.resolve(cluster).await?;
        self.groups.groups_for_topic(&handle, &topic).await
    }

    /// Committed offsets and lag per partition
    pub async fn consumer_group_offsets(&self, cluster: &str, group: &str) -> Result<Vec<GroupOffset>> {
        let group = group_id(group)?;
        let handle = self.resolver.resolve(cluster).await?;
        self.groups.group_offsets(&handle, group).await
    }

    pub async fn delete_consumer_group(&self, cluster: &str, group: &str) -> Result<()> {
        let group = group_id(group)?;
        let handle = self.resolver.resolve(cluster).await?;
        self.groups.delete_group(&handle, group).await
    }

    pub async fn produce(&self, cluster: &str, request: ProducerRequest) -> Result<ProducerResponse> {
        let message = request.validate()?;
        let handle = self.resolver.resolve(cluster).await?;
        let report = self.producer.produce(&handle, message).await?;
        Ok(report.into())
    }

    pub async fn consume(&self, cluster: &str, request: ConsumerRequest) -> Result<ConsumerResponse> {
        let query = request.validate()?;
        let handle = self.resolver.resolve(cluster).await?;
        debug!(
            "Consuming up to {} records from {} on cluster {}",
            query.limit,
            query.describe_topics(),
            cluster
        );
        let messages = self.consumer.consume(&handle, query).await?;
        Ok(ConsumerResponse { messages })
    }

    /// Flushes and releases every cluster; later calls fail
    pub async fn shutdown(&self) {
        info!("Shutting down Kafka operations");
        self.resolver.shutdown().await;
    }
}

fn topic_name(name: &str, kind: ErrorKind) -> Result<TopicName> {
    TopicName::new(name).map_err(|e| {
        let mut fields = BTreeMap::new();
        fields.insert("topic".to_string(), e.to_string());
        ApiError::validation(kind, fields)
    })
}

fn group_id(group: &str) -> Result<&str> {
    if group.trim().is_empty() {
        let mut fields = BTreeMap::new();
        fields.insert("group".to_string(), "Group id cannot be empty".to_string());
        return Err(ApiError::validation(ErrorKind::InvalidRequest, fields));
    }
    Ok(group)
}
