use chrono::Utc;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

use super::{
    entities::*,
    errors::*,
    ports::{ClusterHandle, RecordConsumer},
    serialization::{Codec, CodecError, MessageField, SerdeFormat},
    translator::{translate, Operation},
    value_objects::*,
};

/// Upper bounds for every broker wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceTimeouts {
    pub admin: Duration,
    pub produce: Duration,
    /// Total time budget of one consume call
    pub consume: Duration,
    /// Longest single poll inside a consume call
    pub poll_interval: Duration,
}

impl Default for ServiceTimeouts {
    fn default() -> Self {
        Self {
            admin: Duration::from_secs(10),
            produce: Duration::from_secs(10),
            consume: Duration::from_secs(3),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Service for topic administration
pub struct TopicAdminService {
    timeouts: ServiceTimeouts,
}

impl TopicAdminService {
    pub fn new(timeouts: ServiceTimeouts) -> Self {
        Self { timeouts }
    }

    /// Submit a topic creation. Returns once the controller accepted it; the topic may
    /// take a moment to show up in listings.
    pub async fn create_topic(&self, cluster: &ClusterHandle, topic: NewTopic) -> Result<()> {
        debug!(
            "Creating topic {} on {} ({} partitions, replication {})",
            topic.name,
            cluster.name(),
            topic.partitions,
            topic.replication_factor
        );

        cluster
            .admin()
            .create_topic(&topic, self.timeouts.admin)
            .await
            .map_err(|e| translate(Operation::CreateTopic, topic.name.as_str(), e))?;

        info!("Created topic {} on cluster {}", topic.name, cluster.name());
        Ok(())
    }

    pub async fn delete_topic(&self, cluster: &ClusterHandle, topic: &TopicName) -> Result<()> {
        cluster
            .admin()
            .delete_topic(topic.as_str(), self.timeouts.admin)
            .await
            .map_err(|e| translate(Operation::DeleteTopic, topic.as_str(), e))?;

        info!("Deleted topic {} on cluster {}", topic, cluster.name());
        Ok(())
    }

    pub async fn list_topics(&self, cluster: &ClusterHandle) -> Result<TopicList> {
        let metadata = self.metadata(cluster, Operation::ListTopics).await?;

        let topics = metadata
            .topics
            .into_iter()
            .map(|t| t.name)
            .filter(|name| !(cluster.hides_internal_topics() && is_internal_topic(name)))
            .collect();

        let list = TopicList::new(topics);
        debug!("Cluster {} has {} visible topics", cluster.name(), list.topics.len());
        Ok(list)
    }

    pub async fn describe_topic(&self, cluster: &ClusterHandle, topic: &TopicName) -> Result<TopicInfo> {
        let metadata = self.metadata(cluster, Operation::DescribeTopic).await?;
        let topic_metadata = metadata
            .topics
            .into_iter()
            .find(|t| t.name == topic.as_str())
            .ok_or_else(|| {
                ApiError::unknown_topic(topic.as_str(), FailureCode::UnknownTopicOrPartition.name())
            })?;

        let configuration = cluster
            .admin()
            .describe_topic_config(topic.as_str(), self.timeouts.admin)
            .await
            .map_err(|e| translate(Operation::DescribeTopic, topic.as_str(), e))?;

        Ok(TopicInfo::from_metadata(topic_metadata, configuration))
    }

    pub async fn update_topic_config(
        &self,
        cluster: &ClusterHandle,
        topic: &TopicName,
        config: &BTreeMap<String, String>,
    ) -> Result<()> {
        cluster
            .admin()
            .alter_topic_config(topic.as_str(), config, self.timeouts.admin)
            .await
            .map_err(|e| translate(Operation::UpdateTopicConfig, topic.as_str(), e))?;

        info!(
            "Updated {} config entries of topic {} on cluster {}",
            config.len(),
            topic,
            cluster.name()
        );
        Ok(())
    }

    pub async fn list_brokers(&self, cluster: &ClusterHandle) -> Result<Vec<BrokerInfo>> {
        let mut brokers = self.metadata(cluster, Operation::ListBrokers).await?.brokers;
        brokers.sort_by_key(|b| b.id);
        Ok(brokers)
    }

    async fn metadata(&self, cluster: &ClusterHandle, operation: Operation) -> Result<ClusterMetadata> {
        cluster
            .admin()
            .fetch_metadata(self.timeouts.admin)
            .await
            .map_err(|e| translate(operation, cluster.name(), e))
    }
}

/// Service for consumer group administration
pub struct GroupAdminService {
    timeouts: ServiceTimeouts,
}

impl GroupAdminService {
    pub fn new(timeouts: ServiceTimeouts) -> Self {
        Self { timeouts }
    }

    /// Every group the cluster knows, sorted by id
    pub async fn list_groups(&self, cluster: &ClusterHandle) -> Result<Vec<ConsumerGroup>> {
        let mut groups = cluster
            .groups()
            .list_groups(self.timeouts.admin)
            .await
            .map_err(|e| translate(Operation::ListGroups, cluster.name(), e))?;
        groups.sort_by(|a, b| a.group_id.cmp(&b.group_id));
        Ok(groups)
    }

    /// Groups with a committed offset on at least one partition of `topic`
    pub async fn groups_for_topic(&self, cluster: &ClusterHandle, topic: &TopicName) -> Result<Vec<ConsumerGroup>> {
        let metadata = cluster
            .admin()
            .fetch_metadata(self.timeouts.admin)
            .await
            .map_err(|e| translate(Operation::ListGroups, cluster.name(), e))?;
        let partitions = metadata
            .topic(topic.as_str())
            .map(partitions_of)
            .ok_or_else(|| ApiError::unknown_topic(topic.as_str(), FailureCode::UnknownTopicOrPartition.name()))?;

        let mut consuming = Vec::new();
        for group in self.list_groups(cluster).await? {
            let offsets = cluster
                .groups()
                .group_offsets(&group.group_id, &partitions, self.timeouts.admin)
                .await
                .map_err(|e| translate(Operation::DescribeGroup, &group.group_id, e))?;
            if !offsets.is_empty() {
                consuming.push(group);
            }
        }
        debug!("{} groups consume {} on cluster {}", consuming.len(), topic, cluster.name());
        Ok(consuming)
    }

    /// Committed offsets and lag of `group` across every non-internal topic
    pub async fn group_offsets(&self, cluster: &ClusterHandle, group: &str) -> Result<Vec<GroupOffset>> {
        if !self.list_groups(cluster).await?.iter().any(|g| g.group_id == group) {
            return Err(ApiError::unknown_group(group, FailureCode::GroupIdNotFound.name()));
        }

        let metadata = cluster
            .admin()
            .fetch_metadata(self.timeouts.admin)
            .await
            .map_err(|e| translate(Operation::DescribeGroup, group, e))?;
        let partitions: Vec<_> = metadata
            .topics
            .iter()
            .filter(|t| !is_internal_topic(&t.name))
            .flat_map(partitions_of)
            .collect();

        let mut offsets = cluster
            .groups()
            .group_offsets(group, &partitions, self.timeouts.admin)
            .await
            .map_err(|e| translate(Operation::DescribeGroup, group, e))?;
        offsets.sort_by(|a, b| (&a.topic, a.partition).cmp(&(&b.topic, b.partition)));
        Ok(offsets)
    }

    pub async fn delete_group(&self, cluster: &ClusterHandle, group: &str) -> Result<()> {
        cluster
            .groups()
            .delete_group(group, self.timeouts.admin)
            .await
            .map_err(|e| translate(Operation::DeleteGroup, group, e))?;

        info!("Deleted consumer group {} on cluster {}", group, cluster.name());
        Ok(())
    }
}

fn partitions_of(topic: &TopicMetadata) -> Vec<TopicPartition> {
    topic
        .partitions
        .iter()
        .map(|p| TopicPartition::new(topic.name.as_str(), p.partition))
        .collect()
}

/// Service for producing single records
pub struct ProducerService {
    timeouts: ServiceTimeouts,
}

impl ProducerService {
    pub fn new(timeouts: ServiceTimeouts) -> Self {
        Self { timeouts }
    }

    /// Encode and send exactly one record, waiting for the configured acknowledgment.
    /// Failures are returned as-is; retrying is left to the caller.
    pub async fn produce(&self, cluster: &ClusterHandle, message: OutgoingMessage) -> Result<DeliveryReport> {
        let topic = message.topic.as_str();
        let encode = |codec: &dyn Codec, field: MessageField, text: Option<&str>| -> Result<Option<Vec<u8>>> {
            text.map(|t| codec.serialize(field, t))
                .transpose()
                .map_err(|e| translate(Operation::Produce, topic, e.into()))
        };

        let record = OutgoingRecord {
            topic: topic.to_string(),
            partition: message.partition,
            key: encode(cluster.key_codec(), MessageField::Key, message.key.as_deref())?,
            payload: encode(cluster.value_codec(), MessageField::Payload, message.payload.as_deref())?,
            headers: message.headers,
            timestamp: Utc::now().timestamp_millis(),
        };

        let report = cluster
            .producer()
            .send(record, self.timeouts.produce)
            .await
            .map_err(|e| translate(Operation::Produce, topic, e))?;

        debug!(
            "Produced to {}:{} at offset {} on cluster {}",
            report.topic,
            report.partition,
            report.offset,
            cluster.name()
        );
        Ok(report)
    }
}

/// Service for bounded, short-lived consumption
pub struct ConsumerService {
    timeouts: ServiceTimeouts,
}

impl ConsumerService {
    pub fn new(timeouts: ServiceTimeouts) -> Self {
        Self { timeouts }
    }

    /// Collect up to `query.limit` records from the requested topics within the consume
    /// time budget. Fewer records, including none, is a successful result.
    pub async fn consume(&self, cluster: &ClusterHandle, query: ConsumeQuery) -> Result<Vec<ConsumedMessage>> {
        let subject = query.describe_topics();
        let partitions = self.assignment(cluster, &query).await?;

        let mut consumer = cluster
            .consumers()
            .create_consumer()
            .map_err(|e| translate(Operation::Consume, &subject, e))?;

        let outcome = self
            .poll_until_limit(cluster, consumer.as_mut(), &query, &partitions)
            .await;
        consumer.close().await;

        let messages = outcome?;
        debug!(
            "Consumed {} of at most {} records from {} on cluster {}",
            messages.len(),
            query.limit,
            subject,
            cluster.name()
        );
        Ok(messages)
    }

    /// Every partition of every requested topic; fails if a topic does not exist
    async fn assignment(&self, cluster: &ClusterHandle, query: &ConsumeQuery) -> Result<Vec<TopicPartition>> {
        let metadata = cluster
            .admin()
            .fetch_metadata(self.timeouts.admin)
            .await
            .map_err(|e| translate(Operation::Consume, &query.describe_topics(), e))?;

        let mut partitions = Vec::new();
        for topic in &query.topics {
            let topic_metadata = metadata.topic(topic.as_str()).ok_or_else(|| {
                ApiError::unknown_topic(topic.as_str(), FailureCode::UnknownTopicOrPartition.name())
            })?;
            partitions.extend(partitions_of(topic_metadata));
        }
        Ok(partitions)
    }

    async fn poll_until_limit(
        &self,
        cluster: &ClusterHandle,
        consumer: &mut dyn RecordConsumer,
        query: &ConsumeQuery,
        partitions: &[TopicPartition],
    ) -> Result<Vec<ConsumedMessage>> {
        let subject = query.describe_topics();
        consumer
            .assign(partitions, query.start, self.timeouts.admin)
            .await
            .map_err(|e| translate(Operation::Consume, &subject, e))?;

        let deadline = Instant::now() + self.timeouts.consume;
        let mut messages = Vec::new();

        while messages.len() < query.limit {
            let now = Instant::now();
            if now >= deadline {
                debug!("Consume budget for {} exhausted after {} records", subject, messages.len());
                break;
            }
            let slice = (deadline - now).min(self.timeouts.poll_interval);

            let record = match consumer.poll(slice).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Polling {} on cluster {} failed: {}", subject, cluster.name(), e);
                    return Err(translate(Operation::Consume, &subject, e));
                }
            };

            let message = decode(cluster, record).map_err(|e| translate(Operation::Consume, &subject, e))?;
            if query.accepts(&message) {
                messages.push(message);
            }
        }

        Ok(messages)
    }
}

fn decode(cluster: &ClusterHandle, record: IncomingRecord) -> Result<ConsumedMessage, ClientError> {
    let key = record
        .key
        .map(|bytes| cluster.key_codec().deserialize(MessageField::Key, &bytes))
        .transpose()?;
    let value = record
        .payload
        .map(|bytes| cluster.value_codec().deserialize(MessageField::Payload, &bytes))
        .transpose()?;
    let header_codec = SerdeFormat::String.codec();
    let headers = record
        .headers
        .into_iter()
        .map(|(name, value)| Ok((name, header_codec.deserialize(MessageField::Headers, &value)?)))
        .collect::<Result<BTreeMap<_, _>, CodecError>>()?;

    Ok(ConsumedMessage {
        topic: record.topic,
        partition: record.partition,
        offset: record.offset,
        timestamp: record.timestamp,
        key,
        value,
        headers,
    })
}
