//! Client ports backed by librdkafka.

use async_trait::async_trait;
use log::{debug, warn};
use rdkafka::admin::{
    AdminClient, AdminOptions, AlterConfig, ConfigSource, NewTopic as KafkaNewTopic, ResourceSpecifier,
    TopicReplication,
};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{
    root_cause, BrokerInfo, ClientError, ClusterClients, ClusterMetadata, ConsumerFactory, ConsumerGroup,
    DeliveryReport, FailureCode, GroupAdmin, GroupOffset, IncomingRecord, NewTopic, OutgoingRecord, PartitionInfo,
    RecordConsumer, RecordProducer, StartPosition, TopicAdmin, TopicMetadata, TopicPartition,
};
use crate::infrastructure::config::ClusterConfig;
use crate::infrastructure::registry::ClientFactory;

impl From<RDKafkaErrorCode> for FailureCode {
    fn from(code: RDKafkaErrorCode) -> Self {
        match code {
            RDKafkaErrorCode::UnknownTopicOrPartition
            | RDKafkaErrorCode::UnknownTopic
            | RDKafkaErrorCode::UnknownPartition => FailureCode::UnknownTopicOrPartition,
            RDKafkaErrorCode::TopicAlreadyExists => FailureCode::TopicAlreadyExists,
            RDKafkaErrorCode::InvalidTopic => FailureCode::InvalidTopic,
            RDKafkaErrorCode::InvalidPartitions => FailureCode::InvalidPartitions,
            RDKafkaErrorCode::InvalidReplicationFactor => FailureCode::InvalidReplicationFactor,
            RDKafkaErrorCode::InvalidReplicaAssignment => FailureCode::InvalidReplicaAssignment,
            RDKafkaErrorCode::InvalidConfig => FailureCode::InvalidConfig,
            RDKafkaErrorCode::PolicyViolation => FailureCode::PolicyViolation,
            RDKafkaErrorCode::InvalidRequest => FailureCode::InvalidRequest,
            RDKafkaErrorCode::TopicAuthorizationFailed => FailureCode::TopicAuthorizationFailed,
            RDKafkaErrorCode::ClusterAuthorizationFailed => FailureCode::ClusterAuthorizationFailed,
            RDKafkaErrorCode::NotController => FailureCode::NotController,
            RDKafkaErrorCode::RequestTimedOut => FailureCode::RequestTimedOut,
            RDKafkaErrorCode::BrokerNotAvailable => FailureCode::BrokerNotAvailable,
            RDKafkaErrorCode::LeaderNotAvailable => FailureCode::LeaderNotAvailable,
            RDKafkaErrorCode::NetworkException => FailureCode::NetworkException,
            RDKafkaErrorCode::BrokerTransportFailure => FailureCode::Transport,
            RDKafkaErrorCode::AllBrokersDown => FailureCode::AllBrokersDown,
            RDKafkaErrorCode::MessageTimedOut => FailureCode::MessageTimedOut,
            RDKafkaErrorCode::OperationTimedOut => FailureCode::OperationTimedOut,
            RDKafkaErrorCode::GroupIdNotFound => FailureCode::GroupIdNotFound,
            RDKafkaErrorCode::NonEmptyGroup => FailureCode::NonEmptyGroup,
            other => FailureCode::Other(format!("rdkafka.{:?}", other)),
        }
    }
}

fn client_error(error: KafkaError) -> ClientError {
    let code = match error.rdkafka_error_code() {
        Some(code) => FailureCode::from(code),
        None => {
            // Variant name only; the payload may carry record contents
            let debug = format!("{:?}", error);
            let variant = debug.split(['(', ' ']).next().unwrap_or("Unknown");
            FailureCode::Other(format!("rdkafka.{}", variant))
        }
    };
    ClientError::kafka(code, error.to_string())
}

fn code_error(code: RDKafkaErrorCode, subject: &str) -> ClientError {
    ClientError::kafka(FailureCode::from(code), format!("{}: {}", subject, code))
}

fn task_failed(error: tokio::task::JoinError) -> ClientError {
    ClientError::kafka(FailureCode::Other(root_cause::TASK_FAILED.to_string()), error.to_string())
}

fn client_config(properties: &BTreeMap<String, String>) -> ClientConfig {
    let mut config = ClientConfig::new();
    for (key, value) in properties {
        config.set(key, value);
    }
    config
}

fn admin_options(timeout: Duration) -> AdminOptions {
    AdminOptions::new()
        .request_timeout(Some(timeout))
        .operation_timeout(Some(timeout))
}

/// Connects real Kafka clusters
#[derive(Debug, Default)]
pub struct KafkaClientFactory;

#[async_trait]
impl ClientFactory for KafkaClientFactory {
    async fn connect(&self, config: &ClusterConfig) -> Result<ClusterClients, ClientError> {
        let properties = config.client_properties();

        let admin: Arc<AdminClient<DefaultClientContext>> =
            Arc::new(client_config(&properties).create().map_err(client_error)?);

        let producer: FutureProducer = client_config(&properties)
            .set("acks", config.acks.as_str())
            .create()
            .map_err(client_error)?;

        debug!("Created clients for cluster '{}'", config.name);
        Ok(ClusterClients {
            admin: Arc::new(KafkaAdmin { client: admin.clone() }),
            groups: Arc::new(KafkaGroupAdmin {
                client: admin,
                properties: properties.clone(),
            }),
            producer: Arc::new(KafkaProducer { producer }),
            consumers: Arc::new(KafkaConsumerFactory { properties }),
        })
    }
}

pub struct KafkaAdmin {
    client: Arc<AdminClient<DefaultClientContext>>,
}

impl KafkaAdmin {
    async fn topic_config_entries(
        &self,
        topic: &str,
        timeout: Duration,
    ) -> Result<Vec<rdkafka::admin::ConfigEntry>, ClientError> {
        let specifier = ResourceSpecifier::Topic(topic);
        let results = self
            .client
            .describe_configs([&specifier], &admin_options(timeout))
            .await
            .map_err(client_error)?;

        match results.into_iter().next() {
            Some(Ok(resource)) => Ok(resource.entries),
            Some(Err(code)) => Err(code_error(code, topic)),
            None => Err(code_error(RDKafkaErrorCode::UnknownTopicOrPartition, topic)),
        }
    }
}

#[async_trait]
impl TopicAdmin for KafkaAdmin {
    async fn create_topic(&self, topic: &NewTopic, timeout: Duration) -> Result<(), ClientError> {
        let mut new_topic = KafkaNewTopic::new(
            topic.name.as_str(),
            topic.partitions,
            TopicReplication::Fixed(topic.replication_factor),
        );
        for (key, value) in &topic.config {
            new_topic = new_topic.set(key, value);
        }

        let results = self
            .client
            .create_topics([&new_topic], &admin_options(timeout))
            .await
            .map_err(client_error)?;
        for result in results {
            result.map_err(|(name, code)| code_error(code, &name))?;
        }
        Ok(())
    }

    async fn delete_topic(&self, topic: &str, timeout: Duration) -> Result<(), ClientError> {
        let results = self
            .client
            .delete_topics(&[topic], &admin_options(timeout))
            .await
            .map_err(client_error)?;
        for result in results {
            result.map_err(|(name, code)| code_error(code, &name))?;
        }
        Ok(())
    }

    async fn fetch_metadata(&self, timeout: Duration) -> Result<ClusterMetadata, ClientError> {
        let client = self.client.clone();
        // All-topics request: asking for one topic by name can auto-create it
        let metadata = tokio::task::spawn_blocking(move || client.inner().fetch_metadata(None, timeout))
            .await
            .map_err(task_failed)?
            .map_err(client_error)?;

        let brokers = metadata
            .brokers()
            .iter()
            .map(|broker| BrokerInfo {
                id: broker.id(),
                host: broker.host().to_string(),
                port: broker.port(),
            })
            .collect();

        let topics = metadata
            .topics()
            .iter()
            .filter(|topic| topic.error().is_none())
            .map(|topic| TopicMetadata {
                name: topic.name().to_string(),
                partitions: topic
                    .partitions()
                    .iter()
                    .map(|partition| PartitionInfo {
                        partition: partition.id(),
                        leader: partition.leader(),
                        replicas: partition.replicas().to_vec(),
                        isr: partition.isr().to_vec(),
                    })
                    .collect(),
            })
            .collect();

        Ok(ClusterMetadata { brokers, topics })
    }

    async fn describe_topic_config(
        &self,
        topic: &str,
        timeout: Duration,
    ) -> Result<BTreeMap<String, String>, ClientError> {
        let entries = self.topic_config_entries(topic, timeout).await?;
        Ok(entries
            .into_iter()
            .filter(|entry| !entry.is_sensitive)
            .filter_map(|entry| entry.value.map(|value| (entry.name, value)))
            .collect())
    }

    async fn alter_topic_config(
        &self,
        topic: &str,
        config: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        // AlterConfigs replaces the whole override set, so carry the current overrides along
        let mut merged: BTreeMap<String, String> = self
            .topic_config_entries(topic, timeout)
            .await?
            .into_iter()
            .filter(|entry| matches!(entry.source, ConfigSource::DynamicTopic))
            .filter_map(|entry| entry.value.map(|value| (entry.name, value)))
            .collect();
        merged.extend(config.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut alter = AlterConfig::new(ResourceSpecifier::Topic(topic));
        for (key, value) in &merged {
            alter = alter.set(key, value);
        }

        let results = self
            .client
            .alter_configs([&alter], &admin_options(timeout))
            .await
            .map_err(client_error)?;
        for result in results {
            result.map_err(|(_, code)| code_error(code, topic))?;
        }
        Ok(())
    }
}

/// Group listing and deletion through the admin client; committed offsets through a
/// short-lived consumer that joins nothing
pub struct KafkaGroupAdmin {
    client: Arc<AdminClient<DefaultClientContext>>,
    properties: BTreeMap<String, String>,
}

#[async_trait]
impl GroupAdmin for KafkaGroupAdmin {
    async fn list_groups(&self, timeout: Duration) -> Result<Vec<ConsumerGroup>, ClientError> {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<ConsumerGroup>, ClientError> {
            let list = client.inner().fetch_group_list(None, timeout).map_err(client_error)?;
            Ok(list
                .groups()
                .iter()
                .map(|group| ConsumerGroup {
                    group_id: group.name().to_string(),
                    state: group.state().to_string(),
                    protocol_type: group.protocol_type().to_string(),
                    members: group.members().len(),
                })
                .collect())
        })
        .await
        .map_err(task_failed)?
    }

    async fn group_offsets(
        &self,
        group: &str,
        partitions: &[TopicPartition],
        timeout: Duration,
    ) -> Result<Vec<GroupOffset>, ClientError> {
        let mut config = client_config(&self.properties);
        config.set("group.id", group).set("enable.auto.commit", "false");
        let partitions = partitions.to_vec();

        tokio::task::spawn_blocking(move || -> Result<Vec<GroupOffset>, ClientError> {
            let consumer: BaseConsumer = config.create().map_err(client_error)?;
            let mut wanted = TopicPartitionList::with_capacity(partitions.len());
            for tp in &partitions {
                wanted.add_partition(&tp.topic, tp.partition);
            }
            let committed = consumer.committed_offsets(wanted, timeout).map_err(client_error)?;

            let mut offsets = Vec::new();
            for element in committed.elements() {
                if let Offset::Offset(position) = element.offset() {
                    let (_, high) = consumer
                        .fetch_watermarks(element.topic(), element.partition(), timeout)
                        .map_err(client_error)?;
                    offsets.push(GroupOffset::new(element.topic(), element.partition(), position, high));
                }
            }
            Ok(offsets)
        })
        .await
        .map_err(task_failed)?
    }

    async fn delete_group(&self, group: &str, timeout: Duration) -> Result<(), ClientError> {
        let results = self
            .client
            .delete_groups(&[group], &admin_options(timeout))
            .await
            .map_err(client_error)?;
        for result in results {
            result.map_err(|(name, code)| code_error(code, &name))?;
        }
        Ok(())
    }
}

pub struct KafkaProducer {
    producer: FutureProducer,
}

#[async_trait]
impl RecordProducer for KafkaProducer {
    async fn send(&self, record: OutgoingRecord, timeout: Duration) -> Result<DeliveryReport, ClientError> {
        let mut headers = OwnedHeaders::new_with_capacity(record.headers.len());
        for (name, value) in &record.headers {
            headers = headers.insert(Header {
                key: name,
                value: Some(value.as_str()),
            });
        }

        let mut future_record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(&record.topic)
            .timestamp(record.timestamp)
            .headers(headers);
        if let Some(key) = record.key.as_deref() {
            future_record = future_record.key(key);
        }
        if let Some(payload) = record.payload.as_deref() {
            future_record = future_record.payload(payload);
        }
        if let Some(partition) = record.partition {
            future_record = future_record.partition(partition);
        }

        let (partition, offset) = self
            .producer
            .send(future_record, Timeout::After(timeout))
            .await
            .map_err(|(error, _)| client_error(error))?;

        Ok(DeliveryReport {
            topic: record.topic,
            partition,
            offset,
            timestamp: record.timestamp,
        })
    }

    async fn flush(&self, timeout: Duration) -> Result<(), ClientError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(task_failed)?
            .map_err(client_error)
    }
}

/// Builds a throwaway consumer per consume call under a unique group id
pub struct KafkaConsumerFactory {
    properties: BTreeMap<String, String>,
}

impl ConsumerFactory for KafkaConsumerFactory {
    fn create_consumer(&self) -> Result<Box<dyn RecordConsumer>, ClientError> {
        let consumer: StreamConsumer = client_config(&self.properties)
            .set("group.id", format!("kafka-gateway-{}", Uuid::new_v4()))
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(client_error)?;
        Ok(Box::new(KafkaConsumer {
            consumer: Arc::new(consumer),
        }))
    }
}

/// Pairs each partition with its start offset
fn assignment(partitions: &[TopicPartition], offsets: &[Offset]) -> Result<TopicPartitionList, ClientError> {
    let mut list = TopicPartitionList::with_capacity(partitions.len());
    for (tp, offset) in partitions.iter().zip(offsets) {
        list.add_partition_offset(&tp.topic, tp.partition, *offset)
            .map_err(client_error)?;
    }
    Ok(list)
}

pub struct KafkaConsumer {
    consumer: Arc<StreamConsumer>,
}

impl KafkaConsumer {
    /// Current high watermark of every partition, as concrete offsets.
    ///
    /// `Offset::End` would be resolved lazily at the first fetch, and records appended
    /// in between would be skipped.
    async fn log_end_offsets(
        &self,
        partitions: &[TopicPartition],
        timeout: Duration,
    ) -> Result<Vec<Offset>, ClientError> {
        let consumer = self.consumer.clone();
        let partitions = partitions.to_vec();
        tokio::task::spawn_blocking(move || {
            partitions
                .iter()
                .map(|tp| {
                    consumer
                        .fetch_watermarks(&tp.topic, tp.partition, timeout)
                        .map(|(_, high)| Offset::Offset(high))
                        .map_err(client_error)
                })
                .collect::<Result<Vec<_>, ClientError>>()
        })
        .await
        .map_err(task_failed)?
    }
}

#[async_trait]
impl RecordConsumer for KafkaConsumer {
    async fn assign(
        &mut self,
        partitions: &[TopicPartition],
        start: StartPosition,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        let offsets = match start {
            StartPosition::Earliest => vec![Offset::Beginning; partitions.len()],
            StartPosition::Latest => self.log_end_offsets(partitions, timeout).await?,
        };
        debug!("Assigning {} partitions from {}", partitions.len(), start);
        self.consumer
            .assign(&assignment(partitions, &offsets)?)
            .map_err(client_error)
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<IncomingRecord>, ClientError> {
        let message = match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => return Ok(None),
            Ok(result) => result.map_err(client_error)?,
        };

        let headers = message
            .headers()
            .map(|headers| {
                headers
                    .iter()
                    .map(|header| (header.key.to_string(), header.value.unwrap_or_default().to_vec()))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Some(IncomingRecord {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            timestamp: message.timestamp().to_millis(),
            key: message.key().map(<[u8]>::to_vec),
            payload: message.payload().map(<[u8]>::to_vec),
            headers,
        }))
    }

    async fn close(&mut self) {
        if let Err(e) = self.consumer.unassign() {
            warn!("Failed to release consumer assignment: {}", e);
        }
    }
}
