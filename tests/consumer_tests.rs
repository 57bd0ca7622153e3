//! Integration tests for producing and bounded consumption

mod common;

use common::{harness, harness_with, test_config, Harness, CLUSTER};
use kafka_gateway::application::{ConsumerRequest, CreateTopicRequest, ProducerRequest};
use kafka_gateway::domain::{ErrorKind, FilterOperation, FilterTarget, MessageFilter, SerdeFormat};
use kafka_gateway::infrastructure::InMemoryCluster;
use std::sync::Arc;
use std::time::Duration;

async fn with_topic(h: &Harness, topic: &str, partitions: i32) {
    h.operations
        .create_topic(CLUSTER, CreateTopicRequest::new(topic, partitions, 1))
        .await
        .unwrap();
}

async fn produce_values(h: &Harness, topic: &str, values: &[&str]) {
    for value in values {
        h.operations
            .produce(CLUSTER, ProducerRequest::new(topic).with_payload(*value))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_produce_reports_partition_and_offset() {
    // Arrange
    let h = harness();
    with_topic(&h, "events", 3).await;

    // Act
    let first = h
        .operations
        .produce(CLUSTER, ProducerRequest::new("events").with_payload("a").with_partition(2))
        .await
        .unwrap();
    let second = h
        .operations
        .produce(CLUSTER, ProducerRequest::new("events").with_payload("b").with_partition(2))
        .await
        .unwrap();

    // Assert
    assert_eq!(first.topic, "events");
    assert_eq!(first.partition, 2);
    assert_eq!(first.offset, 0);
    assert_eq!(second.offset, 1);
    assert!(first.timestamp > 0);
    assert_eq!(h.cluster.record_count("events"), 2);
}

#[tokio::test]
async fn test_produce_to_missing_topic_is_unknown() {
    // Arrange
    let h = harness();

    // Act
    let error = h
        .operations
        .produce(CLUSTER, ProducerRequest::new("ghost").with_payload("x"))
        .await
        .unwrap_err();

    // Assert
    assert_eq!(error.kind, ErrorKind::UnknownTopic);
    assert!(error.message.contains("ghost"));
}

#[tokio::test]
async fn test_consume_never_exceeds_limit() {
    // Arrange
    let h = harness();
    with_topic(&h, "events", 2).await;
    produce_values(&h, "events", &["1", "2", "3", "4", "5", "6", "7"]).await;

    // Act
    let response = h
        .operations
        .consume(CLUSTER, ConsumerRequest::new(vec!["events".to_string()], 3, true))
        .await
        .unwrap();

    // Assert
    assert_eq!(response.messages.len(), 3);
}

#[tokio::test]
async fn test_consume_from_start_on_empty_topic_is_empty_success() {
    // Arrange
    let h = harness();
    with_topic(&h, "quiet", 1).await;

    // Act
    let response = h
        .operations
        .consume(CLUSTER, ConsumerRequest::new(vec!["quiet".to_string()], 1, true))
        .await
        .unwrap();

    // Assert
    assert!(response.messages.is_empty());
    assert_eq!(h.cluster.open_consumers(), 0);
}

/// A record produced after a tail consume starts is returned exactly once, unchanged
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tail_consume_sees_message_produced_after_start() {
    // Arrange
    let h = Arc::new(harness());
    with_topic(&h, "events", 3).await;
    produce_values(&h, "events", &["before"]).await;

    // Act
    let consumer = {
        let h = h.clone();
        tokio::spawn(async move {
            h.operations
                .consume(CLUSTER, ConsumerRequest::new(vec!["events".to_string()], 5, false))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    h.operations
        .produce(
            CLUSTER,
            ProducerRequest::new("events")
                .with_key("order-42")
                .with_payload("created")
                .with_header("source", "checkout")
                .with_header("trace", "abc123"),
        )
        .await
        .unwrap();
    let response = consumer.await.unwrap().unwrap();

    // Assert
    assert_eq!(response.messages.len(), 1);
    let message = &response.messages[0];
    assert_eq!(message.key.as_deref(), Some("order-42"));
    assert_eq!(message.value.as_deref(), Some("created"));
    assert_eq!(message.headers["source"], "checkout");
    assert_eq!(message.headers["trace"], "abc123");
    assert_eq!(message.topic, "events");
}

#[tokio::test]
async fn test_consume_reads_across_topics() {
    // Arrange
    let h = harness();
    with_topic(&h, "orders", 1).await;
    with_topic(&h, "payments", 1).await;
    produce_values(&h, "orders", &["o1", "o2"]).await;
    produce_values(&h, "payments", &["p1"]).await;

    // Act
    let response = h
        .operations
        .consume(
            CLUSTER,
            ConsumerRequest::new(vec!["orders".to_string(), "payments".to_string()], 10, true),
        )
        .await
        .unwrap();

    // Assert
    let mut values: Vec<_> = response.messages.iter().filter_map(|m| m.value.clone()).collect();
    values.sort();
    assert_eq!(values, vec!["o1", "o2", "p1"]);
    let orders: Vec<_> = response
        .messages
        .iter()
        .filter(|m| m.topic == "orders")
        .map(|m| m.offset)
        .collect();
    assert_eq!(orders, vec![0, 1]);
}

#[tokio::test]
async fn test_topic_listed_twice_is_read_once() {
    // Arrange
    let h = harness();
    with_topic(&h, "events", 1).await;
    produce_values(&h, "events", &["only"]).await;

    // Act
    let response = h
        .operations
        .consume(
            CLUSTER,
            ConsumerRequest::new(vec!["events".to_string(), "events".to_string()], 10, true),
        )
        .await
        .unwrap();

    // Assert
    let positions: Vec<_> = response.messages.iter().map(|m| (m.partition, m.offset)).collect();
    assert_eq!(positions, vec![(0, 0)]);
}

#[tokio::test]
async fn test_consume_unknown_topic_fails_without_opening_a_consumer() {
    // Arrange
    let h = harness();
    with_topic(&h, "orders", 1).await;

    // Act
    let error = h
        .operations
        .consume(
            CLUSTER,
            ConsumerRequest::new(vec!["orders".to_string(), "ghost".to_string()], 1, true),
        )
        .await
        .unwrap_err();

    // Assert
    assert_eq!(error.kind, ErrorKind::UnknownTopic);
    assert!(error.message.contains("ghost"));
    assert_eq!(h.cluster.open_consumers(), 0);
}

#[tokio::test]
async fn test_consume_rejects_zero_limit() {
    // Arrange
    let h = harness();

    // Act
    let error = h
        .operations
        .consume(CLUSTER, ConsumerRequest::new(vec!["orders".to_string()], 0, true))
        .await
        .unwrap_err();

    // Assert
    assert_eq!(error.kind, ErrorKind::InvalidRequest);
    assert!(error.field_errors.contains_key("limit"));
}

#[tokio::test]
async fn test_filters_decide_what_counts_toward_the_limit() {
    // Arrange
    let h = harness();
    with_topic(&h, "logs", 1).await;
    produce_values(&h, "logs", &["INFO boot", "ERROR disk", "INFO ready", "ERROR net", "ERROR cpu"]).await;
    let request = ConsumerRequest::new(vec!["logs".to_string()], 2, true)
        .with_filter(MessageFilter::new(FilterTarget::Value, FilterOperation::StartsWith, "ERROR"))
        .with_filter(MessageFilter::new(FilterTarget::Value, FilterOperation::NotContains, "disk"));

    // Act
    let response = h.operations.consume(CLUSTER, request).await.unwrap();

    // Assert
    let values: Vec<_> = response.messages.iter().filter_map(|m| m.value.as_deref()).collect();
    assert_eq!(values, vec!["ERROR net", "ERROR cpu"]);
}

#[tokio::test]
async fn test_regex_filter_on_headers() {
    // Arrange
    let h = harness();
    with_topic(&h, "events", 1).await;
    for region in ["eu-west-1", "us-east-1", "eu-central-1"] {
        h.operations
            .produce(
                CLUSTER,
                ProducerRequest::new("events").with_payload(region).with_header("region", region),
            )
            .await
            .unwrap();
    }
    let request = ConsumerRequest::new(vec!["events".to_string()], 10, true).with_filter(MessageFilter::new(
        FilterTarget::HeaderValue,
        FilterOperation::Matches,
        "^eu-",
    ));

    // Act
    let response = h.operations.consume(CLUSTER, request).await.unwrap();

    // Assert
    assert_eq!(response.messages.len(), 2);
    assert!(response.messages.iter().all(|m| m.headers["region"].starts_with("eu-")));
}

#[tokio::test]
async fn test_json_cluster_rejects_invalid_payload() {
    // Arrange
    let mut config = test_config();
    config.clusters[0].value_format = SerdeFormat::Json;
    let h = harness_with(config, InMemoryCluster::new(1));
    with_topic(&h, "documents", 1).await;

    // Act
    let error = h
        .operations
        .produce(CLUSTER, ProducerRequest::new("documents").with_payload("{not json"))
        .await
        .unwrap_err();

    // Assert
    assert_eq!(error.kind, ErrorKind::Serialization);
    assert_eq!(error.root_cause, "serialization.json");
    assert!(error.field_errors.contains_key("payload"));
    assert_eq!(h.cluster.record_count("documents"), 0);
}

#[tokio::test]
async fn test_json_cluster_round_trips_documents() {
    // Arrange
    let mut config = test_config();
    config.clusters[0].value_format = SerdeFormat::Json;
    let h = harness_with(config, InMemoryCluster::new(1));
    with_topic(&h, "documents", 1).await;

    // Act
    h.operations
        .produce(
            CLUSTER,
            ProducerRequest::new("documents").with_key("doc-1").with_payload(r#"{ "id": 1, "tags": ["a"] }"#),
        )
        .await
        .unwrap();
    let response = h
        .operations
        .consume(CLUSTER, ConsumerRequest::new(vec!["documents".to_string()], 1, true))
        .await
        .unwrap();

    // Assert
    assert_eq!(response.messages[0].value.as_deref(), Some(r#"{"id":1,"tags":["a"]}"#));
    assert_eq!(response.messages[0].key.as_deref(), Some("doc-1"));
}

#[tokio::test]
async fn test_undecodable_records_fail_the_consume() {
    // Arrange
    let mut config = test_config();
    config.clusters[0].value_format = SerdeFormat::Json;
    let cluster = InMemoryCluster::new(1);
    let writer = harness_with(test_config(), cluster.clone());
    let reader = harness_with(config, cluster);
    with_topic(&writer, "mixed", 1).await;
    produce_values(&writer, "mixed", &["plain text"]).await;

    // Act
    let error = reader
        .operations
        .consume(CLUSTER, ConsumerRequest::new(vec!["mixed".to_string()], 1, true))
        .await
        .unwrap_err();

    // Assert
    assert_eq!(error.kind, ErrorKind::Serialization);
    assert_eq!(reader.cluster.open_consumers(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connection_loss_during_poll_is_unavailability() {
    // Arrange
    let h = Arc::new(harness());
    with_topic(&h, "events", 1).await;

    // Act
    let consumer = {
        let h = h.clone();
        tokio::spawn(async move {
            h.operations
                .consume(CLUSTER, ConsumerRequest::new(vec!["events".to_string()], 1, false))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;
    h.cluster.set_available(false);
    let error = consumer.await.unwrap().unwrap_err();

    // Assert
    assert_eq!(error.kind, ErrorKind::BrokerUnavailable);
    assert_eq!(error.root_cause, "_TRANSPORT");
    assert_eq!(h.cluster.open_consumers(), 0);
}
