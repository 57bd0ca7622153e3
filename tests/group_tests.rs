//! Integration tests for consumer group administration

mod common;

use common::{harness, Harness, CLUSTER};
use kafka_gateway::application::{CreateTopicRequest, ProducerRequest};
use kafka_gateway::domain::{ErrorKind, GroupOffset};

async fn orders_with_commits(h: &Harness) {
    for (topic, partitions) in [("orders", 2), ("payments", 1)] {
        h.operations
            .create_topic(CLUSTER, CreateTopicRequest::new(topic, partitions, 1))
            .await
            .unwrap();
    }
    for value in ["a", "b", "c", "d"] {
        h.operations
            .produce(CLUSTER, ProducerRequest::new("orders").with_payload(value).with_partition(0))
            .await
            .unwrap();
    }
    h.operations
        .produce(CLUSTER, ProducerRequest::new("payments").with_payload("p"))
        .await
        .unwrap();

    h.cluster.commit_offset("shipping", "orders", 0, 1);
    h.cluster.commit_offset("billing", "orders", 0, 4);
    h.cluster.commit_offset("billing", "payments", 0, 0);
    h.cluster.commit_offset("audit", "payments", 0, 1);
}

#[tokio::test]
async fn test_list_groups_is_sorted() {
    // Arrange
    let h = harness();
    orders_with_commits(&h).await;

    // Act
    let groups = h.operations.list_consumer_groups(CLUSTER).await.unwrap();

    // Assert
    let ids: Vec<_> = groups.iter().map(|g| g.group_id.as_str()).collect();
    assert_eq!(ids, vec!["audit", "billing", "shipping"]);
}

#[tokio::test]
async fn test_groups_for_topic_only_lists_groups_with_commits_on_it() {
    // Arrange
    let h = harness();
    orders_with_commits(&h).await;

    // Act
    let groups = h.operations.consumer_groups_for_topic(CLUSTER, "orders").await.unwrap();

    // Assert
    let ids: Vec<_> = groups.iter().map(|g| g.group_id.as_str()).collect();
    assert_eq!(ids, vec!["billing", "shipping"]);
}

#[tokio::test]
async fn test_group_offsets_report_lag_per_partition() {
    // Arrange
    let h = harness();
    orders_with_commits(&h).await;

    // Act
    let billing = h.operations.consumer_group_offsets(CLUSTER, "billing").await.unwrap();
    let shipping = h.operations.consumer_group_offsets(CLUSTER, "shipping").await.unwrap();

    // Assert
    assert_eq!(
        billing,
        vec![GroupOffset::new("orders", 0, 4, 4), GroupOffset::new("payments", 0, 0, 1)]
    );
    assert_eq!(billing[1].lag, 1);
    assert_eq!(shipping, vec![GroupOffset::new("orders", 0, 1, 4)]);
    assert_eq!(shipping[0].lag, 3);
}

#[tokio::test]
async fn test_unknown_group_and_topic_are_named() {
    // Arrange
    let h = harness();
    orders_with_commits(&h).await;

    // Act
    let offsets = h.operations.consumer_group_offsets(CLUSTER, "ghost").await.unwrap_err();
    let delete = h.operations.delete_consumer_group(CLUSTER, "ghost").await.unwrap_err();
    let topic = h.operations.consumer_groups_for_topic(CLUSTER, "missing").await.unwrap_err();

    // Assert
    for error in [offsets, delete] {
        assert_eq!(error.kind, ErrorKind::UnknownGroup);
        assert_eq!(error.root_cause, "GROUP_ID_NOT_FOUND");
        assert!(error.message.contains("ghost"));
        assert_eq!(error.status_hint(), 404);
    }
    assert_eq!(topic.kind, ErrorKind::UnknownTopic);
    assert!(topic.message.contains("missing"));
}

#[tokio::test]
async fn test_deleted_group_disappears_from_listing() {
    // Arrange
    let h = harness();
    orders_with_commits(&h).await;

    // Act
    h.operations.delete_consumer_group(CLUSTER, "shipping").await.unwrap();
    let groups = h.operations.list_consumer_groups(CLUSTER).await.unwrap();
    let on_orders = h.operations.consumer_groups_for_topic(CLUSTER, "orders").await.unwrap();

    // Assert
    assert!(groups.iter().all(|g| g.group_id != "shipping"));
    assert_eq!(on_orders.len(), 1);
    assert_eq!(on_orders[0].group_id, "billing");
}

#[tokio::test]
async fn test_blank_group_id_never_reaches_the_cluster() {
    // Arrange
    let h = harness();

    // Act
    let error = h.operations.delete_consumer_group(CLUSTER, "  ").await.unwrap_err();

    // Assert
    assert_eq!(error.kind, ErrorKind::InvalidRequest);
    assert!(error.field_errors.contains_key("group"));
    assert_eq!(h.factory.connect_count(), 0);
}

#[tokio::test]
async fn test_group_calls_report_unavailable_brokers() {
    // Arrange
    let h = harness();
    h.cluster.set_available(false);

    // Act
    let error = h.operations.list_consumer_groups(CLUSTER).await.unwrap_err();

    // Assert
    assert_eq!(error.kind, ErrorKind::BrokerUnavailable);
    assert_eq!(error.root_cause, "_TRANSPORT");
}
