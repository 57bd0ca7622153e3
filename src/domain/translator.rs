//! Maps client and broker failures onto the gateway's error taxonomy.

use log::debug;
use std::fmt;

use super::errors::{ApiError, ClientError, ErrorKind, FailureCode};

/// The gateway operation a failure happened in, used to pick the error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Connect,
    ListTopics,
    DescribeTopic,
    CreateTopic,
    DeleteTopic,
    UpdateTopicConfig,
    ListBrokers,
    Produce,
    Consume,
    ListGroups,
    DescribeGroup,
    DeleteGroup,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self {
            Operation::Connect => "connecting to cluster",
            Operation::ListTopics => "listing topics",
            Operation::DescribeTopic => "describing topic",
            Operation::CreateTopic => "creating topic",
            Operation::DeleteTopic => "deleting topic",
            Operation::UpdateTopicConfig => "updating topic configuration",
            Operation::ListBrokers => "listing brokers",
            Operation::Produce => "producing to topic",
            Operation::Consume => "consuming from",
            Operation::ListGroups => "listing consumer groups on",
            Operation::DescribeGroup => "reading offsets of consumer group",
            Operation::DeleteGroup => "deleting consumer group",
        };
        f.write_str(action)
    }
}

/// Translate a client failure raised while performing `operation` on `subject`
/// (a topic or cluster name) into exactly one [`ApiError`].
pub fn translate(operation: Operation, subject: &str, error: ClientError) -> ApiError {
    let root_cause = error.root_cause();
    debug!("Translating failure while {} '{}': {}", operation, subject, error);

    match error {
        ClientError::Codec(codec) => ApiError::new(
            ErrorKind::Serialization,
            format!("Failed {} '{}': {}", operation, subject, codec),
            root_cause,
        )
        .with_field(codec.field.as_str(), codec.reason),

        ClientError::Kafka { code, message } => {
            let kind = classify(operation, &code);
            let message = match kind {
                ErrorKind::UnknownTopic => format!("Topic '{}' does not exist", subject),
                ErrorKind::TopicAlreadyExists => format!("Topic '{}' already exists", subject),
                ErrorKind::UnknownGroup => format!("Consumer group '{}' does not exist", subject),
                ErrorKind::BrokerUnavailable => {
                    format!("Broker unavailable while {} '{}': {}", operation, subject, message)
                }
                _ => format!("Failed {} '{}': {}", operation, subject, message),
            };
            ApiError::new(kind, message, root_cause)
        }
    }
}

fn classify(operation: Operation, code: &FailureCode) -> ErrorKind {
    if code.is_unavailability() {
        return ErrorKind::BrokerUnavailable;
    }
    match (operation, code) {
        (_, FailureCode::UnknownTopicOrPartition) => ErrorKind::UnknownTopic,
        (_, FailureCode::TopicAlreadyExists) => ErrorKind::TopicAlreadyExists,
        (_, FailureCode::GroupIdNotFound) => ErrorKind::UnknownGroup,
        (Operation::DeleteGroup, FailureCode::NonEmptyGroup) => ErrorKind::InvalidRequest,
        (Operation::CreateTopic | Operation::UpdateTopicConfig, _) => {
            ErrorKind::InvalidTopicConfiguration
        }
        _ => ErrorKind::Internal,
    }
}
