use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use super::serialization::CodecError;

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

/// Root-cause identifiers for failures raised by the gateway itself rather than the client
pub mod root_cause {
    pub const UNKNOWN_CLUSTER: &str = "gateway.UnknownCluster";
    pub const REGISTRY_CLOSED: &str = "gateway.RegistryClosed";
    pub const VALIDATION: &str = "gateway.Validation";
    pub const TASK_FAILED: &str = "gateway.TaskFailed";
}

/// Stable, transport-agnostic error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "UnknownClusterError")]
    UnknownCluster,
    #[serde(rename = "UnknownTopicError")]
    UnknownTopic,
    #[serde(rename = "TopicAlreadyExistsError")]
    TopicAlreadyExists,
    #[serde(rename = "UnknownConsumerGroupError")]
    UnknownGroup,
    #[serde(rename = "InvalidTopicConfigurationError")]
    InvalidTopicConfiguration,
    #[serde(rename = "SerializationError")]
    Serialization,
    #[serde(rename = "BrokerUnavailableError")]
    BrokerUnavailable,
    #[serde(rename = "InvalidRequestError")]
    InvalidRequest,
    #[serde(rename = "InternalError")]
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnknownCluster => "UnknownClusterError",
            ErrorKind::UnknownTopic => "UnknownTopicError",
            ErrorKind::TopicAlreadyExists => "TopicAlreadyExistsError",
            ErrorKind::UnknownGroup => "UnknownConsumerGroupError",
            ErrorKind::InvalidTopicConfiguration => "InvalidTopicConfigurationError",
            ErrorKind::Serialization => "SerializationError",
            ErrorKind::BrokerUnavailable => "BrokerUnavailableError",
            ErrorKind::InvalidRequest => "InvalidRequestError",
            ErrorKind::Internal => "InternalError",
        }
    }

    /// Status code a REST layer would typically answer with
    pub fn status_hint(&self) -> u16 {
        match self {
            ErrorKind::UnknownCluster | ErrorKind::UnknownTopic | ErrorKind::UnknownGroup => 404,
            ErrorKind::TopicAlreadyExists => 409,
            ErrorKind::InvalidTopicConfiguration
            | ErrorKind::Serialization
            | ErrorKind::InvalidRequest => 400,
            ErrorKind::BrokerUnavailable => 503,
            ErrorKind::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single structured error every gateway operation fails with
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    /// Exact identifier of the originating failure, never paraphrased
    pub root_cause: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub field_errors: BTreeMap<String, String>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, root_cause: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            root_cause: root_cause.into(),
            field_errors: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>, detail: impl Into<String>) -> Self {
        self.field_errors.insert(field.into(), detail.into());
        self
    }

    pub fn unknown_cluster(cluster: &str) -> Self {
        Self::new(
            ErrorKind::UnknownCluster,
            format!("Cluster '{}' is not configured", cluster),
            root_cause::UNKNOWN_CLUSTER,
        )
    }

    pub fn unknown_topic(topic: &str, root_cause: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::UnknownTopic,
            format!("Topic '{}' does not exist", topic),
            root_cause,
        )
    }

    pub fn unknown_group(group: &str, root_cause: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::UnknownGroup,
            format!("Consumer group '{}' does not exist", group),
            root_cause,
        )
    }

    pub fn registry_closed() -> Self {
        Self::new(
            ErrorKind::Internal,
            "Cluster registry has been shut down",
            root_cause::REGISTRY_CLOSED,
        )
    }

    /// Request rejected before any broker call; `field_errors` holds the per-field detail
    pub fn validation(kind: ErrorKind, field_errors: BTreeMap<String, String>) -> Self {
        let summary = field_errors
            .iter()
            .map(|(field, detail)| format!("{}: {}", field, detail))
            .collect::<Vec<_>>()
            .join("; ");
        Self {
            kind,
            message: format!("Invalid request: {}", summary),
            root_cause: root_cause::VALIDATION.to_string(),
            field_errors,
        }
    }

    pub fn status_hint(&self) -> u16 {
        self.kind.status_hint()
    }
}

/// Failure category reported by the Kafka client or broker.
///
/// Broker error codes are named after the Kafka protocol error names, client-local
/// conditions after librdkafka's underscore-prefixed names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailureCode {
    UnknownTopicOrPartition,
    TopicAlreadyExists,
    InvalidTopic,
    InvalidPartitions,
    InvalidReplicationFactor,
    InvalidReplicaAssignment,
    InvalidConfig,
    PolicyViolation,
    InvalidRequest,
    TopicAuthorizationFailed,
    ClusterAuthorizationFailed,
    NotController,
    RequestTimedOut,
    BrokerNotAvailable,
    LeaderNotAvailable,
    NetworkException,
    Transport,
    AllBrokersDown,
    MessageTimedOut,
    OperationTimedOut,
    GroupIdNotFound,
    NonEmptyGroup,
    /// Anything else, carrying the client library's own name for it
    Other(String),
}

impl FailureCode {
    pub fn name(&self) -> &str {
        match self {
            FailureCode::UnknownTopicOrPartition => "UNKNOWN_TOPIC_OR_PARTITION",
            FailureCode::TopicAlreadyExists => "TOPIC_ALREADY_EXISTS",
            FailureCode::InvalidTopic => "INVALID_TOPIC_EXCEPTION",
            FailureCode::InvalidPartitions => "INVALID_PARTITIONS",
            FailureCode::InvalidReplicationFactor => "INVALID_REPLICATION_FACTOR",
            FailureCode::InvalidReplicaAssignment => "INVALID_REPLICA_ASSIGNMENT",
            FailureCode::InvalidConfig => "INVALID_CONFIG",
            FailureCode::PolicyViolation => "POLICY_VIOLATION",
            FailureCode::InvalidRequest => "INVALID_REQUEST",
            FailureCode::TopicAuthorizationFailed => "TOPIC_AUTHORIZATION_FAILED",
            FailureCode::ClusterAuthorizationFailed => "CLUSTER_AUTHORIZATION_FAILED",
            FailureCode::NotController => "NOT_CONTROLLER",
            FailureCode::RequestTimedOut => "REQUEST_TIMED_OUT",
            FailureCode::BrokerNotAvailable => "BROKER_NOT_AVAILABLE",
            FailureCode::LeaderNotAvailable => "LEADER_NOT_AVAILABLE",
            FailureCode::NetworkException => "NETWORK_EXCEPTION",
            FailureCode::Transport => "_TRANSPORT",
            FailureCode::AllBrokersDown => "_ALL_BROKERS_DOWN",
            FailureCode::MessageTimedOut => "_MSG_TIMED_OUT",
            FailureCode::OperationTimedOut => "_TIMED_OUT",
            FailureCode::GroupIdNotFound => "GROUP_ID_NOT_FOUND",
            FailureCode::NonEmptyGroup => "NON_EMPTY_GROUP",
            FailureCode::Other(name) => name,
        }
    }

    /// Timeouts and lost connections, as opposed to the broker rejecting the request
    pub fn is_unavailability(&self) -> bool {
        matches!(
            self,
            FailureCode::RequestTimedOut
                | FailureCode::BrokerNotAvailable
                | FailureCode::LeaderNotAvailable
                | FailureCode::NetworkException
                | FailureCode::Transport
                | FailureCode::AllBrokersDown
                | FailureCode::MessageTimedOut
                | FailureCode::OperationTimedOut
        )
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error surfaced by the client ports before translation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("{code}: {message}")]
    Kafka { code: FailureCode, message: String },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl ClientError {
    pub fn kafka(code: FailureCode, message: impl Into<String>) -> Self {
        ClientError::Kafka {
            code,
            message: message.into(),
        }
    }

    pub fn root_cause(&self) -> String {
        match self {
            ClientError::Kafka { code, .. } => code.name().to_string(),
            ClientError::Codec(err) => err.root_cause(),
        }
    }
}
