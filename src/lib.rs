//! # Kafka Gateway
//!
//! Kafka cluster administration, single-record production and bounded consumption as
//! request/response operations, against any number of independently configured clusters.
//!
//! ## Architecture
//!
//! The codebase follows Domain-Driven Design principles with clear separation between:
//! - **Domain Layer**: request model, error taxonomy, codecs, client ports and the services
//! - **Application Layer**: request DTOs and the [`KafkaOperations`] facade
//! - **Infrastructure Layer**: configuration, the cluster registry, and the librdkafka and
//!   in-memory client implementations
//!
//! ## Usage
//!
//! ```rust
//! use kafka_gateway::application::{CreateTopicRequest, ProducerRequest};
//! use kafka_gateway::infrastructure::{GatewayConfig, InMemoryClientFactory};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GatewayConfig::single("local", vec!["localhost:9092".to_string()]);
//!     let operations = kafka_gateway::operations(&config, Arc::new(InMemoryClientFactory::default()));
//!
//!     operations
//!         .create_topic("local", CreateTopicRequest::new("greetings", 1, 1))
//!         .await?;
//!     let response = operations
//!         .produce("local", ProducerRequest::new("greetings").with_payload("Hello, Kafka!"))
//!         .await?;
//!
//!     println!("Message written at offset {}", response.offset);
//!     operations.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod application;
pub mod domain;
pub mod infrastructure;

use std::sync::Arc;

// Re-export commonly used types for convenience
pub use application::{
    ConsumerRequest, ConsumerResponse, CreateTopicRequest, KafkaOperations, ProducerRequest, ProducerResponse,
    UpdateTopicConfigRequest,
};
pub use domain::{ApiError, ErrorKind, SerdeFormat, TopicInfo, TopicList};
pub use infrastructure::{ClientFactory, ClusterRegistry, GatewayConfig, InMemoryClientFactory, KafkaClientFactory};

/// Builds the operations facade over a fresh registry for `config`
pub fn operations(config: &GatewayConfig, factory: Arc<dyn ClientFactory>) -> KafkaOperations {
    let registry = ClusterRegistry::new(config, factory);
    KafkaOperations::new(Arc::new(registry), config.timeouts.service_timeouts())
}
