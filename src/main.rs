use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{error, info};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use kafka_gateway::application::{
    ConsumerRequest, CreateTopicRequest, KafkaOperations, ProducerRequest, UpdateTopicConfigRequest,
};
use kafka_gateway::domain::{ApiError, FilterOperation, FilterTarget, MessageFilter};
use kafka_gateway::infrastructure::{ClientFactory, GatewayConfig, InMemoryClientFactory, KafkaClientFactory};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the JSON cluster configuration
    #[arg(short, long, default_value = "gateway.json")]
    config: PathBuf,

    /// Cluster to run against
    #[arg(short = 'k', long, default_value = "local")]
    cluster: String,

    /// Use an in-process broker instead of connecting to Kafka
    #[arg(long)]
    in_memory: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List configured clusters and their brokers
    Clusters,
    /// Print the gateway version
    Version,
    /// List topics
    Topics,
    /// Describe a topic
    Describe { topic: String },
    /// Create a topic
    Create {
        topic: String,
        #[arg(short, long, default_value_t = 1)]
        partitions: i32,
        #[arg(short, long, default_value_t = 1)]
        replication_factor: i32,
        /// Topic config override as key=value, repeatable
        #[arg(long = "config-entry", value_parser = parse_key_value)]
        config_entries: Vec<(String, String)>,
    },
    /// Delete a topic
    Delete { topic: String },
    /// List brokers
    Brokers,
    /// Set dynamic topic configuration entries
    AlterConfig {
        topic: String,
        #[arg(long = "config-entry", value_parser = parse_key_value, required = true)]
        config_entries: Vec<(String, String)>,
    },
    /// List consumer groups
    Groups,
    /// List consumer groups with committed offsets on a topic
    TopicGroups { topic: String },
    /// Show committed offsets and lag of a consumer group
    GroupOffsets { group: String },
    /// Delete a consumer group
    DeleteGroup { group: String },
    /// Produce one message
    Produce {
        topic: String,
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        payload: Option<String>,
        /// Header as name=value, repeatable
        #[arg(long = "header", value_parser = parse_key_value)]
        headers: Vec<(String, String)>,
        #[arg(long)]
        partition: Option<i32>,
    },
    /// Read up to `limit` messages
    Consume {
        #[arg(required = true)]
        topics: Vec<String>,
        #[arg(short, long, default_value_t = 10)]
        limit: i64,
        /// Read from the earliest offset instead of waiting for new messages
        #[arg(long)]
        from_start: bool,
        /// Only return messages whose value contains this text
        #[arg(long)]
        value_contains: Option<String>,
    },
    /// Create a topic, produce to it and read the message back (handy with --in-memory)
    RoundTrip {
        topic: String,
        #[arg(long, default_value = "hello from kafka-gateway")]
        payload: String,
    },
}

fn parse_key_value(input: &str) -> Result<(String, String), String> {
    match input.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", input)),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(operations: &KafkaOperations, cluster: &str, command: Command) -> anyhow::Result<Result<(), ApiError>> {
    let outcome = match command {
        Command::Clusters => print_json(&operations.clusters()).map(Ok)?,
        Command::Version => {
            println!("{}", operations.version());
            Ok(())
        }
        Command::Topics => match operations.list_topics(cluster).await {
            Ok(list) => print_json(&list).map(Ok)?,
            Err(e) => Err(e),
        },
        Command::Describe { topic } => match operations.describe_topic(cluster, &topic).await {
            Ok(info) => print_json(&info).map(Ok)?,
            Err(e) => Err(e),
        },
        Command::Create {
            topic,
            partitions,
            replication_factor,
            config_entries,
        } => {
            let request = CreateTopicRequest {
                name: topic,
                partitions,
                replication_factor,
                configuration: config_entries.into_iter().collect(),
            };
            operations.create_topic(cluster, request).await
        }
        Command::Delete { topic } => operations.delete_topic(cluster, &topic).await,
        Command::Brokers => match operations.list_brokers(cluster).await {
            Ok(brokers) => print_json(&brokers).map(Ok)?,
            Err(e) => Err(e),
        },
        Command::AlterConfig { topic, config_entries } => {
            let request = UpdateTopicConfigRequest {
                topic,
                config: config_entries.into_iter().collect(),
            };
            operations.update_topic_config(cluster, request).await
        }
        Command::Groups => match operations.list_consumer_groups(cluster).await {
            Ok(groups) => print_json(&groups).map(Ok)?,
            Err(e) => Err(e),
        },
        Command::TopicGroups { topic } => match operations.consumer_groups_for_topic(cluster, &topic).await {
            Ok(groups) => print_json(&groups).map(Ok)?,
            Err(e) => Err(e),
        },
        Command::GroupOffsets { group } => match operations.consumer_group_offsets(cluster, &group).await {
            Ok(offsets) => print_json(&offsets).map(Ok)?,
            Err(e) => Err(e),
        },
        Command::DeleteGroup { group } => operations.delete_consumer_group(cluster, &group).await,
        Command::Produce {
            topic,
            key,
            payload,
            headers,
            partition,
        } => {
            let request = ProducerRequest {
                topic,
                key,
                payload,
                headers: headers.into_iter().collect::<BTreeMap<_, _>>(),
                partition,
            };
            match operations.produce(cluster, request).await {
                Ok(response) => print_json(&response).map(Ok)?,
                Err(e) => Err(e),
            }
        }
        Command::Consume {
            topics,
            limit,
            from_start,
            value_contains,
        } => {
            let mut request = ConsumerRequest::new(topics, limit, from_start);
            if let Some(term) = value_contains {
                request = request.with_filter(MessageFilter::new(FilterTarget::Value, FilterOperation::Contains, term));
            }
            match operations.consume(cluster, request).await {
                Ok(response) => print_json(&response).map(Ok)?,
                Err(e) => Err(e),
            }
        }
        Command::RoundTrip { topic, payload } => round_trip(operations, cluster, topic, payload).await?,
    };
    Ok(outcome)
}

async fn round_trip(
    operations: &KafkaOperations,
    cluster: &str,
    topic: String,
    payload: String,
) -> anyhow::Result<Result<(), ApiError>> {
    if let Err(e) = operations
        .create_topic(cluster, CreateTopicRequest::new(topic.clone(), 1, 1))
        .await
    {
        return Ok(Err(e));
    }
    let produced = match operations
        .produce(cluster, ProducerRequest::new(topic.clone()).with_payload(payload))
        .await
    {
        Ok(response) => response,
        Err(e) => return Ok(Err(e)),
    };
    print_json(&produced)?;

    match operations
        .consume(cluster, ConsumerRequest::new(vec![topic], 1, true))
        .await
    {
        Ok(response) => print_json(&response).map(Ok),
        Err(e) => Ok(Err(e)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Initialize logging
    env_logger::init();

    let args = Args::parse();

    let (config, factory): (GatewayConfig, Arc<dyn ClientFactory>) = if args.in_memory {
        info!("Running against an in-memory cluster '{}'", args.cluster);
        let config = GatewayConfig::single(args.cluster.clone(), vec!["in-memory:9092".to_string()]);
        (config, Arc::new(InMemoryClientFactory::new(3)))
    } else {
        let config = GatewayConfig::from_file(&args.config)
            .with_context(|| format!("loading configuration from {}", args.config.display()))?;
        info!("Loaded {} cluster(s) from {}", config.clusters.len(), args.config.display());
        (config, Arc::new(KafkaClientFactory))
    };

    let operations = kafka_gateway::operations(&config, factory);
    let outcome = run(&operations, &args.cluster, args.command).await;
    operations.shutdown().await;

    match outcome? {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(api_error) => {
            error!("{} (root cause: {})", api_error, api_error.root_cause);
            eprintln!("{}", serde_json::to_string_pretty(&api_error)?);
            Ok(ExitCode::FAILURE)
        }
    }
}
