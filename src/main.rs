use async_trait::async_trait;
use clap::Parser;
use kafka_handler::consumer::{
    create_kafka_service, ConsumerConfig, ConsumerGroup, Context, Message, MessageProcessor,
    ProcessOutcome,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "kafka-handler")]
#[command(about = "Consume a Kafka consumer group and print messages as JSON lines", long_about = None)]
struct Cli {
    /// YAML configuration file, complete on its own; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Broker addresses (overrides the config file)
    #[arg(long)]
    brokers: Option<String>,

    /// Consumer group ID (overrides the config file)
    #[arg(long)]
    group: Option<String>,

    /// Topics to consume, comma-separated (overrides the config file)
    #[arg(long, value_delimiter = ',')]
    topics: Vec<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Log as JSON
    #[arg(long)]
    json: bool,
}

/// Writes each message to stdout as one JSON object per line
struct JsonLinesProcessor;

#[async_trait]
impl MessageProcessor for JsonLinesProcessor {
    async fn handle(&self, _ctx: &Context, message: &Message) -> ProcessOutcome {
        let line = serde_json::json!({
            "topic": message.topic,
            "partition": message.partition,
            "offset": message.offset,
            "timestamp": message.timestamp,
            "key": message.key.as_ref().map(|k| String::from_utf8_lossy(k).into_owned()),
            "payload": String::from_utf8_lossy(&message.payload),
        });

        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", line).into()
    }

    fn name(&self) -> &str {
        "JsonLinesProcessor"
    }
}

/// Load the config file (validated on load) and apply CLI overrides.
/// The result is validated again when the client is created.
fn load_config(cli: &Cli) -> anyhow::Result<ConsumerConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            ConsumerConfig::from_yaml_file(path)?
        }
        None => ConsumerConfig::default(),
    };

    if let Some(brokers) = &cli.brokers {
        config.brokers = brokers.clone();
    }
    if let Some(group) = &cli.group {
        config.group_id = group.clone();
    }
    if !cli.topics.is_empty() {
        config.topics = cli.topics.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    kafka_handler::init_tracing(cli.debug, cli.json)?;

    let config = load_config(&cli)?;
    let service = create_kafka_service(&config, Arc::new(JsonLinesProcessor))?;

    let ctx = Context::new();
    let shutdown = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
        }
        shutdown.cancel();
    });

    info!(
        version = kafka_handler::VERSION,
        group_id = %config.group_id,
        topics = ?config.topics,
        "starting consumer"
    );
    let result = service.run(&ctx).await;
    let group = service.group();
    if let Err(e) = group.close().await {
        error!(error = %e, "failed to close consumer group");
    }

    let snapshot = service.metrics().snapshot();
    info!(metrics = %serde_json::to_string(&snapshot)?, "consumer stopped");
    result?;
    Ok(())
}
