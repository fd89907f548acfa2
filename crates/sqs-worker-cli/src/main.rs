use clap::{Args, Parser, Subcommand};
use sqs_worker::{
    AttributeValue, ErrorCallback, OutboundMessage, Publisher, PublisherConfig, ReceivedMessage,
    SqsTransport, StopReason, Worker, WorkerConfig,
};
use tokio::io::{self, AsyncBufReadExt, BufReader};

#[tokio::main]
pub async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = Cli::parse().run().await {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

#[derive(Debug, Parser)]
#[command(name = "sqs-worker")]
#[command(about = "publish to and run workers against AWS SQS queues", long_about = None)]
pub struct Cli {
    /// Use static test credentials against a local endpoint (LocalStack)
    #[arg(long, global = true)]
    local: bool,

    /// Override the SQS endpoint URL
    #[arg(long, global = true)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Publish BODY, or every non-empty line of stdin when BODY is omitted
    Publish(PublishArgs),
    /// Long-poll a queue and print each message as JSON
    Listen(ListenArgs),
}

#[derive(Debug, Args)]
struct PublishArgs {
    url: String,
    body: Option<String>,

    /// String attribute, repeatable
    #[arg(short, long = "attribute", value_name = "NAME=VALUE", value_parser = parse_key_value)]
    attributes: Vec<(String, String)>,

    /// Number attribute, repeatable
    #[arg(long = "number-attribute", value_name = "NAME=VALUE", value_parser = parse_key_value)]
    number_attributes: Vec<(String, String)>,

    #[arg(long, default_value_t = sqs_worker::DEFAULT_DELAY_SECONDS)]
    delay: u32,

    /// Message group id (FIFO queues)
    #[arg(long, default_value = "")]
    group_id: String,

    /// Deduplication id (FIFO queues)
    #[arg(long, default_value = "")]
    dedup_id: String,

    #[arg(long, default_value_t = PublisherConfig::default().retry_times_on_fail)]
    retries: u32,

    /// Seconds between retries, after the first
    #[arg(long, default_value_t = PublisherConfig::default().wait_before_retry)]
    wait_before_retry: u64,
}

#[derive(Debug, Args)]
struct ListenArgs {
    url: String,

    /// Seconds to sleep when the queue is empty
    #[arg(long, default_value_t = WorkerConfig::default().sleep)]
    sleep: u64,

    /// Long-poll wait in seconds (0-20)
    #[arg(long, default_value_t = WorkerConfig::default().wait_time_seconds)]
    wait_time: i32,

    /// Messages per receive (1-10)
    #[arg(long, default_value_t = WorkerConfig::default().max_number_of_messages)]
    max_messages: i32,

    #[arg(long, default_value_t = WorkerConfig::default().visibility_timeout)]
    visibility_timeout: i32,

    /// Stop after this many consecutive transport errors
    #[arg(long, default_value_t = WorkerConfig::default().consecutive_error_limit)]
    error_limit: u32,

    /// Seconds to wait after a failed poll
    #[arg(long, default_value_t = WorkerConfig::default().error_backoff)]
    error_backoff: u64,

    /// Release messages instead of acknowledging them
    #[arg(long)]
    release: bool,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got '{s}'")),
    }
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let transport = self.transport().await;

        match self.command {
            Commands::Publish(args) => publish(transport, args).await,
            Commands::Listen(args) => listen(transport, args).await,
        }
    }

    async fn transport(&self) -> SqsTransport {
        if self.local {
            let endpoint = self.endpoint.as_deref().unwrap_or("http://localhost:4566");
            return SqsTransport::local(endpoint).await;
        }

        let mut loader = aws_config::from_env();
        if let Some(endpoint) = &self.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        SqsTransport::from_config(loader.load().await)
    }
}

impl PublishArgs {
    fn message(&self, body: String) -> OutboundMessage {
        let strings = self
            .attributes
            .iter()
            .map(|(name, value)| (name.clone(), AttributeValue::string(value.as_str())));
        let numbers = self
            .number_attributes
            .iter()
            .map(|(name, value)| (name.clone(), AttributeValue::number(value)));

        OutboundMessage::new(body)
            .with_attributes(strings.chain(numbers).collect())
            .with_delay_seconds(self.delay)
            .with_group_id(self.group_id.as_str())
            .with_deduplication_id(self.dedup_id.as_str())
    }
}

async fn publish(transport: SqsTransport, args: PublishArgs) -> anyhow::Result<()> {
    let publisher = Publisher::new(
        transport,
        PublisherConfig {
            retry_times_on_fail: args.retries,
            wait_before_retry: args.wait_before_retry,
        },
    );

    if let Some(body) = &args.body {
        let sent = publisher.publish(&args.url, args.message(body.clone())).await?;
        println!("{}", sent.message_id);
        return Ok(());
    }

    let mut lines = BufReader::new(io::stdin()).lines();
    let mut failed = 0;
    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            continue;
        }
        match publisher.publish(&args.url, args.message(line)).await {
            Ok(sent) => println!("{}", sent.message_id),
            Err(e) => {
                eprintln!("{}", e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} message(s) could not be published");
    }
    Ok(())
}

async fn listen(transport: SqsTransport, args: ListenArgs) -> anyhow::Result<()> {
    let worker = Worker::new(
        transport,
        WorkerConfig {
            sleep: args.sleep,
            wait_time_seconds: args.wait_time,
            max_number_of_messages: args.max_messages,
            visibility_timeout: args.visibility_timeout,
            consecutive_error_limit: args.error_limit,
            error_backoff: args.error_backoff,
        },
    );

    let (shutdown_tx, shutdown_rx) = sqs_worker::shutdown_signal();
    tokio::spawn(sqs_worker::wait_for_shutdown_signal(shutdown_tx));

    let acknowledge = !args.release;
    let on_error: ErrorCallback = Box::new(|text: &str, count: u32| {
        eprintln!("[error {count}] {text}");
    });

    let summary = worker
        .listen(
            &args.url,
            move |message: ReceivedMessage| async move {
                println!("{}", serde_json::to_string(&message)?);
                anyhow::Ok(acknowledge)
            },
            Some(on_error),
            shutdown_rx,
        )
        .await?;

    log::info!(
        "processed {} message(s): {} acknowledged, {} released, {} handler fault(s)",
        summary.acknowledged + summary.released,
        summary.acknowledged,
        summary.released,
        summary.handler_faults
    );

    match summary.stop_reason {
        StopReason::Shutdown => Ok(()),
        StopReason::ErrorLimit => anyhow::bail!(
            "worker stopped after {} consecutive errors",
            summary.consecutive_errors
        ),
    }
}
