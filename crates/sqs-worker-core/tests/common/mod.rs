#![allow(dead_code)]

use sqs_worker::{ListenSummary, ReceivedMessage, SqsTransport, Transport, Worker, WorkerConfig};
use std::sync::{Arc, Mutex};
use testcontainers::core::{ExecCommand, WaitFor};
use testcontainers::ContainerAsync;
use testcontainers_modules::{
    localstack::LocalStack,
    testcontainers::{runners::AsyncRunner, ImageExt, TestcontainersError},
};

/// A LocalStack container running only SQS. Stopped when dropped.
pub struct LocalSqs {
    pub endpoint_url: String,
    container: ContainerAsync<LocalStack>,
}

impl LocalSqs {
    pub async fn start() -> Result<Self, TestcontainersError> {
        let container = LocalStack::default()
            .with_tag("latest")
            .with_env_var("SERVICES", "sqs")
            .with_env_var("SKIP_SSL_CERT_DOWNLOAD", "1")
            .start()
            .await?;

        let endpoint_url = format!(
            "http://{}:{}",
            container.get_host().await?,
            container.get_host_port_ipv4(4566).await?
        );
        Ok(Self {
            endpoint_url,
            container,
        })
    }

    pub async fn transport(&self) -> SqsTransport {
        SqsTransport::local(&self.endpoint_url).await
    }

    /// Creates `name` with `awslocal` inside the container and returns its URL.
    /// Names ending in `.fifo` get a FIFO queue.
    pub async fn create_queue(&self, name: &str) -> Result<String, TestcontainersError> {
        let mut args = vec!["awslocal", "sqs", "create-queue", "--queue-name", name];
        if name.ends_with(".fifo") {
            args.extend(["--attributes", "FifoQueue=true"]);
        }
        let command = ExecCommand::new(args).with_container_ready_conditions(vec![
            WaitFor::message_on_stdout("AWS sqs.CreateQueue => 200"),
        ]);

        let stdout = self.container.exec(command).await?.stdout_to_vec().await?;
        let response: serde_json::Value =
            serde_json::from_slice(&stdout).map_err(|e| TestcontainersError::Other(Box::new(e)))?;

        response["QueueUrl"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| TestcontainersError::Other(format!("no QueueUrl in {response}").into()))
    }
}

/// Fast-polling config so a test never sits in a long poll or empty sleep.
pub fn quick_config() -> WorkerConfig {
    WorkerConfig {
        sleep: 0,
        wait_time_seconds: 0,
        max_number_of_messages: 10,
        visibility_timeout: 30,
        consecutive_error_limit: 3,
        error_backoff: 0,
    }
}

/// Listens until `expected` messages were handled, acknowledging each one.
pub async fn receive_all<T: Transport>(
    worker: &Worker<T>,
    queue_url: &str,
    expected: usize,
) -> (Vec<ReceivedMessage>, ListenSummary) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let (shutdown_tx, shutdown_rx) = sqs_worker::shutdown_signal();
    let shutdown_tx = Arc::new(shutdown_tx);

    let sink = received.clone();
    let summary = worker
        .listen(
            queue_url,
            move |message: ReceivedMessage| {
                let sink = sink.clone();
                let shutdown_tx = shutdown_tx.clone();
                async move {
                    let mut sink = sink.lock().unwrap();
                    sink.push(message);
                    if sink.len() >= expected {
                        shutdown_tx.send(true).ok();
                    }
                    anyhow::Ok(true)
                }
            },
            None,
            shutdown_rx,
        )
        .await
        .unwrap();

    let received = received.lock().unwrap().clone();
    (received, summary)
}
