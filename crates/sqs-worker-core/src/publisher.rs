use crate::message::{OutboundMessage, SendRequest};
use crate::retry::{RetryError, RetryPolicy};
use crate::transport::{Transport, TransportError};
use std::fmt;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Retries after a failed send; 0 disables retrying.
    pub retry_times_on_fail: u32,
    /// Seconds to wait before each retry after the first.
    pub wait_before_retry: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            retry_times_on_fail: 2,
            wait_before_retry: 1,
        }
    }
}

impl PublisherConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_times_on_fail,
            Duration::from_secs(self.wait_before_retry),
        )
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum PublishError {
    /// The call itself was malformed; nothing was sent.
    Configuration(String),
    RetriesExhausted {
        attempts: u32,
        source: TransportError,
    },
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::Configuration(msg) => write!(f, "invalid publish request: {}", msg),
            PublishError::RetriesExhausted { attempts, source } => {
                write!(f, "publish failed after {} attempt(s): {}", attempts, source)
            }
        }
    }
}

impl std::error::Error for PublishError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PublishError::Configuration(_) => None,
            PublishError::RetriesExhausted { source, .. } => Some(source),
        }
    }
}

impl From<RetryError<TransportError>> for PublishError {
    fn from(error: RetryError<TransportError>) -> Self {
        PublishError::RetriesExhausted {
            attempts: error.attempts,
            source: error.last,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendResult {
    /// Id assigned by the queue service
    pub message_id: String,
    pub attempts: u32,
}

/// Enqueues messages, retrying transport failures.
///
/// # Example
///
/// ```no_run
/// use sqs_worker::{OutboundMessage, Publisher, PublisherConfig, SqsTransport};
///
/// # async fn example() -> Result<(), sqs_worker::PublishError> {
/// let transport = SqsTransport::from_env().await;
/// let publisher = Publisher::new(transport, PublisherConfig::default());
///
/// let sent = publisher
///     .publish(
///         "https://sqs.us-east-1.amazonaws.com/123456789/jobs",
///         OutboundMessage::new(r#"{"job":17}"#).with_delay_seconds(0),
///     )
///     .await?;
/// println!("sent {}", sent.message_id);
/// # Ok(())
/// # }
/// ```
pub struct Publisher<T> {
    transport: T,
    config: PublisherConfig,
}

impl<T: Transport> Publisher<T> {
    pub fn new(transport: T, config: PublisherConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn publish(
        &self,
        queue_url: &str,
        message: OutboundMessage,
    ) -> Result<SendResult, PublishError> {
        if queue_url.is_empty() {
            return Err(PublishError::Configuration(
                "queue URL was not specified".to_string(),
            ));
        }
        if message.body().is_empty() {
            return Err(PublishError::Configuration(
                "message body must not be empty".to_string(),
            ));
        }

        let request = SendRequest::new(queue_url, message);
        let (message_id, attempts) = self
            .config
            .retry_policy()
            .run("send", || self.transport.send(request.clone()))
            .await?;

        log::debug!("published {message_id} to {queue_url} after {attempts} attempt(s)");

        Ok(SendResult {
            message_id,
            attempts,
        })
    }
}
