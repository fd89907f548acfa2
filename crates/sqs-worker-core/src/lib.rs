//! # sqs-worker-core
//!
//! Publisher and long-polling worker for AWS SQS (and SQS-compatible
//! services such as LocalStack).
//!
//! ## Features
//!
//! - **Publishing**: Send messages with attributes, delay, and FIFO group/deduplication ids,
//!   retrying transport failures a bounded number of times
//! - **Workers**: Long-poll a queue, hand each message to a handler, then acknowledge
//!   (delete) or release (visibility 0) it depending on the result
//! - **Transports**: [`SqsTransport`] for the real service, [`MemoryTransport`] for tests
//!
//! ## Example
//!
//! ```no_run
//! use sqs_worker::{
//!     OutboundMessage, Publisher, PublisherConfig, SqsTransport, Worker, WorkerConfig,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let queue_url = "https://sqs.us-east-1.amazonaws.com/123456789/jobs";
//! let transport = Arc::new(SqsTransport::from_env().await);
//!
//! let publisher = Publisher::new(transport.clone(), PublisherConfig::default());
//! publisher.publish(queue_url, OutboundMessage::new("hello")).await?;
//!
//! let worker = Worker::new(transport, WorkerConfig::default());
//! let summary = worker
//!     .listen_forever(
//!         queue_url,
//!         |message: sqs_worker::ReceivedMessage| async move {
//!             println!("{}", message.body);
//!             anyhow::Ok(true)
//!         },
//!         None,
//!     )
//!     .await?;
//! println!("stopped: {:?}", summary.stop_reason);
//! # Ok(())
//! # }
//! ```

mod memory;
mod message;
mod publisher;
mod retry;
mod sqs;
mod transport;
mod worker;

#[cfg(test)]
mod test_utils;

pub use memory::MemoryTransport;
pub use message::*;
pub use publisher::{PublishError, Publisher, PublisherConfig, SendResult};
pub use retry::{RetryError, RetryPolicy};
pub use sqs::{local_config, SqsTransport};
pub use transport::{ReceiveOptions, Transport, TransportError};
pub use worker::*;
