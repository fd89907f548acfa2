//! In-process [`Transport`] for tests and local development.
//!
//! Queues are created on first use. Delays, visibility timeouts, receipt
//! handles, receive counts and deduplication ids behave like the real
//! service; long polls wake up early when a message is sent.

use crate::message::{Attributes, ReceivedMessage, SendRequest};
use crate::transport::{ReceiveOptions, Transport, TransportError};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// How long a deduplication id suppresses repeats of its message.
const DEDUPLICATION_WINDOW: Duration = Duration::from_secs(5 * 60);

struct StoredMessage {
    message_id: String,
    body: String,
    attributes: Attributes,
    sent_timestamp: DateTime<Utc>,
    visible_at: Instant,
    receive_count: u32,
    receipt_handle: Option<String>,
}

#[derive(Default)]
struct MemoryQueue {
    messages: Vec<StoredMessage>,
    /// Deduplication id to the message id it produced and when.
    deduplication_ids: HashMap<String, (String, Instant)>,
}

impl MemoryQueue {
    /// Hands out up to `max` visible messages, oldest first.
    fn take_visible(&mut self, max: usize, visibility: Duration) -> Vec<ReceivedMessage> {
        let now = Instant::now();
        self.messages
            .iter_mut()
            .filter(|m| m.visible_at <= now)
            .take(max)
            .map(|m| {
                let receipt_handle = uuid::Uuid::new_v4().to_string();
                m.visible_at = now + visibility;
                m.receive_count += 1;
                m.receipt_handle = Some(receipt_handle.clone());
                ReceivedMessage {
                    message_id: m.message_id.clone(),
                    receipt_handle,
                    body: m.body.clone(),
                    attributes: m.attributes.clone(),
                    sent_timestamp: Some(m.sent_timestamp),
                    receive_count: Some(m.receive_count),
                }
            })
            .collect()
    }

    fn next_visible(&self) -> Option<Instant> {
        self.messages.iter().map(|m| m.visible_at).min()
    }

    fn find(&self, receipt_handle: &str) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
    }
}

/// Queues held in memory, keyed by queue URL. Safe for concurrent use.
#[derive(Default)]
pub struct MemoryTransport {
    queues: Mutex<HashMap<String, MemoryQueue>>,
    sent: Notify,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn queues(&self) -> Result<MutexGuard<'_, HashMap<String, MemoryQueue>>, TransportError> {
        self.queues
            .lock()
            .map_err(|_| TransportError::new("memory", "queue state poisoned"))
    }

    /// Messages in the queue, in flight or not.
    pub fn len(&self, queue_url: &str) -> usize {
        self.queues()
            .map(|queues| queues.get(queue_url).map_or(0, |q| q.messages.len()))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, queue_url: &str) -> bool {
        self.len(queue_url) == 0
    }
}

fn invalid_receipt(operation: &'static str, receipt_handle: &str) -> TransportError {
    TransportError::new(
        operation,
        format!("receipt handle {receipt_handle} is invalid"),
    )
}

impl Transport for MemoryTransport {
    async fn send(&self, request: SendRequest) -> Result<String, TransportError> {
        let message_id = {
            let mut queues = self.queues()?;
            let queue = queues.entry(request.queue_url).or_default();
            let now = Instant::now();
            queue
                .deduplication_ids
                .retain(|_, (_, sent_at)| now.duration_since(*sent_at) < DEDUPLICATION_WINDOW);

            if let Some((existing, _)) = request
                .deduplication_id
                .as_ref()
                .and_then(|id| queue.deduplication_ids.get(id))
            {
                return Ok(existing.clone());
            }

            let message_id = uuid::Uuid::new_v4().to_string();
            if let Some(id) = request.deduplication_id {
                queue.deduplication_ids.insert(id, (message_id.clone(), now));
            }

            let delay = Duration::from_secs(request.delay_seconds.unwrap_or(0).into());
            queue.messages.push(StoredMessage {
                message_id: message_id.clone(),
                body: request.body,
                attributes: request.attributes,
                sent_timestamp: Utc::now(),
                visible_at: now + delay,
                receive_count: 0,
                receipt_handle: None,
            });
            message_id
        };

        self.sent.notify_waiters();
        Ok(message_id)
    }

    async fn receive(
        &self,
        queue_url: &str,
        options: ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, TransportError> {
        let max = usize::try_from(options.max_number_of_messages).unwrap_or(1);
        let seconds = |value: i32| Duration::from_secs(u64::try_from(value).unwrap_or(0));
        let visibility = seconds(options.visibility_timeout);
        let deadline = Instant::now() + seconds(options.wait_time_seconds);

        loop {
            // registered before the queue is inspected so a send in between still wakes us
            let sent = self.sent.notified();
            tokio::pin!(sent);
            sent.as_mut().enable();

            let (batch, next_visible) = {
                let mut queues = self.queues()?;
                let queue = queues.entry(queue_url.to_string()).or_default();
                (queue.take_visible(max, visibility), queue.next_visible())
            };

            if !batch.is_empty() || Instant::now() >= deadline {
                return Ok(batch);
            }

            let wake = next_visible.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                () = tokio::time::sleep_until(wake) => {}
                () = &mut sent => {}
            }
        }
    }

    async fn delete(&self, queue_url: &str, receipt_handle: &str) -> Result<(), TransportError> {
        let mut queues = self.queues()?;
        let queue = queues
            .get_mut(queue_url)
            .ok_or_else(|| invalid_receipt("delete", receipt_handle))?;
        let index = queue
            .find(receipt_handle)
            .ok_or_else(|| invalid_receipt("delete", receipt_handle))?;
        queue.messages.remove(index);
        Ok(())
    }

    async fn change_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout: i32,
    ) -> Result<(), TransportError> {
        let seconds = u64::try_from(visibility_timeout).map_err(|_| {
            TransportError::new(
                "change_visibility",
                format!("visibility timeout {visibility_timeout} is negative"),
            )
        })?;

        let mut queues = self.queues()?;
        let queue = queues
            .get_mut(queue_url)
            .ok_or_else(|| invalid_receipt("change_visibility", receipt_handle))?;
        let index = queue
            .find(receipt_handle)
            .ok_or_else(|| invalid_receipt("change_visibility", receipt_handle))?;
        queue.messages[index].visible_at = Instant::now() + Duration::from_secs(seconds);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::OutboundMessage;
    use std::sync::Arc;

    const QUEUE: &str = "memory://jobs";

    fn options(max: i32, wait: i32) -> ReceiveOptions {
        ReceiveOptions {
            max_number_of_messages: max,
            wait_time_seconds: wait,
            visibility_timeout: 30,
        }
    }

    fn request(body: &str) -> SendRequest {
        SendRequest::new(QUEUE, OutboundMessage::new(body).with_delay_seconds(0))
    }

    #[tokio::test(start_paused = true)]
    async fn received_message_is_hidden_until_released() {
        let transport = MemoryTransport::new();
        transport.send(request("a")).await.unwrap();

        let first = transport.receive(QUEUE, options(1, 0)).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(transport.receive(QUEUE, options(1, 0)).await.unwrap().is_empty());

        transport
            .change_visibility(QUEUE, &first[0].receipt_handle, 0)
            .await
            .unwrap();
        let again = transport.receive(QUEUE, options(1, 0)).await.unwrap();
        assert_eq!(again[0].message_id, first[0].message_id);
        assert_ne!(again[0].receipt_handle, first[0].receipt_handle);
        assert_eq!(again[0].receive_count, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_removes_and_stale_handle_fails() {
        let transport = MemoryTransport::new();
        transport.send(request("a")).await.unwrap();
        let received = transport.receive(QUEUE, options(1, 0)).await.unwrap();

        transport
            .delete(QUEUE, &received[0].receipt_handle)
            .await
            .unwrap();
        assert!(transport.is_empty(QUEUE));
        assert!(transport
            .delete(QUEUE, &received[0].receipt_handle)
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn delay_and_visibility_expire() {
        let transport = MemoryTransport::new();
        transport
            .send(SendRequest::new(QUEUE, OutboundMessage::new("late")))
            .await
            .unwrap();
        assert!(transport.receive(QUEUE, options(1, 0)).await.unwrap().is_empty());

        // the long poll wakes when the 10 second delay passes
        let received = transport.receive(QUEUE, options(1, 20)).await.unwrap();
        assert_eq!(received[0].body, "late");

        tokio::time::advance(Duration::from_secs(31)).await;
        let redelivered = transport.receive(QUEUE, options(1, 0)).await.unwrap();
        assert_eq!(redelivered[0].receive_count, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn receive_respects_batch_size_and_order() {
        let transport = MemoryTransport::new();
        for body in ["a", "b", "c"] {
            transport.send(request(body)).await.unwrap();
        }

        let batch = transport.receive(QUEUE, options(2, 0)).await.unwrap();
        let bodies: Vec<_> = batch.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_deduplication_id_is_dropped() {
        let transport = MemoryTransport::new();
        let message = OutboundMessage::new("a")
            .with_group_id("orders")
            .with_deduplication_id("order-1");

        let first = transport
            .send(SendRequest::new(QUEUE, message.clone()))
            .await
            .unwrap();
        let second = transport
            .send(SendRequest::new(QUEUE, message))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(transport.len(QUEUE), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deduplication_id_expires_after_window() {
        let transport = MemoryTransport::new();
        let message = OutboundMessage::new("a")
            .with_delay_seconds(0)
            .with_deduplication_id("order-1");

        let first = transport
            .send(SendRequest::new(QUEUE, message.clone()))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(4 * 60)).await;
        let repeat = transport
            .send(SendRequest::new(QUEUE, message.clone()))
            .await
            .unwrap();
        assert_eq!(first, repeat);

        tokio::time::advance(Duration::from_secs(60)).await;
        let fresh = transport
            .send(SendRequest::new(QUEUE, message))
            .await
            .unwrap();
        assert_ne!(first, fresh);
        assert_eq!(transport.len(QUEUE), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn long_poll_wakes_when_message_is_sent() {
        let transport = Arc::new(MemoryTransport::new());
        let poller = tokio::spawn({
            let transport = transport.clone();
            async move { transport.receive(QUEUE, options(1, 20)).await }
        });
        // let the poller find the queue empty and start waiting
        tokio::task::yield_now().await;

        let start = Instant::now();
        transport.send(request("a")).await.unwrap();
        let received = poller.await.unwrap().unwrap();

        assert_eq!(received[0].body, "a");
        assert!(start.elapsed() < Duration::from_secs(20));
    }
}
