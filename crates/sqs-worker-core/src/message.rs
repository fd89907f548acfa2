//! Outbound and received message types.

use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;

/// Delay applied to published messages unless the caller overrides it.
pub const DEFAULT_DELAY_SECONDS: u32 = 10;

/// A typed message attribute value.
///
/// SQS transports numbers as strings, so [`AttributeValue::Number`] keeps the
/// textual form. `data_type` holds the full SQS data type including any custom
/// suffix (`Number.int`, `String.json`, ...).
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AttributeValue {
    String { data_type: String, value: String },
    Number { data_type: String, value: String },
    Binary { data_type: String, value: Vec<u8> },
}

impl AttributeValue {
    pub fn string(value: impl Into<String>) -> Self {
        AttributeValue::String {
            data_type: "String".to_string(),
            value: value.into(),
        }
    }

    pub fn number(value: impl ToString) -> Self {
        AttributeValue::Number {
            data_type: "Number".to_string(),
            value: value.to_string(),
        }
    }

    pub fn binary(value: impl Into<Vec<u8>>) -> Self {
        AttributeValue::Binary {
            data_type: "Binary".to_string(),
            value: value.into(),
        }
    }

    pub fn data_type(&self) -> &str {
        match self {
            AttributeValue::String { data_type, .. }
            | AttributeValue::Number { data_type, .. }
            | AttributeValue::Binary { data_type, .. } => data_type,
        }
    }
}

pub type Attributes = HashMap<String, AttributeValue>;

/// A message to be published.
///
/// Built with the consuming `with_*` methods and immutable afterwards.
///
/// # Example
///
/// ```
/// use sqs_worker::{AttributeValue, OutboundMessage};
///
/// let message = OutboundMessage::new("hello")
///     .with_attribute("kind", AttributeValue::string("greeting"))
///     .with_delay_seconds(0)
///     .with_group_id("greetings");
///
/// assert_eq!(message.body(), "hello");
/// assert_eq!(message.delay_seconds(), 0);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    body: String,
    attributes: Attributes,
    delay_seconds: u32,
    group_id: String,
    deduplication_id: String,
}

impl OutboundMessage {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            attributes: Attributes::new(),
            delay_seconds: DEFAULT_DELAY_SECONDS,
            group_id: String::new(),
            deduplication_id: String::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes.extend(attributes);
        self
    }

    pub fn with_delay_seconds(mut self, delay_seconds: u32) -> Self {
        self.delay_seconds = delay_seconds;
        self
    }

    /// Message group id, required by FIFO queues.
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    /// Deduplication id, used by FIFO queues without content-based deduplication.
    pub fn with_deduplication_id(mut self, deduplication_id: impl Into<String>) -> Self {
        self.deduplication_id = deduplication_id.into();
        self
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn delay_seconds(&self) -> u32 {
        self.delay_seconds
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn deduplication_id(&self) -> &str {
        &self.deduplication_id
    }
}

/// The request handed to a transport's `send`.
///
/// Defaults are omitted rather than sent as zero values: a zero delay and
/// empty group/deduplication ids are `None`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendRequest {
    pub queue_url: String,
    pub body: String,
    pub attributes: Attributes,
    pub delay_seconds: Option<u32>,
    pub group_id: Option<String>,
    pub deduplication_id: Option<String>,
}

impl SendRequest {
    pub fn new(queue_url: &str, message: OutboundMessage) -> Self {
        let OutboundMessage {
            body,
            attributes,
            delay_seconds,
            group_id,
            deduplication_id,
        } = message;

        Self {
            queue_url: queue_url.to_string(),
            body,
            attributes,
            delay_seconds: (delay_seconds > 0).then_some(delay_seconds),
            group_id: (!group_id.is_empty()).then_some(group_id),
            deduplication_id: (!deduplication_id.is_empty()).then_some(deduplication_id),
        }
    }
}

/// A single delivery of a message.
///
/// The receipt handle identifies this delivery, not the logical message: a
/// redelivered message arrives with a new handle.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct ReceivedMessage {
    /// Unique identifier for the message assigned by the queue service
    pub message_id: String,
    /// Handle used to delete or change visibility of this delivery
    pub receipt_handle: String,
    /// The message content
    pub body: String,
    /// Custom message attributes
    pub attributes: Attributes,
    /// When the queue service accepted the message
    pub sent_timestamp: Option<DateTime<Utc>>,
    /// How many times this message has been received, this delivery included
    pub receive_count: Option<u32>,
}

impl ReceivedMessage {
    /// Parses the `SentTimestamp` system attribute, which is epoch milliseconds.
    pub fn parse_sent_timestamp(millis: &str) -> Option<DateTime<Utc>> {
        let millis = millis.parse::<i64>().ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }
}
