//! [`Transport`] over AWS SQS.

use crate::message::{AttributeValue, Attributes, ReceivedMessage, SendRequest};
use crate::transport::{ReceiveOptions, Transport, TransportError};
use aws_config::SdkConfig;
use aws_sdk_sqs as sqs;
use sqs::error::{DisplayErrorContext, SdkError};
use sqs::primitives::Blob;
use sqs::types::{MessageAttributeValue, MessageSystemAttributeName};
use std::collections::HashMap;
use std::fmt;

/// Builds an SDK config loader pointed at a local SQS endpoint (LocalStack)
/// with static test credentials.
pub fn local_config(endpoint_url: &str, region: Option<&'static str>) -> aws_config::ConfigLoader {
    aws_config::defaults(aws_config::BehaviorVersion::latest())
        .endpoint_url(endpoint_url)
        .region(region.unwrap_or("us-east-1"))
        .credentials_provider(sqs::config::Credentials::new(
            "test", "test", None, None, "static",
        ))
}

/// Client for an SQS (or SQS-compatible) queue service.
///
/// # Example
///
/// ```no_run
/// use sqs_worker::SqsTransport;
///
/// # async fn example() {
/// let config = aws_config::from_env().load().await;
/// let transport = SqsTransport::from_config(config);
/// # }
/// ```
#[derive(Clone)]
pub struct SqsTransport {
    /// The AWS SDK configuration used for SQS operations
    pub config: SdkConfig,
    /// The SQS client instance
    pub client: sqs::Client,
}

impl SqsTransport {
    /// Creates a transport from a pre-built AWS SDK config.
    pub fn from_config(config: SdkConfig) -> Self {
        let client = sqs::Client::new(&config);
        Self { config, client }
    }

    /// Loads credentials and region from the environment.
    pub async fn from_env() -> Self {
        Self::from_config(aws_config::from_env().load().await)
    }

    /// Targets a local endpoint such as LocalStack.
    pub async fn local(endpoint_url: &str) -> Self {
        Self::from_config(local_config(endpoint_url, None).load().await)
    }
}

fn transport_error<E, R>(operation: &'static str, error: SdkError<E, R>) -> TransportError
where
    E: std::error::Error + 'static,
    R: fmt::Debug,
{
    let message = match error {
        // the service's own message (e.g. from the XML/JSON response)
        SdkError::ServiceError(se) => se.err().to_string(),
        // dispatch failures and timeouts only name the cause in their sources
        other => DisplayErrorContext(other).to_string(),
    };
    TransportError::new(operation, message)
}

fn to_sqs_attributes(
    attributes: Attributes,
) -> Result<HashMap<String, MessageAttributeValue>, TransportError> {
    attributes
        .into_iter()
        .map(|(name, value)| {
            let builder = MessageAttributeValue::builder().data_type(value.data_type());
            let builder = match value {
                AttributeValue::String { value, .. } | AttributeValue::Number { value, .. } => {
                    builder.string_value(value)
                }
                AttributeValue::Binary { value, .. } => builder.binary_value(Blob::new(value)),
            };
            builder
                .build()
                .map(|built| (name, built))
                .map_err(|e| TransportError::new("send", e.to_string()))
        })
        .collect()
}

fn from_sqs_attributes(attributes: HashMap<String, MessageAttributeValue>) -> Attributes {
    attributes
        .into_iter()
        .filter_map(|(name, value)| {
            let data_type = value.data_type().to_string();
            let converted = if data_type.starts_with("Binary") {
                AttributeValue::Binary {
                    value: value.binary_value()?.as_ref().to_vec(),
                    data_type,
                }
            } else if data_type.starts_with("Number") {
                AttributeValue::Number {
                    value: value.string_value()?.to_string(),
                    data_type,
                }
            } else {
                AttributeValue::String {
                    value: value.string_value()?.to_string(),
                    data_type,
                }
            };
            Some((name, converted))
        })
        .collect()
}

fn from_sqs_message(message: sqs::types::Message) -> Option<ReceivedMessage> {
    let Some(receipt_handle) = message.receipt_handle else {
        log::warn!(
            "skipping message {:?} without a receipt handle",
            message.message_id
        );
        return None;
    };

    let system = message.attributes.unwrap_or_default();
    let sent_timestamp = system
        .get(&MessageSystemAttributeName::SentTimestamp)
        .and_then(|millis| ReceivedMessage::parse_sent_timestamp(millis));
    let receive_count = system
        .get(&MessageSystemAttributeName::ApproximateReceiveCount)
        .and_then(|count| count.parse().ok());

    Some(ReceivedMessage {
        message_id: message.message_id.unwrap_or_default(),
        receipt_handle,
        body: message.body.unwrap_or_default(),
        attributes: from_sqs_attributes(message.message_attributes.unwrap_or_default()),
        sent_timestamp,
        receive_count,
    })
}

impl Transport for SqsTransport {
    async fn send(&self, request: SendRequest) -> Result<String, TransportError> {
        let SendRequest {
            queue_url,
            body,
            attributes,
            delay_seconds,
            group_id,
            deduplication_id,
        } = request;

        let attributes = to_sqs_attributes(attributes)?;
        let delay_seconds = delay_seconds
            .map(i32::try_from)
            .transpose()
            .map_err(|e| TransportError::new("send", e.to_string()))?;

        log::debug!("sending message to {queue_url}");

        let output = self
            .client
            .send_message()
            .queue_url(queue_url)
            .message_body(body)
            .set_message_attributes((!attributes.is_empty()).then_some(attributes))
            .set_delay_seconds(delay_seconds)
            .set_message_group_id(group_id)
            .set_message_deduplication_id(deduplication_id)
            .send()
            .await
            .map_err(|e| transport_error("send", e))?;

        Ok(output.message_id.unwrap_or_default())
    }

    async fn receive(
        &self,
        queue_url: &str,
        options: ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, TransportError> {
        let output = self
            .client
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(options.max_number_of_messages)
            .wait_time_seconds(options.wait_time_seconds)
            .visibility_timeout(options.visibility_timeout)
            .message_system_attribute_names(MessageSystemAttributeName::SentTimestamp)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(|e| transport_error("receive", e))?;

        // `None` and an empty list both mean nothing was available
        Ok(output
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(from_sqs_message)
            .collect())
    }

    async fn delete(&self, queue_url: &str, receipt_handle: &str) -> Result<(), TransportError> {
        self.client
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| transport_error("delete", e))?;

        Ok(())
    }

    async fn change_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout: i32,
    ) -> Result<(), TransportError> {
        self.client
            .change_message_visibility()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(visibility_timeout)
            .send()
            .await
            .map_err(|e| transport_error("change_visibility", e))?;

        Ok(())
    }
}
