//! The seam between the publisher/worker and the queue service.

use crate::message::{ReceivedMessage, SendRequest};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Parameters of a single receive call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReceiveOptions {
    pub max_number_of_messages: i32,
    pub wait_time_seconds: i32,
    pub visibility_timeout: i32,
}

/// A failure reported by the queue service or the network in between.
///
/// Only the human-readable message is assumed; the operation name is kept
/// for log context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportError {
    pub operation: &'static str,
    pub message: String,
}

impl TransportError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.operation, self.message)
    }
}

impl std::error::Error for TransportError {}

/// Send/receive/delete/change-visibility primitives against a queue service.
///
/// A transport shared between several workers must itself be safe for
/// concurrent use; [`crate::SqsTransport`] is, because the AWS client is.
pub trait Transport: Send + Sync {
    /// Enqueues a message and returns the id assigned by the service.
    fn send(
        &self,
        request: SendRequest,
    ) -> impl Future<Output = Result<String, TransportError>> + Send;

    /// Receives up to `options.max_number_of_messages` messages, waiting up to
    /// `options.wait_time_seconds` when the queue is empty.
    fn receive(
        &self,
        queue_url: &str,
        options: ReceiveOptions,
    ) -> impl Future<Output = Result<Vec<ReceivedMessage>, TransportError>> + Send;

    fn delete(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn change_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout: i32,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn send(
        &self,
        request: SendRequest,
    ) -> impl Future<Output = Result<String, TransportError>> + Send {
        (**self).send(request)
    }

    fn receive(
        &self,
        queue_url: &str,
        options: ReceiveOptions,
    ) -> impl Future<Output = Result<Vec<ReceivedMessage>, TransportError>> + Send {
        (**self).receive(queue_url, options)
    }

    fn delete(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        (**self).delete(queue_url, receipt_handle)
    }

    fn change_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout: i32,
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        (**self).change_visibility(queue_url, receipt_handle, visibility_timeout)
    }
}
