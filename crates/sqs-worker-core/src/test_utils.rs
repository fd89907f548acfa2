use crate::message::{Attributes, ReceivedMessage, SendRequest};
use crate::transport::{ReceiveOptions, Transport, TransportError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

/// One recorded transport call, in call order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Send(String),
    Receive(ReceiveOptions),
    Delete(String),
    ChangeVisibility(String, i32),
}

#[derive(Default)]
struct State {
    calls: Vec<(Call, Instant)>,
    sends: Vec<SendRequest>,
    send_failures: usize,
    delete_failures: usize,
    visibility_failures: usize,
    receives: VecDeque<Result<Vec<ReceivedMessage>, TransportError>>,
}

/// A transport that replays scripted receive results, injects failures and
/// records every call. Once the receive script runs out, every receive fails.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    state: Arc<Mutex<State>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn fail_sends(&self, count: usize) {
        self.with_state(|s| s.send_failures = count);
    }

    pub fn fail_deletes(&self, count: usize) {
        self.with_state(|s| s.delete_failures = count);
    }

    pub fn fail_visibility_changes(&self, count: usize) {
        self.with_state(|s| s.visibility_failures = count);
    }

    pub fn push_messages(&self, messages: Vec<ReceivedMessage>) {
        self.with_state(|s| s.receives.push_back(Ok(messages)));
    }

    pub fn push_empty(&self) {
        self.push_messages(Vec::new());
    }

    pub fn push_receive_errors(&self, count: usize) {
        self.with_state(|s| {
            for _ in 0..count {
                s.receives
                    .push_back(Err(TransportError::new("receive", "connection reset")));
            }
        });
    }

    pub fn sends(&self) -> Vec<SendRequest> {
        self.with_state(|s| s.sends.clone())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.with_state(|s| s.calls.iter().map(|(call, _)| call.clone()).collect())
    }

    pub fn timed_calls(&self) -> Vec<(Call, Instant)> {
        self.with_state(|s| s.calls.clone())
    }

    pub fn receive_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Receive(_)))
            .count()
    }

    fn record(&self, call: Call) {
        self.with_state(|s| s.calls.push((call, Instant::now())));
    }
}

fn take_failure(counter: &mut usize) -> bool {
    if *counter == 0 {
        return false;
    }
    if *counter != usize::MAX {
        *counter -= 1;
    }
    true
}

impl Transport for RecordingTransport {
    async fn send(&self, request: SendRequest) -> Result<String, TransportError> {
        self.record(Call::Send(request.body.clone()));
        self.with_state(|s| {
            s.sends.push(request);
            if take_failure(&mut s.send_failures) {
                Err(TransportError::new("send", "service unavailable"))
            } else {
                Ok(format!("msg-{}", s.sends.len()))
            }
        })
    }

    async fn receive(
        &self,
        _queue_url: &str,
        options: ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, TransportError> {
        self.record(Call::Receive(options));
        self.with_state(|s| {
            s.receives
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::new("receive", "script exhausted")))
        })
    }

    async fn delete(&self, _queue_url: &str, receipt_handle: &str) -> Result<(), TransportError> {
        self.record(Call::Delete(receipt_handle.to_string()));
        self.with_state(|s| {
            if take_failure(&mut s.delete_failures) {
                Err(TransportError::new("delete", "receipt handle expired"))
            } else {
                Ok(())
            }
        })
    }

    async fn change_visibility(
        &self,
        _queue_url: &str,
        receipt_handle: &str,
        visibility_timeout: i32,
    ) -> Result<(), TransportError> {
        self.record(Call::ChangeVisibility(
            receipt_handle.to_string(),
            visibility_timeout,
        ));
        self.with_state(|s| {
            if take_failure(&mut s.visibility_failures) {
                Err(TransportError::new("change_visibility", "throttled"))
            } else {
                Ok(())
            }
        })
    }
}

pub fn message(n: usize) -> ReceivedMessage {
    ReceivedMessage {
        message_id: format!("m-{n}"),
        receipt_handle: format!("rh-{n}"),
        body: format!("body-{n}"),
        attributes: Attributes::new(),
        sent_timestamp: None,
        receive_count: Some(1),
    }
}
