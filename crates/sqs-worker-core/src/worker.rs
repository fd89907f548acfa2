//! Long-polling worker: receive, dispatch to a handler, acknowledge or release.

use crate::message::ReceivedMessage;
use crate::transport::{ReceiveOptions, Transport, TransportError};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;

/// Longest long-poll wait the queue service accepts.
pub const MAX_WAIT_TIME_SECONDS: i32 = 20;
/// Largest receive batch the queue service accepts.
pub const MAX_NUMBER_OF_MESSAGES: i32 = 10;
/// Longest visibility timeout the queue service accepts (12 hours).
pub const MAX_VISIBILITY_TIMEOUT: i32 = 43_200;

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Seconds to sleep after a receive that returned nothing.
    pub sleep: u64,
    /// Long-poll wait per receive, 0 to 20 seconds.
    pub wait_time_seconds: i32,
    /// Receive batch size, 1 to 10.
    pub max_number_of_messages: i32,
    /// Seconds a received message stays hidden from other consumers.
    pub visibility_timeout: i32,
    /// Consecutive transport errors after which the worker stops.
    pub consecutive_error_limit: u32,
    /// Seconds to sleep after an iteration that hit a transport error.
    pub error_backoff: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            sleep: 10,
            wait_time_seconds: 20,
            max_number_of_messages: 1,
            visibility_timeout: 3600,
            consecutive_error_limit: 5,
            error_backoff: 0,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), WorkerError> {
        if !(0..=MAX_WAIT_TIME_SECONDS).contains(&self.wait_time_seconds) {
            return Err(WorkerError::Configuration(format!(
                "wait_time_seconds must be between 0 and {MAX_WAIT_TIME_SECONDS}, got {}",
                self.wait_time_seconds
            )));
        }
        if !(1..=MAX_NUMBER_OF_MESSAGES).contains(&self.max_number_of_messages) {
            return Err(WorkerError::Configuration(format!(
                "max_number_of_messages must be between 1 and {MAX_NUMBER_OF_MESSAGES}, got {}",
                self.max_number_of_messages
            )));
        }
        if !(1..=MAX_VISIBILITY_TIMEOUT).contains(&self.visibility_timeout) {
            return Err(WorkerError::Configuration(format!(
                "visibility_timeout must be between 1 and {MAX_VISIBILITY_TIMEOUT}, got {}",
                self.visibility_timeout
            )));
        }
        if self.consecutive_error_limit == 0 {
            return Err(WorkerError::Configuration(
                "consecutive_error_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn receive_options(&self) -> ReceiveOptions {
        ReceiveOptions {
            max_number_of_messages: self.max_number_of_messages,
            wait_time_seconds: self.wait_time_seconds,
            visibility_timeout: self.visibility_timeout,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum WorkerError {
    /// Rejected before the loop started.
    Configuration(String),
    Transport(TransportError),
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::Configuration(msg) => write!(f, "invalid worker configuration: {}", msg),
            WorkerError::Transport(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for WorkerError {}

/// Processes one message.
///
/// `Ok(true)` acknowledges (deletes) the message, `Ok(false)` releases it for
/// immediate redelivery. `Err` is a handler fault: it is reported and the
/// message is released.
///
/// Implemented for any `Fn(ReceivedMessage) -> impl Future<Output = anyhow::Result<bool>>`.
pub trait Handler: Send + Sync {
    fn handle(
        &self,
        message: ReceivedMessage,
    ) -> impl Future<Output = anyhow::Result<bool>> + Send;
}

impl<F, Fut> Handler for F
where
    F: Fn(ReceivedMessage) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<bool>> + Send,
{
    fn handle(
        &self,
        message: ReceivedMessage,
    ) -> impl Future<Output = anyhow::Result<bool>> + Send {
        self(message)
    }
}

/// Called with the error text and the current consecutive transport-error count.
pub type ErrorCallback = Box<dyn Fn(&str, u32) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Polling,
    Sleeping,
    Dispatching,
    ErrorBackoff,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    ErrorLimit,
    Shutdown,
}

/// What a finished `listen` call did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenSummary {
    pub iterations: u64,
    pub acknowledged: u64,
    pub released: u64,
    pub handler_faults: u64,
    pub consecutive_errors: u32,
    pub stop_reason: StopReason,
}

/// Creates a shutdown signal channel; send `true` to stop a listening worker.
#[must_use]
pub fn shutdown_signal() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Waits for SIGINT (or SIGTERM on unix) and then flips the shutdown channel.
pub async fn wait_for_shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("failed to listen for Ctrl+C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => log::info!("received SIGINT, stopping worker"),
        () = terminate => log::info!("received SIGTERM, stopping worker"),
    }

    if let Err(e) = shutdown_tx.send(true) {
        log::error!("failed to send shutdown signal: {}", e);
    }
}

/// Sleeps for `duration`, returning early if shutdown is requested.
async fn pause(duration: Duration, shutdown: &mut watch::Receiver<bool>) {
    if duration.is_zero() {
        return;
    }
    tokio::select! {
        () = tokio::time::sleep(duration) => {}
        Ok(()) = shutdown.changed() => {}
    }
}

fn transition(state: &mut WorkerState, next: WorkerState) {
    log::trace!("worker state {:?} -> {:?}", state, next);
    *state = next;
}

fn now() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn banner(text: &str) {
    println!();
    println!("*****************************************************************");
    println!("**** {} at {}", text, now());
    println!("*****************************************************************");
}

/// Mutable bookkeeping of one `listen` call.
struct Run<'a> {
    consecutive_errors: u32,
    acknowledged: u64,
    released: u64,
    handler_faults: u64,
    on_error: Option<&'a ErrorCallback>,
}

impl Run<'_> {
    fn transport_error(&mut self, error: &TransportError) {
        self.consecutive_errors += 1;
        log::error!("{} (consecutive errors: {})", error, self.consecutive_errors);
        if let Some(on_error) = self.on_error {
            on_error(&error.to_string(), self.consecutive_errors);
        }
    }

    fn handler_fault(&mut self, message_id: &str, fault: &anyhow::Error) {
        self.handler_faults += 1;
        let text = format!("handler failed for message {message_id}: {fault:#}");
        log::error!("{}", text);
        if let Some(on_error) = self.on_error {
            on_error(&text, self.consecutive_errors);
        }
    }
}

/// Polls one queue and hands every message to a [`Handler`].
///
/// # Example
///
/// ```no_run
/// use sqs_worker::{ReceivedMessage, SqsTransport, Worker, WorkerConfig};
///
/// # async fn example() -> Result<(), sqs_worker::WorkerError> {
/// let transport = SqsTransport::from_env().await;
/// let worker = Worker::new(transport, WorkerConfig::default());
///
/// worker
///     .listen_forever(
///         "https://sqs.us-east-1.amazonaws.com/123456789/jobs",
///         |message: ReceivedMessage| async move {
///             println!("{}", message.body);
///             anyhow::Ok(true)
///         },
///         None,
///     )
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct Worker<T> {
    transport: T,
    config: WorkerConfig,
}

impl<T: Transport> Worker<T> {
    pub fn new(transport: T, config: WorkerConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Runs until the consecutive error limit is reached.
    pub async fn listen_forever<H: Handler>(
        &self,
        queue_url: &str,
        handler: H,
        on_error: Option<ErrorCallback>,
    ) -> Result<ListenSummary, WorkerError> {
        let (_shutdown_tx, shutdown_rx) = shutdown_signal();
        self.listen(queue_url, handler, on_error, shutdown_rx).await
    }

    /// Runs the poll, dispatch, acknowledge loop until the consecutive error
    /// limit is reached or `shutdown` turns `true`.
    ///
    /// The shutdown flag is checked before every iteration and interrupts the
    /// empty-queue and error-backoff sleeps; a batch in flight is always
    /// finished first.
    pub async fn listen<H: Handler>(
        &self,
        queue_url: &str,
        handler: H,
        on_error: Option<ErrorCallback>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<ListenSummary, WorkerError> {
        if queue_url.is_empty() {
            return Err(WorkerError::Configuration(
                "queue URL was not specified".to_string(),
            ));
        }
        self.config.validate()?;

        let options = self.config.receive_options();
        let mut run = Run {
            consecutive_errors: 0,
            acknowledged: 0,
            released: 0,
            handler_faults: 0,
            on_error: on_error.as_ref(),
        };
        let mut state = WorkerState::Idle;
        let mut stop_reason = StopReason::Shutdown;
        let mut iterations: u64 = 0;

        banner("Worker started");
        log::info!("listening on {queue_url}");

        while state != WorkerState::Stopped {
            let shutdown_requested = *shutdown.borrow();
            if shutdown_requested {
                stop_reason = StopReason::Shutdown;
                transition(&mut state, WorkerState::Stopped);
                continue;
            }

            println!("Check({}) time: {}", iterations, now());
            iterations += 1;
            transition(&mut state, WorkerState::Polling);

            let failed = match self.transport.receive(queue_url, options).await {
                Err(error) => {
                    run.transport_error(&error);
                    true
                }
                Ok(messages) if messages.is_empty() => {
                    println!("No messages found");
                    transition(&mut state, WorkerState::Sleeping);
                    pause(Duration::from_secs(self.config.sleep), &mut shutdown).await;
                    false
                }
                Ok(messages) => {
                    println!("Messages found");
                    transition(&mut state, WorkerState::Dispatching);
                    self.dispatch(queue_url, &handler, messages, &mut run).await
                }
            };

            if !failed {
                run.consecutive_errors = 0;
            } else if run.consecutive_errors >= self.config.consecutive_error_limit {
                log::error!("stopping after {} consecutive errors", run.consecutive_errors);
                stop_reason = StopReason::ErrorLimit;
                transition(&mut state, WorkerState::Stopped);
            } else {
                transition(&mut state, WorkerState::ErrorBackoff);
                pause(Duration::from_secs(self.config.error_backoff), &mut shutdown).await;
            }
        }

        banner("Worker finished");

        Ok(ListenSummary {
            iterations,
            acknowledged: run.acknowledged,
            released: run.released,
            handler_faults: run.handler_faults,
            consecutive_errors: run.consecutive_errors,
            stop_reason,
        })
    }

    /// Hands each message to the handler in receive order and settles it.
    /// Returns whether any transport call failed; a failure does not stop the
    /// rest of the batch from being settled.
    async fn dispatch<H: Handler>(
        &self,
        queue_url: &str,
        handler: &H,
        messages: Vec<ReceivedMessage>,
        run: &mut Run<'_>,
    ) -> bool {
        let mut failed = false;

        for message in messages {
            let receipt_handle = message.receipt_handle.clone();
            let message_id = message.message_id.clone();

            let settled = match handler.handle(message).await {
                Ok(true) => self
                    .transport
                    .delete(queue_url, &receipt_handle)
                    .await
                    .map(|()| run.acknowledged += 1),
                Ok(false) => self
                    .release(queue_url, &receipt_handle)
                    .await
                    .map(|()| run.released += 1),
                Err(fault) => {
                    run.handler_fault(&message_id, &fault);
                    self.release(queue_url, &receipt_handle)
                        .await
                        .map(|()| run.released += 1)
                }
            };

            if let Err(error) = settled {
                run.transport_error(&error);
                failed = true;
            }
        }

        failed
    }

    /// Makes the delivery visible again right away.
    async fn release(&self, queue_url: &str, receipt_handle: &str) -> Result<(), TransportError> {
        self.transport
            .change_visibility(queue_url, receipt_handle, 0)
            .await
    }

    /// Acknowledges a delivery outside the listen loop.
    pub async fn delete_message(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> Result<(), WorkerError> {
        if queue_url.is_empty() || receipt_handle.is_empty() {
            return Err(WorkerError::Configuration(
                "queue URL and receipt handle are required".to_string(),
            ));
        }
        self.transport
            .delete(queue_url, receipt_handle)
            .await
            .map_err(WorkerError::Transport)
    }
}
