//! Conversational exchange client.
//!
//! An exchange is one submit-and-await cycle: the request is posted to the
//! job endpoint, the returned job id is followed over a push subscription,
//! and exactly one terminal outcome is produced. Only a completed exchange
//! touches the conversation history.

use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::ExchangeError;
use crate::events::{ExchangeOutcome, ExchangeRequest, ExchangeState, Turn};
use crate::history::ConversationHistory;
use crate::transport::{result_text, HttpTransport, JobTransport, PushEvent};

/// Submits user text to a job-based inference service and records completed
/// exchanges in the injected [`ConversationHistory`].
pub struct ExchangeClient {
    transport: Arc<dyn JobTransport>,
    history: ConversationHistory,
    serialize: bool,
    /// Completion signal of the most recently submitted exchange
    tail: Mutex<Option<oneshot::Receiver<()>>>,
}

impl ExchangeClient {
    pub fn new(transport: Arc<dyn JobTransport>, history: ConversationHistory) -> Self {
        Self {
            transport,
            history,
            serialize: true,
            tail: Mutex::new(None),
        }
    }

    /// Build a client talking HTTP to the endpoint described by `config`
    pub fn from_config(config: &Config, history: ConversationHistory) -> anyhow::Result<Self> {
        let transport = HttpTransport::new(config)?;
        info!(endpoint = %transport.endpoint(), protocol = %config.protocol, "exchange client ready");

        Ok(Self::new(Arc::new(transport), history).with_serialization(config.serialize_exchanges))
    }

    /// When enabled (the default), overlapping submissions run one after
    /// another in submission order. When disabled they run concurrently and
    /// land in history in completion order.
    pub fn with_serialization(mut self, serialize: bool) -> Self {
        self.serialize = serialize;
        self
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Start an exchange for `text`.
    ///
    /// Blank input is rejected with [`ExchangeError::EmptyInput`] before any
    /// network activity. Otherwise the returned handle is already in
    /// [`ExchangeState::Submitting`] and the exchange proceeds in the
    /// background.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, text: &str) -> Result<PendingExchange, ExchangeError> {
        let input = text.trim();
        if input.is_empty() {
            return Err(ExchangeError::EmptyInput);
        }

        let id = Uuid::new_v4();
        // Taken now, not when a queued exchange starts
        let request = ExchangeRequest::new(input, self.history.snapshot());
        let (state_tx, state_rx) = watch::channel(ExchangeState::Submitting);
        let cancel = CancellationToken::new();

        let (previous, done) = if self.serialize {
            let (done_tx, done_rx) = oneshot::channel();
            (self.tail.lock().replace(done_rx), Some(done_tx))
        } else {
            (None, None)
        };

        debug!(exchange_id = %id, history_turns = request.history.len(), "exchange submitted");

        let task = ExchangeTask {
            id,
            transport: Arc::clone(&self.transport),
            history: self.history.clone(),
            user_turn: Turn::user(input),
            request,
            state: state_tx,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(task.run(previous, done));

        Ok(PendingExchange {
            id,
            state: state_rx,
            cancel,
            handle: Some(handle),
            outcome: None,
        })
    }
}

/// Handle onto an in-flight exchange.
///
/// Dropping the handle releases the exchange the same way
/// [`PendingExchange::cancel`] does.
pub struct PendingExchange {
    id: Uuid,
    state: watch::Receiver<ExchangeState>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<Option<ExchangeOutcome>>>,
    outcome: Option<Option<ExchangeOutcome>>,
}

impl PendingExchange {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> ExchangeState {
        self.state.borrow().clone()
    }

    /// Watch channel following every state transition
    pub fn subscribe_state(&self) -> watch::Receiver<ExchangeState> {
        self.state.clone()
    }

    /// Stop delivery locally. Nothing is sent to the remote service; its job
    /// may keep running unobserved. Safe to call repeatedly and from any state.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the terminal outcome.
    ///
    /// Returns `None` when the exchange was released before a terminal event
    /// arrived. Later calls return the same value.
    pub async fn wait(&mut self) -> Option<ExchangeOutcome> {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }

        let outcome = match self.handle.take() {
            Some(handle) => match handle.await {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!(exchange_id = %self.id, error = %err, "exchange task aborted");
                    None
                }
            },
            None => None,
        };

        self.outcome = Some(outcome.clone());
        outcome
    }
}

impl Drop for PendingExchange {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct ExchangeTask {
    id: Uuid,
    transport: Arc<dyn JobTransport>,
    history: ConversationHistory,
    user_turn: Turn,
    request: ExchangeRequest,
    state: watch::Sender<ExchangeState>,
    cancel: CancellationToken,
}

impl ExchangeTask {
    async fn run(
        self,
        previous: Option<oneshot::Receiver<()>>,
        done: Option<oneshot::Sender<()>>,
    ) -> Option<ExchangeOutcome> {
        // A dropped sender also counts as "finished".
        let mut turn = Box::pin(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
        });

        let cancelled = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => true,
            _ = &mut turn => false,
        };

        if cancelled {
            self.release();
            // Successors still wait for our predecessor.
            tokio::spawn(async move {
                turn.await;
                drop(done);
            });
            return None;
        }

        let outcome = self.exchange().await;
        drop(done);
        outcome
    }

    async fn exchange(&self) -> Option<ExchangeOutcome> {
        let created = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            created = self.transport.create_job(&self.request) => Some(created),
        };
        let job_id = match created {
            None => return self.release(),
            Some(Ok(job_id)) => job_id,
            Some(Err(err)) => return Some(self.fail(err)),
        };

        info!(exchange_id = %self.id, job_id = %job_id, "job created, awaiting result");
        self.state.send_replace(ExchangeState::AwaitingResult {
            job_id: job_id.clone(),
        });

        let subscribed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            subscribed = self.transport.subscribe(&job_id) => Some(subscribed),
        };
        let mut stream = match subscribed {
            None => {
                self.transport.discard(&job_id);
                return self.release();
            }
            Some(Ok(stream)) => stream,
            Some(Err(err)) => return Some(self.fail(err)),
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.release(),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(PushEvent::Complete(data))) => {
                    return Some(match result_text(&data) {
                        Ok(text) => self.complete(text),
                        Err(err) => self.fail(err),
                    });
                }
                Some(Ok(PushEvent::Error(data))) => {
                    return Some(self.fail(ExchangeError::subscription(describe_remote_error(&data))));
                }
                Some(Ok(PushEvent::Progress { event })) => {
                    trace!(exchange_id = %self.id, event = %event, "ignoring non-terminal event");
                }
                Some(Err(err)) => return Some(self.fail(err)),
                None => {
                    return Some(self.fail(ExchangeError::subscription(
                        "stream closed before a terminal event",
                    )));
                }
            }
        }
    }

    fn complete(&self, text: String) -> ExchangeOutcome {
        self.history
            .append_exchange(self.user_turn.clone(), Turn::assistant(text.clone()));
        self.state.send_replace(ExchangeState::Completed);
        info!(exchange_id = %self.id, reply_len = text.len(), "exchange completed");
        ExchangeOutcome::Completed(text)
    }

    fn fail(&self, err: ExchangeError) -> ExchangeOutcome {
        warn!(exchange_id = %self.id, kind = err.kind(), error = %err, "exchange failed");
        self.state.send_replace(ExchangeState::Failed(err.clone()));
        ExchangeOutcome::Failed(err)
    }

    fn release(&self) -> Option<ExchangeOutcome> {
        let released = self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = ExchangeState::Released;
                true
            }
        });
        if released {
            debug!(exchange_id = %self.id, "exchange released before a terminal event");
        }
        None
    }
}

fn describe_remote_error(data: &str) -> String {
    let data = data.trim();
    match serde_json::from_str::<serde_json::Value>(data) {
        Ok(serde_json::Value::Null) => "remote job reported an error".to_string(),
        Ok(serde_json::Value::String(message)) if !message.trim().is_empty() => message,
        _ if data.is_empty() => "remote job reported an error".to_string(),
        _ => data.to_string(),
    }
}
