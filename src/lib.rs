//! Conversational exchange client for job-based hosted inference endpoints.
//!
//! A user utterance and the prior turns are submitted as a job; the job's
//! result is followed over a Server-Sent Events subscription and exactly one
//! terminal outcome is delivered. Completed exchanges are appended to an
//! injected, in-memory [`ConversationHistory`].

pub mod chat;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod history;
pub mod transport;

pub use client::{ExchangeClient, PendingExchange};
pub use config::{Config, Protocol};
pub use error::ExchangeError;
pub use events::{ExchangeOutcome, ExchangeRequest, ExchangeState, JobId, Role, Turn};
pub use history::ConversationHistory;
pub use transport::{HttpTransport, JobTransport, PushEvent, PushStream};
