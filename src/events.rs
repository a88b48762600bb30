use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{AsRefStr, Display, EnumString};

use crate::error::ExchangeError;

/// Speaker of a single turn
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One utterance in a conversation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    role: Role,
    content: String,
    created_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Server-assigned identifier correlating a submitted request with its result stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Latest user text plus the history as it stood when `submit` was called
#[derive(Debug, Clone)]
pub struct ExchangeRequest {
    pub input: String,
    pub history: Vec<Turn>,
}

impl ExchangeRequest {
    pub fn new(input: impl Into<String>, history: Vec<Turn>) -> Self {
        Self {
            input: input.into(),
            history,
        }
    }

    /// History folded into `[user, assistant]` pairs, the shape hosted chat
    /// endpoints expect. A trailing unpaired user turn keeps an empty reply slot.
    pub fn history_pairs(&self) -> Vec<[String; 2]> {
        let mut pairs = Vec::with_capacity(self.history.len() / 2);
        let mut pending_user: Option<&str> = None;

        for turn in &self.history {
            match turn.role() {
                Role::User => {
                    if let Some(user) = pending_user.take() {
                        pairs.push([user.to_string(), String::new()]);
                    }
                    pending_user = Some(turn.content());
                }
                Role::Assistant => {
                    let user = pending_user.take().unwrap_or_default();
                    pairs.push([user.to_string(), turn.content().to_string()]);
                }
            }
        }

        if let Some(user) = pending_user {
            pairs.push([user.to_string(), String::new()]);
        }

        pairs
    }
}

/// Lifecycle of a single exchange
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExchangeState {
    /// Nothing submitted yet. A `PendingExchange` starts at `Submitting`, so
    /// this is only what a front end holds while no exchange is in flight.
    #[default]
    Idle,
    Submitting,
    AwaitingResult { job_id: JobId },
    Completed,
    Failed(ExchangeError),
    /// Released locally before a terminal event arrived
    Released,
}

impl ExchangeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExchangeState::Completed | ExchangeState::Failed(_) | ExchangeState::Released
        )
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ExchangeState::Idle => "idle",
            ExchangeState::Submitting => "submitting",
            ExchangeState::AwaitingResult { .. } => "awaiting result",
            ExchangeState::Completed => "completed",
            ExchangeState::Failed(_) => "failed",
            ExchangeState::Released => "released",
        }
    }
}

/// The single terminal event of an exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    Completed(String),
    Failed(ExchangeError),
}

impl ExchangeOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ExchangeOutcome::Completed(_))
    }

    pub fn into_result(self) -> Result<String, ExchangeError> {
        match self {
            ExchangeOutcome::Completed(text) => Ok(text),
            ExchangeOutcome::Failed(err) => Err(err),
        }
    }
}
