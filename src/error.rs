use thiserror::Error;

/// Exchange failures. Every variant except `EmptyInput` ends an exchange;
/// none of them affect the client or the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    /// Input was empty after trimming; nothing was sent.
    #[error("input is empty")]
    EmptyInput,

    /// Job creation returned a non-success status or the transport failed
    /// before a job id was obtained.
    #[error("submission failed: {reason}")]
    SubmissionFailed { reason: String },

    /// The push subscription reported an error or closed before a terminal event.
    #[error("subscription failed: {reason}")]
    SubscriptionFailed { reason: String },

    /// A completion arrived without usable result text.
    #[error("malformed result: {reason}")]
    MalformedResult { reason: String },
}

impl ExchangeError {
    pub fn submission(reason: impl Into<String>) -> Self {
        Self::SubmissionFailed {
            reason: reason.into(),
        }
    }

    pub fn subscription(reason: impl Into<String>) -> Self {
        Self::SubscriptionFailed {
            reason: reason.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedResult {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyInput => "EmptyInput",
            Self::SubmissionFailed { .. } => "SubmissionFailed",
            Self::SubscriptionFailed { .. } => "SubscriptionFailed",
            Self::MalformedResult { .. } => "MalformedResult",
        }
    }
}
