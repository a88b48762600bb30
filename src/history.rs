//! In-memory conversation log shared between the exchange client and its front end

use parking_lot::RwLock;
use std::sync::Arc;

use crate::events::Turn;

/// Ordered, append-only conversation log.
///
/// Cloning yields another handle onto the same log. Readers get snapshots;
/// the only mutators are [`ConversationHistory::append_exchange`], which the
/// exchange client calls when a job completes, and the explicit
/// [`ConversationHistory::clear`].
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    turns: Arc<RwLock<Vec<Turn>>>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a history with pre-existing turns
    pub fn with_turns(turns: Vec<Turn>) -> Self {
        Self {
            turns: Arc::new(RwLock::new(turns)),
        }
    }

    /// Append a completed (user, assistant) pair. Both turns land under one
    /// write lock so concurrent completions never split a pair.
    pub fn append_exchange(&self, user: Turn, assistant: Turn) {
        let mut turns = self.turns.write();
        turns.push(user);
        turns.push(assistant);
    }

    /// Copy of the current turns, in insertion order
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.read().clone()
    }

    pub fn len(&self) -> usize {
        self.turns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.read().is_empty()
    }

    /// Drop every turn. Only invoked on explicit user request.
    pub fn clear(&self) {
        self.turns.write().clear();
    }
}
