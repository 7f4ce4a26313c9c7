use crate::context::{Role, Turn};
use crate::error::{ChatError, Result};

/// Ordered turns of one conversation. Appends must alternate User, Model,
/// User, … starting with User; anything else is rejected at the boundary.
#[derive(Debug, Default)]
pub struct TurnStore {
    turns: Vec<Turn>,
    // Bumped by clear(); an in-flight response captured the old value.
    epoch: u64,
}

impl TurnStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Role the next appended turn must have.
    pub fn expected_role(&self) -> Role {
        self.turns.last().map_or(Role::User, |t| t.role.next())
    }

    pub fn append(&mut self, turn: Turn) -> Result<()> {
        let expected = self.expected_role();
        if turn.role != expected {
            return Err(ChatError::InvalidTurnOrder {
                expected,
                found: turn.role,
            });
        }
        if turn.content.is_empty() {
            return Err(ChatError::EmptyTurn);
        }
        self.turns.push(turn);
        Ok(())
    }

    pub fn all(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Remove the trailing turn if it is a user turn awaiting a reply.
    /// Used to roll back after a failed request.
    pub fn pop_pending_user(&mut self) -> Option<Turn> {
        match self.turns.last() {
            Some(turn) if turn.role == Role::User => self.turns.pop(),
            _ => None,
        }
    }

    /// True when the last turn is a user turn with no reply yet.
    pub fn awaiting_reply(&self) -> bool {
        self.expected_role() == Role::Model
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.epoch += 1;
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
