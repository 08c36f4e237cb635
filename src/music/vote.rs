use std::collections::HashSet;

use serenity::model::id::UserId;

use crate::music::error::{MusicError, Result};

/// Skip votes cast against the current track only.
#[derive(Debug, Default)]
pub struct VoteSkipTracker {
    voters: HashSet<UserId>,
}

impl VoteSkipTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a vote and returns the updated count.
    pub fn vote_skip(&mut self, voter: UserId) -> Result<usize> {
        if !self.voters.insert(voter) {
            return Err(MusicError::AlreadyVoted);
        }

        Ok(self.voters.len())
    }

    /// Majority of the members connected right now, never less than one vote.
    pub fn threshold(channel_size: usize) -> usize {
        ((channel_size + 1) / 2).max(1)
    }

    pub fn should_skip(&self, channel_size: usize) -> bool {
        self.count() >= Self::threshold(channel_size)
    }

    pub fn count(&self) -> usize {
        self.voters.len()
    }

    #[cfg(test)]
    pub fn has_voted(&self, voter: UserId) -> bool {
        self.voters.contains(&voter)
    }

    pub fn reset(&mut self) {
        self.voters.clear();
    }
}
