use std::fmt;

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Leader received `NEW_ELECTION` and is fanning out `ELECTION`.
    Preparing,
    Mining,
    /// Leader has at least one winner and waits for the rest.
    CollectingWinAdvice,
    /// Threshold reached, `ELECTED` is going out.
    Electing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Preparing => "preparing",
            Phase::Mining => "mining",
            Phase::CollectingWinAdvice => "collecting",
            Phase::Electing => "electing",
        };
        f.write_str(name)
    }
}

/// Per-node election bookkeeping. Collected winners live under their own lock
/// in the coordinator.
#[derive(Debug)]
pub struct ElectionState {
    pub is_leader: bool,
    pub phase: Phase,
    pub under_election: bool,
    /// Set from the first `ELECTION`/`NEW_ELECTION` of a round until its `ELECTED`.
    pub round_active: bool,
    pub required_leader_count: usize,
    pub difficulty: u32,
    /// Round payload every miner hashes with its nonce.
    pub election_nonce: String,
    pub become_leader_after_election: bool,
    /// The address other leaders will list for us if our win is accepted.
    pub advertised_self: Option<String>,
    pub mining: bool,
    round_cancel: CancellationToken,
    parent: CancellationToken,
}

impl ElectionState {
    pub fn new(parent: CancellationToken) -> Self {
        Self {
            is_leader: false,
            phase: Phase::Idle,
            under_election: false,
            round_active: false,
            required_leader_count: 0,
            difficulty: 0,
            election_nonce: String::new(),
            become_leader_after_election: false,
            advertised_self: None,
            mining: false,
            round_cancel: parent.child_token(),
            parent,
        }
    }

    /// Leader side of `NEW_ELECTION`.
    pub fn prepare(&mut self, leader_count: usize, difficulty: u32, payload: &str) -> CancellationToken {
        let token = self.begin_round(difficulty, payload);
        self.phase = Phase::Preparing;
        self.under_election = true;
        self.required_leader_count = leader_count;
        token
    }

    /// Starts a fresh round, cancelling whatever the previous one was mining.
    pub fn begin_round(&mut self, difficulty: u32, payload: &str) -> CancellationToken {
        self.round_cancel.cancel();
        self.round_cancel = self.parent.child_token();
        self.round_active = true;
        self.mining = false;
        self.difficulty = difficulty;
        self.election_nonce = payload.to_string();
        self.become_leader_after_election = false;
        self.advertised_self = None;
        self.round_cancel.clone()
    }

    pub fn round_token(&self) -> CancellationToken {
        self.round_cancel.clone()
    }

    /// True when `payload` belongs to the round in progress.
    pub fn is_current(&self, payload: &str) -> bool {
        self.round_active && self.election_nonce == payload
    }

    pub fn cancel_mining(&mut self) {
        self.round_cancel.cancel();
        self.mining = false;
    }

    /// Clears all round data; leadership is left untouched.
    pub fn reset(&mut self) {
        self.cancel_mining();
        self.phase = Phase::Idle;
        self.under_election = false;
        self.round_active = false;
        self.required_leader_count = 0;
        self.difficulty = 0;
        self.election_nonce.clear();
        self.become_leader_after_election = false;
        self.advertised_self = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_round_cancels_previous_mining() {
        let mut state = ElectionState::new(CancellationToken::new());
        let first = state.begin_round(4, "alpha");
        let second = state.begin_round(4, "beta");

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(state.is_current("beta"));
        assert!(!state.is_current("alpha"));
    }

    #[test]
    fn test_reset_keeps_leadership() {
        let mut state = ElectionState::new(CancellationToken::new());
        state.is_leader = true;
        let token = state.prepare(2, 8, "payload");
        state.become_leader_after_election = true;

        state.reset();
        assert!(token.is_cancelled());
        assert!(state.is_leader);
        assert!(!state.round_active);
        assert!(!state.under_election);
        assert!(!state.become_leader_after_election);
        assert_eq!(state.phase, Phase::Idle);
    }

    #[test]
    fn test_shutdown_cancels_round() {
        let node = CancellationToken::new();
        let mut state = ElectionState::new(node.clone());
        let round = state.begin_round(1, "x");
        node.cancel();
        assert!(round.is_cancelled());
    }
}
