//! Round clock: owns the driver's position in its state machine.
//!
//! Initializing → RoundInProgress(1) → RoundComplete(1) → ... → Finished
//! A failed round moves to Halted(r), which is terminal.

use crate::types::Round;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "phase", content = "round", rename_all = "snake_case")]
pub enum DriverPhase {
    Initializing,
    RoundInProgress(Round),
    RoundComplete(Round),
    Finished,
    Halted(Round),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimClock {
    pub current_round: Round,
    pub num_rounds:    Round,
    pub phase:         DriverPhase,
}

impl SimClock {
    pub fn new(num_rounds: Round) -> Self {
        Self {
            current_round: 0,
            num_rounds,
            phase: DriverPhase::Initializing,
        }
    }

    /// Enter the next round. Returns the new round number.
    /// Panics if the previous round has not completed; callers must check.
    pub fn begin_round(&mut self) -> Round {
        assert!(
            matches!(self.phase, DriverPhase::Initializing | DriverPhase::RoundComplete(_)),
            "begin_round() called in phase {:?}",
            self.phase
        );
        self.current_round += 1;
        self.phase = DriverPhase::RoundInProgress(self.current_round);
        self.current_round
    }

    /// Close the current round, moving to Finished after the last one.
    pub fn complete_round(&mut self) {
        assert_eq!(
            self.phase,
            DriverPhase::RoundInProgress(self.current_round),
            "complete_round() called outside a round"
        );
        self.phase = if self.current_round >= self.num_rounds {
            DriverPhase::Finished
        } else {
            DriverPhase::RoundComplete(self.current_round)
        };
    }

    /// Abandon the round in progress. No further round may begin.
    pub fn halt(&mut self) {
        self.phase = DriverPhase::Halted(self.current_round);
    }

    pub fn is_finished(&self) -> bool {
        self.phase == DriverPhase::Finished
    }

    pub fn halted_at(&self) -> Option<Round> {
        match self.phase {
            DriverPhase::Halted(round) => Some(round),
            _ => None,
        }
    }

    pub fn rounds_remaining(&self) -> Round {
        self.num_rounds.saturating_sub(self.current_round)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_through_every_phase() {
        let mut clock = SimClock::new(2);
        assert_eq!(clock.phase, DriverPhase::Initializing);

        assert_eq!(clock.begin_round(), 1);
        assert_eq!(clock.phase, DriverPhase::RoundInProgress(1));
        clock.complete_round();
        assert_eq!(clock.phase, DriverPhase::RoundComplete(1));

        assert_eq!(clock.begin_round(), 2);
        clock.complete_round();
        assert!(clock.is_finished());
        assert_eq!(clock.rounds_remaining(), 0);
    }

    #[test]
    fn halting_mid_round_is_terminal() {
        let mut clock = SimClock::new(3);
        clock.begin_round();
        clock.halt();
        assert_eq!(clock.phase, DriverPhase::Halted(1));
        assert_eq!(clock.halted_at(), Some(1));
        assert!(!clock.is_finished());
    }

    #[test]
    #[should_panic]
    fn cannot_begin_after_halting() {
        let mut clock = SimClock::new(3);
        clock.begin_round();
        clock.halt();
        clock.begin_round();
    }

    #[test]
    #[should_panic]
    fn cannot_begin_a_round_twice() {
        let mut clock = SimClock::new(3);
        clock.begin_round();
        clock.begin_round();
    }
}
