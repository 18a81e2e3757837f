use std::collections::VecDeque;

use tracing::trace;

use crate::team::Matchup;

/// Hands out matchups to run while keeping at most `max_running` battles in flight.
pub struct BattleScheduler {
    pending: VecDeque<Matchup>,
    running: usize,
    max_running: usize,
}

impl BattleScheduler {
    pub fn new(matchups: Vec<Matchup>, max_running: usize) -> Self {
        BattleScheduler {
            pending: matchups.into(),
            running: 0,
            max_running: max_running.max(1),
        }
    }

    /// Battles to start now.
    pub fn advance(&mut self) -> Vec<Matchup> {
        let mut to_run = vec![];
        while self.running < self.max_running {
            let Some(matchup) = self.pending.pop_front() else {
                break;
            };
            to_run.push(matchup);
            self.running += 1;
        }
        trace!(started = to_run.len(), running = self.running, pending = self.pending.len());
        to_run
    }

    /// A battle finished, its slot is given to the next pending ones.
    pub fn on_result(&mut self) -> Vec<Matchup> {
        self.running = self.running.saturating_sub(1);
        self.advance()
    }

    /// Drop every battle that has not started yet.
    pub fn cancel(&mut self) {
        if !self.pending.is_empty() {
            trace!("dropping {} pending battles", self.pending.len());
        }
        self.pending.clear();
    }

    /// No battle running nor pending.
    pub fn is_finished(&self) -> bool {
        self.running == 0 && self.pending.is_empty()
    }

    pub fn running(&self) -> usize {
        self.running
    }
}
