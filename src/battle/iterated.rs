use std::fmt::Display;

use tracing::{debug, info, instrument};

use super::{Battle, Fighter};
use crate::error::{ArenaError, BattleError};

/// Parameters of an [`IteratedBattle`].
#[derive(Debug, Clone, PartialEq)]
pub struct IteratedConfig {
    /// Largest instance size ever fought at.
    pub maximum_size: u64,
    /// The step size grows as `step^exponent`.
    pub exponent: u32,
    /// Number of independent searches, the battle score averages them.
    pub rounds: u32,
    /// A fight scoring below this counts as a failure.
    pub minimum_score: f64,
}

impl Default for IteratedConfig {
    fn default() -> Self {
        Self {
            maximum_size: 50_000,
            exponent: 2,
            rounds: 1,
            minimum_score: 1.0,
        }
    }
}

impl IteratedConfig {
    /// Sets the largest instance size.
    pub fn with_maximum_size(self, maximum_size: u64) -> Self {
        Self {
            maximum_size,
            ..self
        }
    }

    /// Sets the step exponent, at least 1.
    pub fn with_exponent(self, exponent: u32) -> Self {
        Self { exponent, ..self }
    }

    /// Sets the number of rounds, at least 1.
    pub fn with_rounds(self, rounds: u32) -> Self {
        Self { rounds, ..self }
    }

    /// Sets the score a solver needs for a fight to count as solved.
    pub fn with_minimum_score(self, minimum_score: f64) -> Self {
        Self {
            minimum_score,
            ..self
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ArenaError> {
        if self.maximum_size == 0 {
            return Err(ArenaError::InvalidConfig(
                "maximum size must be positive".to_string(),
            ));
        }
        if self.exponent == 0 {
            return Err(ArenaError::InvalidConfig(
                "iterated exponent must be at least 1".to_string(),
            ));
        }
        if self.rounds == 0 {
            return Err(ArenaError::InvalidConfig(
                "iterated battles need at least one round".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.minimum_score) {
            return Err(ArenaError::InvalidConfig(format!(
                "minimum score {} is not in [0, 1]",
                self.minimum_score
            )));
        }
        Ok(())
    }
}

/// Progress of the running round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IteratedRound {
    /// Current upper bound: the maximum size, or the smallest size the solver failed at.
    pub cap: u64,
    /// Largest size solved so far.
    pub solved: u64,
    /// Size of the next fight.
    pub attempting: u64,
}

/// Searches the largest instance size the solver can handle.
///
/// Each round starts at the problem's minimum size and grows it by `1^e, 2^e, 3^e, ...`. When the
/// solver fails after a step bigger than one, that size becomes the new cap and the search
/// restarts from the last solved size with a step of one. A failure right after a step of one
/// ends the round. Reaching past [`IteratedConfig::maximum_size`] without having failed counts as
/// solving the maximum size.
///
/// Only the first failure at a size caps the search: a solver succeeding by chance later on will
/// not get past it.
#[derive(Debug, Clone, PartialEq)]
pub struct IteratedBattle {
    config: IteratedConfig,
    reached: Vec<u64>,
    current: Option<IteratedRound>,
}

impl IteratedBattle {
    /// A battle with no round played yet.
    pub fn new(config: IteratedConfig) -> Self {
        Self {
            config,
            reached: vec![],
            current: None,
        }
    }

    /// Largest size solved in each played round.
    pub fn reached(&self) -> &[u64] {
        &self.reached
    }

    /// The running round, if any.
    pub fn current_round(&self) -> Option<&IteratedRound> {
        self.current.as_ref()
    }

    /// Mean of the reached sizes, 0 before the first round ends.
    pub fn mean_reached(&self) -> f64 {
        if self.reached.is_empty() {
            return 0.0;
        }
        self.reached.iter().sum::<u64>() as f64 / self.reached.len() as f64
    }

    /// Mean reached size relative to the maximum size.
    pub fn score(&self) -> f64 {
        (self.mean_reached() / self.config.maximum_size as f64).clamp(0.0, 1.0)
    }

    #[instrument(skip_all, fields(cap = self.config.maximum_size))]
    pub(super) fn run(
        &mut self,
        min_size: u64,
        fighter: &mut impl Fighter,
    ) -> Result<(), BattleError> {
        if min_size > self.config.maximum_size {
            return Err(BattleError::Internal(format!(
                "start size {min_size} is above the maximum size {}",
                self.config.maximum_size
            )));
        }

        for round in 1..=self.config.rounds {
            let finished = self.run_round(min_size, fighter);
            // an interrupted round keeps what it solved so far
            let solved = self.current.take().map_or(0, |r| r.solved);
            self.reached.push(solved);
            info!(round, solved, "iterated round over");
            if !finished {
                debug!("battle interrupted");
                break;
            }
        }
        Ok(())
    }

    /// Plays one round, returns false if it was interrupted.
    fn run_round(&mut self, min_size: u64, fighter: &mut impl Fighter) -> bool {
        let n_max = self.config.maximum_size;
        let exponent = self.config.exponent;
        let mut round = IteratedRound {
            cap: n_max,
            solved: 0,
            attempting: min_size,
        };
        let mut step: u64 = 0;

        loop {
            self.current = Some(round);
            let size = round.attempting;
            let Some(outcome) = fighter.fight(size) else {
                return false;
            };

            let failed = outcome.score == 0.0 || outcome.score < self.config.minimum_score;
            let mut over = false;
            if failed && step > 1 {
                // the step was too big, retry from the last solved size
                debug!("solver failed at {size}, setting the cap to {size}");
                round.cap = size;
                round.attempting = size.saturating_sub(step.saturating_pow(exponent));
                step = 0;
            } else if failed {
                debug!("solver failed at {size}");
                over = true;
            } else if size > round.solved {
                round.solved = size;
            }

            if !over {
                if round.cap != n_max && round.attempting.saturating_add(1) >= round.cap {
                    over = true;
                } else {
                    step += 1;
                    let increment = step.saturating_pow(exponent);
                    round.attempting = round.attempting.saturating_add(increment);
                    if round.attempting >= round.cap {
                        if round.cap != n_max {
                            // already failed there, go back to one past the last solved size
                            round.attempting -= increment - 1;
                            step = 1;
                        } else {
                            info!("solver exceeded the size cap of {n_max}");
                            round.solved = n_max;
                            over = true;
                        }
                    }
                }
            }

            self.current = Some(round);
            fighter.update(Battle::Iterated(self.clone()));
            if over {
                return true;
            }
        }
    }
}

impl Display for IteratedBattle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.current {
            Some(round) => write!(
                f,
                "round {}/{}: solved {}, attempting {}, cap {}",
                self.reached.len() + 1,
                self.config.rounds,
                round.solved,
                round.attempting,
                round.cap
            ),
            None => write!(f, "reached {}", self.mean_reached()),
        }
    }
}
