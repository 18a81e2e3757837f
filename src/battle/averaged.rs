use std::fmt::Display;

use tracing::{info, instrument};

use super::{Battle, Fighter};
use crate::error::{ArenaError, BattleError};

/// Parameters of an [`AveragedBattle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AveragedConfig {
    /// Size of every instance.
    pub instance_size: u64,
    /// Number of fights.
    pub num_fights: u32,
}

impl Default for AveragedConfig {
    fn default() -> Self {
        Self {
            instance_size: 25,
            num_fights: 10,
        }
    }
}

impl AveragedConfig {
    /// Sets the instance size.
    pub fn with_instance_size(self, instance_size: u64) -> Self {
        Self {
            instance_size,
            ..self
        }
    }

    /// Sets the number of fights, at least 1.
    pub fn with_num_fights(self, num_fights: u32) -> Self {
        Self { num_fights, ..self }
    }

    pub(crate) fn validate(&self) -> Result<(), ArenaError> {
        if self.num_fights == 0 {
            return Err(ArenaError::InvalidConfig(
                "averaged battles need at least one fight".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fights repeatedly at a fixed size and averages the solver's scores.
#[derive(Debug, Clone, PartialEq)]
pub struct AveragedBattle {
    config: AveragedConfig,
    scores: Vec<f64>,
}

impl AveragedBattle {
    /// A battle with no fight played yet.
    pub fn new(config: AveragedConfig) -> Self {
        Self {
            config,
            scores: vec![],
        }
    }

    /// Score of each played fight.
    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    /// Number of fights the solver scored nothing in.
    pub fn zero_score_fights(&self) -> usize {
        self.scores.iter().filter(|&&s| s == 0.0).count()
    }

    /// Mean score of all played fights, failed ones included.
    pub fn score(&self) -> f64 {
        if self.scores.is_empty() {
            return 0.0;
        }
        self.scores.iter().sum::<f64>() / self.scores.len() as f64
    }

    #[instrument(skip_all, fields(size = self.config.instance_size))]
    pub(super) fn run(
        &mut self,
        min_size: u64,
        fighter: &mut impl Fighter,
    ) -> Result<(), BattleError> {
        if self.config.instance_size < min_size {
            return Err(BattleError::Internal(format!(
                "instance size {} is below the minimum size {min_size}",
                self.config.instance_size
            )));
        }

        for _ in 0..self.config.num_fights {
            let Some(outcome) = fighter.fight(self.config.instance_size) else {
                break;
            };
            self.scores.push(outcome.score);
            fighter.update(Battle::Averaged(self.clone()));
        }
        info!(
            score = self.score(),
            failed = self.zero_score_fights(),
            "averaged battle over"
        );
        Ok(())
    }
}

impl Display for AveragedBattle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "average {:.2} at size {} ({}/{} fights, {} failed)",
            self.score(),
            self.config.instance_size,
            self.scores.len(),
            self.config.num_fights,
            self.zero_score_fights()
        )
    }
}
