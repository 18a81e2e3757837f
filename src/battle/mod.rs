//! Battle algorithms deciding which instance sizes a matchup is fought at.
//!
//! This module defines the [`Battle`] type, a closed set of algorithms selected through a
//! [`BattleConfig`], and the [`Fighter`] trait they drive. Battles have no concurrency of their
//! own: they ask their fighter for one fight at a time and observe every outcome before choosing
//! the next size.
//!
//! # Provided Algorithms
//! - [`IteratedBattle`]: grows the instance size exponentially, backtracking on failures, to find
//!   the largest size the solver still handles.
//! - [`AveragedBattle`]: repeats fights at a fixed size and averages the solver's scores.
//!
//! Both score the solver: the higher [`Battle::score`], the better the solving team did.

use std::fmt::Display;

use crate::{
    error::{ArenaError, BattleError},
    fight::FightOutcome,
    sandbox::Role,
};

mod averaged;
mod iterated;

pub use averaged::{AveragedBattle, AveragedConfig};
pub use iterated::{IteratedBattle, IteratedConfig, IteratedRound};

/// What battles use to play fights.
pub trait Fighter {
    /// Play one fight at `size`.
    ///
    /// Returns `None` when the match was cancelled, the battle then stops right away.
    fn fight(&mut self, size: u64) -> Option<FightOutcome>;

    /// Receives the battle state after each fight.
    fn update(&mut self, _snapshot: Battle) {}
}

/// Selects and parametrizes the battle algorithm of a match.
#[derive(Debug, Clone, PartialEq)]
pub enum BattleConfig {
    /// See [`IteratedBattle`].
    Iterated(IteratedConfig),
    /// See [`AveragedBattle`].
    Averaged(AveragedConfig),
}

impl Default for BattleConfig {
    fn default() -> Self {
        BattleConfig::Iterated(IteratedConfig::default())
    }
}

impl BattleConfig {
    /// Check that every parameter is in range.
    pub fn validate(&self) -> Result<(), ArenaError> {
        match self {
            BattleConfig::Iterated(config) => config.validate(),
            BattleConfig::Averaged(config) => config.validate(),
        }
    }

    /// Role whose team gets the battle score when computing points.
    pub fn scoring_role(&self) -> Role {
        Role::Solver
    }

    /// A battle that did not play any fight yet.
    pub fn new_battle(&self) -> Battle {
        match self {
            BattleConfig::Iterated(config) => Battle::Iterated(IteratedBattle::new(config.clone())),
            BattleConfig::Averaged(config) => Battle::Averaged(AveragedBattle::new(config.clone())),
        }
    }
}

/// State of one battle.
#[derive(Debug, Clone, PartialEq)]
pub enum Battle {
    /// See [`IteratedBattle`].
    Iterated(IteratedBattle),
    /// See [`AveragedBattle`].
    Averaged(AveragedBattle),
}

impl Battle {
    /// Play all the fights of the battle.
    ///
    /// `min_size` is the smallest size the problem accepts. Stops early, without error, if the
    /// fighter reports a cancellation.
    pub fn run_fight_series(
        &mut self,
        min_size: u64,
        fighter: &mut impl Fighter,
    ) -> Result<(), BattleError> {
        match self {
            Battle::Iterated(battle) => battle.run(min_size, fighter),
            Battle::Averaged(battle) => battle.run(min_size, fighter),
        }
    }

    /// Solver's result, in `[0, 1]`.
    pub fn score(&self) -> f64 {
        match self {
            Battle::Iterated(battle) => battle.score(),
            Battle::Averaged(battle) => battle.score(),
        }
    }

    /// Role whose team gets [`score`](Self::score).
    pub fn scoring_role(&self) -> Role {
        Role::Solver
    }
}

impl Display for Battle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Battle::Iterated(battle) => Display::fmt(battle, f),
            Battle::Averaged(battle) => Display::fmt(battle, f),
        }
    }
}
