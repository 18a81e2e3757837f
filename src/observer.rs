//! Progress reporting.
//!
//! The arena emits [`ProgressEvent`]s on a plain [`std::sync::mpsc`] channel. Sending never blocks
//! and a receiver that went away is silently ignored, so a slow or absent consumer can never
//! stall a match.

use std::sync::mpsc::Sender;

use crate::{
    battle::Battle,
    error::{BattleError, BuildError},
    fight::FightOutcome,
    team::Matchup,
};

/// Something that happened during a match.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A team's programs started building.
    BuildStarted {
        /// Normalized team name.
        team: String,
    },
    /// A team's build finished, `error` is set if the team was excluded.
    BuildFinished {
        /// Normalized team name.
        team: String,
        /// Why the team was excluded.
        error: Option<BuildError>,
    },
    /// A battle got a slot and started.
    BattleStarted {
        /// Battle's matchup.
        matchup: Matchup,
    },
    /// A fight is about to start.
    FightStarted {
        /// Battle's matchup.
        matchup: Matchup,
        /// Instance size given to the generator.
        size: u64,
    },
    /// A fight finished.
    FightFinished {
        /// Battle's matchup.
        matchup: Matchup,
        /// Result of the fight.
        outcome: FightOutcome,
    },
    /// State of a battle after its latest fight.
    BattleUpdated {
        /// Battle's matchup.
        matchup: Matchup,
        /// Snapshot of the battle.
        battle: Battle,
    },
    /// A battle finished, successfully or not.
    BattleFinished {
        /// Battle's matchup.
        matchup: Matchup,
        /// Final battle state, or why it failed.
        result: Result<Battle, BattleError>,
    },
}

/// Fire-and-forget sending half of the progress channel.
///
/// The default sender discards every event.
#[derive(Debug, Clone, Default)]
pub struct ProgressSender {
    tx: Option<Sender<ProgressEvent>>,
}

impl ProgressSender {
    /// Forward events to `tx`.
    pub fn new(tx: Sender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sender discarding every event.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub(crate) fn send(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            // a dropped receiver only means nobody is watching
            let _ = tx.send(event);
        }
    }
}
