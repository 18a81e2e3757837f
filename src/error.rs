//! Error types shared by the sandbox, the battles and the arena.
//!
//! Errors at the program level ([`BuildError`], [`RunError`]) never abort a match: build errors
//! exclude a team, run errors are turned into a [`FailureKind`](crate::fight::FailureKind) by the
//! fight runner. Only [`ArenaError`] is returned to the caller of
//! [`Arena::run`](crate::arena::Arena::run).

use std::time::Duration;

use thiserror::Error;

/// Errors raised while building a program image.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// The build ran longer than the configured build timeout and was killed.
    #[error("build timed out after {0:?}")]
    Timeout(Duration),

    /// The build exited with an error, produced no image, or could not be started.
    #[error("build failed: {0}")]
    Failed(String),

    /// The build was interrupted by a cancellation request.
    #[error("build cancelled")]
    Cancelled,
}

/// Errors raised while running a built program once.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// The program exceeded its time limit and was killed.
    ///
    /// `partial_output` holds whatever the program wrote to stdout before the kill.
    #[error("execution timed out ({} bytes of output before kill)", partial_output.len())]
    Timeout {
        /// Output captured before the container was killed.
        partial_output: Vec<u8>,
    },

    /// The program crashed, exited with a non-zero code, or its I/O failed.
    #[error("execution error: {0}")]
    Execution(String),

    /// The run was interrupted by a cancellation request.
    #[error("execution cancelled")]
    Cancelled,
}

/// Errors raised while playing one fight. Never escapes the fight runner.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FightError {
    /// The program could not be run to completion.
    #[error(transparent)]
    Run(#[from] RunError),

    /// The program output could not be decoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The output was decoded but is not semantically valid.
    #[error("validation error: {0}")]
    Validation(String),
}

/// Errors raised by a battle itself, as opposed to the programs it runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BattleError {
    /// Unexpected failure inside a battle. The matchup is left out of the results.
    #[error("internal battle error: {0}")]
    Internal(String),
}

/// Fatal errors aborting a whole match.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArenaError {
    /// The container runtime could not be reached.
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// Two teams normalize to the same name.
    #[error("team name '{0}' is already in use")]
    TeamNameConflict(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
