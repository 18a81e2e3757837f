//! Config for the arena behaviors
//!
//! This module provides configuration options for controlling how a match is run.
//!
//! Configuration can be created programmatically using [`Configuration::new()`] or by reading
//! environment variables using [`Configuration::from_env()`].
//!
//! # Environment Variables
//!
//! The following environment variables can be used to override configuration values. All
//! values are optional. Flags are case-insensitive, set the value to `"true"` to enable one.
//!
//! - `ARENA_VERBOSE`: Print build and battle progress to stdout (default: `true`)
//! - `ARENA_LOG`: Enable logging to a file (default: `false`)
//! - `ARENA_SAFE_BUILD`: Build teams one after another without a shared layer cache (default: `false`)
//! - `ARENA_STRICT_TIMEOUTS`: Treat every timeout as a failure, even with usable output (default: `true`)
//! - `ARENA_PARALLEL_BATTLES`: Maximum number of battles running at once (default: `1`)
//! - `ARENA_POINTS`: Points distributed between teams (default: `100`)

use crate::error::ArenaError;

/// Configuration for arena behaviors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Configuration {
    pub(crate) verbose: bool,
    pub(crate) log: bool,
    pub(crate) safe_build: bool,
    pub(crate) strict_timeouts: bool,
    pub(crate) parallel_battles: usize,
    pub(crate) points: u32,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - The arena will print build and battle progress to stdout.
    /// - Logging to file is disabled.
    /// - Teams are built concurrently and may share the runtime's layer cache.
    /// - A program exceeding its time limit always fails, whatever it printed.
    /// - Battles run one at a time.
    /// - 100 points are distributed.
    pub fn new() -> Self {
        Self {
            verbose: true,
            log: false,
            safe_build: false,
            strict_timeouts: true,
            parallel_battles: 1,
            points: 100,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// The following environment variables are recognized:
    /// - `ARENA_VERBOSE`: if set to `"true"`, enables verbose output (default: `true`)
    /// - `ARENA_LOG`: if set to `"true"`, enables logging to file (default: `false`)
    /// - `ARENA_SAFE_BUILD`: if set to `"true"`, enables isolated builds (default: `false`)
    /// - `ARENA_STRICT_TIMEOUTS`: if set to `"true"`, enables strict timeouts (default: `true`)
    /// - `ARENA_PARALLEL_BATTLES`: number of concurrent battles (default: `1`)
    /// - `ARENA_POINTS`: achievable points (default: `100`)
    ///
    /// Any other value (including unset or unparsable) will result in using the default value
    /// for each field.
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match std::env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        fn get_env_number<T: std::str::FromStr>(var: &str, default: T) -> T {
            std::env::var(var)
                .ok()
                .and_then(|val| val.trim().parse().ok())
                .unwrap_or(default)
        }

        Self {
            verbose: get_env_flag("ARENA_VERBOSE", true),
            log: get_env_flag("ARENA_LOG", false),
            safe_build: get_env_flag("ARENA_SAFE_BUILD", false),
            strict_timeouts: get_env_flag("ARENA_STRICT_TIMEOUTS", true),
            parallel_battles: get_env_number("ARENA_PARALLEL_BATTLES", 1),
            points: get_env_number("ARENA_POINTS", 100),
        }
    }

    /// Enable or disable verbose mode.
    pub fn with_verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Enable or disable safe builds.
    ///
    /// When enabled, teams are built one after another and without the runtime's layer cache,
    /// so that a team's build cannot observe layers produced by another team. Significantly
    /// slows down the match setup.
    pub fn with_safe_build(mut self, value: bool) -> Self {
        self.safe_build = value;
        self
    }

    /// Enable or disable strict timeouts.
    ///
    /// When disabled, a program that exceeds its time limit but already wrote a valid output
    /// before being killed is accepted.
    pub fn with_strict_timeouts(mut self, value: bool) -> Self {
        self.strict_timeouts = value;
        self
    }

    /// Set the maximum number of battles running at the same time.
    ///
    /// Each running battle owns at most one container at any time, so container runtime load
    /// grows linearly with this value.
    pub fn with_parallel_battles(mut self, value: usize) -> Self {
        self.parallel_battles = value;
        self
    }

    /// Set the number of points distributed between all teams.
    pub fn with_points(mut self, value: u32) -> Self {
        self.points = value;
        self
    }

    /// Points distributed between all teams.
    pub fn points(&self) -> u32 {
        self.points
    }

    pub(crate) fn validate(&self) -> Result<(), ArenaError> {
        if self.parallel_battles == 0 {
            return Err(ArenaError::InvalidConfig(
                "at least one battle must be allowed to run".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}
