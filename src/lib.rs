//! # Algo Arena
//!
//! A Rust crate running algorithmic battles between teams, each team providing an instance
//! *generator* and a *solver* packaged as container images.
//!
//! It provides:
//! - Match orchestration (`Arena`): builds every team, runs one battle per matchup with bounded
//!   parallelism, and always removes the images it built
//! - Battle algorithms: `Iterated` (largest instance size the solver can handle) and `Averaged`
//!   (mean solution quality at a fixed size)
//! - Sandboxed execution through a container runtime, with time, memory and CPU limits
//! - Points computed from the battles, pair of teams by pair of teams
//!
//! In each fight, the generator of one team receives an instance size and writes an instance,
//! which the solver of another team must solve. The problem itself (how instances and solutions
//! are encoded, validated and scored) is provided by the user through the [`Problem`] trait.
//!
//! # Documentation Overview
//!
//! - For details about the match lifecycle, see the [`arena`] module.
//! - For configuring behavior and resource limits, see
//!   [`Configuration`](crate::configuration::Configuration) and [`constraints`].
//! - To understand how instance sizes are chosen, see the [`battle`] module.
//! - For implementing a problem, check out the [`Problem`] trait.
//! - For how points are distributed, see the [`scoring`] module.
//!
//! # Usage Example
//!
//! ```no_run
//! # struct YourProblem;
//! # impl algo_arena::problem::Problem for YourProblem {
//! #     type Instance = u64;
//! #     type Solution = u64;
//! #     fn decode_instance(&self, _raw: &[u8], _size: u64) -> anyhow::Result<(u64, Option<u64>)> { Ok((0, None)) }
//! #     fn encode_instance(&self, _instance: &u64) -> Vec<u8> { vec![] }
//! #     fn decode_solution(&self, _raw: &[u8], _size: u64) -> anyhow::Result<u64> { Ok(0) }
//! #     fn is_valid_instance(&self, _instance: &u64, _size: u64) -> bool { true }
//! #     fn is_valid_solution(&self, _instance: &u64, _solution: &u64, _size: u64) -> bool { true }
//! #     fn calculate_score(&self, _: &u64, _: Option<&u64>, _: &u64, _size: u64) -> f64 { 1.0 }
//! # }
//! use std::{sync::Arc, time::Duration};
//! use algo_arena::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     // Define per-program constraints
//!     let constraints = ConstraintsBuilder::new()
//!         .with_build_timeout(Duration::from_secs(600))
//!         .with_generator_time_limit(Duration::from_secs(20))
//!         .with_solver_time_limit(Duration::from_secs(20))
//!         .with_solver_memory(1_000) // in MB
//!         .build()?;
//!
//!     let config = Configuration::new().with_parallel_battles(4);
//!     let battle = BattleConfig::Iterated(IteratedConfig::default().with_maximum_size(1_000));
//!
//!     let arena = Arena::new(
//!         YourProblem,
//!         Arc::new(DockerCli::new()),
//!         config,
//!         constraints,
//!         battle,
//!     )?;
//!
//!     let result = arena.evaluate("path_to_teams_directory")?;
//!     print!("{result}");
//!     print!("{}", arena.points(&result));
//!
//!     Ok(())
//! }
//! ```
#![warn(missing_docs)]

pub use anyhow;
pub mod arena;
pub mod battle;
mod battle_scheduler;
pub mod cancellation;
pub mod configuration;
pub mod constraints;
pub mod error;
pub mod fight;
mod logger;
pub mod observer;
pub mod problem;
pub mod sandbox;
pub mod scoring;
pub mod team;
pub mod team_collector;

pub use problem::Problem;

/// Commonly used types and traits for quick access.
///
/// Import this prelude to get started easily:
/// ```rust
/// use algo_arena::prelude::*;
/// ```
///
/// Includes:
/// - [`Arena`](crate::arena::Arena)
/// - [`Configuration`](crate::configuration::Configuration)
/// - [`ConstraintsBuilder`](crate::constraints::ConstraintsBuilder)
/// - all built-in [`battle algorithms`](crate::battle)
/// - the [`DockerCli`](crate::sandbox::DockerCli) container runtime
pub mod prelude {
    pub use crate::arena::Arena;
    pub use crate::battle::{AveragedConfig, Battle, BattleConfig, IteratedConfig};
    pub use crate::cancellation::CancellationToken;
    pub use crate::configuration::Configuration;
    pub use crate::constraints::ConstraintsBuilder;
    pub use crate::problem::Problem;
    pub use crate::sandbox::{ContainerRuntime, DockerCli};
    pub use crate::scoring::{calculate_points, MatchResult, PointsTable};
    pub use crate::team::{Matchup, TeamInfo};
}
