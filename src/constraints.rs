//! Defines resource constraints for team programs.
//!
//! This module provides tools to configure the limits every generator and solver run under.
//! Constraints include a build timeout, and per-role time, memory and CPU limits which are
//! handed to the container runtime on every run.
//!
//! # Overview
//!
//! The main entry point is the [`ConstraintsBuilder`] struct, which uses a builder pattern
//! to configure limits. These include:
//!
//! - **Build constraints**: maximum duration of an image build
//! - **Generator constraints**: time limit, memory limit and CPU count of each generator run
//! - **Solver constraints**: time limit, memory limit and CPU count of each solver run
//!
//! Once built, a [`Constraints`] object can be passed to the [`Arena`](crate::arena::Arena).
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use algo_arena::constraints::ConstraintsBuilder;
//!
//! let constraints = ConstraintsBuilder::new()
//!     .with_build_timeout(Duration::from_secs(600))
//!     .with_generator_time_limit(Duration::from_secs(30))
//!     .with_solver_time_limit(Duration::from_secs(30))
//!     .with_generator_memory(2_000)
//!     .with_solver_memory(2_000)
//!     .with_cpus_per_program(1)
//!     .build()
//!     .unwrap();
//! ```
//!
//! You may also construct constraints from environment variables using
//! [`ConstraintsBuilder::from_env()`] for runtime configurability.

use std::{env, time::Duration};

use anyhow::bail;
use tracing::warn;

use crate::sandbox::{Role, RunLimits};

/// A builder for defining resource constraints for team programs.
///
/// By default, nothing is limited except for the CPU count, which is one CPU per program.
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// # use algo_arena::constraints::ConstraintsBuilder;
///
/// let constraints = ConstraintsBuilder::new()
///     .with_solver_time_limit(Duration::from_secs(10))
///     .with_solver_memory(500)
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct ConstraintsBuilder {
    build_timeout: Option<Duration>,
    generator_time: Option<Duration>,
    solver_time: Option<Duration>,
    generator_memory: Option<usize>,
    solver_memory: Option<usize>,
    cpus_per_program: Option<usize>,
    max_output_bytes: Option<usize>,
}

impl ConstraintsBuilder {
    /// Creates a new `ConstraintsBuilder` with no limits except for one CPU per program.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new `ConstraintsBuilder` configured from environment variables.
    ///
    /// Read environment variables are:
    /// - `BUILD_TIMEOUT_SECS` (u64): build timeout in seconds
    /// - `GENERATOR_TIMEOUT_SECS` (u64): generator time limit in seconds
    /// - `SOLVER_TIMEOUT_SECS` (u64): solver time limit in seconds
    /// - `GENERATOR_MEMORY_MB` (usize): generator memory limit in MB
    /// - `SOLVER_MEMORY_MB` (usize): solver memory limit in MB
    /// - `CPUS_PER_PROGRAM` (usize): number of CPUs given to each program
    /// - `MAX_OUTPUT_BYTES` (usize): output cap of each program run, in bytes
    #[must_use]
    pub fn from_env() -> Self {
        fn parse_usize(var: &str) -> Option<usize> {
            env::var(var).ok()?.parse().ok()
        }

        fn parse_duration_secs(var: &str) -> Option<Duration> {
            env::var(var)
                .ok()?
                .parse::<u64>()
                .ok()
                .map(Duration::from_secs)
        }

        ConstraintsBuilder {
            build_timeout: parse_duration_secs("BUILD_TIMEOUT_SECS"),
            generator_time: parse_duration_secs("GENERATOR_TIMEOUT_SECS"),
            solver_time: parse_duration_secs("SOLVER_TIMEOUT_SECS"),
            generator_memory: parse_usize("GENERATOR_MEMORY_MB"),
            solver_memory: parse_usize("SOLVER_MEMORY_MB"),
            cpus_per_program: parse_usize("CPUS_PER_PROGRAM"),
            max_output_bytes: parse_usize("MAX_OUTPUT_BYTES"),
        }
    }

    /// Sets the maximum duration of a single image build.
    #[must_use]
    pub fn with_build_timeout(self, duration: Duration) -> Self {
        Self {
            build_timeout: Some(duration),
            ..self
        }
    }

    /// Sets the maximum wall-clock duration of one generator run.
    #[must_use]
    pub fn with_generator_time_limit(self, duration: Duration) -> Self {
        Self {
            generator_time: Some(duration),
            ..self
        }
    }

    /// Sets the maximum wall-clock duration of one solver run.
    #[must_use]
    pub fn with_solver_time_limit(self, duration: Duration) -> Self {
        Self {
            solver_time: Some(duration),
            ..self
        }
    }

    /// Sets the maximum memory of a generator container (in MB).
    #[must_use]
    pub fn with_generator_memory(self, max: usize) -> Self {
        Self {
            generator_memory: Some(max),
            ..self
        }
    }

    /// Sets the maximum memory of a solver container (in MB).
    #[must_use]
    pub fn with_solver_memory(self, max: usize) -> Self {
        Self {
            solver_memory: Some(max),
            ..self
        }
    }

    /// Sets how many bytes a program may write on its standard output in one run.
    ///
    /// A program exceeding it is killed and its fight lost. Default is 16 MiB.
    #[must_use]
    pub fn with_max_output_bytes(self, bytes: usize) -> Self {
        Self {
            max_output_bytes: Some(bytes),
            ..self
        }
    }

    /// Sets the number of CPUs each container may use.
    ///
    /// Default is one
    #[must_use]
    pub fn with_cpus_per_program(self, cpus: usize) -> Self {
        Self {
            cpus_per_program: Some(cpus),
            ..self
        }
    }

    /// Consumes the builder and returns the constructed `Constraints`.
    ///
    /// # Errors
    ///
    /// Returns an error when constraints are impossible, e.g. zero CPUs per program or a memory
    /// limit above the host's total memory.
    pub fn build(self) -> anyhow::Result<Constraints> {
        let cpus = self.cpus_per_program.unwrap_or(1);
        if cpus == 0 {
            bail!("programs need at least one CPU");
        }
        let available_cpus = num_cpus::get();
        if cpus > available_cpus {
            bail!("{cpus} CPUs per program requested but only {available_cpus} are available");
        }

        let max_output_bytes = self
            .max_output_bytes
            .unwrap_or(RunLimits::DEFAULT_MAX_OUTPUT_BYTES);
        if max_output_bytes == 0 {
            bail!("programs must be allowed to write some output");
        }

        let mut sys = sysinfo::System::new();
        sys.refresh_memory();
        let total_mb = (sys.total_memory() / 1_000_000) as usize;
        for (role, memory) in [
            (Role::Generator, self.generator_memory),
            (Role::Solver, self.solver_memory),
        ] {
            match memory {
                Some(0) => bail!("{role} memory limit must be positive"),
                // sysinfo may report 0 in restricted environments, skip the check then
                Some(mb) if total_mb > 0 && mb > total_mb => bail!(
                    "{role} memory limit ({mb}MB) is greater than total RAM ({total_mb}MB)"
                ),
                _ => {}
            }
        }

        for (role, time) in [
            (Role::Generator, self.generator_time),
            (Role::Solver, self.solver_time),
        ] {
            if time.is_none() {
                warn!("no time limit for the {role}, a stuck program will stall its battle");
            }
        }

        Ok(Constraints {
            build_timeout: self.build_timeout,
            generator: RunLimits {
                time_limit: self.generator_time,
                memory_mb: self.generator_memory,
                cpus,
                max_output_bytes,
            },
            solver: RunLimits {
                time_limit: self.solver_time,
                memory_mb: self.solver_memory,
                cpus,
                max_output_bytes,
            },
        })
    }
}

/// Obtained using `ConstraintsBuilder`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Constraints {
    pub(crate) build_timeout: Option<Duration>,
    pub(crate) generator: RunLimits,
    pub(crate) solver: RunLimits,
}

impl Constraints {
    /// create a ConstraintsBuilder
    pub fn builder() -> ConstraintsBuilder {
        ConstraintsBuilder::new()
    }

    /// Limits applied to every run of a program playing `role`.
    pub fn limits(&self, role: Role) -> &RunLimits {
        match role {
            Role::Generator => &self.generator,
            Role::Solver => &self.solver,
        }
    }

    /// Maximum duration of an image build, `None` meaning unlimited.
    pub fn build_timeout(&self) -> Option<Duration> {
        self.build_timeout
    }
}
