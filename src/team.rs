//! Teams, their programs, and the matchups between them.

use std::{
    collections::HashSet,
    fmt::Display,
    path::PathBuf,
    sync::{Arc, Mutex},
    thread,
};

use tracing::{instrument, trace};

use crate::{
    cancellation::CancellationToken,
    constraints::Constraints,
    error::{ArenaError, BuildError},
    sandbox::{ContainerRuntime, Program, Role},
};

/// Where to find the sources of one team.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamInfo {
    /// Display name of the team, normalized before use.
    pub name: String,
    /// Build context of the generator.
    pub generator: PathBuf,
    /// Build context of the solver.
    pub solver: PathBuf,
}

impl TeamInfo {
    /// Describe a team from its name and the build contexts of its two programs.
    pub fn new(name: impl Into<String>, generator: impl Into<PathBuf>, solver: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            generator: generator.into(),
            solver: solver.into(),
        }
    }

    /// Normalized name, as used in image tags and results.
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}

/// Lowercase the name and replace spaces with `_`, as it becomes part of image tags.
pub fn normalize_name(name: &str) -> String {
    name.trim().replace(' ', "_").to_lowercase()
}

/// A team whose two programs were built successfully.
#[derive(Debug)]
pub struct Team {
    name: String,
    generator: Program,
    solver: Program,
}

impl Team {
    /// Build the generator and the solver of `info` concurrently.
    ///
    /// If one of them fails, the other one is removed and the first error is returned, the
    /// generator's one if both failed.
    #[instrument(skip(runtime, constraints, cancel), fields(team = info.name))]
    pub fn build(
        info: &TeamInfo,
        runtime: &Arc<dyn ContainerRuntime>,
        constraints: &Constraints,
        isolated: bool,
        cancel: &CancellationToken,
    ) -> Result<Team, BuildError> {
        let name = info.normalized_name();
        let build = |role: Role| {
            let dir = match role {
                Role::Generator => &info.generator,
                Role::Solver => &info.solver,
            };
            Program::build(
                runtime.clone(),
                dir,
                &name,
                role,
                constraints.limits(role).clone(),
                constraints.build_timeout(),
                isolated,
                cancel,
            )
        };

        let (generator, solver) = thread::scope(|s| {
            let generator = s.spawn(|| build(Role::Generator));
            let solver = build(Role::Solver);
            let generator = generator
                .join()
                .unwrap_or_else(|_| Err(BuildError::Failed("generator build panicked".to_string())));
            (generator, solver)
        });
        trace!(generator_ok = generator.is_ok(), solver_ok = solver.is_ok());

        // a successfully built program is removed on drop when its sibling failed
        Ok(Team {
            name,
            generator: generator?,
            solver: solver?,
        })
    }

    /// Normalized name of the team.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Program playing `role` for this team.
    pub fn program(&self, role: Role) -> &Program {
        match role {
            Role::Generator => &self.generator,
            Role::Solver => &self.solver,
        }
    }

    /// Remove both images. Safe to call several times.
    pub fn cleanup(&mut self) {
        self.generator.remove();
        self.solver.remove();
    }
}

/// An assignment of one team to the generator role and one team to the solver role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Matchup {
    /// Team running its generator.
    pub generator: String,
    /// Team running its solver.
    pub solver: String,
}

impl Matchup {
    /// Matchup of `generator`'s generator against `solver`'s solver.
    pub fn new(generator: impl Into<String>, solver: impl Into<String>) -> Self {
        Self {
            generator: generator.into(),
            solver: solver.into(),
        }
    }

    /// The mirrored matchup, roles swapped.
    pub fn reversed(&self) -> Self {
        Self {
            generator: self.solver.clone(),
            solver: self.generator.clone(),
        }
    }
}

impl Display for Matchup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} VS {}", self.generator, self.solver)
    }
}

/// All ordered pairs of distinct teams, or the self-matchup when there is a single team.
pub fn matchups(teams: &[String]) -> Vec<Matchup> {
    if let [only] = teams {
        return vec![Matchup::new(only.clone(), only.clone())];
    }
    let mut pending = vec![];
    for generator in teams {
        for solver in teams {
            if generator != solver {
                pending.push(Matchup::new(generator.clone(), solver.clone()));
            }
        }
    }
    pending
}

/// Names of the teams taking part in a running match.
#[derive(Debug, Default)]
pub struct TeamRegistry {
    names: Mutex<HashSet<String>>,
}

impl TeamRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every name, or none of them if one is already taken (or appears twice).
    pub fn register_all<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), ArenaError> {
        let mut guard = self.names.lock().unwrap_or_else(|e| e.into_inner());
        let mut new = HashSet::new();
        for name in names {
            if guard.contains(name) || !new.insert(name.to_string()) {
                return Err(ArenaError::TeamNameConflict(name.to_string()));
            }
        }
        guard.extend(new);
        Ok(())
    }

    /// Release names so that another match may use them.
    pub fn release_all<'a>(&self, names: impl IntoIterator<Item = &'a str>) {
        let mut guard = self.names.lock().unwrap_or_else(|e| e.into_inner());
        for name in names {
            guard.remove(name);
        }
    }

    /// True if `name` is currently registered.
    pub fn contains(&self, name: &str) -> bool {
        self.names
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(name)
    }
}
