//! Core orchestration logic for running a match.
//!
//! This module defines the [`Arena`] type, which runs a whole match between teams.
//! Its responsibilities include:
//!
//! - Building every team's generator and solver image, excluding teams whose build fails
//! - Enforcing resource limits via [`Constraints`]
//! - Running one [`Battle`] per matchup, at most
//!   [`parallel_battles`](Configuration::with_parallel_battles) at once
//! - Removing every image once the match is over, whatever happened
//!
//! # Behavior & Configuration
//!
//! Behavior is controlled by a [`Configuration`] object:
//!
//! - When `config.safe_build = true`, teams are built one after another without the runtime's
//!   layer cache. Otherwise all teams are built at the same time.
//! - When `config.strict_timeouts = false`, a program killed for exceeding its time limit still
//!   counts as successful if what it wrote before is valid.
//!
//! A match started with [`Arena::run_cancellable`] can be interrupted at any time through its
//! [`CancellationToken`]: no new battle is started, running programs are killed, and the result
//! returned so far is flagged as [`interrupted`](MatchResult::interrupted). Each match has its own
//! token, so a cancelled match does not affect the next ones run on the same arena.
//!
//! # Teams directory
//!
//! [`Arena::evaluate`] reads teams from a directory, each subdirectory being one team:
//!
//! ```text
//! teams/
//! ├── team_a/
//! │   ├── generator/Dockerfile
//! │   └── solver/Dockerfile
//! └── team_b/
//!     ├── generator/Dockerfile
//!     └── solver/Dockerfile
//! ```
//!
//! Generators receive the instance size on their standard input and must write an instance on
//! their standard output. Solvers receive that instance and must write a solution.

use std::{
    any::Any,
    collections::{BTreeMap, BTreeSet, HashMap},
    panic::{self, AssertUnwindSafe},
    path::Path,
    sync::{
        mpsc::{self, Sender},
        Arc,
    },
    thread,
};

use tracing::{error, info, instrument, trace, warn};

use crate::{
    battle::{Battle, BattleConfig},
    battle_scheduler::BattleScheduler,
    cancellation::CancellationToken,
    configuration::Configuration,
    constraints::Constraints,
    error::{ArenaError, BattleError, BuildError},
    fight::FightRunner,
    logger::init_logger,
    observer::{ProgressEvent, ProgressSender},
    problem::Problem,
    sandbox::{ContainerRuntime, Program, Role},
    scoring::{calculate_points, MatchResult, PointsTable},
    team::{matchups, Matchup, Team, TeamInfo, TeamRegistry},
    team_collector::collect_teams,
};

const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const DEFAULT: &str = "\x1b[39m";

/// The main type for running matches.
///
/// It builds teams, schedules battles, applies resource constraints, and collects results.
///
/// # Type Parameters
/// - `P`: The problem type implementing [`Problem`]
pub struct Arena<P: Problem> {
    problem: P,
    runtime: Arc<dyn ContainerRuntime>,
    config: Configuration,
    constraints: Constraints,
    battle_config: BattleConfig,
    registry: TeamRegistry,
    progress: ProgressSender,
}

impl<P: Problem> Arena<P> {
    /// Create an [`Arena`] running `problem` on `runtime`.
    ///
    /// # Errors
    /// Returns [`ArenaError::InvalidConfig`] if `config` or `battle_config` is out of range.
    #[instrument(skip_all)]
    pub fn new(
        problem: P,
        runtime: Arc<dyn ContainerRuntime>,
        config: Configuration,
        constraints: Constraints,
        battle_config: BattleConfig,
    ) -> Result<Arena<P>, ArenaError> {
        config.validate()?;
        battle_config.validate()?;

        if config.log {
            if let Err(e) = init_logger() {
                eprintln!("could not set up the log file: {e:#}");
            }
        }
        trace!(?config, ?constraints, ?battle_config);

        Ok(Arena {
            problem,
            runtime,
            config,
            constraints,
            battle_config,
            registry: TeamRegistry::new(),
            progress: ProgressSender::disabled(),
        })
    }

    /// Send progress events to `tx`.
    pub fn with_observer(self, tx: Sender<ProgressEvent>) -> Self {
        Self {
            progress: ProgressSender::new(tx),
            ..self
        }
    }

    /// Configuration the arena was created with.
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Runs a match between the teams found in the specified directory.
    ///
    /// See the [module documentation](self) for the expected layout.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be read or the match cannot start.
    pub fn evaluate(&self, directory: impl AsRef<Path>) -> anyhow::Result<MatchResult> {
        self.evaluate_cancellable(directory, &CancellationToken::new())
    }

    /// Same as [`evaluate`](Self::evaluate), interrupted once `cancel` is cancelled.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be read or the match cannot start.
    pub fn evaluate_cancellable(
        &self,
        directory: impl AsRef<Path>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<MatchResult> {
        let teams = collect_teams(directory.as_ref(), self.config.verbose)?;
        Ok(self.run_cancellable(teams, cancel)?)
    }

    /// Points of every team, computed from a finished match.
    pub fn points(&self, result: &MatchResult) -> PointsTable {
        calculate_points(
            result,
            f64::from(self.config.points),
            self.battle_config.scoring_role(),
        )
    }

    /// Runs a match between `teams`.
    ///
    /// Teams failing to build are excluded, battles failing internally are left out of the
    /// result: neither aborts the match.
    ///
    /// # Errors
    /// - [`ArenaError::RuntimeUnavailable`] if the container runtime cannot be reached
    /// - [`ArenaError::TeamNameConflict`] if two teams share a name, or a team name is already
    ///   used by a match running on this arena
    pub fn run(&self, teams: Vec<TeamInfo>) -> Result<MatchResult, ArenaError> {
        self.run_cancellable(teams, &CancellationToken::new())
    }

    /// Same as [`run`](Self::run), interrupted once `cancel` is cancelled.
    ///
    /// Builds interrupted by the cancellation are listed in
    /// [`MatchResult::cancelled`], not among the excluded teams.
    ///
    /// # Errors
    /// See [`run`](Self::run).
    #[instrument(skip_all)]
    pub fn run_cancellable(
        &self,
        teams: Vec<TeamInfo>,
        cancel: &CancellationToken,
    ) -> Result<MatchResult, ArenaError> {
        // 1. the runtime must be up before anything else
        self.runtime
            .ping()
            .map_err(|e| ArenaError::RuntimeUnavailable(format!("{e:#}")))?;

        // 2. reserve team names, released on every exit path
        let names = teams
            .iter()
            .map(TeamInfo::normalized_name)
            .collect::<Vec<_>>();
        self.registry
            .register_all(names.iter().map(String::as_str))?;
        let _names = RegisteredNames {
            registry: &self.registry,
            names: &names,
        };
        info!(teams = ?names, "match starting");

        // 3. build, images are removed when `built` is dropped
        let (mut built, excluded, cancelled) = self.build_teams(&teams, cancel);
        built.sort_by(|a, b| a.name().cmp(b.name()));

        let mut result = MatchResult {
            active: built.iter().map(|t| t.name().to_string()).collect(),
            excluded,
            cancelled,
            ..Default::default()
        };

        // 4. battles
        self.run_battles(&built, &mut result, cancel);
        result.interrupted = cancel.is_cancelled();

        // 5. cleanup
        for team in &mut built {
            team.cleanup();
        }
        if self.config.verbose {
            enable_line_wrap();
        }
        info!(
            battles = result.battles.len(),
            failed = result.failed_battles.len(),
            interrupted = result.interrupted,
            "match over"
        );
        Ok(result)
    }

    fn build_teams(
        &self,
        teams: &[TeamInfo],
        cancel: &CancellationToken,
    ) -> (Vec<Team>, BTreeMap<String, String>, BTreeSet<String>) {
        if self.config.verbose {
            println!("Building teams...");
        }
        let width = teams
            .iter()
            .map(|t| t.normalized_name().len())
            .max()
            .unwrap_or(0)
            + 3; // at least 3 dots

        let build_one = |info: &TeamInfo| {
            let name = info.normalized_name();
            self.progress.send(ProgressEvent::BuildStarted { team: name.clone() });
            let res = Team::build(
                info,
                &self.runtime,
                &self.constraints,
                self.config.safe_build,
                cancel,
            );
            match &res {
                Err(BuildError::Cancelled) => info!("build of team {name} cancelled"),
                Err(e) => error!("team {name} excluded: {e}"),
                Ok(_) => {}
            }
            self.progress.send(ProgressEvent::BuildFinished {
                team: name.clone(),
                error: res.as_ref().err().cloned(),
            });
            if self.config.verbose {
                print_build_result(&name, width, &res);
            }
            (name, res)
        };

        let results = if self.config.safe_build {
            teams.iter().map(&build_one).collect::<Vec<_>>()
        } else {
            let build_one = &build_one;
            thread::scope(|s| {
                let handles = teams
                    .iter()
                    .map(|info| s.spawn(move || build_one(info)))
                    .collect::<Vec<_>>();
                handles
                    .into_iter()
                    .zip(teams)
                    .map(|(handle, info)| {
                        handle.join().unwrap_or_else(|_| {
                            (
                                info.normalized_name(),
                                Err(BuildError::Failed("build panicked".to_string())),
                            )
                        })
                    })
                    .collect::<Vec<_>>()
            })
        };

        let mut built = vec![];
        let mut excluded = BTreeMap::new();
        let mut cancelled = BTreeSet::new();
        for (name, res) in results {
            match res {
                Ok(team) => built.push(team),
                Err(BuildError::Cancelled) => {
                    cancelled.insert(name);
                }
                Err(e) => {
                    excluded.insert(name, e.to_string());
                }
            }
        }
        (built, excluded, cancelled)
    }

    fn run_battles(&self, teams: &[Team], result: &mut MatchResult, cancel: &CancellationToken) {
        let by_name = teams
            .iter()
            .map(|t| (t.name(), t))
            .collect::<HashMap<_, _>>();
        let mut scheduler =
            BattleScheduler::new(matchups(&result.active), self.config.parallel_battles);
        if cancel.is_cancelled() {
            scheduler.cancel();
        }
        let (tx_result, rx_result) = mpsc::channel();
        let mut running = vec![];

        if self.config.verbose {
            disable_line_wrap();
        }

        thread::scope(|s| {
            let launch = |matchup: Matchup, running: &mut Vec<Matchup>| {
                let programs = by_name
                    .get(matchup.generator.as_str())
                    .zip(by_name.get(matchup.solver.as_str()))
                    .map(|(generating, solving)| {
                        (
                            generating.program(Role::Generator),
                            solving.program(Role::Solver),
                        )
                    });
                let tx = tx_result.clone();
                let Some((generator, solver)) = programs else {
                    let _ = tx.send((
                        matchup,
                        Err(BattleError::Internal("unknown team".to_string())),
                    ));
                    return;
                };
                running.push(matchup.clone());
                s.spawn(move || {
                    let res = self.run_battle(&matchup, generator, solver, cancel);
                    // the coordinator holds a sender, so the channel is open
                    let _ = tx.send((matchup, res));
                });
            };

            for matchup in scheduler.advance() {
                launch(matchup, &mut running);
            }
            if self.config.verbose {
                print_running_battles(&running);
            }

            // not finished <=> battle running <=> result to receive
            while !scheduler.is_finished() {
                let Ok((matchup, res)) = rx_result.recv() else {
                    break;
                };
                running.retain(|m| m != &matchup);
                if self.config.verbose {
                    print_battle_result(&matchup, &res);
                }
                match res {
                    Ok(battle) => {
                        result.battles.insert(matchup, battle);
                    }
                    Err(e) => {
                        result.failed_battles.insert(matchup, e.to_string());
                    }
                }

                if cancel.is_cancelled() {
                    scheduler.cancel();
                }
                for matchup in scheduler.on_result() {
                    launch(matchup, &mut running);
                }
                trace!(running = scheduler.running(), "battle slots in use");
                if self.config.verbose {
                    print_running_battles(&running);
                }
            }
        });
    }

    /// Runs one battle, turning panics into [`BattleError::Internal`].
    #[instrument(skip(self, generator, solver, cancel), fields(%matchup))]
    fn run_battle(
        &self,
        matchup: &Matchup,
        generator: &Program,
        solver: &Program,
        cancel: &CancellationToken,
    ) -> Result<Battle, BattleError> {
        self.progress.send(ProgressEvent::BattleStarted {
            matchup: matchup.clone(),
        });

        let res = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut battle = self.battle_config.new_battle();
            let mut runner = FightRunner::new(
                &self.problem,
                matchup,
                generator,
                solver,
                self.config.strict_timeouts,
                cancel,
                &self.progress,
            );
            battle.run_fight_series(self.problem.min_size(), &mut runner)?;
            Ok(battle)
        }))
        .unwrap_or_else(|payload| {
            Err(BattleError::Internal(format!(
                "battle panicked: {}",
                panic_message(&*payload)
            )))
        });

        match &res {
            Ok(battle) => info!("{battle}"),
            Err(e) => error!("{e}"),
        }
        self.progress.send(ProgressEvent::BattleFinished {
            matchup: matchup.clone(),
            result: res.clone(),
        });
        res
    }
}

/// Releases team names when dropped.
struct RegisteredNames<'a> {
    registry: &'a TeamRegistry,
    names: &'a [String],
}

impl Drop for RegisteredNames<'_> {
    fn drop(&mut self) {
        self.registry
            .release_all(self.names.iter().map(String::as_str));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        warn!("panic with a non-string payload");
        "unknown cause".to_string()
    }
}

fn print_build_result(name: &str, width: usize, res: &Result<Team, BuildError>) {
    match res {
        Ok(_) => println!("Building {name:·<width$} {GREEN}Ok{DEFAULT}"),
        Err(e) => println!("Building {name:·<width$} {RED}{e}{DEFAULT}"),
    }
}

fn print_battle_result(matchup: &Matchup, res: &Result<Battle, BattleError>) {
    // clear line, green matchup, result or red error, start of line
    match res {
        Ok(battle) => println!("\x1b[2K{GREEN}{matchup}: {DEFAULT}{battle}\x1b[0G"),
        Err(e) => println!("\x1b[2K{GREEN}{matchup}: {RED}{e}{DEFAULT}\x1b[0G"),
    }
}

fn print_running_battles(running: &[Matchup]) {
    if running.is_empty() {
        return;
    }
    // clear, green, default, start of line
    print!(
        "\x1b[2K{GREEN}Running...:{DEFAULT} {}\x1b[0G",
        running
            .iter()
            .map(Matchup::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );
    let _ = std::io::Write::flush(&mut std::io::stdout());
}

fn disable_line_wrap() {
    print!("\x1b[?7l");
}

fn enable_line_wrap() {
    print!("\x1b[?7h");
}
