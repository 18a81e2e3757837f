//! A single fight: the generator creates an instance of a given size, the solver solves it.

use std::{fmt::Display, time::Duration};

use tracing::{debug, instrument, warn};

use crate::{
    battle::{Battle, Fighter},
    cancellation::CancellationToken,
    error::{FightError, RunError},
    observer::{ProgressEvent, ProgressSender},
    problem::Problem,
    sandbox::{Program, Role},
    team::Matchup,
};

/// Stage at which a fight failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The generator exceeded its time limit.
    GeneratorTimeout,
    /// The generator crashed or exited with an error.
    GeneratorError,
    /// The generator's output could not be decoded or is not a valid instance.
    GeneratorInvalid,
    /// The solver exceeded its time limit.
    SolverTimeout,
    /// The solver crashed or exited with an error.
    SolverError,
    /// The solver's output could not be decoded or is not a valid solution.
    SolverInvalid,
}

impl FailureKind {
    /// Program at fault.
    pub fn stage(&self) -> Role {
        match self {
            FailureKind::GeneratorTimeout
            | FailureKind::GeneratorError
            | FailureKind::GeneratorInvalid => Role::Generator,
            FailureKind::SolverTimeout | FailureKind::SolverError | FailureKind::SolverInvalid => {
                Role::Solver
            }
        }
    }

    /// `None` for cancellations, which are not failures of the program.
    fn classify(role: Role, error: &FightError) -> Option<FailureKind> {
        let kind = match (role, error) {
            (_, FightError::Run(RunError::Cancelled)) => return None,
            (Role::Generator, FightError::Run(RunError::Timeout { .. })) => {
                FailureKind::GeneratorTimeout
            }
            (Role::Generator, FightError::Run(RunError::Execution(_))) => {
                FailureKind::GeneratorError
            }
            (Role::Generator, _) => FailureKind::GeneratorInvalid,
            (Role::Solver, FightError::Run(RunError::Timeout { .. })) => FailureKind::SolverTimeout,
            (Role::Solver, FightError::Run(RunError::Execution(_))) => FailureKind::SolverError,
            (Role::Solver, _) => FailureKind::SolverInvalid,
        };
        Some(kind)
    }
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::GeneratorTimeout => "generator_timeout",
            FailureKind::GeneratorError => "generator_error",
            FailureKind::GeneratorInvalid => "generator_invalid",
            FailureKind::SolverTimeout => "solver_timeout",
            FailureKind::SolverError => "solver_error",
            FailureKind::SolverInvalid => "solver_invalid",
        };
        write!(f, "{s}")
    }
}

/// Result of one fight.
#[derive(Debug, Clone, PartialEq)]
pub struct FightOutcome {
    /// Instance size the fight was played at.
    pub size: u64,
    /// Solver's score, in `[0, 1]`.
    pub score: f64,
    /// Set when the fight did not reach scoring.
    pub failure: Option<FailureKind>,
    /// Time taken by the generator, if it produced a usable output.
    pub generator_runtime: Option<Duration>,
    /// Time taken by the solver, if it produced a usable output.
    pub solver_runtime: Option<Duration>,
}

impl FightOutcome {
    fn failed(size: u64, failure: FailureKind, generator_runtime: Option<Duration>) -> Self {
        let score = match failure.stage() {
            // the solver is not at fault
            Role::Generator => 1.0,
            Role::Solver => 0.0,
        };
        Self {
            size,
            score,
            failure: Some(failure),
            generator_runtime,
            solver_runtime: None,
        }
    }
}

impl Display for FightOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "size {}: {:.2}", self.size, self.score)?;
        if let Some(failure) = self.failure {
            write!(f, " ({failure})")?;
        }
        Ok(())
    }
}

/// Clamp a problem score to `[0, 1]`, NaN counting as 0.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Plays fights of one matchup, reporting them to the progress channel.
pub struct FightRunner<'a, P: Problem> {
    problem: &'a P,
    matchup: &'a Matchup,
    generator: &'a Program,
    solver: &'a Program,
    strict_timeouts: bool,
    cancel: &'a CancellationToken,
    progress: &'a ProgressSender,
}

impl<'a, P: Problem> FightRunner<'a, P> {
    /// Runner pitting `generator` against `solver`.
    pub fn new(
        problem: &'a P,
        matchup: &'a Matchup,
        generator: &'a Program,
        solver: &'a Program,
        strict_timeouts: bool,
        cancel: &'a CancellationToken,
        progress: &'a ProgressSender,
    ) -> Self {
        Self {
            problem,
            matchup,
            generator,
            solver,
            strict_timeouts,
            cancel,
            progress,
        }
    }

    /// Play one fight at `size`. `None` if the match was cancelled meanwhile.
    #[instrument(skip(self), fields(matchup = %self.matchup))]
    pub fn run_fight(&self, size: u64) -> Option<FightOutcome> {
        if self.cancel.is_cancelled() {
            return None;
        }

        let input = size.to_string();
        let ((instance, certificate), generator_time) =
            match self.run_program(self.generator, input.as_bytes(), |raw| {
                self.decode_instance(raw, size)
            }) {
                Ok(res) => res,
                Err(e) => {
                    let failure = FailureKind::classify(Role::Generator, &e)?;
                    warn!("generator of {} failed at size {size}: {e}", self.matchup.generator);
                    return Some(FightOutcome::failed(size, failure, None));
                }
            };

        let encoded = self.problem.encode_instance(&instance);
        let (solution, solver_time) = match self.run_program(self.solver, &encoded, |raw| {
            self.decode_solution(&instance, raw, size)
        }) {
            Ok(res) => res,
            Err(e) => {
                let failure = FailureKind::classify(Role::Solver, &e)?;
                warn!("solver of {} failed at size {size}: {e}", self.matchup.solver);
                return Some(FightOutcome::failed(size, failure, Some(generator_time)));
            }
        };

        let score = clamp_score(self.problem.calculate_score(
            &instance,
            certificate.as_ref(),
            &solution,
            size,
        ));
        debug!(score, "fight finished");

        Some(FightOutcome {
            size,
            score,
            failure: None,
            generator_runtime: Some(generator_time),
            solver_runtime: Some(solver_time),
        })
    }

    /// Run `program` and decode its output. Without strict timeouts, the output written before a
    /// timeout is used if it decodes.
    fn run_program<T>(
        &self,
        program: &Program,
        input: &[u8],
        decode: impl Fn(&[u8]) -> Result<T, FightError>,
    ) -> Result<(T, Duration), FightError> {
        match program.run(input, self.cancel) {
            Ok(out) => Ok((decode(&out.output)?, out.elapsed)),
            Err(RunError::Timeout { partial_output })
                if !self.strict_timeouts && !partial_output.is_empty() =>
            {
                match decode(&partial_output) {
                    Ok(decoded) => {
                        warn!(
                            "{} exceeded its time limit but its output is valid, accepting it",
                            program.role()
                        );
                        let elapsed = program.limits().time_limit.unwrap_or_default();
                        Ok((decoded, elapsed))
                    }
                    Err(_) => Err(RunError::Timeout { partial_output }.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn decode_instance(
        &self,
        raw: &[u8],
        size: u64,
    ) -> Result<(P::Instance, Option<P::Solution>), FightError> {
        if raw.is_empty() {
            return Err(FightError::Encoding("generator produced no output".to_string()));
        }
        let (instance, certificate) = self
            .problem
            .decode_instance(raw, size)
            .map_err(|e| FightError::Encoding(format!("{e:#}")))?;
        if !self.problem.is_valid_instance(&instance, size) {
            return Err(FightError::Validation("malformed instance".to_string()));
        }
        if let Some(certificate) = &certificate {
            if !self.problem.is_valid_solution(&instance, certificate, size) {
                return Err(FightError::Validation(
                    "certificate does not solve the instance".to_string(),
                ));
            }
        }
        Ok((instance, certificate))
    }

    fn decode_solution(
        &self,
        instance: &P::Instance,
        raw: &[u8],
        size: u64,
    ) -> Result<P::Solution, FightError> {
        if raw.is_empty() {
            return Err(FightError::Encoding("solver produced no output".to_string()));
        }
        let solution = self
            .problem
            .decode_solution(raw, size)
            .map_err(|e| FightError::Encoding(format!("{e:#}")))?;
        if !self.problem.is_valid_solution(instance, &solution, size) {
            return Err(FightError::Validation("incorrect solution".to_string()));
        }
        Ok(solution)
    }
}

impl<P: Problem> Fighter for FightRunner<'_, P> {
    fn fight(&mut self, size: u64) -> Option<FightOutcome> {
        self.progress.send(ProgressEvent::FightStarted {
            matchup: self.matchup.clone(),
            size,
        });
        let outcome = self.run_fight(size)?;
        self.progress.send(ProgressEvent::FightFinished {
            matchup: self.matchup.clone(),
            outcome: outcome.clone(),
        });
        Some(outcome)
    }

    fn update(&mut self, snapshot: Battle) {
        self.progress.send(ProgressEvent::BattleUpdated {
            matchup: self.matchup.clone(),
            battle: snapshot,
        });
    }
}
