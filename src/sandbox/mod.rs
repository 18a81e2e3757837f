//! Building and running team programs inside containers.
//!
//! The [`ContainerRuntime`] trait is the seam to the container engine. [`DockerCli`] drives the
//! `docker` (or any compatible) command line client; tests plug in their own implementation.
//!
//! A [`Program`] is a built image owned by one team. Its image is removed when
//! [`Program::remove`] is called or, failing that, when the program is dropped.

use std::{
    fmt::Display,
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::{debug, instrument, warn};

use crate::{
    cancellation::CancellationToken,
    error::{BuildError, RunError},
};

mod docker;

pub use docker::DockerCli;

/// The part a program plays in a fight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    /// Creates instances of a given size.
    Generator,
    /// Solves instances created by a generator.
    Solver,
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Generator => write!(f, "generator"),
            Role::Solver => write!(f, "solver"),
        }
    }
}

/// Resources a single run of a program may use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLimits {
    /// Wall-clock limit, `None` meaning unlimited.
    pub time_limit: Option<Duration>,
    /// Memory limit in MB, `None` meaning unlimited.
    pub memory_mb: Option<usize>,
    /// Number of CPUs the container may use.
    pub cpus: usize,
    /// Maximum number of bytes read from the program's stdout. A program writing more is killed.
    pub max_output_bytes: usize,
}

impl RunLimits {
    /// Output cap used unless configured otherwise, 16 MiB.
    pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 16 * 1024 * 1024;
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            time_limit: None,
            memory_mb: None,
            cpus: 1,
            max_output_bytes: Self::DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

/// Identifier of a built image, as reported by the container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageId(pub String);

impl Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything the runtime needs to build one image.
#[derive(Debug, Clone)]
pub struct BuildRequest<'a> {
    /// Directory containing the build context (and its `Dockerfile`).
    pub source_dir: &'a Path,
    /// Tag given to the resulting image.
    pub tag: String,
    /// Build timeout, `None` meaning unlimited.
    pub timeout: Option<Duration>,
    /// Build without reusing cached layers.
    pub isolated: bool,
}

/// Interface to the container engine.
///
/// Implementations must be usable from several threads at once: battles running in parallel
/// share the same runtime.
pub trait ContainerRuntime: Send + Sync {
    /// Checks that the engine is reachable.
    fn ping(&self) -> anyhow::Result<()>;

    /// Builds an image, killing the build once `request.timeout` is exceeded or `cancel` is set.
    fn build_image(
        &self,
        request: &BuildRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<ImageId, BuildError>;

    /// Runs `image` once in a fresh network-less container, writing `input` to its stdin and
    /// returning its stdout.
    ///
    /// The container must not outlive the call, whatever the outcome.
    fn run_container(
        &self,
        image: &ImageId,
        input: &[u8],
        limits: &RunLimits,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, RunError>;

    /// Forcibly stops a running container.
    fn kill_container(&self, container: &str) -> anyhow::Result<()>;

    /// Removes an image. Removing an image that does not exist anymore is not an error.
    fn remove_image(&self, image: &ImageId) -> anyhow::Result<()>;
}

/// Output of one successful program run.
#[derive(Debug, Clone)]
pub struct ProgramOutput {
    /// What the program wrote on stdout.
    pub output: Vec<u8>,
    /// Wall-clock duration of the run, container startup included.
    pub elapsed: Duration,
}

/// A built image, ready to be run with its role's limits.
pub struct Program {
    runtime: Arc<dyn ContainerRuntime>,
    image: ImageId,
    team: String,
    role: Role,
    limits: RunLimits,
    removed: bool,
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("image", &self.image)
            .field("team", &self.team)
            .field("role", &self.role)
            .field("limits", &self.limits)
            .field("removed", &self.removed)
            .finish()
    }
}

impl Program {
    /// Builds the program of `team` found in `source_dir`.
    #[instrument(skip(runtime, limits, cancel), fields(dir = %source_dir.display()))]
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        runtime: Arc<dyn ContainerRuntime>,
        source_dir: &Path,
        team: &str,
        role: Role,
        limits: RunLimits,
        build_timeout: Option<Duration>,
        isolated: bool,
        cancel: &CancellationToken,
    ) -> Result<Program, BuildError> {
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        let request = BuildRequest {
            source_dir,
            tag: image_tag(team, role),
            timeout: build_timeout,
            isolated,
        };
        let start = Instant::now();
        let image = runtime.build_image(&request, cancel)?;
        debug!(%image, elapsed = ?start.elapsed(), "image built");

        Ok(Program {
            runtime,
            image,
            team: team.to_string(),
            role,
            limits,
            removed: false,
        })
    }

    /// Runs the program once on `input`.
    #[instrument(skip_all, fields(team = self.team, role = %self.role))]
    pub fn run(
        &self,
        input: &[u8],
        cancel: &CancellationToken,
    ) -> Result<ProgramOutput, RunError> {
        if self.removed {
            return Err(RunError::Execution(format!(
                "image {} was already removed",
                self.image
            )));
        }
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }
        let start = Instant::now();
        let output = self
            .runtime
            .run_container(&self.image, input, &self.limits, cancel)?;
        let elapsed = start.elapsed();
        debug!(?elapsed, limit = ?self.limits.time_limit, bytes = output.len(), "run finished");
        Ok(ProgramOutput { output, elapsed })
    }

    /// Removes the image from the runtime. Only the first call does something.
    pub fn remove(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        if let Err(e) = self.runtime.remove_image(&self.image) {
            warn!(
                "could not remove {} image of team {} ({}): {e:#}",
                self.role, self.team, self.image
            );
        }
    }

    /// Role of the program.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Image of the program.
    pub fn image(&self) -> &ImageId {
        &self.image
    }

    /// Limits applied to each run.
    pub fn limits(&self) -> &RunLimits {
        &self.limits
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Image tags must be lowercase, team names are normalized before reaching this point.
fn image_tag(team: &str, role: Role) -> String {
    format!("algo_arena_{team}_{role}")
}
