use std::{
    io::{self, Read, Write},
    process::{Child, Command, ExitStatus, Stdio},
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::{bail, Context};
use tracing::{debug, error, instrument, warn};

use super::{BuildRequest, ContainerRuntime, ImageId, RunLimits};
use crate::{
    cancellation::CancellationToken,
    error::{BuildError, RunError},
};

/// [`ContainerRuntime`] driving the `docker` command line client.
///
/// Any client accepting the same arguments (e.g. `podman`) can be used through
/// [`DockerCli::with_binary`].
#[derive(Debug, Clone)]
pub struct DockerCli {
    bin: String,
    poll_interval: Duration,
    command_timeout: Duration,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerCli {
    const CLEANUP_ATTEMPTS: usize = 3;

    /// Use the `docker` binary found in `PATH`.
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Use another docker-compatible binary.
    pub fn with_binary(bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            poll_interval: Duration::from_millis(10),
            command_timeout: Duration::from_secs(30),
        }
    }

    /// Connect to the daemon, failing if it is not reachable.
    pub fn connect() -> anyhow::Result<Self> {
        let cli = Self::new();
        cli.ping()?;
        Ok(cli)
    }

    /// Runs a short housekeeping command (`info`, `kill`, `rm`...) with a fixed timeout.
    fn housekeeping(&self, args: &[&str]) -> anyhow::Result<Supervised> {
        let mut cmd = Command::new(&self.bin);
        cmd.args(args);
        let res = supervise(
            cmd,
            None,
            None,
            Some(self.command_timeout),
            &CancellationToken::new(),
            self.poll_interval,
            || {},
        )
        .with_context(|| format!("could not launch '{} {}'", self.bin, args.join(" ")))?;
        if res.interrupted.is_some() {
            bail!("'{} {}' timed out", self.bin, args.join(" "));
        }
        Ok(res)
    }

    /// Removes a container, retrying a few times. Never fails, only logs.
    fn force_remove_container(&self, name: &str) {
        for attempt in 1..=Self::CLEANUP_ATTEMPTS {
            match self.housekeeping(&["rm", "--force", name]) {
                Ok(res) if res.success() || res.stderr_contains("No such container") => return,
                Ok(res) => warn!(
                    "attempt {attempt}: could not remove container {name}: {}",
                    res.stderr_text()
                ),
                Err(e) => warn!("attempt {attempt}: could not remove container {name}: {e:#}"),
            }
            thread::sleep(self.poll_interval * 10);
        }
        error!(
            "container {name} could not be removed after {} attempts, remove it manually",
            Self::CLEANUP_ATTEMPTS
        );
    }
}

impl ContainerRuntime for DockerCli {
    fn ping(&self) -> anyhow::Result<()> {
        let res = self
            .housekeeping(&["info", "--format", "{{.ServerVersion}}"])
            .context("could not reach the container daemon")?;
        if !res.success() {
            bail!(
                "could not reach the container daemon: {}",
                res.stderr_text()
            );
        }
        debug!(version = %res.stdout_text(), "container daemon reachable");
        Ok(())
    }

    #[instrument(skip_all, fields(tag = request.tag, dir = %request.source_dir.display()))]
    fn build_image(
        &self,
        request: &BuildRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<ImageId, BuildError> {
        if !request.source_dir.is_dir() {
            return Err(BuildError::Failed(format!(
                "'{}' is not a directory",
                request.source_dir.display()
            )));
        }

        let mut cmd = Command::new(&self.bin);
        cmd.args(["build", "--quiet", "--rm", "--force-rm", "--tag", &request.tag]);
        if request.isolated {
            cmd.arg("--no-cache");
        }
        cmd.arg(request.source_dir);

        let res = supervise(
            cmd,
            None,
            None,
            request.timeout,
            cancel,
            self.poll_interval,
            || {},
        )
        .map_err(|e| BuildError::Failed(format!("could not launch '{}': {e}", self.bin)))?;

        match res.interrupted {
            Some(Interrupt::Timeout) => {
                // `timeout` is always set when the build was interrupted by a timeout
                let timeout = request.timeout.unwrap_or_default();
                error!("build of {} timed out after {timeout:?}", request.tag);
                return Err(BuildError::Timeout(timeout));
            }
            Some(Interrupt::Cancelled) => return Err(BuildError::Cancelled),
            Some(Interrupt::OutputLimit) | None => {}
        }

        if !res.success() {
            let stderr = res.stderr_text();
            error!("build error: {stderr}");
            let reason = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("unknown error")
                .trim()
                .to_string();
            return Err(BuildError::Failed(reason));
        }

        let stdout = res.stdout_text();
        let Some(id) = stdout.lines().map(str::trim).filter(|l| !l.is_empty()).last() else {
            return Err(BuildError::Failed("build produced no image id".to_string()));
        };
        Ok(ImageId(id.to_string()))
    }

    #[instrument(skip(self, input, cancel), fields(input_len = input.len()))]
    fn run_container(
        &self,
        image: &ImageId,
        input: &[u8],
        limits: &RunLimits,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, RunError> {
        static COUNTER: AtomicU32 = AtomicU32::new(1);
        let name = format!(
            "algo_arena_{}_{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        );

        let mut cmd = Command::new(&self.bin);
        cmd.args(["run", "--rm", "--interactive", "--name", &name]);
        cmd.args(["--network", "none"]);
        if let Some(mb) = limits.memory_mb {
            let memory = format!("{mb}m");
            cmd.args(["--memory", &memory, "--memory-swap", &memory]);
        }
        cmd.args(["--cpus", &limits.cpus.to_string()]);
        cmd.arg(&image.0);

        // removes the container on every exit path, including panics below
        let mut guard = ContainerGuard {
            cli: self,
            name: &name,
            armed: true,
        };

        let res = supervise(
            cmd,
            Some(input.to_vec()),
            Some(limits.max_output_bytes),
            limits.time_limit,
            cancel,
            self.poll_interval,
            || {
                if let Err(e) = self.kill_container(&name) {
                    warn!("could not kill container {name}: {e:#}");
                }
            },
        )
        .map_err(|e| RunError::Execution(format!("could not launch '{}': {e}", self.bin)))?;

        match res.interrupted {
            Some(Interrupt::Timeout) => {
                warn!("container {name} exceeded its time limit");
                return Err(RunError::Timeout {
                    partial_output: res.stdout,
                });
            }
            Some(Interrupt::Cancelled) => return Err(RunError::Cancelled),
            Some(Interrupt::OutputLimit) => {
                warn!(
                    "container {name} wrote more than {} bytes",
                    limits.max_output_bytes
                );
                return Err(RunError::Execution("output limit exceeded".to_string()));
            }
            None => {}
        }

        if !res.success() {
            let code = res
                .status
                .and_then(|s| s.code())
                .map_or_else(|| "none".to_string(), |c| c.to_string());
            return Err(RunError::Execution(format!(
                "exited with code {code}: {}",
                res.stderr_text()
            )));
        }

        // `--rm` already removed it
        guard.armed = false;
        Ok(res.stdout)
    }

    fn kill_container(&self, container: &str) -> anyhow::Result<()> {
        let res = self.housekeeping(&["kill", container])?;
        if res.success()
            || res.stderr_contains("No such container")
            || res.stderr_contains("is not running")
        {
            Ok(())
        } else {
            bail!("{}", res.stderr_text())
        }
    }

    fn remove_image(&self, image: &ImageId) -> anyhow::Result<()> {
        let res = self.housekeeping(&["image", "rm", "--force", &image.0])?;
        if res.success() || res.stderr_contains("No such image") {
            Ok(())
        } else {
            bail!("{}", res.stderr_text())
        }
    }
}

struct ContainerGuard<'a> {
    cli: &'a DockerCli,
    name: &'a str,
    armed: bool,
}

impl Drop for ContainerGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.cli.force_remove_container(self.name);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Timeout,
    Cancelled,
    OutputLimit,
}

#[derive(Debug)]
struct Supervised {
    status: Option<ExitStatus>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    interrupted: Option<Interrupt>,
}

impl Supervised {
    fn success(&self) -> bool {
        self.interrupted.is_none() && self.status.is_some_and(|s| s.success())
    }

    fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }

    fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }

    fn stderr_contains(&self, pattern: &str) -> bool {
        String::from_utf8_lossy(&self.stderr).contains(pattern)
    }
}

/// Bytes of stderr kept for error messages, the rest is discarded.
const STDERR_CAP: usize = 64 * 1024;

/// Spawns `cmd`, feeds it `input` and waits for it, killing it once `time_limit` is exceeded,
/// `cancel` is set or it wrote more than `stdout_limit` bytes. `on_interrupt` runs right before
/// the kill.
fn supervise(
    mut cmd: Command,
    input: Option<Vec<u8>>,
    stdout_limit: Option<usize>,
    time_limit: Option<Duration>,
    cancel: &CancellationToken,
    poll_interval: Duration,
    on_interrupt: impl FnOnce(),
) -> std::io::Result<Supervised> {
    cmd.stdin(if input.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    let mut child = cmd.spawn()?;
    let start = Instant::now();

    // a program that never reads its input must not block us: write from another thread,
    // dropping stdin afterwards to signal EOF
    let writer = match (input, child.stdin.take()) {
        (Some(bytes), Some(mut stdin)) => Some(thread::spawn(move || {
            let _ = stdin.write_all(&bytes);
        })),
        _ => None,
    };
    let overflow = Arc::new(AtomicBool::new(false));
    let stdout = child
        .stdout
        .take()
        .map(|pipe| spawn_reader(pipe, stdout_limit, overflow.clone()));
    let stderr = child.stderr.take().map(spawn_draining_reader);

    let mut interrupted = None;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {}
            Err(e) => {
                kill_child(&mut child);
                return Err(e);
            }
        }
        if cancel.is_cancelled() {
            interrupted = Some(Interrupt::Cancelled);
        } else if overflow.load(Ordering::SeqCst) {
            interrupted = Some(Interrupt::OutputLimit);
        } else if time_limit.is_some_and(|limit| start.elapsed() >= limit) {
            interrupted = Some(Interrupt::Timeout);
        }
        if interrupted.is_some() {
            on_interrupt();
            kill_child(&mut child);
            break None;
        }
        thread::sleep(poll_interval);
    };

    if let Some(writer) = writer {
        let _ = writer.join();
    }
    let stdout = join_reader(stdout);
    let stderr = join_reader(stderr);
    // the program may have died from the closed pipe before the loop saw the overflow
    if interrupted.is_none() && overflow.load(Ordering::SeqCst) {
        interrupted = Some(Interrupt::OutputLimit);
    }
    Ok(Supervised {
        status,
        stdout,
        stderr,
        interrupted,
    })
}

fn kill_child(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!("could not kill process {}: {e}", child.id());
    }
    let _ = child.wait();
}

/// Reads at most `limit` bytes, raising `overflow` and closing the pipe past that.
fn spawn_reader<R: Read + Send + 'static>(
    pipe: R,
    limit: Option<usize>,
    overflow: Arc<AtomicBool>,
) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        // whatever was read before an error is kept
        match limit {
            Some(limit) => {
                let _ = pipe.take(limit as u64 + 1).read_to_end(&mut buf);
                if buf.len() > limit {
                    buf.truncate(limit);
                    overflow.store(true, Ordering::SeqCst);
                }
            }
            None => {
                let mut pipe = pipe;
                let _ = pipe.read_to_end(&mut buf);
            }
        }
        buf
    })
}

/// Keeps the first [`STDERR_CAP`] bytes and drains the rest so the program never blocks on it.
fn spawn_draining_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = (&mut pipe).take(STDERR_CAP as u64).read_to_end(&mut buf);
        let _ = io::copy(&mut pipe, &mut io::sink());
        buf
    })
}

fn join_reader(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}
