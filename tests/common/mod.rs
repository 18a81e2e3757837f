#![allow(dead_code)]

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
    thread,
    time::Duration,
};

use algo_arena::{
    error::{BuildError, RunError},
    prelude::*,
    sandbox::{BuildRequest, ImageId, RunLimits},
};
use anyhow::Context;

/// Instances are `size` numbers, solutions their sum.
pub struct Sum;

impl Problem for Sum {
    type Instance = Vec<u64>;
    type Solution = u64;

    fn decode_instance(&self, raw: &[u8], _size: u64) -> anyhow::Result<(Vec<u64>, Option<u64>)> {
        let text = std::str::from_utf8(raw)?;
        let numbers = text
            .split_whitespace()
            .map(|n| n.parse::<u64>().context("not a number"))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok((numbers, None))
    }

    fn encode_instance(&self, instance: &Vec<u64>) -> Vec<u8> {
        instance
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(" ")
            .into_bytes()
    }

    fn decode_solution(&self, raw: &[u8], _size: u64) -> anyhow::Result<u64> {
        Ok(std::str::from_utf8(raw)?.trim().parse()?)
    }

    fn is_valid_instance(&self, instance: &Vec<u64>, size: u64) -> bool {
        instance.len() as u64 == size
    }

    fn is_valid_solution(&self, instance: &Vec<u64>, solution: &u64, _size: u64) -> bool {
        instance.iter().sum::<u64>() == *solution
    }

    fn calculate_score(&self, _: &Vec<u64>, _: Option<&u64>, _: &u64, _size: u64) -> f64 {
        1.0
    }
}

/// What a fake program does.
#[derive(Debug, Clone)]
pub enum FakeProgram {
    /// Fails to build.
    BrokenBuild,
    /// Writes `size` ones.
    Generator,
    /// Always exceeds its time limit without output.
    Stuck,
    /// Sums correctly up to `max_size` numbers, off by one above.
    Solver { max_size: u64 },
    /// Correct, but only ever finishes after its time limit.
    SlowSolver,
    /// Makes the runtime itself panic.
    Panicking,
}

/// In-memory container runtime running [`FakeProgram`]s, keyed by build directory.
pub struct FakeRuntime {
    reachable: bool,
    programs: HashMap<PathBuf, FakeProgram>,
    images: Mutex<HashMap<String, FakeProgram>>,
    pub built: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<String>>,
    running: AtomicUsize,
    pub max_running: AtomicUsize,
    pub runs: AtomicUsize,
    panicked: AtomicBool,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            reachable: true,
            programs: HashMap::new(),
            images: Mutex::new(HashMap::new()),
            built: Mutex::new(vec![]),
            removed: Mutex::new(vec![]),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
            panicked: AtomicBool::new(false),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::new()
        }
    }

    /// Registers a team and returns where its (fake) sources are.
    pub fn team(&mut self, name: &str, generator: FakeProgram, solver: FakeProgram) -> TeamInfo {
        self.team_in(Path::new("/fake"), name, generator, solver)
    }

    /// Registers a team whose sources are in `teams_dir/name`.
    pub fn team_in(
        &mut self,
        teams_dir: &Path,
        name: &str,
        generator: FakeProgram,
        solver: FakeProgram,
    ) -> TeamInfo {
        let root = teams_dir.join(name);
        let info = TeamInfo::new(name, root.join("generator"), root.join("solver"));
        self.programs.insert(info.generator.clone(), generator);
        self.programs.insert(info.solver.clone(), solver);
        info
    }

    /// Every built image was removed exactly once.
    pub fn assert_clean(&self) {
        let mut built = self.built.lock().unwrap().clone();
        let mut removed = self.removed.lock().unwrap().clone();
        built.sort();
        removed.sort();
        assert_eq!(built, removed, "every built image is removed exactly once");
    }

    fn execute(program: &FakeProgram, input: &[u8]) -> Result<Vec<u8>, RunError> {
        let input = String::from_utf8_lossy(input).to_string();
        match program {
            FakeProgram::Generator => {
                let size: usize = input
                    .trim()
                    .parse()
                    .map_err(|_| RunError::Execution("bad size".to_string()))?;
                Ok(vec!["1"; size].join(" ").into_bytes())
            }
            FakeProgram::Stuck => Err(RunError::Timeout {
                partial_output: vec![],
            }),
            FakeProgram::Solver { max_size } => {
                let numbers = input
                    .split_whitespace()
                    .filter_map(|n| n.parse::<u64>().ok())
                    .collect::<Vec<_>>();
                let mut sum = numbers.iter().sum::<u64>();
                if numbers.len() as u64 > *max_size {
                    sum += 1;
                }
                Ok(sum.to_string().into_bytes())
            }
            FakeProgram::SlowSolver => {
                let sum = input
                    .split_whitespace()
                    .filter_map(|n| n.parse::<u64>().ok())
                    .sum::<u64>();
                Err(RunError::Timeout {
                    partial_output: sum.to_string().into_bytes(),
                })
            }
            FakeProgram::Panicking => panic!("fake runtime exploded"),
            FakeProgram::BrokenBuild => Err(RunError::Execution("no such image".to_string())),
        }
    }
}

impl ContainerRuntime for FakeRuntime {
    fn ping(&self) -> anyhow::Result<()> {
        if self.reachable {
            Ok(())
        } else {
            anyhow::bail!("connection refused")
        }
    }

    fn build_image(
        &self,
        request: &BuildRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<ImageId, BuildError> {
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        let program = self
            .programs
            .get(request.source_dir)
            .cloned()
            .ok_or_else(|| BuildError::Failed("missing directory".to_string()))?;
        if let FakeProgram::BrokenBuild = program {
            return Err(BuildError::Failed("syntax error".to_string()));
        }
        self.images
            .lock()
            .unwrap()
            .insert(request.tag.clone(), program);
        self.built.lock().unwrap().push(request.tag.clone());
        Ok(ImageId(request.tag.clone()))
    }

    fn run_container(
        &self,
        image: &ImageId,
        input: &[u8],
        _limits: &RunLimits,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, RunError> {
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }
        let program = self
            .images
            .lock()
            .unwrap()
            .get(&image.0)
            .cloned()
            .ok_or_else(|| RunError::Execution("unknown image".to_string()))?;

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(2));
        // decrement before a possible panic
        self.running.fetch_sub(1, Ordering::SeqCst);
        if let FakeProgram::Panicking = program {
            self.panicked.store(true, Ordering::SeqCst);
        }
        Self::execute(&program, input)
    }

    fn kill_container(&self, _container: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn remove_image(&self, image: &ImageId) -> anyhow::Result<()> {
        self.removed.lock().unwrap().push(image.0.clone());
        Ok(())
    }
}

pub fn quiet_config() -> Configuration {
    Configuration::new().with_verbose(false)
}

pub fn iterated(n_max: u64) -> BattleConfig {
    BattleConfig::Iterated(IteratedConfig::default().with_maximum_size(n_max))
}
