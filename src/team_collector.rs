//! Discovery of teams in a directory.

use std::path::Path;

use anyhow::{bail, Context};
use tracing::{info, instrument, warn};

use crate::team::TeamInfo;

const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

/// Name of the generator build context inside a team directory.
pub const GENERATOR_DIR: &str = "generator";
/// Name of the solver build context inside a team directory.
pub const SOLVER_DIR: &str = "solver";

/// Collects every team found in `directory`.
///
/// Each subdirectory is a team named after it, with its generator in `generator/` and its solver
/// in `solver/`. Files and hidden directories are skipped. A team missing one of its programs is
/// still collected: its build will fail and it will be excluded from the match with a reason.
///
/// # Errors
/// Returns an error if `directory` is not a readable directory.
#[instrument]
pub fn collect_teams(directory: &Path, verbose: bool) -> anyhow::Result<Vec<TeamInfo>> {
    if !directory.is_dir() {
        bail!("'{}' is not a valid directory", directory.display());
    }

    let mut subdirs = std::fs::read_dir(directory)
        .with_context(|| format!("could not read '{}'", directory.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect::<Vec<_>>();
    subdirs.sort();
    info!(team_directories = ?subdirs);

    let longest_name = subdirs
        .iter()
        .filter_map(|p| p.file_name())
        .fold(0, |acu, name| acu.max(name.len()))
        + 3; // at least 3 dots

    if verbose {
        println!("Collecting teams...");
    }

    let mut teams = vec![];
    for subdir in subdirs {
        let Some(name) = subdir.file_name().and_then(|n| n.to_str()) else {
            warn!("skipping '{}': name is not valid UTF-8", subdir.display());
            continue;
        };
        if name.starts_with('.') {
            continue;
        }

        if verbose {
            print!("Collecting {name:·<longest_name$} ");
        }

        if !subdir.is_dir() {
            warn!("Not a directory: '{name}'");
            if verbose {
                println!("{RED}Not a directory{RESET}");
            }
            continue;
        }

        let missing = [GENERATOR_DIR, SOLVER_DIR]
            .into_iter()
            .filter(|program| !subdir.join(program).is_dir())
            .collect::<Vec<_>>();
        if missing.is_empty() {
            if verbose {
                println!("{GREEN}Ok{RESET}");
            }
        } else {
            warn!("team '{name}' has no {} directory", missing.join(" nor "));
            if verbose {
                println!("{YELLOW}missing {}{RESET}", missing.join(", "));
            }
        }

        teams.push(TeamInfo::new(
            name,
            subdir.join(GENERATOR_DIR),
            subdir.join(SOLVER_DIR),
        ));
    }

    Ok(teams)
}
