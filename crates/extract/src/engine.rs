use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::ExtractError;

/// Variable the engine's launcher reads its install location from.
pub const HOME_VAR: &str = "CTAKES_HOME";

#[cfg(windows)]
const LAUNCHER_EXT: &str = "bat";
#[cfg(not(windows))]
const LAUNCHER_EXT: &str = "sh";

/// Where the terminology engine lives inside its install tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineLayout {
    pub launcher: PathBuf,
    pub home: PathBuf,
}

#[derive(Debug, Clone)]
pub struct EngineRun {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl EngineRun {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Locate the launcher for this host OS and the engine home (the parent of
/// the first `bin` directory).
pub fn discover(install_dir: &Path, launcher_stem: &str) -> Result<EngineLayout, ExtractError> {
    let mut launcher = None;
    let mut home = None;

    for entry in WalkDir::new(install_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(install_dir).to_path_buf();
            ExtractError::io(&path, e.into())
        })?;
        let path = entry.path();

        if entry.file_type().is_dir() {
            if home.is_none() && entry.file_name() == "bin" {
                home = path.parent().map(Path::to_path_buf);
            }
            continue;
        }

        let stem_matches = path.file_stem().and_then(|s| s.to_str()) == Some(launcher_stem);
        let ext_matches = path.extension().and_then(|e| e.to_str()) == Some(LAUNCHER_EXT);
        if launcher.is_none() && stem_matches && ext_matches {
            launcher = Some(path.to_path_buf());
        }
    }

    let launcher = launcher.ok_or_else(|| ExtractError::LauncherNotFound {
        install_dir: install_dir.to_path_buf(),
        stem: launcher_stem.to_string(),
    })?;
    let home = home.ok_or_else(|| ExtractError::HomeNotFound(install_dir.to_path_buf()))?;

    debug!(launcher = %launcher.display(), home = %home.display(), "Discovered terminology engine");
    Ok(EngineLayout { launcher, home })
}

pub struct EngineInvocation<'a> {
    pub input_dir: &'a Path,
    pub output_dir: &'a Path,
    pub pipeline_file: &'a Path,
    pub api_key: &'a str,
}

/// Run the engine once over the whole input directory.
///
/// Both pipes are drained before the exit status is read.
pub async fn run_engine(
    layout: &EngineLayout,
    invocation: &EngineInvocation<'_>,
) -> Result<EngineRun, ExtractError> {
    let launcher = absolute(&layout.launcher)?;
    let home = absolute(&layout.home)?;

    info!(launcher = %launcher.display(), "Running terminology engine");

    let output = Command::new(&launcher)
        .arg("-i")
        .arg(absolute(invocation.input_dir)?)
        .arg("-o")
        .arg(absolute(invocation.output_dir)?)
        .arg("--key")
        .arg(invocation.api_key)
        .arg("--piper")
        .arg(absolute(invocation.pipeline_file)?)
        .env(HOME_VAR, &home)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ExtractError::io(&launcher, e))?;

    Ok(EngineRun {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

fn absolute(path: &Path) -> Result<PathBuf, ExtractError> {
    std::path::absolute(path).map_err(|e| ExtractError::io(path, e))
}
