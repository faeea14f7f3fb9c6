//! Idempotent installation of each unit's local dependencies.
//!
//! A unit counts as installed when its working directory already contains
//! the dependency marker directory (`node_modules` for npm projects).
//! Otherwise the package manager runs in that directory and the coordinator
//! waits for it; any failure aborts the whole run.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;
use tracing::{debug, info};

use crate::output::{SharedSink, banner};
use crate::runner::{CommandRunner, Invocation, RunnerError};

/// Errors raised while materialising unit dependencies.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum InstallError {
    /// Raised when the package manager cannot be started.
    #[error(transparent)]
    Runner(#[from] RunnerError),
    /// Raised when a unit directory cannot be opened to look for the marker.
    #[error("unit directory {path} is missing or unreadable: {message}")]
    UnitDirectory {
        /// Directory that could not be opened.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the package manager exits with a non-zero status.
    #[error("{program} install in {path} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Package manager that failed.
        program: String,
        /// Working directory of the failed install.
        path: Utf8PathBuf,
        /// Exit status as reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the process.
        stderr: String,
    },
}

/// Directories processed by an install pass.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstallSummary {
    /// Directories where the package manager ran.
    pub installed: Vec<Utf8PathBuf>,
    /// Directories skipped because the marker already existed.
    pub skipped: Vec<Utf8PathBuf>,
}

/// Runs `<program> install` in unit directories that lack the marker.
pub struct DependencyInstaller<R: CommandRunner> {
    program: String,
    marker: String,
    runner: R,
    sink: SharedSink,
}

impl<R: CommandRunner> DependencyInstaller<R> {
    /// Creates an installer running `program` and checking for `marker`.
    #[must_use]
    pub fn new(
        program: impl Into<String>,
        marker: impl Into<String>,
        runner: R,
        sink: SharedSink,
    ) -> Self {
        Self {
            program: program.into(),
            marker: marker.into(),
            runner,
            sink,
        }
    }

    /// Ensures every directory in `work_dirs` has its dependencies installed.
    ///
    /// Directories are processed in order and each install is awaited before
    /// the next one starts.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError`] on the first directory that cannot be opened
    /// or whose install fails to start or exits unsuccessfully; later
    /// directories are not attempted.
    pub async fn install(&self, work_dirs: &[&Utf8Path]) -> Result<InstallSummary, InstallError> {
        let listing = work_dirs
            .iter()
            .map(|dir| dir.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let message = format!("Installing dependencies for [{listing}]... ");
        banner(self.sink.as_ref(), &[message.as_str()]);

        let mut summary = InstallSummary::default();
        for dir in work_dirs {
            if self.has_marker(dir)? {
                debug!(path = %dir, marker = %self.marker, "dependencies already present");
                summary.skipped.push(dir.to_path_buf());
                continue;
            }

            info!(path = %dir, program = %self.program, "installing dependencies");
            self.install_one(dir).await?;
            summary.installed.push(dir.to_path_buf());
        }
        Ok(summary)
    }

    async fn install_one(&self, dir: &Utf8Path) -> Result<(), InstallError> {
        let invocation = Invocation::new(&self.program)
            .arg("install")
            .current_dir(dir);
        let output = self.runner.run(&invocation).await?;
        if output.is_success() {
            return Ok(());
        }

        Err(InstallError::CommandFailure {
            program: self.program.clone(),
            path: dir.to_path_buf(),
            status: output.code,
            status_text: output.status_text(),
            stderr: output.stderr,
        })
    }

    fn has_marker(&self, dir: &Utf8Path) -> Result<bool, InstallError> {
        let handle = Dir::open_ambient_dir(dir, ambient_authority()).map_err(|err| {
            InstallError::UnitDirectory {
                path: dir.to_path_buf(),
                message: err.to_string(),
            }
        })?;
        Ok(handle.is_dir(&self.marker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingSink, ScriptedRunner};
    use rstest::{fixture, rstest};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Workspace {
        _tmp: TempDir,
        fresh: Utf8PathBuf,
        installed: Utf8PathBuf,
    }

    #[fixture]
    fn workspace() -> Workspace {
        let tmp = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 path");
        let fresh = root.join("database");
        let installed = root.join("vpc");
        std::fs::create_dir_all(&fresh).expect("create fresh unit");
        std::fs::create_dir_all(installed.join("node_modules")).expect("create marker");
        Workspace {
            _tmp: tmp,
            fresh,
            installed,
        }
    }

    fn installer(runner: &ScriptedRunner, sink: &RecordingSink) -> DependencyInstaller<ScriptedRunner> {
        DependencyInstaller::new("npm", "node_modules", runner.clone(), Arc::new(sink.clone()))
    }

    #[rstest]
    #[tokio::test]
    async fn install_skips_directories_with_marker(workspace: Workspace) {
        let runner = ScriptedRunner::new();
        let sink = RecordingSink::new();

        let summary = installer(&runner, &sink)
            .install(&[workspace.installed.as_path()])
            .await
            .expect("install should succeed");

        assert!(runner.invocations().is_empty(), "no install should run");
        assert_eq!(summary.skipped, vec![workspace.installed.clone()]);
        assert!(summary.installed.is_empty());
        assert!(sink.contains("Installing dependencies for"));
    }

    #[rstest]
    #[tokio::test]
    async fn install_runs_package_manager_in_unit_directory(workspace: Workspace) {
        let runner = ScriptedRunner::new();
        runner.push_success();
        let sink = RecordingSink::new();

        let summary = installer(&runner, &sink)
            .install(&[workspace.installed.as_path(), workspace.fresh.as_path()])
            .await
            .expect("install should succeed");

        let invocations = runner.invocations();
        assert_eq!(invocations.len(), 1);
        let call = invocations.first().expect("install invocation");
        assert_eq!(call.command_line(), "npm install");
        assert_eq!(call.cwd.as_ref(), Some(&workspace.fresh));
        assert_eq!(summary.installed, vec![workspace.fresh.clone()]);
    }

    #[rstest]
    #[tokio::test]
    async fn install_failure_aborts_remaining_directories(workspace: Workspace) {
        let runner = ScriptedRunner::new();
        runner.push_failure(1);
        let sink = RecordingSink::new();
        let other = workspace.fresh.with_file_name("other");

        let err = installer(&runner, &sink)
            .install(&[workspace.fresh.as_path(), other.as_path()])
            .await
            .expect_err("install should fail");

        assert!(
            matches!(err, InstallError::CommandFailure { status: Some(1), ref path, .. } if *path == workspace.fresh),
            "unexpected error: {err}"
        );
        assert_eq!(runner.invocations().len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn missing_unit_directory_is_reported_without_running_installs(workspace: Workspace) {
        let runner = ScriptedRunner::new();
        let sink = RecordingSink::new();
        let missing = workspace.fresh.with_file_name("absent");

        let err = installer(&runner, &sink)
            .install(&[missing.as_path(), workspace.fresh.as_path()])
            .await
            .expect_err("a missing unit directory is fatal");

        assert!(
            matches!(err, InstallError::UnitDirectory { ref path, .. } if *path == missing),
            "unexpected error: {err}"
        );
        assert!(err.to_string().contains("is missing or unreadable"));
        assert!(runner.invocations().is_empty(), "no install should run");
    }
}
