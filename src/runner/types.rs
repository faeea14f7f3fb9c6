//! Invocation and output types shared by command runners.

use std::ffi::OsString;

use camino::Utf8PathBuf;
use shell_escape::unix::escape;
use thiserror::Error;

/// Flag whose following argument carries a secret value.
const SECRET_FLAG: &str = "--secret";

/// Placeholder logged in place of secret values.
const REDACTED: &str = "[secret]";

fn redact(assignment: &str) -> String {
    assignment.split_once('=').map_or_else(
        || String::from(REDACTED),
        |(key, _)| format!("{key}={REDACTED}"),
    )
}

/// A program, its arguments, and the directory it runs in.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Invocation {
    /// Program name or path.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Working directory; inherits the caller's when `None`.
    pub cwd: Option<Utf8PathBuf>,
}

impl Invocation {
    /// Starts an invocation of `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    /// Appends a single argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<OsString>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Renders the invocation as a shell-escaped command line for logs.
    ///
    /// The value following a `--secret` flag is replaced by `[secret]`,
    /// keeping the key before its first `=`.
    #[must_use]
    pub fn command_line(&self) -> String {
        let mut rendered = escape(self.program.as_str().into()).into_owned();
        let mut previous: Option<&OsString> = None;
        for arg in &self.args {
            let text = arg.to_string_lossy();
            let shown = if previous.is_some_and(|flag| flag == SECRET_FLAG) {
                redact(&text)
            } else {
                text.into_owned()
            };
            rendered.push(' ');
            rendered.push_str(escape(shown.into()).as_ref());
            previous = Some(arg);
        }
        rendered
    }

    /// Returns `true` when any argument equals `value`.
    #[must_use]
    pub fn has_arg(&self, value: &str) -> bool {
        self.args.iter().any(|arg| arg.to_string_lossy() == value)
    }
}

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Human readable exit status, `unknown` when killed by a signal.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

/// Errors raised while starting or waiting on a subprocess.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RunnerError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when waiting on a spawned command fails.
    #[error("failed to wait for {program}: {message}")]
    Wait {
        /// Command being awaited.
        program: String,
        /// Operating system error string.
        message: String,
    },
}
