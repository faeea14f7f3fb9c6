//! Subprocess execution behind a mockable runner abstraction.
//!
//! Every external program the coordinator drives (the package installer and
//! the provisioning engine) runs through [`CommandRunner`]. The production
//! [`ProcessCommandRunner`] uses `tokio::process` so engine calls are
//! cancellable suspension points; dropping an in-flight future kills the
//! child. A runner holding an [`Interrupt`] instead forwards a single SIGINT
//! to the child when the interrupt fires and keeps collecting its output, so
//! the engine can cancel its own work cleanly.

use std::future::Future;
use std::pin::{Pin, pin};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::output::OutputSink;

mod interrupt;
mod types;

pub use interrupt::Interrupt;
pub use types::{CommandOutput, Invocation, RunnerError};

/// Future returned by runner operations.
pub type RunnerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RunnerError>> + Send + 'a>>;

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner: Send + Sync {
    /// Runs the invocation to completion, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError`] if the command cannot be started or awaited.
    fn run<'a>(&'a self, invocation: &'a Invocation) -> RunnerFuture<'a, CommandOutput>;

    /// Runs the invocation, forwarding each stdout line to `sink` as it
    /// arrives while still capturing both streams.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError`] if the command cannot be started or awaited.
    fn run_streaming<'a>(
        &'a self,
        invocation: &'a Invocation,
        sink: &'a dyn OutputSink,
    ) -> RunnerFuture<'a, CommandOutput>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner {
    interrupt: Option<Interrupt>,
}

impl ProcessCommandRunner {
    /// Creates a runner whose children are killed when their future drops.
    #[must_use]
    pub const fn new() -> Self {
        Self { interrupt: None }
    }

    /// Forwards `interrupt` to every child this runner spawns.
    ///
    /// Children are placed in their own process group so a terminal Ctrl-C
    /// reaches them once, through the runner, rather than twice.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    fn command(&self, invocation: &Invocation) -> Command {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        if self.interrupt.is_some() {
            command.process_group(0);
        }
        if let Some(dir) = &invocation.cwd {
            command.current_dir(dir);
        }
        command
    }

    async fn execute(
        &self,
        invocation: &Invocation,
        sink: Option<&dyn OutputSink>,
    ) -> Result<CommandOutput, RunnerError> {
        debug!(command = %invocation.command_line(), cwd = ?invocation.cwd, "spawning");
        let mut child = self
            .command(invocation)
            .spawn()
            .map_err(|err| RunnerError::Spawn {
                program: invocation.program.clone(),
                message: err.to_string(),
            })?;

        let pid = child.id();
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        // Drain both pipes while waiting so a chatty child cannot block on a
        // full pipe buffer.
        let mut collect = pin!(async {
            tokio::join!(
                child.wait(),
                read_lines(stdout_pipe, sink),
                read_all(stderr_pipe),
            )
        });
        let (status, stdout, stderr) = match &self.interrupt {
            Some(interrupt) => tokio::select! {
                collected = &mut collect => collected,
                () = interrupt.triggered() => {
                    forward_interrupt(&invocation.program, pid);
                    collect.await
                }
            },
            None => collect.await,
        };
        let exit = status.map_err(|err| RunnerError::Wait {
            program: invocation.program.clone(),
            message: err.to_string(),
        })?;

        Ok(CommandOutput {
            code: exit.code(),
            stdout,
            stderr,
        })
    }
}

#[cfg(unix)]
fn forward_interrupt(program: &str, pid: Option<u32>) {
    let Some(raw) = pid.and_then(|id| libc::pid_t::try_from(id).ok()) else {
        return;
    };
    // SAFETY: `kill` takes plain integers and `raw` names a child this
    // runner spawned and has not yet reaped.
    let status = unsafe { libc::kill(raw, libc::SIGINT) };
    if status == 0 {
        debug!(program, pid = raw, "forwarded interrupt");
    } else {
        warn!(program, pid = raw, error = %std::io::Error::last_os_error(), "failed to forward interrupt");
    }
}

#[cfg(not(unix))]
fn forward_interrupt(program: &str, pid: Option<u32>) {
    debug!(program, ?pid, "interrupt forwarding is unsupported on this platform");
}

impl CommandRunner for ProcessCommandRunner {
    fn run<'a>(&'a self, invocation: &'a Invocation) -> RunnerFuture<'a, CommandOutput> {
        Box::pin(self.execute(invocation, None))
    }

    fn run_streaming<'a>(
        &'a self,
        invocation: &'a Invocation,
        sink: &'a dyn OutputSink,
    ) -> RunnerFuture<'a, CommandOutput> {
        Box::pin(self.execute(invocation, Some(sink)))
    }
}

async fn read_lines<R>(pipe: Option<R>, sink: Option<&dyn OutputSink>) -> String
where
    R: AsyncRead + Unpin,
{
    let mut captured = String::new();
    let Some(reader) = pipe else {
        return captured;
    };

    // Lines are decoded lossily so stray bytes never stop the drain; closing
    // the pipe early would kill the child with SIGPIPE.
    let mut reader = BufReader::new(reader);
    let mut raw = Vec::new();
    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&raw);
                let line = text.trim_end_matches(['\n', '\r']);
                if let Some(target) = sink {
                    target.line(line);
                }
                captured.push_str(line);
                captured.push('\n');
            }
            Err(err) => {
                debug!(error = %err, "stdout read failed; discarding the rest");
                drain(&mut reader).await;
                break;
            }
        }
    }
    captured
}

/// Consumes a reader until EOF or a repeated error so the writer never
/// sees a closed pipe.
async fn drain<R>(reader: &mut R)
where
    R: AsyncRead + Unpin,
{
    let mut scratch = [0_u8; 8192];
    let mut failures = 0_u8;
    loop {
        match reader.read(&mut scratch).await {
            Ok(0) => break,
            Ok(_) => failures = 0,
            Err(_) if failures < 3 => failures += 1,
            Err(_) => break,
        }
    }
}

async fn read_all<R>(pipe: Option<R>) -> String
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut reader) = pipe {
        reader.read_to_end(&mut buf).await.ok();
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests;
