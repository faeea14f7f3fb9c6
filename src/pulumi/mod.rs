//! [`Engine`] implementation that drives the `pulumi` command-line program.
//!
//! Each unit is a local Pulumi project; commands run with the unit's working
//! directory as the current directory and always pass `--stack` plus
//! `--non-interactive` so no prompt can stall a run.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::engine::{
    ConfigMap, Engine, EngineFuture, OutputValue, ProvisioningUnit, StackOutputs, StackRef,
};
use crate::output::OutputSink;
use crate::runner::{CommandOutput, CommandRunner, Invocation, RunnerError};

/// Placeholder `pulumi stack output --json` prints for secret values.
pub const SECRET_PLACEHOLDER: &str = "[secret]";

/// Errors surfaced while driving the `pulumi` CLI.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PulumiError {
    /// Raised when the CLI cannot be started or awaited.
    #[error(transparent)]
    Runner(#[from] RunnerError),
    /// Raised when the CLI exits with a non-zero status.
    #[error("pulumi {operation} on stack {stack} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Subcommand that failed (for example `up`).
        operation: String,
        /// Stack the command targeted.
        stack: String,
        /// Exit status as reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the process.
        stderr: String,
    },
    /// Raised when `stack output --json` prints something other than a JSON
    /// object.
    #[error("failed to parse outputs of stack {stack}: {message}")]
    Parse {
        /// Stack whose outputs could not be parsed.
        stack: String,
        /// Parser error message.
        message: String,
    },
}

/// Provisioning engine backed by the `pulumi` binary.
#[derive(Clone, Debug)]
pub struct PulumiCli<R: CommandRunner> {
    bin: String,
    runner: R,
}

impl<R: CommandRunner> PulumiCli<R> {
    /// Creates an engine that runs `bin` through `runner`.
    #[must_use]
    pub fn new(bin: impl Into<String>, runner: R) -> Self {
        Self {
            bin: bin.into(),
            runner,
        }
    }

    fn invocation(&self, unit: &ProvisioningUnit) -> Invocation {
        Invocation::new(&self.bin).current_dir(unit.work_dir.clone())
    }

    fn stack_invocation(&self, stack: &StackRef, subcommand: &[&str]) -> Invocation {
        self.invocation(&stack.unit)
            .args(subcommand.iter().copied())
            .arg("--stack")
            .arg(&stack.name)
            .arg("--non-interactive")
    }

    async fn run_checked(
        &self,
        invocation: &Invocation,
        operation: &str,
        stack: &str,
    ) -> Result<CommandOutput, PulumiError> {
        let output = self.runner.run(invocation).await?;
        check_output(output, operation, stack)
    }

    async fn run_streaming_checked(
        &self,
        invocation: &Invocation,
        sink: &dyn OutputSink,
        operation: &str,
        stack: &str,
    ) -> Result<CommandOutput, PulumiError> {
        let output = self.runner.run_streaming(invocation, sink).await?;
        check_output(output, operation, stack)
    }

    async fn select(
        &self,
        unit: &ProvisioningUnit,
        stack_name: &str,
        create: bool,
    ) -> Result<StackRef, PulumiError> {
        let mut invocation = self.invocation(unit).args(["stack", "select"]);
        if create {
            invocation = invocation.arg("--create");
        }
        let full = invocation.arg(stack_name).arg("--non-interactive");
        self.run_checked(&full, "stack select", stack_name).await?;
        debug!(unit = %unit.name, stack = stack_name, create, "stack selected");
        Ok(StackRef {
            unit: unit.clone(),
            name: stack_name.to_owned(),
        })
    }

    async fn apply(
        &self,
        stack: &StackRef,
        operation: &'static str,
        sink: &dyn OutputSink,
    ) -> Result<StackOutputs, PulumiError> {
        info!(unit = %stack.unit.name, stack = %stack.name, operation, "running engine operation");
        let invocation = self.stack_invocation(stack, &[operation, "--yes", "--skip-preview"]);
        self.run_streaming_checked(&invocation, sink, operation, &stack.name)
            .await?;
        self.read_outputs(stack).await
    }

    async fn read_outputs(&self, stack: &StackRef) -> Result<StackOutputs, PulumiError> {
        let masked_invocation = self.stack_invocation(stack, &["stack", "output", "--json"]);
        let masked = self
            .run_checked(&masked_invocation, "stack output", &stack.name)
            .await?;
        let revealed_invocation = masked_invocation.arg("--show-secrets");
        let revealed = self
            .run_checked(&revealed_invocation, "stack output", &stack.name)
            .await?;
        merge_outputs(&stack.name, &masked.stdout, &revealed.stdout)
    }
}

impl<R: CommandRunner> Engine for PulumiCli<R> {
    type Error = PulumiError;

    fn create_or_select_stack<'a>(
        &'a self,
        unit: &'a ProvisioningUnit,
        stack_name: &'a str,
    ) -> EngineFuture<'a, StackRef, Self::Error> {
        Box::pin(self.select(unit, stack_name, true))
    }

    fn select_stack<'a>(
        &'a self,
        unit: &'a ProvisioningUnit,
        stack_name: &'a str,
    ) -> EngineFuture<'a, StackRef, Self::Error> {
        Box::pin(self.select(unit, stack_name, false))
    }

    fn set_all_config<'a>(
        &'a self,
        stack: &'a StackRef,
        config: &'a ConfigMap,
    ) -> EngineFuture<'a, (), Self::Error> {
        Box::pin(async move {
            if config.is_empty() {
                return Ok(());
            }
            let mut invocation = self.stack_invocation(stack, &["config", "set-all"]);
            for (key, entry) in config {
                let flag = if entry.secret {
                    "--secret"
                } else {
                    "--plaintext"
                };
                invocation = invocation.arg(flag).arg(format!("{key}={}", entry.value));
            }
            self.run_checked(&invocation, "config set-all", &stack.name)
                .await
                .map(|_| ())
        })
    }

    fn up<'a>(
        &'a self,
        stack: &'a StackRef,
        sink: &'a dyn OutputSink,
    ) -> EngineFuture<'a, StackOutputs, Self::Error> {
        Box::pin(self.apply(stack, "up", sink))
    }

    fn refresh<'a>(
        &'a self,
        stack: &'a StackRef,
        sink: &'a dyn OutputSink,
    ) -> EngineFuture<'a, StackOutputs, Self::Error> {
        Box::pin(self.apply(stack, "refresh", sink))
    }

    fn destroy<'a>(
        &'a self,
        stack: &'a StackRef,
        sink: &'a dyn OutputSink,
    ) -> EngineFuture<'a, StackOutputs, Self::Error> {
        Box::pin(self.apply(stack, "destroy", sink))
    }

    fn outputs<'a>(&'a self, stack: &'a StackRef) -> EngineFuture<'a, StackOutputs, Self::Error> {
        Box::pin(self.read_outputs(stack))
    }
}

fn check_output(
    output: CommandOutput,
    operation: &str,
    stack: &str,
) -> Result<CommandOutput, PulumiError> {
    if output.is_success() {
        return Ok(output);
    }

    Err(PulumiError::CommandFailure {
        operation: operation.to_owned(),
        stack: stack.to_owned(),
        status: output.code,
        status_text: output.status_text(),
        stderr: output.stderr,
    })
}

fn parse_object(stack: &str, document: &str) -> Result<Map<String, Value>, PulumiError> {
    if document.trim().is_empty() {
        return Ok(Map::new());
    }
    serde_json::from_str(document).map_err(|err| PulumiError::Parse {
        stack: stack.to_owned(),
        message: err.to_string(),
    })
}

/// Combines the masked and revealed output documents: values come from the
/// revealed one, secrecy from the masked one.
fn merge_outputs(stack: &str, masked: &str, revealed: &str) -> Result<StackOutputs, PulumiError> {
    let masked_values = parse_object(stack, masked)?;
    let revealed_values = parse_object(stack, revealed)?;

    Ok(revealed_values
        .into_iter()
        .map(|(name, value)| {
            let secret = masked_values
                .get(&name)
                .is_some_and(|masked_value| masked_value.as_str() == Some(SECRET_PLACEHOLDER));
            (name, OutputValue { value, secret })
        })
        .collect())
}

#[cfg(test)]
mod tests;
