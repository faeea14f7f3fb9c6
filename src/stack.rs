//! Operations against one selected stack.

use std::fmt;

use tracing::debug;

use crate::engine::{ConfigMap, Engine, ProvisioningUnit, StackOutputs, StackRef};
use crate::output::OutputSink;

/// Engine operation performed on a stack, used to label failures.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operation {
    /// Selecting (and possibly creating) the stack.
    Select,
    /// Writing stack configuration.
    Configure,
    /// `up`.
    Up,
    /// `refresh`.
    Refresh,
    /// `destroy`.
    Destroy,
    /// Reading stack outputs.
    Outputs,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Select => "select",
            Self::Configure => "configure",
            Self::Up => "up",
            Self::Refresh => "refresh",
            Self::Destroy => "destroy",
            Self::Outputs => "outputs",
        };
        f.write_str(label)
    }
}

/// Binds an engine, a selected stack, and the progress sink together.
///
/// Every method delegates to the engine unchanged; errors are neither
/// retried nor reinterpreted.
pub struct StackOperationRunner<'a, E: Engine> {
    engine: &'a E,
    stack: StackRef,
    sink: &'a dyn OutputSink,
}

impl<'a, E: Engine> StackOperationRunner<'a, E> {
    /// Selects `stack_name` in `unit`, creating the stack when it is absent.
    ///
    /// # Errors
    ///
    /// Returns the engine error when selection fails.
    pub async fn create_or_select(
        engine: &'a E,
        unit: &ProvisioningUnit,
        stack_name: &str,
        sink: &'a dyn OutputSink,
    ) -> Result<Self, E::Error> {
        let stack = engine.create_or_select_stack(unit, stack_name).await?;
        Ok(Self::new(engine, stack, sink))
    }

    /// Selects an existing `stack_name` in `unit`.
    ///
    /// # Errors
    ///
    /// Returns the engine error when the stack does not exist.
    pub async fn select(
        engine: &'a E,
        unit: &ProvisioningUnit,
        stack_name: &str,
        sink: &'a dyn OutputSink,
    ) -> Result<Self, E::Error> {
        let stack = engine.select_stack(unit, stack_name).await?;
        Ok(Self::new(engine, stack, sink))
    }

    /// Wraps an already selected stack.
    #[must_use]
    pub fn new(engine: &'a E, stack: StackRef, sink: &'a dyn OutputSink) -> Self {
        Self {
            engine,
            stack,
            sink,
        }
    }

    /// Stack this runner targets.
    #[must_use]
    pub const fn stack(&self) -> &StackRef {
        &self.stack
    }

    /// Writes `config` to the stack.
    ///
    /// # Errors
    ///
    /// Returns the engine error unchanged.
    pub async fn set_all_config(&self, config: &ConfigMap) -> Result<(), E::Error> {
        debug!(unit = %self.stack.unit.name, keys = config.len(), "setting stack config");
        self.engine.set_all_config(&self.stack, config).await
    }

    /// Runs `up`, streaming progress to the sink.
    ///
    /// # Errors
    ///
    /// Returns the engine error unchanged.
    pub async fn up(&self) -> Result<StackOutputs, E::Error> {
        self.engine.up(&self.stack, self.sink).await
    }

    /// Runs `refresh`, streaming progress to the sink.
    ///
    /// # Errors
    ///
    /// Returns the engine error unchanged.
    pub async fn refresh(&self) -> Result<StackOutputs, E::Error> {
        self.engine.refresh(&self.stack, self.sink).await
    }

    /// Runs `destroy`, streaming progress to the sink.
    ///
    /// # Errors
    ///
    /// Returns the engine error unchanged.
    pub async fn destroy(&self) -> Result<StackOutputs, E::Error> {
        self.engine.destroy(&self.stack, self.sink).await
    }

    /// Reads the stack's outputs.
    ///
    /// # Errors
    ///
    /// Returns the engine error unchanged.
    pub async fn outputs(&self) -> Result<StackOutputs, E::Error> {
        self.engine.outputs(&self.stack).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pulumi::{PulumiCli, PulumiError};
    use crate::test_support::{RecordingSink, ScriptedRunner};
    use rstest::rstest;

    #[rstest]
    #[case(Operation::Select, "select")]
    #[case(Operation::Configure, "configure")]
    #[case(Operation::Outputs, "outputs")]
    fn operation_labels_are_lowercase(#[case] operation: Operation, #[case] expected: &str) {
        assert_eq!(operation.to_string(), expected);
    }

    #[rstest]
    #[tokio::test]
    async fn runner_streams_to_its_sink_and_keeps_the_stack() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        runner.push_output(Some(0), "Destroying (dev)\n", "");
        runner.push_output(Some(0), "{}", "");
        runner.push_output(Some(0), "{}", "");
        let engine = PulumiCli::new("pulumi", runner.clone());
        let sink = RecordingSink::new();
        let unit = ProvisioningUnit::new("database", "./database");

        let stack = StackOperationRunner::select(&engine, &unit, "dev", &sink)
            .await
            .expect("select should succeed");
        stack.destroy().await.expect("destroy should succeed");

        assert_eq!(stack.stack().unit, unit);
        assert_eq!(sink.lines(), ["Destroying (dev)"]);
    }

    #[rstest]
    #[tokio::test]
    async fn runner_propagates_engine_errors_unchanged() {
        let runner = ScriptedRunner::new();
        runner.push_failure(2);
        let engine = PulumiCli::new("pulumi", runner);
        let sink = RecordingSink::new();
        let unit = ProvisioningUnit::new("network", "./vpc");

        let result = StackOperationRunner::select(&engine, &unit, "dev", &sink).await;

        assert!(matches!(
            result,
            Err(PulumiError::CommandFailure {
                status: Some(2),
                ..
            })
        ));
    }
}
