//! Core library for the `stackhop` deployment coordinator.
//!
//! The crate sequences two dependent infrastructure stacks: a network unit
//! that provisions a bastion host and a private PostgreSQL instance, and a
//! database unit that can only reach that instance through an SSH tunnel.
//! Provisioning itself is delegated to an external engine behind the
//! [`Engine`] trait; the crate owns ordering, tunnel lifecycle, dependency
//! installation, and guaranteed cleanup.

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod installer;
pub mod output;
pub mod plan;
pub mod pulumi;
pub mod runner;
pub mod stack;
pub mod test_support;
pub mod tunnel;

pub use config::{ConfigError, StackhopConfig};
pub use coordinator::{
    CoordinatorError, ProvisioningCoordinator, RunError, RunRequest, Units, refuse_preview,
};
pub use engine::{
    ConfigMap, ConfigValue, Engine, EngineFuture, OutputValue, ProvisioningUnit, StackOutputs,
    StackRef,
};
pub use installer::{DependencyInstaller, InstallError, InstallSummary};
pub use output::{OutputSink, SharedSink, StdoutSink};
pub use plan::{Command, CoordinatorState, Plan, Step, UnsupportedCommand};
pub use pulumi::{PulumiCli, PulumiError};
pub use runner::{
    CommandOutput, CommandRunner, Interrupt, Invocation, ProcessCommandRunner, RunnerError,
};
pub use stack::{Operation, StackOperationRunner};
pub use tunnel::{SshTunnel, SshTunnelManager, TunnelError, TunnelManager};
