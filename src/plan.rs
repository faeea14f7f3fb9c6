//! Commands, the ordered steps each one runs, and coordinator states.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Reason `preview` is refused, printed to the operator.
pub const PREVIEW_UNSUPPORTED: [&str; 3] = [
    "Preview is not implemented for this deployment.",
    "The database stack reaches its server through a tunnel to the bastion host,",
    "and the bastion host does not exist until the network stack has been deployed.",
];

/// Raised when a command name is not one of the supported commands.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("Unsupported command [{0}]. Exiting...")]
pub struct UnsupportedCommand(pub String);

/// Top-level command requested by the operator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Command {
    /// Show proposed changes. Refused.
    Preview,
    /// Create or update both stacks.
    Up,
    /// Reconcile both stacks with the real resources.
    Refresh,
    /// Delete both stacks' resources.
    Destroy,
}

impl FromStr for Command {
    type Err = UnsupportedCommand;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "preview" => Ok(Self::Preview),
            "up" => Ok(Self::Up),
            "refresh" => Ok(Self::Refresh),
            "destroy" => Ok(Self::Destroy),
            other => Err(UnsupportedCommand(other.to_owned())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Preview => "preview",
            Self::Up => "up",
            Self::Refresh => "refresh",
            Self::Destroy => "destroy",
        })
    }
}

/// Coarse lifecycle state of a coordinator run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CoordinatorState {
    /// Nothing has started.
    Idle,
    /// Unit dependencies are being installed.
    DependenciesInstalling,
    /// The network unit is being deployed or inspected.
    PhaseOneRunning,
    /// The tunnel through the bastion is being opened.
    TunnelEstablishing,
    /// Operations needing private connectivity are running.
    PhaseTwoRunning,
    /// The tunnel is being closed.
    TunnelTearingDown,
    /// The run succeeded.
    Done,
    /// The run failed.
    Failed,
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::DependenciesInstalling => "dependencies-installing",
            Self::PhaseOneRunning => "phase-one-running",
            Self::TunnelEstablishing => "tunnel-establishing",
            Self::PhaseTwoRunning => "phase-two-running",
            Self::TunnelTearingDown => "tunnel-tearing-down",
            Self::Done => "done",
            Self::Failed => "failed",
        })
    }
}

/// One element of a plan.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Step {
    /// Install dependencies of both units.
    InstallDependencies,
    /// Create or select the network stack, set its config, and run `up`.
    UpNetwork,
    /// Select the network stack and read its outputs.
    ReadNetworkOutputs,
    /// Open the tunnel from the network outputs.
    OpenTunnel,
    /// Create or select the database stack, configure it, and run `up`.
    UpDatabase,
    /// Select the database stack and run `refresh`.
    RefreshDatabase,
    /// Run `refresh` on the network stack.
    RefreshNetwork,
    /// Select the database stack and run `destroy`.
    DestroyDatabase,
    /// Run `destroy` on the network stack.
    DestroyNetwork,
}

impl Step {
    /// State the coordinator is in while this step runs.
    #[must_use]
    pub const fn state(self) -> CoordinatorState {
        match self {
            Self::InstallDependencies => CoordinatorState::DependenciesInstalling,
            Self::UpNetwork | Self::ReadNetworkOutputs => CoordinatorState::PhaseOneRunning,
            Self::OpenTunnel => CoordinatorState::TunnelEstablishing,
            Self::UpDatabase
            | Self::RefreshDatabase
            | Self::RefreshNetwork
            | Self::DestroyDatabase
            | Self::DestroyNetwork => CoordinatorState::PhaseTwoRunning,
        }
    }
}

/// Ordered steps executed for a command. Tunnel teardown always follows.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Plan {
    command: Command,
    steps: Vec<Step>,
}

impl Plan {
    /// Builds the plan for `command`; `preview` yields an empty plan.
    #[must_use]
    pub fn for_command(command: Command) -> Self {
        let steps = match command {
            Command::Preview => Vec::new(),
            Command::Up => vec![
                Step::InstallDependencies,
                Step::UpNetwork,
                Step::OpenTunnel,
                Step::UpDatabase,
            ],
            Command::Refresh => vec![
                Step::InstallDependencies,
                Step::ReadNetworkOutputs,
                Step::OpenTunnel,
                Step::RefreshDatabase,
                Step::RefreshNetwork,
            ],
            Command::Destroy => vec![
                Step::InstallDependencies,
                Step::ReadNetworkOutputs,
                Step::OpenTunnel,
                Step::DestroyDatabase,
                Step::DestroyNetwork,
            ],
        };
        Self { command, steps }
    }

    /// Command this plan implements.
    #[must_use]
    pub const fn command(&self) -> Command {
        self.command
    }

    /// Steps in execution order.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Returns `true` when the plan performs no work.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn position(plan: &Plan, step: Step) -> usize {
        plan.steps()
            .iter()
            .position(|candidate| *candidate == step)
            .expect("step should be planned")
    }

    #[rstest]
    #[case("preview", Command::Preview)]
    #[case("up", Command::Up)]
    #[case("refresh", Command::Refresh)]
    #[case("destroy", Command::Destroy)]
    fn commands_parse_and_display(#[case] raw: &str, #[case] expected: Command) {
        let parsed: Command = raw.parse().expect("known command");
        assert_eq!(parsed, expected);
        assert_eq!(parsed.to_string(), raw);
    }

    #[rstest]
    #[case("deploy")]
    #[case("UP")]
    #[case("")]
    fn unknown_commands_are_rejected(#[case] raw: &str) {
        let err = raw.parse::<Command>().expect_err("unknown command");
        assert_eq!(err.to_string(), format!("Unsupported command [{raw}]. Exiting..."));
    }

    #[rstest]
    fn preview_plans_nothing() {
        assert!(Plan::for_command(Command::Preview).is_empty());
    }

    #[rstest]
    fn up_opens_tunnel_between_network_and_database() {
        let plan = Plan::for_command(Command::Up);
        assert!(position(&plan, Step::UpNetwork) < position(&plan, Step::OpenTunnel));
        assert!(position(&plan, Step::OpenTunnel) < position(&plan, Step::UpDatabase));
    }

    #[rstest]
    fn destroy_removes_database_before_network() {
        let plan = Plan::for_command(Command::Destroy);
        assert!(position(&plan, Step::OpenTunnel) < position(&plan, Step::DestroyDatabase));
        assert!(position(&plan, Step::DestroyDatabase) < position(&plan, Step::DestroyNetwork));
    }

    #[rstest]
    fn refresh_reconciles_database_first() {
        let plan = Plan::for_command(Command::Refresh);
        assert!(position(&plan, Step::RefreshDatabase) < position(&plan, Step::RefreshNetwork));
    }

    #[rstest]
    #[case(Command::Up)]
    #[case(Command::Refresh)]
    #[case(Command::Destroy)]
    fn every_running_plan_installs_dependencies_first(#[case] command: Command) {
        let plan = Plan::for_command(command);
        assert_eq!(plan.steps().first(), Some(&Step::InstallDependencies));
        assert_eq!(plan.command(), command);
    }

    #[rstest]
    fn steps_map_to_states() {
        assert_eq!(Step::OpenTunnel.state(), CoordinatorState::TunnelEstablishing);
        assert_eq!(Step::UpNetwork.state(), CoordinatorState::PhaseOneRunning);
        assert_eq!(Step::DestroyNetwork.state(), CoordinatorState::PhaseTwoRunning);
    }
}
