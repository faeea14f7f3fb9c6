//! Executes command plans across the network and database units.
//!
//! The coordinator walks a [`Plan`] step by step, capturing the network
//! unit's outputs, opening the tunnel once they are known, and then running
//! the database unit through it. Whatever happens to the plan (success,
//! failure, or a shutdown signal) the tunnel slot is handed to
//! [`TunnelManager::stop`] exactly once before the run returns. Applied
//! infrastructure is never rolled back.
//!
//! A shutdown request stops the plan from scheduling further steps. The
//! step already in flight keeps running for up to the shutdown grace period
//! so the engine can finish cancelling its own work; only then is it
//! abandoned.

mod error;

use std::future::{Future, pending};
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{ConfigMap, ConfigValue, Engine, ProvisioningUnit, StackOutputs};
use crate::installer::DependencyInstaller;
use crate::output::{OutputSink, SharedSink, banner};
use crate::plan::{Command, CoordinatorState, PREVIEW_UNSUPPORTED, Plan, Step};
use crate::runner::CommandRunner;
use crate::stack::{Operation, StackOperationRunner};
use crate::tunnel::TunnelManager;

pub use error::{CoordinatorError, RunError};

/// Network unit output naming the bastion's public address.
pub const BASTION_HOST_OUTPUT: &str = "bastionHost";
/// Network unit output naming the private database endpoint.
pub const DB_HOST_OUTPUT: &str = "dbHost";
/// Network unit output holding the database administrator name.
pub const DB_USERNAME_OUTPUT: &str = "dbUsername";
/// Network unit output holding the database administrator password.
pub const DB_PASSWORD_OUTPUT: &str = "dbPassword";

/// Configuration key carrying the operator's SSH public key.
pub const PUBLIC_KEY_CONFIG: &str = "publicKey";

/// How long an in-flight step may keep running after shutdown is requested.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(120);

/// The two units a run coordinates.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Units {
    /// Unit provisioning the VPC, bastion host, and database server.
    pub network: ProvisioningUnit,
    /// Unit provisioning databases inside the server.
    pub database: ProvisioningUnit,
}

/// A validated operator request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunRequest {
    /// Command to execute.
    pub command: Command,
    /// Stack name used in both units.
    pub stack_name: String,
    /// SSH public key contents, required by `up`.
    pub public_key: Option<String>,
}

impl RunRequest {
    /// Builds a request without a public key.
    #[must_use]
    pub fn new(command: Command, stack_name: impl Into<String>) -> Self {
        Self {
            command,
            stack_name: stack_name.into(),
            public_key: None,
        }
    }

    /// Attaches the SSH public key.
    #[must_use]
    pub fn with_public_key(mut self, public_key: impl Into<String>) -> Self {
        self.public_key = Some(public_key.into());
        self
    }
}

/// Sequences both units and owns the tunnel for the duration of a run.
pub struct ProvisioningCoordinator<E, T, R>
where
    E: Engine,
    T: TunnelManager,
    R: CommandRunner,
{
    engine: E,
    tunnels: T,
    installer: DependencyInstaller<R>,
    units: Units,
    sink: SharedSink,
    shutdown_grace: Duration,
}

/// Values gathered while a plan runs.
struct RunState<'a, E: Engine> {
    network: Option<StackOperationRunner<'a, E>>,
    network_outputs: StackOutputs,
}

impl<E, T, R> ProvisioningCoordinator<E, T, R>
where
    E: Engine,
    T: TunnelManager,
    R: CommandRunner,
{
    /// Creates a coordinator from its collaborators.
    #[must_use]
    pub const fn new(
        engine: E,
        tunnels: T,
        installer: DependencyInstaller<R>,
        units: Units,
        sink: SharedSink,
    ) -> Self {
        Self {
            engine,
            tunnels,
            installer,
            units,
            sink,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Overrides how long the in-flight step may run after shutdown.
    #[must_use]
    pub const fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Runs `request` to completion.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError`] when a step or the tunnel teardown fails.
    pub async fn run(&self, request: &RunRequest) -> Result<(), CoordinatorError<E::Error>> {
        self.run_until(request, pending::<()>()).await
    }

    /// Runs `request` until it completes or `shutdown` resolves.
    ///
    /// When `shutdown` resolves first, no further step is started. The
    /// in-flight step is awaited for up to the shutdown grace period and
    /// dropped if it is still running. The tunnel is stopped afterwards and,
    /// unless that step was the last one and succeeded, the run fails with
    /// [`RunError::Interrupted`].
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError`] when `preview` is requested, a step fails,
    /// the run is interrupted, or the tunnel teardown fails.
    pub async fn run_until<S>(
        &self,
        request: &RunRequest,
        shutdown: S,
    ) -> Result<(), CoordinatorError<E::Error>>
    where
        S: Future<Output = ()>,
    {
        let plan = Plan::for_command(request.command);
        if plan.is_empty() {
            return Err(refuse_preview(self.sink.as_ref()));
        }

        info!(command = %request.command, stack = %request.stack_name, "starting run");
        let mut tunnel = None;
        let stop_requested = AtomicBool::new(false);
        let outcome = {
            let mut execution = pin!(self.execute(&plan, request, &mut tunnel, &stop_requested));
            let mut shutdown_requested = pin!(shutdown);
            tokio::select! {
                result = &mut execution => result,
                () = &mut shutdown_requested => {
                    warn!(grace = ?self.shutdown_grace, "shutdown requested; waiting for the current step");
                    stop_requested.store(true, Ordering::SeqCst);
                    match tokio::time::timeout(self.shutdown_grace, &mut execution).await {
                        // The last step settled, so the plan is complete.
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(RunError::Interrupted)) => Err(RunError::Interrupted),
                        Ok(Err(err)) => {
                            warn!(error = %err, "step failed while shutting down");
                            Err(RunError::Interrupted)
                        }
                        Err(_) => {
                            warn!("grace period elapsed; abandoning the current step");
                            Err(RunError::Interrupted)
                        }
                    }
                }
            }
        };

        transition(CoordinatorState::TunnelTearingDown);
        let teardown = self.tunnels.stop(tunnel.take()).await;
        let result = match (outcome, teardown) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(primary), Ok(())) => Err(CoordinatorError::Run(primary)),
            (Ok(()), Err(err)) => Err(CoordinatorError::Teardown(err)),
            (Err(primary), Err(err)) => Err(CoordinatorError::TeardownAfterFailure {
                primary,
                teardown: err,
            }),
        };

        match &result {
            Ok(()) => transition(CoordinatorState::Done),
            Err(err) => {
                warn!(error = %err, "run failed");
                transition(CoordinatorState::Failed);
            }
        }
        result
    }

    async fn execute(
        &self,
        plan: &Plan,
        request: &RunRequest,
        tunnel: &mut Option<T::Tunnel>,
        stop_requested: &AtomicBool,
    ) -> Result<(), RunError<E::Error>> {
        let mut state = RunState {
            network: None,
            network_outputs: StackOutputs::new(),
        };
        for step in plan.steps() {
            if stop_requested.load(Ordering::SeqCst) {
                debug!(?step, "shutdown requested; step skipped");
                return Err(RunError::Interrupted);
            }
            transition(step.state());
            debug!(?step, "running step");
            self.execute_step(*step, request, &mut state, tunnel).await?;
        }
        Ok(())
    }

    async fn execute_step<'a>(
        &'a self,
        step: Step,
        request: &RunRequest,
        state: &mut RunState<'a, E>,
        tunnel: &mut Option<T::Tunnel>,
    ) -> Result<(), RunError<E::Error>> {
        let network = &self.units.network;
        let database = &self.units.database;
        let stack_name = request.stack_name.as_str();

        match step {
            Step::InstallDependencies => {
                self.installer
                    .install(&[network.work_dir.as_path(), database.work_dir.as_path()])
                    .await?;
            }
            Step::UpNetwork => {
                let stack = self.create_or_select(network, stack_name).await?;
                stack
                    .set_all_config(&network_config(request))
                    .await
                    .map_err(stack_failure(network, Operation::Configure))?;
                state.network_outputs = stack
                    .up()
                    .await
                    .map_err(stack_failure(network, Operation::Up))?;
                state.network = Some(stack);
            }
            Step::ReadNetworkOutputs => {
                let stack = self.select(network, stack_name).await?;
                state.network_outputs = stack
                    .outputs()
                    .await
                    .map_err(stack_failure(network, Operation::Outputs))?;
                state.network = Some(stack);
            }
            Step::OpenTunnel => {
                let bastion = state.network_outputs.get_str(BASTION_HOST_OUTPUT);
                let target = state.network_outputs.get_str(DB_HOST_OUTPUT);
                *tunnel = self
                    .tunnels
                    .start(bastion.as_deref(), target.as_deref())
                    .map_err(RunError::<E::Error>::Tunnel)?;
            }
            Step::UpDatabase => {
                let config = database_config::<E::Error>(network, &state.network_outputs)?;
                let stack = self.create_or_select(database, stack_name).await?;
                stack
                    .set_all_config(&config)
                    .await
                    .map_err(stack_failure(database, Operation::Configure))?;
                stack
                    .up()
                    .await
                    .map_err(stack_failure(database, Operation::Up))?;
            }
            Step::RefreshDatabase => {
                let stack = self.select(database, stack_name).await?;
                stack
                    .refresh()
                    .await
                    .map_err(stack_failure(database, Operation::Refresh))?;
            }
            Step::DestroyDatabase => {
                let stack = self.select(database, stack_name).await?;
                stack
                    .destroy()
                    .await
                    .map_err(stack_failure(database, Operation::Destroy))?;
            }
            Step::RefreshNetwork => {
                let stack = self.network_stack(state, stack_name).await?;
                stack
                    .refresh()
                    .await
                    .map_err(stack_failure(network, Operation::Refresh))?;
            }
            Step::DestroyNetwork => {
                let stack = self.network_stack(state, stack_name).await?;
                stack
                    .destroy()
                    .await
                    .map_err(stack_failure(network, Operation::Destroy))?;
            }
        }
        Ok(())
    }

    async fn create_or_select<'a>(
        &'a self,
        unit: &ProvisioningUnit,
        stack_name: &str,
    ) -> Result<StackOperationRunner<'a, E>, RunError<E::Error>> {
        StackOperationRunner::create_or_select(&self.engine, unit, stack_name, self.sink.as_ref())
            .await
            .map_err(stack_failure(unit, Operation::Select))
    }

    async fn select<'a>(
        &'a self,
        unit: &ProvisioningUnit,
        stack_name: &str,
    ) -> Result<StackOperationRunner<'a, E>, RunError<E::Error>> {
        StackOperationRunner::select(&self.engine, unit, stack_name, self.sink.as_ref())
            .await
            .map_err(stack_failure(unit, Operation::Select))
    }

    /// Reuses the network stack selected earlier in the run.
    async fn network_stack<'a>(
        &'a self,
        state: &mut RunState<'a, E>,
        stack_name: &str,
    ) -> Result<StackOperationRunner<'a, E>, RunError<E::Error>> {
        match state.network.take() {
            Some(stack) => Ok(stack),
            None => self.select(&self.units.network, stack_name).await,
        }
    }
}

/// Writes the rationale banner for `preview` and returns its error.
///
/// Callers can refuse `preview` this way before any configuration or
/// collaborator exists.
pub fn refuse_preview<Err>(sink: &dyn OutputSink) -> CoordinatorError<Err>
where
    Err: std::error::Error + 'static,
{
    banner(sink, &PREVIEW_UNSUPPORTED);
    CoordinatorError::Run(RunError::PreviewUnsupported)
}

fn transition(state: CoordinatorState) {
    info!(%state, "coordinator state changed");
}

fn stack_failure<Err>(
    unit: &ProvisioningUnit,
    operation: Operation,
) -> impl FnOnce(Err) -> RunError<Err> + '_
where
    Err: std::error::Error + 'static,
{
    move |source| RunError::Stack {
        unit: unit.name.clone(),
        operation,
        source,
    }
}

fn network_config(request: &RunRequest) -> ConfigMap {
    let mut config = ConfigMap::new();
    if let Some(key) = &request.public_key {
        config.insert(PUBLIC_KEY_CONFIG.to_owned(), ConfigValue::plain(key.clone()));
    }
    config
}

fn database_config<Err>(
    network: &ProvisioningUnit,
    outputs: &StackOutputs,
) -> Result<ConfigMap, RunError<Err>>
where
    Err: std::error::Error + 'static,
{
    let required = |name: &'static str| {
        outputs.get_str(name).ok_or_else(|| RunError::MissingOutput {
            unit: network.name.clone(),
            name,
        })
    };

    let mut config = ConfigMap::new();
    config.insert(
        String::from("postgresql:host"),
        ConfigValue::plain("localhost"),
    );
    config.insert(
        String::from("postgresql:username"),
        ConfigValue::plain(required(DB_USERNAME_OUTPUT)?),
    );
    config.insert(
        String::from("postgresql:password"),
        ConfigValue::secret(required(DB_PASSWORD_OUTPUT)?),
    );
    Ok(config)
}
