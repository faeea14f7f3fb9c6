//! Test support utilities shared across unit and integration tests.

use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde_json::Value;
use thiserror::Error;

use crate::coordinator::{
    BASTION_HOST_OUTPUT, DB_HOST_OUTPUT, DB_PASSWORD_OUTPUT, DB_USERNAME_OUTPUT,
    ProvisioningCoordinator, Units,
};
use crate::engine::{
    ConfigMap, Engine, EngineFuture, OutputValue, ProvisioningUnit, StackOutputs, StackRef,
};
use crate::installer::DependencyInstaller;
use crate::output::{OutputSink, SharedSink};
use crate::runner::{CommandOutput, CommandRunner, Invocation, RunnerError, RunnerFuture};
use crate::stack::Operation;
use crate::tunnel::{TunnelError, TunnelFuture, TunnelManager};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
/// Streaming runs replay the scripted stdout to the sink line by line.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<Invocation>>>,
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        lock(&self.invocations).clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }

    fn next(&self, invocation: &Invocation) -> Result<CommandOutput, RunnerError> {
        lock(&self.invocations).push(invocation.clone());
        lock(&self.responses)
            .pop_front()
            .ok_or_else(|| RunnerError::Spawn {
                program: invocation.program.clone(),
                message: String::from("no scripted response available"),
            })
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(&'a self, invocation: &'a Invocation) -> RunnerFuture<'a, CommandOutput> {
        Box::pin(async move { self.next(invocation) })
    }

    fn run_streaming<'a>(
        &'a self,
        invocation: &'a Invocation,
        sink: &'a dyn OutputSink,
    ) -> RunnerFuture<'a, CommandOutput> {
        Box::pin(async move {
            let output = self.next(invocation)?;
            for line in output.stdout.lines() {
                sink.line(line);
            }
            Ok(output)
        })
    }
}

/// Sink that records every line it receives.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the recorded lines.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        lock(&self.lines).clone()
    }

    /// Returns `true` when any recorded line contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        lock(&self.lines).iter().any(|line| line.contains(needle))
    }
}

impl OutputSink for RecordingSink {
    fn line(&self, line: &str) {
        lock(&self.lines).push(line.to_owned());
    }
}

/// Something observed by the recording doubles, in call order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum JournalEntry {
    /// A stack was selected; `create` is set for create-or-select.
    Select {
        /// Unit name.
        unit: String,
        /// Stack name.
        stack: String,
        /// Whether creation was allowed.
        create: bool,
    },
    /// Configuration was written to a unit's stack.
    Configure {
        /// Unit name.
        unit: String,
        /// Configuration written.
        config: ConfigMap,
    },
    /// An engine operation started on a unit.
    Started {
        /// Unit name.
        unit: String,
        /// Operation that started.
        operation: Operation,
    },
    /// An engine operation settled on a unit.
    Finished {
        /// Unit name.
        unit: String,
        /// Operation that settled.
        operation: Operation,
        /// Whether it succeeded.
        ok: bool,
    },
    /// The tunnel manager was asked to start a tunnel.
    TunnelStart {
        /// Bastion host passed in.
        bastion: Option<String>,
        /// Target host passed in.
        target: Option<String>,
    },
    /// The tunnel manager was asked to stop; `open` is set when a handle was
    /// passed.
    TunnelStop {
        /// Whether a live tunnel handle was passed.
        open: bool,
    },
}

/// Shared, ordered record of calls made to the recording doubles.
#[derive(Clone, Debug, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl Journal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn push(&self, entry: JournalEntry) {
        lock(&self.entries).push(entry);
    }

    /// Returns a snapshot of every entry.
    #[must_use]
    pub fn entries(&self) -> Vec<JournalEntry> {
        lock(&self.entries).clone()
    }

    /// Index of the first entry matching `predicate`.
    #[must_use]
    pub fn position(&self, predicate: impl Fn(&JournalEntry) -> bool) -> Option<usize> {
        lock(&self.entries).iter().position(predicate)
    }

    /// Number of entries matching `predicate`.
    #[must_use]
    pub fn count(&self, predicate: impl Fn(&JournalEntry) -> bool) -> usize {
        lock(&self.entries).iter().filter(|entry| predicate(entry)).count()
    }

    /// Index of the `Started` entry for `operation` on `unit`.
    #[must_use]
    pub fn started(&self, unit: &str, operation: Operation) -> Option<usize> {
        self.position(|entry| {
            matches!(entry, JournalEntry::Started { unit: u, operation: op } if u == unit && *op == operation)
        })
    }

    /// Index of the `Finished` entry for `operation` on `unit`.
    #[must_use]
    pub fn finished(&self, unit: &str, operation: Operation) -> Option<usize> {
        self.position(|entry| {
            matches!(entry, JournalEntry::Finished { unit: u, operation: op, .. } if u == unit && *op == operation)
        })
    }

    /// Number of tunnel starts recorded.
    #[must_use]
    pub fn tunnel_starts(&self) -> usize {
        self.count(|entry| matches!(entry, JournalEntry::TunnelStart { .. }))
    }

    /// Number of tunnel stops recorded.
    #[must_use]
    pub fn tunnel_stops(&self) -> usize {
        self.count(|entry| matches!(entry, JournalEntry::TunnelStop { .. }))
    }

    /// Configuration last written to `unit`.
    #[must_use]
    pub fn config_for(&self, unit: &str) -> Option<ConfigMap> {
        lock(&self.entries).iter().rev().find_map(|entry| match entry {
            JournalEntry::Configure { unit: u, config } if u == unit => Some(config.clone()),
            _ => None,
        })
    }
}

/// Error returned by [`RecordingEngine`] when a failure was scripted.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("simulated {operation} failure on {unit}")]
pub struct SimulatedEngineError {
    /// Unit the failure was scripted for.
    pub unit: String,
    /// Operation that failed.
    pub operation: Operation,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Behaviour {
    Fail,
    Hang,
    Delay(Duration),
}

/// In-memory engine that journals every call.
///
/// Outputs registered with [`RecordingEngine::with_outputs`] are returned by
/// every operation on that unit. Failures and hangs can be scripted per unit
/// and operation.
#[derive(Clone, Debug, Default)]
pub struct RecordingEngine {
    journal: Journal,
    outputs: Arc<Mutex<BTreeMap<String, StackOutputs>>>,
    behaviours: Arc<Mutex<Vec<(String, Operation, Behaviour)>>>,
}

impl RecordingEngine {
    /// Creates an engine writing to `journal`.
    #[must_use]
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    /// Sets the string outputs returned for `unit`.
    #[must_use]
    pub fn with_outputs(self, unit: &str, values: &[(&str, &str)]) -> Self {
        let outputs: StackOutputs = values
            .iter()
            .map(|(name, value)| {
                (
                    *name,
                    OutputValue {
                        value: Value::String((*value).to_owned()),
                        secret: false,
                    },
                )
            })
            .collect();
        lock(&self.outputs).insert(unit.to_owned(), outputs);
        self
    }

    /// Makes `operation` on `unit` fail.
    #[must_use]
    pub fn failing(self, unit: &str, operation: Operation) -> Self {
        lock(&self.behaviours).push((unit.to_owned(), operation, Behaviour::Fail));
        self
    }

    /// Makes `operation` on `unit` never complete.
    #[must_use]
    pub fn hanging(self, unit: &str, operation: Operation) -> Self {
        lock(&self.behaviours).push((unit.to_owned(), operation, Behaviour::Hang));
        self
    }

    /// Makes `operation` on `unit` succeed only after `delay`.
    #[must_use]
    pub fn slow(self, unit: &str, operation: Operation, delay: Duration) -> Self {
        lock(&self.behaviours).push((unit.to_owned(), operation, Behaviour::Delay(delay)));
        self
    }

    fn behaviour(&self, unit: &str, operation: Operation) -> Option<Behaviour> {
        lock(&self.behaviours)
            .iter()
            .find(|(u, op, _)| u == unit && *op == operation)
            .map(|(_, _, behaviour)| *behaviour)
    }

    fn outputs_for(&self, unit: &str) -> StackOutputs {
        lock(&self.outputs).get(unit).cloned().unwrap_or_default()
    }

    async fn operate(
        &self,
        stack: &StackRef,
        operation: Operation,
        sink: Option<&dyn OutputSink>,
    ) -> Result<StackOutputs, SimulatedEngineError> {
        let unit = stack.unit.name.clone();
        self.journal.push(JournalEntry::Started {
            unit: unit.clone(),
            operation,
        });
        if let Some(progress) = sink {
            progress.line(&format!("{operation} {unit} ({})", stack.name));
        }
        let behaviour = self.behaviour(&unit, operation);
        match behaviour {
            Some(Behaviour::Hang) => std::future::pending::<()>().await,
            Some(Behaviour::Delay(delay)) => tokio::time::sleep(delay).await,
            Some(Behaviour::Fail) | None => {}
        }
        let ok = behaviour != Some(Behaviour::Fail);
        self.journal.push(JournalEntry::Finished {
            unit: unit.clone(),
            operation,
            ok,
        });
        if ok {
            Ok(self.outputs_for(&unit))
        } else {
            Err(SimulatedEngineError { unit, operation })
        }
    }

    fn select(
        &self,
        unit: &ProvisioningUnit,
        stack_name: &str,
        create: bool,
    ) -> Result<StackRef, SimulatedEngineError> {
        self.journal.push(JournalEntry::Select {
            unit: unit.name.clone(),
            stack: stack_name.to_owned(),
            create,
        });
        if self.behaviour(&unit.name, Operation::Select) == Some(Behaviour::Fail) {
            return Err(SimulatedEngineError {
                unit: unit.name.clone(),
                operation: Operation::Select,
            });
        }
        Ok(StackRef {
            unit: unit.clone(),
            name: stack_name.to_owned(),
        })
    }
}

impl Engine for RecordingEngine {
    type Error = SimulatedEngineError;

    fn create_or_select_stack<'a>(
        &'a self,
        unit: &'a ProvisioningUnit,
        stack_name: &'a str,
    ) -> EngineFuture<'a, StackRef, Self::Error> {
        Box::pin(async move { self.select(unit, stack_name, true) })
    }

    fn select_stack<'a>(
        &'a self,
        unit: &'a ProvisioningUnit,
        stack_name: &'a str,
    ) -> EngineFuture<'a, StackRef, Self::Error> {
        Box::pin(async move { self.select(unit, stack_name, false) })
    }

    fn set_all_config<'a>(
        &'a self,
        stack: &'a StackRef,
        config: &'a ConfigMap,
    ) -> EngineFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.journal.push(JournalEntry::Configure {
                unit: stack.unit.name.clone(),
                config: config.clone(),
            });
            if self.behaviour(&stack.unit.name, Operation::Configure) == Some(Behaviour::Fail) {
                return Err(SimulatedEngineError {
                    unit: stack.unit.name.clone(),
                    operation: Operation::Configure,
                });
            }
            Ok(())
        })
    }

    fn up<'a>(
        &'a self,
        stack: &'a StackRef,
        sink: &'a dyn OutputSink,
    ) -> EngineFuture<'a, StackOutputs, Self::Error> {
        Box::pin(self.operate(stack, Operation::Up, Some(sink)))
    }

    fn refresh<'a>(
        &'a self,
        stack: &'a StackRef,
        sink: &'a dyn OutputSink,
    ) -> EngineFuture<'a, StackOutputs, Self::Error> {
        Box::pin(self.operate(stack, Operation::Refresh, Some(sink)))
    }

    fn destroy<'a>(
        &'a self,
        stack: &'a StackRef,
        sink: &'a dyn OutputSink,
    ) -> EngineFuture<'a, StackOutputs, Self::Error> {
        Box::pin(self.operate(stack, Operation::Destroy, Some(sink)))
    }

    fn outputs<'a>(&'a self, stack: &'a StackRef) -> EngineFuture<'a, StackOutputs, Self::Error> {
        Box::pin(self.operate(stack, Operation::Outputs, None))
    }
}

/// Handle issued by [`RecordingTunnels`].
#[derive(Debug, Eq, PartialEq)]
pub struct RecordedTunnel {
    /// Bastion host the tunnel was opened through.
    pub bastion: String,
    /// Target host the tunnel forwards to.
    pub target: String,
}

/// Tunnel manager that journals calls instead of spawning `ssh`.
///
/// Mirrors the real manager's contract: an absent or empty bastion yields no
/// tunnel, and a bastion without a target is rejected.
#[derive(Clone, Debug, Default)]
pub struct RecordingTunnels {
    journal: Journal,
    fail_stop: bool,
}

impl RecordingTunnels {
    /// Creates a manager writing to `journal`.
    #[must_use]
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            fail_stop: false,
        }
    }

    /// Makes every stop of a live tunnel fail.
    #[must_use]
    pub const fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }
}

impl TunnelManager for RecordingTunnels {
    type Tunnel = RecordedTunnel;

    fn start(
        &self,
        bastion_host: Option<&str>,
        target_host: Option<&str>,
    ) -> Result<Option<RecordedTunnel>, TunnelError> {
        self.journal.push(JournalEntry::TunnelStart {
            bastion: bastion_host.map(str::to_owned),
            target: target_host.map(str::to_owned),
        });
        let Some(bastion) = bastion_host.filter(|host| !host.is_empty()) else {
            return Ok(None);
        };
        let Some(target) = target_host.filter(|host| !host.is_empty()) else {
            return Err(TunnelError::MissingTarget {
                bastion_host: bastion.to_owned(),
            });
        };
        Ok(Some(RecordedTunnel {
            bastion: bastion.to_owned(),
            target: target.to_owned(),
        }))
    }

    fn stop(&self, tunnel: Option<RecordedTunnel>) -> TunnelFuture<'_, ()> {
        Box::pin(async move {
            let open = tunnel.is_some();
            self.journal.push(JournalEntry::TunnelStop { open });
            if open && self.fail_stop {
                return Err(TunnelError::Stop {
                    pid: 0,
                    message: String::from("simulated stop failure"),
                });
            }
            Ok(())
        })
    }
}

/// Unit name used for the network unit in [`Harness`] layouts.
pub const NETWORK_UNIT: &str = "network";
/// Unit name used for the database unit in [`Harness`] layouts.
pub const DATABASE_UNIT: &str = "database";

/// Outputs the network unit exports after a successful `up`.
pub const NETWORK_OUTPUTS: [(&str, &str); 4] = [
    (BASTION_HOST_OUTPUT, "1.2.3.4"),
    (DB_HOST_OUTPUT, "10.0.0.5"),
    (DB_USERNAME_OUTPUT, "u"),
    (DB_PASSWORD_OUTPUT, "p"),
];

/// Coordinator wired entirely to recording doubles.
pub type RecordingCoordinator =
    ProvisioningCoordinator<RecordingEngine, RecordingTunnels, ScriptedRunner>;

/// Recording doubles sharing one journal, plus unit directories on disk.
///
/// The unit directories live under a caller-owned root; pass the guard that
/// owns that root (a temporary directory, say) to [`Harness::holding`] so it
/// lives as long as the harness.
pub struct Harness {
    /// Journal shared by the engine and tunnel doubles.
    pub journal: Journal,
    /// Runner used by the dependency installer.
    pub runner: ScriptedRunner,
    /// Sink receiving banners and engine progress.
    pub sink: RecordingSink,
    /// Units rooted under the harness directory.
    pub units: Units,
    _guard: Option<Box<dyn Any + Send>>,
}

impl Harness {
    /// Lays out `vpc/` and `database/` under `root` with dependencies
    /// already installed, so the installer runs nothing.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while creating the directories.
    pub fn installed(root: &Utf8Path) -> io::Result<Self> {
        Self::layout(root, Some("node_modules"))
    }

    /// Lays out `vpc/` and `database/` under `root` without dependencies, so
    /// the installer runs in both.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while creating the directories.
    pub fn fresh(root: &Utf8Path) -> io::Result<Self> {
        Self::layout(root, None)
    }

    fn layout(root: &Utf8Path, marker: Option<&str>) -> io::Result<Self> {
        let network = root.join("vpc");
        let database = root.join("database");
        for dir in [&network, &database] {
            let target = marker.map_or_else(|| dir.clone(), |name| dir.join(name));
            Dir::create_ambient_dir_all(&target, ambient_authority())?;
        }
        Ok(Self {
            journal: Journal::new(),
            runner: ScriptedRunner::new(),
            sink: RecordingSink::new(),
            units: Units {
                network: ProvisioningUnit::new(NETWORK_UNIT, network),
                database: ProvisioningUnit::new(DATABASE_UNIT, database),
            },
            _guard: None,
        })
    }

    /// Keeps `guard` alive until the harness is dropped.
    #[must_use]
    pub fn holding(self, guard: impl Any + Send) -> Self {
        Self {
            _guard: Some(Box::new(guard)),
            ..self
        }
    }

    /// Engine journaling to the shared journal, exporting [`NETWORK_OUTPUTS`].
    #[must_use]
    pub fn engine(&self) -> RecordingEngine {
        RecordingEngine::new(self.journal.clone()).with_outputs(NETWORK_UNIT, &NETWORK_OUTPUTS)
    }

    /// Tunnel manager journaling to the shared journal.
    #[must_use]
    pub fn tunnels(&self) -> RecordingTunnels {
        RecordingTunnels::new(self.journal.clone())
    }

    /// Coordinator over `engine`, `tunnels`, and the harness runner and sink.
    #[must_use]
    pub fn coordinator(
        &self,
        engine: RecordingEngine,
        tunnels: RecordingTunnels,
    ) -> RecordingCoordinator {
        let sink: SharedSink = Arc::new(self.sink.clone());
        let installer = DependencyInstaller::new(
            "npm",
            "node_modules",
            self.runner.clone(),
            Arc::clone(&sink),
        );
        ProvisioningCoordinator::new(engine, tunnels, installer, self.units.clone(), sink)
    }
}
