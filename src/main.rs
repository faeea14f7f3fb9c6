//! Binary entry point for the stackhop CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use clap::Parser;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use stackhop::output::stdout_sink;
use stackhop::{
    Command, ConfigError, CoordinatorError, DependencyInstaller, Interrupt, ProcessCommandRunner,
    ProvisioningCoordinator, PulumiCli, PulumiError, RunRequest, SshTunnelManager,
    StackhopConfig, Units, UnsupportedCommand, refuse_preview,
};

mod cli;

use cli::Cli;

/// Conventional exit status for a process stopped by SIGINT.
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Error)]
enum CliError {
    #[error("command and stack name must be passed as arguments")]
    MissingArguments,
    #[error(transparent)]
    Unsupported(#[from] UnsupportedCommand),
    #[error("up requires a public key file argument")]
    MissingPublicKey,
    #[error("failed to read public key {path}: {message}")]
    PublicKey { path: String, message: String },
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Run(#[from] CoordinatorError<PulumiError>),
}

impl CliError {
    const fn exit_code(&self) -> i32 {
        match self {
            Self::Run(err) if err.is_interrupted() => EXIT_INTERRUPTED,
            _ => 1,
        }
    }

    /// Argument problems are usage output and go to stdout.
    const fn is_usage(&self) -> bool {
        matches!(self, Self::MissingArguments | Self::Unsupported(_))
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = i32::from(err.use_stderr());
            err.print().ok();
            process::exit(code);
        }
    };

    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            err.exit_code()
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let (Some(raw_command), Some(stack_name)) = (cli.command, cli.stack_name) else {
        return Err(CliError::MissingArguments);
    };
    let command: Command = raw_command.parse()?;

    let mut request = RunRequest::new(command, stack_name);
    if command == Command::Up {
        let path = cli.public_key_file.ok_or(CliError::MissingPublicKey)?;
        request = request.with_public_key(read_public_key(&path)?);
    }

    if command == Command::Preview {
        return Err(CliError::Run(refuse_preview(stdout_sink().as_ref())));
    }
    writeln!(
        io::stdout(),
        "Running [{command}] on stack [{}]",
        request.stack_name
    )
    .ok();

    let config = StackhopConfig::load_without_cli_args()?;
    config.validate()?;
    debug!(?config, "configuration loaded");

    let interrupt = Interrupt::new();
    let listener = interrupt.clone();
    tokio::spawn(async move { forward_ctrl_c(&listener).await });
    let runner = ProcessCommandRunner::new().with_interrupt(interrupt.clone());

    let sink = stdout_sink();
    let installer = DependencyInstaller::new(
        config.install_bin.as_str(),
        config.dependency_marker.as_str(),
        runner.clone(),
        sink.clone(),
    );
    let tunnels = SshTunnelManager::new(
        config.ssh_bin.as_str(),
        config.ssh_user.as_str(),
        sink.clone(),
    );
    let units = Units {
        network: config.network_unit(),
        database: config.database_unit(),
    };
    let coordinator = ProvisioningCoordinator::new(
        PulumiCli::new(config.pulumi_bin.as_str(), runner),
        tunnels,
        installer,
        units,
        sink,
    );

    coordinator.run_until(&request, interrupt.triggered()).await?;
    Ok(())
}

/// Triggers `interrupt` on Ctrl-C; does nothing when the handler cannot be
/// installed.
async fn forward_ctrl_c(interrupt: &Interrupt) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => interrupt.trigger(),
        Err(err) => debug!(error = %err, "failed to listen for ctrl-c"),
    }
}

fn read_public_key(path: &str) -> Result<String, CliError> {
    let failure = |message: String| CliError::PublicKey {
        path: path.to_owned(),
        message,
    };
    let key_path = Utf8Path::new(path);
    let file_name = key_path
        .file_name()
        .ok_or_else(|| failure(String::from("path has no file name")))?;
    let parent = key_path
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));

    let dir =
        Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| failure(err.to_string()))?;
    dir.read_to_string(file_name)
        .map_err(|err| failure(err.to_string()))
}

fn report_error(err: &CliError) {
    if err.is_usage() {
        writeln!(io::stdout(), "{err}").ok();
    } else {
        writeln!(io::stderr(), "stackhop: {err}").ok();
    }
}
