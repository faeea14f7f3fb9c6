//! Errors surfaced by coordinator runs.

use thiserror::Error;

use crate::installer::InstallError;
use crate::stack::Operation;
use crate::tunnel::TunnelError;

/// Failure of the planned steps themselves.
#[derive(Debug, Error)]
pub enum RunError<EngineError>
where
    EngineError: std::error::Error + 'static,
{
    /// Raised for `preview`, which cannot succeed before the bastion exists.
    #[error("preview is not implemented: the bastion host does not exist before the first up")]
    PreviewUnsupported,
    /// Raised when installing unit dependencies fails.
    #[error("dependency installation failed: {0}")]
    Install(#[from] InstallError),
    /// Raised when the engine fails an operation on a unit's stack.
    #[error("{operation} failed on the {unit} stack: {source}")]
    Stack {
        /// Unit whose stack failed.
        unit: String,
        /// Operation that failed.
        operation: Operation,
        /// Engine error.
        #[source]
        source: EngineError,
    },
    /// Raised when a stack lacks an output a later step depends on.
    #[error("the {unit} stack does not export {name}")]
    MissingOutput {
        /// Unit expected to export the output.
        unit: String,
        /// Missing output name.
        name: &'static str,
    },
    /// Raised when the tunnel cannot be opened.
    #[error("failed to open tunnel: {0}")]
    Tunnel(#[source] TunnelError),
    /// Raised when a shutdown signal arrives before the plan completes.
    #[error("run interrupted")]
    Interrupted,
}

/// Outcome of a failed coordinator run, including tunnel teardown.
#[derive(Debug, Error)]
pub enum CoordinatorError<EngineError>
where
    EngineError: std::error::Error + 'static,
{
    /// Raised when a step fails and teardown succeeds.
    #[error(transparent)]
    Run(#[from] RunError<EngineError>),
    /// Raised when teardown fails after every step succeeded.
    #[error("tunnel teardown failed: {0}")]
    Teardown(#[source] TunnelError),
    /// Raised when a step fails and teardown fails too.
    #[error("{primary} (tunnel teardown also failed: {teardown})")]
    TeardownAfterFailure {
        /// Error raised by the failed step.
        #[source]
        primary: RunError<EngineError>,
        /// Error raised while stopping the tunnel.
        teardown: TunnelError,
    },
}

impl<EngineError> CoordinatorError<EngineError>
where
    EngineError: std::error::Error + 'static,
{
    /// Error raised by the failed step, if a step failed.
    #[must_use]
    pub const fn primary(&self) -> Option<&RunError<EngineError>> {
        match self {
            Self::Run(primary) | Self::TeardownAfterFailure { primary, .. } => Some(primary),
            Self::Teardown(_) => None,
        }
    }

    /// Returns `true` when the run stopped because of a shutdown signal.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self.primary(), Some(RunError::Interrupted))
    }
}
