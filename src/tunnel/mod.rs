//! Local port forwarding to private endpoints through a bastion host.
//!
//! A tunnel is an owned handle: [`TunnelManager::start`] hands it to the
//! caller and [`TunnelManager::stop`] consumes it, so a started tunnel can be
//! terminated at most once. Both operations accept the "no tunnel" case so
//! callers can release whatever they captured without branching.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

mod ssh;

pub use ssh::{POSTGRES_PORT, SshTunnel, SshTunnelManager, forward_args};

/// Errors raised while opening or closing a tunnel.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TunnelError {
    /// Raised when a bastion host is known but the private target is not.
    #[error("bastion host {bastion_host} is set but no target host was provided")]
    MissingTarget {
        /// Bastion host the tunnel would have used.
        bastion_host: String,
    },
    /// Raised when the SSH client cannot be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// SSH client that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when terminating the SSH client fails.
    #[error("failed to stop tunnel process {pid}: {message}")]
    Stop {
        /// Process identifier of the tunnel, `0` when unknown.
        pid: u32,
        /// Operating system error string.
        message: String,
    },
}

/// Future returned by tunnel teardown.
pub type TunnelFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TunnelError>> + Send + 'a>>;

/// Opens and closes tunnels for the coordinator.
pub trait TunnelManager: Send + Sync {
    /// Handle representing a running tunnel.
    type Tunnel: Send;

    /// Starts forwarding to `target_host` through `bastion_host`.
    ///
    /// Returns `Ok(None)` without spawning anything when `bastion_host` is
    /// absent or empty, which is the case before the bastion exists.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError`] when the tunnel process cannot be started.
    fn start(
        &self,
        bastion_host: Option<&str>,
        target_host: Option<&str>,
    ) -> Result<Option<Self::Tunnel>, TunnelError>;

    /// Terminates `tunnel`; `None` is a no-op that never fails.
    fn stop(&self, tunnel: Option<Self::Tunnel>) -> TunnelFuture<'_, ()>;
}
