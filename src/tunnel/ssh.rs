//! Tunnels implemented with the system `ssh` client.

use std::ffi::OsString;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::{debug, info};

use super::{TunnelError, TunnelFuture, TunnelManager};
use crate::output::{SharedSink, banner};

/// Port forwarded locally and on the target; PostgreSQL is the only
/// supported protocol.
pub const POSTGRES_PORT: u16 = 5432;

/// Builds `-L <port>:<target>:<port> <user>@<bastion>`.
#[must_use]
pub fn forward_args(user: &str, bastion_host: &str, target_host: &str, port: u16) -> Vec<OsString> {
    vec![
        OsString::from("-L"),
        OsString::from(format!("{port}:{target_host}:{port}")),
        OsString::from(format!("{user}@{bastion_host}")),
    ]
}

/// A running `ssh -L` child process.
#[derive(Debug)]
pub struct SshTunnel {
    child: Child,
    bastion_host: String,
    target_host: String,
}

impl SshTunnel {
    /// Bastion host the tunnel goes through.
    #[must_use]
    pub fn bastion_host(&self) -> &str {
        &self.bastion_host
    }

    /// Private host the tunnel forwards to.
    #[must_use]
    pub fn target_host(&self) -> &str {
        &self.target_host
    }

    /// Process identifier, `None` once the child has been reaped.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}

/// Spawns `ssh` port forwards relying on an agent-loaded key and an already
/// trusted bastion host key.
pub struct SshTunnelManager {
    ssh_bin: String,
    user: String,
    sink: SharedSink,
}

impl SshTunnelManager {
    /// Creates a manager running `ssh_bin` as `user` on the bastion.
    #[must_use]
    pub fn new(ssh_bin: impl Into<String>, user: impl Into<String>, sink: SharedSink) -> Self {
        Self {
            ssh_bin: ssh_bin.into(),
            user: user.into(),
            sink,
        }
    }
}

impl TunnelManager for SshTunnelManager {
    type Tunnel = SshTunnel;

    fn start(
        &self,
        bastion_host: Option<&str>,
        target_host: Option<&str>,
    ) -> Result<Option<SshTunnel>, TunnelError> {
        let Some(bastion) = bastion_host.filter(|host| !host.trim().is_empty()) else {
            banner(
                self.sink.as_ref(),
                &["Bastion host is undefined. Skipping tunnel creation..."],
            );
            return Ok(None);
        };
        let Some(target) = target_host.filter(|host| !host.trim().is_empty()) else {
            return Err(TunnelError::MissingTarget {
                bastion_host: bastion.to_owned(),
            });
        };

        let message = format!(
            "Establishing tunnel through [{bastion}] to [{target}] on port [{POSTGRES_PORT}]..."
        );
        banner(self.sink.as_ref(), &[message.as_str()]);

        let args = forward_args(&self.user, bastion, target, POSTGRES_PORT);
        let mut command = Command::new(&self.ssh_bin);
        command
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        // A terminal Ctrl-C must not close the tunnel while the database
        // engine is still cancelling through it; `stop` owns its lifetime.
        #[cfg(unix)]
        command.process_group(0);
        let child = command
            .spawn()
            .map_err(|err| TunnelError::Spawn {
                program: self.ssh_bin.clone(),
                message: err.to_string(),
            })?;
        info!(pid = ?child.id(), bastion, target, "tunnel started");

        Ok(Some(SshTunnel {
            child,
            bastion_host: bastion.to_owned(),
            target_host: target.to_owned(),
        }))
    }

    fn stop(&self, tunnel: Option<SshTunnel>) -> TunnelFuture<'_, ()> {
        Box::pin(async move {
            let Some(mut active) = tunnel else {
                return Ok(());
            };

            banner(self.sink.as_ref(), &["Stopping tunnel..."]);
            let pid = active.pid().unwrap_or_default();
            active.child.kill().await.map_err(|err| TunnelError::Stop {
                pid,
                message: err.to_string(),
            })?;
            debug!(pid, "tunnel stopped");
            Ok(())
        })
    }
}
