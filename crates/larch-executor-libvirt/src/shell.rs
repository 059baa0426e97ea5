//! Remote shell collaborator: OpenSSH driven as a subprocess.
//!
//! One fixed identity key and one fixed guest account, both
//! configurable. The default host-key policy disables verification: the
//! guest is a single-use VM that did not exist a minute ago and will be
//! destroyed after the job, so there is no prior key to verify against.
//! That trust decision only holds on an isolated virtualization network;
//! `accept-new` or `strict` are available where it does not.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use clap::ValueEnum;
use snafu::ResultExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{self, Result};

/// `ssh` exits with 255 when the transport or authentication itself
/// failed; any other status came from the remote command.
const SSH_TRANSPORT_FAILURE: i32 = 255;

/// Host key verification policy for guest sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HostKeyPolicy {
    /// No verification; known-hosts writes go to /dev/null. Only suitable
    /// for ephemeral single-use guests on an isolated network.
    Off,
    /// Trust the key on first connection, verify afterwards.
    AcceptNew,
    /// Full verification against the user's known-hosts file.
    Strict,
}

impl HostKeyPolicy {
    fn ssh_options(&self) -> &'static [&'static str] {
        match self {
            HostKeyPolicy::Off => &[
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "UserKnownHostsFile=/dev/null",
            ],
            HostKeyPolicy::AcceptNew => &["-o", "StrictHostKeyChecking=accept-new"],
            HostKeyPolicy::Strict => &["-o", "StrictHostKeyChecking=yes"],
        }
    }
}

/// Connection settings for the guest shell.
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Private key on the host used to authenticate.
    pub key_path: PathBuf,
    /// Unprivileged build account on the guest.
    pub user: String,
    /// Host key verification policy.
    pub host_key_policy: HostKeyPolicy,
    /// Per-connection timeout (`ConnectTimeout`).
    pub connect_timeout: Duration,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            key_path: PathBuf::from("/home/gitlab-runner/.ssh/id_ed25519"),
            user: "gitlab-runner".to_string(),
            host_key_policy: HostKeyPolicy::Off,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// The guest shell as the lifecycle controller sees it.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Non-interactive authentication probe against `addr`.
    async fn probe(&self, addr: &str) -> bool;

    /// Stream the local `script` file as stdin to the account's default
    /// shell on `addr`, propagating the remote exit status.
    async fn run_script(&self, addr: &str, script: &Path) -> Result<()>;
}

/// [`RemoteShell`] backed by the OpenSSH client.
#[derive(Debug, Clone)]
pub struct OpenSsh {
    options: SshOptions,
}

impl OpenSsh {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    /// Arguments up to and including the destination, shared by the
    /// probe and the script session.
    fn ssh_args(&self, addr: &str) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            self.options.key_path.display().to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.options.connect_timeout.as_secs()),
        ];
        args.extend(
            self.options
                .host_key_policy
                .ssh_options()
                .iter()
                .map(|s| s.to_string()),
        );
        args.push(format!("{}@{}", self.options.user, addr));
        args
    }
}

#[async_trait]
impl RemoteShell for OpenSsh {
    async fn probe(&self, addr: &str) -> bool {
        let status = Command::new("ssh")
            .args(self.ssh_args(addr))
            .arg("true")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) => status.success(),
            Err(error) => {
                debug!(%addr, %error, "ssh probe could not spawn");
                false
            }
        }
    }

    async fn run_script(&self, addr: &str, script: &Path) -> Result<()> {
        let script_file = std::fs::File::open(script)
            .context(error::ScriptUnreadableSnafu { path: script })?;

        info!(%addr, script = %script.display(), "streaming build script to guest shell");

        // No remote command: sshd hands stdin to the account's default
        // shell. Remote stdout/stderr are the job log and pass through.
        let status = Command::new("ssh")
            .args(self.ssh_args(addr))
            .stdin(Stdio::from(script_file))
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .context(error::ToolSpawnSnafu { tool: "ssh" })?;

        match status.code() {
            Some(0) => Ok(()),
            Some(SSH_TRANSPORT_FAILURE) | None => error::SessionFailedSnafu { addr }.fail(),
            Some(status) => error::ScriptFailedSnafu { status }.fail(),
        }
    }
}
