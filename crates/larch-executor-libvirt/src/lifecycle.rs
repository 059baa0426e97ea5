//! The three lifecycle verbs.
//!
//! Each verb runs as its own process; the controller holds nothing but
//! the derived identity, the two collaborators, and the poll budgets.
//! State transitions per job, across invocations:
//!
//! ```text
//! absent --create--> installing --> network-ready --> shell-ready
//!        --run-----> job-executing --> shell-ready
//!        --cleanup-> destroyed
//! ```
//!
//! A failed `create` performs no rollback: the orchestrator invokes
//! `cleanup` as a separate step regardless of earlier outcomes, and
//! teardown is idempotent.

use std::path::Path;

use larch_executor_core::{poll_until, PollPolicy, VmIdentity};
use snafu::ResultExt;
use tracing::{debug, info};

use crate::error::{self, Result};
use crate::manager::{CreateOptions, VmManager};
use crate::sections;
use crate::shell::RemoteShell;

/// Sequences the VM manager, the readiness polls, and the remote shell
/// for one job's VM.
pub struct Executor<M, S> {
    identity: VmIdentity,
    manager: M,
    shell: S,
    network_poll: PollPolicy,
    shell_poll: PollPolicy,
}

impl<M: VmManager, S: RemoteShell> Executor<M, S> {
    pub fn new(
        identity: VmIdentity,
        manager: M,
        shell: S,
        network_poll: PollPolicy,
        shell_poll: PollPolicy,
    ) -> Self {
        Self {
            identity,
            manager,
            shell,
            network_poll,
            shell_poll,
        }
    }

    pub fn identity(&self) -> &VmIdentity {
        &self.identity
    }

    /// Provision the job VM and wait until it accepts SSH.
    pub async fn create(&self, options: &CreateOptions) -> Result<()> {
        let vm_id = &self.identity.vm_id;
        info!(
            %vm_id,
            base_image = %options.base_image.display(),
            "provisioning job VM"
        );

        sections::start("vm_install", &format!("Provisioning VM {vm_id}"));
        let provisioned = self.provision(options).await;
        sections::end("vm_install");
        provisioned?;

        sections::start("vm_ready", &format!("Waiting for VM {vm_id} to accept SSH"));
        let ready = self.await_readiness().await;
        sections::end("vm_ready");
        ready?;

        info!(%vm_id, "job VM is ready");
        Ok(())
    }

    /// Execute a local build script inside the job VM.
    pub async fn run(&self, script: &Path) -> Result<()> {
        // Independent process: the address is re-resolved, never cached
        // from `create`.
        let address = self.wait_for_address().await?;

        sections::start("build_script", "Executing build script");
        let outcome = self.shell.run_script(&address, script).await;
        sections::end("build_script");
        outcome
    }

    /// Tear down the job VM and its overlay disk. Idempotent: running it
    /// against an already-reclaimed job succeeds.
    pub async fn cleanup(&self) -> Result<()> {
        let vm_id = &self.identity.vm_id;
        let disk = &self.identity.disk_image_path;
        info!(%vm_id, "tearing down job VM");

        self.manager.destroy(vm_id).await?;
        self.manager.undefine(vm_id).await?;

        match tokio::fs::remove_file(disk).await {
            Ok(()) => info!(disk = %disk.display(), "overlay disk removed"),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(disk = %disk.display(), "overlay disk already absent");
            }
            Err(source) => {
                return Err(source).context(error::RemoveDiskSnafu { path: disk });
            }
        }

        info!(%vm_id, "teardown complete");
        Ok(())
    }

    async fn provision(&self, options: &CreateOptions) -> Result<()> {
        self.manager
            .create_overlay(&options.base_image, &self.identity.disk_image_path)
            .await?;
        self.manager
            .install(&self.identity.vm_id, &self.identity.disk_image_path, options)
            .await
    }

    /// Network address first, shell second: the probe needs the address.
    async fn await_readiness(&self) -> Result<()> {
        let address = self.wait_for_address().await?;
        self.wait_for_shell(&address).await
    }

    async fn wait_for_address(&self) -> Result<String> {
        let vm_id = &self.identity.vm_id;

        let address = poll_until(&self.network_poll, |attempt| async move {
            let address = self.manager.domain_address(vm_id).await;
            if address.is_none() {
                debug!(%vm_id, attempt, "no network address yet");
            }
            address
        })
        .await
        .context(error::NetworkTimeoutSnafu {
            vm_id: vm_id.clone(),
        })?;

        info!(%vm_id, %address, "guest network address acquired");
        Ok(address)
    }

    async fn wait_for_shell(&self, address: &str) -> Result<()> {
        let vm_id = &self.identity.vm_id;

        poll_until(&self.shell_poll, |attempt| async move {
            if self.shell.probe(address).await {
                Some(())
            } else {
                debug!(%vm_id, %address, attempt, "guest shell not reachable yet");
                None
            }
        })
        .await
        .context(error::ShellTimeoutSnafu {
            vm_id: vm_id.clone(),
            addr: address,
        })?;

        info!(%vm_id, %address, "guest shell is reachable");
        Ok(())
    }
}
