//! VM manager collaborator: libvirt driven over its CLI tools.
//!
//! The executor never links against libvirt; it shells out to `qemu-img`,
//! `virt-install`, and `virsh` the same way an operator would, capturing
//! stderr for error context. The [`VmManager`] trait is the seam that
//! lets the lifecycle controller run against in-memory stubs in tests.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use snafu::{ensure, ResultExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{self, Result};

/// Options for provisioning the job VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOptions {
    /// Read-only template disk backing the per-job overlay.
    pub base_image: PathBuf,
    /// Number of virtual CPUs.
    pub vcpu_count: u32,
    /// Guest RAM in MiB.
    pub ram_mb: u32,
    /// Libvirt network the guest attaches to.
    pub network_label: String,
    /// Value passed to `virt-install --os-variant`.
    pub os_variant: String,
}

/// The virtualization substrate as the lifecycle controller sees it.
#[async_trait]
pub trait VmManager: Send + Sync {
    /// Snapshot `base_image` into a copy-on-write overlay at `disk`.
    async fn create_overlay(&self, base_image: &Path, disk: &Path) -> Result<()>;

    /// Define and boot a headless VM named `vm_id` from `disk`.
    ///
    /// Must return once the domain is started; never blocks on a console
    /// or further input.
    async fn install(&self, vm_id: &str, disk: &Path, options: &CreateOptions) -> Result<()>;

    /// Current IPv4 address of the domain, if DHCP has assigned one.
    ///
    /// Any CIDR suffix is stripped. `None` means "not ready yet"; the
    /// caller polls, and a persistently failing query surfaces as a
    /// bounded readiness timeout rather than an immediate error.
    async fn domain_address(&self, vm_id: &str) -> Option<String>;

    /// Force the domain off. An absent or already-stopped domain is
    /// success, so teardown stays idempotent.
    async fn destroy(&self, vm_id: &str) -> Result<()>;

    /// Remove the domain definition. An absent domain is success.
    async fn undefine(&self, vm_id: &str) -> Result<()>;
}

/// [`VmManager`] backed by the libvirt CLI tools.
#[derive(Debug, Clone)]
pub struct LibvirtManager {
    qemu_img: PathBuf,
    virt_install: PathBuf,
    virsh: PathBuf,
}

impl Default for LibvirtManager {
    fn default() -> Self {
        Self {
            qemu_img: PathBuf::from("qemu-img"),
            virt_install: PathBuf::from("virt-install"),
            virsh: PathBuf::from("virsh"),
        }
    }
}

impl LibvirtManager {
    async fn virsh_output(&self, args: &[&str]) -> Result<std::process::Output> {
        Command::new(&self.virsh)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .context(error::ToolSpawnSnafu { tool: "virsh" })
    }
}

#[async_trait]
impl VmManager for LibvirtManager {
    async fn create_overlay(&self, base_image: &Path, disk: &Path) -> Result<()> {
        if let Some(parent) = disk.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context(error::CreateImagesRootSnafu { path: parent })?;
        }

        let output = Command::new(&self.qemu_img)
            .arg("create")
            .arg("-f")
            .arg("qcow2")
            .arg("-b")
            .arg(base_image)
            .arg("-F")
            .arg("qcow2")
            .arg(disk)
            .stdin(Stdio::null())
            .output()
            .await
            .context(error::ToolSpawnSnafu { tool: "qemu-img" })?;

        ensure!(
            output.status.success(),
            error::CreateOverlaySnafu {
                disk,
                stderr: stderr_excerpt(&output.stderr),
            }
        );

        info!(
            base = %base_image.display(),
            disk = %disk.display(),
            "overlay disk created"
        );
        Ok(())
    }

    async fn install(&self, vm_id: &str, disk: &Path, options: &CreateOptions) -> Result<()> {
        let output = Command::new(&self.virt_install)
            .arg("--name")
            .arg(vm_id)
            .arg("--os-variant")
            .arg(&options.os_variant)
            .arg("--disk")
            .arg(disk)
            .arg("--import")
            .arg("--vcpus")
            .arg(options.vcpu_count.to_string())
            .arg("--memory")
            .arg(options.ram_mb.to_string())
            .arg("--network")
            .arg(format!("network={}", options.network_label))
            .arg("--graphics")
            .arg("none")
            .arg("--noautoconsole")
            .stdin(Stdio::null())
            .output()
            .await
            .context(error::ToolSpawnSnafu {
                tool: "virt-install",
            })?;

        ensure!(
            output.status.success(),
            error::InstallVmSnafu {
                vm_id,
                stderr: stderr_excerpt(&output.stderr),
            }
        );

        info!(
            %vm_id,
            vcpus = options.vcpu_count,
            ram_mb = options.ram_mb,
            network = %options.network_label,
            "domain defined and started"
        );
        Ok(())
    }

    async fn domain_address(&self, vm_id: &str) -> Option<String> {
        let output = match self.virsh_output(&["domifaddr", vm_id]).await {
            Ok(output) => output,
            Err(error) => {
                warn!(%vm_id, %error, "virsh not runnable, treating address as pending");
                return None;
            }
        };

        if !output.status.success() {
            debug!(
                %vm_id,
                stderr = %stderr_excerpt(&output.stderr),
                "domifaddr query failed, treating address as pending"
            );
            return None;
        }

        parse_domifaddr(&String::from_utf8_lossy(&output.stdout))
    }

    async fn destroy(&self, vm_id: &str) -> Result<()> {
        let output = self.virsh_output(&["destroy", vm_id]).await?;
        if output.status.success() {
            info!(%vm_id, "domain destroyed");
            return Ok(());
        }

        let stderr = stderr_excerpt(&output.stderr);
        if domain_absent(&stderr) || stderr.contains("domain is not running") {
            debug!(%vm_id, "domain already stopped or absent");
            return Ok(());
        }

        error::DestroyVmSnafu { vm_id, stderr }.fail()
    }

    async fn undefine(&self, vm_id: &str) -> Result<()> {
        let output = self.virsh_output(&["undefine", vm_id]).await?;
        if output.status.success() {
            info!(%vm_id, "domain undefined");
            return Ok(());
        }

        let stderr = stderr_excerpt(&output.stderr);
        if domain_absent(&stderr) {
            debug!(%vm_id, "domain definition already absent");
            return Ok(());
        }

        error::UndefineVmSnafu { vm_id, stderr }.fail()
    }
}

/// First IPv4 address in `virsh domifaddr` output, CIDR suffix stripped.
///
/// ```text
///  Name       MAC address          Protocol     Address
/// -------------------------------------------------------------------
///  vnet0      52:54:00:8c:d5:11    ipv4         192.168.122.41/24
/// ```
fn parse_domifaddr(stdout: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let _interface = fields.next()?;
        let _mac = fields.next()?;
        let protocol = fields.next()?;
        let address = fields.next()?;
        (protocol == "ipv4").then(|| match address.split_once('/') {
            Some((ip, _prefix)) => ip.to_string(),
            None => address.to_string(),
        })
    })
}

/// virsh reports a missing domain with slightly different wording across
/// versions; both spellings mean the teardown already happened.
fn domain_absent(stderr: &str) -> bool {
    stderr.contains("failed to get domain") || stderr.contains("Domain not found")
}

fn stderr_excerpt(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr).trim().to_string()
}
