//! Error types for the libvirt executor driver.

use std::path::PathBuf;

use larch_executor_core::{FailureKind, PollError};
use snafu::Snafu;

/// Errors from driver operations.
///
/// Every variant maps to a [`FailureKind`] via
/// [`classification`](ExecutorError::classification); the binary turns
/// that into the process exit code the runner interprets.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ExecutorError {
    /// Required job context is missing from the environment.
    #[snafu(display("missing job context: {var} is not set"))]
    MissingJobContext { var: String },

    /// An external tool could not be spawned at all.
    #[snafu(display("failed to run {tool}: {source}"))]
    ToolSpawn { tool: String, source: std::io::Error },

    /// The images directory could not be created.
    #[snafu(display("failed to create images directory {}: {source}", path.display()))]
    CreateImagesRoot { path: PathBuf, source: std::io::Error },

    /// qemu-img could not snapshot the base image into an overlay.
    #[snafu(display("failed to create overlay disk {}: {stderr}", disk.display()))]
    CreateOverlay { disk: PathBuf, stderr: String },

    /// virt-install could not define and boot the domain.
    #[snafu(display("failed to install VM {vm_id}: {stderr}"))]
    InstallVm { vm_id: String, stderr: String },

    /// DHCP never assigned the guest an address within the poll budget.
    #[snafu(display("no network address reported for VM {vm_id}: {source}"))]
    NetworkTimeout { vm_id: String, source: PollError },

    /// sshd never accepted the probe within the poll budget.
    #[snafu(display("shell on VM {vm_id} ({addr}) never became reachable: {source}"))]
    ShellTimeout {
        vm_id: String,
        addr: String,
        source: PollError,
    },

    /// The build script file could not be opened on the host.
    #[snafu(display("cannot read build script {}: {source}", path.display()))]
    ScriptUnreadable { path: PathBuf, source: std::io::Error },

    /// The SSH session failed before the script's exit status was known.
    #[snafu(display("ssh session to {addr} failed before the build script completed"))]
    SessionFailed { addr: String },

    /// The build script itself exited non-zero.
    #[snafu(display("build script exited with status {status}"))]
    ScriptFailed { status: i32 },

    /// virsh could not stop a still-present domain.
    #[snafu(display("failed to destroy VM {vm_id}: {stderr}"))]
    DestroyVm { vm_id: String, stderr: String },

    /// virsh could not remove the definition of a still-present domain.
    #[snafu(display("failed to undefine VM {vm_id}: {stderr}"))]
    UndefineVm { vm_id: String, stderr: String },

    /// The overlay disk exists but could not be deleted.
    #[snafu(display("failed to remove disk image {}: {source}", path.display()))]
    RemoveDisk { path: PathBuf, source: std::io::Error },

    /// The config stage could not serialize its output.
    #[snafu(display("failed to encode config output: {source}"))]
    EncodeConfig { source: serde_json::Error },

    /// A termination signal arrived before the verb completed.
    #[snafu(display("interrupted before the operation completed"))]
    Interrupted,
}

impl ExecutorError {
    /// Severity of this failure as the runner should interpret it.
    ///
    /// Anything unclassified defaults to infrastructure: failing toward
    /// "retry on fresh infrastructure" is safe, failing toward "job is
    /// broken" is not.
    pub fn classification(&self) -> FailureKind {
        match self {
            Self::MissingJobContext { .. } => FailureKind::Usage,
            Self::ScriptFailed { .. } => FailureKind::Job,
            _ => FailureKind::Infrastructure,
        }
    }
}

/// Result type for driver operations.
pub type Result<T, E = ExecutorError> = std::result::Result<T, E>;
