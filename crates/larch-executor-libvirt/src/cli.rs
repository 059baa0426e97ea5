//! CLI argument parsing and option plumbing.
//!
//! Uses clap derive macros with environment fallbacks for everything the
//! runner passes via environment rather than argv. Job context and the
//! two failure exit codes follow the custom-executor convention
//! (`CUSTOM_ENV_*`, `*_FAILURE_EXIT_CODE`); driver-specific settings use
//! the `LARCH_*` namespace.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use larch_executor_core::{ExitCodes, JobContext, PollPolicy};

use crate::error::ExecutorError;
use crate::manager::CreateOptions;
use crate::shell::{HostKeyPolicy, SshOptions};

/// Ephemeral libvirt VM custom-executor driver.
///
/// The runner invokes one verb per process: `config` (optional),
/// `create`, `run`, then `cleanup`, and interprets the exit code:
/// 0 success, the configured system-failure code "retry on fresh
/// infrastructure", the configured build-failure code "job failed".
#[derive(Parser)]
#[command(name = "larch-executor-libvirt")]
#[command(version)]
#[command(about = "Runs one CI job inside a throwaway libvirt VM")]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub verb: Verb,
}

/// Options shared by every verb.
#[derive(Args, Clone)]
pub struct GlobalOptions {
    /// CI project name, part of the derived VM identity.
    #[arg(long, env = "CUSTOM_ENV_CI_PROJECT_NAME", global = true)]
    pub project_name: Option<String>,

    /// CI job id, part of the derived VM identity.
    #[arg(long, env = "CUSTOM_ENV_CI_JOB_ID", global = true)]
    pub job_id: Option<String>,

    /// Directory where per-job overlay disks are created.
    #[arg(
        long,
        env = "LARCH_IMAGES_ROOT",
        default_value = "/var/lib/libvirt/images/runner",
        global = true
    )]
    pub images_root: PathBuf,

    /// Private key used to reach the guest.
    #[arg(
        long,
        env = "LARCH_SSH_KEY",
        default_value = "/home/gitlab-runner/.ssh/id_ed25519",
        global = true
    )]
    pub ssh_key: PathBuf,

    /// Unprivileged build account on the guest.
    #[arg(long, env = "LARCH_SSH_USER", default_value = "gitlab-runner", global = true)]
    pub ssh_user: String,

    /// Host key verification policy. The default trusts the throwaway
    /// guest blindly; only suitable on an isolated virtualization network.
    #[arg(
        long,
        env = "LARCH_HOST_KEY_POLICY",
        value_enum,
        default_value = "off",
        global = true
    )]
    pub host_key_policy: HostKeyPolicy,

    /// Delay between readiness poll attempts, in milliseconds.
    #[arg(long, env = "LARCH_POLL_INTERVAL_MS", default_value_t = 1_000, global = true)]
    pub poll_interval_ms: u64,

    /// Attempts to wait for the guest's DHCP lease.
    #[arg(
        long,
        env = "LARCH_NETWORK_POLL_ATTEMPTS",
        default_value_t = 120,
        global = true
    )]
    pub network_poll_attempts: u32,

    /// Attempts to wait for the guest's sshd.
    #[arg(
        long,
        env = "LARCH_SHELL_POLL_ATTEMPTS",
        default_value_t = 60,
        global = true
    )]
    pub shell_poll_attempts: u32,

    /// Exit code the runner expects for infrastructure failures.
    #[arg(long, env = "SYSTEM_FAILURE_EXIT_CODE", default_value_t = 2, global = true)]
    pub system_failure_exit_code: i32,

    /// Exit code the runner expects for build script failures.
    #[arg(long, env = "BUILD_FAILURE_EXIT_CODE", default_value_t = 1, global = true)]
    pub build_failure_exit_code: i32,

    /// Enable debug-level logging.
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Suppress all diagnostic logging.
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,
}

impl GlobalOptions {
    /// Job context from the runner's environment. Missing or empty
    /// variables are a usage failure.
    pub fn job_context(&self) -> Result<JobContext, ExecutorError> {
        Ok(JobContext {
            project_name: required(&self.project_name, "CUSTOM_ENV_CI_PROJECT_NAME")?,
            job_id: required(&self.job_id, "CUSTOM_ENV_CI_JOB_ID")?,
        })
    }

    pub fn exit_codes(&self) -> ExitCodes {
        ExitCodes {
            build_failure: self.build_failure_exit_code,
            system_failure: self.system_failure_exit_code,
        }
    }

    pub fn network_poll(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_millis(self.poll_interval_ms),
            self.network_poll_attempts,
        )
    }

    pub fn shell_poll(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_millis(self.poll_interval_ms),
            self.shell_poll_attempts,
        )
    }

    pub fn ssh_options(&self) -> SshOptions {
        SshOptions {
            key_path: self.ssh_key.clone(),
            user: self.ssh_user.clone(),
            host_key_policy: self.host_key_policy,
            ..SshOptions::default()
        }
    }
}

fn required(value: &Option<String>, var: &str) -> Result<String, ExecutorError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ExecutorError::MissingJobContext {
            var: var.to_string(),
        })
}

/// One lifecycle verb per process invocation.
#[derive(Subcommand)]
pub enum Verb {
    /// Provision the job VM and wait until it accepts SSH.
    Create(CreateArgs),

    /// Execute a build script inside the job VM.
    Run(RunArgs),

    /// Tear down the job VM and its overlay disk (idempotent).
    Cleanup,

    /// Print driver configuration for the runner (JSON on stdout).
    Config,
}

#[derive(Args)]
pub struct CreateArgs {
    /// Base disk image backing the per-job overlay.
    #[arg(short = 'i', long = "base-image")]
    pub base_image: PathBuf,

    /// Number of virtual CPUs.
    #[arg(short = 'c', long = "vcpus", default_value_t = 4)]
    pub vcpu_count: u32,

    /// Guest RAM in MiB.
    #[arg(short = 'r', long = "ram", default_value_t = 4_096)]
    pub ram_mb: u32,

    /// Libvirt network the guest attaches to.
    #[arg(short = 'n', long = "network", default_value = "default")]
    pub network_label: String,

    /// Value passed to virt-install --os-variant.
    #[arg(long, default_value = "generic")]
    pub os_variant: String,
}

#[derive(Args)]
pub struct RunArgs {
    /// Local build script streamed to the guest's default shell.
    pub script: PathBuf,
}

impl CreateArgs {
    pub fn to_options(&self) -> CreateOptions {
        CreateOptions {
            base_image: self.base_image.clone(),
            vcpu_count: self.vcpu_count,
            ram_mb: self.ram_mb,
            network_label: self.network_label.clone(),
            os_variant: self.os_variant.clone(),
        }
    }
}
