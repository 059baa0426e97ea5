//! Ephemeral libvirt VM custom-executor driver.
//!
//! Runs one CI job inside a throwaway VM: the runner invokes one verb
//! per process and the driver reconstructs all state from the derived
//! VM identity and live libvirt queries.
//!
//! # Architecture
//!
//! ```text
//!   CI runner (one process per verb)
//!        |
//!        v
//!   +---------------------------------------------+
//!   | Executor (lifecycle controller)             |
//!   |   identity: runner-<project>-<job>          |
//!   +-------+-----------------+-------------------+
//!           |                 |
//!           v                 v
//!   +---------------+   +---------------+
//!   | VmManager     |   | RemoteShell   |
//!   | qemu-img      |   | ssh (stdin =  |
//!   | virt-install  |   |  build script)|
//!   | virsh         |   +---------------+
//!   +---------------+
//!           |
//!           v
//!   readiness polls: DHCP lease (120 x 1s), sshd (60 x 1s)
//! ```
//!
//! # Exit codes
//!
//! 0 success; `SYSTEM_FAILURE_EXIT_CODE` infrastructure fault (runner
//! retries on a fresh VM); `BUILD_FAILURE_EXIT_CODE` the job's script
//! failed (no retry); 64 malformed invocation.

pub mod cli;
pub mod config_stage;
pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod sections;
pub mod shell;

pub use config_stage::ConfigOutput;
pub use error::{ExecutorError, Result};
pub use lifecycle::Executor;
pub use manager::{CreateOptions, LibvirtManager, VmManager};
pub use shell::{HostKeyPolicy, OpenSsh, RemoteShell, SshOptions};
