//! The optional `config` stage of the custom-executor protocol.
//!
//! Before `create`, the runner may ask the driver to describe itself;
//! the reply is one JSON object on stdout. Directories are guest-side
//! paths under the build account's home, namespaced by the derived VM
//! id so concurrent jobs on one runner never collide.

use larch_executor_core::VmIdentity;
use serde::Serialize;
use snafu::ResultExt;

use crate::error::{self, Result};

/// Driver identification block.
#[derive(Debug, Serialize)]
pub struct DriverInfo {
    pub name: &'static str,
    pub version: &'static str,
}

/// Reply to the runner's config stage.
#[derive(Debug, Serialize)]
pub struct ConfigOutput {
    /// Guest directory the runner clones sources into.
    pub builds_dir: String,
    /// Guest directory for the runner's cache.
    pub cache_dir: String,
    pub driver: DriverInfo,
}

impl ConfigOutput {
    pub fn for_job(identity: &VmIdentity, ssh_user: &str) -> Self {
        let home = format!("/home/{ssh_user}");
        Self {
            builds_dir: format!("{home}/builds/{}", identity.vm_id),
            cache_dir: format!("{home}/cache/{}", identity.vm_id),
            driver: DriverInfo {
                name: env!("CARGO_PKG_NAME"),
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }

    /// Print the reply on stdout.
    pub fn emit(&self) -> Result<()> {
        let encoded = serde_json::to_string(self).context(error::EncodeConfigSnafu)?;
        println!("{encoded}");
        Ok(())
    }
}
