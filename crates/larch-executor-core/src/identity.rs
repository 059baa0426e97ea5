//! Deterministic VM identity derivation.
//!
//! Every verb invocation runs as its own process, so the VM name and the
//! overlay disk path must be recomputed from job context rather than
//! remembered. Derivation is a pure function: identical context always
//! yields identical identity, which is the only thing keeping `create`,
//! `run`, and `cleanup` pointed at the same VM.

use std::path::{Path, PathBuf};

/// Job context supplied by the runner's environment at process start.
///
/// Used only for identity derivation; never mutated. Uniqueness of the
/// `(project_name, job_id)` pair across concurrently running jobs is the
/// caller's invariant, not ours.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobContext {
    /// CI project name.
    pub project_name: String,
    /// CI job id, unique per pipeline run.
    pub job_id: String,
}

/// Derived identity of the job's VM. Recomputed fresh in every verb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmIdentity {
    /// Libvirt domain name: `runner-<project>-<job>`.
    pub vm_id: String,
    /// Path of the job's copy-on-write overlay disk.
    pub disk_image_path: PathBuf,
}

impl VmIdentity {
    /// Derive the VM name and overlay disk path for a job.
    pub fn derive(context: &JobContext, images_root: &Path) -> Self {
        let vm_id = format!("runner-{}-{}", context.project_name, context.job_id);
        let disk_image_path = images_root.join(format!("{vm_id}.qcow2"));
        Self {
            vm_id,
            disk_image_path,
        }
    }
}
