//! Integration tests for the lifecycle controller.
//!
//! These tests drive `Executor` end-to-end against in-memory stub
//! collaborators, covering:
//!
//! 1. **Provisioning** - overlay/install sequencing, derived disk path
//! 2. **Readiness** - address after N polls, shell after M probes,
//!    bounded timeouts with exact attempt counts
//! 3. **Script execution** - exit status propagation and the
//!    infrastructure/job failure split
//! 4. **Teardown** - idempotence, missing-disk tolerance
//!
//! Poll intervals are zero so timeout scenarios run their full attempt
//! budgets instantly; no test sleeps.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use larch_executor_core::{FailureKind, JobContext, PollPolicy, VmIdentity};
use larch_executor_libvirt::{
    CreateOptions, Executor, ExecutorError, RemoteShell, VmManager,
};
use tempfile::TempDir;

const NEVER: u32 = u32::MAX;

fn test_identity(images_root: &Path) -> VmIdentity {
    VmIdentity::derive(
        &JobContext {
            project_name: "widgets".to_string(),
            job_id: "1234".to_string(),
        },
        images_root,
    )
}

fn immediate(max_attempts: u32) -> PollPolicy {
    PollPolicy::new(Duration::ZERO, max_attempts)
}

fn create_options() -> CreateOptions {
    CreateOptions {
        base_image: PathBuf::from("base.qcow2"),
        vcpu_count: 2,
        ram_mb: 2048,
        network_label: "default".to_string(),
        os_variant: "generic".to_string(),
    }
}

// Stub collaborators

#[derive(Default)]
struct ManagerState {
    /// Address queries before a lease appears; `NEVER` means never.
    address_after: u32,
    queries: AtomicU32,
    overlays: Mutex<Vec<(PathBuf, PathBuf)>>,
    installs: Mutex<Vec<(String, PathBuf, CreateOptions)>>,
    destroys: AtomicU32,
    undefines: AtomicU32,
}

#[derive(Clone, Default)]
struct StubManager {
    state: Arc<ManagerState>,
}

impl StubManager {
    fn with_address_after(address_after: u32) -> Self {
        Self {
            state: Arc::new(ManagerState {
                address_after,
                ..ManagerState::default()
            }),
        }
    }
}

#[async_trait]
impl VmManager for StubManager {
    async fn create_overlay(
        &self,
        base_image: &Path,
        disk: &Path,
    ) -> Result<(), ExecutorError> {
        self.state
            .overlays
            .lock()
            .unwrap()
            .push((base_image.to_path_buf(), disk.to_path_buf()));
        Ok(())
    }

    async fn install(
        &self,
        vm_id: &str,
        disk: &Path,
        options: &CreateOptions,
    ) -> Result<(), ExecutorError> {
        self.state.installs.lock().unwrap().push((
            vm_id.to_string(),
            disk.to_path_buf(),
            options.clone(),
        ));
        Ok(())
    }

    async fn domain_address(&self, _vm_id: &str) -> Option<String> {
        let query = self.state.queries.fetch_add(1, Ordering::SeqCst) + 1;
        (query >= self.state.address_after).then(|| "192.168.122.41".to_string())
    }

    async fn destroy(&self, _vm_id: &str) -> Result<(), ExecutorError> {
        self.state.destroys.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn undefine(&self, _vm_id: &str) -> Result<(), ExecutorError> {
        self.state.undefines.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum ScriptBehavior {
    Succeed,
    ExitStatus(i32),
    SessionFailure,
}

struct ShellState {
    /// Probes before sshd answers; `NEVER` means never.
    ready_after: u32,
    probes: AtomicU32,
    behavior: ScriptBehavior,
    scripts: Mutex<Vec<(String, PathBuf)>>,
}

#[derive(Clone)]
struct StubShell {
    state: Arc<ShellState>,
}

impl StubShell {
    fn new(ready_after: u32, behavior: ScriptBehavior) -> Self {
        Self {
            state: Arc::new(ShellState {
                ready_after,
                probes: AtomicU32::new(0),
                behavior,
                scripts: Mutex::new(Vec::new()),
            }),
        }
    }
}

#[async_trait]
impl RemoteShell for StubShell {
    async fn probe(&self, _addr: &str) -> bool {
        let probe = self.state.probes.fetch_add(1, Ordering::SeqCst) + 1;
        probe >= self.state.ready_after
    }

    async fn run_script(&self, addr: &str, script: &Path) -> Result<(), ExecutorError> {
        self.state
            .scripts
            .lock()
            .unwrap()
            .push((addr.to_string(), script.to_path_buf()));
        match self.state.behavior {
            ScriptBehavior::Succeed => Ok(()),
            ScriptBehavior::ExitStatus(status) => Err(ExecutorError::ScriptFailed { status }),
            ScriptBehavior::SessionFailure => Err(ExecutorError::SessionFailed {
                addr: addr.to_string(),
            }),
        }
    }
}

fn executor(
    images_root: &Path,
    manager: &StubManager,
    shell: &StubShell,
    network_attempts: u32,
    shell_attempts: u32,
) -> Executor<StubManager, StubShell> {
    Executor::new(
        test_identity(images_root),
        manager.clone(),
        shell.clone(),
        immediate(network_attempts),
        immediate(shell_attempts),
    )
}

// Provisioning and readiness

#[tokio::test]
async fn create_provisions_and_waits_for_both_readiness_conditions() {
    let images = TempDir::new().unwrap();
    let manager = StubManager::with_address_after(3);
    let shell = StubShell::new(1, ScriptBehavior::Succeed);
    let executor = executor(images.path(), &manager, &shell, 120, 60);

    executor.create(&create_options()).await.unwrap();

    // Overlay created at the derived path, from the requested base.
    let overlays = manager.state.overlays.lock().unwrap();
    let expected_disk = images.path().join("runner-widgets-1234.qcow2");
    assert_eq!(
        overlays.as_slice(),
        &[(PathBuf::from("base.qcow2"), expected_disk.clone())]
    );

    // Domain installed from that overlay with the requested resources.
    let installs = manager.state.installs.lock().unwrap();
    assert_eq!(installs.len(), 1);
    let (vm_id, disk, options) = &installs[0];
    assert_eq!(vm_id, "runner-widgets-1234");
    assert_eq!(disk, &expected_disk);
    assert_eq!(options.vcpu_count, 2);
    assert_eq!(options.ram_mb, 2048);

    // Address appeared on the third poll; the first probe succeeded.
    assert_eq!(manager.state.queries.load(Ordering::SeqCst), 3);
    assert_eq!(shell.state.probes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn create_without_a_lease_exhausts_the_network_budget() {
    let images = TempDir::new().unwrap();
    let manager = StubManager::with_address_after(NEVER);
    let shell = StubShell::new(1, ScriptBehavior::Succeed);
    let executor = executor(images.path(), &manager, &shell, 120, 60);

    let err = executor.create(&create_options()).await.unwrap_err();

    assert_eq!(err.classification(), FailureKind::Infrastructure);
    assert_eq!(manager.state.queries.load(Ordering::SeqCst), 120);
    // The shell wait never started.
    assert_eq!(shell.state.probes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn create_without_sshd_exhausts_the_shell_budget() {
    let images = TempDir::new().unwrap();
    let manager = StubManager::with_address_after(1);
    let shell = StubShell::new(NEVER, ScriptBehavior::Succeed);
    let executor = executor(images.path(), &manager, &shell, 120, 60);

    let err = executor.create(&create_options()).await.unwrap_err();

    assert_eq!(err.classification(), FailureKind::Infrastructure);
    assert_eq!(shell.state.probes.load(Ordering::SeqCst), 60);
}

// Script execution

#[tokio::test]
async fn run_streams_the_script_to_the_resolved_address() {
    let images = TempDir::new().unwrap();
    let manager = StubManager::with_address_after(1);
    let shell = StubShell::new(1, ScriptBehavior::Succeed);
    let executor = executor(images.path(), &manager, &shell, 120, 60);

    executor.run(Path::new("/tmp/build.sh")).await.unwrap();

    let scripts = shell.state.scripts.lock().unwrap();
    assert_eq!(
        scripts.as_slice(),
        &[(
            "192.168.122.41".to_string(),
            PathBuf::from("/tmp/build.sh")
        )]
    );
}

#[tokio::test]
async fn run_reports_a_failing_script_as_a_job_failure() {
    let images = TempDir::new().unwrap();
    let manager = StubManager::with_address_after(1);
    let shell = StubShell::new(1, ScriptBehavior::ExitStatus(7));
    let executor = executor(images.path(), &manager, &shell, 120, 60);

    let err = executor.run(Path::new("/tmp/build.sh")).await.unwrap_err();

    assert_eq!(err.classification(), FailureKind::Job);
    match err {
        ExecutorError::ScriptFailed { status } => assert_eq!(status, 7),
        other => panic!("expected script failure, got {other:?}"),
    }
}

#[tokio::test]
async fn run_reports_a_broken_session_as_infrastructure() {
    let images = TempDir::new().unwrap();
    let manager = StubManager::with_address_after(1);
    let shell = StubShell::new(1, ScriptBehavior::SessionFailure);
    let executor = executor(images.path(), &manager, &shell, 120, 60);

    let err = executor.run(Path::new("/tmp/build.sh")).await.unwrap_err();

    assert_eq!(err.classification(), FailureKind::Infrastructure);
}

#[tokio::test]
async fn run_with_an_unresolvable_address_never_reaches_the_shell() {
    let images = TempDir::new().unwrap();
    let manager = StubManager::with_address_after(NEVER);
    let shell = StubShell::new(1, ScriptBehavior::Succeed);
    // Small budget: the property is the classification, not the count.
    let executor = executor(images.path(), &manager, &shell, 5, 60);

    let err = executor.run(Path::new("/tmp/build.sh")).await.unwrap_err();

    assert_eq!(err.classification(), FailureKind::Infrastructure);
    assert!(shell.state.scripts.lock().unwrap().is_empty());
}

// Teardown

#[tokio::test]
async fn cleanup_removes_vm_and_disk() {
    let images = TempDir::new().unwrap();
    let disk = images.path().join("runner-widgets-1234.qcow2");
    std::fs::write(&disk, b"overlay").unwrap();

    let manager = StubManager::with_address_after(1);
    let shell = StubShell::new(1, ScriptBehavior::Succeed);
    let executor = executor(images.path(), &manager, &shell, 120, 60);

    executor.cleanup().await.unwrap();

    assert_eq!(manager.state.destroys.load(Ordering::SeqCst), 1);
    assert_eq!(manager.state.undefines.load(Ordering::SeqCst), 1);
    assert!(!disk.exists());
}

#[tokio::test]
async fn cleanup_twice_in_succession_succeeds_both_times() {
    let images = TempDir::new().unwrap();
    let disk = images.path().join("runner-widgets-1234.qcow2");
    std::fs::write(&disk, b"overlay").unwrap();

    let manager = StubManager::with_address_after(1);
    let shell = StubShell::new(1, ScriptBehavior::Succeed);
    let executor = executor(images.path(), &manager, &shell, 120, 60);

    executor.cleanup().await.unwrap();
    // Everything is already gone; the second pass must still succeed.
    executor.cleanup().await.unwrap();

    assert_eq!(manager.state.destroys.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cleanup_with_no_disk_skips_deletion_silently() {
    let images = TempDir::new().unwrap();
    let manager = StubManager::with_address_after(1);
    let shell = StubShell::new(1, ScriptBehavior::Succeed);
    let executor = executor(images.path(), &manager, &shell, 120, 60);

    executor.cleanup().await.unwrap();
}
