//! Binary entry point: parse, dispatch, classify, exit.
//!
//! This is the only place errors become process exit codes. Every other
//! layer returns typed errors; `main` prints the single `ERROR:` line on
//! stderr and exits with the code the runner's retry logic expects.

use clap::error::ErrorKind;
use clap::Parser;
use larch_executor_core::{VmIdentity, USAGE_EXIT_CODE};
use larch_executor_libvirt::cli::{Cli, Verb};
use larch_executor_libvirt::{
    ConfigOutput, Executor, ExecutorError, LibvirtManager, OpenSsh,
};
use tracing_subscriber::EnvFilter;

fn init_tracing(quiet: bool, verbose: bool) {
    let filter = if quiet {
        EnvFilter::new("off")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    // Diagnostics go to stderr; stdout belongs to the job log.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

async fn dispatch(cli: &Cli) -> Result<(), ExecutorError> {
    let context = cli.global.job_context()?;
    let identity = VmIdentity::derive(&context, &cli.global.images_root);

    let executor = Executor::new(
        identity,
        LibvirtManager::default(),
        OpenSsh::new(cli.global.ssh_options()),
        cli.global.network_poll(),
        cli.global.shell_poll(),
    );

    match &cli.verb {
        Verb::Create(args) => executor.create(&args.to_options()).await,
        Verb::Run(args) => executor.run(&args.script).await,
        Verb::Cleanup => executor.cleanup().await,
        Verb::Config => ConfigOutput::for_job(executor.identity(), &cli.global.ssh_user).emit(),
    }
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // --help and --version are not failures.
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => USAGE_EXIT_CODE,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    init_tracing(cli.global.quiet, cli.global.verbose);

    let codes = cli.global.exit_codes();

    // Even a panic must surface as a classified exit code; default
    // toward "retry on fresh infrastructure".
    let system_failure = codes.system_failure;
    std::panic::set_hook(Box::new(move |info| {
        eprintln!("ERROR: unexpected failure: {info}");
        std::process::exit(system_failure);
    }));

    // A termination signal aborts the in-flight poll or session
    // promptly; the orchestrator still runs `cleanup` as its own step.
    let outcome = tokio::select! {
        outcome = dispatch(&cli) => outcome,
        _ = tokio::signal::ctrl_c() => Err(ExecutorError::Interrupted),
    };

    if let Err(error) = outcome {
        eprintln!("ERROR: {error}");
        std::process::exit(codes.for_kind(error.classification()));
    }
}
