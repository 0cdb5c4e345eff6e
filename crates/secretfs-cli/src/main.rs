//! `secrets-fuse` — mount password-manager secrets as files.
#![deny(unsafe_code)]

mod config;
mod symlink;

use anyhow::{Context, Result};
use clap::Parser;
use secretfs_fuse::{mount, processes_using_mount, SecretsFs, UnmountOutcome};
use secretfs_provider::{OnePasswordCli, SecretStore};
use signal_hook::consts::TERM_SIGNALS;
use signal_hook::flag;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// How long a graceful unmount may take before we report the mount busy.
const UNMOUNT_TIMEOUT: Duration = Duration::from_secs(3);

/// Mount password-manager secrets as files
#[derive(Parser)]
#[command(name = "secrets-fuse", version)]
struct Cli {
    /// Mount point for the secrets filesystem
    #[arg(long, default_value = "/tmp/secrets-mount")]
    mount: PathBuf,

    /// Path to the secrets configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum number of reads per secret (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    max_reads: u32,

    /// Enable kernel-protocol tracing
    #[arg(long)]
    debug: bool,
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("info,secretfs_fuse=trace")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("secrets-fuse: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = config::resolve_path(cli.config);
    let cfg = config::load(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;

    let specs: Vec<_> = cfg.secrets.iter().map(config::SecretEntry::to_spec).collect();
    let references: Vec<String> = specs.iter().map(|s| s.reference.clone()).collect();

    let account = std::env::var("OP_ACCOUNT").ok().filter(|a| !a.is_empty());
    let store: Arc<dyn SecretStore> = Arc::new(
        OnePasswordCli::new(references, account).context("initializing the 1Password client")?,
    );
    let provider = store.name();

    let fs = SecretsFs::new(store, specs.clone(), cli.max_reads);
    let mut handle = mount(fs, &cli.mount).context("mounting the secrets filesystem")?;

    println!(
        "Secrets mounted at {} (provider: {})",
        cli.mount.display(),
        provider
    );
    println!("Configured secrets:");
    for spec in &specs {
        let cap = if spec.max_reads > 0 {
            spec.max_reads
        } else {
            cli.max_reads
        };
        let limit = if cap > 0 {
            cap.to_string()
        } else {
            "unlimited".to_string()
        };
        println!("  - {} (max reads: {})", spec.mount_filename(), limit);
    }

    let mut symlinks = Vec::new();
    for entry in &cfg.secrets {
        if let Some(link) = symlink::create(entry, &cli.mount)
            .with_context(|| format!("creating symlink for {}", entry.reference))?
        {
            println!("  symlink: {}", link.display());
            symlinks.push(link);
        }
    }

    wait_for_shutdown().context("installing signal handlers")?;
    println!("\nUnmounting...");

    for link in &symlinks {
        if let Err(e) = std::fs::remove_file(link) {
            eprintln!("Failed to remove symlink {}: {}", link.display(), e);
        }
    }

    match handle.unmount(UNMOUNT_TIMEOUT) {
        UnmountOutcome::Clean => Ok(()),
        UnmountOutcome::Busy => {
            eprintln!("Unmount timed out: filesystem is busy.");
            for proc in processes_using_mount(&cli.mount) {
                eprintln!("  {} (pid {}) has files open", proc.name, proc.pid);
            }
            eprintln!("Close any files or terminals using the mount and try again.");
            eprintln!("Mount point: {}", cli.mount.display());
            // keep serving until the mount is released externally; a second
            // signal force-exits via the conditional shutdown registration
            handle.wait();
            Ok(())
        }
    }
}

/// Block until SIGINT/SIGTERM/SIGHUP. A second signal exits immediately.
fn wait_for_shutdown() -> Result<(), std::io::Error> {
    let shutdown = Arc::new(AtomicBool::new(false));
    for &sig in TERM_SIGNALS {
        flag::register_conditional_shutdown(sig, 1, Arc::clone(&shutdown))?;
        flag::register(sig, Arc::clone(&shutdown))?;
    }
    #[cfg(unix)]
    {
        use signal_hook::consts::signal::SIGHUP;
        flag::register_conditional_shutdown(SIGHUP, 1, Arc::clone(&shutdown))?;
        flag::register(SIGHUP, Arc::clone(&shutdown))?;
    }

    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }
    Ok(())
}
