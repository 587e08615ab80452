//! `entityfs` binary: `serve` mounts the virtual tree over a local SQLite
//! file; `version` prints build metadata (`spec.md` §6).

mod tracing_setup;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};

use entityfs_core::config::{CliOverrides, Config};
use entityfs_fuse::EntityFilesystem;
use entityfs_storage::StorageEngine;
use entityfs_vfs::{touch, ChangeWatcher, Composer};

#[derive(Parser)]
#[command(name = "entityfs", version, about = "SQLite-backed entity metadata filesystem")]
struct Cli {
    /// Raise the log level; repeat for more detail (-v, -vv, -vvv).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit structured JSON logs instead of human-readable text.
    #[arg(long = "log-json", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mount the filesystem and serve until unmounted or terminated.
    Serve(ServeArgs),
    /// Print build and schema metadata.
    Version,
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long)]
    mountpoint: PathBuf,
    #[arg(long)]
    localdb: PathBuf,
    /// Attempt to unmount a stale mount at `mountpoint` before serving.
    #[arg(long)]
    unmount: bool,
    #[arg(long)]
    touch_on_change: Option<PathBuf>,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    content_cache_capacity: Option<u64>,
    #[arg(long)]
    attr_cache_capacity: Option<u64>,
    #[arg(long)]
    query_cache_capacity: Option<u64>,
    #[arg(long)]
    max_file_size: Option<u64>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_setup::init(cli.verbose, cli.log_json);

    match cli.command {
        Command::Version => {
            print_version();
            ExitCode::SUCCESS
        }
        Command::Serve(args) => match run_serve(args) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, "entityfs serve failed");
                ExitCode::FAILURE
            }
        },
    }
}

fn print_version() {
    println!("entityfs {}", env!("CARGO_PKG_VERSION"));
    println!(
        "schema: {} v{}",
        entityfs_core::constants::SCHEMA_NAME,
        entityfs_core::constants::SCHEMA_VERSION
    );
}

#[derive(Debug, thiserror::Error)]
enum ServeError {
    #[error(transparent)]
    Config(#[from] entityfs_core::config::ConfigError),
    #[error(transparent)]
    Storage(#[from] entityfs_storage::StorageError),
    #[error(transparent)]
    Vfs(#[from] entityfs_vfs::VfsError),
    #[error("failed to mount at {mountpoint}: {source}")]
    Mount {
        mountpoint: String,
        #[source]
        source: std::io::Error,
    },
}

fn run_serve(args: ServeArgs) -> Result<(), ServeError> {
    if args.unmount {
        attempt_stale_unmount(&args.mountpoint);
    }

    let cli_overrides = CliOverrides {
        content_cache_capacity: args.content_cache_capacity,
        attr_cache_capacity: args.attr_cache_capacity,
        query_cache_capacity: args.query_cache_capacity,
        max_file_size: args.max_file_size,
        touch_on_change: args.touch_on_change.clone(),
    };
    let config = Config::load(args.config.as_deref(), &cli_overrides)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build the tokio runtime");
    let runtime_handle = runtime.handle().clone();

    let engine = Arc::new(StorageEngine::open(&args.localdb)?);

    let on_change: Option<Arc<dyn Fn() + Send + Sync>> = match &config.touch_on_change {
        Some(marker) => {
            let marker = marker.clone();
            let _guard = runtime.enter();
            let watcher = ChangeWatcher::spawn(Duration::from_millis(config.change_watcher_delay_ms), move || {
                if let Err(e) = touch(&marker) {
                    tracing::warn!(error = %e, path = %marker.display(), "change-watcher touch failed");
                }
            });
            Some(Arc::new(move || watcher.notify()))
        }
        None => None,
    };

    let composer = Arc::new(Composer::with_change_notifier(
        engine,
        config,
        args.localdb.display().to_string(),
        on_change,
    )?);

    let filesystem = EntityFilesystem::new(composer, runtime_handle);
    let mount_options = [fuser::MountOption::FSName("entityfs".to_string())];
    tracing::info!(mountpoint = %args.mountpoint.display(), "mounting entityfs");
    fuser::mount2(filesystem, &args.mountpoint, &mount_options).map_err(|source| ServeError::Mount {
        mountpoint: args.mountpoint.display().to_string(),
        source,
    })?;
    Ok(())
}

/// Best-effort `fusermount -u` of a stale mountpoint; failures are logged,
/// not fatal, since the real mount attempt below will surface a clearer
/// error if the mountpoint genuinely can't be used.
fn attempt_stale_unmount(mountpoint: &std::path::Path) {
    let status = std::process::Command::new("fusermount")
        .arg("-u")
        .arg(mountpoint)
        .status();
    match status {
        Ok(status) if status.success() => {
            tracing::info!(mountpoint = %mountpoint.display(), "unmounted stale mount");
        }
        Ok(status) => {
            tracing::debug!(mountpoint = %mountpoint.display(), code = ?status.code(), "fusermount -u reported non-zero, ignoring");
        }
        Err(e) => {
            tracing::debug!(mountpoint = %mountpoint.display(), error = %e, "fusermount -u unavailable, ignoring");
        }
    }
}
