//! Instance Guard Demo - a minimal application guarded by instance-guard.
//!
//! The first launch becomes the leader and keeps running; later launches hand
//! off to it and exit. Status lines on stdout are machine-readable:
//!
//! ```text
//! ROLE=leader
//! ACTIVATED count=1
//! ROLE=follower
//! ```
//!
//! Logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use instance_guard::{AppIdentity, Coordinator, ListenerEvent, LockScope};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "instance-guard-demo")]
#[command(about = "Single-instance demo application")]
struct Args {
    /// Application identity (defaults to the executable name)
    #[arg(short, long)]
    name: Option<String>,

    /// Lock scope
    #[arg(long, value_enum, default_value = "session")]
    scope: ScopeArg,

    /// Directory for the lock file and socket (defaults to the platform location)
    #[arg(long)]
    runtime_dir: Option<PathBuf>,

    /// Follower hand-off timeout in milliseconds
    #[arg(long, default_value = "1000")]
    timeout_ms: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ScopeArg {
    Session,
    Global,
}

impl From<ScopeArg> for LockScope {
    fn from(arg: ScopeArg) -> Self {
        match arg {
            ScopeArg::Session => LockScope::Session,
            ScopeArg::Global => LockScope::Global,
        }
    }
}

/// `RUST_LOG` wins over `--debug` when set.
fn init_logging(args: &Args) {
    let default_level = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::builder()
        .parse_lossy(std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.to_owned()));
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if args.json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let identity = match &args.name {
        Some(name) => AppIdentity::new(name.as_str())?,
        None => AppIdentity::from_current_exe(),
    };

    let activations = Arc::new(AtomicUsize::new(0));
    let on_activation = {
        let activations = activations.clone();
        move || {
            // Stands in for restoring and focusing the main window.
            let count = activations.fetch_add(1, Ordering::SeqCst) + 1;
            println!("ACTIVATED count={}", count);
        }
    };

    let mut builder = Coordinator::builder(identity.clone())
        .scope(args.scope.into())
        .notify_timeout(Duration::from_millis(args.timeout_ms));
    if let Some(dir) = &args.runtime_dir {
        builder = builder.runtime_dir(dir);
    }

    let coordinator = builder
        .start(on_activation)
        .await
        .with_context(|| format!("single-instance startup failed for {}", identity))?;

    if !coordinator.is_primary() {
        // Intentional stdout for test harnesses and launch scripts.
        println!("ROLE=follower");
        return Ok(());
    }

    if let Some(mut events) = coordinator.subscribe() {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ListenerEvent::BindFailed { message, retry_in }) => {
                        warn!("Activation channel down ({}), retry in {:?}", message, retry_in);
                    }
                    Ok(ListenerEvent::Stopped) | Err(RecvError::Closed) => break,
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                }
            }
        });
    }

    println!("ROLE=leader");
    info!("{} running; launch again to activate it", identity);

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");
    coordinator.shutdown().await;

    Ok(())
}
