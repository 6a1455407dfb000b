/* sidewinderd: binds supported gaming keyboards, plays back G-key macros,
 * switches macro profiles with the M-keys and records new macros with MR. */
mod config;
mod device;
mod device_database;
mod driver;
mod keyboard;
mod led;
mod locator;
mod macros;
mod process;
mod state;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use config::Config;
use device_database::CATALOG;
use driver::DeviceIo;
use keyboard::{Keyboard, Settings};
use macros::MacroStore;
use process::PidFile;

/// sidewinderd: macro key daemon for gaming keyboards.
#[derive(Parser)]
#[command(name = "sidewinderd", disable_version_flag = true, about)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Detach and run in the background.
    #[arg(short, long)]
    daemon: bool,

    /// Enable debug logging.
    #[arg(long)]
    verbose: bool,

    /// Print the version and exit.
    #[arg(short = 'v', long)]
    version: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.version {
        println!("sidewinderd version {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config);

    /* Forking is only safe while we are still single-threaded */
    if cli.daemon {
        process::daemonize()?;
    }

    let _pid_file = PidFile::create(&config.pid_file)?;
    let user = process::apply_user(&config.user)?;
    let workdir = process::create_workdir(&user)?;

    info!("Started sidewinderd");

    let settings = Arc::new(Settings {
        store: MacroStore::new(workdir),
        capture_delays: config.capture_delays,
        profile: config.profile_index(),
    });

    let runtime = tokio::runtime::Runtime::new().context("Creating tokio runtime")?;
    runtime.block_on(serve(settings))?;

    info!("Stopped sidewinderd");
    Ok(())
}

/* Open every attached catalog device, then run a keyboard core for each */
/* and wait for all of them to stop. */
async fn serve(settings: Arc<Settings>) -> Result<()> {
    let mut found = Vec::new();

    for descriptor in CATALOG {
        let nodes = match locator::find_device(descriptor) {
            Ok(Some(nodes)) => nodes,
            Ok(None) => continue,
            Err(e) => {
                warn!("Searching for {descriptor} failed: {e:#}");
                continue;
            }
        };
        let io = DeviceIo::open(&nodes.hidraw).with_context(|| format!("Opening {descriptor}"))?;
        found.push((descriptor, io, nodes.input_event));
    }

    if found.is_empty() {
        info!("No supported keyboard found");
        return Ok(());
    }

    let mut keyboards = Vec::new();
    for (descriptor, io, input_event) in found {
        let settings = Arc::clone(&settings);
        let handle = tokio::runtime::Handle::current();
        keyboards.push(tokio::task::spawn_blocking(move || {
            if let Err(e) = Keyboard::connect(descriptor, io, input_event, settings, handle) {
                error!("{descriptor} stopped: {e:#}");
            }
        }));
    }

    for keyboard in keyboards {
        if let Err(e) = keyboard.await {
            error!("Keyboard thread panicked: {e}");
        }
    }
    Ok(())
}
