//! midi-red - route MIDI notes from one device to another, rewriting
//! channel and note per configured rule.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use midi_red::config::{AppConfig, ConfigWatcher, MidiConfig};
use midi_red::devices::{self, DeviceAccess};
use midi_red::editor::{self, Command, Flow};
use midi_red::{MessageRouter, RuleStore};

/// midi-red - Redirect MIDI notes between devices
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available MIDI ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Input port (index or name substring), overrides the config file
    #[arg(short, long)]
    input: Option<String>,

    /// Output port (index or name substring), overrides the config file
    #[arg(short, long)]
    output: Option<String>,

    /// Run without the interactive editor
    #[arg(long)]
    no_editor: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level)?;

    if args.list_ports {
        devices::discover_ports()?.print();
        return Ok(());
    }

    info!("Starting midi-red...");
    info!("Configuration file: {}", args.config.display());

    let mut config = AppConfig::load_or_default(&args.config).await?;
    if args.input.is_some() {
        config.midi.input_port = args.input.clone();
    }
    if args.output.is_some() {
        config.midi.output_port = args.output.clone();
    }

    let mut store = RuleStore::with_cache(config.routing.lookup_cache);
    let applied = config.apply_rules(&mut store);
    info!("Loaded {} rule(s)", applied);

    let router = Arc::new(MessageRouter::new(store.into_shared(), config.routing.non_note));

    let mut access = DeviceAccess::new();
    access.try_init().await?;
    apply_ports(&router, &access, &MidiConfig::default(), &config.midi);

    // Hot reload only makes sense when there is a file to watch
    let config_watcher = if args.config.exists() {
        match ConfigWatcher::new(args.config.clone()) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("Config hot-reload disabled: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    // The sender stays alive here so the loop keeps running headless, or
    // when the editor thread fails to start
    let (command_tx, command_rx) = mpsc::channel::<Command>(32);
    if !args.no_editor {
        editor::spawn_repl(command_tx.clone());
    }

    run_app(router.clone(), access, config, args, config_watcher, command_rx).await?;

    drop(command_tx);
    router.unbind_input();
    router.unbind_output();
    info!("midi-red shutdown complete");
    Ok(())
}

async fn run_app(
    router: Arc<MessageRouter>,
    access: DeviceAccess,
    mut config: AppConfig,
    args: Args,
    mut config_watcher: Option<ConfigWatcher>,
    mut commands: mpsc::Receiver<Command>,
) -> Result<()> {
    info!("Ready to route MIDI notes!");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(command) = commands.recv() => {
                if editor::execute(command, &router, &access) == Flow::Quit {
                    break;
                }
            }

            Some(mut new_config) = next_config(&mut config_watcher) => {
                info!("📝 Configuration file changed, reloading...");

                // Command-line port choices stay authoritative
                if args.input.is_some() {
                    new_config.midi.input_port = args.input.clone();
                }
                if args.output.is_some() {
                    new_config.midi.output_port = args.output.clone();
                }

                let applied = new_config.apply_rules(&mut router.rules().lock());
                router.set_non_note_policy(new_config.routing.non_note);
                apply_ports(&router, &access, &config.midi, &new_config.midi);
                if new_config.routing.lookup_cache != config.routing.lookup_cache {
                    warn!("lookup_cache changes take effect on restart");
                }
                config = new_config;
                info!("✅ Configuration reloaded ({} rule(s) applied)", applied);
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping event loop");
                break;
            }
        }
    }

    Ok(())
}

/// Bind, rebind or unbind the ports whose selection changed. Failures are
/// logged and routing continues with whatever is bound.
fn apply_ports(router: &Arc<MessageRouter>, access: &DeviceAccess, old: &MidiConfig, new: &MidiConfig) {
    for command in editor::port_commands(old, new) {
        editor::execute(command, router, access);
    }
}

async fn next_config(watcher: &mut Option<ConfigWatcher>) -> Option<AppConfig> {
    match watcher {
        Some(watcher) => watcher.next_config().await,
        None => std::future::pending().await,
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
