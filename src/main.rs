//! DSI Engine CLI
//!
//! Runs the scoring engine as a local HTTP service, or replays recorded
//! interaction logs through a single session.

use clap::{Parser, Subcommand};
use dsi_engine::{
    config::Config,
    core::{EngineSignal, Session, SessionConfig},
    signal::{ContextUpdate, InteractionEvent, LockMode},
    stats::EngineStats,
    VERSION,
};
use serde::Deserialize;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dsi-engine")]
#[command(version = VERSION)]
#[command(about = "Per-session stress scoring for browsing sessions", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service (requires server feature)
    Serve {
        /// Port to bind on 127.0.0.1
        #[arg(long, default_value = "8787")]
        port: u16,

        /// Forward every engine event to this URL
        #[arg(long)]
        webhook: Option<String>,

        /// Bearer token for the webhook
        #[arg(long, requires = "webhook")]
        webhook_token: Option<String>,
    },

    /// Replay a JSONL interaction log through one session
    Simulate {
        /// File with one JSON record per line
        file: PathBuf,

        /// Initial context category
        #[arg(long)]
        category: Option<String>,

        /// Tick period in milliseconds (defaults to the configured interval)
        #[arg(long)]
        tick_ms: Option<u64>,

        /// Extra idle ticks to run after the last record
        #[arg(long, default_value = "0")]
        drain: u32,

        /// Print a JSON snapshot per tick instead of a table row
        #[arg(long)]
        json: bool,
    },

    /// Show configuration
    Config {
        /// Write the default configuration to the config file
        #[arg(long)]
        init: bool,

        /// Overwrite an existing file with --init
        #[arg(long, requires = "init")]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Serve {
            port,
            webhook,
            webhook_token,
        } => cmd_serve(config, port, webhook, webhook_token),
        Commands::Simulate {
            file,
            category,
            tick_ms,
            drain,
            json,
        } => cmd_simulate(config, &file, category, tick_ms, drain, json),
        Commands::Config { init, force } => cmd_config(&config, cli.config.as_deref(), init, force),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<Config, dsi_engine::config::ConfigError> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

#[cfg(feature = "server")]
fn cmd_serve(
    config: Config,
    port: u16,
    webhook: Option<String>,
    webhook_token: Option<String>,
) -> anyhow::Result<()> {
    use dsi_engine::notify::WebhookConfig;
    use dsi_engine::server::{run, ServerConfig};

    let mut server_config = ServerConfig::new(port, config);
    if let Some(url) = webhook {
        let mut webhook = WebhookConfig::new(url);
        if let Some(token) = webhook_token {
            webhook = webhook.with_token(token);
        }
        server_config = server_config.with_webhook(webhook);
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let (addr, shutdown_tx) = run(server_config).await?;
        println!("DSI Engine v{VERSION}");
        println!("Listening on http://{addr}");
        println!("Press Ctrl+C to stop.");

        tokio::signal::ctrl_c().await?;
        println!();
        println!("Stopping...");
        let _ = shutdown_tx.send(());
        Ok::<(), anyhow::Error>(())
    })
}

#[cfg(not(feature = "server"))]
fn cmd_serve(
    _config: Config,
    _port: u16,
    _webhook: Option<String>,
    _webhook_token: Option<String>,
) -> anyhow::Result<()> {
    anyhow::bail!("serve requires the server feature (rebuild with --features server)")
}

/// Non-event records accepted in a replay log.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Control {
    Context {
        category: String,
        timestamp: f64,
    },
    Mode {
        mode: LockMode,
        active: bool,
        timestamp: f64,
    },
    Complete {
        mode: LockMode,
        timestamp: f64,
    },
    Score {
        score: f64,
        timestamp: f64,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReplayRecord {
    Event(InteractionEvent),
    Control(Control),
}

impl ReplayRecord {
    fn timestamp(&self) -> f64 {
        match self {
            ReplayRecord::Event(event) => event.timestamp(),
            ReplayRecord::Control(Control::Context { timestamp, .. })
            | ReplayRecord::Control(Control::Mode { timestamp, .. })
            | ReplayRecord::Control(Control::Complete { timestamp, .. })
            | ReplayRecord::Control(Control::Score { timestamp, .. }) => *timestamp,
        }
    }
}

fn read_replay(path: &Path) -> anyhow::Result<Vec<ReplayRecord>> {
    let file = std::fs::File::open(path)?;
    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let record: ReplayRecord = serde_json::from_str(line)
            .map_err(|e| anyhow::anyhow!("line {}: {e}", index + 1))?;
        records.push(record);
    }
    Ok(records)
}

fn cmd_simulate(
    config: Config,
    file: &Path,
    category: Option<String>,
    tick_ms: Option<u64>,
    drain: u32,
    json: bool,
) -> anyhow::Result<()> {
    let records = read_replay(file)?;
    let Some(first) = records.first() else {
        println!("No records in {}", file.display());
        return Ok(());
    };

    let period = tick_ms
        .map(|ms| ms as f64)
        .unwrap_or(config.tick_interval.as_millis() as f64);
    anyhow::ensure!(period > 0.0, "tick period must be positive");

    let origin = first.timestamp();
    let mut session = Session::new("replay", &SessionConfig::from(&config), origin);
    if let Some(category) = category {
        session.set_category(
            &ContextUpdate {
                category,
                timestamp: origin,
            },
            origin,
        )?;
    }

    if !json {
        println!("Replaying {} records from {}", records.len(), file.display());
        println!();
        println!(
            "{:>8}  {:>6}  {:>5}  {:<14}  {:>7}  signal",
            "t (s)", "score", "level", "mode", "entropy"
        );
    }

    let stats = EngineStats::new();
    let mut next_tick = origin + period;
    let tick = |session: &mut Session, now: f64| -> anyhow::Result<()> {
        let mut signals: Vec<EngineSignal> = Vec::new();
        let report = session.tick(now, |signal| {
            match signal {
                EngineSignal::LevelChanged { .. } => stats.record_level_change(),
                EngineSignal::Suggestion { .. } => stats.record_suggestion(),
            }
            signals.push(signal.clone());
        });
        stats.record_tick();
        if json {
            println!("{}", serde_json::to_string(&session.snapshot())?);
            for signal in &signals {
                println!("{}", serde_json::to_string(signal)?);
            }
        } else {
            let signal = signals
                .iter()
                .map(|s| serde_json::to_string(s).unwrap_or_default())
                .collect::<Vec<_>>()
                .join(" ");
            println!(
                "{:>8.1}  {:>6.1}  {:>5}  {:<14}  {:>7.2}  {}",
                (now - origin) / 1000.0,
                session.engine().score(),
                report.output.new_level,
                format!("{:?}", report.output.mode),
                report.output.entropy,
                signal
            );
        }
        Ok(())
    };

    for record in records {
        let timestamp = record.timestamp();
        let is_event = matches!(record, ReplayRecord::Event(_));
        while timestamp >= next_tick {
            tick(&mut session, next_tick)?;
            next_tick += period;
        }
        let applied = match record {
            // The replay clock stands at the upcoming tick
            ReplayRecord::Event(event) => session.record(event, next_tick),
            ReplayRecord::Control(Control::Context {
                category,
                timestamp,
            }) => session
                .set_category(
                    &ContextUpdate {
                        category,
                        timestamp,
                    },
                    next_tick,
                )
                .map(|_| ()),
            ReplayRecord::Control(Control::Mode { mode, active, .. }) => {
                session.set_mode(mode, active);
                Ok(())
            }
            ReplayRecord::Control(Control::Complete { mode, .. }) => {
                session.complete(mode);
                Ok(())
            }
            ReplayRecord::Control(Control::Score { score, .. }) => {
                session.set_score(score).map(|_| ())
            }
        };
        match applied {
            Ok(()) if is_event => stats.record_event_accepted(),
            Ok(()) => {}
            Err(e) => {
                stats.record_event_rejected();
                tracing::warn!("Skipping record at {timestamp}: {e}");
            }
        }
    }

    tick(&mut session, next_tick)?;
    for _ in 0..drain {
        next_tick += period;
        tick(&mut session, next_tick)?;
    }

    if !json {
        println!();
        println!("{}", stats.summary());
    }
    Ok(())
}

fn cmd_config(
    config: &Config,
    path: Option<&Path>,
    init: bool,
    force: bool,
) -> anyhow::Result<()> {
    let config_path = path.map(Path::to_path_buf).unwrap_or_else(Config::config_path);

    if init {
        if config_path.exists() && !force {
            anyhow::bail!(
                "{} already exists (use --force to overwrite)",
                config_path.display()
            );
        }
        Config::default().save_to(&config_path)?;
        println!("Wrote default configuration to {}", config_path.display());
        return Ok(());
    }

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", config_path);
    println!();
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
