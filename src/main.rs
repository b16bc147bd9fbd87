//! Proctor Telemetry CLI
//!
//! Live proctoring dashboard for teachers and a student agent runner.

use anyhow::Context;
use clap::{Parser, Subcommand};
use proctor_telemetry::{
    config::Config,
    observability::init_tracing,
    student::{
        Camera, PageSignal, ProctoringStatus, StudentProctorAgent, SyntheticCamera,
        SyntheticDetectorLoader, UnavailableCamera,
    },
    teacher::{AlertSink, LogAlert, TeacherAggregator, TerminalBell},
    WebSocketConnector, PROCTORING_NOTICE, VERSION,
};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "proctor")]
#[command(version = VERSION)]
#[command(about = "Real-time exam proctoring telemetry", long_about = None)]
struct Cli {
    /// Backend base URL (overrides the configuration file)
    #[arg(long, global = true, env = "PROCTOR_SERVER_URL")]
    server: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Log debug output
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the live roster of a test
    Monitor {
        /// Test to monitor
        #[arg(long = "test")]
        test_id: String,
    },

    /// Run a student proctoring agent, reading page signals from stdin
    Student {
        /// Test being taken
        #[arg(long = "test")]
        test_id: String,

        /// Student name
        #[arg(long)]
        name: String,

        /// Use a synthetic camera instead of reporting no device
        #[arg(long)]
        synthetic: bool,
    },

    /// Display the proctoring notice
    Notice,

    /// Show configuration
    Config {
        /// Write the configuration file
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    init_tracing(cli.json_logs, level);

    let mut config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config, using defaults: {e}");
        Config::default()
    });
    if let Some(server) = cli.server {
        config.server_url = server;
    }

    match cli.command {
        Commands::Monitor { test_id } => cmd_monitor(&config, &test_id).await,
        Commands::Student {
            test_id,
            name,
            synthetic,
        } => cmd_student(&config, &test_id, &name, synthetic).await,
        Commands::Notice => {
            println!("{PROCTORING_NOTICE}");
            Ok(())
        }
        Commands::Config { init } => cmd_config(&config, init),
    }
}

async fn cmd_monitor(config: &Config, test_id: &str) -> anyhow::Result<()> {
    let connector = Arc::new(WebSocketConnector::new(config.endpoint()));
    let alert: Arc<dyn AlertSink> = if config.alert_bell {
        Arc::new((TerminalBell, LogAlert))
    } else {
        Arc::new(LogAlert)
    };
    let mut aggregator = TeacherAggregator::monitor(connector, test_id, alert)?;
    let stale_after = config.stale_after();

    let mut updates = aggregator.updates();
    let mut connection = aggregator.connection_changes();
    let mut refresh = tokio::time::interval(Duration::from_secs(1));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = connection.changed() => {}
            _ = refresh.tick() => {}
        }
        let mut stdout = std::io::stdout();
        write!(stdout, "\x1b[2J\x1b[H{}", aggregator.render(stale_after))?;
        stdout.flush()?;
    }

    let telemetry = aggregator.telemetry();
    aggregator.stop();
    println!();
    println!("{}", telemetry.summary());
    Ok(())
}

async fn cmd_student(
    config: &Config,
    test_id: &str,
    name: &str,
    synthetic: bool,
) -> anyhow::Result<()> {
    println!("Proctor Telemetry v{VERSION}");
    println!("{PROCTORING_NOTICE}");

    let camera: Arc<dyn Camera> = if synthetic {
        Arc::new(SyntheticCamera::default())
    } else {
        Arc::new(UnavailableCamera)
    };
    let agent = StudentProctorAgent::new(
        config.agent_config(),
        Arc::new(WebSocketConnector::new(config.endpoint())),
        camera,
        Arc::new(SyntheticDetectorLoader),
    );

    let (signals_tx, signals_rx) = mpsc::channel(64);
    agent
        .start(test_id, name, signals_rx)
        .context("failed to start proctoring")?;
    println!("Attempt {} started for {name} on test {test_id}", agent.attempt_id());
    println!("Type hidden, visible, blur, focus or submit.");

    let mut status = agent.status_changes();
    let mut connection = agent
        .channel_changes()
        .context("proctoring channel was not opened")?;
    let mut connection_live = true;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                match &*status.borrow_and_update() {
                    ProctoringStatus::Pending => {}
                    ProctoringStatus::Enabled => println!("Proctoring enabled."),
                    ProctoringStatus::Disabled(reason) => {
                        println!("Proctoring disabled ({reason}); the exam continues.");
                    }
                }
            }
            changed = connection.changed(), if connection_live => {
                match changed {
                    Ok(()) => println!("Connection: {}", *connection.borrow_and_update()),
                    Err(_) => connection_live = false,
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                if input.eq_ignore_ascii_case("submit") {
                    break;
                }
                match input.parse::<PageSignal>() {
                    Ok(signal) => {
                        if signals_tx.try_send(signal).is_err() {
                            eprintln!("Page watcher is not running.");
                        }
                    }
                    Err(e) => eprintln!("{e}"),
                }
                if agent.warning_active() {
                    println!("Warning: suspicious activity detected.");
                }
            }
        }
    }

    agent.stop();
    println!();
    println!("{}", agent.telemetry().summary());
    Ok(())
}

fn cmd_config(config: &Config, init: bool) -> anyhow::Result<()> {
    if init {
        config.save().context("failed to write config")?;
        println!("Wrote {:?}", Config::config_path());
        return Ok(());
    }

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
