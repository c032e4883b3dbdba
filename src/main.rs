mod builtins;

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use sluice_config::Config;
use sluice_engine::Manager;
use sluice_plugin::{Data, Payload};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Sluice - branching processing pipelines over binary payloads
#[derive(Parser)]
#[command(name = "sluice")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: the config's data_dir, then ~/.sluice)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run one job read from stdin through a pipeline
  Run {
    /// Path to the config file (JSON)
    config: PathBuf,

    /// Name of the pipeline to submit to
    #[arg(long)]
    pipeline: String,

    /// Metadata entry for the job, as key=value. Values are parsed as JSON
    /// when possible.
    #[arg(long = "data", value_parser = parse_data_entry)]
    data: Vec<(String, serde_json::Value)>,
  },

  /// Replay async jobs left behind by a previous run
  Recover {
    /// Path to the config file (JSON)
    config: PathBuf,
  },

  /// List the built-in plugins
  Plugins,
}

fn main() -> Result<()> {
  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
    .init();

  let cli = Cli::parse();

  match cli.command {
    Some(Commands::Run {
      config,
      pipeline,
      data,
    }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(run(config, cli.data_dir, pipeline, data))?;
    }
    Some(Commands::Recover { config }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(recover(config, cli.data_dir))?;
    }
    Some(Commands::Plugins) => {
      let registry = builtins::registry()?;
      for name in registry.names() {
        if let Some(kind) = registry.kind(name) {
          println!("{:<12} {}", name, kind);
        }
      }
    }
    None => {
      println!("sluice - use --help to see available commands");
    }
  }

  Ok(())
}

async fn run(
  config_file: PathBuf,
  data_dir: Option<PathBuf>,
  pipeline: String,
  entries: Vec<(String, serde_json::Value)>,
) -> Result<()> {
  let config = load_config(&config_file).await?;
  let data_dir = resolve_data_dir(data_dir, &config)?;
  let registry = builtins::registry()?;

  let manager = Manager::build(&config, &registry, &data_dir)
    .await
    .context("failed to build pipelines")?;
  manager.start();

  let reports = manager
    .recover()
    .await
    .context("failed to recover async jobs")?;
  for (name, report) in &reports {
    if report.replayed + report.failed + report.discarded > 0 {
      eprintln!("Recovered {}: {:?}", name, report);
    }
  }

  let payload = read_payload_from_stdin()?;
  let data: Data = entries.into_iter().collect();

  let cancel = CancellationToken::new();
  let interrupt = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      interrupt.cancel();
    }
  });

  let response = manager.submit(&pipeline, payload, data, cancel).await;
  manager.stop().await;
  let response = response?;

  println!("{}", response);
  if response.is_negative() {
    bail!("job was not acknowledged");
  }
  Ok(())
}

async fn recover(config_file: PathBuf, data_dir: Option<PathBuf>) -> Result<()> {
  let config = load_config(&config_file).await?;
  let data_dir = resolve_data_dir(data_dir, &config)?;
  let registry = builtins::registry()?;

  let manager = Manager::build(&config, &registry, &data_dir)
    .await
    .context("failed to build pipelines")?;
  manager.start();

  let reports = manager.recover().await;
  manager.stop().await;

  for (name, report) in reports.context("failed to recover async jobs")? {
    println!(
      "{}: replayed={} failed={} discarded={} orphans_removed={}",
      name, report.replayed, report.failed, report.discarded, report.orphans_removed
    );
  }
  Ok(())
}

async fn load_config(path: &Path) -> Result<Config> {
  let content = tokio::fs::read_to_string(path)
    .await
    .with_context(|| format!("failed to read config file: {}", path.display()))?;

  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse config file: {}", path.display()))
}

fn resolve_data_dir(flag: Option<PathBuf>, config: &Config) -> Result<PathBuf> {
  if let Some(dir) = flag.or_else(|| config.data_dir.clone()) {
    return Ok(dir);
  }
  let home = dirs::home_dir().context("could not determine home directory")?;
  Ok(home.join(".sluice"))
}

fn parse_data_entry(entry: &str) -> Result<(String, serde_json::Value), String> {
  let (key, value) = entry
    .split_once('=')
    .ok_or_else(|| format!("expected key=value, got '{}'", entry))?;
  let value = serde_json::from_str(value)
    .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
  Ok((key.to_string(), value))
}

fn read_payload_from_stdin() -> Result<Payload> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    // No stdin pipe, submit an empty payload
    return Ok(Payload::from(Vec::new()));
  }

  let mut input = Vec::new();
  io::stdin()
    .read_to_end(&mut input)
    .context("failed to read payload from stdin")?;
  Ok(Payload::from(input))
}
