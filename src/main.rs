use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

use hpinet::output::OutputFormat;
use hpinet::{app, config, logging};

#[derive(Parser, Debug)]
#[command(name = "hpinet")]
#[command(about = "Query the HPInet host-pathogen interaction backend")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/hpinet/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Backend base URL, overriding config and HPINET_API_BASE_URL
  #[arg(long, global = true)]
  api_base_url: Option<String>,

  /// Output format
  #[arg(short, long, value_enum, default_value_t, global = true)]
  format: OutputFormat,

  /// Write logs to this file instead of stderr
  #[arg(long, global = true)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: app::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let _log_guard = logging::init(args.log_file.as_deref())?;

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;

  // Override base URL if specified on command line
  if let Some(base_url) = &args.api_base_url {
    config.apply_base_url(base_url);
  }

  let app = app::App::new(&config, args.format)?;
  app.run(args.command).await?;

  Ok(())
}
