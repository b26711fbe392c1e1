pub mod commands;
pub mod dispatch;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "devtools-log-recorder")]
#[command(version, about = "Record browser network and console logs")]
#[command(
    long_about = "Records network traffic and console output from every open Chrome tab and saves them as HAR and console log files"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<commands::Command>,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Run a launched Chrome in headless mode")]
    pub headless: Option<bool>,

    #[arg(long, global = true, help = "Chrome debugging port")]
    pub port: Option<u16>,

    #[arg(long, global = true, help = "Path to Chrome executable")]
    pub chrome_path: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Directory for saved log files")]
    pub output_dir: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Daemon socket path")]
    pub socket: Option<PathBuf>,
}

impl Cli {
    pub fn with_env_context(mut self) -> Self {
        if self.socket.is_none() {
            self.socket = std::env::var("RECORDER_SOCKET").ok().map(PathBuf::from);
        }

        if self.headless.is_none() {
            self.headless = std::env::var("RECORDER_HEADLESS")
                .ok()
                .map(|v| v != "0" && v.to_lowercase() != "false");
        }

        self
    }
}

pub async fn run() -> crate::Result<()> {
    let cli = Cli::parse().with_env_context();

    let config = if let Some(config_path) = &cli.config {
        let content = std::fs::read_to_string(config_path)?;
        toml::from_str(&content)?
    } else {
        crate::config::Config::load()?
    };

    let overrides = crate::config::ConfigOverrides {
        headless: cli.headless,
        port: cli.port,
        chrome_path: cli.chrome_path.clone(),
        output_dir: cli.output_dir.clone(),
        socket_path: cli.socket.clone(),
    };

    let config = Arc::new(config.load_with_overrides(overrides));
    config.validate()?;

    dispatch::dispatch(cli, config).await
}
