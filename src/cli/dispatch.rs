use super::{
    Cli,
    commands::{Command, ConfigCommand},
};
use crate::{
    RecorderError, Result,
    client::{DaemonClient, is_daemon_running},
    config::{Config, default_config_path},
    output::{self, CommandResult, ConfigView},
    recorder::{StartOutcome, StateSnapshot},
    server::Daemon,
    timeouts::{ms, secs},
};
use std::process::{Command as ProcessCommand, Stdio};
use std::sync::Arc;
use std::time::Duration;

fn start_daemon_background(config: &Config) -> Result<()> {
    let exe = std::env::current_exe()
        .map_err(|e| RecorderError::General(format!("Failed to get executable path: {}", e)))?;

    ProcessCommand::new(exe)
        .arg("daemon")
        .arg("--socket")
        .arg(&config.server.socket_path)
        .arg("--port")
        .arg(config.browser.port.to_string())
        .arg("--output-dir")
        .arg(&config.output.directory)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| RecorderError::General(format!("Failed to spawn daemon: {}", e)))?;

    Ok(())
}

/// Connects to the daemon, starting one in the background when `autostart`
/// is set and none is listening.
async fn connect(config: &Config, autostart: bool) -> Result<DaemonClient> {
    let socket_path = &config.server.socket_path;

    if !is_daemon_running(socket_path) && autostart {
        eprintln!("Starting recorder daemon...");
        start_daemon_background(config)?;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(secs::DAEMON_STARTUP);
        while !is_daemon_running(socket_path) {
            if tokio::time::Instant::now() >= deadline {
                return Err(RecorderError::DaemonNotRunning(socket_path.clone()));
            }
            tokio::time::sleep(Duration::from_millis(ms::DAEMON_POLL)).await;
        }
    }

    DaemonClient::connect(socket_path).await
}

pub async fn dispatch(mut cli: Cli, config: Arc<Config>) -> Result<()> {
    let command = match cli.command.take() {
        Some(cmd) => cmd,
        None => {
            return Err(RecorderError::InvalidCommand(
                "No command provided. Use --help for usage.".into(),
            ));
        }
    };

    match command {
        Command::Daemon { start } => run_daemon(start, &config).await,
        Command::Config { subcommand } => handle_config_command(subcommand, &cli, &config),
        Command::Watch => watch(&cli, &config).await,
        _ => handle_recorder_command(command, &cli, &config).await,
    }
}

async fn run_daemon(start: bool, config: &Config) -> Result<()> {
    let socket_path = &config.server.socket_path;
    if is_daemon_running(socket_path) {
        println!("Recorder daemon already running at {}", socket_path.display());
        return Ok(());
    }

    let daemon = Daemon::build(config).await?;
    if start {
        let handle = daemon.handle().clone();
        if let StartOutcome::Started { eligible_contexts: 0 } = handle.start_recording().await? {
            eprintln!("{}", output::text::warning("No eligible tab to record yet"));
        }
    }

    eprintln!("Recorder daemon listening on {}", socket_path.display());
    daemon.run().await
}

async fn handle_recorder_command(command: Command, cli: &Cli, config: &Config) -> Result<()> {
    let autostart = matches!(command, Command::Start);
    let mut client = connect(config, autostart).await?;

    let result = match command {
        Command::Start => {
            let reply = client.start_recording().await?;
            let message = if reply["alreadyRecording"].as_bool().unwrap_or(false) {
                "Already recording"
            } else {
                "Recording started"
            };
            CommandResult::from_reply(message, &reply)
        }
        Command::Stop => {
            let reply = client.stop_recording().await?;
            CommandResult::from_reply("Recording stopped", &reply)
        }
        Command::Status => {
            let state: StateSnapshot = serde_json::from_value(client.get_state().await?)?;
            return output::print_output(&state, cli.json, config.output.json_pretty);
        }
        Command::Clear => {
            client.clear_logs().await?;
            CommandResult::ok("Captured logs cleared")
        }
        Command::AutoRestart { state } => {
            client.set_auto_restart(state.enabled()).await?;
            CommandResult::ok(if state.enabled() {
                "Auto-restart enabled"
            } else {
                "Auto-restart disabled"
            })
        }
        Command::Save => {
            let reply = client.request_save().await?;
            let saved = reply["files"].as_array().is_some_and(|f| !f.is_empty());
            let message = match reply["success"].as_bool() {
                Some(false) => "Save failed",
                _ if saved => "Logs saved",
                _ => "Nothing to save",
            };
            CommandResult::from_reply(message, &reply)
        }
        other => {
            return Err(RecorderError::InvalidCommand(format!(
                "{:?} is not a recorder command",
                other
            )));
        }
    };

    output::print_output(&result, cli.json, config.output.json_pretty)
}

async fn watch(cli: &Cli, config: &Config) -> Result<()> {
    let mut client = connect(config, false).await?;

    let state: StateSnapshot = serde_json::from_value(client.get_state().await?)?;
    output::print_output(&state, cli.json, false)?;

    loop {
        tokio::select! {
            notification = client.next_notification() => match notification {
                Ok(notification) => output::print_output(&notification, cli.json, false)?,
                Err(RecorderError::ConnectionLost) => {
                    eprintln!("{}", output::text::warning("Recorder daemon went away"));
                    return Ok(());
                }
                Err(e) => return Err(e),
            },
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

fn handle_config_command(subcommand: ConfigCommand, cli: &Cli, config: &Config) -> Result<()> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };

    match subcommand {
        ConfigCommand::Show => {
            let view = ConfigView {
                path: path.display().to_string(),
                rendered: config.show_masked(),
                config: config.clone(),
            };
            output::print_output(&view, cli.json, true)
        }
        ConfigCommand::Path => {
            if cli.json {
                println!("{}", serde_json::json!({ "path": path }));
            } else {
                println!("{}", path.display());
            }
            Ok(())
        }
    }
}
