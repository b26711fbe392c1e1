use clap::{Subcommand, ValueEnum};

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    #[command(about = "Run the recorder daemon in the foreground")]
    Daemon {
        #[arg(long, help = "Start recording as soon as the daemon is up")]
        start: bool,
    },

    #[command(about = "Start recording all eligible tabs")]
    Start,

    #[command(about = "Stop recording and save the captured logs")]
    Stop,

    #[command(about = "Show recording state and event counts")]
    Status,

    #[command(about = "Discard captured events without saving")]
    Clear,

    #[command(about = "Turn periodic auto-restart on or off")]
    AutoRestart {
        #[arg(value_enum, help = "on or off")]
        state: Toggle,
    },

    #[command(about = "Save the captured logs without stopping")]
    Save,

    #[command(about = "Print recorder notifications as they happen")]
    Watch,

    #[command(about = "Manage configuration")]
    Config {
        #[command(subcommand)]
        subcommand: ConfigCommand,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommand {
    #[command(about = "Show current configuration")]
    Show,

    #[command(about = "Show config file path")]
    Path,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    pub fn enabled(self) -> bool {
        self == Toggle::On
    }
}
