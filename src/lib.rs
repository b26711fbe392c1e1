pub mod chrome;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod output;
pub mod recorder;
pub mod server;
pub mod timeouts;
pub mod utils;

pub use config::Config;
pub use error::RecorderError;

pub type Result<T> = std::result::Result<T, RecorderError>;
