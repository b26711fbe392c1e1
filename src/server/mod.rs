pub mod adapter;
pub mod daemon;
pub mod ipc;
pub mod protocol;

pub use daemon::{Daemon, handle_request};
pub use ipc::IpcServer;
pub use protocol::{Notification, Request, Response};
