pub mod ms {
    pub const AUTO_RESTART_CHECK: u64 = 1000;
    pub const CONSOLE_FLUSH: u64 = 1000;
    pub const CONNECT_RETRY_DELAY: u64 = 500;
    pub const DAEMON_POLL: u64 = 200;
    /// Upper bound on waiting for batched events when a recording stops.
    pub const SOURCE_DRAIN: u64 = 2000;
}

pub mod secs {
    pub const AUTO_RESTART_INTERVAL: u64 = 10 * 60;
    pub const MAX_RECORDING_LIMIT: u64 = 86_400;
    pub const REQUEST: u64 = 120;
    pub const DEVTOOLS_HTTP: u64 = 5;
    pub const TAB_DISCOVERY: u64 = 10;
    /// Covers launching Chrome when no instance is listening.
    pub const DAEMON_STARTUP: u64 = 15;
}
