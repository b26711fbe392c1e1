//! Browser host: connects to Chrome over the DevTools protocol and exposes
//! its tabs to the recorder.

pub mod browser;
pub mod collectors;
pub mod lifecycle;

pub use browser::{DebugTarget, connect_or_launch, connect_to_existing, list_targets};
pub use collectors::{CdpConsoleSource, CdpNetworkSource, build_sources};
pub use lifecycle::CdpLifecycle;
