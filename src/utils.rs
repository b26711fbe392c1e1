use crate::{RecorderError, Result};
use std::path::PathBuf;

#[cfg(target_os = "macos")]
const STANDARD_LOCATIONS: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary",
    "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
];

#[cfg(target_os = "linux")]
const STANDARD_LOCATIONS: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    "/usr/bin/microsoft-edge",
];

#[cfg(target_os = "windows")]
const STANDARD_LOCATIONS: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files\Chromium\Application\chrome.exe",
    r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
];

#[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
const STANDARD_LOCATIONS: &[&str] = &[];

const PATH_BINARIES: &[&str] = if cfg!(windows) {
    &["chrome.exe", "chromium.exe", "msedge.exe"]
} else {
    &["google-chrome", "chromium", "chromium-browser", "chrome"]
};

/// Locates a Chromium-based browser binary.
pub fn find_chrome_executable() -> Result<PathBuf> {
    find_in_standard_locations()
        .or_else(find_in_user_install)
        .or_else(find_in_path)
        .ok_or_else(|| {
            RecorderError::LaunchFailed(
                "Could not find Chrome/Chromium executable. Please specify with --chrome-path"
                    .into(),
            )
        })
}

fn find_in_standard_locations() -> Option<PathBuf> {
    STANDARD_LOCATIONS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

#[cfg(target_os = "windows")]
fn find_in_user_install() -> Option<PathBuf> {
    let local_app_data = std::env::var("LOCALAPPDATA").ok()?;
    let user_chrome = PathBuf::from(local_app_data)
        .join("Google")
        .join("Chrome")
        .join("Application")
        .join("chrome.exe");
    user_chrome.exists().then_some(user_chrome)
}

#[cfg(not(target_os = "windows"))]
fn find_in_user_install() -> Option<PathBuf> {
    None
}

fn find_in_path() -> Option<PathBuf> {
    PATH_BINARIES.iter().find_map(|b| which::which(b).ok())
}

/// Profile directory used when launching a browser ourselves.
pub fn default_profile_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("devtools-log-recorder")
        .join("chrome-profile")
}
