//! Bot configuration.
//!
//! Resolution order per field: JSON config file, then `ADPOST_*` environment
//! variable, then the built-in default. The resolved [`BotConfig`] is passed
//! around explicitly; nothing in the crate reads configuration globally.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

/// Fixed desktop user agent presented by launched browsers.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Raw on-disk shape; every field optional so a partial file is fine.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    base_url: Option<String>,
    cookie_file: Option<PathBuf>,
    profile_dir: Option<PathBuf>,
    debug_port: Option<u16>,
    headless: Option<bool>,
    wait_timeout_secs: Option<u64>,
    manual_login_attempts: Option<u32>,
    manual_login_wait_secs: Option<u64>,
}

/// Fully-resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Site root, trailing slash included.
    pub base_url: String,
    /// Cookie jar path, JSON array of cookie records.
    pub cookie_file: PathBuf,
    /// Persistent browser profile directory.
    pub profile_dir: PathBuf,
    /// CDP remote-debugging port; also used to attach to a running browser.
    pub debug_port: u16,
    pub headless: bool,
    /// Bound on element presence waits.
    pub wait_timeout: Duration,
    /// Rounds of "please log in" before giving up.
    pub manual_login_attempts: u32,
    /// How long each manual-login round polls before re-prompting.
    pub manual_login_wait: Duration,
    /// Launched-browser window size, chosen to look like a casual user window.
    pub window_size: (u32, u32),
}

impl Default for BotConfig {
    fn default() -> Self {
        let state_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".adpost");
        Self {
            base_url: "https://www.gumtree.com/".to_string(),
            cookie_file: state_dir.join("cookies.json"),
            profile_dir: state_dir.join("profile"),
            debug_port: 9222,
            headless: false,
            wait_timeout: Duration::from_secs(10),
            manual_login_attempts: 3,
            manual_login_wait: Duration::from_secs(60),
            window_size: (1184, 729),
        }
    }
}

impl BotConfig {
    /// Load from `adpost.json` in the working directory when present,
    /// otherwise fall back to env vars and defaults.
    pub fn load() -> Self {
        Self::load_from(&PathBuf::from("adpost.json"))
    }

    pub fn load_from(path: &PathBuf) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<RawConfig>(&content) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("config: {} is not valid JSON ({}), using defaults", path.display(), e);
                    RawConfig::default()
                }
            },
            Err(_) => RawConfig::default(),
        };
        Self::resolve(raw)
    }

    fn resolve(raw: RawConfig) -> Self {
        let defaults = Self::default();
        let base_url = raw
            .base_url
            .or_else(|| std::env::var("ADPOST_BASE_URL").ok())
            .unwrap_or(defaults.base_url);
        // Downstream joins assume a trailing slash.
        let base_url = if base_url.ends_with('/') {
            base_url
        } else {
            format!("{}/", base_url)
        };
        Self {
            base_url,
            cookie_file: raw
                .cookie_file
                .or_else(|| std::env::var("ADPOST_COOKIE_FILE").ok().map(PathBuf::from))
                .unwrap_or(defaults.cookie_file),
            profile_dir: raw
                .profile_dir
                .or_else(|| std::env::var("ADPOST_PROFILE_DIR").ok().map(PathBuf::from))
                .unwrap_or(defaults.profile_dir),
            debug_port: raw
                .debug_port
                .or_else(|| std::env::var("ADPOST_DEBUG_PORT").ok()?.parse().ok())
                .unwrap_or(defaults.debug_port),
            headless: raw
                .headless
                .or_else(|| std::env::var("ADPOST_HEADLESS").ok().map(|v| v == "1" || v == "true"))
                .unwrap_or(defaults.headless),
            wait_timeout: raw
                .wait_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.wait_timeout),
            manual_login_attempts: raw
                .manual_login_attempts
                .unwrap_or(defaults.manual_login_attempts),
            manual_login_wait: raw
                .manual_login_wait_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.manual_login_wait),
            window_size: defaults.window_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = BotConfig::default();
        assert_eq!(cfg.base_url, "https://www.gumtree.com/");
        assert_eq!(cfg.debug_port, 9222);
        assert!(!cfg.headless);
        assert_eq!(cfg.manual_login_attempts, 3);
    }

    #[test]
    fn partial_file_fills_rest_from_defaults() {
        let raw: RawConfig =
            serde_json::from_str(r#"{"base_url":"https://www.gumtree.com","debug_port":9333}"#)
                .unwrap();
        let cfg = BotConfig::resolve(raw);
        // Trailing slash is restored.
        assert_eq!(cfg.base_url, "https://www.gumtree.com/");
        assert_eq!(cfg.debug_port, 9333);
        assert_eq!(cfg.manual_login_attempts, 3);
    }
}
