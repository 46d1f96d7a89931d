use anyhow::{bail, Context, Result};
use clap::Parser;
use std::{env, path::PathBuf, time::Duration};
use url::Url;

pub const DEFAULT_WS_URL: &str = "ws://localhost:8080/mumble_events";
pub const DEFAULT_RECONNECT_MS: u64 = 5000;

#[derive(Parser, Debug, Default)]
#[command(name = "mumble-sidebar", about = "Terminal channel tree for a Mumble event bridge")]
pub struct Args {
    /// Websocket endpoint of the event bridge.
    #[arg(long, default_value = "")]
    pub url: String,
    /// Fixed reconnect interval in milliseconds.
    #[arg(long, default_value = "")]
    pub reconnect_ms: String,
    /// Preferences file.
    #[arg(long, default_value = "")]
    pub prefs: String,
    #[arg(long, default_value = "")]
    pub log_dir: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub url: Url,
    pub reconnect_interval: Duration,
    pub prefs_path: PathBuf,
    pub log_dir: String,
    pub log_stdout: bool,
}

impl Config {
    pub fn from_args(args: &Args) -> Result<Self> {
        Ok(Self {
            url: resolve_url(&args.url)?,
            reconnect_interval: resolve_reconnect_interval(&args.reconnect_ms)?,
            prefs_path: resolve_prefs_path(&args.prefs),
            log_dir: resolve_log_dir(&args.log_dir),
            log_stdout: resolve_log_stdout(),
        })
    }
}

fn flag_or_env(flag: &str, key: &str) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.trim().to_string());
    }
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn resolve_url(flag: &str) -> Result<Url> {
    let raw = flag_or_env(flag, "MUMBLE_WS_URL").unwrap_or_else(|| DEFAULT_WS_URL.to_string());
    let url = Url::parse(&raw).with_context(|| format!("invalid websocket url: {raw}"))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        bail!("websocket url must use ws:// or wss://, got {raw}");
    }
    Ok(url)
}

fn resolve_reconnect_interval(flag: &str) -> Result<Duration> {
    let Some(raw) = flag_or_env(flag, "MUMBLE_RECONNECT_MS") else {
        return Ok(Duration::from_millis(DEFAULT_RECONNECT_MS));
    };
    let millis: u64 = raw
        .parse()
        .with_context(|| format!("invalid reconnect interval: {raw}"))?;
    if millis == 0 {
        bail!("reconnect interval must be positive");
    }
    Ok(Duration::from_millis(millis))
}

fn resolve_prefs_path(flag: &str) -> PathBuf {
    if let Some(path) = flag_or_env(flag, "MUMBLE_PREFS_PATH") {
        return PathBuf::from(path);
    }
    config_dir().join("mumble-sidebar/prefs.toml")
}

fn resolve_log_dir(flag: &str) -> String {
    flag_or_env(flag, "MUMBLE_LOG_DIR").unwrap_or_default()
}

fn resolve_log_stdout() -> bool {
    if let Ok(value) = env::var("MUMBLE_LOG_STDOUT") {
        match value.trim() {
            "1" | "true" | "TRUE" | "yes" | "YES" => return true,
            "0" | "false" | "FALSE" | "no" | "NO" => return false,
            _ => {}
        }
    }
    false
}

fn config_dir() -> PathBuf {
    if let Ok(path) = env::var("XDG_CONFIG_HOME") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".config")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_win_over_defaults() {
        let args = Args {
            url: "wss://voice.example.net/events".to_string(),
            reconnect_ms: "250".to_string(),
            prefs: "/tmp/sidebar.toml".to_string(),
            log_dir: "/tmp/logs".to_string(),
        };
        let config = Config::from_args(&args).expect("config");
        assert_eq!(config.url.as_str(), "wss://voice.example.net/events");
        assert_eq!(config.reconnect_interval, Duration::from_millis(250));
        assert_eq!(config.prefs_path, PathBuf::from("/tmp/sidebar.toml"));
        assert_eq!(config.log_dir, "/tmp/logs");
    }

    #[test]
    fn rejects_bad_urls_and_intervals() {
        assert!(resolve_url("not a url").is_err());
        assert!(resolve_url("http://localhost:8080/").is_err());
        assert!(resolve_reconnect_interval("0").is_err());
        assert!(resolve_reconnect_interval("soon").is_err());
    }
}
