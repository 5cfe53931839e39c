//! Ambient daemon settings (§2.1) — everything that is not an
//! identity-bearing CLI positional argument. Unlike the source client's
//! config, a missing file is not an error: folder/address/join-address
//! always come from the command line, so this file only ever tunes
//! logging and the accept backlog.

use serde::Deserialize;

fn default_log_level() -> String {
    "info".to_string()
}

fn default_backlog() -> u32 {
    20
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Write a copy of the log to `<images_folder>/../daemon.log`.
    pub log_to_file: bool,
    /// Passed to the TCP listener as a hint; Tokio does not expose an
    /// explicit backlog knob today, so this is read but only used for the
    /// startup log line until it does.
    #[serde(default = "default_backlog")]
    pub backlog: u32,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_to_file: false,
            backlog: default_backlog(),
        }
    }
}

impl DaemonConfig {
    /// Load `daemon.toml` from the current directory, falling back to
    /// defaults if it is absent or unreadable.
    pub fn load() -> Self {
        let path = std::path::Path::new("daemon.toml");
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
                log::warn!("ignoring malformed daemon.toml: {e}");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let cfg: DaemonConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.backlog, 20);
        assert!(!cfg.log_to_file);
    }

    #[test]
    fn parses_a_full_file() {
        let cfg: DaemonConfig =
            toml::from_str("log_level = \"debug\"\nlog_to_file = true\nbacklog = 64\n").unwrap();
        assert_eq!(cfg.log_level, "debug");
        assert!(cfg.log_to_file);
        assert_eq!(cfg.backlog, 64);
    }
}
