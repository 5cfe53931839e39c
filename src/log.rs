//! Logger setup (§2.1) — the headless counterpart of the teacher's
//! `setup_logger`: a terminal logger plus an optional file logger, no
//! frontend/backend target filtering since there is no embedded webview.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use simplelog::{ColorChoice, CombinedLogger, Config as LogConfig, LevelFilter, SharedLogger, TermLogger, TerminalMode, WriteLogger};

use crate::config::DaemonConfig;

pub fn setup_logger(images_folder: &Path, cfg: &DaemonConfig) -> Result<()> {
    let level = LevelFilter::from_str(&cfg.log_level).unwrap_or(LevelFilter::Info);

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        LogConfig::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];

    if cfg.log_to_file {
        let log_path = images_folder
            .parent()
            .unwrap_or(images_folder)
            .join("daemon.log");
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("creating log file at {}", log_path.display()))?;
        loggers.push(WriteLogger::new(level, LogConfig::default(), file));
    }

    CombinedLogger::init(loggers).context("installing combined logger")?;
    Ok(())
}
