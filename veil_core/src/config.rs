//! Runner configuration in a simple `key=value` file format.
//!
//! ```text
//! # veil.conf
//! log_level=debug
//! log_file=veil.log
//! online=true
//! ws_echo_url=wss://echo.websocket.org
//! ```

use crate::error::{Error, ErrorCode, Result};
use log::LevelFilter;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub log_level: LevelFilter,
    pub log_file: Option<String>,
    /// Enables the suites that need a live network.
    pub online: bool,
    pub ws_echo_url: String,
}

impl Default for RunnerConfig {
    fn default() -> RunnerConfig {
        RunnerConfig {
            log_level: LevelFilter::Info,
            log_file: None,
            online: false,
            ws_echo_url: "wss://echo.websocket.org".to_string(),
        }
    }
}

impl RunnerConfig {
    /// Loads from a `key=value` file. Unknown keys and malformed lines are
    /// errors; a missing file is not (defaults apply).
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<RunnerConfig> {
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(RunnerConfig::default())
            }
            Err(_) => return Err(Error::internal(ErrorCode::ConfigReadFailed)),
        };
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<RunnerConfig> {
        let mut config = RunnerConfig::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or(Error::internal(ErrorCode::ConfigParseFailed))?;
            let key = key.trim();
            let value = value.trim();

            match key {
                "log_level" => {
                    config.log_level = match value {
                        "off" => LevelFilter::Off,
                        "error" => LevelFilter::Error,
                        "warn" => LevelFilter::Warn,
                        "info" => LevelFilter::Info,
                        "debug" => LevelFilter::Debug,
                        "trace" => LevelFilter::Trace,
                        _ => return Err(Error::internal(ErrorCode::ConfigParseFailed)),
                    }
                }
                "log_file" => config.log_file = Some(value.to_string()),
                "online" => {
                    config.online = match value {
                        "true" | "1" => true,
                        "false" | "0" => false,
                        _ => return Err(Error::internal(ErrorCode::ConfigParseFailed)),
                    }
                }
                "ws_echo_url" => config.ws_echo_url = value.to_string(),
                _ => return Err(Error::internal(ErrorCode::ConfigUnknownKey)),
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_file() {
        let config = RunnerConfig::parse(
            "# comment\n\
             log_level=debug\n\
             log_file = out.log\n\
             online=true\n\
             ws_echo_url=wss://example.org/echo\n",
        )
        .unwrap();
        assert_eq!(config.log_level, LevelFilter::Debug);
        assert_eq!(config.log_file.as_deref(), Some("out.log"));
        assert!(config.online);
        assert_eq!(config.ws_echo_url, "wss://example.org/echo");
    }

    #[test]
    fn empty_input_yields_defaults() {
        let config = RunnerConfig::parse("").unwrap();
        assert_eq!(config.log_level, LevelFilter::Info);
        assert!(!config.online);
        assert!(config.log_file.is_none());
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        assert_eq!(
            RunnerConfig::parse("bogus=1").unwrap_err().code(),
            Some(ErrorCode::ConfigUnknownKey)
        );
        assert_eq!(
            RunnerConfig::parse("online=maybe").unwrap_err().code(),
            Some(ErrorCode::ConfigParseFailed)
        );
        assert_eq!(
            RunnerConfig::parse("no equals sign").unwrap_err().code(),
            Some(ErrorCode::ConfigParseFailed)
        );
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = RunnerConfig::load_from_file("/nonexistent/veil.conf").unwrap();
        assert!(!config.online);
    }
}
