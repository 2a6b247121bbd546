//! Logging sink behind the `log` facade.
//!
//! Lines look like `2026-08-01 12:34:56.789 [INF] veil_net::tls: message`
//! with the level tag ANSI-colored when stderr is a terminal. An optional
//! secondary file sink receives the same lines uncolored.

use crate::error::{Error, ErrorCode, Result};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal, Write};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

struct VeilLogger {
    level: LevelFilter,
    color: bool,
    file: Option<Mutex<File>>,
}

fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "ERR",
        Level::Warn => "WRN",
        Level::Info => "INF",
        Level::Debug | Level::Trace => "DBG",
    }
}

fn level_color(level: Level) -> &'static str {
    match level {
        Level::Error => "\x1b[31m",
        Level::Warn => "\x1b[33m",
        Level::Info => "\x1b[32m",
        Level::Debug | Level::Trace => "\x1b[36m",
    }
}

impl Log for VeilLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let stamp = timestamp();
        let tag = level_tag(record.level());

        let mut stderr = io::stderr().lock();
        if self.color {
            let _ = writeln!(
                stderr,
                "{} {}[{}]\x1b[0m {}: {}",
                stamp,
                level_color(record.level()),
                tag,
                record.target(),
                record.args()
            );
        } else {
            let _ = writeln!(stderr, "{} [{}] {}: {}", stamp, tag, record.target(), record.args());
        }

        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = writeln!(file, "{} [{}] {}: {}", stamp, tag, record.target(), record.args());
            }
        }
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

/// Installs the stderr logger. Fails if a logger is already installed.
pub fn init(level: LevelFilter) -> Result<()> {
    install(level, None)
}

/// Installs the stderr logger plus an append-mode file sink.
pub fn init_with_file(level: LevelFilter, path: &str) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|_| Error::internal(ErrorCode::LoggerFileFailed))?;
    install(level, Some(file))
}

fn install(level: LevelFilter, file: Option<File>) -> Result<()> {
    let logger = VeilLogger {
        level,
        color: io::stderr().is_terminal(),
        file: file.map(Mutex::new),
    };
    log::set_boxed_logger(Box::new(logger)).map_err(|_| Error::internal(ErrorCode::LoggerInitFailed))?;
    log::set_max_level(level);
    Ok(())
}

fn timestamp() -> String {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    let millis = now.subsec_millis();
    let secs = now.as_secs();
    let (year, month, day) = civil_from_days((secs / 86_400) as i64);
    let second_of_day = secs % 86_400;
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:03}",
        year,
        month,
        day,
        second_of_day / 3600,
        (second_of_day / 60) % 60,
        second_of_day % 60,
        millis
    )
}

/// Days since 1970-01-01 to (year, month, day), proleptic Gregorian.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let day_of_era = (z - era * 146_097) as u64;
    let year_of_era =
        (day_of_era - day_of_era / 1460 + day_of_era / 36_524 - day_of_era / 146_096) / 365;
    let year = year_of_era as i64 + era * 400;
    let day_of_year = day_of_era - (365 * year_of_era + year_of_era / 4 - year_of_era / 100);
    let mp = (5 * day_of_year + 2) / 153;
    let day = (day_of_year - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (year + (month <= 2) as i64, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn civil_date_conversion() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(365), (1971, 1, 1));
        assert_eq!(civil_from_days(11_016), (2000, 2, 29));
        assert_eq!(civil_from_days(11_017), (2000, 3, 1));
        assert_eq!(civil_from_days(20_665), (2026, 7, 31));
    }

    #[test]
    fn level_tags_match_the_wire_format() {
        assert_eq!(level_tag(Level::Error), "ERR");
        assert_eq!(level_tag(Level::Warn), "WRN");
        assert_eq!(level_tag(Level::Info), "INF");
        assert_eq!(level_tag(Level::Debug), "DBG");
        assert_eq!(level_tag(Level::Trace), "DBG");
    }

    #[test]
    fn timestamp_shape() {
        let stamp = timestamp();
        // YYYY-MM-DD HH:MM:SS.mmm
        assert_eq!(stamp.len(), 23);
        assert_eq!(&stamp[4..5], "-");
        assert_eq!(&stamp[10..11], " ");
        assert_eq!(&stamp[19..20], ".");
    }
}
