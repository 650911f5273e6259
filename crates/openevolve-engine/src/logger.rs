use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

/// One parsed run-log line.
#[derive(Clone, Debug, Serialize)]
pub struct LogRecord {
    pub timestamp: i64,
    pub level: String,
    pub source: String,
    pub message: String,
}

/// Append-only per-run log writing `[<unix-seconds>] [<LEVEL>] <message>`
/// lines, mirrored to `tracing`.
pub struct RunLogger {
    path: PathBuf,
    file: Mutex<File>,
}

impl RunLogger {
    pub fn create(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&self, level: &str, message: &str) {
        match level {
            "ERROR" => error!("{}", message),
            "WARN" => warn!("{}", message),
            "DEBUG" => debug!("{}", message),
            _ => info!("{}", message),
        }
        let line = format!(
            "[{}] [{}] {}\n",
            chrono::Utc::now().timestamp(),
            level,
            message
        );
        if let Ok(mut file) = self.file.lock() {
            let _ = file.write_all(line.as_bytes());
        }
    }

    pub fn info(&self, message: &str) {
        self.log("INFO", message);
    }

    pub fn warn(&self, message: &str) {
        self.log("WARN", message);
    }

    pub fn error(&self, message: &str) {
        self.log("ERROR", message);
    }

    /// Read a run log back into structured records. Lines that do not
    /// match the format become fallback records.
    pub fn read_records(path: &Path) -> std::io::Result<Vec<LogRecord>> {
        let raw = std::fs::read_to_string(path)?;
        Ok(raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_line)
            .collect())
    }
}

fn parse_line(line: &str) -> LogRecord {
    let fallback = || LogRecord {
        timestamp: 0,
        level: "info".to_string(),
        source: "unknown".to_string(),
        message: line.to_string(),
    };

    let Some(rest) = line.strip_prefix('[') else {
        return fallback();
    };
    let Some((timestamp_str, rest)) = rest.split_once(']') else {
        return fallback();
    };
    let Ok(timestamp) = timestamp_str.trim().parse::<i64>() else {
        return fallback();
    };
    let rest = rest.trim_start();
    let Some(rest) = rest.strip_prefix('[') else {
        return fallback();
    };
    let Some((level, message)) = rest.split_once(']') else {
        return fallback();
    };
    LogRecord {
        timestamp,
        level: level.trim().to_ascii_lowercase(),
        source: "engine".to_string(),
        message: message.trim_start().to_string(),
    }
}
