//! Append-only JSON-lines audit log.
//!
//! One JSON object per dispatch call: ISO-8601 timestamp, operation name,
//! success flag, duration, and a caller-supplied detail value. Rotation and
//! retention live outside this crate.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
struct AuditRecord<'a> {
    timestamp: String,
    operation: &'a str,
    success: bool,
    duration_ms: f64,
    detail: &'a Value,
}

/// Serialized writer over one append-only log file.
pub struct AuditLog {
    file: Mutex<File>,
}

impl AuditLog {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Append one record. Serialization of the record itself cannot fail;
    /// only the write can.
    pub fn record(
        &self,
        operation: &str,
        success: bool,
        duration_ms: f64,
        detail: &Value,
    ) -> io::Result<()> {
        let record = AuditRecord {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            operation,
            success,
            duration_ms,
            detail,
        };
        let line = serde_json::to_string(&record).map_err(io::Error::other)?;
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(file, "{line}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_log_path(tag: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("dispatch-audit-{tag}-{}.jsonl", std::process::id()));
        path
    }

    #[test]
    fn records_are_one_json_object_per_line() {
        let path = temp_log_path("lines");
        let _ = std::fs::remove_file(&path);
        let log = AuditLog::open(&path).unwrap();

        log.record("assign-order", true, 12.5, &json!({"order_id": "ORD-1"}))
            .unwrap();
        log.record("assign-order", false, 3.0, &json!({"order_id": "ORD-2"}))
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in &lines {
            let value: Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["operation"], "assign-order");
            assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
        }
        let second: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["success"], false);
        assert_eq!(second["detail"]["order_id"], "ORD-2");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn reopening_appends_instead_of_truncating() {
        let path = temp_log_path("append");
        let _ = std::fs::remove_file(&path);
        {
            let log = AuditLog::open(&path).unwrap();
            log.record("batch", true, 1.0, &json!({})).unwrap();
        }
        {
            let log = AuditLog::open(&path).unwrap();
            log.record("batch", true, 2.0, &json!({})).unwrap();
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        let _ = std::fs::remove_file(&path);
    }
}
