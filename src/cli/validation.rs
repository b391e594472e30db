//! CLI argument validation functions
//!
//! Value parsers for arguments clap cannot check on its own.

use std::fs;
use std::path::PathBuf;

use jiff::Timestamp;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::jobs::JobKind;

/// Validate that a file path is accessible (exists and is readable)
pub fn validate_config_file_path(path_str: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(format!("File does not exist: '{}'", path_str));
    }

    if !path.is_file() {
        return Err(format!("Path is not a file: '{}'", path_str));
    }

    match fs::File::open(&path) {
        Ok(_) => Ok(path),
        Err(e) => Err(format!("Cannot read file '{}': {}", path_str, e)),
    }
}

/// Validate rollback steps is a positive number
pub fn validate_rollback_steps(steps_str: &str) -> Result<u32, String> {
    let steps: u32 = steps_str.parse().map_err(|_| {
        format!(
            "Rollback steps must be a valid positive number, got: '{}'",
            steps_str
        )
    })?;

    if steps == 0 {
        return Err("Rollback steps must be greater than 0".to_string());
    }

    // Reasonable upper limit to prevent accidental mass rollbacks
    if steps > 100 {
        return Err("Rollback steps cannot exceed 100 for safety reasons".to_string());
    }

    Ok(steps)
}

pub fn validate_job_kind(kind_str: &str) -> Result<JobKind, String> {
    kind_str.parse().map_err(|_| {
        let known: Vec<&str> = JobKind::ALL.iter().map(JobKind::as_str).collect();
        format!(
            "Unknown job kind '{}'. Known kinds: {}",
            kind_str,
            known.join(", ")
        )
    })
}

pub fn validate_json(json_str: &str) -> Result<JsonValue, String> {
    serde_json::from_str(json_str).map_err(|e| format!("Invalid JSON: {}", e))
}

/// RFC 3339 instant, e.g. `2026-01-01T09:30:00Z`
pub fn validate_timestamp(ts_str: &str) -> Result<Timestamp, String> {
    ts_str.parse().map_err(|e| {
        format!(
            "Invalid timestamp '{}' (expected RFC 3339 such as 2026-01-01T09:30:00Z): {}",
            ts_str, e
        )
    })
}

pub fn validate_uuid(id_str: &str) -> Result<Uuid, String> {
    Uuid::parse_str(id_str.trim()).map_err(|_| format!("Invalid id '{}': expected a UUID", id_str))
}

/// Same range the queue accepts at submission
pub fn validate_max_attempts(attempts_str: &str) -> Result<u32, String> {
    let attempts: u32 = attempts_str
        .parse()
        .map_err(|_| format!("Max attempts must be a number, got: '{}'", attempts_str))?;

    if !(1..=100).contains(&attempts) {
        return Err("Max attempts must be between 1 and 100".to_string());
    }

    Ok(attempts)
}
