//! Append-only JSONL provenance log, one per stack.

use crate::core::error::Result;
use crate::core::types::{ProvenanceEvent, TimestampedEvent};
use std::io::Write;
use std::path::{Path, PathBuf};

/// UTC timestamp, second precision, e.g. `2026-10-16T09:30:00Z`.
pub fn now_iso8601() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}

/// Run id shared by every event of one deploy or destroy.
pub fn generate_run_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("r-{}", &id[..12])
}

pub fn event_log_path(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(stack).join("events.jsonl")
}

pub fn append_event(state_dir: &Path, stack: &str, event: ProvenanceEvent) -> Result<()> {
    let path = event_log_path(state_dir, stack);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let te = TimestampedEvent {
        ts: now_iso8601(),
        event,
    };
    let json = serde_json::to_string(&te)?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    writeln!(file, "{}", json)?;
    tracing::debug!(path = %path.display(), "event appended");
    Ok(())
}

/// Every event recorded for a stack, oldest first. A missing log is empty.
pub fn read_events(state_dir: &Path, stack: &str) -> Result<Vec<TimestampedEvent>> {
    let path = event_log_path(state_dir, stack);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path)?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(Into::into))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_iso8601() {
        let ts = now_iso8601();
        assert!(ts.starts_with("20"));
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), 20);
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }

    #[test]
    fn test_generate_run_id() {
        let a = generate_run_id();
        let b = generate_run_id();
        assert!(a.starts_with("r-"));
        assert_eq!(a.len(), 14);
        assert_ne!(a, b);
    }

    #[test]
    fn test_event_log_path() {
        let p = event_log_path(Path::new("/state"), "CodeRefactorInfra");
        assert_eq!(p, PathBuf::from("/state/CodeRefactorInfra/events.jsonl"));
    }

    #[test]
    fn test_append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        append_event(
            dir.path(),
            "CodeRefactorInfra",
            ProvenanceEvent::DeployStarted {
                stack: "CodeRefactorInfra".to_string(),
                run_id: "r-abc".to_string(),
                version: "0.3.0".to_string(),
                template_hash: "blake3:xxx".to_string(),
            },
        )
        .unwrap();
        append_event(
            dir.path(),
            "CodeRefactorInfra",
            ProvenanceEvent::DeployFailed {
                stack: "CodeRefactorInfra".to_string(),
                run_id: "r-abc".to_string(),
                error: "exit 255".to_string(),
            },
        )
        .unwrap();

        let content =
            std::fs::read_to_string(dir.path().join("CodeRefactorInfra/events.jsonl")).unwrap();
        assert!(content.contains("deploy_started"));
        let events = read_events(dir.path(), "CodeRefactorInfra").unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1].event, ProvenanceEvent::DeployFailed { .. }));
    }

    #[test]
    fn test_read_missing_log() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_events(dir.path(), "ghost").unwrap().is_empty());
    }
}
