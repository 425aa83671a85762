//! TaskRecord: the gateway-side mutable snapshot of a submitted task's
//! progress, created on `POST /generate` and mutated only by the monitor
//! loop polling (or receiving events from) its owning worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub gpu_device: u32,
    pub percentage: u8,
    pub status_text: String,
    pub preview: Option<String>,
    pub results: Vec<String>,
    pub finished: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(task_id: String, gpu_device: u32) -> Self {
        Self {
            task_id,
            gpu_device,
            percentage: 0,
            status_text: "Starting...".to_string(),
            preview: None,
            results: Vec::new(),
            finished: false,
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn apply_progress(&mut self, percentage: u8, status_text: String, preview: Option<String>) {
        self.percentage = percentage;
        self.status_text = status_text;
        self.preview = preview;
    }

    pub fn finish_ok(&mut self, results: Vec<String>) {
        self.percentage = 100;
        self.results = results;
        self.finished = true;
        self.status_text = "Finished".to_string();
        self.preview = None;
    }

    /// Terminal failure. `status_text` begins `"Error:"` per the worker
    /// protocol's error-reporting convention.
    pub fn finish_error(&mut self, message: String) {
        self.finished = true;
        self.status_text = format!("Error: {message}");
        self.error = Some(message);
        self.preview = None;
    }

    pub fn is_expired(&self, ttl_secs: i64) -> bool {
        self.finished && (Utc::now() - self.created_at).num_seconds() >= ttl_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_starts_unfinished() {
        let rec = TaskRecord::new("1".to_string(), 0);
        assert!(!rec.finished);
        assert_eq!(rec.percentage, 0);
    }

    #[test]
    fn finish_ok_sets_terminal_state() {
        let mut rec = TaskRecord::new("1".to_string(), 0);
        rec.finish_ok(vec!["2026-07-31/out.png".to_string()]);
        assert!(rec.finished);
        assert_eq!(rec.percentage, 100);
        assert_eq!(rec.results.len(), 1);
    }

    #[test]
    fn finish_error_prefixes_status_text() {
        let mut rec = TaskRecord::new("1".to_string(), 0);
        rec.finish_error("transport lost".to_string());
        assert!(rec.status_text.starts_with("Error:"));
        assert!(rec.finished);
    }
}
