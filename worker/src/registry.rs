//! Per-worker task registry: caches the latest progress frame for each
//! in-flight or recently finished task, independently of the gateway's own
//! TaskRecord map, and reaps finished entries after a fixed TTL.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dispatch_core::protocol::ProgressResponse;
use tokio::sync::RwLock;

struct Entry {
    progress: ProgressResponse,
    stop_flag: Arc<AtomicBool>,
    finished_at: Option<Instant>,
}

#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<RwLock<HashMap<String, Entry>>>,
    ttl: Duration,
}

impl TaskRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self { inner: Arc::new(RwLock::new(HashMap::new())), ttl }
    }

    pub async fn register(&self, task_id: &str) -> Arc<AtomicBool> {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let mut guard = self.inner.write().await;
        guard.insert(
            task_id.to_string(),
            Entry { progress: ProgressResponse::starting(), stop_flag: stop_flag.clone(), finished_at: None },
        );
        stop_flag
    }

    pub async fn update(&self, task_id: &str, progress: ProgressResponse) {
        let mut guard = self.inner.write().await;
        if let Some(entry) = guard.get_mut(task_id) {
            if progress.finished {
                entry.finished_at = Some(Instant::now());
            }
            entry.progress = progress;
        }
    }

    pub async fn get(&self, task_id: &str) -> Option<ProgressResponse> {
        self.inner.read().await.get(task_id).map(|e| e.progress.clone())
    }

    pub async fn stop_all(&self) -> u32 {
        let guard = self.inner.read().await;
        let mut count = 0;
        for entry in guard.values() {
            if !entry.progress.finished {
                entry.stop_flag.store(true, Ordering::Relaxed);
                count += 1;
            }
        }
        count
    }

    pub async fn reap_expired(&self) {
        let ttl = self.ttl;
        let mut guard = self.inner.write().await;
        guard.retain(|_, entry| match entry.finished_at {
            Some(at) => at.elapsed() < ttl,
            None => true,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_get_returns_starting_state() {
        let reg = TaskRegistry::new(Duration::from_secs(60));
        reg.register("t1").await;
        let progress = reg.get("t1").await.unwrap();
        assert_eq!(progress.percentage, 0);
        assert!(!progress.finished);
    }

    #[tokio::test]
    async fn stop_all_sets_flag_for_unfinished_tasks() {
        let reg = TaskRegistry::new(Duration::from_secs(60));
        let flag = reg.register("t1").await;
        let stopped = reg.stop_all().await;
        assert_eq!(stopped, 1);
        assert!(flag.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn reap_expired_removes_finished_past_ttl() {
        let reg = TaskRegistry::new(Duration::from_millis(10));
        reg.register("t1").await;
        reg.update("t1", ProgressResponse { finished: true, ..ProgressResponse::starting() }).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        reg.reap_expired().await;
        assert!(reg.get("t1").await.is_none());
    }
}
