use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use dispatch_core::metadata_store::MetadataStore;
use dispatch_core::scheduler::Scheduler;
use dispatch_core::task::TaskRecord;
use tokio::sync::RwLock;

use crate::supervisor::WorkerSupervisor;

pub type TaskMap = Arc<RwLock<HashMap<String, TaskRecord>>>;

#[derive(Clone)]
pub struct GatewayState {
    pub tasks: TaskMap,
    pub scheduler: Arc<Scheduler>,
    pub metadata: Arc<MetadataStore>,
    pub supervisor: Arc<RwLock<WorkerSupervisor>>,
    pub output_dir: PathBuf,
    pub task_ttl_secs: i64,
}

impl GatewayState {
    pub fn new(
        scheduler: Scheduler,
        metadata: MetadataStore,
        supervisor: WorkerSupervisor,
        output_dir: PathBuf,
        task_ttl_secs: i64,
    ) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            scheduler: Arc::new(scheduler),
            metadata: Arc::new(metadata),
            supervisor: Arc::new(RwLock::new(supervisor)),
            output_dir,
            task_ttl_secs,
        }
    }

    /// Process-local monotonic-ish task id, matching the reference
    /// implementation's millisecond timestamp with a collision-avoiding
    /// in-memory sequence.
    pub async fn next_task_id(&self) -> String {
        let mut candidate = now_millis();
        let tasks = self.tasks.read().await;
        while tasks.contains_key(&candidate.to_string()) {
            candidate += 1;
        }
        candidate.to_string()
    }

    pub async fn reap_expired_tasks(&self) {
        let mut tasks = self.tasks.write().await;
        tasks.retain(|_, rec| !rec.is_expired(self.task_ttl_secs));
    }
}

fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}
