//! GPU scheduler: weighted round-robin device selection with busy
//! tracking, guarded by a single mutex over the full scheduling state.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuConfig {
    pub device: u32,
    pub name: String,
    pub weight: u32,
}

struct SchedulerState {
    configs: Vec<GpuConfig>,
    current_weights: Vec<i64>,
    busy: Vec<bool>,
}

/// Weighted round-robin GPU scheduler. All operations are O(N) in
/// device count and guarded by a single mutex; no operation holds the lock
/// across I/O.
pub struct Scheduler {
    state: Mutex<SchedulerState>,
}

impl Scheduler {
    pub fn new(configs: Vec<GpuConfig>) -> Self {
        let current_weights = configs.iter().map(|g| g.weight as i64).collect();
        let busy = vec![false; configs.len()];
        Self { state: Mutex::new(SchedulerState { configs, current_weights, busy }) }
    }

    pub fn is_enabled(&self) -> bool {
        !self.state.lock().unwrap().configs.is_empty()
    }

    pub fn count(&self) -> usize {
        self.state.lock().unwrap().configs.len()
    }

    pub fn devices(&self) -> Vec<GpuConfig> {
        self.state.lock().unwrap().configs.clone()
    }

    /// Select the next device by weighted round-robin. Returns `None` only
    /// when no devices are configured.
    pub fn select(&self) -> Option<u32> {
        let mut state = self.state.lock().unwrap();
        if state.configs.is_empty() {
            return None;
        }

        let mut best_idx: Option<usize> = None;
        let mut best_weight = i64::MIN;
        for i in 0..state.configs.len() {
            if !state.busy[i] && state.current_weights[i] > best_weight {
                best_idx = Some(i);
                best_weight = state.current_weights[i];
            }
        }

        // All devices busy: pick by residual weight alone, ties by lowest index.
        if best_idx.is_none() {
            for i in 0..state.configs.len() {
                if state.current_weights[i] > best_weight {
                    best_idx = Some(i);
                    best_weight = state.current_weights[i];
                }
            }
        }

        let idx = best_idx.unwrap_or(0);
        state.current_weights[idx] -= 1;

        if state.current_weights.iter().all(|w| *w <= 0) {
            let weights: Vec<i64> = state.configs.iter().map(|g| g.weight as i64).collect();
            state.current_weights = weights;
        }

        Some(state.configs[idx].device)
    }

    pub fn mark_busy(&self, device: u32, busy: bool) {
        let mut state = self.state.lock().unwrap();
        if let Some(i) = state.configs.iter().position(|g| g.device == device) {
            state.busy[i] = busy;
        }
    }

    pub fn is_busy(&self, device: u32) -> bool {
        let state = self.state.lock().unwrap();
        state
            .configs
            .iter()
            .position(|g| g.device == device)
            .map(|i| state.busy[i])
            .unwrap_or(false)
    }

    pub fn get_free(&self) -> Option<u32> {
        let state = self.state.lock().unwrap();
        state
            .configs
            .iter()
            .zip(state.busy.iter())
            .find(|(_, busy)| !**busy)
            .map(|(gpu, _)| gpu.device)
    }
}

/// Per-device weight based on VRAM, `max(1, total_memory_bytes / 4GiB)`,
/// mirroring `gpu_scheduler.py::_auto_detect_gpus`.
pub fn weight_from_memory(total_memory_bytes: u64) -> u32 {
    (total_memory_bytes / (4 * 1024 * 1024 * 1024)).max(1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_gpu_always_selected() {
        let sched = Scheduler::new(vec![GpuConfig { device: 0, name: "A".into(), weight: 1 }]);
        for _ in 0..5 {
            assert_eq!(sched.select(), Some(0));
        }
    }

    #[test]
    fn weighted_round_robin_respects_ratio_over_one_round() {
        let sched = Scheduler::new(vec![
            GpuConfig { device: 0, name: "A".into(), weight: 1 },
            GpuConfig { device: 1, name: "B".into(), weight: 3 },
        ]);
        let mut counts = [0u32; 2];
        for _ in 0..4 {
            let d = sched.select().unwrap();
            counts[d as usize] += 1;
        }
        assert_eq!(counts, [1, 3]);
    }

    #[test]
    fn all_busy_still_returns_highest_weight_device() {
        let sched = Scheduler::new(vec![
            GpuConfig { device: 0, name: "A".into(), weight: 1 },
            GpuConfig { device: 1, name: "B".into(), weight: 3 },
        ]);
        sched.mark_busy(0, true);
        sched.mark_busy(1, true);
        assert_eq!(sched.select(), Some(1));
    }

    #[test]
    fn round_resets_after_all_residuals_exhausted() {
        let sched = Scheduler::new(vec![
            GpuConfig { device: 0, name: "A".into(), weight: 1 },
            GpuConfig { device: 1, name: "B".into(), weight: 3 },
        ]);
        let first_round: Vec<u32> = (0..4).map(|_| sched.select().unwrap()).collect();
        let second_round: Vec<u32> = (0..4).map(|_| sched.select().unwrap()).collect();
        assert_eq!(first_round, second_round);
    }

    #[test]
    fn weight_from_memory_floors_at_one() {
        assert_eq!(weight_from_memory(1024), 1);
        assert_eq!(weight_from_memory(8 * 1024 * 1024 * 1024), 2);
    }
}
