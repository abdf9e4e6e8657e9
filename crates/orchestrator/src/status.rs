use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkerState {
    Running,
    Stopped,
    Failed { error: String },
}

/// Liveness of each supervised worker, written by the supervisor.
#[derive(Debug, Default)]
pub struct WorkerTable {
    workers: RwLock<BTreeMap<&'static str, WorkerState>>,
}

impl WorkerTable {
    pub fn set(&self, name: &'static str, state: WorkerState) {
        self.workers.write().insert(name, state);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<WorkerState> {
        self.workers.read().get(name).cloned()
    }

    #[must_use]
    pub fn all_running(&self) -> bool {
        let workers = self.workers.read();
        !workers.is_empty() && workers.values().all(|s| *s == WorkerState::Running)
    }

    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, WorkerState> {
        self.workers
            .read()
            .iter()
            .map(|(name, state)| ((*name).to_string(), state.clone()))
            .collect()
    }
}

/// Point-in-time view of the pipeline for health checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub healthy: bool,
    pub shutting_down: bool,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub workers: BTreeMap<String, WorkerState>,
    pub pending_requests: usize,
    pub tracked_orders: usize,
    pub candle_repositories: usize,
}
