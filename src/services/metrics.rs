//! Pipeline counters
//!
//! lock-free `AtomicU64` - 요청 경로에서 경합 없음

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::pipeline::{ErrorKind, Stage};

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    stages: [AtomicU64; Stage::ALL.len()],
    aborts: [AtomicU64; ErrorKind::ALL.len()],
    approved: AtomicU64,
    rejected: AtomicU64,
    latency_micros_total: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_stage(&self, stage: Stage) {
        self.stages[stage.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abort(&self, kind: ErrorKind) {
        self.aborts[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, approved: bool, latency_micros: u64) {
        if approved {
            self.approved.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
        self.latency_micros_total
            .fetch_add(latency_micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let stages = Stage::ALL
            .iter()
            .map(|s| (s.as_str(), self.stages[s.index()].load(Ordering::Relaxed)))
            .collect();
        let aborts = ErrorKind::ALL
            .iter()
            .map(|k| (k.as_str(), self.aborts[k.index()].load(Ordering::Relaxed)))
            .collect();

        let approved = self.approved.load(Ordering::Relaxed);
        let rejected = self.rejected.load(Ordering::Relaxed);
        let decided = approved + rejected;
        let avg_latency_micros = if decided == 0 {
            0
        } else {
            self.latency_micros_total.load(Ordering::Relaxed) / decided
        };

        MetricsSnapshot {
            stages,
            aborts,
            approved,
            rejected,
            avg_latency_micros,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// stage 도달 횟수
    pub stages: BTreeMap<&'static str, u64>,
    /// 에러 종류별 중단 횟수
    pub aborts: BTreeMap<&'static str, u64>,
    pub approved: u64,
    pub rejected: u64,
    pub avg_latency_micros: u64,
}
