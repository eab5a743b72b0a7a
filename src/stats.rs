use crate::pipeline::Pass;
use serde::Serialize;

/// Counters for one pass over one dump file.
#[derive(Debug, Clone, Serialize)]
pub struct PassStats {
    pub pass: Pass,
    pub elements_seen: u64,
    pub accepted: u64,
    pub commits: u64,
    pub peak_nodes: usize,
    pub duration_secs: f64,
}

impl PassStats {
    pub fn new(pass: Pass) -> Self {
        Self {
            pass,
            elements_seen: 0,
            accepted: 0,
            commits: 0,
            peak_nodes: 0,
            duration_secs: 0.0,
        }
    }

    pub fn skipped(&self) -> u64 {
        self.elements_seen - self.accepted
    }
}

/// Per-pass results of a whole import, in execution order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportStats {
    pub passes: Vec<PassStats>,
}

impl ImportStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stats: PassStats) {
        self.passes.push(stats);
    }

    pub fn get(&self, pass: Pass) -> Option<&PassStats> {
        self.passes.iter().find(|p| p.pass == pass)
    }

    pub fn elements_seen(&self) -> u64 {
        self.passes.iter().map(|p| p.elements_seen).sum()
    }

    pub fn accepted(&self) -> u64 {
        self.passes.iter().map(|p| p.accepted).sum()
    }

    pub fn skipped(&self) -> u64 {
        self.passes.iter().map(PassStats::skipped).sum()
    }

    pub fn commits(&self) -> u64 {
        self.passes.iter().map(|p| p.commits).sum()
    }

    pub fn duration_secs(&self) -> f64 {
        self.passes.iter().map(|p| p.duration_secs).sum()
    }
}
