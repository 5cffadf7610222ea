// Relay counters and process metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Samples kept for percentile calculation.
const MAX_LATENCY_SAMPLES: usize = 1000;

/// Running latency statistics for completed syntheses.
#[derive(Debug)]
pub struct LatencyStats {
    count: AtomicU64,
    total_ms: AtomicU64,
    min_ms: AtomicU64,
    max_ms: AtomicU64,
    samples: Mutex<VecDeque<u64>>,
}

impl LatencyStats {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            total_ms: AtomicU64::new(0),
            min_ms: AtomicU64::new(u64::MAX),
            max_ms: AtomicU64::new(0),
            samples: Mutex::new(VecDeque::with_capacity(MAX_LATENCY_SAMPLES)),
        }
    }

    pub fn record(&self, latency_ms: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.min_ms.fetch_min(latency_ms, Ordering::Relaxed);
        self.max_ms.fetch_max(latency_ms, Ordering::Relaxed);

        if let Ok(mut samples) = self.samples.lock() {
            if samples.len() == MAX_LATENCY_SAMPLES {
                samples.pop_front();
            }
            samples.push_back(latency_ms);
        }
    }

    pub fn avg_ms(&self) -> f64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        self.total_ms.load(Ordering::Relaxed) as f64 / count as f64
    }

    pub fn min_ms(&self) -> u64 {
        match self.min_ms.load(Ordering::Relaxed) {
            u64::MAX => 0,
            min => min,
        }
    }

    pub fn max_ms(&self) -> u64 {
        self.max_ms.load(Ordering::Relaxed)
    }

    pub fn percentile(&self, p: u8) -> u64 {
        let Ok(samples) = self.samples.lock() else {
            return 0;
        };
        if samples.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = samples.iter().copied().collect();
        sorted.sort_unstable();
        let index = (sorted.len() * p as usize / 100).min(sorted.len() - 1);
        sorted[index]
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters for the voice relay. Shared by every session.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    connections_opened: AtomicU64,
    sessions_closed: AtomicU64,
    tasks_aborted: AtomicU64,
    messages_rejected: AtomicU64,
    error_frames: AtomicU64,
    syntheses_started: AtomicU64,
    syntheses_completed: AtomicU64,
    syntheses_failed: AtomicU64,
    syntheses_cancelled: AtomicU64,
    chunks_sent: AtomicU64,
    bytes_sent: AtomicU64,
    synthesis_latency: LatencyStats,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connection(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_closed(&self, aborted_tasks: usize) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
        self.tasks_aborted
            .fetch_add(aborted_tasks as u64, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.messages_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error_frame(&self) {
        self.error_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_synthesis_started(&self) {
        self.syntheses_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_synthesis_completed(&self, elapsed: Duration) {
        self.syntheses_completed.fetch_add(1, Ordering::Relaxed);
        self.synthesis_latency.record(elapsed.as_millis() as u64);
    }

    pub fn record_synthesis_failed(&self) {
        self.syntheses_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_synthesis_cancelled(&self) {
        self.syntheses_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chunk(&self, bytes: usize) {
        self.chunks_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelaySnapshot {
        let latency = &self.synthesis_latency;
        RelaySnapshot {
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            tasks_aborted: self.tasks_aborted.load(Ordering::Relaxed),
            messages_rejected: self.messages_rejected.load(Ordering::Relaxed),
            error_frames: self.error_frames.load(Ordering::Relaxed),
            syntheses_started: self.syntheses_started.load(Ordering::Relaxed),
            syntheses_completed: self.syntheses_completed.load(Ordering::Relaxed),
            syntheses_failed: self.syntheses_failed.load(Ordering::Relaxed),
            syntheses_cancelled: self.syntheses_cancelled.load(Ordering::Relaxed),
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            synthesis_latency: LatencySnapshot {
                avg_ms: latency.avg_ms(),
                min_ms: latency.min_ms(),
                max_ms: latency.max_ms(),
                p50_ms: latency.percentile(50),
                p95_ms: latency.percentile(95),
                p99_ms: latency.percentile(99),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RelaySnapshot {
    pub connections_opened: u64,
    pub sessions_closed: u64,
    pub tasks_aborted: u64,
    pub messages_rejected: u64,
    pub error_frames: u64,
    pub syntheses_started: u64,
    pub syntheses_completed: u64,
    pub syntheses_failed: u64,
    pub syntheses_cancelled: u64,
    pub chunks_sent: u64,
    pub bytes_sent: u64,
    pub synthesis_latency: LatencySnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencySnapshot {
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f32,
    pub request_count: u64,
    pub uptime_seconds: u64,
    pub system_load: Option<f64>,
}

impl SystemMetrics {
    pub fn collect(request_count: u64, started_at: Instant) -> Self {
        let mut system = sysinfo::System::new();
        system.refresh_cpu();
        system.refresh_memory();

        let memory_used = system.used_memory();
        let memory_total = system.total_memory();
        let memory_usage_percent = if memory_total > 0 {
            (memory_used as f64 / memory_total as f64 * 100.0) as f32
        } else {
            0.0
        };

        let system_load = if cfg!(unix) {
            Some(sysinfo::System::load_average().one)
        } else {
            None
        };

        Self {
            cpu_usage_percent: system.global_cpu_info().cpu_usage(),
            memory_used_mb: memory_used / 1024 / 1024,
            memory_total_mb: memory_total / 1024 / 1024,
            memory_usage_percent,
            request_count,
            uptime_seconds: started_at.elapsed().as_secs(),
            system_load,
        }
    }
}

/// Body of `GET /metrics`.
#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub system: SystemMetrics,
    pub active_sessions: usize,
    pub relay: RelaySnapshot,
}
