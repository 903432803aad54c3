//! In-memory traffic log exposed through the admin API.
//!
//! [`TrafficLog`] is a fixed-capacity ring-buffer: once full, the oldest entry
//! is evicted to make room for the newest. This gives a bounded, O(1) memory
//! footprint regardless of request volume.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::engine::types::{ForwardingAttempt, MediaType, RoutingDecision};

/// Fixed-capacity ring-buffer of recent [`TrafficEntry`] records.
///
/// Safe to share across threads via `Arc<TrafficLog>`. [`push`][Self::push] uses
/// a non-blocking `try_lock` so it never delays request handling; in the
/// unlikely event of lock contention the entry is silently dropped.
pub struct TrafficLog {
    capacity: usize,
    entries: Mutex<VecDeque<TrafficEntry>>,
}

impl TrafficLog {
    /// Create a new log with the given capacity.
    ///
    /// `capacity` is the maximum number of entries retained. Older entries are
    /// silently dropped once the buffer is full.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Record a completed request.
    ///
    /// This is a best-effort, non-blocking operation: if the mutex is contended
    /// the entry is dropped rather than blocking the request path.
    pub fn push(&self, entry: TrafficEntry) {
        if let Ok(mut entries) = self.entries.try_lock() {
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry);
        }
    }

    /// Return up to `limit` recent entries, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<TrafficEntry> {
        let entries = self.entries.lock().await;
        entries.iter().rev().take(limit).cloned().collect()
    }

    /// Compute aggregate statistics over all buffered entries.
    pub async fn stats(&self) -> TrafficStats {
        let entries = self.entries.lock().await;
        let total = entries.len();
        let avg_latency_ms = if total == 0 {
            0.0
        } else {
            entries.iter().map(|e| e.latency_ms as f64).sum::<f64>() / total as f64
        };

        let error_count = entries.iter().filter(|e| !e.success).count();
        let escalation_count = entries.iter().filter(|e| e.attempts.len() > 1).count();

        let mut backend_counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        for entry in entries.iter() {
            *backend_counts.entry(entry.backend.clone()).or_default() += 1;
        }

        TrafficStats {
            total_requests: total,
            error_count,
            escalation_count,
            avg_latency_ms,
            backend_counts,
        }
    }
}

/// A single request record — the routing decision plus every attempt made
/// while forwarding it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub client: Option<String>,
    pub requested_model: Option<String>,
    pub model_used: Option<String>,
    pub model_substituted: bool,
    pub media_type: Option<MediaType>,
    /// Backend that ultimately produced the returned response.
    pub backend: String,
    pub hints: Vec<String>,
    /// Every backend invocation made while handling this request, in order.
    pub attempts: Vec<ForwardingAttempt>,
    pub latency_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

impl TrafficEntry {
    pub fn new(backend: String, latency_ms: u64, success: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            client: None,
            requested_model: None,
            model_used: None,
            model_substituted: false,
            media_type: None,
            backend,
            hints: Vec::new(),
            attempts: Vec::new(),
            latency_ms,
            success,
            error: None,
        }
    }

    /// Build an entry from a completed [`RoutingDecision`] and its forwarding attempts.
    pub fn from_decision(decision: &RoutingDecision, attempts: Vec<ForwardingAttempt>, latency_ms: u64, success: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            client: None,
            requested_model: Some(decision.requested_model.clone()),
            model_used: Some(decision.model_used.clone()),
            model_substituted: decision.model_substituted,
            media_type: Some(decision.media_type),
            backend: decision.chosen_backend.clone(),
            hints: decision.hints.clone(),
            attempts,
            latency_ms,
            success,
            error: None,
        }
    }

    pub fn with_client(mut self, client: &str) -> Self {
        self.client = Some(client.to_string());
        self
    }

    pub fn with_error(mut self, err: &str) -> Self {
        self.error = Some(err.to_string());
        self.success = false;
        self
    }
}

/// Aggregate statistics derived from all buffered [`TrafficEntry`] records.
#[derive(Debug, Serialize)]
pub struct TrafficStats {
    pub total_requests: usize,
    /// Number of requests that returned an error.
    pub error_count: usize,
    /// Number of requests whose forwarding controller tried more than one backend.
    pub escalation_count: usize,
    pub avg_latency_ms: f64,
    pub backend_counts: std::collections::HashMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_entry(backend: &str, latency_ms: u64) -> TrafficEntry {
        TrafficEntry::new(backend.into(), latency_ms, true)
    }

    #[tokio::test]
    async fn push_and_retrieve_single_entry() {
        let log = TrafficLog::new(10);
        log.push(make_entry("igpu", 42));

        let recent = log.recent(10).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].backend, "igpu");
        assert_eq!(recent[0].latency_ms, 42);
    }

    #[tokio::test]
    async fn recent_returns_entries_newest_first() {
        let log = TrafficLog::new(10);
        log.push(make_entry("npu", 1));
        log.push(make_entry("igpu", 2));
        log.push(make_entry("nv", 3));

        let recent = log.recent(10).await;
        assert_eq!(recent[0].backend, "nv");
        assert_eq!(recent[1].backend, "igpu");
        assert_eq!(recent[2].backend, "npu");
    }

    #[tokio::test]
    async fn recent_limits_result_count() {
        let log = TrafficLog::new(20);
        for i in 0..10u64 {
            log.push(make_entry("igpu", i));
        }
        let recent = log.recent(3).await;
        assert_eq!(recent.len(), 3);
    }

    #[tokio::test]
    async fn oldest_entry_evicted_when_capacity_exceeded() {
        let log = TrafficLog::new(3);
        log.push(make_entry("oldest", 1));
        log.push(make_entry("middle", 2));
        log.push(make_entry("newest", 3));
        log.push(make_entry("extra", 4));

        let all = log.recent(100).await;
        assert_eq!(all.len(), 3);
        assert!(!all.iter().any(|e| e.backend == "oldest"));
        assert!(all.iter().any(|e| e.backend == "extra"));
    }

    #[tokio::test]
    async fn stats_on_empty_log() {
        let log = TrafficLog::new(10);
        let stats = log.stats().await;
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.avg_latency_ms, 0.0);
        assert!(stats.backend_counts.is_empty());
    }

    #[tokio::test]
    async fn stats_averages_latency_correctly() {
        let log = TrafficLog::new(10);
        log.push(make_entry("igpu", 100));
        log.push(make_entry("igpu", 200));
        log.push(make_entry("nv", 300));

        let stats = log.stats().await;
        assert_eq!(stats.total_requests, 3);
        assert!((stats.avg_latency_ms - 200.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn stats_counts_requests_per_backend() {
        let log = TrafficLog::new(10);
        log.push(make_entry("igpu", 10));
        log.push(make_entry("igpu", 20));
        log.push(make_entry("nv", 30));

        let stats = log.stats().await;
        assert_eq!(stats.backend_counts["igpu"], 2);
        assert_eq!(stats.backend_counts["nv"], 1);
    }

    #[tokio::test]
    async fn escalation_count_reflects_multi_attempt_entries() {
        let log = TrafficLog::new(10);
        let mut single = make_entry("igpu", 10);
        single.attempts = vec![ForwardingAttempt::succeeded("igpu", 10, 0.9, "ok")];
        log.push(single);

        let mut multi = make_entry("nv", 20);
        multi.attempts = vec![
            ForwardingAttempt::failed("npu", 5, "timeout"),
            ForwardingAttempt::succeeded("nv", 20, 0.9, "ok"),
        ];
        log.push(multi);

        let stats = log.stats().await;
        assert_eq!(stats.escalation_count, 1);
    }

    #[test]
    fn entry_has_unique_ids() {
        let a = make_entry("igpu", 1);
        let b = make_entry("igpu", 1);
        assert_ne!(a.id, b.id, "every entry must have a unique UUID");
    }

    #[test]
    fn entry_records_success_flag() {
        let ok = TrafficEntry::new("igpu".into(), 0, true);
        let err = TrafficEntry::new("igpu".into(), 0, false);
        assert!(ok.success);
        assert!(!err.success);
    }

    #[test]
    fn with_error_marks_entry_unsuccessful() {
        let entry = TrafficEntry::new("igpu".into(), 0, true).with_error("boom");
        assert!(!entry.success);
        assert_eq!(entry.error.as_deref(), Some("boom"));
    }
}
