//! Inspector: the process-wide recorder of inbound/outbound RPC traffic, a bounded ring
//! buffer of events, aggregated per-method statistics, and a websocket broadcast hub.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use sysinfo::{Disks, System};
use tokio::sync::{mpsc, RwLock};

use crate::types::{Direction, MethodStats, PerformanceMetrics, RpcEvent, SystemMetrics};

const DEFAULT_CAPACITY: usize = 1_000;

/// Envelope broadcast to every connected websocket subscriber on each `log` call.
#[derive(Debug, Clone, Serialize)]
pub struct Broadcast {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: RpcEvent,
}

#[derive(Debug)]
struct State {
    events: VecDeque<RpcEvent>,
    metrics: PerformanceMetrics,
    recording: bool,
}

/// A websocket subscriber's outbound channel. Subscribers whose send fails are dropped
/// on the next broadcast.
pub type Subscriber = mpsc::UnboundedSender<String>;

/// In-memory, single-writer observer shared across the RPC front-end, command router,
/// and dashboard endpoint.
#[derive(Debug)]
pub struct Inspector {
    state: RwLock<State>,
    capacity: usize,
    subscribers: RwLock<Vec<Subscriber>>,
    recording_flag: AtomicBool,
}

impl Inspector {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Inspector {
            state: RwLock::new(State {
                events: VecDeque::with_capacity(capacity),
                metrics: PerformanceMetrics::default(),
                recording: true,
            }),
            capacity,
            subscribers: RwLock::new(Vec::new()),
            recording_flag: AtomicBool::new(true),
        })
    }

    /// The single write entry point. Constructs an `RPCEvent`, appends it to the ring
    /// buffer (evicting the oldest entry on overflow), updates the running metrics, and
    /// broadcasts the event to every connected subscriber.
    pub async fn log(
        &self,
        direction: Direction,
        method: Option<String>,
        id: Option<serde_json::Value>,
        content: serde_json::Value,
        execution_time_ms: Option<f64>,
        error: Option<String>,
    ) {
        if !self.recording_flag.load(Ordering::Relaxed) {
            return;
        }

        let message_type = method.clone().unwrap_or_else(|| "response".to_string());
        let event = RpcEvent {
            timestamp: now_secs(),
            direction,
            message_type,
            method,
            id,
            content,
            execution_time_ms,
            error,
        };

        {
            let mut state = self.state.write().await;
            if state.events.len() >= self.capacity {
                state.events.pop_front();
            }
            state.events.push_back(event.clone());
            update_metrics(&mut state.metrics, &event);
        }

        self.broadcast(event).await;
    }

    async fn broadcast(&self, event: RpcEvent) {
        let envelope = Broadcast {
            kind: "mcp_message",
            data: event,
        };
        let Ok(text) = serde_json::to_string(&envelope) else {
            return;
        };

        let mut subs = self.subscribers.write().await;
        subs.retain(|tx| tx.send(text.clone()).is_ok());
    }

    pub async fn subscribe(&self, tx: Subscriber) {
        self.subscribers.write().await.push(tx);
    }

    /// Returns up to `limit` most recent messages plus the current metrics snapshot.
    pub async fn recent_messages(&self, limit: usize) -> (Vec<RpcEvent>, PerformanceMetrics) {
        let state = self.state.read().await;
        let start = state.events.len().saturating_sub(limit);
        let messages = state.events.iter().skip(start).cloned().collect();
        (messages, state.metrics.clone())
    }

    pub async fn get_metrics(&self) -> PerformanceMetrics {
        self.state.read().await.metrics.clone()
    }

    /// Samples host CPU/memory/disk usage. Refreshed on every call rather than cached,
    /// so repeated reads reflect current host load.
    pub fn get_system_metrics(&self) -> SystemMetrics {
        let mut sys = System::new();
        sys.refresh_cpu();
        sys.refresh_memory();
        let disks = Disks::new_with_refreshed_list();

        let cpu_percent = if sys.cpus().is_empty() {
            0.0
        } else {
            sys.cpus().iter().map(|c| c.cpu_usage()).sum::<f32>() / sys.cpus().len() as f32
        };

        let memory_percent = if sys.total_memory() == 0 {
            0.0
        } else {
            (sys.used_memory() as f32 / sys.total_memory() as f32) * 100.0
        };

        let disk_percent = disks
            .first()
            .filter(|d| d.total_space() > 0)
            .map(|d| {
                let used = d.total_space() - d.available_space();
                (used as f32 / d.total_space() as f32) * 100.0
            })
            .unwrap_or(0.0);

        SystemMetrics {
            cpu_percent,
            memory_percent,
            disk_percent,
        }
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.events.clear();
    }

    pub async fn toggle_recording(&self) -> bool {
        let mut state = self.state.write().await;
        state.recording = !state.recording;
        self.recording_flag.store(state.recording, Ordering::Relaxed);
        state.recording
    }

    pub async fn is_recording(&self) -> bool {
        self.state.read().await.recording
    }
}

fn update_metrics(metrics: &mut PerformanceMetrics, event: &RpcEvent) {
    metrics.total_messages += 1;

    if event.error.is_some() {
        metrics.error_count += 1;
    }

    if let Some(t) = event.execution_time_ms {
        let total = metrics.total_messages as f64;
        metrics.avg_response_time = (metrics.avg_response_time * (total - 1.0) + t) / total;
    }

    if let Some(method) = &event.method {
        let stats = metrics
            .method_stats
            .entry(method.clone())
            .or_insert_with(MethodStats::default);
        stats.count += 1;
        if let Some(t) = event.execution_time_ms {
            stats.total_time_ms += t;
            stats.avg_time_ms = stats.total_time_ms / stats.count as f64;
        }
        if event.error.is_some() {
            stats.errors += 1;
        }
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn ring_buffer_evicts_oldest() {
        let inspector = Inspector::with_capacity(3);
        for i in 0..5 {
            inspector
                .log(Direction::Inbound, Some("m".into()), None, json!({"i": i}), None, None)
                .await;
        }
        let (messages, _) = inspector.recent_messages(10).await;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content["i"], 2);
        assert_eq!(messages[2].content["i"], 4);
    }

    #[tokio::test]
    async fn avg_response_time_is_mean() {
        let inspector = Inspector::new();
        inspector
            .log(Direction::Outbound, Some("m".into()), None, json!({}), Some(10.0), None)
            .await;
        inspector
            .log(Direction::Outbound, Some("m".into()), None, json!({}), Some(20.0), None)
            .await;
        let metrics = inspector.get_metrics().await;
        assert!((metrics.avg_response_time - 15.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn toggle_recording_suppresses_logging() {
        let inspector = Inspector::new();
        assert!(inspector.is_recording().await);
        let now_off = inspector.toggle_recording().await;
        assert!(!now_off);
        inspector
            .log(Direction::Inbound, Some("m".into()), None, json!({}), None, None)
            .await;
        let (messages, _) = inspector.recent_messages(10).await;
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn clear_empties_buffer_but_keeps_metrics() {
        let inspector = Inspector::new();
        inspector
            .log(Direction::Inbound, Some("m".into()), None, json!({}), None, None)
            .await;
        inspector.clear().await;
        let (messages, metrics) = inspector.recent_messages(10).await;
        assert!(messages.is_empty());
        assert_eq!(metrics.total_messages, 1);
    }
}
