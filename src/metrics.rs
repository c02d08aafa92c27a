//! Prometheus-compatible metrics endpoint
//!
//! Exposes authority and population counters in Prometheus format.
//! Default endpoint: http://localhost:9090/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Metrics registry shared by every session in the process
#[derive(Debug)]
pub struct Metrics {
    // Ledger
    pub kills_applied: AtomicU64,
    pub score_deltas_applied: AtomicU64,
    pub duplicates_absorbed: AtomicU64,
    pub requests_rejected: AtomicU64,
    pub requests_deferred: AtomicU64,

    // Population
    pub agents_spawned: AtomicU64,
    pub agents_despawned: AtomicU64,
    pub dead_agents_cleaned: AtomicU64,
    pub orphans_adopted: AtomicU64,
    pub real_players: AtomicU64,
    pub fill_agents: AtomicU64,
    pub fill_agent_target: AtomicU64,

    // Authority
    pub elections: AtomicU64,
    pub recoveries: AtomicU64,
    pub resyncs: AtomicU64,

    // Network
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,

    // Tick timing (microseconds)
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_count: AtomicU64,

    start_time: Instant,
    tick_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            kills_applied: AtomicU64::new(0),
            score_deltas_applied: AtomicU64::new(0),
            duplicates_absorbed: AtomicU64::new(0),
            requests_rejected: AtomicU64::new(0),
            requests_deferred: AtomicU64::new(0),
            agents_spawned: AtomicU64::new(0),
            agents_despawned: AtomicU64::new(0),
            dead_agents_cleaned: AtomicU64::new(0),
            orphans_adopted: AtomicU64::new(0),
            real_players: AtomicU64::new(0),
            fill_agents: AtomicU64::new(0),
            fill_agent_target: AtomicU64::new(0),
            elections: AtomicU64::new(0),
            recoveries: AtomicU64::new(0),
            resyncs: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(1000)),
        }
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Record a tick time and update the p95
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > 1000 {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();
            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            self.tick_time_p95_us
                .store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn samples(&self) -> [(&'static str, &'static str, &'static str, u64); 21] {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        [
            ("kills_applied_total", "counter", "Confirmed kills applied to the ledger", load(&self.kills_applied)),
            ("score_deltas_applied_total", "counter", "Score deltas applied to the ledger", load(&self.score_deltas_applied)),
            ("duplicates_absorbed_total", "counter", "Retransmitted events discarded by the dedup filter", load(&self.duplicates_absorbed)),
            ("requests_rejected_total", "counter", "Mutation requests refused", load(&self.requests_rejected)),
            ("requests_deferred_total", "counter", "Requests deferred during authority migration", load(&self.requests_deferred)),
            ("agents_spawned_total", "counter", "Fill agents spawned", load(&self.agents_spawned)),
            ("agents_despawned_total", "counter", "Excess fill agents despawned", load(&self.agents_despawned)),
            ("dead_agents_cleaned_total", "counter", "Dead fill agents destroyed", load(&self.dead_agents_cleaned)),
            ("orphans_adopted_total", "counter", "Orphaned fill agents adopted", load(&self.orphans_adopted)),
            ("real_players", "gauge", "Real players in the room", load(&self.real_players)),
            ("fill_agents", "gauge", "Live fill agents after last reconcile", load(&self.fill_agents)),
            ("fill_agent_target", "gauge", "Fill agent target count", load(&self.fill_agent_target)),
            ("elections_total", "counter", "Times this process was elected authority", load(&self.elections)),
            ("recoveries_total", "counter", "Recovery procedures completed", load(&self.recoveries)),
            ("resyncs_total", "counter", "Full state re-broadcasts", load(&self.resyncs)),
            ("messages_sent_total", "counter", "Events sent", load(&self.messages_sent)),
            ("messages_received_total", "counter", "Events received", load(&self.messages_received)),
            ("tick_time_microseconds", "gauge", "Last tick time in microseconds", load(&self.tick_time_us)),
            ("tick_time_p95_microseconds", "gauge", "95th percentile tick time", load(&self.tick_time_p95_us)),
            ("tick_count", "counter", "Total ticks processed", load(&self.tick_count)),
            ("uptime_seconds", "counter", "Process uptime in seconds", self.uptime_seconds()),
        ]
    }

    /// Prometheus text exposition, every sample prefixed with `match_`
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);
        for (name, kind, help, value) in self.samples() {
            output.push_str(&format!(
                "# HELP match_{name} {help}\n# TYPE match_{name} {kind}\nmatch_{name} {value}\n"
            ));
        }
        output
    }

    /// Generate JSON format metrics
    pub fn to_json(&self) -> String {
        let value = serde_json::json!({
            "ledger": {
                "kills_applied": self.kills_applied.load(Ordering::Relaxed),
                "score_deltas_applied": self.score_deltas_applied.load(Ordering::Relaxed),
                "duplicates_absorbed": self.duplicates_absorbed.load(Ordering::Relaxed),
                "requests_rejected": self.requests_rejected.load(Ordering::Relaxed),
                "requests_deferred": self.requests_deferred.load(Ordering::Relaxed),
            },
            "population": {
                "spawned": self.agents_spawned.load(Ordering::Relaxed),
                "despawned": self.agents_despawned.load(Ordering::Relaxed),
                "dead_cleaned": self.dead_agents_cleaned.load(Ordering::Relaxed),
                "orphans_adopted": self.orphans_adopted.load(Ordering::Relaxed),
                "real_players": self.real_players.load(Ordering::Relaxed),
                "fill_agents": self.fill_agents.load(Ordering::Relaxed),
                "target": self.fill_agent_target.load(Ordering::Relaxed),
            },
            "authority": {
                "elections": self.elections.load(Ordering::Relaxed),
                "recoveries": self.recoveries.load(Ordering::Relaxed),
                "resyncs": self.resyncs.load(Ordering::Relaxed),
            },
            "network": {
                "messages_sent": self.messages_sent.load(Ordering::Relaxed),
                "messages_received": self.messages_received.load(Ordering::Relaxed),
            },
            "performance": {
                "tick_time_us": self.tick_time_us.load(Ordering::Relaxed),
                "tick_time_p95_us": self.tick_time_p95_us.load(Ordering::Relaxed),
                "tick_count": self.tick_count.load(Ordering::Relaxed),
                "uptime_seconds": self.uptime_seconds(),
            },
        });
        serde_json::to_string_pretty(&value).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn http_response(content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        content_type,
        body.len(),
        body
    )
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);

                    let response = if request.starts_with("GET /metrics/json") {
                        http_response("application/json", &metrics.to_json())
                    } else if request.starts_with("GET /metrics") {
                        http_response("text/plain; version=0.0.4", &metrics.to_prometheus())
                    } else if request.starts_with("GET /health") {
                        http_response("text/plain", "OK")
                    } else {
                        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                    };

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.kills_applied.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_record_tick_time() {
        let metrics = Metrics::new();
        for i in 0..100 {
            metrics.record_tick_time(Duration::from_micros(100 + i * 10));
        }

        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 100);
        assert!(metrics.tick_time_p95_us.load(Ordering::Relaxed) >= 1000);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        Metrics::add(&metrics.kills_applied, 3);
        metrics.fill_agent_target.store(4, Ordering::Relaxed);

        let output = metrics.to_prometheus();

        assert!(output.contains("match_kills_applied_total 3"));
        assert!(output.contains("match_fill_agent_target 4"));
        assert!(output.contains("# TYPE match_kills_applied_total counter"));
    }

    #[test]
    fn test_json_format() {
        let metrics = Metrics::new();
        Metrics::incr(&metrics.recoveries);

        let parsed: serde_json::Value = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(parsed["authority"]["recoveries"], 1);
    }
}
