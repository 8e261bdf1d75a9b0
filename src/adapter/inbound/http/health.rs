//! Liveness/readiness composition: `GET /health`.
//!
//! Aggregates per-subsystem probes. Overall status is `healthy` when every
//! probe passes, `degraded` when only non-critical probes fail, and
//! `unhealthy` when a critical probe fails (reported as 503).

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use diesel::prelude::*;
use serde::Serialize;

use crate::adapter::outbound::sqlite::database::connection::DbPool;
use crate::domain::account::Exchange;
use crate::port::outbound::exchange::AdapterFactory;
use crate::port::outbound::queue::{JobQueue, WorkKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct Probe {
    pub name: String,
    pub status: ProbeStatus,
    pub critical: bool,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: ProbeStatus,
    pub checks: Vec<Probe>,
}

impl HealthReport {
    /// Fold probe outcomes: any critical failure is unhealthy, any failure
    /// at all degrades.
    #[must_use]
    pub fn aggregate(checks: Vec<Probe>) -> Self {
        let mut status = ProbeStatus::Healthy;
        for probe in &checks {
            if probe.status != ProbeStatus::Healthy {
                if probe.critical {
                    status = ProbeStatus::Unhealthy;
                    break;
                }
                status = ProbeStatus::Degraded;
            }
        }
        Self { status, checks }
    }
}

/// Dependencies the health endpoint probes.
pub struct HealthState {
    pub pool: DbPool,
    pub queue: Arc<dyn JobQueue>,
    pub adapters: Arc<dyn AdapterFactory>,
    pub probe_exchanges: Vec<Exchange>,
    pub memory_limit_mb: u64,
    pub store_timeout: Duration,
}

impl HealthState {
    pub async fn report(&self) -> HealthReport {
        let mut checks = vec![self.probe_database().await, self.probe_queue(), self.probe_memory()];
        for exchange in &self.probe_exchanges {
            checks.push(self.probe_exchange(*exchange).await);
        }
        HealthReport::aggregate(checks)
    }

    async fn probe_database(&self) -> Probe {
        let started = Instant::now();
        let pool = self.pool.clone();
        let outcome = tokio::time::timeout(
            self.store_timeout,
            tokio::task::spawn_blocking(move || {
                let mut conn = pool.get().map_err(|e| e.to_string())?;
                diesel::sql_query("SELECT 1")
                    .execute(&mut conn)
                    .map_err(|e| e.to_string())
            }),
        )
        .await;

        let status = match &outcome {
            Ok(Ok(Ok(_))) => ProbeStatus::Healthy,
            _ => ProbeStatus::Unhealthy,
        };
        Probe {
            name: "database".into(),
            status,
            critical: true,
            response_time_ms: started.elapsed().as_millis() as u64,
            details: match outcome {
                Ok(Ok(Err(err))) => Some(err),
                Ok(Err(join)) => Some(join.to_string()),
                Err(_) => Some("probe timed out".into()),
                _ => None,
            },
        }
    }

    fn probe_queue(&self) -> Probe {
        let started = Instant::now();
        let execute_depth = self.queue.depth(WorkKind::Execute);
        let reconcile_depth = self.queue.depth(WorkKind::Reconcile);
        Probe {
            name: "queue".into(),
            status: ProbeStatus::Healthy,
            critical: true,
            response_time_ms: started.elapsed().as_millis() as u64,
            details: Some(format!(
                "execute depth {execute_depth}, reconcile depth {reconcile_depth}"
            )),
        }
    }

    fn probe_memory(&self) -> Probe {
        let started = Instant::now();
        let (status, details) = match resident_memory_mb() {
            Some(rss_mb) if rss_mb > self.memory_limit_mb => (
                ProbeStatus::Degraded,
                Some(format!("rss {rss_mb} MiB over limit {} MiB", self.memory_limit_mb)),
            ),
            Some(rss_mb) => (ProbeStatus::Healthy, Some(format!("rss {rss_mb} MiB"))),
            None => (ProbeStatus::Healthy, Some("rss unavailable".into())),
        };
        Probe {
            name: "memory".into(),
            status,
            critical: false,
            response_time_ms: started.elapsed().as_millis() as u64,
            details,
        }
    }

    async fn probe_exchange(&self, exchange: Exchange) -> Probe {
        let started = Instant::now();
        let outcome = match self.adapters.build_public(exchange) {
            Ok(adapter) => {
                tokio::time::timeout(Duration::from_secs(3), adapter.ping())
                    .await
                    .map_err(|_| "ping timed out".to_string())
                    .and_then(|r| r.map_err(|e| e.to_string()))
            }
            Err(err) => Err(err.to_string()),
        };
        Probe {
            name: format!("exchange_{exchange}"),
            status: if outcome.is_ok() {
                ProbeStatus::Healthy
            } else {
                ProbeStatus::Degraded
            },
            critical: false,
            response_time_ms: started.elapsed().as_millis() as u64,
            details: outcome.err(),
        }
    }
}

/// Resident set size from /proc, in MiB. Linux only; elsewhere unknown.
fn resident_memory_mb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|line| line.starts_with("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb / 1024)
}

pub async fn health(State(state): State<Arc<HealthState>>) -> Response {
    let report = state.report().await;
    let status = match report.status {
        ProbeStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(report)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(name: &str, status: ProbeStatus, critical: bool) -> Probe {
        Probe {
            name: name.into(),
            status,
            critical,
            response_time_ms: 1,
            details: None,
        }
    }

    #[test]
    fn all_healthy_aggregates_healthy() {
        let report = HealthReport::aggregate(vec![
            probe("database", ProbeStatus::Healthy, true),
            probe("exchange_binance", ProbeStatus::Healthy, false),
        ]);
        assert_eq!(report.status, ProbeStatus::Healthy);
    }

    #[test]
    fn non_critical_failure_degrades() {
        let report = HealthReport::aggregate(vec![
            probe("database", ProbeStatus::Healthy, true),
            probe("exchange_binance", ProbeStatus::Degraded, false),
        ]);
        assert_eq!(report.status, ProbeStatus::Degraded);
    }

    #[test]
    fn critical_failure_is_unhealthy() {
        let report = HealthReport::aggregate(vec![
            probe("database", ProbeStatus::Unhealthy, true),
            probe("exchange_binance", ProbeStatus::Healthy, false),
        ]);
        assert_eq!(report.status, ProbeStatus::Unhealthy);
    }

    #[test]
    fn report_serializes_per_probe_detail() {
        let report = HealthReport::aggregate(vec![probe("queue", ProbeStatus::Healthy, true)]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["checks"][0]["name"], "queue");
        assert!(json["checks"][0]["response_time_ms"].is_u64());
    }
}
