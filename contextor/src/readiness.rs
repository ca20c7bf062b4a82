//! Readiness aggregation over independently failing dependencies.
//!
//! All probes run concurrently, each under its own timeout. The last report
//! is kept and served while younger than `fresh_for`; concurrent refreshes
//! coalesce into one probe round. A background poller keeps the snapshot
//! warm and stops on the shutdown signal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api_types::{DependencyHealth, DependencyStatus, Overall, ReadinessReport};
use crate::probes::Probe;

pub struct ReadinessAggregator {
    probes: Vec<Arc<dyn Probe>>,
    probe_timeout: Duration,
    fresh_for: Duration,
    snapshot: Mutex<Option<(Instant, ReadinessReport)>>,
    /// Completed probe rounds.
    rounds: AtomicU64,
    refresh_gate: tokio::sync::Mutex<()>,
}

impl ReadinessAggregator {
    pub fn new(probes: Vec<Arc<dyn Probe>>, probe_timeout: Duration, fresh_for: Duration) -> Self {
        Self {
            probes,
            probe_timeout,
            fresh_for,
            snapshot: Mutex::new(None),
            rounds: AtomicU64::new(0),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Last report, however old.
    pub fn snapshot(&self) -> Option<ReadinessReport> {
        self.lock_snapshot().as_ref().map(|(_, r)| r.clone())
    }

    fn lock_snapshot(&self) -> std::sync::MutexGuard<'_, Option<(Instant, ReadinessReport)>> {
        self.snapshot.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Cached report when fresh, otherwise a new probe round.
    pub async fn report(&self) -> ReadinessReport {
        let fresh = self
            .lock_snapshot()
            .as_ref()
            .filter(|(at, _)| at.elapsed() < self.fresh_for)
            .map(|(_, r)| r.clone());
        match fresh {
            Some(r) => r,
            None => self.refresh().await,
        }
    }

    /// Probes now. Callers that arrive while a round is running get its result.
    pub async fn refresh(&self) -> ReadinessReport {
        let seen = self.rounds.load(Ordering::Acquire);
        let _gate = self.refresh_gate.lock().await;
        if self.rounds.load(Ordering::Acquire) != seen {
            if let Some(r) = self.snapshot() {
                return r;
            }
        }

        let report = self.probe_round().await;

        let previous = self.lock_snapshot().replace((Instant::now(), report.clone()));
        self.rounds.fetch_add(1, Ordering::AcqRel);
        log_transitions(previous.as_ref().map(|(_, r)| r), &report);
        report
    }

    async fn probe_round(&self) -> ReadinessReport {
        let timeout = self.probe_timeout;
        let checks = self.probes.iter().map(|p| async move {
            let started = Instant::now();
            let outcome = match tokio::time::timeout(timeout, p.check(timeout)).await {
                Ok(res) => res,
                Err(_) => Err(format!("probe timed out after {} ms", timeout.as_millis())),
            };
            DependencyHealth {
                name: p.name().to_string(),
                status: if outcome.is_ok() {
                    DependencyStatus::Up
                } else {
                    DependencyStatus::Down
                },
                required: p.required(),
                last_checked_at: Utc::now(),
                latency_ms: started.elapsed().as_millis() as u64,
                last_error: outcome.err(),
            }
        });
        let dependencies = join_all(checks).await;

        let failing: Vec<String> = dependencies
            .iter()
            .filter(|d| d.required && d.status == DependencyStatus::Down)
            .map(|d| d.name.clone())
            .collect();

        ReadinessReport {
            overall: if failing.is_empty() {
                Overall::Ready
            } else {
                Overall::NotReady
            },
            failing,
            dependencies,
            checked_at: Utc::now(),
        }
    }

    /// Refreshes every `fresh_for` until `shutdown` flips to `true` or its
    /// sender is dropped.
    pub fn spawn_poller(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let agg = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(agg.fresh_for);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        agg.refresh().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("readiness poller stopped");
        })
    }
}

fn log_transitions(previous: Option<&ReadinessReport>, current: &ReadinessReport) {
    for dep in &current.dependencies {
        let was = previous
            .and_then(|p| p.dependencies.iter().find(|d| d.name == dep.name))
            .map(|d| d.status);
        match (was, dep.status) {
            (Some(DependencyStatus::Up) | None, DependencyStatus::Down) => warn!(
                dependency = %dep.name,
                required = dep.required,
                error = dep.last_error.as_deref().unwrap_or(""),
                "dependency down"
            ),
            (Some(DependencyStatus::Down), DependencyStatus::Up) => {
                info!(dependency = %dep.name, latency_ms = dep.latency_ms, "dependency recovered")
            }
            _ => {}
        }
    }
}
