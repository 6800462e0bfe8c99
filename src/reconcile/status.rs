//! Status Aggregator: folds per-service observations into the sandbox status.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use crate::resources::WorkloadStatus;
use crate::spec::{Condition, ConditionStatus, SandboxStatus, ServiceStatus};

pub const READY_CONDITION: &str = "Ready";

pub const REASON_RECONCILED: &str = "Reconciled";
pub const REASON_NOT_READY: &str = "ServicesNotReady";
pub const REASON_FAILED: &str = "ReconcileFailed";

/// Tri-state readiness of one service's workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// At least one ready replica.
    Ready,
    /// No replicas observed at all: just created, or scaled to zero.
    Starting,
    /// Replicas exist but none is ready yet.
    NotReady,
}

impl Readiness {
    pub fn classify(status: &WorkloadStatus) -> Self {
        if status.ready_replicas > 0 {
            Readiness::Ready
        } else if status.replicas == 0 {
            Readiness::Starting
        } else {
            Readiness::NotReady
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Readiness::Ready => "ready",
            Readiness::Starting => "starting",
            Readiness::NotReady => "not ready",
        }
    }
}

impl From<Readiness> for ServiceStatus {
    fn from(readiness: Readiness) -> Self {
        ServiceStatus {
            ready: readiness == Readiness::Ready,
            message: readiness.message().to_string(),
        }
    }
}

/// Accumulates one pass worth of status.
///
/// Starts from the previously stored status, so entries the pass never
/// touches survive unchanged.
#[derive(Debug, Clone)]
pub struct StatusAggregator {
    status: SandboxStatus,
    services: BTreeSet<String>,
    failed: bool,
    failure: Option<String>,
}

impl StatusAggregator {
    /// `services` are the service names present in the current spec.
    pub fn new<'a>(prior: &SandboxStatus, services: impl IntoIterator<Item = &'a String>) -> Self {
        Self {
            status: prior.clone(),
            services: services.into_iter().cloned().collect(),
            failed: false,
            failure: None,
        }
    }

    /// Record a service observation. Last write wins.
    pub fn record(&mut self, service: &str, status: ServiceStatus) {
        self.status.services.insert(service.to_string(), status);
    }

    /// Record a per-service failure; the message carries the cause.
    pub fn record_failure(&mut self, service: &str, error: &dyn std::fmt::Display) {
        self.failed = true;
        self.record(
            service,
            ServiceStatus {
                ready: false,
                message: error.to_string(),
            },
        );
    }

    /// Record a failure that aborted the pass.
    pub fn record_fatal(&mut self, error: &dyn std::fmt::Display) {
        self.failed = true;
        self.failure = Some(error.to_string());
    }

    /// Drop entries for services no longer in the spec.
    pub fn forget_removed(&mut self) {
        let services = &self.services;
        self.status.services.retain(|name, _| services.contains(name));
    }

    /// Finish the pass: set the `Ready` condition and return the status.
    pub fn finish(mut self, now: DateTime<Utc>) -> SandboxStatus {
        let all_ready = self.services.iter().all(|name| {
            self.status
                .services
                .get(name)
                .is_some_and(|s| s.ready)
        });

        let (status, reason, message) = if self.failed {
            (
                ConditionStatus::False,
                REASON_FAILED,
                self.failure
                    .take()
                    .unwrap_or_else(|| "one or more services failed to reconcile".to_string()),
            )
        } else if all_ready {
            (
                ConditionStatus::True,
                REASON_RECONCILED,
                "all services are ready".to_string(),
            )
        } else {
            let waiting: Vec<&str> = self
                .services
                .iter()
                .filter(|name| !self.status.services.get(*name).is_some_and(|s| s.ready))
                .map(String::as_str)
                .collect();
            (
                ConditionStatus::False,
                REASON_NOT_READY,
                format!("waiting for {}", waiting.join(", ")),
            )
        };

        set_condition(
            &mut self.status.conditions,
            READY_CONDITION,
            status,
            reason,
            message,
            now,
        );
        self.status
    }
}

/// Upsert a condition; the transition time only moves when `status` flips.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: ConditionStatus,
    reason: &str,
    message: String,
    now: DateTime<Utc>,
) {
    match conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(existing) => {
            if existing.status != status {
                existing.last_transition_time = now;
            }
            existing.status = status;
            existing.reason = reason.to_string();
            existing.message = message;
        }
        None => conditions.push(Condition {
            type_: type_.to_string(),
            status,
            reason: reason.to_string(),
            message,
            last_transition_time: now,
        }),
    }
}
