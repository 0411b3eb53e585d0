//! Health prober
//!
//! Ephemeral per-host reachability verdicts. A probe flips the host to
//! `Checking`, asks the backend for a remote reachability check, and
//! records the verdict. Verdicts are client-side only and reset to
//! `Unset` whenever the host list reloads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, info};

use crate::api::ApiClient;
use crate::error::ConsoleError;
use crate::events::{ConsoleEvent, EventBus};

/// Probe verdict for a single host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    /// Never probed since the last list load
    Unset,
    Checking,
    Success,
    /// The remote check ran and reported the host unreachable
    Unreachable,
    /// The check itself failed (transport or backend error)
    Failed,
}

pub struct HealthProber {
    api: Arc<ApiClient>,
    events: EventBus,
    statuses: DashMap<i64, HostStatus>,
    /// Guards the bulk trigger while a probe-all join is outstanding
    bulk_in_flight: AtomicBool,
}

impl HealthProber {
    pub fn new(api: Arc<ApiClient>, events: EventBus) -> Self {
        Self {
            api,
            events,
            statuses: DashMap::new(),
            bulk_in_flight: AtomicBool::new(false),
        }
    }

    pub fn status(&self, host_id: i64) -> HostStatus {
        self.statuses
            .get(&host_id)
            .map(|s| *s)
            .unwrap_or(HostStatus::Unset)
    }

    /// Forget all verdicts (host list reloaded).
    pub fn reset(&self) {
        self.statuses.clear();
    }

    pub fn bulk_in_flight(&self) -> bool {
        self.bulk_in_flight.load(Ordering::Acquire)
    }

    fn set_status(&self, host_id: i64, status: HostStatus) {
        self.statuses.insert(host_id, status);
        self.events.emit(ConsoleEvent::HostStatus { host_id, status });
    }

    /// Probe one host. Always settles on a terminal verdict.
    pub async fn probe(&self, host_id: i64) -> HostStatus {
        self.set_status(host_id, HostStatus::Checking);

        let verdict = match self.api.ping_host(host_id).await {
            Ok(ack) if ack.success => HostStatus::Success,
            Ok(ack) => {
                debug!("host {} unreachable: {}", host_id, ack.message);
                HostStatus::Unreachable
            }
            Err(ConsoleError::Unauthorized) => {
                // Credentials already wiped; leave the verdict honest.
                HostStatus::Failed
            }
            Err(e) => {
                debug!("probe for host {} failed: {}", host_id, e);
                HostStatus::Failed
            }
        };

        self.set_status(host_id, verdict);
        verdict
    }

    /// Probe every given host concurrently and wait for all verdicts.
    /// Returns `None` when a bulk probe is already running; the caller
    /// keeps its trigger disabled until this resolves.
    pub async fn probe_all(&self, host_ids: &[i64]) -> Option<Vec<(i64, HostStatus)>> {
        if self
            .bulk_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("bulk probe already in flight, ignoring trigger");
            return None;
        }

        info!("probing {} hosts", host_ids.len());
        let probes = host_ids.iter().map(|&id| async move {
            let verdict = self.probe(id).await;
            (id, verdict)
        });
        let verdicts = join_all(probes).await;

        self.bulk_in_flight.store(false, Ordering::Release);
        Some(verdicts)
    }
}
