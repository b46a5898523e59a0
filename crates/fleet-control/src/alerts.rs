//! Resource alerting with hysteresis and a cooldown.
//!
//! Each of load, memory and disk has an independent alert flag per server.
//! A flag turns on when a sample is strictly above the threshold and turns
//! off when a sample is at or below it. The cooldown only rate-limits "high"
//! notifications; it never holds back a flag change.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use fleet_core::ServerId;
use fleet_store::{Server, Store};
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, Result};
use crate::locks::StripedLocks;
use crate::notify::{NotificationKind, NotificationRequest};
use crate::types::AlertSettings;

/// One telemetry sample from a server.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServerStats {
    /// 1-minute load average.
    pub load_1m: f64,
    /// Memory usage percentage.
    pub memory_percent: f64,
    /// Disk usage percentage.
    pub disk_percent: f64,
}

/// A monitored resource metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// 1-minute load average.
    Load,
    /// Memory usage percentage.
    Memory,
    /// Disk usage percentage.
    Disk,
}

impl Metric {
    /// Every metric, in evaluation order.
    pub const ALL: [Self; 3] = [Self::Load, Self::Memory, Self::Disk];

    fn value(self, stats: &ServerStats) -> f64 {
        match self {
            Self::Load => stats.load_1m,
            Self::Memory => stats.memory_percent,
            Self::Disk => stats.disk_percent,
        }
    }

    fn threshold(self, server: &Server) -> Option<f64> {
        match self {
            Self::Load => server.alert_load_threshold,
            Self::Memory => server.alert_memory_threshold,
            Self::Disk => server.alert_disk_threshold,
        }
    }

    fn flag(self, server: &mut Server) -> &mut bool {
        match self {
            Self::Load => &mut server.is_load_alert_active,
            Self::Memory => &mut server.is_memory_alert_active,
            Self::Disk => &mut server.is_disk_alert_active,
        }
    }

    fn high(self, value: f64, threshold: f64) -> NotificationKind {
        match self {
            Self::Load => NotificationKind::HighLoad { value, threshold },
            Self::Memory => NotificationKind::HighMemory { value, threshold },
            Self::Disk => NotificationKind::HighDisk { value, threshold },
        }
    }
}

/// Apply one sample to a server's alert state.
///
/// Returns the notifications to emit; `server` is updated in place.
#[must_use]
pub fn evaluate(
    server: &mut Server,
    stats: &ServerStats,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> Vec<NotificationKind> {
    let was_alerting = server.has_active_alert();
    let cooling_down = server
        .last_resource_alert_at
        .is_some_and(|at| now.signed_duration_since(at) < cooldown);

    let mut triggered = Vec::new();
    for metric in Metric::ALL {
        let Some(threshold) = metric.threshold(server) else {
            continue;
        };
        let value = metric.value(stats);
        let enabled = server.resource_alerts_enabled;
        let flag = metric.flag(server);

        if value > threshold && enabled && !*flag {
            *flag = true;
            triggered.push(metric.high(value, threshold));
        } else if value <= threshold && *flag {
            *flag = false;
        }
    }

    let mut notifications = Vec::new();
    if !triggered.is_empty() {
        if cooling_down {
            tracing::warn!(
                server_id = %server.server_id,
                suppressed = triggered.len(),
                "Resource alert notification suppressed by cooldown"
            );
        } else {
            server.last_resource_alert_at = Some(now);
            notifications.extend(triggered);
        }
    }

    if was_alerting && !server.has_active_alert() {
        notifications.push(NotificationKind::ResourcesNormal {
            load: stats.load_1m,
            memory: stats.memory_percent,
            disk: stats.disk_percent,
        });
    }

    notifications
}

/// Applies telemetry samples to stored servers.
pub struct AlertEngine<S: Store> {
    store: Arc<S>,
    locks: StripedLocks,
    cooldown: Duration,
}

impl<S: Store> AlertEngine<S> {
    /// Create a new engine with the given cooldown in seconds.
    #[must_use]
    pub fn new(store: Arc<S>, cooldown_seconds: u64, lock_stripes: usize) -> Self {
        let cooldown = i64::try_from(cooldown_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        Self {
            store,
            locks: StripedLocks::new(lock_stripes),
            cooldown,
        }
    }

    /// Process one sample for a server.
    ///
    /// Samples for one server are serialized; different servers proceed
    /// concurrently.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ServerNotFound` if the server doesn't exist.
    pub fn process(
        &self,
        server_id: &ServerId,
        stats: &ServerStats,
        now: DateTime<Utc>,
    ) -> Result<(Server, Vec<NotificationRequest>)> {
        let _guard = self.locks.lock(server_id.as_bytes());

        let mut server = self.load(server_id)?;
        let before = AlertState::of(&server);
        let kinds = evaluate(&mut server, stats, now, self.cooldown);

        if AlertState::of(&server) != before {
            server.updated_at = now;
            self.store.put_server(&server)?;
            tracing::info!(
                server_id = %server_id,
                load = server.is_load_alert_active,
                memory = server.is_memory_alert_active,
                disk = server.is_disk_alert_active,
                "Resource alert state changed"
            );
        } else {
            tracing::debug!(server_id = %server_id, "Resource sample left alert state unchanged");
        }

        let requests = kinds
            .into_iter()
            .map(|kind| NotificationRequest::new(Some(*server_id), kind))
            .collect();
        Ok((server, requests))
    }

    /// Update a server's alert settings.
    ///
    /// Disabling alerting keeps active flags so they clear normally. Removing
    /// a threshold clears that metric's flag silently, since it could never
    /// clear otherwise.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ServerNotFound` if the server doesn't exist.
    pub fn update_settings(&self, server_id: &ServerId, settings: AlertSettings) -> Result<Server> {
        for threshold in [
            settings.load_threshold,
            settings.memory_threshold,
            settings.disk_threshold,
        ]
        .into_iter()
        .flatten()
        {
            if !threshold.is_finite() || threshold < 0.0 {
                return Err(ControlError::InvalidArgument(format!(
                    "alert threshold must be a non-negative number, got {threshold}"
                )));
            }
        }

        let _guard = self.locks.lock(server_id.as_bytes());

        let mut server = self.load(server_id)?;
        server.resource_alerts_enabled = settings.enabled;
        server.alert_load_threshold = settings.load_threshold;
        server.alert_memory_threshold = settings.memory_threshold;
        server.alert_disk_threshold = settings.disk_threshold;
        for metric in Metric::ALL {
            if metric.threshold(&server).is_none() {
                *metric.flag(&mut server) = false;
            }
        }
        server.updated_at = Utc::now();
        self.store.put_server(&server)?;

        tracing::info!(
            server_id = %server_id,
            enabled = settings.enabled,
            "Updated resource alert settings"
        );
        Ok(server)
    }

    fn load(&self, server_id: &ServerId) -> Result<Server> {
        self.store
            .get_server(server_id)?
            .ok_or(ControlError::ServerNotFound(*server_id))
    }
}

#[derive(PartialEq)]
struct AlertState(bool, bool, bool, Option<DateTime<Utc>>);

impl AlertState {
    const fn of(server: &Server) -> Self {
        Self(
            server.is_load_alert_active,
            server.is_memory_alert_active,
            server.is_disk_alert_active,
            server.last_resource_alert_at,
        )
    }
}
