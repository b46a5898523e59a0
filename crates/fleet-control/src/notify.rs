//! Notification requests and the `Notifier` collaborator.
//!
//! The control plane decides *that* a user should be told something and
//! *what*; delivery (mail, chat webhooks) belongs to the notifier.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_core::{JobId, MonitorId, ServerId};
use fleet_store::JobType;
use serde::{Deserialize, Serialize};

/// A request to notify the owner of a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequest {
    /// Server the notification concerns, if any.
    pub server_id: Option<ServerId>,
    /// What happened.
    pub kind: NotificationKind,
    /// When the request was raised.
    pub created_at: DateTime<Utc>,
}

impl NotificationRequest {
    /// Create a request stamped with the current time.
    #[must_use]
    pub fn new(server_id: Option<ServerId>, kind: NotificationKind) -> Self {
        Self {
            server_id,
            kind,
            created_at: Utc::now(),
        }
    }
}

/// The kinds of notification the control plane raises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationKind {
    /// Load average went above its threshold.
    HighLoad {
        /// The sampled 1-minute load average.
        value: f64,
        /// The configured threshold.
        threshold: f64,
    },
    /// Memory usage went above its threshold.
    HighMemory {
        /// The sampled memory usage percentage.
        value: f64,
        /// The configured threshold.
        threshold: f64,
    },
    /// Disk usage went above its threshold.
    HighDisk {
        /// The sampled disk usage percentage.
        value: f64,
        /// The configured threshold.
        threshold: f64,
    },
    /// Every resource alert on the server has cleared.
    ResourcesNormal {
        /// Current 1-minute load average.
        load: f64,
        /// Current memory usage percentage.
        memory: f64,
        /// Current disk usage percentage.
        disk: f64,
    },
    /// A job owning a resource failed.
    JobFailed {
        /// The failed job.
        job_id: JobId,
        /// Its type.
        job_type: JobType,
        /// The reported reason.
        error: String,
    },
    /// A health monitor went down.
    MonitorDown {
        /// The monitor.
        monitor_id: MonitorId,
        /// The probed target.
        url: String,
        /// Error of the last failed probe.
        error: Option<String>,
    },
    /// A down health monitor recovered.
    MonitorRecovered {
        /// The monitor.
        monitor_id: MonitorId,
        /// The probed target.
        url: String,
    },
}

impl NotificationKind {
    /// Short stable name of the kind, for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::HighLoad { .. } => "high_load",
            Self::HighMemory { .. } => "high_memory",
            Self::HighDisk { .. } => "high_disk",
            Self::ResourcesNormal { .. } => "resources_normal",
            Self::JobFailed { .. } => "job_failed",
            Self::MonitorDown { .. } => "monitor_down",
            Self::MonitorRecovered { .. } => "monitor_recovered",
        }
    }
}

/// Trait for delivering notification requests.
///
/// Implementations must not block; the control plane awaits each call after
/// releasing all of its locks.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notification request.
    async fn notify(&self, request: NotificationRequest);
}

/// Notifier that writes one structured log event per request.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, request: NotificationRequest) {
        let server_id = request.server_id.map(|id| id.to_string());
        match &request.kind {
            NotificationKind::JobFailed { .. } | NotificationKind::MonitorDown { .. } => {
                tracing::warn!(
                    server_id = ?server_id,
                    kind = request.kind.name(),
                    details = ?request.kind,
                    "Notification"
                );
            }
            _ => {
                tracing::info!(
                    server_id = ?server_id,
                    kind = request.kind.name(),
                    details = ?request.kind,
                    "Notification"
                );
            }
        }
    }
}

// =============================================================================
// Mock Implementation for Testing
// =============================================================================

/// A notifier that records requests in memory.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    requests: parking_lot::Mutex<Vec<NotificationRequest>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MemoryNotifier {
    /// Create an empty notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<NotificationRequest> {
        self.requests.lock().clone()
    }

    /// Remove and return all requests received so far.
    pub fn take(&self) -> Vec<NotificationRequest> {
        std::mem::take(&mut *self.requests.lock())
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, request: NotificationRequest) {
        self.requests.lock().push(request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_tagged() {
        let kind = NotificationKind::HighLoad {
            value: 8.5,
            threshold: 5.0,
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], "high_load");
        assert_eq!(json["value"], 8.5);
        assert_eq!(kind.name(), "high_load");
    }

    #[tokio::test]
    async fn memory_notifier_records() {
        let notifier = MemoryNotifier::new();
        notifier
            .notify(NotificationRequest::new(
                None,
                NotificationKind::MonitorRecovered {
                    monitor_id: MonitorId::generate(),
                    url: "https://example.com".into(),
                },
            ))
            .await;

        assert_eq!(notifier.requests().len(), 1);
        assert_eq!(notifier.take().len(), 1);
        assert!(notifier.requests().is_empty());
    }

    #[tokio::test]
    async fn log_notifier_accepts_every_kind() {
        let notifier = LogNotifier;
        notifier
            .notify(NotificationRequest::new(
                Some(ServerId::generate()),
                NotificationKind::JobFailed {
                    job_id: JobId::generate(),
                    job_type: JobType::Deploy,
                    error: "exit status 1".into(),
                },
            ))
            .await;
    }
}
