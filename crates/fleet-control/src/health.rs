//! Uptime monitoring.
//!
//! Monitors are probed over HTTP or TCP. A monitor goes down after
//! `failure_threshold` consecutive failures and, once down, needs
//! `recovery_threshold` consecutive successes to come back up.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_store::{HealthMonitor, MonitorStatus, MonitorType, Store};
use futures::stream::{self, StreamExt};

use crate::error::{ControlError, Result};
use crate::notify::{NotificationKind, NotificationRequest};

/// Result of one probe: `Err` carries a human-readable reason.
pub type ProbeResult = std::result::Result<(), String>;

/// Trait for probing a monitor's target.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe the target once, honouring the monitor's timeout.
    async fn probe(&self, monitor: &HealthMonitor) -> ProbeResult;
}

/// HTTP GET prober: any 2xx or 3xx response counts as up.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    /// Create a new HTTP prober.
    ///
    /// Redirects are not followed, so a 3xx response is itself a success.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be created.
    #[must_use]
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }

    /// Create a prober with a custom reqwest client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, monitor: &HealthMonitor) -> ProbeResult {
        let response = self
            .client
            .get(&monitor.url)
            .timeout(timeout_of(monitor))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    format!("timed out after {}s", monitor.timeout_seconds)
                } else {
                    format!("request failed: {e}")
                }
            })?;

        let status = response.status();
        if status.is_success() || status.is_redirection() {
            Ok(())
        } else {
            Err(format!("unexpected status {}", status.as_u16()))
        }
    }
}

/// TCP prober: a completed connect counts as up.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProber;

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, monitor: &HealthMonitor) -> ProbeResult {
        let target = monitor.url.as_str();
        match tokio::time::timeout(timeout_of(monitor), tokio::net::TcpStream::connect(target))
            .await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(format!("connect to {target} failed: {e}")),
            Err(_) => Err(format!("timed out after {}s", monitor.timeout_seconds)),
        }
    }
}

/// Prober dispatching on the monitor type.
#[derive(Debug, Clone, Default)]
pub struct NetworkProber {
    http: HttpProber,
    tcp: TcpProber,
}

impl NetworkProber {
    /// Create a prober from its parts.
    #[must_use]
    pub const fn new(http: HttpProber, tcp: TcpProber) -> Self {
        Self { http, tcp }
    }
}

#[async_trait]
impl Prober for NetworkProber {
    async fn probe(&self, monitor: &HealthMonitor) -> ProbeResult {
        match monitor.monitor_type {
            MonitorType::Http => self.http.probe(monitor).await,
            MonitorType::Tcp => self.tcp.probe(monitor).await,
        }
    }
}

fn timeout_of(monitor: &HealthMonitor) -> Duration {
    Duration::from_secs(u64::from(monitor.timeout_seconds.max(1)))
}

/// A monitor state change worth telling someone about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorTransition {
    /// The monitor went down.
    WentDown,
    /// A down monitor came back up.
    Recovered,
}

/// Apply one probe result to a monitor.
///
/// Returns the transition, if the status changed in a way that notifies.
pub fn apply_probe_result(
    monitor: &mut HealthMonitor,
    result: &ProbeResult,
    now: DateTime<Utc>,
) -> Option<MonitorTransition> {
    monitor.last_checked_at = Some(now);

    match result {
        Ok(()) => {
            monitor.consecutive_failures = 0;
            monitor.consecutive_successes = monitor.consecutive_successes.saturating_add(1);

            match monitor.status {
                MonitorStatus::Down
                    if monitor.consecutive_successes >= monitor.recovery_threshold.max(1) =>
                {
                    monitor.status = MonitorStatus::Up;
                    Some(MonitorTransition::Recovered)
                }
                MonitorStatus::Down => None,
                MonitorStatus::Pending | MonitorStatus::Up => {
                    monitor.status = MonitorStatus::Up;
                    None
                }
            }
        }
        Err(error) => {
            monitor.consecutive_successes = 0;
            monitor.consecutive_failures = monitor.consecutive_failures.saturating_add(1);
            monitor.last_error = Some(error.clone());

            if monitor.status != MonitorStatus::Down
                && monitor.consecutive_failures >= monitor.failure_threshold.max(1)
            {
                monitor.status = MonitorStatus::Down;
                Some(MonitorTransition::WentDown)
            } else {
                None
            }
        }
    }
}

/// Returns true once a monitor's interval has elapsed since its last probe.
#[must_use]
pub fn is_due(monitor: &HealthMonitor, now: DateTime<Utc>) -> bool {
    monitor.last_checked_at.map_or(true, |at| {
        now.signed_duration_since(at).num_seconds() >= i64::from(monitor.interval_seconds)
    })
}

/// Check that a monitor can be probed.
///
/// # Errors
///
/// Returns `ControlError::InvalidRequest` for an unusable target, a zero
/// interval or timeout, or a zero threshold.
pub fn validate_monitor(monitor: &HealthMonitor) -> Result<()> {
    let target_ok = match monitor.monitor_type {
        MonitorType::Http => {
            monitor.url.starts_with("http://") || monitor.url.starts_with("https://")
        }
        MonitorType::Tcp => monitor
            .url
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok()),
    };
    if !target_ok {
        return Err(ControlError::InvalidRequest(format!(
            "invalid {:?} monitor target: {:?}",
            monitor.monitor_type, monitor.url
        )));
    }
    if monitor.interval_seconds == 0 || monitor.timeout_seconds == 0 {
        return Err(ControlError::InvalidRequest(
            "monitor interval and timeout must be positive".to_string(),
        ));
    }
    if monitor.failure_threshold == 0 || monitor.recovery_threshold == 0 {
        return Err(ControlError::InvalidRequest(
            "monitor thresholds must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Probes due monitors and records the results.
pub struct HealthChecker<S: Store> {
    store: Arc<S>,
    prober: Arc<dyn Prober>,
    concurrency: usize,
}

impl<S: Store> HealthChecker<S> {
    /// Create a checker running at most `concurrency` probes at once.
    #[must_use]
    pub fn new(store: Arc<S>, prober: Arc<dyn Prober>, concurrency: usize) -> Self {
        Self {
            store,
            prober,
            concurrency: concurrency.max(1),
        }
    }

    /// Probe every due monitor and persist the results.
    ///
    /// Returns the number of monitors probed and the notifications raised.
    ///
    /// # Errors
    ///
    /// Returns an error if a store operation fails.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<(usize, Vec<NotificationRequest>)> {
        let due: Vec<HealthMonitor> = self
            .store
            .list_health_monitors()?
            .into_iter()
            .filter(|m| is_due(m, now))
            .collect();
        let probed = due.len();

        let results: Vec<(HealthMonitor, ProbeResult)> = stream::iter(due)
            .map(|monitor| {
                let prober = Arc::clone(&self.prober);
                async move {
                    let result = prober.probe(&monitor).await;
                    (monitor, result)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut notifications = Vec::new();
        for (mut monitor, result) in results {
            let transition = apply_probe_result(&mut monitor, &result, now);
            self.store.put_health_monitor(&monitor)?;

            match transition {
                Some(MonitorTransition::WentDown) => {
                    tracing::warn!(
                        monitor_id = %monitor.monitor_id,
                        url = %monitor.url,
                        error = ?monitor.last_error,
                        "Monitor down"
                    );
                    notifications.push(NotificationRequest::new(
                        monitor.server_id,
                        NotificationKind::MonitorDown {
                            monitor_id: monitor.monitor_id,
                            url: monitor.url.clone(),
                            error: monitor.last_error.clone(),
                        },
                    ));
                }
                Some(MonitorTransition::Recovered) => {
                    tracing::info!(
                        monitor_id = %monitor.monitor_id,
                        url = %monitor.url,
                        "Monitor recovered"
                    );
                    notifications.push(NotificationRequest::new(
                        monitor.server_id,
                        NotificationKind::MonitorRecovered {
                            monitor_id: monitor.monitor_id,
                            url: monitor.url.clone(),
                        },
                    ));
                }
                None => {
                    tracing::debug!(
                        monitor_id = %monitor.monitor_id,
                        status = ?monitor.status,
                        ok = result.is_ok(),
                        "Probed monitor"
                    );
                }
            }
        }

        Ok((probed, notifications))
    }
}
