//! Per-server port allocation for Node.js processes.
//!
//! Every server owns the range `3000..=3999`. Used ports are derived from the
//! Node.js web apps stored for the server, so releasing a port is simply
//! deleting the app that held it.

use std::collections::BTreeSet;
use std::sync::Arc;

use fleet_core::ServerId;
use fleet_store::{Store, WebApp};
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, Result};
use crate::locks::StripedLocks;

/// First port of the allocation range.
pub const PORT_RANGE_START: u16 = 3000;
/// Last port of the allocation range (inclusive).
pub const PORT_RANGE_END: u16 = 3999;
/// Largest block `allocate_multiple` hands out at once.
pub const MAX_PORTS_PER_REQUEST: usize = 100;

const TOTAL_PORTS: u32 = (PORT_RANGE_END - PORT_RANGE_START) as u32 + 1;

/// Port usage of one server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortUsage {
    /// Size of the range.
    pub total: u32,
    /// Ports held by web apps.
    pub used: u32,
    /// Ports still free.
    pub available: u32,
    /// Share of the range in use, rounded to one decimal.
    pub usage_percent: f64,
    /// The range, as `start-end`.
    pub port_range: String,
}

/// Allocates ports from the per-server range.
pub struct PortAllocator<S: Store> {
    store: Arc<S>,
    locks: StripedLocks,
}

impl<S: Store> PortAllocator<S> {
    /// Create a new allocator.
    #[must_use]
    pub fn new(store: Arc<S>, lock_stripes: usize) -> Self {
        Self {
            store,
            locks: StripedLocks::new(lock_stripes),
        }
    }

    /// Every in-range port currently held by a Node.js app on the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub fn used_ports(&self, server_id: &ServerId) -> Result<BTreeSet<u16>> {
        Ok(self
            .store
            .list_web_apps_by_server(server_id)?
            .iter()
            .filter(|app| app.is_nodejs())
            .flat_map(WebApp::held_ports)
            .filter(|port| in_range(*port))
            .collect())
    }

    /// The smallest free port.
    ///
    /// Waits for any reservation in progress on the server. The port is not
    /// held once this returns; use [`Self::reserve`] to persist a claim.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::PortsExhausted` if the range is full.
    pub fn allocate(&self, server_id: &ServerId) -> Result<u16> {
        let ports = self.allocate_multiple(server_id, 1)?;
        ports.first().copied().ok_or(ControlError::PortsExhausted {
            server_id: *server_id,
            requested: 1,
        })
    }

    /// The smallest block of `count` contiguous free ports.
    ///
    /// Same locking as [`Self::allocate`].
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidArgument` unless `1 <= count <= 100`, and
    /// `ControlError::PortsExhausted` if no block fits.
    pub fn allocate_multiple(&self, server_id: &ServerId, count: usize) -> Result<Vec<u16>> {
        let _guard = self.locks.lock(server_id.as_bytes());
        self.free_block(server_id, count)
    }

    /// Caller holds the server's stripe.
    fn free_block(&self, server_id: &ServerId, count: usize) -> Result<Vec<u16>> {
        check_count(count)?;
        let used = self.used_ports(server_id)?;
        find_block(&used, count).ok_or(ControlError::PortsExhausted {
            server_id: *server_id,
            requested: count,
        })
    }

    /// Returns false for ports outside the range or already held.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub fn is_available(&self, server_id: &ServerId, port: u16) -> Result<bool> {
        if !in_range(port) {
            return Ok(false);
        }
        Ok(!self.used_ports(server_id)?.contains(&port))
    }

    /// Usage statistics for the server's range.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub fn usage_stats(&self, server_id: &ServerId) -> Result<PortUsage> {
        let used = u32::try_from(self.used_ports(server_id)?.len()).unwrap_or(TOTAL_PORTS);
        let usage_percent = (f64::from(used) * 1000.0 / f64::from(TOTAL_PORTS)).round() / 10.0;

        Ok(PortUsage {
            total: TOTAL_PORTS,
            used,
            available: TOTAL_PORTS - used,
            usage_percent,
            port_range: format!("{PORT_RANGE_START}-{PORT_RANGE_END}"),
        })
    }

    /// Acknowledge that an app gave up its ports.
    ///
    /// Used ports are derived from stored apps, so this only logs; calling it
    /// twice is harmless.
    pub fn release(&self, app: &WebApp) {
        let ports: Vec<u16> = app.held_ports().collect();
        if ports.is_empty() {
            return;
        }
        tracing::info!(
            server_id = %app.server_id,
            webapp_id = %app.webapp_id,
            ports = ?ports,
            "Released ports"
        );
    }

    /// Allocate `count` contiguous ports and run `commit` with them while the
    /// server's allocation lock is held.
    ///
    /// `commit` must persist whatever claims the ports; once it returns, the
    /// ports count as used for the next allocation. A `count` of zero runs
    /// `commit` with no ports.
    ///
    /// # Errors
    ///
    /// Returns allocation errors, or whatever `commit` returns.
    pub fn reserve<T>(
        &self,
        server_id: &ServerId,
        count: usize,
        commit: impl FnOnce(&[u16]) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.locks.lock(server_id.as_bytes());

        if count == 0 {
            return commit(&[]);
        }
        let ports = self.free_block(server_id, count)?;
        tracing::debug!(server_id = %server_id, ports = ?ports, "Reserved ports");
        commit(&ports)
    }
}

const fn in_range(port: u16) -> bool {
    port >= PORT_RANGE_START && port <= PORT_RANGE_END
}

fn check_count(count: usize) -> Result<()> {
    if count == 0 || count > MAX_PORTS_PER_REQUEST {
        return Err(ControlError::InvalidArgument(format!(
            "port count must be between 1 and {MAX_PORTS_PER_REQUEST}, got {count}"
        )));
    }
    Ok(())
}

/// Lowest block of `count` contiguous ports not in `used`.
///
/// A used port inside a candidate block disqualifies it and the scan resumes
/// right after that port.
fn find_block(used: &BTreeSet<u16>, count: usize) -> Option<Vec<u16>> {
    let span = u16::try_from(count).ok()?.checked_sub(1)?;
    let mut start = PORT_RANGE_START;

    'scan: loop {
        let end = start.checked_add(span)?;
        if end > PORT_RANGE_END {
            return None;
        }
        if let Some(&blocker) = used.range(start..=end).next_back() {
            start = blocker + 1;
            continue 'scan;
        }
        return Some((start..=end).collect());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fleet_core::WebAppId;
    use fleet_store::{AppType, DeployStatus, NodeProcess, PackageManager, ResourceStatus, RocksStore};
    use tempfile::TempDir;

    fn create_allocator() -> (PortAllocator<RocksStore>, Arc<RocksStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        (PortAllocator::new(Arc::clone(&store), 16), store, dir)
    }

    fn node_app(server_id: ServerId, node_port: Option<u16>, process_ports: &[u16]) -> WebApp {
        let now = Utc::now();
        WebApp {
            webapp_id: WebAppId::generate(),
            server_id,
            domain: "app.test".into(),
            app_type: AppType::Nodejs,
            status: ResourceStatus::Active,
            error_message: None,
            directory: "/home/deploy/app.test".into(),
            system_user: "deploy".into(),
            node_port,
            node_processes: process_ports
                .iter()
                .enumerate()
                .map(|(i, port)| NodeProcess {
                    name: format!("p{i}"),
                    command: "node index.js".into(),
                    port: *port,
                })
                .collect(),
            package_manager: PackageManager::Npm,
            start_command: None,
            supervisor_program_id: None,
            deploy_status: DeployStatus::NeverDeployed,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn find_block_skips_past_blocker() {
        let used: BTreeSet<u16> = [3001].into_iter().collect();
        assert_eq!(find_block(&used, 3), Some(vec![3002, 3003, 3004]));
        assert_eq!(find_block(&used, 1), Some(vec![3000]));
    }

    #[test]
    fn find_block_at_range_end() {
        let used: BTreeSet<u16> = (3000..3998).collect();
        assert_eq!(find_block(&used, 2), Some(vec![3998, 3999]));
        assert_eq!(find_block(&used, 3), None);
    }

    #[test]
    fn allocate_returns_smallest_free_port() {
        let (allocator, store, _dir) = create_allocator();
        let server_id = ServerId::generate();
        assert_eq!(allocator.allocate(&server_id).unwrap(), 3000);

        store
            .put_web_app(&node_app(server_id, Some(3000), &[3001, 3003]))
            .unwrap();
        assert_eq!(allocator.allocate(&server_id).unwrap(), 3002);
        assert!(!allocator.used_ports(&server_id).unwrap().contains(&3002));
    }

    #[test]
    fn allocate_multiple_with_monorepo_neighbour() {
        let (allocator, store, _dir) = create_allocator();
        let server_id = ServerId::generate();
        store
            .put_web_app(&node_app(server_id, None, &[3001]))
            .unwrap();

        assert_eq!(
            allocator.allocate_multiple(&server_id, 3).unwrap(),
            vec![3002, 3003, 3004]
        );
    }

    #[test]
    fn allocate_multiple_bounds() {
        let (allocator, _store, _dir) = create_allocator();
        let server_id = ServerId::generate();

        assert!(matches!(
            allocator.allocate_multiple(&server_id, 0),
            Err(ControlError::InvalidArgument(_))
        ));
        assert!(matches!(
            allocator.allocate_multiple(&server_id, 101),
            Err(ControlError::InvalidArgument(_))
        ));
        assert_eq!(allocator.allocate_multiple(&server_id, 100).unwrap().len(), 100);
    }

    #[test]
    fn exhausted_range() {
        let (allocator, store, _dir) = create_allocator();
        let server_id = ServerId::generate();
        let ports: Vec<u16> = (PORT_RANGE_START..=PORT_RANGE_END).collect();
        store
            .put_web_app(&node_app(server_id, None, &ports))
            .unwrap();

        assert!(matches!(
            allocator.allocate(&server_id),
            Err(ControlError::PortsExhausted { requested: 1, .. })
        ));
    }

    #[test]
    fn servers_are_isolated() {
        let (allocator, store, _dir) = create_allocator();
        let server_a = ServerId::generate();
        let server_b = ServerId::generate();
        store
            .put_web_app(&node_app(server_a, Some(3000), &[]))
            .unwrap();

        assert!(!allocator.is_available(&server_a, 3000).unwrap());
        assert!(allocator.is_available(&server_b, 3000).unwrap());
        assert!(!allocator.is_available(&server_b, 2999).unwrap());
        assert!(!allocator.is_available(&server_b, 4000).unwrap());
    }

    #[test]
    fn php_apps_hold_no_ports() {
        let (allocator, store, _dir) = create_allocator();
        let server_id = ServerId::generate();
        let mut app = node_app(server_id, Some(3000), &[]);
        app.app_type = AppType::Php;
        store.put_web_app(&app).unwrap();

        assert!(allocator.is_available(&server_id, 3000).unwrap());
    }

    #[test]
    fn usage_stats() {
        let (allocator, store, _dir) = create_allocator();
        let server_id = ServerId::generate();
        store
            .put_web_app(&node_app(server_id, Some(3000), &[3001, 3002]))
            .unwrap();

        let usage = allocator.usage_stats(&server_id).unwrap();
        assert_eq!(usage.total, 1000);
        assert_eq!(usage.used, 3);
        assert_eq!(usage.available, 997);
        assert!((usage.usage_percent - 0.3).abs() < f64::EPSILON);
        assert_eq!(usage.port_range, "3000-3999");
    }

    #[test]
    fn release_is_idempotent() {
        let (allocator, store, _dir) = create_allocator();
        let server_id = ServerId::generate();
        let app = node_app(server_id, None, &[3000, 3001]);
        store.put_web_app(&app).unwrap();
        store.delete_web_app(&app.webapp_id).unwrap();

        allocator.release(&app);
        allocator.release(&app);
        assert!(allocator.used_ports(&server_id).unwrap().is_empty());
    }

    #[test]
    fn concurrent_reservations_never_collide() {
        let (allocator, store, _dir) = create_allocator();
        let allocator = Arc::new(allocator);
        let server_id = ServerId::generate();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    allocator
                        .reserve(&server_id, 2, |ports| {
                            store.put_web_app(&node_app(server_id, None, ports))?;
                            Ok(ports.to_vec())
                        })
                        .unwrap()
                })
            })
            .collect();

        let mut all: Vec<u16> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        let before = all.len();
        all.dedup();
        assert_eq!(all.len(), before);
        assert_eq!(all, (3000..3016).collect::<Vec<_>>());
    }

    #[test]
    fn allocate_waits_for_reservation_in_progress() {
        let (allocator, store, _dir) = create_allocator();
        let allocator = Arc::new(allocator);
        let server_id = ServerId::generate();
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();

        let reserving = {
            let allocator = Arc::clone(&allocator);
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                allocator
                    .reserve(&server_id, 2, |ports| {
                        entered_tx.send(()).unwrap();
                        std::thread::sleep(std::time::Duration::from_millis(50));
                        store.put_web_app(&node_app(server_id, None, ports))?;
                        Ok(ports.to_vec())
                    })
                    .unwrap()
            })
        };

        entered_rx.recv().unwrap();
        let next = allocator.allocate(&server_id).unwrap();
        let block = allocator.allocate_multiple(&server_id, 2).unwrap();

        assert_eq!(reserving.join().unwrap(), vec![3000, 3001]);
        assert_eq!(next, 3002);
        assert_eq!(block, vec![3002, 3003]);
    }
}
