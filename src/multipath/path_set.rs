//! The connection's shared set of paths.
//!
//! Lock discipline: enumeration and selection hold the read lock for the
//! duration of one decision; adding or removing a path takes the write
//! lock. The scheduler never holds either lock across a send.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};

use super::{Path, PathTelemetry, SchedulerConfig};
use crate::types::{PathId, Version};

/// Paths keyed by ID; iteration is in ascending path ID order.
pub type PathMap = BTreeMap<PathId, Arc<Path>>;

/// Read/write-locked path map owned by the connection.
#[derive(Debug, Default)]
pub struct PathSet {
    paths: RwLock<PathMap>,
}

impl PathSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a set holding only the initial path.
    pub fn with_initial_path(config: &SchedulerConfig, version: Version) -> Self {
        let set = Self::new();
        set.add_path(PathId::INITIAL, PathTelemetry::default(), config, version);
        set
    }

    /// Create and insert a path whose ACK state follows `config`.
    pub fn add_path(
        &self,
        id: PathId,
        telemetry: PathTelemetry,
        config: &SchedulerConfig,
        version: Version,
    ) -> Arc<Path> {
        let path = Arc::new(Path::configured(id, telemetry, config, version));
        self.insert(Arc::clone(&path));
        path
    }

    /// Acquire the read lock for enumeration or selection.
    pub fn read(&self) -> RwLockReadGuard<'_, PathMap> {
        self.paths.read()
    }

    /// Add a path, replacing any previous path with the same ID.
    pub fn insert(&self, path: Arc<Path>) -> Option<Arc<Path>> {
        self.paths.write().insert(path.id(), path)
    }

    pub fn remove(&self, id: PathId) -> Option<Arc<Path>> {
        self.paths.write().remove(&id)
    }

    pub fn get(&self, id: PathId) -> Option<Arc<Path>> {
        self.paths.read().get(&id).cloned()
    }

    /// Cloned handles of all paths, for work done outside the lock.
    pub fn snapshot(&self) -> Vec<Arc<Path>> {
        self.paths.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.paths.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use crate::types::PacketNumber;

    #[test]
    fn test_iteration_order_is_by_id() {
        let set = PathSet::new();
        for id in [3, 0, 1] {
            set.insert(Arc::new(Path::new(PathId(id))));
        }
        let ids: Vec<_> = set.read().keys().copied().collect();
        assert_eq!(ids, vec![PathId(0), PathId(1), PathId(3)]);
    }

    #[test]
    fn test_insert_remove() {
        let set = PathSet::with_initial_path(&SchedulerConfig::default(), Version::V39);
        assert_eq!(set.len(), 1);

        set.insert(Arc::new(Path::new(PathId(1))));
        assert!(set.get(PathId(1)).is_some());

        assert!(set.remove(PathId(1)).is_some());
        assert!(set.get(PathId(1)).is_none());
        assert!(!set.is_empty());
    }

    #[test]
    fn test_paths_use_configured_ack_delay() {
        let config = SchedulerConfig {
            ack_send_delay: Duration::from_millis(5),
            ..Default::default()
        };
        let set = PathSet::with_initial_path(&config, Version::V39);
        let path = set.add_path(PathId(1), PathTelemetry::default(), &config, Version::V39);
        let now = Instant::now();

        for p in [set.get(PathId::INITIAL).unwrap(), path] {
            p.received_packet(PacketNumber(1), true, now).unwrap();
            p.ack_frame(now).unwrap();
            p.received_packet(PacketNumber(2), true, now).unwrap();
            assert!(p.ack_frame(now + Duration::from_millis(4)).is_none());
            assert!(p.ack_frame(now + Duration::from_millis(5)).is_some());
        }
    }
}
