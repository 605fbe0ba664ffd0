//! Reference counting for point-in-time views
//!
//! Log and index snapshots pin a TxID in a [`SnapshotRegistry`] for as long
//! as they are alive.

use std::collections::BTreeMap;
use std::sync::Mutex;

/// Registry of live snapshots keyed by the TxID they are bound to
#[derive(Debug, Default)]
pub struct SnapshotRegistry {
    pinned: Mutex<BTreeMap<u64, usize>>,
}

impl SnapshotRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin `tx_id` until the returned guard is dropped
    pub fn pin(&self, tx_id: u64) -> SnapshotGuard<'_> {
        let mut pinned = self.pinned.lock().unwrap_or_else(|p| p.into_inner());
        *pinned.entry(tx_id).or_insert(0) += 1;
        SnapshotGuard {
            registry: self,
            tx_id,
        }
    }

    /// Number of live snapshots
    #[must_use]
    pub fn active(&self) -> usize {
        let pinned = self.pinned.lock().unwrap_or_else(|p| p.into_inner());
        pinned.values().sum()
    }

    fn unpin(&self, tx_id: u64) {
        let mut pinned = self.pinned.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(count) = pinned.get_mut(&tx_id) {
            *count -= 1;
            if *count == 0 {
                pinned.remove(&tx_id);
            }
        }
    }
}

/// Keeps one TxID pinned; unpins on drop
#[derive(Debug)]
pub struct SnapshotGuard<'a> {
    registry: &'a SnapshotRegistry,
    tx_id: u64,
}

impl Drop for SnapshotGuard<'_> {
    fn drop(&mut self) {
        self.registry.unpin(self.tx_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_and_release() {
        let registry = SnapshotRegistry::new();
        assert_eq!(registry.active(), 0);

        let a = registry.pin(5);
        let b = registry.pin(3);
        let c = registry.pin(5);
        assert_eq!(registry.active(), 3);

        drop(b);
        assert_eq!(registry.active(), 2);

        drop(a);
        assert_eq!(registry.active(), 1);

        drop(c);
        assert_eq!(registry.active(), 0);
    }
}
