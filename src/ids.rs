//! Node identity suppliers
//!
//! Every node in an analysis forest carries an opaque string id handed out by an
//! [`IdSupplier`]. Ids must stay unique for the lifetime of the process.

use std::sync::atomic::{AtomicU64, Ordering};

/// Source of fresh, process-unique node identifiers
pub trait IdSupplier: Send + Sync {
    /// Returns an identifier never returned before by this supplier
    fn new_id(&self) -> String;
}

/// Random v4 UUIDs, the default supplier
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIds;

impl IdSupplier for UuidIds {
    fn new_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Deterministic ids of the form `{prefix}-{n}`, counting up from 1
#[derive(Debug)]
pub struct SequentialIds {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdSupplier for SequentialIds {
    fn new_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.prefix, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_sequential_ids_count_up() {
        let ids = SequentialIds::new("n");
        assert_eq!(ids.new_id(), "n-1");
        assert_eq!(ids.new_id(), "n-2");
        assert_eq!(ids.new_id(), "n-3");
    }

    #[test]
    fn test_uuid_ids_do_not_repeat() {
        let ids = UuidIds;
        let seen: HashSet<String> = (0..256).map(|_| ids.new_id()).collect();
        assert_eq!(seen.len(), 256);
    }
}
