//! ---
//! zc_section: "07-fault-injection"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Fault-injection orchestration and experiment pipeline."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::ExperimentError;

static GLOBAL_LOCKS: Lazy<TargetLocks> = Lazy::new(TargetLocks::default);

/// Registry of targets with an experiment in flight.
#[derive(Debug, Clone, Default)]
pub struct TargetLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl TargetLocks {
    /// Process-wide registry shared by every runner that does not bring its own.
    pub fn global() -> Self {
        GLOBAL_LOCKS.clone()
    }

    /// Take the lock for `key`, or fail with a preflight error when it is held.
    pub fn try_acquire(&self, key: &str) -> Result<TargetLease, ExperimentError> {
        let mut held = self.held.lock();
        if !held.insert(key.to_owned()) {
            return Err(ExperimentError::Preflight(format!(
                "target busy: another experiment holds '{key}'"
            )));
        }
        debug!(target: "zonechaos::core::locks", key, "target lock acquired");
        Ok(TargetLease {
            key: key.to_owned(),
            held: self.held.clone(),
        })
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.held.lock().contains(key)
    }
}

/// Held target lock; released on drop.
#[derive(Debug)]
pub struct TargetLease {
    key: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl TargetLease {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for TargetLease {
    fn drop(&mut self) {
        self.held.lock().remove(&self.key);
        debug!(target: "zonechaos::core::locks", key = %self.key, "target lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_rejected_until_drop() {
        let locks = TargetLocks::default();
        let lease = locks.try_acquire("pod_kill:rg/aks/shop").unwrap();
        let err = locks.try_acquire("pod_kill:rg/aks/shop").unwrap_err();
        assert!(matches!(err, ExperimentError::Preflight(ref m) if m.contains("target busy")));
        assert!(locks.try_acquire("pod_kill:rg/aks/other").is_ok());

        drop(lease);
        assert!(!locks.is_held("pod_kill:rg/aks/shop"));
        assert!(locks.try_acquire("pod_kill:rg/aks/shop").is_ok());
    }
}
