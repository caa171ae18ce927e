use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::models::Environment;

/// Per-(app, environment) mutual exclusion for pipeline runs. Two concurrent
/// deploys to the same app and environment would race on the final manifest
/// write; the loser of this lock gets a conflict instead. Different apps and
/// different environments run freely in parallel.
#[derive(Clone, Default)]
pub struct RunLocks {
    active: Arc<Mutex<HashSet<String>>>,
}

impl RunLocks {
    pub fn try_acquire(&self, app_id: &str, environment: Environment) -> Option<RunGuard> {
        let key = format!("{app_id}/{environment}");
        let mut active = self.active.lock().unwrap();
        if !active.insert(key.clone()) {
            return None;
        }
        Some(RunGuard { key, active: Arc::clone(&self.active) })
    }
}

/// Held for the duration of one pipeline run; releases on drop, including
/// every early-return and panic path.
pub struct RunGuard {
    key: String,
    active: Arc<Mutex<HashSet<String>>>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.active.lock().unwrap().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_for_same_key_is_refused() {
        let locks = RunLocks::default();
        let guard = locks.try_acquire("app-1", Environment::Dev);
        assert!(guard.is_some());
        assert!(locks.try_acquire("app-1", Environment::Dev).is_none());
        // other environments and apps are unaffected
        assert!(locks.try_acquire("app-1", Environment::Prod).is_some());
        assert!(locks.try_acquire("app-2", Environment::Dev).is_some());
    }

    #[test]
    fn dropping_the_guard_releases_the_lock() {
        let locks = RunLocks::default();
        drop(locks.try_acquire("app-1", Environment::Dev));
        assert!(locks.try_acquire("app-1", Environment::Dev).is_some());
    }
}
