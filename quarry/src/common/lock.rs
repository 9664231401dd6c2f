use crate::collection::Namespace;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// A handle to one namespace's writer lock.
///
/// Holding the guard returned by [NamespaceLock::lock] serializes the
/// validate-then-persist sequence of write commands on that namespace.
/// Reads never take it.
#[derive(Clone)]
pub struct NamespaceLock {
    lock: Arc<Mutex<()>>,
}

impl NamespaceLock {
    /// Acquires the writer lock, blocking until it is free.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }
}

/// Registry of per-namespace writer locks.
///
/// # Examples
///
/// ```
/// use quarry::collection::Namespace;
/// use quarry::common::LockRegistry;
///
/// let registry = LockRegistry::new();
/// let handle = registry.get_lock(&Namespace::new("db", "users"));
/// {
///     let _guard = handle.lock();
/// } // released here
/// ```
#[derive(Clone, Default)]
pub struct LockRegistry {
    locks: Arc<RwLock<HashMap<String, Arc<Mutex<()>>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        LockRegistry {
            locks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Gets the lock for a namespace, creating it on first use.
    pub fn get_lock(&self, namespace: &Namespace) -> NamespaceLock {
        let name = namespace.to_string();
        if let Some(lock) = self.locks.read().get(&name) {
            return NamespaceLock { lock: lock.clone() };
        }

        let lock = {
            let mut locks = self.locks.write();
            locks
                .entry(name)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        NamespaceLock { lock }
    }

    /// Forgets the lock of a dropped namespace unless a handle to it is
    /// still alive. A waiting writer keeps its lock registered, so later
    /// writers queue behind it instead of getting a fresh lock.
    pub fn remove_idle_lock(&self, namespace: &Namespace) -> bool {
        let mut locks = self.locks.write();
        let name = namespace.to_string();
        match locks.get(&name) {
            Some(lock) if Arc::strong_count(lock) == 1 => locks.remove(&name).is_some(),
            _ => false,
        }
    }

    pub fn lock_count(&self) -> usize {
        self.locks.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn ns(coll: &str) -> Namespace {
        Namespace::new("db", coll)
    }

    #[test]
    fn test_new_lock_registry() {
        let lock_registry = LockRegistry::new();
        assert_eq!(lock_registry.lock_count(), 0);
    }

    #[test]
    fn test_same_namespace_shares_lock() {
        let lock_registry = LockRegistry::new();
        let first = lock_registry.get_lock(&ns("a"));
        let second = lock_registry.get_lock(&ns("a"));
        let _guard = first.lock();
        assert!(second.lock.try_lock().is_none());
        assert_eq!(lock_registry.lock_count(), 1);
    }

    #[test]
    fn test_different_namespaces_are_independent() {
        let lock_registry = LockRegistry::new();
        let first = lock_registry.get_lock(&ns("a"));
        let second = lock_registry.get_lock(&ns("b"));
        let _guard = first.lock();
        assert!(second.lock.try_lock().is_some());
    }

    #[test]
    fn test_remove_idle_lock() {
        let lock_registry = LockRegistry::new();
        let handle = lock_registry.get_lock(&ns("a"));
        assert!(!lock_registry.remove_idle_lock(&ns("a")));
        assert_eq!(lock_registry.lock_count(), 1);

        drop(handle);
        assert!(lock_registry.remove_idle_lock(&ns("a")));
        assert!(!lock_registry.remove_idle_lock(&ns("a")));
        assert_eq!(lock_registry.lock_count(), 0);
    }

    #[test]
    fn test_writers_are_serialized() {
        let lock_registry = LockRegistry::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..4 {
            let registry = lock_registry.clone();
            let inside = inside.clone();
            let overlaps = overlaps.clone();
            handles.push(thread::spawn(move || {
                let handle = registry.get_lock(&ns("a"));
                let _guard = handle.lock();
                if inside.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                thread::sleep(std::time::Duration::from_millis(5));
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }
}
