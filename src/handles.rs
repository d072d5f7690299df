use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::trace;
use parking_lot::RwLock;

use crate::error::{BridgeError, Result};

/// Opaque identifier the managed host holds in place of a native reference.
///
/// Zero is never issued, so hosts may use it as their "no object" value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

impl Handle {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn into_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type Entry = Arc<dyn Any + Send + Sync>;

/// Registry of natively-owned objects exposed to the host by handle.
///
/// Each entry holds one strong reference. Handle values come from a
/// monotonic counter and are never reissued by the same table, so a stale
/// handle can only ever resolve to `UnknownHandle`.
pub struct HandleTable {
    next: AtomicU64,
    entries: RwLock<HashMap<u64, Entry>>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `object` and returns a fresh handle for it.
    pub fn create<T>(&self, object: Arc<T>) -> Handle
    where
        T: Any + Send + Sync,
    {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        self.entries.write().insert(raw, object);
        trace!("created handle #{raw} for {}", type_name::<T>());
        Handle(raw)
    }

    /// Returns the type-erased object behind `handle`.
    pub fn resolve_any(&self, handle: Handle) -> Result<Entry> {
        self.entries
            .read()
            .get(&handle.0)
            .cloned()
            .ok_or(BridgeError::UnknownHandle(handle))
    }

    /// Returns the object behind `handle`, checking that it is a `T`.
    pub fn resolve<T>(&self, handle: Handle) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.resolve_any(handle)?
            .downcast::<T>()
            .map_err(|_| BridgeError::HandleTypeMismatch {
                handle,
                expected: type_name::<T>(),
            })
    }

    /// Drops the table's reference to the object behind `handle`.
    ///
    /// If that was the last strong reference the object's destructor runs on
    /// the calling thread, after the table lock has been released.
    pub fn release(&self, handle: Handle) -> Result<()> {
        let entry = self
            .entries
            .write()
            .remove(&handle.0)
            .ok_or(BridgeError::UnknownHandle(handle))?;
        trace!("released handle {handle}");
        drop(entry);
        Ok(())
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.entries.read().contains_key(&handle.0)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Releases every remaining entry, returning how many there were.
    pub fn drain(&self) -> usize {
        let entries = std::mem::take(&mut *self.entries.write());
        let count = entries.len();
        drop(entries);
        count
    }
}

impl fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("live", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn resolve_returns_the_same_object() {
        let table = HandleTable::new();
        let object = Arc::new(String::from("material"));
        let handle = table.create(Arc::clone(&object));
        let resolved = table.resolve::<String>(handle).unwrap();
        assert!(Arc::ptr_eq(&object, &resolved));
    }

    #[test]
    fn handles_are_never_zero() {
        let table = HandleTable::new();
        let handle = table.create(Arc::new(1u32));
        assert_ne!(handle.into_raw(), 0);
    }

    #[test]
    fn double_release_is_reported() {
        let table = HandleTable::new();
        let handle = table.create(Arc::new(5u8));
        table.release(handle).unwrap();
        assert!(matches!(
            table.release(handle),
            Err(BridgeError::UnknownHandle(h)) if h == handle
        ));
        assert!(matches!(
            table.resolve::<u8>(handle),
            Err(BridgeError::UnknownHandle(_))
        ));
    }

    #[test]
    fn resolve_with_wrong_type_is_rejected() {
        let table = HandleTable::new();
        let handle = table.create(Arc::new(3.5f32));
        assert!(matches!(
            table.resolve::<String>(handle),
            Err(BridgeError::HandleTypeMismatch { .. })
        ));
        assert!(table.contains(handle));
    }

    #[test]
    fn release_runs_destructor_only_for_last_reference() {
        let drops = Arc::new(AtomicUsize::new(0));
        let table = HandleTable::new();
        let object = Arc::new(DropCounter(Arc::clone(&drops)));
        let first = table.create(Arc::clone(&object));
        let second = table.create(Arc::clone(&object));
        drop(object);

        table.release(first).unwrap();
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        assert!(table.resolve::<DropCounter>(second).is_ok());

        table.release(second).unwrap();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drain_drops_everything() {
        let drops = Arc::new(AtomicUsize::new(0));
        let table = HandleTable::new();
        for _ in 0..4 {
            table.create(Arc::new(DropCounter(Arc::clone(&drops))));
        }
        assert_eq!(table.drain(), 4);
        assert!(table.is_empty());
        assert_eq!(drops.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn concurrent_creates_yield_distinct_handles() {
        const THREADS: usize = 8;
        const TOTAL: usize = 10_000;

        let table = Arc::new(HandleTable::new());
        let workers: Vec<_> = (0..THREADS)
            .map(|worker| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    let per_thread = TOTAL / THREADS;
                    (0..per_thread)
                        .map(|i| table.create(Arc::new((worker, i))))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for worker in workers {
            for handle in worker.join().unwrap() {
                assert!(seen.insert(handle), "duplicate handle {handle}");
            }
        }
        assert_eq!(seen.len(), TOTAL);
        assert_eq!(table.len(), TOTAL);
    }
}
