//! Single-write filename cell.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// A slot holding the first filename discovered for one category.
///
/// States are `empty` and `filled(path)`; within one query cycle the
/// transition is monotonic (first `try_set` wins, later ones fail). `clear`
/// is reserved for the orchestrator between cycles.
///
/// # Invariants
/// - `is_empty` may be observed lock-free, but a `true` result is only a
///   hint: `try_set` revalidates under its own lock, and callers serialize
///   mutations through the repository guard.
/// - `filled` is `true` exactly when the cell holds a path.
pub struct OptionalFile {
    filled: AtomicBool,
    path: Mutex<Option<Vec<u8>>>,
}

impl OptionalFile {
    pub fn new() -> Self {
        Self {
            filled: AtomicBool::new(false),
            path: Mutex::new(None),
        }
    }

    /// Lock-free emptiness probe.
    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.filled.load(Ordering::Relaxed)
    }

    /// Stores `path` if the slot is empty. Returns whether the write won.
    pub fn try_set(&self, path: Vec<u8>) -> bool {
        let mut cell = self.path.lock().unwrap();
        if cell.is_some() {
            return false;
        }
        *cell = Some(path);
        self.filled.store(true, Ordering::Relaxed);
        true
    }

    /// Empties the slot, returning the previous content.
    pub fn clear(&self) -> Option<Vec<u8>> {
        let mut cell = self.path.lock().unwrap();
        self.filled.store(false, Ordering::Relaxed);
        cell.take()
    }
}

impl Default for OptionalFile {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_write_wins() {
        let slot = OptionalFile::new();
        assert!(slot.is_empty());
        assert!(slot.try_set(b"a.txt".to_vec()));
        assert!(!slot.try_set(b"b.txt".to_vec()));
        assert!(!slot.is_empty());
        assert_eq!(slot.clear(), Some(b"a.txt".to_vec()));
        assert!(slot.is_empty());
        assert_eq!(slot.clear(), None);
    }

    #[test]
    fn reusable_after_clear() {
        let slot = OptionalFile::new();
        assert!(slot.try_set(b"x".to_vec()));
        slot.clear();
        assert!(slot.try_set(b"y".to_vec()));
        assert_eq!(slot.clear(), Some(b"y".to_vec()));
    }
}
