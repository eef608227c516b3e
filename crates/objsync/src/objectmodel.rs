use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use header::LockWord;

pub mod header;
pub mod reference;

/// The lock-word slot of an object's header.
///
/// The full header of a managed object also carries a vtable pointer and
/// GC bits; only the lock word is modelled here since it is the one field
/// the monitor subsystem owns.
pub struct ObjectHeader {
    word: AtomicU64,
}

impl ObjectHeader {
    pub const fn new() -> Self {
        // Unlocked encodes to zero.
        Self {
            word: AtomicU64::new(0),
        }
    }

    pub fn lock_word(&self) -> LockWord {
        LockWord::decode(self.word.load(Ordering::Acquire))
    }

    /// Strong CAS, for the enter/exit hot loops and single-shot inflation
    /// where a spurious failure would force a large retry iteration.
    pub fn cas_lock_word(&self, old: LockWord, new: LockWord) -> bool {
        self.word
            .compare_exchange(old.encode(), new.encode(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Weak CAS, for opportunistic paths (deflation) that retry or abandon.
    pub fn cas_lock_word_weak(&self, old: LockWord, new: LockWord) -> bool {
        self.word
            .compare_exchange_weak(old.encode(), new.encode(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Collector-side entry: park the word in the transient state while the
    /// object is being relocated. Returns the displaced word, which must be
    /// reinstated with [`gc_end_relocate`](Self::gc_end_relocate) before any
    /// mutator can observe the object again.
    pub fn gc_begin_relocate(&self) -> LockWord {
        let prev = LockWord::decode(
            self.word
                .swap(LockWord::GcTransient.encode(), Ordering::AcqRel),
        );
        debug_assert!(prev != LockWord::GcTransient);
        prev
    }

    pub fn gc_end_relocate(&self, displaced: LockWord) {
        debug_assert!(self.lock_word() == LockWord::GcTransient);
        self.word.store(displaced.encode(), Ordering::Release);
    }
}

impl Default for ObjectHeader {
    fn default() -> Self {
        Self::new()
    }
}

static HASH_STATE: AtomicU32 = AtomicU32::new(0x9e37_79b9);

/// Generate an identity hash. Never returns zero: a zero hash means
/// "no hash assigned" in a monitor's cache.
pub fn generate_hash_code() -> u32 {
    let mut cur = HASH_STATE.load(Ordering::Relaxed);
    loop {
        // xorshift32; a non-zero state never reaches zero.
        let mut x = cur;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        match HASH_STATE.compare_exchange_weak(cur, x, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return x,
            Err(seen) => cur = seen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::header::LockWord;
    use super::*;

    #[test]
    fn cas_swings_word_once() {
        let header = ObjectHeader::new();
        let locked = LockWord::LightLocked { owner: 1, count: 1 };
        assert!(header.cas_lock_word(LockWord::Unlocked, locked));
        assert!(!header.cas_lock_word(LockWord::Unlocked, locked));
        assert_eq!(header.lock_word(), locked);
    }

    #[test]
    fn gc_relocation_roundtrip() {
        let header = ObjectHeader::new();
        let hashed = LockWord::Hashed { hash: 42 };
        assert!(header.cas_lock_word(LockWord::Unlocked, hashed));

        let displaced = header.gc_begin_relocate();
        assert_eq!(displaced, hashed);
        assert_eq!(header.lock_word(), LockWord::GcTransient);
        header.gc_end_relocate(displaced);
        assert_eq!(header.lock_word(), hashed);
    }

    #[test]
    fn generated_hashes_are_nonzero() {
        for _ in 0..1024 {
            assert_ne!(generate_hash_code(), 0);
        }
    }
}
