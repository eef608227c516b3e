use parking_lot::{Condvar, Mutex};

/// Blocking primitive backing a heavyweight monitor.
///
/// Possession is tracked with an explicit flag instead of delegating to a
/// plain mutex guard: inflation seizes the lock on behalf of a thread that
/// may currently be suspended, and release happens from whichever thread
/// the monitor records as owner.
pub struct BasicLock {
    held: Mutex<bool>,
    condvar: Condvar,
}

impl BasicLock {
    pub const fn new() -> Self {
        Self {
            held: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    pub fn lock(&self) {
        let mut held = self.held.lock();
        while *held {
            self.condvar.wait(&mut held);
        }
        *held = true;
    }

    pub fn try_lock(&self) -> bool {
        let mut held = self.held.lock();
        if *held {
            false
        } else {
            *held = true;
            true
        }
    }

    /// Seize the lock for a monitor that has not been published yet, on
    /// behalf of a (possibly suspended) thread. The lock must be free.
    pub fn lock_uncontended(&self) {
        let mut held = self.held.lock();
        debug_assert!(!*held);
        *held = true;
    }

    pub fn unlock(&self) {
        {
            let mut held = self.held.lock();
            debug_assert!(*held);
            *held = false;
        }
        self.condvar.notify_one();
    }

    pub fn is_locked(&self) -> bool {
        *self.held.lock()
    }
}

impl Default for BasicLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_lock_fails_while_held() {
        let lock = BasicLock::new();
        assert!(lock.try_lock());
        assert!(!lock.try_lock());
        lock.unlock();
        assert!(lock.try_lock());
        lock.unlock();
    }

    #[test]
    fn unlock_wakes_blocked_locker() {
        use std::sync::Arc;

        let lock = Arc::new(BasicLock::new());
        lock.lock();

        let contender = {
            let lock = lock.clone();
            std::thread::spawn(move || {
                lock.lock();
                lock.unlock();
            })
        };

        std::thread::sleep(std::time::Duration::from_millis(10));
        lock.unlock();
        contender.join().unwrap();
        assert!(!lock.is_locked());
    }
}
