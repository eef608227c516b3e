use std::collections::VecDeque;
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::objectmodel::generate_hash_code;
use crate::objectmodel::header::{LockWord, LIGHT_LOCK_COUNT_MAX};
use crate::objectmodel::reference::ObjectReference;
use crate::objectmodel::ObjectHeader;
use crate::options::ContentionPolicy;
use crate::threads::{MutatorThread, ThreadId, NO_THREAD};

use super::basic_lock::BasicLock;
use super::pool::MonitorId;
use super::{MonitorError, ObjSync};

struct WaitQueues {
    /// Threads inside `wait` that have not been notified yet.
    waiters: VecDeque<Arc<MutatorThread>>,
    /// Threads already notified, pending re-acquisition; woken one at a
    /// time as the monitor is released.
    to_wake: VecDeque<Arc<MutatorThread>>,
}

/// A heavyweight monitor: owner, recursion, blocking primitive, cached
/// identity hash and the two wait queues. Owned by the pool until freed.
pub struct Monitor {
    id: MonitorId,
    /// Back reference to the locked object; rewritten by the collector
    /// through `update_monitor_object` when the object moves.
    object: AtomicPtr<ObjectHeader>,
    owner: AtomicU32,
    /// Net `enter` calls by the owner; zero means unowned.
    recursive_counter: AtomicU64,
    /// Threads between deciding to block on this monitor and settling
    /// down again (contended acquirers plus waiters mid-wakeup). Deflation
    /// must see zero here.
    pending_acquirers: AtomicU32,
    lock: BasicLock,
    queues: Mutex<WaitQueues>,
    /// Identity hash migrated in from a `Hashed` word, or generated on
    /// first use; zero means none assigned yet.
    hash_code: AtomicU32,
}

impl Monitor {
    pub(crate) fn new(id: MonitorId, obj: ObjectReference) -> Self {
        Self {
            id,
            object: AtomicPtr::new(obj.as_ptr()),
            owner: AtomicU32::new(NO_THREAD),
            recursive_counter: AtomicU64::new(0),
            pending_acquirers: AtomicU32::new(0),
            lock: BasicLock::new(),
            queues: Mutex::new(WaitQueues {
                waiters: VecDeque::new(),
                to_wake: VecDeque::new(),
            }),
            hash_code: AtomicU32::new(0),
        }
    }

    pub fn id(&self) -> MonitorId {
        self.id
    }

    pub fn object(&self) -> Option<ObjectReference> {
        unsafe { ObjectReference::from_raw(self.object.load(Ordering::Acquire)) }
    }

    /// GC root-update hook: the locked object moved.
    pub fn update_object(&self, obj: ObjectReference) {
        self.object.store(obj.as_ptr(), Ordering::Release);
    }

    pub fn owner(&self) -> ThreadId {
        self.owner.load(Ordering::Acquire)
    }

    fn set_owner(&self, expected: ThreadId, new: ThreadId) -> bool {
        self.owner
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn recursion(&self) -> u64 {
        self.recursive_counter.load(Ordering::Relaxed)
    }

    pub fn has_hash_code(&self) -> bool {
        self.hash_code.load(Ordering::Relaxed) != 0
    }

    /// Cached identity hash, generated on first use.
    pub fn hash_code(&self) -> u32 {
        loop {
            let current = self.hash_code.load(Ordering::Relaxed);
            if current != 0 {
                return current;
            }
            let new = generate_hash_code();
            if self
                .hash_code
                .compare_exchange_weak(0, new, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return new;
            }
        }
    }

    fn set_hash_code(&self, hash: u32) {
        if self
            .hash_code
            .compare_exchange(0, hash, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            log::error!("monitor {}: attempt to rewrite cached hash", self.id);
            panic!("attempt to rewrite hash in monitor");
        }
    }

    /// Take possession for `thread`. With `trylock` the call fails instead
    /// of blocking when the monitor is contended.
    pub(crate) fn acquire(
        &self,
        thread: &Arc<MutatorThread>,
        obj: ObjectReference,
        trylock: bool,
    ) -> bool {
        if self.owner() == thread.id() {
            self.recursive_counter.fetch_add(1, Ordering::Relaxed);
            log::debug!("monitor {}: recursive acquire by thread {}", self.id, thread.id());
            return true;
        }

        if trylock {
            if !self.lock.try_lock() {
                return false;
            }
        } else if !self.lock.try_lock() {
            self.pending_acquirers.fetch_add(1, Ordering::AcqRel);
            // Record where we are about to block so privileged shutdown
            // threads can recognize the dependency.
            thread.set_entering_monitor(Some(self.id));
            self.lock.lock();
            thread.set_entering_monitor(None);
            self.finish_acquire(thread);
            self.pending_acquirers.fetch_sub(1, Ordering::AcqRel);
            log::debug!(
                "monitor {}: contended acquire of {obj:?} by thread {}",
                self.id,
                thread.id()
            );
            return true;
        }

        self.finish_acquire(thread);
        log::debug!("monitor {}: acquired {obj:?} by thread {}", self.id, thread.id());
        true
    }

    fn finish_acquire(&self, thread: &Arc<MutatorThread>) {
        if !self.set_owner(NO_THREAD, thread.id()) {
            log::error!("monitor {}: owner slot not empty on acquire", self.id);
            panic!("monitor owner slot not empty on acquire");
        }
        thread.add_monitor(self.id);
        self.recursive_counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop one recursion level; on reaching zero, hand the monitor over.
    /// False if `thread` is not the owner.
    pub(crate) fn release(&self, thread: &Arc<MutatorThread>) -> bool {
        if self.owner() != thread.id() {
            log::error!(
                "monitor {}: release by thread {} which does not own it",
                self.id,
                thread.id()
            );
            return false;
        }
        let previous = self.recursive_counter.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(previous >= 1);
        if previous == 1 {
            if !self.set_owner(thread.id(), NO_THREAD) {
                log::error!("monitor {}: owner slot changed under release", self.id);
                panic!("monitor owner slot changed under release");
            }
            // One notified thread at a time; the next is woken by the
            // next full release.
            let waiter = self.queues.lock().to_wake.pop_front();
            thread.remove_monitor(self.id);
            self.lock.unlock();
            // Signal strictly after unlocking so the woken thread does
            // not bounce off the primitive we still hold.
            if let Some(waiter) = waiter {
                if waiter.waiting_monitor() == Some(self.id) {
                    log::debug!("monitor {}: waking thread {}", self.id, waiter.id());
                    waiter.parker().signal();
                }
            }
        }
        true
    }

    /// Seed a freshly created, still unpublished monitor with an owner.
    /// Possession can be taken on behalf of a suspended thread since
    /// nobody else can reach the monitor yet.
    fn init_with_owner(&self, thread: &Arc<MutatorThread>) {
        debug_assert_eq!(self.owner(), NO_THREAD);
        self.lock.lock_uncontended();
        if !self.set_owner(NO_THREAD, thread.id()) {
            log::error!("monitor {}: owner slot not empty on init", self.id);
            panic!("monitor owner slot not empty on init");
        }
        self.recursive_counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Roll back `init_with_owner` after the publication CAS lost a race.
    fn release_on_failed_inflate(&self, thread: &Arc<MutatorThread>) {
        if self.owner() != thread.id() {
            log::error!("monitor {}: failed-inflate rollback by non-owner", self.id);
            panic!("failed-inflate rollback by non-owner");
        }
        let previous = self.recursive_counter.fetch_sub(1, Ordering::Relaxed);
        debug_assert_eq!(previous, 1);
        if !self.set_owner(thread.id(), NO_THREAD) {
            log::error!("monitor {}: owner slot changed under rollback", self.id);
            panic!("monitor owner slot changed under rollback");
        }
        self.lock.unlock();
    }

    /// Try to retire this monitor back to a light encoding. Caller holds
    /// the pool lock, which freezes the id until we return.
    pub(crate) fn deflate_internal(&self) -> bool {
        if self.owner() != NO_THREAD {
            return false;
        }
        if self.pending_acquirers.load(Ordering::Acquire) > 0 {
            return false;
        }
        {
            let queues = self.queues.lock();
            if !queues.waiters.is_empty() || !queues.to_wake.is_empty() {
                return false;
            }
        }
        if !self.lock.try_lock() {
            return false;
        }
        // Holding the primitive: no thread can become owner now, and the
        // precondition checks above rule out anyone mid-acquire.
        debug_assert_eq!(self.recursion(), 0);

        let Some(obj) = self.object() else {
            log::error!("monitor {}: no object back reference during deflation", self.id);
            panic!("monitor without object back reference");
        };
        let header = obj.header();
        let new_word = if self.has_hash_code() {
            LockWord::Hashed {
                hash: self.hash_code.load(Ordering::Relaxed),
            }
        } else {
            LockWord::Unlocked
        };
        // Weak CAS is fine: only spurious failures are possible, since the
        // word can't change away from our own heavy encoding while we hold
        // everything above.
        loop {
            let old_word = header.lock_word();
            debug_assert_eq!(old_word, LockWord::HeavyLocked { monitor: self.id });
            if header.cas_lock_word_weak(old_word, new_word) {
                break;
            }
        }
        self.lock.unlock();
        true
    }

    /// Implements `Enter`/`TryEnter`: the lock-word state machine with
    /// light-lock fast paths and escalation to a heavyweight monitor.
    pub fn enter(
        sync: &ObjSync,
        thread: &Arc<MutatorThread>,
        obj: ObjectReference,
        trylock: bool,
    ) -> Result<(), MonitorError> {
        let mut spin_count: u32 = 0;
        let mut should_inflate = false;

        loop {
            let word = obj.header().lock_word();
            log::trace!("thread {}: enter {obj:?} with word {word:?}", thread.id());

            match word {
                LockWord::HeavyLocked { monitor } => {
                    let Some(monitor) = Self::lookup_live(sync, obj, monitor) else {
                        // Deflated between the read and the lookup.
                        continue;
                    };
                    if !monitor.acquire(thread, obj, trylock) {
                        return Err(MonitorError::IllegalMonitorState);
                    }
                    // The monitor can be deflated and freed in the window
                    // between the lookup and the acquisition; an id no
                    // longer live in the pool guards nothing.
                    if !Self::still_live(sync, &monitor) {
                        monitor.release(thread);
                        continue;
                    }
                    thread.push_locked_object(obj);
                    return Ok(());
                }
                LockWord::LightLocked { owner, count } if owner == thread.id() => {
                    if count < LIGHT_LOCK_COUNT_MAX {
                        let new_word = LockWord::LightLocked {
                            owner,
                            count: count + 1,
                        };
                        // Strong CAS: the loop iteration is large.
                        if obj.header().cas_lock_word(word, new_word) {
                            thread.push_locked_object(obj);
                            return Ok(());
                        }
                        // CAS failure means someone inflated our lock;
                        // the next iteration acquires recursively.
                        if trylock {
                            return Err(MonitorError::IllegalMonitorState);
                        }
                    } else {
                        // Recursion no longer fits the inline encoding.
                        Self::inflate::<false>(sync, obj, thread);
                    }
                }
                LockWord::LightLocked { owner, .. } => {
                    if trylock {
                        return Err(MonitorError::IllegalMonitorState);
                    }
                    // Spin before escalating, to spare short critical
                    // sections the cost of inflation.
                    let options = sync.options();
                    spin_count += 1;
                    if spin_count < options.spin_limit {
                        if spin_count > options.yield_threshold {
                            std::thread::yield_now();
                        }
                    } else {
                        match options.contention_policy {
                            ContentionPolicy::SuspendAndInflate => {
                                Self::inflate_contended(sync, obj, owner);
                                spin_count = 0;
                            }
                            ContentionPolicy::SleepRetry => {
                                std::thread::sleep(options.sleep_quantum);
                                should_inflate = true;
                            }
                        }
                    }
                }
                LockWord::Hashed { .. } => {
                    // The light encoding has no room for the hash; only a
                    // monitor can carry both.
                    if Self::inflate::<false>(sync, obj, thread) {
                        thread.push_locked_object(obj);
                        return Ok(());
                    }
                    if trylock {
                        return Err(MonitorError::IllegalMonitorState);
                    }
                }
                LockWord::Unlocked => {
                    if should_inflate {
                        if Self::inflate::<false>(sync, obj, thread) {
                            thread.push_locked_object(obj);
                            return Ok(());
                        }
                        if trylock {
                            return Err(MonitorError::IllegalMonitorState);
                        }
                        continue;
                    }
                    let new_word = LockWord::LightLocked {
                        owner: thread.id(),
                        count: 1,
                    };
                    // Strong CAS: the loop iteration is large.
                    if obj.header().cas_lock_word(word, new_word) {
                        thread.push_locked_object(obj);
                        return Ok(());
                    }
                    if trylock {
                        return Err(MonitorError::IllegalMonitorState);
                    }
                }
                LockWord::GcTransient => fatal_gc_observed(obj),
            }
        }
    }

    /// Implements `Exit`.
    pub fn exit(
        sync: &ObjSync,
        thread: &Arc<MutatorThread>,
        obj: ObjectReference,
    ) -> Result<(), MonitorError> {
        Self::exit_internal(sync, thread, obj, true)
    }

    fn exit_internal(
        sync: &ObjSync,
        thread: &Arc<MutatorThread>,
        obj: ObjectReference,
        record: bool,
    ) -> Result<(), MonitorError> {
        loop {
            let word = obj.header().lock_word();
            log::trace!("thread {}: exit {obj:?} with word {word:?}", thread.id());

            match word {
                LockWord::HeavyLocked { monitor } => {
                    let Some(monitor) = Self::lookup_live(sync, obj, monitor) else {
                        continue;
                    };
                    return if monitor.release(thread) {
                        if record {
                            thread.pop_locked_object(obj);
                        }
                        Ok(())
                    } else {
                        Err(MonitorError::IllegalMonitorState)
                    };
                }
                LockWord::LightLocked { owner, count } => {
                    if owner != thread.id() {
                        log::debug!(
                            "thread {}: exit on {obj:?} light-locked by thread {owner}",
                            thread.id()
                        );
                        return Err(MonitorError::IllegalMonitorState);
                    }
                    let new_word = if count > 1 {
                        LockWord::LightLocked {
                            owner,
                            count: count - 1,
                        }
                    } else {
                        LockWord::Unlocked
                    };
                    // Strong CAS: the loop iteration is large. Failure
                    // means a contender inflated our lock; retry as heavy.
                    if obj.header().cas_lock_word(word, new_word) {
                        if record {
                            thread.pop_locked_object(obj);
                        }
                        return Ok(());
                    }
                }
                LockWord::Unlocked | LockWord::Hashed { .. } => {
                    log::debug!("thread {}: exit on unlocked {obj:?}", thread.id());
                    return Err(MonitorError::IllegalMonitorState);
                }
                LockWord::GcTransient => fatal_gc_observed(obj),
            }
        }
    }

    /// Implements `Wait`. A timeout of zero millis and zero nanos waits
    /// indefinitely.
    pub fn wait(
        sync: &ObjSync,
        thread: &Arc<MutatorThread>,
        obj: ObjectReference,
        timeout_ms: u64,
        timeout_ns: u32,
        ignore_interruption: bool,
    ) -> Result<(), MonitorError> {
        loop {
            let word = obj.header().lock_word();
            log::trace!("thread {}: wait on {obj:?} with word {word:?}", thread.id());

            match word {
                LockWord::HeavyLocked { monitor } => {
                    let Some(monitor) = Self::lookup_live(sync, obj, monitor) else {
                        continue;
                    };
                    if monitor.owner() != thread.id() {
                        log::debug!(
                            "thread {}: wait on {obj:?} owned by thread {}",
                            thread.id(),
                            monitor.owner()
                        );
                        return Err(MonitorError::IllegalMonitorState);
                    }

                    // The parker mutex stays held across queueing, release
                    // and the park itself: a notify between release and
                    // park is remembered by the signal flag.
                    let mut guard = thread.parker().lock();
                    // A signal from an earlier epoch (an interrupt kick
                    // outside wait, or a wakeup that raced a timeout) must
                    // not satisfy this park; the signal meant for it can
                    // only arrive once the monitor is released below.
                    thread.parker().clear(&mut guard);
                    if !ignore_interruption && thread.is_interrupted() {
                        return Err(MonitorError::Interrupted);
                    }

                    let recursion = monitor.recursion();
                    monitor.queues.lock().waiters.push_back(thread.clone());
                    thread.set_waiting_monitor(Some(monitor.id));
                    // Collapse to a single hold so the release below fully
                    // unlocks for other threads.
                    monitor.recursive_counter.store(1, Ordering::Relaxed);
                    monitor.pending_acquirers.fetch_add(1, Ordering::AcqRel);
                    let released = monitor.release(thread);
                    debug_assert!(released);

                    let timed_out = if timeout_ms == 0 && timeout_ns == 0 {
                        thread.parker().park(&mut guard);
                        false
                    } else {
                        let timeout = Duration::from_millis(timeout_ms)
                            + Duration::from_nanos(timeout_ns as u64);
                        thread.parker().park_timed(&mut guard, timeout)
                    };
                    // Drop the parker before re-acquiring to keep the
                    // releaser's wake path lock-free against us.
                    drop(guard);

                    let reacquired = monitor.acquire(thread, obj, false);
                    debug_assert!(reacquired);
                    monitor.pending_acquirers.fetch_sub(1, Ordering::AcqRel);
                    monitor.recursive_counter.store(recursion, Ordering::Relaxed);

                    let mut result = Ok(());
                    if !ignore_interruption && thread.is_interrupted() {
                        result = Err(MonitorError::Interrupted);
                    }

                    // On notify we were moved to to_wake; on timeout or
                    // interruption we are still in waiters.
                    {
                        let mut queues = monitor.queues.lock();
                        if !remove_thread(&mut queues.waiters, thread.id()) {
                            remove_thread(&mut queues.to_wake, thread.id());
                        }
                    }
                    thread.set_waiting_monitor(None);
                    log::debug!(
                        "thread {}: wait on {obj:?} finished (timed_out={timed_out})",
                        thread.id()
                    );
                    return result;
                }
                LockWord::LightLocked { owner, .. } => {
                    if owner != thread.id() {
                        return Err(MonitorError::IllegalMonitorState);
                    }
                    // Waiting always happens on a heavyweight monitor.
                    Self::inflate::<false>(sync, obj, thread);
                }
                LockWord::Unlocked | LockWord::Hashed { .. } => {
                    return Err(MonitorError::IllegalMonitorState);
                }
                LockWord::GcTransient => fatal_gc_observed(obj),
            }
        }
    }

    /// Implements `Notify`: move one waiter to the wake queue. The parker
    /// signal is deferred to `release`, when the lock actually becomes
    /// available.
    pub fn notify(
        sync: &ObjSync,
        thread: &Arc<MutatorThread>,
        obj: ObjectReference,
    ) -> Result<(), MonitorError> {
        loop {
            let word = obj.header().lock_word();
            match word {
                LockWord::HeavyLocked { monitor } => {
                    let Some(monitor) = Self::lookup_live(sync, obj, monitor) else {
                        continue;
                    };
                    if monitor.owner() != thread.id() {
                        return Err(MonitorError::IllegalMonitorState);
                    }
                    let mut queues = monitor.queues.lock();
                    if let Some(waiter) = queues.waiters.pop_front() {
                        queues.to_wake.push_back(waiter);
                    }
                    return Ok(());
                }
                LockWord::LightLocked { owner, .. } => {
                    // A light lock trivially has no waiters.
                    return if owner == thread.id() {
                        Ok(())
                    } else {
                        Err(MonitorError::IllegalMonitorState)
                    };
                }
                LockWord::Unlocked | LockWord::Hashed { .. } => {
                    return Err(MonitorError::IllegalMonitorState);
                }
                LockWord::GcTransient => fatal_gc_observed(obj),
            }
        }
    }

    /// Implements `NotifyAll`: splice the whole waiter queue onto the wake
    /// queue.
    pub fn notify_all(
        sync: &ObjSync,
        thread: &Arc<MutatorThread>,
        obj: ObjectReference,
    ) -> Result<(), MonitorError> {
        loop {
            let word = obj.header().lock_word();
            match word {
                LockWord::HeavyLocked { monitor } => {
                    let Some(monitor) = Self::lookup_live(sync, obj, monitor) else {
                        continue;
                    };
                    if monitor.owner() != thread.id() {
                        return Err(MonitorError::IllegalMonitorState);
                    }
                    let mut queues = monitor.queues.lock();
                    let mut waiters = std::mem::take(&mut queues.waiters);
                    queues.to_wake.append(&mut waiters);
                    return Ok(());
                }
                LockWord::LightLocked { owner, .. } => {
                    return if owner == thread.id() {
                        Ok(())
                    } else {
                        Err(MonitorError::IllegalMonitorState)
                    };
                }
                LockWord::Unlocked | LockWord::Hashed { .. } => {
                    return Err(MonitorError::IllegalMonitorState);
                }
                LockWord::GcTransient => fatal_gc_observed(obj),
            }
        }
    }

    /// Promote a light (or hashed/unlocked) word to a heavyweight monitor.
    ///
    /// With `FOR_OTHER_THREAD` the promotion happens on behalf of `thread`,
    /// which is the *owner* of the light lock and is currently suspended;
    /// the function aborts harmlessly unless the word still shows that
    /// exact ownership. Returns false if someone else changed the word
    /// first — the caller retries from its own loop.
    pub(crate) fn inflate<const FOR_OTHER_THREAD: bool>(
        sync: &ObjSync,
        obj: ObjectReference,
        thread: &Arc<MutatorThread>,
    ) -> bool {
        let old_word = obj.header().lock_word();

        // Don't inflate if someone already did.
        if matches!(old_word, LockWord::HeavyLocked { .. }) {
            return false;
        }
        if FOR_OTHER_THREAD {
            match old_word {
                LockWord::LightLocked { owner, .. } if owner == thread.id() => {}
                // Owner already released or the lock changed hands.
                _ => return false,
            }
        }

        let monitor = sync.pool().create(obj);
        monitor.init_with_owner(thread);

        match old_word {
            LockWord::LightLocked { owner, count } => {
                if owner != thread.id() {
                    monitor.release_on_failed_inflate(thread);
                    sync.pool().free(monitor.id());
                    return false;
                }
                // Recursion transfers from the inline encoding.
                monitor.recursive_counter.store(count as u64, Ordering::Relaxed);
            }
            LockWord::Hashed { hash } => monitor.set_hash_code(hash),
            LockWord::Unlocked => debug_assert!(!FOR_OTHER_THREAD),
            LockWord::HeavyLocked { .. } => unreachable!(),
            LockWord::GcTransient => fatal_gc_observed(obj),
        }

        let new_word = LockWord::HeavyLocked {
            monitor: monitor.id(),
        };
        // Single-shot strong CAS from the exact observed word.
        if obj.header().cas_lock_word(old_word, new_word) {
            // Record on the owner only once the word is published, so a
            // concurrent release-all never sees a half-installed monitor.
            thread.add_monitor(monitor.id());
            log::debug!("inflated {obj:?} to monitor {}", monitor.id());
            true
        } else {
            monitor.recursive_counter.store(1, Ordering::Relaxed);
            monitor.release_on_failed_inflate(thread);
            sync.pool().free(monitor.id());
            false
        }
    }

    /// Suspend-and-inflate escalation for a light lock held by `owner`
    /// (§"suspend the owner, inflate on its behalf, resume"). Suspension
    /// failure (owner terminated, no suspender installed) is harmless —
    /// the caller just keeps retrying the light lock.
    fn inflate_contended(sync: &ObjSync, obj: ObjectReference, owner: ThreadId) {
        if let Some(owner_thread) = sync.suspender().suspend_and_wait(owner) {
            // The owner may have released or re-locked since the word was
            // read; `inflate` verifies and aborts harmlessly.
            Self::inflate::<true>(sync, obj, &owner_thread);
            sync.suspender().resume(&owner_thread);
        }
    }

    /// Implements `Deflate` for a single object.
    pub fn deflate(sync: &ObjSync, obj: ObjectReference) -> bool {
        match obj.header().lock_word() {
            LockWord::HeavyLocked { monitor } => sync.pool().deflate(monitor),
            _ => {
                log::debug!("deflate on {obj:?} which is not heavy-locked");
                false
            }
        }
    }

    /// Implements `HoldsLock`.
    pub fn holds_lock(sync: &ObjSync, thread: &Arc<MutatorThread>, obj: ObjectReference) -> bool {
        loop {
            match obj.header().lock_word() {
                LockWord::HeavyLocked { monitor } => {
                    let Some(monitor) = Self::lookup_live(sync, obj, monitor) else {
                        continue;
                    };
                    return monitor.owner() == thread.id();
                }
                LockWord::LightLocked { owner, .. } => return owner == thread.id(),
                LockWord::Unlocked | LockWord::Hashed { .. } => return false,
                LockWord::GcTransient => fatal_gc_observed(obj),
            }
        }
    }

    /// Implements `GetLockOwnerThreadId`.
    pub fn lock_owner_id(sync: &ObjSync, obj: ObjectReference) -> Option<ThreadId> {
        loop {
            match obj.header().lock_word() {
                LockWord::HeavyLocked { monitor } => {
                    let Some(monitor) = Self::lookup_live(sync, obj, monitor) else {
                        continue;
                    };
                    return match monitor.owner() {
                        NO_THREAD => None,
                        id => Some(id),
                    };
                }
                LockWord::LightLocked { owner, .. } => return Some(owner),
                LockWord::Unlocked | LockWord::Hashed { .. } => return None,
                LockWord::GcTransient => fatal_gc_observed(obj),
            }
        }
    }

    /// Implements `GetHashCode`: the identity hash survives every lock
    /// state, migrating between the word and the monitor cache. Never
    /// changes ownership semantics, only the encoding.
    pub fn hash_code_of(
        sync: &ObjSync,
        thread: &Arc<MutatorThread>,
        obj: ObjectReference,
    ) -> u32 {
        loop {
            let word = obj.header().lock_word();
            match word {
                LockWord::Unlocked => {
                    let hash = generate_hash_code();
                    if obj
                        .header()
                        .cas_lock_word(word, LockWord::Hashed { hash })
                    {
                        return hash;
                    }
                }
                LockWord::Hashed { hash } => return hash,
                LockWord::LightLocked { owner, .. } => {
                    if owner == thread.id() {
                        Self::inflate::<false>(sync, obj, thread);
                    } else {
                        Self::inflate_contended(sync, obj, owner);
                        std::thread::yield_now();
                    }
                }
                LockWord::HeavyLocked { monitor } => {
                    let Some(monitor) = Self::lookup_live(sync, obj, monitor) else {
                        continue;
                    };
                    let hash = monitor.hash_code();
                    // A monitor deflated under us migrated its hash (if
                    // any) back into the word; re-read rather than trust a
                    // hash generated in an orphan.
                    if Self::still_live(sync, &monitor) {
                        return hash;
                    }
                }
                LockWord::GcTransient => fatal_gc_observed(obj),
            }
        }
    }

    /// Implements `GetMonitorFromObject`.
    pub fn monitor_of(sync: &ObjSync, obj: ObjectReference) -> Option<Arc<Monitor>> {
        match obj.header().lock_word() {
            LockWord::HeavyLocked { monitor } => sync.pool().lookup(monitor),
            _ => None,
        }
    }

    /// Lifecycle hook for abnormal thread termination: unwind every lock
    /// the thread still records, newest first, in O(held).
    pub(crate) fn release_all_for_thread(sync: &ObjSync, thread: &Arc<MutatorThread>) {
        while let Some(obj) = thread.pop_newest_locked_object() {
            // Each recorded object corresponds to exactly one enter.
            let _ = Self::exit_internal(sync, thread, obj, false);
        }
        // Anything left over means bookkeeping was broken by the dying
        // thread; force-release rather than leave monitors wedged.
        for id in thread.drain_held_monitors() {
            let Some(monitor) = sync.pool().lookup(id) else {
                continue;
            };
            if monitor.owner() == thread.id() {
                log::error!(
                    "thread {}: monitor {id} still held after unwind, force releasing",
                    thread.id()
                );
                monitor.recursive_counter.store(1, Ordering::Relaxed);
                monitor.release(thread);
            }
        }
    }

    /// Whether `monitor` is still the pool's live entry for its id.
    fn still_live(sync: &ObjSync, monitor: &Arc<Monitor>) -> bool {
        sync.pool()
            .lookup(monitor.id())
            .is_some_and(|live| Arc::ptr_eq(&live, monitor))
    }

    /// Resolve a heavy word to its live monitor. `None` means the monitor
    /// was deflated between the word read and the lookup and the caller
    /// should re-read; a word still naming a dead monitor is corruption.
    fn lookup_live(
        sync: &ObjSync,
        obj: ObjectReference,
        id: MonitorId,
    ) -> Option<Arc<Monitor>> {
        if let Some(monitor) = sync.pool().lookup(id) {
            return Some(monitor);
        }
        if obj.header().lock_word() == (LockWord::HeavyLocked { monitor: id }) {
            log::error!("lock word of {obj:?} references dead monitor {id}");
            panic!("lock word references dead monitor");
        }
        None
    }
}

fn remove_thread(queue: &mut VecDeque<Arc<MutatorThread>>, id: ThreadId) -> bool {
    if let Some(ix) = queue.iter().position(|t| t.id() == id) {
        queue.remove(ix);
        true
    } else {
        false
    }
}

fn fatal_gc_observed(obj: ObjectReference) -> ! {
    log::error!("lock word of {obj:?} observed in GC-transient state");
    panic!("lock operation observed GC-transient lock word");
}
