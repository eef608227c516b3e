use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::objectmodel::header::LIGHT_LOCK_THREAD_ID_MAX;
use crate::objectmodel::reference::ObjectReference;
use crate::sync::pool::MonitorId;

pub type ThreadId = u32;

/// Reserved id meaning "no thread"; also what an unowned monitor reports.
pub const NO_THREAD: ThreadId = 0;

const NO_MONITOR: MonitorId = 0;

/// Signal-flag parker a thread blocks on while inside `wait` or while a
/// released monitor hands it the lock.
///
/// The flag (rather than a bare condvar) closes the window between a
/// waiter releasing the monitor and actually parking: a notification
/// arriving in between is remembered and consumed without sleeping.
pub struct Parker {
    signalled: Mutex<bool>,
    condvar: Condvar,
}

impl Parker {
    const fn new() -> Self {
        Self {
            signalled: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Take the parker mutex. `wait` holds this guard across the
    /// release-then-park sequence so no signal can slip through.
    pub fn lock(&self) -> MutexGuard<'_, bool> {
        self.signalled.lock()
    }

    pub fn park(&self, guard: &mut MutexGuard<'_, bool>) {
        while !**guard {
            self.condvar.wait(guard);
        }
        **guard = false;
    }

    /// Returns true if the timeout elapsed without a signal.
    pub fn park_timed(&self, guard: &mut MutexGuard<'_, bool>, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !**guard {
            if self.condvar.wait_until(guard, deadline).timed_out() {
                break;
            }
        }
        let signalled = **guard;
        **guard = false;
        !signalled
    }

    /// Discard a signal left over from an earlier epoch, e.g. an
    /// interrupt kick delivered while the thread was not parked. Called
    /// with the guard held, before the sequence the next signal belongs
    /// to begins.
    pub fn clear(&self, guard: &mut MutexGuard<'_, bool>) {
        **guard = false;
    }

    pub fn signal(&self) {
        let mut signalled = self.signalled.lock();
        *signalled = true;
        self.condvar.notify_one();
    }
}

/// A mutator thread as the monitor subsystem sees it: an id small enough
/// for the light-lock encoding plus the bookkeeping needed for
/// exception-safe release, deadlock avoidance and `wait`.
pub struct MutatorThread {
    id: ThreadId,
    parker: Parker,
    interrupted: AtomicBool,
    /// Heavyweight monitors currently held; maintained by acquire/release.
    held_monitors: Mutex<Vec<MonitorId>>,
    /// Every object this thread has entered, newest last. Walked in reverse
    /// by `release_all_held_by` to unwind on abnormal termination.
    locked_objects: Mutex<Vec<ObjectReference>>,
    /// Monitor this thread is blocked acquiring, if any. Privileged
    /// (daemon) threads inspect this during orderly shutdown to notice
    /// that releasing their own locks would unblock the pipeline.
    entering_monitor: AtomicU32,
    /// Monitor this thread is parked on inside `wait`, if any.
    waiting_monitor: AtomicU32,
}

impl MutatorThread {
    fn new(id: ThreadId) -> Self {
        Self {
            id,
            parker: Parker::new(),
            interrupted: AtomicBool::new(false),
            held_monitors: Mutex::new(Vec::new()),
            locked_objects: Mutex::new(Vec::new()),
            entering_monitor: AtomicU32::new(NO_MONITOR),
            waiting_monitor: AtomicU32::new(NO_MONITOR),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn parker(&self) -> &Parker {
        &self.parker
    }

    /// Set the sticky interrupted flag and kick the parker so a thread
    /// blocked in `wait` re-examines its state.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
        self.parker.signal();
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    /// Consume the interrupted flag. The caller (the language layer) maps a
    /// consumed interruption onto its own exception type.
    pub fn take_interrupted(&self) -> bool {
        self.interrupted.swap(false, Ordering::AcqRel)
    }

    pub fn entering_monitor(&self) -> Option<MonitorId> {
        match self.entering_monitor.load(Ordering::Acquire) {
            NO_MONITOR => None,
            id => Some(id),
        }
    }

    pub fn waiting_monitor(&self) -> Option<MonitorId> {
        match self.waiting_monitor.load(Ordering::Acquire) {
            NO_MONITOR => None,
            id => Some(id),
        }
    }

    pub(crate) fn set_entering_monitor(&self, id: Option<MonitorId>) {
        self.entering_monitor
            .store(id.unwrap_or(NO_MONITOR), Ordering::Release);
    }

    pub(crate) fn set_waiting_monitor(&self, id: Option<MonitorId>) {
        self.waiting_monitor
            .store(id.unwrap_or(NO_MONITOR), Ordering::Release);
    }

    pub(crate) fn add_monitor(&self, id: MonitorId) {
        self.held_monitors.lock().push(id);
    }

    pub(crate) fn remove_monitor(&self, id: MonitorId) {
        let mut held = self.held_monitors.lock();
        if let Some(ix) = held.iter().rposition(|&m| m == id) {
            held.remove(ix);
        }
    }

    pub fn holds_monitor(&self, id: MonitorId) -> bool {
        self.held_monitors.lock().contains(&id)
    }

    pub(crate) fn drain_held_monitors(&self) -> Vec<MonitorId> {
        std::mem::take(&mut *self.held_monitors.lock())
    }

    pub(crate) fn push_locked_object(&self, obj: ObjectReference) {
        self.locked_objects.lock().push(obj);
    }

    pub(crate) fn pop_locked_object(&self, obj: ObjectReference) {
        let mut objects = self.locked_objects.lock();
        if let Some(ix) = objects.iter().rposition(|&o| o == obj) {
            objects.remove(ix);
        }
    }

    pub(crate) fn pop_newest_locked_object(&self) -> Option<ObjectReference> {
        self.locked_objects.lock().pop()
    }
}

/// Suspension collaborator: the safepoint mechanism the runtime already
/// has. Injected rather than called directly so the monitor subsystem can
/// be exercised without a full thread manager.
pub trait ThreadSuspender: Send + Sync {
    /// Suspend the thread with the given id and block until it has stopped
    /// at a known point. `None` means the thread terminated or could not be
    /// suspended; callers treat that as a harmless failed attempt.
    fn suspend_and_wait(&self, id: ThreadId) -> Option<Arc<MutatorThread>>;

    fn resume(&self, thread: &MutatorThread);
}

/// Suspender that never succeeds. With it installed, the
/// suspend-and-inflate contention policy degrades to plain spin-retry,
/// which is still correct: inflation on behalf of another thread is only
/// an optimization guarded by the lock-word CAS.
pub struct NoopSuspender;

impl ThreadSuspender for NoopSuspender {
    fn suspend_and_wait(&self, _id: ThreadId) -> Option<Arc<MutatorThread>> {
        None
    }

    fn resume(&self, _thread: &MutatorThread) {}
}

/// Process-wide thread table; hands out the small internal ids the
/// light-lock encoding depends on.
pub struct ThreadRegistry {
    threads: Mutex<Vec<Arc<MutatorThread>>>,
    next_id: AtomicU32,
}

impl ThreadRegistry {
    pub const fn new() -> Self {
        Self {
            threads: Mutex::new(Vec::new()),
            next_id: AtomicU32::new(1),
        }
    }

    /// Register the calling thread and make it current.
    pub fn attach(&self) -> Arc<MutatorThread> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if id > LIGHT_LOCK_THREAD_ID_MAX {
            log::error!("thread id space exhausted: {id}");
            panic!("thread id space exhausted");
        }
        let thread = Arc::new(MutatorThread::new(id));
        self.threads.lock().push(thread.clone());
        CURRENT.with_borrow_mut(|cur| *cur = Some(thread.clone()));
        thread
    }

    pub fn detach(&self, thread: &Arc<MutatorThread>) {
        let mut threads = self.threads.lock();
        if let Some(ix) = threads.iter().position(|t| t.id() == thread.id()) {
            threads.swap_remove(ix);
        }
        drop(threads);
        CURRENT.with_borrow_mut(|cur| {
            if cur.as_ref().is_some_and(|c| c.id() == thread.id()) {
                *cur = None;
            }
        });
    }

    pub fn get(&self, id: ThreadId) -> Option<Arc<MutatorThread>> {
        self.threads.lock().iter().find(|t| t.id() == id).cloned()
    }

    pub fn for_each(&self, mut f: impl FnMut(&Arc<MutatorThread>)) {
        for thread in self.threads.lock().iter() {
            f(thread);
        }
    }
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<MutatorThread>>> = const { RefCell::new(None) };
}

/// The `MutatorThread` registered for the calling OS thread, if any.
pub fn current_thread() -> Option<Arc<MutatorThread>> {
    CURRENT.with_borrow(|cur| cur.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_assigns_small_unique_ids() {
        let registry = ThreadRegistry::new();
        let a = registry.attach();
        let b = registry.attach();
        assert_ne!(a.id(), b.id());
        assert!(a.id() <= LIGHT_LOCK_THREAD_ID_MAX);
        assert!(current_thread().is_some_and(|t| t.id() == b.id()));

        registry.detach(&b);
        assert!(registry.get(b.id()).is_none());
        assert!(registry.get(a.id()).is_some());
        assert!(current_thread().is_none());
    }

    #[test]
    fn parker_remembers_early_signal() {
        let registry = ThreadRegistry::new();
        let thread = registry.attach();

        thread.parker().signal();
        let mut guard = thread.parker().lock();
        // Must not block: the signal arrived before the park.
        thread.parker().park(&mut guard);
    }

    #[test]
    fn parker_clear_discards_stale_signal() {
        let registry = ThreadRegistry::new();
        let thread = registry.attach();

        thread.parker().signal();
        let mut guard = thread.parker().lock();
        thread.parker().clear(&mut guard);
        let timed_out = thread
            .parker()
            .park_timed(&mut guard, Duration::from_millis(10));
        assert!(timed_out);
    }

    #[test]
    fn parker_times_out_without_signal() {
        let registry = ThreadRegistry::new();
        let thread = registry.attach();

        let mut guard = thread.parker().lock();
        let timed_out = thread
            .parker()
            .park_timed(&mut guard, Duration::from_millis(10));
        assert!(timed_out);
    }

    #[test]
    fn interruption_is_sticky_until_taken() {
        let registry = ThreadRegistry::new();
        let thread = registry.attach();

        thread.interrupt();
        assert!(thread.is_interrupted());
        assert!(thread.take_interrupted());
        assert!(!thread.is_interrupted());
    }
}
