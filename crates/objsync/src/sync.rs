use std::fmt;
use std::sync::Arc;

use crate::objectmodel::reference::ObjectReference;
use crate::options::Options;
use crate::threads::{MutatorThread, NoopSuspender, ThreadId, ThreadRegistry, ThreadSuspender};

pub mod basic_lock;
pub mod monitor;
pub mod pool;

pub use monitor::Monitor;
pub use pool::{MonitorId, MonitorPool};

/// Recoverable failures of monitor operations. Everything else the
/// subsystem can run into (corrupt lock words, exhausted id spaces) is a
/// runtime bug and panics instead.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum MonitorError {
    /// The calling thread does not hold the lock the operation requires,
    /// or a `try_enter` found the lock contended.
    IllegalMonitorState,
    /// The thread was interrupted before or while waiting.
    Interrupted,
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IllegalMonitorState => write!(f, "illegal monitor state"),
            Self::Interrupted => write!(f, "interrupted while waiting"),
        }
    }
}

impl std::error::Error for MonitorError {}

/// The object synchronization subsystem: monitor pool, thread registry and
/// tunables, wired together once at startup through [`ObjSyncBuilder`].
pub struct ObjSync {
    pool: MonitorPool,
    threads: ThreadRegistry,
    options: Options,
    suspender: Box<dyn ThreadSuspender>,
}

pub struct ObjSyncBuilder {
    options: Options,
    suspender: Box<dyn ThreadSuspender>,
}

impl ObjSyncBuilder {
    pub fn new() -> Self {
        Self {
            options: Options::default(),
            suspender: Box::new(NoopSuspender),
        }
    }

    /// Start from `OBJSYNC_*` environment variables instead of defaults.
    pub fn from_env() -> Self {
        Self {
            options: Options::from_env(),
            suspender: Box::new(NoopSuspender),
        }
    }

    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Install the runtime's safepoint-based suspension mechanism. Without
    /// one, contended inflation degrades to spin-retry.
    pub fn suspender(mut self, suspender: impl ThreadSuspender + 'static) -> Self {
        self.suspender = Box::new(suspender);
        self
    }

    pub fn build(self) -> Arc<ObjSync> {
        log::debug!("object synchronization configured: {:?}", self.options);
        Arc::new(ObjSync {
            pool: MonitorPool::new(),
            threads: ThreadRegistry::new(),
            options: self.options,
            suspender: self.suspender,
        })
    }
}

impl Default for ObjSyncBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjSync {
    pub fn pool(&self) -> &MonitorPool {
        &self.pool
    }

    pub fn threads(&self) -> &ThreadRegistry {
        &self.threads
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub(crate) fn suspender(&self) -> &dyn ThreadSuspender {
        &*self.suspender
    }

    /// Acquire the lock on `obj`, blocking until available.
    pub fn enter(
        &self,
        thread: &Arc<MutatorThread>,
        obj: ObjectReference,
    ) -> Result<(), MonitorError> {
        Monitor::enter(self, thread, obj, false)
    }

    /// Acquire the lock on `obj` only if that is possible without
    /// blocking.
    pub fn try_enter(
        &self,
        thread: &Arc<MutatorThread>,
        obj: ObjectReference,
    ) -> Result<(), MonitorError> {
        Monitor::enter(self, thread, obj, true)
    }

    /// Release one level of the lock on `obj`.
    pub fn exit(
        &self,
        thread: &Arc<MutatorThread>,
        obj: ObjectReference,
    ) -> Result<(), MonitorError> {
        Monitor::exit(self, thread, obj)
    }

    /// Atomically release the lock on `obj` and block until notified,
    /// interrupted, or the timeout elapses. Zero millis and zero nanos
    /// wait indefinitely. On return the lock is re-held at the original
    /// recursion depth.
    pub fn wait(
        &self,
        thread: &Arc<MutatorThread>,
        obj: ObjectReference,
        timeout_ms: u64,
        timeout_ns: u32,
        ignore_interruption: bool,
    ) -> Result<(), MonitorError> {
        Monitor::wait(self, thread, obj, timeout_ms, timeout_ns, ignore_interruption)
    }

    /// Wake one thread waiting on `obj`.
    pub fn notify(
        &self,
        thread: &Arc<MutatorThread>,
        obj: ObjectReference,
    ) -> Result<(), MonitorError> {
        Monitor::notify(self, thread, obj)
    }

    /// Wake every thread waiting on `obj`.
    pub fn notify_all(
        &self,
        thread: &Arc<MutatorThread>,
        obj: ObjectReference,
    ) -> Result<(), MonitorError> {
        Monitor::notify_all(self, thread, obj)
    }

    pub fn holds_lock(&self, thread: &Arc<MutatorThread>, obj: ObjectReference) -> bool {
        Monitor::holds_lock(self, thread, obj)
    }

    /// Id of the thread currently holding the lock on `obj`, if any.
    pub fn lock_owner_id(&self, obj: ObjectReference) -> Option<ThreadId> {
        Monitor::lock_owner_id(self, obj)
    }

    /// Identity hash for `obj`, generated and recorded on first use.
    pub fn hash_code(&self, thread: &Arc<MutatorThread>, obj: ObjectReference) -> u32 {
        Monitor::hash_code_of(self, thread, obj)
    }

    /// The heavyweight monitor currently backing `obj`, if inflated.
    pub fn monitor_of(&self, obj: ObjectReference) -> Option<Arc<Monitor>> {
        Monitor::monitor_of(self, obj)
    }

    /// Try to retire the heavyweight monitor of `obj` back to a light
    /// encoding. Fails (returning false) unless the monitor is quiescent.
    pub fn deflate(&self, obj: ObjectReference) -> bool {
        Monitor::deflate(self, obj)
    }

    /// Pool-wide deflation pass; returns how many monitors were reclaimed.
    pub fn deflate_all(&self) -> usize {
        self.pool.deflate_all()
    }

    /// Release every lock `thread` still holds, newest first. Called when
    /// a thread terminates abnormally so its locks do not stay wedged.
    pub fn release_all_held_by(&self, thread: &Arc<MutatorThread>) {
        Monitor::release_all_for_thread(self, thread)
    }

    /// Whether any registered thread is currently blocked entering the
    /// monitor with the given id.
    pub fn is_monitor_awaited(&self, id: MonitorId) -> bool {
        let mut awaited = false;
        self.threads.for_each(|thread| {
            if thread.entering_monitor() == Some(id) {
                awaited = true;
            }
        });
        awaited
    }

    /// Enumerate live monitors, for GC root scanning and diagnostics.
    pub fn visit_live_monitors(&self, f: impl FnMut(&Arc<Monitor>)) {
        self.pool.visit(f)
    }

    /// GC hook: `obj` moved; repoint the back reference of its monitor.
    pub fn update_monitor_object(&self, id: MonitorId, obj: ObjectReference) {
        if let Some(monitor) = self.pool.lookup(id) {
            monitor.update_object(obj);
        }
    }
}
