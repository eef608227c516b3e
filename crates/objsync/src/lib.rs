//! Per-object adaptive locking for a managed runtime.
//!
//! Every object carries a single-word lock in its header. Uncontended
//! locking and identity hashing stay inline in that word; contention,
//! recursion overflow and `wait`/`notify` escalate to a heavyweight
//! [`Monitor`](sync::Monitor) allocated from a process-wide pool and
//! referenced from the word by a compact id. Quiescent monitors are
//! deflated back to the inline encoding.
//!
//! The subsystem is wired together through [`ObjSyncBuilder`]; the
//! runtime's safepoint machinery plugs in as a
//! [`ThreadSuspender`](threads::ThreadSuspender).

pub mod objectmodel;
pub mod options;
pub mod sync;
pub mod threads;

pub use objectmodel::header::{LockState, LockWord};
pub use objectmodel::reference::ObjectReference;
pub use objectmodel::ObjectHeader;
pub use options::{ContentionPolicy, Options};
pub use sync::{Monitor, MonitorError, MonitorId, ObjSync, ObjSyncBuilder};
pub use threads::{
    current_thread, MutatorThread, NoopSuspender, ThreadId, ThreadRegistry, ThreadSuspender,
};
