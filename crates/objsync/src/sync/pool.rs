use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::objectmodel::header::MONITOR_ID_MAX;
use crate::objectmodel::reference::ObjectReference;

use super::monitor::Monitor;

pub type MonitorId = u32;

struct PoolInner {
    monitors: HashMap<MonitorId, Arc<Monitor>>,
    /// Rotating cursor for id reuse; the next search starts just past it.
    last_id: MonitorId,
    capacity: MonitorId,
}

/// Process-wide table of live heavyweight monitors, indexed by the compact
/// id the lock word encodes. One lock, held only for O(1) table work.
pub struct MonitorPool {
    inner: Mutex<PoolInner>,
}

impl MonitorPool {
    pub fn new() -> Self {
        Self::bounded(MONITOR_ID_MAX)
    }

    /// Pool with a smaller id space. Ids start at 1; 0 is never assigned.
    pub fn bounded(capacity: MonitorId) -> Self {
        assert!(capacity >= 1 && capacity <= MONITOR_ID_MAX);
        Self {
            inner: Mutex::new(PoolInner {
                monitors: HashMap::new(),
                last_id: 0,
                capacity,
            }),
        }
    }

    /// Allocate a monitor for `obj`. Exhaustion of the id space is fatal:
    /// it means a monitor leak or pathological contention beyond the
    /// design limit of the lock-word encoding.
    pub fn create(&self, obj: ObjectReference) -> Arc<Monitor> {
        let mut inner = self.inner.lock();
        let capacity = inner.capacity;
        let mut id = inner.last_id;
        let mut probed = 0;
        loop {
            id = if id >= capacity { 1 } else { id + 1 };
            if !inner.monitors.contains_key(&id) {
                break;
            }
            probed += 1;
            if probed >= capacity {
                log::error!("monitor pool exhausted: all {capacity} ids live");
                panic!("monitor pool exhausted");
            }
        }
        inner.last_id = id;

        let monitor = Arc::new(Monitor::new(id, obj));
        inner.monitors.insert(id, monitor.clone());
        log::debug!("created monitor {id} for {obj:?}");
        monitor
    }

    pub fn lookup(&self, id: MonitorId) -> Option<Arc<Monitor>> {
        self.inner.lock().monitors.get(&id).cloned()
    }

    pub fn free(&self, id: MonitorId) {
        let removed = self.inner.lock().monitors.remove(&id);
        debug_assert!(removed.is_some(), "double free of monitor {id}");
        log::debug!("freed monitor {id}");
    }

    pub fn live_count(&self) -> usize {
        self.inner.lock().monitors.len()
    }

    /// Deflate a single monitor, returning its id for reuse on success.
    /// Precondition checks run under the pool lock so no thread can be
    /// mid-acquire on a monitor the moment it is freed.
    pub fn deflate(&self, id: MonitorId) -> bool {
        let mut inner = self.inner.lock();
        let Some(monitor) = inner.monitors.get(&id) else {
            log::debug!("monitor {id} already destroyed by someone else");
            return false;
        };
        if monitor.deflate_internal() {
            inner.monitors.remove(&id);
            log::debug!("deflated monitor {id}");
            true
        } else {
            false
        }
    }

    /// Opportunistic pool-wide pass, e.g. from a GC pause. Returns how many
    /// monitors were reclaimed.
    pub fn deflate_all(&self) -> usize {
        let mut inner = self.inner.lock();
        let ids: Vec<MonitorId> = inner.monitors.keys().copied().collect();
        let mut reclaimed = 0;
        for id in ids {
            let quiescent = inner
                .monitors
                .get(&id)
                .is_some_and(|monitor| monitor.deflate_internal());
            if quiescent {
                inner.monitors.remove(&id);
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            log::debug!("deflation pass reclaimed {reclaimed} monitors");
        }
        reclaimed
    }

    /// Enumerate live monitors, for GC root scanning of the object back
    /// references and for diagnostics dumps.
    pub fn visit(&self, mut f: impl FnMut(&Arc<Monitor>)) {
        for monitor in self.inner.lock().monitors.values() {
            f(monitor);
        }
    }
}

impl Default for MonitorPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objectmodel::ObjectHeader;

    fn leaked_object() -> ObjectReference {
        ObjectReference::from_header(Box::leak(Box::new(ObjectHeader::new())))
    }

    #[test]
    fn create_lookup_free() {
        let pool = MonitorPool::new();
        let obj = leaked_object();

        let monitor = pool.create(obj);
        assert_eq!(pool.live_count(), 1);
        assert!(Arc::ptr_eq(&pool.lookup(monitor.id()).unwrap(), &monitor));

        pool.free(monitor.id());
        assert!(pool.lookup(monitor.id()).is_none());
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn ids_rotate_through_the_space() {
        let pool = MonitorPool::bounded(4);
        let obj = leaked_object();

        let first = pool.create(obj);
        assert_eq!(first.id(), 1);
        pool.free(first.id());

        // The cursor keeps rotating instead of reusing 1 immediately.
        assert_eq!(pool.create(obj).id(), 2);
        assert_eq!(pool.create(obj).id(), 3);
        assert_eq!(pool.create(obj).id(), 4);
        // Wraps around to the freed id.
        assert_eq!(pool.create(obj).id(), 1);
    }

    #[test]
    #[should_panic(expected = "monitor pool exhausted")]
    fn exhausted_pool_is_fatal() {
        let pool = MonitorPool::bounded(2);
        let obj = leaked_object();
        pool.create(obj);
        pool.create(obj);
        pool.create(obj);
    }
}
