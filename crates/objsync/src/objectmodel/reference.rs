use std::ptr::NonNull;

use super::ObjectHeader;

/// Handle-protected reference to an object's header.
///
/// Collaborators hand these to the monitor subsystem instead of raw
/// addresses: the object may move while a thread is suspended inside
/// `enter` or `wait`, and the collector rewrites every live handle (and
/// every monitor's back reference, via `visit_live_monitors`) during its
/// root-update pass.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct ObjectReference(NonNull<ObjectHeader>);

impl ObjectReference {
    pub fn from_header(header: &ObjectHeader) -> Self {
        Self(NonNull::from(header))
    }

    pub fn header(&self) -> &ObjectHeader {
        unsafe { self.0.as_ref() }
    }

    pub fn as_ptr(self) -> *mut ObjectHeader {
        self.0.as_ptr()
    }

    /// # Safety
    ///
    /// `ptr` must point at a live `ObjectHeader` for as long as the
    /// reference is in use.
    pub unsafe fn from_raw(ptr: *mut ObjectHeader) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }
}

unsafe impl Send for ObjectReference {}
unsafe impl Sync for ObjectReference {}
