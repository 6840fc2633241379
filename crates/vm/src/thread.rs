//! VM threads.
//!
//! Each thread owns its frame stack and a handful of scheduler-visible
//! fields. A thread is in at most one of: the runnable queue, a monitor
//! waiter queue, a condvar queue, the timer queue, or dead, and the
//! current thread is on none of them.

use bitflags::bitflags;

use crate::frame::Frame;
use crate::monitor::MonitorId;
use crate::object::ObjRef;

/// Stable index of a thread in the VM's thread table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(pub u16);

bitflags! {
    /// Thread life-cycle and suspension bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ThreadState: u16 {
        const JUST_BORN = 1 << 0;
        const ACTIVE = 1 << 1;
        const SUSPENDED = 1 << 2;
        const MONITOR_WAIT = 1 << 3;
        const CONDVAR_WAIT = 1 << 4;
        const DEAD = 1 << 5;
        const DBG_SUSPENDED = 1 << 6;
    }
}

/// The one extended-lock slot each thread owns. While in use, the locked
/// object's header points back at the thread and this slot carries the
/// depth and the displaced hash code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendedLock {
    pub depth: u32,
    pub hash: u32,
}

/// Exception scheduled for delivery when a blocked thread resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingThrow {
    pub class_name: &'static str,
}

/// One VM thread.
#[derive(Debug)]
pub struct VmThread {
    /// The frame stack; the current frame is the last element.
    pub frames: Vec<Frame>,
    /// Cells charged against the stack budget by live frames.
    pub used_cells: usize,
    pub state: ThreadState,
    /// Opcodes left in the current slice.
    pub timeslice: u32,
    /// Monitor this thread is enqueued on (waiter or condvar queue).
    pub monitor: Option<MonitorId>,
    /// Re-entry depth to restore when the monitor is re-acquired after a
    /// wait or a contended enter.
    pub wakeup_depth: u32,
    /// Set by `interrupt` when the thread was not blocked; consumed by the
    /// next blocking operation.
    pub pending_interrupt: bool,
    /// Exception to raise as soon as the thread runs again.
    pub pending_throw: Option<PendingThrow>,
    /// The thread's single extended-lock slot; `None` when free.
    pub extended_lock: Option<ExtendedLock>,
    /// User-visible thread object, if one exists.
    pub java_object: ObjRef,
    /// Daemon threads do not keep the VM alive.
    pub daemon: bool,
}

impl VmThread {
    /// Creates a just-born thread with an empty frame stack.
    pub fn new(timeslice: u32) -> Self {
        Self {
            frames: Vec::new(),
            used_cells: 0,
            state: ThreadState::JUST_BORN,
            timeslice,
            monitor: None,
            wakeup_depth: 0,
            pending_interrupt: false,
            pending_throw: None,
            extended_lock: None,
            java_object: ObjRef::NULL,
            daemon: false,
        }
    }

    /// The current frame.
    pub fn frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// The current frame, mutably.
    pub fn frame_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    /// True when the thread has died.
    pub fn is_dead(&self) -> bool {
        self.state.contains(ThreadState::DEAD)
    }

    /// True when the thread can be handed a time slice.
    pub fn is_runnable(&self) -> bool {
        self.state.contains(ThreadState::ACTIVE)
            && !self
                .state
                .intersects(ThreadState::SUSPENDED | ThreadState::DEAD | ThreadState::DBG_SUSPENDED)
    }

    /// Claims the extended-lock slot. Fails when already in use.
    pub fn take_extended_lock(&mut self, depth: u32, hash: u32) -> bool {
        if self.extended_lock.is_some() {
            return false;
        }
        self.extended_lock = Some(ExtendedLock { depth, hash });
        true
    }

    /// Releases the extended-lock slot, returning its contents.
    pub fn free_extended_lock(&mut self) -> Option<ExtendedLock> {
        self.extended_lock.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_threads_are_just_born() {
        let t = VmThread::new(100);
        assert_eq!(t.state, ThreadState::JUST_BORN);
        assert!(!t.is_runnable());
        assert!(!t.is_dead());
    }

    #[test]
    fn suspension_masks_runnability() {
        let mut t = VmThread::new(100);
        t.state = ThreadState::ACTIVE;
        assert!(t.is_runnable());
        t.state = ThreadState::ACTIVE | ThreadState::SUSPENDED;
        assert!(!t.is_runnable());
    }

    #[test]
    fn only_one_extended_lock_per_thread() {
        let mut t = VmThread::new(100);
        assert!(t.take_extended_lock(2, 0));
        assert!(!t.take_extended_lock(1, 0));
        assert_eq!(t.free_extended_lock(), Some(ExtendedLock { depth: 2, hash: 0 }));
        assert!(t.take_extended_lock(1, 7));
    }
}
