//! The monitor engine: three-tier object locks, wait/notify, identity
//! hashes.
//!
//! An object's lock lives in its header word. Tier transitions only move
//! upward (unlocked → simple → extended → inflated) while the lock is in
//! use; the fold back to a bare hash word happens only when an inflated
//! monitor becomes globally idle, and the record is then recycled through
//! the monitor cache. A simple lock implies depth 1 and hash 0, which is
//! why an object whose hash has been computed can never hold a simple
//! lock.

use std::collections::VecDeque;

use log::{debug, trace};

use crate::error::{throwable, VmError, VmResult};
use crate::object::{LockTag, ObjRef, HASH_MASK};
use crate::thread::{PendingThrow, ThreadId, ThreadState};
use crate::vm::Vm;

/// Index of an inflated monitor record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorId(pub u32);

/// One inflated monitor.
#[derive(Debug)]
pub struct Monitor {
    pub owner: Option<ThreadId>,
    pub depth: u32,
    /// Displaced identity hash (0 = not yet computed).
    pub hash: u32,
    /// Threads trying to enter, FIFO by entry attempt.
    pub waiters: VecDeque<ThreadId>,
    /// Threads inside `wait`, FIFO.
    pub condvar: VecDeque<ThreadId>,
    /// The locked object.
    pub object: ObjRef,
}

impl Monitor {
    fn reset(&mut self, object: ObjRef) {
        self.owner = None;
        self.depth = 0;
        self.hash = 0;
        self.object = object;
        debug_assert!(self.waiters.is_empty() && self.condvar.is_empty());
    }

    /// True when no thread owns or queues on this monitor.
    pub fn is_idle(&self) -> bool {
        self.owner.is_none() && self.waiters.is_empty() && self.condvar.is_empty()
    }
}

/// Monitor storage with a free-list cache: idle records are recycled
/// rather than released.
#[derive(Debug, Default)]
pub struct MonitorTable {
    monitors: Vec<Monitor>,
    cache: Vec<MonitorId>,
}

impl MonitorTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates (or recycles) a monitor for `object`.
    pub fn allocate(&mut self, object: ObjRef) -> MonitorId {
        if let Some(id) = self.cache.pop() {
            self.monitors[id.0 as usize].reset(object);
            return id;
        }
        let id = MonitorId(self.monitors.len() as u32);
        self.monitors.push(Monitor {
            owner: None,
            depth: 0,
            hash: 0,
            waiters: VecDeque::new(),
            condvar: VecDeque::new(),
            object,
        });
        id
    }

    /// Returns an idle monitor to the cache.
    pub fn recycle(&mut self, id: MonitorId) {
        debug_assert!(self.monitors[id.0 as usize].is_idle());
        self.cache.push(id);
    }

    /// Monitor access.
    pub fn get(&self, id: MonitorId) -> &Monitor {
        &self.monitors[id.0 as usize]
    }

    /// Mutable monitor access.
    pub fn get_mut(&mut self, id: MonitorId) -> &mut Monitor {
        &mut self.monitors[id.0 as usize]
    }

    /// Number of records ever created (cached ones included).
    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    /// True when no record exists.
    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    /// Number of records currently in the cache.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

/// Result of a monitor-enter attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnterOutcome {
    /// The current thread owns the monitor and may proceed.
    Owned,
    /// The current thread was enqueued and suspended.
    Waiting,
}

impl Vm {
    /// Identity hash of `object`, generated lazily and stable thereafter.
    pub fn identity_hash(&mut self, object: ObjRef) -> VmResult<u32> {
        let tag = self.obj(object)?.lock_tag();
        match tag {
            LockTag::Unlocked => {
                let value = self.obj(object)?.header_value();
                if value != 0 {
                    return Ok(value);
                }
                let hash = self.heap.next_identity_hash();
                self.obj_mut(object)?.set_header(LockTag::Unlocked, hash);
                Ok(hash)
            }
            LockTag::Simple => {
                // A simple lock implies hash 0. Generating a hash forces an
                // upgrade so there is somewhere to keep it.
                let owner = ThreadId(self.obj(object)?.header_value() as u16);
                let hash = self.heap.next_identity_hash();
                if self.thread_mut(owner).take_extended_lock(1, hash) {
                    self.obj_mut(object)?
                        .set_header(LockTag::Extended, owner.0 as u32);
                } else {
                    let id = self.inflate(object)?;
                    self.monitors.get_mut(id).hash = hash;
                }
                Ok(hash)
            }
            LockTag::Extended => {
                let owner = ThreadId(self.obj(object)?.header_value() as u16);
                let existing = self
                    .thread(owner)
                    .extended_lock
                    .map(|lock| lock.hash)
                    .ok_or_else(|| VmError::internal("extended lock missing its slot"))?;
                if existing != 0 {
                    return Ok(existing);
                }
                let hash = self.heap.next_identity_hash();
                if let Some(lock) = self.thread_mut(owner).extended_lock.as_mut() {
                    lock.hash = hash;
                }
                Ok(hash)
            }
            LockTag::Inflated => {
                let id = MonitorId(self.obj(object)?.header_value());
                if self.monitors.get(id).hash == 0 {
                    let hash = self.heap.next_identity_hash();
                    self.monitors.get_mut(id).hash = hash;
                    Ok(hash)
                } else {
                    Ok(self.monitors.get(id).hash)
                }
            }
        }
    }

    /// Promotes whatever lock state `object` holds to an inflated monitor,
    /// carrying over owner, depth, and displaced hash.
    pub fn inflate(&mut self, object: ObjRef) -> VmResult<MonitorId> {
        let tag = self.obj(object)?.lock_tag();
        let value = self.obj(object)?.header_value();
        if tag == LockTag::Inflated {
            return Ok(MonitorId(value));
        }

        let id = self.monitors.allocate(object);
        match tag {
            LockTag::Unlocked => {
                self.monitors.get_mut(id).hash = value;
            }
            LockTag::Simple => {
                let owner = ThreadId(value as u16);
                let monitor = self.monitors.get_mut(id);
                monitor.owner = Some(owner);
                monitor.depth = 1;
            }
            LockTag::Extended => {
                let owner = ThreadId(value as u16);
                let lock = self
                    .thread_mut(owner)
                    .free_extended_lock()
                    .ok_or_else(|| VmError::internal("extended lock missing its slot"))?;
                let monitor = self.monitors.get_mut(id);
                monitor.owner = Some(owner);
                monitor.depth = lock.depth;
                monitor.hash = lock.hash;
            }
            LockTag::Inflated => {}
        }
        self.obj_mut(object)?.set_header(LockTag::Inflated, id.0);
        debug!("monitor: inflated lock on object {}", object.0);
        Ok(id)
    }

    /// Enters the monitor of `object`. Raises `NullPointerException` on a
    /// null reference; on contention the current thread is enqueued FIFO
    /// and suspended.
    pub fn monitor_enter(&mut self, object: ObjRef) -> VmResult<EnterOutcome> {
        if object.is_null() {
            return Err(VmError::null_pointer());
        }
        let current = self.current_id()?;
        let tag = self.obj(object)?.lock_tag();
        let value = self.obj(object)?.header_value();

        match tag {
            LockTag::Unlocked => {
                if value == 0 {
                    // Hash not yet computed: a simple lock suffices, with
                    // implicit depth 1 and implicit hash 0.
                    self.obj_mut(object)?
                        .set_header(LockTag::Simple, current.0 as u32);
                    trace!("monitor: thread {} simple-locks {}", current.0, object.0);
                    return Ok(EnterOutcome::Owned);
                }
                if self.thread_mut(current).take_extended_lock(1, value) {
                    self.obj_mut(object)?
                        .set_header(LockTag::Extended, current.0 as u32);
                    return Ok(EnterOutcome::Owned);
                }
            }
            LockTag::Simple => {
                if ThreadId(value as u16) == current
                    && self.thread_mut(current).take_extended_lock(2, 0)
                {
                    self.obj_mut(object)?
                        .set_header(LockTag::Extended, current.0 as u32);
                    return Ok(EnterOutcome::Owned);
                }
            }
            LockTag::Extended => {
                if ThreadId(value as u16) == current {
                    let thread = self.thread_mut(current);
                    if let Some(lock) = thread.extended_lock.as_mut() {
                        lock.depth += 1;
                        return Ok(EnterOutcome::Owned);
                    }
                    return Err(VmError::internal("extended lock missing its slot"));
                }
            }
            LockTag::Inflated => {}
        }

        // The slow path always operates on an inflated monitor.
        let id = self.inflate(object)?;
        match self.monitors.get(id).owner {
            None => {
                let monitor = self.monitors.get_mut(id);
                monitor.owner = Some(current);
                monitor.depth = 1;
                Ok(EnterOutcome::Owned)
            }
            Some(owner) if owner == current => {
                self.monitors.get_mut(id).depth += 1;
                Ok(EnterOutcome::Owned)
            }
            Some(_) => {
                self.monitors.get_mut(id).waiters.push_back(current);
                let thread = self.thread_mut(current);
                thread.wakeup_depth = 1;
                thread.monitor = Some(id);
                self.suspend_current(ThreadState::MONITOR_WAIT)?;
                trace!("monitor: thread {} blocks on {}", current.0, object.0);
                Ok(EnterOutcome::Waiting)
            }
        }
    }

    /// Releases one level of the monitor of `object`. Raises
    /// `IllegalMonitorStateException` when the current thread is not the
    /// owner.
    pub fn monitor_exit(&mut self, object: ObjRef) -> VmResult<()> {
        if object.is_null() {
            return Err(VmError::null_pointer());
        }
        let current = self.current_id()?;
        let tag = self.obj(object)?.lock_tag();
        let value = self.obj(object)?.header_value();

        match tag {
            LockTag::Simple if ThreadId(value as u16) == current => {
                // Implicit depth 1 and hash 0: back to a bare header.
                self.obj_mut(object)?.set_header(LockTag::Unlocked, 0);
                Ok(())
            }
            LockTag::Extended if ThreadId(value as u16) == current => {
                let (depth, hash) = {
                    let thread = self.thread_mut(current);
                    let Some(lock) = thread.extended_lock.as_mut() else {
                        return Err(VmError::internal("extended lock missing its slot"));
                    };
                    lock.depth -= 1;
                    (lock.depth, lock.hash)
                };
                if depth == 0 {
                    self.thread_mut(current).free_extended_lock();
                    self.obj_mut(object)?.set_header(LockTag::Unlocked, hash);
                } else if depth == 1 && hash == 0 {
                    // Nothing left that a simple lock cannot express.
                    self.thread_mut(current).free_extended_lock();
                    self.obj_mut(object)?
                        .set_header(LockTag::Simple, current.0 as u32);
                }
                Ok(())
            }
            LockTag::Inflated => {
                let id = MonitorId(value);
                if self.monitors.get(id).owner != Some(current) {
                    return Err(VmError::throw(throwable::ILLEGAL_MONITOR_STATE, ""));
                }
                let monitor = self.monitors.get_mut(id);
                monitor.depth -= 1;
                if monitor.depth == 0 {
                    self.promote_next_waiter(id);
                    self.try_fold(object, id)?;
                }
                Ok(())
            }
            _ => Err(VmError::throw(throwable::ILLEGAL_MONITOR_STATE, "")),
        }
    }

    /// Hands an owner-less monitor to the head of its waiter queue, making
    /// that thread runnable with its saved re-entry depth.
    fn promote_next_waiter(&mut self, id: MonitorId) {
        self.monitors.get_mut(id).owner = None;
        self.promote_head_waiter(id);
    }

    /// Folds a globally idle inflated monitor back to a bare hash word and
    /// recycles the record.
    fn try_fold(&mut self, object: ObjRef, id: MonitorId) -> VmResult<()> {
        if self.monitors.get(id).is_idle() {
            let hash = self.monitors.get(id).hash;
            self.obj_mut(object)?
                .set_header(LockTag::Unlocked, hash & HASH_MASK);
            self.monitors.recycle(id);
            debug!("monitor: folded idle monitor on object {}", object.0);
        }
        Ok(())
    }

    /// `Object.wait(timeout)`. Forces inflation, moves the current thread
    /// to the condvar queue, releases the monitor (promoting the next
    /// waiter), registers a timer when `timeout_ms > 0`, and suspends.
    pub fn monitor_wait(&mut self, object: ObjRef, timeout_ms: i64) -> VmResult<()> {
        if object.is_null() {
            return Err(VmError::null_pointer());
        }
        let current = self.current_id()?;
        let id = self.inflate(object)?;
        if self.monitors.get(id).owner != Some(current) {
            return Err(VmError::throw(throwable::ILLEGAL_MONITOR_STATE, ""));
        }
        // A pending interrupt is consumed before blocking.
        if self.thread(current).pending_interrupt {
            self.thread_mut(current).pending_interrupt = false;
            return Err(VmError::throw(throwable::INTERRUPTED, ""));
        }

        if timeout_ms > 0 {
            let now = self.clock.now();
            self.sched.register_alarm(
                current,
                now + timeout_ms as u64,
                crate::scheduler::AlarmAction::CondvarTimeout,
            );
        }

        // Remember the re-entry depth, hand the monitor on, and park on
        // the condvar queue.
        let depth = self.monitors.get(id).depth;
        let thread = self.thread_mut(current);
        thread.wakeup_depth = depth;
        thread.monitor = Some(id);
        self.monitors.get_mut(id).condvar.push_back(current);
        self.monitors.get_mut(id).depth = 0;
        self.promote_next_waiter(id);
        // promote_next_waiter may have handed the monitor over; the record
        // must stay inflated while the condvar queue is occupied.
        self.suspend_current(ThreadState::CONDVAR_WAIT)?;
        Ok(())
    }

    /// `Object.notify` / `notifyAll`: moves one (or every) thread from the
    /// condvar queue to the waiter queue. Ownership is not handed over.
    pub fn monitor_notify(&mut self, object: ObjRef, all: bool) -> VmResult<()> {
        if object.is_null() {
            return Err(VmError::null_pointer());
        }
        let current = self.current_id()?;
        let tag = self.obj(object)?.lock_tag();
        let value = self.obj(object)?.header_value();
        match tag {
            // A simple or extended lock held by the caller proves nobody
            // waits: waiting forces inflation.
            LockTag::Simple | LockTag::Extended if ThreadId(value as u16) == current => Ok(()),
            LockTag::Inflated => {
                let id = MonitorId(value);
                if self.monitors.get(id).owner != Some(current) {
                    return Err(VmError::throw(throwable::ILLEGAL_MONITOR_STATE, ""));
                }
                loop {
                    let Some(waiter) = self.monitors.get_mut(id).condvar.pop_front() else {
                        break;
                    };
                    self.sched.cancel_alarms(waiter);
                    self.thread_mut(waiter).state = ThreadState::MONITOR_WAIT;
                    self.monitors.get_mut(id).waiters.push_back(waiter);
                    trace!("monitor: thread {} notified", waiter.0);
                    if !all {
                        break;
                    }
                }
                Ok(())
            }
            _ => Err(VmError::throw(throwable::ILLEGAL_MONITOR_STATE, "")),
        }
    }

    /// Delivers an interrupt to `target`: a sleeping or waiting thread is
    /// unblocked and will raise `InterruptedException`; otherwise the
    /// pending-interrupt flag is latched for the next blocking call.
    pub fn interrupt(&mut self, target: ThreadId) -> VmResult<()> {
        let state = self.thread(target).state;
        if state.contains(ThreadState::CONDVAR_WAIT) {
            // Leave the condvar queue, but the monitor must be re-acquired
            // before the exception is raised.
            self.sched.cancel_alarms(target);
            if let Some(id) = self.thread(target).monitor {
                let monitor = self.monitors.get_mut(id);
                monitor.condvar.retain(|&t| t != target);
                monitor.waiters.push_back(target);
            }
            self.thread_mut(target).state = ThreadState::MONITOR_WAIT;
            self.thread_mut(target).pending_throw = Some(PendingThrow {
                class_name: throwable::INTERRUPTED,
            });
            Ok(())
        } else if state.contains(ThreadState::SUSPENDED) && self.sched.has_alarm(target) {
            // Sleeping: wake immediately with the exception pending.
            self.sched.cancel_alarms(target);
            self.thread_mut(target).pending_throw = Some(PendingThrow {
                class_name: throwable::INTERRUPTED,
            });
            self.make_runnable(target);
            Ok(())
        } else {
            self.thread_mut(target).pending_interrupt = true;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{Class, ClassStatus, InstanceClass};
    use crate::constant_pool::RuntimePool;
    use crate::thread::VmThread;
    use crate::vm::{MapClassSource, Vm, VmOptions};
    use mjvm_classfile::ClassFlags;

    fn test_vm(threads: usize) -> (Vm, ObjRef) {
        let mut vm = Vm::new(VmOptions::default(), Box::new(MapClassSource::new())).unwrap();
        let name = vm.intern("demo/Lockable");
        let class = vm
            .classes
            .insert(Class::Instance(InstanceClass {
                name,
                package: name,
                flags: ClassFlags::PUBLIC,
                super_class: None,
                interfaces: Vec::new(),
                pool: RuntimePool::default(),
                fields: Vec::new(),
                methods: Vec::new(),
                instance_cells: 0,
                statics: Vec::new(),
                static_pointer_cells: 0,
                status: ClassStatus::Ready,
                init_thread: None,
                class_object: None,
                finalizer: None,
            }))
            .unwrap();
        let object = vm.alloc_instance_of(class).unwrap();
        for _ in 0..threads {
            let mut t = VmThread::new(100);
            t.state = ThreadState::ACTIVE;
            vm.threads.push(t);
        }
        vm.current = Some(ThreadId(0));
        (vm, object)
    }

    #[test]
    fn first_enter_takes_a_simple_lock() {
        let (mut vm, object) = test_vm(1);
        assert_eq!(vm.monitor_enter(object).unwrap(), EnterOutcome::Owned);
        let obj = vm.obj(object).unwrap();
        assert_eq!(obj.lock_tag(), LockTag::Simple);
        assert_eq!(obj.header_value(), 0);
    }

    #[test]
    fn enter_exit_restores_header_bit_for_bit_when_hash_is_zero() {
        let (mut vm, object) = test_vm(1);
        let before = vm.obj(object).unwrap().header;
        vm.monitor_enter(object).unwrap();
        vm.monitor_exit(object).unwrap();
        assert_eq!(vm.obj(object).unwrap().header, before);
    }

    #[test]
    fn reentry_upgrades_to_extended_and_back() {
        let (mut vm, object) = test_vm(1);
        vm.monitor_enter(object).unwrap();
        vm.monitor_enter(object).unwrap();
        vm.monitor_enter(object).unwrap();
        assert_eq!(vm.obj(object).unwrap().lock_tag(), LockTag::Extended);
        assert_eq!(vm.thread(ThreadId(0)).extended_lock.unwrap().depth, 3);

        vm.monitor_exit(object).unwrap();
        vm.monitor_exit(object).unwrap();
        // Depth 1 with hash 0 simplifies back to a simple lock.
        assert_eq!(vm.obj(object).unwrap().lock_tag(), LockTag::Simple);
        vm.monitor_exit(object).unwrap();
        assert_eq!(vm.obj(object).unwrap().lock_tag(), LockTag::Unlocked);
    }

    #[test]
    fn hashed_object_skips_the_simple_tier() {
        let (mut vm, object) = test_vm(1);
        let hash = vm.identity_hash(object).unwrap();
        assert_ne!(hash, 0);
        vm.monitor_enter(object).unwrap();
        // SIMPLE implies hash 0, so a hashed object goes extended.
        assert_eq!(vm.obj(object).unwrap().lock_tag(), LockTag::Extended);
        vm.monitor_exit(object).unwrap();
        let obj = vm.obj(object).unwrap();
        assert_eq!(obj.lock_tag(), LockTag::Unlocked);
        assert_eq!(obj.header_value(), hash);
        // The hash is stable across the lock cycle.
        assert_eq!(vm.identity_hash(object).unwrap(), hash);
    }

    #[test]
    fn contended_enter_inflates_and_queues_fifo() {
        let (mut vm, object) = test_vm(3);
        vm.monitor_enter(object).unwrap();

        vm.current = Some(ThreadId(1));
        assert_eq!(vm.monitor_enter(object).unwrap(), EnterOutcome::Waiting);
        vm.current = Some(ThreadId(2));
        assert_eq!(vm.monitor_enter(object).unwrap(), EnterOutcome::Waiting);

        assert_eq!(vm.obj(object).unwrap().lock_tag(), LockTag::Inflated);
        let id = MonitorId(vm.obj(object).unwrap().header_value());
        assert_eq!(vm.monitors.get(id).waiters.len(), 2);

        // Owner releases; the first waiter is promoted, FIFO.
        vm.current = Some(ThreadId(0));
        vm.monitor_exit(object).unwrap();
        assert_eq!(vm.monitors.get(id).owner, Some(ThreadId(1)));
        assert_eq!(vm.monitors.get(id).depth, 1);
        assert!(vm.sched.is_runnable_queued(ThreadId(1)));
    }

    #[test]
    fn idle_monitor_folds_back_and_is_recycled() {
        let (mut vm, object) = test_vm(2);
        vm.monitor_enter(object).unwrap();
        vm.current = Some(ThreadId(1));
        vm.monitor_enter(object).unwrap();
        vm.current = Some(ThreadId(0));
        vm.monitor_exit(object).unwrap();
        // Thread 1 now owns the inflated monitor.
        vm.current = Some(ThreadId(1));
        vm.monitor_exit(object).unwrap();
        assert_eq!(vm.obj(object).unwrap().lock_tag(), LockTag::Unlocked);
        assert_eq!(vm.monitors.cached(), 1);
    }

    #[test]
    fn exit_without_ownership_is_illegal() {
        let (mut vm, object) = test_vm(2);
        vm.monitor_enter(object).unwrap();
        vm.current = Some(ThreadId(1));
        let err = vm.monitor_exit(object).unwrap_err();
        assert!(matches!(
            err,
            VmError::Throw { ref class_name, .. }
                if class_name == throwable::ILLEGAL_MONITOR_STATE
        ));
        // Unlocked objects reject exit as well.
        let (mut vm2, object2) = test_vm(1);
        assert!(vm2.monitor_exit(object2).is_err());
    }

    #[test]
    fn wait_requires_ownership() {
        let (mut vm, object) = test_vm(1);
        let err = vm.monitor_wait(object, 0).unwrap_err();
        assert!(matches!(
            err,
            VmError::Throw { ref class_name, .. }
                if class_name == throwable::ILLEGAL_MONITOR_STATE
        ));
    }

    #[test]
    fn wait_releases_and_notify_requeues() {
        let (mut vm, object) = test_vm(2);
        // T0 locks twice then waits: depth must be restored on wake.
        vm.monitor_enter(object).unwrap();
        vm.monitor_enter(object).unwrap();
        vm.monitor_wait(object, 0).unwrap();
        assert!(vm.current.is_none());
        let id = MonitorId(vm.obj(object).unwrap().header_value());
        assert_eq!(vm.monitors.get(id).owner, None);
        assert_eq!(vm.monitors.get(id).condvar.len(), 1);
        assert_eq!(vm.thread(ThreadId(0)).wakeup_depth, 2);

        // T1 acquires, notifies, and releases.
        vm.current = Some(ThreadId(1));
        vm.monitor_enter(object).unwrap();
        vm.monitor_notify(object, false).unwrap();
        assert_eq!(vm.monitors.get(id).condvar.len(), 0);
        assert_eq!(vm.monitors.get(id).waiters.len(), 1);
        vm.monitor_exit(object).unwrap();

        // T0 was promoted with its previous depth.
        assert_eq!(vm.monitors.get(id).owner, Some(ThreadId(0)));
        assert_eq!(vm.monitors.get(id).depth, 2);
    }

    #[test]
    fn notify_without_waiters_on_fast_lock_is_a_no_op() {
        let (mut vm, object) = test_vm(1);
        vm.monitor_enter(object).unwrap();
        vm.monitor_notify(object, true).unwrap();
        assert_eq!(vm.obj(object).unwrap().lock_tag(), LockTag::Simple);
    }

    #[test]
    fn interrupt_latches_when_not_blocked() {
        let (mut vm, _object) = test_vm(2);
        vm.interrupt(ThreadId(1)).unwrap();
        assert!(vm.thread(ThreadId(1)).pending_interrupt);
    }

    #[test]
    fn pending_interrupt_is_consumed_by_wait() {
        let (mut vm, object) = test_vm(1);
        vm.monitor_enter(object).unwrap();
        vm.thread_mut(ThreadId(0)).pending_interrupt = true;
        let err = vm.monitor_wait(object, 0).unwrap_err();
        assert!(matches!(
            err,
            VmError::Throw { ref class_name, .. } if class_name == throwable::INTERRUPTED
        ));
        assert!(!vm.thread(ThreadId(0)).pending_interrupt);
    }
}
