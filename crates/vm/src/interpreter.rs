//! The dispatch loop, scheduling glue, invocation machinery, and the
//! class-initialisation barrier.
//!
//! The loop shape follows the reschedule-point discipline: alarms fire and
//! context switches happen only between opcodes, never inside one. A
//! blocked or slice-exhausted thread leaves `current` empty and the loop
//! pulls the next runnable thread. Program-visible failures come back from
//! opcode handlers as `VmError::Throw` and are routed to the handler-table
//! walk; only fatal errors escape `run`.

use log::{debug, trace};

use crate::cell::Cell;
use crate::class::{ClassId, ClassStatus};
use crate::constant_pool::PoolEntry;
use crate::error::{throwable, VmError, VmResult};
use crate::frame::{Frame, FrameKind};
use crate::jump_table;
use crate::method::{CustomCode, MethodBody, MethodId};
use crate::object::ObjRef;
use crate::op_code::OpCode;
use crate::scheduler::AlarmAction;
use crate::thread::{ThreadId, ThreadState};
use crate::vm::{Vm, VmState};

impl Vm {
    // ----- scheduling glue ----------------------------------------------

    /// Makes a suspended thread runnable again.
    pub(crate) fn make_runnable(&mut self, id: ThreadId) {
        let thread = self.thread_mut(id);
        if thread.is_dead() {
            return;
        }
        thread.state = ThreadState::ACTIVE;
        if self.current != Some(id) && !self.sched.is_runnable_queued(id) {
            self.sched.enqueue_runnable(id);
        }
    }

    /// Parks the current thread with the given state bits and clears the
    /// current slot; the loop will pick the next runnable thread.
    pub(crate) fn suspend_current(&mut self, state: ThreadState) -> VmResult<()> {
        let id = self.current_id()?;
        self.thread_mut(id).state = state;
        self.current = None;
        trace!("schedule: thread {} suspended", id.0);
        Ok(())
    }

    /// Moves the current thread to the tail of the runnable ring.
    pub(crate) fn yield_current(&mut self) -> VmResult<()> {
        let id = self.current_id()?;
        self.current = None;
        self.sched.enqueue_runnable(id);
        Ok(())
    }

    /// Selects the next runnable thread. Returns false when the ring is
    /// empty.
    fn reschedule(&mut self) -> bool {
        debug_assert!(self.current.is_none());
        match self.sched.dequeue_runnable() {
            Some(id) => {
                self.thread_mut(id).timeslice = self.options.base_timeslice;
                self.current = Some(id);
                trace!("schedule: thread {} resumed", id.0);
                true
            }
            None => false,
        }
    }

    /// Fires every due alarm.
    pub(crate) fn fire_alarms(&mut self) -> VmResult<()> {
        let now = self.clock.now();
        for entry in self.sched.due_alarms(now) {
            match entry.action {
                AlarmAction::Resume => {
                    self.make_runnable(entry.thread);
                }
                AlarmAction::CondvarTimeout => {
                    // A timed wait expired: the thread leaves the condvar
                    // queue and competes for the monitor again.
                    if let Some(id) = self.thread(entry.thread).monitor {
                        let monitor = self.monitors.get_mut(id);
                        let was_waiting = monitor.condvar.contains(&entry.thread);
                        if was_waiting {
                            monitor.condvar.retain(|&t| t != entry.thread);
                            monitor.waiters.push_back(entry.thread);
                            self.thread_mut(entry.thread).state = ThreadState::MONITOR_WAIT;
                            // An owner-less monitor must hand itself over,
                            // or the timed-out waiter would stall forever.
                            if self.monitors.get(id).owner.is_none() {
                                self.promote_head_waiter(id);
                            }
                        }
                    }
                }
                AlarmAction::DeliverInterrupt => {
                    self.thread_mut(entry.thread).pending_throw =
                        Some(crate::thread::PendingThrow {
                            class_name: throwable::INTERRUPTED,
                        });
                    self.make_runnable(entry.thread);
                }
            }
        }
        Ok(())
    }

    /// Parks the current thread on the timer queue for `millis`.
    pub fn sleep_current(&mut self, millis: i64) -> VmResult<()> {
        let id = self.current_id()?;
        if self.thread(id).pending_interrupt {
            self.thread_mut(id).pending_interrupt = false;
            return Err(VmError::throw(throwable::INTERRUPTED, ""));
        }
        if millis <= 0 {
            return self.yield_current();
        }
        let wakeup = self.clock.now() + millis as u64;
        self.sched.register_alarm(id, wakeup, AlarmAction::Resume);
        self.suspend_current(ThreadState::SUSPENDED)
    }

    /// Kills the current thread: unlink from every queue, mark dead, and
    /// halt the VM when the last non-daemon thread is gone.
    pub(crate) fn kill_current_thread(&mut self) -> VmResult<()> {
        let id = self.current_id()?;
        self.sched.cancel_alarms(id);
        self.sched.remove_runnable(id);
        let thread = self.thread_mut(id);
        thread.frames.clear();
        thread.used_cells = 0;
        thread.state = ThreadState::DEAD;
        thread.monitor = None;
        self.current = None;
        debug!("schedule: thread {} ended", id.0);
        if let Some(events) = self.events.as_mut() {
            events.thread_ended(id);
        }
        if self.live_nondaemon_threads() == 0 {
            self.state = VmState::Halted;
            if let Some(events) = self.events.as_mut() {
                events.vm_death();
            }
        }
        Ok(())
    }

    // ----- the run loop -------------------------------------------------

    /// Runs until every thread has died (Ok) or a fatal error occurs.
    pub fn run(&mut self) -> VmResult<()> {
        loop {
            if self.state == VmState::Halted {
                return Ok(());
            }
            self.fire_alarms()?;

            if self.current.is_none() && !self.reschedule() {
                if self.live_threads() == 0 {
                    self.state = VmState::Halted;
                    if let Some(events) = self.events.as_mut() {
                        events.vm_death();
                    }
                    return Ok(());
                }
                if let Some(next) = self.sched.next_wakeup() {
                    self.clock.wait_until(next);
                    continue;
                }
                return Err(VmError::Deadlock {
                    blocked: self.live_threads(),
                });
            }

            if let Err(err) = self.step() {
                if err.is_throw() {
                    self.dispatch_throw(err)?;
                } else {
                    return Err(err);
                }
            }
        }
    }

    /// Single-step entry point for embedders and tests: fires due alarms,
    /// selects a thread when none is current, executes one opcode, and
    /// routes program-visible throws. Returns false when nothing could
    /// run (halted, or every thread blocked).
    pub fn step_once(&mut self) -> VmResult<bool> {
        if self.state == VmState::Halted {
            return Ok(false);
        }
        self.fire_alarms()?;
        if self.current.is_none() && !self.reschedule() {
            return Ok(false);
        }
        match self.step() {
            Ok(()) => Ok(true),
            Err(err) if err.is_throw() => {
                self.dispatch_throw(err)?;
                Ok(true)
            }
            Err(err) => Err(err),
        }
    }

    /// Executes one opcode (or one custom-frame activation) of the current
    /// thread. Exceptions come back as `VmError::Throw`.
    pub fn step(&mut self) -> VmResult<()> {
        let id = self.current_id()?;

        // An exception scheduled while the thread was blocked fires before
        // anything else.
        if let Some(pending) = self.thread_mut(id).pending_throw.take() {
            return Err(VmError::throw(pending.class_name, "interrupted"));
        }

        // Slice accounting: one opcode, one tick.
        {
            let thread = self.thread_mut(id);
            if thread.timeslice == 0 {
                return self.yield_current();
            }
            thread.timeslice -= 1;
        }

        let method = self.frame()?.method;
        let custom = match &self.method(method)?.body {
            MethodBody::Custom(custom) => Some(*custom),
            MethodBody::Bytecode(_) => None,
            _ => return Err(VmError::internal("frame over a body-less method")),
        };
        match custom {
            Some(CustomCode::ClinitBarrier) => self.clinit_barrier_step(),
            Some(CustomCode::ThreadBootstrap) => self.kill_current_thread(),
            None => {
                let ip = self.frame()?.ip;
                self.frame_mut()?.opcode_ip = ip;
                let byte = self.fetch_u8()?;
                let op = OpCode::from_byte(byte).ok_or_else(|| {
                    VmError::internal(format!("unassigned opcode {byte:#04x} reached dispatch"))
                })?;
                jump_table::dispatch(self, op)
            }
        }
    }

    // ----- class initialisation -----------------------------------------

    /// True when a resolution opcode touching `id` must run the
    /// class-initialisation barrier first.
    pub fn class_needs_init(&self, id: ClassId) -> VmResult<bool> {
        let class = match self.classes.class(id).as_instance() {
            Some(c) => c,
            None => return Ok(false),
        };
        if class.status == ClassStatus::Ready {
            return Ok(false);
        }
        // A class being initialised by the current thread is usable
        // (recursion rule).
        Ok(class.init_thread != self.current)
    }

    /// Suspends the faulting opcode by pushing the class-initialisation
    /// barrier. The caller must rewind `ip` to `opcode_ip` so the opcode
    /// re-executes unchanged once the barrier completes.
    pub(crate) fn begin_class_init(&mut self, id: ClassId) -> VmResult<()> {
        // Collect the super chain that still needs initialisation; the
        // eldest must run first, so it goes to the back (popped first).
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(class_id) = cursor {
            let class = self.classes.instance(class_id)?;
            cursor = class.super_class;
            if class.status != ClassStatus::Ready && class.init_thread != self.current {
                chain.push(class_id);
            }
        }
        if chain.is_empty() {
            return Ok(());
        }

        let mut frame = Frame::new(self.known.clinit_barrier, 0, 0);
        frame.kind = FrameKind::ClinitBarrier {
            pending: chain,
            running: None,
        };
        self.push_frame_raw(frame)?;
        trace!("clinit: barrier pushed");
        Ok(())
    }

    /// One activation of the barrier: finish the class whose `<clinit>`
    /// just returned, then start the next pending one.
    fn clinit_barrier_step(&mut self) -> VmResult<()> {
        // Finish the previous class, if any.
        let finished = {
            let frame = self.frame_mut()?;
            match &mut frame.kind {
                FrameKind::ClinitBarrier { running, .. } => running.take(),
                _ => return Err(VmError::internal("barrier step on a non-barrier frame")),
            }
        };
        if let Some(class_id) = finished {
            let class = self.classes.instance_mut(class_id)?;
            class.status = ClassStatus::Ready;
            class.init_thread = None;
            debug!("clinit: class ready");
        }

        let next = {
            let frame = self.frame_mut()?;
            match &mut frame.kind {
                FrameKind::ClinitBarrier { pending, .. } => pending.pop(),
                _ => return Err(VmError::internal("barrier step on a non-barrier frame")),
            }
        };
        let Some(class_id) = next else {
            // Chain exhausted: pop the barrier; the faulting opcode's ip
            // was never advanced, so it re-executes.
            self.pop_frame()?;
            return Ok(());
        };

        self.verify_class(class_id)?;
        self.apply_constant_statics(class_id)?;

        let current = self.current_id()?;
        {
            let class = self.classes.instance_mut(class_id)?;
            class.init_thread = Some(current);
        }
        let frame = self.frame_mut()?;
        if let FrameKind::ClinitBarrier { running, .. } = &mut frame.kind {
            *running = Some(class_id);
        }

        let clinit = self
            .classes
            .instance(class_id)?
            .find_method(self.known.clinit_name, self.known.void_descriptor);
        if let Some(index) = clinit {
            let method = MethodId {
                class: class_id,
                index,
            };
            self.push_method_frame(method, &[])?;
        }
        Ok(())
    }

    /// Writes ConstantValue initialisers into the static block. Runs just
    /// before `<clinit>`.
    fn apply_constant_statics(&mut self, class_id: ClassId) -> VmResult<()> {
        let constants: Vec<(u16, u16)> = self
            .classes
            .instance(class_id)?
            .fields
            .iter()
            .filter(|f| f.is_static() && f.constant_value != 0)
            .map(|f| (f.offset, f.constant_value))
            .collect();
        for (offset, pool_index) in constants {
            let entry = self.pool(class_id)?.entry(pool_index)?.clone();
            match entry {
                PoolEntry::Integer(v) => {
                    self.classes.instance_mut(class_id)?.statics[offset as usize] = v as Cell;
                }
                PoolEntry::Float(v) => {
                    self.classes.instance_mut(class_id)?.statics[offset as usize] = v.to_bits();
                }
                PoolEntry::Long(v) => {
                    let (low, high) = crate::cell::cells_from_i64(v);
                    let statics = &mut self.classes.instance_mut(class_id)?.statics;
                    statics[offset as usize] = low;
                    statics[offset as usize + 1] = high;
                }
                PoolEntry::Double(v) => {
                    let (low, high) = crate::cell::cells_from_f64(v);
                    let statics = &mut self.classes.instance_mut(class_id)?.statics;
                    statics[offset as usize] = low;
                    statics[offset as usize + 1] = high;
                }
                PoolEntry::StringConst { value, .. } => {
                    let text = self.name(value).to_string();
                    let object = self.alloc_string_object(&text)?;
                    self.classes.instance_mut(class_id)?.statics[offset as usize] = object.0;
                }
                other => {
                    return Err(VmError::internal(format!(
                        "bad ConstantValue entry {other:?}"
                    )))
                }
            }
        }
        Ok(())
    }

    // ----- invocation ---------------------------------------------------

    /// Lazily allocated lock target for static synchronised methods.
    pub fn class_object(&mut self, id: ClassId) -> VmResult<ObjRef> {
        if let Some(existing) = self.classes.instance(id)?.class_object {
            return Ok(existing);
        }
        let object = self
            .heap
            .alloc_instance(id, 0)
            .ok_or_else(|| VmError::throw(throwable::OUT_OF_MEMORY, "heap exhausted"))?;
        self.classes.instance_mut(id)?.class_object = Some(object);
        Ok(object)
    }

    /// Pushes `frame`, charging it against the stack budget. A frame must
    /// fit within one stack chunk; the 512-cell method limit keeps that
    /// true for any chunk size the options allow.
    fn push_frame_raw(&mut self, frame: Frame) -> VmResult<()> {
        let charge = frame.charged_cells();
        if charge > self.options.stack_chunk_cells {
            return Err(VmError::internal("frame larger than a stack chunk"));
        }
        let limit = self.options.stack_max_cells;
        let thread = self.current_thread_mut()?;
        if thread.used_cells + charge > limit {
            return Err(VmError::throw(throwable::STACK_OVERFLOW, ""));
        }
        thread.used_cells += charge;
        thread.frames.push(frame);
        Ok(())
    }

    /// Pops the current frame, refunding its stack charge.
    pub(crate) fn pop_frame(&mut self) -> VmResult<Frame> {
        let thread = self.current_thread_mut()?;
        let frame = thread
            .frames
            .pop()
            .ok_or_else(|| VmError::internal("frame stack underflow"))?;
        thread.used_cells -= frame.charged_cells();
        Ok(frame)
    }

    /// Pushes a frame for `method` with `args` pre-filled into locals.
    /// Used for `<clinit>` and thread entry, where arguments do not come
    /// from a caller's operand stack.
    pub(crate) fn push_method_frame(&mut self, method: MethodId, args: &[Cell]) -> VmResult<()> {
        let (frame_cells, max_stack) = {
            let body = self.bytecode(method)?;
            (body.frame_cells as usize, body.max_stack as usize)
        };
        let mut frame = Frame::new(method, frame_cells, max_stack);
        frame.locals[..args.len()].copy_from_slice(args);
        self.push_frame_raw(frame)
    }

    /// Invokes `method` with its arguments on the current operand stack.
    /// Dispatch (virtual/interface lookup) has already happened; this
    /// routine handles natives, abstract targets, frame push, and the
    /// synchronised-method monitor.
    pub(crate) fn invoke_method(&mut self, method: MethodId) -> VmResult<()> {
        let (arg_cells, flags_native, flags_abstract, flags_sync, flags_static, native_id) = {
            let m = self.method(method)?;
            (
                m.arg_cells as usize,
                m.is_native(),
                m.is_abstract(),
                m.is_synchronized(),
                m.is_static(),
                match m.body {
                    MethodBody::Native(id) => id,
                    _ => None,
                },
            )
        };

        if flags_abstract {
            return Err(VmError::throw(throwable::ABSTRACT_METHOD, ""));
        }

        if flags_native {
            let Some(native_id) = native_id else {
                return Err(VmError::throw(throwable::UNSATISFIED_LINK, ""));
            };
            let function = self
                .natives
                .function(native_id)
                .ok_or_else(|| VmError::internal("native registry index out of range"))?;
            if self.natives.is_asynchronous(native_id) {
                // The callback captures its arguments, then the caller
                // suspends until the embedder completes the call. The
                // collector refuses to run while the counter is non-zero.
                function(self)?;
                self.async_natives += 1;
                return self.suspend_current(ThreadState::SUSPENDED);
            }
            return function(self);
        }

        // First use of the class's bytecode: the method must verify.
        self.verify_class(method.class)?;

        let (frame_cells, max_stack) = {
            let body = self.bytecode(method)?;
            (body.frame_cells as usize, body.max_stack as usize)
        };
        let mut frame = Frame::new(method, frame_cells, max_stack);
        {
            let caller = self.frame_mut()?;
            for slot in (0..arg_cells).rev() {
                frame.locals[slot] = caller
                    .pop()
                    .ok_or_else(|| VmError::internal("argument underflow on invoke"))?;
            }
        }

        let sync_object = if flags_sync {
            if flags_static {
                Some(self.class_object(method.class)?)
            } else {
                Some(ObjRef(frame.locals[0]))
            }
        } else {
            None
        };

        self.push_frame_raw(frame)?;

        // The monitor is entered after the frame push and recorded in the
        // frame so returns and unwinds release it.
        if let Some(object) = sync_object {
            self.frame_mut()?.sync_object = object;
            self.monitor_enter(object)?;
        }
        Ok(())
    }

    /// Completes an asynchronous native call: pushes the return cells into
    /// the caller and resumes the thread.
    pub fn complete_async_native(&mut self, thread: ThreadId, result: &[Cell]) -> VmResult<()> {
        if self.async_natives == 0 {
            return Err(VmError::internal("async completion without a call in flight"));
        }
        self.async_natives -= 1;
        {
            let t = self.thread_mut(thread);
            let frame = t
                .frame_mut()
                .ok_or_else(|| VmError::internal("async completion on a dead thread"))?;
            for &cell in result {
                frame.push(cell);
            }
        }
        self.make_runnable(thread);
        Ok(())
    }

    /// Returns from the current frame, pushing `cells` return cells into
    /// the caller. Returning into the bootstrap frame ends the thread on
    /// its next activation.
    pub(crate) fn do_return(&mut self, cells: usize) -> VmResult<()> {
        let mut value = [0 as Cell; 2];
        {
            let frame = self.frame_mut()?;
            for slot in (0..cells).rev() {
                value[slot] = frame
                    .pop()
                    .ok_or_else(|| VmError::internal("return value underflow"))?;
            }
        }

        let sync_object = self.frame()?.sync_object;
        if !sync_object.is_null() {
            self.monitor_exit(sync_object)?;
        }

        self.pop_frame()?;

        let caller = self.frame_mut()?;
        if caller.kind == FrameKind::ThreadBootstrap {
            // Return value of a thread's entry method is discarded; the
            // bootstrap activation that follows kills the thread.
            return Ok(());
        }
        for slot in value.iter().take(cells) {
            caller.push(*slot);
        }
        Ok(())
    }

    /// Resolves the Class entry at `index` of `pool_class`'s pool, loading
    /// and linking the named class on first use and caching the result in
    /// the entry's write-once slot.
    pub(crate) fn resolve_pool_class(
        &mut self,
        pool_class: ClassId,
        index: u16,
    ) -> VmResult<ClassId> {
        if let Some(resolved) = self.pool(pool_class)?.resolved_class(index)? {
            return Ok(resolved);
        }
        let name = self.pool(pool_class)?.class_name(index)?;
        let resolved = self.resolve_class(name)?;
        self.pool_mut(pool_class)?.cache_class(index, resolved)?;
        Ok(resolved)
    }

    /// Promotes the head of the waiter queue of an owner-less monitor.
    /// Shared by the monitor engine and the timed-wait expiry path.
    pub(crate) fn promote_head_waiter(&mut self, id: crate::monitor::MonitorId) {
        let next = self.monitors.get_mut(id).waiters.pop_front();
        if let Some(next) = next {
            let depth = self.thread(next).wakeup_depth;
            let monitor = self.monitors.get_mut(id);
            monitor.owner = Some(next);
            monitor.depth = depth;
            self.thread_mut(next).monitor = None;
            self.make_runnable(next);
        }
    }
}
