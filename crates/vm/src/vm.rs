//! The VM instance.
//!
//! Every piece of logically global state (class table, intern table, heap,
//! threads, scheduler queues, monitor table, native registry) lives in one
//! [`Vm`] struct, and all code receives a reference to it rather than
//! reaching for process globals. The interpreter, loader, verifier, and
//! monitor engine are implemented as `impl Vm` blocks in their own modules.

use hashbrown::HashMap;

use crate::cell::Cell;
use crate::class::{Class, ClassId, ClassStatus, InstanceClass};
use crate::class_table::ClassTable;
use crate::constant_pool::RuntimePool;
use crate::error::{throwable, VmError, VmResult};
use crate::events::EventSink;
use crate::frame::{Frame, FrameKind};
use crate::intern::{InternTable, NameKey};
use crate::method::{BytecodeBody, CustomCode, Method, MethodBody, MethodId};
use crate::monitor::MonitorTable;
use crate::native::NativeRegistry;
use crate::object::{Heap, HeapObject, ObjRef, ObjectBody};
use crate::scheduler::{Clock, Scheduler, VirtualClock};
use crate::thread::{ThreadId, ThreadState, VmThread};

use mjvm_classfile::{ClassFlags, MethodFlags};

/// Build-time style configuration, carried per VM instance.
#[derive(Debug, Clone)]
pub struct VmOptions {
    /// Heap budget in cells.
    pub heap_cells: usize,
    /// Stack growth granularity in cells. A frame always fits in one chunk
    /// because methods are bounded to 512 locals+stack cells.
    pub stack_chunk_cells: usize,
    /// Per-thread stack budget in cells; exceeding it raises
    /// `StackOverflowError`.
    pub stack_max_cells: usize,
    /// Opcodes per scheduling slice.
    pub base_timeslice: u32,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            heap_cells: 1 << 20,
            stack_chunk_cells: 1024,
            stack_max_cells: 32 * 1024,
            base_timeslice: 1000,
        }
    }
}

/// Where class bytes come from. The on-device lookup path is the
/// embedder's business; the core only ever asks for a name.
pub trait ClassSource {
    /// Returns the class-file bytes for `name` (slash-separated), or
    /// `None` when the class cannot be found.
    fn class_bytes(&mut self, name: &str) -> Option<Vec<u8>>;
}

/// A class source backed by an in-memory map; the usual choice for tests
/// and for embedders that preload their classpath.
#[derive(Debug, Default)]
pub struct MapClassSource {
    classes: HashMap<String, Vec<u8>>,
}

impl MapClassSource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the bytes for `name`.
    pub fn insert(&mut self, name: &str, bytes: Vec<u8>) {
        self.classes.insert(name.to_string(), bytes);
    }
}

impl ClassSource for MapClassSource {
    fn class_bytes(&mut self, name: &str) -> Option<Vec<u8>> {
        self.classes.get(name).cloned()
    }
}

/// Interned keys and lazily resolved ids the core refers to by name.
#[derive(Debug)]
pub struct WellKnown {
    pub object_name: NameKey,
    pub string_name: NameKey,
    pub throwable_name: NameKey,
    pub init_name: NameKey,
    pub clinit_name: NameKey,
    pub finalize_name: NameKey,
    pub void_descriptor: NameKey,
    pub message_name: NameKey,
    pub string_descriptor: NameKey,
    /// Resolved id of `java/lang/Object`, set on first load.
    pub object_class: Option<ClassId>,
    /// Resolved id of `java/lang/String`, set on first use.
    pub string_class: Option<ClassId>,
    /// The synthetic class-initialisation barrier method.
    pub clinit_barrier: MethodId,
    /// The synthetic thread bootstrap method.
    pub thread_bootstrap: MethodId,
}

/// Whether the VM's run loop is still willing to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Running,
    Halted,
}

/// The virtual machine.
pub struct Vm {
    pub options: VmOptions,
    pub names: InternTable,
    pub classes: ClassTable,
    pub heap: Heap,
    pub threads: Vec<VmThread>,
    /// The running thread; never on the runnable queue.
    pub current: Option<ThreadId>,
    pub sched: Scheduler,
    pub clock: Box<dyn Clock>,
    pub monitors: MonitorTable,
    pub natives: NativeRegistry,
    pub events: Option<Box<dyn EventSink>>,
    pub source: Box<dyn ClassSource>,
    pub known: WellKnown,
    pub state: VmState,
    /// Asynchronous native calls in flight; the collector refuses to run
    /// while this is non-zero.
    pub async_natives: u32,
}

impl Vm {
    /// Creates a VM over the given class source.
    pub fn new(options: VmOptions, source: Box<dyn ClassSource>) -> VmResult<Self> {
        let mut names = InternTable::new();
        let mut classes = ClassTable::new();
        let heap = Heap::new(options.heap_cells);

        // The hidden host class of the two synthetic custom-code methods.
        // Its name contains '<', which no loadable class name may, so it
        // can never collide with a program class.
        let hidden_name = names.intern("<vm>");
        let custom_descriptor = names.intern("()V");
        let barrier_name = names.intern("<clinitBarrier>");
        let bootstrap_name = names.intern("<threadBootstrap>");
        let hidden = InstanceClass {
            name: hidden_name,
            package: hidden_name,
            flags: ClassFlags::FINAL,
            super_class: None,
            interfaces: Vec::new(),
            pool: RuntimePool::default(),
            fields: Vec::new(),
            methods: vec![
                Method {
                    name: barrier_name,
                    descriptor: custom_descriptor,
                    flags: MethodFlags::STATIC,
                    arg_cells: 0,
                    return_cells: 0,
                    body: MethodBody::Custom(CustomCode::ClinitBarrier),
                },
                Method {
                    name: bootstrap_name,
                    descriptor: custom_descriptor,
                    flags: MethodFlags::STATIC,
                    arg_cells: 0,
                    return_cells: 0,
                    body: MethodBody::Custom(CustomCode::ThreadBootstrap),
                },
            ],
            instance_cells: 0,
            statics: Vec::new(),
            static_pointer_cells: 0,
            status: ClassStatus::Ready,
            init_thread: None,
            class_object: None,
            finalizer: None,
        };
        let hidden_id = classes.insert(Class::Instance(hidden))?;

        let known = WellKnown {
            object_name: names.intern("java/lang/Object"),
            string_name: names.intern("java/lang/String"),
            throwable_name: names.intern("java/lang/Throwable"),
            init_name: names.intern("<init>"),
            clinit_name: names.intern("<clinit>"),
            finalize_name: names.intern("finalize"),
            void_descriptor: names.intern("()V"),
            message_name: names.intern("message"),
            string_descriptor: names.intern("Ljava/lang/String;"),
            object_class: None,
            string_class: None,
            clinit_barrier: MethodId {
                class: hidden_id,
                index: 0,
            },
            thread_bootstrap: MethodId {
                class: hidden_id,
                index: 1,
            },
        };

        let mut natives = NativeRegistry::new();
        crate::builtins::install(&mut natives);

        Ok(Self {
            options,
            names,
            classes,
            heap,
            threads: Vec::new(),
            current: None,
            sched: Scheduler::new(),
            clock: Box::new(VirtualClock::new()),
            monitors: MonitorTable::new(),
            natives,
            events: None,
            source,
            known,
            state: VmState::Running,
            async_natives: 0,
        })
    }

    /// Replaces the clock.
    pub fn set_clock(&mut self, clock: Box<dyn Clock>) {
        self.clock = clock;
    }

    /// Installs an event sink.
    pub fn set_events(&mut self, events: Box<dyn EventSink>) {
        self.events = Some(events);
    }

    // ----- interning ----------------------------------------------------

    /// Interns a string.
    pub fn intern(&mut self, text: &str) -> NameKey {
        self.names.intern(text)
    }

    /// Resolves an interned key.
    pub fn name(&self, key: NameKey) -> &str {
        self.names.resolve(key)
    }

    // ----- threads and frames -------------------------------------------

    /// The running thread's id; fatal when no thread is running.
    pub fn current_id(&self) -> VmResult<ThreadId> {
        self.current
            .ok_or_else(|| VmError::internal("no current thread"))
    }

    /// Thread access by id.
    pub fn thread(&self, id: ThreadId) -> &VmThread {
        &self.threads[id.0 as usize]
    }

    /// Mutable thread access by id.
    pub fn thread_mut(&mut self, id: ThreadId) -> &mut VmThread {
        &mut self.threads[id.0 as usize]
    }

    /// The running thread.
    pub fn current_thread(&self) -> VmResult<&VmThread> {
        Ok(self.thread(self.current_id()?))
    }

    /// The running thread, mutably.
    pub fn current_thread_mut(&mut self) -> VmResult<&mut VmThread> {
        let id = self.current_id()?;
        Ok(self.thread_mut(id))
    }

    /// The current frame.
    pub fn frame(&self) -> VmResult<&Frame> {
        self.current_thread()?
            .frame()
            .ok_or_else(|| VmError::internal("current thread has no frame"))
    }

    /// The current frame, mutably.
    pub fn frame_mut(&mut self) -> VmResult<&mut Frame> {
        self.current_thread_mut()?
            .frame_mut()
            .ok_or_else(|| VmError::internal("current thread has no frame"))
    }

    /// Live (non-dead) thread count.
    pub fn live_threads(&self) -> usize {
        self.threads.iter().filter(|t| !t.is_dead()).count()
    }

    /// Live non-daemon thread count; the VM exits when this reaches zero.
    pub fn live_nondaemon_threads(&self) -> usize {
        self.threads
            .iter()
            .filter(|t| !t.is_dead() && !t.daemon)
            .count()
    }

    // ----- methods and bytecode -----------------------------------------

    /// Method access by id.
    pub fn method(&self, id: MethodId) -> VmResult<&Method> {
        self.classes
            .instance(id.class)?
            .methods
            .get(id.index as usize)
            .ok_or_else(|| VmError::internal("method index out of range"))
    }

    /// Mutable method access by id (opcode rewriting).
    pub fn method_mut(&mut self, id: MethodId) -> VmResult<&mut Method> {
        self.classes
            .instance_mut(id.class)?
            .methods
            .get_mut(id.index as usize)
            .ok_or_else(|| VmError::internal("method index out of range"))
    }

    /// Bytecode body of a method; fatal for native/abstract methods.
    pub fn bytecode(&self, id: MethodId) -> VmResult<&BytecodeBody> {
        self.method(id)?
            .bytecode()
            .ok_or_else(|| VmError::internal("method has no bytecode"))
    }

    /// Reads the operand byte at the current frame's ip and advances.
    pub fn fetch_u8(&mut self) -> VmResult<u8> {
        let (method, ip) = {
            let frame = self.frame()?;
            (frame.method, frame.ip)
        };
        let byte = {
            let body = self.bytecode(method)?;
            *body
                .code
                .get(ip)
                .ok_or_else(|| VmError::internal("instruction pointer past end of bytecode"))?
        };
        self.frame_mut()?.ip = ip + 1;
        Ok(byte)
    }

    /// Reads a signed operand byte.
    pub fn fetch_i8(&mut self) -> VmResult<i8> {
        Ok(self.fetch_u8()? as i8)
    }

    /// Reads a big-endian 16-bit operand.
    pub fn fetch_u16(&mut self) -> VmResult<u16> {
        let high = self.fetch_u8()? as u16;
        let low = self.fetch_u8()? as u16;
        Ok((high << 8) | low)
    }

    /// Reads a signed big-endian 16-bit operand.
    pub fn fetch_i16(&mut self) -> VmResult<i16> {
        Ok(self.fetch_u16()? as i16)
    }

    /// Reads a signed big-endian 32-bit operand.
    pub fn fetch_i32(&mut self) -> VmResult<i32> {
        let high = self.fetch_u16()? as u32;
        let low = self.fetch_u16()? as u32;
        Ok(((high << 16) | low) as i32)
    }

    /// The constant pool of the current method's class. Returned by id to
    /// sidestep borrow entanglement: callers re-borrow through
    /// [`Vm::pool`].
    pub fn current_class(&self) -> VmResult<ClassId> {
        Ok(self.frame()?.method.class)
    }

    /// Pool access for a class.
    pub fn pool(&self, class: ClassId) -> VmResult<&RuntimePool> {
        Ok(&self.classes.instance(class)?.pool)
    }

    /// Mutable pool access for a class.
    pub fn pool_mut(&mut self, class: ClassId) -> VmResult<&mut RuntimePool> {
        Ok(&mut self.classes.instance_mut(class)?.pool)
    }

    // ----- heap ---------------------------------------------------------

    /// Dereferences an object handle, converting null into the
    /// program-visible `NullPointerException`.
    pub fn obj(&self, handle: ObjRef) -> VmResult<&HeapObject> {
        self.heap.get(handle).ok_or_else(VmError::null_pointer)
    }

    /// Mutable dereference; same null contract as [`Vm::obj`].
    pub fn obj_mut(&mut self, handle: ObjRef) -> VmResult<&mut HeapObject> {
        self.heap.get_mut(handle).ok_or_else(VmError::null_pointer)
    }

    /// Allocates an instance of `class`, raising `OutOfMemoryError` on
    /// budget exhaustion.
    pub fn alloc_instance_of(&mut self, class: ClassId) -> VmResult<ObjRef> {
        let cells = self.classes.instance(class)?.instance_cells as usize;
        self.heap
            .alloc_instance(class, cells)
            .ok_or_else(|| VmError::throw(throwable::OUT_OF_MEMORY, "heap exhausted"))
    }

    /// Allocates a string object for `text`, resolving `java/lang/String`
    /// on first use.
    pub fn alloc_string_object(&mut self, text: &str) -> VmResult<ObjRef> {
        let string_class = self.string_class()?;
        self.heap
            .alloc_string(string_class, text)
            .ok_or_else(|| VmError::throw(throwable::OUT_OF_MEMORY, "heap exhausted"))
    }

    /// The id of `java/lang/String`, loading it on first use.
    pub fn string_class(&mut self) -> VmResult<ClassId> {
        if let Some(id) = self.known.string_class {
            return Ok(id);
        }
        let key = self.known.string_name;
        let id = self.resolve_class(key)?;
        self.known.string_class = Some(id);
        Ok(id)
    }

    /// The id of `java/lang/Object`, loading it on first use.
    pub fn object_class(&mut self) -> VmResult<ClassId> {
        if let Some(id) = self.known.object_class {
            return Ok(id);
        }
        let key = self.known.object_name;
        let id = self.resolve_class(key)?;
        self.known.object_class = Some(id);
        Ok(id)
    }

    /// Text carried by a string object, for embedders and tests.
    pub fn string_value(&self, handle: ObjRef) -> Option<&str> {
        match &self.heap.get(handle)?.body {
            ObjectBody::StringData(text) => Some(text),
            _ => None,
        }
    }

    // ----- thread lifecycle ---------------------------------------------

    /// Creates a just-born thread whose first real frame runs `entry` with
    /// `args` in its leading locals. The bottom frame is the thread
    /// bootstrap; returning through it kills the thread.
    pub fn spawn_thread(&mut self, entry: MethodId, args: &[Cell]) -> VmResult<ThreadId> {
        // First use of the class's bytecode.
        self.verify_class(entry.class)?;
        let (frame_cells, max_stack) = {
            let method = self.method(entry)?;
            match method.bytecode() {
                Some(body) => (body.frame_cells as usize, body.max_stack as usize),
                None => return Err(VmError::internal("thread entry must be a bytecode method")),
            }
        };
        if args.len() > frame_cells {
            return Err(VmError::internal("more entry arguments than locals"));
        }

        let id = ThreadId(self.threads.len() as u16);
        let mut thread = VmThread::new(self.options.base_timeslice);

        let mut bootstrap = Frame::new(self.known.thread_bootstrap, 0, 0);
        bootstrap.kind = FrameKind::ThreadBootstrap;
        thread.used_cells += bootstrap.charged_cells();
        thread.frames.push(bootstrap);

        let mut frame = Frame::new(entry, frame_cells, max_stack);
        frame.locals[..args.len()].copy_from_slice(args);
        thread.used_cells += frame.charged_cells();
        thread.frames.push(frame);

        self.threads.push(thread);
        Ok(id)
    }

    /// Moves a just-born thread into the runnable queue.
    pub fn start_thread(&mut self, id: ThreadId) -> VmResult<()> {
        let thread = self.thread_mut(id);
        if !thread.state.contains(ThreadState::JUST_BORN) {
            return Err(VmError::internal("thread started twice"));
        }
        thread.state = ThreadState::ACTIVE;
        self.sched.enqueue_runnable(id);
        if let Some(events) = self.events.as_mut() {
            events.thread_started(id);
        }
        Ok(())
    }

    /// Convenience: spawn, start, and mark as the VM's main thread.
    pub fn start_main_thread(&mut self, entry: MethodId, args: &[Cell]) -> VmResult<ThreadId> {
        let id = self.spawn_thread(entry, args)?;
        self.start_thread(id)?;
        Ok(id)
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("classes", &self.classes.len())
            .field("threads", &self.threads.len())
            .field("current", &self.current)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_vm_holds_the_synthetic_methods() {
        let vm = Vm::new(VmOptions::default(), Box::new(MapClassSource::new())).unwrap();
        let barrier = vm.method(vm.known.clinit_barrier).unwrap();
        assert!(matches!(
            barrier.body,
            MethodBody::Custom(CustomCode::ClinitBarrier)
        ));
        let bootstrap = vm.method(vm.known.thread_bootstrap).unwrap();
        assert!(matches!(
            bootstrap.body,
            MethodBody::Custom(CustomCode::ThreadBootstrap)
        ));
    }

    #[test]
    fn hidden_class_name_cannot_collide() {
        let vm = Vm::new(VmOptions::default(), Box::new(MapClassSource::new())).unwrap();
        // '<' is illegal in loadable class names, so the hidden class is
        // unreachable from programs.
        assert!(!mjvm_classfile::descriptor::is_valid_class_name(
            vm.name(vm.classes.class(ClassId(0)).name())
        ));
    }
}
