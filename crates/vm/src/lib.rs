//! # micro-jvm virtual machine core
//!
//! A compact virtual machine executing stack-based bytecode on
//! resource-constrained devices. The crate covers the four tightly coupled
//! subsystems that make up the core:
//!
//! - **Loader and linker**: converts decoded class files into runtime
//!   classes, resolves the superclass/interface closure, lays out instance
//!   and static fields, and rolls every participant back to RAW on a
//!   transient failure.
//! - **Verifier**: a stack-map-driven abstract interpreter that re-checks
//!   each method before its first execution and rewrites the maps into
//!   collector-oriented pointer bitmaps on success.
//! - **Interpreter**: a jump-table dispatch loop over the full opcode set,
//!   with constant-pool inline caches and in-place rewriting of resolution
//!   opcodes to fast variants.
//! - **Scheduler and monitor engine**: cooperative round-robin threads,
//!   a sorted timer queue, and a three-tier object lock that inflates to a
//!   full monitor only under contention or `wait`.
//!
//! Everything logically global lives in a single [`Vm`] value; no process
//! globals exist. The host hands the VM a [`ClassSource`] for class bytes
//! and optionally an [`EventSink`]; the garbage collector, native method
//! bodies, and the debugger wire protocol stay outside the core.
//!
//! ## Example
//!
//! ```no_run
//! use mjvm_vm::{MapClassSource, Vm, VmOptions};
//!
//! # fn example(class_bytes: Vec<u8>) -> mjvm_vm::VmResult<()> {
//! let mut source = MapClassSource::new();
//! source.insert("demo/Main", class_bytes);
//! let mut vm = Vm::new(VmOptions::default(), Box::new(source))?;
//! let class = vm.load_class_by_name("demo/Main")?;
//! # let _ = class;
//! // Resolve an entry method, start the main thread, and run.
//! # Ok(())
//! # }
//! ```

/// Built-in native methods (hashCode, wait/notify, sleep)
mod builtins;
/// The 32-bit cell and two-word value helpers
pub mod cell;
/// Runtime classes: instance and array variants
pub mod class;
/// The stable-index class table
pub mod class_table;
/// The runtime constant pool with write-once caches
pub mod constant_pool;
/// Error types: fatal, linkage, and program-visible
pub mod error;
/// Life-cycle event sink for embedders
pub mod events;
/// Exception materialisation and the handler-table walk
pub mod exception;
/// Runtime field records
pub mod field;
/// Activation records
pub mod frame;
/// VM-wide string interning
pub mod intern;
/// The dispatch loop, scheduling glue, and invocation machinery
pub mod interpreter;
/// Opcode dispatch table and handler families
pub mod jump_table;
/// The class loader and linker
pub mod loader;
/// Runtime method records
pub mod method;
/// The three-tier monitor engine
pub mod monitor;
/// The native-method registry
pub mod native;
/// Heap objects and the object-header word
pub mod object;
/// Opcode definitions
pub mod op_code;
/// Scheduler queues and the clock abstraction
pub mod scheduler;
/// VM threads
pub mod thread;
/// The stack-map verifier
pub mod verifier;
/// The VM instance
pub mod vm;

pub use cell::Cell;
pub use class::{ArrayClass, ArrayElement, Class, ClassId, ClassStatus, InstanceClass, PrimitiveType};
pub use class_table::ClassTable;
pub use constant_pool::{PoolEntry, RuntimePool};
pub use error::{throwable, VmError, VmResult};
pub use events::{CountingSink, EventSink};
pub use field::{Field, FieldId, FieldKind};
pub use frame::{Frame, FrameKind};
pub use intern::{InternTable, NameKey};
pub use method::{BytecodeBody, CustomCode, Method, MethodBody, MethodId, StackMaps};
pub use monitor::{EnterOutcome, Monitor, MonitorId, MonitorTable};
pub use native::{NativeFn, NativeRegistry};
pub use object::{Heap, HeapObject, LockTag, ObjRef, ObjectBody};
pub use op_code::{OpCode, OperandLen};
pub use scheduler::{AlarmAction, Clock, Scheduler, SystemClock, VirtualClock};
pub use thread::{ThreadId, ThreadState, VmThread};
pub use verifier::stack_map::{PointerMap, RecordedMap};
pub use verifier::types::VType;
pub use vm::{ClassSource, MapClassSource, Vm, VmOptions, VmState, WellKnown};
