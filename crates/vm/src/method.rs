//! Runtime method records.
//!
//! A method is immutable once loaded, with two exceptions that stay inside
//! the fast-variant family: the interpreter may rewrite a resolution opcode
//! to its fast variant, and the verifier replaces the type-tag stack maps
//! with collector-oriented pointer maps after a successful run.

use mjvm_classfile::{ExceptionHandler, MethodFlags};

use crate::class::ClassId;
use crate::intern::NameKey;
use crate::verifier::stack_map::{PointerMap, RecordedMap};

/// Identity of one method: its declaring class plus the method-table index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodId {
    pub class: ClassId,
    pub index: u16,
}

/// Stack-map state of a bytecode body.
#[derive(Debug, Clone, Default)]
pub enum StackMaps {
    /// No StackMap attribute was present. The method cannot be verified.
    #[default]
    Absent,
    /// Verifier-oriented type-tag maps, as loaded.
    Verifier(Vec<RecordedMap>),
    /// Collector-oriented per-slot pointer bitmaps, produced on successful
    /// verification.
    Pointer(Vec<PointerMap>),
}

/// The bytecode body of a non-native method.
#[derive(Debug, Clone)]
pub struct BytecodeBody {
    pub max_stack: u16,
    /// Locals of the frame, including the receiver and arguments.
    pub frame_cells: u16,
    pub code: Vec<u8>,
    pub handlers: Vec<ExceptionHandler>,
    pub stack_maps: StackMaps,
}

/// Callback identity of a custom-code frame. The frame itself carries the
/// callback's state; this tag selects the behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomCode {
    /// Runs `<clinit>` of a chain of classes, eldest first, then lets the
    /// faulting opcode re-execute.
    ClinitBarrier,
    /// The bottom frame of every thread; returning through it kills the
    /// thread.
    ThreadBootstrap,
}

/// What a method executes.
#[derive(Debug, Clone)]
pub enum MethodBody {
    Bytecode(Box<BytecodeBody>),
    /// Index into the VM's native registry, looked up once during loading.
    /// `None` means no implementation was registered; invoking it raises
    /// `UnsatisfiedLinkError`.
    Native(Option<u32>),
    Abstract,
    /// One of the two synthetic custom-code methods.
    Custom(CustomCode),
}

/// One runtime method.
#[derive(Debug, Clone)]
pub struct Method {
    pub name: NameKey,
    pub descriptor: NameKey,
    pub flags: MethodFlags,
    /// Argument cells popped by an invoke, including the receiver for
    /// instance methods.
    pub arg_cells: u16,
    /// Cells pushed into the caller on return: 0, 1, or 2.
    pub return_cells: u8,
    pub body: MethodBody,
}

impl Method {
    /// True for static methods.
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC)
    }

    /// True for abstract methods.
    pub fn is_abstract(&self) -> bool {
        self.flags.contains(MethodFlags::ABSTRACT)
    }

    /// True for native methods.
    pub fn is_native(&self) -> bool {
        self.flags.contains(MethodFlags::NATIVE)
    }

    /// True for synchronised methods: the interpreter enters the receiver's
    /// monitor (or the class monitor for statics) around the frame.
    pub fn is_synchronized(&self) -> bool {
        self.flags.contains(MethodFlags::SYNCHRONIZED)
    }

    /// The bytecode body, if this is a bytecode method.
    pub fn bytecode(&self) -> Option<&BytecodeBody> {
        match &self.body {
            MethodBody::Bytecode(body) => Some(body),
            _ => None,
        }
    }

    /// Mutable access to the bytecode body (opcode rewriting, map swap).
    pub fn bytecode_mut(&mut self) -> Option<&mut BytecodeBody> {
        match &mut self.body {
            MethodBody::Bytecode(body) => Some(body),
            _ => None,
        }
    }
}
