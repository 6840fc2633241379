//! Error types for the VM core.
//!
//! Failures fall into three disjoint families:
//!
//! 1. **Fatal VM errors**: broken invariants and startup out-of-memory.
//!    These propagate out of the run loop and abort execution.
//! 2. **Classfile and linkage errors**: thrown into the current thread and
//!    caught like ordinary exceptions; the failed classes revert to RAW.
//! 3. **Program-visible exceptions**: the [`VmError::Throw`] variant. The
//!    dispatch loop intercepts it, materialises the named throwable on the
//!    heap, and routes it through the handler-table search. It never
//!    escapes the interpreter.
//!
//! Opcode handlers never panic; every failure is converted to one of these
//! before control returns to dispatch.

use thiserror::Error;

/// Well-known throwable class names raised by the core itself.
pub mod throwable {
    pub const NULL_POINTER: &str = "java/lang/NullPointerException";
    pub const ARRAY_INDEX: &str = "java/lang/ArrayIndexOutOfBoundsException";
    pub const ARITHMETIC: &str = "java/lang/ArithmeticException";
    pub const ARRAY_STORE: &str = "java/lang/ArrayStoreException";
    pub const CLASS_CAST: &str = "java/lang/ClassCastException";
    pub const NEGATIVE_ARRAY_SIZE: &str = "java/lang/NegativeArraySizeException";
    pub const ABSTRACT_METHOD: &str = "java/lang/AbstractMethodError";
    pub const OUT_OF_MEMORY: &str = "java/lang/OutOfMemoryError";
    pub const STACK_OVERFLOW: &str = "java/lang/StackOverflowError";
    pub const ILLEGAL_MONITOR_STATE: &str = "java/lang/IllegalMonitorStateException";
    pub const INTERRUPTED: &str = "java/lang/InterruptedException";
    pub const CLASS_FORMAT: &str = "java/lang/ClassFormatError";
    pub const NO_CLASS_DEF: &str = "java/lang/NoClassDefFoundError";
    pub const CLASS_NOT_FOUND: &str = "java/lang/ClassNotFoundException";
    pub const CLASS_CIRCULARITY: &str = "java/lang/ClassCircularityError";
    pub const INCOMPATIBLE_CLASS_CHANGE: &str = "java/lang/IncompatibleClassChangeError";
    pub const VERIFY: &str = "java/lang/VerifyError";
    pub const UNSATISFIED_LINK: &str = "java/lang/UnsatisfiedLinkError";
    pub const INSTANTIATION: &str = "java/lang/InstantiationError";
    pub const NO_SUCH_FIELD: &str = "java/lang/NoSuchFieldError";
    pub const NO_SUCH_METHOD: &str = "java/lang/NoSuchMethodError";
    pub const ILLEGAL_ACCESS: &str = "java/lang/IllegalAccessError";
}

/// Errors produced by the VM core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VmError {
    /// An internal invariant was violated. Never recoverable.
    #[error("internal VM error: {message}")]
    Internal { message: String },

    /// The heap budget was exhausted during startup, before any thread
    /// could observe an `OutOfMemoryError`.
    #[error("out of memory during startup: {context}")]
    StartupOutOfMemory { context: &'static str },

    /// Every live thread is blocked and no timer can unblock one.
    #[error("deadlock: all {blocked} live thread(s) are blocked")]
    Deadlock { blocked: usize },

    /// A program-visible exception to be materialised and dispatched.
    /// `object` carries an already-constructed throwable (from `athrow`);
    /// otherwise `class_name` names the class to instantiate.
    #[error("{class_name}: {message}")]
    Throw {
        class_name: String,
        message: String,
        /// Raw heap handle of a pre-built throwable, if one exists.
        object: Option<u32>,
    },
}

impl VmError {
    /// Creates a fatal internal error.
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a throw request for the named class.
    pub fn throw<S: Into<String>>(class_name: &str, message: S) -> Self {
        Self::Throw {
            class_name: class_name.to_string(),
            message: message.into(),
            object: None,
        }
    }

    /// Creates a throw request for an already-built throwable object.
    pub fn rethrow(class_name: &str, object: u32) -> Self {
        Self::Throw {
            class_name: class_name.to_string(),
            message: String::new(),
            object: Some(object),
        }
    }

    /// Shorthand for a `NullPointerException` throw request.
    pub fn null_pointer() -> Self {
        Self::throw(throwable::NULL_POINTER, "")
    }

    /// Shorthand for an `ArrayIndexOutOfBoundsException` throw request.
    pub fn array_index(index: i32) -> Self {
        Self::throw(throwable::ARRAY_INDEX, index.to_string())
    }

    /// Shorthand for a `ClassFormatError` throw request.
    pub fn class_format<S: Into<String>>(detail: S) -> Self {
        Self::throw(throwable::CLASS_FORMAT, detail)
    }

    /// Shorthand for a `VerifyError` throw request naming the class.
    pub fn verify_error(class_name: &str, detail: &str) -> Self {
        Self::throw(
            throwable::VERIFY,
            format!("{}: {}", class_name.replace('/', "."), detail),
        )
    }

    /// True when this error is a program-visible throw request rather than
    /// a fatal condition.
    pub fn is_throw(&self) -> bool {
        matches!(self, Self::Throw { .. })
    }
}

/// Result alias used throughout the VM core.
pub type VmResult<T> = Result<T, VmError>;
