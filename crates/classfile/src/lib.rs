//! # Class-file decoding for micro-jvm
//!
//! This crate decodes the binary class-file format consumed by the
//! micro-jvm virtual machine: the tag-checked constant pool, field and
//! method tables, Code attributes with their exception-handler tables, and
//! the verifier-oriented StackMap attribute. It performs every structural
//! validation that does not require the runtime class table (magic and
//! version checks, modified-UTF-8 well-formedness, name and descriptor
//! grammar, access-flag combinations, attribute length accounting), leaving
//! linking, layout, and verification to the VM crate.
//!
//! ## Example
//!
//! ```
//! use mjvm_classfile::builder::ClassFileBuilder;
//! use mjvm_classfile::class_file::ClassFile;
//!
//! let builder = ClassFileBuilder::new("demo/Empty", Some("java/lang/Object"));
//! let bytes = builder.build();
//! let class_file = ClassFile::parse(&bytes).unwrap();
//! assert_eq!(class_file.name(), "demo/Empty");
//! ```

/// Access-flag words and their legality rules
pub mod access_flags;
/// Code, Exceptions, ConstantValue, and StackMap attributes
pub mod attributes;
/// Programmatic class-file construction (used by tests)
pub mod builder;
/// Top-level class-file decoding
pub mod class_file;
/// The tag-checked constant pool
pub mod constant_pool;
/// Names, field signatures, and method descriptors
pub mod descriptor;
/// Error types for class-file decoding
pub mod error;
/// Bounded cursor over a raw class stream
pub mod reader;

pub use access_flags::{ClassFlags, FieldFlags, MethodFlags};
pub use attributes::{
    CodeAttribute, ExceptionHandler, StackMapEntry, StackMapItem, MAX_FRAME_CELLS,
    MAX_METHOD_BYTECODE,
};
pub use builder::{ClassFileBuilder, MethodBody};
pub use class_file::{ClassFile, FieldInfo, MethodInfo};
pub use constant_pool::{Constant, ConstantPool};
pub use descriptor::{BaseType, FieldType, MethodDescriptor};
pub use error::{ClassFileError, ClassFileResult};
pub use reader::ClassReader;
