//! Error types for class-file decoding.
//!
//! Every failure that can occur while decoding a class stream maps to one
//! variant of [`ClassFileError`]. Callers that need to surface the error as a
//! thrown `ClassFormatError` can rely on the `Display` form carrying enough
//! context (offset, index, tag) to identify the offending entry.

use thiserror::Error;

/// Errors produced while decoding a class file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassFileError {
    /// The stream ended before the requested bytes could be read.
    #[error("truncated class file: needed {wanted} byte(s) at offset {offset}")]
    Truncated { wanted: usize, offset: usize },

    /// Bytes remained after the final class attribute.
    #[error("trailing bytes after end of class file: {remaining} byte(s)")]
    TrailingBytes { remaining: usize },

    /// The magic number was not `0xCAFEBABE`.
    #[error("bad magic number: {found:#010x}")]
    BadMagic { found: u32 },

    /// The class-file version is outside the supported range.
    #[error("unsupported class file version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    /// A constant-pool entry carried an unknown tag.
    #[error("bad constant pool tag {tag} at index {index}")]
    BadConstantTag { tag: u8, index: u16 },

    /// A constant-pool index was out of range or referred to the wrong kind
    /// of entry.
    #[error("constant pool index {index} does not refer to a {expected} entry")]
    BadConstantIndex { index: u16, expected: &'static str },

    /// A Utf8 entry was not well-formed modified UTF-8.
    #[error("malformed modified-UTF-8 in constant pool entry {index}")]
    MalformedUtf8 { index: u16 },

    /// A class, field, or method name violated the name grammar.
    #[error("illegal name: {name:?}")]
    BadName { name: String },

    /// A field signature or method descriptor violated the grammar.
    #[error("illegal descriptor: {descriptor:?}")]
    BadDescriptor { descriptor: String },

    /// An access-flag word contained an illegal combination.
    #[error("illegal access flags {flags:#06x} on {context}")]
    BadAccessFlags { flags: u16, context: &'static str },

    /// Two fields or two methods shared the same name and descriptor.
    #[error("duplicate {kind} {name}:{descriptor}")]
    DuplicateMember {
        kind: &'static str,
        name: String,
        descriptor: String,
    },

    /// A method exceeded the bytecode or frame-size limits.
    #[error("method {name} exceeds size limits")]
    OversizedMethod { name: String },

    /// An attribute's declared length did not match its content.
    #[error("bad length for attribute {name}")]
    BadAttributeLength { name: String },

    /// An attribute that may appear at most once appeared again.
    #[error("duplicate {name} attribute")]
    DuplicateAttribute { name: &'static str },

    /// A non-native, non-abstract method had no Code attribute, or an
    /// abstract or native method had one.
    #[error("method {name} has a bad Code attribute arrangement")]
    BadCodeArrangement { name: String },

    /// An exception-handler range did not satisfy `start < end <= code_len`.
    #[error("illegal exception handler range [{start_pc}, {end_pc}) in {code_len}-byte method")]
    BadHandlerRange {
        start_pc: u16,
        end_pc: u16,
        code_len: u16,
    },

    /// A StackMap entry was malformed.
    #[error("bad stack map: {reason}")]
    BadStackMap { reason: &'static str },

    /// A NewObject stack-map item referred past the end of the bytecode.
    #[error("stack map NewObject offset {offset} outside {code_len}-byte method")]
    BadNewObjectOffset { offset: u16, code_len: u16 },

    /// A ConstantValue attribute referred to an incompatible pool entry.
    #[error("bad ConstantValue at pool index {index}")]
    BadConstantValue { index: u16 },
}

impl ClassFileError {
    /// Creates a truncation error for a read of `wanted` bytes at `offset`.
    pub fn truncated(wanted: usize, offset: usize) -> Self {
        Self::Truncated { wanted, offset }
    }

    /// Creates a bad-index error describing the `expected` entry kind.
    pub fn bad_index(index: u16, expected: &'static str) -> Self {
        Self::BadConstantIndex { index, expected }
    }

    /// Creates a bad-name error.
    pub fn bad_name<S: Into<String>>(name: S) -> Self {
        Self::BadName { name: name.into() }
    }

    /// Creates a bad-descriptor error.
    pub fn bad_descriptor<S: Into<String>>(descriptor: S) -> Self {
        Self::BadDescriptor {
            descriptor: descriptor.into(),
        }
    }
}

/// Result alias for class-file decoding.
pub type ClassFileResult<T> = Result<T, ClassFileError>;
