//! Runtime classes: instance classes and array classes.
//!
//! Classes are referred to by stable [`ClassId`] indices into the class
//! table; back-pointers from fields, methods, and constant-pool entries are
//! indices, never owning references, because class ↔ superclass ↔ pool
//! forms a cyclic graph.

use mjvm_classfile::ClassFlags;

use crate::cell::Cell;
use crate::constant_pool::RuntimePool;
use crate::field::Field;
use crate::intern::NameKey;
use crate::method::{Method, MethodId};
use crate::object::ObjRef;
use crate::thread::ThreadId;

/// Stable index of a class in the class table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub u16);

/// The loading ladder. Monotonic except for the single rollback to `Raw`
/// on a transient load failure, and the terminal drop to `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClassStatus {
    Raw,
    Loading,
    Loaded,
    Linked,
    Verified,
    Ready,
    Error,
}

/// Element type of a one-dimension-down array component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayElement {
    Primitive(PrimitiveType),
    /// Component class: for `[[I` this is the class of `[I`.
    Class(ClassId),
}

/// Primitive array element types, with their `newarray` type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveType {
    Boolean,
    Char,
    Float,
    Double,
    Byte,
    Short,
    Int,
    Long,
}

impl PrimitiveType {
    /// Decodes the `newarray` operand byte.
    pub fn from_newarray_code(code: u8) -> Option<Self> {
        match code {
            4 => Some(PrimitiveType::Boolean),
            5 => Some(PrimitiveType::Char),
            6 => Some(PrimitiveType::Float),
            7 => Some(PrimitiveType::Double),
            8 => Some(PrimitiveType::Byte),
            9 => Some(PrimitiveType::Short),
            10 => Some(PrimitiveType::Int),
            11 => Some(PrimitiveType::Long),
            _ => None,
        }
    }

    /// Signature character of this primitive.
    pub fn signature_char(self) -> char {
        match self {
            PrimitiveType::Boolean => 'Z',
            PrimitiveType::Char => 'C',
            PrimitiveType::Float => 'F',
            PrimitiveType::Double => 'D',
            PrimitiveType::Byte => 'B',
            PrimitiveType::Short => 'S',
            PrimitiveType::Int => 'I',
            PrimitiveType::Long => 'J',
        }
    }

    /// Cells per element in an array payload.
    pub fn element_cells(self) -> usize {
        match self {
            PrimitiveType::Long | PrimitiveType::Double => 2,
            _ => 1,
        }
    }
}

/// A loaded (or loading) instance class.
#[derive(Debug)]
pub struct InstanceClass {
    pub name: NameKey,
    pub package: NameKey,
    pub flags: ClassFlags,
    pub super_class: Option<ClassId>,
    pub interfaces: Vec<ClassId>,
    pub pool: RuntimePool,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    /// Instance payload size in cells, including superclass fields.
    pub instance_cells: u16,
    /// The static-field block. Pointer statics occupy the leading
    /// `static_pointer_cells` cells so the collector sees one root range.
    pub statics: Vec<Cell>,
    pub static_pointer_cells: u16,
    pub status: ClassStatus,
    /// Thread currently running `<clinit>`, if any. A class whose
    /// initialisation is running on the current thread is treated as ready.
    pub init_thread: Option<ThreadId>,
    /// Lazily allocated class object; lock target of static synchronised
    /// methods.
    pub class_object: Option<ObjRef>,
    /// The `finalize()V` method the class declares or inherits, if any.
    pub finalizer: Option<MethodId>,
}

impl InstanceClass {
    /// True for interfaces.
    pub fn is_interface(&self) -> bool {
        self.flags.contains(ClassFlags::INTERFACE)
    }

    /// Finds a declared method by name and descriptor keys.
    pub fn find_method(&self, name: NameKey, descriptor: NameKey) -> Option<u16> {
        self.methods
            .iter()
            .position(|m| m.name == name && m.descriptor == descriptor)
            .map(|i| i as u16)
    }

    /// Finds a declared field by name and descriptor keys.
    pub fn find_field(&self, name: NameKey, descriptor: NameKey) -> Option<u16> {
        self.fields
            .iter()
            .position(|f| f.name == name && f.descriptor == descriptor)
            .map(|i| i as u16)
    }
}

/// An array class, created on first reference rather than loaded.
#[derive(Debug)]
pub struct ArrayClass {
    /// Interned signature-form name, e.g. `[I` or `[Ljava/lang/String;`.
    pub name: NameKey,
    pub flags: ClassFlags,
    /// Total array depth of this type.
    pub dimensions: u8,
    pub element: ArrayElement,
}

/// A class-table entry.
#[derive(Debug)]
pub enum Class {
    Instance(InstanceClass),
    Array(ArrayClass),
}

impl Class {
    /// Interned name of the class.
    pub fn name(&self) -> NameKey {
        match self {
            Class::Instance(c) => c.name,
            Class::Array(c) => c.name,
        }
    }

    /// Loading status. Array classes are born ready.
    pub fn status(&self) -> ClassStatus {
        match self {
            Class::Instance(c) => c.status,
            Class::Array(_) => ClassStatus::Ready,
        }
    }

    /// True for interfaces.
    pub fn is_interface(&self) -> bool {
        matches!(self, Class::Instance(c) if c.is_interface())
    }

    /// True for array classes.
    pub fn is_array(&self) -> bool {
        matches!(self, Class::Array(_))
    }

    /// Downcast to an instance class.
    pub fn as_instance(&self) -> Option<&InstanceClass> {
        match self {
            Class::Instance(c) => Some(c),
            Class::Array(_) => None,
        }
    }

    /// Downcast to a mutable instance class.
    pub fn as_instance_mut(&mut self) -> Option<&mut InstanceClass> {
        match self {
            Class::Instance(c) => Some(c),
            Class::Array(_) => None,
        }
    }

    /// Downcast to an array class.
    pub fn as_array(&self) -> Option<&ArrayClass> {
        match self {
            Class::Array(c) => Some(c),
            Class::Instance(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ladder_is_ordered() {
        assert!(ClassStatus::Raw < ClassStatus::Loading);
        assert!(ClassStatus::Loading < ClassStatus::Loaded);
        assert!(ClassStatus::Loaded < ClassStatus::Linked);
        assert!(ClassStatus::Linked < ClassStatus::Verified);
        assert!(ClassStatus::Verified < ClassStatus::Ready);
    }

    #[test]
    fn newarray_codes() {
        assert_eq!(PrimitiveType::from_newarray_code(10), Some(PrimitiveType::Int));
        assert_eq!(PrimitiveType::from_newarray_code(11), Some(PrimitiveType::Long));
        assert_eq!(PrimitiveType::from_newarray_code(3), None);
        assert_eq!(PrimitiveType::from_newarray_code(12), None);
    }

    #[test]
    fn long_and_double_elements_take_two_cells() {
        assert_eq!(PrimitiveType::Long.element_cells(), 2);
        assert_eq!(PrimitiveType::Double.element_cells(), 2);
        assert_eq!(PrimitiveType::Int.element_cells(), 1);
    }
}
