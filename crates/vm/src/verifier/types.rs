//! The verifier's abstract type domain.
//!
//! A verification type is either a primitive tag, the null type, a
//! reference to a class-table entry (which covers array classes too), the
//! uninitialised receiver of `<init>`, or the product of a specific `new`
//! instruction identified by its bytecode offset. Two-word values appear as
//! a head tag (`Long`, `Double`) followed by an explicit second-word tag in
//! the slot above.

use crate::class::ClassId;

/// One abstract slot value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VType {
    /// Top: unusable/unknown content.
    Bogus,
    Integer,
    Float,
    Long,
    /// Second word of a `Long`.
    Long2,
    Double,
    /// Second word of a `Double`.
    Double2,
    /// The null constant; assignable to every reference type.
    Null,
    /// The receiver of `<init>` before its own `<init>` call.
    InitObject,
    /// An initialised reference of the given class (instance or array).
    Reference(ClassId),
    /// The result of the `new` at bytecode offset `pc`, not yet
    /// initialised; distinct from every other `new`.
    NewObject { pc: u16 },
}

impl VType {
    /// True for the head tag of a two-word value.
    pub fn is_two_word_head(self) -> bool {
        matches!(self, VType::Long | VType::Double)
    }

    /// True for the second-word tag of a two-word value.
    pub fn is_second_word(self) -> bool {
        matches!(self, VType::Long2 | VType::Double2)
    }

    /// True when the slot holds (or may hold) an object pointer the
    /// collector must trace.
    pub fn is_pointer(self) -> bool {
        matches!(
            self,
            VType::Null | VType::InitObject | VType::Reference(_) | VType::NewObject { .. }
        )
    }

    /// True for any reference-like value, initialised or not.
    pub fn is_reference_kind(self) -> bool {
        self.is_pointer()
    }

    /// True for single-word non-reference values.
    pub fn is_category1_primitive(self) -> bool {
        matches!(self, VType::Integer | VType::Float)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_classification() {
        assert!(VType::Long.is_two_word_head());
        assert!(VType::Double2.is_second_word());
        assert!(!VType::Integer.is_two_word_head());
    }

    #[test]
    fn pointer_classification() {
        assert!(VType::Null.is_pointer());
        assert!(VType::Reference(ClassId(3)).is_pointer());
        assert!(VType::NewObject { pc: 9 }.is_pointer());
        assert!(VType::InitObject.is_pointer());
        assert!(!VType::Bogus.is_pointer());
        assert!(!VType::Long.is_pointer());
    }

    #[test]
    fn new_objects_are_distinct_per_site() {
        assert_ne!(VType::NewObject { pc: 1 }, VType::NewObject { pc: 2 });
        assert_eq!(VType::NewObject { pc: 5 }, VType::NewObject { pc: 5 });
    }
}
