//! Runtime field records.
//!
//! A field is immutable once its owning class is linked: linking assigns
//! the cell offset (into the instance payload for instance fields, into the
//! class's static block for statics) and never changes it afterwards.

use mjvm_classfile::{BaseType, FieldFlags, FieldType};

use crate::class::ClassId;
use crate::intern::NameKey;

/// Identity of one field: its declaring class plus the field-table index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldId {
    pub class: ClassId,
    pub index: u16,
}

/// Storage shape of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// One non-pointer cell (int, float, short, char, byte, boolean).
    Word,
    /// One reference cell. Pointer statics are laid out before word
    /// statics so the collector sees a contiguous root range.
    Pointer,
    /// Two adjacent cells (long, double).
    TwoWord,
}

impl FieldKind {
    /// Derives the storage shape from a parsed field signature.
    pub fn of(field_type: &FieldType) -> Self {
        if field_type.is_reference() {
            FieldKind::Pointer
        } else if matches!(field_type.base, BaseType::Long | BaseType::Double) {
            FieldKind::TwoWord
        } else {
            FieldKind::Word
        }
    }

    /// Width in cells.
    pub fn cells(self) -> u16 {
        match self {
            FieldKind::TwoWord => 2,
            _ => 1,
        }
    }
}

/// One runtime field.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: NameKey,
    pub descriptor: NameKey,
    pub flags: FieldFlags,
    pub kind: FieldKind,
    /// Cell offset assigned during linking. For instance fields this is
    /// relative to the start of the instance payload (superclass fields
    /// first); for statics, into the class's static block.
    pub offset: u16,
    /// Constant-pool index of the ConstantValue initialiser; 0 means none.
    pub constant_value: u16,
}

impl Field {
    /// True for static fields.
    pub fn is_static(&self) -> bool {
        self.flags.contains(FieldFlags::STATIC)
    }

    /// Width in cells.
    pub fn cells(&self) -> u16 {
        self.kind.cells()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mjvm_classfile::descriptor::parse_field_type;

    #[test]
    fn kind_derivation() {
        assert_eq!(FieldKind::of(&parse_field_type("I").unwrap()), FieldKind::Word);
        assert_eq!(FieldKind::of(&parse_field_type("J").unwrap()), FieldKind::TwoWord);
        assert_eq!(FieldKind::of(&parse_field_type("D").unwrap()), FieldKind::TwoWord);
        assert_eq!(
            FieldKind::of(&parse_field_type("Ljava/lang/String;").unwrap()),
            FieldKind::Pointer
        );
        assert_eq!(FieldKind::of(&parse_field_type("[J").unwrap()), FieldKind::Pointer);
    }

    #[test]
    fn widths() {
        assert_eq!(FieldKind::Word.cells(), 1);
        assert_eq!(FieldKind::Pointer.cells(), 1);
        assert_eq!(FieldKind::TwoWord.cells(), 2);
    }
}
