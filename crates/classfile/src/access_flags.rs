//! Access-flag words for classes, fields, and methods.
//!
//! Only the subset recognised by the VM is retained; unknown bits are
//! masked off during loading rather than rejected, matching the lenient
//! treatment of flags added by later compilers.

use bitflags::bitflags;

use crate::error::{ClassFileError, ClassFileResult};

bitflags! {
    /// Class-level access flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClassFlags: u16 {
        const PUBLIC = 0x0001;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
    }
}

bitflags! {
    /// Field access flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FieldFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
    }
}

bitflags! {
    /// Method access flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const NATIVE = 0x0100;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
    }
}

fn at_most_one_visibility(flags: u16) -> bool {
    let vis = flags & 0x0007;
    vis.count_ones() <= 1
}

/// Validates and narrows a raw class access-flag word.
pub fn check_class_flags(raw: u16) -> ClassFileResult<ClassFlags> {
    let flags = ClassFlags::from_bits_truncate(raw);
    if flags.contains(ClassFlags::INTERFACE) {
        // An interface is implicitly abstract and can never be final.
        if flags.contains(ClassFlags::FINAL) || !flags.contains(ClassFlags::ABSTRACT) {
            return Err(ClassFileError::BadAccessFlags { flags: raw, context: "class" });
        }
    } else if flags.contains(ClassFlags::FINAL) && flags.contains(ClassFlags::ABSTRACT) {
        return Err(ClassFileError::BadAccessFlags { flags: raw, context: "class" });
    }
    Ok(flags)
}

/// Validates and narrows a raw field access-flag word.
pub fn check_field_flags(raw: u16, in_interface: bool) -> ClassFileResult<FieldFlags> {
    let flags = FieldFlags::from_bits_truncate(raw);
    let bad = !at_most_one_visibility(raw)
        || flags.contains(FieldFlags::FINAL | FieldFlags::VOLATILE)
        || (in_interface
            && flags & (FieldFlags::PUBLIC | FieldFlags::STATIC | FieldFlags::FINAL)
                != FieldFlags::PUBLIC | FieldFlags::STATIC | FieldFlags::FINAL);
    if bad {
        return Err(ClassFileError::BadAccessFlags { flags: raw, context: "field" });
    }
    Ok(flags)
}

/// Validates and narrows a raw method access-flag word.
pub fn check_method_flags(raw: u16, name: &str) -> ClassFileResult<MethodFlags> {
    let flags = MethodFlags::from_bits_truncate(raw);
    let mut bad = !at_most_one_visibility(raw);
    if flags.contains(MethodFlags::ABSTRACT) {
        bad |= flags.intersects(
            MethodFlags::FINAL
                | MethodFlags::NATIVE
                | MethodFlags::PRIVATE
                | MethodFlags::STATIC
                | MethodFlags::SYNCHRONIZED,
        );
    }
    if name == "<init>" {
        // Instance initialisers may carry visibility and STRICT only.
        bad |= flags.intersects(
            MethodFlags::STATIC
                | MethodFlags::FINAL
                | MethodFlags::SYNCHRONIZED
                | MethodFlags::NATIVE
                | MethodFlags::ABSTRACT,
        );
    }
    if bad {
        return Err(ClassFileError::BadAccessFlags { flags: raw, context: "method" });
    }
    Ok(flags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_must_be_abstract_and_not_final() {
        assert!(check_class_flags(0x0200).is_err());
        assert!(check_class_flags(0x0600).is_ok());
        assert!(check_class_flags(0x0610).is_err());
    }

    #[test]
    fn final_abstract_class_is_rejected() {
        assert!(check_class_flags(0x0410).is_err());
        assert!(check_class_flags(0x0021).is_ok());
    }

    #[test]
    fn field_visibility_is_exclusive() {
        assert!(check_field_flags(0x0003, false).is_err());
        assert!(check_field_flags(0x0050, false).is_err()); // final volatile
        assert!(check_field_flags(0x0019, false).is_ok());
    }

    #[test]
    fn interface_fields_are_constants() {
        assert!(check_field_flags(0x0019, true).is_ok());
        assert!(check_field_flags(0x0009, true).is_err());
    }

    #[test]
    fn abstract_method_constraints() {
        assert!(check_method_flags(0x0401, "run").is_ok());
        assert!(check_method_flags(0x0411, "run").is_err()); // abstract final
        assert!(check_method_flags(0x0501, "run").is_err()); // abstract native
    }

    #[test]
    fn init_cannot_be_static() {
        assert!(check_method_flags(0x0008, "<init>").is_err());
        assert!(check_method_flags(0x0001, "<init>").is_ok());
    }

    #[test]
    fn unknown_bits_are_masked() {
        // ACC_SYNTHETIC (0x1000) is newer than this VM's format; it is
        // ignored rather than rejected.
        let flags = check_method_flags(0x1001, "run").unwrap();
        assert_eq!(flags, MethodFlags::PUBLIC);
    }
}
