//! The tag-checked constant pool.
//!
//! Parsing is two-pass. The first pass records tags and raw values and is
//! the only place the stream is consumed; the second pass validates every
//! cross-reference: a `Class` entry must name a well-formed class, a
//! `NameAndType` must pair a legal member name with a matching descriptor,
//! and each `*ref` entry must point at the entry kinds its tag requires.

use crate::descriptor::{
    decode_modified_utf8, is_valid_class_name, is_valid_member_name, parse_field_type,
    parse_method_descriptor,
};
use crate::error::{ClassFileError, ClassFileResult};
use crate::reader::ClassReader;

/// Constant-pool entry tags as they appear in the class stream.
pub mod tag {
    pub const UTF8: u8 = 1;
    pub const INTEGER: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const LONG: u8 = 5;
    pub const DOUBLE: u8 = 6;
    pub const CLASS: u8 = 7;
    pub const STRING: u8 = 8;
    pub const FIELDREF: u8 = 9;
    pub const METHODREF: u8 = 10;
    pub const INTERFACE_METHODREF: u8 = 11;
    pub const NAME_AND_TYPE: u8 = 12;
}

/// One decoded constant-pool entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Index 0 and the slot following a Long or Double. Never addressable.
    Unusable,
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class { name_index: u16 },
    String { string_index: u16 },
    FieldRef { class_index: u16, name_and_type_index: u16 },
    MethodRef { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodRef { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
}

impl Constant {
    fn kind(&self) -> &'static str {
        match self {
            Constant::Unusable => "unusable",
            Constant::Utf8(_) => "Utf8",
            Constant::Integer(_) => "Integer",
            Constant::Float(_) => "Float",
            Constant::Long(_) => "Long",
            Constant::Double(_) => "Double",
            Constant::Class { .. } => "Class",
            Constant::String { .. } => "String",
            Constant::FieldRef { .. } => "Fieldref",
            Constant::MethodRef { .. } => "Methodref",
            Constant::InterfaceMethodRef { .. } => "InterfaceMethodref",
            Constant::NameAndType { .. } => "NameAndType",
        }
    }
}

/// The decoded constant pool of one class file.
#[derive(Debug, Clone)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    /// Parses the pool from the stream, including the leading entry count.
    pub fn parse(reader: &mut ClassReader<'_>) -> ClassFileResult<Self> {
        let count = reader.read_u16()?;
        let mut entries = Vec::with_capacity(count as usize);
        entries.push(Constant::Unusable);

        // First pass: raw values.
        let mut index = 1u16;
        while index < count {
            let tag = reader.read_u8()?;
            let entry = match tag {
                tag::UTF8 => {
                    let len = reader.read_u16()? as usize;
                    let bytes = reader.read_bytes(len)?;
                    let text = decode_modified_utf8(bytes)
                        .ok_or(ClassFileError::MalformedUtf8 { index })?;
                    Constant::Utf8(text)
                }
                tag::INTEGER => Constant::Integer(reader.read_u32()? as i32),
                tag::FLOAT => Constant::Float(f32::from_bits(reader.read_u32()?)),
                tag::LONG => {
                    let hi = reader.read_u32()? as u64;
                    let lo = reader.read_u32()? as u64;
                    Constant::Long(((hi << 32) | lo) as i64)
                }
                tag::DOUBLE => {
                    let hi = reader.read_u32()? as u64;
                    let lo = reader.read_u32()? as u64;
                    Constant::Double(f64::from_bits((hi << 32) | lo))
                }
                tag::CLASS => Constant::Class {
                    name_index: reader.read_u16()?,
                },
                tag::STRING => Constant::String {
                    string_index: reader.read_u16()?,
                },
                tag::FIELDREF => Constant::FieldRef {
                    class_index: reader.read_u16()?,
                    name_and_type_index: reader.read_u16()?,
                },
                tag::METHODREF => Constant::MethodRef {
                    class_index: reader.read_u16()?,
                    name_and_type_index: reader.read_u16()?,
                },
                tag::INTERFACE_METHODREF => Constant::InterfaceMethodRef {
                    class_index: reader.read_u16()?,
                    name_and_type_index: reader.read_u16()?,
                },
                tag::NAME_AND_TYPE => Constant::NameAndType {
                    name_index: reader.read_u16()?,
                    descriptor_index: reader.read_u16()?,
                },
                _ => return Err(ClassFileError::BadConstantTag { tag, index }),
            };
            let two_slots = matches!(entry, Constant::Long(_) | Constant::Double(_));
            entries.push(entry);
            index += 1;
            if two_slots {
                // The second slot carries tag 0 and must never be addressed.
                if index >= count {
                    return Err(ClassFileError::BadConstantTag { tag: 0, index });
                }
                entries.push(Constant::Unusable);
                index += 1;
            }
        }

        let pool = Self { entries };
        pool.validate_cross_references()?;
        Ok(pool)
    }

    /// Second pass: every indexed cross-reference must have the tag its
    /// containing entry requires, and names/descriptors must be well-formed.
    fn validate_cross_references(&self) -> ClassFileResult<()> {
        for entry in &self.entries {
            match *entry {
                Constant::Class { name_index } => {
                    let name = self.utf8(name_index)?;
                    if !is_valid_class_name(name) {
                        return Err(ClassFileError::bad_name(name));
                    }
                }
                Constant::String { string_index } => {
                    self.utf8(string_index)?;
                }
                Constant::NameAndType { name_index, descriptor_index } => {
                    let name = self.utf8(name_index)?;
                    let descriptor = self.utf8(descriptor_index)?;
                    if descriptor.starts_with('(') {
                        if !is_valid_member_name(name, true) {
                            return Err(ClassFileError::bad_name(name));
                        }
                        parse_method_descriptor(descriptor)?;
                    } else {
                        if !is_valid_member_name(name, false) {
                            return Err(ClassFileError::bad_name(name));
                        }
                        parse_field_type(descriptor)?;
                    }
                }
                Constant::FieldRef { class_index, name_and_type_index } => {
                    self.class_entry(class_index)?;
                    let (_, descriptor) = self.name_and_type(name_and_type_index)?;
                    if descriptor.starts_with('(') {
                        return Err(ClassFileError::bad_descriptor(descriptor));
                    }
                }
                Constant::MethodRef { class_index, name_and_type_index }
                | Constant::InterfaceMethodRef { class_index, name_and_type_index } => {
                    self.class_entry(class_index)?;
                    let (_, descriptor) = self.name_and_type(name_and_type_index)?;
                    if !descriptor.starts_with('(') {
                        return Err(ClassFileError::bad_descriptor(descriptor));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Number of slots, counting the unusable index 0.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the pool holds no addressable entries.
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Returns the entry at `index`, failing on 0, out-of-range, or the
    /// hidden second slot of a Long/Double.
    pub fn get(&self, index: u16) -> ClassFileResult<&Constant> {
        match self.entries.get(index as usize) {
            Some(Constant::Unusable) | None => Err(ClassFileError::bad_index(index, "usable")),
            Some(entry) => Ok(entry),
        }
    }

    /// Returns the text of the Utf8 entry at `index`.
    pub fn utf8(&self, index: u16) -> ClassFileResult<&str> {
        match self.get(index)? {
            Constant::Utf8(text) => Ok(text),
            _ => Err(ClassFileError::bad_index(index, "Utf8")),
        }
    }

    /// Returns the class name referenced by the Class entry at `index`.
    pub fn class_entry(&self, index: u16) -> ClassFileResult<&str> {
        match self.get(index)? {
            Constant::Class { name_index } => self.utf8(*name_index),
            _ => Err(ClassFileError::bad_index(index, "Class")),
        }
    }

    /// Returns `(name, descriptor)` for the NameAndType entry at `index`.
    pub fn name_and_type(&self, index: u16) -> ClassFileResult<(&str, &str)> {
        match self.get(index)? {
            Constant::NameAndType { name_index, descriptor_index } => {
                Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?))
            }
            _ => Err(ClassFileError::bad_index(index, "NameAndType")),
        }
    }

    /// Iterates over `(index, entry)` pairs, skipping unusable slots.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !matches!(e, Constant::Unusable))
            .map(|(i, e)| (i as u16, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_bytes(entries: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(entries.len() as u16 + 1).to_be_bytes());
        for e in entries {
            out.extend_from_slice(e);
        }
        out
    }

    fn utf8_entry(s: &str) -> Vec<u8> {
        let mut v = vec![tag::UTF8];
        v.extend_from_slice(&(s.len() as u16).to_be_bytes());
        v.extend_from_slice(s.as_bytes());
        v
    }

    #[test]
    fn parses_class_and_utf8() {
        let u = utf8_entry("java/lang/Object");
        let c = vec![tag::CLASS, 0x00, 0x01];
        let bytes = pool_bytes(&[&u, &c]);
        let mut r = ClassReader::new(&bytes);
        let pool = ConstantPool::parse(&mut r).unwrap();
        assert_eq!(pool.class_entry(2).unwrap(), "java/lang/Object");
    }

    #[test]
    fn long_occupies_two_slots() {
        let mut long = vec![tag::LONG];
        long.extend_from_slice(&0x0102_0304_0506_0708i64.to_be_bytes());
        let u = utf8_entry("x");
        // Count = 4: long at 1 (slot 2 hidden), utf8 at 3.
        let mut bytes = vec![0x00, 0x04];
        bytes.extend_from_slice(&long);
        bytes.extend_from_slice(&u);
        let mut r = ClassReader::new(&bytes);
        let pool = ConstantPool::parse(&mut r).unwrap();
        assert!(matches!(pool.get(1), Ok(Constant::Long(0x0102_0304_0506_0708))));
        assert!(pool.get(2).is_err());
        assert_eq!(pool.utf8(3).unwrap(), "x");
    }

    #[test]
    fn rejects_unknown_tag() {
        let bytes = pool_bytes(&[&[13, 0, 0][..]]);
        let mut r = ClassReader::new(&bytes);
        assert!(matches!(
            ConstantPool::parse(&mut r),
            Err(ClassFileError::BadConstantTag { tag: 13, index: 1 })
        ));
    }

    #[test]
    fn fieldref_must_point_at_class_and_field_descriptor() {
        let u_name = utf8_entry("x");
        let u_desc = utf8_entry("()V");
        let nat = vec![tag::NAME_AND_TYPE, 0x00, 0x01, 0x00, 0x02];
        let cls_name = utf8_entry("A");
        let cls = vec![tag::CLASS, 0x00, 0x04];
        let fref = vec![tag::FIELDREF, 0x00, 0x05, 0x00, 0x03];
        let bytes = pool_bytes(&[&u_name, &u_desc, &nat, &cls_name, &cls, &fref]);
        let mut r = ClassReader::new(&bytes);
        // A Fieldref whose descriptor is a method descriptor is rejected.
        assert!(ConstantPool::parse(&mut r).is_err());
    }

    #[test]
    fn rejects_malformed_utf8_entry() {
        let mut bad = vec![tag::UTF8, 0x00, 0x01, 0x00];
        bad[3] = 0x00; // raw NUL byte
        let bytes = pool_bytes(&[&bad]);
        let mut r = ClassReader::new(&bytes);
        assert!(matches!(
            ConstantPool::parse(&mut r),
            Err(ClassFileError::MalformedUtf8 { index: 1 })
        ));
    }
}
