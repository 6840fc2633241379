//! Top-level class-file decoding.
//!
//! Parsing is strictly sequential: magic, version, constant pool, flags,
//! this/super class, interfaces, fields, methods, trailing attributes, and
//! finally an end-of-stream check. The decoded [`ClassFile`] is a faithful
//! structural image; linking it into the runtime class table is the VM's
//! job, not this crate's.

use crate::access_flags::{
    check_class_flags, check_field_flags, check_method_flags, ClassFlags, FieldFlags, MethodFlags,
};
use crate::attributes::{
    parse_constant_value, parse_exceptions_attribute, CodeAttribute,
};
use crate::constant_pool::ConstantPool;
use crate::descriptor::{
    is_valid_member_name, parse_field_type, parse_method_descriptor, FieldType, MethodDescriptor,
};
use crate::error::{ClassFileError, ClassFileResult};
use crate::reader::ClassReader;

/// The class-file magic number.
pub const MAGIC: u32 = 0xCAFE_BABE;
/// Lowest supported major version (JDK 1.1 output).
pub const MAJOR_VERSION_MIN: u16 = 45;
/// Highest supported major version.
pub const MAJOR_VERSION_MAX: u16 = 48;

/// One decoded field declaration.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub access_flags: FieldFlags,
    pub name: String,
    pub descriptor: String,
    pub field_type: FieldType,
    /// Constant-pool index of the initialiser for static fields; 0 means none.
    pub constant_value: u16,
}

/// One decoded method declaration.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub access_flags: MethodFlags,
    pub name: String,
    pub descriptor: String,
    pub signature: MethodDescriptor,
    pub code: Option<CodeAttribute>,
    /// Constant-pool Class indexes of declared checked exceptions.
    pub exceptions: Vec<u16>,
}

/// A structurally validated class file.
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: ClassFlags,
    /// Constant-pool index of this class's Class entry.
    pub this_class: u16,
    /// Constant-pool index of the superclass entry; 0 only for the root class.
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
}

impl ClassFile {
    /// Decodes a complete class file from `bytes`.
    pub fn parse(bytes: &[u8]) -> ClassFileResult<Self> {
        let mut reader = ClassReader::new(bytes);

        let magic = reader.read_u32()?;
        if magic != MAGIC {
            return Err(ClassFileError::BadMagic { found: magic });
        }
        let minor_version = reader.read_u16()?;
        let major_version = reader.read_u16()?;
        if !(MAJOR_VERSION_MIN..=MAJOR_VERSION_MAX).contains(&major_version) {
            return Err(ClassFileError::UnsupportedVersion {
                major: major_version,
                minor: minor_version,
            });
        }

        let constant_pool = ConstantPool::parse(&mut reader)?;

        let raw_flags = reader.read_u16()?;
        let access_flags = check_class_flags(raw_flags)?;

        let this_class = reader.read_u16()?;
        let this_name = constant_pool.class_entry(this_class)?.to_string();
        let super_class = reader.read_u16()?;
        if super_class == 0 {
            if this_name != "java/lang/Object" {
                return Err(ClassFileError::bad_index(0, "Class"));
            }
        } else {
            constant_pool.class_entry(super_class)?;
        }

        let interface_count = reader.read_u16()?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            let index = reader.read_u16()?;
            constant_pool.class_entry(index)?;
            interfaces.push(index);
        }

        let in_interface = access_flags.contains(ClassFlags::INTERFACE);
        let fields = parse_fields(&mut reader, &constant_pool, in_interface)?;
        let methods = parse_methods(&mut reader, &constant_pool, in_interface)?;

        // Trailing class attributes are skipped, lengths validated.
        let attr_count = reader.read_u16()?;
        for _ in 0..attr_count {
            let name_index = reader.read_u16()?;
            constant_pool.utf8(name_index)?;
            let length = reader.read_u32()? as usize;
            reader.skip(length)?;
        }

        reader.expect_end()?;

        log::trace!(
            "parsed class {} ({} fields, {} methods)",
            this_name,
            fields.len(),
            methods.len()
        );

        Ok(Self {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
        })
    }

    /// Fully qualified name of the decoded class.
    pub fn name(&self) -> &str {
        self.constant_pool.class_entry(self.this_class).unwrap_or("")
    }

    /// Name of the superclass, or `None` for the root class.
    pub fn super_name(&self) -> Option<&str> {
        if self.super_class == 0 {
            None
        } else {
            self.constant_pool.class_entry(self.super_class).ok()
        }
    }
}

fn parse_fields(
    reader: &mut ClassReader<'_>,
    pool: &ConstantPool,
    in_interface: bool,
) -> ClassFileResult<Vec<FieldInfo>> {
    let count = reader.read_u16()?;
    let mut fields: Vec<FieldInfo> = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let raw_flags = reader.read_u16()?;
        let access_flags = check_field_flags(raw_flags, in_interface)?;
        let name = pool.utf8(reader.read_u16()?)?.to_string();
        if !is_valid_member_name(&name, false) {
            return Err(ClassFileError::bad_name(name));
        }
        let descriptor = pool.utf8(reader.read_u16()?)?.to_string();
        let field_type = parse_field_type(&descriptor)?;

        if fields
            .iter()
            .any(|f| f.name == name && f.descriptor == descriptor)
        {
            return Err(ClassFileError::DuplicateMember {
                kind: "field",
                name,
                descriptor,
            });
        }

        let mut constant_value = 0u16;
        let attr_count = reader.read_u16()?;
        for _ in 0..attr_count {
            let attr_name_index = reader.read_u16()?;
            let attr_name = pool.utf8(attr_name_index)?;
            let length = reader.read_u32()? as usize;
            if attr_name == "ConstantValue" && access_flags.contains(FieldFlags::STATIC) {
                if length != 2 {
                    return Err(ClassFileError::BadAttributeLength {
                        name: attr_name.to_string(),
                    });
                }
                if constant_value != 0 {
                    return Err(ClassFileError::DuplicateAttribute {
                        name: "ConstantValue",
                    });
                }
                constant_value = parse_constant_value(reader, pool, &descriptor)?;
            } else {
                reader.skip(length)?;
            }
        }

        fields.push(FieldInfo {
            access_flags,
            name,
            descriptor,
            field_type,
            constant_value,
        });
    }
    Ok(fields)
}

fn parse_methods(
    reader: &mut ClassReader<'_>,
    pool: &ConstantPool,
    in_interface: bool,
) -> ClassFileResult<Vec<MethodInfo>> {
    let count = reader.read_u16()?;
    let mut methods: Vec<MethodInfo> = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let raw_flags = reader.read_u16()?;
        let name = pool.utf8(reader.read_u16()?)?.to_string();
        if !is_valid_member_name(&name, true) {
            return Err(ClassFileError::bad_name(name));
        }
        let access_flags = check_method_flags(raw_flags, &name)?;
        if in_interface && name != "<clinit>" && !access_flags.contains(MethodFlags::ABSTRACT) {
            return Err(ClassFileError::BadAccessFlags {
                flags: raw_flags,
                context: "interface method",
            });
        }
        let descriptor = pool.utf8(reader.read_u16()?)?.to_string();
        let signature = parse_method_descriptor(&descriptor)?;

        if methods
            .iter()
            .any(|m| m.name == name && m.descriptor == descriptor)
        {
            return Err(ClassFileError::DuplicateMember {
                kind: "method",
                name,
                descriptor,
            });
        }

        let mut code = None;
        let mut exceptions = Vec::new();
        let attr_count = reader.read_u16()?;
        for _ in 0..attr_count {
            let attr_name_index = reader.read_u16()?;
            let attr_name = pool.utf8(attr_name_index)?;
            let length = reader.read_u32()? as usize;
            match attr_name {
                "Code" => {
                    if code.is_some() {
                        return Err(ClassFileError::DuplicateAttribute { name: "Code" });
                    }
                    let before = reader.position();
                    code = Some(CodeAttribute::parse(reader, pool, &name)?);
                    if reader.position() - before != length {
                        return Err(ClassFileError::BadAttributeLength {
                            name: "Code".to_string(),
                        });
                    }
                }
                "Exceptions" => {
                    let before = reader.position();
                    exceptions = parse_exceptions_attribute(reader, pool)?;
                    if reader.position() - before != length {
                        return Err(ClassFileError::BadAttributeLength {
                            name: "Exceptions".to_string(),
                        });
                    }
                }
                _ => reader.skip(length)?,
            }
        }

        let body_less =
            access_flags.intersects(MethodFlags::NATIVE | MethodFlags::ABSTRACT);
        if body_less == code.is_some() {
            return Err(ClassFileError::BadCodeArrangement { name });
        }

        methods.push(MethodInfo {
            access_flags,
            name,
            descriptor,
            signature,
            code,
            exceptions,
        });
    }
    Ok(methods)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ClassFileBuilder;

    #[test]
    fn round_trips_a_builder_class() {
        let mut b = ClassFileBuilder::new("demo/Point", Some("java/lang/Object"));
        b.add_field(0x0002, "x", "I");
        b.add_field(0x0002, "y", "I");
        let bytes = b.build();
        let cf = ClassFile::parse(&bytes).unwrap();
        assert_eq!(cf.name(), "demo/Point");
        assert_eq!(cf.super_name(), Some("java/lang/Object"));
        assert_eq!(cf.fields.len(), 2);
        assert_eq!(cf.fields[0].name, "x");
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = [0u8; 16];
        assert!(matches!(
            ClassFile::parse(&bytes),
            Err(ClassFileError::BadMagic { found: 0 })
        ));
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut b = ClassFileBuilder::new("A", Some("java/lang/Object"));
        b.set_version(0, 52);
        let bytes = b.build();
        assert!(matches!(
            ClassFile::parse(&bytes),
            Err(ClassFileError::UnsupportedVersion { major: 52, .. })
        ));
    }

    #[test]
    fn only_root_class_may_omit_superclass() {
        let mut b = ClassFileBuilder::new("demo/NoSuper", None);
        b.add_field(0x0001, "x", "I");
        let bytes = b.build();
        assert!(ClassFile::parse(&bytes).is_err());

        let b = ClassFileBuilder::new("java/lang/Object", None);
        let cf = ClassFile::parse(&b.build()).unwrap();
        assert!(cf.super_name().is_none());
    }

    #[test]
    fn rejects_duplicate_fields() {
        let mut b = ClassFileBuilder::new("A", Some("java/lang/Object"));
        b.add_field(0x0001, "x", "I");
        b.add_field(0x0002, "x", "I");
        assert!(matches!(
            ClassFile::parse(&b.build()),
            Err(ClassFileError::DuplicateMember { kind: "field", .. })
        ));
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let b = ClassFileBuilder::new("A", Some("java/lang/Object"));
        let mut bytes = b.build();
        bytes.push(0x00);
        assert!(matches!(
            ClassFile::parse(&bytes),
            Err(ClassFileError::TrailingBytes { remaining: 1 })
        ));
    }

    #[test]
    fn plain_method_requires_code() {
        let mut b = ClassFileBuilder::new("A", Some("java/lang/Object"));
        b.add_code_less_method(0x0001, "broken", "()V");
        assert!(matches!(
            ClassFile::parse(&b.build()),
            Err(ClassFileError::BadCodeArrangement { .. })
        ));
    }
}
