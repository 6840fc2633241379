//! Programmatic class-file construction.
//!
//! Tests build class files with this builder instead of checking binary
//! fixtures into the tree. Constants are interned on first use, so the
//! emitted pool contains no duplicates and indexes are stable across calls.

use std::collections::HashMap;

use crate::attributes::{ExceptionHandler, StackMapEntry, StackMapItem};
use crate::class_file::{MAJOR_VERSION_MIN, MAGIC};
use crate::constant_pool::tag;

/// Interned pool entry as the builder stores it. Floats are kept as raw
/// bits so entries can be hashed and compared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PoolConstant {
    Hidden,
    Utf8(String),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(u16),
    String(u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
    InterfaceMethodRef(u16, u16),
    NameAndType(u16, u16),
}

/// Bytecode body handed to [`ClassFileBuilder::add_method`].
#[derive(Debug, Clone, Default)]
pub struct MethodBody {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub handlers: Vec<ExceptionHandler>,
    pub stack_map: Option<Vec<StackMapEntry>>,
}

#[derive(Debug, Clone)]
struct BuiltField {
    access_flags: u16,
    name_index: u16,
    descriptor_index: u16,
    constant_value: Option<u16>,
}

#[derive(Debug, Clone)]
struct BuiltMethod {
    access_flags: u16,
    name_index: u16,
    descriptor_index: u16,
    body: Option<MethodBody>,
}

/// Builds a class file byte stream.
pub struct ClassFileBuilder {
    minor_version: u16,
    major_version: u16,
    constants: Vec<PoolConstant>,
    interned: HashMap<PoolConstant, u16>,
    access_flags: u16,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<BuiltField>,
    methods: Vec<BuiltMethod>,
}

impl ClassFileBuilder {
    /// Creates a builder for a public class named `name`. Passing `None`
    /// for the superclass is only meaningful for the root object class.
    pub fn new(name: &str, super_name: Option<&str>) -> Self {
        let mut b = Self {
            minor_version: 0,
            major_version: MAJOR_VERSION_MIN,
            constants: vec![PoolConstant::Hidden],
            interned: HashMap::new(),
            access_flags: 0x0021, // public super
            this_class: 0,
            super_class: 0,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        };
        b.ensure_attribute_names();
        b.this_class = b.class_const(name);
        if let Some(super_name) = super_name {
            b.super_class = b.class_const(super_name);
        }
        b
    }

    /// Overrides the emitted class-file version.
    pub fn set_version(&mut self, minor: u16, major: u16) -> &mut Self {
        self.minor_version = minor;
        self.major_version = major;
        self
    }

    /// Overrides the class access flags.
    pub fn set_access_flags(&mut self, flags: u16) -> &mut Self {
        self.access_flags = flags;
        self
    }

    /// Declares a direct super-interface.
    pub fn add_interface(&mut self, name: &str) -> &mut Self {
        let index = self.class_const(name);
        self.interfaces.push(index);
        self
    }

    /// Declares a field.
    pub fn add_field(&mut self, access_flags: u16, name: &str, descriptor: &str) -> &mut Self {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.fields.push(BuiltField {
            access_flags,
            name_index,
            descriptor_index,
            constant_value: None,
        });
        self
    }

    /// Declares a static field with a ConstantValue attribute pointing at
    /// the given pool index (use the `*_const` interners to produce it).
    pub fn add_constant_field(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        value_index: u16,
    ) -> &mut Self {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.fields.push(BuiltField {
            access_flags,
            name_index,
            descriptor_index,
            constant_value: Some(value_index),
        });
        self
    }

    /// Declares a bytecode method.
    pub fn add_method(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        body: MethodBody,
    ) -> &mut Self {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.methods.push(BuiltMethod {
            access_flags,
            name_index,
            descriptor_index,
            body: Some(body),
        });
        self
    }

    /// Declares a native or abstract method (no Code attribute).
    pub fn add_body_less_method(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
    ) -> &mut Self {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.methods.push(BuiltMethod {
            access_flags,
            name_index,
            descriptor_index,
            body: None,
        });
        self
    }

    /// Declares a method that illegally lacks both a body and the
    /// native/abstract flags. Used by malformed-input tests.
    pub fn add_code_less_method(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
    ) -> &mut Self {
        self.add_body_less_method(access_flags & !0x0500, name, descriptor)
    }

    fn intern(&mut self, constant: PoolConstant) -> u16 {
        if let Some(&index) = self.interned.get(&constant) {
            return index;
        }
        let index = self.constants.len() as u16;
        let two_slots = matches!(constant, PoolConstant::Long(_) | PoolConstant::Double(_));
        self.constants.push(constant.clone());
        if two_slots {
            self.constants.push(PoolConstant::Hidden);
        }
        self.interned.insert(constant, index);
        index
    }

    /// Interns a Utf8 entry and returns its index.
    pub fn utf8(&mut self, text: &str) -> u16 {
        self.intern(PoolConstant::Utf8(text.to_string()))
    }

    /// Interns a Class entry.
    pub fn class_const(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        self.intern(PoolConstant::Class(name_index))
    }

    /// Interns a String entry.
    pub fn string_const(&mut self, text: &str) -> u16 {
        let text_index = self.utf8(text);
        self.intern(PoolConstant::String(text_index))
    }

    /// Interns an Integer entry.
    pub fn int_const(&mut self, value: i32) -> u16 {
        self.intern(PoolConstant::Integer(value))
    }

    /// Interns a Float entry.
    pub fn float_const(&mut self, value: f32) -> u16 {
        self.intern(PoolConstant::Float(value.to_bits()))
    }

    /// Interns a Long entry (occupies two slots).
    pub fn long_const(&mut self, value: i64) -> u16 {
        self.intern(PoolConstant::Long(value))
    }

    /// Interns a Double entry (occupies two slots).
    pub fn double_const(&mut self, value: f64) -> u16 {
        self.intern(PoolConstant::Double(value.to_bits()))
    }

    /// Interns a NameAndType entry.
    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.intern(PoolConstant::NameAndType(name_index, descriptor_index))
    }

    /// Interns a Fieldref entry.
    pub fn field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class_const(class);
        let nat_index = self.name_and_type(name, descriptor);
        self.intern(PoolConstant::FieldRef(class_index, nat_index))
    }

    /// Interns a Methodref entry.
    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class_const(class);
        let nat_index = self.name_and_type(name, descriptor);
        self.intern(PoolConstant::MethodRef(class_index, nat_index))
    }

    /// Interns an InterfaceMethodref entry.
    pub fn interface_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class_const(class);
        let nat_index = self.name_and_type(name, descriptor);
        self.intern(PoolConstant::InterfaceMethodRef(class_index, nat_index))
    }

    /// Serialises the class file.
    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC.to_be_bytes());
        out.extend_from_slice(&self.minor_version.to_be_bytes());
        out.extend_from_slice(&self.major_version.to_be_bytes());

        out.extend_from_slice(&(self.constants.len() as u16).to_be_bytes());
        for constant in self.constants.iter().skip(1) {
            match constant {
                PoolConstant::Hidden => {}
                PoolConstant::Utf8(text) => {
                    out.push(tag::UTF8);
                    out.extend_from_slice(&(text.len() as u16).to_be_bytes());
                    out.extend_from_slice(text.as_bytes());
                }
                PoolConstant::Integer(v) => {
                    out.push(tag::INTEGER);
                    out.extend_from_slice(&v.to_be_bytes());
                }
                PoolConstant::Float(bits) => {
                    out.push(tag::FLOAT);
                    out.extend_from_slice(&bits.to_be_bytes());
                }
                PoolConstant::Long(v) => {
                    out.push(tag::LONG);
                    out.extend_from_slice(&v.to_be_bytes());
                }
                PoolConstant::Double(bits) => {
                    out.push(tag::DOUBLE);
                    out.extend_from_slice(&bits.to_be_bytes());
                }
                PoolConstant::Class(name_index) => {
                    out.push(tag::CLASS);
                    out.extend_from_slice(&name_index.to_be_bytes());
                }
                PoolConstant::String(text_index) => {
                    out.push(tag::STRING);
                    out.extend_from_slice(&text_index.to_be_bytes());
                }
                PoolConstant::FieldRef(c, nat) => {
                    out.push(tag::FIELDREF);
                    out.extend_from_slice(&c.to_be_bytes());
                    out.extend_from_slice(&nat.to_be_bytes());
                }
                PoolConstant::MethodRef(c, nat) => {
                    out.push(tag::METHODREF);
                    out.extend_from_slice(&c.to_be_bytes());
                    out.extend_from_slice(&nat.to_be_bytes());
                }
                PoolConstant::InterfaceMethodRef(c, nat) => {
                    out.push(tag::INTERFACE_METHODREF);
                    out.extend_from_slice(&c.to_be_bytes());
                    out.extend_from_slice(&nat.to_be_bytes());
                }
                PoolConstant::NameAndType(n, d) => {
                    out.push(tag::NAME_AND_TYPE);
                    out.extend_from_slice(&n.to_be_bytes());
                    out.extend_from_slice(&d.to_be_bytes());
                }
            }
        }

        out.extend_from_slice(&self.access_flags.to_be_bytes());
        out.extend_from_slice(&self.this_class.to_be_bytes());
        out.extend_from_slice(&self.super_class.to_be_bytes());

        out.extend_from_slice(&(self.interfaces.len() as u16).to_be_bytes());
        for index in &self.interfaces {
            out.extend_from_slice(&index.to_be_bytes());
        }

        out.extend_from_slice(&(self.fields.len() as u16).to_be_bytes());
        for field in &self.fields {
            out.extend_from_slice(&field.access_flags.to_be_bytes());
            out.extend_from_slice(&field.name_index.to_be_bytes());
            out.extend_from_slice(&field.descriptor_index.to_be_bytes());
            match field.constant_value {
                Some(value_index) => {
                    out.extend_from_slice(&1u16.to_be_bytes());
                    // "ConstantValue" must already be interned by build time;
                    // rebuild lazily is impossible here, so look it up.
                    let name_index = self.find_utf8("ConstantValue");
                    out.extend_from_slice(&name_index.to_be_bytes());
                    out.extend_from_slice(&2u32.to_be_bytes());
                    out.extend_from_slice(&value_index.to_be_bytes());
                }
                None => out.extend_from_slice(&0u16.to_be_bytes()),
            }
        }

        out.extend_from_slice(&(self.methods.len() as u16).to_be_bytes());
        for method in &self.methods {
            out.extend_from_slice(&method.access_flags.to_be_bytes());
            out.extend_from_slice(&method.name_index.to_be_bytes());
            out.extend_from_slice(&method.descriptor_index.to_be_bytes());
            match &method.body {
                Some(body) => {
                    out.extend_from_slice(&1u16.to_be_bytes());
                    let name_index = self.find_utf8("Code");
                    out.extend_from_slice(&name_index.to_be_bytes());
                    let attr = encode_code_attribute(self, body);
                    out.extend_from_slice(&(attr.len() as u32).to_be_bytes());
                    out.extend_from_slice(&attr);
                }
                None => out.extend_from_slice(&0u16.to_be_bytes()),
            }
        }

        // No class attributes.
        out.extend_from_slice(&0u16.to_be_bytes());
        out
    }

    fn find_utf8(&self, text: &str) -> u16 {
        *self
            .interned
            .get(&PoolConstant::Utf8(text.to_string()))
            .unwrap_or(&0)
    }

    /// Pre-interns the attribute names the serialiser looks up, so `build`
    /// can stay `&self`.
    fn ensure_attribute_names(&mut self) {
        self.utf8("Code");
        self.utf8("ConstantValue");
        self.utf8("StackMap");
    }
}

fn encode_code_attribute(builder: &ClassFileBuilder, body: &MethodBody) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&body.max_stack.to_be_bytes());
    out.extend_from_slice(&body.max_locals.to_be_bytes());
    out.extend_from_slice(&(body.code.len() as u32).to_be_bytes());
    out.extend_from_slice(&body.code);
    out.extend_from_slice(&(body.handlers.len() as u16).to_be_bytes());
    for h in &body.handlers {
        out.extend_from_slice(&h.start_pc.to_be_bytes());
        out.extend_from_slice(&h.end_pc.to_be_bytes());
        out.extend_from_slice(&h.handler_pc.to_be_bytes());
        out.extend_from_slice(&h.catch_type.to_be_bytes());
    }
    match &body.stack_map {
        Some(entries) => {
            out.extend_from_slice(&1u16.to_be_bytes());
            out.extend_from_slice(&builder.find_utf8("StackMap").to_be_bytes());
            let map = encode_stack_map(entries);
            out.extend_from_slice(&(map.len() as u32).to_be_bytes());
            out.extend_from_slice(&map);
        }
        None => out.extend_from_slice(&0u16.to_be_bytes()),
    }
    out
}

fn encode_stack_map(entries: &[StackMapEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(entries.len() as u16).to_be_bytes());
    for entry in entries {
        out.extend_from_slice(&entry.offset.to_be_bytes());
        encode_snapshot(&mut out, &entry.locals);
        encode_snapshot(&mut out, &entry.stack);
    }
    out
}

fn encode_snapshot(out: &mut Vec<u8>, items: &[StackMapItem]) {
    out.extend_from_slice(&(items.len() as u16).to_be_bytes());
    for item in items {
        match item {
            StackMapItem::Bogus => out.push(0),
            StackMapItem::Integer => out.push(1),
            StackMapItem::Float => out.push(2),
            StackMapItem::Double => out.push(3),
            StackMapItem::Long => out.push(4),
            StackMapItem::Null => out.push(5),
            StackMapItem::InitObject => out.push(6),
            StackMapItem::Object(class_index) => {
                out.push(7);
                out.extend_from_slice(&class_index.to_be_bytes());
            }
            StackMapItem::NewObject(offset) => {
                out.push(8);
                out.extend_from_slice(&offset.to_be_bytes());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class_file::ClassFile;

    #[test]
    fn interns_duplicate_constants_once() {
        let mut b = ClassFileBuilder::new("A", Some("java/lang/Object"));
        let first = b.method_ref("A", "run", "()V");
        let second = b.method_ref("A", "run", "()V");
        assert_eq!(first, second);
    }

    #[test]
    fn builds_a_method_with_stack_map() {
        let mut b = ClassFileBuilder::new("A", Some("java/lang/Object"));
        b.add_method(
            0x0009,
            "five",
            "()I",
            MethodBody {
                max_stack: 2,
                max_locals: 0,
                code: vec![0x05, 0x06, 0x60, 0xAC],
                handlers: vec![],
                stack_map: Some(vec![]),
            },
        );
        let cf = ClassFile::parse(&b.build()).unwrap();
        let m = &cf.methods[0];
        assert_eq!(m.name, "five");
        let code = m.code.as_ref().unwrap();
        assert_eq!(code.code, vec![0x05, 0x06, 0x60, 0xAC]);
        assert_eq!(code.stack_map.as_deref(), Some(&[][..]));
    }

    #[test]
    fn constant_value_round_trips() {
        let mut b = ClassFileBuilder::new("A", Some("java/lang/Object"));
        let v = b.int_const(42);
        b.add_constant_field(0x0019, "ANSWER", "I", v);
        let cf = ClassFile::parse(&b.build()).unwrap();
        assert_eq!(cf.fields[0].constant_value, v);
    }
}
