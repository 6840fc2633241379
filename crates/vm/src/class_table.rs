//! The class table: stable-index storage for every known class.
//!
//! A class enters the table in RAW state the first time its name is
//! referenced and is never removed until VM shutdown; every other component
//! refers to it by [`ClassId`]. Array classes are manufactured here on
//! first reference rather than loaded from bytes.

use hashbrown::HashMap;
use mjvm_classfile::ClassFlags;

use crate::class::{ArrayClass, ArrayElement, Class, ClassId, InstanceClass};
use crate::error::{VmError, VmResult};
use crate::intern::NameKey;

/// The table of all classes, instance and array alike.
#[derive(Debug, Default)]
pub struct ClassTable {
    classes: Vec<Class>,
    by_name: HashMap<NameKey, ClassId>,
}

impl ClassTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// True when no class has been registered.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Registers a class under its name. Fatal if the name is taken: the
    /// caller is expected to have consulted [`ClassTable::lookup`] first.
    pub fn insert(&mut self, class: Class) -> VmResult<ClassId> {
        let name = class.name();
        if self.by_name.contains_key(&name) {
            return Err(VmError::internal("class registered twice"));
        }
        let id = ClassId(self.classes.len() as u16);
        self.by_name.insert(name, id);
        self.classes.push(class);
        Ok(id)
    }

    /// Finds a class by interned name.
    pub fn lookup(&self, name: NameKey) -> Option<ClassId> {
        self.by_name.get(&name).copied()
    }

    /// Immutable access by id.
    pub fn class(&self, id: ClassId) -> &Class {
        &self.classes[id.0 as usize]
    }

    /// Mutable access by id.
    pub fn class_mut(&mut self, id: ClassId) -> &mut Class {
        &mut self.classes[id.0 as usize]
    }

    /// Immutable instance-class access; fatal for array classes.
    pub fn instance(&self, id: ClassId) -> VmResult<&InstanceClass> {
        self.class(id)
            .as_instance()
            .ok_or_else(|| VmError::internal("array class where instance class expected"))
    }

    /// Mutable instance-class access; fatal for array classes.
    pub fn instance_mut(&mut self, id: ClassId) -> VmResult<&mut InstanceClass> {
        self.class_mut(id)
            .as_instance_mut()
            .ok_or_else(|| VmError::internal("array class where instance class expected"))
    }

    /// Array-class access; fatal for instance classes.
    pub fn array(&self, id: ClassId) -> VmResult<&ArrayClass> {
        self.class(id)
            .as_array()
            .ok_or_else(|| VmError::internal("instance class where array class expected"))
    }

    /// Registers (or finds) the array class with the given component.
    /// `name` must already be the interned signature-form name.
    pub fn intern_array_class(
        &mut self,
        name: NameKey,
        dimensions: u8,
        element: ArrayElement,
    ) -> VmResult<ClassId> {
        if let Some(id) = self.lookup(name) {
            return Ok(id);
        }
        self.insert(Class::Array(ArrayClass {
            name,
            // Arrays are public final and never interfaces.
            flags: ClassFlags::PUBLIC | ClassFlags::FINAL,
            dimensions,
            element,
        }))
    }

    /// Iterates `(id, class)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (ClassId, &Class)> {
        self.classes
            .iter()
            .enumerate()
            .map(|(i, c)| (ClassId(i as u16), c))
    }

    /// Runtime assignability: is a value of class `from` usable where a
    /// value of class `to` is expected? `object` is the root object class.
    ///
    /// Arrays are covariant in their reference component; primitive-array
    /// components must match exactly. Interfaces are reached through the
    /// transitive super-interface closure.
    pub fn is_assignable(&self, from: ClassId, to: ClassId, object: ClassId) -> bool {
        if from == to || to == object {
            return true;
        }
        match (self.class(from), self.class(to)) {
            (Class::Array(a), Class::Array(b)) => match (a.element, b.element) {
                (ArrayElement::Primitive(x), ArrayElement::Primitive(y)) => x == y,
                (ArrayElement::Class(x), ArrayElement::Class(y)) => {
                    self.is_assignable(x, y, object)
                }
                _ => false,
            },
            (Class::Array(_), Class::Instance(_)) => false,
            (Class::Instance(_), _) => self.instance_extends(from, to),
        }
    }

    fn instance_extends(&self, from: ClassId, to: ClassId) -> bool {
        // Walk the superclass chain; at each step fan out into the
        // transitive super-interface closure when the target is one.
        let target_is_interface = self.class(to).is_interface();
        let mut current = Some(from);
        while let Some(id) = current {
            if id == to {
                return true;
            }
            let Some(class) = self.class(id).as_instance() else {
                return false;
            };
            if target_is_interface && self.interface_closure_contains(class, to) {
                return true;
            }
            current = class.super_class;
        }
        false
    }

    fn interface_closure_contains(&self, class: &InstanceClass, target: ClassId) -> bool {
        let mut stack: Vec<ClassId> = class.interfaces.clone();
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if let Some(iface) = self.class(id).as_instance() {
                stack.extend_from_slice(&iface.interfaces);
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{ClassStatus, PrimitiveType};
    use crate::constant_pool::RuntimePool;
    use crate::intern::InternTable;

    fn bare_class(
        name: NameKey,
        super_class: Option<ClassId>,
        interfaces: Vec<ClassId>,
        flags: ClassFlags,
    ) -> Class {
        Class::Instance(InstanceClass {
            name,
            package: name,
            flags,
            super_class,
            interfaces,
            pool: RuntimePool::default(),
            fields: Vec::new(),
            methods: Vec::new(),
            instance_cells: 0,
            statics: Vec::new(),
            static_pointer_cells: 0,
            status: ClassStatus::Linked,
            init_thread: None,
            class_object: None,
            finalizer: None,
        })
    }

    #[test]
    fn subclass_is_assignable_to_superclass() {
        let mut names = InternTable::new();
        let mut table = ClassTable::new();
        let object = table
            .insert(bare_class(names.intern("java/lang/Object"), None, vec![], ClassFlags::PUBLIC))
            .unwrap();
        let a = table
            .insert(bare_class(names.intern("A"), Some(object), vec![], ClassFlags::PUBLIC))
            .unwrap();
        let b = table
            .insert(bare_class(names.intern("B"), Some(a), vec![], ClassFlags::PUBLIC))
            .unwrap();

        assert!(table.is_assignable(b, a, object));
        assert!(table.is_assignable(b, object, object));
        assert!(!table.is_assignable(a, b, object));
    }

    #[test]
    fn interfaces_are_reached_transitively() {
        let mut names = InternTable::new();
        let mut table = ClassTable::new();
        let object = table
            .insert(bare_class(names.intern("java/lang/Object"), None, vec![], ClassFlags::PUBLIC))
            .unwrap();
        let iface_flags = ClassFlags::PUBLIC | ClassFlags::INTERFACE | ClassFlags::ABSTRACT;
        let upper = table
            .insert(bare_class(names.intern("Upper"), Some(object), vec![], iface_flags))
            .unwrap();
        let lower = table
            .insert(bare_class(names.intern("Lower"), Some(object), vec![upper], iface_flags))
            .unwrap();
        let impl_class = table
            .insert(bare_class(names.intern("Impl"), Some(object), vec![lower], ClassFlags::PUBLIC))
            .unwrap();

        assert!(table.is_assignable(impl_class, lower, object));
        assert!(table.is_assignable(impl_class, upper, object));
        assert!(!table.is_assignable(object, upper, object));
    }

    #[test]
    fn array_covariance() {
        let mut names = InternTable::new();
        let mut table = ClassTable::new();
        let object = table
            .insert(bare_class(names.intern("java/lang/Object"), None, vec![], ClassFlags::PUBLIC))
            .unwrap();
        let a = table
            .insert(bare_class(names.intern("A"), Some(object), vec![], ClassFlags::PUBLIC))
            .unwrap();
        let b = table
            .insert(bare_class(names.intern("B"), Some(a), vec![], ClassFlags::PUBLIC))
            .unwrap();

        let a_arr = table
            .intern_array_class(names.intern("[LA;"), 1, ArrayElement::Class(a))
            .unwrap();
        let b_arr = table
            .intern_array_class(names.intern("[LB;"), 1, ArrayElement::Class(b))
            .unwrap();
        let int_arr = table
            .intern_array_class(names.intern("[I"), 1, ArrayElement::Primitive(PrimitiveType::Int))
            .unwrap();
        let long_arr = table
            .intern_array_class(names.intern("[J"), 1, ArrayElement::Primitive(PrimitiveType::Long))
            .unwrap();

        assert!(table.is_assignable(b_arr, a_arr, object));
        assert!(!table.is_assignable(a_arr, b_arr, object));
        assert!(table.is_assignable(int_arr, object, object));
        assert!(!table.is_assignable(int_arr, long_arr, object));
        assert!(!table.is_assignable(a_arr, a, object));
    }

    #[test]
    fn array_classes_are_interned_once() {
        let mut names = InternTable::new();
        let mut table = ClassTable::new();
        let key = names.intern("[I");
        let first = table
            .intern_array_class(key, 1, ArrayElement::Primitive(PrimitiveType::Int))
            .unwrap();
        let second = table
            .intern_array_class(key, 1, ArrayElement::Primitive(PrimitiveType::Int))
            .unwrap();
        assert_eq!(first, second);
    }
}
