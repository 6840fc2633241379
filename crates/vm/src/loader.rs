//! The class loader and linker.
//!
//! Loading takes a class from RAW to LOADED: the class file is decoded,
//! its constant pool collapsed to interned keys, and field/method tables
//! converted into runtime form. Linking takes LOADED to LINKED for the
//! class and its whole superclass/interface closure: superclass rules are
//! enforced, instance fields receive their cell offsets, and the static
//! block is laid out pointers-first. On any failure every class this
//! attempt rolled forward reverts to RAW so a later attempt can succeed.

use log::{debug, warn};

use mjvm_classfile::{ClassFile, ClassFileError, ClassFlags, MethodFlags, StackMapItem};

use crate::class::{ArrayElement, Class, ClassId, ClassStatus, InstanceClass, PrimitiveType};
use crate::constant_pool::{PoolEntry, RuntimePool};
use crate::error::{throwable, VmError, VmResult};
use crate::field::{Field, FieldKind};
use crate::intern::NameKey;
use crate::method::{BytecodeBody, Method, MethodBody, MethodId, StackMaps};
use crate::verifier::stack_map::RecordedMap;
use crate::verifier::types::VType;
use crate::vm::Vm;

impl Vm {
    /// The class-table hook: returns the class for `name` in at least
    /// LINKED state, loading and linking it (and its superclass closure)
    /// as necessary.
    pub fn resolve_class(&mut self, name: NameKey) -> VmResult<ClassId> {
        let id = self.raw_class_id(name)?;
        if self.classes.class(id).as_instance().is_some() {
            self.load_instance_class(id)?;
            let mut visiting = Vec::new();
            self.link_instance_class(id, &mut visiting)?;
        }
        Ok(id)
    }

    /// The single reflective entry point: resolves a class by source-form
    /// name.
    pub fn load_class_by_name(&mut self, name: &str) -> VmResult<ClassId> {
        let key = self.intern(name);
        self.resolve_class(key)
    }

    /// Finds or creates the RAW table entry for `name`. Array names build
    /// their component chain recursively.
    pub fn raw_class_id(&mut self, name: NameKey) -> VmResult<ClassId> {
        if let Some(id) = self.classes.lookup(name) {
            return Ok(id);
        }
        let text = self.name(name).to_string();
        if let Some(component) = text.strip_prefix('[') {
            return self.array_class_id(name, component);
        }
        if !mjvm_classfile::descriptor::is_valid_class_name(&text) {
            return Err(VmError::throw(throwable::NO_CLASS_DEF, text));
        }
        let package = package_of(&text);
        let package_key = self.intern(&package);
        self.classes.insert(Class::Instance(raw_shell(name, package_key)))
    }

    fn array_class_id(&mut self, name: NameKey, component: &str) -> VmResult<ClassId> {
        let text = self.name(name).to_string();
        if mjvm_classfile::descriptor::parse_field_type(&text).is_err() {
            return Err(VmError::throw(throwable::NO_CLASS_DEF, text));
        }
        let dimensions = text.bytes().take_while(|&b| b == b'[').count() as u8;

        let element = if component.starts_with('[') {
            let component_key = self.intern(component);
            ArrayElement::Class(self.raw_class_id(component_key)?)
        } else if let Some(inner) = component
            .strip_prefix('L')
            .and_then(|s| s.strip_suffix(';'))
        {
            let inner_key = self.intern(inner);
            ArrayElement::Class(self.raw_class_id(inner_key)?)
        } else {
            let code = component.bytes().next().unwrap_or(0);
            let primitive = match code {
                b'Z' => PrimitiveType::Boolean,
                b'B' => PrimitiveType::Byte,
                b'C' => PrimitiveType::Char,
                b'S' => PrimitiveType::Short,
                b'I' => PrimitiveType::Int,
                b'J' => PrimitiveType::Long,
                b'F' => PrimitiveType::Float,
                b'D' => PrimitiveType::Double,
                _ => return Err(VmError::throw(throwable::NO_CLASS_DEF, text)),
            };
            ArrayElement::Primitive(primitive)
        };
        self.classes.intern_array_class(name, dimensions, element)
    }

    /// The array class of one more dimension over `component`.
    pub fn array_class_of(&mut self, component: ClassId) -> VmResult<ClassId> {
        let component_name = self.name(self.classes.class(component).name()).to_string();
        let array_name = if component_name.starts_with('[') {
            format!("[{component_name}")
        } else {
            format!("[L{component_name};")
        };
        let key = self.intern(&array_name);
        self.raw_class_id(key)
    }

    /// Loads and links `id` when it is an instance class still below
    /// LINKED; array classes are complete from birth.
    pub(crate) fn ensure_linked(&mut self, id: ClassId) -> VmResult<()> {
        if let Some(class) = self.classes.class(id).as_instance() {
            if class.status < ClassStatus::Linked {
                self.load_instance_class(id)?;
                let mut visiting = Vec::new();
                self.link_instance_class(id, &mut visiting)?;
            }
        }
        Ok(())
    }

    /// RAW → LOADED, or a linkage error with rollback to RAW.
    pub fn load_instance_class(&mut self, id: ClassId) -> VmResult<()> {
        match self.classes.instance(id)?.status {
            ClassStatus::Raw => {}
            ClassStatus::Loading => {
                let name = self.class_name_text(id);
                return Err(VmError::throw(throwable::CLASS_CIRCULARITY, name));
            }
            ClassStatus::Error => {
                let name = self.class_name_text(id);
                return Err(VmError::throw(throwable::NO_CLASS_DEF, name));
            }
            _ => return Ok(()),
        }

        self.classes.instance_mut(id)?.status = ClassStatus::Loading;
        match self.load_instance_inner(id) {
            Ok(()) => {
                self.classes.instance_mut(id)?.status = ClassStatus::Loaded;
                debug!("loader: loaded {}", self.class_name_text(id));
                Ok(())
            }
            Err(err) => {
                warn!(
                    "loader: load of {} failed, rolling back to RAW: {err}",
                    self.class_name_text(id)
                );
                self.classes.instance_mut(id)?.status = ClassStatus::Raw;
                Err(err)
            }
        }
    }

    fn load_instance_inner(&mut self, id: ClassId) -> VmResult<()> {
        let name_key = self.classes.instance(id)?.name;
        let name = self.name(name_key).to_string();

        let bytes = self
            .source
            .class_bytes(&name)
            .ok_or_else(|| VmError::throw(throwable::NO_CLASS_DEF, name.clone()))?;
        let class_file = ClassFile::parse(&bytes).map_err(|err| class_format(&name, &err))?;

        if class_file.name() != name {
            return Err(VmError::throw(
                throwable::NO_CLASS_DEF,
                format!("{name} (wrong name: {})", class_file.name()),
            ));
        }

        let pool = self.convert_pool(&class_file)?;
        let super_class = match class_file.super_name() {
            Some(super_name) => {
                let key = self.intern(super_name);
                Some(self.raw_class_id(key)?)
            }
            None => None,
        };
        let mut interfaces = Vec::with_capacity(class_file.interfaces.len());
        for &index in &class_file.interfaces {
            let iface_name = class_file
                .constant_pool
                .class_entry(index)
                .map_err(|err| class_format(&name, &err))?
                .to_string();
            let key = self.intern(&iface_name);
            interfaces.push(self.raw_class_id(key)?);
        }

        let fields = self.convert_fields(&class_file)?;
        let methods = self.convert_methods(&name, &class_file)?;

        let class = self.classes.instance_mut(id)?;
        class.flags = class_file.access_flags;
        class.super_class = super_class;
        class.interfaces = interfaces;
        class.pool = pool;
        class.fields = fields;
        class.methods = methods;
        Ok(())
    }

    /// Converts the class-file pool to runtime form: names interned, Utf8
    /// and NameAndType slots zeroed, Long/Double second slots marked.
    fn convert_pool(&mut self, class_file: &ClassFile) -> VmResult<RuntimePool> {
        use mjvm_classfile::Constant;
        let source = &class_file.constant_pool;
        let mut entries = vec![PoolEntry::Unused; source.len()];
        for (index, constant) in source.iter() {
            let slot = index as usize;
            entries[slot] = match constant {
                Constant::Utf8(_) | Constant::NameAndType { .. } => PoolEntry::Unused,
                Constant::Integer(v) => PoolEntry::Integer(*v),
                Constant::Float(v) => PoolEntry::Float(*v),
                Constant::Long(v) => {
                    entries[slot + 1] = PoolEntry::Second;
                    PoolEntry::Long(*v)
                }
                Constant::Double(v) => {
                    entries[slot + 1] = PoolEntry::Second;
                    PoolEntry::Double(*v)
                }
                Constant::Class { name_index } => {
                    let text = source.utf8(*name_index).map_err(internal_pool)?;
                    let name = self.intern(text);
                    PoolEntry::Class {
                        name,
                        resolved: None,
                    }
                }
                Constant::String { string_index } => {
                    let text = source.utf8(*string_index).map_err(internal_pool)?;
                    let value = self.intern(text);
                    PoolEntry::StringConst {
                        value,
                        object: None,
                    }
                }
                Constant::FieldRef {
                    class_index,
                    name_and_type_index,
                } => {
                    let (member, descriptor) = source
                        .name_and_type(*name_and_type_index)
                        .map_err(internal_pool)?;
                    let (member, descriptor) = (member.to_string(), descriptor.to_string());
                    PoolEntry::FieldRef {
                        class_index: *class_index,
                        name: self.intern(&member),
                        descriptor: self.intern(&descriptor),
                        resolved: None,
                    }
                }
                Constant::MethodRef {
                    class_index,
                    name_and_type_index,
                } => {
                    let (member, descriptor) = source
                        .name_and_type(*name_and_type_index)
                        .map_err(internal_pool)?;
                    let (member, descriptor) = (member.to_string(), descriptor.to_string());
                    PoolEntry::MethodRef {
                        class_index: *class_index,
                        name: self.intern(&member),
                        descriptor: self.intern(&descriptor),
                        resolved: None,
                        site_cache: None,
                    }
                }
                Constant::InterfaceMethodRef {
                    class_index,
                    name_and_type_index,
                } => {
                    let (member, descriptor) = source
                        .name_and_type(*name_and_type_index)
                        .map_err(internal_pool)?;
                    let (member, descriptor) = (member.to_string(), descriptor.to_string());
                    PoolEntry::InterfaceMethodRef {
                        class_index: *class_index,
                        name: self.intern(&member),
                        descriptor: self.intern(&descriptor),
                        resolved: None,
                        site_cache: None,
                    }
                }
                Constant::Unusable => PoolEntry::Unused,
            };
        }
        Ok(RuntimePool::new(entries))
    }

    fn convert_fields(&mut self, class_file: &ClassFile) -> VmResult<Vec<Field>> {
        let mut fields = Vec::with_capacity(class_file.fields.len());
        for info in &class_file.fields {
            let name = self.intern(&info.name);
            let descriptor = self.intern(&info.descriptor);
            fields.push(Field {
                name,
                descriptor,
                flags: info.access_flags,
                kind: FieldKind::of(&info.field_type),
                offset: 0,
                constant_value: info.constant_value,
            });
        }
        Ok(fields)
    }

    fn convert_methods(
        &mut self,
        class_name: &str,
        class_file: &ClassFile,
    ) -> VmResult<Vec<Method>> {
        let mut methods = Vec::with_capacity(class_file.methods.len());
        for info in &class_file.methods {
            let name = self.intern(&info.name);
            let descriptor = self.intern(&info.descriptor);
            let receiver = if info.access_flags.contains(MethodFlags::STATIC) {
                0
            } else {
                1
            };
            let arg_cells = (info.signature.argument_cells() + receiver) as u16;
            let return_cells = info.signature.return_cells() as u8;

            let body = if info.access_flags.contains(MethodFlags::NATIVE) {
                MethodBody::Native(self.natives.lookup(class_name, &info.name, &info.descriptor))
            } else if info.access_flags.contains(MethodFlags::ABSTRACT) {
                MethodBody::Abstract
            } else {
                let code = info
                    .code
                    .as_ref()
                    .ok_or_else(|| VmError::internal("plain method without code survived parse"))?;
                let stack_maps = match &code.stack_map {
                    Some(entries) => StackMaps::Verifier(self.convert_stack_maps(
                        class_name,
                        class_file,
                        entries,
                    )?),
                    None => StackMaps::Absent,
                };
                MethodBody::Bytecode(Box::new(BytecodeBody {
                    max_stack: code.max_stack,
                    frame_cells: code.max_locals,
                    code: code.code.clone(),
                    handlers: code.handlers.clone(),
                    stack_maps,
                }))
            };

            methods.push(Method {
                name,
                descriptor,
                flags: info.access_flags,
                arg_cells,
                return_cells,
                body,
            });
        }
        Ok(methods)
    }

    fn convert_stack_maps(
        &mut self,
        class_name: &str,
        class_file: &ClassFile,
        entries: &[mjvm_classfile::StackMapEntry],
    ) -> VmResult<Vec<RecordedMap>> {
        let mut maps = Vec::with_capacity(entries.len());
        let mut previous_offset = None;
        for entry in entries {
            if previous_offset.is_some_and(|prev| prev >= entry.offset) {
                return Err(VmError::class_format(format!(
                    "{class_name}: stack map offsets out of order"
                )));
            }
            previous_offset = Some(entry.offset);
            maps.push(RecordedMap {
                offset: entry.offset,
                locals: self.convert_snapshot(class_file, &entry.locals)?,
                stack: self.convert_snapshot(class_file, &entry.stack)?,
            });
        }
        Ok(maps)
    }

    fn convert_snapshot(
        &mut self,
        class_file: &ClassFile,
        items: &[StackMapItem],
    ) -> VmResult<Vec<VType>> {
        let mut slots = Vec::with_capacity(items.len());
        for item in items {
            match item {
                StackMapItem::Bogus => slots.push(VType::Bogus),
                StackMapItem::Integer => slots.push(VType::Integer),
                StackMapItem::Float => slots.push(VType::Float),
                StackMapItem::Long => {
                    slots.push(VType::Long);
                    slots.push(VType::Long2);
                }
                StackMapItem::Double => {
                    slots.push(VType::Double);
                    slots.push(VType::Double2);
                }
                StackMapItem::Null => slots.push(VType::Null),
                StackMapItem::InitObject => slots.push(VType::InitObject),
                StackMapItem::Object(class_index) => {
                    let text = class_file
                        .constant_pool
                        .class_entry(*class_index)
                        .map_err(internal_pool)?
                        .to_string();
                    let key = self.intern(&text);
                    let id = self.raw_class_id(key)?;
                    slots.push(VType::Reference(id));
                }
                StackMapItem::NewObject(pc) => slots.push(VType::NewObject { pc: *pc }),
            }
        }
        Ok(slots)
    }

    /// LOADED → LINKED for `id` and its transitive superclass/interface
    /// closure. `visiting` detects inheritance cycles.
    pub fn link_instance_class(
        &mut self,
        id: ClassId,
        visiting: &mut Vec<ClassId>,
    ) -> VmResult<()> {
        if self.classes.instance(id)?.status >= ClassStatus::Linked {
            return Ok(());
        }
        if visiting.contains(&id) {
            let name = self.class_name_text(id);
            return Err(VmError::throw(throwable::CLASS_CIRCULARITY, name));
        }
        visiting.push(id);
        let result = self.link_instance_inner(id, visiting);
        visiting.pop();
        match result {
            Ok(()) => {
                self.classes.instance_mut(id)?.status = ClassStatus::Linked;
                let name = self.class_name_text(id);
                debug!("loader: linked {name}");
                if let Some(events) = self.events.as_mut() {
                    events.class_prepared(&name);
                }
                Ok(())
            }
            Err(err) => {
                warn!(
                    "loader: link of {} failed, rolling back to RAW: {err}",
                    self.class_name_text(id)
                );
                self.classes.instance_mut(id)?.status = ClassStatus::Raw;
                Err(err)
            }
        }
    }

    fn link_instance_inner(&mut self, id: ClassId, visiting: &mut Vec<ClassId>) -> VmResult<()> {
        let name = self.class_name_text(id);
        let super_class = self.classes.instance(id)?.super_class;

        // Superclass rules. Only the root object class may have none.
        let super_cells = match super_class {
            Some(super_id) => {
                if self.classes.class(super_id).is_array() {
                    return Err(VmError::class_format(format!(
                        "{name}: array type as superclass"
                    )));
                }
                self.load_instance_class(super_id)?;
                self.link_instance_class(super_id, visiting)?;
                let super_ref = self.classes.instance(super_id)?;
                if super_ref.is_interface() {
                    return Err(VmError::throw(
                        throwable::INCOMPATIBLE_CLASS_CHANGE,
                        format!("{name}: interface as superclass"),
                    ));
                }
                if super_ref.flags.contains(ClassFlags::FINAL) {
                    return Err(VmError::verify_error(&name, "cannot subclass final class"));
                }
                if !self.class_accessible(id, super_id)? {
                    return Err(VmError::throw(
                        throwable::ILLEGAL_ACCESS,
                        format!("{name}: superclass not accessible"),
                    ));
                }
                self.classes.instance(super_id)?.instance_cells
            }
            None => {
                if self.classes.instance(id)?.name != self.known.object_name {
                    return Err(VmError::class_format(format!("{name}: missing superclass")));
                }
                0
            }
        };

        // Super-interfaces must link and must be interfaces.
        let interfaces = self.classes.instance(id)?.interfaces.clone();
        for iface in interfaces {
            if self.classes.class(iface).is_array() {
                return Err(VmError::class_format(format!("{name}: array as interface")));
            }
            self.load_instance_class(iface)?;
            self.link_instance_class(iface, visiting)?;
            if !self.classes.instance(iface)?.is_interface() {
                return Err(VmError::throw(
                    throwable::INCOMPATIBLE_CLASS_CHANGE,
                    format!("{name}: non-interface in interface list"),
                ));
            }
        }

        self.check_final_overrides(id, &name)?;

        // Instance layout: superclass payload first, declared fields after,
        // in declaration order.
        let mut offset = super_cells;
        {
            let class = self.classes.instance_mut(id)?;
            for field in class.fields.iter_mut().filter(|f| !f.is_static()) {
                field.offset = offset;
                offset += field.cells();
            }
            class.instance_cells = offset;
        }

        // Static layout: pointer statics first so the collector sees a
        // single contiguous root range.
        {
            let class = self.classes.instance_mut(id)?;
            let mut pointer_offset = 0u16;
            for field in class
                .fields
                .iter_mut()
                .filter(|f| f.is_static() && f.kind == FieldKind::Pointer)
            {
                field.offset = pointer_offset;
                pointer_offset += 1;
            }
            let mut word_offset = pointer_offset;
            for field in class
                .fields
                .iter_mut()
                .filter(|f| f.is_static() && f.kind != FieldKind::Pointer)
            {
                field.offset = word_offset;
                word_offset += field.cells();
            }
            class.static_pointer_cells = pointer_offset;
            class.statics = vec![0; word_offset as usize];
        }

        // Finalizer: own declaration wins, otherwise inherited.
        let own = {
            let class = self.classes.instance(id)?;
            class
                .find_method(self.known.finalize_name, self.known.void_descriptor)
                .filter(|&index| !class.methods[index as usize].is_static())
        };
        let finalizer = match own {
            Some(index) => Some(MethodId { class: id, index }),
            None => super_class.and_then(|s| {
                self.classes
                    .class(s)
                    .as_instance()
                    .and_then(|sc| sc.finalizer)
            }),
        };
        self.classes.instance_mut(id)?.finalizer = finalizer;
        Ok(())
    }

    fn check_final_overrides(&self, id: ClassId, name: &str) -> VmResult<()> {
        let class = self.classes.instance(id)?;
        for method in &class.methods {
            if method.is_static() || method.name == self.known.init_name {
                continue;
            }
            let mut current = class.super_class;
            while let Some(super_id) = current {
                let Some(super_class) = self.classes.class(super_id).as_instance() else {
                    break;
                };
                if let Some(index) = super_class.find_method(method.name, method.descriptor) {
                    if super_class.methods[index as usize]
                        .flags
                        .contains(MethodFlags::FINAL)
                    {
                        return Err(VmError::verify_error(name, "overrides a final method"));
                    }
                }
                current = super_class.super_class;
            }
        }
        Ok(())
    }

    /// Same-package or public visibility.
    pub fn class_accessible(&self, from: ClassId, to: ClassId) -> VmResult<bool> {
        let to_class = self.classes.class(to);
        let (to_flags, to_package) = match to_class {
            Class::Instance(c) => (c.flags, c.package),
            Class::Array(c) => (c.flags, c.name),
        };
        if to_flags.contains(ClassFlags::PUBLIC) {
            return Ok(true);
        }
        let from_package = self.classes.instance(from)?.package;
        Ok(from_package == to_package)
    }

    /// Source-form name of a class, for messages.
    pub fn class_name_text(&self, id: ClassId) -> String {
        self.name(self.classes.class(id).name()).to_string()
    }
}

fn raw_shell(name: NameKey, package: NameKey) -> InstanceClass {
    InstanceClass {
        name,
        package,
        flags: ClassFlags::empty(),
        super_class: None,
        interfaces: Vec::new(),
        pool: RuntimePool::default(),
        fields: Vec::new(),
        methods: Vec::new(),
        instance_cells: 0,
        statics: Vec::new(),
        static_pointer_cells: 0,
        status: ClassStatus::Raw,
        init_thread: None,
        class_object: None,
        finalizer: None,
    }
}

fn package_of(name: &str) -> String {
    match name.rfind('/') {
        Some(split) => name[..split].to_string(),
        None => String::new(),
    }
}

fn class_format(name: &str, err: &ClassFileError) -> VmError {
    VmError::class_format(format!("{name}: {err}"))
}

fn internal_pool(err: ClassFileError) -> VmError {
    VmError::internal(format!("validated pool entry unusable: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{MapClassSource, Vm, VmOptions};
    use mjvm_classfile::ClassFileBuilder;

    fn vm_with(classes: Vec<(&str, Vec<u8>)>) -> Vm {
        let mut source = MapClassSource::new();
        for (name, bytes) in classes {
            source.insert(name, bytes);
        }
        Vm::new(VmOptions::default(), Box::new(source)).unwrap()
    }

    fn object_class_bytes() -> Vec<u8> {
        ClassFileBuilder::new("java/lang/Object", None).build()
    }

    #[test]
    fn loads_and_links_a_class_with_fields() {
        let mut point = ClassFileBuilder::new("demo/Point", Some("java/lang/Object"));
        point.add_field(0x0002, "x", "I");
        point.add_field(0x0002, "when", "J");
        point.add_field(0x0002, "label", "Ljava/lang/String;");
        let mut vm = vm_with(vec![
            ("java/lang/Object", object_class_bytes()),
            ("demo/Point", point.build()),
        ]);

        let id = vm.load_class_by_name("demo/Point").unwrap();
        let class = vm.classes.instance(id).unwrap();
        assert_eq!(class.status, ClassStatus::Linked);
        assert_eq!(class.instance_cells, 4);
        assert_eq!(class.fields[0].offset, 0);
        assert_eq!(class.fields[1].offset, 1);
        assert_eq!(class.fields[2].offset, 3);
    }

    #[test]
    fn instance_layout_starts_after_the_superclass() {
        let mut base = ClassFileBuilder::new("demo/Base", Some("java/lang/Object"));
        base.add_field(0x0004, "a", "I");
        base.add_field(0x0004, "b", "D");
        let mut derived = ClassFileBuilder::new("demo/Derived", Some("demo/Base"));
        derived.add_field(0x0002, "c", "I");
        let mut vm = vm_with(vec![
            ("java/lang/Object", object_class_bytes()),
            ("demo/Base", base.build()),
            ("demo/Derived", derived.build()),
        ]);

        let id = vm.load_class_by_name("demo/Derived").unwrap();
        let class = vm.classes.instance(id).unwrap();
        assert_eq!(class.fields[0].offset, 3);
        assert_eq!(class.instance_cells, 4);
    }

    #[test]
    fn pointer_statics_lead_the_static_block() {
        let mut holder = ClassFileBuilder::new("demo/Holder", Some("java/lang/Object"));
        holder.add_field(0x0008, "count", "I");
        holder.add_field(0x0008, "name", "Ljava/lang/String;");
        holder.add_field(0x0008, "total", "J");
        holder.add_field(0x0008, "other", "Ljava/lang/Object;");
        let mut vm = vm_with(vec![
            ("java/lang/Object", object_class_bytes()),
            ("demo/Holder", holder.build()),
        ]);

        let id = vm.load_class_by_name("demo/Holder").unwrap();
        let class = vm.classes.instance(id).unwrap();
        assert_eq!(class.static_pointer_cells, 2);
        assert_eq!(class.statics.len(), 5);
        let name_field = class
            .fields
            .iter()
            .find(|f| vm.names.resolve(f.name) == "name")
            .unwrap();
        let other_field = class
            .fields
            .iter()
            .find(|f| vm.names.resolve(f.name) == "other")
            .unwrap();
        assert!(name_field.offset < 2 && other_field.offset < 2);
    }

    #[test]
    fn missing_class_raises_no_class_def() {
        let mut vm = vm_with(vec![("java/lang/Object", object_class_bytes())]);
        let err = vm.load_class_by_name("demo/Absent").unwrap_err();
        assert!(matches!(
            err,
            VmError::Throw { ref class_name, .. } if class_name == throwable::NO_CLASS_DEF
        ));
        // The shell rolled back to RAW, so a later attempt may succeed.
        let key = vm.names.get("demo/Absent").unwrap();
        let id = vm.classes.lookup(key).unwrap();
        assert_eq!(vm.classes.instance(id).unwrap().status, ClassStatus::Raw);
    }

    #[test]
    fn inheritance_cycle_is_detected() {
        let a = ClassFileBuilder::new("demo/A", Some("demo/B")).build();
        let b = ClassFileBuilder::new("demo/B", Some("demo/A")).build();
        let mut vm = vm_with(vec![
            ("java/lang/Object", object_class_bytes()),
            ("demo/A", a),
            ("demo/B", b),
        ]);
        let err = vm.load_class_by_name("demo/A").unwrap_err();
        assert!(matches!(
            err,
            VmError::Throw { ref class_name, .. }
                if class_name == throwable::CLASS_CIRCULARITY
        ));
    }

    #[test]
    fn final_superclass_is_rejected() {
        let mut sealed = ClassFileBuilder::new("demo/Sealed", Some("java/lang/Object"));
        sealed.set_access_flags(0x0031); // public final super
        let sub = ClassFileBuilder::new("demo/Sub", Some("demo/Sealed")).build();
        let mut vm = vm_with(vec![
            ("java/lang/Object", object_class_bytes()),
            ("demo/Sealed", sealed.build()),
            ("demo/Sub", sub),
        ]);
        let err = vm.load_class_by_name("demo/Sub").unwrap_err();
        assert!(matches!(
            err,
            VmError::Throw { ref class_name, .. } if class_name == throwable::VERIFY
        ));
    }

    #[test]
    fn array_classes_are_manufactured_on_reference() {
        let mut vm = vm_with(vec![("java/lang/Object", object_class_bytes())]);
        let id = vm.load_class_by_name("[[I").unwrap();
        let array = vm.classes.array(id).unwrap();
        assert_eq!(array.dimensions, 2);
        let ArrayElement::Class(component) = array.element else {
            panic!("outer dimension should reference the [I class");
        };
        let inner = vm.classes.array(component).unwrap();
        assert_eq!(inner.element, ArrayElement::Primitive(PrimitiveType::Int));
    }

    #[test]
    fn interface_in_superclass_position_is_rejected() {
        let mut iface = ClassFileBuilder::new("demo/Iface", Some("java/lang/Object"));
        iface.set_access_flags(0x0601);
        let sub = ClassFileBuilder::new("demo/Sub", Some("demo/Iface")).build();
        let mut vm = vm_with(vec![
            ("java/lang/Object", object_class_bytes()),
            ("demo/Iface", iface.build()),
            ("demo/Sub", sub),
        ]);
        let err = vm.load_class_by_name("demo/Sub").unwrap_err();
        assert!(matches!(
            err,
            VmError::Throw { ref class_name, .. }
                if class_name == throwable::INCOMPATIBLE_CLASS_CHANGE
        ));
    }

    #[test]
    fn utf8_slots_are_collapsed() {
        let mut simple = ClassFileBuilder::new("demo/Simple", Some("java/lang/Object"));
        simple.add_field(0x0002, "x", "I");
        let mut vm = vm_with(vec![
            ("java/lang/Object", object_class_bytes()),
            ("demo/Simple", simple.build()),
        ]);
        let id = vm.load_class_by_name("demo/Simple").unwrap();
        let class = vm.classes.instance(id).unwrap();
        let unused = (1..class.pool.len() as u16)
            .filter(|&i| matches!(class.pool.entry(i), Ok(PoolEntry::Unused)))
            .count();
        // Every Utf8 became Unused; the Class entries survive.
        assert!(unused > 0);
    }
}
