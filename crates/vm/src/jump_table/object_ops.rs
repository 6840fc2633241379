//! Field access, allocation, type tests, and monitor opcodes.
//!
//! Field and class references resolve through the constant pool on first
//! execution; the opcode is then rewritten to the fast variant matching
//! the field shape, and later executions read the cached resolution
//! without a lookup. An access that finds its class uninitialised pushes
//! the class-initialisation barrier and rewinds `ip` so the same opcode
//! re-executes unchanged afterwards.

use super::{pop, pop_i32, pop_ref, push, push_i32, push_ref, rewrite_opcode, JumpTable};
use crate::class::ClassId;
use crate::error::{throwable, VmError, VmResult};
use crate::field::{FieldId, FieldKind};
use crate::intern::NameKey;
use crate::object::ObjectBody;
use crate::op_code::OpCode;
use crate::vm::Vm;

use mjvm_classfile::ClassFlags;

/// Registers the field/object handlers.
pub fn register_handlers(table: &mut JumpTable) {
    table.register(OpCode::GETSTATIC, getstatic);
    table.register(OpCode::GETSTATIC_FAST, getstatic);
    table.register(OpCode::GETSTATICP_FAST, getstatic);
    table.register(OpCode::GETSTATIC2_FAST, getstatic);
    table.register(OpCode::PUTSTATIC, putstatic);
    table.register(OpCode::PUTSTATIC_FAST, putstatic);
    table.register(OpCode::PUTSTATIC2_FAST, putstatic);
    table.register(OpCode::GETFIELD, getfield);
    table.register(OpCode::GETFIELD_FAST, getfield);
    table.register(OpCode::GETFIELDP_FAST, getfield);
    table.register(OpCode::GETFIELD2_FAST, getfield);
    table.register(OpCode::PUTFIELD, putfield);
    table.register(OpCode::PUTFIELD_FAST, putfield);
    table.register(OpCode::PUTFIELD2_FAST, putfield);
    table.register(OpCode::NEW, new);
    table.register(OpCode::NEW_FAST, new);
    table.register(OpCode::CHECKCAST, checkcast);
    table.register(OpCode::CHECKCAST_FAST, checkcast);
    table.register(OpCode::INSTANCEOF, instanceof);
    table.register(OpCode::INSTANCEOF_FAST, instanceof);
    table.register(OpCode::MONITORENTER, monitorenter);
    table.register(OpCode::MONITOREXIT, monitorexit);
}

/// Finds a field by name/descriptor: the class itself, its interface
/// closure, then the superclass chain.
fn find_field(vm: &Vm, class: ClassId, name: NameKey, descriptor: NameKey) -> Option<FieldId> {
    let mut cursor = Some(class);
    while let Some(id) = cursor {
        let c = vm.classes.class(id).as_instance()?;
        if let Some(index) = c.find_field(name, descriptor) {
            return Some(FieldId { class: id, index });
        }
        let mut interfaces: Vec<ClassId> = c.interfaces.clone();
        while let Some(iface) = interfaces.pop() {
            if let Some(ic) = vm.classes.class(iface).as_instance() {
                if let Some(index) = ic.find_field(name, descriptor) {
                    return Some(FieldId {
                        class: iface,
                        index,
                    });
                }
                interfaces.extend_from_slice(&ic.interfaces);
            }
        }
        cursor = c.super_class;
    }
    None
}

/// Resolves the Fieldref at `index`, caching the result in its pool slot.
fn resolved_field(vm: &mut Vm, index: u16) -> VmResult<(FieldId, FieldKind, u16, bool)> {
    let pool_class = vm.current_class()?;
    let (class_index, name, descriptor, cached) = vm.pool(pool_class)?.field_ref(index)?;
    let id = match cached {
        Some(id) => id,
        None => {
            let target = vm.resolve_pool_class(pool_class, class_index)?;
            let id = find_field(vm, target, name, descriptor).ok_or_else(|| {
                VmError::throw(throwable::NO_SUCH_FIELD, vm.name(name).to_string())
            })?;
            vm.pool_mut(pool_class)?.cache_field(index, id)?;
            id
        }
    };
    let field = &vm.classes.instance(id.class)?.fields[id.index as usize];
    Ok((id, field.kind, field.offset, field.is_static()))
}

/// Pushes the barrier for `class` and rewinds the faulting opcode.
fn suspend_for_init(vm: &mut Vm, class: ClassId) -> VmResult<()> {
    let opcode_ip = vm.frame()?.opcode_ip;
    vm.frame_mut()?.ip = opcode_ip;
    vm.begin_class_init(class)
}

fn getstatic(vm: &mut Vm, op: OpCode) -> VmResult<()> {
    let index = vm.fetch_u16()?;
    let (id, kind, offset, is_static) = resolved_field(vm, index)?;
    if !is_static {
        return Err(VmError::throw(
            throwable::INCOMPATIBLE_CLASS_CHANGE,
            "getstatic on an instance field",
        ));
    }
    if !op.is_fast_variant() {
        if vm.class_needs_init(id.class)? {
            return suspend_for_init(vm, id.class);
        }
        let fast = match kind {
            FieldKind::Word => OpCode::GETSTATIC_FAST,
            FieldKind::Pointer => OpCode::GETSTATICP_FAST,
            FieldKind::TwoWord => OpCode::GETSTATIC2_FAST,
        };
        rewrite_opcode(vm, fast)?;
    }

    let statics = &vm.classes.instance(id.class)?.statics;
    let low = statics[offset as usize];
    let high = if kind == FieldKind::TwoWord {
        Some(statics[offset as usize + 1])
    } else {
        None
    };
    push(vm, low)?;
    if let Some(high) = high {
        push(vm, high)?;
    }
    Ok(())
}

fn putstatic(vm: &mut Vm, op: OpCode) -> VmResult<()> {
    let index = vm.fetch_u16()?;
    let (id, kind, offset, is_static) = resolved_field(vm, index)?;
    if !is_static {
        return Err(VmError::throw(
            throwable::INCOMPATIBLE_CLASS_CHANGE,
            "putstatic on an instance field",
        ));
    }
    if !op.is_fast_variant() {
        if vm.class_needs_init(id.class)? {
            return suspend_for_init(vm, id.class);
        }
        let fast = match kind {
            FieldKind::TwoWord => OpCode::PUTSTATIC2_FAST,
            _ => OpCode::PUTSTATIC_FAST,
        };
        rewrite_opcode(vm, fast)?;
    }

    if kind == FieldKind::TwoWord {
        let high = pop(vm)?;
        let low = pop(vm)?;
        let statics = &mut vm.classes.instance_mut(id.class)?.statics;
        statics[offset as usize] = low;
        statics[offset as usize + 1] = high;
    } else {
        let value = pop(vm)?;
        vm.classes.instance_mut(id.class)?.statics[offset as usize] = value;
    }
    Ok(())
}

fn getfield(vm: &mut Vm, op: OpCode) -> VmResult<()> {
    let index = vm.fetch_u16()?;
    let (_, kind, offset, is_static) = resolved_field(vm, index)?;
    if is_static {
        return Err(VmError::throw(
            throwable::INCOMPATIBLE_CLASS_CHANGE,
            "getfield on a static field",
        ));
    }
    if !op.is_fast_variant() {
        let fast = match kind {
            FieldKind::Word => OpCode::GETFIELD_FAST,
            FieldKind::Pointer => OpCode::GETFIELDP_FAST,
            FieldKind::TwoWord => OpCode::GETFIELD2_FAST,
        };
        rewrite_opcode(vm, fast)?;
    }

    let object = pop_ref(vm)?;
    let (low, high) = match &vm.obj(object)?.body {
        ObjectBody::Instance(fields) => (
            fields[offset as usize],
            if kind == FieldKind::TwoWord {
                Some(fields[offset as usize + 1])
            } else {
                None
            },
        ),
        _ => return Err(VmError::internal("getfield on a non-instance object")),
    };
    push(vm, low)?;
    if let Some(high) = high {
        push(vm, high)?;
    }
    Ok(())
}

fn putfield(vm: &mut Vm, op: OpCode) -> VmResult<()> {
    let index = vm.fetch_u16()?;
    let (_, kind, offset, is_static) = resolved_field(vm, index)?;
    if is_static {
        return Err(VmError::throw(
            throwable::INCOMPATIBLE_CLASS_CHANGE,
            "putfield on a static field",
        ));
    }
    if !op.is_fast_variant() {
        let fast = match kind {
            FieldKind::TwoWord => OpCode::PUTFIELD2_FAST,
            _ => OpCode::PUTFIELD_FAST,
        };
        rewrite_opcode(vm, fast)?;
    }

    let (low, high) = if kind == FieldKind::TwoWord {
        let high = pop(vm)?;
        let low = pop(vm)?;
        (low, Some(high))
    } else {
        (pop(vm)?, None)
    };
    let object = pop_ref(vm)?;
    match &mut vm.obj_mut(object)?.body {
        ObjectBody::Instance(fields) => {
            fields[offset as usize] = low;
            if let Some(high) = high {
                fields[offset as usize + 1] = high;
            }
            Ok(())
        }
        _ => Err(VmError::internal("putfield on a non-instance object")),
    }
}

fn new(vm: &mut Vm, op: OpCode) -> VmResult<()> {
    let index = vm.fetch_u16()?;
    let pool_class = vm.current_class()?;
    let class = vm.resolve_pool_class(pool_class, index)?;

    let instantiable = match vm.classes.class(class).as_instance() {
        Some(c) => !c.flags.intersects(ClassFlags::INTERFACE | ClassFlags::ABSTRACT),
        None => false,
    };
    if !instantiable {
        return Err(VmError::throw(
            throwable::INSTANTIATION,
            vm.class_name_text(class),
        ));
    }

    if !op.is_fast_variant() {
        if vm.class_needs_init(class)? {
            return suspend_for_init(vm, class);
        }
        rewrite_opcode(vm, OpCode::NEW_FAST)?;
    }

    let object = vm.alloc_instance_of(class)?;
    push_ref(vm, object)
}

fn checkcast(vm: &mut Vm, op: OpCode) -> VmResult<()> {
    let index = vm.fetch_u16()?;
    let pool_class = vm.current_class()?;
    let target = vm.resolve_pool_class(pool_class, index)?;
    if !op.is_fast_variant() {
        rewrite_opcode(vm, OpCode::CHECKCAST_FAST)?;
    }

    // The reference stays on the stack; null always passes.
    let value = vm
        .frame()?
        .peek(0)
        .map(crate::object::ObjRef)
        .ok_or_else(super::underflow)?;
    if value.is_null() {
        return Ok(());
    }
    let value_class = vm.obj(value)?.class;
    let object = vm.object_class()?;
    if !vm.classes.is_assignable(value_class, target, object) {
        return Err(VmError::throw(
            throwable::CLASS_CAST,
            format!(
                "{} cannot be cast to {}",
                vm.class_name_text(value_class).replace('/', "."),
                vm.class_name_text(target).replace('/', ".")
            ),
        ));
    }
    Ok(())
}

fn instanceof(vm: &mut Vm, op: OpCode) -> VmResult<()> {
    let index = vm.fetch_u16()?;
    let pool_class = vm.current_class()?;
    let target = vm.resolve_pool_class(pool_class, index)?;
    if !op.is_fast_variant() {
        rewrite_opcode(vm, OpCode::INSTANCEOF_FAST)?;
    }

    let value = pop_ref(vm)?;
    if value.is_null() {
        return push_i32(vm, 0);
    }
    let value_class = vm.obj(value)?.class;
    let object = vm.object_class()?;
    let result = vm.classes.is_assignable(value_class, target, object);
    push_i32(vm, result as i32)
}

fn monitorenter(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let object = pop_ref(vm)?;
    vm.monitor_enter(object)?;
    Ok(())
}

fn monitorexit(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let object = pop_ref(vm)?;
    vm.monitor_exit(object)
}
