//! The invoke family and its fast variants.
//!
//! Resolution caches the declared method in the constant-pool slot on
//! first execution and rewrites the opcode. Virtual and interface sites
//! additionally keep an inline cache of `(receiver class, selected
//! method)`; a receiver of a different class re-runs the lookup and
//! refreshes the cache.

use super::{rewrite_opcode, underflow, JumpTable};
use crate::class::ClassId;
use crate::error::{throwable, VmError, VmResult};
use crate::intern::NameKey;
use crate::method::MethodId;
use crate::object::ObjRef;
use crate::op_code::OpCode;
use crate::vm::Vm;

/// Registers the invoke handlers.
pub fn register_handlers(table: &mut JumpTable) {
    table.register(OpCode::INVOKEVIRTUAL, invokevirtual);
    table.register(OpCode::INVOKEVIRTUAL_FAST, invokevirtual);
    table.register(OpCode::INVOKESPECIAL, invokespecial);
    table.register(OpCode::INVOKESPECIAL_FAST, invokespecial);
    table.register(OpCode::INVOKESTATIC, invokestatic);
    table.register(OpCode::INVOKESTATIC_FAST, invokestatic);
    table.register(OpCode::INVOKEINTERFACE, invokeinterface);
    table.register(OpCode::INVOKEINTERFACE_FAST, invokeinterface);
}

/// Finds a method by name/descriptor: the class chain first, then the
/// transitive interface closure.
pub(crate) fn find_method(
    vm: &Vm,
    class: ClassId,
    name: NameKey,
    descriptor: NameKey,
) -> Option<MethodId> {
    let mut cursor = Some(class);
    while let Some(id) = cursor {
        let c = vm.classes.class(id).as_instance()?;
        if let Some(index) = c.find_method(name, descriptor) {
            return Some(MethodId { class: id, index });
        }
        cursor = c.super_class;
    }
    // Interface closure of the whole chain.
    let mut cursor = Some(class);
    while let Some(id) = cursor {
        let c = vm.classes.class(id).as_instance()?;
        let mut interfaces = c.interfaces.clone();
        while let Some(iface) = interfaces.pop() {
            if let Some(ic) = vm.classes.class(iface).as_instance() {
                if let Some(index) = ic.find_method(name, descriptor) {
                    return Some(MethodId {
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

/// Resolves the method reference at `index`, caching the declared method.
fn resolved_method(vm: &mut Vm, index: u16, interface: bool) -> VmResult<MethodId> {
    let pool_class = vm.current_class()?;
    let (class_index, name, descriptor, cached) = vm.pool(pool_class)?.method_ref(index, interface)?;
    if let Some(id) = cached {
        return Ok(id);
    }
    let target_class = vm.resolve_pool_class(pool_class, class_index)?;
    let lookup_class = if vm.classes.class(target_class).is_array() {
        vm.object_class()?
    } else {
        target_class
    };
    let id = find_method(vm, lookup_class, name, descriptor).ok_or_else(|| {
        VmError::throw(throwable::NO_SUCH_METHOD, vm.name(name).to_string())
    })?;
    vm.pool_mut(pool_class)?.cache_method(index, id)?;
    Ok(id)
}

/// The receiver sitting under `arg_cells` argument cells.
fn peek_receiver(vm: &Vm, arg_cells: usize) -> VmResult<ObjRef> {
    let receiver = vm
        .frame()?
        .peek(arg_cells - 1)
        .map(ObjRef)
        .ok_or_else(underflow)?;
    if receiver.is_null() {
        return Err(VmError::null_pointer());
    }
    Ok(receiver)
}

/// Runtime method selection for virtual and interface sites. Array
/// receivers dispatch through the root object class.
fn select_by_receiver(
    vm: &mut Vm,
    receiver_class: ClassId,
    declared: MethodId,
) -> VmResult<MethodId> {
    let (name, descriptor) = {
        let m = vm.method(declared)?;
        (m.name, m.descriptor)
    };
    let start = if vm.classes.class(receiver_class).is_array() {
        vm.object_class()?
    } else {
        receiver_class
    };
    find_method(vm, start, name, descriptor)
        .ok_or_else(|| VmError::throw(throwable::ABSTRACT_METHOD, vm.name(name).to_string()))
}

fn invokevirtual(vm: &mut Vm, op: OpCode) -> VmResult<()> {
    let index = vm.fetch_u16()?;
    let declared = resolved_method(vm, index, false)?;
    let arg_cells = vm.method(declared)?.arg_cells as usize;
    let receiver = peek_receiver(vm, arg_cells)?;
    let receiver_class = vm.obj(receiver)?.class;

    let pool_class = vm.current_class()?;
    let cached = vm.pool(pool_class)?.site_cache(index)?;
    let target = match cached {
        Some((class, method)) if class == receiver_class => method,
        _ => {
            let selected = select_by_receiver(vm, receiver_class, declared)?;
            vm.pool_mut(pool_class)?
                .update_site_cache(index, receiver_class, selected)?;
            selected
        }
    };

    if !op.is_fast_variant() {
        rewrite_opcode(vm, OpCode::INVOKEVIRTUAL_FAST)?;
    }
    vm.invoke_method(target)
}

fn invokespecial(vm: &mut Vm, op: OpCode) -> VmResult<()> {
    let index = vm.fetch_u16()?;
    let target = resolved_method(vm, index, false)?;
    let arg_cells = vm.method(target)?.arg_cells as usize;
    peek_receiver(vm, arg_cells)?;

    if !op.is_fast_variant() {
        rewrite_opcode(vm, OpCode::INVOKESPECIAL_FAST)?;
    }
    vm.invoke_method(target)
}

fn invokestatic(vm: &mut Vm, op: OpCode) -> VmResult<()> {
    let index = vm.fetch_u16()?;
    let target = resolved_method(vm, index, false)?;
    if !vm.method(target)?.is_static() {
        return Err(VmError::throw(
            throwable::INCOMPATIBLE_CLASS_CHANGE,
            "invokestatic on an instance method",
        ));
    }

    if !op.is_fast_variant() {
        if vm.class_needs_init(target.class)? {
            let opcode_ip = vm.frame()?.opcode_ip;
            vm.frame_mut()?.ip = opcode_ip;
            return vm.begin_class_init(target.class);
        }
        rewrite_opcode(vm, OpCode::INVOKESTATIC_FAST)?;
    }
    vm.invoke_method(target)
}

fn invokeinterface(vm: &mut Vm, op: OpCode) -> VmResult<()> {
    let index = vm.fetch_u16()?;
    // The historical count and zero operand bytes; the count is redundant
    // with the resolved descriptor.
    let _count = vm.fetch_u8()?;
    let _zero = vm.fetch_u8()?;

    let declared = resolved_method(vm, index, true)?;
    let arg_cells = vm.method(declared)?.arg_cells as usize;
    let receiver = peek_receiver(vm, arg_cells)?;
    let receiver_class = vm.obj(receiver)?.class;

    // The receiver must actually implement the declaring interface.
    let object = vm.object_class()?;
    if !vm
        .classes
        .is_assignable(receiver_class, declared.class, object)
    {
        return Err(VmError::throw(
            throwable::INCOMPATIBLE_CLASS_CHANGE,
            "receiver does not implement the interface",
        ));
    }

    let pool_class = vm.current_class()?;
    let cached = vm.pool(pool_class)?.site_cache(index)?;
    let target = match cached {
        Some((class, method)) if class == receiver_class => method,
        _ => {
            let selected = select_by_receiver(vm, receiver_class, declared)?;
            vm.pool_mut(pool_class)?
                .update_site_cache(index, receiver_class, selected)?;
            selected
        }
    };

    if !op.is_fast_variant() {
        rewrite_opcode(vm, OpCode::INVOKEINTERFACE_FAST)?;
    }
    vm.invoke_method(target)
}
