//! Array opcodes: element access, `arraylength`, and the allocation
//! family.
//!
//! Every access null-checks the array reference before the bounds check.
//! `aastore` additionally runs the element assignability check: identity
//! and covariant walks both go through the class table.

use super::{pop, pop_i32, pop_ref, push, push_ref, push_i32, rewrite_opcode, JumpTable};
use crate::cell::Cell;
use crate::class::{ArrayElement, ClassId, PrimitiveType};
use crate::error::{throwable, VmError, VmResult};
use crate::object::{ObjRef, ObjectBody};
use crate::op_code::OpCode;
use crate::vm::Vm;

/// Registers the array handlers.
pub fn register_handlers(table: &mut JumpTable) {
    for op in [
        OpCode::IALOAD,
        OpCode::FALOAD,
        OpCode::AALOAD,
        OpCode::BALOAD,
        OpCode::CALOAD,
        OpCode::SALOAD,
    ] {
        table.register(op, load_one);
    }
    table.register(OpCode::LALOAD, load_two);
    table.register(OpCode::DALOAD, load_two);

    for op in [OpCode::IASTORE, OpCode::FASTORE] {
        table.register(op, store_one);
    }
    table.register(OpCode::BASTORE, store_byte);
    table.register(OpCode::CASTORE, store_char);
    table.register(OpCode::SASTORE, store_short);
    table.register(OpCode::LASTORE, store_two);
    table.register(OpCode::DASTORE, store_two);
    table.register(OpCode::AASTORE, aastore);

    table.register(OpCode::ARRAYLENGTH, arraylength);
    table.register(OpCode::NEWARRAY, newarray);
    table.register(OpCode::ANEWARRAY, anewarray);
    table.register(OpCode::ANEWARRAY_FAST, anewarray);
    table.register(OpCode::MULTIANEWARRAY, multianewarray);
    table.register(OpCode::MULTIANEWARRAY_FAST, multianewarray);
}

/// Null check, then bounds check, then the cell offset of element `index`.
fn element_offset(
    vm: &Vm,
    array: ObjRef,
    index: i32,
    element_cells: usize,
) -> VmResult<usize> {
    let object = vm.obj(array)?;
    let length = object
        .array_length()
        .ok_or_else(|| VmError::internal("array opcode on a non-array object"))?;
    if index < 0 || index as u32 >= length {
        return Err(VmError::array_index(index));
    }
    Ok(index as usize * element_cells)
}

fn load_one(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let index = pop_i32(vm)?;
    let array = pop_ref(vm)?;
    let offset = element_offset(vm, array, index, 1)?;
    let value = match &vm.obj(array)?.body {
        ObjectBody::Array { cells, .. } => cells[offset],
        _ => return Err(VmError::internal("array body expected")),
    };
    push(vm, value)
}

fn load_two(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let index = pop_i32(vm)?;
    let array = pop_ref(vm)?;
    let offset = element_offset(vm, array, index, 2)?;
    let (low, high) = match &vm.obj(array)?.body {
        ObjectBody::Array { cells, .. } => (cells[offset], cells[offset + 1]),
        _ => return Err(VmError::internal("array body expected")),
    };
    push(vm, low)?;
    push(vm, high)
}

fn store_cell(vm: &mut Vm, array: ObjRef, offset: usize, value: Cell) -> VmResult<()> {
    match &mut vm.obj_mut(array)?.body {
        ObjectBody::Array { cells, .. } => {
            cells[offset] = value;
            Ok(())
        }
        _ => Err(VmError::internal("array body expected")),
    }
}

fn store_one(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let value = pop(vm)?;
    let index = pop_i32(vm)?;
    let array = pop_ref(vm)?;
    let offset = element_offset(vm, array, index, 1)?;
    store_cell(vm, array, offset, value)
}

/// `bastore` truncates to a signed byte; the cell keeps the sign-extended
/// form so `baload` is a plain copy.
fn store_byte(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let value = pop_i32(vm)?;
    let index = pop_i32(vm)?;
    let array = pop_ref(vm)?;
    let offset = element_offset(vm, array, index, 1)?;
    store_cell(vm, array, offset, value as i8 as i32 as Cell)
}

fn store_char(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let value = pop_i32(vm)?;
    let index = pop_i32(vm)?;
    let array = pop_ref(vm)?;
    let offset = element_offset(vm, array, index, 1)?;
    store_cell(vm, array, offset, value as u16 as Cell)
}

fn store_short(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let value = pop_i32(vm)?;
    let index = pop_i32(vm)?;
    let array = pop_ref(vm)?;
    let offset = element_offset(vm, array, index, 1)?;
    store_cell(vm, array, offset, value as i16 as i32 as Cell)
}

fn store_two(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let high = pop(vm)?;
    let low = pop(vm)?;
    let index = pop_i32(vm)?;
    let array = pop_ref(vm)?;
    let offset = element_offset(vm, array, index, 2)?;
    store_cell(vm, array, offset, low)?;
    store_cell(vm, array, offset + 1, high)
}

fn aastore(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let value = pop_ref(vm)?;
    let index = pop_i32(vm)?;
    let array = pop_ref(vm)?;
    let offset = element_offset(vm, array, index, 1)?;

    if !value.is_null() {
        let array_class = vm.obj(array)?.class;
        let element = vm
            .classes
            .array(array_class)?
            .element;
        let ArrayElement::Class(element_class) = element else {
            return Err(VmError::internal("aastore into a primitive array"));
        };
        let value_class = vm.obj(value)?.class;
        let object = vm.object_class()?;
        if !vm.classes.is_assignable(value_class, element_class, object) {
            return Err(VmError::throw(throwable::ARRAY_STORE, ""));
        }
    }
    store_cell(vm, array, offset, value.0)
}

fn arraylength(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let array = pop_ref(vm)?;
    let length = vm
        .obj(array)?
        .array_length()
        .ok_or_else(|| VmError::internal("arraylength on a non-array object"))?;
    push_i32(vm, length as i32)
}

fn check_length(count: i32) -> VmResult<u32> {
    if count < 0 {
        Err(VmError::throw(
            throwable::NEGATIVE_ARRAY_SIZE,
            count.to_string(),
        ))
    } else {
        Ok(count as u32)
    }
}

fn newarray(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let code = vm.fetch_u8()?;
    let primitive = PrimitiveType::from_newarray_code(code)
        .ok_or_else(|| VmError::internal(format!("newarray type code {code}")))?;
    let length = check_length(pop_i32(vm)?)?;

    let name = format!("[{}", primitive.signature_char());
    let key = vm.intern(&name);
    let class = vm.raw_class_id(key)?;
    let array = vm
        .heap
        .alloc_array(class, length, primitive.element_cells())
        .ok_or_else(|| VmError::throw(throwable::OUT_OF_MEMORY, "heap exhausted"))?;
    push_ref(vm, array)
}

fn anewarray(vm: &mut Vm, op: OpCode) -> VmResult<()> {
    let index = vm.fetch_u16()?;
    let pool_class = vm.current_class()?;
    let component = vm.resolve_pool_class(pool_class, index)?;
    let array_class = vm.array_class_of(component)?;
    if op == OpCode::ANEWARRAY {
        rewrite_opcode(vm, OpCode::ANEWARRAY_FAST)?;
    }

    let length = check_length(pop_i32(vm)?)?;
    let array = vm
        .heap
        .alloc_array(array_class, length, 1)
        .ok_or_else(|| VmError::throw(throwable::OUT_OF_MEMORY, "heap exhausted"))?;
    push_ref(vm, array)
}

fn multianewarray(vm: &mut Vm, op: OpCode) -> VmResult<()> {
    let index = vm.fetch_u16()?;
    let dimensions = vm.fetch_u8()? as usize;
    if dimensions == 0 {
        return Err(VmError::internal("multianewarray with zero dimensions"));
    }
    let pool_class = vm.current_class()?;
    let array_class = vm.resolve_pool_class(pool_class, index)?;
    if op == OpCode::MULTIANEWARRAY {
        rewrite_opcode(vm, OpCode::MULTIANEWARRAY_FAST)?;
    }

    // Counts were pushed outermost first; they pop off reversed.
    let mut counts = vec![0i32; dimensions];
    for slot in (0..dimensions).rev() {
        counts[slot] = pop_i32(vm)?;
    }
    for &count in &counts {
        check_length(count)?;
    }

    let array = allocate_nested(vm, array_class, &counts)?;
    push_ref(vm, array)
}

fn allocate_nested(vm: &mut Vm, array_class: ClassId, counts: &[i32]) -> VmResult<ObjRef> {
    let length = counts[0] as u32;
    let element = vm.classes.array(array_class)?.element;
    let element_cells = match element {
        ArrayElement::Primitive(p) => p.element_cells(),
        ArrayElement::Class(_) => 1,
    };
    let array = vm
        .heap
        .alloc_array(array_class, length, element_cells)
        .ok_or_else(|| VmError::throw(throwable::OUT_OF_MEMORY, "heap exhausted"))?;

    if counts.len() > 1 {
        let ArrayElement::Class(component) = element else {
            return Err(VmError::internal(
                "multianewarray deeper than its element type",
            ));
        };
        for i in 0..length {
            let inner = allocate_nested(vm, component, &counts[1..])?;
            match &mut vm.obj_mut(array)?.body {
                ObjectBody::Array { cells, .. } => cells[i as usize] = inner.0,
                _ => return Err(VmError::internal("array body expected")),
            }
        }
    }
    Ok(array)
}
