//! Constant-pushing opcodes: `nop` through the `ldc` family.

use super::{push_f32, push_f64, push_i32, push_i64, push_ref, JumpTable};
use crate::constant_pool::PoolEntry;
use crate::error::{VmError, VmResult};
use crate::object::ObjRef;
use crate::op_code::OpCode;
use crate::vm::Vm;

/// Registers the constant handlers.
pub fn register_handlers(table: &mut JumpTable) {
    table.register(OpCode::NOP, nop);
    table.register(OpCode::ACONST_NULL, aconst_null);
    for op in [
        OpCode::ICONST_M1,
        OpCode::ICONST_0,
        OpCode::ICONST_1,
        OpCode::ICONST_2,
        OpCode::ICONST_3,
        OpCode::ICONST_4,
        OpCode::ICONST_5,
    ] {
        table.register(op, iconst);
    }
    table.register(OpCode::LCONST_0, lconst);
    table.register(OpCode::LCONST_1, lconst);
    table.register(OpCode::FCONST_0, fconst);
    table.register(OpCode::FCONST_1, fconst);
    table.register(OpCode::FCONST_2, fconst);
    table.register(OpCode::DCONST_0, dconst);
    table.register(OpCode::DCONST_1, dconst);
    table.register(OpCode::BIPUSH, bipush);
    table.register(OpCode::SIPUSH, sipush);
    table.register(OpCode::LDC, ldc);
    table.register(OpCode::LDC_W, ldc_w);
    table.register(OpCode::LDC2_W, ldc2_w);
}

fn nop(_vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    Ok(())
}

fn aconst_null(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    push_ref(vm, ObjRef::NULL)
}

fn iconst(vm: &mut Vm, op: OpCode) -> VmResult<()> {
    push_i32(vm, op as u8 as i32 - OpCode::ICONST_0 as u8 as i32)
}

fn lconst(vm: &mut Vm, op: OpCode) -> VmResult<()> {
    push_i64(vm, (op as u8 - OpCode::LCONST_0 as u8) as i64)
}

fn fconst(vm: &mut Vm, op: OpCode) -> VmResult<()> {
    push_f32(vm, (op as u8 - OpCode::FCONST_0 as u8) as f32)
}

fn dconst(vm: &mut Vm, op: OpCode) -> VmResult<()> {
    push_f64(vm, (op as u8 - OpCode::DCONST_0 as u8) as f64)
}

fn bipush(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let value = vm.fetch_i8()? as i32;
    push_i32(vm, value)
}

fn sipush(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let value = vm.fetch_i16()? as i32;
    push_i32(vm, value)
}

fn ldc(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let index = vm.fetch_u8()? as u16;
    load_single_constant(vm, index)
}

fn ldc_w(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let index = vm.fetch_u16()?;
    load_single_constant(vm, index)
}

/// Pushes an Integer, Float, or String pool constant. The string object is
/// materialised once per slot and cached, so repeated `ldc` of the same
/// entry observes one identity.
fn load_single_constant(vm: &mut Vm, index: u16) -> VmResult<()> {
    let class = vm.current_class()?;
    let entry = vm.pool(class)?.entry(index)?.clone();
    match entry {
        PoolEntry::Integer(value) => push_i32(vm, value),
        PoolEntry::Float(value) => push_f32(vm, value),
        PoolEntry::StringConst { value, object } => {
            let object = match object {
                Some(existing) => existing,
                None => {
                    let text = vm.name(value).to_string();
                    let created = vm.alloc_string_object(&text)?;
                    if let PoolEntry::StringConst { object, .. } =
                        vm.pool_mut(class)?.entry_mut(index)?
                    {
                        *object = Some(created);
                    }
                    created
                }
            };
            push_ref(vm, object)
        }
        other => Err(VmError::internal(format!("ldc of {other:?}"))),
    }
}

fn ldc2_w(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let index = vm.fetch_u16()?;
    let class = vm.current_class()?;
    let entry = vm.pool(class)?.entry(index)?.clone();
    match entry {
        PoolEntry::Long(value) => push_i64(vm, value),
        PoolEntry::Double(value) => push_f64(vm, value),
        other => Err(VmError::internal(format!("ldc2_w of {other:?}"))),
    }
}
