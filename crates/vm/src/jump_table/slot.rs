//! Local-variable opcodes: loads, stores, `iinc`, and the `wide` prefix.
//!
//! At runtime cells are untyped, so `iload`/`fload`/`aload` are one copy
//! and `lload`/`dload` are two; the verifier already proved the types.

use super::{pop, JumpTable};
use crate::error::{VmError, VmResult};
use crate::op_code::OpCode;
use crate::vm::Vm;

/// Registers the local-variable handlers.
pub fn register_handlers(table: &mut JumpTable) {
    for op in [OpCode::ILOAD, OpCode::FLOAD, OpCode::ALOAD] {
        table.register(op, load_one_indexed);
    }
    for op in [OpCode::LLOAD, OpCode::DLOAD] {
        table.register(op, load_two_indexed);
    }
    for op in [OpCode::ISTORE, OpCode::FSTORE, OpCode::ASTORE] {
        table.register(op, store_one_indexed);
    }
    for op in [OpCode::LSTORE, OpCode::DSTORE] {
        table.register(op, store_two_indexed);
    }

    for op in [
        OpCode::ILOAD_0,
        OpCode::ILOAD_1,
        OpCode::ILOAD_2,
        OpCode::ILOAD_3,
    ] {
        table.register(op, |vm, op| load_one(vm, (op as u8 - OpCode::ILOAD_0 as u8) as usize));
    }
    for op in [
        OpCode::LLOAD_0,
        OpCode::LLOAD_1,
        OpCode::LLOAD_2,
        OpCode::LLOAD_3,
    ] {
        table.register(op, |vm, op| load_two(vm, (op as u8 - OpCode::LLOAD_0 as u8) as usize));
    }
    for op in [
        OpCode::FLOAD_0,
        OpCode::FLOAD_1,
        OpCode::FLOAD_2,
        OpCode::FLOAD_3,
    ] {
        table.register(op, |vm, op| load_one(vm, (op as u8 - OpCode::FLOAD_0 as u8) as usize));
    }
    for op in [
        OpCode::DLOAD_0,
        OpCode::DLOAD_1,
        OpCode::DLOAD_2,
        OpCode::DLOAD_3,
    ] {
        table.register(op, |vm, op| load_two(vm, (op as u8 - OpCode::DLOAD_0 as u8) as usize));
    }
    for op in [
        OpCode::ALOAD_0,
        OpCode::ALOAD_1,
        OpCode::ALOAD_2,
        OpCode::ALOAD_3,
    ] {
        table.register(op, |vm, op| load_one(vm, (op as u8 - OpCode::ALOAD_0 as u8) as usize));
    }

    for op in [
        OpCode::ISTORE_0,
        OpCode::ISTORE_1,
        OpCode::ISTORE_2,
        OpCode::ISTORE_3,
    ] {
        table.register(op, |vm, op| store_one(vm, (op as u8 - OpCode::ISTORE_0 as u8) as usize));
    }
    for op in [
        OpCode::LSTORE_0,
        OpCode::LSTORE_1,
        OpCode::LSTORE_2,
        OpCode::LSTORE_3,
    ] {
        table.register(op, |vm, op| store_two(vm, (op as u8 - OpCode::LSTORE_0 as u8) as usize));
    }
    for op in [
        OpCode::FSTORE_0,
        OpCode::FSTORE_1,
        OpCode::FSTORE_2,
        OpCode::FSTORE_3,
    ] {
        table.register(op, |vm, op| store_one(vm, (op as u8 - OpCode::FSTORE_0 as u8) as usize));
    }
    for op in [
        OpCode::DSTORE_0,
        OpCode::DSTORE_1,
        OpCode::DSTORE_2,
        OpCode::DSTORE_3,
    ] {
        table.register(op, |vm, op| store_two(vm, (op as u8 - OpCode::DSTORE_0 as u8) as usize));
    }
    for op in [
        OpCode::ASTORE_0,
        OpCode::ASTORE_1,
        OpCode::ASTORE_2,
        OpCode::ASTORE_3,
    ] {
        table.register(op, |vm, op| store_one(vm, (op as u8 - OpCode::ASTORE_0 as u8) as usize));
    }

    table.register(OpCode::IINC, iinc);
    table.register(OpCode::WIDE, wide);
}

fn bad_local(index: usize) -> VmError {
    VmError::internal(format!("local slot {index} out of range"))
}

fn load_one(vm: &mut Vm, index: usize) -> VmResult<()> {
    let frame = vm.frame_mut()?;
    let value = frame.local(index).ok_or_else(|| bad_local(index))?;
    frame.push(value);
    Ok(())
}

fn load_two(vm: &mut Vm, index: usize) -> VmResult<()> {
    let frame = vm.frame_mut()?;
    let low = frame.local(index).ok_or_else(|| bad_local(index))?;
    let high = frame.local(index + 1).ok_or_else(|| bad_local(index + 1))?;
    frame.push(low);
    frame.push(high);
    Ok(())
}

fn store_one(vm: &mut Vm, index: usize) -> VmResult<()> {
    let value = pop(vm)?;
    if !vm.frame_mut()?.set_local(index, value) {
        return Err(bad_local(index));
    }
    Ok(())
}

fn store_two(vm: &mut Vm, index: usize) -> VmResult<()> {
    let high = pop(vm)?;
    let low = pop(vm)?;
    let frame = vm.frame_mut()?;
    if !frame.set_local(index, low) || !frame.set_local(index + 1, high) {
        return Err(bad_local(index));
    }
    Ok(())
}

fn load_one_indexed(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let index = vm.fetch_u8()? as usize;
    load_one(vm, index)
}

fn load_two_indexed(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let index = vm.fetch_u8()? as usize;
    load_two(vm, index)
}

fn store_one_indexed(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let index = vm.fetch_u8()? as usize;
    store_one(vm, index)
}

fn store_two_indexed(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let index = vm.fetch_u8()? as usize;
    store_two(vm, index)
}

fn iinc(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let index = vm.fetch_u8()? as usize;
    let delta = vm.fetch_i8()? as i32;
    increment_local(vm, index, delta)
}

fn increment_local(vm: &mut Vm, index: usize, delta: i32) -> VmResult<()> {
    let frame = vm.frame_mut()?;
    let value = frame.local(index).ok_or_else(|| bad_local(index))? as i32;
    frame.set_local(index, value.wrapping_add(delta) as u32);
    Ok(())
}

/// The `wide` prefix widens the local index of the following load, store,
/// or `iinc` to 16 bits.
fn wide(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let widened = vm.fetch_u8()?;
    let widened = OpCode::from_byte(widened)
        .ok_or_else(|| VmError::internal(format!("wide over unassigned opcode {widened:#04x}")))?;
    let index = vm.fetch_u16()? as usize;
    match widened {
        OpCode::ILOAD | OpCode::FLOAD | OpCode::ALOAD => load_one(vm, index),
        OpCode::LLOAD | OpCode::DLOAD => load_two(vm, index),
        OpCode::ISTORE | OpCode::FSTORE | OpCode::ASTORE => store_one(vm, index),
        OpCode::LSTORE | OpCode::DSTORE => store_two(vm, index),
        OpCode::IINC => {
            let delta = vm.fetch_i16()? as i32;
            increment_local(vm, index, delta)
        }
        other => Err(VmError::internal(format!(
            "wide over {}",
            other.mnemonic()
        ))),
    }
}
