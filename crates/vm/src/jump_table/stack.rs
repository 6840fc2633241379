//! Operand-stack shuffling: `pop` through `swap`.
//!
//! These operate on raw cells; `dup2` and friends do not care whether the
//! two cells are one long or two ints.

use super::{pop, push, JumpTable};
use crate::error::VmResult;
use crate::op_code::OpCode;
use crate::vm::Vm;

/// Registers the stack-manipulation handlers.
pub fn register_handlers(table: &mut JumpTable) {
    table.register(OpCode::POP, pop_one);
    table.register(OpCode::POP2, pop_two);
    table.register(OpCode::DUP, dup);
    table.register(OpCode::DUP_X1, dup_x1);
    table.register(OpCode::DUP_X2, dup_x2);
    table.register(OpCode::DUP2, dup2);
    table.register(OpCode::DUP2_X1, dup2_x1);
    table.register(OpCode::DUP2_X2, dup2_x2);
    table.register(OpCode::SWAP, swap);
}

fn pop_one(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    pop(vm)?;
    Ok(())
}

fn pop_two(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    pop(vm)?;
    pop(vm)?;
    Ok(())
}

fn dup(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let a = pop(vm)?;
    push(vm, a)?;
    push(vm, a)
}

fn dup_x1(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let a = pop(vm)?;
    let b = pop(vm)?;
    push(vm, a)?;
    push(vm, b)?;
    push(vm, a)
}

fn dup_x2(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let a = pop(vm)?;
    let b = pop(vm)?;
    let c = pop(vm)?;
    push(vm, a)?;
    push(vm, c)?;
    push(vm, b)?;
    push(vm, a)
}

fn dup2(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let a = pop(vm)?;
    let b = pop(vm)?;
    push(vm, b)?;
    push(vm, a)?;
    push(vm, b)?;
    push(vm, a)
}

fn dup2_x1(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let a = pop(vm)?;
    let b = pop(vm)?;
    let c = pop(vm)?;
    push(vm, b)?;
    push(vm, a)?;
    push(vm, c)?;
    push(vm, b)?;
    push(vm, a)
}

fn dup2_x2(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let a = pop(vm)?;
    let b = pop(vm)?;
    let c = pop(vm)?;
    let d = pop(vm)?;
    push(vm, b)?;
    push(vm, a)?;
    push(vm, d)?;
    push(vm, c)?;
    push(vm, b)?;
    push(vm, a)
}

fn swap(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let a = pop(vm)?;
    let b = pop(vm)?;
    push(vm, a)?;
    push(vm, b)
}
