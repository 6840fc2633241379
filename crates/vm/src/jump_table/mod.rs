//! Opcode dispatch.
//!
//! A fixed 256-entry table of handler functions; fast-variant opcodes live
//! in the same table, so the hot path never branches on "fast or slow".
//! Families register themselves at table construction, which happens once
//! behind a `Lazy`.

pub mod array_ops;
pub mod control_ops;
pub mod invoke;
pub mod numeric;
pub mod object_ops;
pub mod push;
pub mod slot;
pub mod stack;

use once_cell::sync::Lazy;

use crate::cell::Cell;
use crate::error::{VmError, VmResult};
use crate::object::ObjRef;
use crate::op_code::OpCode;
use crate::vm::Vm;

/// A handler for one opcode. Operand fetch and `ip` advancement are the
/// handler's responsibility; `opcode_ip` was recorded by the dispatch loop.
pub type OpHandler = fn(&mut Vm, OpCode) -> VmResult<()>;

/// The dispatch table.
pub struct JumpTable {
    handlers: [Option<OpHandler>; 256],
}

impl JumpTable {
    /// Builds the table with every family registered.
    pub fn new() -> Self {
        let mut table = Self {
            handlers: [None; 256],
        };
        push::register_handlers(&mut table);
        slot::register_handlers(&mut table);
        stack::register_handlers(&mut table);
        numeric::register_handlers(&mut table);
        control_ops::register_handlers(&mut table);
        array_ops::register_handlers(&mut table);
        object_ops::register_handlers(&mut table);
        invoke::register_handlers(&mut table);
        table
    }

    /// Registers a handler for an opcode.
    pub fn register(&mut self, opcode: OpCode, handler: OpHandler) {
        self.handlers[opcode as usize] = Some(handler);
    }

    /// Looks up the handler for an opcode.
    pub fn get(&self, opcode: OpCode) -> Option<OpHandler> {
        self.handlers[opcode as usize]
    }
}

impl Default for JumpTable {
    fn default() -> Self {
        Self::new()
    }
}

static TABLE: Lazy<JumpTable> = Lazy::new(JumpTable::new);

/// Dispatches one opcode through the shared table.
pub fn dispatch(vm: &mut Vm, opcode: OpCode) -> VmResult<()> {
    match TABLE.get(opcode) {
        Some(handler) => handler(vm, opcode),
        None => Err(VmError::internal(format!(
            "no handler for opcode {}",
            opcode.mnemonic()
        ))),
    }
}

// ----- shared stack helpers ---------------------------------------------
//
// The verifier guarantees operand depth, so underflow here is a VM bug and
// surfaces as a fatal error, never as a program-visible exception.

pub(crate) fn underflow() -> VmError {
    VmError::internal("operand stack underflow")
}

pub(crate) fn pop(vm: &mut Vm) -> VmResult<Cell> {
    vm.frame_mut()?.pop().ok_or_else(underflow)
}

pub(crate) fn pop_i32(vm: &mut Vm) -> VmResult<i32> {
    vm.frame_mut()?.pop_i32().ok_or_else(underflow)
}

pub(crate) fn pop_i64(vm: &mut Vm) -> VmResult<i64> {
    vm.frame_mut()?.pop_i64().ok_or_else(underflow)
}

pub(crate) fn pop_f32(vm: &mut Vm) -> VmResult<f32> {
    vm.frame_mut()?.pop_f32().ok_or_else(underflow)
}

pub(crate) fn pop_f64(vm: &mut Vm) -> VmResult<f64> {
    vm.frame_mut()?.pop_f64().ok_or_else(underflow)
}

pub(crate) fn pop_ref(vm: &mut Vm) -> VmResult<ObjRef> {
    vm.frame_mut()?.pop_ref().ok_or_else(underflow)
}

pub(crate) fn push(vm: &mut Vm, value: Cell) -> VmResult<()> {
    vm.frame_mut()?.push(value);
    Ok(())
}

pub(crate) fn push_i32(vm: &mut Vm, value: i32) -> VmResult<()> {
    vm.frame_mut()?.push_i32(value);
    Ok(())
}

pub(crate) fn push_i64(vm: &mut Vm, value: i64) -> VmResult<()> {
    vm.frame_mut()?.push_i64(value);
    Ok(())
}

pub(crate) fn push_f32(vm: &mut Vm, value: f32) -> VmResult<()> {
    vm.frame_mut()?.push_f32(value);
    Ok(())
}

pub(crate) fn push_f64(vm: &mut Vm, value: f64) -> VmResult<()> {
    vm.frame_mut()?.push_f64(value);
    Ok(())
}

pub(crate) fn push_ref(vm: &mut Vm, value: ObjRef) -> VmResult<()> {
    vm.frame_mut()?.push_ref(value);
    Ok(())
}

/// Rewrites the opcode at the current frame's `opcode_ip` to its fast
/// variant. Rewriting never leaves the fast-variant family of the original
/// opcode.
pub(crate) fn rewrite_opcode(vm: &mut Vm, fast: OpCode) -> VmResult<()> {
    debug_assert!(fast.is_fast_variant());
    let (method, opcode_ip) = {
        let frame = vm.frame()?;
        (frame.method, frame.opcode_ip)
    };
    let body = vm
        .method_mut(method)?
        .bytecode_mut()
        .ok_or_else(|| VmError::internal("rewriting a body-less method"))?;
    debug_assert_eq!(
        OpCode::from_byte(body.code[opcode_ip]).map(|op| op.mnemonic()),
        Some(fast.slow_equivalent().mnemonic())
    );
    body.code[opcode_ip] = fast as u8;
    log::trace!("rewrite: {} at {}", fast.mnemonic(), opcode_ip);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_interpreted_opcode_has_a_handler() {
        let table = JumpTable::new();
        for byte in 0u16..=255 {
            let Some(op) = OpCode::from_byte(byte as u8) else {
                continue;
            };
            // The subroutine opcodes are rejected by the verifier and the
            // custom-code opcode is handled before dispatch.
            if op.is_subroutine_op() || op == OpCode::CUSTOMCODE {
                assert!(table.get(op).is_none(), "{} should be absent", op.mnemonic());
            } else {
                assert!(table.get(op).is_some(), "{} lacks a handler", op.mnemonic());
            }
        }
    }
}
