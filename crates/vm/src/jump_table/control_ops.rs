//! Branches, switches, returns, and `athrow`.
//!
//! Branch offsets are relative to the first byte of the branching opcode;
//! handlers fetch their operands first so the instruction is fully
//! consumed before the target replaces `ip`.

use super::{pop_i32, pop_ref, JumpTable};
use crate::error::{VmError, VmResult};
use crate::op_code::OpCode;
use crate::vm::Vm;

/// Registers the control-flow handlers.
pub fn register_handlers(table: &mut JumpTable) {
    table.register(OpCode::IFEQ, if_zero);
    table.register(OpCode::IFNE, if_zero);
    table.register(OpCode::IFLT, if_zero);
    table.register(OpCode::IFGE, if_zero);
    table.register(OpCode::IFGT, if_zero);
    table.register(OpCode::IFLE, if_zero);
    table.register(OpCode::IF_ICMPEQ, if_icmp);
    table.register(OpCode::IF_ICMPNE, if_icmp);
    table.register(OpCode::IF_ICMPLT, if_icmp);
    table.register(OpCode::IF_ICMPGE, if_icmp);
    table.register(OpCode::IF_ICMPGT, if_icmp);
    table.register(OpCode::IF_ICMPLE, if_icmp);
    table.register(OpCode::IF_ACMPEQ, if_acmp);
    table.register(OpCode::IF_ACMPNE, if_acmp);
    table.register(OpCode::IFNULL, if_null);
    table.register(OpCode::IFNONNULL, if_null);
    table.register(OpCode::GOTO, goto);
    table.register(OpCode::GOTO_W, goto_w);
    table.register(OpCode::TABLESWITCH, tableswitch);
    table.register(OpCode::LOOKUPSWITCH, lookupswitch);
    table.register(OpCode::IRETURN, return_one);
    table.register(OpCode::FRETURN, return_one);
    table.register(OpCode::ARETURN, return_one);
    table.register(OpCode::LRETURN, return_two);
    table.register(OpCode::DRETURN, return_two);
    table.register(OpCode::RETURN, return_void);
    table.register(OpCode::ATHROW, athrow);
}

/// Transfers control to `opcode_ip + offset`.
fn branch(vm: &mut Vm, offset: i32) -> VmResult<()> {
    let (method, opcode_ip) = {
        let frame = vm.frame()?;
        (frame.method, frame.opcode_ip)
    };
    let target = opcode_ip as i64 + offset as i64;
    let code_len = vm.bytecode(method)?.code.len() as i64;
    if target < 0 || target >= code_len {
        return Err(VmError::internal(format!(
            "branch target {target} outside {code_len}-byte method"
        )));
    }
    vm.frame_mut()?.ip = target as usize;
    Ok(())
}

fn if_zero(vm: &mut Vm, op: OpCode) -> VmResult<()> {
    let offset = vm.fetch_i16()? as i32;
    let value = pop_i32(vm)?;
    let taken = match op {
        OpCode::IFEQ => value == 0,
        OpCode::IFNE => value != 0,
        OpCode::IFLT => value < 0,
        OpCode::IFGE => value >= 0,
        OpCode::IFGT => value > 0,
        _ => value <= 0,
    };
    if taken {
        branch(vm, offset)?;
    }
    Ok(())
}

fn if_icmp(vm: &mut Vm, op: OpCode) -> VmResult<()> {
    let offset = vm.fetch_i16()? as i32;
    let b = pop_i32(vm)?;
    let a = pop_i32(vm)?;
    let taken = match op {
        OpCode::IF_ICMPEQ => a == b,
        OpCode::IF_ICMPNE => a != b,
        OpCode::IF_ICMPLT => a < b,
        OpCode::IF_ICMPGE => a >= b,
        OpCode::IF_ICMPGT => a > b,
        _ => a <= b,
    };
    if taken {
        branch(vm, offset)?;
    }
    Ok(())
}

fn if_acmp(vm: &mut Vm, op: OpCode) -> VmResult<()> {
    let offset = vm.fetch_i16()? as i32;
    let b = pop_ref(vm)?;
    let a = pop_ref(vm)?;
    let taken = if op == OpCode::IF_ACMPEQ {
        a == b
    } else {
        a != b
    };
    if taken {
        branch(vm, offset)?;
    }
    Ok(())
}

fn if_null(vm: &mut Vm, op: OpCode) -> VmResult<()> {
    let offset = vm.fetch_i16()? as i32;
    let value = pop_ref(vm)?;
    let taken = if op == OpCode::IFNULL {
        value.is_null()
    } else {
        !value.is_null()
    };
    if taken {
        branch(vm, offset)?;
    }
    Ok(())
}

fn goto(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let offset = vm.fetch_i16()? as i32;
    branch(vm, offset)
}

fn goto_w(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let offset = vm.fetch_i32()?;
    branch(vm, offset)
}

/// Skips the alignment padding after a switch opcode: the next operand
/// starts at the next 4-byte boundary of the code array.
fn align_switch(vm: &mut Vm) -> VmResult<()> {
    let ip = vm.frame()?.ip;
    let padded = (ip + 3) & !3;
    for _ in ip..padded {
        vm.fetch_u8()?;
    }
    Ok(())
}

fn tableswitch(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    align_switch(vm)?;
    let default = vm.fetch_i32()?;
    let low = vm.fetch_i32()?;
    let high = vm.fetch_i32()?;
    if low > high {
        return Err(VmError::internal("tableswitch with low > high"));
    }
    let count = (high as i64 - low as i64 + 1) as usize;
    let mut offsets = Vec::with_capacity(count);
    for _ in 0..count {
        offsets.push(vm.fetch_i32()?);
    }
    let value = pop_i32(vm)?;
    let offset = if value < low || value > high {
        default
    } else {
        offsets[(value - low) as usize]
    };
    branch(vm, offset)
}

fn lookupswitch(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    align_switch(vm)?;
    let default = vm.fetch_i32()?;
    let npairs = vm.fetch_i32()?;
    if npairs < 0 {
        return Err(VmError::internal("lookupswitch with negative pair count"));
    }
    let mut pairs = Vec::with_capacity(npairs as usize);
    for _ in 0..npairs {
        let key = vm.fetch_i32()?;
        let offset = vm.fetch_i32()?;
        pairs.push((key, offset));
    }
    let value = pop_i32(vm)?;
    let offset = pairs
        .binary_search_by_key(&value, |&(key, _)| key)
        .map(|i| pairs[i].1)
        .unwrap_or(default);
    branch(vm, offset)
}

fn return_one(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    vm.do_return(1)
}

fn return_two(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    vm.do_return(2)
}

fn return_void(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    vm.do_return(0)
}

fn athrow(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let exception = pop_ref(vm)?;
    if exception.is_null() {
        return Err(VmError::null_pointer());
    }
    let class = vm.obj(exception)?.class;
    let class_name = vm.class_name_text(class);
    Err(VmError::rethrow(&class_name, exception.0))
}
