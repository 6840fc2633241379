//! Arithmetic, shifts, logic, conversions, and comparisons.
//!
//! Integer arithmetic is defined modulo 2³² (2⁶⁴ for longs); the only
//! trap is division or remainder by zero. `INT_MIN / -1` is `INT_MIN` and
//! the matching remainder is 0, which is exactly what the wrapping
//! primitives produce. Float-to-int conversions saturate at the integer
//! range and map NaN to 0.

use super::{pop_f32, pop_f64, pop_i32, pop_i64, push_f32, push_f64, push_i32, push_i64, JumpTable};
use crate::error::{throwable, VmError, VmResult};
use crate::op_code::OpCode;
use crate::vm::Vm;

/// Registers the numeric handlers.
pub fn register_handlers(table: &mut JumpTable) {
    table.register(OpCode::IADD, iadd);
    table.register(OpCode::LADD, ladd);
    table.register(OpCode::FADD, fadd);
    table.register(OpCode::DADD, dadd);
    table.register(OpCode::ISUB, isub);
    table.register(OpCode::LSUB, lsub);
    table.register(OpCode::FSUB, fsub);
    table.register(OpCode::DSUB, dsub);
    table.register(OpCode::IMUL, imul);
    table.register(OpCode::LMUL, lmul);
    table.register(OpCode::FMUL, fmul);
    table.register(OpCode::DMUL, dmul);
    table.register(OpCode::IDIV, idiv);
    table.register(OpCode::LDIV, ldiv);
    table.register(OpCode::FDIV, fdiv);
    table.register(OpCode::DDIV, ddiv);
    table.register(OpCode::IREM, irem);
    table.register(OpCode::LREM, lrem);
    table.register(OpCode::FREM, frem);
    table.register(OpCode::DREM, drem);
    table.register(OpCode::INEG, ineg);
    table.register(OpCode::LNEG, lneg);
    table.register(OpCode::FNEG, fneg);
    table.register(OpCode::DNEG, dneg);
    table.register(OpCode::ISHL, ishl);
    table.register(OpCode::LSHL, lshl);
    table.register(OpCode::ISHR, ishr);
    table.register(OpCode::LSHR, lshr);
    table.register(OpCode::IUSHR, iushr);
    table.register(OpCode::LUSHR, lushr);
    table.register(OpCode::IAND, iand);
    table.register(OpCode::LAND, land);
    table.register(OpCode::IOR, ior);
    table.register(OpCode::LOR, lor);
    table.register(OpCode::IXOR, ixor);
    table.register(OpCode::LXOR, lxor);
    table.register(OpCode::I2L, i2l);
    table.register(OpCode::I2F, i2f);
    table.register(OpCode::I2D, i2d);
    table.register(OpCode::L2I, l2i);
    table.register(OpCode::L2F, l2f);
    table.register(OpCode::L2D, l2d);
    table.register(OpCode::F2I, f2i);
    table.register(OpCode::F2L, f2l);
    table.register(OpCode::F2D, f2d);
    table.register(OpCode::D2I, d2i);
    table.register(OpCode::D2L, d2l);
    table.register(OpCode::D2F, d2f);
    table.register(OpCode::I2B, i2b);
    table.register(OpCode::I2C, i2c);
    table.register(OpCode::I2S, i2s);
    table.register(OpCode::LCMP, lcmp);
    table.register(OpCode::FCMPL, fcmpl);
    table.register(OpCode::FCMPG, fcmpg);
    table.register(OpCode::DCMPL, dcmpl);
    table.register(OpCode::DCMPG, dcmpg);
}

fn division_by_zero() -> VmError {
    VmError::throw(throwable::ARITHMETIC, "/ by zero")
}

fn iadd(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_i32(vm)?;
    let a = pop_i32(vm)?;
    push_i32(vm, a.wrapping_add(b))
}

fn ladd(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_i64(vm)?;
    let a = pop_i64(vm)?;
    push_i64(vm, a.wrapping_add(b))
}

fn fadd(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_f32(vm)?;
    let a = pop_f32(vm)?;
    push_f32(vm, a + b)
}

fn dadd(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_f64(vm)?;
    let a = pop_f64(vm)?;
    push_f64(vm, a + b)
}

fn isub(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_i32(vm)?;
    let a = pop_i32(vm)?;
    push_i32(vm, a.wrapping_sub(b))
}

fn lsub(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_i64(vm)?;
    let a = pop_i64(vm)?;
    push_i64(vm, a.wrapping_sub(b))
}

fn fsub(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_f32(vm)?;
    let a = pop_f32(vm)?;
    push_f32(vm, a - b)
}

fn dsub(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_f64(vm)?;
    let a = pop_f64(vm)?;
    push_f64(vm, a - b)
}

fn imul(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_i32(vm)?;
    let a = pop_i32(vm)?;
    push_i32(vm, a.wrapping_mul(b))
}

fn lmul(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_i64(vm)?;
    let a = pop_i64(vm)?;
    push_i64(vm, a.wrapping_mul(b))
}

fn fmul(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_f32(vm)?;
    let a = pop_f32(vm)?;
    push_f32(vm, a * b)
}

fn dmul(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_f64(vm)?;
    let a = pop_f64(vm)?;
    push_f64(vm, a * b)
}

fn idiv(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_i32(vm)?;
    let a = pop_i32(vm)?;
    if b == 0 {
        return Err(division_by_zero());
    }
    push_i32(vm, a.wrapping_div(b))
}

fn ldiv(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_i64(vm)?;
    let a = pop_i64(vm)?;
    if b == 0 {
        return Err(division_by_zero());
    }
    push_i64(vm, a.wrapping_div(b))
}

fn fdiv(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_f32(vm)?;
    let a = pop_f32(vm)?;
    push_f32(vm, a / b)
}

fn ddiv(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_f64(vm)?;
    let a = pop_f64(vm)?;
    push_f64(vm, a / b)
}

fn irem(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_i32(vm)?;
    let a = pop_i32(vm)?;
    if b == 0 {
        return Err(division_by_zero());
    }
    push_i32(vm, a.wrapping_rem(b))
}

fn lrem(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_i64(vm)?;
    let a = pop_i64(vm)?;
    if b == 0 {
        return Err(division_by_zero());
    }
    push_i64(vm, a.wrapping_rem(b))
}

fn frem(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_f32(vm)?;
    let a = pop_f32(vm)?;
    push_f32(vm, a % b)
}

fn drem(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_f64(vm)?;
    let a = pop_f64(vm)?;
    push_f64(vm, a % b)
}

fn ineg(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let a = pop_i32(vm)?;
    push_i32(vm, a.wrapping_neg())
}

fn lneg(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let a = pop_i64(vm)?;
    push_i64(vm, a.wrapping_neg())
}

fn fneg(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let a = pop_f32(vm)?;
    push_f32(vm, -a)
}

fn dneg(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let a = pop_f64(vm)?;
    push_f64(vm, -a)
}

// Shift counts mask by 0x1F on int and 0x3F on long.

fn ishl(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let count = pop_i32(vm)? & 0x1F;
    let a = pop_i32(vm)?;
    push_i32(vm, a.wrapping_shl(count as u32))
}

fn lshl(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let count = pop_i32(vm)? & 0x3F;
    let a = pop_i64(vm)?;
    push_i64(vm, a.wrapping_shl(count as u32))
}

fn ishr(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let count = pop_i32(vm)? & 0x1F;
    let a = pop_i32(vm)?;
    push_i32(vm, a.wrapping_shr(count as u32))
}

fn lshr(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let count = pop_i32(vm)? & 0x3F;
    let a = pop_i64(vm)?;
    push_i64(vm, a.wrapping_shr(count as u32))
}

fn iushr(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let count = pop_i32(vm)? & 0x1F;
    let a = pop_i32(vm)?;
    push_i32(vm, ((a as u32) >> count) as i32)
}

fn lushr(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let count = pop_i32(vm)? & 0x3F;
    let a = pop_i64(vm)?;
    push_i64(vm, ((a as u64) >> count) as i64)
}

fn iand(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_i32(vm)?;
    let a = pop_i32(vm)?;
    push_i32(vm, a & b)
}

fn land(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_i64(vm)?;
    let a = pop_i64(vm)?;
    push_i64(vm, a & b)
}

fn ior(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_i32(vm)?;
    let a = pop_i32(vm)?;
    push_i32(vm, a | b)
}

fn lor(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_i64(vm)?;
    let a = pop_i64(vm)?;
    push_i64(vm, a | b)
}

fn ixor(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_i32(vm)?;
    let a = pop_i32(vm)?;
    push_i32(vm, a ^ b)
}

fn lxor(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_i64(vm)?;
    let a = pop_i64(vm)?;
    push_i64(vm, a ^ b)
}

// Conversions. Rust's saturating float-to-int casts implement the clamp
// and NaN-to-zero rules directly.

fn i2l(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let a = pop_i32(vm)?;
    push_i64(vm, a as i64)
}

fn i2f(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let a = pop_i32(vm)?;
    push_f32(vm, a as f32)
}

fn i2d(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let a = pop_i32(vm)?;
    push_f64(vm, a as f64)
}

fn l2i(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let a = pop_i64(vm)?;
    push_i32(vm, a as i32)
}

fn l2f(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let a = pop_i64(vm)?;
    push_f32(vm, a as f32)
}

fn l2d(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let a = pop_i64(vm)?;
    push_f64(vm, a as f64)
}

fn f2i(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let a = pop_f32(vm)?;
    push_i32(vm, a as i32)
}

fn f2l(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let a = pop_f32(vm)?;
    push_i64(vm, a as i64)
}

fn f2d(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let a = pop_f32(vm)?;
    push_f64(vm, a as f64)
}

fn d2i(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let a = pop_f64(vm)?;
    push_i32(vm, a as i32)
}

fn d2l(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let a = pop_f64(vm)?;
    push_i64(vm, a as i64)
}

fn d2f(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let a = pop_f64(vm)?;
    push_f32(vm, a as f32)
}

fn i2b(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let a = pop_i32(vm)?;
    push_i32(vm, a as i8 as i32)
}

fn i2c(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let a = pop_i32(vm)?;
    push_i32(vm, a as u16 as i32)
}

fn i2s(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let a = pop_i32(vm)?;
    push_i32(vm, a as i16 as i32)
}

fn lcmp(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_i64(vm)?;
    let a = pop_i64(vm)?;
    push_i32(vm, (a.cmp(&b)) as i32)
}

fn float_compare(a: f32, b: f32, nan_result: i32) -> i32 {
    match a.partial_cmp(&b) {
        Some(ordering) => ordering as i32,
        None => nan_result,
    }
}

fn double_compare(a: f64, b: f64, nan_result: i32) -> i32 {
    match a.partial_cmp(&b) {
        Some(ordering) => ordering as i32,
        None => nan_result,
    }
}

fn fcmpl(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_f32(vm)?;
    let a = pop_f32(vm)?;
    push_i32(vm, float_compare(a, b, -1))
}

fn fcmpg(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_f32(vm)?;
    let a = pop_f32(vm)?;
    push_i32(vm, float_compare(a, b, 1))
}

fn dcmpl(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_f64(vm)?;
    let a = pop_f64(vm)?;
    push_i32(vm, double_compare(a, b, -1))
}

fn dcmpg(vm: &mut Vm, _op: OpCode) -> VmResult<()> {
    let b = pop_f64(vm)?;
    let a = pop_f64(vm)?;
    push_i32(vm, double_compare(a, b, 1))
}
