//! The per-method abstract interpreter.
//!
//! Simulation runs forward over the bytecode once. At every offset that
//! carries a recorded map the derived state is matched against it (when
//! control can fall into the offset) and then replaced by it, possibly
//! weakening; branch targets and exception-handler entries must carry a
//! map and accept the derived state. Uninitialised references may not
//! survive a backward branch, and every `NewObject` a map mentions must
//! name an offset where the simulator actually saw a `new`.

use mjvm_classfile::descriptor::{
    parse_field_type, parse_method_descriptor, BaseType, FieldType, MethodDescriptor,
};
use mjvm_classfile::{ExceptionHandler, MethodFlags};

use crate::class::{ArrayElement, Class, ClassId, PrimitiveType};
use crate::constant_pool::PoolEntry;
use crate::error::{VmError, VmResult};
use crate::method::MethodId;
use crate::op_code::OpCode;
use crate::vm::Vm;

use super::stack_map::{map_at, RecordedMap};
use super::types::VType;

/// The fixed set of verification failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyFailure {
    StackOverflow,
    StackUnderflow,
    ExpectCategory1,
    StackBadType,
    LocalsOverflow,
    LocalsBadType,
    TargetBadType,
    BackBranchUninit,
    SeqBadType,
    ExpectClass,
    ExpectThrowable,
    BadLookupSwitch,
    BadLdc,
    BaloadBadType,
    AaloadBadType,
    BastoreBadType,
    AastoreBadType,
    FieldBadType,
    ArgsBadType,
    ExpectNew,
    ExpectUninit,
    BadInstruction,
    ExpectArray,
    MultiANewArray,
    ExpectNoReturnValue,
    ReturnValueBadType,
    ExpectReturnValue,
    ReturnUninitThis,
    BadStackMap,
    FallThrough,
    ExpectZero,
    NargsMismatch,
    BadInitCall,
    MiddleOfByteCode,
    BadNewOffset,
}

impl VerifyFailure {
    fn message(self) -> &'static str {
        match self {
            VerifyFailure::StackOverflow => "stack overflow",
            VerifyFailure::StackUnderflow => "stack underflow",
            VerifyFailure::ExpectCategory1 => "expected a category 1 value",
            VerifyFailure::StackBadType => "bad type on stack",
            VerifyFailure::LocalsOverflow => "too many locals",
            VerifyFailure::LocalsBadType => "bad type in local",
            VerifyFailure::TargetBadType => "branch target state mismatch",
            VerifyFailure::BackBranchUninit => "uninitialized object on backward branch",
            VerifyFailure::SeqBadType => "unreachable code without a stack map",
            VerifyFailure::ExpectClass => "expected a class constant",
            VerifyFailure::ExpectThrowable => "catch type is not throwable",
            VerifyFailure::BadLookupSwitch => "malformed lookupswitch",
            VerifyFailure::BadLdc => "bad ldc constant",
            VerifyFailure::BaloadBadType => "baload on a non-byte array",
            VerifyFailure::AaloadBadType => "aaload on a non-reference array",
            VerifyFailure::BastoreBadType => "bastore into a non-byte array",
            VerifyFailure::AastoreBadType => "aastore of an incompatible value",
            VerifyFailure::FieldBadType => "field access type mismatch",
            VerifyFailure::ArgsBadType => "argument type mismatch",
            VerifyFailure::ExpectNew => "expected a new instruction",
            VerifyFailure::ExpectUninit => "expected an uninitialized object",
            VerifyFailure::BadInstruction => "illegal instruction",
            VerifyFailure::ExpectArray => "expected an array",
            VerifyFailure::MultiANewArray => "multianewarray dimension mismatch",
            VerifyFailure::ExpectNoReturnValue => "expected no return value",
            VerifyFailure::ReturnValueBadType => "bad return value type",
            VerifyFailure::ExpectReturnValue => "expected a return value",
            VerifyFailure::ReturnUninitThis => "constructor returns before this is initialized",
            VerifyFailure::BadStackMap => "bad stack map",
            VerifyFailure::FallThrough => "execution falls off the end of the code",
            VerifyFailure::ExpectZero => "expected a zero operand byte",
            VerifyFailure::NargsMismatch => "invokeinterface count mismatch",
            VerifyFailure::BadInitCall => "illegal constructor call",
            VerifyFailure::MiddleOfByteCode => "branch into the middle of an instruction",
            VerifyFailure::BadNewOffset => "stack map names a bad new offset",
        }
    }
}

/// Verifies one method. The caller guarantees a bytecode body.
pub(crate) fn verify_method(vm: &mut Vm, method: MethodId) -> VmResult<()> {
    let mut sim = Sim::new(vm, method)?;
    sim.run(vm)
}

struct Sim {
    this_class: ClassId,
    class_name: String,
    method_name: String,
    flags: MethodFlags,
    descriptor: MethodDescriptor,
    code: Vec<u8>,
    handlers: Vec<ExceptionHandler>,
    maps: Vec<RecordedMap>,
    max_stack: usize,
    frame_cells: usize,
    locals: Vec<VType>,
    stack: Vec<VType>,
    /// The receiver of `<init>` still holds `InitObject`.
    need_init: bool,
    /// Control can fall into the instruction about to be simulated.
    reachable: bool,
    /// Offsets at which a `new` opcode was observed.
    new_sites: Vec<bool>,
    object: ClassId,
    throwable: ClassId,
    string: ClassId,
}

impl Sim {
    fn new(vm: &mut Vm, method: MethodId) -> VmResult<Self> {
        let this_class = method.class;
        let class_name = vm.class_name_text(this_class);
        let (method_name, flags, descriptor_text) = {
            let m = vm.method(method)?;
            (
                vm.name(m.name).to_string(),
                m.flags,
                vm.name(m.descriptor).to_string(),
            )
        };
        let descriptor = parse_method_descriptor(&descriptor_text)
            .map_err(|_| VmError::verify_error(&class_name, "bad descriptor"))?;
        let (code, handlers, maps, max_stack, frame_cells) = {
            let body = vm.bytecode(method)?;
            let maps = match &body.stack_maps {
                crate::method::StackMaps::Verifier(maps) => maps.clone(),
                crate::method::StackMaps::Absent => Vec::new(),
                crate::method::StackMaps::Pointer(_) => {
                    return Err(VmError::internal("re-verifying a verified method"))
                }
            };
            (
                body.code.clone(),
                body.handlers.clone(),
                maps,
                body.max_stack as usize,
                body.frame_cells as usize,
            )
        };

        let object_key = vm.known.object_name;
        let throwable_key = vm.known.throwable_name;
        let string_key = vm.known.string_name;
        let object = vm.raw_class_id(object_key)?;
        let throwable = vm.raw_class_id(throwable_key)?;
        let string = vm.raw_class_id(string_key)?;

        let code_len = code.len();
        let mut sim = Self {
            this_class,
            class_name,
            method_name,
            flags,
            descriptor,
            code,
            handlers,
            maps,
            max_stack,
            frame_cells,
            locals: vec![VType::Bogus; frame_cells],
            stack: Vec::new(),
            need_init: false,
            reachable: true,
            new_sites: vec![false; code_len],
            object,
            throwable,
            string,
        };
        sim.init_locals(vm)?;
        Ok(sim)
    }

    fn fail(&self, failure: VerifyFailure) -> VmError {
        VmError::verify_error(
            &self.class_name,
            &format!("{} in {}", failure.message(), self.method_name),
        )
    }

    /// Locals start from the descriptor; the receiver of `<init>` is the
    /// not-yet-initialised object.
    fn init_locals(&mut self, vm: &mut Vm) -> VmResult<()> {
        let mut index = 0usize;
        if !self.flags.contains(MethodFlags::STATIC) {
            if index >= self.frame_cells {
                return Err(self.fail(VerifyFailure::LocalsOverflow));
            }
            self.locals[index] = if self.method_name == "<init>" && self.this_class != self.object {
                self.need_init = true;
                VType::InitObject
            } else {
                VType::Reference(self.this_class)
            };
            index += 1;
        }
        let parameters = self.descriptor.parameters.clone();
        for parameter in &parameters {
            let slots = self.vtype_of(vm, parameter)?;
            for slot in slots {
                if index >= self.frame_cells {
                    return Err(self.fail(VerifyFailure::LocalsOverflow));
                }
                self.locals[index] = slot;
                index += 1;
            }
        }
        Ok(())
    }

    /// Converts a parsed field type into its slot tags.
    fn vtype_of(&self, vm: &mut Vm, field_type: &FieldType) -> VmResult<Vec<VType>> {
        if field_type.dimensions > 0 {
            let mut name = "[".repeat(field_type.dimensions);
            match &field_type.base {
                BaseType::Object(class_name) => {
                    name.push('L');
                    name.push_str(class_name);
                    name.push(';');
                }
                BaseType::Byte => name.push('B'),
                BaseType::Char => name.push('C'),
                BaseType::Double => name.push('D'),
                BaseType::Float => name.push('F'),
                BaseType::Int => name.push('I'),
                BaseType::Long => name.push('J'),
                BaseType::Short => name.push('S'),
                BaseType::Boolean => name.push('Z'),
            }
            let key = vm.intern(&name);
            return Ok(vec![VType::Reference(vm.raw_class_id(key)?)]);
        }
        Ok(match &field_type.base {
            BaseType::Byte
            | BaseType::Char
            | BaseType::Int
            | BaseType::Short
            | BaseType::Boolean => vec![VType::Integer],
            BaseType::Float => vec![VType::Float],
            BaseType::Long => vec![VType::Long, VType::Long2],
            BaseType::Double => vec![VType::Double, VType::Double2],
            BaseType::Object(class_name) => {
                let key = vm.intern(class_name);
                vec![VType::Reference(vm.raw_class_id(key)?)]
            }
        })
    }

    // ----- assignability ------------------------------------------------

    /// `from ≤ to` under the merge rule: identical values, null into any
    /// reference, everything into Bogus, and reference hierarchy walks
    /// with interfaces weakened to always-accept.
    fn assignable(&self, vm: &mut Vm, from: VType, to: VType) -> VmResult<bool> {
        if to == VType::Bogus || from == to {
            return Ok(true);
        }
        match (from, to) {
            (VType::Null, VType::Reference(_)) => Ok(true),
            (VType::Reference(a), VType::Reference(b)) => self.ref_assignable(vm, a, b),
            _ => Ok(false),
        }
    }

    fn ref_assignable(&self, vm: &mut Vm, a: ClassId, b: ClassId) -> VmResult<bool> {
        if a == b || b == self.object {
            return Ok(true);
        }
        // Interface targets accept any reference; the merge rule trades
        // interface intersection algebra for runtime checks.
        if vm.classes.class(b).as_instance().is_some() {
            vm.load_instance_class(b)?;
            if vm.classes.class(b).is_interface() {
                return Ok(true);
            }
        }
        match (vm.classes.class(a), vm.classes.class(b)) {
            (Class::Array(x), Class::Array(y)) => match (x.element, y.element) {
                (ArrayElement::Primitive(p), ArrayElement::Primitive(q)) => Ok(p == q),
                (ArrayElement::Class(p), ArrayElement::Class(q)) => self.ref_assignable(vm, p, q),
                _ => Ok(false),
            },
            (Class::Array(_), Class::Instance(_)) => Ok(false),
            (Class::Instance(_), _) => {
                vm.ensure_linked(a)?;
                Ok(vm.classes.is_assignable(a, b, self.object))
            }
        }
    }

    // ----- stack and locals ---------------------------------------------

    fn push(&mut self, value: VType) -> VmResult<()> {
        if self.stack.len() >= self.max_stack {
            return Err(self.fail(VerifyFailure::StackOverflow));
        }
        self.stack.push(value);
        Ok(())
    }

    fn push_two(&mut self, head: VType) -> VmResult<()> {
        let second = if head == VType::Long {
            VType::Long2
        } else {
            VType::Double2
        };
        self.push(head)?;
        self.push(second)
    }

    fn pop_raw(&mut self) -> VmResult<VType> {
        self.stack
            .pop()
            .ok_or_else(|| self.fail(VerifyFailure::StackUnderflow))
    }

    /// Pops one slot that must be assignable to `expected`.
    fn pop_expect(&mut self, vm: &mut Vm, expected: VType) -> VmResult<VType> {
        let found = self.pop_raw()?;
        if !self.assignable(vm, found, expected)? {
            return Err(self.fail(VerifyFailure::StackBadType));
        }
        Ok(found)
    }

    /// Pops a two-word value of the given head tag.
    fn pop_two(&mut self, head: VType) -> VmResult<()> {
        let second = self.pop_raw()?;
        let first = self.pop_raw()?;
        let expected_second = if head == VType::Long {
            VType::Long2
        } else {
            VType::Double2
        };
        if first != head || second != expected_second {
            return Err(self.fail(VerifyFailure::StackBadType));
        }
        Ok(())
    }

    /// Pops any initialised reference or null.
    fn pop_object(&mut self) -> VmResult<VType> {
        let found = self.pop_raw()?;
        match found {
            VType::Null | VType::Reference(_) => Ok(found),
            _ => Err(self.fail(VerifyFailure::StackBadType)),
        }
    }

    /// Pops any reference-like value, initialised or not.
    fn pop_any_reference(&mut self) -> VmResult<VType> {
        let found = self.pop_raw()?;
        if found.is_reference_kind() {
            Ok(found)
        } else {
            Err(self.fail(VerifyFailure::StackBadType))
        }
    }

    fn local(&self, index: usize) -> VmResult<VType> {
        self.locals
            .get(index)
            .copied()
            .ok_or_else(|| self.fail(VerifyFailure::LocalsOverflow))
    }

    /// Writes a local slot, dissolving any two-word value it overlaps.
    fn set_local(&mut self, index: usize, value: VType) -> VmResult<()> {
        if index >= self.frame_cells {
            return Err(self.fail(VerifyFailure::LocalsOverflow));
        }
        if index > 0 && self.locals[index - 1].is_two_word_head() {
            self.locals[index - 1] = VType::Bogus;
        }
        if self.locals[index].is_two_word_head() && index + 1 < self.frame_cells {
            self.locals[index + 1] = VType::Bogus;
        }
        self.locals[index] = value;
        Ok(())
    }

    fn set_local_two(&mut self, index: usize, head: VType) -> VmResult<()> {
        let second = if head == VType::Long {
            VType::Long2
        } else {
            VType::Double2
        };
        if index + 1 >= self.frame_cells {
            return Err(self.fail(VerifyFailure::LocalsOverflow));
        }
        self.set_local(index, head)?;
        self.set_local(index + 1, second)
    }

    /// Every two-word head must be followed by its second word.
    fn validate_pairing(&self) -> VmResult<()> {
        let mut index = 0;
        while index < self.stack.len() {
            let slot = self.stack[index];
            if slot.is_two_word_head() {
                let second = if slot == VType::Long {
                    VType::Long2
                } else {
                    VType::Double2
                };
                if self.stack.get(index + 1) != Some(&second) {
                    return Err(self.fail(VerifyFailure::ExpectCategory1));
                }
                index += 2;
            } else if slot.is_second_word() {
                return Err(self.fail(VerifyFailure::ExpectCategory1));
            } else {
                index += 1;
            }
        }
        Ok(())
    }

    // ----- stack-map interaction ----------------------------------------

    /// Checks the derived state against `map` slot by slot. Locals beyond
    /// the map's vector are Bogus in the map, so anything matches there;
    /// the stack depth must agree exactly.
    fn check_against(&self, vm: &mut Vm, map: &RecordedMap) -> VmResult<()> {
        if map.locals.len() > self.frame_cells {
            return Err(self.fail(VerifyFailure::LocalsOverflow));
        }
        for (index, &recorded) in map.locals.iter().enumerate() {
            if !self.assignable(vm, self.locals[index], recorded)? {
                return Err(self.fail(VerifyFailure::TargetBadType));
            }
        }
        if map.stack.len() != self.stack.len() {
            return Err(self.fail(VerifyFailure::TargetBadType));
        }
        for (index, &recorded) in map.stack.iter().enumerate() {
            if !self.assignable(vm, self.stack[index], recorded)? {
                return Err(self.fail(VerifyFailure::TargetBadType));
            }
        }
        Ok(())
    }

    /// Replaces the derived state with the recorded one (MERGE), after
    /// checking when control falls in from above.
    fn merge_with_map(&mut self, vm: &mut Vm, map: &RecordedMap, check: bool) -> VmResult<()> {
        if check {
            self.check_against(vm, map)?;
        }
        if map.stack.len() > self.max_stack || map.locals.len() > self.frame_cells {
            return Err(self.fail(VerifyFailure::BadStackMap));
        }
        for index in 0..self.frame_cells {
            self.locals[index] = map.locals.get(index).copied().unwrap_or(VType::Bogus);
        }
        self.stack = map.stack.clone();
        Ok(())
    }

    /// A branch from `from` to `target`: the target must carry a map that
    /// accepts the current state, and a backward branch must not carry an
    /// uninitialised object.
    fn check_target(&self, vm: &mut Vm, from: usize, target: i64) -> VmResult<()> {
        if target < 0 || target as usize >= self.code.len() {
            return Err(self.fail(VerifyFailure::MiddleOfByteCode));
        }
        if target as usize <= from {
            let uninit = self
                .locals
                .iter()
                .chain(self.stack.iter())
                .any(|t| matches!(t, VType::NewObject { .. }));
            if uninit {
                return Err(self.fail(VerifyFailure::BackBranchUninit));
            }
        }
        let Some(map) = map_at(&self.maps, target as u16) else {
            return Err(self.fail(VerifyFailure::TargetBadType));
        };
        self.check_against(vm, &map.clone())
    }

    // ----- operand reading ----------------------------------------------

    fn read_u8(&self, ip: &mut usize) -> VmResult<u8> {
        let byte = *self
            .code
            .get(*ip)
            .ok_or_else(|| self.fail(VerifyFailure::MiddleOfByteCode))?;
        *ip += 1;
        Ok(byte)
    }

    fn read_u16(&self, ip: &mut usize) -> VmResult<u16> {
        let high = self.read_u8(ip)? as u16;
        let low = self.read_u8(ip)? as u16;
        Ok((high << 8) | low)
    }

    fn read_i16(&self, ip: &mut usize) -> VmResult<i16> {
        Ok(self.read_u16(ip)? as i16)
    }

    fn read_i32(&self, ip: &mut usize) -> VmResult<i32> {
        let high = self.read_u16(ip)? as u32;
        let low = self.read_u16(ip)? as u32;
        Ok(((high << 16) | low) as i32)
    }

    // ----- pool access --------------------------------------------------

    fn pool_entry(&self, vm: &Vm, index: u16) -> VmResult<PoolEntry> {
        Ok(vm.pool(self.this_class)?.entry(index)?.clone())
    }

    fn pool_class_id(&self, vm: &mut Vm, index: u16) -> VmResult<ClassId> {
        let name = match self.pool_entry(vm, index)? {
            PoolEntry::Class { name, .. } => name,
            _ => return Err(self.fail(VerifyFailure::ExpectClass)),
        };
        vm.raw_class_id(name)
    }

    // ----- main loop ------------------------------------------------------

    fn run(&mut self, vm: &mut Vm) -> VmResult<()> {
        let code_len = self.code.len();
        let mut ip = 0usize;

        while ip < code_len {
            if let Some(map) = map_at(&self.maps, ip as u16).cloned() {
                let check = self.reachable;
                self.merge_with_map(vm, &map, check)?;
                self.reachable = true;
            } else if !self.reachable {
                return Err(self.fail(VerifyFailure::SeqBadType));
            }

            self.check_handlers_at(vm, ip)?;

            let op_start = ip;
            let byte = self.read_u8(&mut ip)?;
            let op = OpCode::from_byte(byte)
                .filter(|op| !op.is_fast_variant() && *op != OpCode::CUSTOMCODE)
                .ok_or_else(|| self.fail(VerifyFailure::BadInstruction))?;
            if op.is_subroutine_op() {
                return Err(self.fail(VerifyFailure::BadInstruction));
            }
            self.simulate(vm, op, op_start, &mut ip)?;
        }

        if ip != code_len {
            return Err(self.fail(VerifyFailure::MiddleOfByteCode));
        }
        if self.reachable {
            return Err(self.fail(VerifyFailure::FallThrough));
        }

        // Cross-method obligation: every NewObject a map mentions must be
        // an offset where the simulator saw a `new`.
        for map in &self.maps {
            for slot in map.locals.iter().chain(map.stack.iter()) {
                if let VType::NewObject { pc } = slot {
                    if !self.new_sites.get(*pc as usize).copied().unwrap_or(false) {
                        return Err(self.fail(VerifyFailure::BadNewOffset));
                    }
                }
            }
        }
        Ok(())
    }

    /// For every handler whose range covers `ip`: the handler entry must
    /// carry a map accepting the current locals with a stack of exactly
    /// the caught exception.
    fn check_handlers_at(&mut self, vm: &mut Vm, ip: usize) -> VmResult<()> {
        if !self.reachable {
            return Ok(());
        }
        let handlers = self.handlers.clone();
        for handler in handlers {
            if (ip as u16) < handler.start_pc || (ip as u16) >= handler.end_pc {
                continue;
            }
            let catch = if handler.catch_type == 0 {
                self.throwable
            } else {
                let id = self.pool_class_id(vm, handler.catch_type)?;
                if !self.ref_assignable(vm, id, self.throwable)? {
                    return Err(self.fail(VerifyFailure::ExpectThrowable));
                }
                id
            };
            let Some(map) = map_at(&self.maps, handler.handler_pc).cloned() else {
                return Err(self.fail(VerifyFailure::TargetBadType));
            };

            let saved = std::mem::replace(&mut self.stack, vec![VType::Reference(catch)]);
            let result = self.check_against(vm, &map);
            self.stack = saved;
            result?;
        }
        Ok(())
    }

    /// One opcode's transfer function. `ip` has consumed the opcode byte;
    /// operands are read through it.
    fn simulate(&mut self, vm: &mut Vm, op: OpCode, op_start: usize, ip: &mut usize) -> VmResult<()> {
        use OpCode::*;
        match op {
            NOP => {}

            ACONST_NULL => self.push(VType::Null)?,
            ICONST_M1 | ICONST_0 | ICONST_1 | ICONST_2 | ICONST_3 | ICONST_4 | ICONST_5 => {
                self.push(VType::Integer)?
            }
            LCONST_0 | LCONST_1 => self.push_two(VType::Long)?,
            FCONST_0 | FCONST_1 | FCONST_2 => self.push(VType::Float)?,
            DCONST_0 | DCONST_1 => self.push_two(VType::Double)?,
            BIPUSH => {
                self.read_u8(ip)?;
                self.push(VType::Integer)?;
            }
            SIPUSH => {
                self.read_u16(ip)?;
                self.push(VType::Integer)?;
            }

            LDC | LDC_W => {
                let index = if op == LDC {
                    self.read_u8(ip)? as u16
                } else {
                    self.read_u16(ip)?
                };
                match self.pool_entry(vm, index)? {
                    PoolEntry::Integer(_) => self.push(VType::Integer)?,
                    PoolEntry::Float(_) => self.push(VType::Float)?,
                    PoolEntry::StringConst { .. } => self.push(VType::Reference(self.string))?,
                    _ => return Err(self.fail(VerifyFailure::BadLdc)),
                }
            }
            LDC2_W => {
                let index = self.read_u16(ip)?;
                match self.pool_entry(vm, index)? {
                    PoolEntry::Long(_) => self.push_two(VType::Long)?,
                    PoolEntry::Double(_) => self.push_two(VType::Double)?,
                    _ => return Err(self.fail(VerifyFailure::BadLdc)),
                }
            }

            ILOAD | FLOAD | ALOAD | LLOAD | DLOAD => {
                let index = self.read_u8(ip)? as usize;
                self.load_local(op, index)?;
            }
            ILOAD_0 | ILOAD_1 | ILOAD_2 | ILOAD_3 => {
                self.load_local(ILOAD, (op as u8 - ILOAD_0 as u8) as usize)?
            }
            LLOAD_0 | LLOAD_1 | LLOAD_2 | LLOAD_3 => {
                self.load_local(LLOAD, (op as u8 - LLOAD_0 as u8) as usize)?
            }
            FLOAD_0 | FLOAD_1 | FLOAD_2 | FLOAD_3 => {
                self.load_local(FLOAD, (op as u8 - FLOAD_0 as u8) as usize)?
            }
            DLOAD_0 | DLOAD_1 | DLOAD_2 | DLOAD_3 => {
                self.load_local(DLOAD, (op as u8 - DLOAD_0 as u8) as usize)?
            }
            ALOAD_0 | ALOAD_1 | ALOAD_2 | ALOAD_3 => {
                self.load_local(ALOAD, (op as u8 - ALOAD_0 as u8) as usize)?
            }

            ISTORE | FSTORE | ASTORE | LSTORE | DSTORE => {
                let index = self.read_u8(ip)? as usize;
                self.store_local(vm, op, index)?;
            }
            ISTORE_0 | ISTORE_1 | ISTORE_2 | ISTORE_3 => {
                self.store_local(vm, ISTORE, (op as u8 - ISTORE_0 as u8) as usize)?
            }
            LSTORE_0 | LSTORE_1 | LSTORE_2 | LSTORE_3 => {
                self.store_local(vm, LSTORE, (op as u8 - LSTORE_0 as u8) as usize)?
            }
            FSTORE_0 | FSTORE_1 | FSTORE_2 | FSTORE_3 => {
                self.store_local(vm, FSTORE, (op as u8 - FSTORE_0 as u8) as usize)?
            }
            DSTORE_0 | DSTORE_1 | DSTORE_2 | DSTORE_3 => {
                self.store_local(vm, DSTORE, (op as u8 - DSTORE_0 as u8) as usize)?
            }
            ASTORE_0 | ASTORE_1 | ASTORE_2 | ASTORE_3 => {
                self.store_local(vm, ASTORE, (op as u8 - ASTORE_0 as u8) as usize)?
            }

            WIDE => {
                let widened = self.read_u8(ip)?;
                let widened = OpCode::from_byte(widened)
                    .ok_or_else(|| self.fail(VerifyFailure::BadInstruction))?;
                let index = self.read_u16(ip)? as usize;
                match widened {
                    ILOAD | FLOAD | ALOAD | LLOAD | DLOAD => self.load_local(widened, index)?,
                    ISTORE | FSTORE | ASTORE | LSTORE | DSTORE => {
                        self.store_local(vm, widened, index)?
                    }
                    IINC => {
                        self.read_i16(ip)?;
                        if self.local(index)? != VType::Integer {
                            return Err(self.fail(VerifyFailure::LocalsBadType));
                        }
                    }
                    _ => return Err(self.fail(VerifyFailure::BadInstruction)),
                }
            }

            IINC => {
                let index = self.read_u8(ip)? as usize;
                self.read_u8(ip)?;
                if self.local(index)? != VType::Integer {
                    return Err(self.fail(VerifyFailure::LocalsBadType));
                }
            }

            IALOAD | BALOAD | CALOAD | SALOAD => {
                self.pop_expect(vm, VType::Integer)?;
                let array = self.pop_object()?;
                let ok = match op {
                    IALOAD => self.is_primitive_array(vm, array, &[PrimitiveType::Int]),
                    BALOAD => self.is_primitive_array(
                        vm,
                        array,
                        &[PrimitiveType::Byte, PrimitiveType::Boolean],
                    ),
                    CALOAD => self.is_primitive_array(vm, array, &[PrimitiveType::Char]),
                    _ => self.is_primitive_array(vm, array, &[PrimitiveType::Short]),
                };
                if !ok {
                    return Err(self.fail(VerifyFailure::BaloadBadType));
                }
                self.push(VType::Integer)?;
            }
            LALOAD | DALOAD => {
                self.pop_expect(vm, VType::Integer)?;
                let array = self.pop_object()?;
                let (primitive, head) = if op == LALOAD {
                    (PrimitiveType::Long, VType::Long)
                } else {
                    (PrimitiveType::Double, VType::Double)
                };
                if !self.is_primitive_array(vm, array, &[primitive]) {
                    return Err(self.fail(VerifyFailure::StackBadType));
                }
                self.push_two(head)?;
            }
            FALOAD => {
                self.pop_expect(vm, VType::Integer)?;
                let array = self.pop_object()?;
                if !self.is_primitive_array(vm, array, &[PrimitiveType::Float]) {
                    return Err(self.fail(VerifyFailure::StackBadType));
                }
                self.push(VType::Float)?;
            }
            AALOAD => {
                self.pop_expect(vm, VType::Integer)?;
                let array = self.pop_object()?;
                let element = match array {
                    VType::Null => VType::Null,
                    VType::Reference(id) => match vm.classes.class(id) {
                        Class::Array(a) => match a.element {
                            ArrayElement::Class(c) => VType::Reference(c),
                            ArrayElement::Primitive(_) => {
                                return Err(self.fail(VerifyFailure::AaloadBadType))
                            }
                        },
                        _ => return Err(self.fail(VerifyFailure::AaloadBadType)),
                    },
                    _ => return Err(self.fail(VerifyFailure::AaloadBadType)),
                };
                self.push(element)?;
            }

            IASTORE | BASTORE | CASTORE | SASTORE => {
                self.pop_expect(vm, VType::Integer)?;
                self.pop_expect(vm, VType::Integer)?;
                let array = self.pop_object()?;
                let ok = match op {
                    IASTORE => self.is_primitive_array(vm, array, &[PrimitiveType::Int]),
                    BASTORE => self.is_primitive_array(
                        vm,
                        array,
                        &[PrimitiveType::Byte, PrimitiveType::Boolean],
                    ),
                    CASTORE => self.is_primitive_array(vm, array, &[PrimitiveType::Char]),
                    _ => self.is_primitive_array(vm, array, &[PrimitiveType::Short]),
                };
                if !ok {
                    return Err(self.fail(VerifyFailure::BastoreBadType));
                }
            }
            LASTORE | DASTORE => {
                let (head, primitive) = if op == LASTORE {
                    (VType::Long, PrimitiveType::Long)
                } else {
                    (VType::Double, PrimitiveType::Double)
                };
                self.pop_two(head)?;
                self.pop_expect(vm, VType::Integer)?;
                let array = self.pop_object()?;
                if !self.is_primitive_array(vm, array, &[primitive]) {
                    return Err(self.fail(VerifyFailure::StackBadType));
                }
            }
            FASTORE => {
                self.pop_expect(vm, VType::Float)?;
                self.pop_expect(vm, VType::Integer)?;
                let array = self.pop_object()?;
                if !self.is_primitive_array(vm, array, &[PrimitiveType::Float]) {
                    return Err(self.fail(VerifyFailure::StackBadType));
                }
            }
            AASTORE => {
                let value = self.pop_object()?;
                self.pop_expect(vm, VType::Integer)?;
                let array = self.pop_object()?;
                match array {
                    VType::Null => {}
                    VType::Reference(id) => match vm.classes.class(id) {
                        Class::Array(a) => match a.element {
                            ArrayElement::Class(element) => {
                                if !self.assignable(vm, value, VType::Reference(element))? {
                                    return Err(self.fail(VerifyFailure::AastoreBadType));
                                }
                            }
                            ArrayElement::Primitive(_) => {
                                return Err(self.fail(VerifyFailure::AastoreBadType))
                            }
                        },
                        _ => return Err(self.fail(VerifyFailure::AastoreBadType)),
                    },
                    _ => return Err(self.fail(VerifyFailure::AastoreBadType)),
                }
            }

            POP => {
                let top = self.pop_raw()?;
                if top.is_second_word() || top.is_two_word_head() {
                    return Err(self.fail(VerifyFailure::ExpectCategory1));
                }
            }
            POP2 => {
                self.pop_raw()?;
                self.pop_raw()?;
                self.validate_pairing()?;
            }
            DUP => {
                let top = self.pop_raw()?;
                if top.is_second_word() || top.is_two_word_head() {
                    return Err(self.fail(VerifyFailure::ExpectCategory1));
                }
                self.push(top)?;
                self.push(top)?;
            }
            DUP_X1 | DUP_X2 | DUP2 | DUP2_X1 | DUP2_X2 | SWAP => {
                self.shuffle(op)?;
            }

            IADD | ISUB | IMUL | IDIV | IREM | IAND | IOR | IXOR | ISHL | ISHR | IUSHR => {
                self.pop_expect(vm, VType::Integer)?;
                self.pop_expect(vm, VType::Integer)?;
                self.push(VType::Integer)?;
            }
            INEG | I2B | I2C | I2S => {
                self.pop_expect(vm, VType::Integer)?;
                self.push(VType::Integer)?;
            }
            LADD | LSUB | LMUL | LDIV | LREM | LAND | LOR | LXOR => {
                self.pop_two(VType::Long)?;
                self.pop_two(VType::Long)?;
                self.push_two(VType::Long)?;
            }
            LSHL | LSHR | LUSHR => {
                self.pop_expect(vm, VType::Integer)?;
                self.pop_two(VType::Long)?;
                self.push_two(VType::Long)?;
            }
            LNEG => {
                self.pop_two(VType::Long)?;
                self.push_two(VType::Long)?;
            }
            FADD | FSUB | FMUL | FDIV | FREM => {
                self.pop_expect(vm, VType::Float)?;
                self.pop_expect(vm, VType::Float)?;
                self.push(VType::Float)?;
            }
            FNEG => {
                self.pop_expect(vm, VType::Float)?;
                self.push(VType::Float)?;
            }
            DADD | DSUB | DMUL | DDIV | DREM => {
                self.pop_two(VType::Double)?;
                self.pop_two(VType::Double)?;
                self.push_two(VType::Double)?;
            }
            DNEG => {
                self.pop_two(VType::Double)?;
                self.push_two(VType::Double)?;
            }

            I2L => {
                self.pop_expect(vm, VType::Integer)?;
                self.push_two(VType::Long)?;
            }
            I2F => {
                self.pop_expect(vm, VType::Integer)?;
                self.push(VType::Float)?;
            }
            I2D => {
                self.pop_expect(vm, VType::Integer)?;
                self.push_two(VType::Double)?;
            }
            L2I => {
                self.pop_two(VType::Long)?;
                self.push(VType::Integer)?;
            }
            L2F => {
                self.pop_two(VType::Long)?;
                self.push(VType::Float)?;
            }
            L2D => {
                self.pop_two(VType::Long)?;
                self.push_two(VType::Double)?;
            }
            F2I => {
                self.pop_expect(vm, VType::Float)?;
                self.push(VType::Integer)?;
            }
            F2L => {
                self.pop_expect(vm, VType::Float)?;
                self.push_two(VType::Long)?;
            }
            F2D => {
                self.pop_expect(vm, VType::Float)?;
                self.push_two(VType::Double)?;
            }
            D2I => {
                self.pop_two(VType::Double)?;
                self.push(VType::Integer)?;
            }
            D2L => {
                self.pop_two(VType::Double)?;
                self.push_two(VType::Long)?;
            }
            D2F => {
                self.pop_two(VType::Double)?;
                self.push(VType::Float)?;
            }

            LCMP => {
                self.pop_two(VType::Long)?;
                self.pop_two(VType::Long)?;
                self.push(VType::Integer)?;
            }
            FCMPL | FCMPG => {
                self.pop_expect(vm, VType::Float)?;
                self.pop_expect(vm, VType::Float)?;
                self.push(VType::Integer)?;
            }
            DCMPL | DCMPG => {
                self.pop_two(VType::Double)?;
                self.pop_two(VType::Double)?;
                self.push(VType::Integer)?;
            }

            IFEQ | IFNE | IFLT | IFGE | IFGT | IFLE => {
                let offset = self.read_i16(ip)? as i64;
                self.pop_expect(vm, VType::Integer)?;
                self.check_target(vm, op_start, op_start as i64 + offset)?;
            }
            IF_ICMPEQ | IF_ICMPNE | IF_ICMPLT | IF_ICMPGE | IF_ICMPGT | IF_ICMPLE => {
                let offset = self.read_i16(ip)? as i64;
                self.pop_expect(vm, VType::Integer)?;
                self.pop_expect(vm, VType::Integer)?;
                self.check_target(vm, op_start, op_start as i64 + offset)?;
            }
            IF_ACMPEQ | IF_ACMPNE => {
                let offset = self.read_i16(ip)? as i64;
                self.pop_object()?;
                self.pop_object()?;
                self.check_target(vm, op_start, op_start as i64 + offset)?;
            }
            IFNULL | IFNONNULL => {
                let offset = self.read_i16(ip)? as i64;
                self.pop_object()?;
                self.check_target(vm, op_start, op_start as i64 + offset)?;
            }
            GOTO => {
                let offset = self.read_i16(ip)? as i64;
                self.check_target(vm, op_start, op_start as i64 + offset)?;
                self.reachable = false;
            }
            GOTO_W => {
                let offset = self.read_i32(ip)? as i64;
                self.check_target(vm, op_start, op_start as i64 + offset)?;
                self.reachable = false;
            }

            TABLESWITCH => {
                while *ip % 4 != 0 {
                    self.read_u8(ip)?;
                }
                let default = self.read_i32(ip)? as i64;
                let low = self.read_i32(ip)?;
                let high = self.read_i32(ip)?;
                if low > high {
                    return Err(self.fail(VerifyFailure::BadLookupSwitch));
                }
                self.pop_expect(vm, VType::Integer)?;
                self.check_target(vm, op_start, op_start as i64 + default)?;
                for _ in 0..(high as i64 - low as i64 + 1) {
                    let offset = self.read_i32(ip)? as i64;
                    self.check_target(vm, op_start, op_start as i64 + offset)?;
                }
                self.reachable = false;
            }
            LOOKUPSWITCH => {
                while *ip % 4 != 0 {
                    self.read_u8(ip)?;
                }
                let default = self.read_i32(ip)? as i64;
                let npairs = self.read_i32(ip)?;
                if npairs < 0 {
                    return Err(self.fail(VerifyFailure::BadLookupSwitch));
                }
                self.pop_expect(vm, VType::Integer)?;
                self.check_target(vm, op_start, op_start as i64 + default)?;
                let mut previous: Option<i32> = None;
                for _ in 0..npairs {
                    let key = self.read_i32(ip)?;
                    if previous.is_some_and(|p| p >= key) {
                        return Err(self.fail(VerifyFailure::BadLookupSwitch));
                    }
                    previous = Some(key);
                    let offset = self.read_i32(ip)? as i64;
                    self.check_target(vm, op_start, op_start as i64 + offset)?;
                }
                self.reachable = false;
            }

            IRETURN => self.check_return(vm, Some(VType::Integer))?,
            FRETURN => self.check_return(vm, Some(VType::Float))?,
            LRETURN => self.check_return(vm, Some(VType::Long))?,
            DRETURN => self.check_return(vm, Some(VType::Double))?,
            ARETURN => {
                let Some(return_type) = self.descriptor.return_type.clone() else {
                    return Err(self.fail(VerifyFailure::ExpectNoReturnValue));
                };
                if !return_type.is_reference() {
                    return Err(self.fail(VerifyFailure::ReturnValueBadType));
                }
                let expected = self.vtype_of(vm, &return_type)?[0];
                let value = self.pop_object()?;
                if !self.assignable(vm, value, expected)? {
                    return Err(self.fail(VerifyFailure::ReturnValueBadType));
                }
                self.reachable = false;
            }
            RETURN => {
                if self.descriptor.return_type.is_some() {
                    return Err(self.fail(VerifyFailure::ExpectReturnValue));
                }
                if self.need_init {
                    return Err(self.fail(VerifyFailure::ReturnUninitThis));
                }
                self.reachable = false;
            }

            GETSTATIC | PUTSTATIC | GETFIELD | PUTFIELD => {
                let index = self.read_u16(ip)?;
                self.simulate_field_access(vm, op, index)?;
            }

            INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE => {
                let index = self.read_u16(ip)?;
                let (count, zero) = if op == INVOKEINTERFACE {
                    (self.read_u8(ip)?, self.read_u8(ip)?)
                } else {
                    (0, 0)
                };
                self.simulate_invoke(vm, op, op_start, index, count, zero)?;
            }

            NEW => {
                let index = self.read_u16(ip)?;
                let name = match self.pool_entry(vm, index)? {
                    PoolEntry::Class { name, .. } => name,
                    _ => return Err(self.fail(VerifyFailure::ExpectClass)),
                };
                if vm.name(name).starts_with('[') {
                    return Err(self.fail(VerifyFailure::ExpectClass));
                }
                self.new_sites[op_start] = true;
                self.push(VType::NewObject {
                    pc: op_start as u16,
                })?;
            }
            NEWARRAY => {
                let code = self.read_u8(ip)?;
                let primitive = PrimitiveType::from_newarray_code(code)
                    .ok_or_else(|| self.fail(VerifyFailure::BadInstruction))?;
                self.pop_expect(vm, VType::Integer)?;
                let name = format!("[{}", primitive.signature_char());
                let key = vm.intern(&name);
                let id = vm.raw_class_id(key)?;
                self.push(VType::Reference(id))?;
            }
            ANEWARRAY => {
                let index = self.read_u16(ip)?;
                let component = self.pool_class_id(vm, index)?;
                self.pop_expect(vm, VType::Integer)?;
                let array = vm.array_class_of(component)?;
                self.push(VType::Reference(array))?;
            }
            MULTIANEWARRAY => {
                let index = self.read_u16(ip)?;
                let dimensions = self.read_u8(ip)? as usize;
                let array = self.pool_class_id(vm, index)?;
                let depth = match vm.classes.class(array) {
                    Class::Array(a) => a.dimensions as usize,
                    _ => 0,
                };
                if dimensions == 0 || depth < dimensions {
                    return Err(self.fail(VerifyFailure::MultiANewArray));
                }
                for _ in 0..dimensions {
                    self.pop_expect(vm, VType::Integer)?;
                }
                self.push(VType::Reference(array))?;
            }
            ARRAYLENGTH => {
                let array = self.pop_object()?;
                let is_array = matches!(array, VType::Null)
                    || matches!(array, VType::Reference(id)
                        if vm.classes.class(id).is_array());
                if !is_array {
                    return Err(self.fail(VerifyFailure::ExpectArray));
                }
                self.push(VType::Integer)?;
            }

            CHECKCAST => {
                let index = self.read_u16(ip)?;
                let target = self.pool_class_id(vm, index)?;
                self.pop_object()?;
                self.push(VType::Reference(target))?;
            }
            INSTANCEOF => {
                let index = self.read_u16(ip)?;
                self.pool_class_id(vm, index)?;
                self.pop_object()?;
                self.push(VType::Integer)?;
            }

            ATHROW => {
                let thrown = self.pop_object()?;
                if !self.assignable(vm, thrown, VType::Reference(self.throwable))? {
                    return Err(self.fail(VerifyFailure::ExpectThrowable));
                }
                self.reachable = false;
            }

            MONITORENTER | MONITOREXIT => {
                self.pop_object()?;
            }

            JSR | RET | JSR_W => return Err(self.fail(VerifyFailure::BadInstruction)),

            _ => return Err(self.fail(VerifyFailure::BadInstruction)),
        }
        Ok(())
    }

    fn load_local(&mut self, op: OpCode, index: usize) -> VmResult<()> {
        use OpCode::*;
        match op {
            ILOAD => {
                if self.local(index)? != VType::Integer {
                    return Err(self.fail(VerifyFailure::LocalsBadType));
                }
                self.push(VType::Integer)
            }
            FLOAD => {
                if self.local(index)? != VType::Float {
                    return Err(self.fail(VerifyFailure::LocalsBadType));
                }
                self.push(VType::Float)
            }
            LLOAD | DLOAD => {
                let (head, second) = if op == LLOAD {
                    (VType::Long, VType::Long2)
                } else {
                    (VType::Double, VType::Double2)
                };
                if self.local(index)? != head || self.local(index + 1)? != second {
                    return Err(self.fail(VerifyFailure::LocalsBadType));
                }
                self.push_two(head)
            }
            ALOAD => {
                let value = self.local(index)?;
                if !value.is_reference_kind() {
                    return Err(self.fail(VerifyFailure::LocalsBadType));
                }
                self.push(value)
            }
            _ => Err(self.fail(VerifyFailure::BadInstruction)),
        }
    }

    fn store_local(&mut self, vm: &mut Vm, op: OpCode, index: usize) -> VmResult<()> {
        use OpCode::*;
        match op {
            ISTORE => {
                self.pop_expect(vm, VType::Integer)?;
                self.set_local(index, VType::Integer)
            }
            FSTORE => {
                self.pop_expect(vm, VType::Float)?;
                self.set_local(index, VType::Float)
            }
            LSTORE | DSTORE => {
                let head = if op == LSTORE {
                    VType::Long
                } else {
                    VType::Double
                };
                self.pop_two(head)?;
                self.set_local_two(index, head)
            }
            ASTORE => {
                let value = self.pop_any_reference()?;
                self.set_local(index, value)
            }
            _ => Err(self.fail(VerifyFailure::BadInstruction)),
        }
    }

    /// Slot-level permutation for the dup/swap family, validated for pair
    /// integrity afterwards.
    fn shuffle(&mut self, op: OpCode) -> VmResult<()> {
        use OpCode::*;
        let needed = match op {
            DUP_X1 | SWAP | DUP2 => 2,
            DUP_X2 | DUP2_X1 => 3,
            _ => 4,
        };
        if self.stack.len() < needed {
            return Err(self.fail(VerifyFailure::StackUnderflow));
        }
        let len = self.stack.len();
        match op {
            DUP_X1 => {
                let a = self.stack[len - 1];
                let b = self.stack[len - 2];
                self.push(VType::Bogus)?;
                let len = self.stack.len();
                self.stack[len - 1] = a;
                self.stack[len - 2] = b;
                self.stack[len - 3] = a;
            }
            DUP_X2 => {
                let a = self.stack[len - 1];
                let b = self.stack[len - 2];
                let c = self.stack[len - 3];
                self.push(VType::Bogus)?;
                let len = self.stack.len();
                self.stack[len - 1] = a;
                self.stack[len - 2] = b;
                self.stack[len - 3] = c;
                self.stack[len - 4] = a;
            }
            DUP2 => {
                let a = self.stack[len - 1];
                let b = self.stack[len - 2];
                self.push(b)?;
                self.push(a)?;
            }
            DUP2_X1 => {
                let a = self.stack[len - 1];
                let b = self.stack[len - 2];
                let c = self.stack[len - 3];
                self.push(VType::Bogus)?;
                self.push(VType::Bogus)?;
                let len = self.stack.len();
                self.stack[len - 1] = a;
                self.stack[len - 2] = b;
                self.stack[len - 3] = c;
                self.stack[len - 4] = a;
                self.stack[len - 5] = b;
            }
            DUP2_X2 => {
                let a = self.stack[len - 1];
                let b = self.stack[len - 2];
                let c = self.stack[len - 3];
                let d = self.stack[len - 4];
                self.push(VType::Bogus)?;
                self.push(VType::Bogus)?;
                let len = self.stack.len();
                self.stack[len - 1] = a;
                self.stack[len - 2] = b;
                self.stack[len - 3] = c;
                self.stack[len - 4] = d;
                self.stack[len - 5] = a;
                self.stack[len - 6] = b;
            }
            SWAP => {
                self.stack.swap(len - 1, len - 2);
            }
            _ => return Err(self.fail(VerifyFailure::BadInstruction)),
        }
        self.validate_pairing()
    }

    fn is_primitive_array(&self, vm: &Vm, array: VType, accepted: &[PrimitiveType]) -> bool {
        match array {
            VType::Null => true,
            VType::Reference(id) => match vm.classes.class(id) {
                Class::Array(a) => match a.element {
                    ArrayElement::Primitive(p) => accepted.contains(&p),
                    ArrayElement::Class(_) => false,
                },
                _ => false,
            },
            _ => false,
        }
    }

    fn check_return(&mut self, vm: &mut Vm, value: Option<VType>) -> VmResult<()> {
        let Some(expected) = value else {
            return Err(self.fail(VerifyFailure::BadInstruction));
        };
        let Some(declared) = self.descriptor.return_type.clone() else {
            return Err(self.fail(VerifyFailure::ExpectNoReturnValue));
        };
        let declared_slot = match (&declared.base, declared.dimensions) {
            (BaseType::Byte, 0)
            | (BaseType::Char, 0)
            | (BaseType::Int, 0)
            | (BaseType::Short, 0)
            | (BaseType::Boolean, 0) => VType::Integer,
            (BaseType::Float, 0) => VType::Float,
            (BaseType::Long, 0) => VType::Long,
            (BaseType::Double, 0) => VType::Double,
            _ => return Err(self.fail(VerifyFailure::ReturnValueBadType)),
        };
        if declared_slot != expected {
            return Err(self.fail(VerifyFailure::ReturnValueBadType));
        }
        match expected {
            VType::Long | VType::Double => self.pop_two(expected)?,
            _ => {
                self.pop_expect(vm, expected)?;
            }
        }
        self.reachable = false;
        Ok(())
    }

    fn simulate_field_access(&mut self, vm: &mut Vm, op: OpCode, index: u16) -> VmResult<()> {
        use OpCode::*;
        let (class_index, descriptor) = match self.pool_entry(vm, index)? {
            PoolEntry::FieldRef {
                class_index,
                descriptor,
                ..
            } => (class_index, descriptor),
            _ => return Err(self.fail(VerifyFailure::FieldBadType)),
        };
        let field_class = self.pool_class_id(vm, class_index)?;
        let descriptor_text = vm.name(descriptor).to_string();
        let field_type = parse_field_type(&descriptor_text)
            .map_err(|_| self.fail(VerifyFailure::FieldBadType))?;
        let slots = self.vtype_of(vm, &field_type)?;

        match op {
            GETSTATIC => {
                for slot in slots {
                    self.push(slot)?;
                }
            }
            PUTSTATIC => {
                self.pop_value_of(vm, &slots)?;
            }
            GETFIELD => {
                self.pop_field_receiver(vm, field_class)?;
                for slot in slots {
                    self.push(slot)?;
                }
            }
            PUTFIELD => {
                self.pop_value_of(vm, &slots)?;
                self.pop_field_receiver(vm, field_class)?;
            }
            _ => return Err(self.fail(VerifyFailure::BadInstruction)),
        }
        Ok(())
    }

    /// Pops a value matching the field slot tags (head first in `slots`).
    fn pop_value_of(&mut self, vm: &mut Vm, slots: &[VType]) -> VmResult<()> {
        if slots.len() == 2 {
            self.pop_two(slots[0])?;
        } else {
            let expected = slots[0];
            let found = self.pop_raw()?;
            if !self.assignable(vm, found, expected)? {
                return Err(self.fail(VerifyFailure::FieldBadType));
            }
        }
        Ok(())
    }

    /// The receiver of an instance field access. Inside `<init>`, access
    /// to fields of the class under construction is allowed before the
    /// superclass constructor has run.
    fn pop_field_receiver(&mut self, vm: &mut Vm, field_class: ClassId) -> VmResult<()> {
        let receiver = self.pop_raw()?;
        match receiver {
            VType::InitObject if field_class == self.this_class => Ok(()),
            VType::Null | VType::Reference(_) => {
                if self.assignable(vm, receiver, VType::Reference(field_class))? {
                    Ok(())
                } else {
                    Err(self.fail(VerifyFailure::FieldBadType))
                }
            }
            _ => Err(self.fail(VerifyFailure::FieldBadType)),
        }
    }

    fn simulate_invoke(
        &mut self,
        vm: &mut Vm,
        op: OpCode,
        op_start: usize,
        index: u16,
        count: u8,
        zero: u8,
    ) -> VmResult<()> {
        use OpCode::*;
        let interface = op == INVOKEINTERFACE;
        let (class_index, name, descriptor) = match self.pool_entry(vm, index)? {
            PoolEntry::MethodRef {
                class_index,
                name,
                descriptor,
                ..
            } if !interface => (class_index, name, descriptor),
            PoolEntry::InterfaceMethodRef {
                class_index,
                name,
                descriptor,
                ..
            } if interface => (class_index, name, descriptor),
            _ => return Err(self.fail(VerifyFailure::BadInstruction)),
        };
        let target_class = self.pool_class_id(vm, class_index)?;
        let method_name = vm.name(name).to_string();
        let descriptor_text = vm.name(descriptor).to_string();
        let signature = parse_method_descriptor(&descriptor_text)
            .map_err(|_| self.fail(VerifyFailure::ArgsBadType))?;

        if method_name == "<init>" && op != INVOKESPECIAL {
            return Err(self.fail(VerifyFailure::BadInitCall));
        }
        if method_name == "<clinit>" {
            return Err(self.fail(VerifyFailure::BadInitCall));
        }

        if interface {
            let expected_count = signature.argument_cells() + 1;
            if count as usize != expected_count {
                return Err(self.fail(VerifyFailure::NargsMismatch));
            }
            if zero != 0 {
                return Err(self.fail(VerifyFailure::ExpectZero));
            }
        }

        // Arguments pop right to left.
        for parameter in signature.parameters.iter().rev() {
            let slots = self.vtype_of(vm, parameter)?;
            if slots.len() == 2 {
                self.pop_two(slots[0])
                    .map_err(|_| self.fail(VerifyFailure::ArgsBadType))?;
            } else {
                let found = self.pop_raw()?;
                if !self.assignable(vm, found, slots[0])? {
                    return Err(self.fail(VerifyFailure::ArgsBadType));
                }
            }
        }

        match op {
            INVOKESTATIC => {}
            INVOKESPECIAL if method_name == "<init>" => {
                self.simulate_init_call(vm, op_start, target_class)?;
            }
            INVOKESPECIAL => {
                let receiver = self.pop_object()?;
                if !self.assignable(vm, receiver, VType::Reference(self.this_class))? {
                    return Err(self.fail(VerifyFailure::ArgsBadType));
                }
            }
            INVOKEVIRTUAL => {
                let receiver = self.pop_object()?;
                if !self.assignable(vm, receiver, VType::Reference(target_class))? {
                    return Err(self.fail(VerifyFailure::ArgsBadType));
                }
            }
            INVOKEINTERFACE => {
                self.pop_object()?;
            }
            _ => return Err(self.fail(VerifyFailure::BadInstruction)),
        }

        if let Some(return_type) = signature.return_type.clone() {
            let slots = self.vtype_of(vm, &return_type)?;
            for slot in slots {
                self.push(slot)?;
            }
        }
        Ok(())
    }

    /// The `<init>` receiver rule: either the product of a located `new`,
    /// or the receiver of the current constructor calling `this.<init>` or
    /// `super.<init>` outside every handler range.
    fn simulate_init_call(
        &mut self,
        vm: &mut Vm,
        op_start: usize,
        target_class: ClassId,
    ) -> VmResult<()> {
        let receiver = self.pop_raw()?;
        let replacement = match receiver {
            VType::NewObject { pc } => {
                let pc = pc as usize;
                if pc + 2 >= self.code.len() || self.code[pc] != OpCode::NEW as u8 {
                    return Err(self.fail(VerifyFailure::ExpectNew));
                }
                let operand = ((self.code[pc + 1] as u16) << 8) | self.code[pc + 2] as u16;
                let new_class = self.pool_class_id(vm, operand)?;
                if new_class != target_class {
                    return Err(self.fail(VerifyFailure::BadInitCall));
                }
                VType::Reference(new_class)
            }
            VType::InitObject => {
                let super_class = {
                    vm.ensure_linked(self.this_class)?;
                    vm.classes.instance(self.this_class)?.super_class
                };
                let is_this_or_super =
                    target_class == self.this_class || Some(target_class) == super_class;
                if !is_this_or_super || !self.need_init {
                    return Err(self.fail(VerifyFailure::BadInitCall));
                }
                // The call must lie outside every exception handler range.
                let covered = self.handlers.iter().any(|h| {
                    (op_start as u16) >= h.start_pc && (op_start as u16) < h.end_pc
                });
                if covered {
                    return Err(self.fail(VerifyFailure::BadInitCall));
                }
                self.need_init = false;
                VType::Reference(self.this_class)
            }
            _ => return Err(self.fail(VerifyFailure::ExpectUninit)),
        };

        // All occurrences of the receiver type become the concrete class.
        for slot in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if *slot == receiver {
                *slot = replacement;
            }
        }
        Ok(())
    }
}
