//! Opcode definitions for the interpreter and verifier.
//!
//! The set is the standard ~200 opcodes minus the two historical
//! subroutine opcodes (`jsr`/`ret` and `jsr_w` keep their byte values so
//! the verifier can name them in rejections, but no handler exists for
//! them). Fast variants produced by opcode rewriting occupy previously
//! reserved slots above `0xCA`; their observable semantics are identical
//! to their slow equivalents.

/// Operand footprint of one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandLen {
    /// The opcode is followed by exactly this many operand bytes.
    Fixed(u8),
    /// `wide`, `tableswitch`, `lookupswitch`: length depends on content.
    Variable,
}

macro_rules! define_opcodes {
    ($($name:ident = $value:literal, $mnemonic:literal, $len:expr;)*) => {
        /// One bytecode opcode.
        #[allow(non_camel_case_types)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum OpCode {
            $($name = $value,)*
        }

        impl OpCode {
            /// Decodes a byte into an opcode, or `None` for unassigned slots.
            pub fn from_byte(byte: u8) -> Option<Self> {
                match byte {
                    $($value => Some(OpCode::$name),)*
                    _ => None,
                }
            }

            /// The conventional mnemonic.
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(OpCode::$name => $mnemonic,)*
                }
            }

            /// Operand bytes following the opcode byte.
            pub fn operand_len(self) -> OperandLen {
                match self {
                    $(OpCode::$name => $len,)*
                }
            }
        }
    };
}

use OperandLen::{Fixed, Variable};

define_opcodes! {
    NOP = 0x00, "nop", Fixed(0);
    ACONST_NULL = 0x01, "aconst_null", Fixed(0);
    ICONST_M1 = 0x02, "iconst_m1", Fixed(0);
    ICONST_0 = 0x03, "iconst_0", Fixed(0);
    ICONST_1 = 0x04, "iconst_1", Fixed(0);
    ICONST_2 = 0x05, "iconst_2", Fixed(0);
    ICONST_3 = 0x06, "iconst_3", Fixed(0);
    ICONST_4 = 0x07, "iconst_4", Fixed(0);
    ICONST_5 = 0x08, "iconst_5", Fixed(0);
    LCONST_0 = 0x09, "lconst_0", Fixed(0);
    LCONST_1 = 0x0A, "lconst_1", Fixed(0);
    FCONST_0 = 0x0B, "fconst_0", Fixed(0);
    FCONST_1 = 0x0C, "fconst_1", Fixed(0);
    FCONST_2 = 0x0D, "fconst_2", Fixed(0);
    DCONST_0 = 0x0E, "dconst_0", Fixed(0);
    DCONST_1 = 0x0F, "dconst_1", Fixed(0);
    BIPUSH = 0x10, "bipush", Fixed(1);
    SIPUSH = 0x11, "sipush", Fixed(2);
    LDC = 0x12, "ldc", Fixed(1);
    LDC_W = 0x13, "ldc_w", Fixed(2);
    LDC2_W = 0x14, "ldc2_w", Fixed(2);
    ILOAD = 0x15, "iload", Fixed(1);
    LLOAD = 0x16, "lload", Fixed(1);
    FLOAD = 0x17, "fload", Fixed(1);
    DLOAD = 0x18, "dload", Fixed(1);
    ALOAD = 0x19, "aload", Fixed(1);
    ILOAD_0 = 0x1A, "iload_0", Fixed(0);
    ILOAD_1 = 0x1B, "iload_1", Fixed(0);
    ILOAD_2 = 0x1C, "iload_2", Fixed(0);
    ILOAD_3 = 0x1D, "iload_3", Fixed(0);
    LLOAD_0 = 0x1E, "lload_0", Fixed(0);
    LLOAD_1 = 0x1F, "lload_1", Fixed(0);
    LLOAD_2 = 0x20, "lload_2", Fixed(0);
    LLOAD_3 = 0x21, "lload_3", Fixed(0);
    FLOAD_0 = 0x22, "fload_0", Fixed(0);
    FLOAD_1 = 0x23, "fload_1", Fixed(0);
    FLOAD_2 = 0x24, "fload_2", Fixed(0);
    FLOAD_3 = 0x25, "fload_3", Fixed(0);
    DLOAD_0 = 0x26, "dload_0", Fixed(0);
    DLOAD_1 = 0x27, "dload_1", Fixed(0);
    DLOAD_2 = 0x28, "dload_2", Fixed(0);
    DLOAD_3 = 0x29, "dload_3", Fixed(0);
    ALOAD_0 = 0x2A, "aload_0", Fixed(0);
    ALOAD_1 = 0x2B, "aload_1", Fixed(0);
    ALOAD_2 = 0x2C, "aload_2", Fixed(0);
    ALOAD_3 = 0x2D, "aload_3", Fixed(0);
    IALOAD = 0x2E, "iaload", Fixed(0);
    LALOAD = 0x2F, "laload", Fixed(0);
    FALOAD = 0x30, "faload", Fixed(0);
    DALOAD = 0x31, "daload", Fixed(0);
    AALOAD = 0x32, "aaload", Fixed(0);
    BALOAD = 0x33, "baload", Fixed(0);
    CALOAD = 0x34, "caload", Fixed(0);
    SALOAD = 0x35, "saload", Fixed(0);
    ISTORE = 0x36, "istore", Fixed(1);
    LSTORE = 0x37, "lstore", Fixed(1);
    FSTORE = 0x38, "fstore", Fixed(1);
    DSTORE = 0x39, "dstore", Fixed(1);
    ASTORE = 0x3A, "astore", Fixed(1);
    ISTORE_0 = 0x3B, "istore_0", Fixed(0);
    ISTORE_1 = 0x3C, "istore_1", Fixed(0);
    ISTORE_2 = 0x3D, "istore_2", Fixed(0);
    ISTORE_3 = 0x3E, "istore_3", Fixed(0);
    LSTORE_0 = 0x3F, "lstore_0", Fixed(0);
    LSTORE_1 = 0x40, "lstore_1", Fixed(0);
    LSTORE_2 = 0x41, "lstore_2", Fixed(0);
    LSTORE_3 = 0x42, "lstore_3", Fixed(0);
    FSTORE_0 = 0x43, "fstore_0", Fixed(0);
    FSTORE_1 = 0x44, "fstore_1", Fixed(0);
    FSTORE_2 = 0x45, "fstore_2", Fixed(0);
    FSTORE_3 = 0x46, "fstore_3", Fixed(0);
    DSTORE_0 = 0x47, "dstore_0", Fixed(0);
    DSTORE_1 = 0x48, "dstore_1", Fixed(0);
    DSTORE_2 = 0x49, "dstore_2", Fixed(0);
    DSTORE_3 = 0x4A, "dstore_3", Fixed(0);
    ASTORE_0 = 0x4B, "astore_0", Fixed(0);
    ASTORE_1 = 0x4C, "astore_1", Fixed(0);
    ASTORE_2 = 0x4D, "astore_2", Fixed(0);
    ASTORE_3 = 0x4E, "astore_3", Fixed(0);
    IASTORE = 0x4F, "iastore", Fixed(0);
    LASTORE = 0x50, "lastore", Fixed(0);
    FASTORE = 0x51, "fastore", Fixed(0);
    DASTORE = 0x52, "dastore", Fixed(0);
    AASTORE = 0x53, "aastore", Fixed(0);
    BASTORE = 0x54, "bastore", Fixed(0);
    CASTORE = 0x55, "castore", Fixed(0);
    SASTORE = 0x56, "sastore", Fixed(0);
    POP = 0x57, "pop", Fixed(0);
    POP2 = 0x58, "pop2", Fixed(0);
    DUP = 0x59, "dup", Fixed(0);
    DUP_X1 = 0x5A, "dup_x1", Fixed(0);
    DUP_X2 = 0x5B, "dup_x2", Fixed(0);
    DUP2 = 0x5C, "dup2", Fixed(0);
    DUP2_X1 = 0x5D, "dup2_x1", Fixed(0);
    DUP2_X2 = 0x5E, "dup2_x2", Fixed(0);
    SWAP = 0x5F, "swap", Fixed(0);
    IADD = 0x60, "iadd", Fixed(0);
    LADD = 0x61, "ladd", Fixed(0);
    FADD = 0x62, "fadd", Fixed(0);
    DADD = 0x63, "dadd", Fixed(0);
    ISUB = 0x64, "isub", Fixed(0);
    LSUB = 0x65, "lsub", Fixed(0);
    FSUB = 0x66, "fsub", Fixed(0);
    DSUB = 0x67, "dsub", Fixed(0);
    IMUL = 0x68, "imul", Fixed(0);
    LMUL = 0x69, "lmul", Fixed(0);
    FMUL = 0x6A, "fmul", Fixed(0);
    DMUL = 0x6B, "dmul", Fixed(0);
    IDIV = 0x6C, "idiv", Fixed(0);
    LDIV = 0x6D, "ldiv", Fixed(0);
    FDIV = 0x6E, "fdiv", Fixed(0);
    DDIV = 0x6F, "ddiv", Fixed(0);
    IREM = 0x70, "irem", Fixed(0);
    LREM = 0x71, "lrem", Fixed(0);
    FREM = 0x72, "frem", Fixed(0);
    DREM = 0x73, "drem", Fixed(0);
    INEG = 0x74, "ineg", Fixed(0);
    LNEG = 0x75, "lneg", Fixed(0);
    FNEG = 0x76, "fneg", Fixed(0);
    DNEG = 0x77, "dneg", Fixed(0);
    ISHL = 0x78, "ishl", Fixed(0);
    LSHL = 0x79, "lshl", Fixed(0);
    ISHR = 0x7A, "ishr", Fixed(0);
    LSHR = 0x7B, "lshr", Fixed(0);
    IUSHR = 0x7C, "iushr", Fixed(0);
    LUSHR = 0x7D, "lushr", Fixed(0);
    IAND = 0x7E, "iand", Fixed(0);
    LAND = 0x7F, "land", Fixed(0);
    IOR = 0x80, "ior", Fixed(0);
    LOR = 0x81, "lor", Fixed(0);
    IXOR = 0x82, "ixor", Fixed(0);
    LXOR = 0x83, "lxor", Fixed(0);
    IINC = 0x84, "iinc", Fixed(2);
    I2L = 0x85, "i2l", Fixed(0);
    I2F = 0x86, "i2f", Fixed(0);
    I2D = 0x87, "i2d", Fixed(0);
    L2I = 0x88, "l2i", Fixed(0);
    L2F = 0x89, "l2f", Fixed(0);
    L2D = 0x8A, "l2d", Fixed(0);
    F2I = 0x8B, "f2i", Fixed(0);
    F2L = 0x8C, "f2l", Fixed(0);
    F2D = 0x8D, "f2d", Fixed(0);
    D2I = 0x8E, "d2i", Fixed(0);
    D2L = 0x8F, "d2l", Fixed(0);
    D2F = 0x90, "d2f", Fixed(0);
    I2B = 0x91, "i2b", Fixed(0);
    I2C = 0x92, "i2c", Fixed(0);
    I2S = 0x93, "i2s", Fixed(0);
    LCMP = 0x94, "lcmp", Fixed(0);
    FCMPL = 0x95, "fcmpl", Fixed(0);
    FCMPG = 0x96, "fcmpg", Fixed(0);
    DCMPL = 0x97, "dcmpl", Fixed(0);
    DCMPG = 0x98, "dcmpg", Fixed(0);
    IFEQ = 0x99, "ifeq", Fixed(2);
    IFNE = 0x9A, "ifne", Fixed(2);
    IFLT = 0x9B, "iflt", Fixed(2);
    IFGE = 0x9C, "ifge", Fixed(2);
    IFGT = 0x9D, "ifgt", Fixed(2);
    IFLE = 0x9E, "ifle", Fixed(2);
    IF_ICMPEQ = 0x9F, "if_icmpeq", Fixed(2);
    IF_ICMPNE = 0xA0, "if_icmpne", Fixed(2);
    IF_ICMPLT = 0xA1, "if_icmplt", Fixed(2);
    IF_ICMPGE = 0xA2, "if_icmpge", Fixed(2);
    IF_ICMPGT = 0xA3, "if_icmpgt", Fixed(2);
    IF_ICMPLE = 0xA4, "if_icmple", Fixed(2);
    IF_ACMPEQ = 0xA5, "if_acmpeq", Fixed(2);
    IF_ACMPNE = 0xA6, "if_acmpne", Fixed(2);
    GOTO = 0xA7, "goto", Fixed(2);
    JSR = 0xA8, "jsr", Fixed(2);
    RET = 0xA9, "ret", Fixed(1);
    TABLESWITCH = 0xAA, "tableswitch", Variable;
    LOOKUPSWITCH = 0xAB, "lookupswitch", Variable;
    IRETURN = 0xAC, "ireturn", Fixed(0);
    LRETURN = 0xAD, "lreturn", Fixed(0);
    FRETURN = 0xAE, "freturn", Fixed(0);
    DRETURN = 0xAF, "dreturn", Fixed(0);
    ARETURN = 0xB0, "areturn", Fixed(0);
    RETURN = 0xB1, "return", Fixed(0);
    GETSTATIC = 0xB2, "getstatic", Fixed(2);
    PUTSTATIC = 0xB3, "putstatic", Fixed(2);
    GETFIELD = 0xB4, "getfield", Fixed(2);
    PUTFIELD = 0xB5, "putfield", Fixed(2);
    INVOKEVIRTUAL = 0xB6, "invokevirtual", Fixed(2);
    INVOKESPECIAL = 0xB7, "invokespecial", Fixed(2);
    INVOKESTATIC = 0xB8, "invokestatic", Fixed(2);
    INVOKEINTERFACE = 0xB9, "invokeinterface", Fixed(4);
    NEW = 0xBB, "new", Fixed(2);
    NEWARRAY = 0xBC, "newarray", Fixed(1);
    ANEWARRAY = 0xBD, "anewarray", Fixed(2);
    ARRAYLENGTH = 0xBE, "arraylength", Fixed(0);
    ATHROW = 0xBF, "athrow", Fixed(0);
    CHECKCAST = 0xC0, "checkcast", Fixed(2);
    INSTANCEOF = 0xC1, "instanceof", Fixed(2);
    MONITORENTER = 0xC2, "monitorenter", Fixed(0);
    MONITOREXIT = 0xC3, "monitorexit", Fixed(0);
    WIDE = 0xC4, "wide", Variable;
    MULTIANEWARRAY = 0xC5, "multianewarray", Fixed(3);
    IFNULL = 0xC6, "ifnull", Fixed(2);
    IFNONNULL = 0xC7, "ifnonnull", Fixed(2);
    GOTO_W = 0xC8, "goto_w", Fixed(4);
    JSR_W = 0xC9, "jsr_w", Fixed(4);

    // Fast variants, rewritten in place once resolution has been cached.
    GETFIELD_FAST = 0xCB, "getfield_fast", Fixed(2);
    GETFIELDP_FAST = 0xCC, "getfieldp_fast", Fixed(2);
    GETFIELD2_FAST = 0xCD, "getfield2_fast", Fixed(2);
    PUTFIELD_FAST = 0xCE, "putfield_fast", Fixed(2);
    PUTFIELD2_FAST = 0xCF, "putfield2_fast", Fixed(2);
    GETSTATIC_FAST = 0xD0, "getstatic_fast", Fixed(2);
    GETSTATICP_FAST = 0xD1, "getstaticp_fast", Fixed(2);
    GETSTATIC2_FAST = 0xD2, "getstatic2_fast", Fixed(2);
    PUTSTATIC_FAST = 0xD3, "putstatic_fast", Fixed(2);
    PUTSTATIC2_FAST = 0xD4, "putstatic2_fast", Fixed(2);
    INVOKEVIRTUAL_FAST = 0xD5, "invokevirtual_fast", Fixed(2);
    INVOKESPECIAL_FAST = 0xD6, "invokespecial_fast", Fixed(2);
    INVOKESTATIC_FAST = 0xD7, "invokestatic_fast", Fixed(2);
    INVOKEINTERFACE_FAST = 0xD8, "invokeinterface_fast", Fixed(4);
    NEW_FAST = 0xD9, "new_fast", Fixed(2);
    ANEWARRAY_FAST = 0xDA, "anewarray_fast", Fixed(2);
    MULTIANEWARRAY_FAST = 0xDB, "multianewarray_fast", Fixed(3);
    CHECKCAST_FAST = 0xDC, "checkcast_fast", Fixed(2);
    INSTANCEOF_FAST = 0xDD, "instanceof_fast", Fixed(2);

    // Body of every custom-code frame: runs its callback exactly once.
    CUSTOMCODE = 0xDE, "customcode", Fixed(0);
}

impl OpCode {
    /// True for opcodes produced by rewriting, never by a compiler.
    pub fn is_fast_variant(self) -> bool {
        (self as u8) > OpCode::JSR_W as u8 && self != OpCode::CUSTOMCODE
    }

    /// The slow opcode a fast variant was rewritten from. Rewriting stays
    /// within this family for any verified method.
    pub fn slow_equivalent(self) -> Self {
        match self {
            OpCode::GETFIELD_FAST | OpCode::GETFIELDP_FAST | OpCode::GETFIELD2_FAST => {
                OpCode::GETFIELD
            }
            OpCode::PUTFIELD_FAST | OpCode::PUTFIELD2_FAST => OpCode::PUTFIELD,
            OpCode::GETSTATIC_FAST | OpCode::GETSTATICP_FAST | OpCode::GETSTATIC2_FAST => {
                OpCode::GETSTATIC
            }
            OpCode::PUTSTATIC_FAST | OpCode::PUTSTATIC2_FAST => OpCode::PUTSTATIC,
            OpCode::INVOKEVIRTUAL_FAST => OpCode::INVOKEVIRTUAL,
            OpCode::INVOKESPECIAL_FAST => OpCode::INVOKESPECIAL,
            OpCode::INVOKESTATIC_FAST => OpCode::INVOKESTATIC,
            OpCode::INVOKEINTERFACE_FAST => OpCode::INVOKEINTERFACE,
            OpCode::NEW_FAST => OpCode::NEW,
            OpCode::ANEWARRAY_FAST => OpCode::ANEWARRAY,
            OpCode::MULTIANEWARRAY_FAST => OpCode::MULTIANEWARRAY,
            OpCode::CHECKCAST_FAST => OpCode::CHECKCAST,
            OpCode::INSTANCEOF_FAST => OpCode::INSTANCEOF,
            other => other,
        }
    }

    /// True for the two historical subroutine opcodes and their wide form.
    /// The verifier rejects them; the interpreter has no handlers.
    pub fn is_subroutine_op(self) -> bool {
        matches!(self, OpCode::JSR | OpCode::RET | OpCode::JSR_W)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_assigned_byte() {
        let mut assigned = 0;
        for byte in 0u16..=255 {
            if let Some(op) = OpCode::from_byte(byte as u8) {
                assert_eq!(op as u8, byte as u8);
                assigned += 1;
            }
        }
        // 201 standard opcodes plus 19 fast variants plus CUSTOMCODE.
        assert_eq!(assigned, 221);
    }

    #[test]
    fn breakpoint_slot_is_unassigned() {
        assert!(OpCode::from_byte(0xCA).is_none());
        assert!(OpCode::from_byte(0xBA).is_none());
        assert!(OpCode::from_byte(0xFF).is_none());
    }

    #[test]
    fn fast_variants_map_back_to_their_family() {
        assert_eq!(OpCode::GETFIELDP_FAST.slow_equivalent(), OpCode::GETFIELD);
        assert_eq!(
            OpCode::INVOKEVIRTUAL_FAST.slow_equivalent(),
            OpCode::INVOKEVIRTUAL
        );
        assert!(OpCode::GETFIELDP_FAST.is_fast_variant());
        assert!(!OpCode::GETFIELD.is_fast_variant());
        assert!(!OpCode::CUSTOMCODE.is_fast_variant());
    }

    #[test]
    fn operand_lengths() {
        assert_eq!(OpCode::IINC.operand_len(), OperandLen::Fixed(2));
        assert_eq!(OpCode::TABLESWITCH.operand_len(), OperandLen::Variable);
        assert_eq!(OpCode::INVOKEINTERFACE.operand_len(), OperandLen::Fixed(4));
        assert_eq!(OpCode::CUSTOMCODE.operand_len(), OperandLen::Fixed(0));
    }

    #[test]
    fn subroutine_opcodes_are_flagged() {
        assert!(OpCode::JSR.is_subroutine_op());
        assert!(OpCode::RET.is_subroutine_op());
        assert!(OpCode::JSR_W.is_subroutine_op());
        assert!(!OpCode::GOTO.is_subroutine_op());
    }
}
