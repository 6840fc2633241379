//! Attribute decoding: Code, Exceptions, ConstantValue, and StackMap.
//!
//! Unknown attributes are skipped after their declared length is validated
//! against the remaining stream. The StackMap attribute uses the verifier's
//! type encoding rather than the split-frame encoding of later formats.

use crate::constant_pool::{Constant, ConstantPool};
use crate::error::{ClassFileError, ClassFileResult};
use crate::reader::ClassReader;

/// Upper bound on the bytecode array of one method.
pub const MAX_METHOD_BYTECODE: usize = 32 * 1024;
/// Upper bound on `max_locals + max_stack` of one method.
pub const MAX_FRAME_CELLS: usize = 512;

/// One exception-handler table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    /// Constant-pool Class index of the catch type; 0 means catch-all.
    pub catch_type: u16,
}

/// One typed item of a stack-map snapshot.
///
/// Long and Double items implicitly cover the following slot as well; the
/// expansion to explicit second-word items happens in the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackMapItem {
    Bogus,
    Integer,
    Float,
    Double,
    Long,
    Null,
    InitObject,
    /// Constant-pool Class index of a reference type.
    Object(u16),
    /// Bytecode offset of the `new` instruction that produced the value.
    NewObject(u16),
}

mod item_tag {
    pub const BOGUS: u8 = 0;
    pub const INTEGER: u8 = 1;
    pub const FLOAT: u8 = 2;
    pub const DOUBLE: u8 = 3;
    pub const LONG: u8 = 4;
    pub const NULL: u8 = 5;
    pub const INIT_OBJECT: u8 = 6;
    pub const OBJECT: u8 = 7;
    pub const NEW_OBJECT: u8 = 8;
}

/// One recorded `(offset, locals, stack)` triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMapEntry {
    pub offset: u16,
    pub locals: Vec<StackMapItem>,
    pub stack: Vec<StackMapItem>,
}

/// The decoded Code attribute of one method.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub handlers: Vec<ExceptionHandler>,
    pub stack_map: Option<Vec<StackMapEntry>>,
}

impl CodeAttribute {
    /// Parses the body of a Code attribute. `method_name` is used only for
    /// error context.
    pub fn parse(
        reader: &mut ClassReader<'_>,
        pool: &ConstantPool,
        method_name: &str,
    ) -> ClassFileResult<Self> {
        let max_stack = reader.read_u16()?;
        let max_locals = reader.read_u16()?;
        let code_len = reader.read_u32()? as usize;
        if code_len == 0
            || code_len > MAX_METHOD_BYTECODE
            || max_locals as usize + max_stack as usize > MAX_FRAME_CELLS
        {
            return Err(ClassFileError::OversizedMethod {
                name: method_name.to_string(),
            });
        }
        let code = reader.read_bytes(code_len)?.to_vec();

        let handler_count = reader.read_u16()?;
        let mut handlers = Vec::with_capacity(handler_count as usize);
        for _ in 0..handler_count {
            let start_pc = reader.read_u16()?;
            let end_pc = reader.read_u16()?;
            let handler_pc = reader.read_u16()?;
            let catch_type = reader.read_u16()?;
            if start_pc >= end_pc
                || end_pc as usize > code_len
                || handler_pc as usize >= code_len
            {
                return Err(ClassFileError::BadHandlerRange {
                    start_pc,
                    end_pc,
                    code_len: code_len as u16,
                });
            }
            if catch_type != 0 {
                pool.class_entry(catch_type)?;
            }
            handlers.push(ExceptionHandler {
                start_pc,
                end_pc,
                handler_pc,
                catch_type,
            });
        }

        // Nested attributes of the Code attribute.
        let mut stack_map = None;
        let attr_count = reader.read_u16()?;
        for _ in 0..attr_count {
            let name_index = reader.read_u16()?;
            let name = pool.utf8(name_index)?;
            let length = reader.read_u32()? as usize;
            if name == "StackMap" {
                if stack_map.is_some() {
                    return Err(ClassFileError::DuplicateAttribute { name: "StackMap" });
                }
                let before = reader.position();
                stack_map = Some(parse_stack_map(
                    reader,
                    pool,
                    max_locals,
                    max_stack,
                    code_len as u16,
                )?);
                if reader.position() - before != length {
                    return Err(ClassFileError::BadAttributeLength {
                        name: name.to_string(),
                    });
                }
            } else {
                reader.skip(length)?;
            }
        }

        Ok(Self {
            max_stack,
            max_locals,
            code,
            handlers,
            stack_map,
        })
    }
}

/// Parses the entry list of a StackMap attribute.
///
/// Each item is checked against the frame geometry: a snapshot may never
/// describe more locals than `max_locals` or more stack slots than
/// `max_stack`, counting the hidden second word of Long and Double items.
fn parse_stack_map(
    reader: &mut ClassReader<'_>,
    pool: &ConstantPool,
    max_locals: u16,
    max_stack: u16,
    code_len: u16,
) -> ClassFileResult<Vec<StackMapEntry>> {
    let entry_count = reader.read_u16()?;
    let mut entries = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        let offset = reader.read_u16()?;
        if offset >= code_len {
            return Err(ClassFileError::BadStackMap {
                reason: "entry offset outside bytecode",
            });
        }
        let locals = parse_snapshot(reader, pool, max_locals, code_len)?;
        let stack = parse_snapshot(reader, pool, max_stack, code_len)?;
        entries.push(StackMapEntry {
            offset,
            locals,
            stack,
        });
    }
    Ok(entries)
}

fn parse_snapshot(
    reader: &mut ClassReader<'_>,
    pool: &ConstantPool,
    max_slots: u16,
    code_len: u16,
) -> ClassFileResult<Vec<StackMapItem>> {
    let count = reader.read_u16()?;
    let mut items = Vec::with_capacity(count as usize);
    let mut slots = 0usize;
    for _ in 0..count {
        let item = match reader.read_u8()? {
            item_tag::BOGUS => StackMapItem::Bogus,
            item_tag::INTEGER => StackMapItem::Integer,
            item_tag::FLOAT => StackMapItem::Float,
            item_tag::DOUBLE => StackMapItem::Double,
            item_tag::LONG => StackMapItem::Long,
            item_tag::NULL => StackMapItem::Null,
            item_tag::INIT_OBJECT => StackMapItem::InitObject,
            item_tag::OBJECT => {
                let class_index = reader.read_u16()?;
                pool.class_entry(class_index)?;
                StackMapItem::Object(class_index)
            }
            item_tag::NEW_OBJECT => {
                let instr = reader.read_u16()?;
                if instr >= code_len {
                    return Err(ClassFileError::BadNewObjectOffset {
                        offset: instr,
                        code_len,
                    });
                }
                StackMapItem::NewObject(instr)
            }
            _ => {
                return Err(ClassFileError::BadStackMap {
                    reason: "unknown item tag",
                })
            }
        };
        slots += match item {
            StackMapItem::Long | StackMapItem::Double => 2,
            _ => 1,
        };
        if slots > max_slots as usize {
            return Err(ClassFileError::BadStackMap {
                reason: "snapshot wider than frame",
            });
        }
        items.push(item);
    }
    Ok(items)
}

/// Parses an Exceptions attribute body: the declared checked exceptions.
pub fn parse_exceptions_attribute(
    reader: &mut ClassReader<'_>,
    pool: &ConstantPool,
) -> ClassFileResult<Vec<u16>> {
    let count = reader.read_u16()?;
    let mut indexes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let index = reader.read_u16()?;
        pool.class_entry(index)?;
        indexes.push(index);
    }
    Ok(indexes)
}

/// Validates a ConstantValue attribute body against the field's descriptor
/// and returns the pool index of the initialiser.
pub fn parse_constant_value(
    reader: &mut ClassReader<'_>,
    pool: &ConstantPool,
    descriptor: &str,
) -> ClassFileResult<u16> {
    let index = reader.read_u16()?;
    let ok = match pool.get(index)? {
        Constant::Integer(_) => matches!(
            descriptor,
            "B" | "C" | "I" | "S" | "Z"
        ),
        Constant::Float(_) => descriptor == "F",
        Constant::Long(_) => descriptor == "J",
        Constant::Double(_) => descriptor == "D",
        Constant::String { .. } => descriptor == "Ljava/lang/String;",
        _ => false,
    };
    if !ok {
        return Err(ClassFileError::BadConstantValue { index });
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_pool() -> ConstantPool {
        // 1: Utf8 "A", 2: Class -> 1, 3: Utf8 "StackMap"
        let mut bytes = vec![0x00, 0x04];
        bytes.extend_from_slice(&[1, 0, 1, b'A']);
        bytes.extend_from_slice(&[7, 0, 1]);
        bytes.extend_from_slice(&[1, 0, 8]);
        bytes.extend_from_slice(b"StackMap");
        let mut r = ClassReader::new(&bytes);
        ConstantPool::parse(&mut r).unwrap()
    }

    fn code_attr_bytes(
        max_stack: u16,
        max_locals: u16,
        code: &[u8],
        handlers: &[(u16, u16, u16, u16)],
    ) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&max_stack.to_be_bytes());
        v.extend_from_slice(&max_locals.to_be_bytes());
        v.extend_from_slice(&(code.len() as u32).to_be_bytes());
        v.extend_from_slice(code);
        v.extend_from_slice(&(handlers.len() as u16).to_be_bytes());
        for &(s, e, h, c) in handlers {
            v.extend_from_slice(&s.to_be_bytes());
            v.extend_from_slice(&e.to_be_bytes());
            v.extend_from_slice(&h.to_be_bytes());
            v.extend_from_slice(&c.to_be_bytes());
        }
        v.extend_from_slice(&0u16.to_be_bytes()); // no nested attributes
        v
    }

    #[test]
    fn parses_plain_code_attribute() {
        let pool = minimal_pool();
        let bytes = code_attr_bytes(2, 1, &[0x05, 0x06, 0x60, 0xAC], &[]);
        let mut r = ClassReader::new(&bytes);
        let code = CodeAttribute::parse(&mut r, &pool, "m").unwrap();
        assert_eq!(code.max_stack, 2);
        assert_eq!(code.code.len(), 4);
        assert!(code.stack_map.is_none());
    }

    #[test]
    fn handler_range_must_be_ordered_and_in_bounds() {
        let pool = minimal_pool();
        let bytes = code_attr_bytes(1, 1, &[0x00, 0xB1], &[(1, 1, 0, 0)]);
        let mut r = ClassReader::new(&bytes);
        assert!(matches!(
            CodeAttribute::parse(&mut r, &pool, "m"),
            Err(ClassFileError::BadHandlerRange { .. })
        ));
    }

    #[test]
    fn rejects_oversized_frame() {
        let pool = minimal_pool();
        let bytes = code_attr_bytes(500, 100, &[0xB1], &[]);
        let mut r = ClassReader::new(&bytes);
        assert!(matches!(
            CodeAttribute::parse(&mut r, &pool, "m"),
            Err(ClassFileError::OversizedMethod { .. })
        ));
    }

    #[test]
    fn stack_map_snapshot_counts_long_twice() {
        let pool = minimal_pool();
        // Code attribute with one StackMap entry at offset 0:
        // locals = [Long], stack = [] -- needs max_locals >= 2.
        let mut body = Vec::new();
        body.extend_from_slice(&1u16.to_be_bytes()); // entry count
        body.extend_from_slice(&0u16.to_be_bytes()); // offset
        body.extend_from_slice(&1u16.to_be_bytes()); // n locals
        body.push(4); // Long
        body.extend_from_slice(&0u16.to_be_bytes()); // n stack

        let mut v = Vec::new();
        v.extend_from_slice(&0u16.to_be_bytes()); // max_stack
        v.extend_from_slice(&1u16.to_be_bytes()); // max_locals: too small
        v.extend_from_slice(&2u32.to_be_bytes());
        v.extend_from_slice(&[0x00, 0xB1]);
        v.extend_from_slice(&0u16.to_be_bytes()); // handlers
        v.extend_from_slice(&1u16.to_be_bytes()); // one attribute
        v.extend_from_slice(&3u16.to_be_bytes()); // name: "StackMap"
        v.extend_from_slice(&(body.len() as u32).to_be_bytes());
        v.extend_from_slice(&body);

        let mut r = ClassReader::new(&v);
        assert!(matches!(
            CodeAttribute::parse(&mut r, &pool, "m"),
            Err(ClassFileError::BadStackMap { .. })
        ));
    }

    #[test]
    fn unknown_nested_attributes_are_skipped() {
        let pool = minimal_pool();
        let mut v = Vec::new();
        v.extend_from_slice(&1u16.to_be_bytes());
        v.extend_from_slice(&1u16.to_be_bytes());
        v.extend_from_slice(&1u32.to_be_bytes());
        v.push(0xB1);
        v.extend_from_slice(&0u16.to_be_bytes());
        v.extend_from_slice(&1u16.to_be_bytes());
        v.extend_from_slice(&1u16.to_be_bytes()); // name: "A" (not StackMap)
        v.extend_from_slice(&4u32.to_be_bytes());
        v.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        let mut r = ClassReader::new(&v);
        let code = CodeAttribute::parse(&mut r, &pool, "m").unwrap();
        assert!(code.stack_map.is_none());
        assert!(r.expect_end().is_ok());
    }
}
