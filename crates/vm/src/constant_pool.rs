//! The runtime constant pool.
//!
//! After loading, Utf8 slots have been collapsed to interned keys and
//! zeroed; what remains is a tagged table whose reference entries carry a
//! write-once resolution cache. Invocation-site inline caches (receiver
//! class → method) live in the same entries and, unlike the resolution
//! cache, are updated on a receiver miss.

use crate::class::ClassId;
use crate::error::{VmError, VmResult};
use crate::field::FieldId;
use crate::intern::NameKey;
use crate::method::MethodId;
use crate::object::ObjRef;

/// One runtime pool entry.
#[derive(Debug, Clone)]
pub enum PoolEntry {
    /// Slot 0 and collapsed Utf8 slots.
    Unused,
    /// Hidden second slot of a Long or Double.
    Second,
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class {
        name: NameKey,
        resolved: Option<ClassId>,
    },
    StringConst {
        value: NameKey,
        /// Interned string object, materialised on first `ldc`.
        object: Option<ObjRef>,
    },
    FieldRef {
        class_index: u16,
        name: NameKey,
        descriptor: NameKey,
        resolved: Option<FieldId>,
    },
    MethodRef {
        class_index: u16,
        name: NameKey,
        descriptor: NameKey,
        resolved: Option<MethodId>,
        /// Inline cache: last receiver class and the method it selected.
        site_cache: Option<(ClassId, MethodId)>,
    },
    InterfaceMethodRef {
        class_index: u16,
        name: NameKey,
        descriptor: NameKey,
        resolved: Option<MethodId>,
        site_cache: Option<(ClassId, MethodId)>,
    },
}

/// The runtime pool of one instance class.
#[derive(Debug, Default)]
pub struct RuntimePool {
    entries: Vec<PoolEntry>,
}

impl RuntimePool {
    /// Wraps a converted entry list.
    pub fn new(entries: Vec<PoolEntry>) -> Self {
        Self { entries }
    }

    /// Number of slots including slot 0.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when only slot 0 exists.
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Returns the entry at `index`. Out-of-range access is a fatal error:
    /// the loader validated every index the bytecode can mention.
    pub fn entry(&self, index: u16) -> VmResult<&PoolEntry> {
        self.entries
            .get(index as usize)
            .ok_or_else(|| VmError::internal(format!("constant pool index {index} out of range")))
    }

    /// Mutable entry access for cache population.
    pub fn entry_mut(&mut self, index: u16) -> VmResult<&mut PoolEntry> {
        self.entries
            .get_mut(index as usize)
            .ok_or_else(|| VmError::internal(format!("constant pool index {index} out of range")))
    }

    /// The class name of the Class entry at `index`.
    pub fn class_name(&self, index: u16) -> VmResult<NameKey> {
        match self.entry(index)? {
            PoolEntry::Class { name, .. } => Ok(*name),
            other => Err(wrong_tag(index, "Class", other)),
        }
    }

    /// The cached resolution of the Class entry at `index`.
    pub fn resolved_class(&self, index: u16) -> VmResult<Option<ClassId>> {
        match self.entry(index)? {
            PoolEntry::Class { resolved, .. } => Ok(*resolved),
            other => Err(wrong_tag(index, "Class", other)),
        }
    }

    /// Populates the resolution cache of a Class entry. The cache is
    /// write-once; a second resolution must agree with the first.
    pub fn cache_class(&mut self, index: u16, class: ClassId) -> VmResult<()> {
        match self.entry_mut(index)? {
            PoolEntry::Class { resolved, .. } => {
                if resolved.map_or(true, |existing| existing == class) {
                    *resolved = Some(class);
                    Ok(())
                } else {
                    Err(VmError::internal(format!(
                        "constant pool class cache at {index} repopulated with a different class"
                    )))
                }
            }
            other => Err(wrong_tag(index, "Class", other)),
        }
    }

    /// `(class_index, name, descriptor, cached)` of the Fieldref at `index`.
    pub fn field_ref(&self, index: u16) -> VmResult<(u16, NameKey, NameKey, Option<FieldId>)> {
        match self.entry(index)? {
            PoolEntry::FieldRef {
                class_index,
                name,
                descriptor,
                resolved,
            } => Ok((*class_index, *name, *descriptor, *resolved)),
            other => Err(wrong_tag(index, "Fieldref", other)),
        }
    }

    /// Populates the write-once resolution cache of a Fieldref.
    pub fn cache_field(&mut self, index: u16, field: FieldId) -> VmResult<()> {
        match self.entry_mut(index)? {
            PoolEntry::FieldRef { resolved, .. } => {
                *resolved = Some(field);
                Ok(())
            }
            other => Err(wrong_tag(index, "Fieldref", other)),
        }
    }

    /// `(class_index, name, descriptor, cached)` of the Methodref (or
    /// InterfaceMethodref when `interface` is set) at `index`.
    pub fn method_ref(
        &self,
        index: u16,
        interface: bool,
    ) -> VmResult<(u16, NameKey, NameKey, Option<MethodId>)> {
        match (self.entry(index)?, interface) {
            (
                PoolEntry::MethodRef {
                    class_index,
                    name,
                    descriptor,
                    resolved,
                    ..
                },
                false,
            )
            | (
                PoolEntry::InterfaceMethodRef {
                    class_index,
                    name,
                    descriptor,
                    resolved,
                    ..
                },
                true,
            ) => Ok((*class_index, *name, *descriptor, *resolved)),
            (other, false) => Err(wrong_tag(index, "Methodref", other)),
            (other, true) => Err(wrong_tag(index, "InterfaceMethodref", other)),
        }
    }

    /// Populates the write-once resolution cache of a method reference.
    pub fn cache_method(&mut self, index: u16, method: MethodId) -> VmResult<()> {
        match self.entry_mut(index)? {
            PoolEntry::MethodRef { resolved, .. }
            | PoolEntry::InterfaceMethodRef { resolved, .. } => {
                *resolved = Some(method);
                Ok(())
            }
            other => Err(wrong_tag(index, "Methodref", other)),
        }
    }

    /// Reads the invocation-site inline cache of a method reference.
    pub fn site_cache(&self, index: u16) -> VmResult<Option<(ClassId, MethodId)>> {
        match self.entry(index)? {
            PoolEntry::MethodRef { site_cache, .. }
            | PoolEntry::InterfaceMethodRef { site_cache, .. } => Ok(*site_cache),
            other => Err(wrong_tag(index, "Methodref", other)),
        }
    }

    /// Updates the invocation-site inline cache. Unlike the resolution
    /// cache this is refreshed on every receiver miss.
    pub fn update_site_cache(
        &mut self,
        index: u16,
        receiver: ClassId,
        method: MethodId,
    ) -> VmResult<()> {
        match self.entry_mut(index)? {
            PoolEntry::MethodRef { site_cache, .. }
            | PoolEntry::InterfaceMethodRef { site_cache, .. } => {
                *site_cache = Some((receiver, method));
                Ok(())
            }
            other => Err(wrong_tag(index, "Methodref", other)),
        }
    }
}

fn wrong_tag(index: u16, expected: &str, found: &PoolEntry) -> VmError {
    VmError::internal(format!(
        "constant pool entry {index} is {found:?}, expected {expected}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(entry: PoolEntry) -> RuntimePool {
        RuntimePool::new(vec![PoolEntry::Unused, entry])
    }

    #[test]
    fn class_cache_is_write_once() {
        let mut pool = pool_with(PoolEntry::Class {
            name: NameKey(3),
            resolved: None,
        });
        assert_eq!(pool.resolved_class(1).unwrap(), None);
        pool.cache_class(1, ClassId(5)).unwrap();
        assert_eq!(pool.resolved_class(1).unwrap(), Some(ClassId(5)));
        // Re-caching the same class is a no-op; a different class is fatal.
        pool.cache_class(1, ClassId(5)).unwrap();
        assert!(pool.cache_class(1, ClassId(6)).is_err());
    }

    #[test]
    fn site_cache_may_be_refreshed() {
        let mut pool = pool_with(PoolEntry::MethodRef {
            class_index: 2,
            name: NameKey(0),
            descriptor: NameKey(1),
            resolved: None,
            site_cache: None,
        });
        pool.update_site_cache(
            1,
            ClassId(1),
            MethodId {
                class: ClassId(1),
                index: 0,
            },
        )
        .unwrap();
        pool.update_site_cache(
            1,
            ClassId(2),
            MethodId {
                class: ClassId(2),
                index: 1,
            },
        )
        .unwrap();
        let (receiver, _) = pool.site_cache(1).unwrap().unwrap();
        assert_eq!(receiver, ClassId(2));
    }

    #[test]
    fn tag_mismatch_is_fatal() {
        let pool = pool_with(PoolEntry::Integer(9));
        assert!(pool.class_name(1).is_err());
        assert!(pool.field_ref(1).is_err());
    }
}
