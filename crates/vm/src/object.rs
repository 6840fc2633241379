//! Heap objects and the object-header word.
//!
//! The heap is handle-based: an [`ObjRef`] is an index into the object
//! table, with handle 0 reserved for null. This is the collaborator surface
//! the garbage-collector contract describes; allocation happens only
//! through the `alloc_*` entry points and fails softly (the caller raises
//! `OutOfMemoryError`) when the cell budget is exhausted.
//!
//! Every object header encodes the monitor tier of the object in the two
//! low bits of its hash-code word; the remaining 30 bits hold the identity
//! hash, the owning thread, or the monitor index, depending on the tier.

use crate::cell::Cell;
use crate::class::ClassId;

/// Handle of a heap object. Handle 0 is null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(pub u32);

impl ObjRef {
    /// The null reference.
    pub const NULL: ObjRef = ObjRef(0);

    /// True for the null reference.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Monitor tier encoded in the two low bits of the header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTag {
    /// Remainder of the word is the identity hash (0 = not yet computed).
    Unlocked = 0,
    /// Remainder is the owning thread; implicit depth 1, implicit hash 0.
    Simple = 1,
    /// Remainder is the owning thread, which holds `(depth, hash)` in its
    /// extended-lock slot.
    Extended = 2,
    /// Remainder is the index of an inflated monitor record.
    Inflated = 3,
}

const TAG_MASK: u32 = 0x3;
/// The identity hash is confined to 30 bits.
pub const HASH_MASK: u32 = 0x3FFF_FFFF;

/// Payload of one heap object.
#[derive(Debug, Clone)]
pub enum ObjectBody {
    /// Instance fields, laid out by the linker.
    Instance(Vec<Cell>),
    /// Array payload; long/double arrays use two cells per element.
    Array { length: u32, cells: Vec<Cell> },
    /// Backing text of an interned string object.
    StringData(Box<str>),
}

/// One heap object.
#[derive(Debug, Clone)]
pub struct HeapObject {
    pub class: ClassId,
    /// The monitor/hash-code word. See [`LockTag`].
    pub header: u32,
    pub body: ObjectBody,
}

impl HeapObject {
    /// Current monitor tier.
    pub fn lock_tag(&self) -> LockTag {
        match self.header & TAG_MASK {
            0 => LockTag::Unlocked,
            1 => LockTag::Simple,
            2 => LockTag::Extended,
            _ => LockTag::Inflated,
        }
    }

    /// The 30-bit value stored alongside the tag.
    pub fn header_value(&self) -> u32 {
        self.header >> 2
    }

    /// Replaces the whole header word.
    pub fn set_header(&mut self, tag: LockTag, value: u32) {
        self.header = (value << 2) | tag as u32;
    }

    /// Array length, or `None` for non-arrays.
    pub fn array_length(&self) -> Option<u32> {
        match &self.body {
            ObjectBody::Array { length, .. } => Some(*length),
            _ => None,
        }
    }
}

/// Cells charged per object beyond its payload, covering header and class
/// slot.
const OBJECT_OVERHEAD_CELLS: usize = 2;

/// The object table and its allocation budget.
#[derive(Debug)]
pub struct Heap {
    objects: Vec<HeapObject>,
    used_cells: usize,
    budget_cells: usize,
    next_hash: u32,
}

impl Heap {
    /// Creates a heap bounded to `budget_cells` payload cells.
    pub fn new(budget_cells: usize) -> Self {
        Self {
            // Slot 0 backs the null handle and is never touched.
            objects: vec![HeapObject {
                class: ClassId(0),
                header: 0,
                body: ObjectBody::Instance(Vec::new()),
            }],
            used_cells: 0,
            budget_cells,
            next_hash: 0x5EED,
        }
    }

    /// Payload cells currently allocated.
    pub fn used_cells(&self) -> usize {
        self.used_cells
    }

    /// Number of live objects (the null slot excluded).
    pub fn object_count(&self) -> usize {
        self.objects.len() - 1
    }

    fn charge(&mut self, cells: usize) -> bool {
        let total = cells + OBJECT_OVERHEAD_CELLS;
        if self.used_cells + total > self.budget_cells {
            return false;
        }
        self.used_cells += total;
        true
    }

    /// Allocates a zero-initialised instance. `None` means out of memory.
    pub fn alloc_instance(&mut self, class: ClassId, cells: usize) -> Option<ObjRef> {
        if !self.charge(cells) {
            return None;
        }
        let handle = ObjRef(self.objects.len() as u32);
        self.objects.push(HeapObject {
            class,
            header: 0,
            body: ObjectBody::Instance(vec![0; cells]),
        });
        Some(handle)
    }

    /// Allocates a zero-initialised array of `length` elements, each
    /// `element_cells` wide. `None` means out of memory.
    pub fn alloc_array(
        &mut self,
        class: ClassId,
        length: u32,
        element_cells: usize,
    ) -> Option<ObjRef> {
        let cells = length as usize * element_cells;
        if !self.charge(cells) {
            return None;
        }
        let handle = ObjRef(self.objects.len() as u32);
        self.objects.push(HeapObject {
            class,
            header: 0,
            body: ObjectBody::Array {
                length,
                cells: vec![0; cells],
            },
        });
        Some(handle)
    }

    /// Allocates a string object carrying `text`.
    pub fn alloc_string(&mut self, class: ClassId, text: &str) -> Option<ObjRef> {
        let cells = text.len().div_ceil(4);
        if !self.charge(cells) {
            return None;
        }
        let handle = ObjRef(self.objects.len() as u32);
        self.objects.push(HeapObject {
            class,
            header: 0,
            body: ObjectBody::StringData(text.into()),
        });
        Some(handle)
    }

    /// Dereferences a handle. Null and out-of-range handles yield `None`;
    /// callers convert that into `NullPointerException` or a fatal error as
    /// appropriate.
    pub fn get(&self, handle: ObjRef) -> Option<&HeapObject> {
        if handle.is_null() {
            return None;
        }
        self.objects.get(handle.0 as usize)
    }

    /// Mutable dereference; same contract as [`Heap::get`].
    pub fn get_mut(&mut self, handle: ObjRef) -> Option<&mut HeapObject> {
        if handle.is_null() {
            return None;
        }
        self.objects.get_mut(handle.0 as usize)
    }

    /// Produces the next identity hash: 30 bits, never zero, stable once
    /// assigned to an object.
    pub fn next_identity_hash(&mut self) -> u32 {
        // Xorshift keeps the sequence cheap and well spread.
        let mut x = self.next_hash;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.next_hash = x;
        let hash = x & HASH_MASK;
        if hash == 0 {
            self.next_identity_hash()
        } else {
            hash
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_handle_dereferences_to_none() {
        let heap = Heap::new(1024);
        assert!(heap.get(ObjRef::NULL).is_none());
    }

    #[test]
    fn instances_are_zero_initialised() {
        let mut heap = Heap::new(1024);
        let r = heap.alloc_instance(ClassId(1), 3).unwrap();
        let obj = heap.get(r).unwrap();
        assert!(matches!(&obj.body, ObjectBody::Instance(cells) if cells == &vec![0, 0, 0]));
        assert_eq!(obj.lock_tag(), LockTag::Unlocked);
        assert_eq!(obj.header_value(), 0);
    }

    #[test]
    fn budget_exhaustion_returns_none() {
        let mut heap = Heap::new(8);
        assert!(heap.alloc_instance(ClassId(1), 2).is_some());
        assert!(heap.alloc_instance(ClassId(1), 100).is_none());
    }

    #[test]
    fn header_round_trips_tag_and_value() {
        let mut heap = Heap::new(64);
        let r = heap.alloc_instance(ClassId(1), 0).unwrap();
        let obj = heap.get_mut(r).unwrap();
        obj.set_header(LockTag::Extended, 7);
        assert_eq!(obj.lock_tag(), LockTag::Extended);
        assert_eq!(obj.header_value(), 7);
        obj.set_header(LockTag::Unlocked, 0);
        assert_eq!(obj.header, 0);
    }

    #[test]
    fn identity_hashes_are_nonzero_and_30_bit() {
        let mut heap = Heap::new(64);
        for _ in 0..1000 {
            let h = heap.next_identity_hash();
            assert_ne!(h, 0);
            assert_eq!(h & !HASH_MASK, 0);
        }
    }

    #[test]
    fn long_array_payload_is_two_cells_per_element() {
        let mut heap = Heap::new(1024);
        let r = heap.alloc_array(ClassId(2), 3, 2).unwrap();
        let obj = heap.get(r).unwrap();
        assert_eq!(obj.array_length(), Some(3));
        assert!(matches!(&obj.body, ObjectBody::Array { cells, .. } if cells.len() == 6));
    }
}
