//! VM-wide string interning.
//!
//! Class names, member names, and descriptors are interned once and
//! referred to by 16-bit keys afterwards; the loader drops the Utf8 text of
//! a class file as soon as its entries have been collapsed to keys.
//! Equality of interned strings is key equality.

use hashbrown::HashMap;

/// Key of one interned string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NameKey(pub u16);

/// The intern table.
#[derive(Debug, Default)]
pub struct InternTable {
    strings: Vec<Box<str>>,
    index: HashMap<Box<str>, NameKey>,
}

impl InternTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `text`, returning its stable key.
    pub fn intern(&mut self, text: &str) -> NameKey {
        if let Some(&key) = self.index.get(text) {
            return key;
        }
        let key = NameKey(self.strings.len() as u16);
        let boxed: Box<str> = text.into();
        self.strings.push(boxed.clone());
        self.index.insert(boxed, key);
        key
    }

    /// Looks up a key without interning.
    pub fn get(&self, text: &str) -> Option<NameKey> {
        self.index.get(text).copied()
    }

    /// Resolves a key back to its text.
    pub fn resolve(&self, key: NameKey) -> &str {
        &self.strings[key.0 as usize]
    }

    /// Number of interned strings.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// True when nothing has been interned yet.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut table = InternTable::new();
        let a = table.intern("java/lang/Object");
        let b = table.intern("java/lang/Object");
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
        assert_eq!(table.resolve(a), "java/lang/Object");
    }

    #[test]
    fn distinct_strings_get_distinct_keys() {
        let mut table = InternTable::new();
        let a = table.intern("foo");
        let b = table.intern("bar");
        assert_ne!(a, b);
        assert_eq!(table.get("foo"), Some(a));
        assert_eq!(table.get("baz"), None);
    }
}
