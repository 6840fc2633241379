//! The native-method registry.
//!
//! `lookup` is consulted once per native method during loading; the
//! returned index is stored in the method body and invoked with the
//! argument cells still on the caller's operand stack. A native function
//! pops its own arguments (receiver first from the bottom) and pushes its
//! return value, exactly like a bytecode body would have.
//!
//! A native may be registered asynchronous: entering it suspends the
//! calling thread and bumps a process-wide counter the collector consults;
//! the embedder later completes it with the return cells.

use hashbrown::HashMap;

use crate::error::VmResult;
use crate::vm::Vm;

/// A native method body.
pub type NativeFn = fn(&mut Vm) -> VmResult<()>;

#[derive(Clone)]
struct NativeEntry {
    function: NativeFn,
    asynchronous: bool,
}

/// Registry keyed by `class.name:descriptor`.
#[derive(Default)]
pub struct NativeRegistry {
    entries: Vec<NativeEntry>,
    index: HashMap<String, u32>,
}

impl NativeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn key(class: &str, name: &str, descriptor: &str) -> String {
        format!("{class}.{name}:{descriptor}")
    }

    /// Registers a synchronous native method.
    pub fn register(&mut self, class: &str, name: &str, descriptor: &str, function: NativeFn) {
        self.register_entry(class, name, descriptor, function, false);
    }

    /// Registers an asynchronous native method.
    pub fn register_async(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
        function: NativeFn,
    ) {
        self.register_entry(class, name, descriptor, function, true);
    }

    fn register_entry(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
        function: NativeFn,
        asynchronous: bool,
    ) {
        let key = Self::key(class, name, descriptor);
        let id = self.entries.len() as u32;
        self.entries.push(NativeEntry {
            function,
            asynchronous,
        });
        self.index.insert(key, id);
    }

    /// The load-time lookup hook: returns the registry index for a native
    /// method, or `None` when no implementation was registered.
    pub fn lookup(&self, class: &str, name: &str, descriptor: &str) -> Option<u32> {
        self.index.get(&Self::key(class, name, descriptor)).copied()
    }

    /// The function registered under `id`.
    pub fn function(&self, id: u32) -> Option<NativeFn> {
        self.entries.get(id as usize).map(|e| e.function)
    }

    /// True when the native under `id` is asynchronous.
    pub fn is_asynchronous(&self, id: u32) -> bool {
        self.entries
            .get(id as usize)
            .map(|e| e.asynchronous)
            .unwrap_or(false)
    }

    /// Number of registered natives.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeRegistry")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nop(_vm: &mut Vm) -> VmResult<()> {
        Ok(())
    }

    #[test]
    fn lookup_finds_registered_natives() {
        let mut reg = NativeRegistry::new();
        reg.register("java/lang/Object", "hashCode", "()I", nop);
        let id = reg.lookup("java/lang/Object", "hashCode", "()I").unwrap();
        assert!(reg.function(id).is_some());
        assert!(!reg.is_asynchronous(id));
        assert!(reg.lookup("java/lang/Object", "hashCode", "()J").is_none());
    }

    #[test]
    fn async_flag_is_tracked() {
        let mut reg = NativeRegistry::new();
        reg.register_async("demo/Io", "read", "()I", nop);
        let id = reg.lookup("demo/Io", "read", "()I").unwrap();
        assert!(reg.is_asynchronous(id));
    }
}
