//! Built-in native methods.
//!
//! The handful of natives the core itself must provide for programs to
//! reach the monitor engine and the timer: identity hash, wait/notify,
//! sleep, and yield. Everything else is the embedder's to register. A
//! native pops its own arguments from the caller's operand stack,
//! receiver first from the bottom, and pushes its return value.

use crate::error::VmResult;
use crate::jump_table::{pop_i64, pop_ref, push_i32};
use crate::native::NativeRegistry;
use crate::vm::Vm;

/// Registers the core natives into `registry`.
pub(crate) fn install(registry: &mut NativeRegistry) {
    registry.register("java/lang/Object", "hashCode", "()I", object_hash_code);
    registry.register("java/lang/Object", "wait", "()V", object_wait);
    registry.register("java/lang/Object", "wait", "(J)V", object_wait_timed);
    registry.register("java/lang/Object", "notify", "()V", object_notify);
    registry.register("java/lang/Object", "notifyAll", "()V", object_notify_all);
    registry.register("java/lang/System", "identityHashCode", "(Ljava/lang/Object;)I", object_hash_code);
    registry.register("java/lang/Thread", "sleep", "(J)V", thread_sleep);
    registry.register("java/lang/Thread", "yield", "()V", thread_yield);
}

fn object_hash_code(vm: &mut Vm) -> VmResult<()> {
    let receiver = pop_ref(vm)?;
    let hash = vm.identity_hash(receiver)?;
    push_i32(vm, hash as i32)
}

fn object_wait(vm: &mut Vm) -> VmResult<()> {
    let receiver = pop_ref(vm)?;
    vm.monitor_wait(receiver, 0)
}

fn object_wait_timed(vm: &mut Vm) -> VmResult<()> {
    let timeout = pop_i64(vm)?;
    let receiver = pop_ref(vm)?;
    vm.monitor_wait(receiver, timeout)
}

fn object_notify(vm: &mut Vm) -> VmResult<()> {
    let receiver = pop_ref(vm)?;
    vm.monitor_notify(receiver, false)
}

fn object_notify_all(vm: &mut Vm) -> VmResult<()> {
    let receiver = pop_ref(vm)?;
    vm.monitor_notify(receiver, true)
}

fn thread_sleep(vm: &mut Vm) -> VmResult<()> {
    let millis = pop_i64(vm)?;
    vm.sleep_current(millis)
}

fn thread_yield(vm: &mut Vm) -> VmResult<()> {
    vm.yield_current()
}
