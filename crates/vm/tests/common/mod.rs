//! Shared test scaffolding: a minimal bootstrap classpath built with the
//! class-file builder, plus helpers for reading results back out of
//! static fields after a run.
#![allow(dead_code)]

use mjvm_classfile::{ClassFileBuilder, MethodBody};
use mjvm_vm::{Cell, ClassId, MapClassSource, ObjRef, ObjectBody, Vm, VmOptions};

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_NATIVE: u16 = 0x0100;

/// Encodes a 16-bit constant-pool index for hand-written bytecode.
pub fn u16b(index: u16) -> [u8; 2] {
    index.to_be_bytes()
}

/// `java/lang/Object`: the root class, with the monitor natives.
pub fn object_bytes() -> Vec<u8> {
    let mut b = ClassFileBuilder::new("java/lang/Object", None);
    b.add_method(
        ACC_PUBLIC,
        "<init>",
        "()V",
        MethodBody {
            max_stack: 0,
            max_locals: 1,
            code: vec![0xB1], // return
            handlers: vec![],
            stack_map: None,
        },
    );
    b.add_body_less_method(ACC_PUBLIC | ACC_NATIVE, "hashCode", "()I");
    b.add_body_less_method(ACC_PUBLIC | ACC_NATIVE, "wait", "()V");
    b.add_body_less_method(ACC_PUBLIC | ACC_NATIVE, "wait", "(J)V");
    b.add_body_less_method(ACC_PUBLIC | ACC_NATIVE, "notify", "()V");
    b.add_body_less_method(ACC_PUBLIC | ACC_NATIVE, "notifyAll", "()V");
    b.build()
}

/// `java/lang/Throwable`: carries the message slot the VM fills in.
pub fn throwable_bytes() -> Vec<u8> {
    let mut b = ClassFileBuilder::new("java/lang/Throwable", Some("java/lang/Object"));
    b.add_field(0x0002, "message", "Ljava/lang/String;");
    let object_init = b.method_ref("java/lang/Object", "<init>", "()V");
    let mut code = vec![0x2A, 0xB7]; // aload_0, invokespecial
    code.extend_from_slice(&u16b(object_init));
    code.push(0xB1); // return
    b.add_method(
        ACC_PUBLIC,
        "<init>",
        "()V",
        MethodBody {
            max_stack: 1,
            max_locals: 1,
            code,
            handlers: vec![],
            stack_map: None,
        },
    );
    b.build()
}

/// A plain subclass of Throwable under the given name.
pub fn throwable_subclass_bytes(name: &str) -> Vec<u8> {
    ClassFileBuilder::new(name, Some("java/lang/Throwable")).build()
}

/// `java/lang/Thread` with the static timer natives.
pub fn thread_bytes() -> Vec<u8> {
    let mut b = ClassFileBuilder::new("java/lang/Thread", Some("java/lang/Object"));
    b.add_body_less_method(ACC_PUBLIC | ACC_STATIC | ACC_NATIVE, "sleep", "(J)V");
    b.add_body_less_method(ACC_PUBLIC | ACC_STATIC | ACC_NATIVE, "yield", "()V");
    b.build()
}

/// Builds a class source preloaded with the bootstrap classpath.
pub fn bootstrap_source() -> MapClassSource {
    let mut source = MapClassSource::new();
    source.insert("java/lang/Object", object_bytes());
    source.insert(
        "java/lang/String",
        ClassFileBuilder::new("java/lang/String", Some("java/lang/Object")).build(),
    );
    source.insert("java/lang/Throwable", throwable_bytes());
    source.insert("java/lang/Thread", thread_bytes());
    for name in [
        "java/lang/ArithmeticException",
        "java/lang/NullPointerException",
        "java/lang/ArrayIndexOutOfBoundsException",
        "java/lang/ArrayStoreException",
        "java/lang/ClassCastException",
        "java/lang/NegativeArraySizeException",
        "java/lang/IllegalMonitorStateException",
        "java/lang/InterruptedException",
        "java/lang/AbstractMethodError",
        "java/lang/OutOfMemoryError",
        "java/lang/StackOverflowError",
        "java/lang/ClassFormatError",
        "java/lang/NoClassDefFoundError",
        "java/lang/ClassNotFoundException",
        "java/lang/ClassCircularityError",
        "java/lang/IncompatibleClassChangeError",
        "java/lang/VerifyError",
        "java/lang/UnsatisfiedLinkError",
        "java/lang/InstantiationError",
        "java/lang/NoSuchFieldError",
        "java/lang/NoSuchMethodError",
        "java/lang/IllegalAccessError",
    ] {
        source.insert(name, throwable_subclass_bytes(name));
    }
    source
}

/// A VM over the bootstrap classpath plus the given extra classes.
pub fn vm_with(extra: Vec<(&str, Vec<u8>)>) -> Vm {
    let mut source = bootstrap_source();
    for (name, bytes) in extra {
        source.insert(name, bytes);
    }
    Vm::new(VmOptions::default(), Box::new(source)).expect("vm construction")
}

/// Loads `class`, starts its static `name` method as the main thread, and
/// runs the VM to completion.
pub fn run_static(vm: &mut Vm, class: &str, name: &str, descriptor: &str) -> ClassId {
    let class_id = vm.load_class_by_name(class).expect("load");
    let method = find_static(vm, class_id, name, descriptor);
    vm.start_main_thread(method, &[]).expect("start");
    vm.run().expect("run");
    class_id
}

/// Finds a declared static method by name and descriptor.
pub fn find_static(
    vm: &mut Vm,
    class: ClassId,
    name: &str,
    descriptor: &str,
) -> mjvm_vm::MethodId {
    let name_key = vm.intern(name);
    let descriptor_key = vm.intern(descriptor);
    let index = vm
        .classes
        .instance(class)
        .expect("instance class")
        .find_method(name_key, descriptor_key)
        .expect("method present");
    mjvm_vm::MethodId {
        class,
        index,
    }
}

/// Reads the static field `name` of `class` as a single cell.
pub fn static_cell(vm: &mut Vm, class: ClassId, name: &str) -> Cell {
    let (offset, _) = static_field(vm, class, name);
    vm.classes.instance(class).expect("instance class").statics[offset]
}

/// Reads a two-cell static field as an i64.
pub fn static_long(vm: &mut Vm, class: ClassId, name: &str) -> i64 {
    let (offset, _) = static_field(vm, class, name);
    let statics = &vm.classes.instance(class).expect("instance class").statics;
    mjvm_vm::cell::cells_to_i64(statics[offset], statics[offset + 1])
}

fn static_field(vm: &mut Vm, class: ClassId, name: &str) -> (usize, usize) {
    let name_key = vm.intern(name);
    let c = vm.classes.instance(class).expect("instance class");
    let field = c
        .fields
        .iter()
        .find(|f| f.name == name_key && f.is_static())
        .expect("static field present");
    (field.offset as usize, field.cells() as usize)
}

/// Reads the message string out of a throwable object.
pub fn throwable_message(vm: &Vm, exception: ObjRef) -> Option<String> {
    let object = vm.heap.get(exception)?;
    let ObjectBody::Instance(fields) = &object.body else {
        return None;
    };
    // Throwable.message is its first declared instance field.
    let handle = ObjRef(*fields.first()?);
    vm.string_value(handle).map(str::to_string)
}
