//! Virtual dispatch, inline caches, opcode rewriting, and the class
//! initialisation barrier, observed through real bytecode.

mod common;

use common::{run_static, static_cell, u16b, vm_with};
use mjvm_classfile::{ClassFileBuilder, MethodBody};
use mjvm_vm::{OpCode, StackMaps};

fn trivial_init(b: &mut ClassFileBuilder, super_name: &str) {
    let super_init = b.method_ref(super_name, "<init>", "()V");
    let mut code = vec![0x2A, 0xB7]; // aload_0, invokespecial super.<init>
    code.extend_from_slice(&u16b(super_init));
    code.push(0xB1);
    b.add_method(
        0x0001,
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
}

fn int_method(b: &mut ClassFileBuilder, name: &str, value: u8) {
    b.add_method(
        0x0001,
        name,
        "()I",
        MethodBody {
            max_stack: 1,
            max_locals: 1,
            code: vec![0x03 + value, 0xAC], // iconst_<value>, ireturn
            handlers: vec![],
            stack_map: None,
        },
    );
}

#[test]
fn virtual_dispatch_selects_by_runtime_type_and_caches() {
    let mut a = ClassFileBuilder::new("demo/A", Some("java/lang/Object"));
    trivial_init(&mut a, "java/lang/Object");
    int_method(&mut a, "foo", 1);

    let mut b = ClassFileBuilder::new("demo/B", Some("demo/A"));
    trivial_init(&mut b, "demo/A");
    int_method(&mut b, "foo", 2);

    let mut main = ClassFileBuilder::new("demo/Main", Some("java/lang/Object"));
    main.add_field(0x0009, "first", "I");
    main.add_field(0x0009, "second", "I");
    let first = main.field_ref("demo/Main", "first", "I");
    let second = main.field_ref("demo/Main", "second", "I");
    let class_a = main.class_const("demo/A");
    let class_b = main.class_const("demo/B");
    let a_init = main.method_ref("demo/A", "<init>", "()V");
    let b_init = main.method_ref("demo/B", "<init>", "()V");
    let a_foo = main.method_ref("demo/A", "foo", "()I");

    // ((A) new B()).foo() then (new A()).foo() through the same call site
    // constant: the second receiver forces an inline-cache update.
    let mut code = Vec::new();
    code.push(0xBB); // new B
    code.extend_from_slice(&u16b(class_b));
    code.push(0x59); // dup
    code.push(0xB7); // invokespecial B.<init>
    code.extend_from_slice(&u16b(b_init));
    code.push(0xB6); // invokevirtual A.foo
    code.extend_from_slice(&u16b(a_foo));
    code.push(0xB3); // putstatic first
    code.extend_from_slice(&u16b(first));
    code.push(0xBB); // new A
    code.extend_from_slice(&u16b(class_a));
    code.push(0x59);
    code.push(0xB7); // invokespecial A.<init>
    code.extend_from_slice(&u16b(a_init));
    code.push(0xB6); // invokevirtual A.foo, same pool entry
    code.extend_from_slice(&u16b(a_foo));
    code.push(0xB3); // putstatic second
    code.extend_from_slice(&u16b(second));
    code.push(0xB1);

    main.add_method(
        0x0009,
        "main",
        "()V",
        MethodBody {
            max_stack: 2,
            max_locals: 0,
            code,
            handlers: vec![],
            stack_map: None,
        },
    );

    let mut vm = vm_with(vec![
        ("demo/A", a.build()),
        ("demo/B", b.build()),
        ("demo/Main", main.build()),
    ]);
    let class = run_static(&mut vm, "demo/Main", "main", "()V");

    assert_eq!(static_cell(&mut vm, class, "first") as i32, 2);
    assert_eq!(static_cell(&mut vm, class, "second") as i32, 1);

    // The call site was rewritten to the fast variant and its inline cache
    // now holds the A receiver from the second call.
    let main_key = vm.intern("demo/Main");
    let main_id = vm.classes.lookup(main_key).unwrap();
    let method = common::find_static(&mut vm, main_id, "main", "()V");
    let body = vm.bytecode(method).unwrap();
    let site = body
        .code
        .iter()
        .filter(|&&b| {
            b == OpCode::INVOKEVIRTUAL as u8 || b == OpCode::INVOKEVIRTUAL_FAST as u8
        })
        .count();
    assert_eq!(site, 2);
    assert!(body
        .code
        .iter()
        .all(|&b| b != OpCode::INVOKEVIRTUAL as u8));

    let (receiver, target) = vm
        .pool(main_id)
        .unwrap()
        .site_cache(a_foo)
        .unwrap()
        .expect("cache populated");
    let a_key = vm.intern("demo/A");
    let a_id = vm.classes.lookup(a_key).unwrap();
    assert_eq!(receiver, a_id);
    assert_eq!(target.class, a_id);
}

#[test]
fn clinit_barrier_runs_super_first_and_reexecutes_the_opcode() {
    // Base.<clinit> runs before Derived.<clinit>; the getstatic that
    // faulted completes afterwards with both initialisers applied.
    let mut base = ClassFileBuilder::new("demo/Base", Some("java/lang/Object"));
    base.add_field(0x0009, "order", "I");
    let base_order = base.field_ref("demo/Base", "order", "I");
    let mut code = vec![0x04, 0xB3]; // iconst_1, putstatic order
    code.extend_from_slice(&u16b(base_order));
    code.push(0xB1);
    base.add_method(
        0x0008,
        "<clinit>",
        "()V",
        MethodBody {
            max_stack: 1,
            max_locals: 0,
            code,
            handlers: vec![],
            stack_map: None,
        },
    );

    let mut derived = ClassFileBuilder::new("demo/Derived", Some("demo/Base"));
    derived.add_field(0x0009, "value", "I");
    let derived_value = derived.field_ref("demo/Derived", "value", "I");
    let base_order_ref = derived.field_ref("demo/Base", "order", "I");
    // Derived.<clinit>: value = Base.order * 10 + 2 -- proves Base ran first.
    let ten = derived.int_const(10);
    let mut code = Vec::new();
    code.push(0xB2); // getstatic Base.order
    code.extend_from_slice(&u16b(base_order_ref));
    code.push(0x12); // ldc 10
    code.push(ten as u8);
    code.push(0x68); // imul
    code.push(0x05); // iconst_2
    code.push(0x60); // iadd
    code.push(0xB3); // putstatic value
    code.extend_from_slice(&u16b(derived_value));
    code.push(0xB1);
    derived.add_method(
        0x0008,
        "<clinit>",
        "()V",
        MethodBody {
            max_stack: 2,
            max_locals: 0,
            code,
            handlers: vec![],
            stack_map: None,
        },
    );

    let mut main = ClassFileBuilder::new("demo/Init", Some("java/lang/Object"));
    main.add_field(0x0009, "observed", "I");
    let observed = main.field_ref("demo/Init", "observed", "I");
    let derived_value_ref = main.field_ref("demo/Derived", "value", "I");
    let mut code = Vec::new();
    code.push(0xB2); // getstatic Derived.value -- faults for initialisation
    code.extend_from_slice(&u16b(derived_value_ref));
    code.push(0xB3);
    code.extend_from_slice(&u16b(observed));
    code.push(0xB1);
    main.add_method(
        0x0009,
        "main",
        "()V",
        MethodBody {
            max_stack: 1,
            max_locals: 0,
            code,
            handlers: vec![],
            stack_map: None,
        },
    );

    let mut vm = vm_with(vec![
        ("demo/Base", base.build()),
        ("demo/Derived", derived.build()),
        ("demo/Init", main.build()),
    ]);
    let class = run_static(&mut vm, "demo/Init", "main", "()V");
    assert_eq!(static_cell(&mut vm, class, "observed") as i32, 12);

    let derived_key = vm.intern("demo/Derived");
    let derived_id = vm.classes.lookup(derived_key).unwrap();
    assert_eq!(
        vm.classes.instance(derived_id).unwrap().status,
        mjvm_vm::ClassStatus::Ready
    );
}

#[test]
fn getstatic_rewrites_to_the_width_matched_fast_variant() {
    let mut b = ClassFileBuilder::new("demo/Widths", Some("java/lang/Object"));
    b.add_field(0x0009, "word", "I");
    b.add_field(0x0009, "pointer", "Ljava/lang/Object;");
    b.add_field(0x0009, "wide", "J");
    b.add_field(0x0009, "sink", "I");
    let word = b.field_ref("demo/Widths", "word", "I");
    let pointer = b.field_ref("demo/Widths", "pointer", "Ljava/lang/Object;");
    let wide = b.field_ref("demo/Widths", "wide", "J");
    let sink = b.field_ref("demo/Widths", "sink", "I");

    let mut code = Vec::new();
    code.push(0xB2); // getstatic word
    code.extend_from_slice(&u16b(word));
    code.push(0xB3); // putstatic sink
    code.extend_from_slice(&u16b(sink));
    code.push(0xB2); // getstatic pointer
    code.extend_from_slice(&u16b(pointer));
    code.push(0x57); // pop
    code.push(0xB2); // getstatic wide
    code.extend_from_slice(&u16b(wide));
    code.push(0x58); // pop2
    code.push(0xB1);

    b.add_method(
        0x0009,
        "main",
        "()V",
        MethodBody {
            max_stack: 2,
            max_locals: 0,
            code,
            handlers: vec![],
            stack_map: None,
        },
    );

    let mut vm = vm_with(vec![("demo/Widths", b.build())]);
    let class = run_static(&mut vm, "demo/Widths", "main", "()V");

    let method = common::find_static(&mut vm, class, "main", "()V");
    let code = &vm.bytecode(method).unwrap().code;
    assert_eq!(code[0], OpCode::GETSTATIC_FAST as u8);
    assert_eq!(code[3], OpCode::PUTSTATIC_FAST as u8);
    assert_eq!(code[6], OpCode::GETSTATICP_FAST as u8);
    assert_eq!(code[10], OpCode::GETSTATIC2_FAST as u8);
}

#[test]
fn verified_methods_get_pointer_maps() {
    let mut b = ClassFileBuilder::new("demo/Maps", Some("java/lang/Object"));
    b.add_method(
        0x0009,
        "main",
        "()V",
        MethodBody {
            max_stack: 0,
            max_locals: 0,
            code: vec![0xB1],
            handlers: vec![],
            stack_map: Some(vec![]),
        },
    );
    let mut vm = vm_with(vec![("demo/Maps", b.build())]);
    let class = run_static(&mut vm, "demo/Maps", "main", "()V");
    let method = common::find_static(&mut vm, class, "main", "()V");
    assert!(matches!(
        vm.bytecode(method).unwrap().stack_maps,
        StackMaps::Pointer(_)
    ));
}

#[test]
fn string_constants_intern_one_object_per_slot() {
    let mut b = ClassFileBuilder::new("demo/Strings", Some("java/lang/Object"));
    b.add_field(0x0009, "first", "Ljava/lang/String;");
    b.add_field(0x0009, "second", "Ljava/lang/String;");
    let first = b.field_ref("demo/Strings", "first", "Ljava/lang/String;");
    let second = b.field_ref("demo/Strings", "second", "Ljava/lang/String;");
    let hello = b.string_const("hello");

    let mut code = Vec::new();
    code.push(0x12); // ldc "hello"
    code.push(hello as u8);
    code.push(0xB3);
    code.extend_from_slice(&u16b(first));
    code.push(0x12); // ldc "hello" again
    code.push(hello as u8);
    code.push(0xB3);
    code.extend_from_slice(&u16b(second));
    code.push(0xB1);

    b.add_method(
        0x0009,
        "main",
        "()V",
        MethodBody {
            max_stack: 1,
            max_locals: 0,
            code,
            handlers: vec![],
            stack_map: None,
        },
    );

    let mut vm = vm_with(vec![("demo/Strings", b.build())]);
    let class = run_static(&mut vm, "demo/Strings", "main", "()V");
    let first = static_cell(&mut vm, class, "first");
    let second = static_cell(&mut vm, class, "second");
    assert_ne!(first, 0);
    assert_eq!(first, second);
    assert_eq!(vm.string_value(mjvm_vm::ObjRef(first)), Some("hello"));
}
