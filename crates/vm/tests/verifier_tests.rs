//! Verifier acceptance and rejection through complete class files.

mod common;

use common::{u16b, vm_with};
use mjvm_classfile::{ClassFileBuilder, MethodBody, StackMapEntry, StackMapItem};
use mjvm_vm::{throwable, ClassStatus, VmError};

fn load(vm: &mut mjvm_vm::Vm, name: &str) -> mjvm_vm::ClassId {
    vm.load_class_by_name(name).expect("load")
}

#[test]
fn straight_line_method_verifies_without_maps() {
    let mut b = ClassFileBuilder::new("demo/Straight", Some("java/lang/Object"));
    b.add_method(
        0x0009,
        "five",
        "()I",
        MethodBody {
            max_stack: 2,
            max_locals: 0,
            code: vec![0x05, 0x06, 0x60, 0xAC], // iconst_2 iconst_3 iadd ireturn
            handlers: vec![],
            stack_map: None,
        },
    );
    let mut vm = vm_with(vec![("demo/Straight", b.build())]);
    let id = load(&mut vm, "demo/Straight");
    vm.verify_class(id).unwrap();
    assert_eq!(vm.classes.instance(id).unwrap().status, ClassStatus::Verified);
}

#[test]
fn branch_with_matching_map_verifies() {
    let mut b = ClassFileBuilder::new("demo/Abs", Some("java/lang/Object"));
    // abs(i) = i >= 0 ? i : -i
    let code = vec![
        0x1A, // iload_0
        0x9C, 0x00, 0x06, // ifge -> 7
        0x1A, // iload_0
        0x74, // ineg
        0xAC, // ireturn
        0x1A, // 7: iload_0
        0xAC, // ireturn
    ];
    b.add_method(
        0x0009,
        "abs",
        "(I)I",
        MethodBody {
            max_stack: 1,
            max_locals: 1,
            code,
            handlers: vec![],
            stack_map: Some(vec![StackMapEntry {
                offset: 7,
                locals: vec![StackMapItem::Integer],
                stack: vec![],
            }]),
        },
    );
    let mut vm = vm_with(vec![("demo/Abs", b.build())]);
    let id = load(&mut vm, "demo/Abs");
    vm.verify_class(id).unwrap();
}

#[test]
fn branch_target_without_map_is_rejected() {
    let mut b = ClassFileBuilder::new("demo/NoMap", Some("java/lang/Object"));
    let code = vec![
        0x1A, 0x9C, 0x00, 0x06, 0x1A, 0x74, 0xAC, 0x1A, 0xAC,
    ];
    b.add_method(
        0x0009,
        "abs",
        "(I)I",
        MethodBody {
            max_stack: 1,
            max_locals: 1,
            code,
            handlers: vec![],
            stack_map: None,
        },
    );
    let mut vm = vm_with(vec![("demo/NoMap", b.build())]);
    let id = load(&mut vm, "demo/NoMap");
    let err = vm.verify_class(id).unwrap_err();
    assert!(matches!(
        err,
        VmError::Throw { ref class_name, .. } if class_name == throwable::VERIFY
    ));
    assert_eq!(vm.classes.instance(id).unwrap().status, ClassStatus::Error);
}

#[test]
fn map_claiming_integer_for_a_reference_local_is_rejected() {
    // The descriptor mandates a reference in local 0; the map at offset 0
    // claims an Integer. The error names the class and the class becomes
    // erroneous.
    let mut b = ClassFileBuilder::new("demo/Claim", Some("java/lang/Object"));
    b.add_method(
        0x0009,
        "bad",
        "(Ljava/lang/Object;)V",
        MethodBody {
            max_stack: 0,
            max_locals: 1,
            code: vec![0xB1],
            handlers: vec![],
            stack_map: Some(vec![StackMapEntry {
                offset: 0,
                locals: vec![StackMapItem::Integer],
                stack: vec![],
            }]),
        },
    );
    let mut vm = vm_with(vec![("demo/Claim", b.build())]);
    let id = load(&mut vm, "demo/Claim");
    let err = vm.verify_class(id).unwrap_err();
    let VmError::Throw { class_name, message, .. } = &err else {
        panic!("expected a throw, got {err:?}");
    };
    assert_eq!(class_name, throwable::VERIFY);
    assert!(message.contains("demo.Claim"), "message was {message:?}");
    assert_eq!(vm.classes.instance(id).unwrap().status, ClassStatus::Error);
}

#[test]
fn stack_underflow_is_rejected() {
    let mut b = ClassFileBuilder::new("demo/Under", Some("java/lang/Object"));
    b.add_method(
        0x0009,
        "bad",
        "()V",
        MethodBody {
            max_stack: 2,
            max_locals: 0,
            code: vec![0x60, 0xB1], // iadd on an empty stack
            handlers: vec![],
            stack_map: None,
        },
    );
    let mut vm = vm_with(vec![("demo/Under", b.build())]);
    let id = load(&mut vm, "demo/Under");
    assert!(vm.verify_class(id).is_err());
}

#[test]
fn stack_overflow_is_rejected() {
    let mut b = ClassFileBuilder::new("demo/Over", Some("java/lang/Object"));
    b.add_method(
        0x0009,
        "bad",
        "()V",
        MethodBody {
            max_stack: 1,
            max_locals: 0,
            code: vec![0x03, 0x03, 0xB1], // two pushes into max_stack 1
            handlers: vec![],
            stack_map: None,
        },
    );
    let mut vm = vm_with(vec![("demo/Over", b.build())]);
    let id = load(&mut vm, "demo/Over");
    assert!(vm.verify_class(id).is_err());
}

#[test]
fn falling_off_the_end_is_rejected() {
    let mut b = ClassFileBuilder::new("demo/Fall", Some("java/lang/Object"));
    b.add_method(
        0x0009,
        "bad",
        "()V",
        MethodBody {
            max_stack: 1,
            max_locals: 0,
            code: vec![0x03, 0x57], // iconst_0, pop -- no return
            handlers: vec![],
            stack_map: None,
        },
    );
    let mut vm = vm_with(vec![("demo/Fall", b.build())]);
    let id = load(&mut vm, "demo/Fall");
    assert!(vm.verify_class(id).is_err());
}

#[test]
fn subroutine_opcodes_are_rejected() {
    let mut b = ClassFileBuilder::new("demo/Jsr", Some("java/lang/Object"));
    b.add_method(
        0x0009,
        "bad",
        "()V",
        MethodBody {
            max_stack: 1,
            max_locals: 1,
            code: vec![0xA8, 0x00, 0x03, 0xB1], // jsr +3, return
            handlers: vec![],
            stack_map: None,
        },
    );
    let mut vm = vm_with(vec![("demo/Jsr", b.build())]);
    let id = load(&mut vm, "demo/Jsr");
    assert!(vm.verify_class(id).is_err());
}

#[test]
fn uninitialized_object_may_not_cross_a_backward_branch() {
    let mut b = ClassFileBuilder::new("demo/BackNew", Some("java/lang/Object"));
    let object = b.class_const("java/lang/Object");
    // 0: new Object; 3: goto 0 -- the NewObject flows backward.
    let mut code = vec![0xBB];
    code.extend_from_slice(&u16b(object));
    code.push(0xA7);
    code.extend_from_slice(&(-3i16 as u16).to_be_bytes());
    b.add_method(
        0x0009,
        "bad",
        "()V",
        MethodBody {
            max_stack: 2,
            max_locals: 0,
            code,
            handlers: vec![],
            stack_map: Some(vec![StackMapEntry {
                offset: 0,
                locals: vec![],
                stack: vec![],
            }]),
        },
    );
    let mut vm = vm_with(vec![("demo/BackNew", b.build())]);
    let id = load(&mut vm, "demo/BackNew");
    assert!(vm.verify_class(id).is_err());
}

#[test]
fn init_call_on_a_located_new_is_accepted() {
    let mut b = ClassFileBuilder::new("demo/Ctor", Some("java/lang/Object"));
    let object = b.class_const("java/lang/Object");
    let object_init = b.method_ref("java/lang/Object", "<init>", "()V");
    let mut code = vec![0xBB]; // new Object
    code.extend_from_slice(&u16b(object));
    code.push(0x59); // dup
    code.push(0xB7); // invokespecial Object.<init>
    code.extend_from_slice(&u16b(object_init));
    code.push(0x57); // pop the initialised reference
    code.push(0xB1);
    b.add_method(
        0x0009,
        "make",
        "()V",
        MethodBody {
            max_stack: 2,
            max_locals: 0,
            code,
            handlers: vec![],
            stack_map: None,
        },
    );
    let mut vm = vm_with(vec![("demo/Ctor", b.build())]);
    let id = load(&mut vm, "demo/Ctor");
    vm.verify_class(id).unwrap();
}

#[test]
fn init_call_on_an_initialized_reference_is_rejected() {
    let mut b = ClassFileBuilder::new("demo/ReCtor", Some("java/lang/Object"));
    let object = b.class_const("java/lang/Object");
    let object_init = b.method_ref("java/lang/Object", "<init>", "()V");
    // new; dup; <init>; <init> again on the now-initialised value.
    let mut code = vec![0xBB];
    code.extend_from_slice(&u16b(object));
    code.push(0x59);
    code.push(0x59);
    code.push(0xB7);
    code.extend_from_slice(&u16b(object_init));
    code.push(0xB7);
    code.extend_from_slice(&u16b(object_init));
    code.push(0xB1);
    b.add_method(
        0x0009,
        "bad",
        "()V",
        MethodBody {
            max_stack: 3,
            max_locals: 0,
            code,
            handlers: vec![],
            stack_map: None,
        },
    );
    let mut vm = vm_with(vec![("demo/ReCtor", b.build())]);
    let id = load(&mut vm, "demo/ReCtor");
    assert!(vm.verify_class(id).is_err());
}

#[test]
fn map_new_object_must_name_a_real_new_site() {
    let mut b = ClassFileBuilder::new("demo/Phantom", Some("java/lang/Object"));
    // The map at 1 claims a NewObject produced at offset 0, but offset 0
    // holds a return, so the simulator never observed a new there.
    b.add_method(
        0x0009,
        "bad",
        "()V",
        MethodBody {
            max_stack: 1,
            max_locals: 1,
            code: vec![0xB1, 0xB1],
            handlers: vec![],
            stack_map: Some(vec![StackMapEntry {
                offset: 1,
                locals: vec![StackMapItem::NewObject(0)],
                stack: vec![],
            }]),
        },
    );
    let mut vm = vm_with(vec![("demo/Phantom", b.build())]);
    let id = load(&mut vm, "demo/Phantom");
    assert!(vm.verify_class(id).is_err());
}
