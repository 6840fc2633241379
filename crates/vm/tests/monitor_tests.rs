//! Monitor behaviour driven from bytecode: re-entry tiers, wait/notify
//! across threads, and monitor release on unwind.

mod common;

use common::{find_static, run_static, static_cell, u16b, vm_with};
use mjvm_classfile::{ClassFileBuilder, MethodBody};
use mjvm_vm::{LockTag, ObjRef};

/// demo/Lock.main: o = new Object; lock = o; enter x3; exit x2.
fn lock_class() -> Vec<u8> {
    let mut b = ClassFileBuilder::new("demo/Lock", Some("java/lang/Object"));
    b.add_field(0x0009, "lock", "Ljava/lang/Object;");
    let lock = b.field_ref("demo/Lock", "lock", "Ljava/lang/Object;");
    let object = b.class_const("java/lang/Object");
    let object_init = b.method_ref("java/lang/Object", "<init>", "()V");

    let mut code = Vec::new();
    code.push(0xBB); // new Object
    code.extend_from_slice(&u16b(object));
    code.push(0x59); // dup
    code.push(0xB7); // invokespecial <init>
    code.extend_from_slice(&u16b(object_init));
    code.push(0x4B); // astore_0
    code.push(0x2A); // aload_0
    code.push(0xB3); // putstatic lock
    code.extend_from_slice(&u16b(lock));
    for _ in 0..3 {
        code.push(0x2A); // aload_0
        code.push(0xC2); // monitorenter
    }
    for _ in 0..2 {
        code.push(0x2A); // aload_0
        code.push(0xC3); // monitorexit
    }
    code.push(0xB1);

    b.add_method(
        0x0009,
        "main",
        "()V",
        MethodBody {
            max_stack: 2,
            max_locals: 1,
            code,
            handlers: vec![],
            stack_map: None,
        },
    );
    b.build()
}

#[test]
fn triple_enter_double_exit_leaves_a_simple_lock() {
    let mut vm = vm_with(vec![("demo/Lock", lock_class())]);
    let class = run_static(&mut vm, "demo/Lock", "main", "()V");

    // Depth went 3 -> 1; with the identity hash still uncomputed the
    // extended lock simplified back down to a simple lock owned by the
    // main thread.
    let object = ObjRef(static_cell(&mut vm, class, "lock"));
    let header = vm.heap.get(object).unwrap();
    assert_eq!(header.lock_tag(), LockTag::Simple);
    assert_eq!(header.header_value() as u16, 0); // owner: thread 0
}

/// Builds the two-thread wait/notify fixture from the scenario: the
/// waiter takes the lock twice, waits; the notifier notifies and exits.
fn sync_class() -> Vec<u8> {
    let mut b = ClassFileBuilder::new("demo/Sync", Some("java/lang/Object"));
    b.add_field(0x0009, "obj", "Ljava/lang/Object;");
    b.add_field(0x0009, "resumedDepth", "I");
    let obj = b.field_ref("demo/Sync", "obj", "Ljava/lang/Object;");
    let resumed = b.field_ref("demo/Sync", "resumedDepth", "I");
    let object = b.class_const("java/lang/Object");
    let object_init = b.method_ref("java/lang/Object", "<init>", "()V");
    let wait = b.method_ref("java/lang/Object", "wait", "()V");
    let notify = b.method_ref("java/lang/Object", "notify", "()V");

    // <clinit>: obj = new Object()
    let mut code = Vec::new();
    code.push(0xBB);
    code.extend_from_slice(&u16b(object));
    code.push(0x59);
    code.push(0xB7);
    code.extend_from_slice(&u16b(object_init));
    code.push(0xB3);
    code.extend_from_slice(&u16b(obj));
    code.push(0xB1);
    b.add_method(
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

    // waiter: enter twice, wait, record, exit twice.
    let mut code = Vec::new();
    code.push(0xB2); // getstatic obj
    code.extend_from_slice(&u16b(obj));
    code.push(0x4B); // astore_0
    code.push(0x2A);
    code.push(0xC2); // monitorenter
    code.push(0x2A);
    code.push(0xC2); // monitorenter (depth 2)
    code.push(0x2A);
    code.push(0xB6); // invokevirtual wait()
    code.extend_from_slice(&u16b(wait));
    code.push(0x04); // iconst_1
    code.push(0xB3); // putstatic resumedDepth
    code.extend_from_slice(&u16b(resumed));
    code.push(0x2A);
    code.push(0xC3); // monitorexit
    code.push(0x2A);
    code.push(0xC3); // monitorexit
    code.push(0xB1);
    b.add_method(
        0x0009,
        "waiter",
        "()V",
        MethodBody {
            max_stack: 1,
            max_locals: 1,
            code,
            handlers: vec![],
            stack_map: None,
        },
    );

    // notifier: enter, notify, exit.
    let mut code = Vec::new();
    code.push(0xB2);
    code.extend_from_slice(&u16b(obj));
    code.push(0x4B);
    code.push(0x2A);
    code.push(0xC2);
    code.push(0x2A);
    code.push(0xB6);
    code.extend_from_slice(&u16b(notify));
    code.push(0x2A);
    code.push(0xC3);
    code.push(0xB1);
    b.add_method(
        0x0009,
        "notifier",
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

#[test]
fn wait_notify_hands_the_monitor_back_with_previous_depth() {
    let mut vm = vm_with(vec![("demo/Sync", sync_class())]);
    let class_id = vm.load_class_by_name("demo/Sync").unwrap();
    let waiter = find_static(&mut vm, class_id, "waiter", "()V");
    let notifier = find_static(&mut vm, class_id, "notifier", "()V");

    let t1 = vm.spawn_thread(waiter, &[]).unwrap();
    let t2 = vm.spawn_thread(notifier, &[]).unwrap();
    vm.start_thread(t1).unwrap();
    vm.start_thread(t2).unwrap();
    vm.run().unwrap();

    // The waiter resumed after its wait call with depth 2 restored, so
    // both of its exits succeeded and it recorded the flag.
    assert_eq!(static_cell(&mut vm, class_id, "resumedDepth") as i32, 1);
    assert!(vm.thread(t1).is_dead());
    assert!(vm.thread(t2).is_dead());

    // The monitor went globally idle and folded back to a bare header.
    let object = ObjRef(static_cell(&mut vm, class_id, "obj"));
    assert_eq!(vm.heap.get(object).unwrap().lock_tag(), LockTag::Unlocked);
    assert_eq!(vm.monitors.cached(), 1);
}

#[test]
fn synchronized_method_releases_its_monitor_on_return() {
    // A static synchronised method locks the class object for the span of
    // its frame and releases it on return.
    let mut b = ClassFileBuilder::new("demo/SyncMethod", Some("java/lang/Object"));
    b.add_field(0x0009, "ran", "I");
    let ran = b.field_ref("demo/SyncMethod", "ran", "I");
    let locked = b.method_ref("demo/SyncMethod", "locked", "()V");

    let mut code = vec![0x04, 0xB3]; // iconst_1, putstatic ran
    code.extend_from_slice(&u16b(ran));
    code.push(0xB1);
    b.add_method(
        0x0029, // public static synchronized
        "locked",
        "()V",
        MethodBody {
            max_stack: 1,
            max_locals: 0,
            code,
            handlers: vec![],
            stack_map: None,
        },
    );

    let mut code = vec![0xB8]; // invokestatic locked
    code.extend_from_slice(&u16b(locked));
    code.push(0xB1);
    b.add_method(
        0x0009,
        "main",
        "()V",
        MethodBody {
            max_stack: 0,
            max_locals: 0,
            code,
            handlers: vec![],
            stack_map: None,
        },
    );

    let mut vm = vm_with(vec![("demo/SyncMethod", b.build())]);
    let class = run_static(&mut vm, "demo/SyncMethod", "main", "()V");
    assert_eq!(static_cell(&mut vm, class, "ran") as i32, 1);

    // The class object's lock cycled enter/exit and is unlocked again.
    let class_object = vm
        .classes
        .instance(class)
        .unwrap()
        .class_object
        .expect("class object allocated");
    assert_eq!(
        vm.heap.get(class_object).unwrap().lock_tag(),
        LockTag::Unlocked
    );
}

#[test]
fn notify_all_eventually_empties_the_condvar_queue() {
    // Three waiters park on the same monitor; one notifyAll moves every
    // one to the waiter queue, and each reacquires with its saved depth
    // before the VM can run to completion.
    // Reuse the fixture's lock object; the helper only adds notifyAll.
    let mut b = ClassFileBuilder::new("demo/SyncAll", Some("java/lang/Object"));
    let obj = b.field_ref("demo/Sync", "obj", "Ljava/lang/Object;");
    let notify_all = b.method_ref("java/lang/Object", "notifyAll", "()V");
    let mut code = Vec::new();
    code.push(0xB2);
    code.extend_from_slice(&u16b(obj));
    code.push(0x4B);
    code.push(0x2A);
    code.push(0xC2); // monitorenter
    code.push(0x2A);
    code.push(0xB6); // invokevirtual notifyAll
    code.extend_from_slice(&u16b(notify_all));
    code.push(0x2A);
    code.push(0xC3); // monitorexit
    code.push(0xB1);
    b.add_method(
        0x0009,
        "wakeAll",
        "()V",
        MethodBody {
            max_stack: 1,
            max_locals: 1,
            code,
            handlers: vec![],
            stack_map: None,
        },
    );
    let mut vm = vm_with(vec![
        ("demo/Sync", sync_class()),
        ("demo/SyncAll", b.build()),
    ]);
    let sync_id = vm.load_class_by_name("demo/Sync").unwrap();
    let all_id = vm.load_class_by_name("demo/SyncAll").unwrap();
    let waiter = find_static(&mut vm, sync_id, "waiter", "()V");
    let wake_all = find_static(&mut vm, all_id, "wakeAll", "()V");

    let mut threads = Vec::new();
    for _ in 0..3 {
        let t = vm.spawn_thread(waiter, &[]).unwrap();
        vm.start_thread(t).unwrap();
        threads.push(t);
    }
    let notifier = vm.spawn_thread(wake_all, &[]).unwrap();
    vm.start_thread(notifier).unwrap();

    vm.run().unwrap();

    for t in threads {
        assert!(vm.thread(t).is_dead());
    }
    assert!(vm.thread(notifier).is_dead());
    assert_eq!(static_cell(&mut vm, sync_id, "resumedDepth") as i32, 1);
}
