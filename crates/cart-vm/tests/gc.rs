mod common;

use cart_vm::gc::Sweep;
use cart_vm::{op, Config, GcMode, Heap, Value, VM};
use pretty_assertions::assert_eq;

use crate::common::{init_logger, run, Asm};

/// `for (var i = 0; i < count; i++) { garbage = "item" + i; kept[i] = i; }`
/// followed by printing the length of `kept`.
fn churn(heap: &mut Heap, count: i32) -> cart_vm::Gc<cart_vm::object::Function> {
    let mut asm = Asm::script(heap);
    asm.push(0).op(op::VECTOR, &[]).define_global("kept");
    asm.op(op::NULL, &[]).define_global("garbage");

    asm.push(0);
    let start = asm.chunk().code.len();
    asm.op(op::GET_LOCAL, &[1]).push(count).op(op::LT, &[]);
    let exit = asm.chunk().emit_jump(op::JUMP_IF_FALSE, 1);
    asm.op(op::POP, &[]);

    asm.push_str("item").op(op::GET_LOCAL, &[1]).op(op::ADD, &[]).set_global("garbage").op(op::POP, &[]);
    asm.get_global("kept").op(op::GET_LOCAL, &[1]).op(op::PUSH_VALUE, &[]).op(op::POP, &[]);

    asm.op(op::GET_LOCAL, &[1]).op(op::INC, &[]).op(op::SET_LOCAL, &[1]).op(op::POP, &[]);
    asm.chunk().emit_loop(start, 1).unwrap();
    asm.chunk().patch_jump(exit).unwrap();
    asm.op(op::POP, &[]).op(op::POPN, &[1]);

    asm.get_global("kept").op(op::LEN, &[]).op(op::PRINT, &[]);
    asm.get_global("garbage").op(op::PRINT, &[]);
    asm.ret();
    asm.finish()
}

#[test]
fn stress_mode_keeps_reachable_objects() {
    init_logger();
    let config = Config::default().with_gc_mode(GcMode::Stress);
    let mut vm = VM::with_config(config).unwrap();

    let (result, out) = run(&mut vm, |heap| {
        let inc = {
            let mut asm = Asm::new(heap, "inc", 0);
            asm.op(op::GET_UPVALUE, &[0]).push_str("!").op(op::ADD, &[]).op(op::SET_UPVALUE, &[0]);
            asm.op(op::RETURN, &[]);
            asm.finish()
        };
        let make = {
            let mut asm = Asm::new(heap, "make", 0);
            asm.push_str("hi").closure(inc, &[(true, 1)]).op(op::GET_LOCAL, &[2]).op(op::RETURN, &[]);
            asm.finish()
        };

        let mut asm = Asm::script(heap);
        asm.closure(make, &[]).op(op::CALL, &[0]).define_global("shout");
        for _ in 0..3 {
            asm.get_global("shout").op(op::CALL, &[0]).op(op::PRINT, &[]);
        }
        asm.ret();
        asm.finish()
    });
    result.unwrap();
    assert_eq!(out, "hi!\nhi!!\nhi!!!\n");

    let (result, out) = run(&mut vm, |heap| churn(heap, 50));
    result.unwrap();
    assert_eq!(out, "50\nitem49\n");
}

#[test]
fn unreachable_garbage_is_reclaimed() {
    init_logger();
    let config = Config { initial_next_gc: 4096, ..Config::default() }.with_gc_mode(GcMode::Normal);
    let mut vm = VM::with_config(config).unwrap();

    let (result, out) = run(&mut vm, |heap| churn(heap, 2000));
    result.unwrap();
    assert_eq!(out, "2000\nitem1999\n");

    vm.collect_garbage();
    let live = vm.heap.live_objects();
    let bytes = vm.heap.bytes_allocated();
    assert!(live < 32, "{live} objects survived");
    assert!(vm.next_gc() >= 4096);

    // A second cycle finds nothing new to free.
    assert_eq!(vm.collect_garbage(), Sweep::default());
    assert_eq!(vm.heap.live_objects(), live);
    assert_eq!(vm.heap.bytes_allocated(), bytes);

    assert!(matches!(vm.global("kept"), Some(Value::Vector(_))));
}

#[test]
fn off_mode_never_collects() {
    init_logger();
    let config = Config { initial_next_gc: 4096, ..Config::default() }.with_gc_mode(GcMode::Off);
    let mut vm = VM::with_config(config).unwrap();

    let (result, _) = run(&mut vm, |heap| churn(heap, 500));
    result.unwrap();
    assert!(vm.heap.live_objects() > 500);
    assert_eq!(vm.next_gc(), 4096);
}

#[test]
fn allocator_accounts_for_every_byte() {
    init_logger();
    let config = Config { initial_next_gc: 4096, ..Config::default() }.with_gc_mode(GcMode::Normal);
    let mut vm = VM::with_config(config).unwrap();
    let (result, _) = run(&mut vm, |heap| churn(heap, 300));
    result.unwrap();
    vm.collect_garbage();

    let allocator = vm.heap.allocator();
    assert!(allocator.allocated_bytes() + allocator.free_bytes() <= allocator.mapped_bytes());
    assert!(allocator.allocated_bytes() >= vm.heap.live_objects() * std::mem::size_of::<cart_vm::object::Object>());
}
