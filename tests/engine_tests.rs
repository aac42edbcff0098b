// End-to-end coverage for the concrete scenarios of spec.md §8. Each test
// hand-assembles the TAC a compiler would emit for the quoted source line,
// since the lexer/parser/compiler stay out of scope for this core.

use ministac::host::Interpreter;
use ministac::line::{Line, OpCode};
use ministac::machine::RunState;
use ministac::value::{MapData, MapKey, Value};

fn run(code: Vec<Line>) -> Interpreter {
    let interp = Interpreter::new();
    let func = interp.compile_function(vec![], code);
    interp.load(func).unwrap();
    assert_eq!(interp.run_until_done(1000, false), RunState::Finished);
    interp
}

// 1. `x = 2 + 3 * 4` -> 14
#[test]
fn arithmetic_precedence() {
    use ministac::context::Context;
    use std::rc::Rc;

    let interp = Interpreter::new();
    let vm = &interp.machine;
    let code = vec![
        Line::new(Some(Value::Temp(0)), OpCode::ATimesB, Some(vm.new_number(3.0)), Some(vm.new_number(4.0)), 1),
        Line::new(Some(Value::Temp(1)), OpCode::APlusB, Some(vm.new_number(2.0)), Some(Value::Temp(0)), 1),
        Line::new(Some(Value::var("x")), OpCode::AssignA, Some(Value::Temp(1)), None, 1),
    ];
    let mut ctx = Context::new(Rc::new(code), vm.new_map_handle(MapData::new()), None, None, None);
    for _ in 0..3 {
        let line = ctx.current_line().cloned().unwrap();
        line.evaluate(&mut ctx, vm).unwrap();
        ctx.line_num += 1;
    }
    assert_eq!(ctx.get_var("x").unwrap().double_value(), 14.0);

    // Also exercise the full host-level run loop on the same script.
    run(vec![
        Line::new(Some(Value::Temp(0)), OpCode::ATimesB, Some(vm.new_number(3.0)), Some(vm.new_number(4.0)), 1),
        Line::new(Some(Value::Temp(1)), OpCode::APlusB, Some(vm.new_number(2.0)), Some(Value::Temp(0)), 1),
        Line::new(Some(Value::var("x")), OpCode::AssignA, Some(Value::Temp(1)), None, 1),
    ]);
}

// 2. `m = {"a":1, "b":2}; m.a + m.b` -> 3
#[test]
fn map_member_access_sums_to_three() {
    use ministac::context::Context;
    use std::rc::Rc;

    let interp = Interpreter::new();
    let vm = &interp.machine;
    let mut map = MapData::new();
    map.insert(MapKey(Value::str("a")), vm.new_number(1.0));
    map.insert(MapKey(Value::str("b")), vm.new_number(2.0));
    let m = vm.new_map_handle(map);

    let code = vec![
        Line::new(Some(Value::Temp(0)), OpCode::ElemBofA, Some(Value::Map(m.clone())), Some(Value::str("a")), 1),
        Line::new(Some(Value::Temp(1)), OpCode::ElemBofA, Some(Value::Map(m)), Some(Value::str("b")), 1),
        Line::new(Some(Value::Temp(2)), OpCode::APlusB, Some(Value::Temp(0)), Some(Value::Temp(1)), 1),
    ];
    let mut ctx = Context::new(Rc::new(code), vm.new_map_handle(MapData::new()), None, None, None);
    for _ in 0..3 {
        let line = ctx.current_line().cloned().unwrap();
        line.evaluate(&mut ctx, vm).unwrap();
        ctx.line_num += 1;
    }
    assert_eq!(ctx.get_temp(2).unwrap().double_value(), 3.0);
}

// 3. `s = "ab"; s * 3` -> "ababab"; `s * 0.5` -> "a"
#[test]
fn string_replication_whole_and_fractional() {
    use ministac::context::Context;
    use std::rc::Rc;

    let interp = Interpreter::new();
    let vm = &interp.machine;
    let code = vec![
        Line::new(Some(Value::Temp(0)), OpCode::ATimesB, Some(Value::str("ab")), Some(vm.new_number(3.0)), 1),
        Line::new(Some(Value::Temp(1)), OpCode::ATimesB, Some(Value::str("ab")), Some(vm.new_number(0.5)), 1),
    ];
    let mut ctx = Context::new(Rc::new(code), vm.new_map_handle(MapData::new()), None, None, None);
    for _ in 0..2 {
        let line = ctx.current_line().cloned().unwrap();
        line.evaluate(&mut ctx, vm).unwrap();
        ctx.line_num += 1;
    }
    assert_eq!(ctx.get_temp(0).unwrap().to_display_string(vm), "ababab");
    assert_eq!(ctx.get_temp(1).unwrap().to_display_string(vm), "a");
}

// 4. `l = [1,2,3]; l + [4]` -> [1, 2, 3, 4]; original `l` unchanged.
#[test]
fn list_concatenation_leaves_original_unchanged() {
    use ministac::context::Context;
    use std::rc::Rc;

    let interp = Interpreter::new();
    let vm = &interp.machine;
    let l = vm.new_list(vec![vm.new_number(1.0), vm.new_number(2.0), vm.new_number(3.0)]);
    let four = vm.new_list(vec![vm.new_number(4.0)]);

    let code = vec![Line::new(Some(Value::Temp(0)), OpCode::APlusB, Some(l.clone()), Some(four), 1)];
    let mut ctx = Context::new(Rc::new(code), vm.new_map_handle(MapData::new()), None, None, None);
    let line = ctx.current_line().cloned().unwrap();
    line.evaluate(&mut ctx, vm).unwrap();

    let combined = ctx.get_temp(0).unwrap();
    assert_eq!(combined.to_display_string(vm), "[1, 2, 3, 4]");
    assert_eq!(l.to_display_string(vm), "[1, 2, 3]");
}

// 5. Prototype: Animal has "speak" returning "?"; Dog.__isa = Animal;
// Dog.speak resolves through the chain.
#[test]
fn prototype_dispatch_through_isa_chain() {
    use ministac::context::Context;
    use std::rc::Rc;

    let interp = Interpreter::new();
    let vm = &interp.machine;

    let mut animal = MapData::new();
    animal.insert(MapKey(Value::str("speak")), Value::str("?"));
    let animal_map = vm.new_map_handle(animal);

    let mut dog = MapData::new();
    dog.insert(MapKey(Value::str("__isa")), Value::Map(animal_map));
    let dog_map = vm.new_map_handle(dog);

    let code = vec![Line::new(
        Some(Value::Temp(0)),
        OpCode::ElemBofA,
        Some(Value::Map(dog_map)),
        Some(Value::str("speak")),
        1,
    )];
    let mut ctx = Context::new(Rc::new(code), vm.new_map_handle(MapData::new()), None, None, None);
    let line = ctx.current_line().cloned().unwrap();
    line.evaluate(&mut ctx, vm).unwrap();
    assert_eq!(ctx.get_temp(0).unwrap().to_display_string(vm), "?");
}

// 6. `0 or 0.3` is fuzzy 0.3 (truthy under bool_value, so `GotoAifB`
// branches); but `truly` sees int value 0, so `GotoAifTrulyB` does not.
#[test]
fn fuzzy_or_vs_truly_branch() {
    use ministac::context::Context;
    use ministac::line::StepOutcome;
    use std::rc::Rc;

    let interp = Interpreter::new();
    let vm = &interp.machine;
    let or_line = Line::new(Some(Value::Temp(0)), OpCode::AOrB, Some(vm.new_number(0.0)), Some(vm.new_number(0.3)), 1);
    let mut ctx = Context::new(Rc::new(vec![or_line]), vm.new_map_handle(MapData::new()), None, None, None);
    let line = ctx.current_line().cloned().unwrap();
    line.evaluate(&mut ctx, vm).unwrap();

    let fuzzy = ctx.get_temp(0).unwrap();
    assert_eq!(fuzzy.double_value(), 0.3);
    assert!(fuzzy.bool_value());
    assert_eq!(fuzzy.int_value(), 0);

    let goto_if_b = Line::new(None, OpCode::GotoAifB, Some(vm.new_number(7.0)), Some(Value::Temp(0)), 2);
    match goto_if_b.evaluate(&mut ctx, vm).unwrap() {
        StepOutcome::Jump(target) => assert_eq!(target, 7),
        _ => panic!("GotoAifB should branch on fuzzy-truthy 0.3"),
    }

    let goto_if_truly_b = Line::new(None, OpCode::GotoAifTrulyB, Some(vm.new_number(7.0)), Some(Value::Temp(0)), 3);
    match goto_if_truly_b.evaluate(&mut ctx, vm).unwrap() {
        StepOutcome::Continue => {}
        _ => panic!("GotoAifTrulyB should not branch when int_value(0.3) == 0"),
    }
}

// `obj.greet()` binds `self` to `obj` for the call, so `self.name` resolves
// inside the method body (SPEC_FULL.md §C.2).
#[test]
fn method_call_binds_self() {
    let interp = Interpreter::new();
    ministac::host::install_demo_intrinsics(&interp.machine);
    let vm = &interp.machine;

    let greet_code = vec![
        Line::new(Some(Value::Temp(0)), OpCode::ElemBofA, Some(Value::var("self")), Some(Value::str("name")), 1),
        Line::new(Some(Value::Temp(1)), OpCode::ReturnA, Some(Value::Temp(0)), None, 1),
    ];
    let greet_func = interp.compile_function(vec![], greet_code);

    let mut obj = MapData::new();
    obj.insert(MapKey(Value::str("greet")), greet_func);
    obj.insert(MapKey(Value::str("name")), Value::str("Rex"));
    let obj_handle = vm.new_map_handle(obj);

    let print_intrinsic = vm.intrinsics().find_by_name("print").unwrap();
    let print_func = vm.intrinsics().get_func(&print_intrinsic);

    let seq_elem = vm.new_seq_elem(Value::Map(obj_handle), Value::str("greet"), false);
    let code = vec![
        Line::new(Some(Value::var("r")), OpCode::CallFunctionA, Some(seq_elem), Some(vm.new_number(0.0)), 1),
        Line::new(None, OpCode::PushParam, Some(Value::var("r")), None, 2),
        Line::new(Some(Value::Temp(0)), OpCode::CallFunctionA, Some(print_func), Some(vm.new_number(1.0)), 2),
    ];

    let captured = std::rc::Rc::new(std::cell::RefCell::new(String::new()));
    let captured2 = captured.clone();
    interp.set_standard_output(move |s| captured2.borrow_mut().push_str(s));

    let func = interp.compile_function(vec![], code);
    interp.load(func).unwrap();
    assert_eq!(interp.run_until_done(1000, false), RunState::Finished);
    assert_eq!(*captured.borrow(), "Rex");
}

#[test]
fn suspendable_wait_intrinsic_resumes_across_steps() {
    let interp = Interpreter::new();
    ministac::host::install_demo_intrinsics(&interp.machine);
    let vm = &interp.machine;
    let wait_intrinsic = vm.intrinsics().find_by_name("wait").unwrap();
    let wait_func = vm.intrinsics().get_func(&wait_intrinsic);

    let code = vec![
        Line::new(None, OpCode::PushParam, Some(vm.new_number(3.0)), None, 1),
        Line::new(Some(Value::var("r")), OpCode::CallFunctionA, Some(wait_func), Some(vm.new_number(1.0)), 1),
    ];
    let func = interp.compile_function(vec![], code);
    interp.load(func).unwrap();
    // First call needs enough budget to reach the suspend point (PushParam,
    // CallFunctionA, then the first CallIntrinsicA tick); it returns as soon
    // as that tick suspends, well under the limit.
    assert_eq!(interp.run_until_done(10, true), RunState::Suspended);
    assert_eq!(interp.run_until_done(1, true), RunState::Suspended);
    assert_eq!(interp.run_until_done(10, true), RunState::Finished);
}
