//! End-to-end execution scenarios for the virtual machine.

use neoxide_vm::{
    Debugger, ExecutionEngine, ExecutionEngineLimits, OpCode, Script, ScriptBuilder, StackItem,
    VMState,
};

fn run(script: Vec<u8>) -> ExecutionEngine {
    let mut engine = ExecutionEngine::new();
    engine.load_script(Script::new(script), -1, 0).unwrap();
    engine.execute();
    engine
}

#[test]
fn test_arithmetic_push5_push3_add() {
    let engine = run(vec![
        OpCode::PUSH5.as_byte(),
        OpCode::PUSH3.as_byte(),
        OpCode::ADD.as_byte(),
        OpCode::RET.as_byte(),
    ]);
    assert_eq!(engine.state(), VMState::Halt);
    assert_eq!(engine.result_stack().len(), 1);
    assert_eq!(
        engine.result_stack().peek(0).unwrap().to_int().unwrap(),
        8.into()
    );
}

#[test]
fn test_division_by_zero_faults_without_exception() {
    let engine = run(vec![
        OpCode::PUSH10.as_byte(),
        OpCode::PUSH0.as_byte(),
        OpCode::DIV.as_byte(),
    ]);
    assert_eq!(engine.state(), VMState::Fault);
    assert_eq!(engine.result_stack().len(), 0);
    assert!(engine.uncaught_exception().is_none());
}

#[test]
fn test_try_catch_with_throw() {
    // 0:  PUSHDATA1 3 "err"
    // 5:  TRY catch=+8 finally=0      -> catch at 13
    // 8:  THROW
    // 9:  ENDTRY +2                   -> normal path to 11
    // 11: PUSH1
    // 12: RET
    // 13: PUSH2                        <catch>
    // 14: ENDTRY +2                   -> 16
    // 16: RET
    let script = vec![
        OpCode::PUSHDATA1.as_byte(),
        3,
        b'e',
        b'r',
        b'r',
        OpCode::TRY.as_byte(),
        8,
        0,
        OpCode::THROW.as_byte(),
        OpCode::ENDTRY.as_byte(),
        2,
        OpCode::PUSH1.as_byte(),
        OpCode::RET.as_byte(),
        OpCode::PUSH2.as_byte(),
        OpCode::ENDTRY.as_byte(),
        2,
        OpCode::RET.as_byte(),
    ];
    let engine = run(script);
    assert_eq!(engine.state(), VMState::Halt);
    // The catch body pushed 2 on top of the caught exception value.
    assert_eq!(
        engine.result_stack().peek(0).unwrap().to_int().unwrap(),
        2.into()
    );
    assert!(engine.uncaught_exception().is_none());
}

#[test]
fn test_uncaught_throw_records_exception() {
    let script = vec![
        OpCode::PUSHDATA1.as_byte(),
        2,
        b'n',
        b'o',
        OpCode::THROW.as_byte(),
    ];
    let engine = run(script);
    assert_eq!(engine.state(), VMState::Fault);
    let exception = engine.uncaught_exception().expect("exception recorded");
    assert_eq!(exception.to_byte_slice().unwrap(), b"no");
}

#[test]
fn test_finally_runs_on_both_paths() {
    // Normal path: TRY body pushes 1, ENDTRY -> finally pushes 7 -> end.
    // 0: TRY catch=0 finally=+5      -> finally at 5
    // 3: ENDTRY +4                   -> end at 7
    // 5: PUSH7                        <finally>
    // 6: ENDFINALLY
    // 7: RET
    let script = vec![
        OpCode::TRY.as_byte(),
        0,
        5,
        OpCode::ENDTRY.as_byte(),
        4,
        OpCode::PUSH7.as_byte(),
        OpCode::ENDFINALLY.as_byte(),
        OpCode::RET.as_byte(),
    ];
    let engine = run(script);
    assert_eq!(engine.state(), VMState::Halt);
    assert_eq!(
        engine.result_stack().peek(0).unwrap().to_int().unwrap(),
        7.into()
    );
}

#[test]
fn test_throw_through_finally_reaches_outer_catch() {
    // Outer try catches; inner try has only a finally which must run
    // while the throw propagates.
    // 0:  TRY catch=+12 finally=0     -> catch at 12
    // 3:  TRY catch=0 finally=+6      -> inner finally at 9
    // 6:  PUSH1
    // 7:  DROP
    // 8:  THROW? no - need a value. Simpler: PUSHNULL THROW
    let script = vec![
        OpCode::TRY.as_byte(),
        12,
        0,
        OpCode::TRY.as_byte(),
        0,
        6,
        OpCode::PUSHNULL.as_byte(),
        OpCode::THROW.as_byte(),
        OpCode::NOP.as_byte(),
        OpCode::PUSH6.as_byte(), // inner finally at 9
        OpCode::ENDFINALLY.as_byte(),
        OpCode::NOP.as_byte(),
        OpCode::PUSH2.as_byte(), // outer catch at 12
        OpCode::RET.as_byte(),
    ];
    let engine = run(script);
    assert_eq!(engine.state(), VMState::Halt);
    // Finally pushed 6, then the catch received the exception and pushed 2.
    assert_eq!(
        engine.result_stack().peek(0).unwrap().to_int().unwrap(),
        2.into()
    );
}

#[test]
fn test_call_and_ret_share_evaluation_stack() {
    // 0: PUSH3
    // 1: CALL +4 -> 5
    // 3: ADD        (after return: 3 + 10)
    // 4: RET
    // 5: PUSH10     <subroutine>
    // 6: RET
    let script = vec![
        OpCode::PUSH3.as_byte(),
        OpCode::CALL.as_byte(),
        4,
        OpCode::ADD.as_byte(),
        OpCode::RET.as_byte(),
        OpCode::PUSH10.as_byte(),
        OpCode::RET.as_byte(),
    ];
    let engine = run(script);
    assert_eq!(engine.state(), VMState::Halt);
    assert_eq!(
        engine.result_stack().peek(0).unwrap().to_int().unwrap(),
        13.into()
    );
}

#[test]
fn test_recursive_call_hits_invocation_limit() {
    // CALL back to offset 0 forever.
    let engine = run(vec![OpCode::CALL.as_byte(), 0x00]);
    assert_eq!(engine.state(), VMState::Fault);
}

#[test]
fn test_pushdata_at_item_size_boundary() {
    let limits = ExecutionEngineLimits::default();

    let mut ok_script = vec![OpCode::PUSHDATA4.as_byte()];
    ok_script.extend_from_slice(&(limits.max_item_size as u32).to_le_bytes());
    ok_script.extend(vec![0u8; limits.max_item_size]);
    let engine = run(ok_script);
    assert_eq!(engine.state(), VMState::Halt);

    let mut overflow_script = vec![OpCode::PUSHDATA4.as_byte()];
    overflow_script.extend_from_slice(&((limits.max_item_size + 1) as u32).to_le_bytes());
    overflow_script.extend(vec![0u8; limits.max_item_size + 1]);
    let engine = run(overflow_script);
    assert_eq!(engine.state(), VMState::Fault);
}

#[test]
fn test_integer_width_boundary() {
    // -(2^255) occupies exactly 32 bytes: acceptable.
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(-(num_bigint::BigInt::from(1u8) << 255))
        .unwrap();
    let engine = run(builder.to_bytes());
    assert_eq!(engine.state(), VMState::Halt);

    // 2^255 - 1 is the largest positive value; INC overflows to 33 bytes.
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int((num_bigint::BigInt::from(1u8) << 255) - 1)
        .unwrap();
    builder.emit(OpCode::INC);
    let engine = run(builder.to_bytes());
    assert_eq!(engine.state(), VMState::Fault);
}

#[test]
fn test_pack_unpack_round_trip() {
    // Pack [1, 2, 3] (3 on top becomes element 0), then unpack.
    let script = vec![
        OpCode::PUSH1.as_byte(),
        OpCode::PUSH2.as_byte(),
        OpCode::PUSH3.as_byte(),
        OpCode::PUSH3.as_byte(), // count
        OpCode::PACK.as_byte(),
        OpCode::UNPACK.as_byte(),
        OpCode::RET.as_byte(),
    ];
    let engine = run(script);
    assert_eq!(engine.state(), VMState::Halt);
    let result = engine.result_stack();
    // Top is the count, then element 0 (which was the top at pack time).
    assert_eq!(result.peek(0).unwrap().to_int().unwrap(), 3.into());
    assert_eq!(result.peek(1).unwrap().to_int().unwrap(), 3.into());
    assert_eq!(result.peek(2).unwrap().to_int().unwrap(), 2.into());
    assert_eq!(result.peek(3).unwrap().to_int().unwrap(), 1.into());
}

#[test]
fn test_reference_count_bounded_after_halt() {
    let script = vec![
        OpCode::PUSH2.as_byte(),
        OpCode::NEWARRAY.as_byte(),
        OpCode::DUP.as_byte(),
        OpCode::PUSH0.as_byte(),
        OpCode::PUSH5.as_byte(),
        OpCode::SETITEM.as_byte(),
        OpCode::RET.as_byte(),
    ];
    let engine = run(script);
    assert_eq!(engine.state(), VMState::Halt);
    assert!(engine.reference_counter().count() <= engine.limits().max_stack_size);
}

#[test]
fn test_stack_size_limit_faults() {
    // Build nested arrays until the total reference count passes the cap.
    // NEWARRAY with 3000 nulls exceeds 2048 references at once.
    let mut builder = ScriptBuilder::new();
    builder.emit_push_int(3000).unwrap();
    builder.emit(OpCode::NEWARRAY);
    let engine = run(builder.to_bytes());
    assert_eq!(engine.state(), VMState::Fault);
}

#[test]
fn test_struct_value_semantics_through_append() {
    // A struct appended to an array is copied: mutating the original must
    // not affect the stored copy.
    // struct = {42}; array = []; APPEND array struct; struct[0] = 7;
    // read array[0][0] -> 42.
    let script = vec![
        OpCode::PUSH1.as_byte(),
        OpCode::NEWSTRUCT.as_byte(), // struct of one null
        OpCode::DUP.as_byte(),
        OpCode::PUSH0.as_byte(),
        OpCode::PUSHINT8.as_byte(),
        42,
        OpCode::SETITEM.as_byte(), // struct[0] = 42
        OpCode::NEWARRAY0.as_byte(),
        OpCode::DUP.as_byte(),
        OpCode::ROT.as_byte(), // [array, array, struct]
        OpCode::APPEND.as_byte(),
        OpCode::PUSH0.as_byte(),
        OpCode::PICKITEM.as_byte(), // array[0] -> stored struct
        OpCode::PUSH0.as_byte(),
        OpCode::PICKITEM.as_byte(), // -> 42
        OpCode::RET.as_byte(),
    ];
    let engine = run(script);
    assert_eq!(engine.state(), VMState::Halt);
    assert_eq!(
        engine.result_stack().peek(0).unwrap().to_int().unwrap(),
        42.into()
    );
}

#[test]
fn test_debugger_breakpoint_does_not_consume_instruction() {
    let script = Script::new(vec![
        OpCode::PUSH1.as_byte(),
        OpCode::PUSH2.as_byte(),
        OpCode::ADD.as_byte(),
        OpCode::RET.as_byte(),
    ]);
    let mut engine = ExecutionEngine::new();
    engine.load_script(script.clone(), -1, 0).unwrap();

    let mut debugger = Debugger::new(&mut engine);
    debugger.add_breakpoint(&script, 2); // at ADD
    assert_eq!(debugger.execute(), VMState::Break);

    // Stopped before ADD: both operands still on the stack.
    let engine_ref = debugger.engine();
    assert_eq!(
        engine_ref
            .current_context()
            .unwrap()
            .evaluation_stack()
            .len(),
        2
    );
    assert_eq!(
        engine_ref.current_context().unwrap().instruction_pointer(),
        2
    );

    // Resuming finishes the script.
    assert_eq!(debugger.execute(), VMState::Halt);
}

#[test]
fn test_debugger_step_over_call() {
    let script = Script::new(vec![
        OpCode::CALL.as_byte(),
        3,
        OpCode::RET.as_byte(),
        OpCode::PUSH7.as_byte(),
        OpCode::RET.as_byte(),
    ]);
    let mut engine = ExecutionEngine::new();
    engine.load_script(script, -1, 0).unwrap();

    let mut debugger = Debugger::new(&mut engine);
    let state = debugger.step_over();
    assert_eq!(state, VMState::Break);
    // Back at depth 1, past the call, with the subroutine's push visible.
    assert_eq!(debugger.engine().invocation_depth(), 1);
    assert_eq!(
        debugger
            .engine()
            .current_context()
            .unwrap()
            .evaluation_stack()
            .peek(0)
            .unwrap()
            .to_int()
            .unwrap(),
        7.into()
    );
}

#[test]
fn test_debugger_step_into_and_out() {
    let script = Script::new(vec![
        OpCode::CALL.as_byte(),
        3,
        OpCode::RET.as_byte(),
        OpCode::PUSH7.as_byte(),
        OpCode::RET.as_byte(),
    ]);
    let mut engine = ExecutionEngine::new();
    engine.load_script(script, -1, 0).unwrap();

    let mut debugger = Debugger::new(&mut engine);
    debugger.step_into();
    assert_eq!(debugger.engine().invocation_depth(), 2);
    debugger.step_out();
    assert_eq!(debugger.engine().invocation_depth(), 1);
}

#[test]
fn test_strict_script_rejected_at_load_relaxed_at_runtime() {
    // Jump into the middle of an operand.
    let bytes = vec![OpCode::JMP.as_byte(), 3, OpCode::PUSHINT16.as_byte(), 1, 2];
    assert!(Script::new_strict(bytes.clone()).is_err());

    let engine = run(bytes);
    assert_eq!(engine.state(), VMState::Fault);
}

#[test]
fn test_deep_struct_equality_via_opcode() {
    // Two equal nested structs compared with EQUAL.
    let mut builder = ScriptBuilder::new();
    for _ in 0..2 {
        builder.emit_push_int(1).unwrap();
        builder.emit(OpCode::PUSH1);
        builder.emit(OpCode::PACKSTRUCT);
    }
    builder.emit(OpCode::EQUAL);
    builder.emit(OpCode::RET);
    let engine = run(builder.to_bytes());
    assert_eq!(engine.state(), VMState::Halt);
    assert!(engine.result_stack().peek(0).unwrap().to_bool().unwrap());
}

#[test]
fn test_abort_is_uncatchable() {
    // TRY with catch cannot intercept ABORT.
    let script = vec![
        OpCode::TRY.as_byte(),
        4,
        0,
        OpCode::ABORT.as_byte(),
        OpCode::PUSH1.as_byte(), // catch target, must not run
        OpCode::RET.as_byte(),
    ];
    let engine = run(script);
    assert_eq!(engine.state(), VMState::Fault);
    assert!(engine.result_stack().is_empty());
}

#[test]
fn test_assertmsg_carries_message() {
    let mut builder = ScriptBuilder::new();
    builder.emit_push_bool(false);
    builder.emit_push_string("balance too low").unwrap();
    builder.emit(OpCode::ASSERTMSG);
    let engine = run(builder.to_bytes());
    assert_eq!(engine.state(), VMState::Fault);
    let message = engine.fault_error().unwrap().to_string();
    assert!(message.contains("balance too low"));
}
