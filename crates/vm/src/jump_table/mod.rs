//! Opcode dispatch.
//!
//! One handler per opcode, grouped into modules by category. The table is
//! a fixed 256-entry array indexed by the opcode byte.

pub mod bitwise;
pub mod compound;
pub mod control;
pub mod numeric;
pub mod push;
pub mod slot;
pub mod splice;
pub mod stack;
pub mod types;

use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::op_code::OpCode;
use once_cell::sync::Lazy;

/// A handler for one opcode.
pub type InstructionHandler = fn(&mut ExecutionEngine, &Instruction) -> VmResult<()>;

static TABLE: Lazy<[Option<InstructionHandler>; 256]> = Lazy::new(build_table);

/// Executes one instruction against the engine.
pub fn dispatch(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    match TABLE[instruction.opcode.as_byte() as usize] {
        Some(handler) => handler(engine, instruction),
        None => Err(VmError::InvalidOpCode {
            opcode: instruction.opcode.as_byte(),
        }),
    }
}

fn build_table() -> [Option<InstructionHandler>; 256] {
    let mut table: [Option<InstructionHandler>; 256] = [None; 256];

    fn set(table: &mut [Option<InstructionHandler>; 256], op: OpCode, handler: InstructionHandler) {
        table[op.as_byte() as usize] = Some(handler);
    }

    // Constants
    set(&mut table, OpCode::PUSHINT8, push::push_int);
    set(&mut table, OpCode::PUSHINT16, push::push_int);
    set(&mut table, OpCode::PUSHINT32, push::push_int);
    set(&mut table, OpCode::PUSHINT64, push::push_int);
    set(&mut table, OpCode::PUSHINT128, push::push_int);
    set(&mut table, OpCode::PUSHINT256, push::push_int);
    set(&mut table, OpCode::PUSHT, push::push_true);
    set(&mut table, OpCode::PUSHF, push::push_false);
    set(&mut table, OpCode::PUSHA, push::push_a);
    set(&mut table, OpCode::PUSHNULL, push::push_null);
    set(&mut table, OpCode::PUSHDATA1, push::push_data);
    set(&mut table, OpCode::PUSHDATA2, push::push_data);
    set(&mut table, OpCode::PUSHDATA4, push::push_data);
    for op in [
        OpCode::PUSHM1,
        OpCode::PUSH0,
        OpCode::PUSH1,
        OpCode::PUSH2,
        OpCode::PUSH3,
        OpCode::PUSH4,
        OpCode::PUSH5,
        OpCode::PUSH6,
        OpCode::PUSH7,
        OpCode::PUSH8,
        OpCode::PUSH9,
        OpCode::PUSH10,
        OpCode::PUSH11,
        OpCode::PUSH12,
        OpCode::PUSH13,
        OpCode::PUSH14,
        OpCode::PUSH15,
        OpCode::PUSH16,
    ] {
        set(&mut table, op, push::push_small_int);
    }

    // Flow control
    set(&mut table, OpCode::NOP, control::nop);
    set(&mut table, OpCode::JMP, control::jmp);
    set(&mut table, OpCode::JMP_L, control::jmp_l);
    set(&mut table, OpCode::JMPIF, control::jmp_if);
    set(&mut table, OpCode::JMPIF_L, control::jmp_if_l);
    set(&mut table, OpCode::JMPIFNOT, control::jmp_if_not);
    set(&mut table, OpCode::JMPIFNOT_L, control::jmp_if_not_l);
    set(&mut table, OpCode::JMPEQ, control::jmp_eq);
    set(&mut table, OpCode::JMPEQ_L, control::jmp_eq_l);
    set(&mut table, OpCode::JMPNE, control::jmp_ne);
    set(&mut table, OpCode::JMPNE_L, control::jmp_ne_l);
    set(&mut table, OpCode::JMPGT, control::jmp_gt);
    set(&mut table, OpCode::JMPGT_L, control::jmp_gt_l);
    set(&mut table, OpCode::JMPGE, control::jmp_ge);
    set(&mut table, OpCode::JMPGE_L, control::jmp_ge_l);
    set(&mut table, OpCode::JMPLT, control::jmp_lt);
    set(&mut table, OpCode::JMPLT_L, control::jmp_lt_l);
    set(&mut table, OpCode::JMPLE, control::jmp_le);
    set(&mut table, OpCode::JMPLE_L, control::jmp_le_l);
    set(&mut table, OpCode::CALL, control::call);
    set(&mut table, OpCode::CALL_L, control::call_l);
    set(&mut table, OpCode::CALLA, control::call_a);
    set(&mut table, OpCode::CALLT, control::call_t);
    set(&mut table, OpCode::ABORT, control::abort);
    set(&mut table, OpCode::ASSERT, control::assert);
    set(&mut table, OpCode::THROW, control::throw);
    set(&mut table, OpCode::TRY, control::r#try);
    set(&mut table, OpCode::TRY_L, control::try_l);
    set(&mut table, OpCode::ENDTRY, control::end_try);
    set(&mut table, OpCode::ENDTRY_L, control::end_try_l);
    set(&mut table, OpCode::ENDFINALLY, control::end_finally);
    set(&mut table, OpCode::RET, control::ret);
    set(&mut table, OpCode::SYSCALL, control::syscall);
    set(&mut table, OpCode::ABORTMSG, control::abort_msg);
    set(&mut table, OpCode::ASSERTMSG, control::assert_msg);

    // Stack
    set(&mut table, OpCode::DEPTH, stack::depth);
    set(&mut table, OpCode::DROP, stack::drop);
    set(&mut table, OpCode::NIP, stack::nip);
    set(&mut table, OpCode::XDROP, stack::xdrop);
    set(&mut table, OpCode::CLEAR, stack::clear);
    set(&mut table, OpCode::DUP, stack::dup);
    set(&mut table, OpCode::OVER, stack::over);
    set(&mut table, OpCode::PICK, stack::pick);
    set(&mut table, OpCode::TUCK, stack::tuck);
    set(&mut table, OpCode::SWAP, stack::swap);
    set(&mut table, OpCode::ROT, stack::rot);
    set(&mut table, OpCode::ROLL, stack::roll);
    set(&mut table, OpCode::REVERSE3, stack::reverse3);
    set(&mut table, OpCode::REVERSE4, stack::reverse4);
    set(&mut table, OpCode::REVERSEN, stack::reverse_n);

    // Slots
    set(&mut table, OpCode::INITSSLOT, slot::init_static_slot);
    set(&mut table, OpCode::INITSLOT, slot::init_slot);
    for op in [
        OpCode::LDSFLD0,
        OpCode::LDSFLD1,
        OpCode::LDSFLD2,
        OpCode::LDSFLD3,
        OpCode::LDSFLD4,
        OpCode::LDSFLD5,
        OpCode::LDSFLD6,
    ] {
        set(&mut table, op, slot::load_static_field_n);
    }
    set(&mut table, OpCode::LDSFLD, slot::load_static_field);
    for op in [
        OpCode::STSFLD0,
        OpCode::STSFLD1,
        OpCode::STSFLD2,
        OpCode::STSFLD3,
        OpCode::STSFLD4,
        OpCode::STSFLD5,
        OpCode::STSFLD6,
    ] {
        set(&mut table, op, slot::store_static_field_n);
    }
    set(&mut table, OpCode::STSFLD, slot::store_static_field);
    for op in [
        OpCode::LDLOC0,
        OpCode::LDLOC1,
        OpCode::LDLOC2,
        OpCode::LDLOC3,
        OpCode::LDLOC4,
        OpCode::LDLOC5,
        OpCode::LDLOC6,
    ] {
        set(&mut table, op, slot::load_local_n);
    }
    set(&mut table, OpCode::LDLOC, slot::load_local);
    for op in [
        OpCode::STLOC0,
        OpCode::STLOC1,
        OpCode::STLOC2,
        OpCode::STLOC3,
        OpCode::STLOC4,
        OpCode::STLOC5,
        OpCode::STLOC6,
    ] {
        set(&mut table, op, slot::store_local_n);
    }
    set(&mut table, OpCode::STLOC, slot::store_local);
    for op in [
        OpCode::LDARG0,
        OpCode::LDARG1,
        OpCode::LDARG2,
        OpCode::LDARG3,
        OpCode::LDARG4,
        OpCode::LDARG5,
        OpCode::LDARG6,
    ] {
        set(&mut table, op, slot::load_argument_n);
    }
    set(&mut table, OpCode::LDARG, slot::load_argument);
    for op in [
        OpCode::STARG0,
        OpCode::STARG1,
        OpCode::STARG2,
        OpCode::STARG3,
        OpCode::STARG4,
        OpCode::STARG5,
        OpCode::STARG6,
    ] {
        set(&mut table, op, slot::store_argument_n);
    }
    set(&mut table, OpCode::STARG, slot::store_argument);

    // Splice
    set(&mut table, OpCode::NEWBUFFER, splice::new_buffer);
    set(&mut table, OpCode::MEMCPY, splice::memcpy);
    set(&mut table, OpCode::CAT, splice::cat);
    set(&mut table, OpCode::SUBSTR, splice::substr);
    set(&mut table, OpCode::LEFT, splice::left);
    set(&mut table, OpCode::RIGHT, splice::right);

    // Bitwise logic
    set(&mut table, OpCode::INVERT, bitwise::invert);
    set(&mut table, OpCode::AND, bitwise::and);
    set(&mut table, OpCode::OR, bitwise::or);
    set(&mut table, OpCode::XOR, bitwise::xor);
    set(&mut table, OpCode::EQUAL, bitwise::equal);
    set(&mut table, OpCode::NOTEQUAL, bitwise::not_equal);

    // Arithmetic
    set(&mut table, OpCode::SIGN, numeric::sign);
    set(&mut table, OpCode::ABS, numeric::abs);
    set(&mut table, OpCode::NEGATE, numeric::negate);
    set(&mut table, OpCode::INC, numeric::inc);
    set(&mut table, OpCode::DEC, numeric::dec);
    set(&mut table, OpCode::ADD, numeric::add);
    set(&mut table, OpCode::SUB, numeric::sub);
    set(&mut table, OpCode::MUL, numeric::mul);
    set(&mut table, OpCode::DIV, numeric::div);
    set(&mut table, OpCode::MOD, numeric::modulo);
    set(&mut table, OpCode::POW, numeric::pow);
    set(&mut table, OpCode::SQRT, numeric::sqrt);
    set(&mut table, OpCode::MODMUL, numeric::mod_mul);
    set(&mut table, OpCode::MODPOW, numeric::mod_pow);
    set(&mut table, OpCode::SHL, numeric::shl);
    set(&mut table, OpCode::SHR, numeric::shr);
    set(&mut table, OpCode::NOT, numeric::not);
    set(&mut table, OpCode::BOOLAND, numeric::bool_and);
    set(&mut table, OpCode::BOOLOR, numeric::bool_or);
    set(&mut table, OpCode::NZ, numeric::nz);
    set(&mut table, OpCode::NUMEQUAL, numeric::num_equal);
    set(&mut table, OpCode::NUMNOTEQUAL, numeric::num_not_equal);
    set(&mut table, OpCode::LT, numeric::lt);
    set(&mut table, OpCode::LE, numeric::le);
    set(&mut table, OpCode::GT, numeric::gt);
    set(&mut table, OpCode::GE, numeric::ge);
    set(&mut table, OpCode::MIN, numeric::min);
    set(&mut table, OpCode::MAX, numeric::max);
    set(&mut table, OpCode::WITHIN, numeric::within);

    // Compound types
    set(&mut table, OpCode::PACKMAP, compound::pack_map);
    set(&mut table, OpCode::PACKSTRUCT, compound::pack_struct);
    set(&mut table, OpCode::PACK, compound::pack);
    set(&mut table, OpCode::UNPACK, compound::unpack);
    set(&mut table, OpCode::NEWARRAY0, compound::new_array0);
    set(&mut table, OpCode::NEWARRAY, compound::new_array);
    set(&mut table, OpCode::NEWARRAY_T, compound::new_array_t);
    set(&mut table, OpCode::NEWSTRUCT0, compound::new_struct0);
    set(&mut table, OpCode::NEWSTRUCT, compound::new_struct);
    set(&mut table, OpCode::NEWMAP, compound::new_map);
    set(&mut table, OpCode::SIZE, compound::size);
    set(&mut table, OpCode::HASKEY, compound::has_key);
    set(&mut table, OpCode::KEYS, compound::keys);
    set(&mut table, OpCode::VALUES, compound::values);
    set(&mut table, OpCode::PICKITEM, compound::pick_item);
    set(&mut table, OpCode::APPEND, compound::append);
    set(&mut table, OpCode::SETITEM, compound::set_item);
    set(&mut table, OpCode::REVERSEITEMS, compound::reverse_items);
    set(&mut table, OpCode::REMOVE, compound::remove);
    set(&mut table, OpCode::CLEARITEMS, compound::clear_items);
    set(&mut table, OpCode::POPITEM, compound::pop_item);

    // Types
    set(&mut table, OpCode::ISNULL, types::is_null);
    set(&mut table, OpCode::ISTYPE, types::is_type);
    set(&mut table, OpCode::CONVERT, types::convert);

    table
}
