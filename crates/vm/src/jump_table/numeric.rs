//! Arithmetic handlers.

use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::stack_item::{check_integer_size, StackItem};
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};

fn push_checked(
    engine: &mut ExecutionEngine,
    value: BigInt,
    operation: &'static str,
) -> VmResult<()> {
    check_integer_size(&value, operation)?;
    engine.push(StackItem::Integer(value))
}

/// `SIGN`.
pub fn sign(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x = engine.pop_int()?;
    let sign: i8 = if x.is_negative() {
        -1
    } else if x.is_zero() {
        0
    } else {
        1
    };
    engine.push(StackItem::from_int(sign))
}

/// `ABS`.
pub fn abs(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x = engine.pop_int()?;
    push_checked(engine, x.abs(), "ABS")
}

/// `NEGATE`.
pub fn negate(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x = engine.pop_int()?;
    push_checked(engine, -x, "NEGATE")
}

/// `INC`.
pub fn inc(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x = engine.pop_int()?;
    push_checked(engine, x + 1, "INC")
}

/// `DEC`.
pub fn dec(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x = engine.pop_int()?;
    push_checked(engine, x - 1, "DEC")
}

/// `ADD`.
pub fn add(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let right = engine.pop_int()?;
    let left = engine.pop_int()?;
    push_checked(engine, left + right, "ADD")
}

/// `SUB`.
pub fn sub(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let right = engine.pop_int()?;
    let left = engine.pop_int()?;
    push_checked(engine, left - right, "SUB")
}

/// `MUL`.
pub fn mul(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let right = engine.pop_int()?;
    let left = engine.pop_int()?;
    push_checked(engine, left * right, "MUL")
}

/// `DIV`: truncated division.
pub fn div(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let right = engine.pop_int()?;
    let left = engine.pop_int()?;
    if right.is_zero() {
        return Err(VmError::DivisionByZero);
    }
    push_checked(engine, left / right, "DIV")
}

/// `MOD`: remainder with the dividend's sign.
pub fn modulo(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let right = engine.pop_int()?;
    let left = engine.pop_int()?;
    if right.is_zero() {
        return Err(VmError::DivisionByZero);
    }
    push_checked(engine, left % right, "MOD")
}

/// `POW`: non-negative integer exponent.
pub fn pow(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let exponent = engine.pop_int()?;
    let base = engine.pop_int()?;
    let exponent = exponent
        .to_u32()
        .ok_or_else(|| VmError::invalid_operation("POW exponent must be a non-negative u32"))?;
    push_checked(engine, base.pow(exponent), "POW")
}

/// `SQRT`: integer square root; negative operands fault.
pub fn sqrt(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x = engine.pop_int()?;
    if x.is_negative() {
        return Err(VmError::invalid_operation("SQRT of a negative number"));
    }
    engine.push(StackItem::Integer(x.sqrt()))
}

/// `MODMUL`: (a × b) mod m.
pub fn mod_mul(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let modulus = engine.pop_int()?;
    let right = engine.pop_int()?;
    let left = engine.pop_int()?;
    if modulus.is_zero() {
        return Err(VmError::DivisionByZero);
    }
    push_checked(engine, (left * right) % modulus, "MODMUL")
}

/// `MODPOW`: modular exponentiation; exponent −1 is the modular inverse.
pub fn mod_pow(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let modulus = engine.pop_int()?;
    let exponent = engine.pop_int()?;
    let base = engine.pop_int()?;
    if modulus.is_zero() {
        return Err(VmError::DivisionByZero);
    }
    let result = if exponent == BigInt::from(-1) {
        mod_inverse(&base, &modulus)
            .ok_or_else(|| VmError::invalid_operation("MODPOW inverse does not exist"))?
    } else if exponent.is_negative() {
        return Err(VmError::invalid_operation(
            "MODPOW exponent must be -1 or non-negative",
        ));
    } else {
        base.modpow(&exponent, &modulus)
    };
    push_checked(engine, result, "MODPOW")
}

/// Extended-Euclid modular inverse of `a` mod `m`.
fn mod_inverse(a: &BigInt, m: &BigInt) -> Option<BigInt> {
    let m = m.abs();
    if m.is_zero() {
        return None;
    }
    let (mut old_r, mut r) = (a.mod_floor_positive(&m), m.clone());
    let (mut old_s, mut s) = (BigInt::from(1), BigInt::from(0));
    while !r.is_zero() {
        let quotient = &old_r / &r;
        let next_r = &old_r - &quotient * &r;
        old_r = std::mem::replace(&mut r, next_r);
        let next_s = &old_s - &quotient * &s;
        old_s = std::mem::replace(&mut s, next_s);
    }
    if old_r != BigInt::from(1) {
        return None;
    }
    Some(old_s.mod_floor_positive(&m))
}

trait ModFloor {
    fn mod_floor_positive(&self, m: &BigInt) -> BigInt;
}

impl ModFloor for BigInt {
    fn mod_floor_positive(&self, m: &BigInt) -> BigInt {
        let r = self % m;
        if r.is_negative() {
            r + m.abs()
        } else {
            r
        }
    }
}

/// `SHL`.
pub fn shl(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let shift = engine.pop_int()?;
    let value = engine.pop_int()?;
    let shift = check_shift(engine, shift)?;
    if shift == 0 {
        return engine.push(StackItem::Integer(value));
    }
    push_checked(engine, value << shift, "SHL")
}

/// `SHR`: arithmetic shift right.
pub fn shr(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let shift = engine.pop_int()?;
    let value = engine.pop_int()?;
    let shift = check_shift(engine, shift)?;
    if shift == 0 {
        return engine.push(StackItem::Integer(value));
    }
    engine.push(StackItem::Integer(value >> shift))
}

fn check_shift(engine: &ExecutionEngine, shift: BigInt) -> VmResult<u32> {
    let max = engine.limits().max_shift;
    let shift = shift
        .to_u32()
        .ok_or_else(|| VmError::invalid_operation("shift count must be non-negative"))?;
    if shift > max {
        return Err(VmError::limit_exceeded("shift count", shift as usize, max as usize));
    }
    Ok(shift)
}

/// `NOT`: logical negation.
pub fn not(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x = engine.pop_bool()?;
    engine.push(StackItem::Boolean(!x))
}

/// `BOOLAND`.
pub fn bool_and(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let right = engine.pop_bool()?;
    let left = engine.pop_bool()?;
    engine.push(StackItem::Boolean(left && right))
}

/// `BOOLOR`.
pub fn bool_or(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let right = engine.pop_bool()?;
    let left = engine.pop_bool()?;
    engine.push(StackItem::Boolean(left || right))
}

/// `NZ`.
pub fn nz(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x = engine.pop_int()?;
    engine.push(StackItem::Boolean(!x.is_zero()))
}

/// `NUMEQUAL`.
pub fn num_equal(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let right = engine.pop_int()?;
    let left = engine.pop_int()?;
    engine.push(StackItem::Boolean(left == right))
}

/// `NUMNOTEQUAL`.
pub fn num_not_equal(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let right = engine.pop_int()?;
    let left = engine.pop_int()?;
    engine.push(StackItem::Boolean(left != right))
}

fn ordered(
    engine: &mut ExecutionEngine,
    compare: fn(&BigInt, &BigInt) -> bool,
) -> VmResult<()> {
    let right = engine.pop()?;
    let left = engine.pop()?;
    // Comparisons against null are false, not faults.
    if left.is_null() || right.is_null() {
        return engine.push(StackItem::Boolean(false));
    }
    let result = compare(&left.to_int()?, &right.to_int()?);
    engine.push(StackItem::Boolean(result))
}

/// `LT`.
pub fn lt(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    ordered(engine, |a, b| a < b)
}

/// `LE`.
pub fn le(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    ordered(engine, |a, b| a <= b)
}

/// `GT`.
pub fn gt(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    ordered(engine, |a, b| a > b)
}

/// `GE`.
pub fn ge(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    ordered(engine, |a, b| a >= b)
}

/// `MIN`.
pub fn min(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let right = engine.pop_int()?;
    let left = engine.pop_int()?;
    engine.push(StackItem::Integer(left.min(right)))
}

/// `MAX`.
pub fn max(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let right = engine.pop_int()?;
    let left = engine.pop_int()?;
    engine.push(StackItem::Integer(left.max(right)))
}

/// `WITHIN`: a ≤ x < b.
pub fn within(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let upper = engine.pop_int()?;
    let lower = engine.pop_int()?;
    let x = engine.pop_int()?;
    engine.push(StackItem::Boolean(lower <= x && x < upper))
}
