//! ASCON permutation for the armv8a target.
//!
//! The five 64-bit words fit comfortably in registers on a 64-bit
//! machine, the bit-sliced substitution layer maps onto the bit-clear
//! form, and the linear layer folds its rotations into the
//! shift-and-operate encodings. The state is big-endian in memory.
//!
//! The count argument is the index of the first round: 0 runs the full
//! twelve rounds, 6 the last six.

use crate::codegen::CodeGenerator;
use crate::error::CodegenResult;
use crate::interp::Interpreter;
use crate::registry::Registry;
use crate::testvector::TestVector;

/// Rotation pairs of the linear diffusion layer.
const ROTATIONS: [(u8, u8); 5] = [(19, 28), (61, 39), (1, 6), (10, 17), (7, 41)];

fn gen_ascon_permute(code: &mut CodeGenerator) -> CodegenResult<()> {
    let (state, round) = code.prologue_permutation_with_count("ascon_permute", 0)?;

    let mut x = Vec::with_capacity(5);
    for i in 0..5 {
        let word = code.allocate_reg(64)?;
        code.ld_be(&word, &state, (i * 8) as u64)?;
        x.push(word);
    }
    let mut t = Vec::with_capacity(5);
    for _ in 0..5 {
        t.push(code.allocate_reg(64)?);
    }

    let top = code.new_label();
    let end = code.new_label();
    code.compare_imm(&round, 12)?;
    code.brgeu(end)?;
    code.label(top)?;

    // Round constant: ((0xf - r) << 4) | r into x2.
    code.move_imm(&t[0], 0xF)?;
    code.sub(&t[0], &round)?;
    code.lsl(&t[0], 4)?;
    code.logor(&t[0], &round)?;
    code.logxor(&x[2], &t[0])?;

    // Substitution layer, bit-sliced across the five words.
    code.logxor(&x[0], &x[4])?;
    code.logxor(&x[4], &x[3])?;
    code.logxor(&x[2], &x[1])?;
    for i in 0..5 {
        code.logbic_into(&t[i], &x[(i + 1) % 5], &x[i])?;
    }
    for i in 0..5 {
        code.logxor(&x[i], &t[(i + 1) % 5])?;
    }
    code.logxor(&x[1], &x[0])?;
    code.logxor(&x[0], &x[4])?;
    code.logxor(&x[3], &x[2])?;
    code.lognot(&x[2])?;

    // Linear diffusion layer.
    for (i, &(a, b)) in ROTATIONS.iter().enumerate() {
        code.rotr_into(&t[0], &x[i], a)?;
        code.xor_ror(&t[0], &x[i], b)?;
        code.logxor(&x[i], &t[0])?;
    }

    code.add_imm(&round, 1)?;
    code.compare_imm(&round, 12)?;
    code.brltu(top)?;

    code.label(end)?;
    for (i, word) in x.iter().enumerate() {
        code.st_be(word, &state, (i * 8) as u64)?;
    }
    Ok(())
}

fn test_ascon_permute(code: &CodeGenerator, vec: &TestVector) -> CodegenResult<bool> {
    let mut state = [0u8; 40];
    if !vec.populate(&mut state, "Input") {
        return Ok(false);
    }
    let first_round = vec.value_as_int("First_Round", 0) as u64;
    Interpreter::new(code).exec_permutation(&mut state, Some(first_round))?;
    Ok(vec.check(&state, "Output"))
}

pub(crate) fn register(registry: &mut Registry) {
    registry.register(
        "ascon_permute",
        None,
        "armv8a",
        gen_ascon_permute,
        Some(test_ascon_permute),
    );
}
