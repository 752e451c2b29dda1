//! Xoodoo for the armv7m target.
//!
//! The 48-byte state stays in memory and each round streams it through
//! a few word registers, pass by pass: theta with the column parities
//! parked in the frame, the two plane rotations, the round constant,
//! and chi column by column. The constants come from an embedded
//! half-word table indexed by the round number, so a reduced-round
//! call runs the *last* `count` rounds with the right constants.

use crate::codegen::CodeGenerator;
use crate::error::CodegenResult;
use crate::interp::Interpreter;
use crate::registry::Registry;
use crate::testvector::TestVector;

/// Number of rounds in the full permutation.
const ROUNDS: u64 = 12;

/// Round constants.
const RC: [u16; 12] = [
    0x0058, 0x0038, 0x03C0, 0x00D0, 0x0120, 0x0014, 0x0060, 0x002C, 0x0380, 0x00F0, 0x01A0,
    0x0012,
];

fn rc_table() -> Vec<u8> {
    let mut table = Vec::with_capacity(24);
    for rc in RC.iter() {
        table.extend_from_slice(&rc.to_le_bytes());
    }
    table
}

/// Byte offset of the word at `(plane, lane)`.
fn word(plane: u64, lane: u64) -> u64 {
    plane * 16 + lane * 4
}

fn gen_xoodoo(code: &mut CodeGenerator) -> CodegenResult<()> {
    // 16 bytes of frame hold the column parities during theta.
    let (state, count) = code.prologue_permutation_with_count("xoodoo_permute", 16)?;

    let x0 = code.allocate_reg(32)?;
    let x1 = code.allocate_reg(32)?;
    let mut x2 = code.allocate_reg(32)?;
    let t1 = code.allocate_reg(32)?;
    let index = code.allocate_reg(32)?;

    let top = code.new_label();
    let end = code.new_label();

    // The table index of the first round constant is 12 - count.
    code.compare_imm(&count, 0)?;
    code.breq(end)?;
    code.move_imm(&index, ROUNDS)?;
    code.sub(&index, &count)?;
    code.sbox_setup(0, &rc_table())?;

    code.label(top)?;

    // Step theta: column parities into the frame, then fold the folded
    // and rotated parity of each neighbouring column into all planes.
    for lane in 0..4 {
        code.ld(&x0, &state, word(0, lane))?;
        code.ld_xor(&x0, &state, word(1, lane))?;
        code.ld_xor(&x0, &state, word(2, lane))?;
        code.stlocal(&x0, lane * 4)?;
    }
    for lane in 0..4u64 {
        code.ldlocal(&x0, ((lane + 3) % 4) * 4)?;
        code.rotr_into(&t1, &x0, 27)?;
        code.xor_ror(&t1, &x0, 18)?;
        for plane in 0..3 {
            code.mem_xor(&state, word(plane, lane), &t1)?;
        }
    }

    // Step rho west: plane 1 slides one lane, plane 2 rotates by 11.
    code.ld(&x0, &state, word(1, 3))?;
    for lane in [3u64, 2, 1] {
        code.ld(&x1, &state, word(1, lane - 1))?;
        code.st(&x1, &state, word(1, lane))?;
    }
    code.st(&x0, &state, word(1, 0))?;
    for lane in 0..4 {
        code.ld(&mut x2, &state, word(2, lane))?;
        code.rol(&mut x2, 11)?;
        code.st(&x2, &state, word(2, lane))?;
    }

    // Step iota: the round constant from the table.
    code.sbox_load_word_indexed(&t1, &index, 16)?;
    code.mem_xor(&state, word(0, 0), &t1)?;

    // Step chi, column by column.
    for lane in 0..4 {
        code.ld(&x0, &state, word(0, lane))?;
        code.ld(&x1, &state, word(1, lane))?;
        code.ld(&x2, &state, word(2, lane))?;
        code.logbic_into(&t1, &x2, &x1)?;
        code.logxor(&x0, &t1)?;
        code.logbic_into(&t1, &x0, &x2)?;
        code.logxor(&x1, &t1)?;
        code.logbic_into(&t1, &x1, &x0)?;
        code.logxor(&x2, &t1)?;
        code.st(&x0, &state, word(0, lane))?;
        code.st(&x1, &state, word(1, lane))?;
        code.st(&x2, &state, word(2, lane))?;
    }

    // Step rho east: plane 1 rotates by 1, plane 2 slides two lanes
    // with a rotation by 8.
    for lane in 0..4 {
        code.ld(&mut x2, &state, word(1, lane))?;
        code.rol(&mut x2, 1)?;
        code.st(&x2, &state, word(1, lane))?;
    }
    code.ld(&x0, &state, word(2, 0))?;
    code.ld(&x1, &state, word(2, 1))?;
    for lane in 0..2u64 {
        code.ld(&mut x2, &state, word(2, lane + 2))?;
        code.rol(&mut x2, 8)?;
        code.st(&x2, &state, word(2, lane))?;
    }
    let mut saved = x0.clone();
    code.rol(&mut saved, 8)?;
    code.st(&saved, &state, word(2, 2))?;
    let mut saved = x1.clone();
    code.rol(&mut saved, 8)?;
    code.st(&saved, &state, word(2, 3))?;

    // Bottom of the round loop.
    code.add_imm(&index, 1)?;
    code.dec(&count)?;
    code.brne(top)?;

    code.label(end)?;
    code.sbox_cleanup();
    Ok(())
}

fn test_xoodoo(code: &CodeGenerator, vec: &TestVector) -> CodegenResult<bool> {
    let mut state = [0u8; 48];
    if !vec.populate(&mut state, "Input") {
        return Ok(false);
    }
    let count = vec.value_as_int("Count", ROUNDS as i64) as u64;
    Interpreter::new(code).exec_permutation(&mut state, Some(count))?;
    Ok(vec.check(&state, "Output"))
}

pub(crate) fn register(registry: &mut Registry) {
    registry.register(
        "xoodoo_permute",
        None,
        "armv7m",
        gen_xoodoo,
        Some(test_xoodoo),
    );
}
