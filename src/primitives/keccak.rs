//! Keccak-p[200] for the avr5 target.
//!
//! The 25-byte state stays in memory behind the state pointer; each
//! round streams it through a handful of byte registers. The bulk of
//! the round function lives in a subroutine, with the unrolled outer
//! loop feeding in the per-round constants.

use crate::codegen::CodeGenerator;
use crate::error::CodegenResult;
use crate::interp::Interpreter;
use crate::registry::Registry;
use crate::testvector::TestVector;

/// Round constants for the 18 rounds of Keccak-p[200].
const RC: [u8; 18] = [
    0x01, 0x82, 0x8A, 0x00, 0x8B, 0x01, 0x81, 0x09, 0x8A, 0x88, 0x09, 0x0A, 0x8B, 0x8B, 0x89,
    0x03, 0x02, 0x80,
];

/// The rho/pi permutation as an in-place cycle: `(target, rotation,
/// source)` byte offsets within the state, applied in order after the
/// first lane of the cycle is saved.
const RHO_PI_CHAIN: [(u64, usize, u64); 23] = [
    (1, 4, 6),
    (6, 4, 9),
    (9, 5, 22),
    (22, 7, 14),
    (14, 2, 20),
    (20, 6, 2),
    (2, 3, 12),
    (12, 1, 13),
    (13, 0, 19),
    (19, 0, 23),
    (23, 1, 15),
    (15, 3, 4),
    (4, 6, 24),
    (24, 2, 21),
    (21, 7, 8),
    (8, 5, 16),
    (16, 4, 5),
    (5, 4, 3),
    (3, 5, 18),
    (18, 7, 17),
    (17, 2, 11),
    (11, 6, 7),
    (7, 3, 10),
];

fn gen_keccakp_200(code: &mut CodeGenerator) -> CodegenResult<()> {
    let state = code.prologue_permutation("keccakp_200_permute", 0)?;

    let mut row = Vec::with_capacity(5);
    for _ in 0..5 {
        row.push(code.allocate_reg(8)?);
    }
    let mut d = code.allocate_reg(8)?;
    let mut t = code.allocate_reg(8)?;
    let rc = code.allocate_high(8)?;

    let subroutine = code.new_label();
    let end = code.new_label();

    // Unrolled outer loop; theta/rho/pi/chi live in the subroutine and
    // iota is applied inline with the per-round constant.
    for round in 0..18 {
        code.call(subroutine)?;
        code.move_imm(&rc, RC[round] as u64)?;
        code.mem_xor(&state, 0, &rc)?;
    }
    code.jmp(end)?;

    code.label(subroutine)?;

    // Step mapping theta: column parities first.
    for x in 0..5u64 {
        code.ld(&row[x as usize], &state, x)?;
        for y in 1..5u64 {
            code.ld_xor(&row[x as usize], &state, y * 5 + x)?;
        }
    }
    for x in 0..5usize {
        code.move_reg(&d, &row[(x + 1) % 5])?;
        code.rol(&mut d, 1)?;
        code.logxor(&d, &row[(x + 4) % 5])?;
        for y in 0..5u64 {
            code.mem_xor(&state, y * 5 + x as u64, &d)?;
        }
    }

    // Step mappings rho and pi as one in-place cycle through memory.
    code.ld(&row[0], &state, 1)?;
    for &(target, rotation, source) in RHO_PI_CHAIN.iter() {
        code.ld(&t, &state, source)?;
        code.rol(&mut t, rotation)?;
        code.st(&t, &state, target)?;
    }
    code.rol(&mut row[0], 1)?;
    code.st(&row[0], &state, 10)?;

    // Step mapping chi, one row of five lanes at a time.
    for y in 0..5u64 {
        for x in 0..5u64 {
            code.ld(&row[x as usize], &state, y * 5 + x)?;
        }
        for x in 0..5usize {
            code.move_reg(&t, &row[(x + 1) % 5])?;
            code.lognot(&t)?;
            code.logand(&t, &row[(x + 2) % 5])?;
            code.logxor(&t, &row[x])?;
            code.st(&t, &state, y * 5 + x as u64)?;
        }
    }
    code.ret()?;

    code.label(end)?;
    Ok(())
}

fn test_keccakp_200(code: &CodeGenerator, vec: &TestVector) -> CodegenResult<bool> {
    let mut state = [0u8; 25];
    if !vec.populate(&mut state, "Input") {
        return Ok(false);
    }
    Interpreter::new(code).exec_permutation(&mut state, None)?;
    Ok(vec.check(&state, "Output"))
}

pub(crate) fn register(registry: &mut Registry) {
    registry.register(
        "keccakp_200_permute",
        None,
        "avr5",
        gen_keccakp_200,
        Some(test_keccakp_200),
    );
}
