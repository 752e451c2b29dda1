//! SHA-256 transform for the armv7m target.
//!
//! The eight working variables stay in registers for all 64 rounds,
//! renamed rather than moved since the rounds are fully unrolled. The
//! message schedule lives in the 64-byte block half of the state,
//! converted to little-endian on first touch and derived in place as a
//! sixteen-word ring. Round constants come from an embedded table
//! through the staked pointer.

use crate::codegen::CodeGenerator;
use crate::error::CodegenResult;
use crate::insn::{Modifier, Opcode};
use crate::interp::Interpreter;
use crate::registry::Registry;
use crate::testvector::TestVector;

/// Round constants.
const K: [u32; 64] = [
    0x428a2f98, 0x71374491, 0xb5c0fbcf, 0xe9b5dba5, 0x3956c25b, 0x59f111f1, 0x923f82a4,
    0xab1c5ed5, 0xd807aa98, 0x12835b01, 0x243185be, 0x550c7dc3, 0x72be5d74, 0x80deb1fe,
    0x9bdc06a7, 0xc19bf174, 0xe49b69c1, 0xefbe4786, 0x0fc19dc6, 0x240ca1cc, 0x2de92c6f,
    0x4a7484aa, 0x5cb0a9dc, 0x76f988da, 0x983e5152, 0xa831c66d, 0xb00327c8, 0xbf597fc7,
    0xc6e00bf3, 0xd5a79147, 0x06ca6351, 0x14292967, 0x27b70a85, 0x2e1b2138, 0x4d2c6dfc,
    0x53380d13, 0x650a7354, 0x766a0abb, 0x81c2c92e, 0x92722c85, 0xa2bfe8a1, 0xa81a664b,
    0xc24b8b70, 0xc76c51a3, 0xd192e819, 0xd6990624, 0xf40e3585, 0x106aa070, 0x19a4c116,
    0x1e376c08, 0x2748774c, 0x34b0bcb5, 0x391c0cb3, 0x4ed8aa4a, 0x5b9cca4f, 0x682e6ff3,
    0x748f82ee, 0x78a5636f, 0x84c87814, 0x8cc70208, 0x90befffa, 0xa4506ceb, 0xbef9a3f7,
    0xc67178f2,
];

fn k_table() -> Vec<u8> {
    let mut table = Vec::with_capacity(256);
    for k in K.iter() {
        table.extend_from_slice(&k.to_le_bytes());
    }
    table
}

/// Offset of message word `i & 15` in the state buffer.
fn w_offset(i: usize) -> u64 {
    32 + ((i & 15) * 4) as u64
}

fn gen_sha256_transform(code: &mut CodeGenerator) -> CodegenResult<()> {
    let state = code.prologue_permutation("sha256_transform", 0)?;

    // a..h, renamed per round instead of rotated.
    let mut vars = Vec::with_capacity(8);
    for i in 0..8 {
        let reg = code.allocate_reg(32)?;
        code.ld(&reg, &state, (i * 4) as u64)?;
        vars.push(reg);
    }
    let t1 = code.allocate_reg(32)?;
    let t2 = code.allocate_reg(32)?;
    let t3 = code.allocate_reg(32)?;
    code.sbox_setup(0, &k_table())?;

    for i in 0..64 {
        let a = vars[0].clone();
        let b = vars[1].clone();
        let c = vars[2].clone();
        let d = vars[3].clone();
        let e = vars[4].clone();
        let f = vars[5].clone();
        let g = vars[6].clone();
        let h = vars[7].clone();

        if i < 16 {
            // First pass converts the big-endian block to host order
            // in place; the ring is read back little-endian later.
            code.ld_be(&t1, &state, w_offset(i))?;
            code.st(&t1, &state, w_offset(i))?;
        } else {
            // w[i] = w[i-16] + sigma0(w[i-15]) + w[i-7] + sigma1(w[i-2])
            code.ld(&t1, &state, w_offset(i - 16))?;
            code.ld(&t2, &state, w_offset(i - 15))?;
            code.rotr_into(&t3, &t2, 7)?;
            code.xor_ror(&t3, &t2, 18)?;
            code.shifted(Opcode::Xor, &t3, &t2, Modifier::Lsr, 3)?;
            code.add(&t1, &t3)?;
            code.ld(&t2, &state, w_offset(i - 7))?;
            code.add(&t1, &t2)?;
            code.ld(&t2, &state, w_offset(i - 2))?;
            code.rotr_into(&t3, &t2, 17)?;
            code.xor_ror(&t3, &t2, 19)?;
            code.shifted(Opcode::Xor, &t3, &t2, Modifier::Lsr, 10)?;
            code.add(&t1, &t3)?;
            code.st(&t1, &state, w_offset(i))?;
        }

        // t1 += k[i] + h + Sigma1(e) + Ch(e, f, g)
        code.sbox_load_word(&t2, (i * 4) as u64)?;
        code.add(&t1, &t2)?;
        code.add(&t1, &h)?;
        code.rotr_into(&t2, &e, 6)?;
        code.xor_ror(&t2, &e, 11)?;
        code.xor_ror(&t2, &e, 25)?;
        code.add(&t1, &t2)?;
        code.move_reg(&t3, &f)?;
        code.logxor(&t3, &g)?;
        code.logand(&t3, &e)?;
        code.logxor(&t3, &g)?;
        code.add(&t1, &t3)?;

        // e' = d + t1
        code.add(&d, &t1)?;

        // a' = t1 + Sigma0(a) + Maj(a, b, c), built in the register
        // that held h (free once t1 absorbed it).
        code.rotr_into(&h, &a, 2)?;
        code.xor_ror(&h, &a, 13)?;
        code.xor_ror(&h, &a, 22)?;
        code.add(&h, &t1)?;
        code.move_reg(&t3, &a)?;
        code.logand(&t3, &b)?;
        code.add(&h, &t3)?;
        code.move_reg(&t3, &a)?;
        code.logxor(&t3, &b)?;
        code.logand(&t3, &c)?;
        code.add(&h, &t3)?;

        // Rename: the old h register carries the new a.
        vars.rotate_right(1);
    }

    // Fold the working variables back into the hash state.
    for (i, var) in vars.iter().enumerate() {
        code.ld(&t1, &state, (i * 4) as u64)?;
        code.add(var, &t1)?;
        code.st(var, &state, (i * 4) as u64)?;
    }
    code.sbox_cleanup();
    Ok(())
}

fn test_sha256_transform(code: &CodeGenerator, vec: &TestVector) -> CodegenResult<bool> {
    let mut state = [0u8; 96];
    if !vec.populate(&mut state[..32], "Hash_In") || !vec.populate(&mut state[32..], "Data") {
        return Ok(false);
    }
    Interpreter::new(code).exec_permutation(&mut state, None)?;
    Ok(vec.check(&state[..32], "Hash_Out"))
}

pub(crate) fn register(registry: &mut Registry) {
    registry.register(
        "sha256_transform",
        None,
        "armv7m",
        gen_sha256_transform,
        Some(test_sha256_transform),
    );
}
