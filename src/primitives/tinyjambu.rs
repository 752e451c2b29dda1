//! TinyJAMBU permutations for the armv7m target.
//!
//! The 128-bit state lives in four word registers for the whole
//! permutation; the key follows the state in memory, stored inverted
//! so the NAND in the feedback folds into plain AND-XOR. The shifted
//! taps come out of the shift-and-operate forms, two instructions per
//! 64-bit extraction.

use crate::codegen::CodeGenerator;
use crate::error::CodegenResult;
use crate::interp::Interpreter;
use crate::registry::Registry;
use crate::regs::Reg;
use crate::testvector::TestVector;

/// 32 steps of the feedback function:
/// `s0 ^= s47 ^ (s70 & s85) ^ s91 ^ kinv[word]` with the taps drawn
/// from the sliding 128-bit window.
fn steps_32(
    code: &mut CodeGenerator,
    state: &Reg,
    s0: &Reg,
    s1: &Reg,
    s2: &Reg,
    s3: &Reg,
    t1: &Reg,
    t2: &Reg,
    kword: u64,
) -> CodegenResult<()> {
    // t1 = (s1 >> 15) | (s2 << 17); s0 ^= t1
    code.lsr_into(t1, s1, 15)?;
    code.or_lsl(t1, s2, 17)?;
    code.logxor(s0, t1)?;

    // t1 = (s2 >> 6) | (s3 << 26); t2 = (s2 >> 21) | (s3 << 11)
    // s0 ^= t1 & t2   (the key below carries the complement)
    code.lsr_into(t1, s2, 6)?;
    code.or_lsl(t1, s3, 26)?;
    code.lsr_into(t2, s2, 21)?;
    code.or_lsl(t2, s3, 11)?;
    code.logand(t1, t2)?;
    code.logxor(s0, t1)?;

    // t1 = (s2 >> 27) | (s3 << 5); s0 ^= t1
    code.lsr_into(t1, s2, 27)?;
    code.or_lsl(t1, s3, 5)?;
    code.logxor(s0, t1)?;

    // s0 ^= kinv[kword]
    code.ld_xor(s0, state, 16 + kword * 4)
}

fn gen_tinyjambu(code: &mut CodeGenerator, name: &str, key_words: u64) -> CodegenResult<()> {
    let (state, rounds) = code.prologue_permutation_with_count(name, 0)?;

    let s: Vec<Reg> = (0..4)
        .map(|_| code.allocate_reg(32))
        .collect::<CodegenResult<_>>()?;
    let t1 = code.allocate_reg(32)?;
    let t2 = code.allocate_reg(32)?;
    for (i, word) in s.iter().enumerate() {
        code.ld(word, &state, (i * 4) as u64)?;
    }

    let top = code.new_label();
    let end = code.new_label();
    code.label(top)?;

    // Unroll until the key schedule realigns with the state window.
    let inner_rounds = match key_words {
        4 => 1,
        6 => 3,
        _ => 2,
    };
    for inner in 0..inner_rounds {
        let koffset = inner * 4;
        for step in 0..4u64 {
            let a = &s[step as usize % 4];
            let b = &s[(step as usize + 1) % 4];
            let c = &s[(step as usize + 2) % 4];
            let d = &s[(step as usize + 3) % 4];
            steps_32(code, &state, a, b, c, d, &t1, &t2, (koffset + step) % key_words)?;
        }
        if inner < inner_rounds - 1 {
            code.dec(&rounds)?;
            code.breq(end)?;
        }
    }
    code.dec(&rounds)?;
    code.brne(top)?;

    code.label(end)?;
    for (i, word) in s.iter().enumerate() {
        code.st(word, &state, (i * 4) as u64)?;
    }
    Ok(())
}

fn gen_tinyjambu_128(code: &mut CodeGenerator) -> CodegenResult<()> {
    gen_tinyjambu(code, "tinyjambu_permutation_128", 4)
}

fn gen_tinyjambu_192(code: &mut CodeGenerator) -> CodegenResult<()> {
    gen_tinyjambu(code, "tinyjambu_permutation_192", 6)
}

fn gen_tinyjambu_256(code: &mut CodeGenerator) -> CodegenResult<()> {
    gen_tinyjambu(code, "tinyjambu_permutation_256", 8)
}

fn test_tinyjambu(code: &CodeGenerator, vec: &TestVector, key_bytes: usize) -> CodegenResult<bool> {
    let mut state = vec![0u8; 16 + key_bytes];
    let mut key = vec![0u8; key_bytes];
    if !vec.populate(&mut state[..16], "Input") || !vec.populate(&mut key, "Key") {
        return Ok(false);
    }
    // The permutation expects the key pre-inverted.
    for (dst, src) in state[16..].iter_mut().zip(&key) {
        *dst = !*src;
    }
    let rounds = (1024 + (key_bytes as u64 - 16) * 16) / 128;
    Interpreter::new(code).exec_permutation(&mut state, Some(rounds))?;
    Ok(vec.check(&state[..16], "Output"))
}

fn test_tinyjambu_128(code: &CodeGenerator, vec: &TestVector) -> CodegenResult<bool> {
    test_tinyjambu(code, vec, 16)
}

fn test_tinyjambu_192(code: &CodeGenerator, vec: &TestVector) -> CodegenResult<bool> {
    test_tinyjambu(code, vec, 24)
}

fn test_tinyjambu_256(code: &CodeGenerator, vec: &TestVector) -> CodegenResult<bool> {
    test_tinyjambu(code, vec, 32)
}

pub(crate) fn register(registry: &mut Registry) {
    registry.register(
        "tinyjambu_permutation_128",
        None,
        "armv7m",
        gen_tinyjambu_128,
        Some(test_tinyjambu_128),
    );
    registry.register(
        "tinyjambu_permutation_192",
        None,
        "armv7m",
        gen_tinyjambu_192,
        Some(test_tinyjambu_192),
    );
    registry.register(
        "tinyjambu_permutation_256",
        None,
        "armv7m",
        gen_tinyjambu_256,
        Some(test_tinyjambu_256),
    );
}
