//! AES key setup and ECB block encryption for the avr5 target.
//!
//! The key schedule expansion walks the schedule buffer with a roving
//! pointer so the same code shape covers 128-, 192- and 256-bit keys.
//! Encryption keeps the 16-byte state in registers; SubBytes and
//! ShiftRows combine into one in-place pass of S-box lookups, and
//! MixColumns doubles bytes with a branch-free reduction mask.
//!
//! The schedule starts with a four-byte header `(rounds_u16,
//! total_bytes_u16)` followed by the expanded key, the raw key bytes
//! included.

use crate::codegen::{CodeGenerator, EncryptBlockArgs};
use crate::error::CodegenResult;
use crate::interp::Interpreter;
use crate::registry::Registry;
use crate::regs::Reg;
use crate::testvector::TestVector;

/// The AES S-box.
pub const SBOX: [u8; 256] = [
    0x63, 0x7c, 0x77, 0x7b, 0xf2, 0x6b, 0x6f, 0xc5, 0x30, 0x01, 0x67, 0x2b, 0xfe, 0xd7, 0xab,
    0x76, 0xca, 0x82, 0xc9, 0x7d, 0xfa, 0x59, 0x47, 0xf0, 0xad, 0xd4, 0xa2, 0xaf, 0x9c, 0xa4,
    0x72, 0xc0, 0xb7, 0xfd, 0x93, 0x26, 0x36, 0x3f, 0xf7, 0xcc, 0x34, 0xa5, 0xe5, 0xf1, 0x71,
    0xd8, 0x31, 0x15, 0x04, 0xc7, 0x23, 0xc3, 0x18, 0x96, 0x05, 0x9a, 0x07, 0x12, 0x80, 0xe2,
    0xeb, 0x27, 0xb2, 0x75, 0x09, 0x83, 0x2c, 0x1a, 0x1b, 0x6e, 0x5a, 0xa0, 0x52, 0x3b, 0xd6,
    0xb3, 0x29, 0xe3, 0x2f, 0x84, 0x53, 0xd1, 0x00, 0xed, 0x20, 0xfc, 0xb1, 0x5b, 0x6a, 0xcb,
    0xbe, 0x39, 0x4a, 0x4c, 0x58, 0xcf, 0xd0, 0xef, 0xaa, 0xfb, 0x43, 0x4d, 0x33, 0x85, 0x45,
    0xf9, 0x02, 0x7f, 0x50, 0x3c, 0x9f, 0xa8, 0x51, 0xa3, 0x40, 0x8f, 0x92, 0x9d, 0x38, 0xf5,
    0xbc, 0xb6, 0xda, 0x21, 0x10, 0xff, 0xf3, 0xd2, 0xcd, 0x0c, 0x13, 0xec, 0x5f, 0x97, 0x44,
    0x17, 0xc4, 0xa7, 0x7e, 0x3d, 0x64, 0x5d, 0x19, 0x73, 0x60, 0x81, 0x4f, 0xdc, 0x22, 0x2a,
    0x90, 0x88, 0x46, 0xee, 0xb8, 0x14, 0xde, 0x5e, 0x0b, 0xdb, 0xe0, 0x32, 0x3a, 0x0a, 0x49,
    0x06, 0x24, 0x5c, 0xc2, 0xd3, 0xac, 0x62, 0x91, 0x95, 0xe4, 0x79, 0xe7, 0xc8, 0x37, 0x6d,
    0x8d, 0xd5, 0x4e, 0xa9, 0x6c, 0x56, 0xf4, 0xea, 0x65, 0x7a, 0xae, 0x08, 0xba, 0x78, 0x25,
    0x2e, 0x1c, 0xa6, 0xb4, 0xc6, 0xe8, 0xdd, 0x74, 0x1f, 0x4b, 0xbd, 0x8b, 0x8a, 0x70, 0x3e,
    0xb5, 0x66, 0x48, 0x03, 0xf6, 0x0e, 0x61, 0x35, 0x57, 0xb9, 0x86, 0xc1, 0x1d, 0x9e, 0xe1,
    0xf8, 0x98, 0x11, 0x69, 0xd9, 0x8e, 0x94, 0x9b, 0x1e, 0x87, 0xe9, 0xce, 0x55, 0x28, 0xdf,
    0x8c, 0xa1, 0x89, 0x0d, 0xbf, 0xe6, 0x42, 0x68, 0x41, 0x99, 0x2d, 0x0f, 0xb0, 0x54, 0xbb,
    0x16,
];

/// Key schedule round constants.
const RCON: [u8; 10] = [0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0x80, 0x1b, 0x36];

fn byte(reg: &Reg, index: usize) -> CodegenResult<Reg> {
    reg.subset(index * 8, 8)
}

/// Generates one of the key setup functions.
///
/// The expansion keeps a roving pointer at word `n - key_words` so the
/// previous word and the word one key-length back both sit within the
/// displacement range, whatever the key size.
fn gen_setup_key(code: &mut CodeGenerator, name: &str, key_bytes: usize) -> CodegenResult<()> {
    let (rounds, expanded) = match key_bytes {
        16 => (10u64, 176usize),
        24 => (12, 208),
        _ => (14, 240),
    };
    let total = (expanded + 4) as u64;

    let (mut schedule, mut key) = code.prologue_setup_key(name, 0)?;

    let t = code.allocate_reg(32)?;
    let u = code.allocate_reg(32)?;
    let temp = code.allocate_high(8)?;

    // Header: rounds and total schedule size, both 16-bit words.
    code.move_imm(&temp, rounds)?;
    code.st(&temp, &schedule, 0)?;
    code.move_imm(&temp, 0)?;
    code.st(&temp, &schedule, 1)?;
    code.move_imm(&temp, total & 0xFF)?;
    code.st(&temp, &schedule, 2)?;
    code.move_imm(&temp, total >> 8)?;
    code.st(&temp, &schedule, 3)?;

    // Copy the raw key into the front of the schedule.
    for offset in (0..key_bytes).step_by(4) {
        code.ld(&t, &key, offset as u64)?;
        code.st(&t, &schedule, 4 + offset as u64)?;
    }
    code.release(&mut key);

    // The roving pointer trails the write position by one key length.
    let ptr = code.allocate_address()?;
    code.move_reg(&ptr, &schedule)?;
    code.add_imm(&ptr, 4)?;
    code.release(&mut schedule);
    code.sbox_setup(0, &SBOX)?;

    let mut n = key_bytes;
    let mut rcon = 0usize;
    while n < expanded {
        code.ld(&t, &ptr, (key_bytes - 4) as u64)?;
        let transformed = if n % key_bytes == 0 {
            // Core step: rotate, substitute, fold in the round constant.
            for j in 0..4 {
                code.sbox_lookup(&byte(&u, j)?, &byte(&t, (j + 1) % 4)?)?;
            }
            code.move_imm(&temp, RCON[rcon] as u64)?;
            code.logxor(&byte(&u, 0)?, &temp)?;
            rcon += 1;
            true
        } else if key_bytes == 32 && n % 32 == 16 {
            // The 256-bit schedule substitutes again mid-key.
            for j in 0..4 {
                code.sbox_lookup(&byte(&u, j)?, &byte(&t, j)?)?;
            }
            true
        } else {
            false
        };
        if transformed {
            code.ld(&t, &ptr, 0)?;
            code.logxor(&t, &u)?;
        } else {
            code.ld_xor(&t, &ptr, 0)?;
        }
        code.st(&t, &ptr, key_bytes as u64)?;
        code.add_imm(&ptr, 4)?;
        n += 4;
    }
    code.sbox_cleanup();
    Ok(())
}

/// XORs the next round key into the state and advances the pointer.
fn apply_round_key(code: &mut CodeGenerator, state: &Reg, ptr: &Reg) -> CodegenResult<()> {
    for offset in 0..16 {
        code.ld_xor(&byte(state, offset)?, ptr, offset as u64)?;
    }
    code.add_imm(ptr, 16)
}

/// SubBytes and ShiftRows in one in-place pass over the state.
fn sub_bytes_shift_rows(code: &mut CodeGenerator, state: &Reg, temp: &Reg) -> CodegenResult<()> {
    let s = |col: usize, row: usize| byte(state, col * 4 + row);

    for col in 0..4 {
        code.sbox_lookup(&s(col, 0)?, &s(col, 0)?)?;
    }

    code.sbox_lookup(temp, &s(0, 1)?)?;
    code.sbox_lookup(&s(0, 1)?, &s(1, 1)?)?;
    code.sbox_lookup(&s(1, 1)?, &s(2, 1)?)?;
    code.sbox_lookup(&s(2, 1)?, &s(3, 1)?)?;
    code.move_reg(&s(3, 1)?, temp)?;

    code.sbox_lookup(temp, &s(0, 2)?)?;
    code.sbox_lookup(&s(0, 2)?, &s(2, 2)?)?;
    code.move_reg(&s(2, 2)?, temp)?;
    code.sbox_lookup(temp, &s(1, 2)?)?;
    code.sbox_lookup(&s(1, 2)?, &s(3, 2)?)?;
    code.move_reg(&s(3, 2)?, temp)?;

    code.sbox_lookup(temp, &s(0, 3)?)?;
    code.sbox_lookup(&s(0, 3)?, &s(3, 3)?)?;
    code.sbox_lookup(&s(3, 3)?, &s(2, 3)?)?;
    code.sbox_lookup(&s(2, 3)?, &s(1, 3)?)?;
    code.move_reg(&s(1, 3)?, temp)?;
    Ok(())
}

/// `dst = gf_double(src)`; `mask` must be immediate-capable.
fn gdouble(code: &mut CodeGenerator, dst: &Reg, src: &Reg, mask: &Reg) -> CodegenResult<()> {
    if dst != src {
        code.move_reg(dst, src)?;
    }
    code.move_reg(mask, dst)?;
    code.lsr(mask, 7)?;
    code.negate(mask)?;
    code.logand_imm(mask, 0x1B)?;
    code.lsl(dst, 1)?;
    code.logxor(dst, mask)
}

/// MixColumns over one column.
fn mix_column(code: &mut CodeGenerator, state: &Reg, col: usize, temp: &Reg) -> CodegenResult<()> {
    let a = byte(state, col * 4)?;
    let b = byte(state, col * 4 + 1)?;
    let c = byte(state, col * 4 + 2)?;
    let d = byte(state, col * 4 + 3)?;

    let mut a2 = code.allocate_reg(8)?;
    let mut b2 = code.allocate_reg(8)?;
    let mut c2 = code.allocate_reg(8)?;
    gdouble(code, &a2, &a, temp)?;
    gdouble(code, &b2, &b, temp)?;
    gdouble(code, &c2, &c, temp)?;

    // s0 = 2a ^ 3b ^ c ^ d
    let mut s0 = code.allocate_reg(8)?;
    code.move_reg(&s0, &a2)?;
    code.logxor(&s0, &b2)?;
    code.logxor(&s0, &b)?;
    code.logxor(&s0, &c)?;
    code.logxor(&s0, &d)?;

    // s1 = a ^ 2b ^ 3c ^ d
    let mut s1 = code.allocate_reg(8)?;
    code.move_reg(&s1, &a)?;
    code.logxor(&s1, &b2)?;
    code.logxor(&s1, &c2)?;
    code.logxor(&s1, &c)?;
    code.logxor(&s1, &d)?;

    // b2 is free now; reuse it for 2d.
    let d2 = b2.clone();
    gdouble(code, &d2, &d, temp)?;

    // s2 = a ^ b ^ 2c ^ 3d
    let mut s2 = code.allocate_reg(8)?;
    code.move_reg(&s2, &a)?;
    code.logxor(&s2, &b)?;
    code.logxor(&s2, &c2)?;
    code.logxor(&s2, &d2)?;
    code.logxor(&s2, &d)?;

    // s3 = 3a ^ b ^ c ^ 2d, built in place of d.
    code.move_reg(&d, &a2)?;
    code.logxor(&d, &a)?;
    code.logxor(&d, &b)?;
    code.logxor(&d, &c)?;
    code.logxor(&d, &d2)?;

    code.move_reg(&a, &s0)?;
    code.move_reg(&b, &s1)?;
    code.move_reg(&c, &s2)?;

    code.release(&mut a2);
    code.release(&mut b2);
    code.release(&mut c2);
    code.release(&mut s0);
    code.release(&mut s1);
    code.release(&mut s2);
    Ok(())
}

fn gen_aes_ecb_encrypt(code: &mut CodeGenerator) -> CodegenResult<()> {
    let EncryptBlockArgs {
        mut schedule,
        mut input,
        output,
    } = code.prologue_encrypt_block("aes_ecb_encrypt", 0)?;

    // One high register holds the round count, then round-function
    // scratch for the rest of the function.
    let temp = code.allocate_high(8)?;
    let state = code.allocate_reg(128)?;

    code.ld(&state, &input, 0)?;
    code.ld(&temp, &schedule, 0)?;
    code.release(&mut input);

    // The round keys stream through a roving pointer while Z serves
    // the S-box.
    let mut ptr = code.allocate_address()?;
    code.move_reg(&ptr, &schedule)?;
    code.add_imm(&ptr, 4)?;
    code.release(&mut schedule);
    code.sbox_setup(0, &SBOX)?;

    apply_round_key(code, &state, &ptr)?;

    // Dispatch on the round count from the schedule header.
    let rounds_10 = code.new_label();
    let rounds_12 = code.new_label();
    let subroutine = code.new_label();
    let end = code.new_label();
    code.compare_imm(&temp, 10)?;
    code.breq(rounds_10)?;
    code.compare_imm(&temp, 12)?;
    code.breq(rounds_12)?;

    for round in 0..13 {
        if round == 2 {
            code.label(rounds_12)?;
        }
        if round == 4 {
            code.label(rounds_10)?;
        }
        code.call(subroutine)?;
    }
    sub_bytes_shift_rows(code, &state, &temp)?;
    apply_round_key(code, &state, &ptr)?;
    code.jmp(end)?;

    code.label(subroutine)?;
    sub_bytes_shift_rows(code, &state, &temp)?;
    for col in 0..4 {
        mix_column(code, &state, col, &temp)?;
    }
    apply_round_key(code, &state, &ptr)?;
    code.ret()?;

    code.label(end)?;
    code.sbox_cleanup();
    code.release(&mut ptr);
    let out = code.load_output_ptr(&output)?;
    code.st(&state, &out, 0)?;
    Ok(())
}

fn gen_aes_128_init(code: &mut CodeGenerator) -> CodegenResult<()> {
    gen_setup_key(code, "aes_128_init", 16)
}

fn gen_aes_192_init(code: &mut CodeGenerator) -> CodegenResult<()> {
    gen_setup_key(code, "aes_192_init", 24)
}

fn gen_aes_256_init(code: &mut CodeGenerator) -> CodegenResult<()> {
    gen_setup_key(code, "aes_256_init", 32)
}

fn schedule_size(key_bytes: usize) -> usize {
    match key_bytes {
        16 => 180,
        24 => 212,
        _ => 244,
    }
}

fn test_setup_key(code: &CodeGenerator, vec: &TestVector, key_bytes: usize) -> CodegenResult<bool> {
    let mut key = vec![0u8; key_bytes];
    if !vec.populate(&mut key, "Key") {
        return Ok(false);
    }
    let mut schedule = vec![0u8; schedule_size(key_bytes)];
    Interpreter::new(code).exec_setup_key(&mut schedule, &key)?;
    Ok(vec.check(&schedule, "Schedule_Bytes"))
}

fn test_aes_128_init(code: &CodeGenerator, vec: &TestVector) -> CodegenResult<bool> {
    test_setup_key(code, vec, 16)
}

fn test_aes_192_init(code: &CodeGenerator, vec: &TestVector) -> CodegenResult<bool> {
    test_setup_key(code, vec, 24)
}

fn test_aes_256_init(code: &CodeGenerator, vec: &TestVector) -> CodegenResult<bool> {
    test_setup_key(code, vec, 32)
}

fn test_aes_ecb_encrypt(code: &CodeGenerator, vec: &TestVector) -> CodegenResult<bool> {
    let schedule = vec.value_as_binary("Schedule_Bytes");
    let mut plaintext = [0u8; 16];
    if schedule.is_empty() || !vec.populate(&mut plaintext, "Plaintext") {
        return Ok(false);
    }
    let mut ciphertext = [0u8; 16];
    Interpreter::new(code).exec_encrypt_block(&schedule, &mut ciphertext, &plaintext)?;
    Ok(vec.check(&ciphertext, "Ciphertext"))
}

pub(crate) fn register(registry: &mut Registry) {
    registry.register(
        "aes_128_init",
        None,
        "avr5",
        gen_aes_128_init,
        Some(test_aes_128_init),
    );
    registry.register(
        "aes_192_init",
        None,
        "avr5",
        gen_aes_192_init,
        Some(test_aes_192_init),
    );
    registry.register(
        "aes_256_init",
        None,
        "avr5",
        gen_aes_256_init,
        Some(test_aes_256_init),
    );
    registry.register(
        "aes_ecb_encrypt",
        None,
        "avr5",
        gen_aes_ecb_encrypt,
        Some(test_aes_ecb_encrypt),
    );
}
