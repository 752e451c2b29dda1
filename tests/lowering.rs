//! Lowering invariants and boundary behaviour.
//!
//! These tests pin the observable contracts of the code generator: the
//! allocator masks, the two-address pre-lowering, immediate synthesis,
//! the rotation planner's renumbering and canonicalisation, label
//! validation, deterministic emission, and the masked-share algebra.

use gencrypto::codegen::CodeGenerator;
use gencrypto::emit::emit_function;
use gencrypto::error::CodegenError;
use gencrypto::insn::Opcode;
use gencrypto::interp::Interpreter;
use gencrypto::platform::platform_for_tag;
use gencrypto::registry::Registry;
use gencrypto::regs::RegFlags;

fn avr_body() -> CodeGenerator<'static> {
    let platform = platform_for_tag("avr5").expect("avr5 platform");
    let mut code = CodeGenerator::new(platform);
    code.prologue_permutation("fixture", 0).expect("prologue");
    code
}

fn v7m_body() -> CodeGenerator<'static> {
    let platform = platform_for_tag("armv7m").expect("armv7m platform");
    let mut code = CodeGenerator::new(platform);
    code.prologue_permutation("fixture", 0).expect("prologue");
    code
}

#[test]
fn allocator_never_touches_reserved_registers() {
    let mut code = avr_body();
    // Exhaust the data registers.
    let mut taken = Vec::new();
    while let Ok(reg) = code.allocate_reg(8) {
        taken.push(reg);
    }
    let platform = code.platform();
    for basic in platform.registers() {
        if basic.has_flag(RegFlags::NO_ALLOCATE) {
            assert_eq!(
                code.allocated_mask() & (1 << basic.number()),
                0,
                "reserved register {} was allocated",
                basic.number()
            );
        }
    }
}

#[test]
fn release_restores_allocated_but_not_ever_used() {
    let mut code = avr_body();
    let before_alloc = code.allocated_mask();
    let before_used = code.ever_used_mask();
    let mut reg = code.allocate_reg(24).expect("allocate");
    assert_eq!(reg.num_regs(), 3);
    let during = code.allocated_mask();
    assert_ne!(during, before_alloc);
    code.release(&mut reg);
    assert!(reg.is_null());
    assert_eq!(code.allocated_mask(), before_alloc);
    assert_ne!(code.ever_used_mask(), before_used);
    // Idempotent on the now-empty register.
    code.release(&mut reg);
    assert_eq!(code.allocated_mask(), before_alloc);
}

#[test]
fn allocation_is_deterministic() {
    let collect = || {
        let mut code = avr_body();
        let a = code.allocate_reg(16).expect("a");
        let mut b = code.allocate_reg(8).expect("b");
        code.release(&mut b);
        let c = code.allocate_reg(8).expect("c");
        (
            (0..a.num_regs()).map(|i| a.number(i)).collect::<Vec<_>>(),
            c.number(0),
        )
    };
    assert_eq!(collect(), collect());
}

#[test]
fn reversed_and_subset_round_trips() {
    let mut code = v7m_body();
    let reg = code.allocate_reg(96).expect("allocate");
    let rev = reg.reversed().expect("reversed");
    assert_eq!(rev.reversed().expect("reversed twice"), reg);
    let sub = reg.subset(0, reg.size()).expect("subset");
    assert_eq!(sub, reg);
}

#[test]
fn odd_width_allocation_reserves_whole_limbs() {
    let mut code = v7m_body();
    let reg = code.allocate_reg(40).expect("allocate");
    assert_eq!(reg.num_regs(), 2);
    assert_eq!(reg.size(), 40);
    assert_eq!(reg.full_size(), 64);
    assert!(!reg.zero_fill());
}

#[test]
fn two_address_binary_gets_pre_lowered() {
    let mut code = avr_body();
    let dst = code.allocate_reg(8).expect("dst");
    let a = code.allocate_reg(8).expect("a");
    let b = code.allocate_reg(8).expect("b");
    let before = code.insns().len();
    code.logxor_into(&dst, &a, &b).expect("xor");
    let insns = &code.insns().insns()[before..];
    assert_eq!(insns.len(), 2);
    assert_eq!(insns[0].op(), Opcode::Mov);
    assert_eq!(insns[1].op(), Opcode::Xor);
    assert_eq!(insns[1].dest().map(|r| r.number()), insns[1].src1().map(|r| r.number()));
}

#[test]
fn rejected_immediates_are_synthesised() {
    // avr5 has no exclusive-or immediate at all.
    let mut code = avr_body();
    let dst = code.allocate_reg(8).expect("dst");
    code.logxor_imm(&dst, 0x5A).expect("xor imm");
    let has_xori = code.insns().insns().iter().any(|i| i.op() == Opcode::Xori);
    let has_movi = code.insns().insns().iter().any(|i| i.op() == Opcode::Movi);
    assert!(!has_xori, "an illegal literal reached the buffer");
    assert!(has_movi, "the constant was not synthesised");
}

#[test]
fn no_illegal_literal_in_any_registered_function() {
    let registry = Registry::global();
    for entry in registry.entries() {
        let code = entry.build().expect("build");
        let platform = code.platform();
        for insn in code.insns().insns() {
            let checkable = matches!(
                insn.op(),
                Opcode::Addi
                    | Opcode::Adci
                    | Opcode::Subi
                    | Opcode::Sbci
                    | Opcode::Andi
                    | Opcode::Ori
                    | Opcode::Xori
                    | Opcode::Bici
                    | Opcode::Cmpi
                    | Opcode::Cmpni
                    | Opcode::Subri
                    | Opcode::Asri
                    | Opcode::Lsli
                    | Opcode::Lsri
                    | Opcode::Roli
                    | Opcode::Rori
                    | Opcode::Ld8
                    | Opcode::Ld8S
                    | Opcode::Ld16
                    | Opcode::Ld16S
                    | Opcode::Ld32
                    | Opcode::Ld32S
                    | Opcode::Ld64
                    | Opcode::St8
                    | Opcode::St16
                    | Opcode::St32
                    | Opcode::St64
            );
            if !checkable {
                continue;
            }
            let value = match insn.imm() {
                Some(value) => value,
                None => continue,
            };
            if value == 0
                && matches!(
                    insn.op(),
                    Opcode::Ld8
                        | Opcode::Ld8S
                        | Opcode::Ld16
                        | Opcode::Ld16S
                        | Opcode::Ld32
                        | Opcode::Ld32S
                        | Opcode::Ld64
                        | Opcode::St8
                        | Opcode::St16
                        | Opcode::St32
                        | Opcode::St64
                )
            {
                // A zero displacement always has a register-only form.
                continue;
            }
            let size = insn
                .dest()
                .map(|r| r.size())
                .unwrap_or(platform.native_word_size());
            assert!(
                platform.validate_immediate(insn.op(), value, size),
                "{}: {:?} carries illegal literal {:#x}",
                entry.qualified_name(),
                insn.op(),
                value
            );
        }
    }
}

#[test]
fn every_branch_label_defined_exactly_once() {
    let registry = Registry::global();
    for entry in registry.entries() {
        let code = entry.build().expect("build");
        for insn in code.insns().insns() {
            if insn.op().uses_label() {
                let label = insn.label().expect("label field");
                let count = code
                    .insns()
                    .insns()
                    .iter()
                    .filter(|i| i.op() == Opcode::Label && i.label() == Some(label))
                    .count();
                assert_eq!(count, 1, "{}: label {}", entry.qualified_name(), label);
            }
        }
    }
}

#[test]
fn every_operand_size_is_supported() {
    let registry = Registry::global();
    for entry in registry.entries() {
        let code = entry.build().expect("build");
        for insn in code.insns().insns() {
            for reg in [insn.dest(), insn.src1(), insn.src2()].into_iter().flatten() {
                assert!(
                    reg.reg().has_size(reg.size()),
                    "{}: {} does not support {} bits",
                    entry.qualified_name(),
                    reg.reg().address_name(),
                    reg.size().bits()
                );
            }
        }
    }
}

#[test]
fn unresolved_label_fails_finalise() {
    let mut code = v7m_body();
    let label = code.new_label();
    code.jmp(label).expect("jmp");
    match code.finalise() {
        Err(CodegenError::UnresolvedLabel(l)) => assert_eq!(l, label),
        other => panic!("expected an unresolved label error, got {:?}", other),
    }
}

#[test]
fn finalised_generator_rejects_further_work() {
    let mut code = v7m_body();
    code.finalise().expect("finalise");
    assert!(matches!(code.allocate_reg(32), Err(CodegenError::Finalised)));
    assert!(matches!(code.ret(), Err(CodegenError::Finalised)));
}

#[test]
fn rotation_by_zero_emits_nothing() {
    let mut code = avr_body();
    let mut reg = code.allocate_reg(32).expect("allocate");
    let before = code.insns().len();
    code.ror(&mut reg, 0).expect("ror 0");
    code.rol(&mut reg, 32).expect("rol full");
    assert_eq!(code.insns().len(), before);
}

#[test]
fn rotation_by_limb_multiple_only_renumbers() {
    let mut code = avr_body();
    let mut reg = code.allocate_reg(32).expect("allocate");
    let numbers: Vec<u8> = (0..4).map(|i| reg.number(i)).collect();
    let before = code.insns().len();
    code.ror(&mut reg, 8).expect("ror 8");
    assert_eq!(code.insns().len(), before, "a byte rotation emitted code");
    let rotated: Vec<u8> = (0..4).map(|i| reg.number(i)).collect();
    assert_eq!(rotated, vec![numbers[1], numbers[2], numbers[3], numbers[0]]);
}

#[test]
fn rotation_canonicalises_to_the_short_direction() {
    // Rotate right by 7 becomes rotate left by 1 with a one-limb
    // renumber, observable as the limb order after the call.
    let mut code = avr_body();
    let mut reg = code.allocate_reg(32).expect("allocate");
    let numbers: Vec<u8> = (0..4).map(|i| reg.number(i)).collect();
    code.ror(&mut reg, 7).expect("ror 7");
    let rotated: Vec<u8> = (0..4).map(|i| reg.number(i)).collect();
    assert_eq!(
        rotated,
        vec![numbers[1], numbers[2], numbers[3], numbers[0]],
        "the equivalent left rotation was not chosen"
    );
    // And the sub-limb shifts stay a single bit wide on the left side.
    let lefts = code
        .insns()
        .insns()
        .iter()
        .filter(|i| i.op() == Opcode::Lsli && i.imm() == Some(1))
        .count();
    assert_eq!(lefts, 4);
}

#[test]
fn emission_is_deterministic() {
    let registry = Registry::global();
    let entry = registry
        .find("xoodoo_permute:armv7m")
        .expect("xoodoo registration");
    let first = emit_function(&entry.build().expect("build")).expect("emit");
    let second = emit_function(&entry.build().expect("build")).expect("emit");
    assert_eq!(first, second);
    assert!(first.contains("xoodoo_permute:"));
    assert!(first.contains(".size\txoodoo_permute"));
}

#[test]
fn masked_bic_xor_preserves_share_semantics() {
    let platform = platform_for_tag("armv7m").expect("armv7m platform");
    let mut code = CodeGenerator::new(platform);
    let bindings = code
        .prologue_masked_permutation("masked_bic_demo", 0)
        .expect("prologue");

    let x = code.allocate_masked(32, 2).expect("x");
    let y = code.allocate_masked(32, 2).expect("y");
    let z = code.allocate_masked(32, 2).expect("z");
    for (i, masked) in [&x, &y, &z].into_iter().enumerate() {
        for share in 0..2 {
            code.ld(masked.share(share), &bindings.state, (i * 8 + share * 4) as u64)
                .expect("load share");
        }
    }
    code.masked_bic_xor(&x, &y, &z).expect("bic xor");
    for share in 0..2 {
        code.st(x.share(share), &bindings.state, (share * 4) as u64)
            .expect("store share");
    }
    code.finalise().expect("finalise");

    // Shares of x, y, z, little-endian words.
    let words: [u32; 6] = [
        0x12345678, 0x9abcdef0, 0x0f0f0f0f, 0x33cc33cc, 0xdeadbeef, 0x01234567,
    ];
    let mut state = Vec::new();
    for word in words {
        state.extend_from_slice(&word.to_le_bytes());
    }
    let mut preserved = [0u8; 4];
    Interpreter::new(&code)
        .exec_masked_permutation(&mut state, &mut preserved, 0)
        .expect("run");

    let x0 = u32::from_le_bytes([state[0], state[1], state[2], state[3]]);
    let x1 = u32::from_le_bytes([state[4], state[5], state[6], state[7]]);
    let unmasked_x = words[0] ^ words[1];
    let unmasked_y = words[2] ^ words[3];
    let unmasked_z = words[4] ^ words[5];
    assert_eq!(x0 ^ x1, unmasked_x ^ (!unmasked_y & unmasked_z));
}
