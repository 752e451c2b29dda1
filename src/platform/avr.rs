//! The avr5-style 8-bit platform record.
//!
//! This is the constrained end of the platform spectrum: an 8-bit
//! accumulator file with two-address ALU forms, a split register class
//! where only r16..r25 accept immediates, three 16-bit pointer registers
//! (X, Y, Z) for all addressing, rotations synthesised from single-bit
//! shifts, and S-box lookups through the Z pointer with 256-aligned
//! tables. r0 is a reserved scratch byte and r1 a fixed zero, both
//! grantable to the allocator through generator feature flags; Y is
//! reserved for the frame unless granted the same way.

use crate::codegen::{CodeGenerator, GenFlag};
use crate::emit::EmitState;
use crate::error::{CodegenError, CodegenResult};
use crate::insn::{ImmValue, Insn, InsnBuffer, InsnOption, Modifier, Opcode};
use crate::platform::{Features, Platform, PlatformOps};
use crate::regs::{BasicRegister, RegFlags, RegisterSize, SizedRegister};

/// Register numbers for the pointer registers and stack pointer. The
/// byte registers r0..r25 use their own numbers.
pub const REG_X: u8 = 26;
pub const REG_Y: u8 = 27;
pub const REG_Z: u8 = 28;
pub const REG_SP: u8 = 29;

struct AvrOps;

fn is_pointer(reg: &SizedRegister) -> bool {
    matches!(reg.number(), REG_X | REG_Y | REG_Z)
}

fn is_immediate_capable(reg: &SizedRegister) -> bool {
    reg.reg().has_flag(RegFlags::IMMEDIATE)
}

impl PlatformOps for AvrOps {
    fn native_word_size(&self) -> RegisterSize {
        RegisterSize::Bits8
    }

    fn address_word_size(&self) -> RegisterSize {
        RegisterSize::Bits16
    }

    fn max_frame_size(&self) -> usize {
        // One sbiw on the frame pointer pair.
        63
    }

    fn validate_immediate(&self, op: Opcode, value: ImmValue, _size: RegisterSize) -> bool {
        match op {
            // subi/sbci/andi/ori/cpi/ldi take a full byte; add/adc fold
            // into the subtract-of-negation forms.
            Opcode::Addi
            | Opcode::Adci
            | Opcode::Subi
            | Opcode::Sbci
            | Opcode::Andi
            | Opcode::Ori
            | Opcode::Cmpi
            | Opcode::Movi => value <= 0xFF,
            // Single-bit shift instructions are repeated up to the width.
            Opcode::Asri | Opcode::Lsli | Opcode::Lsri => value < 8,
            // ldd/std displacements.
            Opcode::Ld8 | Opcode::St8 | Opcode::Ld16 | Opcode::St16 => value <= 63,
            _ => false,
        }
    }

    fn unary(
        &self,
        _platform: &Platform,
        buf: &mut InsnBuffer,
        op: Opcode,
        dest: &SizedRegister,
        src: &SizedRegister,
    ) -> CodegenResult<()> {
        if dest != src {
            return Err(CodegenError::InvalidInstruction(format!(
                "unary {:?} must be in place on avr5",
                op
            )));
        }
        buf.push(Insn::unary(op, dest.clone(), src.clone()));
        Ok(())
    }

    fn binary(
        &self,
        _platform: &Platform,
        buf: &mut InsnBuffer,
        op: Opcode,
        dest: &SizedRegister,
        src1: &SizedRegister,
        src2: &SizedRegister,
        setc: bool,
    ) -> CodegenResult<()> {
        if dest != src1 && !matches!(op, Opcode::Cmp | Opcode::Cmpc | Opcode::Mov) {
            return Err(CodegenError::InvalidInstruction(format!(
                "binary {:?} must be two-address on avr5",
                op
            )));
        }
        let insn = Insn::binary(op, dest.clone(), src1.clone(), src2.clone());
        buf.push(if setc {
            insn.with_option(InsnOption::SetCarry)
        } else {
            insn
        });
        Ok(())
    }

    fn binary_shifted(
        &self,
        _platform: &Platform,
        _buf: &mut InsnBuffer,
        op: Opcode,
        _dest: &SizedRegister,
        _src1: &SizedRegister,
        _src2: &SizedRegister,
        _modifier: Modifier,
        _shift: u8,
        _setc: bool,
    ) -> CodegenResult<()> {
        Err(CodegenError::InvalidInstruction(format!(
            "avr5 has no shift-and-operate form for {:?}",
            op
        )))
    }

    fn binary_imm(
        &self,
        _platform: &Platform,
        buf: &mut InsnBuffer,
        op: Opcode,
        dest: &SizedRegister,
        src1: &SizedRegister,
        value: ImmValue,
        setc: bool,
    ) -> CodegenResult<()> {
        if dest != src1 {
            return Err(CodegenError::InvalidInstruction(format!(
                "immediate {:?} must be two-address on avr5",
                op
            )));
        }
        let legal = if is_pointer(dest) || dest.number() == REG_SP {
            // adiw/sbiw on the pointer pairs.
            matches!(op, Opcode::Addi | Opcode::Subi) && value <= 63
        } else if matches!(op, Opcode::Asri | Opcode::Lsli | Opcode::Lsri) {
            value < 8
        } else {
            is_immediate_capable(dest) && self.validate_immediate(op, value, dest.size())
        };
        if !legal {
            return Err(CodegenError::InvalidImmediate { value });
        }
        let insn = Insn::binary_imm(op, dest.clone(), src1.clone(), value);
        buf.push(if setc {
            insn.with_option(InsnOption::SetCarry)
        } else {
            insn
        });
        Ok(())
    }

    fn move_imm(
        &self,
        platform: &Platform,
        buf: &mut InsnBuffer,
        dest: &SizedRegister,
        value: ImmValue,
    ) -> CodegenResult<()> {
        if is_immediate_capable(dest) || is_pointer(dest) {
            buf.push(Insn::move_imm(Opcode::Movi, dest.clone(), value));
            Ok(())
        } else if value == 0 {
            // Every register can be cleared from the fixed zero register.
            let zero = platform
                .register_for_number(1)
                .ok_or_else(|| CodegenError::InvalidRegister("no zero register".into()))?;
            let zero = SizedRegister::new(zero, RegisterSize::Bits8)?;
            buf.push(Insn::unary(Opcode::Mov, dest.clone(), zero));
            Ok(())
        } else {
            Err(CodegenError::InvalidImmediate { value })
        }
    }

    fn scratch_for(&self, flag: GenFlag) -> Option<u8> {
        match flag {
            GenFlag::TempR0 => Some(0),
            GenFlag::TempR1 => Some(1),
            GenFlag::TempY => Some(REG_Y),
            GenFlag::TempZ => Some(REG_Z),
        }
    }

    fn sbox_pointer(&self) -> Option<u8> {
        Some(REG_Z)
    }

    /// Tables live in program memory, reachable through lpm.
    fn write_table(&self, out: &mut String, code: &CodeGenerator, index: usize, data: &[u8]) {
        use std::fmt::Write;
        let _ = writeln!(out, "\t.section\t.progmem.data,\"a\",@progbits");
        crate::emit::write_table_bytes(
            out,
            &format!(".L{}_sbox{}", code.name(), index),
            data,
        );
        let _ = writeln!(out, "\t.text");
    }

    fn write_insn(
        &self,
        out: &mut String,
        state: &mut EmitState,
        code: &CodeGenerator,
        insn: &Insn,
    ) -> CodegenResult<()> {
        write_avr_insn(out, state, code, insn)
    }
}

/// The low/high byte-register names of a 16-bit pointer register.
fn pair_names(reg: &SizedRegister) -> Option<(&'static str, &'static str)> {
    match reg.number() {
        REG_X => Some(("r26", "r27")),
        REG_Y => Some(("r28", "r29")),
        REG_Z => Some(("r30", "r31")),
        _ => None,
    }
}

fn two_op_mnemonic(op: Opcode) -> Option<&'static str> {
    Some(match op {
        Opcode::Add => "add",
        Opcode::Adc => "adc",
        Opcode::Sub => "sub",
        Opcode::Sbc => "sbc",
        Opcode::And => "and",
        Opcode::Or => "or",
        Opcode::Xor => "eor",
        Opcode::Mov => "mov",
        Opcode::Cmp => "cp",
        Opcode::Cmpc => "cpc",
        _ => return None,
    })
}

fn imm_mnemonic(op: Opcode) -> Option<&'static str> {
    Some(match op {
        Opcode::Subi => "subi",
        Opcode::Sbci => "sbci",
        Opcode::Andi => "andi",
        Opcode::Ori => "ori",
        Opcode::Cmpi => "cpi",
        Opcode::Movi => "ldi",
        _ => return None,
    })
}

/// Inverse condition for the branch-skip pattern; conditional branches
/// only reach about 64 words, so every conditional branch is emitted as
/// a skip over an rjmp.
fn inverse_condition(op: Opcode) -> Option<&'static str> {
    Some(match op {
        Opcode::Breq => "brne",
        Opcode::Brne => "breq",
        Opcode::Brltu => "brcc",
        Opcode::Brgeu => "brcs",
        Opcode::Brlts => "brge",
        Opcode::Brges => "brlt",
        _ => return None,
    })
}

fn write_avr_insn(
    out: &mut String,
    _state: &mut EmitState,
    code: &CodeGenerator,
    insn: &Insn,
) -> CodegenResult<()> {
    use std::fmt::Write;

    let lbl = |l: u16| format!(".L{}_{}", code.name(), l);

    let unsupported =
        |insn: &Insn| CodegenError::InvalidInstruction(format!("cannot emit {:?} on avr5", insn.op()));
    let dest = insn.dest();
    let src1 = insn.src1();
    let src2 = insn.src2();

    macro_rules! name {
        ($reg:expr) => {
            $reg.ok_or_else(|| unsupported(insn))?.name()
        };
    }

    match insn.op() {
        Opcode::Unknown | Opcode::Nop => {
            let _ = writeln!(out, "\tnop");
        }
        Opcode::Label => {
            let _ = writeln!(out, "{}:", lbl(insn.label().unwrap_or(0)));
        }
        Opcode::Jmp => {
            let _ = writeln!(out, "\trjmp\t{}", lbl(insn.label().unwrap_or(0)));
        }
        Opcode::Call => {
            let _ = writeln!(out, "\trcall\t{}", lbl(insn.label().unwrap_or(0)));
        }
        Opcode::Ret => {
            let _ = writeln!(out, "\tret");
        }
        op if inverse_condition(op).is_some() => {
            let _ = writeln!(out, "\t{}\t1f", inverse_condition(op).unwrap());
            let _ = writeln!(out, "\trjmp\t{}", lbl(insn.label().unwrap_or(0)));
            let _ = writeln!(out, "1:");
        }
        Opcode::Mov => {
            let d = dest.ok_or_else(|| unsupported(insn))?;
            let s = src2.or(src1).ok_or_else(|| unsupported(insn))?;
            if let (Some((dlo, _)), Some((slo, _))) = (pair_names(d), pair_names(s)) {
                let _ = writeln!(out, "\tmovw\t{}, {}", dlo, slo);
            } else {
                let _ = writeln!(out, "\tmov\t{}, {}", d.name(), s.name());
            }
        }
        op if two_op_mnemonic(op).is_some() => {
            let mn = two_op_mnemonic(op).unwrap();
            let lhs = if matches!(op, Opcode::Cmp | Opcode::Cmpc) {
                src1
            } else {
                dest
            };
            let _ = writeln!(out, "\t{}\t{}, {}", mn, name!(lhs), name!(src2));
        }
        Opcode::Not => {
            let _ = writeln!(out, "\tcom\t{}", name!(dest));
        }
        Opcode::Neg => {
            let _ = writeln!(out, "\tneg\t{}", name!(dest));
        }
        Opcode::Lsli => {
            for _ in 0..insn.imm().unwrap_or(0) {
                let _ = writeln!(out, "\tlsl\t{}", name!(dest));
            }
        }
        Opcode::Lsri => {
            for _ in 0..insn.imm().unwrap_or(0) {
                let _ = writeln!(out, "\tlsr\t{}", name!(dest));
            }
        }
        Opcode::Asri => {
            for _ in 0..insn.imm().unwrap_or(0) {
                let _ = writeln!(out, "\tasr\t{}", name!(dest));
            }
        }
        Opcode::Movi => {
            let d = dest.ok_or_else(|| unsupported(insn))?;
            let value = insn.imm().unwrap_or(0);
            if let Some((lo, hi)) = pair_names(d) {
                let _ = writeln!(out, "\tldi\t{}, {}", lo, value & 0xFF);
                let _ = writeln!(out, "\tldi\t{}, {}", hi, (value >> 8) & 0xFF);
            } else {
                let _ = writeln!(out, "\tldi\t{}, {}", d.name(), value & 0xFF);
            }
        }
        Opcode::Addi | Opcode::Adci | Opcode::Subi | Opcode::Sbci
        | Opcode::Andi | Opcode::Ori | Opcode::Cmpi => {
            let d = if insn.op() == Opcode::Cmpi { src1 } else { dest };
            let d = d.ok_or_else(|| unsupported(insn))?;
            let value = insn.imm().unwrap_or(0) & 0xFF;
            if d.number() == REG_SP {
                // Frame adjustments copy the stack pointer through Y.
                let mn = if insn.op() == Opcode::Addi { "adiw" } else { "sbiw" };
                let _ = writeln!(out, "\tin\tr28, 0x3d");
                let _ = writeln!(out, "\tin\tr29, 0x3e");
                let _ = writeln!(out, "\t{}\tr28, {}", mn, value);
                let _ = writeln!(out, "\tout\t0x3e, r29");
                let _ = writeln!(out, "\tout\t0x3d, r28");
            } else if let Some((lo, _)) = pair_names(d) {
                let mn = if insn.op() == Opcode::Addi { "adiw" } else { "sbiw" };
                let _ = writeln!(out, "\t{}\t{}, {}", mn, lo, value);
            } else {
                match insn.op() {
                    // add/adc immediates fold into subtraction of the
                    // two's complement.
                    Opcode::Addi => {
                        let _ = writeln!(out, "\tsubi\t{}, {}", d.name(), (256 - value) & 0xFF);
                    }
                    Opcode::Adci => {
                        let _ = writeln!(out, "\tsbci\t{}, {}", d.name(), (255 - value) & 0xFF);
                    }
                    op => {
                        let mn = imm_mnemonic(op).ok_or_else(|| unsupported(insn))?;
                        let _ = writeln!(out, "\t{}\t{}, {}", mn, d.name(), value);
                    }
                }
            }
        }
        Opcode::Ld8 | Opcode::St8 | Opcode::Ld16 | Opcode::St16 => {
            let is_load = matches!(insn.op(), Opcode::Ld8 | Opcode::Ld16);
            let wide = matches!(insn.op(), Opcode::Ld16 | Opcode::St16);
            let d = dest.ok_or_else(|| unsupported(insn))?;
            let base = src1.ok_or_else(|| unsupported(insn))?;
            let offset = insn.imm().unwrap_or(0);
            let base_name = if base.number() == REG_SP {
                "Y"
            } else if base.number() == REG_X {
                "X"
            } else if base.number() == REG_Y {
                "Y"
            } else if base.number() == REG_Z {
                "Z"
            } else {
                return Err(unsupported(insn));
            };
            let targets: Vec<String> = if wide {
                match pair_names(d) {
                    Some((lo, hi)) => vec![lo.to_string(), hi.to_string()],
                    None => return Err(unsupported(insn)),
                }
            } else {
                vec![d.name().to_string()]
            };
            let x_adjust = base_name == "X" && offset != 0;
            if x_adjust {
                let _ = writeln!(out, "\tadiw\tr26, {}", offset);
            }
            for (i, target) in targets.iter().enumerate() {
                let q = if x_adjust { i as u64 } else { offset + i as u64 };
                if base_name == "X" {
                    // X has no displacement mode.
                    if i > 0 {
                        let _ = writeln!(out, "\tadiw\tr26, 1");
                    }
                    if is_load {
                        let _ = writeln!(out, "\tld\t{}, X", target);
                    } else {
                        let _ = writeln!(out, "\tst\tX, {}", target);
                    }
                } else if q == 0 {
                    if is_load {
                        let _ = writeln!(out, "\tld\t{}, {}", target, base_name);
                    } else {
                        let _ = writeln!(out, "\tst\t{}, {}", base_name, target);
                    }
                } else if is_load {
                    let _ = writeln!(out, "\tldd\t{}, {}+{}", target, base_name, q);
                } else {
                    let _ = writeln!(out, "\tstd\t{}+{}, {}", base_name, q, target);
                }
            }
            if x_adjust {
                let extra = (targets.len() - 1) as u64;
                let _ = writeln!(out, "\tsbiw\tr26, {}", offset + extra);
            } else if base_name == "X" && targets.len() > 1 {
                let _ = writeln!(out, "\tsbiw\tr26, {}", targets.len() as u64 - 1);
            }
        }
        Opcode::Push => {
            let d = dest.ok_or_else(|| unsupported(insn))?;
            if let Some((lo, hi)) = pair_names(d) {
                let _ = writeln!(out, "\tpush\t{}", lo);
                let _ = writeln!(out, "\tpush\t{}", hi);
            } else {
                let _ = writeln!(out, "\tpush\t{}", d.name());
            }
        }
        Opcode::Pop => {
            let d = dest.ok_or_else(|| unsupported(insn))?;
            if let Some((lo, hi)) = pair_names(d) {
                let _ = writeln!(out, "\tpop\t{}", hi);
                let _ = writeln!(out, "\tpop\t{}", lo);
            } else {
                let _ = writeln!(out, "\tpop\t{}", d.name());
            }
        }
        Opcode::SboxSetup => {
            let index = insn.imm().unwrap_or(0);
            let _ = writeln!(out, "\tldi\tr30, lo8(.L{}_sbox{})", code.name(), index);
            let _ = writeln!(out, "\tldi\tr31, hi8(.L{}_sbox{})", code.name(), index);
        }
        Opcode::SboxLookup => {
            // Tables are 256-aligned so only the low byte of Z moves.
            let _ = writeln!(out, "\tmov\tr30, {}", name!(src2));
            let _ = writeln!(out, "\tlpm\t{}, Z", name!(dest));
        }
        Opcode::Print | Opcode::Printch | Opcode::Println => {
            let _ = writeln!(out, "\t; debug print");
        }
        _ => return Err(unsupported(insn)),
    }
    Ok(())
}

/// Builds the avr5 platform record.
pub fn avr5() -> Platform {
    let features = Features::TWO_ADDRESS
        | Features::SPLIT_REGISTERS
        | Features::REGISTER_POOR
        | Features::SHIFT_TO_ROTATE;
    let sp = BasicRegister::reg16(
        REG_SP,
        "sp",
        RegFlags::ADDRESS | RegFlags::STACK_POINTER | RegFlags::NO_ALLOCATE,
    );
    let mut plat = Platform::new("avr5", features, sp.clone(), Box::new(AvrOps));

    let data = RegFlags::DATA | RegFlags::TWO_ADDRESS;
    let save = RegFlags::CALLEE_SAVED;
    let imm = RegFlags::IMMEDIATE;

    plat.add_basic_register(BasicRegister::reg8(
        0,
        "r0",
        RegFlags::DATA | RegFlags::TEMPORARY | RegFlags::NO_ALLOCATE,
    ));
    plat.add_basic_register(BasicRegister::reg8(
        1,
        "r1",
        RegFlags::DATA | RegFlags::ZERO | RegFlags::NO_ALLOCATE,
    ));
    // Callee-saved low registers allocate first, keeping the caller-saved
    // immediate-capable registers free for constants.
    for n in 2..=15u8 {
        plat.add_basic_register(BasicRegister::reg8(n, &format!("r{}", n), data | save));
    }
    plat.add_basic_register(BasicRegister::reg8(16, "r16", data | save | imm));
    plat.add_basic_register(BasicRegister::reg8(17, "r17", data | save | imm));
    for n in 18..=25u8 {
        plat.add_basic_register(BasicRegister::reg8(n, &format!("r{}", n), data | imm));
    }
    plat.add_basic_register(BasicRegister::reg16(REG_X, "X", RegFlags::ADDRESS));
    plat.add_basic_register(BasicRegister::reg16(
        REG_Y,
        "Y",
        RegFlags::ADDRESS | save | RegFlags::NO_ALLOCATE,
    ));
    plat.add_basic_register(BasicRegister::reg16(REG_Z, "Z", RegFlags::ADDRESS));
    plat.add_basic_register(sp);

    // Pointer arguments arrive in Z then X; data arguments in the
    // caller-saved byte registers, ABI pairs first.
    plat.add_argument_register(REG_Z);
    plat.add_argument_register(REG_X);
    for n in [24u8, 25, 22, 23, 20, 21, 18, 19] {
        plat.add_argument_register(n);
    }
    plat
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::platform_for_tag;

    #[test]
    fn test_avr5_shape() {
        let plat = platform_for_tag("avr5").unwrap();
        assert_eq!(plat.native_word_size(), RegisterSize::Bits8);
        assert_eq!(plat.address_word_size(), RegisterSize::Bits16);
        assert!(plat.has_feature(Features::TWO_ADDRESS));
        assert!(plat.has_feature(Features::SHIFT_TO_ROTATE));
        assert!(!plat.has_feature(Features::THREE_ADDRESS));
        assert_eq!(plat.ops().sbox_pointer(), Some(REG_Z));
    }

    #[test]
    fn test_avr5_immediate_rules() {
        let plat = platform_for_tag("avr5").unwrap();
        assert!(plat.validate_immediate(Opcode::Andi, 0xFF, RegisterSize::Bits8));
        assert!(!plat.validate_immediate(Opcode::Andi, 0x100, RegisterSize::Bits8));
        assert!(!plat.validate_immediate(Opcode::Xori, 1, RegisterSize::Bits8));
        assert!(plat.validate_immediate(Opcode::Ld8, 63, RegisterSize::Bits8));
        assert!(!plat.validate_immediate(Opcode::Ld8, 64, RegisterSize::Bits8));
    }

    #[test]
    fn test_avr5_zero_register_reserved() {
        let plat = platform_for_tag("avr5").unwrap();
        let zero = plat.register_for_number(1).unwrap();
        assert!(zero.has_flag(RegFlags::ZERO));
        assert!(zero.has_flag(RegFlags::NO_ALLOCATE));
    }
}
