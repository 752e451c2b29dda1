//! ARM-family platform records.
//!
//! Five variants of the 32-bit load/store family are described: ARMv6,
//! ARMv6-M (Thumb subset), a simulated ARMv6-M used to debug v6m code
//! with the v6 register file, ARMv7-M, and 64-bit ARMv8-A. They differ
//! in their two/three-address forms, their register classes, and above
//! all in their immediate-legality predicates, which are implemented
//! here exactly.

use crate::codegen::CodeGenerator;
use crate::emit::EmitState;
use crate::error::{CodegenError, CodegenResult};
use crate::insn::{ImmValue, Insn, InsnBuffer, InsnOption, Modifier, Opcode};
use crate::platform::{Features, Platform, PlatformOps};
use crate::regs::{BasicRegister, RegFlags, RegisterSize, SizedRegister};

/// Which member of the ARM family a platform record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArmKind {
    V6,
    V6m,
    V6mSimulated,
    V7m,
    V8a,
}

struct ArmOps {
    kind: ArmKind,
}

fn is_low_reg(reg: &SizedRegister) -> bool {
    reg.number() < 8
}

/// Whether a constant can be used as "Operand2" in an ARMv6 instruction:
/// an 8-bit quantity rotated right by a multiple of 2 bits.
fn is_operand2_constant_armv6(value: u32) -> bool {
    let mut value = value;
    if value < 256 {
        return true;
    }
    for _ in (2..=28).step_by(2) {
        value = value.rotate_left(2);
        if value < 256 {
            return true;
        }
    }
    false
}

/// Whether a constant can be used as "Operand2" in an ARMv7-M
/// instruction: the Thumb "modified immediate" forms `00XY00XY`,
/// `XY00XY00`, `XYXYXYXY`, or an 8-bit value with its top bit set,
/// rotated right by a multiple of 4 bits.
fn is_operand2_constant_armv7m(value: u32) -> bool {
    if value < 256 {
        return true;
    }
    if (value & 0x00FF_00FF) == value && (value >> 16) == (value & 0xFF) {
        return true;
    }
    if (value & 0xFF00_FF00) == value && (value >> 16) == (value & 0xFF00) {
        return true;
    }
    if ((value >> 24) & 0xFF) == (value & 0xFF)
        && ((value >> 16) & 0xFF) == (value & 0xFF)
        && ((value >> 8) & 0xFF) == (value & 0xFF)
    {
        return true;
    }
    for shift in (0..=24).step_by(4) {
        let mask = 0xFF00_0000u32 >> shift;
        if (value & mask) != value {
            continue;
        }
        let top = 0x8000_0000u32 >> shift;
        if (value & top) == top {
            return true;
        }
    }
    false
}

/// Whether a constant fits the ARMv8-A move-wide forms: a 16-bit value
/// shifted into place by 0, 16, 32, or 48 bits.
fn is_move_constant_armv8a(value: ImmValue, size: RegisterSize) -> bool {
    if size == RegisterSize::Bits64 {
        (value & 0xFFFF) == value
            || (value & 0xFFFF_0000) == value
            || (value & 0x0000_FFFF_0000_0000) == value
            || (value & 0xFFFF_0000_0000_0000) == value
    } else {
        let val = value as u32;
        (val & 0xFFFF) == val || (val & 0xFFFF_0000) == val
    }
}

/// Whether a constant fits the ARMv8-A bitmask-logical immediate form:
/// a run of `Y > 0` ones followed by `X > 0` zeros where `X + Y` is a
/// power of two, tiled across the word and rotated.
fn is_logical_constant_armv8a(value: ImmValue, size: RegisterSize) -> bool {
    let mut value = value;
    if size == RegisterSize::Bits32 {
        value = (value << 32) | (value as u32 as u64);
    }
    if value == 0 || value == u64::MAX {
        return false;
    }
    // Align the runs: a one in the lowest bit, a zero in the highest.
    while (value & 1) == 0 {
        value = value.rotate_right(1);
    }
    while (value & 0x8000_0000_0000_0000) != 0 {
        value = value.rotate_left(1);
    }
    let mut ones = 1usize;
    while (value & (1u64 << ones)) != 0 {
        ones += 1;
    }
    let mut zeroes = ones;
    while zeroes < 64 && (value & (1u64 << zeroes)) == 0 {
        zeroes += 1;
    }
    let run_size = zeroes;
    if run_size == 64 {
        return true;
    }
    if !matches!(run_size, 2 | 4 | 8 | 16 | 32) {
        return false;
    }
    let run = value & ((1u64 << run_size) - 1);
    for offset in (run_size..64).step_by(run_size) {
        if ((value >> offset) & ((1u64 << run_size) - 1)) != run {
            return false;
        }
    }
    true
}

fn max_shift(size: RegisterSize) -> ImmValue {
    if size == RegisterSize::Bits64 {
        64
    } else {
        32
    }
}

impl ArmOps {
    fn validate_v6(&self, op: Opcode, value: ImmValue, _size: RegisterSize) -> bool {
        match op {
            Opcode::Adci
            | Opcode::Addi
            | Opcode::Andi
            | Opcode::Bici
            | Opcode::Movi
            | Opcode::Movn
            | Opcode::Ori
            | Opcode::Sbci
            | Opcode::Subi
            | Opcode::Subri
            | Opcode::Xori => is_operand2_constant_armv6(value as u32),
            Opcode::Cmpi | Opcode::Cmpni => {
                is_operand2_constant_armv6(value as u32)
                    || is_operand2_constant_armv6((value as u32).wrapping_neg())
            }
            Opcode::Asri | Opcode::Lsli | Opcode::Lsri | Opcode::Roli | Opcode::Rori => value < 32,
            Opcode::Ld8
            | Opcode::Ld8S
            | Opcode::St8
            | Opcode::Ld16
            | Opcode::Ld16S
            | Opcode::St16
            | Opcode::Ld32
            | Opcode::Ld32S
            | Opcode::St32 => {
                let offset = value as i64;
                (-4095..=4095).contains(&offset)
            }
            _ => false,
        }
    }

    fn validate_v6m(&self, op: Opcode, value: ImmValue, _size: RegisterSize) -> bool {
        match op {
            Opcode::Addi | Opcode::Cmpi | Opcode::Movi | Opcode::Subi => value < 256,
            Opcode::Asri | Opcode::Lsli | Opcode::Lsri => value < 32,
            Opcode::Subri => value == 0,
            Opcode::Ld8 | Opcode::St8 => value <= 31,
            Opcode::Ld16 | Opcode::St16 => (value & 2) == 0 && value <= 62,
            Opcode::Ld32 | Opcode::Ld32S | Opcode::St32 => (value & 3) == 0 && value <= 124,
            _ => false,
        }
    }

    fn validate_v7m(&self, op: Opcode, value: ImmValue, _size: RegisterSize) -> bool {
        match op {
            Opcode::Adci
            | Opcode::Addi
            | Opcode::Andi
            | Opcode::Bici
            | Opcode::Movi
            | Opcode::Movn
            | Opcode::Ori
            | Opcode::Sbci
            | Opcode::Subi
            | Opcode::Subri
            | Opcode::Xori => is_operand2_constant_armv7m(value as u32),
            Opcode::Cmpi | Opcode::Cmpni => {
                is_operand2_constant_armv7m(value as u32)
                    || is_operand2_constant_armv7m((value as u32).wrapping_neg())
            }
            Opcode::Asri | Opcode::Lsli | Opcode::Lsri | Opcode::Roli | Opcode::Rori => value < 32,
            Opcode::Movw | Opcode::Movt => value <= 0xFFFF,
            Opcode::Ld8
            | Opcode::Ld8S
            | Opcode::St8
            | Opcode::Ld16
            | Opcode::Ld16S
            | Opcode::St16
            | Opcode::Ld32
            | Opcode::Ld32S
            | Opcode::St32 => {
                let offset = value as i64;
                (-255..=4095).contains(&offset)
            }
            _ => false,
        }
    }

    fn validate_v8a(&self, op: Opcode, value: ImmValue, size: RegisterSize) -> bool {
        match op {
            Opcode::Addi | Opcode::Cmpi | Opcode::Cmpni | Opcode::Subi => {
                // A 12-bit constant shifted by 0 or 12 bit positions.
                (value & 0xFFF) == value || (value & 0x00FF_F000) == value
            }
            Opcode::Andi | Opcode::Ori | Opcode::Xori | Opcode::Bici => {
                is_logical_constant_armv8a(value, size)
            }
            Opcode::Movi => {
                is_move_constant_armv8a(value, size) || is_logical_constant_armv8a(value, size)
            }
            Opcode::Movn => is_move_constant_armv8a(value, size),
            Opcode::Movw | Opcode::Movt => value <= 0xFFFF,
            Opcode::Asri | Opcode::Lsli | Opcode::Lsri | Opcode::Roli | Opcode::Rori => {
                value < max_shift(size)
            }
            Opcode::Fsli | Opcode::Fsri => value < max_shift(size),
            Opcode::Ld8 | Opcode::Ld8S | Opcode::St8 => value <= 4095,
            Opcode::Ld16 | Opcode::Ld16S | Opcode::St16 => (value & 1) == 0 && value <= 8190,
            Opcode::Ld32 | Opcode::Ld32S | Opcode::St32 => (value & 3) == 0 && value <= 16380,
            Opcode::Ld64 | Opcode::St64 => (value & 7) == 0 && value <= 32760,
            _ => false,
        }
    }

    fn move_imm_v6(
        &self,
        buf: &mut InsnBuffer,
        dest: &SizedRegister,
        value: ImmValue,
    ) -> CodegenResult<()> {
        let val = value as u32;
        if is_operand2_constant_armv6(val) {
            buf.push(Insn::move_imm(Opcode::Movi, dest.clone(), val as u64));
        } else if is_operand2_constant_armv6(!val) {
            buf.push(Insn::move_imm(Opcode::Movn, dest.clone(), (!val) as u64));
        } else {
            buf.push(Insn::move_imm(Opcode::Ldi, dest.clone(), val as u64));
        }
        Ok(())
    }

    fn move_imm_v6m(
        &self,
        buf: &mut InsnBuffer,
        dest: &SizedRegister,
        value: ImmValue,
        short_form: bool,
    ) -> CodegenResult<()> {
        let val = value as u32;
        if val < 256 && dest.number() < 8 {
            let insn = Insn::move_imm(Opcode::Movi, dest.clone(), val as u64);
            buf.push(if short_form {
                insn.with_option(InsnOption::Short)
            } else {
                insn
            });
        } else {
            buf.push(Insn::move_imm(Opcode::Ldi, dest.clone(), val as u64));
        }
        Ok(())
    }

    fn move_imm_v7m(
        &self,
        buf: &mut InsnBuffer,
        dest: &SizedRegister,
        value: ImmValue,
    ) -> CodegenResult<()> {
        let val = value as u32;
        if val < 256 && dest.number() < 8 {
            buf.push(
                Insn::move_imm(Opcode::Movi, dest.clone(), val as u64)
                    .with_option(InsnOption::Short),
            );
        } else if is_operand2_constant_armv7m(val) {
            buf.push(Insn::move_imm(Opcode::Movi, dest.clone(), val as u64));
        } else if is_operand2_constant_armv7m(!val) {
            buf.push(Insn::move_imm(Opcode::Movn, dest.clone(), (!val) as u64));
        } else {
            buf.push(Insn::move_imm(Opcode::Movw, dest.clone(), (val & 0xFFFF) as u64));
            if (val & 0xFFFF_0000) != 0 {
                buf.push(Insn::binary_imm(
                    Opcode::Movt,
                    dest.clone(),
                    dest.clone(),
                    ((val >> 16) & 0xFFFF) as u64,
                ));
            }
        }
        Ok(())
    }

    fn move_imm_v8a(
        &self,
        buf: &mut InsnBuffer,
        dest: &SizedRegister,
        value: ImmValue,
    ) -> CodegenResult<()> {
        if dest.size() == RegisterSize::Bits64 {
            // Try each MOVZ shift position, then the MOVN forms, then a
            // bitmask immediate, and finally the literal pool.
            for shift in [0u8, 16, 32, 48] {
                let mask = 0xFFFFu64 << shift;
                if (value & mask) == value {
                    let insn = Insn::move_imm(Opcode::Movw, dest.clone(), value >> shift);
                    buf.push(if shift == 0 {
                        insn
                    } else {
                        insn.with_modifier(Modifier::Lsl, shift)
                    });
                    return Ok(());
                }
            }
            for shift in [0u8, 16, 32, 48] {
                let mask = 0xFFFFu64 << shift;
                if value == !((!value) & mask) {
                    let insn =
                        Insn::move_imm(Opcode::Movn, dest.clone(), ((!value) >> shift) & 0xFFFF);
                    buf.push(if shift == 0 {
                        insn
                    } else {
                        insn.with_modifier(Modifier::Lsl, shift)
                    });
                    return Ok(());
                }
            }
            if is_logical_constant_armv8a(value, dest.size()) {
                buf.push(Insn::move_imm(Opcode::Movi, dest.clone(), value));
            } else {
                buf.push(Insn::move_imm(Opcode::Ldi, dest.clone(), value));
            }
        } else {
            let val = value as u32;
            if (val & 0xFFFF) == val {
                buf.push(Insn::move_imm(Opcode::Movi, dest.clone(), val as u64));
            } else if (val & 0xFFFF_0000) == val {
                buf.push(
                    Insn::move_imm(Opcode::Movi, dest.clone(), (val >> 16) as u64)
                        .with_modifier(Modifier::Lsl, 16),
                );
            } else if val == !((!val) & 0xFFFF) {
                buf.push(Insn::move_imm(Opcode::Movn, dest.clone(), ((!val) & 0xFFFF) as u64));
            } else if val == !((!val) & 0xFFFF_0000) {
                buf.push(
                    Insn::move_imm(Opcode::Movn, dest.clone(), (((!val) >> 16) & 0xFFFF) as u64)
                        .with_modifier(Modifier::Lsl, 16),
                );
            } else if is_logical_constant_armv8a(val as u64, dest.size()) {
                buf.push(Insn::move_imm(Opcode::Movi, dest.clone(), val as u64));
            } else {
                buf.push(Insn::move_imm(Opcode::Movi, dest.clone(), (val & 0xFFFF) as u64));
                buf.push(
                    Insn::binary_imm(
                        Opcode::Movt,
                        dest.clone(),
                        dest.clone(),
                        ((val >> 16) & 0xFFFF) as u64,
                    )
                    .with_modifier(Modifier::Lsl, 16),
                );
            }
        }
        Ok(())
    }
}

impl PlatformOps for ArmOps {
    fn native_word_size(&self) -> RegisterSize {
        match self.kind {
            ArmKind::V8a => RegisterSize::Bits64,
            _ => RegisterSize::Bits32,
        }
    }

    fn max_frame_size(&self) -> usize {
        match self.kind {
            ArmKind::V6m | ArmKind::V6mSimulated => 508,
            _ => 4095,
        }
    }

    fn validate_immediate(&self, op: Opcode, value: ImmValue, size: RegisterSize) -> bool {
        match self.kind {
            ArmKind::V6 => self.validate_v6(op, value, size),
            ArmKind::V6m | ArmKind::V6mSimulated => self.validate_v6m(op, value, size),
            ArmKind::V7m => self.validate_v7m(op, value, size),
            ArmKind::V8a => self.validate_v8a(op, value, size),
        }
    }

    fn unary(
        &self,
        platform: &Platform,
        buf: &mut InsnBuffer,
        op: Opcode,
        dest: &SizedRegister,
        src: &SizedRegister,
    ) -> CodegenResult<()> {
        if platform.has_feature(Features::TWO_ADDRESS) && is_low_reg(dest) && is_low_reg(src) {
            buf.push(Insn::unary(op, dest.clone(), src.clone()).with_option(InsnOption::Short));
            Ok(())
        } else if platform.has_feature(Features::THREE_ADDRESS) {
            buf.push(Insn::unary(op, dest.clone(), src.clone()));
            Ok(())
        } else {
            Err(CodegenError::InvalidInstruction(format!(
                "unary {:?} {} <- {}",
                op,
                dest.name(),
                src.name()
            )))
        }
    }

    fn binary(
        &self,
        platform: &Platform,
        buf: &mut InsnBuffer,
        op: Opcode,
        dest: &SizedRegister,
        src1: &SizedRegister,
        src2: &SizedRegister,
        setc: bool,
    ) -> CodegenResult<()> {
        if platform.has_feature(Features::TWO_ADDRESS)
            && dest == src1
            && is_low_reg(dest)
            && is_low_reg(src2)
        {
            buf.push(
                Insn::binary(op, dest.clone(), src1.clone(), src2.clone())
                    .with_option(InsnOption::Short),
            );
            Ok(())
        } else if platform.has_feature(Features::THREE_ADDRESS) {
            let insn = Insn::binary(op, dest.clone(), src1.clone(), src2.clone());
            buf.push(if setc {
                insn.with_option(InsnOption::SetCarry)
            } else {
                insn
            });
            Ok(())
        } else {
            Err(CodegenError::InvalidInstruction(format!(
                "binary {:?} {} <- {}, {}",
                op,
                dest.name(),
                src1.name(),
                src2.name()
            )))
        }
    }

    fn binary_shifted(
        &self,
        platform: &Platform,
        buf: &mut InsnBuffer,
        op: Opcode,
        dest: &SizedRegister,
        src1: &SizedRegister,
        src2: &SizedRegister,
        modifier: Modifier,
        shift: u8,
        setc: bool,
    ) -> CodegenResult<()> {
        let inert = modifier == Modifier::None || shift == 0;
        if platform.has_feature(Features::TWO_ADDRESS)
            && dest == src1
            && is_low_reg(dest)
            && is_low_reg(src2)
            && inert
        {
            buf.push(
                Insn::binary(op, dest.clone(), src1.clone(), src2.clone())
                    .with_option(InsnOption::Short),
            );
            Ok(())
        } else if platform.has_feature(Features::THREE_ADDRESS) {
            let insn = if inert {
                Insn::binary(op, dest.clone(), src1.clone(), src2.clone())
            } else {
                Insn::binary_shifted(op, dest.clone(), src1.clone(), src2.clone(), modifier, shift)
            };
            buf.push(if setc {
                insn.with_option(InsnOption::SetCarry)
            } else {
                insn
            });
            Ok(())
        } else {
            Err(CodegenError::InvalidInstruction(format!(
                "shifted binary {:?} on {}",
                op,
                platform.name()
            )))
        }
    }

    fn binary_imm(
        &self,
        platform: &Platform,
        buf: &mut InsnBuffer,
        op: Opcode,
        dest: &SizedRegister,
        src1: &SizedRegister,
        value: ImmValue,
        setc: bool,
    ) -> CodegenResult<()> {
        if !self.validate_immediate(op, value, dest.size()) {
            return Err(CodegenError::InvalidImmediate { value });
        }
        if platform.has_feature(Features::TWO_ADDRESS) && dest == src1 && is_low_reg(dest) {
            buf.push(
                Insn::binary_imm(op, dest.clone(), src1.clone(), value)
                    .with_option(InsnOption::Short),
            );
            Ok(())
        } else if platform.has_feature(Features::THREE_ADDRESS) {
            let insn = Insn::binary_imm(op, dest.clone(), src1.clone(), value);
            buf.push(if setc {
                insn.with_option(InsnOption::SetCarry)
            } else {
                insn
            });
            Ok(())
        } else {
            Err(CodegenError::InvalidInstruction(format!(
                "immediate binary {:?} on {}",
                op,
                platform.name()
            )))
        }
    }

    fn move_imm(
        &self,
        _platform: &Platform,
        buf: &mut InsnBuffer,
        dest: &SizedRegister,
        value: ImmValue,
    ) -> CodegenResult<()> {
        match self.kind {
            ArmKind::V6 => self.move_imm_v6(buf, dest, value),
            ArmKind::V6m => self.move_imm_v6m(buf, dest, value, true),
            ArmKind::V6mSimulated => self.move_imm_v6m(buf, dest, value, false),
            ArmKind::V7m => self.move_imm_v7m(buf, dest, value),
            ArmKind::V8a => self.move_imm_v8a(buf, dest, value),
        }
    }

    fn write_insn(
        &self,
        out: &mut String,
        _state: &mut EmitState,
        code: &CodeGenerator,
        insn: &Insn,
    ) -> CodegenResult<()> {
        write_arm_insn(self.kind, out, code, insn)
    }
}

fn modifier_name(modifier: Modifier) -> &'static str {
    match modifier {
        Modifier::None => "",
        Modifier::Asr => "asr",
        Modifier::Lsl => "lsl",
        Modifier::Lsr => "lsr",
        Modifier::Ror => "ror",
    }
}

fn alu_mnemonic(op: Opcode) -> Option<&'static str> {
    Some(match op {
        Opcode::Adc | Opcode::Adci => "adc",
        Opcode::Add | Opcode::Addi => "add",
        Opcode::And | Opcode::Andi => "and",
        Opcode::Asr | Opcode::Asri => "asr",
        Opcode::Bic | Opcode::Bici => "bic",
        Opcode::Lsl | Opcode::Lsli => "lsl",
        Opcode::Lsr | Opcode::Lsri => "lsr",
        Opcode::Or | Opcode::Ori => "orr",
        Opcode::Ror | Opcode::Rori => "ror",
        Opcode::Sbc | Opcode::Sbci => "sbc",
        Opcode::Sub | Opcode::Subi => "sub",
        Opcode::Subr | Opcode::Subri => "rsb",
        Opcode::Xor | Opcode::Xori => "eor",
        Opcode::Movt => "movt",
        _ => return None,
    })
}

fn branch_mnemonic(op: Opcode) -> Option<&'static str> {
    Some(match op {
        Opcode::Breq => "beq",
        Opcode::Brne => "bne",
        Opcode::Brltu => "blo",
        Opcode::Brgeu => "bhs",
        Opcode::Brgtu => "bhi",
        Opcode::Brleu => "bls",
        Opcode::Brlts => "blt",
        Opcode::Brges => "bge",
        Opcode::Brgts => "bgt",
        Opcode::Brles => "ble",
        Opcode::Jmp => "b",
        _ => return None,
    })
}

fn load_store_mnemonic(op: Opcode) -> Option<&'static str> {
    Some(match op {
        Opcode::Ld8 | Opcode::Ld8Array => "ldrb",
        Opcode::Ld8S | Opcode::Ld8SArray => "ldrsb",
        Opcode::Ld16 | Opcode::Ld16Array => "ldrh",
        Opcode::Ld16S | Opcode::Ld16SArray => "ldrsh",
        Opcode::Ld32 | Opcode::Ld32S | Opcode::Ld32Array | Opcode::Ld32SArray => "ldr",
        Opcode::Ld64 | Opcode::Ld64Array => "ldr",
        Opcode::St8 | Opcode::St8Array => "strb",
        Opcode::St16 | Opcode::St16Array => "strh",
        Opcode::St32 | Opcode::St32Array => "str",
        Opcode::St64 | Opcode::St64Array => "str",
        _ => return None,
    })
}

fn write_arm_insn(
    kind: ArmKind,
    out: &mut String,
    code: &CodeGenerator,
    insn: &Insn,
) -> CodegenResult<()> {
    use std::fmt::Write;

    let lbl = |l: u16| format!(".L{}_{}", code.name(), l);

    let unsupported =
        |insn: &Insn| CodegenError::InvalidInstruction(format!("cannot emit {:?}", insn.op()));
    let dest = insn.dest();
    let src1 = insn.src1();
    let src2 = insn.src2();
    // Short encodings are inherently flag-setting.
    let s = if insn.option() != InsnOption::None {
        "s"
    } else {
        ""
    };
    let is_a64 = kind == ArmKind::V8a;

    macro_rules! name {
        ($reg:expr) => {
            $reg.ok_or_else(|| unsupported(insn))?.name()
        };
    }
    macro_rules! addr {
        ($reg:expr) => {
            $reg.ok_or_else(|| unsupported(insn))?.reg().address_name()
        };
    }

    match insn.op() {
        Opcode::Unknown | Opcode::Nop => {
            let _ = writeln!(out, "\tnop");
        }
        Opcode::Label => {
            let _ = writeln!(out, "{}:", lbl(insn.label().unwrap_or(0)));
        }
        Opcode::Call => {
            let _ = writeln!(out, "\tbl\t{}", lbl(insn.label().unwrap_or(0)));
        }
        Opcode::Ret => {
            if is_a64 {
                let _ = writeln!(out, "\tret");
            } else {
                let _ = writeln!(out, "\tbx\tlr");
            }
        }
        op if branch_mnemonic(op).is_some() => {
            let _ = writeln!(
                out,
                "\t{}\t{}",
                branch_mnemonic(op).unwrap(),
                lbl(insn.label().unwrap_or(0))
            );
        }
        Opcode::CmpBreq | Opcode::CmpBrne => {
            let _ = writeln!(out, "\tcmp\t{}, {}", name!(src1), name!(src2));
            let cond = if insn.op() == Opcode::CmpBreq { "beq" } else { "bne" };
            let _ = writeln!(out, "\t{}\t{}", cond, lbl(insn.label().unwrap_or(0)));
        }
        Opcode::CmpiBreq | Opcode::CmpiBrne => {
            let imm = insn.imm().unwrap_or(0);
            let cond = if insn.op() == Opcode::CmpiBreq { "beq" } else { "bne" };
            if is_a64 && imm == 0 {
                let mn = if insn.op() == Opcode::CmpiBreq { "cbz" } else { "cbnz" };
                let _ = writeln!(out, "\t{}\t{}, {}", mn, name!(src1), lbl(insn.label().unwrap_or(0)));
            } else {
                let _ = writeln!(out, "\tcmp\t{}, #{}", name!(src1), imm);
                let _ = writeln!(out, "\t{}\t{}", cond, lbl(insn.label().unwrap_or(0)));
            }
        }
        Opcode::Cmp => {
            let _ = writeln!(out, "\tcmp\t{}, {}", name!(src1), name!(src2));
        }
        Opcode::Cmpc => {
            // Multi-word compare step; the scratch register soaks up the
            // difference so only the flags survive.
            let scratch = if is_a64 { "xzr" } else { "ip" };
            let _ = writeln!(out, "\tsbcs\t{}, {}, {}", scratch, name!(src1), name!(src2));
        }
        Opcode::Cmpi => {
            let _ = writeln!(out, "\tcmp\t{}, #{}", name!(src1), insn.imm().unwrap_or(0));
        }
        Opcode::Cmpni => {
            let _ = writeln!(out, "\tcmn\t{}, #{}", name!(src1), insn.imm().unwrap_or(0));
        }
        Opcode::Mov => {
            let _ = writeln!(out, "\tmov{}\t{}, {}", s, name!(dest), name!(src1));
        }
        Opcode::Movi => {
            if is_a64 {
                let _ = writeln!(out, "\tmov\t{}, #{}", name!(dest), insn.imm().unwrap_or(0));
            } else {
                let _ = writeln!(out, "\tmov{}\t{}, #{}", s, name!(dest), insn.imm().unwrap_or(0));
            }
        }
        Opcode::Movn => {
            let mn = if is_a64 { "movn" } else { "mvn" };
            if insn.shift() != 0 && insn.modifier() == Modifier::Lsl {
                let _ = writeln!(
                    out,
                    "\t{}\t{}, #{}, lsl #{}",
                    mn,
                    name!(dest),
                    insn.imm().unwrap_or(0),
                    insn.shift()
                );
            } else {
                let _ = writeln!(out, "\t{}\t{}, #{}", mn, name!(dest), insn.imm().unwrap_or(0));
            }
        }
        Opcode::Movw => {
            let mn = if is_a64 { "movz" } else { "movw" };
            if insn.shift() != 0 && insn.modifier() == Modifier::Lsl {
                let _ = writeln!(
                    out,
                    "\t{}\t{}, #{}, lsl #{}",
                    mn,
                    name!(dest),
                    insn.imm().unwrap_or(0),
                    insn.shift()
                );
            } else {
                let _ = writeln!(out, "\t{}\t{}, #{}", mn, name!(dest), insn.imm().unwrap_or(0));
            }
        }
        Opcode::Movt => {
            let mn = if is_a64 { "movk" } else { "movt" };
            if is_a64 {
                let shift = if insn.shift() != 0 { insn.shift() } else { 16 };
                let _ = writeln!(
                    out,
                    "\t{}\t{}, #{}, lsl #{}",
                    mn,
                    name!(dest),
                    insn.imm().unwrap_or(0),
                    shift
                );
            } else {
                let _ = writeln!(out, "\t{}\t{}, #{}", mn, name!(dest), insn.imm().unwrap_or(0));
            }
        }
        Opcode::Ldi => {
            let _ = writeln!(out, "\tldr\t{}, ={}", name!(dest), insn.imm().unwrap_or(0));
        }
        Opcode::LdLabel => {
            let _ = writeln!(out, "\tldr\t{}, ={}", name!(dest), lbl(insn.label().unwrap_or(0)));
        }
        Opcode::SboxSetup => {
            let _ = writeln!(
                out,
                "\tldr\t{}, =.L{}_sbox{}",
                addr!(dest),
                code.name(),
                insn.imm().unwrap_or(0)
            );
        }
        Opcode::SboxLookup => {
            let _ = writeln!(
                out,
                "\tldrb\t{}, [{}, {}]",
                name!(dest),
                addr!(src1),
                name!(src2)
            );
        }
        Opcode::Not => {
            let _ = writeln!(out, "\tmvn{}\t{}, {}", s, name!(dest), name!(src1));
        }
        Opcode::Neg => {
            let _ = writeln!(out, "\tneg{}\t{}, {}", s, name!(dest), name!(src1));
        }
        Opcode::Exts => {
            let mn = match src1.map(|r| r.size()) {
                Some(RegisterSize::Bits8) => "sxtb",
                Some(RegisterSize::Bits16) => "sxth",
                _ => "sxtw",
            };
            let _ = writeln!(out, "\t{}\t{}, {}", mn, name!(dest), name!(src1));
        }
        Opcode::Extu => {
            let mn = match src1.map(|r| r.size()) {
                Some(RegisterSize::Bits8) => "uxtb",
                Some(RegisterSize::Bits16) => "uxth",
                _ => "uxtw",
            };
            let _ = writeln!(out, "\t{}\t{}, {}", mn, name!(dest), name!(src1));
        }
        Opcode::Swap => {
            let mn = match dest.map(|r| r.size()) {
                Some(RegisterSize::Bits16) => "rev16",
                _ => "rev",
            };
            let _ = writeln!(out, "\t{}\t{}, {}", mn, name!(dest), name!(src1));
        }
        Opcode::Roli => {
            // No rotate-left form; canonicalise to rotate-right.
            let width = dest.map(|r| r.size().bits()).unwrap_or(32) as u64;
            let n = insn.imm().unwrap_or(0) % width;
            let _ = writeln!(
                out,
                "\tror\t{}, {}, #{}",
                name!(dest),
                name!(src1),
                (width - n) % width
            );
        }
        Opcode::Fsri | Opcode::Fsli => {
            if !is_a64 {
                return Err(unsupported(insn));
            }
            let width = dest.map(|r| r.size().bits()).unwrap_or(64) as u64;
            let n = insn.imm().unwrap_or(0) % width;
            let lsb = if insn.op() == Opcode::Fsri { n } else { (width - n) % width };
            let _ = writeln!(
                out,
                "\textr\t{}, {}, {}, #{}",
                name!(dest),
                name!(src1),
                name!(src2),
                lsb
            );
        }
        Opcode::Push => {
            if is_a64 {
                let _ = writeln!(out, "\tstr\t{}, [sp, #-8]!", name!(dest));
            } else {
                let _ = writeln!(out, "\tpush\t{{{}}}", name!(dest));
            }
        }
        Opcode::Pop => {
            if is_a64 {
                let _ = writeln!(out, "\tldr\t{}, [sp], #8", name!(dest));
            } else {
                let _ = writeln!(out, "\tpop\t{{{}}}", name!(dest));
            }
        }
        op if load_store_mnemonic(op).is_some() => {
            let mn = load_store_mnemonic(op).unwrap();
            let array = matches!(
                op,
                Opcode::Ld8Array
                    | Opcode::Ld8SArray
                    | Opcode::Ld16Array
                    | Opcode::Ld16SArray
                    | Opcode::Ld32Array
                    | Opcode::Ld32SArray
                    | Opcode::Ld64Array
                    | Opcode::St8Array
                    | Opcode::St16Array
                    | Opcode::St32Array
                    | Opcode::St64Array
            );
            if array {
                if insn.shift() != 0 {
                    let _ = writeln!(
                        out,
                        "\t{}\t{}, [{}, {}, lsl #{}]",
                        mn,
                        name!(dest),
                        addr!(src1),
                        name!(src2),
                        insn.shift()
                    );
                } else {
                    let _ = writeln!(
                        out,
                        "\t{}\t{}, [{}, {}]",
                        mn,
                        name!(dest),
                        addr!(src1),
                        name!(src2)
                    );
                }
            } else {
                let offset = insn.imm().unwrap_or(0) as i64;
                if offset == 0 {
                    let _ = writeln!(out, "\t{}\t{}, [{}]", mn, name!(dest), addr!(src1));
                } else {
                    let _ = writeln!(
                        out,
                        "\t{}\t{}, [{}, #{}]",
                        mn,
                        name!(dest),
                        addr!(src1),
                        offset
                    );
                }
            }
        }
        Opcode::Print | Opcode::Printch | Opcode::Println => {
            let _ = writeln!(out, "\t@ debug print");
        }
        Opcode::Ldarg8 | Opcode::Ldarg16 | Opcode::Ldarg32 | Opcode::Ldarg64 => {
            return Err(unsupported(insn));
        }
        Opcode::Rol => return Err(unsupported(insn)),
        op => {
            let mn = alu_mnemonic(op).ok_or_else(|| unsupported(insn))?;
            let has_imm = insn.imm().is_some() && src2.is_none();
            if has_imm {
                let _ = writeln!(
                    out,
                    "\t{}{}\t{}, {}, #{}",
                    mn,
                    s,
                    name!(dest),
                    name!(src1),
                    insn.imm().unwrap_or(0)
                );
            } else if insn.shift() != 0 && insn.modifier() != Modifier::None {
                let _ = writeln!(
                    out,
                    "\t{}{}\t{}, {}, {}, {} #{}",
                    mn,
                    s,
                    name!(dest),
                    name!(src1),
                    name!(src2),
                    modifier_name(insn.modifier()),
                    insn.shift()
                );
            } else {
                let _ = writeln!(
                    out,
                    "\t{}{}\t{}, {}, {}",
                    mn,
                    s,
                    name!(dest),
                    name!(src1),
                    name!(src2)
                );
            }
        }
    }
    Ok(())
}

fn add_arm32_registers(plat: &mut Platform, low: RegFlags, high: RegFlags, save: RegFlags) {
    let temp = RegFlags::TEMPORARY;
    let addr_only = RegFlags::ADDRESS | RegFlags::THREE_ADDRESS;
    // Argument registers r0..r3 go in reverse order so that earlier
    // argument slots are not consumed before they are read.
    plat.add_basic_register(BasicRegister::reg32(3, "r3", low));
    plat.add_basic_register(BasicRegister::reg32(2, "r2", low));
    plat.add_basic_register(BasicRegister::reg32(1, "r1", low));
    plat.add_basic_register(BasicRegister::reg32(0, "r0", low));
    plat.add_basic_register(BasicRegister::reg32(4, "r4", low | save));
    plat.add_basic_register(BasicRegister::reg32(5, "r5", low | save));
    plat.add_basic_register(BasicRegister::reg32(6, "r6", low | save));
    plat.add_basic_register(BasicRegister::reg32(7, "r7", low | save));
    plat.add_basic_register(BasicRegister::reg32(8, "r8", high | save));
    plat.add_basic_register(BasicRegister::reg32(9, "r9", high | save));
    plat.add_basic_register(BasicRegister::reg32(10, "r10", high | save));
    plat.add_basic_register(BasicRegister::reg32(12, "ip", high | temp));
    plat.add_basic_register(BasicRegister::reg32(11, "fp", high | save));
    plat.add_basic_register(BasicRegister::reg32(
        14,
        "lr",
        high | save | RegFlags::LINK,
    ));
    plat.add_basic_register(BasicRegister::reg32(
        13,
        "sp",
        addr_only | RegFlags::STACK_POINTER | RegFlags::NO_ALLOCATE,
    ));
    plat.add_basic_register(BasicRegister::reg32(
        15,
        "pc",
        addr_only | RegFlags::PROGRAM_COUNTER | RegFlags::NO_ALLOCATE,
    ));
    for number in 0..4 {
        plat.add_argument_register(number);
    }
}

fn arm32_sp() -> BasicRegister {
    BasicRegister::reg32(
        13,
        "sp",
        RegFlags::ADDRESS
            | RegFlags::THREE_ADDRESS
            | RegFlags::STACK_POINTER
            | RegFlags::NO_ALLOCATE,
    )
}

/// The classic ARMv6 record: three-address with shift-and-operate.
pub fn armv6() -> Platform {
    let features =
        Features::THREE_ADDRESS | Features::SHIFT_AND_OPERATE | Features::BIT_CLEAR | Features::UNARY_DEST;
    let mut plat = Platform::new("armv6", features, arm32_sp(), Box::new(ArmOps { kind: ArmKind::V6 }));
    let full = RegFlags::THREE_ADDRESS | RegFlags::ADDRESS | RegFlags::DATA | RegFlags::IMMEDIATE;
    add_arm32_registers(&mut plat, full, full, RegFlags::CALLEE_SAVED);
    plat
}

/// The ARMv6-M Thumb subset: two-address only, split register classes.
pub fn armv6m() -> Platform {
    let features = Features::TWO_ADDRESS
        | Features::SPLIT_REGISTERS
        | Features::BIT_CLEAR
        | Features::UNARY_DEST;
    let mut plat = Platform::new("armv6m", features, arm32_sp(), Box::new(ArmOps { kind: ArmKind::V6m }));
    let low = RegFlags::ADDRESS | RegFlags::DATA | RegFlags::TWO_ADDRESS | RegFlags::IMMEDIATE;
    let high = RegFlags::STORAGE;
    add_arm32_registers(&mut plat, low, high, RegFlags::CALLEE_SAVED);
    plat
}

/// ARMv6-M code simulated on a three-address register file, used to
/// debug v6m-shaped code with roomier instructions.
pub fn armv6m_simulated() -> Platform {
    let features = Features::THREE_ADDRESS
        | Features::SPLIT_REGISTERS
        | Features::BIT_CLEAR
        | Features::UNARY_DEST;
    let mut plat = Platform::new(
        "armv6m-sim",
        features,
        arm32_sp(),
        Box::new(ArmOps {
            kind: ArmKind::V6mSimulated,
        }),
    );
    let low = RegFlags::ADDRESS | RegFlags::DATA | RegFlags::THREE_ADDRESS | RegFlags::IMMEDIATE;
    let high = RegFlags::STORAGE | RegFlags::THREE_ADDRESS;
    add_arm32_registers(&mut plat, low, high, RegFlags::CALLEE_SAVED);
    plat
}

/// ARMv7-M: both encodings, shift-and-operate, wide immediates.
pub fn armv7m() -> Platform {
    let features = Features::TWO_ADDRESS
        | Features::THREE_ADDRESS
        | Features::SHIFT_AND_OPERATE
        | Features::BIT_CLEAR
        | Features::UNARY_DEST;
    let mut plat = Platform::new("armv7m", features, arm32_sp(), Box::new(ArmOps { kind: ArmKind::V7m }));
    let thumb = RegFlags::TWO_ADDRESS;
    let full = RegFlags::THREE_ADDRESS | RegFlags::ADDRESS | RegFlags::DATA | RegFlags::IMMEDIATE;
    add_arm32_registers(&mut plat, full | thumb, full, RegFlags::CALLEE_SAVED);
    plat
}

/// 64-bit ARMv8-A with the AAPCS64 register file. The extract
/// instruction doubles as a funnel shift.
pub fn armv8a() -> Platform {
    let features = Features::THREE_ADDRESS
        | Features::SHIFT_AND_OPERATE
        | Features::FUNNEL_SHIFT
        | Features::REGISTER_RICH
        | Features::BIT_CLEAR
        | Features::UNARY_DEST;
    let sp = BasicRegister::reg64(
        31,
        "sp",
        RegFlags::ADDRESS
            | RegFlags::THREE_ADDRESS
            | RegFlags::STACK_POINTER
            | RegFlags::NO_ALLOCATE,
    );
    let mut plat = Platform::new("armv8a", features, sp.clone(), Box::new(ArmOps { kind: ArmKind::V8a }));
    let nosave = RegFlags::THREE_ADDRESS | RegFlags::ADDRESS | RegFlags::DATA | RegFlags::IMMEDIATE;
    let save = nosave | RegFlags::CALLEE_SAVED;
    let noalloc = RegFlags::NO_ALLOCATE;
    // Non-saved, non-argument registers first in the allocation order.
    for n in 9..=15u8 {
        plat.add_basic_register(BasicRegister::reg3264(
            n,
            &format!("w{}", n),
            &format!("x{}", n),
            nosave,
        ));
    }
    // Argument registers x0..x8 in reverse order; x8 is the indirect
    // result register.
    for n in (0..=8u8).rev() {
        plat.add_basic_register(BasicRegister::reg3264(
            n,
            &format!("w{}", n),
            &format!("x{}", n),
            nosave,
        ));
    }
    // x16..x18 are reserved for the platform; there are plenty of other
    // registers so they stay non-allocatable.
    for n in 16..=18u8 {
        plat.add_basic_register(BasicRegister::reg3264(
            n,
            &format!("w{}", n),
            &format!("x{}", n),
            save | noalloc,
        ));
    }
    for n in 19..=28u8 {
        plat.add_basic_register(BasicRegister::reg3264(
            n,
            &format!("w{}", n),
            &format!("x{}", n),
            save,
        ));
    }
    plat.add_basic_register(BasicRegister::reg64(29, "fp", save));
    plat.add_basic_register(BasicRegister::reg64(30, "lr", save | RegFlags::LINK));
    plat.add_basic_register(sp);
    plat.add_basic_register(BasicRegister::reg64(
        32,
        "pc",
        RegFlags::ADDRESS | RegFlags::PROGRAM_COUNTER | RegFlags::NO_ALLOCATE,
    ));
    for n in 0..8 {
        plat.add_argument_register(n);
    }
    plat
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operand2_armv6() {
        assert!(is_operand2_constant_armv6(0));
        assert!(is_operand2_constant_armv6(255));
        assert!(is_operand2_constant_armv6(0xFF00));
        assert!(is_operand2_constant_armv6(0xFF000000));
        assert!(is_operand2_constant_armv6(0x3FC));
        assert!(!is_operand2_constant_armv6(0x101));
        assert!(!is_operand2_constant_armv6(0xFF1));
    }

    #[test]
    fn test_operand2_armv7m() {
        assert!(is_operand2_constant_armv7m(0x12));
        assert!(is_operand2_constant_armv7m(0x00AB00AB));
        assert!(is_operand2_constant_armv7m(0xAB00AB00));
        assert!(is_operand2_constant_armv7m(0xABABABAB));
        assert!(is_operand2_constant_armv7m(0x8F000000));
        assert!(!is_operand2_constant_armv7m(0x00AB00AC));
        assert!(!is_operand2_constant_armv7m(0x12345678));
    }

    #[test]
    fn test_logical_constant_armv8a() {
        assert!(is_logical_constant_armv8a(0x5555555555555555, RegisterSize::Bits64));
        assert!(is_logical_constant_armv8a(0x00FF00FF00FF00FF, RegisterSize::Bits64));
        assert!(is_logical_constant_armv8a(0xFF, RegisterSize::Bits64));
        assert!(is_logical_constant_armv8a(0x0F0F0F0F, RegisterSize::Bits32));
        assert!(!is_logical_constant_armv8a(0, RegisterSize::Bits64));
        assert!(!is_logical_constant_armv8a(u64::MAX, RegisterSize::Bits64));
        assert!(!is_logical_constant_armv8a(0x0123456789ABCDEF, RegisterSize::Bits64));
    }

    #[test]
    fn test_move_constant_armv8a() {
        assert!(is_move_constant_armv8a(0x1234, RegisterSize::Bits64));
        assert!(is_move_constant_armv8a(0x1234_0000, RegisterSize::Bits64));
        assert!(is_move_constant_armv8a(0x1234_0000_0000, RegisterSize::Bits64));
        assert!(!is_move_constant_armv8a(0x1234_5678, RegisterSize::Bits64));
    }

    #[test]
    fn test_v6m_immediate_bounds() {
        let ops = ArmOps { kind: ArmKind::V6m };
        assert!(ops.validate_immediate(Opcode::Addi, 255, RegisterSize::Bits32));
        assert!(!ops.validate_immediate(Opcode::Addi, 256, RegisterSize::Bits32));
        assert!(ops.validate_immediate(Opcode::Ld32, 124, RegisterSize::Bits32));
        assert!(!ops.validate_immediate(Opcode::Ld32, 126, RegisterSize::Bits32));
        assert!(!ops.validate_immediate(Opcode::Andi, 1, RegisterSize::Bits32));
        assert!(ops.validate_immediate(Opcode::Subri, 0, RegisterSize::Bits32));
        assert!(!ops.validate_immediate(Opcode::Subri, 1, RegisterSize::Bits32));
    }
}
