//! Structured emission verbs.
//!
//! Every verb acts on multi-limb [`Reg`] values and iterates the limbs
//! in ascending significance, calling into the platform's lowering
//! hooks for each limb. Carry is chained across limbs where the
//! operation requires it; logical operations are limb-parallel.
//!
//! Two platform constraints are worked around here rather than in the
//! hooks: a binary operation whose destination differs from its first
//! source is pre-lowered to a move plus an in-place operation on
//! two-address-only targets, and any immediate the platform rejects is
//! synthesised into a scratch register first, so no record with an
//! illegal literal ever enters the buffer.

use crate::error::{CodegenError, CodegenResult};
use crate::insn::{Insn, Label, Modifier, Opcode};
use crate::platform::Features;
use crate::regs::{Reg, RegFlags, RegisterSize, SizedRegister};

use super::CodeGenerator;

fn with_carry(op: Opcode) -> Opcode {
    match op {
        Opcode::Add => Opcode::Adc,
        Opcode::Sub => Opcode::Sbc,
        Opcode::Addi => Opcode::Adci,
        Opcode::Subi => Opcode::Sbci,
        other => other,
    }
}

fn imm_synth_failed(err: &CodegenError) -> bool {
    matches!(
        err,
        CodegenError::InvalidImmediate { .. } | CodegenError::InvalidInstruction(_)
    )
}

impl<'p> CodeGenerator<'p> {
    fn limbs_match(&self, a: &Reg, b: &Reg) -> CodegenResult<()> {
        if a.num_regs() != b.num_regs() || a.limb_size() != b.limb_size() {
            return Err(CodegenError::InvalidRegister(format!(
                "operand shapes differ: {}x{} vs {}x{}",
                a.num_regs(),
                a.limb_size(),
                b.num_regs(),
                b.limb_size()
            )));
        }
        Ok(())
    }

    // ---- moves ----------------------------------------------------------

    /// Copies `src` into `dst`, limb by limb. Limbs that already share a
    /// physical register are skipped.
    pub fn move_reg(&mut self, dst: &Reg, src: &Reg) -> CodegenResult<()> {
        self.require_body()?;
        self.limbs_match(dst, src)?;
        for i in 0..dst.num_regs() {
            if dst.number(i) == src.number(i) {
                continue;
            }
            self.push(Insn::unary(Opcode::Mov, dst.reg(i).clone(), src.reg(i).clone()));
        }
        Ok(())
    }

    /// Loads an immediate value into `dst`. Limb values the platform
    /// cannot encode directly are synthesised through an
    /// immediate-capable scratch register.
    pub fn move_imm(&mut self, dst: &Reg, value: u64) -> CodegenResult<()> {
        self.require_body()?;
        let limb_bits = dst.limb_size();
        for i in 0..dst.num_regs() {
            let v = (value >> (i * limb_bits)) & RegisterSize::value_mask(limb_bits);
            self.move_limb_imm(dst.reg(i).clone(), v)?;
        }
        Ok(())
    }

    fn move_limb_imm(&mut self, dest: SizedRegister, value: u64) -> CodegenResult<()> {
        let plat = self.platform;
        let result = plat.ops().move_imm(plat, self.buf_mut(), &dest, value);
        match result {
            Ok(()) => Ok(()),
            Err(err) if imm_synth_failed(&err) => {
                let mut scratch = self.allocate(
                    dest.size().bits(),
                    RegFlags::DATA | RegFlags::IMMEDIATE,
                    RegFlags::DATA,
                    RegFlags::NONE,
                    RegFlags::NONE,
                )?;
                let limb = scratch.reg(0).clone();
                plat.ops().move_imm(plat, self.buf_mut(), &limb, value)?;
                self.push(Insn::unary(Opcode::Mov, dest, limb));
                self.release(&mut scratch);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    // ---- in-place binary operations ------------------------------------

    fn binary_inplace(
        &mut self,
        op: Opcode,
        carry: bool,
        dst: &Reg,
        src: &Reg,
        setc: bool,
    ) -> CodegenResult<()> {
        self.require_body()?;
        self.limbs_match(dst, src)?;
        let n = dst.num_regs();
        let plat = self.platform;
        for i in 0..n {
            let limb_op = if carry && i > 0 { with_carry(op) } else { op };
            let limb_setc = (carry && i < n - 1) || (setc && i == n - 1);
            plat.ops().binary(
                plat,
                self.buf_mut(),
                limb_op,
                dst.reg(i),
                dst.reg(i),
                src.reg(i),
                limb_setc,
            )?;
        }
        Ok(())
    }

    /// `dst += src`, carry chained across limbs.
    pub fn add(&mut self, dst: &Reg, src: &Reg) -> CodegenResult<()> {
        self.binary_inplace(Opcode::Add, true, dst, src, false)
    }

    /// `dst -= src`, borrow chained across limbs.
    pub fn sub(&mut self, dst: &Reg, src: &Reg) -> CodegenResult<()> {
        self.binary_inplace(Opcode::Sub, true, dst, src, false)
    }

    /// `dst ^= src`.
    pub fn logxor(&mut self, dst: &Reg, src: &Reg) -> CodegenResult<()> {
        self.binary_inplace(Opcode::Xor, false, dst, src, false)
    }

    /// `dst &= src`.
    pub fn logand(&mut self, dst: &Reg, src: &Reg) -> CodegenResult<()> {
        self.binary_inplace(Opcode::And, false, dst, src, false)
    }

    /// `dst |= src`.
    pub fn logor(&mut self, dst: &Reg, src: &Reg) -> CodegenResult<()> {
        self.binary_inplace(Opcode::Or, false, dst, src, false)
    }

    /// `dst &= !src`, using the platform's bit-clear form when it has
    /// one and NOT plus AND through a scratch register otherwise.
    pub fn logand_not(&mut self, dst: &Reg, src: &Reg) -> CodegenResult<()> {
        if self.platform.has_feature(Features::BIT_CLEAR) {
            self.binary_inplace(Opcode::Bic, false, dst, src, false)
        } else {
            let mut t = self.allocate_temp(src.size())?;
            self.move_reg(&t, src)?;
            self.lognot(&t)?;
            self.logand(dst, &t)?;
            self.release(&mut t);
            Ok(())
        }
    }

    // ---- three-operand forms -------------------------------------------

    fn binary_into(
        &mut self,
        op: Opcode,
        dst: &Reg,
        a: &Reg,
        b: &Reg,
    ) -> CodegenResult<()> {
        if dst == a {
            return self.binary_inplace(op, false, dst, b, false);
        }
        self.limbs_match(dst, a)?;
        self.limbs_match(dst, b)?;
        if self.platform.has_feature(Features::THREE_ADDRESS) {
            let plat = self.platform;
            for i in 0..dst.num_regs() {
                plat.ops().binary(
                    plat,
                    self.buf_mut(),
                    op,
                    dst.reg(i),
                    a.reg(i),
                    b.reg(i),
                    false,
                )?;
            }
            Ok(())
        } else {
            // Two-address platform: move, then operate in place.
            self.move_reg(dst, a)?;
            self.binary_inplace(op, false, dst, b, false)
        }
    }

    /// `dst = a ^ b`.
    pub fn logxor_into(&mut self, dst: &Reg, a: &Reg, b: &Reg) -> CodegenResult<()> {
        self.binary_into(Opcode::Xor, dst, a, b)
    }

    /// `dst = a & b`.
    pub fn logand_into(&mut self, dst: &Reg, a: &Reg, b: &Reg) -> CodegenResult<()> {
        self.binary_into(Opcode::And, dst, a, b)
    }

    /// `dst = a | b`.
    pub fn logor_into(&mut self, dst: &Reg, a: &Reg, b: &Reg) -> CodegenResult<()> {
        self.binary_into(Opcode::Or, dst, a, b)
    }

    /// `dst = a & !b`.
    pub fn logbic_into(&mut self, dst: &Reg, a: &Reg, b: &Reg) -> CodegenResult<()> {
        if self.platform.has_feature(Features::BIT_CLEAR) {
            self.binary_into(Opcode::Bic, dst, a, b)
        } else {
            self.move_reg(dst, b)?;
            self.lognot(dst)?;
            self.logand(dst, a)
        }
    }

    // ---- immediate binary operations -----------------------------------

    fn binary_imm_inplace(
        &mut self,
        op: Opcode,
        carry: bool,
        dst: &Reg,
        value: u64,
        setc: bool,
        skip_value: Option<u64>,
    ) -> CodegenResult<()> {
        self.require_body()?;
        let limb_bits = dst.limb_size();
        let mask = RegisterSize::value_mask(limb_bits);
        let n = dst.num_regs();
        let plat = self.platform;
        for i in 0..n {
            let v = (value >> (i * limb_bits)) & mask;
            let limb_op = if carry && i > 0 { with_carry(op) } else { op };
            let limb_setc = (carry && i < n - 1) || (setc && i == n - 1);
            // Identity limbs of logical operations emit nothing.
            if !carry && !limb_setc && Some(v) == skip_value {
                continue;
            }
            let result = plat.ops().binary_imm(
                plat,
                self.buf_mut(),
                limb_op,
                dst.reg(i),
                dst.reg(i),
                v,
                limb_setc,
            );
            match result {
                Ok(()) => {}
                Err(err) if imm_synth_failed(&err) => {
                    // Synthesise the constant, then use the register form.
                    let reg_op = match limb_op {
                        Opcode::Addi => Opcode::Add,
                        Opcode::Adci => Opcode::Adc,
                        Opcode::Subi => Opcode::Sub,
                        Opcode::Sbci => Opcode::Sbc,
                        Opcode::Andi => Opcode::And,
                        Opcode::Ori => Opcode::Or,
                        Opcode::Xori => Opcode::Xor,
                        Opcode::Cmpi => Opcode::Cmp,
                        other => other,
                    };
                    let mut scratch = self.allocate(
                        limb_bits,
                        RegFlags::DATA | RegFlags::IMMEDIATE,
                        RegFlags::DATA,
                        RegFlags::NONE,
                        RegFlags::NONE,
                    )?;
                    let limb = scratch.reg(0).clone();
                    self.move_limb_imm(limb.clone(), v)?;
                    plat.ops().binary(
                        plat,
                        self.buf_mut(),
                        reg_op,
                        dst.reg(i),
                        dst.reg(i),
                        &limb,
                        limb_setc,
                    )?;
                    self.release(&mut scratch);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// `dst += value`.
    pub fn add_imm(&mut self, dst: &Reg, value: u64) -> CodegenResult<()> {
        self.binary_imm_inplace(Opcode::Addi, true, dst, value, false, None)
    }

    /// `dst -= value`, optionally setting condition codes on the most
    /// significant limb.
    pub fn sub_imm(&mut self, dst: &Reg, value: u64, setc: bool) -> CodegenResult<()> {
        self.binary_imm_inplace(Opcode::Subi, true, dst, value, setc, None)
    }

    /// `dst ^= value`; all-zero limbs emit nothing.
    pub fn logxor_imm(&mut self, dst: &Reg, value: u64) -> CodegenResult<()> {
        self.binary_imm_inplace(Opcode::Xori, false, dst, value, false, Some(0))
    }

    /// `dst |= value`; all-zero limbs emit nothing.
    pub fn logor_imm(&mut self, dst: &Reg, value: u64) -> CodegenResult<()> {
        self.binary_imm_inplace(Opcode::Ori, false, dst, value, false, Some(0))
    }

    /// `dst &= value`; all-ones limbs emit nothing.
    pub fn logand_imm(&mut self, dst: &Reg, value: u64) -> CodegenResult<()> {
        let mask = RegisterSize::value_mask(dst.limb_size());
        self.binary_imm_inplace(Opcode::Andi, false, dst, value, false, Some(mask))
    }

    /// `dst = !dst`, limb-parallel.
    pub fn lognot(&mut self, dst: &Reg) -> CodegenResult<()> {
        self.require_body()?;
        let plat = self.platform;
        for i in 0..dst.num_regs() {
            plat.ops()
                .unary(plat, self.buf_mut(), Opcode::Not, dst.reg(i), dst.reg(i))?;
        }
        Ok(())
    }

    /// `dst = -dst`. Single-limb values use the native negate; wider
    /// values complement and increment.
    pub fn negate(&mut self, dst: &Reg) -> CodegenResult<()> {
        self.require_body()?;
        if dst.num_regs() == 1 {
            let plat = self.platform;
            plat.ops()
                .unary(plat, self.buf_mut(), Opcode::Neg, dst.reg(0), dst.reg(0))
        } else {
            self.lognot(dst)?;
            self.add_imm(dst, 1)
        }
    }

    // ---- shifted-operand helpers ---------------------------------------

    fn require_single_limb(&self, reg: &Reg) -> CodegenResult<()> {
        if reg.num_regs() != 1 {
            return Err(CodegenError::InvalidInstruction(
                "shifted-operand forms act on single-limb values".into(),
            ));
        }
        Ok(())
    }

    /// `dst = src >>> n` for single-limb words, using the platform's
    /// rotate-immediate when it exists.
    pub fn rotr_into(&mut self, dst: &Reg, src: &Reg, n: u8) -> CodegenResult<()> {
        self.require_body()?;
        self.limbs_match(dst, src)?;
        self.require_single_limb(dst)?;
        let plat = self.platform;
        let result = plat.ops().binary_imm(
            plat,
            self.buf_mut(),
            Opcode::Rori,
            dst.reg(0),
            src.reg(0),
            n as u64,
            false,
        );
        match result {
            Ok(()) => Ok(()),
            Err(err) if imm_synth_failed(&err) => {
                self.move_reg(dst, src)?;
                let mut d = dst.clone();
                self.ror(&mut d, n as usize)
            }
            Err(err) => Err(err),
        }
    }

    /// `dst = src >> n` (single limb).
    pub fn lsr_into(&mut self, dst: &Reg, src: &Reg, n: u8) -> CodegenResult<()> {
        self.shift_into(Opcode::Lsri, dst, src, n)
    }

    /// `dst = src << n` (single limb).
    pub fn lsl_into(&mut self, dst: &Reg, src: &Reg, n: u8) -> CodegenResult<()> {
        self.shift_into(Opcode::Lsli, dst, src, n)
    }

    fn shift_into(&mut self, op: Opcode, dst: &Reg, src: &Reg, n: u8) -> CodegenResult<()> {
        self.require_body()?;
        self.limbs_match(dst, src)?;
        self.require_single_limb(dst)?;
        let plat = self.platform;
        let result = plat.ops().binary_imm(
            plat,
            self.buf_mut(),
            op,
            dst.reg(0),
            src.reg(0),
            n as u64,
            false,
        );
        match result {
            Ok(()) => Ok(()),
            Err(err) if imm_synth_failed(&err) => {
                self.move_reg(dst, src)?;
                match op {
                    Opcode::Lsli => self.lsl(dst, n as usize),
                    _ => self.lsr(dst, n as usize),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// `dst op= (src shifted by n)`, using the shift-and-operate form
    /// when the platform has it and a scratch register otherwise.
    pub fn shifted(
        &mut self,
        op: Opcode,
        dst: &Reg,
        src: &Reg,
        modifier: Modifier,
        n: u8,
    ) -> CodegenResult<()> {
        self.require_body()?;
        self.limbs_match(dst, src)?;
        self.require_single_limb(dst)?;
        let plat = self.platform;
        if plat.has_feature(Features::SHIFT_AND_OPERATE) {
            return plat.ops().binary_shifted(
                plat,
                self.buf_mut(),
                op,
                dst.reg(0),
                dst.reg(0),
                src.reg(0),
                modifier,
                n,
                false,
            );
        }
        let mut t = self.allocate_temp(src.size())?;
        self.move_reg(&t, src)?;
        match modifier {
            Modifier::Lsl => self.lsl(&t, n as usize)?,
            Modifier::Lsr => self.lsr(&t, n as usize)?,
            Modifier::Ror => {
                let mut tr = t.clone();
                self.ror(&mut tr, n as usize)?;
            }
            Modifier::Asr | Modifier::None => {
                return Err(CodegenError::InvalidInstruction(
                    "unsupported shifted-operand modifier".into(),
                ))
            }
        }
        self.binary_inplace(op, false, dst, &t, false)?;
        self.release(&mut t);
        Ok(())
    }

    /// `dst ^= src >>> n` (single limb).
    pub fn xor_ror(&mut self, dst: &Reg, src: &Reg, n: u8) -> CodegenResult<()> {
        self.shifted(Opcode::Xor, dst, src, Modifier::Ror, n)
    }

    /// `dst |= src << n` (single limb).
    pub fn or_lsl(&mut self, dst: &Reg, src: &Reg, n: u8) -> CodegenResult<()> {
        self.shifted(Opcode::Or, dst, src, Modifier::Lsl, n)
    }

    /// `dst |= src >> n` (single limb).
    pub fn or_lsr(&mut self, dst: &Reg, src: &Reg, n: u8) -> CodegenResult<()> {
        self.shifted(Opcode::Or, dst, src, Modifier::Lsr, n)
    }

    // ---- memory ---------------------------------------------------------

    fn mem_opcode(load: bool, bits: usize) -> CodegenResult<Opcode> {
        Ok(match (load, bits) {
            (true, 8) => Opcode::Ld8,
            (true, 16) => Opcode::Ld16,
            (true, 32) => Opcode::Ld32,
            (true, 64) => Opcode::Ld64,
            (false, 8) => Opcode::St8,
            (false, 16) => Opcode::St16,
            (false, 32) => Opcode::St32,
            (false, 64) => Opcode::St64,
            _ => {
                return Err(CodegenError::InvalidInstruction(format!(
                    "no {}-bit memory access",
                    bits
                )))
            }
        })
    }

    fn base_sized(&self, base: &Reg) -> CodegenResult<SizedRegister> {
        if base.num_regs() != 1 {
            return Err(CodegenError::InvalidInstruction(
                "memory base must be a single address register".into(),
            ));
        }
        let limb = base.reg(0);
        if !limb.reg().has_flag(RegFlags::ADDRESS) && !limb.reg().has_flag(RegFlags::STACK_POINTER)
        {
            return Err(CodegenError::InvalidInstruction(format!(
                "{} cannot carry addresses",
                limb.name()
            )));
        }
        Ok(limb.clone())
    }

    fn memory_access(
        &mut self,
        load: bool,
        value: &Reg,
        base: &Reg,
        offset: u64,
        reverse: bool,
    ) -> CodegenResult<()> {
        self.require_body()?;
        let base_limb = self.base_sized(base)?;
        let limb_bits = value.limb_size();
        let bytes = limb_bits / 8;
        let op = Self::mem_opcode(load, limb_bits)?;
        let n = value.num_regs();

        // When a displacement falls outside the addressing mode, walk a
        // scratch pointer to the spot instead.
        let mut valid = true;
        for i in 0..n {
            let off = offset + (i * bytes) as u64;
            if !self.platform.validate_immediate(op, off, value.reg(0).size()) && off != 0 {
                valid = false;
            }
        }
        if !valid {
            let mut ptr = self.allocate_address()?;
            self.move_reg(&ptr, base)?;
            self.add_imm(&ptr, offset)?;
            let result = self.memory_access(load, value, &ptr.clone(), 0, reverse);
            self.release(&mut ptr);
            return result;
        }

        for i in 0..n {
            let slot = if reverse { n - 1 - i } else { i };
            let off = offset + (slot * bytes) as u64;
            self.push(Insn::memory(op, value.reg(i).clone(), base_limb.clone(), off));
            if reverse && limb_bits > 8 {
                let plat = self.platform;
                if load {
                    plat.ops().unary(
                        plat,
                        self.buf_mut(),
                        Opcode::Swap,
                        value.reg(i),
                        value.reg(i),
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Loads a little-endian value from `[base + offset]`.
    pub fn ld(&mut self, dst: &Reg, base: &Reg, offset: u64) -> CodegenResult<()> {
        self.memory_access(true, dst, base, offset, false)
    }

    /// Stores a little-endian value to `[base + offset]`.
    pub fn st(&mut self, src: &Reg, base: &Reg, offset: u64) -> CodegenResult<()> {
        self.memory_access(false, src, base, offset, false)
    }

    /// Loads a big-endian value: limbs are fetched in reversed address
    /// order and byte-swapped where wider than a byte.
    pub fn ld_be(&mut self, dst: &Reg, base: &Reg, offset: u64) -> CodegenResult<()> {
        self.memory_access(true, dst, base, offset, true)
    }

    /// Stores a big-endian value.
    pub fn st_be(&mut self, src: &Reg, base: &Reg, offset: u64) -> CodegenResult<()> {
        let limb_bits = src.limb_size();
        if limb_bits > 8 {
            // Swap, store reversed, swap back.
            let plat = self.platform;
            for i in 0..src.num_regs() {
                plat.ops()
                    .unary(plat, self.buf_mut(), Opcode::Swap, src.reg(i), src.reg(i))?;
            }
            self.memory_access(false, src, base, offset, true)?;
            for i in 0..src.num_regs() {
                plat.ops()
                    .unary(plat, self.buf_mut(), Opcode::Swap, src.reg(i), src.reg(i))?;
            }
            Ok(())
        } else {
            self.memory_access(false, src, base, offset, true)
        }
    }

    /// `dst ^= [base + offset]`.
    pub fn ld_xor(&mut self, dst: &Reg, base: &Reg, offset: u64) -> CodegenResult<()> {
        let mut t = self.allocate_temp(dst.size())?;
        self.ld(&t, base, offset)?;
        self.logxor(dst, &t)?;
        self.release(&mut t);
        Ok(())
    }

    /// `[base + offset] ^= src`.
    pub fn mem_xor(&mut self, base: &Reg, offset: u64, src: &Reg) -> CodegenResult<()> {
        let mut t = self.allocate_temp(src.size())?;
        self.ld(&t, base, offset)?;
        self.logxor(&t, src)?;
        self.st(&t, base, offset)?;
        self.release(&mut t);
        Ok(())
    }

    /// Loads from the local frame at `[sp + offset]`.
    pub fn ldlocal(&mut self, dst: &Reg, offset: u64) -> CodegenResult<()> {
        let sp = self.sp();
        self.ld(dst, &sp, offset)
    }

    /// Stores to the local frame at `[sp + offset]`.
    pub fn stlocal(&mut self, src: &Reg, offset: u64) -> CodegenResult<()> {
        let sp = self.sp();
        self.st(src, &sp, offset)
    }

    // ---- stack ----------------------------------------------------------

    /// Pushes every limb of `reg`, least significant first.
    pub fn push_reg(&mut self, reg: &Reg) -> CodegenResult<()> {
        self.require_body()?;
        for i in 0..reg.num_regs() {
            self.push(Insn::unary(Opcode::Push, reg.reg(i).clone(), reg.reg(i).clone()));
        }
        Ok(())
    }

    /// Pops every limb of `reg`, in reverse push order.
    pub fn pop_reg(&mut self, reg: &Reg) -> CodegenResult<()> {
        self.require_body()?;
        for i in (0..reg.num_regs()).rev() {
            self.push(Insn::unary(Opcode::Pop, reg.reg(i).clone(), reg.reg(i).clone()));
        }
        Ok(())
    }

    // ---- compare and branch --------------------------------------------

    /// Compares two values, setting condition codes. Lower limbs
    /// propagate borrow into the most significant comparison.
    pub fn compare(&mut self, a: &Reg, b: &Reg) -> CodegenResult<()> {
        self.require_body()?;
        self.limbs_match(a, b)?;
        let plat = self.platform;
        for i in 0..a.num_regs() {
            let op = if i == 0 { Opcode::Cmp } else { Opcode::Cmpc };
            plat.ops()
                .binary(plat, self.buf_mut(), op, a.reg(i), a.reg(i), b.reg(i), true)?;
        }
        Ok(())
    }

    /// Compares a value with an immediate.
    pub fn compare_imm(&mut self, a: &Reg, value: u64) -> CodegenResult<()> {
        self.require_body()?;
        if a.num_regs() > 1 {
            let mut scratch = self.allocate_reg(a.size())?;
            self.move_imm(&scratch, value)?;
            self.compare(a, &scratch.clone())?;
            self.release(&mut scratch);
            return Ok(());
        }
        let plat = self.platform;
        let result = plat.ops().binary_imm(
            plat,
            self.buf_mut(),
            Opcode::Cmpi,
            a.reg(0),
            a.reg(0),
            value,
            true,
        );
        match result {
            Ok(()) => Ok(()),
            Err(err) if imm_synth_failed(&err) => {
                let mut scratch = self.allocate(
                    a.limb_size(),
                    RegFlags::DATA | RegFlags::IMMEDIATE,
                    RegFlags::DATA,
                    RegFlags::NONE,
                    RegFlags::NONE,
                )?;
                let limb = scratch.reg(0).clone();
                self.move_limb_imm(limb.clone(), value)?;
                plat.ops()
                    .binary(plat, self.buf_mut(), Opcode::Cmp, a.reg(0), a.reg(0), &limb, true)?;
                self.release(&mut scratch);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Decrements a counter, setting condition codes for a following
    /// branch.
    pub fn dec(&mut self, reg: &Reg) -> CodegenResult<()> {
        self.sub_imm(reg, 1, true)
    }

    fn branch(&mut self, op: Opcode, label: Label) -> CodegenResult<()> {
        self.require_body()?;
        self.push(Insn::branch(op, label));
        Ok(())
    }

    /// Branch if equal.
    pub fn breq(&mut self, label: Label) -> CodegenResult<()> {
        self.branch(Opcode::Breq, label)
    }

    /// Branch if not equal.
    pub fn brne(&mut self, label: Label) -> CodegenResult<()> {
        self.branch(Opcode::Brne, label)
    }

    /// Branch if below (unsigned).
    pub fn brltu(&mut self, label: Label) -> CodegenResult<()> {
        self.branch(Opcode::Brltu, label)
    }

    /// Branch if at or above (unsigned).
    pub fn brgeu(&mut self, label: Label) -> CodegenResult<()> {
        self.branch(Opcode::Brgeu, label)
    }

    /// Branch if less than (signed).
    pub fn brlts(&mut self, label: Label) -> CodegenResult<()> {
        self.branch(Opcode::Brlts, label)
    }

    /// Branch if at least (signed).
    pub fn brges(&mut self, label: Label) -> CodegenResult<()> {
        self.branch(Opcode::Brges, label)
    }

    /// Unconditional jump.
    pub fn jmp(&mut self, label: Label) -> CodegenResult<()> {
        self.branch(Opcode::Jmp, label)
    }

    /// Calls a subroutine emitted as a label inside this function.
    pub fn call(&mut self, label: Label) -> CodegenResult<()> {
        self.require_body()?;
        self.push(Insn::branch(Opcode::Call, label));
        Ok(())
    }

    /// Returns from a subroutine.
    pub fn ret(&mut self) -> CodegenResult<()> {
        self.require_body()?;
        self.push(Insn::bare(Opcode::Ret));
        Ok(())
    }

    // ---- diagnostics ----------------------------------------------------

    /// Prints a register in hex when interpreted; a comment in assembly.
    pub fn print_reg(&mut self, reg: &Reg) -> CodegenResult<()> {
        self.require_body()?;
        for i in (0..reg.num_regs()).rev() {
            self.push(Insn::unary(Opcode::Print, reg.reg(i).clone(), reg.reg(i).clone()));
        }
        Ok(())
    }

    /// Prints a character when interpreted.
    pub fn print_char(&mut self, ch: char) -> CodegenResult<()> {
        self.require_body()?;
        self.push(Insn::imm_only(Opcode::Printch, ch as u64));
        Ok(())
    }

    /// Prints an end of line when interpreted.
    pub fn println(&mut self) -> CodegenResult<()> {
        self.require_body()?;
        self.push(Insn::bare(Opcode::Println));
        Ok(())
    }
}
