//! Rotation and multi-limb shift lowering.
//!
//! A rotate over an `n`-limb value decomposes into a whole-limb
//! permutation (realised by renumbering the limbs, which emits no
//! code) and a sub-limb bit rotation. The direction is canonicalised
//! first so that the sub-limb component never exceeds half a limb:
//! rotate right by 7 on an 8-bit limb becomes rotate left by 1 plus a
//! limb shift. The sub-limb component lowers to a native rotate, a
//! funnel shift, a shift-and-operate pair, or a plain shift pair with
//! a scratch register, depending on what the platform offers.

use crate::error::{CodegenError, CodegenResult};
use crate::insn::{Insn, Modifier, Opcode};
use crate::platform::Features;
use crate::regs::{Reg, RegisterSize};

use super::CodeGenerator;

impl<'p> CodeGenerator<'p> {
    /// Rotates `x` left by `bits`. A rotation by zero or by a multiple
    /// of the value size emits nothing.
    pub fn rol(&mut self, x: &mut Reg, bits: usize) -> CodegenResult<()> {
        let size = x.size();
        if size == 0 {
            return Err(CodegenError::InvalidRegister("rotate of empty register".into()));
        }
        let r = bits % size;
        if r == 0 {
            return Ok(());
        }
        self.ror(x, size - r)
    }

    /// Rotates `x` right by `bits`.
    pub fn ror(&mut self, x: &mut Reg, bits: usize) -> CodegenResult<()> {
        self.require_body()?;
        let size = x.size();
        if size == 0 {
            return Err(CodegenError::InvalidRegister("rotate of empty register".into()));
        }
        let r = bits % size;
        if r == 0 {
            return Ok(());
        }
        if x.num_regs() == 1 {
            return self.ror_single(x, r);
        }
        if size != x.full_size() {
            return Err(CodegenError::InvalidRegister(
                "multi-limb rotation requires a full-width value".into(),
            ));
        }
        let limb = x.limb_size();
        let n = x.num_regs();
        let limbshift = r / limb;
        let bit = r % limb;
        if bit == 0 {
            // Pure byte permutation: renumber the limbs, no code.
            *x = x.rotated_right_limbs(limbshift);
            return Ok(());
        }
        if bit <= limb / 2 {
            *x = x.rotated_right_limbs(limbshift);
            self.subword_ror(x, bit)
        } else {
            // The equivalent left rotation keeps the sub-limb shift
            // small: ror r == rol (size - r).
            let left_limbs = n - limbshift - 1;
            let bit_left = limb - bit;
            *x = x.rotated_right_limbs(n - left_limbs);
            self.subword_rol(x, bit_left)
        }
    }

    /// Single-limb rotation, including values narrower than the limb.
    fn ror_single(&mut self, x: &mut Reg, r: usize) -> CodegenResult<()> {
        let w = x.size();
        let limb = x.limb_size();
        let plat = self.platform;

        if w == limb && !plat.has_feature(Features::SHIFT_TO_ROTATE) {
            let result = plat.ops().binary_imm(
                plat,
                self.buf_mut(),
                Opcode::Rori,
                x.reg(0),
                x.reg(0),
                r as u64,
                false,
            );
            match result {
                Ok(()) => return Ok(()),
                Err(CodegenError::InvalidImmediate { .. })
                | Err(CodegenError::InvalidInstruction(_)) => {}
                Err(err) => return Err(err),
            }
        }

        // Sub-word values must be clean before bits wrap around.
        let mask = RegisterSize::value_mask(w);
        if w < limb && !x.zero_fill() {
            self.logand_imm(x, mask)?;
        }

        let mut t = self.allocate_temp(w)?;
        self.move_reg(&t, x)?;
        self.shift_limb(Opcode::Lsri, x, 0, r as u64)?;
        self.shift_limb(Opcode::Lsli, &t, 0, (w - r) as u64)?;
        if w < limb {
            self.logand_imm(&t, mask)?;
        }
        self.logor(x, &t)?;
        self.release(&mut t);
        if w < limb {
            x.set_zero_fill(true);
        }
        Ok(())
    }

    /// One immediate shift on a single limb of `reg`, through the
    /// platform hook.
    fn shift_limb(&mut self, op: Opcode, reg: &Reg, index: usize, count: u64) -> CodegenResult<()> {
        if count == 0 {
            return Ok(());
        }
        let plat = self.platform;
        plat.ops().binary_imm(
            plat,
            self.buf_mut(),
            op,
            reg.reg(index),
            reg.reg(index),
            count,
            false,
        )
    }

    /// Rotates the limb contents right by `b` bits across all limbs:
    /// `x[i] = (x[i] >> b) | (x[i+1] << (L-b))`, wrapping through a
    /// saved copy of the lowest limb.
    fn subword_ror(&mut self, x: &Reg, b: usize) -> CodegenResult<()> {
        let limb = x.limb_size();
        let n = x.num_regs();
        let inv = (limb - b) as u64;
        let mut t = self.allocate_temp(limb)?;
        self.push(Insn::unary(Opcode::Mov, t.reg(0).clone(), x.reg(0).clone()));

        if self.platform.has_feature(Features::FUNNEL_SHIFT) {
            for i in 0..n {
                let hi = if i + 1 < n { x.reg(i + 1).clone() } else { t.reg(0).clone() };
                self.push(Insn::funnel(
                    Opcode::Fsri,
                    x.reg(i).clone(),
                    hi,
                    x.reg(i).clone(),
                    b as u64,
                ));
            }
        } else if self.platform.has_feature(Features::SHIFT_AND_OPERATE) {
            let plat = self.platform;
            for i in 0..n {
                let hi = if i + 1 < n { x.reg(i + 1).clone() } else { t.reg(0).clone() };
                self.shift_limb(Opcode::Lsri, x, i, b as u64)?;
                plat.ops().binary_shifted(
                    plat,
                    self.buf_mut(),
                    Opcode::Or,
                    x.reg(i),
                    x.reg(i),
                    &hi,
                    Modifier::Lsl,
                    inv as u8,
                    false,
                )?;
            }
        } else {
            let mut u = self.allocate_temp(limb)?;
            for i in 0..n {
                let hi = if i + 1 < n { x.reg(i + 1).clone() } else { t.reg(0).clone() };
                self.push(Insn::unary(Opcode::Mov, u.reg(0).clone(), hi));
                self.shift_limb(Opcode::Lsli, &u, 0, inv)?;
                self.shift_limb(Opcode::Lsri, x, i, b as u64)?;
                let plat = self.platform;
                plat.ops().binary(
                    plat,
                    self.buf_mut(),
                    Opcode::Or,
                    x.reg(i),
                    x.reg(i),
                    u.reg(0),
                    false,
                )?;
            }
            self.release(&mut u);
        }
        self.release(&mut t);
        Ok(())
    }

    /// Rotates the limb contents left by `b` bits across all limbs:
    /// `x[i] = (x[i] << b) | (x[i-1] >> (L-b))`.
    fn subword_rol(&mut self, x: &Reg, b: usize) -> CodegenResult<()> {
        let limb = x.limb_size();
        let n = x.num_regs();
        let inv = (limb - b) as u64;
        let mut t = self.allocate_temp(limb)?;
        self.push(Insn::unary(Opcode::Mov, t.reg(0).clone(), x.reg(n - 1).clone()));

        if self.platform.has_feature(Features::FUNNEL_SHIFT) {
            for i in (0..n).rev() {
                let lo = if i > 0 { x.reg(i - 1).clone() } else { t.reg(0).clone() };
                self.push(Insn::funnel(
                    Opcode::Fsli,
                    x.reg(i).clone(),
                    x.reg(i).clone(),
                    lo,
                    b as u64,
                ));
            }
        } else if self.platform.has_feature(Features::SHIFT_AND_OPERATE) {
            let plat = self.platform;
            for i in (0..n).rev() {
                let lo = if i > 0 { x.reg(i - 1).clone() } else { t.reg(0).clone() };
                self.shift_limb(Opcode::Lsli, x, i, b as u64)?;
                plat.ops().binary_shifted(
                    plat,
                    self.buf_mut(),
                    Opcode::Or,
                    x.reg(i),
                    x.reg(i),
                    &lo,
                    Modifier::Lsr,
                    inv as u8,
                    false,
                )?;
            }
        } else {
            let mut u = self.allocate_temp(limb)?;
            for i in (0..n).rev() {
                let lo = if i > 0 { x.reg(i - 1).clone() } else { t.reg(0).clone() };
                self.push(Insn::unary(Opcode::Mov, u.reg(0).clone(), lo));
                self.shift_limb(Opcode::Lsri, &u, 0, inv)?;
                self.shift_limb(Opcode::Lsli, x, i, b as u64)?;
                let plat = self.platform;
                plat.ops().binary(
                    plat,
                    self.buf_mut(),
                    Opcode::Or,
                    x.reg(i),
                    x.reg(i),
                    u.reg(0),
                    false,
                )?;
            }
            self.release(&mut u);
        }
        self.release(&mut t);
        Ok(())
    }

    /// Logical shift left across all limbs. Whole-limb components are
    /// lowered to moves and zero fills, the remainder to shift pairs.
    pub fn lsl(&mut self, x: &Reg, bits: usize) -> CodegenResult<()> {
        self.require_body()?;
        if bits == 0 {
            return Ok(());
        }
        if bits >= x.full_size() {
            return self.move_imm(x, 0);
        }
        let limb = x.limb_size();
        let n = x.num_regs();
        let limbshift = bits / limb;
        let bit = bits % limb;
        if limbshift > 0 {
            for i in (limbshift..n).rev() {
                self.push(Insn::unary(
                    Opcode::Mov,
                    x.reg(i).clone(),
                    x.reg(i - limbshift).clone(),
                ));
            }
            for i in 0..limbshift {
                self.move_limb_zero(x, i)?;
            }
        }
        if bit > 0 {
            if self.platform.has_feature(Features::SHIFT_AND_OPERATE) {
                let plat = self.platform;
                for i in ((limbshift + 1)..n).rev() {
                    self.shift_limb(Opcode::Lsli, x, i, bit as u64)?;
                    plat.ops().binary_shifted(
                        plat,
                        self.buf_mut(),
                        Opcode::Or,
                        x.reg(i),
                        x.reg(i),
                        x.reg(i - 1),
                        Modifier::Lsr,
                        (limb - bit) as u8,
                        false,
                    )?;
                }
            } else if n - limbshift > 1 {
                let mut u = self.allocate_temp(limb)?;
                for i in ((limbshift + 1)..n).rev() {
                    self.push(Insn::unary(Opcode::Mov, u.reg(0).clone(), x.reg(i - 1).clone()));
                    self.shift_limb(Opcode::Lsri, &u, 0, (limb - bit) as u64)?;
                    self.shift_limb(Opcode::Lsli, x, i, bit as u64)?;
                    let plat = self.platform;
                    plat.ops().binary(
                        plat,
                        self.buf_mut(),
                        Opcode::Or,
                        x.reg(i),
                        x.reg(i),
                        u.reg(0),
                        false,
                    )?;
                }
                self.release(&mut u);
            }
            self.shift_limb(Opcode::Lsli, x, limbshift, bit as u64)?;
        }
        Ok(())
    }

    /// Logical shift right across all limbs.
    pub fn lsr(&mut self, x: &Reg, bits: usize) -> CodegenResult<()> {
        self.require_body()?;
        if bits == 0 {
            return Ok(());
        }
        if bits >= x.full_size() {
            return self.move_imm(x, 0);
        }
        let limb = x.limb_size();
        let n = x.num_regs();
        let limbshift = bits / limb;
        let bit = bits % limb;
        if limbshift > 0 {
            for i in 0..(n - limbshift) {
                self.push(Insn::unary(
                    Opcode::Mov,
                    x.reg(i).clone(),
                    x.reg(i + limbshift).clone(),
                ));
            }
            for i in (n - limbshift)..n {
                self.move_limb_zero(x, i)?;
            }
        }
        if bit > 0 {
            let top = n - limbshift;
            if self.platform.has_feature(Features::SHIFT_AND_OPERATE) {
                let plat = self.platform;
                for i in 0..top.saturating_sub(1) {
                    self.shift_limb(Opcode::Lsri, x, i, bit as u64)?;
                    plat.ops().binary_shifted(
                        plat,
                        self.buf_mut(),
                        Opcode::Or,
                        x.reg(i),
                        x.reg(i),
                        x.reg(i + 1),
                        Modifier::Lsl,
                        (limb - bit) as u8,
                        false,
                    )?;
                }
            } else if top > 1 {
                let mut u = self.allocate_temp(limb)?;
                for i in 0..top - 1 {
                    self.push(Insn::unary(Opcode::Mov, u.reg(0).clone(), x.reg(i + 1).clone()));
                    self.shift_limb(Opcode::Lsli, &u, 0, (limb - bit) as u64)?;
                    self.shift_limb(Opcode::Lsri, x, i, bit as u64)?;
                    let plat = self.platform;
                    plat.ops().binary(
                        plat,
                        self.buf_mut(),
                        Opcode::Or,
                        x.reg(i),
                        x.reg(i),
                        u.reg(0),
                        false,
                    )?;
                }
                self.release(&mut u);
            }
            self.shift_limb(Opcode::Lsri, x, top - 1, bit as u64)?;
        }
        Ok(())
    }

    fn move_limb_zero(&mut self, x: &Reg, index: usize) -> CodegenResult<()> {
        let plat = self.platform;
        let dest = x.reg(index).clone();
        let result = plat.ops().move_imm(plat, self.buf_mut(), &dest, 0);
        match result {
            Ok(()) => Ok(()),
            Err(CodegenError::InvalidImmediate { .. }) => {
                // Fall back to an exclusive-or with itself.
                plat.ops()
                    .binary(plat, self.buf_mut(), Opcode::Xor, &dest, &dest, &dest, false)
            }
            Err(err) => Err(err),
        }
    }
}
