//! Masked-share bookkeeping.
//!
//! An n-share masked word is a set of [`Reg`] values whose XOR is the
//! secret. Linear operations lift share-wise; the nonlinear
//! `x ^= (!y) & z` lifts to the cross-term expansion, computed here
//! for two shares with a pair of scratch registers so that no term
//! ever combines both shares of the same secret in one register.

use crate::error::{CodegenError, CodegenResult};
use crate::regs::Reg;

use super::CodeGenerator;

/// An n-share masked word.
#[derive(Debug, Clone, Default)]
pub struct MaskedReg {
    shares: Vec<Reg>,
}

impl MaskedReg {
    /// Builds a masked word from its shares.
    pub fn new(shares: Vec<Reg>) -> MaskedReg {
        MaskedReg { shares }
    }

    /// Number of shares.
    pub fn num_shares(&self) -> usize {
        self.shares.len()
    }

    /// One share.
    pub fn share(&self, index: usize) -> &Reg {
        &self.shares[index]
    }

    /// All shares.
    pub fn shares(&self) -> &[Reg] {
        &self.shares
    }
}

impl<'p> CodeGenerator<'p> {
    /// Allocates an n-share masked word of `bits` bits per share.
    pub fn allocate_masked(&mut self, bits: usize, shares: usize) -> CodegenResult<MaskedReg> {
        let mut regs = Vec::with_capacity(shares);
        for _ in 0..shares {
            regs.push(self.allocate_reg(bits)?);
        }
        Ok(MaskedReg::new(regs))
    }

    /// Releases every share.
    pub fn release_masked(&mut self, reg: &mut MaskedReg) {
        for share in reg.shares.iter_mut() {
            let mut taken = std::mem::take(share);
            self.release(&mut taken);
        }
        reg.shares.clear();
    }

    /// `x ^= y` share-wise.
    pub fn masked_xor(&mut self, x: &MaskedReg, y: &MaskedReg) -> CodegenResult<()> {
        if x.num_shares() != y.num_shares() {
            return Err(CodegenError::InvalidArgument(
                "masked operands have different share counts".into(),
            ));
        }
        for i in 0..x.num_shares() {
            self.logxor(x.share(i), y.share(i))?;
        }
        Ok(())
    }

    /// `x = !x`: complementing the first share complements the secret.
    pub fn masked_not(&mut self, x: &MaskedReg) -> CodegenResult<()> {
        self.lognot(x.share(0))
    }

    /// Rotates every share right by the same amount, updating the limb
    /// order of each share in place.
    pub fn masked_ror(&mut self, x: &mut MaskedReg, bits: usize) -> CodegenResult<()> {
        for share in x.shares.iter_mut() {
            self.ror(share, bits)?;
        }
        Ok(())
    }

    /// `x ^= (!y) & z` over two-share words: the four-term expansion
    /// keeps the two shares of each secret apart.
    ///
    /// ```text
    /// x.a ^= (!y.a) & z.a;    x.a ^= (!y.a) & z.b;
    /// x.b ^= y.b & z.a;       x.b ^= y.b & z.b;
    /// ```
    pub fn masked_bic_xor(
        &mut self,
        x: &MaskedReg,
        y: &MaskedReg,
        z: &MaskedReg,
    ) -> CodegenResult<()> {
        if x.num_shares() != 2 || y.num_shares() != 2 || z.num_shares() != 2 {
            return Err(CodegenError::InvalidArgument(
                "the bit-clear expansion is implemented for two shares".into(),
            ));
        }
        let bits = x.share(0).size();
        let mut t1 = self.allocate_reg(bits)?;
        let mut t2 = self.allocate_reg(bits)?;

        self.move_reg(&t1, y.share(0))?;
        self.lognot(&t1)?;
        self.move_reg(&t2, &t1)?;
        self.logand(&t1, z.share(0))?;
        self.logand(&t2, z.share(1))?;
        self.logxor(x.share(0), &t1)?;
        self.logxor(x.share(0), &t2)?;

        self.move_reg(&t1, y.share(1))?;
        self.move_reg(&t2, y.share(1))?;
        self.logand(&t1, z.share(0))?;
        self.logand(&t2, z.share(1))?;
        self.logxor(x.share(1), &t1)?;
        self.logxor(x.share(1), &t2)?;

        self.release(&mut t1);
        self.release(&mut t2);
        Ok(())
    }
}
