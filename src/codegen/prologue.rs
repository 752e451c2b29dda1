//! Prologue verbs for the standard primitive shapes.
//!
//! Authors do not write prologue instructions directly. Each verb
//! declares the arguments for one of the standard function shapes,
//! establishes the frame, moves the generator into its body state, and
//! returns pre-populated argument registers. The matching epilogue is
//! synthesised automatically at finalise time.
//!
//! Pointer arguments bind to the platform's pointer-capable argument
//! registers in order. A third pointer on a register-poor target
//! arrives in byte registers instead; it is spilled into the frame and
//! recovered later with [`CodeGenerator::load_output_ptr`].

use crate::error::{CodegenError, CodegenResult};
use crate::regs::{Reg, RegFlags};

use super::{ArgType, CodeGenerator};

/// Where the output pointer of a block-cipher function lives.
#[derive(Debug, Clone)]
pub enum OutputPtr {
    /// Still resident in an address register.
    Reg(Reg),
    /// Spilled to the frame at this local offset.
    Local(u64),
}

/// Argument bindings for a block-cipher encrypt or decrypt function.
#[derive(Debug, Clone)]
pub struct EncryptBlockArgs {
    /// Key schedule pointer.
    pub schedule: Reg,
    /// Input block pointer.
    pub input: Reg,
    /// Output block pointer.
    pub output: OutputPtr,
}

/// Argument bindings for a masked permutation function.
#[derive(Debug, Clone)]
pub struct MaskedPrologue {
    /// Masked state pointer.
    pub state: Reg,
    /// Preserved-randomness pointer, carried out-of-band.
    pub preserved: Reg,
    /// Round count or first-round index.
    pub count: Reg,
}

fn is_address_capable(reg: &Reg) -> bool {
    (0..reg.num_regs()).all(|i| reg.reg(i).reg().has_flag(RegFlags::ADDRESS))
}

impl<'p> CodeGenerator<'p> {
    /// Prologue for `void name(void *state)`.
    pub fn prologue_permutation(&mut self, name: &str, locals: usize) -> CodegenResult<Reg> {
        let state = self.add_argument(ArgType::Ptr)?;
        self.enter_body(name)?;
        self.setup_locals(locals)?;
        if !is_address_capable(&state) {
            return Err(CodegenError::InvalidInstruction(
                "state pointer did not arrive in an address register".into(),
            ));
        }
        Ok(state)
    }

    /// Prologue for `void name(void *state, uint8_t count)`.
    pub fn prologue_permutation_with_count(
        &mut self,
        name: &str,
        locals: usize,
    ) -> CodegenResult<(Reg, Reg)> {
        self.prologue_permutation_with_count_typed(name, locals, ArgType::Uint8)
    }

    /// Prologue for a permutation with an explicitly typed count.
    pub fn prologue_permutation_with_count_typed(
        &mut self,
        name: &str,
        locals: usize,
        count_type: ArgType,
    ) -> CodegenResult<(Reg, Reg)> {
        let state = self.add_argument(ArgType::Ptr)?;
        let count = self.add_argument(count_type)?;
        self.enter_body(name)?;
        self.setup_locals(locals)?;
        if !is_address_capable(&state) {
            return Err(CodegenError::InvalidInstruction(
                "state pointer did not arrive in an address register".into(),
            ));
        }
        Ok((state, count))
    }

    /// Prologue for `void name(void *schedule, const void *key)`.
    pub fn prologue_setup_key(&mut self, name: &str, locals: usize) -> CodegenResult<(Reg, Reg)> {
        let schedule = self.add_argument(ArgType::Ptr)?;
        let key = self.add_argument(ArgType::Ptr)?;
        self.enter_body(name)?;
        self.setup_locals(locals)?;
        if !is_address_capable(&schedule) || !is_address_capable(&key) {
            return Err(CodegenError::InvalidInstruction(
                "key setup pointers did not arrive in address registers".into(),
            ));
        }
        Ok((schedule, key))
    }

    /// Prologue for `void name(const void *schedule, const void *input,
    /// void *output)`.
    ///
    /// On targets with only two pointer argument registers the output
    /// pointer arrives in byte registers; it is spilled into the frame
    /// here and recovered with [`CodeGenerator::load_output_ptr`].
    pub fn prologue_encrypt_block(
        &mut self,
        name: &str,
        locals: usize,
    ) -> CodegenResult<EncryptBlockArgs> {
        let schedule = self.add_argument(ArgType::Ptr)?;
        let input = self.add_argument(ArgType::Ptr)?;
        let mut output = self.add_argument(ArgType::Ptr)?;
        self.enter_body(name)?;
        if !is_address_capable(&schedule) || !is_address_capable(&input) {
            return Err(CodegenError::InvalidInstruction(
                "block cipher pointers did not arrive in address registers".into(),
            ));
        }
        let output = if is_address_capable(&output) {
            self.setup_locals(locals)?;
            OutputPtr::Reg(output)
        } else {
            let spill = locals as u64;
            let asize = self.platform().address_word_size().bytes();
            self.setup_locals(locals + asize)?;
            self.stlocal(&output, spill)?;
            self.release(&mut output);
            OutputPtr::Local(spill)
        };
        Ok(EncryptBlockArgs {
            schedule,
            input,
            output,
        })
    }

    /// Recovers the output pointer into an address register.
    pub fn load_output_ptr(&mut self, output: &OutputPtr) -> CodegenResult<Reg> {
        match output {
            OutputPtr::Reg(reg) => Ok(reg.clone()),
            OutputPtr::Local(offset) => {
                let ptr = self.allocate_address()?;
                self.ldlocal(&ptr, *offset)?;
                Ok(ptr)
            }
        }
    }

    /// Prologue for `void name(void *state, void *preserved,
    /// uint8_t count)` over a masked state, binding the
    /// preserved-randomness pointer alongside the state.
    pub fn prologue_masked_permutation(
        &mut self,
        name: &str,
        locals: usize,
    ) -> CodegenResult<MaskedPrologue> {
        let state = self.add_argument(ArgType::Ptr)?;
        let preserved = self.add_argument(ArgType::Ptr)?;
        let count = self.add_argument(ArgType::Uint8)?;
        self.enter_body(name)?;
        self.setup_locals(locals)?;
        if !is_address_capable(&state) || !is_address_capable(&preserved) {
            return Err(CodegenError::InvalidInstruction(
                "masked permutation pointers did not arrive in address registers".into(),
            ));
        }
        Ok(MaskedPrologue {
            state,
            preserved,
            count,
        })
    }
}
