//! S-box tables and lookups.
//!
//! A table is embedded in the function and emitted after the body,
//! aligned to 256 bytes. Lookups go through a staked access pointer:
//! on targets with a fixed table pointer (Z on avr5) that register is
//! reserved for the duration; elsewhere an address register is
//! allocated. Two extras support round-constant tables: loading a full
//! word at an immediate offset, and advancing the staked pointer.

use crate::error::{CodegenError, CodegenResult};
use crate::insn::{Insn, Opcode};
use crate::regs::{Reg, SizedRegister};

use super::CodeGenerator;

impl<'p> CodeGenerator<'p> {
    /// Embeds a table at `index` without staking the pointer. Tables
    /// are identified by their index in the function's table list.
    pub fn sbox_add(&mut self, index: usize, data: &[u8]) -> CodegenResult<()> {
        let tables = self.sbox_tables_mut();
        if index == tables.len() {
            tables.push(data.to_vec());
            Ok(())
        } else if tables.get(index).map(|t| t.as_slice()) == Some(data) {
            Ok(())
        } else {
            Err(CodegenError::InvalidArgument(format!(
                "S-box index {} is out of sequence",
                index
            )))
        }
    }

    /// Stakes the S-box access pointer to the table at `index`, adding
    /// the table if it is new.
    pub fn sbox_setup(&mut self, index: usize, data: &[u8]) -> CodegenResult<()> {
        self.require_body()?;
        self.sbox_add(index, data)?;
        if self.sbox_ptr_ref().is_some() {
            return Err(CodegenError::InvalidInstruction(
                "S-box pointer is already staked".into(),
            ));
        }
        let ptr = match self.platform.ops().sbox_pointer() {
            Some(number) => {
                if !self.reserve_number(number) {
                    return Err(CodegenError::InvalidInstruction(
                        "S-box pointer register is in use".into(),
                    ));
                }
                let basic = self.platform.register_for_number(number).ok_or_else(|| {
                    CodegenError::InvalidRegister("missing S-box pointer register".into())
                })?;
                Reg::from_sized(SizedRegister::max(basic))
            }
            None => self.allocate_address()?,
        };
        self.push(Insn::move_imm(
            Opcode::SboxSetup,
            ptr.reg(0).clone(),
            index as u64,
        ));
        self.set_sbox_ptr(Some(ptr));
        Ok(())
    }

    /// Stakes the pointer with a fixed byte offset into the table,
    /// used for pre-offset round-constant tables.
    pub fn sbox_setup_at(&mut self, index: usize, data: &[u8], offset: u64) -> CodegenResult<()> {
        self.sbox_setup(index, data)?;
        if offset != 0 {
            self.sbox_adjust(offset)?;
        }
        Ok(())
    }

    /// Advances the staked pointer by `offset` bytes.
    pub fn sbox_adjust(&mut self, offset: u64) -> CodegenResult<()> {
        let ptr = self
            .sbox_ptr_ref()
            .cloned()
            .ok_or_else(|| CodegenError::InvalidInstruction("no S-box pointer staked".into()))?;
        self.add_imm(&ptr, offset)
    }

    /// `dst = table[src]` for byte values through the staked pointer.
    /// `dst` and `src` may be the same register.
    pub fn sbox_lookup(&mut self, dst: &Reg, src: &Reg) -> CodegenResult<()> {
        self.require_body()?;
        let ptr = self
            .sbox_ptr_ref()
            .cloned()
            .ok_or_else(|| CodegenError::InvalidInstruction("no S-box pointer staked".into()))?;
        if dst.limb_size() != 8 || src.limb_size() != 8 {
            return Err(CodegenError::InvalidInstruction(
                "S-box lookups operate on byte registers".into(),
            ));
        }
        self.push(Insn::memory_array(
            Opcode::SboxLookup,
            dst.reg(0).clone(),
            ptr.reg(0).clone(),
            src.reg(0).clone(),
            0,
        ));
        Ok(())
    }

    /// Loads a word from the staked table at an immediate byte offset,
    /// for round-indexed constants.
    pub fn sbox_load_word(&mut self, dst: &Reg, offset: u64) -> CodegenResult<()> {
        let ptr = self
            .sbox_ptr_ref()
            .cloned()
            .ok_or_else(|| CodegenError::InvalidInstruction("no S-box pointer staked".into()))?;
        self.ld(dst, &ptr, offset)
    }

    /// Loads an entry of `bits` bits from the staked table, indexed by
    /// a register scaled to the entry width.
    pub fn sbox_load_word_indexed(
        &mut self,
        dst: &Reg,
        index: &Reg,
        bits: usize,
    ) -> CodegenResult<()> {
        self.require_body()?;
        let ptr = self
            .sbox_ptr_ref()
            .cloned()
            .ok_or_else(|| CodegenError::InvalidInstruction("no S-box pointer staked".into()))?;
        let (op, shift) = match bits {
            8 => (Opcode::Ld8Array, 0u8),
            16 => (Opcode::Ld16Array, 1),
            32 => (Opcode::Ld32Array, 2),
            64 => (Opcode::Ld64Array, 3),
            other => {
                return Err(CodegenError::InvalidInstruction(format!(
                    "no {}-bit table load",
                    other
                )))
            }
        };
        if dst.num_regs() != 1 {
            return Err(CodegenError::InvalidInstruction(
                "indexed table loads are single-limb".into(),
            ));
        }
        self.push(Insn::memory_array(
            op,
            dst.reg(0).clone(),
            ptr.reg(0).clone(),
            index.reg(0).clone(),
            shift,
        ));
        Ok(())
    }

    /// Releases the staked pointer. The table stays embedded.
    pub fn sbox_cleanup(&mut self) {
        if let Some(ptr) = self.sbox_ptr_ref().cloned() {
            let mut ptr = ptr;
            self.release(&mut ptr);
            self.set_sbox_ptr(None);
        }
    }

}
