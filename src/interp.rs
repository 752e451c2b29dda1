//! Bytecode interpreter for known-answer testing.
//!
//! The interpreter executes a finalised instruction buffer against a
//! simulated machine: a file of physical registers held at their
//! maximum widths, a flat byte-addressable memory image, a flags word,
//! and a program counter indexing into the buffer. Each opcode has a
//! reference evaluator; arithmetic reads little-endian views at the
//! operand width, computes the documented function, writes back at the
//! same width, and updates flags only when the set-carry option is on
//! (compares always update).
//!
//! Subtraction carries the borrow convention: the carry flag holds the
//! borrow, and subtract-with-borrow leaves the zero flag sticky so
//! multi-word compares accumulate equality.
//!
//! The drivers at the bottom are the sole mechanism by which test
//! vectors are validated: they place arguments in the platform's
//! argument registers, run until the entry frame returns, and copy the
//! output bytes back.

use std::collections::HashMap;

use log::debug;

use crate::codegen::CodeGenerator;
use crate::error::{CodegenError, CodegenResult};
use crate::insn::{Insn, Modifier, Opcode};
use crate::platform::Features;
use crate::regs::{RegFlags, RegisterSize, SizedRegister};

/// Size of the simulated data memory.
const MEM_SIZE: usize = 0x1_0000;
/// Base address of the first driver buffer (permutation state, key
/// schedule, ...).
const BUF_A: u64 = 0x0100;
/// Base address of the second driver buffer (key, input block, ...).
const BUF_B: u64 = 0x2000;
/// Base address of the third driver buffer (output block, preserved
/// randomness).
const BUF_C: u64 = 0x3000;
/// Base address of the embedded S-box tables.
const TABLE_BASE: u64 = 0x8000;
/// Placement stride for tables; 256-aligned by construction.
const TABLE_STRIDE: u64 = 0x400;
/// Initial stack pointer.
const STACK_TOP: u64 = 0xFF00;
/// Instruction budget per run.
const MAX_STEPS: u64 = 20_000_000;
/// Maximum subroutine nesting.
const MAX_CALL_DEPTH: usize = 64;

#[derive(Debug, Default, Clone, Copy)]
struct FlagsWord {
    zero: bool,
    carry: bool,
    negative: bool,
    overflow: bool,
}

struct Machine<'a, 'p> {
    code: &'a CodeGenerator<'p>,
    regs: [u64; 64],
    mem: Vec<u8>,
    flags: FlagsWord,
    pc: usize,
    calls: Vec<usize>,
    labels: HashMap<u16, usize>,
    big_endian: bool,
    halted: bool,
}

fn exec_err(msg: impl Into<String>) -> CodegenError {
    CodegenError::ExecFailure(msg.into())
}

impl<'a, 'p> Machine<'a, 'p> {
    fn new(code: &'a CodeGenerator<'p>) -> CodegenResult<Machine<'a, 'p>> {
        if !code.is_finalised() {
            return Err(exec_err("cannot interpret an unfinalised function"));
        }
        let mut labels = HashMap::new();
        for (index, insn) in code.insns().insns().iter().enumerate() {
            if insn.op() == Opcode::Label {
                labels.insert(insn.label().unwrap_or(0), index);
            }
        }
        let mut machine = Machine {
            code,
            regs: [0; 64],
            mem: vec![0; MEM_SIZE],
            flags: FlagsWord::default(),
            pc: 0,
            calls: Vec::new(),
            labels,
            big_endian: code.platform().has_feature(Features::BIG_ENDIAN),
            halted: false,
        };
        // Embed the S-box tables in the image, 256-aligned.
        for (index, table) in code.sboxes().iter().enumerate() {
            let base = TABLE_BASE as usize + index * TABLE_STRIDE as usize;
            if base + table.len() > MEM_SIZE {
                return Err(exec_err("S-box tables exceed the memory image"));
            }
            machine.mem[base..base + table.len()].copy_from_slice(table);
        }
        let sp = machine.sp_number();
        machine.regs[sp as usize] = STACK_TOP;
        Ok(machine)
    }

    fn sp_number(&self) -> u8 {
        self.code.platform().stack_pointer().number()
    }

    fn read_reg(&self, reg: &SizedRegister) -> u64 {
        self.regs[reg.number() as usize] & RegisterSize::value_mask(reg.size().bits())
    }

    fn write_reg(&mut self, reg: &SizedRegister, value: u64) {
        let bits = reg.size().bits();
        let mut value = value & RegisterSize::value_mask(bits);
        if reg.reg().has_flag(RegFlags::SIGN_EXTEND) && bits < 64 {
            let sign = 1u64 << (bits - 1);
            if value & sign != 0 {
                value |= !RegisterSize::value_mask(bits);
            }
        }
        self.regs[reg.number() as usize] = value;
    }

    /// Writes a multi-limb argument value, least significant limb first.
    fn write_arg(&mut self, reg: &crate::regs::Reg, value: u64) {
        let limb_bits = reg.limb_size();
        for i in 0..reg.num_regs() {
            let v = (value >> (i * limb_bits)) & RegisterSize::value_mask(limb_bits);
            self.write_reg(reg.reg(i), v);
        }
    }

    fn check_range(&self, addr: u64, len: usize) -> CodegenResult<usize> {
        let addr = addr as usize;
        if addr < 0x20 || addr + len > MEM_SIZE {
            return Err(exec_err(format!(
                "memory access out of bounds: {:#x}+{}",
                addr, len
            )));
        }
        Ok(addr)
    }

    fn load_mem(&self, addr: u64, bytes: usize) -> CodegenResult<u64> {
        let addr = self.check_range(addr, bytes)?;
        let mut value = 0u64;
        for i in 0..bytes {
            let byte = self.mem[addr + i] as u64;
            if self.big_endian {
                value = (value << 8) | byte;
            } else {
                value |= byte << (8 * i);
            }
        }
        Ok(value)
    }

    fn store_mem(&mut self, addr: u64, bytes: usize, value: u64) -> CodegenResult<()> {
        let addr = self.check_range(addr, bytes)?;
        for i in 0..bytes {
            let shift = if self.big_endian {
                8 * (bytes - 1 - i)
            } else {
                8 * i
            };
            self.mem[addr + i] = ((value >> shift) & 0xFF) as u8;
        }
        Ok(())
    }

    fn set_zn(&mut self, result: u64, bits: usize) {
        self.flags.zero = result == 0;
        self.flags.negative = (result >> (bits - 1)) & 1 != 0;
    }

    fn branch_taken(&self, op: Opcode) -> bool {
        let f = &self.flags;
        match op {
            Opcode::Breq => f.zero,
            Opcode::Brne => !f.zero,
            Opcode::Brltu => f.carry,
            Opcode::Brgeu => !f.carry,
            Opcode::Brgtu => !f.carry && !f.zero,
            Opcode::Brleu => f.carry || f.zero,
            Opcode::Brlts => f.negative != f.overflow,
            Opcode::Brges => f.negative == f.overflow,
            Opcode::Brgts => !f.zero && f.negative == f.overflow,
            Opcode::Brles => f.zero || f.negative != f.overflow,
            Opcode::Jmp => true,
            _ => false,
        }
    }

    fn goto(&mut self, label: u16) -> CodegenResult<()> {
        match self.labels.get(&label) {
            Some(&index) => {
                self.pc = index;
                Ok(())
            }
            None => Err(CodegenError::UnresolvedLabel(label)),
        }
    }

    /// Applies a shift-and-operate modifier to the second operand.
    fn modified(&self, value: u64, modifier: Modifier, shift: u8, bits: usize) -> u64 {
        let mask = RegisterSize::value_mask(bits);
        let n = shift as u32 % bits as u32;
        if shift == 0 {
            return value & mask;
        }
        match modifier {
            Modifier::None => value & mask,
            Modifier::Lsl => (value << n) & mask,
            Modifier::Lsr => (value & mask) >> n,
            Modifier::Asr => {
                let sign = 1u64 << (bits - 1);
                let mut v = (value & mask) >> n;
                if value & sign != 0 {
                    v |= mask & !(mask >> n);
                }
                v
            }
            Modifier::Ror => {
                let v = value & mask;
                ((v >> n) | (v << (bits as u32 - n))) & mask
            }
        }
    }

    fn step(&mut self, insn: &Insn) -> CodegenResult<()> {
        use Opcode::*;
        let op = insn.op();
        // Compares always update flags; so do the short data-processing
        // encodings, which are inherently flag-setting on their targets.
        let setc = insn.option() == crate::insn::InsnOption::SetCarry
            || (insn.option() == crate::insn::InsnOption::Short && flag_setting_alu(op))
            || matches!(op, Cmp | Cmpc | Cmpi | Cmpni | CmpBreq | CmpBrne | CmpiBreq | CmpiBrne);
        let mut next = self.pc + 1;

        match op {
            Unknown | Nop | Label => {}

            Jmp => {
                self.goto(insn.label().unwrap_or(0))?;
                next = self.pc;
            }
            Breq | Brne | Brltu | Brgeu | Brgtu | Brleu | Brlts | Brges | Brgts | Brles => {
                if self.branch_taken(op) {
                    self.goto(insn.label().unwrap_or(0))?;
                    next = self.pc;
                }
            }
            Call => {
                if self.calls.len() >= MAX_CALL_DEPTH {
                    return Err(exec_err("subroutine call depth exceeded"));
                }
                self.calls.push(self.pc + 1);
                self.goto(insn.label().unwrap_or(0))?;
                next = self.pc;
            }
            Ret => match self.calls.pop() {
                Some(addr) => next = addr,
                None => {
                    self.halted = true;
                }
            },

            Mov => {
                let src = insn.src1().ok_or_else(|| exec_err("mov without source"))?;
                let dest = insn.dest().ok_or_else(|| exec_err("mov without target"))?;
                let value = self.read_reg(src);
                self.write_reg(dest, value);
                if setc {
                    self.set_zn(value, dest.size().bits());
                }
            }
            Movi | Ldi => {
                let dest = insn.dest().ok_or_else(|| exec_err("move without target"))?;
                self.write_reg(dest, insn.imm().unwrap_or(0));
            }
            Movn => {
                let dest = insn.dest().ok_or_else(|| exec_err("move without target"))?;
                let value = insn.imm().unwrap_or(0) << insn.shift();
                self.write_reg(dest, !value);
            }
            Movw => {
                let dest = insn.dest().ok_or_else(|| exec_err("move without target"))?;
                let value = (insn.imm().unwrap_or(0) & 0xFFFF) << insn.shift();
                self.write_reg(dest, value);
            }
            Movt => {
                let dest = insn.dest().ok_or_else(|| exec_err("move without target"))?;
                let shift = if insn.shift() != 0 { insn.shift() } else { 16 };
                let old = self.read_reg(dest);
                let cleared = old & !(0xFFFFu64 << shift);
                self.write_reg(dest, cleared | ((insn.imm().unwrap_or(0) & 0xFFFF) << shift));
            }

            Not | Neg | Swap => {
                let dest = insn.dest().ok_or_else(|| exec_err("unary without target"))?;
                let src = insn.src1().unwrap_or(dest);
                let bits = dest.size().bits();
                let mask = RegisterSize::value_mask(bits);
                let a = self.read_reg(src);
                let r = match op {
                    Not => !a & mask,
                    Neg => a.wrapping_neg() & mask,
                    _ => {
                        let mut v = 0u64;
                        for i in 0..bits / 8 {
                            v |= ((a >> (8 * i)) & 0xFF) << (8 * (bits / 8 - 1 - i));
                        }
                        v
                    }
                };
                self.write_reg(dest, r);
                if setc {
                    if op == Neg {
                        self.flags.carry = a != 0;
                    }
                    self.set_zn(r, bits);
                }
            }
            Exts | Extu => {
                let dest = insn.dest().ok_or_else(|| exec_err("extend without target"))?;
                let src = insn.src1().ok_or_else(|| exec_err("extend without source"))?;
                let src_bits = src.size().bits();
                let mut value = self.read_reg(src);
                if op == Exts && (value >> (src_bits - 1)) & 1 != 0 {
                    value |= !RegisterSize::value_mask(src_bits);
                }
                self.write_reg(dest, value);
            }

            Add | Addi | Adc | Adci | Sub | Subi | Sbc | Sbci | Subr | Subri | And | Andi | Or
            | Ori | Xor | Xori | Bic | Bici | Cmp | Cmpc | Cmpi | Cmpni => {
                self.alu(insn, op, setc)?;
            }

            Asr | Asri | Lsl | Lsli | Lsr | Lsri | Rol | Roli | Ror | Rori => {
                self.shift(insn, op, setc)?;
            }

            Fsli | Fsri => {
                let dest = insn.dest().ok_or_else(|| exec_err("funnel without target"))?;
                let hi = insn.src1().ok_or_else(|| exec_err("funnel without high"))?;
                let lo = insn.src2().ok_or_else(|| exec_err("funnel without low"))?;
                let bits = dest.size().bits() as u32;
                let n = (insn.imm().unwrap_or(0) as u32) % bits;
                let mask = RegisterSize::value_mask(bits as usize);
                let h = self.read_reg(hi);
                let l = self.read_reg(lo);
                let r = if n == 0 {
                    if op == Fsli {
                        h
                    } else {
                        l
                    }
                } else if op == Fsli {
                    ((h << n) | (l >> (bits - n))) & mask
                } else {
                    ((l >> n) | (h << (bits - n))) & mask
                };
                self.write_reg(dest, r);
            }

            Ld8 | Ld8S | Ld16 | Ld16S | Ld32 | Ld32S | Ld64 => {
                let dest = insn.dest().ok_or_else(|| exec_err("load without target"))?;
                let base = insn.src1().ok_or_else(|| exec_err("load without base"))?;
                let bytes = load_width(op);
                let addr = self
                    .read_reg(base)
                    .wrapping_add(insn.imm().unwrap_or(0));
                let mut value = self.load_mem(addr, bytes)?;
                if matches!(op, Ld8S | Ld16S | Ld32S) {
                    let bits = bytes * 8;
                    if (value >> (bits - 1)) & 1 != 0 {
                        value |= !RegisterSize::value_mask(bits);
                    }
                }
                self.write_reg(dest, value);
            }
            Ld8Array | Ld8SArray | Ld16Array | Ld16SArray | Ld32Array | Ld32SArray | Ld64Array
            | SboxLookup => {
                let dest = insn.dest().ok_or_else(|| exec_err("load without target"))?;
                let base = insn.src1().ok_or_else(|| exec_err("load without base"))?;
                let index = insn.src2().ok_or_else(|| exec_err("load without index"))?;
                let bytes = if op == SboxLookup { 1 } else { load_width(op) };
                let addr = self
                    .read_reg(base)
                    .wrapping_add(self.read_reg(index) << insn.shift());
                let mut value = self.load_mem(addr, bytes)?;
                if matches!(op, Ld8SArray | Ld16SArray | Ld32SArray) {
                    let bits = bytes * 8;
                    if (value >> (bits - 1)) & 1 != 0 {
                        value |= !RegisterSize::value_mask(bits);
                    }
                }
                self.write_reg(dest, value);
            }
            St8 | St16 | St32 | St64 => {
                let data = insn.dest().ok_or_else(|| exec_err("store without data"))?;
                let base = insn.src1().ok_or_else(|| exec_err("store without base"))?;
                let bytes = store_width(op);
                let addr = self
                    .read_reg(base)
                    .wrapping_add(insn.imm().unwrap_or(0));
                let value = self.read_reg(data);
                self.store_mem(addr, bytes, value)?;
            }
            St8Array | St16Array | St32Array | St64Array => {
                let data = insn.dest().ok_or_else(|| exec_err("store without data"))?;
                let base = insn.src1().ok_or_else(|| exec_err("store without base"))?;
                let index = insn.src2().ok_or_else(|| exec_err("store without index"))?;
                let bytes = store_width(op);
                let addr = self
                    .read_reg(base)
                    .wrapping_add(self.read_reg(index) << insn.shift());
                let value = self.read_reg(data);
                self.store_mem(addr, bytes, value)?;
            }

            SboxSetup => {
                let dest = insn.dest().ok_or_else(|| exec_err("setup without target"))?;
                let index = insn.imm().unwrap_or(0);
                self.write_reg(dest, TABLE_BASE + index * TABLE_STRIDE);
            }
            LdLabel => {
                return Err(exec_err("label addresses are not modelled"));
            }
            Ldarg8 | Ldarg16 | Ldarg32 | Ldarg64 => {
                return Err(exec_err("argument load survived finalise"));
            }

            Push => {
                let data = insn.dest().ok_or_else(|| exec_err("push without data"))?;
                let bytes = data.size().bytes();
                let sp = self.sp_number() as usize;
                let addr = self.regs[sp].wrapping_sub(bytes as u64);
                let value = self.read_reg(data);
                self.store_mem(addr, bytes, value)?;
                self.regs[sp] = addr;
            }
            Pop => {
                let data = insn.dest().ok_or_else(|| exec_err("pop without data"))?;
                let bytes = data.size().bytes();
                let sp = self.sp_number() as usize;
                let addr = self.regs[sp];
                let value = self.load_mem(addr, bytes)?;
                self.write_reg(data, value);
                self.regs[sp] = addr.wrapping_add(bytes as u64);
            }

            CmpBreq | CmpBrne | CmpiBreq | CmpiBrne => {
                let a = insn.src1().ok_or_else(|| exec_err("compare without operand"))?;
                let bits = a.size().bits();
                let lhs = self.read_reg(a);
                let rhs = match op {
                    CmpBreq | CmpBrne => {
                        let b = insn.src2().ok_or_else(|| exec_err("compare without operand"))?;
                        self.read_reg(b)
                    }
                    _ => insn.imm().unwrap_or(0) & RegisterSize::value_mask(bits),
                };
                let r = lhs.wrapping_sub(rhs) & RegisterSize::value_mask(bits);
                self.flags.carry = lhs < rhs;
                self.set_zn(r, bits);
                let taken = if matches!(op, CmpBreq | CmpiBreq) {
                    self.flags.zero
                } else {
                    !self.flags.zero
                };
                if taken {
                    self.goto(insn.label().unwrap_or(0))?;
                    next = self.pc;
                }
            }

            Print => {
                if let Some(reg) = insn.dest() {
                    debug!("print {} = {:#x}", reg.name(), self.read_reg(reg));
                }
            }
            Printch => {
                debug!("print char {:?}", insn.imm().unwrap_or(0) as u8 as char);
            }
            Println => {
                debug!("print newline");
            }
        }

        self.pc = next;
        Ok(())
    }

    fn alu(&mut self, insn: &Insn, op: Opcode, setc: bool) -> CodegenResult<()> {
        use Opcode::*;
        let dest_or_lhs = insn
            .dest()
            .or_else(|| insn.src1())
            .ok_or_else(|| exec_err("ALU operation without operands"))?;
        let lhs_reg = insn.src1().unwrap_or(dest_or_lhs);
        let bits = dest_or_lhs.size().bits();
        let mask = RegisterSize::value_mask(bits);
        let a = self.read_reg(lhs_reg);
        let b = match insn.src2() {
            Some(src2) => {
                let raw = self.read_reg(src2);
                self.modified(raw, insn.modifier(), insn.shift(), bits)
            }
            None => insn.imm().unwrap_or(0) & mask,
        };
        let carry_in = self.flags.carry;

        let mut write = true;
        let result: u64;
        match op {
            Add | Addi | Adc | Adci => {
                let c = if matches!(op, Adc | Adci) && carry_in { 1 } else { 0 };
                let wide = (a as u128) + (b as u128) + c;
                result = (wide as u64) & mask;
                if setc {
                    self.flags.carry = wide > mask as u128;
                    self.flags.overflow = ((a ^ result) & (b ^ result)) >> (bits - 1) & 1 != 0;
                    self.set_zn(result, bits);
                }
            }
            Sub | Subi | Cmp | Cmpi => {
                result = a.wrapping_sub(b) & mask;
                if setc {
                    self.flags.carry = a < b;
                    self.flags.overflow = ((a ^ b) & (a ^ result)) >> (bits - 1) & 1 != 0;
                    self.set_zn(result, bits);
                }
                write = !matches!(op, Cmp | Cmpi);
            }
            Sbc | Sbci | Cmpc => {
                let borrow = if carry_in { 1 } else { 0 };
                let rhs = (b as u128) + borrow;
                result = (a as u128).wrapping_sub(rhs) as u64 & mask;
                if setc {
                    self.flags.carry = (a as u128) < rhs;
                    self.flags.overflow = ((a ^ b) & (a ^ result)) >> (bits - 1) & 1 != 0;
                    // Sticky zero for multi-word compare chains.
                    let zero_in = self.flags.zero;
                    self.set_zn(result, bits);
                    self.flags.zero &= zero_in;
                }
                write = op != Cmpc;
            }
            Cmpni => {
                let wide = (a as u128) + (b as u128);
                result = (wide as u64) & mask;
                self.flags.carry = wide > mask as u128;
                self.flags.overflow = ((a ^ result) & (b ^ result)) >> (bits - 1) & 1 != 0;
                self.set_zn(result, bits);
                write = false;
            }
            Subr | Subri => {
                result = b.wrapping_sub(a) & mask;
                if setc {
                    self.flags.carry = b < a;
                    self.flags.overflow = ((b ^ a) & (b ^ result)) >> (bits - 1) & 1 != 0;
                    self.set_zn(result, bits);
                }
            }
            And | Andi => {
                result = a & b;
                if setc {
                    self.set_zn(result, bits);
                }
            }
            Or | Ori => {
                result = a | b;
                if setc {
                    self.set_zn(result, bits);
                }
            }
            Xor | Xori => {
                result = a ^ b;
                if setc {
                    self.set_zn(result, bits);
                }
            }
            Bic | Bici => {
                result = a & !b & mask;
                if setc {
                    self.set_zn(result, bits);
                }
            }
            _ => return Err(exec_err(format!("unhandled ALU opcode {:?}", op))),
        }
        if write {
            let dest = insn.dest().ok_or_else(|| exec_err("ALU without target"))?;
            self.write_reg(dest, result);
        }
        Ok(())
    }

    fn shift(&mut self, insn: &Insn, op: Opcode, setc: bool) -> CodegenResult<()> {
        use Opcode::*;
        let dest = insn.dest().ok_or_else(|| exec_err("shift without target"))?;
        let src = insn.src1().unwrap_or(dest);
        let bits = dest.size().bits() as u32;
        let mask = RegisterSize::value_mask(bits as usize);
        let a = self.read_reg(src);
        let count = match insn.src2() {
            Some(reg) => self.read_reg(reg) as u32,
            None => insn.imm().unwrap_or(0) as u32,
        };

        let rotate = matches!(op, Rol | Roli | Ror | Rori);
        let n = if rotate { count % bits } else { count };
        let result = if n == 0 {
            a
        } else if n >= bits {
            match op {
                Asr | Asri if (a >> (bits - 1)) & 1 != 0 => mask,
                _ => 0,
            }
        } else {
            match op {
                Lsl | Lsli => (a << n) & mask,
                Lsr | Lsri => a >> n,
                Asr | Asri => {
                    let mut v = a >> n;
                    if (a >> (bits - 1)) & 1 != 0 {
                        v |= mask & !(mask >> n);
                    }
                    v
                }
                Rol | Roli => ((a << n) | (a >> (bits - n))) & mask,
                _ => ((a >> n) | (a << (bits - n))) & mask,
            }
        };
        self.write_reg(dest, result);
        if setc {
            if n > 0 && n <= bits {
                self.flags.carry = match op {
                    Lsl | Lsli => (a >> (bits - n)) & 1 != 0,
                    Lsr | Lsri | Asr | Asri => (a >> (n - 1)) & 1 != 0,
                    _ => self.flags.carry,
                };
            }
            self.set_zn(result, bits as usize);
        }
        Ok(())
    }

    fn run(&mut self) -> CodegenResult<()> {
        let insns = self.code.insns().insns().to_vec();
        let mut steps = 0u64;
        while !self.halted {
            if self.pc >= insns.len() {
                // Fell off the end of the buffer, treat as return.
                break;
            }
            steps += 1;
            if steps > MAX_STEPS {
                return Err(exec_err("instruction budget exceeded"));
            }
            let insn = insns[self.pc].clone();
            self.step(&insn)?;
        }
        Ok(())
    }
}

/// Data-processing opcodes whose short encodings set flags.
fn flag_setting_alu(op: Opcode) -> bool {
    use Opcode::*;
    matches!(
        op,
        Add | Addi
            | Adc
            | Adci
            | Sub
            | Subi
            | Sbc
            | Sbci
            | Subr
            | Subri
            | And
            | Andi
            | Or
            | Ori
            | Xor
            | Xori
            | Bic
            | Bici
            | Not
            | Neg
            | Mov
            | Movi
            | Asr
            | Asri
            | Lsl
            | Lsli
            | Lsr
            | Lsri
            | Rol
            | Roli
            | Ror
            | Rori
    )
}

fn load_width(op: Opcode) -> usize {
    use Opcode::*;
    match op {
        Ld8 | Ld8S | Ld8Array | Ld8SArray => 1,
        Ld16 | Ld16S | Ld16Array | Ld16SArray => 2,
        Ld32 | Ld32S | Ld32Array | Ld32SArray => 4,
        _ => 8,
    }
}

fn store_width(op: Opcode) -> usize {
    use Opcode::*;
    match op {
        St8 | St8Array => 1,
        St16 | St16Array => 2,
        St32 | St32Array => 4,
        _ => 8,
    }
}

/// Interpreter and test-vector drivers over a finalised function.
pub struct Interpreter<'a, 'p> {
    code: &'a CodeGenerator<'p>,
}

impl<'a, 'p> Interpreter<'a, 'p> {
    /// Wraps a finalised function for execution.
    pub fn new(code: &'a CodeGenerator<'p>) -> Interpreter<'a, 'p> {
        Interpreter { code }
    }

    fn run_with(
        &self,
        buffers: &mut [(u64, &mut [u8])],
        inputs: &[(u64, &[u8])],
        args: &[u64],
    ) -> CodegenResult<()> {
        let mut machine = Machine::new(self.code)?;
        for (base, data) in buffers.iter() {
            let base = *base as usize;
            if base + data.len() > MEM_SIZE {
                return Err(exec_err("driver buffer exceeds the memory image"));
            }
            machine.mem[base..base + data.len()].copy_from_slice(data);
        }
        for (base, data) in inputs {
            let base = *base as usize;
            if base + data.len() > MEM_SIZE {
                return Err(exec_err("driver buffer exceeds the memory image"));
            }
            machine.mem[base..base + data.len()].copy_from_slice(data);
        }
        let declared = self.code.args();
        if declared.len() != args.len() {
            return Err(exec_err(format!(
                "{} takes {} arguments, {} were supplied",
                self.code.name(),
                declared.len(),
                args.len()
            )));
        }
        for (reg, value) in declared.iter().zip(args) {
            machine.write_arg(reg, *value);
        }
        // Overflowed argument limbs also live on the caller's stack,
        // above the slot reserved for the return address.
        let ret_bytes = self.code.platform().address_word_size().bytes() as u64;
        for slot in self.code.stack_args() {
            let value = args[slot.arg_index] >> (slot.limb_index * slot.bytes * 8);
            machine.store_mem(
                STACK_TOP + ret_bytes + slot.offset,
                slot.bytes,
                value & RegisterSize::value_mask(slot.bytes * 8),
            )?;
        }
        machine.run()?;
        for (base, data) in buffers.iter_mut() {
            let base = *base as usize;
            data.copy_from_slice(&machine.mem[base..base + data.len()]);
        }
        Ok(())
    }

    /// Runs `void f(void *state)` or `void f(void *state, count)`.
    pub fn exec_permutation(&self, state: &mut [u8], count: Option<u64>) -> CodegenResult<()> {
        let mut args = vec![BUF_A];
        if let Some(count) = count {
            args.push(count);
        }
        self.run_with(&mut [(BUF_A, state)], &[], &args)
    }

    /// Runs `void f(void *schedule, const void *key)`.
    pub fn exec_setup_key(&self, schedule: &mut [u8], key: &[u8]) -> CodegenResult<()> {
        self.run_with(&mut [(BUF_A, schedule)], &[(BUF_B, key)], &[BUF_A, BUF_B])
    }

    /// Runs `void f(const void *schedule, const void *input, void
    /// *output)`.
    pub fn exec_encrypt_block(
        &self,
        schedule: &[u8],
        output: &mut [u8],
        input: &[u8],
    ) -> CodegenResult<()> {
        self.run_with(
            &mut [(BUF_C, output)],
            &[(BUF_A, schedule), (BUF_B, input)],
            &[BUF_A, BUF_B, BUF_C],
        )
    }

    /// Runs `void f(void *state, void *preserved, uint8_t count)` over
    /// a masked state with out-of-band preserved randomness.
    pub fn exec_masked_permutation(
        &self,
        state: &mut [u8],
        preserved: &mut [u8],
        count: u64,
    ) -> CodegenResult<()> {
        self.run_with(
            &mut [(BUF_A, state), (BUF_C, preserved)],
            &[],
            &[BUF_A, BUF_C, count],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{ArgType, CodeGenerator};
    use crate::platform::platform_for_tag;
    use crate::regs::RegisterSize;

    /// Generates "load a 64-bit value, rotate, store" on the given
    /// platform and interprets it; compares against the host rotate.
    fn check_rotation(tag: &str, narrow: bool, bits: usize, value: u64) {
        let platform = platform_for_tag(tag).unwrap();
        let mut code = CodeGenerator::new(platform);
        let state = code.prologue_permutation("rotate_fixture", 0).unwrap();
        if narrow {
            code.set_allocation_size(RegisterSize::Bits32);
        }
        let mut reg = code.allocate_reg(64).unwrap();
        code.ld(&reg, &state, 0).unwrap();
        code.ror(&mut reg, bits).unwrap();
        code.st(&reg, &state, 0).unwrap();
        code.finalise().unwrap();

        let mut buf = value.to_le_bytes();
        Interpreter::new(&code)
            .exec_permutation(&mut buf, None)
            .unwrap();
        assert_eq!(
            u64::from_le_bytes(buf),
            value.rotate_right(bits as u32 % 64),
            "{}: ror by {} failed",
            tag,
            bits
        );
    }

    #[test]
    fn rotations_match_the_reference_on_all_shapes() {
        let value = 0x0123_4567_89AB_CDEFu64;
        for bits in [1usize, 3, 7, 8, 13, 21, 32, 40, 57, 63, 64] {
            // Eight byte limbs with shift pairs.
            check_rotation("avr5", false, bits, value);
            // Two word limbs with shift-and-operate.
            check_rotation("armv7m", false, bits, value);
            // Two word limbs with plain shift pairs.
            check_rotation("armv6m", false, bits, value);
            // One native limb with the hardware rotate.
            check_rotation("armv8a", false, bits, value);
            // Two narrowed limbs on the 64-bit register file.
            check_rotation("armv8a", true, bits, value);
        }
    }

    #[test]
    fn sub_word_rotation_masks_to_size() {
        let platform = platform_for_tag("armv7m").unwrap();
        let mut code = CodeGenerator::new(platform);
        let state = code.prologue_permutation("rotate_fixture", 0).unwrap();
        let mut reg = code.allocate_reg(8).unwrap();
        code.ld(&reg, &state, 0).unwrap();
        code.ror(&mut reg, 3).unwrap();
        code.st(&reg, &state, 0).unwrap();
        code.finalise().unwrap();

        let mut buf = [0xB4u8];
        Interpreter::new(&code)
            .exec_permutation(&mut buf, None)
            .unwrap();
        assert_eq!(buf[0], 0xB4u8.rotate_right(3));
    }

    #[test]
    fn multi_limb_shifts_match_the_reference() {
        for (tag, bits, left) in [
            ("armv7m", 5usize, true),
            ("armv7m", 17, false),
            ("avr5", 3, true),
            ("avr5", 11, false),
        ] {
            let platform = platform_for_tag(tag).unwrap();
            let mut code = CodeGenerator::new(platform);
            let state = code.prologue_permutation("shift_fixture", 0).unwrap();
            let reg = code.allocate_reg(64).unwrap();
            code.ld(&reg, &state, 0).unwrap();
            if left {
                code.lsl(&reg, bits).unwrap();
            } else {
                code.lsr(&reg, bits).unwrap();
            }
            code.st(&reg, &state, 0).unwrap();
            code.finalise().unwrap();

            let value = 0xF00D_8421_1248_C3A5u64;
            let mut buf = value.to_le_bytes();
            Interpreter::new(&code)
                .exec_permutation(&mut buf, None)
                .unwrap();
            let expected = if left { value << bits } else { value >> bits };
            assert_eq!(u64::from_le_bytes(buf), expected, "{} by {}", tag, bits);
        }
    }

    #[test]
    fn overflowed_arguments_arrive_through_the_frame() {
        let platform = platform_for_tag("armv7m").unwrap();
        let mut code = CodeGenerator::new(platform);
        let out = code.add_argument(ArgType::Ptr).unwrap();
        let mut args = Vec::new();
        for _ in 0..5 {
            args.push(code.add_argument(ArgType::Uint32).unwrap());
        }
        code.enter_body("ldarg_fixture").unwrap();
        code.setup_locals(0).unwrap();
        // The fourth and fifth integer arguments overflow r1..r3.
        assert!(!code.stack_args().is_empty());
        code.st(&args[3], &out, 0).unwrap();
        code.st(&args[4], &out, 4).unwrap();
        code.finalise().unwrap();

        let mut buf = [0u8; 8];
        Interpreter::new(&code)
            .run_with(
                &mut [(BUF_A, &mut buf[..])],
                &[],
                &[BUF_A, 0x11, 0x22, 0x33, 0x4455_6677, 0x8899_AABB],
            )
            .unwrap();
        assert_eq!(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]), 0x4455_6677);
        assert_eq!(u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]), 0x8899_AABB);
    }

    #[test]
    fn carry_chain_addition_across_limbs() {
        let platform = platform_for_tag("avr5").unwrap();
        let mut code = CodeGenerator::new(platform);
        let state = code.prologue_permutation("add_fixture", 0).unwrap();
        let a = code.allocate_reg(32).unwrap();
        let b = code.allocate_reg(32).unwrap();
        code.ld(&a, &state, 0).unwrap();
        code.ld(&b, &state, 4).unwrap();
        code.add(&a, &b).unwrap();
        code.st(&a, &state, 0).unwrap();
        code.finalise().unwrap();

        let mut buf = [0u8; 8];
        buf[..4].copy_from_slice(&0xFFFF_FFF0u32.to_le_bytes());
        buf[4..].copy_from_slice(&0x0000_0023u32.to_le_bytes());
        Interpreter::new(&code)
            .exec_permutation(&mut buf, None)
            .unwrap();
        let sum = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        assert_eq!(sum, 0xFFFF_FFF0u32.wrapping_add(0x23));
    }
}
