//! Per-function code generation.
//!
//! A [`CodeGenerator`] is created per function, parameterised by a
//! [`Platform`], filled through the structured-emission verbs and the
//! prologue verbs, finalised once, and then either interpreted against
//! test vectors or rendered to assembly text. It owns the instruction
//! buffer, the register-allocation masks, the declared arguments, the
//! local frame, and the embedded S-box tables.
//!
//! Register allocation is deterministic: the platform's register list
//! order is the allocation policy, and two runs over the same platform
//! with the same allocate/release sequence produce identical register
//! assignments.

mod masked;
mod ops;
mod prologue;
mod rotate;
mod sbox;

pub use masked::MaskedReg;
pub use prologue::{EncryptBlockArgs, MaskedPrologue, OutputPtr};

use log::debug;

use crate::error::{CodegenError, CodegenResult};
use crate::insn::{Insn, InsnBuffer, Label, Opcode};
use crate::platform::Platform;
use crate::regs::{Reg, RegFlags, RegisterSize, SizedRegister};

/// Types of arguments that may be passed to a generated function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Ptr,
}

/// Author-toggleable feature flags that grant temporary use of
/// otherwise-reserved registers on platforms that have them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenFlag {
    /// Allow the scratch byte register to be allocated.
    TempR0,
    /// Allow the fixed-zero register to be clobbered.
    TempR1,
    /// Allow the frame pointer register to be clobbered.
    TempY,
    /// Allow the S-box pointer register to be clobbered.
    TempZ,
}

/// Where one overflowed argument limb lives on the caller's stack,
/// relative to the stacked return address.
#[derive(Debug, Clone, Copy)]
pub struct StackArgSlot {
    /// Index of the argument in declaration order.
    pub arg_index: usize,
    /// Limb index within the argument, ascending significance.
    pub limb_index: usize,
    /// Byte offset above the stacked return address.
    pub offset: u64,
    /// Width of the slot in bytes.
    pub bytes: usize,
}

/// Lifecycle state of a generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GenState {
    /// Arguments may be declared; no code yet.
    Open,
    /// A prologue verb has run; allocation and emission are legal.
    Body,
    /// Closed; all further operations fail.
    Finalised,
}

type RegMask = u64;

/// Per-function code generator.
pub struct CodeGenerator<'p> {
    platform: &'p Platform,
    buf: InsnBuffer,
    name: String,
    allocation_size: RegisterSize,
    allocated: RegMask,
    ever_used: RegMask,
    unlocked: RegMask,
    next_arg_reg: usize,
    next_arg_offset: usize,
    locals: usize,
    state: GenState,
    next_label: Label,
    defined_labels: Vec<Label>,
    args: Vec<Reg>,
    stack_args: Vec<StackArgSlot>,
    sboxes: Vec<Vec<u8>>,
    sbox_ptr: Option<Reg>,
    uses_call: bool,
}

impl<'p> CodeGenerator<'p> {
    /// Creates a generator for one function on the given platform.
    pub fn new(platform: &'p Platform) -> CodeGenerator<'p> {
        CodeGenerator {
            platform,
            buf: InsnBuffer::new(),
            name: String::new(),
            allocation_size: platform.native_word_size(),
            allocated: 0,
            ever_used: 0,
            unlocked: 0,
            next_arg_reg: 0,
            next_arg_offset: 0,
            locals: 0,
            state: GenState::Open,
            next_label: 1,
            defined_labels: Vec::new(),
            args: Vec::new(),
            stack_args: Vec::new(),
            sboxes: Vec::new(),
            sbox_ptr: None,
            uses_call: false,
        }
    }

    /// The platform being generated for.
    pub fn platform(&self) -> &'p Platform {
        self.platform
    }

    /// The function name established by the prologue verb.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The instruction buffer.
    pub fn insns(&self) -> &InsnBuffer {
        &self.buf
    }

    /// The declared argument registers, in declaration order.
    pub fn args(&self) -> &[Reg] {
        &self.args
    }

    /// Stack slots of overflowed argument limbs, for the interpreter
    /// drivers.
    pub fn stack_args(&self) -> &[StackArgSlot] {
        &self.stack_args
    }

    /// The embedded S-box tables.
    pub fn sboxes(&self) -> &[Vec<u8>] {
        &self.sboxes
    }

    /// Bytes of local frame, rounded to the address word size.
    pub fn local_size(&self) -> usize {
        self.locals
    }

    /// Whether `finalise` has completed.
    pub fn is_finalised(&self) -> bool {
        self.state == GenState::Finalised
    }

    /// The stack pointer as a single-limb register value.
    pub fn sp(&self) -> Reg {
        Reg::from_sized(self.sp_sized())
    }

    pub(crate) fn sp_sized(&self) -> SizedRegister {
        SizedRegister::max(self.platform.stack_pointer().clone())
    }

    /// The default width of allocated limbs.
    pub fn allocation_size(&self) -> RegisterSize {
        self.allocation_size
    }

    /// Narrows the default allocation width, e.g. to run a 32-bit
    /// algorithm on a 64-bit platform. Ignored when no data register
    /// supports the requested width.
    pub fn set_allocation_size(&mut self, size: RegisterSize) {
        let supported = self
            .platform
            .registers()
            .iter()
            .any(|r| r.has_flag(RegFlags::DATA) && r.has_size(size));
        if supported {
            self.allocation_size = size;
        }
    }

    /// Grants use of a reserved register on platforms that map the flag.
    pub fn set_flag(&mut self, flag: GenFlag) {
        if let Some(number) = self.platform.ops().scratch_for(flag) {
            self.unlocked |= 1u64 << number;
        }
    }

    /// Revokes a previously granted flag.
    pub fn clear_flag(&mut self, flag: GenFlag) {
        if let Some(number) = self.platform.ops().scratch_for(flag) {
            self.unlocked &= !(1u64 << number);
        }
    }

    /// The currently-allocated register mask, for tests and diagnostics.
    pub fn allocated_mask(&self) -> u64 {
        self.allocated
    }

    /// The sticky ever-used register mask.
    pub fn ever_used_mask(&self) -> u64 {
        self.ever_used
    }

    pub(crate) fn require_body(&self) -> CodegenResult<()> {
        match self.state {
            GenState::Body => Ok(()),
            GenState::Finalised => Err(CodegenError::Finalised),
            GenState::Open => Err(CodegenError::InvalidArgument(
                "a prologue verb must run before code generation".into(),
            )),
        }
    }

    fn require_open(&self) -> CodegenResult<()> {
        match self.state {
            GenState::Open => Ok(()),
            GenState::Finalised => Err(CodegenError::Finalised),
            GenState::Body => Err(CodegenError::InvalidArgument(
                "arguments must be declared before the prologue".into(),
            )),
        }
    }

    pub(crate) fn enter_body(&mut self, name: &str) -> CodegenResult<()> {
        self.require_open()?;
        self.name = name.to_string();
        self.state = GenState::Body;
        debug!("generating {} for {}", name, self.platform.name());
        Ok(())
    }

    pub(crate) fn push(&mut self, insn: Insn) {
        if insn.op() == Opcode::Call {
            self.uses_call = true;
        }
        self.buf.push(insn);
    }

    pub(crate) fn buf_mut(&mut self) -> &mut InsnBuffer {
        &mut self.buf
    }

    pub(crate) fn sbox_tables_mut(&mut self) -> &mut Vec<Vec<u8>> {
        &mut self.sboxes
    }

    pub(crate) fn sbox_ptr_ref(&self) -> Option<&Reg> {
        self.sbox_ptr.as_ref()
    }

    pub(crate) fn set_sbox_ptr(&mut self, ptr: Option<Reg>) {
        self.sbox_ptr = ptr;
    }

    /// Reserves a specific register number, failing when it is live.
    pub(crate) fn reserve_number(&mut self, number: u8) -> bool {
        if (self.allocated & (1u64 << number)) != 0 {
            return false;
        }
        self.mark(number);
        true
    }

    // ---- register allocation -------------------------------------------

    fn mark(&mut self, number: u8) {
        self.allocated |= 1u64 << number;
        self.ever_used |= 1u64 << number;
    }

    /// One allocation attempt against a single flag set. Returns an
    /// empty register when the request cannot be satisfied.
    fn try_allocate(&mut self, bits: usize, flags: RegFlags) -> CodegenResult<Reg> {
        if flags.is_empty() {
            return Ok(Reg::new());
        }
        let mut limb = self.allocation_size;
        if flags.contains(RegFlags::ADDRESS) {
            // Address carriers always use the platform's address width.
            limb = self.platform.address_word_size();
        }
        let limb_bits = limb.bits();
        let count = (bits + limb_bits - 1) / limb_bits;

        let mut reg = Reg::new();
        for basic in self.platform.registers() {
            if reg.num_regs() == count {
                break;
            }
            let number = basic.number();
            if (self.allocated & (1u64 << number)) != 0 {
                continue;
            }
            if !basic.has_size(limb) {
                continue;
            }
            if !basic.flags().contains(flags) {
                continue;
            }
            if basic.has_flag(RegFlags::NO_ALLOCATE) && (self.unlocked & (1u64 << number)) == 0 {
                continue;
            }
            reg.add_register(SizedRegister::new(basic.clone(), limb)?)?;
        }
        if reg.num_regs() != count {
            return Ok(Reg::new());
        }
        for index in 0..reg.num_regs() {
            self.mark(reg.number(index));
        }
        reg.set_size(bits)?;
        if reg.full_size() != bits {
            reg.set_zero_fill(false);
        }
        Ok(reg)
    }

    /// Allocates a register of `bits` bits from freshly reserved
    /// physical registers.
    ///
    /// The flag arguments are tried in order; empty flag sets are
    /// skipped. All flags within one argument must be present on every
    /// limb. Fails with `AllocationFailure` when no attempt succeeds.
    pub fn allocate(
        &mut self,
        bits: usize,
        flags1: RegFlags,
        flags2: RegFlags,
        flags3: RegFlags,
        flags4: RegFlags,
    ) -> CodegenResult<Reg> {
        self.require_body()?;
        if bits == 0 {
            return Err(CodegenError::InvalidArgument(
                "cannot allocate zero-sized registers".into(),
            ));
        }
        for flags in [flags1, flags2, flags3, flags4] {
            let reg = self.try_allocate(bits, flags)?;
            if !reg.is_null() {
                return Ok(reg);
            }
        }
        debug!(
            "{}: allocation of {} bits failed (mask {:#x})",
            self.name, bits, self.allocated
        );
        Err(CodegenError::AllocationFailure { bits })
    }

    /// Allocates a plain data register.
    pub fn allocate_reg(&mut self, bits: usize) -> CodegenResult<Reg> {
        self.allocate(
            bits,
            RegFlags::DATA,
            RegFlags::NONE,
            RegFlags::NONE,
            RegFlags::NONE,
        )
    }

    /// Allocates a short-lived temporary, preferring registers that a
    /// call or branch may clobber anyway.
    pub fn allocate_temp(&mut self, bits: usize) -> CodegenResult<Reg> {
        self.allocate(
            bits,
            RegFlags::DATA | RegFlags::TEMPORARY,
            RegFlags::DATA,
            RegFlags::NONE,
            RegFlags::NONE,
        )
    }

    /// Allocates a storage register for parking values, preferring the
    /// storage-only class on split-register platforms.
    pub fn allocate_storage(&mut self, bits: usize) -> CodegenResult<Reg> {
        self.allocate(
            bits,
            RegFlags::STORAGE,
            RegFlags::DATA,
            RegFlags::NONE,
            RegFlags::NONE,
        )
    }

    /// Allocates an immediate-capable data register, needed for
    /// constants on split-class platforms.
    pub fn allocate_high(&mut self, bits: usize) -> CodegenResult<Reg> {
        self.allocate(
            bits,
            RegFlags::DATA | RegFlags::IMMEDIATE,
            RegFlags::NONE,
            RegFlags::NONE,
            RegFlags::NONE,
        )
    }

    /// Allocates an address-capable register.
    pub fn allocate_address(&mut self) -> CodegenResult<Reg> {
        let bits = self.platform.address_word_size().bits();
        self.allocate(
            bits,
            RegFlags::ADDRESS,
            RegFlags::NONE,
            RegFlags::NONE,
            RegFlags::NONE,
        )
    }

    /// Returns every physical register of `reg` to the free pool and
    /// clears it. Idempotent; safe on an empty register. The ever-used
    /// mask is sticky.
    pub fn release(&mut self, reg: &mut Reg) {
        for index in 0..reg.num_regs() {
            self.allocated &= !(1u64 << reg.number(index));
        }
        *reg = Reg::new();
    }

    // ---- arguments ------------------------------------------------------

    /// Declares the next function argument and returns its register.
    ///
    /// Must be called before any code generation so that argument
    /// registers are not reserved for other purposes first. Arguments
    /// that overflow the platform's argument registers are loaded from
    /// the stack frame above the stacked return address.
    pub fn add_argument(&mut self, arg: ArgType) -> CodegenResult<Reg> {
        self.require_open()?;
        let nsize = self.platform.native_word_size().bits();
        let asize = self.platform.address_word_size().bits();

        let mut size = match arg {
            ArgType::Int8 | ArgType::Uint8 => 8,
            ArgType::Int16 | ArgType::Uint16 => 16,
            ArgType::Int32 | ArgType::Uint32 => 32,
            ArgType::Int64 | ArgType::Uint64 => 64,
            ArgType::Ptr => asize,
        };
        if size < nsize {
            size = nsize;
        }

        let mut reg = Reg::new();
        let arguments = self.platform.arguments().to_vec();

        if arg == ArgType::Ptr {
            // A dedicated pointer register when one is next in line,
            // otherwise native-width pieces.
            let mut remaining = asize;
            while remaining > 0 && self.next_arg_reg < arguments.len() {
                let basic = arguments[self.next_arg_reg].clone();
                if basic.has_flag(RegFlags::ADDRESS)
                    && basic.has_size(self.platform.address_word_size())
                {
                    self.next_arg_reg += 1;
                    self.mark(basic.number());
                    reg.add_register(SizedRegister::new(
                        basic,
                        self.platform.address_word_size(),
                    )?)?;
                    remaining = 0;
                } else if basic.has_size(self.platform.native_word_size()) {
                    self.next_arg_reg += 1;
                    self.mark(basic.number());
                    reg.add_register(SizedRegister::new(
                        basic,
                        self.platform.native_word_size(),
                    )?)?;
                    remaining = remaining.saturating_sub(nsize);
                } else {
                    break;
                }
            }
            if remaining > 0 {
                return self.overflow_argument(reg, remaining, true);
            }
        } else {
            let limb = self.platform.native_word_size();
            let count = if size == 64 && nsize < asize && asize >= 64 {
                // 32-bit emulation hosted on a 64-bit machine: the value
                // travels in one wide register.
                1
            } else {
                size / nsize
            };
            let mut taken = 0;
            while taken < count && self.next_arg_reg < arguments.len() {
                let basic = arguments[self.next_arg_reg].clone();
                self.next_arg_reg += 1;
                if !basic.has_size(limb) {
                    continue;
                }
                self.mark(basic.number());
                reg.add_register(SizedRegister::new(basic, limb)?)?;
                taken += 1;
            }
            if taken < count {
                let remaining = (count - taken) * nsize;
                return self.overflow_argument(reg, remaining, false);
            }
        }

        if self.platform.has_feature(crate::platform::Features::BIG_ENDIAN) {
            reg = reg.reversed()?;
        }
        self.args.push(reg.clone());
        Ok(reg)
    }

    /// Completes an argument whose tail words live on the stack: fresh
    /// registers are reserved and `Ldarg` records emitted to populate
    /// them. The records are rewritten to frame-relative loads at
    /// finalise time, once the frame layout is known.
    fn overflow_argument(
        &mut self,
        mut reg: Reg,
        remaining_bits: usize,
        pointer: bool,
    ) -> CodegenResult<Reg> {
        let nsize = self.platform.native_word_size().bits();
        let mut offset = self.next_arg_offset + reg.num_regs() * (nsize / 8);
        let mut remaining = remaining_bits;
        while remaining > 0 {
            let flags = if pointer {
                RegFlags::ADDRESS
            } else {
                RegFlags::DATA
            };
            let mut temp = self.try_allocate(nsize, flags)?;
            if temp.is_null() {
                temp = self.try_allocate(nsize, RegFlags::DATA)?;
            }
            if temp.is_null() {
                return Err(CodegenError::AllocationFailure { bits: remaining });
            }
            let op = match nsize {
                8 => Opcode::Ldarg8,
                16 => Opcode::Ldarg16,
                32 => Opcode::Ldarg32,
                _ => Opcode::Ldarg64,
            };
            let limb = temp.reg(0).clone();
            self.buf
                .push(Insn::memory(op, limb.clone(), self.sp_sized(), offset as u64));
            self.stack_args.push(StackArgSlot {
                arg_index: self.args.len(),
                limb_index: reg.num_regs(),
                offset: offset as u64,
                bytes: nsize / 8,
            });
            reg.add_register(limb)?;
            offset += nsize / 8;
            remaining = remaining.saturating_sub(nsize);
        }
        let asize = self.platform.address_word_size().bits();
        let total = (reg.full_size() + asize - 1) & !(asize - 1);
        self.next_arg_offset += total / 8;
        if self.platform.has_feature(crate::platform::Features::BIG_ENDIAN) {
            reg = reg.reversed()?;
        }
        self.args.push(reg.clone());
        Ok(reg)
    }

    // ---- frame ----------------------------------------------------------

    /// Establishes the local stack frame, rounded up to the address
    /// word size. Locals are addressed `[0, bytes)` from the stack
    /// pointer.
    pub fn setup_locals(&mut self, bytes: usize) -> CodegenResult<()> {
        let align = self.platform.address_word_size().bytes();
        let rounded = (bytes + align - 1) & !(align - 1);
        let limit = self.platform.ops().max_frame_size();
        if rounded > limit {
            return Err(CodegenError::StackOverflow {
                bytes: rounded,
                limit,
            });
        }
        self.locals = rounded;
        Ok(())
    }

    // ---- labels and scheduling -----------------------------------------

    /// Reserves a fresh branch label.
    pub fn new_label(&mut self) -> Label {
        let label = self.next_label;
        self.next_label += 1;
        label
    }

    /// Emits the definition point of a label.
    pub fn label(&mut self, label: Label) -> CodegenResult<()> {
        self.require_body()?;
        self.defined_labels.push(label);
        self.push(Insn::branch(Opcode::Label, label));
        Ok(())
    }

    /// Marks the instruction `index` positions from the tail with a
    /// scheduling displacement hint for the emitter; 0 is the most
    /// recently appended instruction.
    pub fn reschedule(&mut self, offset: i8, index: usize) {
        self.buf.reschedule_from_tail(offset, index);
    }

    // ---- finalise -------------------------------------------------------

    /// Closes the function: synthesises the callee-save prologue and
    /// epilogue from the ever-used mask, rewrites argument loads now
    /// that the frame is known, and validates every label reference.
    pub fn finalise(&mut self) -> CodegenResult<()> {
        self.require_body()?;

        // Every referenced label must be defined exactly once.
        for insn in self.buf.insns() {
            if insn.op().uses_label() {
                let label = insn.label().unwrap_or(0);
                let count = self.defined_labels.iter().filter(|&&l| l == label).count();
                if count != 1 {
                    return Err(CodegenError::UnresolvedLabel(label));
                }
            }
        }

        let sp = self.sp_sized();

        // Callee-saved registers touched by the function, in inventory
        // order, plus the link register when subroutine calls were used.
        let mut saved: Vec<SizedRegister> = Vec::new();
        for basic in self.platform.registers() {
            let number = basic.number();
            let used = (self.ever_used & (1u64 << number)) != 0;
            let is_link = basic.has_flag(RegFlags::LINK);
            if (used && basic.has_flag(RegFlags::CALLEE_SAVED)) || (is_link && self.uses_call) {
                saved.push(SizedRegister::new(basic.clone(), basic.max_size())?);
            }
        }

        let mut prologue: Vec<Insn> = Vec::new();
        for reg in &saved {
            prologue.push(Insn::unary(Opcode::Push, reg.clone(), reg.clone()));
        }
        if self.locals > 0 {
            prologue.push(Insn::binary_imm(
                Opcode::Subi,
                sp.clone(),
                sp.clone(),
                self.locals as u64,
            ));
        }

        // Rewrite argument loads into frame-relative loads.
        let saved_bytes: usize = saved.iter().map(|r| r.size().bytes()).sum();
        let ret_bytes = self.platform.address_word_size().bytes();
        let base = self.locals + saved_bytes + ret_bytes;
        for index in 0..self.buf.len() {
            let insn = match self.buf.get(index) {
                Some(insn) => insn.clone(),
                None => continue,
            };
            let op = match insn.op() {
                Opcode::Ldarg8 => Opcode::Ld8,
                Opcode::Ldarg16 => Opcode::Ld16,
                Opcode::Ldarg32 => Opcode::Ld32,
                Opcode::Ldarg64 => Opcode::Ld64,
                _ => continue,
            };
            let dest = insn.dest().cloned().ok_or_else(|| {
                CodegenError::InvalidInstruction("argument load without target".into())
            })?;
            let offset = insn.imm().unwrap_or(0) + base as u64;
            self.buf
                .replace(index, Insn::memory(op, dest, sp.clone(), offset));
        }

        self.buf.prepend(prologue);

        if self.locals > 0 {
            self.push(Insn::binary_imm(
                Opcode::Addi,
                sp.clone(),
                sp.clone(),
                self.locals as u64,
            ));
        }
        for reg in saved.iter().rev() {
            self.push(Insn::unary(Opcode::Pop, reg.clone(), reg.clone()));
        }
        self.push(Insn::bare(Opcode::Ret));

        self.state = GenState::Finalised;
        debug!(
            "{}: finalised with {} instructions, {} byte frame",
            self.name,
            self.buf.len(),
            self.locals
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::platform_for_tag;

    fn avr_generator() -> CodeGenerator<'static> {
        CodeGenerator::new(platform_for_tag("avr5").expect("avr5"))
    }

    #[test]
    fn test_lifecycle_state_machine() {
        let mut code = avr_generator();
        // No allocation before a prologue verb.
        assert!(code.allocate_reg(8).is_err());
        code.prologue_permutation("fixture", 0).unwrap();
        assert!(code.allocate_reg(8).is_ok());
        // No argument declaration once the body has started.
        assert!(code.add_argument(ArgType::Uint8).is_err());
        code.finalise().unwrap();
        assert!(matches!(code.finalise(), Err(CodegenError::Finalised)));
    }

    #[test]
    fn test_gen_flags_grant_reserved_registers() {
        let mut code = avr_generator();
        code.prologue_permutation("fixture", 0).unwrap();
        // Soak up every ordinary register, leaving only reserved ones.
        let mut regs = Vec::new();
        while let Ok(reg) = code.allocate_temp(8) {
            regs.push(reg);
        }
        assert!(code.allocate_temp(8).is_err());
        code.set_flag(GenFlag::TempR0);
        let scratch = code.allocate_temp(8).unwrap();
        assert_eq!(scratch.number(0), 0);
        code.clear_flag(GenFlag::TempR0);
        assert!(code.allocate_temp(8).is_err());
    }

    #[test]
    fn test_temp_y_grant_unlocks_an_address_register() {
        let mut code = avr_generator();
        code.prologue_permutation("fixture", 0).unwrap();
        // X goes first; with the state pointer in Z only Y is left.
        let _x = code.allocate_address().unwrap();
        assert!(code.allocate_address().is_err());
        code.set_flag(GenFlag::TempY);
        let y = code.allocate_address().unwrap();
        assert_eq!(y.number(0), crate::platform::avr::REG_Y);
    }

    #[test]
    fn test_address_allocation_uses_address_width() {
        let mut code = avr_generator();
        code.prologue_permutation("fixture", 0).unwrap();
        let ptr = code.allocate_address().unwrap();
        assert_eq!(ptr.num_regs(), 1);
        assert_eq!(ptr.limb_size(), 16);
    }

    #[test]
    fn test_frame_rounding_and_overflow() {
        let mut code = avr_generator();
        code.prologue_permutation("fixture", 0).unwrap();
        code.setup_locals(3).unwrap();
        assert_eq!(code.local_size(), 4);
        assert!(matches!(
            code.setup_locals(1000),
            Err(CodegenError::StackOverflow { .. })
        ));
    }

    #[test]
    fn test_epilogue_reflects_ever_used_callee_saves() {
        let mut code = avr_generator();
        code.prologue_permutation("fixture", 0).unwrap();
        let mut reg = code.allocate_reg(8).unwrap();
        let number = reg.number(0);
        code.release(&mut reg);
        code.finalise().unwrap();
        // The callee-saved register is pushed even though it was
        // released before the end of the function.
        let pushed: Vec<u8> = code
            .insns()
            .insns()
            .iter()
            .filter(|i| i.op() == Opcode::Push)
            .filter_map(|i| i.dest().map(|r| r.number()))
            .collect();
        assert!(pushed.contains(&number));
        assert_eq!(
            code.insns().insns().last().map(|i| i.op()),
            Some(Opcode::Ret)
        );
    }
}
