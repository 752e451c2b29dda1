//! Platform descriptions.
//!
//! A [`Platform`] is the static description of a target: its register
//! inventory (list order doubles as the allocation policy), argument
//! registers, stack pointer, feature flags, immediate-legality rules, and
//! the lowering/emission hooks. Platforms are built once at start-up and
//! never mutated afterwards.
//!
//! The lowering hooks live behind a [`PlatformOps`] dispatch table, one
//! method per hook, replacing the inheritance chain of older designs.

pub mod arm;
pub mod avr;

use std::ops::BitOr;
use std::sync::OnceLock;

use crate::codegen::{CodeGenerator, GenFlag};
use crate::emit::EmitState;
use crate::error::CodegenResult;
use crate::insn::{ImmValue, Insn, InsnBuffer, Modifier, Opcode};
use crate::regs::{BasicRegister, RegisterSize, SizedRegister};

/// Major feature flags of a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Features(pub u32);

impl Features {
    /// Two-address instructions of the form `x op= y` are available.
    pub const TWO_ADDRESS: Features = Features(0x0001);
    /// Three-address instructions of the form `x = y op z` are available.
    pub const THREE_ADDRESS: Features = Features(0x0002);
    /// Instructions of the form `x = y op (z sop n)` are available.
    pub const SHIFT_AND_OPERATE: Features = Features(0x0004);
    /// Registers split into two classes where only one class can be used
    /// for general arithmetic.
    pub const SPLIT_REGISTERS: Features = Features(0x0008);
    /// Very few allocatable registers.
    pub const REGISTER_POOR: Features = Features(0x0010);
    /// Lots of allocatable registers.
    pub const REGISTER_RICH: Features = Features(0x0020);
    /// Rotations must be synthesised from left/right shifts.
    pub const SHIFT_TO_ROTATE: Features = Features(0x0040);
    /// Funnel shift instructions are available.
    pub const FUNNEL_SHIFT: Features = Features(0x0080);
    /// A bit-clear instruction `x = y & !z` is available.
    pub const BIT_CLEAR: Features = Features(0x0100);
    /// Platform is big-endian (little-endian when unset).
    pub const BIG_ENDIAN: Features = Features(0x0200);
    /// Unary instructions may have a destination different from the
    /// source; without this, unary operations must be in place.
    pub const UNARY_DEST: Features = Features(0x0400);
    /// Combined compare-and-branch instructions are available.
    pub const COMPARE_AND_BRANCH: Features = Features(0x0800);

    /// Whether every flag in `other` is present.
    pub fn contains(self, other: Features) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl BitOr for Features {
    type Output = Features;
    fn bitor(self, rhs: Features) -> Features {
        Features(self.0 | rhs.0)
    }
}

/// Per-target lowering, validation, and emission hooks.
///
/// A hook's contract is to translate a generic architectural intent into
/// one or more concrete instruction records, choosing the shortest
/// encoding the platform allows, or to fail with `InvalidInstruction` /
/// `InvalidImmediate` so that the code generator can work around it.
pub trait PlatformOps: Send + Sync {
    /// Native word size of the platform.
    fn native_word_size(&self) -> RegisterSize;

    /// Address word size; defaults to the native word size.
    fn address_word_size(&self) -> RegisterSize {
        self.native_word_size()
    }

    /// Largest local frame a single prologue adjustment can establish.
    fn max_frame_size(&self) -> usize {
        4096
    }

    /// Whether `value` is encodable as the immediate of `op` at the given
    /// operand width. Any literal that fails here is synthesised into a
    /// scratch register by the code generator instead.
    fn validate_immediate(&self, op: Opcode, value: ImmValue, size: RegisterSize) -> bool;

    /// Lower a unary operation.
    fn unary(
        &self,
        platform: &Platform,
        buf: &mut InsnBuffer,
        op: Opcode,
        dest: &SizedRegister,
        src: &SizedRegister,
    ) -> CodegenResult<()>;

    /// Lower a binary register-register operation.
    fn binary(
        &self,
        platform: &Platform,
        buf: &mut InsnBuffer,
        op: Opcode,
        dest: &SizedRegister,
        src1: &SizedRegister,
        src2: &SizedRegister,
        setc: bool,
    ) -> CodegenResult<()>;

    /// Lower a binary operation whose second source is shifted in line.
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
    ) -> CodegenResult<()>;

    /// Lower a binary operation with an immediate second argument.
    fn binary_imm(
        &self,
        platform: &Platform,
        buf: &mut InsnBuffer,
        op: Opcode,
        dest: &SizedRegister,
        src1: &SizedRegister,
        value: ImmValue,
        setc: bool,
    ) -> CodegenResult<()>;

    /// Lower a load of an arbitrary immediate into a register, choosing
    /// between direct, negated, half-word, or literal-pool forms.
    fn move_imm(
        &self,
        platform: &Platform,
        buf: &mut InsnBuffer,
        dest: &SizedRegister,
        value: ImmValue,
    ) -> CodegenResult<()>;

    /// Register number unlocked by an author-toggled generator flag, for
    /// targets that reserve registers by default.
    fn scratch_for(&self, _flag: GenFlag) -> Option<u8> {
        None
    }

    /// Fixed S-box access pointer register, for targets whose table loads
    /// go through a specific register.
    fn sbox_pointer(&self) -> Option<u8> {
        None
    }

    /// Resets per-function auxiliary emission state.
    fn begin_write(&self, _state: &mut EmitState) {}

    /// Renders an embedded table after the function body.
    fn write_table(&self, out: &mut String, code: &CodeGenerator, index: usize, data: &[u8]) {
        use std::fmt::Write;
        let _ = writeln!(out, "\t.section\t.rodata");
        crate::emit::write_table_bytes(
            out,
            &format!(".L{}_sbox{}", code.name(), index),
            data,
        );
        let _ = writeln!(out, "\t.text");
    }

    /// Writes one instruction as assembly text.
    fn write_insn(
        &self,
        out: &mut String,
        state: &mut EmitState,
        code: &CodeGenerator,
        insn: &Insn,
    ) -> CodegenResult<()>;
}

/// Static description of a target.
pub struct Platform {
    name: &'static str,
    features: Features,
    registers: Vec<BasicRegister>,
    arguments: Vec<BasicRegister>,
    sp: BasicRegister,
    ops: Box<dyn PlatformOps>,
}

impl Platform {
    pub(crate) fn new(
        name: &'static str,
        features: Features,
        sp: BasicRegister,
        ops: Box<dyn PlatformOps>,
    ) -> Platform {
        Platform {
            name,
            features,
            registers: Vec::new(),
            arguments: Vec::new(),
            sp,
            ops,
        }
    }

    pub(crate) fn add_basic_register(&mut self, reg: BasicRegister) {
        self.registers.push(reg);
    }

    /// Appends a numbered register to the argument list. The register
    /// must already be in the inventory.
    pub(crate) fn add_argument_register(&mut self, number: u8) {
        if let Some(reg) = self.register_for_number(number) {
            self.arguments.push(reg);
        }
    }

    /// Platform tag, e.g. `"avr5"` or `"armv7m"`.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Feature flags.
    pub fn features(&self) -> Features {
        self.features
    }

    /// Whether the platform has every flag in `feature`.
    pub fn has_feature(&self, feature: Features) -> bool {
        self.features.contains(feature)
    }

    /// Native word size.
    pub fn native_word_size(&self) -> RegisterSize {
        self.ops.native_word_size()
    }

    /// Address word size; may differ from the native word size in
    /// emulation configurations.
    pub fn address_word_size(&self) -> RegisterSize {
        self.ops.address_word_size()
    }

    /// The ordered register inventory. List order is allocation order.
    pub fn registers(&self) -> &[BasicRegister] {
        &self.registers
    }

    /// The ordered argument-register list.
    pub fn arguments(&self) -> &[BasicRegister] {
        &self.arguments
    }

    /// The stack pointer register.
    pub fn stack_pointer(&self) -> &BasicRegister {
        &self.sp
    }

    /// Looks up a register by its low-level number.
    pub fn register_for_number(&self, number: u8) -> Option<BasicRegister> {
        self.registers
            .iter()
            .find(|r| r.number() == number)
            .cloned()
    }

    /// Looks up a register by any of its size-specific names.
    pub fn register_for_name(&self, name: &str) -> Option<SizedRegister> {
        for reg in &self.registers {
            for size in [
                RegisterSize::Bits8,
                RegisterSize::Bits16,
                RegisterSize::Bits32,
                RegisterSize::Bits64,
            ] {
                if reg.has_size(size) && reg.name_for_size(size) == name {
                    return SizedRegister::new(reg.clone(), size).ok();
                }
            }
        }
        None
    }

    /// The lowering and emission hooks.
    pub fn ops(&self) -> &dyn PlatformOps {
        &*self.ops
    }

    /// Whether `value` is encodable as the immediate of `op` at `size`.
    pub fn validate_immediate(&self, op: Opcode, value: ImmValue, size: RegisterSize) -> bool {
        self.ops.validate_immediate(op, value, size)
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("name", &self.name)
            .field("registers", &self.registers.len())
            .field("arguments", &self.arguments.len())
            .finish()
    }
}

static PLATFORMS: OnceLock<Vec<Platform>> = OnceLock::new();

/// The process-wide platform set, built once on first use.
pub fn all_platforms() -> &'static [Platform] {
    PLATFORMS
        .get_or_init(|| {
            vec![
                avr::avr5(),
                arm::armv6(),
                arm::armv6m(),
                arm::armv6m_simulated(),
                arm::armv7m(),
                arm::armv8a(),
            ]
        })
        .as_slice()
}

/// Looks up a platform by tag.
pub fn platform_for_tag(tag: &str) -> Option<&'static Platform> {
    all_platforms().iter().find(|p| p.name() == tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_lookup() {
        assert!(platform_for_tag("avr5").is_some());
        assert!(platform_for_tag("armv7m").is_some());
        assert!(platform_for_tag("armv8a").is_some());
        assert!(platform_for_tag("pdp11").is_none());
    }

    #[test]
    fn test_register_lookup_by_name_and_number() {
        let plat = platform_for_tag("armv7m").unwrap();
        let r0 = plat.register_for_name("r0").unwrap();
        assert_eq!(r0.number(), 0);
        assert_eq!(r0.size(), RegisterSize::Bits32);
        let by_number = plat.register_for_number(0).unwrap();
        assert_eq!(by_number.number(), 0);
    }

    #[test]
    fn test_no_duplicate_register_numbers() {
        for plat in all_platforms() {
            let mut seen = std::collections::HashSet::new();
            for reg in plat.registers() {
                assert!(
                    seen.insert(reg.number()),
                    "duplicate register number {} on {}",
                    reg.number(),
                    plat.name()
                );
            }
        }
    }
}
