//! Register model: physical register descriptors and multi-limb virtual
//! registers.
//!
//! This module is deliberately free of placement decisions. It only
//! describes "this value currently lives in these physical registers, in
//! this limb order, with this many meaningful bits". Placement is done by
//! the code generator against a [`Platform`](crate::platform::Platform).

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use crate::error::{CodegenError, CodegenResult};

/// Sizes that a physical register can be accessed at.
///
/// There may be multiple register names overlapping with each other in the
/// same physical register; e.g. `w9` and `x9` on 64-bit ARM systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RegisterSize {
    Bits8,
    Bits16,
    Bits32,
    Bits64,
}

impl RegisterSize {
    /// Width of the size in bits.
    pub fn bits(self) -> usize {
        match self {
            RegisterSize::Bits8 => 8,
            RegisterSize::Bits16 => 16,
            RegisterSize::Bits32 => 32,
            RegisterSize::Bits64 => 64,
        }
    }

    /// Width of the size in bytes.
    pub fn bytes(self) -> usize {
        self.bits() / 8
    }

    /// Bit in a supported-sizes mask. The mask bits are the widths
    /// themselves, which are conveniently distinct powers of two.
    pub fn mask_bit(self) -> u8 {
        self.bits() as u8
    }

    /// Look up a size from a width in bits.
    pub fn from_bits(bits: usize) -> Option<RegisterSize> {
        match bits {
            8 => Some(RegisterSize::Bits8),
            16 => Some(RegisterSize::Bits16),
            32 => Some(RegisterSize::Bits32),
            64 => Some(RegisterSize::Bits64),
            _ => None,
        }
    }

    /// Mask covering `bits` low bits of a 64-bit word; `value_mask(64)`
    /// is all ones.
    pub fn value_mask(bits: usize) -> u64 {
        if bits >= 64 {
            u64::MAX
        } else {
            (1u64 << bits) - 1
        }
    }
}

/// Capability flags for a physical register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegFlags(pub u16);

impl RegFlags {
    /// No capabilities.
    pub const NONE: RegFlags = RegFlags(0);
    /// Can be used with two-address ALU instructions.
    pub const TWO_ADDRESS: RegFlags = RegFlags(0x0001);
    /// Can be used with three-address ALU instructions.
    pub const THREE_ADDRESS: RegFlags = RegFlags(0x0002);
    /// Register is the stack pointer.
    pub const STACK_POINTER: RegFlags = RegFlags(0x0004);
    /// Register is the program counter.
    pub const PROGRAM_COUNTER: RegFlags = RegFlags(0x0008);
    /// Register is the link register for function call returns.
    pub const LINK: RegFlags = RegFlags(0x0010);
    /// Register can hold addresses to memory.
    pub const ADDRESS: RegFlags = RegFlags(0x0020);
    /// Register can hold general-purpose data for ALU instructions.
    pub const DATA: RegFlags = RegFlags(0x0040);
    /// Register can be used for general storage without ALU support.
    /// Used for high registers on platforms with split register classes.
    pub const STORAGE: RegFlags = RegFlags(0x0080);
    /// Writing a value at a smaller size sign-extends to the larger.
    /// Without this flag, smaller sizes zero-extend.
    pub const SIGN_EXTEND: RegFlags = RegFlags(0x0100);
    /// Register must be saved by the callee.
    pub const CALLEE_SAVED: RegFlags = RegFlags(0x0200);
    /// Register that is fixed to zero; usually combined with NO_ALLOCATE.
    pub const ZERO: RegFlags = RegFlags(0x0400);
    /// Register that may be destroyed by a call or branch. Should only be
    /// used for short-lived values within a block.
    pub const TEMPORARY: RegFlags = RegFlags(0x0800);
    /// Special register that cannot be allocated, such as `sp` or `pc`.
    pub const NO_ALLOCATE: RegFlags = RegFlags(0x1000);
    /// Register may appear as the destination of immediate-operand forms
    /// on targets where only one class accepts immediates.
    pub const IMMEDIATE: RegFlags = RegFlags(0x2000);

    /// Whether every flag in `other` is present in `self`.
    pub fn contains(self, other: RegFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Whether no flags are set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for RegFlags {
    type Output = RegFlags;
    fn bitor(self, rhs: RegFlags) -> RegFlags {
        RegFlags(self.0 | rhs.0)
    }
}

/// Immutable descriptor payload behind a [`BasicRegister`] handle.
#[derive(Debug)]
struct RegInfo {
    number: u8,
    sizes: u8,
    flags: RegFlags,
    name8: String,
    name16: String,
    name32: String,
    name64: String,
    addr_name: String,
}

/// Information about a physical register on the platform.
///
/// Descriptors are value-shared: a `BasicRegister` is a cheap-clone handle
/// to an immutable record. Platforms hand out many references and never
/// mutate after construction; to "change" a register, rebuild it.
#[derive(Debug, Clone)]
pub struct BasicRegister(Arc<RegInfo>);

impl BasicRegister {
    fn build(
        number: u8,
        sizes: u8,
        flags: RegFlags,
        names: [&str; 4],
    ) -> BasicRegister {
        BasicRegister(Arc::new(RegInfo {
            number,
            sizes,
            flags,
            name8: names[0].to_string(),
            name16: names[1].to_string(),
            name32: names[2].to_string(),
            name64: names[3].to_string(),
            addr_name: String::new(),
        }))
    }

    /// Constructs an 8-bit-only register.
    pub fn reg8(number: u8, name: &str, flags: RegFlags) -> BasicRegister {
        Self::build(number, RegisterSize::Bits8.mask_bit(), flags, [name, "", "", ""])
    }

    /// Constructs a 16-bit-only register.
    pub fn reg16(number: u8, name: &str, flags: RegFlags) -> BasicRegister {
        Self::build(number, RegisterSize::Bits16.mask_bit(), flags, ["", name, "", ""])
    }

    /// Constructs a 32-bit-only register.
    pub fn reg32(number: u8, name: &str, flags: RegFlags) -> BasicRegister {
        Self::build(number, RegisterSize::Bits32.mask_bit(), flags, ["", "", name, ""])
    }

    /// Constructs a 64-bit-only register.
    pub fn reg64(number: u8, name: &str, flags: RegFlags) -> BasicRegister {
        Self::build(number, RegisterSize::Bits64.mask_bit(), flags, ["", "", "", name])
    }

    /// Constructs a register with both 32-bit and 64-bit variants.
    pub fn reg3264(
        number: u8,
        name32: &str,
        name64: &str,
        flags: RegFlags,
    ) -> BasicRegister {
        Self::build(
            number,
            RegisterSize::Bits32.mask_bit() | RegisterSize::Bits64.mask_bit(),
            flags,
            ["", "", name32, name64],
        )
    }

    /// Low-level register number, unique within a platform.
    pub fn number(&self) -> u8 {
        self.0.number
    }

    /// Supported sizes as a bitmask of the widths.
    pub fn sizes(&self) -> u8 {
        self.0.sizes
    }

    /// Whether the register supports a specific size.
    pub fn has_size(&self, size: RegisterSize) -> bool {
        (self.0.sizes & size.mask_bit()) != 0
    }

    /// The maximum size supported by this register.
    pub fn max_size(&self) -> RegisterSize {
        if self.has_size(RegisterSize::Bits64) {
            RegisterSize::Bits64
        } else if self.has_size(RegisterSize::Bits32) {
            RegisterSize::Bits32
        } else if self.has_size(RegisterSize::Bits16) {
            RegisterSize::Bits16
        } else {
            RegisterSize::Bits8
        }
    }

    /// Capability flags.
    pub fn flags(&self) -> RegFlags {
        self.0.flags
    }

    /// Whether the register has every flag in `flags`.
    pub fn has_flag(&self, flags: RegFlags) -> bool {
        self.0.flags.contains(flags)
    }

    /// The size-appropriate textual name, or empty when the size is
    /// unsupported.
    pub fn name_for_size(&self, size: RegisterSize) -> &str {
        match size {
            RegisterSize::Bits8 => &self.0.name8,
            RegisterSize::Bits16 => &self.0.name16,
            RegisterSize::Bits32 => &self.0.name32,
            RegisterSize::Bits64 => &self.0.name64,
        }
    }

    /// The name used when the register holds an address.
    ///
    /// Used for "32-on-64" hosting where addressing must use the widest
    /// form of the register. Falls back to the widest available name.
    pub fn address_name(&self) -> &str {
        if !self.0.addr_name.is_empty() {
            return &self.0.addr_name;
        }
        self.name_for_size(self.max_size())
    }

    /// Returns a rebuilt copy carrying a dedicated address-mode name.
    pub fn with_address_name(&self, name: &str) -> BasicRegister {
        BasicRegister(Arc::new(RegInfo {
            number: self.0.number,
            sizes: self.0.sizes,
            flags: self.0.flags,
            name8: self.0.name8.clone(),
            name16: self.0.name16.clone(),
            name32: self.0.name32.clone(),
            name64: self.0.name64.clone(),
            addr_name: name.to_string(),
        }))
    }
}

impl PartialEq for BasicRegister {
    fn eq(&self, other: &BasicRegister) -> bool {
        self.0.number == other.0.number
    }
}

impl Eq for BasicRegister {}

/// A physical register decorated with its chosen access size.
#[derive(Debug, Clone)]
pub struct SizedRegister {
    reg: BasicRegister,
    size: RegisterSize,
}

impl SizedRegister {
    /// Constructs a sized register, checking that the register supports
    /// the requested size.
    pub fn new(reg: BasicRegister, size: RegisterSize) -> CodegenResult<SizedRegister> {
        if !reg.has_size(size) {
            return Err(CodegenError::InvalidRegister(format!(
                "register {} does not support the {}-bit size",
                reg.address_name(),
                size.bits()
            )));
        }
        Ok(SizedRegister { reg, size })
    }

    /// Constructs a sized register at the register's maximum size.
    pub fn max(reg: BasicRegister) -> SizedRegister {
        let size = reg.max_size();
        SizedRegister { reg, size }
    }

    /// The underlying physical register.
    pub fn reg(&self) -> &BasicRegister {
        &self.reg
    }

    /// The chosen access size.
    pub fn size(&self) -> RegisterSize {
        self.size
    }

    /// The size-appropriate name.
    pub fn name(&self) -> &str {
        self.reg.name_for_size(self.size)
    }

    /// The low-level register number.
    pub fn number(&self) -> u8 {
        self.reg.number()
    }
}

impl PartialEq for SizedRegister {
    fn eq(&self, other: &SizedRegister) -> bool {
        self.reg.number() == other.reg.number() && self.size == other.size
    }
}

impl Eq for SizedRegister {}

impl fmt::Display for SizedRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// An arbitrary-width register value stored in one or more equally-sized
/// physical registers.
///
/// Instances do not need to be multiples of the native word size; an
/// 8-bit, 24-bit, or 200-bit register can be built on any platform. The
/// code generator ensures that left-over high bits beyond [`Reg::size`]
/// are either known zero ([`Reg::zero_fill`]) or masked off by following
/// operations.
#[derive(Debug, Clone, Default)]
pub struct Reg {
    regs: Vec<SizedRegister>,
    size: usize,
    full_size: usize,
    zero_fill: bool,
}

impl Reg {
    /// Constructs an empty register with zero bits.
    pub fn new() -> Reg {
        Reg {
            regs: Vec::new(),
            size: 0,
            full_size: 0,
            zero_fill: true,
        }
    }

    /// Constructs a register from a single sized register.
    pub fn from_sized(reg: SizedRegister) -> Reg {
        let bits = reg.size().bits();
        Reg {
            regs: vec![reg],
            size: bits,
            full_size: bits,
            zero_fill: true,
        }
    }

    /// Constructs a register from a basic register at a specific size.
    pub fn from_basic(reg: BasicRegister, size: RegisterSize) -> CodegenResult<Reg> {
        Ok(Reg::from_sized(SizedRegister::new(reg, size)?))
    }

    /// Significant bit count of the value.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Total bit capacity over all limbs.
    pub fn full_size(&self) -> usize {
        self.full_size
    }

    /// Whether this register has no members.
    pub fn is_null(&self) -> bool {
        self.size == 0
    }

    /// Width in bits of a single limb, or zero when empty.
    pub fn limb_size(&self) -> usize {
        self.regs.first().map_or(0, |r| r.size().bits())
    }

    /// Whether bits `size..full_size` are guaranteed zero.
    pub fn zero_fill(&self) -> bool {
        self.zero_fill
    }

    /// Sets the zero-fill guarantee.
    pub fn set_zero_fill(&mut self, zero_fill: bool) {
        self.zero_fill = zero_fill;
    }

    /// Restricts the significant size of the value.
    ///
    /// The size must stay within the extent of the most significant limb:
    /// `full_size - limb_size < size <= full_size`.
    pub fn set_size(&mut self, size: usize) -> CodegenResult<()> {
        if size > self.full_size || size + self.limb_size() <= self.full_size {
            return Err(CodegenError::InvalidRegister(format!(
                "size {} is invalid for a register of {} bits",
                size, self.full_size
            )));
        }
        self.size = size;
        Ok(())
    }

    /// Adds a limb, least significant first.
    ///
    /// Fails when the register already appears in this value or when the
    /// limb width differs from the existing limbs.
    pub fn add_register(&mut self, reg: SizedRegister) -> CodegenResult<()> {
        if self.regs.iter().any(|r| r.number() == reg.number()) {
            return Err(CodegenError::InvalidRegister(format!(
                "{} appears twice in a Reg value",
                reg.name()
            )));
        }
        if let Some(first) = self.regs.first() {
            if first.size() != reg.size() {
                return Err(CodegenError::InvalidRegister(format!(
                    "{} is not the same width as other limbs such as {}",
                    reg.name(),
                    first.name()
                )));
            }
        }
        let bits = reg.size().bits();
        self.regs.push(reg);
        self.size += bits;
        self.full_size += bits;
        Ok(())
    }

    /// Number of limbs.
    pub fn num_regs(&self) -> usize {
        self.regs.len()
    }

    /// A specific limb, index 0 being least significant.
    pub fn reg(&self, index: usize) -> &SizedRegister {
        &self.regs[index]
    }

    /// The low-level register number of a limb.
    pub fn number(&self, index: usize) -> u8 {
        self.regs[index].number()
    }

    /// The textual name of a limb.
    pub fn name(&self, index: usize) -> &str {
        self.regs[index].name()
    }

    /// The limbs in reversed order, switching between little- and
    /// big-endian layouts.
    ///
    /// Only a register whose value occupies every limb bit can be
    /// reversed.
    pub fn reversed(&self) -> CodegenResult<Reg> {
        if self.size != self.full_size {
            return Err(CodegenError::InvalidRegister(
                "cannot reverse an odd-sized register".into(),
            ));
        }
        let mut result = self.clone();
        result.regs.reverse();
        Ok(result)
    }

    /// A subset of this register.
    ///
    /// `start` must fall on a limb boundary; `len == 0` selects everything
    /// from `start` to the end. When the subset stops short of the end,
    /// `len` must also be limb-aligned. The limb range is half-open.
    pub fn subset(&self, start: usize, len: usize) -> CodegenResult<Reg> {
        let mut len = if len == 0 { self.size } else { len };
        if self.regs.is_empty() || start >= self.size {
            return Ok(Reg::new());
        }
        if start + len > self.size {
            len = self.size - start;
        }
        let limb = self.limb_size();
        if start % limb != 0 {
            return Err(CodegenError::InvalidRegister(format!(
                "start of subset is not a multiple of {}",
                limb
            )));
        }
        let mut result = Reg::new();
        if start + len < self.size {
            if len % limb != 0 {
                return Err(CodegenError::InvalidRegister(format!(
                    "length of subset is not a multiple of {}",
                    limb
                )));
            }
            result.regs = self.regs[start / limb..(start + len) / limb].to_vec();
            result.size = len;
            result.full_size = len;
            result.zero_fill = true;
        } else {
            result.regs = self.regs[start / limb..].to_vec();
            result.size = self.size - start;
            result.full_size = self.full_size - start;
            result.zero_fill = self.zero_fill;
        }
        Ok(result)
    }

    /// The `len` least significant bits of this register.
    pub fn reduce(&self, len: usize) -> CodegenResult<Reg> {
        self.subset(0, len)
    }

    /// Limb order rotated towards the least significant end by `limbs`
    /// positions: the limb previously at index `limbs` becomes index 0.
    ///
    /// Renumbering emits no code; it is how the code generator realises
    /// whole-limb rotations.
    pub(crate) fn rotated_right_limbs(&self, limbs: usize) -> Reg {
        let n = self.regs.len();
        if n == 0 {
            return Reg::new();
        }
        let k = limbs % n;
        let mut result = self.clone();
        result.regs.clear();
        result.regs.extend_from_slice(&self.regs[k..]);
        result.regs.extend_from_slice(&self.regs[..k]);
        result
    }

    /// Whether any limb uses the given register number.
    pub fn uses_number(&self, number: u8) -> bool {
        self.regs.iter().any(|r| r.number() == number)
    }
}

impl PartialEq for Reg {
    fn eq(&self, other: &Reg) -> bool {
        self.size == other.size
            && self.full_size == other.full_size
            && self.regs == other.regs
    }
}

impl Eq for Reg {}

#[cfg(test)]
mod tests {
    use super::*;

    fn data8(number: u8) -> BasicRegister {
        BasicRegister::reg8(number, &format!("r{}", number), RegFlags::DATA)
    }

    fn reg_of(numbers: &[u8]) -> Reg {
        let mut reg = Reg::new();
        for &n in numbers {
            reg.add_register(SizedRegister::max(data8(n))).unwrap();
        }
        reg
    }

    #[test]
    fn test_sized_register_rejects_bad_size() {
        let r = data8(4);
        assert!(SizedRegister::new(r.clone(), RegisterSize::Bits8).is_ok());
        assert!(SizedRegister::new(r, RegisterSize::Bits32).is_err());
    }

    #[test]
    fn test_duplicate_limb_rejected() {
        let mut reg = reg_of(&[2, 3]);
        let err = reg.add_register(SizedRegister::max(data8(2)));
        assert!(err.is_err());
    }

    #[test]
    fn test_mixed_limb_width_rejected() {
        let mut reg = reg_of(&[2]);
        let wide = BasicRegister::reg16(30, "X", RegFlags::ADDRESS);
        assert!(reg.add_register(SizedRegister::max(wide)).is_err());
    }

    #[test]
    fn test_set_size_bounds() {
        let mut reg = reg_of(&[2, 3, 4]);
        assert_eq!(reg.full_size(), 24);
        assert!(reg.set_size(17).is_ok());
        assert!(reg.set_size(24).is_ok());
        assert!(reg.set_size(16).is_err());
        assert!(reg.set_size(25).is_err());
    }

    #[test]
    fn test_reversed_round_trip() {
        let reg = reg_of(&[2, 3, 4, 5]);
        let rev = reg.reversed().unwrap();
        assert_eq!(rev.number(0), 5);
        assert_eq!(rev.reversed().unwrap(), reg);
    }

    #[test]
    fn test_reversed_rejects_odd_size() {
        let mut reg = reg_of(&[2, 3]);
        reg.set_size(12).unwrap();
        assert!(reg.reversed().is_err());
    }

    #[test]
    fn test_subset_identity() {
        let reg = reg_of(&[2, 3, 4]);
        let sub = reg.subset(0, reg.size()).unwrap();
        assert_eq!(sub, reg);
        assert_eq!(sub.zero_fill(), reg.zero_fill());
    }

    #[test]
    fn test_subset_half_open_limb_range() {
        let reg = reg_of(&[2, 3, 4, 5]);
        let sub = reg.subset(8, 16).unwrap();
        assert_eq!(sub.num_regs(), 2);
        assert_eq!(sub.number(0), 3);
        assert_eq!(sub.number(1), 4);
        assert_eq!(sub.size(), 16);
        assert_eq!(sub.full_size(), 16);
    }

    #[test]
    fn test_subset_to_end() {
        let reg = reg_of(&[2, 3, 4]);
        let sub = reg.subset(16, 0).unwrap();
        assert_eq!(sub.num_regs(), 1);
        assert_eq!(sub.number(0), 4);
    }

    #[test]
    fn test_subset_unaligned_start_rejected() {
        let reg = reg_of(&[2, 3]);
        assert!(reg.subset(4, 8).is_err());
    }

    #[test]
    fn test_rotated_right_limbs() {
        let reg = reg_of(&[2, 3, 4, 5]);
        let rot = reg.rotated_right_limbs(1);
        assert_eq!(rot.number(0), 3);
        assert_eq!(rot.number(3), 2);
        let rot0 = reg.rotated_right_limbs(4);
        assert_eq!(rot0, reg);
    }
}
