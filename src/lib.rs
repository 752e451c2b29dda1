//! gencrypto - guided compilation of cryptographic primitives.
//!
//! gencrypto lets an author describe a cipher or permutation with
//! high-level operations on multi-word virtual registers and have the
//! framework emit target assembly while verifying functional
//! correctness through an in-process interpreter. Primitives are
//! expressed once, in a declarative register-algebra form; the
//! framework handles register allocation, stack-frame layout, calling
//! conventions, byte and word decomposition, rotation lowering, S-box
//! materialisation, masked-share bookkeeping, and assembly emission.
//!
//! # Primary usage
//!
//! ```ignore
//! use gencrypto::platform::platform_for_tag;
//! use gencrypto::codegen::CodeGenerator;
//! use gencrypto::interp::Interpreter;
//!
//! let platform = platform_for_tag("armv7m").unwrap();
//! let mut code = CodeGenerator::new(platform);
//! let state = code.prologue_permutation("my_permute", 0)?;
//! // ... structured emission on virtual registers ...
//! code.finalise()?;
//!
//! // Validate against a known answer, or render assembly text.
//! Interpreter::new(&code).exec_permutation(&mut bytes, None)?;
//! let text = gencrypto::emit::emit_function(&code)?;
//! ```
//!
//! # Architecture
//!
//! - [`regs`] - physical register descriptors and multi-limb values
//! - [`insn`] - virtual instruction records and the per-function buffer
//! - [`platform`] - target descriptions: inventory, features, lowering
//!   hooks, immediate-legality rules (avr5 and the ARM family)
//! - [`codegen`] - the per-function code generator and verb layer
//! - [`interp`] - the KAT interpreter and its drivers
//! - [`emit`] - assembly text emission
//! - [`registry`] - the process-wide function registration table
//! - [`testvector`] - the `Key = Value` vector file format
//! - [`primitives`] - the built-in primitive generators

pub mod codegen;
pub mod emit;
pub mod error;
pub mod insn;
pub mod interp;
pub mod platform;
pub mod primitives;
pub mod registry;
pub mod regs;
pub mod testvector;

pub use codegen::{ArgType, CodeGenerator, GenFlag, MaskedReg};
pub use error::{CodegenError, CodegenResult};
pub use insn::{Insn, InsnBuffer, Label, Opcode};
pub use interp::Interpreter;
pub use platform::{platform_for_tag, Features, Platform};
pub use registry::{Registration, Registry};
pub use regs::{BasicRegister, Reg, RegFlags, RegisterSize, SizedRegister};
pub use testvector::{TestVector, TestVectorFile};
