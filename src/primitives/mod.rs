//! Primitive generators.
//!
//! Each module expresses one cryptographic primitive in the register
//! algebra of the code generator and registers `(generator, test)`
//! pairs with the global registry. The generators are clients of the
//! compiler core: they allocate virtual registers, emit structured
//! operations, and let the framework handle decomposition, rotation
//! lowering, and calling conventions. The test handlers drive the
//! interpreter against test vectors.

pub mod aes;
pub mod ascon;
pub mod keccak;
pub mod sha256;
pub mod tinyjambu;
pub mod xoodoo;

use crate::registry::Registry;

/// Registers every built-in primitive. Called once by the registry's
/// one-shot initialiser.
pub(crate) fn register_all(registry: &mut Registry) {
    aes::register(registry);
    ascon::register(registry);
    keccak::register(registry);
    sha256::register(registry);
    tinyjambu::register(registry);
    xoodoo::register(registry);
}
