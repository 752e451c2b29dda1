//! Function registration.
//!
//! Each primitive contributes entries of `(name, variant, platform,
//! generator, test)`. The fully qualified name is
//! `name[:variant][:platform]`. The process-wide table is built once
//! behind a one-shot initialiser and handed out as an immutable
//! snapshot; listing uses lexicographic order on (name, variant,
//! platform).

use std::sync::OnceLock;

use log::{info, warn};

use crate::codegen::CodeGenerator;
use crate::error::{CodegenError, CodegenResult};
use crate::platform::platform_for_tag;
use crate::testvector::{TestVector, TestVectorFile};

/// Builds the body of one function into a fresh generator.
pub type GenerateFn = fn(&mut CodeGenerator<'static>) -> CodegenResult<()>;

/// Validates one test vector against a finalised function.
pub type TestFn = fn(&CodeGenerator<'static>, &TestVector) -> CodegenResult<bool>;

/// One registered function generator.
#[derive(Clone)]
pub struct Registration {
    name: &'static str,
    variant: Option<&'static str>,
    platform: &'static str,
    generate: GenerateFn,
    test: Option<TestFn>,
}

impl Registration {
    /// The base function name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The variant, when one exists.
    pub fn variant(&self) -> Option<&'static str> {
        self.variant
    }

    /// The platform tag.
    pub fn platform_tag(&self) -> &'static str {
        self.platform
    }

    /// `name[:variant][:platform]`.
    pub fn qualified_name(&self) -> String {
        let mut qual = self.name.to_string();
        if let Some(variant) = self.variant {
            qual.push(':');
            qual.push_str(variant);
        }
        qual.push(':');
        qual.push_str(self.platform);
        qual
    }

    /// Generates and finalises the function.
    pub fn build(&self) -> CodegenResult<CodeGenerator<'static>> {
        let platform = platform_for_tag(self.platform).ok_or_else(|| {
            CodegenError::InvalidArgument(format!("unknown platform tag {}", self.platform))
        })?;
        let mut code = CodeGenerator::new(platform);
        (self.generate)(&mut code)?;
        code.finalise()?;
        Ok(code)
    }

    /// Runs every applicable vector from `file`, returning
    /// `(passed, failed)` counts.
    pub fn run_tests(&self, file: &TestVectorFile) -> CodegenResult<(usize, usize)> {
        let test = match self.test {
            Some(test) => test,
            None => return Ok((0, 0)),
        };
        let code = self.build()?;
        let mut passed = 0;
        let mut failed = 0;
        for vector in file.tests_for(self.name) {
            let ok = test(&code, &vector)?;
            if ok {
                info!("{} [{}]: ok", self.qualified_name(), vector.name());
                passed += 1;
            } else {
                warn!("{} [{}]: FAILED", self.qualified_name(), vector.name());
                failed += 1;
            }
        }
        Ok((passed, failed))
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.qualified_name())
            .field("has_test", &self.test.is_some())
            .finish()
    }
}

/// The registration table.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<Registration>,
}

impl Registry {
    /// Adds one entry. Only called during the one-shot build.
    pub fn register(
        &mut self,
        name: &'static str,
        variant: Option<&'static str>,
        platform: &'static str,
        generate: GenerateFn,
        test: Option<TestFn>,
    ) {
        self.entries.push(Registration {
            name,
            variant,
            platform,
            generate,
            test,
        });
    }

    /// All entries in lexicographic (name, variant, platform) order.
    pub fn entries(&self) -> &[Registration] {
        &self.entries
    }

    /// Looks up an entry by its fully qualified name.
    pub fn find(&self, qualified: &str) -> Option<&Registration> {
        self.entries.iter().find(|e| e.qualified_name() == qualified)
    }

    /// The process-wide registry snapshot, built on first use.
    pub fn global() -> &'static Registry {
        static REGISTRY: OnceLock<Registry> = OnceLock::new();
        REGISTRY.get_or_init(|| {
            let mut registry = Registry::default();
            crate::primitives::register_all(&mut registry);
            registry
                .entries
                .sort_by_key(|e| (e.name, e.variant, e.platform));
            registry
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_registry_is_sorted_and_stable() {
        let registry = Registry::global();
        let names: Vec<String> = registry
            .entries()
            .iter()
            .map(|e| e.qualified_name())
            .collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(!names.is_empty());
    }

    #[test]
    fn test_find_by_qualified_name() {
        let registry = Registry::global();
        let first = &registry.entries()[0];
        let found = registry.find(&first.qualified_name());
        assert!(found.is_some());
        assert!(registry.find("no_such_function:armv7m").is_none());
    }
}
