//! Test vector file parsing.
//!
//! The format is line-oriented `Key = Value` pairs. A key beginning
//! with `Function` names a generated function the following vectors
//! apply to (several `Function` lines in a row form one group); a key
//! beginning with `Name` starts a new vector. Binary values are hex,
//! case-insensitive, ignoring separators; integer values decode as
//! decimal with a per-caller default.

use std::collections::HashMap;

use log::warn;

/// One named test vector: a bag of key/value fields.
#[derive(Debug, Clone, Default)]
pub struct TestVector {
    fields: HashMap<String, String>,
}

impl TestVector {
    /// Inserts a key/value pair.
    pub fn insert(&mut self, key: &str, value: &str) {
        self.fields.insert(key.to_string(), value.to_string());
    }

    /// The vector's name.
    pub fn name(&self) -> String {
        self.value_as_string("Name")
    }

    /// A field as a string, empty when absent.
    pub fn value_as_string(&self, key: &str) -> String {
        self.fields.get(key).cloned().unwrap_or_default()
    }

    /// A field converted from hex to binary, ignoring separators.
    pub fn value_as_binary(&self, key: &str) -> Vec<u8> {
        let value = self.value_as_string(key);
        let mut result = Vec::new();
        let mut acc = 0u32;
        let mut nibble = false;
        for ch in value.chars() {
            let digit = match ch {
                '0'..='9' => ch as u32 - '0' as u32,
                'A'..='F' => ch as u32 - 'A' as u32 + 10,
                'a'..='f' => ch as u32 - 'a' as u32 + 10,
                _ => continue,
            };
            acc = acc * 16 + digit;
            nibble = !nibble;
            if !nibble {
                result.push(acc as u8);
                acc = 0;
            }
        }
        result
    }

    /// A field as a decimal signed integer with a default.
    pub fn value_as_int(&self, key: &str, default: i64) -> i64 {
        let value = self.value_as_string(key);
        if value.is_empty() {
            default
        } else {
            value.trim().parse().unwrap_or(default)
        }
    }

    /// Whether the vector has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fills `buf` from a binary field; zeroes it and reports false on
    /// a length mismatch.
    pub fn populate(&self, buf: &mut [u8], key: &str) -> bool {
        let data = self.value_as_binary(key);
        if data.len() != buf.len() {
            buf.fill(0);
            return false;
        }
        buf.copy_from_slice(&data);
        true
    }

    /// Compares `buf` against a binary field, reporting a hex diff on
    /// mismatch.
    pub fn check(&self, buf: &[u8], key: &str) -> bool {
        let data = self.value_as_binary(key);
        if data.as_slice() == buf {
            return true;
        }
        warn!("    actual   = {}", hex(buf));
        warn!("    expected = {}", hex(&data));
        false
    }
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02X}", b)).collect()
}

#[derive(Debug, Default)]
struct TestVectorGroup {
    names: Vec<String>,
    vectors: Vec<TestVector>,
}

/// A parsed test vector file: groups of vectors keyed by the function
/// names they apply to.
#[derive(Debug, Default)]
pub struct TestVectorFile {
    groups: Vec<TestVectorGroup>,
}

impl TestVectorFile {
    /// Parses a test vector file from text.
    pub fn parse(text: &str) -> TestVectorFile {
        let mut file = TestVectorFile {
            groups: vec![TestVectorGroup::default()],
        };
        let mut in_group = false;
        for line in text.lines() {
            let Some(pos) = line.find('=') else {
                continue;
            };
            let name = line[..pos].trim();
            let value = line[pos + 1..].trim();
            if name.starts_with("Function") {
                // A function name for the current group, or the start
                // of a new group after vectors have been seen.
                if in_group {
                    file.groups.push(TestVectorGroup::default());
                    in_group = false;
                }
                if let Some(group) = file.groups.last_mut() {
                    group.names.push(value.to_string());
                }
            } else if let Some(group) = file.groups.last_mut() {
                if name.starts_with("Name") || group.vectors.is_empty() {
                    group.vectors.push(TestVector::default());
                }
                if let Some(vector) = group.vectors.last_mut() {
                    vector.insert(name, value);
                }
                in_group = true;
            }
        }
        file
    }

    /// The vectors that apply to a generated function, most recently
    /// declared group first.
    pub fn tests_for(&self, function: &str) -> Vec<TestVector> {
        for group in self.groups.iter().rev() {
            if group.names.iter().any(|n| n == function) {
                return group.vectors.clone();
            }
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Function = alpha_permute
Function = alpha_permute_alt

Name = Alpha #1
Input = 00:01:02:03
Output = aabbccdd
Count = 12

Function = beta_transform

Name = Beta #1
Data = DEADBEEF
";

    #[test]
    fn test_group_lookup() {
        let file = TestVectorFile::parse(SAMPLE);
        let alpha = file.tests_for("alpha_permute");
        assert_eq!(alpha.len(), 1);
        assert_eq!(alpha[0].name(), "Alpha #1");
        let alt = file.tests_for("alpha_permute_alt");
        assert_eq!(alt.len(), 1);
        let beta = file.tests_for("beta_transform");
        assert_eq!(beta.len(), 1);
        assert_eq!(beta[0].value_as_binary("Data"), vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(file.tests_for("gamma").is_empty());
    }

    #[test]
    fn test_hex_parsing_ignores_separators() {
        let file = TestVectorFile::parse(SAMPLE);
        let alpha = file.tests_for("alpha_permute");
        assert_eq!(alpha[0].value_as_binary("Input"), vec![0, 1, 2, 3]);
        assert_eq!(alpha[0].value_as_int("Count", -1), 12);
        assert_eq!(alpha[0].value_as_int("Missing", 7), 7);
    }

    #[test]
    fn test_populate_and_check() {
        let file = TestVectorFile::parse(SAMPLE);
        let alpha = file.tests_for("alpha_permute");
        let mut buf = [0u8; 4];
        assert!(alpha[0].populate(&mut buf, "Input"));
        assert_eq!(buf, [0, 1, 2, 3]);
        assert!(alpha[0].check(&[0xAA, 0xBB, 0xCC, 0xDD], "Output"));
        assert!(!alpha[0].check(&[0, 0, 0, 0], "Output"));
        let mut short = [0u8; 3];
        assert!(!alpha[0].populate(&mut short, "Input"));
    }
}
