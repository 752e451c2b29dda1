//! Assembly text emission.
//!
//! The emitter walks the finalised instruction buffer in scheduled
//! order (applying the per-record displacement hints) and delegates
//! each record to the platform's `write_insn` hook. It frames the
//! output with the function label, emits the embedded S-box tables
//! after the body, and closes with a size directive. No re-optimisation
//! happens here; the generator's decisions are final.

use std::collections::HashMap;
use std::fmt::Write;

use crate::codegen::CodeGenerator;
use crate::error::{CodegenError, CodegenResult};
use crate::insn::Insn;

/// Per-function auxiliary emission state, reset by `begin_write`.
/// Platforms use it to deduplicate directives or prefixes.
#[derive(Debug, Default)]
pub struct EmitState {
    /// Free-form counters keyed by directive name.
    pub notes: HashMap<&'static str, u64>,
}

/// Computes the output order of the buffer, honouring scheduling
/// hints: an instruction with hint `h` is output `h` positions away
/// from its record position.
fn scheduled_order(insns: &[Insn]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..insns.len()).collect();
    for (index, insn) in insns.iter().enumerate() {
        let hint = insn.reschedule();
        if hint == 0 {
            continue;
        }
        if let Some(pos) = order.iter().position(|&x| x == index) {
            order.remove(pos);
            let target = (pos as i64 + hint as i64).clamp(0, order.len() as i64) as usize;
            order.insert(target, index);
        }
    }
    order
}

/// Renders one finalised function, tables included, as assembly text.
pub fn write_function(out: &mut String, code: &CodeGenerator<'_>) -> CodegenResult<()> {
    if !code.is_finalised() {
        return Err(CodegenError::InvalidArgument(
            "cannot emit an unfinalised function".into(),
        ));
    }
    let platform = code.platform();
    let name = code.name();
    let mut state = EmitState::default();
    platform.ops().begin_write(&mut state);

    let type_directive = if platform.name().starts_with("avr") {
        "@function"
    } else {
        "%function"
    };
    let _ = writeln!(out, "\t.align\t2");
    let _ = writeln!(out, "\t.global\t{}", name);
    let _ = writeln!(out, "\t.type\t{}, {}", name, type_directive);
    let _ = writeln!(out, "{}:", name);

    let insns = code.insns().insns();
    for index in scheduled_order(insns) {
        platform
            .ops()
            .write_insn(out, &mut state, code, &insns[index])?;
    }

    for (index, table) in code.sboxes().iter().enumerate() {
        platform.ops().write_table(out, code, index, table);
    }

    let _ = writeln!(out, "\t.size\t{}, .-{}", name, name);
    Ok(())
}

/// Convenience wrapper returning the text of one function.
pub fn emit_function(code: &CodeGenerator<'_>) -> CodegenResult<String> {
    let mut out = String::new();
    write_function(&mut out, code)?;
    Ok(out)
}

/// Default table rendering shared by the platform records.
pub(crate) fn write_table_bytes(out: &mut String, label: &str, data: &[u8]) {
    let _ = writeln!(out, "\t.balign\t256");
    let _ = writeln!(out, "{}:", label);
    for chunk in data.chunks(16) {
        let bytes: Vec<String> = chunk.iter().map(|b| format!("{}", b)).collect();
        let _ = writeln!(out, "\t.byte\t{}", bytes.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::{Insn, Opcode};

    #[test]
    fn test_scheduling_hints_reorder() {
        let mut insns = vec![
            Insn::bare(Opcode::Nop),
            Insn::bare(Opcode::Println),
            Insn::bare(Opcode::Nop),
            Insn::bare(Opcode::Nop),
        ];
        // Move the second instruction two slots later.
        insns[1].set_reschedule(2);
        let order = scheduled_order(&insns);
        assert_eq!(order, vec![0, 2, 3, 1]);

        // And one slot earlier.
        insns[1].set_reschedule(-1);
        let order = scheduled_order(&insns);
        assert_eq!(order, vec![1, 0, 2, 3]);
    }

    #[test]
    fn test_scheduling_without_hints_is_identity() {
        let insns = vec![Insn::bare(Opcode::Nop); 5];
        assert_eq!(scheduled_order(&insns), vec![0, 1, 2, 3, 4]);
    }
}
