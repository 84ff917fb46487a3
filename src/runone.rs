//! Run a single test case.

use crate::compare::{FieldVerdict, LineVerdict, Mismatch, compare_line};
use crate::decoder::{ByteCursor, DecoderAdapter, format_bytes};
use crate::predicate::PredicateState;
use crate::report::CaseVerdict;
use crate::testfile::TestCase;

/// Decode every line of `case` in order and compare each against its expectation.
///
/// Lines share one byte cursor and one predicate state. A decode failure ends the case:
/// with the cursor stuck, nothing after it can be decoded meaningfully.
pub fn run_case(case: &TestCase, adapter: &DecoderAdapter, fp_tolerance: f64) -> CaseVerdict {
    let mut verdict = CaseVerdict {
        id: case.id.clone(),
        description: case.description.clone(),
        lines: Vec::with_capacity(case.lines.len()),
        expected_lines: case.lines.len(),
    };

    let context = match adapter.context(&case.directive) {
        Ok(context) => context,
        Err(e) => {
            verdict.lines.push(LineVerdict::failed(Mismatch::new(
                "decoder",
                case.directive.to_string(),
                e.to_string(),
            )));
            log::info!("{}: no decoder: {}", case.id, e);
            return verdict;
        }
    };

    let mut cursor = ByteCursor::new();
    let mut state = PredicateState::Idle;
    for (i, line) in case.lines.iter().enumerate() {
        let mut insn = match context.decode(&case.bytes, &mut cursor) {
            Ok(insn) => insn,
            Err(e) => {
                log::info!(
                    "{}: line {}: failed to decode {}: {}",
                    case.id,
                    line.location,
                    format_bytes(case.line_bytes(i)),
                    e
                );
                verdict.lines.push(LineVerdict::failed(Mismatch::new(
                    "decode",
                    &line.text,
                    e.to_string(),
                )));
                break;
            }
        };

        let (next, carried) = state.advance(case.directive.arch, &mut insn);
        state = next;

        let mut line_verdict = compare_line(line, &insn, fp_tolerance);
        if let Some(m) = carried {
            // An asserted `Code condition` may already have failed on the same value.
            let reported = line_verdict
                .checks
                .iter()
                .any(|(field, v)| *field == m.field && matches!(v, FieldVerdict::Mismatch(_)));
            if !reported {
                line_verdict.record_mismatch(m);
            }
        }
        verdict.lines.push(line_verdict);
    }

    if verdict.passed() {
        log::info!("{}: ok", case.id);
    } else if let Some((i, m)) = verdict.first_mismatch() {
        log::info!("{}: line {}: {}", case.id, case.lines[i].location, m);
    }
    verdict
}
