//! Field comparison between an expected line and a decoded instruction.
//!
//! Only what the fixture asserts is checked. The expected text and the consumed size are
//! always checked, followed by every recognized field clause in fixture order.

use crate::decoder::{DecodedInstruction, MemOperand, Operand, OperandKind};
use crate::fields::{FieldKey, FieldValue, OperandField, OperandType, format_int};
use crate::parser::normalize_text;
use crate::testfile::ExpectedLine;
use serde_derive::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Default tolerance for floating point operands.
pub const DEFAULT_FP_TOLERANCE: f64 = 1e-6;

/// Rendering of a field the decoder did not report.
const ABSENT: &str = "<absent>";

/// An expected value that the decoder did not reproduce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub field: String,
    pub expected: String,
    pub actual: String,
}

impl Mismatch {
    pub fn new(
        field: impl fmt::Display,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self {
            field: field.to_string(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}: expected {}, actual {}",
            self.field, self.expected, self.actual
        )
    }
}

/// Outcome of checking one field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldVerdict {
    Match,
    Mismatch(Mismatch),
    /// The fixture mentions the field but the harness has no rule to check it.
    NotAsserted,
}

/// Outcome of checking one line.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LineVerdict {
    /// `(field name, verdict)` in evaluation order.
    pub checks: Vec<(String, FieldVerdict)>,
}

impl LineVerdict {
    /// A line whose decode failed outright.
    pub fn failed(mismatch: Mismatch) -> Self {
        let mut v = Self::default();
        v.record_mismatch(mismatch);
        v
    }

    /// Record the verdict for `field`. A mismatch is labelled with the field name.
    pub fn record(&mut self, field: impl fmt::Display, verdict: FieldVerdict) {
        let field = field.to_string();
        let verdict = match verdict {
            FieldVerdict::Mismatch(m) => FieldVerdict::Mismatch(Mismatch {
                field: field.clone(),
                ..m
            }),
            v => v,
        };
        self.checks.push((field, verdict));
    }

    pub fn record_mismatch(&mut self, mismatch: Mismatch) {
        let field = mismatch.field.clone();
        self.checks.push((field, FieldVerdict::Mismatch(mismatch)));
    }

    pub fn passed(&self) -> bool {
        self.first_mismatch().is_none()
    }

    pub fn first_mismatch(&self) -> Option<&Mismatch> {
        self.checks.iter().find_map(|(_, v)| match v {
            FieldVerdict::Mismatch(m) => Some(m),
            _ => None,
        })
    }
}

/// Compare `actual` against everything `expected` asserts.
///
/// A line without field clauses is judged on its text alone. Once a line asserts a field,
/// the decoder must also have consumed exactly the bytes the line declared.
pub fn compare_line(
    expected: &ExpectedLine,
    actual: &DecodedInstruction,
    fp_tolerance: f64,
) -> LineVerdict {
    let mut verdict = LineVerdict::default();

    let text = normalize_text(&actual.text());
    verdict.record("text", check(&expected.text, &text, expected.text == text));

    if !expected.fields.is_empty() {
        let size = expected.byte_len();
        verdict.record("size", check(size, actual.size, size == actual.size));
    }

    for (key, value) in &expected.fields {
        let v = compare_field(*key, value, actual, fp_tolerance);
        verdict.record(key, v);
    }
    for (key, _) in &expected.unrecognized {
        verdict.record(key, FieldVerdict::NotAsserted);
    }
    verdict
}

fn check(expected: impl fmt::Display, actual: impl fmt::Display, ok: bool) -> FieldVerdict {
    if ok {
        FieldVerdict::Match
    } else {
        FieldVerdict::Mismatch(Mismatch {
            field: String::new(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

fn compare_field(
    key: FieldKey,
    expected: &FieldValue,
    actual: &DecodedInstruction,
    tol: f64,
) -> FieldVerdict {
    match key {
        FieldKey::OpCount => compare_int(expected, Some(actual.operands.len() as i64)),
        FieldKey::Operand(i, field) => {
            compare_operand(field, expected, actual.operands.get(i), tol)
        }
        FieldKey::WriteBack => compare_bool(expected, actual.writeback),
        FieldKey::UpdateFlags => compare_bool(expected, actual.update_flags),
        FieldKey::CodeCondition => compare_int(expected, actual.code_condition.map(i64::from)),
        FieldKey::PredicateMask => compare_int(expected, actual.predicate_mask.map(i64::from)),
        FieldKey::CpsiMode => compare_int(expected, actual.cps_mode.map(i64::from)),
        FieldKey::CpsiFlag => compare_int(expected, actual.cps_flag.map(i64::from)),
        FieldKey::MemoryBarrier => compare_int(expected, actual.memory_barrier.map(i64::from)),
        FieldKey::Shift => match (expected, actual.shift) {
            (FieldValue::Shift(e), Some(a)) => {
                let ok = e.kind == a.kind && (e.value.is_none() || e.value == a.value);
                check(e, a, ok)
            }
            (e, None) => check(e, ABSENT, false),
            (e, Some(a)) => check(e, a, false),
        },
        FieldKey::RegistersRead => compare_names(expected, &actual.regs_read, true),
        FieldKey::RegistersModified => compare_names(expected, &actual.regs_modified, true),
        FieldKey::Groups => compare_names(expected, &actual.groups, false),
    }
}

fn compare_int(expected: &FieldValue, actual: Option<i64>) -> FieldVerdict {
    match actual {
        Some(a) => check(expected, format_int(a), *expected == FieldValue::Int(a)),
        None => check(expected, ABSENT, false),
    }
}

fn compare_bool(expected: &FieldValue, actual: Option<bool>) -> FieldVerdict {
    match actual {
        Some(a) => check(expected, FieldValue::Bool(a), *expected == FieldValue::Bool(a)),
        None => check(expected, ABSENT, false),
    }
}

fn compare_names(expected: &FieldValue, actual: &[String], fold_case: bool) -> FieldVerdict {
    let fold = |s: &str| {
        if fold_case {
            s.to_ascii_lowercase()
        } else {
            s.to_string()
        }
    };
    let FieldValue::Names(names) = expected else {
        return check(expected, actual.join(" "), false);
    };
    let e: BTreeSet<String> = names.iter().map(|n| fold(n)).collect();
    let a: BTreeSet<String> = actual.iter().map(|n| fold(n)).collect();
    let rendered = a.iter().map(String::as_str).collect::<Vec<_>>().join(" ");
    check(expected, rendered, e == a)
}

fn fp_eq(e: f64, a: f64, tol: f64) -> bool {
    let scale = e.abs().max(a.abs()).max(1.0);
    (e - a).abs() <= tol * scale
}

fn regs_eq(e: &str, a: &str) -> bool {
    e.eq_ignore_ascii_case(a)
}

fn render_kind(kind: &OperandKind) -> String {
    match kind {
        OperandKind::Reg(r) => OperandType::Reg(r.clone()).to_string(),
        OperandKind::Imm(n) => OperandType::Imm(*n).to_string(),
        OperandKind::Fp(x) => OperandType::Fp(*x).to_string(),
        OperandKind::Mem(_) => OperandType::Mem.to_string(),
    }
}

fn compare_operand(
    field: OperandField,
    expected: &FieldValue,
    actual: Option<&Operand>,
    tol: f64,
) -> FieldVerdict {
    let Some(op) = actual else {
        return check(expected, ABSENT, false);
    };
    match field {
        OperandField::Type => {
            let ok = match (expected, &op.kind) {
                (FieldValue::Operand(OperandType::Reg(e)), OperandKind::Reg(a)) => regs_eq(e, a),
                (FieldValue::Operand(OperandType::Imm(e)), OperandKind::Imm(a)) => e == a,
                (FieldValue::Operand(OperandType::Fp(e)), OperandKind::Fp(a)) => {
                    fp_eq(*e, *a, tol)
                }
                (FieldValue::Operand(OperandType::Mem), OperandKind::Mem(_)) => true,
                _ => false,
            };
            check(expected, render_kind(&op.kind), ok)
        }
        OperandField::Access => {
            let ok = *expected == FieldValue::Access(op.access);
            check(expected, op.access, ok)
        }
        _ => {
            let OperandKind::Mem(mem) = &op.kind else {
                return check(expected, format!("{} operand", op.kind.tag()), false);
            };
            compare_mem(field, expected, mem)
        }
    }
}

fn compare_mem(field: OperandField, expected: &FieldValue, mem: &MemOperand) -> FieldVerdict {
    let reg = |actual: &Option<String>| match (expected, actual) {
        (FieldValue::Reg(e), Some(a)) => {
            check(expected, FieldValue::Reg(a.clone()), regs_eq(e, a))
        }
        (_, Some(a)) => check(expected, FieldValue::Reg(a.clone()), false),
        (_, None) => check(expected, ABSENT, false),
    };
    match field {
        OperandField::MemBase => reg(&mem.base),
        OperandField::MemIndex => reg(&mem.index),
        OperandField::MemDisp => compare_int(expected, Some(mem.disp)),
        OperandField::MemScale => compare_int(expected, Some(mem.scale)),
        OperandField::MemLshift => compare_int(expected, Some(mem.lshift)),
        OperandField::Type | OperandField::Access => FieldVerdict::NotAsserted,
    }
}
