//! The field registry.
//!
//! Assertion lines carry optional `; key: value` clauses after the expected text. Each
//! recognized key maps to a `FieldKey` and has a fixed value grammar; the parsed value
//! is a `FieldValue` which the comparator later matches against a decoded instruction.
//!
//! Keys are matched case-insensitively with whitespace runs collapsed. A small synonym
//! table absorbs known misspellings found in existing fixtures; matching through it is
//! reported as a warning so the fixture can be fixed.

use crate::decoder::{Access, Shift};
use crate::error::{Location, ParseError, ParseResult};
use std::collections::BTreeSet;
use std::fmt;

/// Sub-field of one operand, as in `operands[2].mem.disp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandField {
    Type,
    Access,
    MemBase,
    MemIndex,
    MemDisp,
    MemScale,
    MemLshift,
}

impl OperandField {
    fn suffix(self) -> &'static str {
        match self {
            Self::Type => "type",
            Self::Access => "access",
            Self::MemBase => "mem.base",
            Self::MemIndex => "mem.index",
            Self::MemDisp => "mem.disp",
            Self::MemScale => "mem.scale",
            Self::MemLshift => "mem.lshift",
        }
    }

    fn from_suffix(s: &str) -> Option<Self> {
        Some(match s {
            "type" => Self::Type,
            "access" => Self::Access,
            "mem.base" => Self::MemBase,
            "mem.index" => Self::MemIndex,
            "mem.disp" => Self::MemDisp,
            "mem.scale" => Self::MemScale,
            "mem.lshift" => Self::MemLshift,
            _ => return None,
        })
    }
}

/// A recognized assertion key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKey {
    OpCount,
    Operand(usize, OperandField),
    WriteBack,
    UpdateFlags,
    CodeCondition,
    PredicateMask,
    CpsiMode,
    CpsiFlag,
    MemoryBarrier,
    Shift,
    RegistersRead,
    RegistersModified,
    Groups,
}

const SCALAR_KEYS: &[(&str, FieldKey)] = &[
    ("op_count", FieldKey::OpCount),
    ("write-back", FieldKey::WriteBack),
    ("update-flags", FieldKey::UpdateFlags),
    ("code condition", FieldKey::CodeCondition),
    ("predicate mask", FieldKey::PredicateMask),
    ("cpsi-mode", FieldKey::CpsiMode),
    ("cpsi-flag", FieldKey::CpsiFlag),
    ("memory-barrier", FieldKey::MemoryBarrier),
    ("shift", FieldKey::Shift),
    ("registers read", FieldKey::RegistersRead),
    ("registers modified", FieldKey::RegistersModified),
    ("groups", FieldKey::Groups),
];

/// Misspellings seen in fixtures, mapped to the key they meant.
const SYNONYMS: &[(&str, FieldKey)] = &[
    ("registers midified", FieldKey::RegistersModified),
    ("registers written", FieldKey::RegistersModified),
    ("writeback", FieldKey::WriteBack),
];

/// Result of looking up a key in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyMatch {
    pub key: FieldKey,
    /// The key was only recognized through the synonym table.
    pub via_synonym: bool,
}

impl FieldKey {
    /// Look up `text` in the registry.
    pub fn lookup(text: &str) -> Option<KeyMatch> {
        let norm = normalize_key(text);
        if let Some(key) = parse_operand_key(&norm) {
            return Some(KeyMatch {
                key,
                via_synonym: false,
            });
        }
        if let Some(&(_, key)) = SCALAR_KEYS.iter().find(|(n, _)| *n == norm) {
            return Some(KeyMatch {
                key,
                via_synonym: false,
            });
        }
        SYNONYMS
            .iter()
            .find(|(n, _)| *n == norm)
            .map(|&(_, key)| KeyMatch {
                key,
                via_synonym: true,
            })
    }

    /// Parse the raw value of a clause with this key.
    pub fn parse_value(
        self,
        raw: &str,
        loc: Location,
        warnings: &mut Vec<ParseError>,
    ) -> ParseResult<FieldValue> {
        let raw = raw.trim();
        match self {
            Self::OpCount
            | Self::CodeCondition
            | Self::PredicateMask
            | Self::CpsiMode
            | Self::CpsiFlag
            | Self::MemoryBarrier
            | Self::Operand(_, OperandField::MemDisp)
            | Self::Operand(_, OperandField::MemScale)
            | Self::Operand(_, OperandField::MemLshift) => match parse_int(raw) {
                Some(n) => Ok(FieldValue::Int(n)),
                None => err!(loc, "{}: expected an integer, got '{}'", self, raw),
            },
            Self::WriteBack | Self::UpdateFlags => match parse_bool(raw) {
                Some(b) => Ok(FieldValue::Bool(b)),
                None => err!(loc, "{}: expected True or False, got '{}'", self, raw),
            },
            Self::Operand(_, OperandField::Type) => parse_operand_type(raw, loc, self),
            Self::Operand(_, OperandField::Access) => parse_access(raw, loc, self),
            Self::Operand(_, OperandField::MemBase) | Self::Operand(_, OperandField::MemIndex) => {
                let name = raw.strip_prefix("REG").map_or(raw, |rest| {
                    rest.trim_start().strip_prefix('=').unwrap_or(rest).trim()
                });
                if name.is_empty() || name.contains(char::is_whitespace) {
                    return err!(loc, "{}: expected a register, got '{}'", self, raw);
                }
                Ok(FieldValue::Reg(name.to_string()))
            }
            Self::Shift => parse_shift(raw, loc, self),
            Self::RegistersRead | Self::RegistersModified => {
                Ok(FieldValue::Names(raw.split_whitespace().map(str::to_string).collect()))
            }
            Self::Groups => {
                let tokens: Vec<&str> = raw.split_whitespace().collect();
                let names: BTreeSet<String> = tokens.iter().map(|t| t.to_string()).collect();
                if names.len() != tokens.len() {
                    warnings.push(warning!(
                        loc,
                        "duplicated group names in '{}' were collapsed",
                        raw
                    ));
                }
                Ok(FieldValue::Names(names))
            }
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::OpCount => f.write_str("op_count"),
            Self::Operand(i, field) => write!(f, "operands[{}].{}", i, field.suffix()),
            Self::WriteBack => f.write_str("Write-back"),
            Self::UpdateFlags => f.write_str("Update-flags"),
            Self::CodeCondition => f.write_str("Code condition"),
            Self::PredicateMask => f.write_str("Predicate Mask"),
            Self::CpsiMode => f.write_str("CPSI-mode"),
            Self::CpsiFlag => f.write_str("CPSI-flag"),
            Self::MemoryBarrier => f.write_str("Memory-barrier"),
            Self::Shift => f.write_str("Shift"),
            Self::RegistersRead => f.write_str("Registers read"),
            Self::RegistersModified => f.write_str("Registers modified"),
            Self::Groups => f.write_str("Groups"),
        }
    }
}

/// The asserted type of one operand.
#[derive(Debug, Clone, PartialEq)]
pub enum OperandType {
    Reg(String),
    Imm(i64),
    Fp(f64),
    Mem,
}

impl fmt::Display for OperandType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Reg(r) => write!(f, "REG = {r}"),
            Self::Imm(n) => write!(f, "IMM = {}", format_int(*n)),
            Self::Fp(x) => write!(f, "FP = {x:.6}"),
            Self::Mem => f.write_str("MEM"),
        }
    }
}

/// A parsed clause value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Bool(bool),
    Operand(OperandType),
    Access(Access),
    Reg(String),
    Shift(Shift),
    /// Register or group names; duplicates already collapsed.
    Names(BTreeSet<String>),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Int(n) => f.write_str(&format_int(*n)),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Operand(ty) => ty.fmt(f),
            Self::Access(a) => a.fmt(f),
            Self::Reg(r) => write!(f, "REG = {r}"),
            Self::Shift(s) => s.fmt(f),
            Self::Names(names) => {
                let v: Vec<&str> = names.iter().map(String::as_str).collect();
                f.write_str(&v.join(" "))
            }
        }
    }
}

/// Render an integer the way fixtures usually spell it: small values in decimal,
/// everything else in hex.
pub fn format_int(n: i64) -> String {
    if (0..10).contains(&n) {
        n.to_string()
    } else if n < 0 {
        format!("-{:#x}", n.unsigned_abs())
    } else {
        format!("{n:#x}")
    }
}

/// Parse a decimal or `0x` hexadecimal integer, optionally negative.
pub fn parse_int(s: &str) -> Option<i64> {
    let s = s.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let magnitude = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<u64>().ok()?,
    };
    if negative {
        0i64.checked_sub_unsigned(magnitude)
    } else {
        // Wide unsigned immediates keep their bit pattern.
        Some(magnitude as i64)
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn normalize_key(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

fn parse_operand_key(norm: &str) -> Option<FieldKey> {
    let rest = norm.strip_prefix("operands[")?;
    let (index, rest) = rest.split_once(']')?;
    let index = index.trim().parse::<usize>().ok()?;
    let suffix = rest.strip_prefix('.')?;
    Some(FieldKey::Operand(index, OperandField::from_suffix(suffix)?))
}

fn parse_operand_type(raw: &str, loc: Location, key: FieldKey) -> ParseResult<FieldValue> {
    let (tag, value) = match raw.split_once('=') {
        Some((tag, value)) => (tag.trim(), Some(value.trim())),
        None => (raw, None),
    };
    let ty = match (tag.to_ascii_uppercase().as_str(), value) {
        ("MEM", None) => OperandType::Mem,
        ("REG", Some(name)) if !name.is_empty() => OperandType::Reg(name.to_string()),
        ("IMM", Some(v)) => match parse_int(v) {
            Some(n) => OperandType::Imm(n),
            None => return err!(loc, "{}: bad immediate '{}'", key, v),
        },
        ("FP", Some(v)) => match v.parse::<f64>() {
            Ok(x) => OperandType::Fp(x),
            Err(_) => return err!(loc, "{}: bad floating point value '{}'", key, v),
        },
        _ => return err!(loc, "{}: unrecognized operand type '{}'", key, raw),
    };
    Ok(FieldValue::Operand(ty))
}

fn parse_access(raw: &str, loc: Location, key: FieldKey) -> ParseResult<FieldValue> {
    let mut access = Access::empty();
    for token in raw.split('|').map(str::trim) {
        match token.to_ascii_uppercase().as_str() {
            "READ" => access |= Access::READ,
            "WRITE" => access |= Access::WRITE,
            _ => return err!(loc, "{}: unrecognized access '{}'", key, raw),
        }
    }
    Ok(FieldValue::Access(access))
}

fn parse_shift(raw: &str, loc: Location, key: FieldKey) -> ParseResult<FieldValue> {
    let (kind, value) = match raw.split_once('=') {
        Some((kind, value)) => (kind.trim(), Some(value.trim())),
        None => (raw, None),
    };
    let kind = match parse_int(kind).and_then(|k| u32::try_from(k).ok()) {
        Some(k) => k,
        None => return err!(loc, "{}: bad shift type in '{}'", key, raw),
    };
    let value = match value {
        None => None,
        Some(v) => match parse_int(v) {
            Some(n) => Some(n),
            None => return err!(loc, "{}: bad shift value in '{}'", key, raw),
        },
    };
    Ok(FieldValue::Shift(Shift { kind, value }))
}
