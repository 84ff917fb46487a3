//! Conditional-execution carry-over for predicated instruction blocks.
//!
//! On ARM, an `it` instruction (and its `itt`, `ite`, ... relatives) makes the following one
//! to four instructions conditional. Decoders do not always attach that condition to the
//! governed instructions, so the runner threads a `PredicateState` through every decode of
//! a test case: governed instructions inherit the block's condition when the decoder left it
//! out, and a contradicting condition is reported as a mismatch.
//!
//! Conditions use the fixture numbering, where `eq` is 0 and `al` is 14.
//!
//! MVE `vpt`/`vpst` blocks also predicate the instructions that follow them, with `t`/`e`
//! vector conditions rather than condition codes. Those are not tracked.

use crate::compare::Mismatch;
use crate::decoder::DecodedInstruction;
use crate::directive::Arch;
use crate::fields::{FieldKey, format_int};

/// The "always" condition. It has no inverse.
pub const COND_AL: u32 = 14;

const CONDITIONS: &[(&str, u32)] = &[
    ("eq", 0),
    ("ne", 1),
    ("hs", 2),
    ("cs", 2),
    ("lo", 3),
    ("cc", 3),
    ("mi", 4),
    ("pl", 5),
    ("vs", 6),
    ("vc", 7),
    ("hi", 8),
    ("ls", 9),
    ("ge", 10),
    ("lt", 11),
    ("gt", 12),
    ("le", 13),
    ("al", 14),
];

/// Look up a condition suffix such as `eq`.
pub fn condition_from_name(name: &str) -> Option<u32> {
    let name = name.trim().to_ascii_lowercase();
    CONDITIONS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|&(_, c)| c)
}

/// The condition that holds when `cond` does not.
pub fn invert_condition(cond: u32) -> u32 {
    if cond >= COND_AL { cond } else { cond ^ 1 }
}

/// Predication state within one test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PredicateState {
    /// No block is open.
    #[default]
    Idle,
    /// A block is open and governs the next `remaining` instructions.
    Governing {
        condition: u32,
        remaining: u8,
        /// Bit `n` is set when the `n`th remaining slot is an `e` (else) slot.
        else_slots: u8,
    },
}

impl PredicateState {
    /// Account for one decoded instruction.
    ///
    /// A governed instruction without a code condition gets the block's condition filled in.
    /// One with a different condition yields a mismatch. The instruction is then checked
    /// for opening a new block.
    pub fn advance(
        self,
        arch: Arch,
        insn: &mut DecodedInstruction,
    ) -> (PredicateState, Option<Mismatch>) {
        if arch != Arch::Arm {
            return (PredicateState::Idle, None);
        }

        let mut mismatch = None;
        let mut next = PredicateState::Idle;
        if let PredicateState::Governing {
            condition,
            remaining,
            else_slots,
        } = self
        {
            let expected = if else_slots & 1 != 0 {
                invert_condition(condition)
            } else {
                condition
            };
            match insn.code_condition {
                // Decoders that do not expose block predication report governed
                // instructions as unconditional.
                None | Some(COND_AL) => {
                    log::trace!("'{}' inherits condition {}", insn.text(), expected);
                    insn.code_condition = Some(expected);
                }
                Some(actual) if actual != expected => {
                    mismatch = Some(Mismatch::new(
                        FieldKey::CodeCondition,
                        format_int(i64::from(expected)),
                        format_int(i64::from(actual)),
                    ));
                }
                Some(_) => {}
            }
            if remaining > 1 {
                next = PredicateState::Governing {
                    condition,
                    remaining: remaining - 1,
                    else_slots: else_slots >> 1,
                };
            }
        }

        if let Some(opened) = open_block(insn) {
            next = opened;
        }
        (next, mismatch)
    }
}

/// The predicate mask of a Thumb `it` instruction, from its `firstcond` and `mask` fields.
///
/// Each slot after the first contributes one bit, most significant first, set for an
/// else slot. A final 1 bit terminates the pattern, so `it` is `0b1` and `itet` is
/// `0b101`. Leading then slots leave no trace, which is why the slot count has to come
/// from the mnemonic. Returns `None` for a zero `mask`, which is not an `it` instruction.
pub fn block_mask(firstcond: u32, mask: u32) -> Option<u32> {
    let mask = mask & 0xf;
    if mask == 0 {
        return None;
    }
    let cond_bit0 = firstcond & 1;
    let mut pred = 0;
    for pos in (mask.trailing_zeros() + 1..=3).rev() {
        if (mask >> pos) & 1 != cond_bit0 {
            pred |= 1;
        }
        pred <<= 1;
    }
    Some(pred | 1)
}

/// Else-slot bits (bit `n` for slot `n`) read from a predicate mask covering `letters`
/// slots after the first, or `None` when the mask does not fit that many slots.
fn else_slots_from_mask(mask: u32, letters: usize) -> Option<u8> {
    if mask & 1 == 0 || mask >> (letters + 1) != 0 {
        return None;
    }
    Some((0..letters).fold(0u8, |acc, i| {
        if (mask >> (letters - i)) & 1 != 0 {
            acc | (1 << (i + 1))
        } else {
            acc
        }
    }))
}

/// If `insn` is an `it`-style block opener, the state it establishes.
fn open_block(insn: &DecodedInstruction) -> Option<PredicateState> {
    let mnemonic = insn.mnemonic.to_ascii_lowercase();
    let slots = mnemonic.strip_prefix("it")?;
    if slots.len() > 3 || !slots.chars().all(|c| c == 't' || c == 'e') {
        return None;
    }
    let condition = match insn.code_condition {
        Some(c) => c,
        None => condition_from_name(insn.op_str.split_whitespace().next()?)?,
    };
    // The first slot is always "then"; the letters after `it` describe slots 2..=4.
    let from_letters = || {
        slots
            .chars()
            .enumerate()
            .filter(|&(_, c)| c == 'e')
            .fold(0u8, |acc, (i, _)| acc | (1 << (i + 1)))
    };
    let else_slots = match insn.predicate_mask {
        Some(mask) => else_slots_from_mask(mask, slots.len()).unwrap_or_else(|| {
            log::debug!("'{}': predicate mask {mask:#x} ignored", insn.text());
            from_letters()
        }),
        None => from_letters(),
    };
    Some(PredicateState::Governing {
        condition,
        remaining: slots.len() as u8 + 1,
        else_slots,
    })
}
