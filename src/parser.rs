//! Parser for fixture files.
//!
//! A fixture is line oriented:
//!
//! ```text
//! !# issue 0 ARM operand groups 0x61,0xb6 == cpsie f ;
//! !# CS_ARCH_ARM, CS_MODE_THUMB, CS_OPT_DETAIL
//! 0x61,0xb6 == cpsie f ; CPSI-mode: 2 ; CPSI-flag: 1 ; Groups: IsThumb ;
//! ```
//!
//! `!#` lines are directives: either an architecture selector or free text describing the
//! next case. Every other non-blank line must be an assertion. Assertions that directly
//! follow each other under one architecture directive form a single test case.

use crate::directive::{ArchDirective, is_arch_directive, parse_arch_directive};
use crate::error::{Location, ParseError, ParseResult};
use crate::fields::FieldKey;
use crate::testfile::{CaseId, ExpectedLine, TestCase, TestFile};
use std::sync::Arc;

/// Marker that starts a directive line.
pub const DIRECTIVE_MARKER: &str = "!#";

/// Parse the entire `text` of the fixture called `file`.
///
/// Any syntax error aborts the parse. Warnings are collected on the returned `TestFile`.
pub fn parse_test(text: &str, file: &str) -> ParseResult<TestFile> {
    let mut parser = Parser::new(file);
    for (i, line) in text.lines().enumerate() {
        parser.parse_line(line, Location::line(i + 1))?;
    }
    Ok(parser.finish())
}

/// Parse a comma-separated list of `0x`-prefixed byte literals.
pub fn parse_byte_list(s: &str) -> Result<Vec<u8>, String> {
    let mut bytes = Vec::new();
    for literal in s.split(',').map(str::trim) {
        let hex = literal
            .strip_prefix("0x")
            .or_else(|| literal.strip_prefix("0X"))
            .ok_or_else(|| format!("expected a 0x-prefixed byte, got '{literal}'"))?;
        let byte = u8::from_str_radix(hex, 16)
            .map_err(|_| format!("'{literal}' is not a byte value"))?;
        bytes.push(byte);
    }
    Ok(bytes)
}

/// Collapse whitespace runs so texts can be compared independent of spacing.
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

struct Parser {
    file: Arc<str>,
    directive: Option<ArchDirective>,
    directive_used: bool,
    description: Option<String>,
    current: Option<TestCase>,
    cases: Vec<TestCase>,
    warnings: Vec<ParseError>,
}

impl Parser {
    fn new(file: &str) -> Self {
        Self {
            file: Arc::from(file),
            directive: None,
            directive_used: false,
            description: None,
            current: None,
            cases: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn parse_line(&mut self, line: &str, loc: Location) -> ParseResult<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        if let Some(body) = line.strip_prefix(DIRECTIVE_MARKER) {
            self.close_case();
            if is_arch_directive(body) {
                self.check_unused_directive();
                self.directive = Some(parse_arch_directive(body, loc)?);
                self.directive_used = false;
            } else {
                let body = body.trim();
                if !body.is_empty() {
                    self.description = Some(body.to_string());
                }
            }
            return Ok(());
        }

        if !line.contains("==") {
            return err!(
                loc,
                "expected a '{}' directive or a '<bytes> == <text>' assertion",
                DIRECTIVE_MARKER
            );
        }

        let directive = match &self.directive {
            Some(d) => d.clone(),
            None => return err!(loc, "assertion before any architecture directive"),
        };
        let (bytes, mut expected) = self.parse_assertion(line, loc)?;
        self.directive_used = true;

        let case = self.current.get_or_insert_with(|| TestCase {
            id: CaseId {
                file: self.file.clone(),
                location: loc,
            },
            description: self.description.take(),
            directive,
            bytes: Vec::new(),
            lines: Vec::new(),
        });
        let start = case.bytes.len();
        case.bytes.extend_from_slice(&bytes);
        expected.span = start..case.bytes.len();
        case.lines.push(expected);
        Ok(())
    }

    /// Parse `<byte-list> == <text> [; key: value]* [;]`.
    fn parse_assertion(
        &mut self,
        line: &str,
        loc: Location,
    ) -> ParseResult<(Vec<u8>, ExpectedLine)> {
        let (byte_list, rest) = match line.split_once("==") {
            Some(parts) => parts,
            None => return err!(loc, "assertion is missing '=='"),
        };
        if byte_list.trim().is_empty() {
            return err!(loc, "assertion is missing its byte list");
        }
        let bytes = match parse_byte_list(byte_list) {
            Ok(bytes) => bytes,
            Err(msg) => return err!(loc, msg),
        };

        let mut clauses = rest.split(';');
        let text = normalize_text(clauses.next().unwrap_or(""));
        if text.is_empty() {
            return err!(loc, "assertion is missing its expected text");
        }

        let mut expected = ExpectedLine {
            location: loc,
            span: 0..0,
            text,
            fields: Vec::new(),
            unrecognized: Vec::new(),
        };

        for clause in clauses.map(str::trim).filter(|c| !c.is_empty()) {
            let Some((key, value)) = clause.split_once(':') else {
                if normalize_text(clause) == expected.text {
                    self.warnings.push(warning!(
                        loc,
                        "clause '{}' repeats the expected text and is ignored",
                        clause
                    ));
                    continue;
                }
                return err!(loc, "malformed field clause '{}', expected 'key: value'", clause);
            };
            let (key, value) = (key.trim(), value.trim());
            match FieldKey::lookup(key) {
                Some(m) => {
                    if m.via_synonym {
                        self.warnings.push(warning!(
                            loc,
                            "field key '{}' read as '{}'",
                            key,
                            m.key
                        ));
                    }
                    let parsed = m.key.parse_value(value, loc, &mut self.warnings)?;
                    expected.fields.push((m.key, parsed));
                }
                None => {
                    self.warnings
                        .push(warning!(loc, "unrecognized field key '{}'", key));
                    expected
                        .unrecognized
                        .push((key.to_string(), value.to_string()));
                }
            }
        }

        Ok((bytes, expected))
    }

    fn close_case(&mut self) {
        if let Some(case) = self.current.take() {
            self.cases.push(case);
        }
    }

    fn check_unused_directive(&mut self) {
        if let (Some(d), false) = (&self.directive, self.directive_used) {
            self.warnings.push(warning!(
                d.location,
                "directive for {} has no assertions",
                d
            ));
        }
    }

    fn finish(mut self) -> TestFile {
        self.close_case();
        self.check_unused_directive();
        TestFile {
            cases: self.cases,
            warnings: self.warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::{Arch, Mode};
    use crate::fields::{FieldValue, OperandField, OperandType};

    const TWO_CASES: &str = "\
!# issue 0 ARM operand groups 0x61,0xb6 == cpsie f ;
!# CS_ARCH_ARM, CS_MODE_THUMB, CS_OPT_DETAIL
0x61,0xb6 == cpsie f ; CPSI-mode: 2 ; CPSI-flag: 1 ; Groups: IsThumb ;

!# predicated move
!# CS_ARCH_ARM, CS_MODE_THUMB, CS_OPT_DETAIL
0x08,0xbf == it eq ; Code condition: 0 ; Predicate Mask: 0x1 ; Groups: HasDB ;
0x5f,0xf0,0x0c,0x01 == movseq.w r1, #0xc ; op_count: 2 ; operands[1].type: IMM = 0xc ;
";

    #[test]
    fn groups_consecutive_assertions() {
        let tf = parse_test(TWO_CASES, "t.cs").unwrap();
        assert_eq!(tf.cases.len(), 2);
        assert!(tf.warnings.is_empty());

        let first = &tf.cases[0];
        assert_eq!(first.id.to_string(), "t.cs:3");
        assert_eq!(
            first.description.as_deref(),
            Some("issue 0 ARM operand groups 0x61,0xb6 == cpsie f ;")
        );
        assert_eq!(first.directive.arch, Arch::Arm);
        assert!(first.directive.modes.contains(Mode::Thumb));
        assert_eq!(first.bytes, vec![0x61, 0xb6]);
        assert_eq!(first.lines.len(), 1);
        assert_eq!(first.lines[0].fields.len(), 3);

        let second = &tf.cases[1];
        assert_eq!(second.lines.len(), 2);
        assert_eq!(second.bytes.len(), 6);
        assert_eq!(second.line_bytes(0), &[0x08, 0xbf]);
        assert_eq!(second.line_bytes(1), &[0x5f, 0xf0, 0x0c, 0x01]);
        assert_eq!(second.lines[1].text, "movseq.w r1, #0xc");
        assert_eq!(
            second.lines[1].field(FieldKey::Operand(1, OperandField::Type)),
            Some(&FieldValue::Operand(OperandType::Imm(12)))
        );
    }

    #[test]
    fn parsing_is_deterministic() {
        assert_eq!(
            parse_test(TWO_CASES, "t.cs").unwrap(),
            parse_test(TWO_CASES, "t.cs").unwrap()
        );
    }

    #[test]
    fn new_directive_starts_new_case() {
        let text = "\
!# CS_ARCH_ARM, CS_MODE_ARM, CS_OPT_DETAIL
0x03,0x20,0xb0,0xe1 == movs r2, r3
!# CS_ARCH_ARM, CS_MODE_THUMB, CS_OPT_DETAIL
0xfd,0x8f == ldrh r5, [r7, #62]
";
        let tf = parse_test(text, "t.cs").unwrap();
        assert_eq!(tf.cases.len(), 2);
        assert!(tf.cases[1].directive.modes.contains(Mode::Thumb));
        assert_eq!(tf.cases[1].description, None);
    }

    #[test]
    fn comment_closes_case_but_keeps_directive() {
        let text = "\
!# CS_ARCH_ARM, CS_MODE_THUMB, CS_OPT_DETAIL
0x61,0xb6 == cpsie f
!# another one
0x61,0xb6 == cpsie f
";
        let tf = parse_test(text, "t.cs").unwrap();
        assert_eq!(tf.cases.len(), 2);
        assert_eq!(tf.cases[1].description.as_deref(), Some("another one"));
        assert_eq!(tf.cases[0].directive, tf.cases[1].directive);
    }

    #[test]
    fn stray_line_is_an_error() {
        let text = "!# CS_ARCH_ARM, CS_MODE_ARM\nldm r0, {r1}\n";
        let e = parse_test(text, "t.cs").unwrap_err();
        assert_eq!(e.location.line_number, 2);
        assert!(!e.is_warning);
    }

    #[test]
    fn assertion_needs_directive() {
        let e = parse_test("0x61,0xb6 == cpsie f\n", "t.cs").unwrap_err();
        assert!(e.message.contains("before any architecture directive"));
    }

    #[test]
    fn incomplete_assertions_are_errors() {
        for line in [
            " == cpsie f",
            "0x61,0xb6 == ",
            "0x61,0xb6 == ; op_count: 0",
            "0x6,0xzz == x",
            "0x161 == x",
            "61,b6 == cpsie f",
        ] {
            let text = format!("!# CS_ARCH_ARM, CS_MODE_THUMB\n{line}\n");
            let e = parse_test(&text, "t.cs").unwrap_err();
            assert_eq!(e.location.line_number, 2, "{line}");
        }
    }

    #[test]
    fn bad_value_for_known_key_is_an_error() {
        let text = "!# CS_ARCH_ARM, CS_MODE_THUMB\n0x61,0xb6 == cpsie f ; CPSI-mode: two\n";
        let e = parse_test(text, "t.cs").unwrap_err();
        assert!(e.message.contains("CPSI-mode"));
    }

    #[test]
    fn unknown_keys_warn_and_are_kept() {
        let text = "!# CS_ARCH_ARM, CS_MODE_THUMB\n0x61,0xb6 == cpsie f ; Vector-size: 4 ;\n";
        let tf = parse_test(text, "t.cs").unwrap();
        assert_eq!(tf.warnings.len(), 1);
        assert!(tf.warnings[0].is_warning);
        assert_eq!(
            tf.cases[0].lines[0].unrecognized,
            vec![("Vector-size".to_string(), "4".to_string())]
        );
    }

    #[test]
    fn repeated_text_clause_warns() {
        let text = "!# CS_ARCH_ARM, CS_MODE_THUMB\n\
            0xbf,0xf3,0x6f,0x8f == isb sy ; isb sy ; Memory-barrier: 15 ;\n";
        let tf = parse_test(text, "t.cs").unwrap();
        assert_eq!(tf.warnings.len(), 1);
        assert_eq!(tf.cases[0].lines[0].fields.len(), 1);

        let text = "!# CS_ARCH_ARM, CS_MODE_THUMB\n0xbf,0xf3,0x6f,0x8f == isb sy ; dsb sy ;\n";
        assert!(parse_test(text, "t.cs").is_err());
    }

    #[test]
    fn typo_key_is_normalized() {
        let text = "!# CS_ARCH_ARM, CS_MODE_THUMB\n\
            0x90,0xe8,0x0e,0x00 == ldm.w r0, {r1, r2, r3} ; Registers midified: r0 r1 r2 r3 ;\n";
        let tf = parse_test(text, "t.cs").unwrap();
        assert_eq!(tf.warnings.len(), 1);
        assert!(tf.cases[0].lines[0].field(FieldKey::RegistersModified).is_some());
    }

    #[test]
    fn unused_directive_warns() {
        let text = "!# CS_ARCH_ARM, CS_MODE_ARM\n!# CS_ARCH_ARM, CS_MODE_THUMB\n\
            0x61,0xb6 == cpsie f\n";
        let tf = parse_test(text, "t.cs").unwrap();
        assert_eq!(tf.cases.len(), 1);
        assert_eq!(tf.warnings.len(), 1);
        assert_eq!(tf.warnings[0].location.line_number, 1);
    }

    #[test]
    fn whitespace_in_text_is_collapsed() {
        let text = "!# CS_ARCH_ARM, CS_MODE_THUMB\n\
            0x0e,0xc8 == ldm r0!,  {r1, r2, r3}   ;  op_count: 4\n";
        let tf = parse_test(text, "t.cs").unwrap();
        assert_eq!(tf.cases[0].lines[0].text, "ldm r0!, {r1, r2, r3}");
    }

    #[test]
    fn byte_lists() {
        assert_eq!(parse_byte_list("0x90, 0xE8,0x0e ,0x00"), Ok(vec![0x90, 0xe8, 0x0e, 0x00]));
        assert!(parse_byte_list("").is_err());
        assert!(parse_byte_list("0x100").is_err());
        assert!(parse_byte_list("0x90,").is_err());
    }
}
