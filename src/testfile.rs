//! Data structures representing a parsed fixture file.
//!
//! A fixture file is a sequence of test cases. Each test case is one architecture directive
//! plus one or more assertion lines whose bytes are decoded back to back.

use crate::directive::ArchDirective;
use crate::error::{Location, ParseError};
use crate::fields::{FieldKey, FieldValue};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// A parsed fixture file.
#[derive(Debug, Clone, PartialEq)]
pub struct TestFile {
    /// Test cases in file order.
    pub cases: Vec<TestCase>,
    /// Warnings collected while parsing. These never fail a run.
    pub warnings: Vec<ParseError>,
}

/// Identifies a test case for reporting: file name plus the line of its first assertion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CaseId {
    pub file: Arc<str>,
    pub location: Location,
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.location)
    }
}

/// One test case.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    pub id: CaseId,
    /// Text of the nearest comment directive before this case, if any.
    pub description: Option<String>,
    pub directive: ArchDirective,
    /// Bytes of every line, concatenated. Never empty.
    pub bytes: Vec<u8>,
    /// Assertion lines, in decode order. Never empty.
    pub lines: Vec<ExpectedLine>,
}

impl TestCase {
    /// The bytes declared by line `i`.
    pub fn line_bytes(&self, i: usize) -> &[u8] {
        &self.bytes[self.lines[i].span.clone()]
    }
}

/// One assertion line.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedLine {
    pub location: Location,
    /// Range of this line's bytes within the case's byte sequence.
    pub span: Range<usize>,
    /// Expected mnemonic and operand text.
    pub text: String,
    /// Recognized field assertions, in fixture order.
    pub fields: Vec<(FieldKey, FieldValue)>,
    /// Clauses whose key is not in the registry, kept verbatim as `(key, value)`.
    pub unrecognized: Vec<(String, String)>,
}

impl ExpectedLine {
    /// Number of bytes this line declares.
    pub fn byte_len(&self) -> usize {
        self.span.len()
    }

    /// Look up the asserted value for `key`.
    pub fn field(&self, key: FieldKey) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }
}
