//! Conformance test harness for instruction decoders.
//!
//! The `cs_filetests` library reads fixture files that pair byte sequences with the exact
//! decode results expected of a disassembler, drives a decoder over those bytes, and
//! reports every field that differs.
//!
//! The main entry point is [`run`], which takes a list of fixture files or directories,
//! scans directories recursively, parses every fixture, and runs the selected cases on a
//! worker pool.

#![deny(trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

pub use crate::compare::{FieldVerdict, LineVerdict, Mismatch, compare_line};
pub use crate::config::{HarnessConfig, Selection};
pub use crate::decoder::replay::ReplayBackend;
pub use crate::decoder::{
    ArchContext, Backend, ByteCursor, DecodeError, DecodedInstruction, Decoder, DecoderAdapter,
};
pub use crate::directive::{Arch, ArchDirective, Mode, ModeSet};
pub use crate::error::{Location, ParseError, ParseResult};
pub use crate::parser::{parse_byte_list, parse_test};
pub use crate::predicate::PredicateState;
pub use crate::report::{CaseVerdict, RunSummary};
pub use crate::testfile::{CaseId, ExpectedLine, TestCase, TestFile};

#[cfg(feature = "disas")]
pub use crate::decoder::capstone::CapstoneBackend;

mod error;

pub mod commands;
pub mod compare;
pub mod config;
pub mod decoder;
pub mod directive;
pub mod fields;
pub mod parser;
pub mod predicate;
pub mod report;
pub mod runner;
pub mod runone;
pub mod testfile;

use std::path::Path;
use std::sync::Arc;

/// Main entry point for `cs-filetest`.
///
/// Take a list of paths which can be either fixture files or directories.
///
/// Files are run whatever their extension. Directories are scanned recursively for
/// fixtures with one of the configured extensions. All fixtures are parsed before any
/// case runs; a syntax error in any of them fails the whole run.
pub fn run<P: AsRef<Path>>(
    paths: &[P],
    config: HarnessConfig,
    backend: Arc<dyn Backend>,
) -> anyhow::Result<RunSummary> {
    let mut runner = runner::TestRunner::new(config);
    for path in paths {
        runner.push_path(path.as_ref());
    }
    runner.run(backend)
}
