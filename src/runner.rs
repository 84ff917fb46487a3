//! Test runner.
//!
//! This module implements the `TestRunner` struct which scans directories for fixtures,
//! parses all of them up front, and then runs the selected cases on a worker pool.

use crate::config::HarnessConfig;
use crate::decoder::{Backend, DecoderAdapter};
use crate::parser::parse_test;
use crate::report::{Aggregator, RunSummary};
use crate::runone::run_case;
use crate::testfile::{TestCase, TestFile};
use anyhow::{Context as _, Result, anyhow};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct TestRunner {
    config: HarnessConfig,

    // Directories that have not yet been scanned.
    dir_stack: Vec<PathBuf>,

    // Fixture files to run.
    tests: Vec<PathBuf>,
}

impl TestRunner {
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            dir_stack: Vec::new(),
            tests: Vec::new(),
        }
    }

    /// Add a directory path to be scanned later.
    pub fn push_dir<P: Into<PathBuf>>(&mut self, dir: P) {
        self.dir_stack.push(dir.into());
    }

    /// Add a fixture file to be run later, whatever its extension.
    pub fn push_test<P: Into<PathBuf>>(&mut self, file: P) {
        self.tests.push(file.into());
    }

    /// Add `path`, which can be either a fixture file or a directory.
    pub fn push_path(&mut self, path: &Path) {
        if path.is_file() {
            self.push_test(path);
        } else {
            self.push_dir(path);
        }
    }

    /// Fixture files found so far.
    pub fn tests(&self) -> &[PathBuf] {
        &self.tests
    }

    /// Scan any directories pushed so far, recursively, for fixtures.
    pub fn scan_dirs(&mut self) -> Result<()> {
        while let Some(dir) = self.dir_stack.pop() {
            let entries = dir
                .read_dir()
                .with_context(|| format!("failed to read directory {}", dir.display()))?;
            for entry in entries {
                let entry =
                    entry.with_context(|| format!("failed to read directory {}", dir.display()))?;
                let path = entry.path();
                if entry.file_type().is_ok_and(|t| t.is_dir()) {
                    self.push_dir(path);
                } else if self.is_fixture(&path) {
                    self.push_test(path);
                }
            }
        }
        self.tests.sort();
        self.tests.dedup();
        Ok(())
    }

    fn is_fixture(&self, path: &Path) -> bool {
        path.extension()
            .and_then(OsStr::to_str)
            .is_some_and(|ext| self.config.extensions.iter().any(|e| e == ext))
    }

    /// Parse every fixture. The first syntax error aborts the run.
    pub fn parse_all(&self) -> Result<Vec<TestFile>> {
        self.tests
            .iter()
            .map(|path| {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let name = path.display().to_string();
                let file = parse_test(&text, &name).map_err(|e| anyhow!("{name}:{e}"))?;
                for w in &file.warnings {
                    log::warn!("{name}:{w}");
                }
                log::debug!("{name}: {} cases", file.cases.len());
                Ok(file)
            })
            .collect()
    }

    /// Scan pushed directories, parse all fixtures and run the selected cases against
    /// decoders from `backend`.
    pub fn run(&mut self, backend: Arc<dyn Backend>) -> Result<RunSummary> {
        self.scan_dirs()?;
        let files = self.parse_all()?;
        let selection = self.config.selection()?;

        let mut initial = RunSummary {
            warnings: files.iter().map(|f| f.warnings.len()).sum(),
            ..RunSummary::default()
        };
        let (selected, skipped): (Vec<&TestCase>, Vec<&TestCase>) = files
            .iter()
            .flat_map(|f| &f.cases)
            .partition(|case| selection.selects(&case.directive));
        initial.skip(skipped.len());

        let adapter = DecoderAdapter::new(backend);
        log::info!(
            "running {} cases from {} files with the {} decoder",
            selected.len(),
            files.len(),
            adapter.backend_name()
        );

        let mut pool = rayon::ThreadPoolBuilder::new();
        if let Some(n) = self.config.threads {
            pool = pool.num_threads(n);
        }
        let pool = pool.build().context("failed to start worker threads")?;

        let aggregator = Aggregator::start(initial);
        let sink = aggregator.sink();
        let fp_tolerance = self.config.fp_tolerance;
        pool.install(|| {
            selected.par_iter().for_each_with(sink, |sink, case| {
                sink.report(run_case(case, &adapter, fp_tolerance));
            });
        });
        Ok(aggregator.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn scans_directories_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("arm")).unwrap();
        fs::write(dir.path().join("arm/a.cs"), "").unwrap();
        fs::write(dir.path().join("b.cs"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();

        let mut runner = TestRunner::new(HarnessConfig::default());
        runner.push_path(dir.path());
        runner.scan_dirs().unwrap();
        let names: Vec<_> = runner
            .tests()
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(names, vec![PathBuf::from("arm/a.cs"), PathBuf::from("b.cs")]);
    }

    #[test]
    fn explicit_files_ignore_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "").unwrap();
        let mut runner = TestRunner::new(HarnessConfig::default());
        runner.push_path(&path);
        runner.scan_dirs().unwrap();
        assert_eq!(runner.tests(), &[path]);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = TestRunner::new(HarnessConfig::default());
        runner.push_path(&dir.path().join("nope"));
        assert!(runner.scan_dirs().is_err());
    }

    #[test]
    fn parse_errors_name_file_and_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.cs");
        fs::write(&path, "!# CS_ARCH_ARM, CS_MODE_ARM\n\nnot an assertion\n").unwrap();
        let mut runner = TestRunner::new(HarnessConfig::default());
        runner.push_path(&path);
        let e = runner.parse_all().unwrap_err().to_string();
        assert!(e.starts_with(&format!("{}:3: ", path.display())), "{e}");
    }
}
