//! Collecting case verdicts into a run summary.
//!
//! Workers never touch the summary directly. Each one holds a `ReportSink` and sends its
//! `CaseVerdict`s down a channel drained by a single collector thread, which owns the
//! `RunSummary` until the run is over.

use crate::compare::{LineVerdict, Mismatch};
use crate::testfile::CaseId;
use serde_derive::Serialize;
use std::fmt;
use std::sync::mpsc;
use std::thread;

/// Outcome of one test case.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseVerdict {
    pub id: CaseId,
    pub description: Option<String>,
    /// One verdict per line that was evaluated.
    pub lines: Vec<LineVerdict>,
    /// Number of lines the case declares.
    pub expected_lines: usize,
}

impl CaseVerdict {
    /// A case passes when every line was evaluated and passed.
    pub fn passed(&self) -> bool {
        self.lines.len() == self.expected_lines && self.lines.iter().all(LineVerdict::passed)
    }

    /// The first mismatch, with the index of the line it belongs to.
    pub fn first_mismatch(&self) -> Option<(usize, &Mismatch)> {
        self.lines
            .iter()
            .enumerate()
            .find_map(|(i, l)| l.first_mismatch().map(|m| (i, m)))
    }
}

/// One failing case in a `RunSummary`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    #[serde(skip)]
    id: CaseId,
    /// `file:line` of the case.
    pub case: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Index of the failing line within the case.
    pub line: usize,
    #[serde(flatten)]
    pub mismatch: Mismatch,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "FAIL {}: {}", self.case, self.mismatch)
    }
}

/// Totals for a whole run.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RunSummary {
    pub cases: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub warnings: usize,
    /// Failing cases, ordered by file and line.
    pub failures: Vec<Failure>,
}

impl RunSummary {
    /// Fold one case verdict into the totals.
    pub fn add(&mut self, verdict: CaseVerdict) {
        self.cases += 1;
        if verdict.passed() {
            self.passed += 1;
            return;
        }
        self.failed += 1;
        let (line, mismatch) = match verdict.first_mismatch() {
            Some((line, m)) => (line, m.clone()),
            None => {
                let evaluated = verdict.lines.len();
                let expected = verdict.expected_lines.to_string();
                (evaluated, Mismatch::new("lines", expected, evaluated.to_string()))
            }
        };
        self.failures.push(Failure {
            case: verdict.id.to_string(),
            id: verdict.id,
            description: verdict.description,
            line,
            mismatch,
        });
    }

    /// Count cases that were not selected to run.
    pub fn skip(&mut self, n: usize) {
        self.cases += n;
        self.skipped += n;
    }

    /// Did every selected case pass?
    pub fn success(&self) -> bool {
        self.failed == 0
    }

    /// The summary as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    fn sort(&mut self) {
        self.failures.sort_by(|a, b| a.id.cmp(&b.id));
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for failure in &self.failures {
            writeln!(f, "{failure}")?;
        }
        write!(
            f,
            "{} cases, {} passed, {} failed, {} skipped, {} warnings",
            self.cases, self.passed, self.failed, self.skipped, self.warnings
        )
    }
}

/// Sending half of the aggregator. Cloned into each worker.
#[derive(Clone)]
pub struct ReportSink(mpsc::Sender<CaseVerdict>);

impl ReportSink {
    pub fn report(&self, verdict: CaseVerdict) {
        // The collector outlives every sink, so a send only fails while it is unwinding.
        if self.0.send(verdict).is_err() {
            log::error!("report collector is gone; dropping a case verdict");
        }
    }
}

/// Owns the collector thread.
pub struct Aggregator {
    sink: ReportSink,
    collector: thread::JoinHandle<RunSummary>,
}

impl Aggregator {
    /// Spawn the collector, starting from `initial` totals.
    pub fn start(initial: RunSummary) -> Self {
        let (send, recv) = mpsc::channel::<CaseVerdict>();
        let collector = thread::spawn(move || {
            let mut summary = initial;
            for verdict in recv {
                summary.add(verdict);
            }
            summary.sort();
            summary
        });
        Self {
            sink: ReportSink(send),
            collector,
        }
    }

    pub fn sink(&self) -> ReportSink {
        self.sink.clone()
    }

    /// Wait for every sink to be dropped and return the final summary.
    pub fn finish(self) -> RunSummary {
        drop(self.sink);
        match self.collector.join() {
            Ok(summary) => summary,
            Err(e) => std::panic::resume_unwind(e),
        }
    }
}
