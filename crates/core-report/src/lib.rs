//! Bounded, arena-backed storage for classified build output.
//!
//! One `Report` instance lives for the whole process. Each build cycle calls
//! `clear()` and the classifier refills it in a single pass. Every bound
//! (arena bytes, line count, failure count) is fixed at construction;
//! exhausting any of them makes the current pass stop accepting input while
//! everything already stored stays valid. Overflow is a control-flow signal
//! inside a pass, never a process error.

mod arena;

pub use arena::{Span, TextArena};

use thiserror::Error;

/// Production defaults; tests inject smaller limits via `Report::with_limits`.
pub const DEFAULT_ARENA_BYTES: usize = 256 * 1024;
pub const DEFAULT_MAX_LINES: usize = 4096;
pub const DEFAULT_MAX_FAILURES: usize = 256;
pub const DEFAULT_MAX_LINE_BYTES: usize = 512;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    #[error("text arena is full")]
    ArenaFull,
    #[error("line table is full")]
    ReportFull,
    #[error("test failure table is full")]
    TooManyFailures,
}

/// Semantic role of one output line. Closed set; the classifier assigns
/// exactly one tag per line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// `path:line:col: error: ...`
    ErrorLocation,
    /// `path:line:col: note: ...`
    NoteLocation,
    /// Source text echoed under a diagnostic.
    SourceContext,
    /// Caret/tilde pointer line under echoed source.
    PointerContext,
    /// `error: 'name' failed: ...` or a direct runner `... FAIL` line.
    TestFailHeader,
    /// Standalone `expected X, found Y` line.
    TestExpectedValue,
    /// Pass/fail tally emitted by the test runner.
    TestSummary,
    /// `error: ...` with no parsable location.
    BuildErrorNoLocation,
    Blank,
    /// Direct runner `... OK` line.
    TestPass,
    /// Diagnostic/context pointing into the standard library; hidden.
    InternalFrame,
    /// Failure-tree glyph lines under the build summary.
    BuildTreeNoise,
    /// `referenced by:` trace block.
    ReferencedByNoise,
    /// Echo of the failing compile command.
    CommandDumpNoise,
    BuildSummaryNoise,
    /// Trailing `error: the following command failed ...` line.
    FinalError,
    Other,
}

impl Kind {
    /// Whether this kind shows in the collapsed (default) view.
    pub fn visible_collapsed(self) -> bool {
        matches!(
            self,
            Kind::ErrorLocation
                | Kind::NoteLocation
                | Kind::SourceContext
                | Kind::PointerContext
                | Kind::TestFailHeader
                | Kind::TestExpectedValue
                | Kind::TestSummary
                | Kind::BuildErrorNoLocation
                | Kind::Blank
        )
    }

    /// Kinds that open a new diagnostic group for navigation.
    pub fn starts_group(self) -> bool {
        matches!(self, Kind::ErrorLocation | Kind::TestFailHeader)
    }
}

/// Structured source position carried by location-bearing lines. `path` is a
/// sub-span of the owning line's text region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub path: Span,
    pub line: u32,
    pub col: u32,
}

/// One classified output line. `text` points into the report's arena; the
/// record is only ever created after its bytes exist there.
#[derive(Debug, Clone, Copy)]
pub struct Line {
    pub text: Span,
    pub kind: Kind,
    /// Diagnostic group this line belongs to, for next/prev navigation.
    pub group: u32,
    pub location: Option<Location>,
}

/// One recognized test failure. `expected`/`actual` may be filled
/// retroactively by a later `expected X, found Y` line.
#[derive(Debug, Clone, Copy)]
pub struct TestFailure {
    pub line_index: u32,
    pub name: Span,
    pub expected: Option<Span>,
    pub actual: Option<Span>,
    pub ordinal: u32,
}

/// Running counters, updated exactly once per classified line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub errors: u32,
    pub notes: u32,
    pub tests_passed: u32,
    pub tests_failed: u32,
}

#[derive(Debug)]
pub struct Report {
    arena: TextArena,
    lines: Vec<Line>,
    failures: Vec<TestFailure>,
    max_lines: usize,
    max_failures: usize,
    pub stats: Stats,
    pub exit_code: Option<i32>,
    /// Set when a pass stopped early on any exhausted bound.
    pub truncated: bool,
    collapsed_count: usize,
}

impl Default for Report {
    fn default() -> Self {
        Self::new()
    }
}

impl Report {
    pub fn new() -> Self {
        Self::with_limits(
            DEFAULT_ARENA_BYTES,
            DEFAULT_MAX_LINE_BYTES,
            DEFAULT_MAX_LINES,
            DEFAULT_MAX_FAILURES,
        )
    }

    pub fn with_limits(
        arena_bytes: usize,
        max_line_bytes: usize,
        max_lines: usize,
        max_failures: usize,
    ) -> Self {
        Self {
            arena: TextArena::new(arena_bytes, max_line_bytes),
            lines: Vec::with_capacity(max_lines.min(1024)),
            failures: Vec::with_capacity(max_failures.min(64)),
            max_lines,
            max_failures,
            stats: Stats::default(),
            exit_code: None,
            truncated: false,
            collapsed_count: 0,
        }
    }

    /// Reset all lengths and counters for the next pass. Allocations are
    /// retained; nothing is reallocated on the build hot path.
    pub fn clear(&mut self) {
        self.arena.clear();
        self.lines.clear();
        self.failures.clear();
        self.stats = Stats::default();
        self.exit_code = None;
        self.truncated = false;
        self.collapsed_count = 0;
    }

    pub fn arena(&self) -> &TextArena {
        &self.arena
    }

    /// Store line text, truncated to the per-line maximum.
    pub fn append_text(&mut self, text: &str) -> Result<Span, StoreError> {
        self.arena.append(text)
    }

    /// Store a classified record. Precondition: `line.text` was returned by
    /// `append_text` on this report (checked; a stale span is rejected).
    pub fn append_line(&mut self, line: Line) -> Result<usize, StoreError> {
        if line.text.end() > self.arena.used() {
            return Err(StoreError::ReportFull);
        }
        if self.lines.len() >= self.max_lines {
            return Err(StoreError::ReportFull);
        }
        self.lines.push(line);
        Ok(self.lines.len() - 1)
    }

    pub fn append_test_failure(&mut self, failure: TestFailure) -> Result<usize, StoreError> {
        if self.failures.len() >= self.max_failures {
            return Err(StoreError::TooManyFailures);
        }
        self.failures.push(failure);
        Ok(self.failures.len() - 1)
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn failures(&self) -> &[TestFailure] {
        &self.failures
    }

    pub fn failure_mut(&mut self, index: usize) -> Option<&mut TestFailure> {
        self.failures.get_mut(index)
    }

    pub fn line_text(&self, line: &Line) -> &str {
        self.arena.text(line.text)
    }

    /// Number of rows the collapsed view would occupy. Recomputed once after
    /// a parse pass; O(1) to read afterwards.
    pub fn collapsed_count(&self) -> usize {
        self.collapsed_count
    }

    /// Walk all lines once, counting visible-by-default kinds and merging
    /// runs of consecutive blank lines into one, then cache the result.
    pub fn compute_collapsed_count(&mut self) -> usize {
        let mut count = 0usize;
        let mut prev_blank = false;
        for line in &self.lines {
            if !line.kind.visible_collapsed() {
                continue;
            }
            let blank = line.kind == Kind::Blank;
            if blank && prev_blank {
                continue;
            }
            prev_blank = blank;
            count += 1;
        }
        self.collapsed_count = count;
        count
    }

    /// Indices of lines shown in the collapsed view, in display order. The
    /// renderer slices this by its scroll window.
    pub fn collapsed_indices(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.collapsed_count.max(16));
        let mut prev_blank = false;
        for (i, line) in self.lines.iter().enumerate() {
            if !line.kind.visible_collapsed() {
                continue;
            }
            let blank = line.kind == Kind::Blank;
            if blank && prev_blank {
                continue;
            }
            prev_blank = blank;
            out.push(i);
        }
        out
    }
}
