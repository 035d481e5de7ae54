//! Single-pass classifier turning raw compiler/test-runner output into
//! `core_report` records.
//!
//! The classifier is a small state machine driven line by line. Rules are
//! fixed substring matches (deliberately no regex) and their order is a
//! correctness contract: the first matching rule wins, and a diagnostic
//! header always preempts a pending context expectation. That precedence is
//! an explicit check before context is consumed, not a fallthrough accident;
//! `tests::header_preempts_pending_context` pins it.
//!
//! Classification never fails. Malformed locations or value markers degrade
//! to "no structured data for this line", and exhausting any report bound
//! ends the pass early with everything already classified left intact.

use core_report::{Kind, Line, Location, Report, Span, StoreError, TestFailure};
use std::ops::Range;
use tracing::debug;

const ERROR_MARKER: &str = ": error:";
const NOTE_MARKER: &str = ": note:";
const FRAME_MARKER: &str = ": 0x";
const TEST_FAIL_PREFIX: &str = "error: '";
const TEST_FAIL_SUFFIX: &str = "' failed";
const EXPECTED_ANCHOR: &str = "expected ";
const FOUND_ANCHOR: &str = ", found ";
const REFERENCED_BY: &str = "referenced by:";

/// Lines echoed under a diagnostic: one source line, one pointer line.
const CONTEXT_LINES: u8 = 2;

/// Per-pass classifier state. `reset` runs at the start of every pass.
#[derive(Debug, Default)]
pub struct Classifier {
    /// When positive, the next line(s) are context under a note-style
    /// location unless they are themselves a diagnostic header.
    note_context_remaining: u8,
    /// Same, for error locations. Error context is consumed first.
    error_context_remaining: u8,
    /// Inside a `referenced by:` trace; exits on a non-indented line.
    in_reference_block: bool,
    /// Most recent location pointed into the standard library, so its
    /// context lines classify as hidden internal frames.
    in_std_frame_context: bool,
    /// Most recently opened test failure, for retroactive expected/actual.
    current_failure: Option<usize>,
    /// Diagnostic group counter; group-starting kinds increment it.
    group: u32,
}

/// What one line classified to, with ranges relative to the line's text.
#[derive(Debug)]
struct Classified {
    kind: Kind,
    location: Option<(Range<usize>, u32, u32)>,
    /// Test name range; present on lines that open a failure.
    failure_name: Option<Range<usize>>,
    expected: Option<(Range<usize>, Range<usize>)>,
}

impl Classified {
    fn plain(kind: Kind) -> Self {
        Self {
            kind,
            location: None,
            failure_name: None,
            expected: None,
        }
    }
}

impl Classifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    /// Classify a full build's output into `report`. The report must be
    /// cleared by the caller beforehand; one pass fills one report.
    /// Stops cleanly (setting `report.truncated`) when a bound runs out.
    pub fn parse_pass(&mut self, raw: &str, report: &mut Report) {
        self.reset();
        for raw_line in raw.split('\n') {
            let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
            let span = match report.append_text(line) {
                Ok(span) => span,
                Err(_) => {
                    report.truncated = true;
                    break;
                }
            };
            // Classify the text as stored (post truncation) so every range
            // we produce stays inside the span.
            let classified = {
                let stored = report.arena().text(span);
                self.classify(stored)
            };
            if self.store(span, &classified, report).is_err() {
                report.truncated = true;
                break;
            }
        }
        debug!(
            target: "classify",
            lines = report.lines().len(),
            errors = report.stats.errors,
            tests_failed = report.stats.tests_failed,
            truncated = report.truncated,
            "parse_pass_done"
        );
    }

    /// Append the record plus any group/location/failure/stat side effects.
    fn store(
        &mut self,
        span: Span,
        classified: &Classified,
        report: &mut Report,
    ) -> Result<(), StoreError> {
        let kind = classified.kind;
        if kind.starts_group() {
            self.group += 1;
        }
        let location = classified.location.as_ref().map(|(path, line, col)| Location {
            path: sub_span(span, path),
            line: *line,
            col: *col,
        });
        let index = report.append_line(Line {
            text: span,
            kind,
            group: self.group,
            location,
        })?;

        if let Some(name) = &classified.failure_name {
            let ordinal = report.failures().len() as u32;
            let (expected, actual) = match &classified.expected {
                Some((e, a)) => (Some(sub_span(span, e)), Some(sub_span(span, a))),
                None => (None, None),
            };
            let failure_index = report.append_test_failure(TestFailure {
                line_index: index as u32,
                name: sub_span(span, name),
                expected,
                actual,
                ordinal,
            })?;
            self.current_failure = Some(failure_index);
        } else if kind == Kind::TestExpectedValue {
            // Retroactive fill for the most recently opened failure.
            if let (Some(index), Some((e, a))) = (self.current_failure, &classified.expected) {
                let expected = sub_span(span, e);
                let actual = sub_span(span, a);
                if let Some(failure) = report.failure_mut(index) {
                    failure.expected = Some(expected);
                    failure.actual = Some(actual);
                }
            }
        }

        match kind {
            Kind::ErrorLocation | Kind::BuildErrorNoLocation => report.stats.errors += 1,
            Kind::NoteLocation => report.stats.notes += 1,
            Kind::TestFailHeader => report.stats.tests_failed += 1,
            Kind::TestPass => report.stats.tests_passed += 1,
            _ => {}
        }
        Ok(())
    }

    /// The ordered rule chain. First match wins.
    fn classify(&mut self, text: &str) -> Classified {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            // Context lines are never blank; a blank line also ends any
            // reference trace.
            self.error_context_remaining = 0;
            self.note_context_remaining = 0;
            self.in_reference_block = false;
            return Classified::plain(Kind::Blank);
        }

        let header = is_diagnostic_header(text, trimmed);

        // Rule 1: pending context. A header always wins over a stale
        // expectation, checked here rather than relying on rule order.
        if self.error_context_remaining > 0 || self.note_context_remaining > 0 {
            if header {
                self.error_context_remaining = 0;
                self.note_context_remaining = 0;
            } else {
                if self.error_context_remaining > 0 {
                    self.error_context_remaining -= 1;
                } else {
                    self.note_context_remaining -= 1;
                }
                let kind = if self.in_std_frame_context {
                    Kind::InternalFrame
                } else if is_pointer_line(trimmed) {
                    Kind::PointerContext
                } else {
                    Kind::SourceContext
                };
                return Classified::plain(kind);
            }
        }

        // Rule 2: "referenced by:" trace block.
        if self.in_reference_block {
            if text.starts_with([' ', '\t']) {
                return Classified::plain(Kind::ReferencedByNoise);
            }
            self.in_reference_block = false;
        }
        if trimmed.ends_with(REFERENCED_BY) {
            self.in_reference_block = true;
            return Classified::plain(Kind::ReferencedByNoise);
        }

        // Rule 3: `path:line:col: error|note: message`.
        if let Some(pos) = text.find(ERROR_MARKER) {
            return self.classify_marker_line(text, pos, Kind::ErrorLocation);
        }
        if let Some(pos) = text.find(NOTE_MARKER) {
            return self.classify_marker_line(text, pos, Kind::NoteLocation);
        }

        // Rule 4: test failure header, before stack-frame detection so a
        // header where context was expected is never misread as source.
        if let Some(rest) = trimmed.strip_prefix(TEST_FAIL_PREFIX) {
            if let Some(name_len) = rest.find(TEST_FAIL_SUFFIX) {
                let lead = leading_bytes(text);
                let start = lead + TEST_FAIL_PREFIX.len();
                self.in_std_frame_context = false;
                return Classified {
                    kind: Kind::TestFailHeader,
                    location: None,
                    failure_name: Some(start..start + name_len),
                    expected: extract_expected(text),
                };
            }
        }

        // Rule 5: stack-trace location (`path:line:col: 0x... in ...`),
        // context-armed like a note location.
        if let Some(pos) = text.find(FRAME_MARKER) {
            if text.contains(" in ") {
                let prefix = &text[..pos];
                let location = parse_location(prefix);
                self.in_std_frame_context = is_std_path(prefix);
                self.note_context_remaining = CONTEXT_LINES;
                let kind = if self.in_std_frame_context {
                    Kind::InternalFrame
                } else {
                    Kind::NoteLocation
                };
                return Classified {
                    kind,
                    location,
                    ..Classified::plain(Kind::Other)
                };
            }
        }

        // Rule 6: noise markers.
        if trimmed.starts_with("Build Summary") {
            return Classified::plain(Kind::BuildSummaryNoise);
        }
        if text.contains("├─") || text.contains("└─") {
            return Classified::plain(Kind::BuildTreeNoise);
        }
        if trimmed.starts_with("error: the following command")
            || trimmed.starts_with("error: the following build command")
        {
            return Classified::plain(Kind::FinalError);
        }
        if trimmed.starts_with('/') && trimmed.contains("zig") {
            return Classified::plain(Kind::CommandDumpNoise);
        }

        // Rule 7: error with no parsable location.
        if trimmed.starts_with("error: ") {
            return Classified::plain(Kind::BuildErrorNoLocation);
        }

        // Rule 8: test runner output.
        if (trimmed.contains(" passed; ") && trimmed.contains(" failed"))
            || trimmed.contains("tests passed")
        {
            return Classified::plain(Kind::TestSummary);
        }
        if let Some(expected) = extract_expected(text) {
            return Classified {
                kind: Kind::TestExpectedValue,
                expected: Some(expected),
                ..Classified::plain(Kind::Other)
            };
        }
        if trimmed.ends_with("... OK") || trimmed.ends_with("...OK") {
            return Classified::plain(Kind::TestPass);
        }
        if trimmed.ends_with("... FAIL") || trimmed.ends_with("...FAIL") {
            // Direct runner failure line; group-starting, opens a failure.
            let lead = leading_bytes(text);
            let name_len = trimmed.find("...").unwrap_or(trimmed.len());
            let name = trimmed[..name_len].trim_end();
            return Classified {
                kind: Kind::TestFailHeader,
                failure_name: Some(lead..lead + name.len()),
                ..Classified::plain(Kind::Other)
            };
        }

        // Rule 9: pointer-only line outside an armed context.
        if is_pointer_line(trimmed) {
            return Classified::plain(Kind::PointerContext);
        }

        // Rule 10: heavily indented line that looks like code.
        if leading_width(text) >= 4 && looks_like_code(trimmed) {
            return Classified::plain(Kind::SourceContext);
        }

        Classified::plain(Kind::Other)
    }

    fn classify_marker_line(&mut self, text: &str, marker_pos: usize, kind: Kind) -> Classified {
        let prefix = &text[..marker_pos];
        let location = parse_location(prefix);
        self.in_std_frame_context = is_std_path(prefix);
        match kind {
            Kind::ErrorLocation => self.error_context_remaining = CONTEXT_LINES,
            _ => self.note_context_remaining = CONTEXT_LINES,
        }
        Classified {
            kind,
            location,
            ..Classified::plain(Kind::Other)
        }
    }
}

/// Lines that must never be swallowed as context.
fn is_diagnostic_header(text: &str, trimmed: &str) -> bool {
    text.contains(ERROR_MARKER)
        || text.contains(NOTE_MARKER)
        || (trimmed.starts_with(TEST_FAIL_PREFIX) && trimmed.contains(TEST_FAIL_SUFFIX))
        || (text.contains(FRAME_MARKER) && text.contains(" in "))
}

/// Split `path:line:col` on the two right-most colons. The line number must
/// parse or there is no location at all; a bad column alone defaults to 1.
fn parse_location(prefix: &str) -> Option<(Range<usize>, u32, u32)> {
    let lead = leading_bytes(prefix);
    let last = prefix.rfind(':')?;
    let tail = prefix[last + 1..].trim();
    let head = &prefix[..last];
    if let Some(mid) = head.rfind(':') {
        if let Ok(line) = head[mid + 1..].trim().parse::<u32>() {
            let col = tail.parse::<u32>().unwrap_or(1);
            return Some((lead..mid, line, col));
        }
    }
    // `path:line` with no column field.
    if let Ok(line) = tail.parse::<u32>() {
        return Some((lead..last, line, 1));
    }
    None
}

/// Ranges of the substrings between `"expected "` and `", found "`.
fn extract_expected(text: &str) -> Option<(Range<usize>, Range<usize>)> {
    let e_start = text.find(EXPECTED_ANCHOR)? + EXPECTED_ANCHOR.len();
    let found_rel = text[e_start..].find(FOUND_ANCHOR)?;
    let a_start = e_start + found_rel + FOUND_ANCHOR.len();
    let a_end = text.trim_end().len().max(a_start);
    Some((e_start..e_start + found_rel, a_start..a_end))
}

fn is_std_path(prefix: &str) -> bool {
    prefix.contains("lib/std") || prefix.contains("lib/compiler")
}

/// Composed solely of pointer glyphs and padding, with at least one marker.
fn is_pointer_line(trimmed: &str) -> bool {
    trimmed
        .chars()
        .all(|c| matches!(c, '~' | '^' | '|' | '-' | '_' | ' ' | '\t'))
        && trimmed.chars().any(|c| c == '~' || c == '^')
}

fn looks_like_code(trimmed: &str) -> bool {
    if trimmed.chars().any(|c| matches!(c, '{' | '}' | '(' | ')' | ';' | '=')) {
        return true;
    }
    let alnum = trimmed.chars().filter(|c| c.is_alphanumeric()).count();
    alnum * 2 >= trimmed.chars().count()
}

/// Leading whitespace in display columns (tab counts as one).
fn leading_width(text: &str) -> usize {
    text.chars().take_while(|c| c.is_whitespace()).count()
}

/// Leading whitespace in bytes, for range arithmetic against byte offsets.
fn leading_bytes(text: &str) -> usize {
    text.len() - text.trim_start().len()
}

fn sub_span(line: Span, range: &Range<usize>) -> Span {
    let len = line.len as usize;
    let start = range.start.min(len);
    let end = range.end.min(len).max(start);
    Span::new(line.offset as usize + start, end - start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_report::Report;

    fn pass(raw: &str) -> Report {
        let mut report = Report::new();
        Classifier::new().parse_pass(raw, &mut report);
        report.compute_collapsed_count();
        report
    }

    fn kinds(report: &Report) -> Vec<Kind> {
        report.lines().iter().map(|l| l.kind).collect()
    }

    #[test]
    fn error_location_with_path_line_col() {
        let report = pass("src/main.zig:42:13: error: expected type 'u32'");
        let line = &report.lines()[0];
        assert_eq!(line.kind, Kind::ErrorLocation);
        let loc = line.location.expect("location parsed");
        assert_eq!(report.arena().text(loc.path), "src/main.zig");
        assert_eq!(loc.line, 42);
        assert_eq!(loc.col, 13);
        assert_eq!(report.stats.errors, 1);
    }

    #[test]
    fn note_location_classified() {
        let report = pass("src/util.zig:7:5: note: declared here");
        assert_eq!(report.lines()[0].kind, Kind::NoteLocation);
        assert_eq!(report.stats.notes, 1);
    }

    #[test]
    fn pointer_line_is_pointer_context() {
        let report = pass("    ~~~~~~~~~~^~~~");
        assert_eq!(report.lines()[0].kind, Kind::PointerContext);
    }

    #[test]
    fn error_arms_source_and_pointer_context() {
        let raw = "src/main.zig:3:9: error: bad type\n    const x: u32 = y;\n    ~~~~~~~~~^~~~~~~~";
        let report = pass(raw);
        assert_eq!(
            kinds(&report),
            vec![Kind::ErrorLocation, Kind::SourceContext, Kind::PointerContext]
        );
    }

    #[test]
    fn header_preempts_pending_context() {
        // Regression: the location line arms a 2-line context expectation;
        // the failure header that follows must not be consumed by it.
        let raw = "src/main.zig:10:1: error: test failure\n\
                   error: 'pkg.test.t01' failed: expected 42, found 4";
        let report = pass(raw);
        assert_eq!(report.lines()[1].kind, Kind::TestFailHeader);
        let failure = &report.failures()[0];
        assert_eq!(report.arena().text(failure.name), "pkg.test.t01");
        assert_eq!(report.arena().text(failure.expected.unwrap()), "42");
        assert_eq!(report.arena().text(failure.actual.unwrap()), "4");
    }

    #[test]
    fn location_header_preempts_context_too() {
        let raw = "src/a.zig:1:1: error: first\nsrc/b.zig:2:2: error: second";
        let report = pass(raw);
        assert_eq!(kinds(&report), vec![Kind::ErrorLocation, Kind::ErrorLocation]);
        assert_eq!(report.lines()[0].group, 1);
        assert_eq!(report.lines()[1].group, 2);
    }

    #[test]
    fn expected_value_line_attaches_to_open_failure() {
        let raw = "error: 'pkg.test.eq' failed:\n  expected 42, found 4";
        let report = pass(raw);
        assert_eq!(report.lines()[1].kind, Kind::TestExpectedValue);
        let failure = &report.failures()[0];
        assert_eq!(report.arena().text(failure.expected.unwrap()), "42");
        assert_eq!(report.arena().text(failure.actual.unwrap()), "4");
        assert_eq!(failure.ordinal, 0);
    }

    #[test]
    fn std_frames_hidden_as_internal() {
        let raw = "/opt/zig/lib/std/testing.zig:103:17: 0x1048f2 in expectEqual (test)\n\
                       if (actual != expected) return error.TestExpectedEqual;\n\
                       ^";
        let report = pass(raw);
        assert_eq!(
            kinds(&report),
            vec![Kind::InternalFrame, Kind::InternalFrame, Kind::InternalFrame]
        );
    }

    #[test]
    fn user_frame_is_note_location_with_context() {
        let raw = "src/main.zig:12:5: 0x1049aa in test.add (test)\n\
                       try testing.expectEqual(4, add(2, 2));\n\
                       ^";
        let report = pass(raw);
        assert_eq!(
            kinds(&report),
            vec![Kind::NoteLocation, Kind::SourceContext, Kind::PointerContext]
        );
        let loc = report.lines()[0].location.unwrap();
        assert_eq!(loc.line, 12);
        assert_eq!(loc.col, 5);
    }

    #[test]
    fn reference_block_spans_indented_lines() {
        let raw = "referenced by:\n    main: src/main.zig:4:5\n    callMain: lib/std/start.zig:1\nnext thing";
        let report = pass(raw);
        assert_eq!(
            kinds(&report),
            vec![
                Kind::ReferencedByNoise,
                Kind::ReferencedByNoise,
                Kind::ReferencedByNoise,
                Kind::Other,
            ]
        );
    }

    #[test]
    fn noise_markers() {
        let raw = "Build Summary: 3/5 steps succeeded; 1 failed\n\
                   └─ zig build-exe app Debug native 1 errors\n\
                   error: the following command failed with 1 compilation errors:\n\
                   /opt/zig/zig build-exe -ODebug src/main.zig";
        let report = pass(raw);
        assert_eq!(
            kinds(&report),
            vec![
                Kind::BuildSummaryNoise,
                Kind::BuildTreeNoise,
                Kind::FinalError,
                Kind::CommandDumpNoise,
            ]
        );
    }

    #[test]
    fn error_without_location() {
        let report = pass("error: FileNotFound");
        assert_eq!(report.lines()[0].kind, Kind::BuildErrorNoLocation);
        assert_eq!(report.stats.errors, 1);
    }

    #[test]
    fn test_summary_and_runner_lines() {
        let raw = "test.add... OK\ntest.sub... FAIL\n1 passed; 0 skipped; 1 failed.";
        let report = pass(raw);
        assert_eq!(
            kinds(&report),
            vec![Kind::TestPass, Kind::TestFailHeader, Kind::TestSummary]
        );
        assert_eq!(report.stats.tests_passed, 1);
        assert_eq!(report.stats.tests_failed, 1);
        assert_eq!(report.arena().text(report.failures()[0].name), "test.sub");
    }

    #[test]
    fn all_pass_summary() {
        let report = pass("All 12 tests passed.");
        assert_eq!(report.lines()[0].kind, Kind::TestSummary);
    }

    #[test]
    fn expected_extraction_with_leading_spaces() {
        let (expected, actual) = extract_expected("  expected 42, found 4").unwrap();
        assert_eq!(&"  expected 42, found 4"[expected], "42");
        assert_eq!(&"  expected 42, found 4"[actual], "4");
    }

    #[test]
    fn location_without_column_defaults_to_one() {
        let (path, line, col) = parse_location("src/main.zig:12").unwrap();
        assert_eq!(&"src/main.zig:12"[path], "src/main.zig");
        assert_eq!(line, 12);
        assert_eq!(col, 1);
    }

    #[test]
    fn unparsable_location_yields_none() {
        assert!(parse_location("no colons here").is_none());
        assert!(parse_location("path:x:y").is_none());
        let report = pass("weird:path: error: message");
        assert_eq!(report.lines()[0].kind, Kind::ErrorLocation);
        assert!(report.lines()[0].location.is_none());
    }

    #[test]
    fn blank_lines_and_crlf() {
        let report = pass("src/a.zig:1:1: error: x\r\n\r\n   \nok");
        assert_eq!(report.lines()[0].kind, Kind::ErrorLocation);
        assert_eq!(report.lines()[1].kind, Kind::Blank);
        assert_eq!(report.lines()[2].kind, Kind::Blank);
        // The blank abandoned the armed context, so "ok" is not source text.
        assert_eq!(report.lines()[3].kind, Kind::Other);
    }

    #[test]
    fn indented_code_outside_context() {
        let report = pass("        const x = foo();");
        assert_eq!(report.lines()[0].kind, Kind::SourceContext);
    }

    #[test]
    fn notes_share_group_with_their_error() {
        let raw = "src/a.zig:1:1: error: boom\n\
                   x\n\
                   ^\n\
                   src/a.zig:9:9: note: declared here";
        let report = pass(raw);
        let groups: Vec<u32> = report.lines().iter().map(|l| l.group).collect();
        assert_eq!(groups, vec![1, 1, 1, 1]);
    }

    #[test]
    fn pass_stops_on_exhausted_line_table() {
        let mut report = Report::with_limits(4096, 128, 3, 8);
        Classifier::new().parse_pass("a\nb\nc\nd\ne", &mut report);
        assert!(report.truncated);
        assert_eq!(report.lines().len(), 3);
        for line in report.lines() {
            assert!(line.text.end() <= report.arena().used());
        }
    }

    #[test]
    fn pass_stops_on_exhausted_arena() {
        let mut report = Report::with_limits(8, 128, 64, 8);
        Classifier::new().parse_pass("abcdef\nghijkl", &mut report);
        assert!(report.truncated);
        assert_eq!(report.lines().len(), 1);
    }

    #[test]
    fn state_resets_between_passes() {
        let mut classifier = Classifier::new();
        let mut report = Report::new();
        classifier.parse_pass("src/a.zig:1:1: error: x", &mut report);
        report.clear();
        // A fresh pass must not inherit the armed context from the last one.
        classifier.parse_pass("plain text", &mut report);
        assert_eq!(report.lines()[0].kind, Kind::Other);
    }

    #[test]
    fn collapsed_view_hides_noise_by_default() {
        let raw = "src/a.zig:1:1: error: x\n\
                   code\n\
                   ^\n\
                   Build Summary: 1 failed\n\
                   └─ step\n\
                   /opt/zig/zig build-exe src/a.zig";
        let report = pass(raw);
        assert_eq!(report.collapsed_count(), 3);
    }
}
