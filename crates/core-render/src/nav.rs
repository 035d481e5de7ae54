//! Group navigation over a report's line table.
//!
//! A "group" is one diagnostic (an error or a test failure). Navigation
//! moves the cursor between group-starting lines, restricted to the lines
//! the current view actually shows.

use core_report::Report;

/// Indices of group-starting lines among `visible` (absolute line indices,
/// display order).
fn group_starts(report: &Report, visible: &[usize]) -> Vec<usize> {
    visible
        .iter()
        .copied()
        .filter(|&i| report.lines()[i].kind.starts_group())
        .collect()
}

/// First group start strictly after `cursor`, or the first one when the
/// cursor is unset.
pub fn next_group(report: &Report, visible: &[usize], cursor: Option<usize>) -> Option<usize> {
    let starts = group_starts(report, visible);
    match cursor {
        None => starts.first().copied(),
        Some(current) => starts.iter().copied().find(|&i| i > current),
    }
}

/// Last group start strictly before `cursor`, or the last one when the
/// cursor is unset.
pub fn prev_group(report: &Report, visible: &[usize], cursor: Option<usize>) -> Option<usize> {
    let starts = group_starts(report, visible);
    match cursor {
        None => starts.last().copied(),
        Some(current) => starts.iter().rev().copied().find(|&i| i < current),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_report::{Kind, Line, Report};

    fn report_with(kinds: &[Kind]) -> Report {
        let mut report = Report::new();
        let mut group = 0u32;
        for kind in kinds {
            let span = report.append_text("x").unwrap();
            if kind.starts_group() {
                group += 1;
            }
            report
                .append_line(Line {
                    text: span,
                    kind: *kind,
                    group,
                    location: None,
                })
                .unwrap();
        }
        report
    }

    #[test]
    fn next_and_prev_walk_group_starts() {
        let report = report_with(&[
            Kind::ErrorLocation,  // 0
            Kind::SourceContext,  // 1
            Kind::ErrorLocation,  // 2
            Kind::TestFailHeader, // 3
        ]);
        let visible: Vec<usize> = (0..report.lines().len()).collect();
        assert_eq!(next_group(&report, &visible, None), Some(0));
        assert_eq!(next_group(&report, &visible, Some(0)), Some(2));
        assert_eq!(next_group(&report, &visible, Some(2)), Some(3));
        assert_eq!(next_group(&report, &visible, Some(3)), None);
        assert_eq!(prev_group(&report, &visible, Some(3)), Some(2));
        assert_eq!(prev_group(&report, &visible, Some(2)), Some(0));
        assert_eq!(prev_group(&report, &visible, Some(0)), None);
    }

    #[test]
    fn navigation_respects_visibility_filter() {
        let report = report_with(&[Kind::ErrorLocation, Kind::ErrorLocation]);
        // Second error filtered out of view.
        let visible = vec![0usize];
        assert_eq!(next_group(&report, &visible, Some(0)), None);
    }

    #[test]
    fn empty_report_navigates_nowhere() {
        let report = report_with(&[]);
        assert_eq!(next_group(&report, &[], None), None);
        assert_eq!(prev_group(&report, &[], None), None);
    }
}
