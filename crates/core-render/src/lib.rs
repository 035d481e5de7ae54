//! Terminal rendering of a report snapshot.
//!
//! Full-frame repaint into any `Write` target (stdout in production, a byte
//! buffer in tests), driven by the orchestrator's dirty flag. One status
//! header row, then the visible slice of the line list, styled per kind.
//! Rendering is read-only over the report; all mutation happens on the
//! orchestrator thread between frames.

mod nav;
mod session;

pub use nav::{next_group, prev_group};
pub use session::TerminalSession;

use anyhow::Result;
use core_report::{Kind, Report};
use crossterm::{
    cursor::MoveTo,
    queue,
    style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use std::io::Write;

/// Executor status as the renderer needs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildIndicator {
    Idle,
    Running,
    /// Exit 0 and nothing classified as an error.
    Ok,
    /// Build ran; diagnostics present or non-zero exit.
    Errors,
    /// Command could not be launched; visually distinct from build errors.
    SpawnFailed,
}

impl BuildIndicator {
    fn label(self) -> &'static str {
        match self {
            BuildIndicator::Idle => "idle",
            BuildIndicator::Running => "building...",
            BuildIndicator::Ok => "ok",
            BuildIndicator::Errors => "errors",
            BuildIndicator::SpawnFailed => "spawn failed",
        }
    }

    fn color(self) -> Color {
        match self {
            BuildIndicator::Idle => Color::DarkGrey,
            BuildIndicator::Running => Color::Yellow,
            BuildIndicator::Ok => Color::Green,
            BuildIndicator::Errors => Color::Red,
            BuildIndicator::SpawnFailed => Color::Magenta,
        }
    }
}

/// Scroll/cursor/filter state owned by the orchestrator.
#[derive(Debug, Default)]
pub struct ViewState {
    pub scroll: usize,
    /// Cursor as an absolute line index into the report, kept on a
    /// group-starting line by the navigation keys.
    pub cursor: Option<usize>,
    /// Raw view shows every stored line, noise included.
    pub raw: bool,
}

impl ViewState {
    pub fn collapsed(&self) -> bool {
        !self.raw
    }

    pub fn reset_for_new_report(&mut self) {
        self.scroll = 0;
        self.cursor = None;
    }
}

#[derive(Debug, Clone)]
pub struct Header<'a> {
    pub project: &'a str,
    pub job: &'a str,
    pub indicator: BuildIndicator,
}

/// Indices of the lines the current view shows, in display order.
pub fn visible_indices(report: &Report, view: &ViewState) -> Vec<usize> {
    if view.raw {
        (0..report.lines().len()).collect()
    } else {
        report.collapsed_indices()
    }
}

fn kind_color(kind: Kind) -> Color {
    match kind {
        Kind::ErrorLocation | Kind::BuildErrorNoLocation | Kind::FinalError => Color::Red,
        Kind::NoteLocation => Color::Cyan,
        Kind::PointerContext => Color::Green,
        Kind::TestFailHeader => Color::Red,
        Kind::TestExpectedValue => Color::Yellow,
        Kind::TestSummary | Kind::BuildSummaryNoise => Color::Yellow,
        Kind::TestPass => Color::Green,
        Kind::InternalFrame
        | Kind::BuildTreeNoise
        | Kind::ReferencedByNoise
        | Kind::CommandDumpNoise
        | Kind::Other => Color::DarkGrey,
        Kind::SourceContext | Kind::Blank => Color::Reset,
    }
}

#[derive(Debug, Default)]
pub struct RenderEngine;

impl RenderEngine {
    pub fn new() -> Self {
        Self
    }

    /// Paint one full frame. `rows`/`cols` come from the terminal; one row
    /// is reserved for the header.
    pub fn render(
        &mut self,
        out: &mut impl Write,
        report: &Report,
        view: &ViewState,
        header: &Header<'_>,
        cols: u16,
        rows: u16,
    ) -> Result<()> {
        queue!(out, Clear(ClearType::All), MoveTo(0, 0))?;
        self.render_header(out, report, header, cols)?;

        let visible = visible_indices(report, view);
        let text_rows = rows.saturating_sub(1) as usize;
        let scroll = clamp_scroll(view.scroll, visible.len(), text_rows);

        for (row, &index) in visible.iter().skip(scroll).take(text_rows).enumerate() {
            let line = &report.lines()[index];
            let text = report.line_text(line);
            let clipped = clip_cols(text, cols as usize);
            queue!(out, MoveTo(0, row as u16 + 1))?;
            if view.cursor == Some(index) {
                queue!(out, SetAttribute(Attribute::Reverse))?;
            }
            queue!(
                out,
                SetForegroundColor(kind_color(line.kind)),
                Print(clipped),
                ResetColor,
                SetAttribute(Attribute::Reset)
            )?;
        }
        out.flush()?;
        Ok(())
    }

    fn render_header(
        &self,
        out: &mut impl Write,
        report: &Report,
        header: &Header<'_>,
        cols: u16,
    ) -> Result<()> {
        let stats = report.stats;
        let mut text = format!(
            "vigil {} [{}] {} | {} errors, {} notes",
            header.project,
            header.job,
            header.indicator.label(),
            stats.errors,
            stats.notes,
        );
        if stats.tests_passed + stats.tests_failed > 0 {
            text.push_str(&format!(
                " | tests {} passed, {} failed",
                stats.tests_passed, stats.tests_failed
            ));
        }
        if report.truncated {
            text.push_str(" [output truncated]");
        }
        queue!(
            out,
            SetAttribute(Attribute::Bold),
            SetForegroundColor(header.indicator.color()),
            Print(clip_cols(&text, cols as usize)),
            ResetColor,
            SetAttribute(Attribute::Reset)
        )?;
        Ok(())
    }
}

/// Keep the top of the window inside the scrollable range.
pub fn clamp_scroll(scroll: usize, total: usize, text_rows: usize) -> usize {
    scroll.min(total.saturating_sub(text_rows))
}

/// Byte-safe clip to the terminal width. Diagnostic text is effectively
/// single-width; wide grapheme handling is not worth the dependency here.
fn clip_cols(text: &str, cols: usize) -> &str {
    if cols == 0 {
        return "";
    }
    match text.char_indices().nth(cols) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}
