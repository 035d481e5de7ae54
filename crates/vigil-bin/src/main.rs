//! Vigil entrypoint: a live error panel over a watched build command.
//!
//! The runtime is one foreground loop over a bounded event channel. Each
//! tick polls the watcher (maybe starting a build), polls the executor
//! (never blocking on it), and repaints when anything marked the frame
//! dirty. The build itself runs on the executor's background thread; its
//! output is classified here, on the foreground thread, only after that
//! thread has been joined by `poll`.

mod input;

use anyhow::Result;
use clap::Parser;
use core_classify::Classifier;
use core_config::JobTable;
use core_events::{
    Event, EventSourceRegistry, InputEvent, Key, TickEventSource, EVENT_CHANNEL_CAP,
};
use core_exec::{BuildExecutor, BuildPoll};
use core_render::{
    next_group, prev_group, visible_indices, BuildIndicator, Header, RenderEngine,
    TerminalSession, ViewState,
};
use core_report::Report;
use core_watch::{WatchConfig, Watcher};
use std::path::PathBuf;
use std::sync::Once;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

const TICK_INTERVAL: Duration = Duration::from_millis(100);
const HEADER_ROWS: usize = 1;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "vigil", version, about = "Live build error panel")]
struct Args {
    /// Configuration file path (overrides discovery of `vigil.toml`).
    #[arg(long = "config")]
    config: Option<PathBuf>,
    /// Job to activate at startup (default: build).
    #[arg(long = "job")]
    job: Option<String>,
    /// Custom build command replacing the active job's one.
    #[arg(last = true)]
    command: Vec<String>,
}

fn configure_logging() -> Option<WorkerGuard> {
    let appender = tracing_appender::rolling::never(".", "vigil.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    match tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
    {
        Ok(()) => Some(guard),
        // A subscriber is already installed (tests); drop the guard so the
        // writer shuts down.
        Err(_) => None,
    }
}

fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            tracing::error!(target: "runtime.panic", ?info, "panic");
            default_panic(info);
        }));
    });
}

fn project_name() -> String {
    std::env::current_dir()
        .ok()
        .and_then(|dir| dir.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "project".to_string())
}

/// Everything the foreground loop owns. The report is the single shared
/// instance for the process lifetime; access is serialized by the loop, so
/// no locks are involved anywhere on this path.
struct Runtime {
    report: Report,
    classifier: Classifier,
    executor: BuildExecutor,
    watcher: Watcher,
    jobs: JobTable,
    view: ViewState,
    engine: RenderEngine,
    indicator: BuildIndicator,
    project: String,
    dirty: bool,
}

impl Runtime {
    fn new(jobs: JobTable, watcher: Watcher) -> Self {
        Self {
            report: Report::new(),
            classifier: Classifier::new(),
            executor: BuildExecutor::new(),
            watcher,
            jobs,
            view: ViewState::default(),
            engine: RenderEngine::new(),
            indicator: BuildIndicator::Idle,
            project: project_name(),
            dirty: true,
        }
    }

    fn start_build(&mut self) {
        let job = self.jobs.active();
        self.executor.start(&job.command, &job.args);
        self.indicator = BuildIndicator::Running;
        self.dirty = true;
    }

    fn on_tick(&mut self) {
        if self.watcher.poll() {
            info!(target: "runtime", "source change detected");
            self.start_build();
        }
        match self.executor.poll() {
            BuildPoll::Idle | BuildPoll::Pending => {}
            BuildPoll::Done(output) => {
                self.report.clear();
                self.classifier.parse_pass(&output.text, &mut self.report);
                self.report.exit_code = Some(output.exit_code);
                self.report.compute_collapsed_count();
                self.indicator = outcome_indicator(&self.report);
                self.view.reset_for_new_report();
                self.dirty = true;
            }
            BuildPoll::SpawnFailed(message) => {
                error!(target: "runtime", %message, "build spawn failed");
                self.indicator = BuildIndicator::SpawnFailed;
                self.dirty = true;
            }
        }
    }

    /// Returns true when the key requests shutdown.
    fn on_key(&mut self, key: Key, text_rows: usize) -> bool {
        match key {
            Key::Char('q') | Key::Esc => return true,
            Key::Char('j') | Key::Down => self.view.scroll = self.view.scroll.saturating_add(1),
            Key::Char('k') | Key::Up => self.view.scroll = self.view.scroll.saturating_sub(1),
            Key::PageDown => self.view.scroll = self.view.scroll.saturating_add(text_rows),
            Key::PageUp => self.view.scroll = self.view.scroll.saturating_sub(text_rows),
            Key::Char('g') | Key::Home => self.view.scroll = 0,
            Key::Char('G') | Key::End => self.view.scroll = usize::MAX, // clamped at render
            Key::Char('c') => {
                self.view.raw = !self.view.raw;
                self.view.scroll = 0;
            }
            Key::Char('n') => self.move_cursor(true, text_rows),
            Key::Char('p') => self.move_cursor(false, text_rows),
            Key::Char('b') => self.switch_job("build"),
            Key::Char('t') => self.switch_job("test"),
            Key::Char('r') => self.start_build(),
            _ => return false,
        }
        self.dirty = true;
        false
    }

    fn switch_job(&mut self, name: &str) {
        if self.jobs.switch_to(name) {
            self.start_build();
        }
    }

    fn move_cursor(&mut self, forward: bool, text_rows: usize) {
        let visible = visible_indices(&self.report, &self.view);
        let target = if forward {
            next_group(&self.report, &visible, self.view.cursor)
        } else {
            prev_group(&self.report, &visible, self.view.cursor)
        };
        let Some(index) = target else {
            return;
        };
        self.view.cursor = Some(index);
        if let Some(pos) = visible.iter().position(|&i| i == index) {
            self.view.scroll = follow_scroll(self.view.scroll, pos, text_rows);
        }
    }

    fn render(&mut self) -> Result<()> {
        let (cols, rows) = crossterm::terminal::size().unwrap_or((80, 24));
        let header = Header {
            project: &self.project,
            job: self.jobs.active().name.as_str(),
            indicator: self.indicator,
        };
        let visible_len = visible_indices(&self.report, &self.view).len();
        self.view.scroll = core_render::clamp_scroll(
            self.view.scroll,
            visible_len,
            rows.saturating_sub(HEADER_ROWS as u16) as usize,
        );
        let mut out = std::io::stdout();
        self.engine
            .render(&mut out, &self.report, &self.view, &header, cols, rows)?;
        self.dirty = false;
        Ok(())
    }
}

/// Indicator for a completed build: spawn failures never reach here.
fn outcome_indicator(report: &Report) -> BuildIndicator {
    let clean = report.exit_code == Some(0)
        && report.stats.errors == 0
        && report.stats.tests_failed == 0;
    if clean {
        BuildIndicator::Ok
    } else {
        BuildIndicator::Errors
    }
}

/// Keep `pos` (an offset into the visible list) inside the window.
fn follow_scroll(scroll: usize, pos: usize, text_rows: usize) -> usize {
    if text_rows == 0 {
        return scroll;
    }
    if pos < scroll {
        pos
    } else if pos >= scroll + text_rows {
        pos + 1 - text_rows
    } else {
        scroll
    }
}

fn text_rows_now() -> usize {
    crossterm::terminal::size()
        .map(|(_, rows)| (rows as usize).saturating_sub(HEADER_ROWS))
        .unwrap_or(23)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = configure_logging();
    install_panic_hook();
    let args = Args::parse();
    info!(target: "runtime", "startup");

    let config = core_config::load_from(args.config.clone())?;
    let mut jobs = JobTable::from_config(&config);
    if let Some(job) = &args.job {
        jobs.switch_to(job);
    }
    if !args.command.is_empty() {
        jobs.override_active(&args.command);
    }
    let watcher = Watcher::new(WatchConfig {
        roots: config.file.watch.paths.iter().map(PathBuf::from).collect(),
        extensions: config.file.watch.extensions.clone(),
        interval: config.file.watch.interval(),
    });

    let mut session = TerminalSession::enter()?;
    let (tx, mut rx) = mpsc::channel::<Event>(EVENT_CHANNEL_CAP);
    let mut registry = EventSourceRegistry::new();
    registry.register(TickEventSource::new(TICK_INTERVAL));
    let source_handles = registry.spawn_all(&tx);
    let _input_thread = input::spawn(tx.clone());

    let mut runtime = Runtime::new(jobs, watcher);
    runtime.start_build();

    while let Some(event) = rx.recv().await {
        match event {
            Event::Tick => runtime.on_tick(),
            Event::Input(InputEvent::Key(key)) => {
                if runtime.on_key(key, text_rows_now()) {
                    break;
                }
            }
            Event::Input(InputEvent::CtrlC) => break,
            Event::Input(InputEvent::Resize(..)) => runtime.dirty = true,
        }
        if runtime.dirty {
            runtime.render()?;
        }
    }

    info!(target: "runtime", "shutdown");
    // Kill and join any in-flight build before the terminal is restored.
    runtime.executor.cancel();
    drop(rx);
    drop(tx);
    for handle in source_handles {
        handle.abort();
    }
    session.leave()?;
    Ok(())
}
