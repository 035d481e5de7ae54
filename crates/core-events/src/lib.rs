//! Event types and async event sources for the Vigil runtime loop.
//!
//! The loop consumes a bounded tokio mpsc channel. The blocking input thread
//! uses `blocking_send`, which parks the producer under backpressure instead
//! of dropping keystrokes; with one input producer and one consumer this
//! keeps latency low and never loses an action.

use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;

pub const EVENT_CHANNEL_CAP: usize = 1024;

/// Top-level event consumed by the runtime loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Input(InputEvent),
    /// Periodic monotonic tick: drives watcher polling and executor polling
    /// without busy looping.
    Tick,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Key(Key),
    Resize(u16, u16),
    /// Ctrl-C surfaced distinctly so the loop can cancel + quit.
    CtrlC,
}

/// Normalized keys Vigil reacts to. Translation from the terminal event
/// model happens in the input layer; everything unmapped is dropped there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Up,
    Down,
    PageUp,
    PageDown,
    Home,
    End,
    Esc,
}

/// An async producer that pushes events into the shared channel. Sources
/// stop on their own when `send` fails (consumer dropped).
pub trait AsyncEventSource: Send + 'static {
    /// Stable identifier used for logging.
    fn name(&self) -> &'static str;
    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()>;
}

/// Emits `Event::Tick` on a fixed interval.
pub struct TickEventSource {
    interval: Duration,
}

impl TickEventSource {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl AsyncEventSource for TickEventSource {
    fn name(&self) -> &'static str {
        "tick"
    }

    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()> {
        let period = self.interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if tx.send(Event::Tick).await.is_err() {
                    break;
                }
            }
        })
    }
}

/// Registry spawning all sources at startup. Draining on spawn prevents a
/// duplicate launch if called twice.
#[derive(Default)]
pub struct EventSourceRegistry {
    sources: Vec<Box<dyn AsyncEventSource>>,
}

impl EventSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S: AsyncEventSource>(&mut self, source: S) {
        self.sources.push(Box::new(source));
    }

    pub fn spawn_all(&mut self, tx: &Sender<Event>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.sources.len());
        for source in self.sources.drain(..) {
            tracing::info!(target: "runtime.events", source = source.name(), "spawning event source");
            handles.push(source.spawn(tx.clone()));
        }
        handles
    }
}
