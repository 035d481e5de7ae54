//! Blocking input thread.
//!
//! Reads crossterm events and forwards the normalized subset over the
//! bounded channel with `blocking_send` (backpressure parks the thread,
//! nothing is dropped). The thread exits when the consumer side goes away.

use core_events::{Event, InputEvent, Key};
use crossterm::event::{self, Event as TermEvent, KeyCode, KeyEventKind, KeyModifiers};
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn spawn(tx: Sender<Event>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        loop {
            match event::poll(POLL_INTERVAL) {
                Ok(true) => {}
                Ok(false) => {
                    if tx.is_closed() {
                        break;
                    }
                    continue;
                }
                Err(err) => {
                    debug!(target: "input", %err, "event poll failed");
                    break;
                }
            }
            let Ok(term_event) = event::read() else {
                break;
            };
            let Some(input) = translate(term_event) else {
                continue;
            };
            if tx.blocking_send(Event::Input(input)).is_err() {
                break;
            }
        }
        debug!(target: "input", "input thread exiting");
    })
}

fn translate(term_event: TermEvent) -> Option<InputEvent> {
    match term_event {
        TermEvent::Key(key) if key.kind != KeyEventKind::Release => {
            if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
                return Some(InputEvent::CtrlC);
            }
            let mapped = match key.code {
                KeyCode::Char(c) => Key::Char(c),
                KeyCode::Up => Key::Up,
                KeyCode::Down => Key::Down,
                KeyCode::PageUp => Key::PageUp,
                KeyCode::PageDown => Key::PageDown,
                KeyCode::Home => Key::Home,
                KeyCode::End => Key::End,
                KeyCode::Esc => Key::Esc,
                _ => return None,
            };
            Some(InputEvent::Key(mapped))
        }
        TermEvent::Resize(cols, rows) => Some(InputEvent::Resize(cols, rows)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyEvent, KeyEventState};

    fn key(code: KeyCode, mods: KeyModifiers) -> TermEvent {
        TermEvent::Key(KeyEvent {
            code,
            modifiers: mods,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        })
    }

    #[test]
    fn ctrl_c_is_distinct() {
        assert_eq!(
            translate(key(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(InputEvent::CtrlC)
        );
        assert_eq!(
            translate(key(KeyCode::Char('c'), KeyModifiers::NONE)),
            Some(InputEvent::Key(Key::Char('c')))
        );
    }

    #[test]
    fn unmapped_keys_dropped() {
        assert_eq!(translate(key(KeyCode::F(5), KeyModifiers::NONE)), None);
        assert_eq!(translate(key(KeyCode::Enter, KeyModifiers::NONE)), None);
    }

    #[test]
    fn resize_passes_through() {
        assert_eq!(
            translate(TermEvent::Resize(80, 24)),
            Some(InputEvent::Resize(80, 24))
        );
    }
}
