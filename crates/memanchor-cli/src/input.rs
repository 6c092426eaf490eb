use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use memanchor_core::{SessionCommand, ShutdownSignal};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
    Quit,
    Send(SessionCommand),
}

/// Spawn a thread that turns key presses into session commands.
///
/// - Esc, `q`, Ctrl+C: shutdown
/// - `i`: scan inventory, `w`: scan warehouse, `r`: relocate the record
pub fn spawn_keyboard_monitor(
    shutdown: Arc<ShutdownSignal>,
    commands: Sender<SessionCommand>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        debug!("Keyboard monitor started");

        while !shutdown.is_shutdown() {
            if !event::poll(Duration::from_millis(100)).unwrap_or(false) {
                continue;
            }
            let Ok(Event::Key(key_event)) = event::read() else {
                continue;
            };
            match key_action(&key_event) {
                Some(KeyAction::Quit) => {
                    debug!("Shutdown key pressed: {:?}", key_event.code);
                    shutdown.trigger();
                    break;
                }
                Some(KeyAction::Send(command)) => {
                    if commands.send(command).is_err() {
                        break;
                    }
                    shutdown.nudge();
                }
                None => {}
            }
        }

        debug!("Keyboard monitor stopped");
    })
}

fn key_action(event: &KeyEvent) -> Option<KeyAction> {
    match event.code {
        KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('Q') => Some(KeyAction::Quit),
        KeyCode::Char('c') if event.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(KeyAction::Quit)
        }
        KeyCode::Char('i') => Some(KeyAction::Send(SessionCommand::ScanInventory)),
        KeyCode::Char('w') => Some(KeyAction::Send(SessionCommand::ScanWarehouse)),
        KeyCode::Char('r') => Some(KeyAction::Send(SessionCommand::Relocate)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(code: KeyCode, modifiers: KeyModifiers) -> Option<KeyAction> {
        key_action(&KeyEvent::new(code, modifiers))
    }

    #[test]
    fn test_quit_keys() {
        assert_eq!(action(KeyCode::Esc, KeyModifiers::NONE), Some(KeyAction::Quit));
        assert_eq!(action(KeyCode::Char('Q'), KeyModifiers::SHIFT), Some(KeyAction::Quit));
        assert_eq!(
            action(KeyCode::Char('c'), KeyModifiers::CONTROL),
            Some(KeyAction::Quit)
        );
    }

    #[test]
    fn test_command_keys() {
        assert_eq!(
            action(KeyCode::Char('i'), KeyModifiers::NONE),
            Some(KeyAction::Send(SessionCommand::ScanInventory))
        );
        assert_eq!(
            action(KeyCode::Char('w'), KeyModifiers::NONE),
            Some(KeyAction::Send(SessionCommand::ScanWarehouse))
        );
        assert_eq!(
            action(KeyCode::Char('r'), KeyModifiers::NONE),
            Some(KeyAction::Send(SessionCommand::Relocate))
        );
    }

    #[test]
    fn test_other_keys_ignored() {
        assert_eq!(action(KeyCode::Char('a'), KeyModifiers::NONE), None);
        assert_eq!(action(KeyCode::Enter, KeyModifiers::NONE), None);
        assert_eq!(action(KeyCode::Char('c'), KeyModifiers::NONE), None);
    }
}
