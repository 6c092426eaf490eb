//! Live tracking mode.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use anyhow::{Result, anyhow};
use chrono::Local;
use memanchor_core::{
    DecodedField, FieldLayout, PidConnector, ScanConfig, SessionEnd, SessionEvent, SessionState,
    ShutdownSignal, SlotKind, TrackingSession, format_slot_table,
};
use owo_colors::OwoColorize;
use tracing::info;

use super::{build_request, target_pid};
use crate::input;
use crate::{LocateArgs, TargetArgs};

pub fn run(
    target: &TargetArgs,
    args: &LocateArgs,
    config: ScanConfig,
    layout: FieldLayout,
) -> Result<()> {
    let request = build_request(args, &layout)?;
    let pid = target_pid(target)?;

    let shutdown = Arc::new(ShutdownSignal::new());
    let shutdown_ctrlc = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal, stopping...");
        shutdown_ctrlc.trigger();
    })?;

    let (command_tx, command_rx) = mpsc::channel();
    let _keyboard_handle = input::spawn_keyboard_monitor(Arc::clone(&shutdown), command_tx);

    let (event_tx, event_rx) = mpsc::channel();
    let session_shutdown = Arc::clone(&shutdown);
    let session = thread::spawn(move || {
        let session = TrackingSession::new(&config, &layout).with_commands(command_rx);
        session.run(
            &mut PidConnector { pid },
            &request,
            &session_shutdown,
            &event_tx,
        )
    });

    println!("Tracking pid {} (i: inventory, w: warehouse, r: relocate, q: quit)", pid);
    for event in event_rx {
        print_event(&event);
    }

    let end = session
        .join()
        .map_err(|_| anyhow!("Tracking thread panicked"))?;
    shutdown.trigger();
    match end {
        SessionEnd::Stopped => println!("Stopped."),
        SessionEnd::ConnectFailed => println!("{}", "Could not attach to the process".red()),
        SessionEnd::NotFound => println!("{}", "Record not found".red()),
        SessionEnd::ProcessLost => println!("{}", "Process lost".red()),
    }
    Ok(())
}

fn print_event(event: &SessionEvent) {
    let now = Local::now().format("%H:%M:%S");
    match event {
        SessionEvent::State(state) => {
            let label = state.to_string();
            match state {
                SessionState::Located => println!("[{}] {}", now, label.green()),
                SessionState::ReadError | SessionState::Disconnected => {
                    println!("[{}] {}", now, label.red())
                }
                SessionState::Connecting | SessionState::Rescanning => {
                    println!("[{}] {}", now, label.yellow())
                }
            }
        }
        SessionEvent::Located {
            address,
            score,
            variant,
            name,
        } => {
            println!(
                "[{}] Record at 0x{:08X} (score {:.2}, {}) {}",
                now,
                address,
                score,
                variant,
                name.as_deref().unwrap_or("")
            );
        }
        SessionEvent::Fields { fields, .. } => {
            println!("[{}] {}", now, format_fields(fields));
        }
        SessionEvent::NotFound(value) => {
            println!("[{}] No record holds {}", now, value);
        }
        SessionEvent::Slots { kind, array } => {
            let title = match kind {
                SlotKind::Inventory => "Inventory",
                SlotKind::Warehouse => "Warehouse",
            };
            print!("{}", format_slot_table(title, array));
        }
        SessionEvent::Error(message) => {
            println!("[{}] {}", now, message.red());
        }
    }
}

fn format_fields(fields: &[DecodedField]) -> String {
    fields
        .iter()
        .map(|f| match f.value {
            Some(v) => format!("{}={}", f.name, v),
            None => format!("{}=?", f.name),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
