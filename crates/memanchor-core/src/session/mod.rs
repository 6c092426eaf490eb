//! Live tracking of one process session.
//!
//! A session connects, locates the record, then polls it on a fixed interval.
//! Three consecutive failed polls discard the anchor: read errors first try
//! to reconnect, then the record is located again. The loop checks the
//! shutdown signal every tick and never shares mutable state with other
//! sessions.

mod shutdown;

use std::sync::mpsc::{Receiver, Sender};

use serde::Serialize;
use strum::Display;
use tracing::{debug, info, warn};

pub use shutdown::{ShutdownSignal, Wake};

use crate::config::{ScanConfig, TrackingConfig};
use crate::error::{Error, Result};
use crate::layout::{DecodedField, FieldLayout, read_fields};
use crate::memory::{ProcessHandle, ProcessMemory, ReadMemory, RegionFilter};
use crate::scan::verify::verify;
use crate::scan::{
    Candidate, LayoutVariant, LocateRequest, RecordLocator, RecordProfile, SlotArray, SlotScanner,
    read_record_name,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Located,
    ReadError,
    Rescanning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SlotKind {
    Inventory,
    Warehouse,
}

/// Requests a caller can queue for the session thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    ScanInventory,
    ScanWarehouse,
    /// Discard the anchor and locate again.
    Relocate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    State(SessionState),
    Located {
        address: u64,
        score: f64,
        variant: LayoutVariant,
        name: Option<String>,
    },
    Fields {
        address: u64,
        score: f64,
        fields: Vec<DecodedField>,
    },
    NotFound(i32),
    Slots {
        kind: SlotKind,
        array: SlotArray,
    },
    Error(String),
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionEnd {
    Stopped,
    ConnectFailed,
    NotFound,
    ProcessLost,
}

/// Receiver of session events.
pub trait SessionSink {
    fn emit(&self, event: SessionEvent);
}

impl SessionSink for Sender<SessionEvent> {
    fn emit(&self, event: SessionEvent) {
        if self.send(event).is_err() {
            debug!("Session event receiver dropped");
        }
    }
}

/// Opens (or reopens) the target process.
pub trait Connector {
    type Process: ProcessMemory;

    fn connect(&mut self) -> Result<Self::Process>;
}

/// Connects to a fixed pid.
#[derive(Debug, Clone, Copy)]
pub struct PidConnector {
    pub pid: u32,
}

impl Connector for PidConnector {
    type Process = ProcessHandle;

    fn connect(&mut self) -> Result<ProcessHandle> {
        ProcessHandle::open(self.pid)
    }
}

/// Adapts a closure into a [`Connector`].
pub struct FnConnector<F>(pub F);

impl<P, F> Connector for FnConnector<F>
where
    P: ProcessMemory,
    F: FnMut() -> Result<P>,
{
    type Process = P;

    fn connect(&mut self) -> Result<P> {
        (self.0)()
    }
}

enum Poll {
    Valid { score: f64, fields: Vec<DecodedField> },
    Invalid { score: f64 },
}

pub struct TrackingSession<'a> {
    layout: &'a FieldLayout,
    profile: RecordProfile,
    filter: RegionFilter,
    tracking: TrackingConfig,
    commands: Option<Receiver<SessionCommand>>,
}

impl<'a> TrackingSession<'a> {
    pub fn new(config: &ScanConfig, layout: &'a FieldLayout) -> Self {
        Self {
            layout,
            profile: config.verify.profile(layout),
            filter: config.memory.region_filter(),
            tracking: config.tracking.clone(),
            commands: None,
        }
    }

    pub fn with_commands(mut self, commands: Receiver<SessionCommand>) -> Self {
        self.commands = Some(commands);
        self
    }

    /// Run until shutdown, process loss, or the record cannot be found.
    pub fn run<C, S>(
        &self,
        connector: &mut C,
        request: &LocateRequest,
        shutdown: &ShutdownSignal,
        sink: &S,
    ) -> SessionEnd
    where
        C: Connector,
        S: SessionSink + ?Sized,
    {
        sink.emit(SessionEvent::State(SessionState::Connecting));

        let Some(mut process) = self.connect(connector, sink) else {
            return finish(sink, SessionEnd::ConnectFailed);
        };
        let Some(mut record) = self.locate(&process, request, sink) else {
            return finish(sink, SessionEnd::NotFound);
        };

        let threshold = self.tracking.failure_threshold.max(1);
        let mut failures = 0u32;
        let mut read_error = false;

        while !shutdown.is_shutdown() {
            let mut relocate = false;
            if let Some(commands) = &self.commands {
                while let Ok(command) = commands.try_recv() {
                    match command {
                        SessionCommand::ScanInventory => {
                            self.scan_slots(&process, SlotKind::Inventory, sink)
                        }
                        SessionCommand::ScanWarehouse => {
                            self.scan_slots(&process, SlotKind::Warehouse, sink)
                        }
                        SessionCommand::Relocate => relocate = true,
                    }
                }
            }

            match self.poll(&process, &record) {
                Ok(Poll::Valid { score, fields }) => {
                    failures = 0;
                    sink.emit(SessionEvent::Fields {
                        address: record.address,
                        score,
                        fields,
                    });
                }
                Ok(Poll::Invalid { score }) => {
                    failures += 1;
                    read_error = false;
                    let e = Error::ValidationFailed {
                        address: record.address,
                        score,
                    };
                    debug!("{}, failure {}", e, failures);
                }
                Err(e) => {
                    failures += 1;
                    read_error = true;
                    if e.is_process_lost() {
                        warn!("{}, failure {}", e, failures);
                    } else {
                        debug!("Read failed: {}, failure {}", e, failures);
                    }
                }
            }

            if relocate || failures >= threshold {
                if failures >= threshold {
                    sink.emit(SessionEvent::State(SessionState::ReadError));
                    if read_error {
                        match self.reconnect(connector, sink) {
                            Some(p) => process = p,
                            None => return finish(sink, SessionEnd::ProcessLost),
                        }
                    }
                }
                sink.emit(SessionEvent::State(SessionState::Rescanning));
                match self.locate(&process, request, sink) {
                    Some(found) => record = found,
                    None => return finish(sink, SessionEnd::NotFound),
                }
                failures = 0;
                read_error = false;
            }

            if shutdown.wait(self.tracking.poll_interval()) == Wake::Shutdown {
                break;
            }
        }

        info!("Session stopped");
        finish(sink, SessionEnd::Stopped)
    }

    fn connect<C: Connector, S: SessionSink + ?Sized>(
        &self,
        connector: &mut C,
        sink: &S,
    ) -> Option<C::Process> {
        match connector.connect() {
            Ok(process) => {
                info!("Connected to pid {}", process.pid());
                Some(process)
            }
            Err(e) => {
                warn!("Cannot connect: {}", e);
                sink.emit(SessionEvent::Error(format!("Cannot connect: {e}")));
                None
            }
        }
    }

    fn reconnect<C: Connector, S: SessionSink + ?Sized>(
        &self,
        connector: &mut C,
        sink: &S,
    ) -> Option<C::Process> {
        for attempt in 1..=self.tracking.reconnect_attempts {
            debug!("Reconnect attempt {}", attempt);
            if let Some(process) = self.connect(connector, sink) {
                return Some(process);
            }
        }
        None
    }

    fn locate<P: ProcessMemory, S: SessionSink + ?Sized>(
        &self,
        process: &P,
        request: &LocateRequest,
        sink: &S,
    ) -> Option<Candidate> {
        let locator = RecordLocator::new(process, &self.profile, &self.filter);
        match locator.locate(request) {
            Ok(candidate) => {
                let name = read_record_name(process, candidate.address);
                sink.emit(SessionEvent::State(SessionState::Located));
                sink.emit(SessionEvent::Located {
                    address: candidate.address,
                    score: candidate.score,
                    variant: candidate.variant,
                    name,
                });
                Some(candidate)
            }
            Err(e) => {
                warn!("{}", e);
                sink.emit(SessionEvent::NotFound(request.value));
                None
            }
        }
    }

    fn poll<P: ProcessMemory>(&self, process: &P, record: &Candidate) -> Result<Poll> {
        process.read_i32(record.address)?;
        let score = verify(process, record.address, &self.profile, record.variant).score;
        if !self.profile.accepts(score) {
            return Ok(Poll::Invalid { score });
        }
        let fields = read_fields(process, record.address, self.layout);
        Ok(Poll::Valid { score, fields })
    }

    fn scan_slots<P: ProcessMemory, S: SessionSink + ?Sized>(
        &self,
        process: &P,
        kind: SlotKind,
        sink: &S,
    ) {
        let scanner = SlotScanner::new(process, &self.filter);
        let found = match kind {
            SlotKind::Inventory => scanner.locate_inventory(),
            SlotKind::Warehouse => {
                let inventory = scanner.locate_inventory().map(|a| a.start);
                scanner.locate_warehouse(inventory)
            }
        };
        match found {
            Some(array) => sink.emit(SessionEvent::Slots { kind, array }),
            None => sink.emit(SessionEvent::Error(format!("{kind} not found in memory"))),
        }
    }
}

fn finish<S: SessionSink + ?Sized>(sink: &S, end: SessionEnd) -> SessionEnd {
    sink.emit(SessionEvent::State(SessionState::Disconnected));
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MockMemoryBuilder, MockMemoryReader};
    use crate::scan::slots::SLOT_STRIDE;
    use std::cell::RefCell;

    const BASE: u64 = 0x0100_0000;

    struct TestSink<F: Fn(&SessionEvent)> {
        events: RefCell<Vec<SessionEvent>>,
        on_event: F,
    }

    impl<F: Fn(&SessionEvent)> TestSink<F> {
        fn new(on_event: F) -> Self {
            Self {
                events: RefCell::new(Vec::new()),
                on_event,
            }
        }

        fn states(&self) -> Vec<SessionState> {
            self.events
                .borrow()
                .iter()
                .filter_map(|e| match e {
                    SessionEvent::State(s) => Some(*s),
                    _ => None,
                })
                .collect()
        }

        fn located(&self) -> Vec<u64> {
            self.events
                .borrow()
                .iter()
                .filter_map(|e| match e {
                    SessionEvent::Located { address, .. } => Some(*address),
                    _ => None,
                })
                .collect()
        }
    }

    impl<F: Fn(&SessionEvent)> SessionSink for TestSink<F> {
        fn emit(&self, event: SessionEvent) {
            (self.on_event)(&event);
            self.events.borrow_mut().push(event);
        }
    }

    fn write_record(process: &MockMemoryReader, anchor: u64) {
        for (off, value) in [(0, 287), (4, 287), (8, 100), (12, 100), (28, 1000), (-36, 99)] {
            process.set_i32(anchor.wrapping_add_signed(off), value);
        }
    }

    fn record_process() -> MockMemoryReader {
        let process = MockMemoryBuilder::new()
            .region(BASE, vec![0u8; 2048])
            .build();
        write_record(&process, BASE + 228);
        process
    }

    fn fast_config() -> ScanConfig {
        let mut config = ScanConfig::default();
        config.tracking.poll_interval_ms = 1;
        config
    }

    #[test]
    fn test_locate_poll_and_stop() {
        let process = record_process();
        let config = fast_config();
        let layout = FieldLayout::builtin();
        let shutdown = ShutdownSignal::new();
        let sink = TestSink::new(|e| {
            if matches!(e, SessionEvent::Fields { .. }) {
                shutdown.trigger();
            }
        });

        let mut connector = FnConnector(|| Ok(process.clone()));
        let end = TrackingSession::new(&config, &layout).run(
            &mut connector,
            &LocateRequest::new(287),
            &shutdown,
            &sink,
        );

        assert_eq!(end, SessionEnd::Stopped);
        assert_eq!(
            sink.states(),
            vec![
                SessionState::Connecting,
                SessionState::Located,
                SessionState::Disconnected
            ]
        );
        let events = sink.events.borrow();
        let fields = events
            .iter()
            .find_map(|e| match e {
                SessionEvent::Fields { fields, .. } => Some(fields.clone()),
                _ => None,
            })
            .unwrap();
        let level = fields.iter().find(|f| f.name == "level").unwrap();
        assert_eq!(level.value, Some(99));
    }

    #[test]
    fn test_relocates_after_repeated_validation_failures() {
        let process = record_process();
        let moved_to = BASE + 1028;
        let config = fast_config();
        let layout = FieldLayout::builtin();
        let shutdown = ShutdownSignal::new();
        let sink = TestSink::new(|e| match e {
            SessionEvent::Fields { address, .. } if *address == BASE + 228 => {
                process.set_i32(BASE + 228, 0);
                write_record(&process, moved_to);
            }
            SessionEvent::Located { address, .. } if *address == moved_to => shutdown.trigger(),
            _ => {}
        });

        let mut connector = FnConnector(|| Ok(process.clone()));
        let end = TrackingSession::new(&config, &layout).run(
            &mut connector,
            &LocateRequest::new(287),
            &shutdown,
            &sink,
        );

        assert_eq!(end, SessionEnd::Stopped);
        assert_eq!(sink.located(), vec![BASE + 228, moved_to]);
        let states = sink.states();
        assert!(states.contains(&SessionState::ReadError));
        assert!(states.contains(&SessionState::Rescanning));
    }

    #[test]
    fn test_process_loss_reconnects_once_then_disconnects() {
        let process = record_process();
        let config = fast_config();
        let layout = FieldLayout::builtin();
        let shutdown = ShutdownSignal::new();
        let sink = TestSink::new(|e| {
            if matches!(e, SessionEvent::Fields { .. }) {
                process.set_offline(true);
            }
        });

        let connects = RefCell::new(0);
        let mut connector = FnConnector(|| {
            *connects.borrow_mut() += 1;
            if *connects.borrow() == 1 {
                Ok(process.clone())
            } else {
                Err(Error::ProcessUnavailable("gone".to_string()))
            }
        });
        let end = TrackingSession::new(&config, &layout).run(
            &mut connector,
            &LocateRequest::new(287),
            &shutdown,
            &sink,
        );

        assert_eq!(end, SessionEnd::ProcessLost);
        assert_eq!(*connects.borrow(), 2);
        assert_eq!(sink.states().last(), Some(&SessionState::Disconnected));
    }

    #[test]
    fn test_reconnect_then_rescan() {
        let process = record_process();
        let config = fast_config();
        let layout = FieldLayout::builtin();
        let shutdown = ShutdownSignal::new();
        let sink = TestSink::new(|e| match e {
            SessionEvent::Fields { .. } => process.set_offline(true),
            SessionEvent::State(SessionState::ReadError) => process.set_offline(false),
            SessionEvent::State(SessionState::Rescanning) => shutdown.trigger(),
            _ => {}
        });

        let mut connector = FnConnector(|| Ok(process.clone()));
        let end = TrackingSession::new(&config, &layout).run(
            &mut connector,
            &LocateRequest::new(287),
            &shutdown,
            &sink,
        );

        assert_eq!(end, SessionEnd::Stopped);
        assert_eq!(sink.located(), vec![BASE + 228, BASE + 228]);
    }

    #[test]
    fn test_not_found_disconnects() {
        let process = MockMemoryBuilder::new().region(BASE, vec![0u8; 512]).build();
        let config = fast_config();
        let layout = FieldLayout::builtin();
        let shutdown = ShutdownSignal::new();
        let sink = TestSink::new(|_| {});

        let mut connector = FnConnector(|| Ok(process.clone()));
        let end = TrackingSession::new(&config, &layout).run(
            &mut connector,
            &LocateRequest::new(287),
            &shutdown,
            &sink,
        );

        assert_eq!(end, SessionEnd::NotFound);
        assert_eq!(
            *sink.events.borrow(),
            vec![
                SessionEvent::State(SessionState::Connecting),
                SessionEvent::NotFound(287),
                SessionEvent::State(SessionState::Disconnected),
            ]
        );
    }

    #[test]
    fn test_nudge_runs_command_before_interval() {
        let process = record_process();
        let mut config = ScanConfig::default();
        config.tracking.poll_interval_ms = 60_000;
        let layout = FieldLayout::builtin();
        let shutdown = ShutdownSignal::new();
        let (tx, rx) = std::sync::mpsc::channel();
        let located = std::cell::Cell::new(0);
        let sent = std::cell::Cell::new(false);
        let sink = TestSink::new(|e| match e {
            SessionEvent::Fields { .. } if !sent.replace(true) => {
                tx.send(SessionCommand::Relocate).unwrap();
                shutdown.nudge();
            }
            SessionEvent::Located { .. } => {
                located.set(located.get() + 1);
                if located.get() == 2 {
                    shutdown.trigger();
                }
            }
            _ => {}
        });

        let start = std::time::Instant::now();
        let mut connector = FnConnector(|| Ok(process.clone()));
        let end = TrackingSession::new(&config, &layout)
            .with_commands(rx)
            .run(&mut connector, &LocateRequest::new(287), &shutdown, &sink);

        assert_eq!(end, SessionEnd::Stopped);
        assert_eq!(sink.located(), vec![BASE + 228, BASE + 228]);
        assert!(start.elapsed() < std::time::Duration::from_secs(5));
    }

    #[test]
    fn test_inventory_command() {
        let slots = 0x0200_0000u64;
        let qty = 0x0300_0000u64;
        let process = MockMemoryBuilder::new()
            .region(BASE, vec![0u8; 2048])
            .region(slots, vec![0u8; SLOT_STRIDE * 4])
            .region(qty, vec![0u8; 16])
            .build();
        write_record(&process, BASE + 228);
        for (i, id) in [1001, 1002].into_iter().enumerate() {
            let entry = slots + 64 + (i * SLOT_STRIDE) as u64;
            process.set_i32(entry, id);
            process.set_u32(entry + 4, (qty + i as u64 * 4) as u32);
            process.set_i32(qty + i as u64 * 4, 5);
        }

        let (tx, rx) = std::sync::mpsc::channel();
        tx.send(SessionCommand::ScanInventory).unwrap();

        let config = fast_config();
        let layout = FieldLayout::builtin();
        let shutdown = ShutdownSignal::new();
        let sink = TestSink::new(|e| {
            if matches!(e, SessionEvent::Slots { .. }) {
                shutdown.trigger();
            }
        });

        let mut connector = FnConnector(|| Ok(process.clone()));
        TrackingSession::new(&config, &layout)
            .with_commands(rx)
            .run(&mut connector, &LocateRequest::new(287), &shutdown, &sink);

        let events = sink.events.borrow();
        let array = events
            .iter()
            .find_map(|e| match e {
                SessionEvent::Slots { kind: SlotKind::Inventory, array } => Some(array.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(array.start, slots + 64);
        assert_eq!(array.entries.len(), 2);
        assert_eq!(array.entries[1].quantity, 5);
    }

    #[test]
    fn test_relocate_command_rescans_without_read_error() {
        let process = record_process();
        let (tx, rx) = std::sync::mpsc::channel();
        tx.send(SessionCommand::Relocate).unwrap();

        let config = fast_config();
        let layout = FieldLayout::builtin();
        let shutdown = ShutdownSignal::new();
        let sink = TestSink::new(|e| {
            if matches!(e, SessionEvent::State(SessionState::Rescanning)) {
                shutdown.trigger();
            }
        });

        let mut connector = FnConnector(|| Ok(process.clone()));
        let end = TrackingSession::new(&config, &layout)
            .with_commands(rx)
            .run(&mut connector, &LocateRequest::new(287), &shutdown, &sink);

        assert_eq!(end, SessionEnd::Stopped);
        assert_eq!(sink.located(), vec![BASE + 228, BASE + 228]);
        assert!(!sink.states().contains(&SessionState::ReadError));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::ReadError.to_string(), "READ_ERROR");
        assert_eq!(SlotKind::Warehouse.to_string(), "warehouse");
    }
}
