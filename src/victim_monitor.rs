use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::attack_state::AttackState;
use crate::error::{GlitchError, Result};
use crate::events::{AttackEvent, EventSink};
use crate::transport::{Received, SerialTransport};

/// Victim reached the boot stage where the glitch has to land
pub const DEFAULT_LAUNCH_MARKER: &str = "load:0x3fff00c0";
/// Victim is back in a known-good running state
pub const DEFAULT_RESET_MARKER: &str = "entry 0x";
/// Victim rejected its image
pub const DEFAULT_FAILURE_MARKER: &str = "secure boot check fail";

/// Substrings searched in every victim line. Matching is exact and case-sensitive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Markers {
    pub launch: String,
    pub reset: String,
    pub failure: String,
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            launch: DEFAULT_LAUNCH_MARKER.to_string(),
            reset: DEFAULT_RESET_MARKER.to_string(),
            failure: DEFAULT_FAILURE_MARKER.to_string(),
        }
    }
}

/// Role of a victim line
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineClass {
    Failure,
    Launch,
    Reset,
    Blank,
    Plain,
}

impl Markers {
    /// Classify a line. Failure wins over launch, launch over reset.
    pub fn classify(&self, line: &str) -> LineClass {
        let hit = |marker: &str| !marker.is_empty() && line.contains(marker);
        if hit(self.failure.as_str()) {
            LineClass::Failure
        } else if hit(self.launch.as_str()) {
            LineClass::Launch
        } else if hit(self.reset.as_str()) {
            LineClass::Reset
        } else if line.trim().is_empty() {
            LineClass::Blank
        } else {
            LineClass::Plain
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Connected,
    Reading,
    TriggerSeen,
    InhibitSeen,
    Disconnected,
}

/// Why the monitor loop ended
#[derive(Debug)]
pub enum MonitorExit {
    Cancelled,
    Disconnected,
    ConnectionFailed(GlitchError),
    ReadFailed(GlitchError),
}

#[derive(Debug)]
pub struct MonitorReport {
    pub exit: MonitorExit,
    pub lines_read: usize,
    pub triggers_requested: usize,
    pub state: MonitorState,
}

/// Reads the victim log and turns markers into trigger state.
pub struct VictimMonitor {
    transport: SerialTransport,
    state: Arc<AttackState>,
    markers: Markers,
    events: EventSink,
    current: MonitorState,
    lines_read: usize,
    triggers_requested: usize,
}

impl VictimMonitor {
    pub fn new(
        transport: SerialTransport,
        state: Arc<AttackState>,
        markers: Markers,
        events: EventSink,
    ) -> Self {
        Self {
            transport,
            state,
            markers,
            events,
            current: MonitorState::Idle,
            lines_read: 0,
            triggers_requested: 0,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.current
    }

    /// Read lines until cancelled or the victim connection goes away.
    ///
    /// The victim transport is closed exactly once before this returns,
    /// whatever the exit reason.
    pub fn run(mut self) -> MonitorReport {
        let exit = self.read_loop();
        self.transport.close();
        self.enter(MonitorState::Disconnected);
        info!(
            "Victim monitor stopped ({:?}), {} lines, {} triggers",
            exit, self.lines_read, self.triggers_requested
        );
        MonitorReport {
            exit,
            lines_read: self.lines_read,
            triggers_requested: self.triggers_requested,
            state: self.current,
        }
    }

    fn read_loop(&mut self) -> MonitorExit {
        if let Err(e) = self.transport.open() {
            error!("Victim board unavailable: {}", e);
            self.events.error(format!("Victim board unavailable: {}", e));
            return MonitorExit::ConnectionFailed(e);
        }
        self.enter(MonitorState::Connected);
        self.events.info(format!(
            "Monitoring victim on {}",
            self.transport.settings().port
        ));

        let state = Arc::clone(&self.state);
        loop {
            self.enter(MonitorState::Reading);
            match self.transport.receive_line(|| state.is_monitor_cancelled()) {
                Ok(Received::Line(raw)) => {
                    // A bad line is reported inside and skipped
                    let _ = self.process_line(&raw);
                }
                Ok(Received::Cancelled) => return MonitorExit::Cancelled,
                Ok(Received::Disconnected) => {
                    warn!("Victim board disconnected");
                    self.events.error("Victim board disconnected");
                    return MonitorExit::Disconnected;
                }
                Err(e) => {
                    error!("Reading victim failed: {}", e);
                    self.events.error(format!("Reading victim failed: {}", e));
                    return MonitorExit::ReadFailed(e);
                }
            }
        }
    }

    /// Decode, classify and act on one raw victim line.
    pub fn process_line(&mut self, raw: &[u8]) -> Result<LineClass> {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line,
            Err(_) => {
                let err = GlitchError::ProtocolMismatch(String::from_utf8_lossy(raw).into_owned());
                debug!("Skipping victim line: {}", err);
                self.events.error(err.to_string());
                return Err(err);
            }
        };
        self.lines_read += 1;

        let class = self.markers.classify(line);
        match class {
            LineClass::Failure => {
                warn!("Victim failure: {}", line);
                self.events.emit(AttackEvent::VictimFailure(line.to_string()));
            }
            LineClass::Launch => {
                let fresh = self.state.request_trigger();
                self.triggers_requested += 1;
                self.enter(MonitorState::TriggerSeen);
                info!("Launch marker seen (fresh: {})", fresh);
                self.events.emit(AttackEvent::TriggerRequested {
                    line: line.to_string(),
                    fresh,
                });
            }
            LineClass::Reset => {
                let released = self.state.rearm_attack_loop();
                self.enter(MonitorState::InhibitSeen);
                debug!("Reset marker seen, attack loop re-armed (was held: {})", released);
                self.events.emit(AttackEvent::Rearmed {
                    line: line.to_string(),
                    released,
                });
            }
            LineClass::Blank => self.events.emit(AttackEvent::ClearDisplay),
            LineClass::Plain => self.events.emit(AttackEvent::VictimLine(line.to_string())),
        }
        Ok(class)
    }

    fn enter(&mut self, next: MonitorState) {
        if self.current != next {
            debug!("Victim monitor {:?} -> {:?}", self.current, next);
            self.current = next;
        }
    }
}
