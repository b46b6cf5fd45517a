use fault_orchestrator::prelude::*;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::sleep;
use std::time::{Duration, Instant};

const POLL: Duration = Duration::from_millis(10);

#[derive(Default)]
struct BoardState {
    incoming: VecDeque<u8>,
    frames: Vec<Vec<u8>>,
    hung_up: bool,
    opens: usize,
    closes: usize,
}

/// In-memory stand-in for a serial attached board
#[derive(Clone, Default)]
struct Board {
    state: Arc<Mutex<BoardState>>,
}

impl Board {
    fn lock(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap()
    }

    fn feed(&self, text: &str) {
        self.lock().incoming.extend(text.bytes());
    }

    fn hang_up(&self) {
        self.lock().hung_up = true;
    }

    /// Commands received so far, without the line terminator
    fn commands(&self) -> Vec<String> {
        self.lock()
            .frames
            .iter()
            .map(|frame| {
                String::from_utf8_lossy(frame)
                    .trim_end_matches("\n\r")
                    .to_string()
            })
            .collect()
    }

    fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    fn transport(&self, port: &str, baud: u32) -> SerialTransport {
        SerialTransport::with_connector(
            PortSettings::new(port, baud).with_poll_interval(POLL),
            self.connector(),
        )
    }
}

impl Connector for Board {
    fn connect(&self, _settings: &PortSettings) -> io::Result<Box<dyn SerialLink>> {
        self.lock().opens += 1;
        Ok(Box::new(Link {
            board: self.clone(),
        }))
    }
}

struct Link {
    board: Board,
}

impl SerialLink for Link {
    fn read_chunk(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        {
            let mut state = self.board.lock();
            if !state.incoming.is_empty() {
                let n = buffer.len().min(state.incoming.len());
                for (slot, byte) in buffer.iter_mut().zip(state.incoming.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            if state.hung_up {
                return Ok(0);
            }
        }
        sleep(POLL);
        Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
    }

    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        self.board.lock().frames.push(data.to_vec());
        Ok(())
    }

    fn flush_output(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.board.lock().closes += 1;
    }
}

fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        sleep(Duration::from_millis(5));
    }
}

fn attack_config(pulse_count: u32, mode: SequenceMode) -> AttackConfig {
    AttackConfig {
        pulse_count,
        pulse_interval: Duration::from_millis(5),
        post_trigger_cooldown: Duration::from_millis(20),
        mode,
    }
}

/// Both loops wired to in-memory boards
struct Rig {
    victim: Board,
    fault: Board,
    state: Arc<AttackState>,
    supervisor: Supervisor,
}

fn start_rig(config: AttackConfig, options: TriggerOptions) -> Rig {
    let victim = Board::default();
    let fault = Board::default();
    let state = Arc::new(AttackState::new(config));
    let (events, _receiver) = EventSink::channel();
    let monitor = VictimMonitor::new(
        victim.transport("/dev/ttyUSB0", 115_200),
        Arc::clone(&state),
        Markers::default(),
        events.clone(),
    );
    let trigger = AttackTrigger::new(
        fault.transport("/dev/ttyACM0", 921_600),
        Arc::clone(&state),
        TriggerOptions {
            idle_poll: POLL,
            ..options
        },
        events,
    );
    let supervisor = Supervisor::start(monitor, trigger, Arc::clone(&state)).unwrap();
    Rig {
        victim,
        fault,
        state,
        supervisor,
    }
}

#[test]
/// Launch marker followed by an empty line
///
/// The launch line leaves a trigger pending and the empty line asks the
/// output side to clear its display.
fn launch_marker_then_blank_line() {
    let victim = Board::default();
    victim.feed("boot...\r\nload:0x3fff00c0,len:8\r\n\r\n");
    victim.hang_up();
    let state = Arc::new(AttackState::default());
    let (events, receiver) = EventSink::channel();
    let monitor = VictimMonitor::new(
        victim.transport("/dev/ttyUSB0", 115_200),
        Arc::clone(&state),
        Markers::default(),
        events,
    );

    let report = monitor.run();
    assert!(matches!(report.exit, MonitorExit::Disconnected));
    assert_eq!(report.triggers_requested, 1);
    assert!(state.flags().trigger_armed);

    let events: Vec<AttackEvent> = receiver
        .try_iter()
        .filter(|event| !matches!(event, AttackEvent::Info(_) | AttackEvent::Error(_)))
        .collect();
    assert_eq!(
        events,
        vec![
            AttackEvent::VictimLine("boot...".to_string()),
            AttackEvent::TriggerRequested {
                line: "load:0x3fff00c0,len:8".to_string(),
                fresh: true
            },
            AttackEvent::ClearDisplay,
        ]
    );
    assert_eq!(victim.lock().closes, 1);
}

#[test]
/// Three pulses without framing on a launch marker
fn minimal_sequence_end_to_end() {
    let rig = start_rig(
        attack_config(3, SequenceMode::Minimal),
        TriggerOptions::default(),
    );
    rig.victim.feed("rst:0x1 (POWERON_RESET)\r\nload:0x3fff00c0,len:8\r\n");
    wait_until("three pulses", || rig.fault.commands().len() >= 3);

    let report = rig.supervisor.shutdown().unwrap();
    assert_eq!(rig.fault.commands(), vec!["p", "p", "p"]);
    assert_eq!(report.trigger.sequences, 1);
    assert_eq!(report.trigger.pulses_sent, 3);
    assert_eq!(rig.fault.lock().closes, 1);
    assert_eq!(rig.victim.lock().closes, 1);
}

#[test]
/// Three pulses framed by ARM and DISARM
fn full_sequence_end_to_end() {
    let rig = start_rig(attack_config(3, SequenceMode::Full), TriggerOptions::default());
    rig.victim.feed("load:0x3fff00c0,len:8\r\n");
    wait_until("disarm", || rig.fault.commands().len() >= 5);

    rig.supervisor.shutdown().unwrap();
    assert_eq!(rig.fault.commands(), vec!["a", "p", "p", "p", "d"]);
}

#[test]
/// Failure marker is reported as a highlighted event and never fires the board
fn failure_marker_is_highlighted() {
    let victim = Board::default();
    victim.feed("secure boot check fail\r\n");
    victim.hang_up();
    let state = Arc::new(AttackState::default());
    let (events, receiver) = EventSink::channel();
    VictimMonitor::new(
        victim.transport("/dev/ttyUSB0", 115_200),
        Arc::clone(&state),
        Markers::default(),
        events,
    )
    .run();

    let highlighted: Vec<AttackEvent> = receiver
        .try_iter()
        .filter(|event| matches!(event, AttackEvent::VictimFailure(_)))
        .collect();
    assert_eq!(
        highlighted,
        vec![AttackEvent::VictimFailure(
            "secure boot check fail".to_string()
        )]
    );
    assert!(highlighted[0].is_highlighted());
    assert!(!state.flags().trigger_armed);
}

#[test]
/// A new configuration applies to the next sequence
fn reconfiguration_between_sequences() {
    let rig = start_rig(
        attack_config(1, SequenceMode::Minimal),
        TriggerOptions::default(),
    );
    rig.victim.feed("load:0x3fff00c0,len:8\r\n");
    wait_until("first sequence", || rig.fault.commands().len() == 1);
    // Let the cooldown run out
    sleep(Duration::from_millis(100));

    let config = Config {
        pulse_count: 2,
        pulse_interval: 0.005,
        cooldown: 0.02,
        ..Config::default()
    };
    config.apply_to(&rig.state).unwrap();
    rig.victim.feed("load:0x3fff00c0,len:8\r\n");
    wait_until("second sequence", || rig.fault.commands().len() == 3);

    let report = rig.supervisor.shutdown().unwrap();
    assert_eq!(report.trigger.sequences, 2);
    assert_eq!(report.monitor.triggers_requested, 2);
}

#[test]
/// With hold until reset, launch markers are ignored until the victim resets
fn hold_until_reset_waits_for_entry_marker() {
    let rig = start_rig(
        attack_config(1, SequenceMode::Minimal),
        TriggerOptions {
            hold_until_reset: true,
            ..TriggerOptions::default()
        },
    );
    rig.victim.feed("load:0x3fff00c0,len:8\r\n");
    wait_until("first sequence", || rig.fault.commands().len() == 1);
    sleep(Duration::from_millis(100));

    rig.victim.feed("load:0x3fff00c0,len:8\r\n");
    sleep(Duration::from_millis(100));
    assert_eq!(rig.fault.commands().len(), 1);

    rig.victim.feed("entry 0x40080698\r\nload:0x3fff00c0,len:8\r\n");
    wait_until("second sequence", || rig.fault.commands().len() == 2);
    rig.supervisor.shutdown().unwrap();
}

#[test]
/// Shutdown wakes both loops out of their waits within a poll interval
fn shutdown_is_prompt() {
    let rig = start_rig(
        AttackConfig {
            post_trigger_cooldown: Duration::from_secs(30),
            ..attack_config(1, SequenceMode::Minimal)
        },
        TriggerOptions::default(),
    );
    rig.victim.feed("load:0x3fff00c0,len:8\r\n");
    wait_until("first sequence", || rig.fault.commands().len() == 1);
    assert!(rig.supervisor.is_running());

    let start = Instant::now();
    let report = rig.supervisor.shutdown().unwrap();
    assert!(start.elapsed() < Duration::from_millis(500));
    assert!(matches!(report.monitor.exit, MonitorExit::Cancelled));
    assert!(matches!(report.trigger.exit, TriggerExit::Cancelled));
    assert_eq!(rig.victim.lock().opens, 1);
    assert_eq!(rig.fault.lock().closes, 1);
}

#[test]
/// Commands parse from their wire tokens and from their names
///
/// Returns the plain `Result<(), String>` the binary uses, next to the prelude glob import.
fn command_tokens() -> Result<(), String> {
    assert_eq!("p".parse::<CommandCode>()?, CommandCode::Pulse);
    assert_eq!("disarm".parse::<CommandCode>()?, CommandCode::Disarm);
    assert_eq!(CommandCode::FastTriggerConfigure.encode(), b"fa");
    assert!("zap".parse::<CommandCode>().is_err());
    Ok(())
}
