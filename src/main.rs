use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use fault_orchestrator::output;
use fault_orchestrator::prelude::*;

/// How often the main thread looks at the stop signal
const SIGNAL_POLL: Duration = Duration::from_millis(100);

/// Program to fire a fault injection board on boot markers of a victim board
///
fn main() -> Result<(), String> {
    // Get parameter from command line
    let args = Args::parse();

    // Load config file if provided, otherwise start from the defaults
    let mut config = match &args.config {
        Some(path) => {
            println!("Loading configuration from: {}", path.display());
            Config::from_file(path)?
        }
        None => Config::default(),
    };
    config.override_with_args(&args);
    config.validate().map_err(|e| e.to_string())?;

    // Switch on with: RUST_LOG=debug
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.as_str()),
    )
    .init();

    println!(
        "--- Fault injection orchestrator: v{} ---\n",
        env!("CARGO_PKG_VERSION")
    );

    let fault_settings = config.fault_port_settings().map_err(|e| e.to_string())?;
    let mut probe = SerialTransport::new(fault_settings.clone());
    if !probe.is_valid_connection() {
        return Err(format!(
            "Fault board not reachable on {}",
            fault_settings.port
        ));
    }
    println!(
        "Fault board on {} at {} baud",
        fault_settings.port, fault_settings.baud
    );

    let state = Arc::new(AttackState::new(config.attack_config()));
    let (events, receiver) = EventSink::channel();
    let printer = output::spawn_printer(receiver).map_err(|e| e.to_string())?;

    let result = if config.standalone {
        run_standalone(&config, fault_settings, state, events)
    } else {
        run_supervised(&config, fault_settings, state, events)
    };

    // All sinks are gone at this point, the printer drains and ends
    printer.join().map_err(|e| e.to_string())?;
    result
}

/// Fire one framed sequence and exit
fn run_standalone(
    config: &Config,
    fault_settings: PortSettings,
    state: Arc<AttackState>,
    events: EventSink,
) -> Result<(), String> {
    println!("\nStandalone attack:");
    state.set_sequence_mode(SequenceMode::Full);
    let mut trigger = AttackTrigger::new(
        SerialTransport::new(fault_settings),
        state,
        config.trigger_options(),
        events,
    );
    let pulses = trigger.fire_once().map_err(|e| e.to_string())?;
    println!("Standalone attack finished, {} pulse(s) sent", pulses);
    Ok(())
}

/// Watch the victim and fire on every launch marker until SIGINT or SIGTERM
fn run_supervised(
    config: &Config,
    fault_settings: PortSettings,
    state: Arc<AttackState>,
    events: EventSink,
) -> Result<(), String> {
    let victim_settings = config.victim_port_settings().map_err(|e| e.to_string())?;

    let stop = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&stop))
            .map_err(|e| format!("Failed to install signal handler: {}", e))?;
    }

    let monitor = VictimMonitor::new(
        SerialTransport::new(victim_settings),
        Arc::clone(&state),
        config.markers(),
        events.clone(),
    );
    let trigger = AttackTrigger::new(
        SerialTransport::new(fault_settings),
        Arc::clone(&state),
        config.trigger_options(),
        events,
    );

    println!("\nWaiting for launch marker \"{}\" (Ctrl-C to stop)", config.launch_marker);
    let supervisor = Supervisor::start(monitor, trigger, state).map_err(|e| e.to_string())?;
    // A loop that ends on its own leaves the other one running until a signal
    let mut degraded = false;
    while !stop.load(Ordering::SeqCst) && !supervisor.has_stopped() {
        if !degraded && !supervisor.is_running() {
            log::warn!("One loop ended on its own, the other keeps running until Ctrl-C");
            degraded = true;
        }
        sleep(SIGNAL_POLL);
    }
    if !stop.load(Ordering::SeqCst) {
        log::warn!("Both loops ended on their own, shutting down");
    }

    let report = supervisor.shutdown().map_err(|e| e.to_string())?;
    print_summary(&report);
    Ok(())
}

fn print_summary(report: &ShutdownReport) {
    println!("\nSummary:");
    println!(
        "  Victim:  {} lines, {} launch markers ({:?})",
        report.monitor.lines_read, report.monitor.triggers_requested, report.monitor.exit
    );
    println!(
        "  Attack:  {} sequences, {} pulses, {} aborted ({:?})",
        report.trigger.sequences,
        report.trigger.pulses_sent,
        report.trigger.send_failures,
        report.trigger.exit
    );
}
