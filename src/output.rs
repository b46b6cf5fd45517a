use std::io::{self, Write};

use colored::Colorize;
use crossbeam_channel::Receiver;

use crate::error::Result;
use crate::events::AttackEvent;
use crate::worker::Worker;

/// Console line for one event.
///
/// Failure markers and errors are printed in red so they stand out from the
/// victim's regular boot log. A blank victim line turns into a separator.
pub fn render(event: &AttackEvent) -> String {
    match event {
        AttackEvent::Info(message) => message.normal().to_string(),
        AttackEvent::VictimLine(line) => format!("  {}", line),
        AttackEvent::VictimFailure(line) => format!("  {}", line).red().bold().to_string(),
        AttackEvent::ClearDisplay => String::new(),
        AttackEvent::TriggerRequested { line, fresh: true } => {
            format!("  {}  <- trigger", line).yellow().bold().to_string()
        }
        AttackEvent::TriggerRequested { line, fresh: false } => {
            format!("  {}  <- trigger already pending", line).yellow().to_string()
        }
        AttackEvent::Rearmed { line, released } => {
            let note = if *released { "  <- re-armed" } else { "" };
            format!("  {}{}", line, note).cyan().to_string()
        }
        AttackEvent::SequenceStarted { pulses } => {
            format!("Firing {} pulse(s)", pulses).green().to_string()
        }
        AttackEvent::CommandSent(command) => format!("  -> {}", command).dimmed().to_string(),
        AttackEvent::PulseSent { index, total } => {
            format!("  Pulse {}/{}", index, total).magenta().to_string()
        }
        AttackEvent::SequenceFinished { pulses } => {
            format!("Sequence done, {} pulse(s) sent", pulses)
                .green()
                .bold()
                .to_string()
        }
        AttackEvent::Error(message) => format!("Error: {}", message).red().to_string(),
    }
}

/// Write every received event until all senders are gone.
///
/// Returns the number of events written.
pub fn print_events<W: Write>(receiver: &Receiver<AttackEvent>, out: &mut W) -> io::Result<usize> {
    let mut count = 0;
    while let Ok(event) = receiver.recv() {
        writeln!(out, "{}", render(&event))?;
        out.flush()?;
        count += 1;
    }
    Ok(count)
}

/// Print events to stdout on a background thread.
///
/// The thread ends once every `EventSink` is dropped, so the loops must be
/// shut down before the printer is joined.
pub fn spawn_printer(receiver: Receiver<AttackEvent>) -> Result<Worker<usize>> {
    Worker::start(
        "console-output",
        || {},
        move || {
            let stdout = io::stdout();
            print_events(&receiver, &mut stdout.lock()).unwrap_or_else(|e| {
                log::warn!("Console output stopped: {}", e);
                0
            })
        },
    )
}
