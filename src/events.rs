use crossbeam_channel::{unbounded, Receiver, Sender};
use log::trace;

use crate::command::CommandCode;

/// Structured event for the output collaborator.
///
/// The loops never print. Everything a user should see travels through an
/// [`EventSink`] and is rendered by whoever holds the receiver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttackEvent {
    /// General progress information
    Info(String),
    /// Plain line from the victim log
    VictimLine(String),
    /// Victim line containing the failure marker, to be highlighted
    VictimFailure(String),
    /// Empty victim line, a hint to clear the display
    ClearDisplay,
    /// Launch marker seen; `fresh` is false when coalesced into a pending trigger
    TriggerRequested { line: String, fresh: bool },
    /// Reset marker seen; `released` is true when it lifted a hold
    Rearmed { line: String, released: bool },
    /// A pulse sequence starts
    SequenceStarted { pulses: u32 },
    /// A command reached the fault board
    CommandSent(CommandCode),
    /// One pulse of the running sequence was sent
    PulseSent { index: u32, total: u32 },
    /// The pulse sequence completed
    SequenceFinished { pulses: u32 },
    /// A recoverable or fatal error inside a loop
    Error(String),
}

impl AttackEvent {
    /// Events that must stand out from normal traffic
    pub fn is_highlighted(&self) -> bool {
        matches!(self, AttackEvent::VictimFailure(_) | AttackEvent::Error(_))
    }
}

/// Sending half of the event channel. Cheap to clone, one per loop.
#[derive(Clone, Debug)]
pub struct EventSink {
    sender: Sender<AttackEvent>,
}

impl EventSink {
    /// Create a sink together with the receiver for the output side
    pub fn channel() -> (Self, Receiver<AttackEvent>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }

    /// Deliver an event. A disconnected receiver only means nobody is listening.
    pub fn emit(&self, event: AttackEvent) {
        if let Err(e) = self.sender.send(event) {
            trace!("Event dropped, no receiver: {:?}", e.into_inner());
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(AttackEvent::Info(message.into()));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(AttackEvent::Error(message.into()));
    }
}
