pub mod attack_state;
pub mod attack_trigger;
pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod output;
pub mod supervisor;
pub mod transport;
pub mod victim_monitor;
pub mod worker;

#[cfg(test)]
mod testing;

pub mod prelude {
    pub use crate::attack_state::{AttackConfig, AttackState, SequenceMode, TriggerFlags};
    pub use crate::attack_trigger::{AttackTrigger, TriggerExit, TriggerOptions, TriggerReport};
    pub use crate::command::CommandCode;
    pub use crate::config::{Args, Config};
    pub use crate::error::GlitchError;
    pub use crate::events::{AttackEvent, EventSink};
    pub use crate::supervisor::{ShutdownReport, Supervisor};
    pub use crate::transport::{Connector, PortSettings, Received, SerialLink, SerialTransport};
    pub use crate::victim_monitor::{LineClass, Markers, MonitorExit, MonitorReport, VictimMonitor};
}
