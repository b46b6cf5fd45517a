use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::attack_state::{AttackConfig, AttackState, SequenceMode};
use crate::command::CommandCode;
use crate::error::{GlitchError, Result};
use crate::events::{AttackEvent, EventSink};
use crate::transport::SerialTransport;

/// Behaviour of the trigger loop around the pulse sequences.
///
/// # Fields
///
/// * `idle_poll` - Longest wait for a trigger before the stop flag is checked again.
/// * `arm_settle` - Delay between ARM and the first PULSE in full mode.
/// * `hold_until_reset` - After firing, ignore triggers until the victim reports its reset marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TriggerOptions {
    pub idle_poll: Duration,
    pub arm_settle: Duration,
    pub hold_until_reset: bool,
}

impl Default for TriggerOptions {
    fn default() -> Self {
        Self {
            idle_poll: Duration::from_millis(50),
            arm_settle: Duration::ZERO,
            hold_until_reset: false,
        }
    }
}

/// Why the trigger loop ended
#[derive(Debug)]
pub enum TriggerExit {
    Cancelled,
    ConnectionFailed(GlitchError),
}

#[derive(Debug)]
pub struct TriggerReport {
    pub exit: TriggerExit,
    /// Sequences that sent every pulse, a cancelled one is not counted
    pub sequences: usize,
    pub pulses_sent: usize,
    /// Sequences aborted by a failed send
    pub send_failures: usize,
}

/// Drives the fault board whenever the victim monitor raised a trigger.
///
/// This is the only writer to the fault board. Each consumed trigger runs
/// exactly one pulse sequence from a snapshot of the attack configuration,
/// so a reconfiguration only applies to the next sequence.
pub struct AttackTrigger {
    transport: SerialTransport,
    state: Arc<AttackState>,
    options: TriggerOptions,
    events: EventSink,
    sequences: usize,
    pulses_sent: usize,
    send_failures: usize,
}

impl AttackTrigger {
    pub fn new(
        transport: SerialTransport,
        state: Arc<AttackState>,
        options: TriggerOptions,
        events: EventSink,
    ) -> Self {
        Self {
            transport,
            state,
            options,
            events,
            sequences: 0,
            pulses_sent: 0,
            send_failures: 0,
        }
    }

    /// Wait for triggers and fire until the attack loop is cancelled.
    ///
    /// # Returns
    ///
    /// * `TriggerReport` - Exit reason and counters. The fault board transport
    ///   is closed when this returns.
    ///
    /// # Loop Behavior
    ///
    /// 1. While held, pending triggers are dropped until the victim re-arms the loop
    /// 2. Otherwise wait up to `idle_poll` for a trigger
    /// 3. Fire one sequence, then sleep the cooldown
    /// 4. Triggers raised during the sequence or the cooldown are discarded
    ///
    /// A failed send aborts the running sequence only. The loop keeps going.
    pub fn run(mut self) -> TriggerReport {
        let exit = self.trigger_loop();
        self.transport.close();
        info!(
            "Attack trigger stopped ({:?}), {} sequences, {} pulses",
            exit, self.sequences, self.pulses_sent
        );
        TriggerReport {
            exit,
            sequences: self.sequences,
            pulses_sent: self.pulses_sent,
            send_failures: self.send_failures,
        }
    }

    fn trigger_loop(&mut self) -> TriggerExit {
        if let Err(e) = self.transport.open() {
            error!("Fault board unavailable: {}", e);
            self.events.error(format!("Fault board unavailable: {}", e));
            return TriggerExit::ConnectionFailed(e);
        }
        self.events.info(format!(
            "Fault board ready on {}",
            self.transport.settings().port
        ));

        while !self.state.is_attack_loop_cancelled() {
            if self.state.is_attack_loop_held() {
                if self.state.discard_held_trigger() {
                    debug!("Trigger ignored, waiting for victim reset");
                }
                self.state.pause(self.options.idle_poll);
                continue;
            }
            if !self.state.wait_for_trigger(self.options.idle_poll) {
                continue;
            }

            let config = self.state.config();
            if self.options.hold_until_reset {
                self.state.hold_attack_loop();
            }
            info!("Trigger consumed, firing {} pulses", config.pulse_count);
            if let Err(e) = self.fire_sequence(&config) {
                self.send_failures += 1;
                warn!("Pulse sequence aborted: {}", e);
                self.events.error(format!("Pulse sequence aborted: {}", e));
            }

            self.state.pause(config.post_trigger_cooldown);
            self.state.clear_trigger();
        }
        TriggerExit::Cancelled
    }

    /// Run a single pulse sequence with the current configuration.
    ///
    /// Used by the loop for every trigger and directly for standalone attacks.
    ///
    /// # Returns
    ///
    /// * `Ok(u32)` - Number of pulses sent.
    /// * `Err(GlitchError)` - The fault board rejected a command.
    pub fn fire_once(&mut self) -> Result<u32> {
        let config = self.state.config();
        self.fire_sequence(&config)
    }

    fn fire_sequence(&mut self, config: &AttackConfig) -> Result<u32> {
        if config.pulse_count == 0 {
            self.events.info("Pulse count is zero, nothing to fire");
            return Ok(0);
        }
        // Drop whatever the fault board echoed since the last sequence
        if let Err(e) = self.transport.reset_buffers() {
            debug!("Could not clear fault board buffers: {}", e);
        }
        self.events.emit(AttackEvent::SequenceStarted {
            pulses: config.pulse_count,
        });

        let framed = config.mode == SequenceMode::Full;
        if framed {
            self.send(CommandCode::Arm)?;
            self.state.pause(self.options.arm_settle);
        }
        let pulses = self.send_pulses(config);
        // Never leave the board armed, even after a failed pulse
        let disarm = if framed {
            self.send(CommandCode::Disarm)
        } else {
            Ok(())
        };
        let sent = pulses?;
        disarm?;

        if sent < config.pulse_count {
            self.events.info(format!(
                "Sequence cut short after {} of {} pulses",
                sent, config.pulse_count
            ));
            return Ok(sent);
        }
        self.sequences += 1;
        self.events.emit(AttackEvent::SequenceFinished { pulses: sent });
        Ok(sent)
    }

    fn send_pulses(&mut self, config: &AttackConfig) -> Result<u32> {
        let mut sent = 0;
        for index in 1..=config.pulse_count {
            if self.state.is_attack_loop_cancelled()
                || (index > 1 && !self.state.pause(config.pulse_interval))
            {
                debug!("Sequence cut short after {} pulses", sent);
                break;
            }
            self.send(CommandCode::Pulse)?;
            sent += 1;
            self.pulses_sent += 1;
            self.events.emit(AttackEvent::PulseSent {
                index,
                total: config.pulse_count,
            });
        }
        Ok(sent)
    }

    fn send(&mut self, command: CommandCode) -> Result<()> {
        self.transport.send_command(command)?;
        self.events.emit(AttackEvent::CommandSent(command));
        Ok(())
    }
}
