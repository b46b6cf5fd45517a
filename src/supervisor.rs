use std::sync::Arc;

use log::info;

use crate::attack_state::AttackState;
use crate::attack_trigger::{AttackTrigger, TriggerReport};
use crate::error::Result;
use crate::victim_monitor::{MonitorReport, VictimMonitor};
use crate::worker::Worker;

const MONITOR_THREAD: &str = "victim-monitor";
const TRIGGER_THREAD: &str = "attack-trigger";

/// Outcome of both loops after a shutdown
#[derive(Debug)]
pub struct ShutdownReport {
    pub monitor: MonitorReport,
    pub trigger: TriggerReport,
}

/// Runs the victim monitor and the attack trigger side by side.
///
/// Both loops live on their own named thread and share one `AttackState`.
/// Shutdown raises both stop flags and waits for both threads, which close
/// their serial connections on the way out. Dropping a running supervisor
/// stops and joins each worker in turn.
pub struct Supervisor {
    state: Arc<AttackState>,
    monitor: Worker<MonitorReport>,
    trigger: Worker<TriggerReport>,
}

impl Supervisor {
    /// Reset the shared state and start both loops.
    ///
    /// # Arguments
    ///
    /// * `monitor` - Victim monitor, built on the same `state`.
    /// * `trigger` - Attack trigger, built on the same `state`.
    /// * `state` - Coordination state shared by both loops.
    ///
    /// # Returns
    ///
    /// * `Ok(Supervisor)` - Both threads are running.
    /// * `Err(GlitchError::Spawn)` - A thread could not be created. A loop that
    ///   already started is stopped again before this returns.
    pub fn start(
        monitor: VictimMonitor,
        trigger: AttackTrigger,
        state: Arc<AttackState>,
    ) -> Result<Self> {
        state.reset();

        let monitor_stop = Arc::clone(&state);
        let monitor = Worker::start(
            MONITOR_THREAD,
            move || monitor_stop.cancel_monitor(),
            move || monitor.run(),
        )?;
        let trigger_stop = Arc::clone(&state);
        // On error the monitor worker is dropped here, which stops and joins it
        let trigger = Worker::start(
            TRIGGER_THREAD,
            move || trigger_stop.cancel_attack_loop(),
            move || trigger.run(),
        )?;

        info!("Supervisor started both loops");
        Ok(Self {
            state,
            monitor,
            trigger,
        })
    }

    pub fn state(&self) -> &Arc<AttackState> {
        &self.state
    }

    /// True while both loops are still running
    pub fn is_running(&self) -> bool {
        !self.monitor.is_finished() && !self.trigger.is_finished()
    }

    /// True once neither loop is left running
    pub fn has_stopped(&self) -> bool {
        self.monitor.is_finished() && self.trigger.is_finished()
    }

    /// Stop both loops and wait for them.
    ///
    /// Both stop flags are raised before either thread is joined, so the
    /// loops wind down in parallel.
    pub fn shutdown(self) -> Result<ShutdownReport> {
        let Supervisor {
            monitor, trigger, ..
        } = self;
        monitor.request_stop();
        trigger.request_stop();

        let monitor = monitor.join();
        let trigger = trigger.join();
        info!("Supervisor stopped both loops");
        Ok(ShutdownReport {
            monitor: monitor?,
            trigger: trigger?,
        })
    }
}
