use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Deserialize;

/// Shape of one pulse sequence on the fault board.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SequenceMode {
    /// ARM, the pulses, DISARM
    Full,
    /// Only the pulses, the board is armed by other means
    #[default]
    Minimal,
}

/// Parameters of a pulse sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttackConfig {
    /// Number of PULSE commands per sequence
    pub pulse_count: u32,
    /// Delay between two consecutive PULSE commands
    pub pulse_interval: Duration,
    /// Quiet time after a sequence before the next trigger is taken
    pub post_trigger_cooldown: Duration,
    pub mode: SequenceMode,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            pulse_count: 1,
            pulse_interval: Duration::from_secs(1),
            post_trigger_cooldown: Duration::from_secs(1),
            mode: SequenceMode::default(),
        }
    }
}

/// Snapshot of the coordination flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TriggerFlags {
    pub monitor_cancel: bool,
    pub trigger_armed: bool,
    pub attack_loop_cancel: bool,
    pub attack_held: bool,
}

/// State shared between the victim monitor, the attack trigger and the
/// configuration path.
///
/// The trigger is a single coalescing flag guarded by a mutex and paired
/// with a condition variable, so the attack loop sleeps until a launch
/// marker shows up. The stop flags are atomics polled by both loops.
///
/// `attack_held` latches the attack loop after a sequence when hold mode is
/// active. The reset marker of the victim clears it again.
pub struct AttackState {
    config: Mutex<AttackConfig>,
    trigger_armed: Mutex<bool>,
    signal: Condvar,
    monitor_cancel: AtomicBool,
    attack_loop_cancel: AtomicBool,
    attack_held: AtomicBool,
}

impl AttackState {
    pub fn new(config: AttackConfig) -> Self {
        Self {
            config: Mutex::new(config),
            trigger_armed: Mutex::new(false),
            signal: Condvar::new(),
            monitor_cancel: AtomicBool::new(false),
            attack_loop_cancel: AtomicBool::new(false),
            attack_held: AtomicBool::new(false),
        }
    }

    /// Copy of the current configuration
    pub fn config(&self) -> AttackConfig {
        *self.lock_config()
    }

    pub fn set_pulse_count(&self, pulse_count: u32) {
        self.lock_config().pulse_count = pulse_count;
    }

    pub fn set_pulse_interval(&self, pulse_interval: Duration) {
        self.lock_config().pulse_interval = pulse_interval;
    }

    pub fn set_cooldown(&self, cooldown: Duration) {
        self.lock_config().post_trigger_cooldown = cooldown;
    }

    pub fn set_sequence_mode(&self, mode: SequenceMode) {
        self.lock_config().mode = mode;
    }

    /// Mark a trigger as pending.
    ///
    /// Returns true if the flag went from absent to present, false if a
    /// trigger was already pending and this request was coalesced into it.
    pub fn request_trigger(&self) -> bool {
        let fresh = {
            let mut armed = self.lock_trigger();
            let fresh = !*armed;
            *armed = true;
            fresh
        };
        self.signal.notify_all();
        fresh
    }

    /// Read and clear the pending trigger in one step
    pub fn consume_trigger(&self) -> bool {
        std::mem::take(&mut *self.lock_trigger())
    }

    /// Drop a pending trigger without acting on it
    pub fn clear_trigger(&self) {
        *self.lock_trigger() = false;
    }

    /// Drop the pending trigger if the attack loop is held.
    ///
    /// Checked under the trigger lock, so a trigger requested after
    /// `rearm_attack_loop` is never lost.
    pub fn discard_held_trigger(&self) -> bool {
        let mut armed = self.lock_trigger();
        if *armed && self.is_attack_loop_held() {
            *armed = false;
            return true;
        }
        false
    }

    /// Wait up to `timeout` for a trigger and consume it.
    ///
    /// Returns early with false when the attack loop is cancelled.
    pub fn wait_for_trigger(&self, timeout: Duration) -> bool {
        let guard = self.lock_trigger();
        let (mut armed, _) = self
            .signal
            .wait_timeout_while(guard, timeout, |armed| {
                !*armed && !self.is_attack_loop_cancelled()
            })
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_attack_loop_cancelled() {
            return false;
        }
        std::mem::take(&mut *armed)
    }

    /// Sleep for `duration` unless the attack loop is cancelled first.
    ///
    /// Returns true if the full duration elapsed.
    pub fn pause(&self, duration: Duration) -> bool {
        if !duration.is_zero() {
            let guard = self.lock_trigger();
            let _ = self
                .signal
                .wait_timeout_while(guard, duration, |_| !self.is_attack_loop_cancelled())
                .unwrap_or_else(PoisonError::into_inner);
        }
        !self.is_attack_loop_cancelled()
    }

    pub fn cancel_monitor(&self) {
        self.monitor_cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_monitor_cancelled(&self) -> bool {
        self.monitor_cancel.load(Ordering::SeqCst)
    }

    pub fn cancel_attack_loop(&self) {
        self.attack_loop_cancel.store(true, Ordering::SeqCst);
        // Taking the lock orders the store before any waiter re-checks it
        let _guard = self.lock_trigger();
        self.signal.notify_all();
    }

    pub fn is_attack_loop_cancelled(&self) -> bool {
        self.attack_loop_cancel.load(Ordering::SeqCst)
    }

    /// Stop taking triggers until `rearm_attack_loop` is called
    pub fn hold_attack_loop(&self) {
        self.attack_held.store(true, Ordering::SeqCst);
    }

    /// Permit triggers again. Returns true if the loop was held.
    pub fn rearm_attack_loop(&self) -> bool {
        self.attack_held.swap(false, Ordering::SeqCst)
    }

    pub fn is_attack_loop_held(&self) -> bool {
        self.attack_held.load(Ordering::SeqCst)
    }

    /// Put every flag back to rest. The configuration is kept.
    pub fn reset(&self) {
        self.monitor_cancel.store(false, Ordering::SeqCst);
        self.attack_loop_cancel.store(false, Ordering::SeqCst);
        self.attack_held.store(false, Ordering::SeqCst);
        self.clear_trigger();
    }

    pub fn flags(&self) -> TriggerFlags {
        TriggerFlags {
            monitor_cancel: self.is_monitor_cancelled(),
            trigger_armed: *self.lock_trigger(),
            attack_loop_cancel: self.is_attack_loop_cancelled(),
            attack_held: self.is_attack_loop_held(),
        }
    }

    fn lock_config(&self) -> MutexGuard<'_, AttackConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_trigger(&self) -> MutexGuard<'_, bool> {
        self.trigger_armed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for AttackState {
    fn default() -> Self {
        Self::new(AttackConfig::default())
    }
}
