use clap::Parser;
use log::LevelFilter;
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::attack_state::{AttackConfig, AttackState, SequenceMode};
use crate::attack_trigger::TriggerOptions;
use crate::error::{GlitchError, Result};
use crate::transport::PortSettings;
use crate::victim_monitor::{
    Markers, DEFAULT_FAILURE_MARKER, DEFAULT_LAUNCH_MARKER, DEFAULT_RESET_MARKER,
};

/// Parse a duration in seconds. Accepts "1.5", "1.5s" and "250ms".
pub fn parse_seconds(s: &str) -> std::result::Result<f64, String> {
    let trimmed = s.trim();
    let (number, per_second) = if let Some(ms) = trimmed.strip_suffix("ms") {
        (ms, 1000.0)
    } else if let Some(secs) = trimmed.strip_suffix('s') {
        (secs, 1.0)
    } else {
        (trimmed, 1.0)
    };
    number
        .trim()
        .parse::<f64>()
        .map(|value| value / per_second)
        .map_err(|e| format!("Invalid duration '{}': {}", s, e))
}

/// Custom deserializer for durations given as plain seconds or as strings with unit
fn deserialize_seconds<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct SecondsVisitor;

    impl<'de> Visitor<'de> for SecondsVisitor {
        type Value = f64;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a duration (seconds as number, or a string like \"250ms\" or \"1.5s\")")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> std::result::Result<f64, E> {
            Ok(value as f64)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> std::result::Result<f64, E> {
            // Negative values are kept so that validation can name the field
            Ok(value as f64)
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> std::result::Result<f64, E> {
            Ok(value)
        }

        fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<f64, E> {
            parse_seconds(value).map_err(de::Error::custom)
        }
    }

    deserializer.deserialize_any(SecondsVisitor)
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// Configuration structure that can be loaded from JSON5.
///
/// Durations are stored in seconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub fault_port: Option<String>,
    #[serde(default = "Config::default_fault_baud")]
    pub fault_baud: u32,
    #[serde(default)]
    pub victim_port: Option<String>,
    #[serde(default = "Config::default_victim_baud")]
    pub victim_baud: u32,
    #[serde(
        default = "Config::default_poll_interval",
        deserialize_with = "deserialize_seconds"
    )]
    pub poll_interval: f64,
    #[serde(default = "Config::default_pulse_count")]
    pub pulse_count: u32,
    #[serde(
        default = "Config::default_pulse_interval",
        deserialize_with = "deserialize_seconds"
    )]
    pub pulse_interval: f64,
    #[serde(
        default = "Config::default_cooldown",
        deserialize_with = "deserialize_seconds"
    )]
    pub cooldown: f64,
    #[serde(default, deserialize_with = "deserialize_seconds")]
    pub arm_settle: f64,
    #[serde(default)]
    pub mode: SequenceMode,
    #[serde(default)]
    pub hold_until_reset: bool,
    #[serde(default = "Config::default_launch_marker")]
    pub launch_marker: String,
    #[serde(default = "Config::default_reset_marker")]
    pub reset_marker: String,
    #[serde(default = "Config::default_failure_marker")]
    pub failure_marker: String,
    #[serde(default)]
    pub standalone: bool,
    #[serde(default = "Config::default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fault_port: None,
            fault_baud: Self::default_fault_baud(),
            victim_port: None,
            victim_baud: Self::default_victim_baud(),
            poll_interval: Self::default_poll_interval(),
            pulse_count: Self::default_pulse_count(),
            pulse_interval: Self::default_pulse_interval(),
            cooldown: Self::default_cooldown(),
            arm_settle: 0.0,
            mode: SequenceMode::default(),
            hold_until_reset: false,
            launch_marker: Self::default_launch_marker(),
            reset_marker: Self::default_reset_marker(),
            failure_marker: Self::default_failure_marker(),
            standalone: false,
            log_level: Self::default_log_level(),
        }
    }
}

impl Config {
    fn default_fault_baud() -> u32 {
        921_600
    }

    fn default_victim_baud() -> u32 {
        115_200
    }

    fn default_poll_interval() -> f64 {
        0.1
    }

    fn default_pulse_count() -> u32 {
        1
    }

    fn default_pulse_interval() -> f64 {
        1.0
    }

    fn default_cooldown() -> f64 {
        1.0
    }

    fn default_launch_marker() -> String {
        DEFAULT_LAUNCH_MARKER.to_string()
    }

    fn default_reset_marker() -> String {
        DEFAULT_RESET_MARKER.to_string()
    }

    fn default_failure_marker() -> String {
        DEFAULT_FAILURE_MARKER.to_string()
    }

    fn default_log_level() -> String {
        "info".to_string()
    }

    /// Load configuration from JSON5 file
    pub fn from_file(path: &PathBuf) -> std::result::Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        json5::from_str(&content).map_err(|e| format!("Failed to parse JSON5 config: {}", e))
    }

    /// Create Config from command line arguments
    pub fn from_args(args: &Args) -> Self {
        let mut config = Self::default();
        config.override_with_args(args);
        config
    }

    /// Override config values with the command line arguments that were given
    pub fn override_with_args(&mut self, args: &Args) {
        if args.fault_port.is_some() {
            self.fault_port = args.fault_port.clone();
        }
        if args.victim_port.is_some() {
            self.victim_port = args.victim_port.clone();
        }
        if let Some(baud) = args.fault_baud {
            self.fault_baud = baud;
        }
        if let Some(baud) = args.victim_baud {
            self.victim_baud = baud;
        }
        if let Some(poll_interval) = args.poll_interval {
            self.poll_interval = poll_interval;
        }
        if let Some(pulse_count) = args.pulses {
            self.pulse_count = pulse_count;
        }
        if let Some(pulse_interval) = args.interval {
            self.pulse_interval = pulse_interval;
        }
        if let Some(cooldown) = args.cooldown {
            self.cooldown = cooldown;
        }
        if let Some(arm_settle) = args.arm_settle {
            self.arm_settle = arm_settle;
        }
        if let Some(mode) = args.mode {
            self.mode = mode;
        }
        if let Some(marker) = &args.launch_marker {
            self.launch_marker = marker.clone();
        }
        if let Some(marker) = &args.reset_marker {
            self.reset_marker = marker.clone();
        }
        if let Some(marker) = &args.failure_marker {
            self.failure_marker = marker.clone();
        }
        if let Some(level) = &args.log_level {
            self.log_level = level.clone();
        }

        // Only override boolean flags if they're true (explicitly set by user)
        if args.hold_until_reset {
            self.hold_until_reset = true;
        }
        if args.standalone {
            self.standalone = true;
        }
    }

    /// Check every value before it reaches the attack state or a serial port.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("poll_interval", self.poll_interval),
            ("pulse_interval", self.pulse_interval),
            ("cooldown", self.cooldown),
            ("arm_settle", self.arm_settle),
        ];
        for (name, value) in durations {
            if !value.is_finite() || value < 0.0 {
                return Err(GlitchError::Configuration(format!(
                    "{} must be a non-negative number of seconds, got {}",
                    name, value
                )));
            }
            if Duration::try_from_secs_f64(value).is_err() {
                return Err(GlitchError::Configuration(format!(
                    "{} of {} seconds is out of range",
                    name, value
                )));
            }
        }
        // Sub-nanosecond values would become a zero read timeout
        if seconds(self.poll_interval).is_zero() {
            return Err(GlitchError::Configuration(
                "poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.fault_baud == 0 || self.victim_baud == 0 {
            return Err(GlitchError::Configuration(
                "baud rates must be greater than zero".to_string(),
            ));
        }
        if self.launch_marker.is_empty() {
            return Err(GlitchError::Configuration(
                "launch_marker must not be empty".to_string(),
            ));
        }
        self.log_filter()?;
        Ok(())
    }

    pub fn log_filter(&self) -> Result<LevelFilter> {
        LevelFilter::from_str(&self.log_level).map_err(|_| {
            GlitchError::Configuration(format!("unknown log level '{}'", self.log_level))
        })
    }

    pub fn attack_config(&self) -> AttackConfig {
        AttackConfig {
            pulse_count: self.pulse_count,
            pulse_interval: seconds(self.pulse_interval),
            post_trigger_cooldown: seconds(self.cooldown),
            mode: self.mode,
        }
    }

    /// Validate, then push the attack parameters into a running state.
    ///
    /// Nothing is changed when validation fails.
    pub fn apply_to(&self, state: &AttackState) -> Result<()> {
        self.validate()?;
        let config = self.attack_config();
        state.set_pulse_count(config.pulse_count);
        state.set_pulse_interval(config.pulse_interval);
        state.set_cooldown(config.post_trigger_cooldown);
        state.set_sequence_mode(config.mode);
        Ok(())
    }

    pub fn trigger_options(&self) -> TriggerOptions {
        TriggerOptions {
            arm_settle: seconds(self.arm_settle),
            hold_until_reset: self.hold_until_reset,
            ..TriggerOptions::default()
        }
    }

    pub fn markers(&self) -> Markers {
        Markers {
            launch: self.launch_marker.clone(),
            reset: self.reset_marker.clone(),
            failure: self.failure_marker.clone(),
        }
    }

    pub fn fault_port_settings(&self) -> Result<PortSettings> {
        let port = self.fault_port.as_ref().ok_or_else(|| {
            GlitchError::Configuration("no fault board port given".to_string())
        })?;
        Ok(PortSettings::new(port.as_str(), self.fault_baud)
            .with_poll_interval(seconds(self.poll_interval)))
    }

    pub fn victim_port_settings(&self) -> Result<PortSettings> {
        let port = self.victim_port.as_ref().ok_or_else(|| {
            GlitchError::Configuration("no victim board port given".to_string())
        })?;
        Ok(PortSettings::new(port.as_str(), self.victim_baud)
            .with_poll_interval(seconds(self.poll_interval)))
    }
}

/// Command-line arguments of the orchestrator.
///
/// Every option left out keeps the value from the configuration file, or
/// the built-in default when no file is given.
///
/// # Fields
///
/// * `fault_port` - Serial port of the fault board.
/// * `victim_port` - Serial port carrying the victim's boot log.
/// * `config` - Load configuration from JSON5 file.
/// * `pulses` - Number of pulses per sequence.
/// * `interval` - Delay between two pulses.
/// * `cooldown` - Quiet time after a sequence.
/// * `mode` - Frame the pulses with ARM and DISARM (`full`) or not (`minimal`).
/// * `standalone` - Fire one sequence without watching the victim.
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Serial port of the fault board, e.g. /dev/ttyACM0 or COM7
    pub fault_port: Option<String>,

    /// Serial port of the victim board
    #[arg(short, long)]
    pub victim_port: Option<String>,

    /// Load configuration from JSON5 file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Baud rate of the fault board [default: 921600]
    #[arg(long)]
    pub fault_baud: Option<u32>,

    /// Baud rate of the victim board [default: 115200]
    #[arg(long)]
    pub victim_baud: Option<u32>,

    /// Serial read timeout, bounds the reaction time to a stop request
    #[arg(long, value_parser = parse_seconds)]
    pub poll_interval: Option<f64>,

    /// Number of pulses per sequence [default: 1]
    #[arg(short, long)]
    pub pulses: Option<u32>,

    /// Delay between two pulses, e.g. 0.5 or 250ms [default: 1s]
    #[arg(short, long, value_parser = parse_seconds)]
    pub interval: Option<f64>,

    /// Quiet time after a sequence before the next trigger is taken [default: 1s]
    #[arg(long, value_parser = parse_seconds)]
    pub cooldown: Option<f64>,

    /// Delay between ARM and the first pulse in full mode
    #[arg(long, value_parser = parse_seconds)]
    pub arm_settle: Option<f64>,

    /// Sequence framing [default: minimal]
    #[arg(short, long, value_enum)]
    pub mode: Option<SequenceMode>,

    /// Ignore further launch markers until the victim reports its reset marker
    #[arg(long, default_value_t = false)]
    pub hold_until_reset: bool,

    /// Victim log text that fires a pulse sequence
    #[arg(long)]
    pub launch_marker: Option<String>,

    /// Victim log text that re-arms a held attack loop
    #[arg(long)]
    pub reset_marker: Option<String>,

    /// Victim log text that is highlighted as a failed boot
    #[arg(long)]
    pub failure_marker: Option<String>,

    /// Fire a single full sequence on the fault board and exit
    #[arg(short, long, default_value_t = false)]
    pub standalone: bool,

    /// Log level: off, error, warn, info, debug, trace [default: info]
    #[arg(long)]
    pub log_level: Option<String>,
}
