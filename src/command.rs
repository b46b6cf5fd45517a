use std::fmt;
use std::str::FromStr;

/// Commands understood by the fault board firmware.
///
/// Every command travels as a short ASCII token followed by the transport's
/// line terminator. The board echoes free-form text which is not parsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandCode {
    Help,
    Arm,
    Disarm,
    Pulse,
    EnableTimeout,
    DisableTimeout,
    FastTrigger,
    FastTriggerConfigure,
    InternalHvp,
    ExternalHvp,
    Configure,
    ToggleGpio,
    Status,
    Reset,
}

/// All commands, in firmware menu order
pub const COMMANDS: [CommandCode; 14] = [
    CommandCode::Help,
    CommandCode::Arm,
    CommandCode::Disarm,
    CommandCode::Pulse,
    CommandCode::EnableTimeout,
    CommandCode::DisableTimeout,
    CommandCode::FastTrigger,
    CommandCode::FastTriggerConfigure,
    CommandCode::InternalHvp,
    CommandCode::ExternalHvp,
    CommandCode::Configure,
    CommandCode::ToggleGpio,
    CommandCode::Status,
    CommandCode::Reset,
];

impl CommandCode {
    /// Wire token of the command
    pub fn token(self) -> &'static str {
        match self {
            CommandCode::Help => "h",
            CommandCode::Arm => "a",
            CommandCode::Disarm => "d",
            CommandCode::Pulse => "p",
            CommandCode::EnableTimeout => "en",
            CommandCode::DisableTimeout => "di",
            CommandCode::FastTrigger => "f",
            CommandCode::FastTriggerConfigure => "fa",
            CommandCode::InternalHvp => "ih",
            CommandCode::ExternalHvp => "eh",
            CommandCode::Configure => "c",
            CommandCode::ToggleGpio => "t",
            CommandCode::Status => "s",
            CommandCode::Reset => "r",
        }
    }

    /// Bytes written to the wire (without terminator)
    pub fn encode(self) -> &'static [u8] {
        self.token().as_bytes()
    }

    /// Lower case name, as used in configuration files
    pub fn name(self) -> &'static str {
        match self {
            CommandCode::Help => "help",
            CommandCode::Arm => "arm",
            CommandCode::Disarm => "disarm",
            CommandCode::Pulse => "pulse",
            CommandCode::EnableTimeout => "enable_timeout",
            CommandCode::DisableTimeout => "disable_timeout",
            CommandCode::FastTrigger => "fast_trigger",
            CommandCode::FastTriggerConfigure => "fast_trigger_configure",
            CommandCode::InternalHvp => "internal_hvp",
            CommandCode::ExternalHvp => "external_hvp",
            CommandCode::Configure => "configure",
            CommandCode::ToggleGpio => "toggle_gpio",
            CommandCode::Status => "status",
            CommandCode::Reset => "reset",
        }
    }

    /// Look up a command by its wire token
    pub fn from_token(token: &str) -> Option<Self> {
        COMMANDS.iter().copied().find(|code| code.token() == token)
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.token())
    }
}

impl FromStr for CommandCode {
    type Err = String;

    /// Accepts either the wire token or the lower case name
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        Self::from_token(input)
            .or_else(|| COMMANDS.iter().copied().find(|code| code.name() == input))
            .ok_or_else(|| format!("Unknown board command: {:?}", input))
    }
}
