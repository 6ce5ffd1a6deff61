use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Control token delivered to a running camera agent.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Start,
    Stop,
    Pause,
    Resume,
}

impl Command {
    /// Whether the command suspends packet delivery.
    pub fn suspends(&self) -> bool {
        matches!(self, Command::Stop | Command::Pause)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Start => write!(f, "start"),
            Command::Stop => write!(f, "stop"),
            Command::Pause => write!(f, "pause"),
            Command::Resume => write!(f, "resume"),
        }
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "start" => Ok(Command::Start),
            "stop" => Ok(Command::Stop),
            "pause" => Ok(Command::Pause),
            "resume" => Ok(Command::Resume),
            other => Err(format!("unknown command: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_tokens() {
        for cmd in [
            Command::Start,
            Command::Stop,
            Command::Pause,
            Command::Resume,
        ] {
            assert_eq!(cmd.to_string().parse::<Command>(), Ok(cmd));
        }
        assert_eq!("PAUSE".parse::<Command>(), Ok(Command::Pause));
        assert!("reboot".parse::<Command>().is_err());
        assert!(Command::Stop.suspends());
        assert!(!Command::Resume.suspends());
    }
}
