use std::fmt;

/// Command codes understood by the Kaco RS485 protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    /* instantaneous readings */
    Readings,
    /* cumulative counters */
    Totals,
}

impl CommandCode {
    /* order in which a poll issues the commands */
    pub const ALL: [CommandCode; 2] = [CommandCode::Readings, CommandCode::Totals];

    pub fn digit(&self) -> u8 {
        match self {
            CommandCode::Readings => 0,
            CommandCode::Totals => 3,
        }
    }

    pub fn from_digit(digit: u8) -> Option<Self> {
        match digit {
            0 => Some(CommandCode::Readings),
            3 => Some(CommandCode::Totals),
            _ => None,
        }
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.digit())
    }
}

/// Builds the request frame `#AAC\r\n`, the address is not range checked.
pub fn encode_command(inverter: u8, command: CommandCode) -> String {
    return format!("#{:02}{:01}\r\n", inverter, command.digit());
}

/// The command digit sits right before the trailing CR-LF of a request.
pub fn command_digit_from_request(request: &str) -> Option<u8> {
    let trimmed = request.trim_end_matches(['\r', '\n']);
    let digit = trimmed.chars().last()?;
    return digit.to_digit(10).map(|d| d as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_command() {
        assert_eq!(encode_command(1, CommandCode::Readings), "#010\r\n");
        assert_eq!(encode_command(1, CommandCode::Totals), "#013\r\n");
        assert_eq!(encode_command(32, CommandCode::Readings), "#320\r\n");
        assert_eq!(encode_command(0, CommandCode::Totals), "#003\r\n");
    }

    #[test]
    fn test_digit_round_trip() {
        for cmd in CommandCode::ALL {
            assert_eq!(CommandCode::from_digit(cmd.digit()), Some(cmd));
        }
        assert_eq!(CommandCode::from_digit(1), None);
        assert_eq!(CommandCode::from_digit(9), None);
    }

    #[test]
    fn test_command_digit_from_request() {
        assert_eq!(command_digit_from_request("#010\r\n"), Some(0));
        assert_eq!(command_digit_from_request("#123\r\n"), Some(3));
        assert_eq!(command_digit_from_request("#017"), Some(7));
        assert_eq!(command_digit_from_request(""), None);
        assert_eq!(command_digit_from_request("#01x\r\n"), None);
    }
}
