//! Operator console commands.
//!
//! The console is line based: the first non-blank character of a line picks
//! the command, the rest is ignored.

use crate::protocol::Frame;

/// Identifier of the operator test frame.
pub const TEST_FRAME_ID: u32 = 0x100;

/// A parsed console line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    /// `t`: send the test frame once.
    Transmit,
    /// `c`: toggle the cyclic frame.
    ToggleCyclic,
    /// `q`, `x` or ESC.
    Quit,
}

impl OperatorCommand {
    /// Parse one console line; `None` for blank or unknown input.
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim_start().chars().next()? {
            't' | 'T' => Some(Self::Transmit),
            'c' | 'C' => Some(Self::ToggleCyclic),
            'q' | 'Q' | 'x' | 'X' | '\u{1b}' => Some(Self::Quit),
            _ => None,
        }
    }
}

/// The frame sent by [`OperatorCommand::Transmit`]: 0x100 carrying `0..8`.
pub fn test_frame() -> Frame {
    Frame::new(TEST_FRAME_ID, &[0, 1, 2, 3, 4, 5, 6, 7]).expect("test frame is valid")
}

/// Help text printed at start-up.
pub const USAGE: &str = "Commands: t = transmit 0x100, c = toggle cyclic, q/x/ESC = quit";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(OperatorCommand::parse("t"), Some(OperatorCommand::Transmit));
        assert_eq!(OperatorCommand::parse("  C\n"), Some(OperatorCommand::ToggleCyclic));
        assert_eq!(OperatorCommand::parse("q"), Some(OperatorCommand::Quit));
        assert_eq!(OperatorCommand::parse("exit"), None);
        assert_eq!(OperatorCommand::parse("x"), Some(OperatorCommand::Quit));
        assert_eq!(OperatorCommand::parse("\u{1b}"), Some(OperatorCommand::Quit));
    }

    #[test]
    fn test_parse_ignores_blank_and_unknown() {
        assert_eq!(OperatorCommand::parse(""), None);
        assert_eq!(OperatorCommand::parse("   "), None);
        assert_eq!(OperatorCommand::parse("z"), None);
    }

    #[test]
    fn test_frame_contents() {
        let frame = test_frame();
        assert_eq!(frame.id(), 0x100);
        assert_eq!(frame.dlc(), 8);
        assert_eq!(frame.data(), &[0, 1, 2, 3, 4, 5, 6, 7]);
    }
}
