//! UCI command formatting.

use std::fmt;

/// Commands sent from GUI to engine.
#[derive(Debug, Clone, PartialEq)]
pub enum GuiCommand {
    /// Initialize UCI mode.
    Uci,
    /// Set an engine option.
    SetOption { name: String, value: String },
    /// The following position belongs to a new game.
    UciNewGame,
    /// Check if engine is ready.
    IsReady,
    /// Set up position.
    Position {
        fen: Option<String>,
        moves: Vec<String>,
    },
    /// Start calculating.
    Go(GoOptions),
    /// Quit the engine.
    Quit,
}

/// Options for the `go` command.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GoOptions {
    /// Search for exactly this time in milliseconds.
    pub movetime: Option<u64>,
}

impl GoOptions {
    /// Fixed time per move.
    pub fn movetime(ms: u64) -> Self {
        Self { movetime: Some(ms) }
    }
}

impl GuiCommand {
    /// Convenience constructor for `setoption`.
    pub fn set_option(name: impl Into<String>, value: impl fmt::Display) -> Self {
        GuiCommand::SetOption {
            name: name.into(),
            value: value.to_string(),
        }
    }

    /// Format the command as a single protocol line (without newline).
    pub fn to_uci(&self) -> String {
        match self {
            GuiCommand::Uci => "uci".to_string(),
            GuiCommand::SetOption { name, value } => {
                format!("setoption name {} value {}", name, value)
            }
            GuiCommand::UciNewGame => "ucinewgame".to_string(),
            GuiCommand::IsReady => "isready".to_string(),
            GuiCommand::Position { fen, moves } => {
                let mut s = match fen {
                    Some(fen) => format!("position fen {}", fen),
                    None => "position startpos".to_string(),
                };
                if !moves.is_empty() {
                    s.push_str(" moves ");
                    s.push_str(&moves.join(" "));
                }
                s
            }
            GuiCommand::Go(opts) => {
                let mut parts = vec!["go".to_string()];
                if let Some(ms) = opts.movetime {
                    parts.push(format!("movetime {}", ms));
                }
                parts.join(" ")
            }
            GuiCommand::Quit => "quit".to_string(),
        }
    }
}

impl fmt::Display for GuiCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uci())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_simple_commands() {
        assert_eq!(GuiCommand::Uci.to_uci(), "uci");
        assert_eq!(GuiCommand::IsReady.to_uci(), "isready");
        assert_eq!(GuiCommand::UciNewGame.to_uci(), "ucinewgame");
        assert_eq!(GuiCommand::Quit.to_uci(), "quit");
    }

    #[test]
    fn format_setoption() {
        let cmd = GuiCommand::set_option("UCI_Chess960", true);
        assert_eq!(cmd.to_uci(), "setoption name UCI_Chess960 value true");
    }

    #[test]
    fn format_position_startpos() {
        let cmd = GuiCommand::Position {
            fen: None,
            moves: vec![],
        };
        assert_eq!(cmd.to_uci(), "position startpos");
    }

    #[test]
    fn format_position_fen_with_moves() {
        let cmd = GuiCommand::Position {
            fen: Some("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1".to_string()),
            moves: vec!["e2e4".to_string(), "e7e5".to_string()],
        };
        assert_eq!(
            cmd.to_uci(),
            "position fen rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1 moves e2e4 e7e5"
        );
    }

    #[test]
    fn format_go_movetime() {
        let cmd = GuiCommand::Go(GoOptions::movetime(1000));
        assert_eq!(cmd.to_uci(), "go movetime 1000");
    }

    #[test]
    fn format_go_without_limits() {
        assert_eq!(GuiCommand::Go(GoOptions::default()).to_string(), "go");
    }
}
