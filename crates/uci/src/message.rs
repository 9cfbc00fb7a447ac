//! Classification of lines written by an engine.

/// Messages sent from engine to GUI.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineMessage {
    /// Engine identification.
    Id { name: Option<String>, author: Option<String> },
    /// UCI initialization complete.
    UciOk,
    /// Engine is ready.
    ReadyOk,
    /// Search information, kept verbatim.
    Info(String),
    /// Best move found. `mv` is empty when the engine sent a bare `bestmove`.
    BestMove { mv: String, ponder: Option<String> },
    /// Anything else (option declarations, copyright banners, ...).
    Other(String),
}

impl EngineMessage {
    /// Classify one line of engine output.
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let mut parts = line.split_whitespace();

        match parts.next().unwrap_or("") {
            "uciok" => EngineMessage::UciOk,
            "readyok" => EngineMessage::ReadyOk,
            "info" => EngineMessage::Info(line.to_string()),
            "bestmove" => {
                let mv = parts.next().unwrap_or("").to_string();
                let ponder = match parts.next() {
                    Some("ponder") => parts.next().map(str::to_string),
                    _ => None,
                };
                EngineMessage::BestMove { mv, ponder }
            }
            "id" => match parts.next() {
                Some("name") => EngineMessage::Id {
                    name: Some(parts.collect::<Vec<_>>().join(" ")),
                    author: None,
                },
                Some("author") => EngineMessage::Id {
                    name: None,
                    author: Some(parts.collect::<Vec<_>>().join(" ")),
                },
                _ => EngineMessage::Other(line.to_string()),
            },
            _ => EngineMessage::Other(line.to_string()),
        }
    }

    /// The move of a `bestmove` reply, if this is one and it carries a move.
    pub fn best_move(&self) -> Option<&str> {
        match self {
            EngineMessage::BestMove { mv, .. } if !mv.is_empty() => Some(mv),
            _ => None,
        }
    }
}
