//! Opening book: a PGN file whose games are used as starting lines.

use crate::rules::{FenError, Position};
use crate::tree::{GameTree, NodeId, TreeError};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur when reading or replaying book games.
#[derive(Debug, Error)]
pub enum BookError {
    /// Failed to read the book file.
    #[error("failed to read opening book: {0}")]
    Io(#[from] std::io::Error),

    /// The record's `FEN` tag is not a valid position.
    #[error("bad FEN tag in book game: {0}")]
    Fen(#[from] FenError),

    /// A move in the record could not be played.
    #[error("book game move {ply} ({text}): {source}")]
    Move {
        ply: usize,
        text: String,
        #[source]
        source: TreeError,
    },
}

/// One game of a PGN file, split but not yet replayed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PgnRecord {
    pub tags: Vec<(String, String)>,
    pub movetext: String,
}

impl PgnRecord {
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Splits PGN data into records. A tag line that follows movetext starts a
/// new record; records with neither tags nor moves are dropped.
#[must_use]
pub fn preparse(data: &[u8]) -> Vec<PgnRecord> {
    let text = String::from_utf8_lossy(data);
    let mut records = Vec::new();
    let mut current = PgnRecord::default();

    for line in text.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            if !current.movetext.is_empty() {
                records.push(std::mem::take(&mut current));
            }
            if let Some(tag) = parse_tag(line) {
                current.tags.push(tag);
            }
        } else if !line.is_empty() && !line.starts_with('%') {
            if !current.movetext.is_empty() {
                current.movetext.push('\n');
            }
            current.movetext.push_str(line);
        }
    }

    if !current.tags.is_empty() || !current.movetext.is_empty() {
        records.push(current);
    }
    records
}

fn parse_tag(line: &str) -> Option<(String, String)> {
    let inner = line.strip_prefix('[')?.trim_end().strip_suffix(']')?;
    let (name, rest) = inner.split_once(char::is_whitespace)?;
    let quoted = rest.trim().strip_prefix('"')?.strip_suffix('"')?;

    let mut value = String::with_capacity(quoted.len());
    let mut chars = quoted.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                value.push(escaped);
            }
        } else {
            value.push(c);
        }
    }
    Some((name.to_string(), value))
}

/// Move tokens of a movetext section, with comments, variations, NAGs, move
/// numbers and the game result removed.
fn san_tokens(movetext: &str) -> Vec<String> {
    let mut cleaned = String::with_capacity(movetext.len());
    let mut depth = 0usize;
    let mut chars = movetext.chars();

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                for inner in chars.by_ref() {
                    if inner == '}' {
                        break;
                    }
                }
                cleaned.push(' ');
            }
            ';' => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        break;
                    }
                }
                cleaned.push(' ');
            }
            '(' => depth += 1,
            ')' => {
                depth = depth.saturating_sub(1);
                cleaned.push(' ');
            }
            _ if depth > 0 => {}
            _ => cleaned.push(c),
        }
    }

    cleaned
        .split_whitespace()
        .filter(|token| !matches!(*token, "*" | "1-0" | "0-1" | "1/2-1/2"))
        .map(strip_move_number)
        .filter(|token| !token.is_empty() && !token.starts_with('$'))
        .map(str::to_string)
        .collect()
}

/// Drops a leading move number such as `12.` or `12...`. Digits not
/// followed by a dot stay, so `0-0` survives.
fn strip_move_number(token: &str) -> &str {
    let digits = token.len() - token.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    let rest = &token[digits..];
    if digits > 0 && rest.starts_with('.') {
        rest.trim_start_matches('.')
    } else {
        token
    }
}

/// Replays a record into a fresh tree and returns it with the node after the
/// last move.
pub fn load_record(record: &PgnRecord) -> Result<(GameTree, NodeId), BookError> {
    let start = match record.tag("FEN") {
        Some(fen) => Position::from_fen(fen)?,
        None => Position::default(),
    };

    let mut tree = GameTree::new(Some(start));
    for (name, value) in &record.tags {
        if name != "FEN" && name != "SetUp" {
            tree.tags_mut().set(name.as_str(), value.as_str());
        }
    }

    let mut node = tree.root();
    for (ply, text) in san_tokens(&record.movetext).into_iter().enumerate() {
        let token = match tree.position(node) {
            Some(position) => position.parse_san(&text).map_err(TreeError::from),
            None => Err(TreeError::StaleNode(node)),
        };
        let played = token.and_then(|token| tree.make_move(node, &token, false));
        node = played.map_err(|source| BookError::Move {
            ply: ply + 1,
            text: text.clone(),
            source,
        })?;
    }

    Ok((tree, node))
}

/// All records of a PGN file, in file order.
#[derive(Debug, Clone, Default)]
pub struct OpeningBook {
    records: Vec<PgnRecord>,
}

impl OpeningBook {
    /// Reads and splits a PGN file. Records are replayed lazily, so a bad
    /// game only matters when its turn comes.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BookError> {
        let data = std::fs::read(path)?;
        Ok(Self::from_bytes(&data))
    }

    #[must_use]
    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            records: preparse(data),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The line for a pairing that has met `head_to_head` times before. Each
    /// line is played twice, once with each engine as White.
    #[must_use]
    pub fn line_for(&self, head_to_head: usize) -> Option<&PgnRecord> {
        if self.records.is_empty() {
            return None;
        }
        self.records.get((head_to_head / 2) % self.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TWO_GAMES: &str = r#"[Event "Ruy"]
[White "A \"quoted\" name"]

1. e4 e5 2. Nf3 {main line} Nc6 (2... d6 3. d4) 3. Bb5 $1 *

[Event "Sicilian"]
1.e4 c5 2.Nf3 1-0
"#;

    #[test]
    fn test_preparse_splits_records() {
        let records = preparse(TWO_GAMES.as_bytes());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tag("Event"), Some("Ruy"));
        assert_eq!(records[0].tag("White"), Some("A \"quoted\" name"));
        assert_eq!(records[1].tag("Event"), Some("Sicilian"));
        assert!(records[1].movetext.starts_with("1.e4"));
    }

    #[test]
    fn test_san_tokens_strip_noise() {
        let tokens = san_tokens("1. e4 e5 2. Nf3 {main line} Nc6 (2... d6 (2... f5) 3. d4) 3. Bb5 $1 ; note\n a6 *");
        assert_eq!(tokens, vec!["e4", "e5", "Nf3", "Nc6", "Bb5", "a6"]);
        assert_eq!(san_tokens("1.e4 c5 2.Nf3 1/2-1/2"), vec!["e4", "c5", "Nf3"]);
    }

    #[test]
    fn test_san_tokens_keep_zero_castling() {
        assert_eq!(san_tokens("4. 0-0 0-0-0"), vec!["0-0", "0-0-0"]);
        assert_eq!(san_tokens("12...0-0 13.Qd2"), vec!["0-0", "Qd2"]);
    }

    #[test]
    fn test_load_record_replays_zero_castling() {
        let record = PgnRecord {
            tags: Vec::new(),
            movetext: "1. e4 e5 2. Nf3 Nc6 3. Bc4 Bc5 4. 0-0 *".to_string(),
        };
        let (tree, node) = load_record(&record).unwrap();
        assert_eq!(tree.history(node).last().map(String::as_str), Some("e1h1"));
    }

    #[test]
    fn test_load_record_replays_moves() {
        let records = preparse(TWO_GAMES.as_bytes());
        let (tree, node) = load_record(&records[0]).unwrap();
        assert_eq!(tree.history(node), vec!["e2e4", "e7e5", "g1f3", "b8c6", "f1b5"]);
        assert_eq!(tree.tags().get("Event"), Some("Ruy"));
    }

    #[test]
    fn test_load_record_honours_fen() {
        let record = PgnRecord {
            tags: vec![
                ("SetUp".to_string(), "1".to_string()),
                ("FEN".to_string(), "4k3/8/8/8/8/8/4P3/4K3 w - - 0 1".to_string()),
            ],
            movetext: "1. e4 Kd7".to_string(),
        };
        let (tree, node) = load_record(&record).unwrap();
        assert_eq!(tree.history(node), vec!["e2e4", "e8d7"]);
        assert_eq!(
            tree.position(tree.root()).unwrap().fen(false),
            "4k3/8/8/8/8/8/4P3/4K3 w - -"
        );
    }

    #[test]
    fn test_load_record_reports_bad_move() {
        let record = PgnRecord {
            tags: Vec::new(),
            movetext: "1. e4 e4".to_string(),
        };
        match load_record(&record) {
            Err(BookError::Move { ply, text, .. }) => {
                assert_eq!(ply, 2);
                assert_eq!(text, "e4");
            }
            other => panic!("expected move error, got {:?}", other.map(|(_, n)| n)),
        }
    }

    #[test]
    fn test_line_for_plays_each_line_twice() {
        let book = OpeningBook::from_bytes(TWO_GAMES.as_bytes());
        assert_eq!(book.len(), 2);
        assert_eq!(book.line_for(0).unwrap().tag("Event"), Some("Ruy"));
        assert_eq!(book.line_for(1).unwrap().tag("Event"), Some("Ruy"));
        assert_eq!(book.line_for(2).unwrap().tag("Event"), Some("Sicilian"));
        assert_eq!(book.line_for(4).unwrap().tag("Event"), Some("Ruy"));
        assert!(OpeningBook::default().line_for(0).is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TWO_GAMES.as_bytes()).unwrap();
        let book = OpeningBook::load(file.path()).unwrap();
        assert_eq!(book.len(), 2);
    }
}
