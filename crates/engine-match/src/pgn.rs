//! PGN (Portable Game Notation) output for finished games.

use crate::rules::Position;
use crate::tree::{GameTree, NodeId};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

const LINE_WIDTH: usize = 80;

/// Renders the game from the root of `tree` to `node`: tag pairs, a blank
/// line, movetext wrapped at 80 columns ending with the result, and a
/// trailing blank line.
///
/// A game that does not start from the standard position gets `SetUp` and
/// `FEN` tags after the roster, and its first move always carries a move
/// number (`1... Kd7` when Black moves first).
///
/// # Example
///
/// ```
/// use engine_match::pgn::format_game;
/// use engine_match::tree::GameTree;
///
/// let mut tree = GameTree::new(None);
/// let root = tree.root();
/// let node = tree.make_move(root, "e2e4", false).unwrap();
/// assert!(format_game(&tree, node).contains("\n\n1. e4 *\n\n"));
/// ```
pub fn format_game(tree: &GameTree, node: NodeId) -> String {
    let mut out = String::new();
    for (name, value) in tree.tags().iter() {
        if name == "SetUp" || name == "FEN" {
            continue;
        }
        out.push_str(&format!("[{} \"{}\"]\n", name, escape(value)));
    }
    if let Some(root) = tree.position(tree.root()) {
        if *root != Position::default() {
            out.push_str("[SetUp \"1\"]\n");
            out.push_str(&format!("[FEN \"{}\"]\n", root.fen(true)));
        }
    }
    out.push('\n');

    let result = tree.tags().get("Result").unwrap_or("*").to_string();
    let mut line = String::new();
    let words = tree
        .node_history(node)
        .into_iter()
        .skip(1)
        .enumerate()
        .map(|(ply, id)| numbered_token(tree, ply, id))
        .chain(std::iter::once(result));

    for word in words {
        if !line.is_empty() && line.len() + 1 + word.len() > LINE_WIDTH {
            out.push_str(&line);
            out.push('\n');
            line.clear();
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(&word);
    }
    out.push_str(&line);
    out.push_str("\n\n");
    out
}

/// The movetext token for `id`, numbered even when it opens the game with
/// Black to move.
fn numbered_token(tree: &GameTree, ply: usize, id: NodeId) -> String {
    let token = tree.token(id);
    if ply > 0 || token.contains('.') {
        return token;
    }
    match tree.parent(id).and_then(|parent| tree.position(parent)) {
        Some(position) => format!("{} {}", position.move_number_prefix(), token),
        None => token,
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Appends the game to the PGN file at `path`, creating it if needed.
///
/// Games are separated by the blank line [`format_game`] ends with, so a
/// file written by repeated calls reads back as one game per record.
///
/// # Errors
///
/// Returns any I/O error from opening or writing the file. The hub logs it
/// and carries on.
pub fn append_game<P: AsRef<Path>>(path: P, tree: &GameTree, node: NodeId) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(format_game(tree, node).as_bytes())?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn game(moves: &[&str], result: &str) -> (GameTree, NodeId) {
        let mut tree = GameTree::new(None);
        let mut node = tree.root();
        for mv in moves {
            node = tree.make_move(node, mv, false).unwrap();
        }
        tree.tags_mut().set("White", "TestEngineWhite");
        tree.tags_mut().set("Black", "TestEngineBlack");
        tree.tags_mut().set("Result", result);
        (tree, node)
    }

    #[test]
    fn test_format_game_headers_and_moves() {
        let (tree, node) = game(&["e2e4", "e7e5", "g1f3", "b8c6", "f1b5"], "1-0");
        let text = format_game(&tree, node);

        assert!(text.starts_with("[Event \"Engine Match\"]\n[Site \"Earth\"]\n[Date \""));
        assert!(text.contains("[Round \"1\"]"));
        assert!(text.contains("[White \"TestEngineWhite\"]"));
        assert!(text.contains("[Black \"TestEngineBlack\"]"));
        assert!(text.contains("[Result \"1-0\"]\n\n1. e4 e5 2. Nf3 Nc6 3. Bb5 1-0\n\n"));
    }

    #[test]
    fn test_format_game_without_moves() {
        let (tree, node) = game(&[], "1/2-1/2");
        let text = format_game(&tree, node);
        assert!(text.ends_with("[Result \"1/2-1/2\"]\n\n1/2-1/2\n\n"));
    }

    #[test]
    fn test_movetext_wraps_at_80_columns() {
        let shuffle = ["g1f3", "g8f6", "f3g1", "f6g8"];
        let moves: Vec<&str> = shuffle.iter().cycle().take(40).copied().collect();
        let (tree, node) = game(&moves, "1/2-1/2");
        let text = format_game(&tree, node);

        let movetext: Vec<&str> = text.split("\n\n").nth(1).unwrap().lines().collect();
        assert!(movetext.len() > 1);
        assert!(movetext.iter().all(|line| line.len() <= 80));
        assert!(movetext.last().unwrap().ends_with("1/2-1/2"));
    }

    #[test]
    fn test_standard_start_has_no_fen_tag() {
        let (tree, node) = game(&["e2e4"], "*");
        let text = format_game(&tree, node);
        assert!(!text.contains("[SetUp "));
        assert!(!text.contains("[FEN "));
    }

    #[test]
    fn test_custom_start_records_fen() {
        let fen = "4k3/8/8/8/8/8/4P3/4K3 b - - 0 1";
        let mut tree = GameTree::new(Some(Position::from_fen(fen).unwrap()));
        let root = tree.root();
        let node = tree.make_move(root, "e8d7", false).unwrap();
        let node = tree.make_move(node, "e2e4", false).unwrap();
        tree.tags_mut().set("SetUp", "1");
        tree.tags_mut().set("FEN", fen);

        let text = format_game(&tree, node);
        assert_eq!(text.matches("[FEN ").count(), 1);
        assert!(text.contains("[Result \"*\"]\n[SetUp \"1\"]\n[FEN \"4k3/8/8/8/8/8/4P3/4K3 b - - 0 1\"]\n\n"));
        assert!(text.contains("\n\n1... Kd7 2. e4 *\n\n"));
    }

    #[test]
    fn test_tag_values_escaped() {
        let (mut tree, node) = game(&[], "*");
        tree.tags_mut().set("Event", "The \"Big\" One");
        assert!(format_game(&tree, node).contains("[Event \"The \\\"Big\\\" One\"]"));
    }

    #[test]
    fn test_append_game_appends() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("games.pgn");
        let (tree, node) = game(&["e2e4"], "0-1");

        append_game(&path, &tree, node).unwrap();
        append_game(&path, &tree, node).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("[Event \"Engine Match\"]").count(), 2);
        assert_eq!(contents.matches("1. e4 0-1").count(), 2);
    }
}
