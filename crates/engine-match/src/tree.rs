//! Game history as a tree of positions.
//!
//! A [`GameTree`] is an arena of nodes addressed by [`NodeId`]. The root holds
//! the starting position and the PGN tags; every other node holds the move
//! that produced it and the resulting position. Handles carry a generation
//! so that a node released with [`GameTree::detach`] can never be confused
//! with whatever later reuses its slot.

use crate::rules::{MoveError, Position};
use chrono::Local;
use cozy_chess::Color;
use std::cell::OnceCell;
use thiserror::Error;

/// Errors raised by tree operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// The handle refers to a node that has been released.
    #[error("node {0:?} no longer exists")]
    StaleNode(NodeId),
    /// The move could not be applied to the node's position.
    #[error(transparent)]
    Move(#[from] MoveError),
}

/// Handle to a node in a [`GameTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

/// Ordered PGN tag pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tags {
    entries: Vec<(String, String)>,
}

impl Tags {
    /// The seven tag roster with placeholder values and today's date.
    pub fn roster() -> Self {
        let date = Local::now().format("%Y.%m.%d").to_string();
        let mut tags = Self {
            entries: Vec::new(),
        };
        tags.set("Event", "Engine Match");
        tags.set("Site", "Earth");
        tags.set("Date", date);
        tags.set("Round", "1");
        tags.set("White", "White");
        tags.set("Black", "Black");
        tags.set("Result", "*");
        tags
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Replaces the value of an existing tag or appends a new one.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[derive(Debug)]
struct Node {
    serial: u64,
    parent: Option<NodeId>,
    mv: Option<String>,
    position: Position,
    depth: u32,
    children: Vec<NodeId>,
    display: OnceCell<String>,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Arena-backed move tree anchored at a starting position.
#[derive(Debug)]
pub struct GameTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    tags: Tags,
    next_serial: u64,
    live: usize,
}

impl Default for GameTree {
    fn default() -> Self {
        Self::new(None)
    }
}

impl GameTree {
    /// Creates a tree whose root is `position`, or the standard starting
    /// position when `None`.
    pub fn new(position: Option<Position>) -> Self {
        let mut tree = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId {
                index: 0,
                generation: 0,
            },
            tags: Tags::roster(),
            next_serial: 1,
            live: 0,
        };
        tree.root = tree.alloc(None, None, position.unwrap_or_default(), 0);
        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn tags_mut(&mut self) -> &mut Tags {
        &mut self.tags
    }

    /// Number of live nodes, root included.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// True while `id` refers to a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn position(&self, id: NodeId) -> Option<&Position> {
        self.get(id).map(|node| &node.position)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|node| node.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map(|node| node.children.as_slice()).unwrap_or(&[])
    }

    pub fn depth(&self, id: NodeId) -> Option<u32> {
        self.get(id).map(|node| node.depth)
    }

    /// The move (UCI token) that produced `id`; `None` for the root.
    pub fn move_token(&self, id: NodeId) -> Option<&str> {
        self.get(id).and_then(|node| node.mv.as_deref())
    }

    /// Creation order of the node within this tree.
    pub fn serial(&self, id: NodeId) -> Option<u64> {
        self.get(id).map(|node| node.serial)
    }

    /// Plays `token` from `id`.
    ///
    /// The token must already be legal, promotion suffix included exactly
    /// when needed. Unless `force_new_node` is set, an existing child with
    /// the same move is returned instead of creating a duplicate.
    pub fn make_move(
        &mut self,
        id: NodeId,
        token: &str,
        force_new_node: bool,
    ) -> Result<NodeId, TreeError> {
        let parent = self.get(id).ok_or(TreeError::StaleNode(id))?;

        if !force_new_node {
            if let Some(&existing) = parent
                .children
                .iter()
                .find(|&&child| self.move_token(child) == Some(token))
            {
                return Ok(existing);
            }
        }

        let position = parent.position.apply(token)?;
        let depth = parent.depth + 1;
        let child = self.alloc(Some(id), Some(token.to_string()), position, depth);
        if let Some(parent) = self.get_mut(id) {
            parent.children.push(child);
        }
        Ok(child)
    }

    /// Moves from the root to `id`, in order.
    pub fn history(&self, id: NodeId) -> Vec<String> {
        self.node_history(id)
            .into_iter()
            .filter_map(|node| self.move_token(node).map(str::to_string))
            .collect()
    }

    /// Node handles from the root to `id`, both included.
    pub fn node_history(&self, id: NodeId) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut cursor = self.get(id).map(|_| id);
        while let Some(current) = cursor {
            path.push(current);
            cursor = self.parent(current);
        }
        path.reverse();
        path
    }

    /// True if the position at `id` occurred at least twice before with the
    /// same side to move.
    pub fn is_triple_repetition(&self, id: NodeId) -> bool {
        let Some(node) = self.get(id) else {
            return false;
        };

        let mut hits = 0;
        let mut ancestor = node;
        while let Some(grandparent) = ancestor
            .parent
            .and_then(|p| self.get(p))
            .and_then(|p| p.parent)
            .and_then(|g| self.get(g))
        {
            ancestor = grandparent;
            if ancestor.position.same_position(&node.position) {
                hits += 1;
                if hits >= 2 {
                    return true;
                }
            }
        }

        false
    }

    /// SAN of the move into `id`, computed once. `"??"` for the root.
    pub fn display_move(&self, id: NodeId) -> String {
        let Some(node) = self.get(id) else {
            return "??".to_string();
        };
        let (Some(parent), Some(mv)) = (node.parent.and_then(|p| self.get(p)), &node.mv) else {
            return "??".to_string();
        };

        node.display
            .get_or_init(|| parent.position.san(mv).unwrap_or_else(|_| mv.clone()))
            .clone()
    }

    /// Movetext for the edge into `id`, with a move number when the parent
    /// has White to move or `id` is not its parent's first child. Empty for
    /// the root.
    pub fn token(&self, id: NodeId) -> String {
        let Some(parent_id) = self.parent(id) else {
            return String::new();
        };
        let Some(parent) = self.get(parent_id) else {
            return String::new();
        };

        let needs_number = parent.position.side_to_move() == Color::White
            || parent.children.first() != Some(&id);

        let mut s = String::new();
        if needs_number {
            s.push_str(&parent.position.move_number_prefix());
            s.push(' ');
        }
        s.push_str(&self.display_move(id));
        s
    }

    /// Removes `id` from its parent and releases the whole subtree below it.
    ///
    /// Returns the parent, which callers should treat as the new current
    /// node. Detaching the root (or a stale handle) does nothing and returns
    /// `id` itself.
    pub fn detach(&mut self, id: NodeId) -> NodeId {
        let Some(parent) = self.parent(id) else {
            return id;
        };

        if let Some(node) = self.get_mut(parent) {
            node.children.retain(|&child| child != id);
        }
        self.release(id);
        parent
    }

    fn release(&mut self, id: NodeId) {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let Some(slot) = self.slots.get_mut(id.index as usize) else {
                continue;
            };
            if slot.generation != id.generation {
                continue;
            }
            if let Some(node) = slot.node.take() {
                pending.extend(node.children);
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(id.index);
                self.live -= 1;
            }
        }
    }

    fn alloc(
        &mut self,
        parent: Option<NodeId>,
        mv: Option<String>,
        position: Position,
        depth: u32,
    ) -> NodeId {
        let node = Node {
            serial: self.next_serial,
            parent,
            mv,
            position,
            depth,
            children: Vec::new(),
            display: OnceCell::new(),
        };
        self.next_serial += 1;
        self.live += 1;

        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    fn get(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(tree: &mut GameTree, moves: &[&str]) -> NodeId {
        let mut node = tree.root();
        for mv in moves {
            node = tree.make_move(node, mv, false).unwrap();
        }
        node
    }

    #[test]
    fn test_new_root_defaults() {
        let tree = GameTree::new(None);
        let root = tree.root();
        assert_eq!(tree.depth(root), Some(0));
        assert_eq!(tree.parent(root), None);
        assert_eq!(tree.move_token(root), None);
        assert_eq!(tree.position(root), Some(&Position::default()));
        assert_eq!(tree.tags().get("Result"), Some("*"));
        assert_eq!(tree.tags().get("Round"), Some("1"));
        let date = tree.tags().get("Date").unwrap();
        assert_eq!(date.len(), 10);
        assert_eq!(&date[4..5], ".");
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_tags_keep_roster_order() {
        let mut tags = Tags::roster();
        tags.set("White", "Alpha");
        tags.set("Opening", "Sicilian");
        let keys: Vec<&str> = tags.iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            ["Event", "Site", "Date", "Round", "White", "Black", "Result", "Opening"]
        );
        assert_eq!(tags.get("White"), Some("Alpha"));
    }

    #[test]
    fn test_make_move_reuses_matching_child() {
        let mut tree = GameTree::default();
        let root = tree.root();
        let first = tree.make_move(root, "e2e4", false).unwrap();
        let again = tree.make_move(root, "e2e4", false).unwrap();
        assert_eq!(first, again);
        assert_eq!(tree.children(root).len(), 1);
        assert_eq!(tree.depth(first), Some(1));
    }

    #[test]
    fn test_make_move_forced_creates_sibling() {
        let mut tree = GameTree::default();
        let root = tree.root();
        let first = tree.make_move(root, "e2e4", false).unwrap();
        let forced = tree.make_move(root, "e2e4", true).unwrap();
        assert_ne!(first, forced);
        assert_eq!(tree.children(root), &[first, forced]);
    }

    #[test]
    fn test_make_move_rejects_illegal() {
        let mut tree = GameTree::default();
        let root = tree.root();
        let err = tree.make_move(root, "e2e5", false).unwrap_err();
        assert!(matches!(err, TreeError::Move(_)));
        assert!(tree.children(root).is_empty());
    }

    #[test]
    fn test_history_and_serials() {
        let mut tree = GameTree::default();
        let node = line(&mut tree, &["e2e4", "e7e5", "g1f3"]);
        assert_eq!(tree.history(node), vec!["e2e4", "e7e5", "g1f3"]);
        assert_eq!(tree.node_history(node).len(), 4);
        assert!(tree.serial(node).unwrap() > tree.serial(tree.root()).unwrap());
        assert!(tree.history(tree.root()).is_empty());
    }

    #[test]
    fn test_token_numbering() {
        let mut tree = GameTree::default();
        let e4 = tree.make_move(tree.root(), "e2e4", false).unwrap();
        let e5 = tree.make_move(e4, "e7e5", false).unwrap();
        let c5 = tree.make_move(e4, "c7c5", false).unwrap();
        let nf3 = tree.make_move(e5, "g1f3", false).unwrap();

        assert_eq!(tree.token(tree.root()), "");
        assert_eq!(tree.token(e4), "1. e4");
        assert_eq!(tree.token(e5), "e5");
        assert_eq!(tree.token(c5), "1... c5");
        assert_eq!(tree.token(nf3), "2. Nf3");
        assert_eq!(tree.display_move(tree.root()), "??");
    }

    #[test]
    fn test_triple_repetition_needs_two_earlier_occurrences() {
        let mut tree = GameTree::default();
        let shuffle = ["g1f3", "g8f6", "f3g1", "f6g8"];

        let once = line(&mut tree, &shuffle);
        assert!(!tree.is_triple_repetition(once));

        let mut node = once;
        for mv in shuffle {
            node = tree.make_move(node, mv, false).unwrap();
        }
        assert!(tree.is_triple_repetition(node));
    }

    #[test]
    fn test_repetition_respects_castling_rights() {
        let start = Position::from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        let mut tree = GameTree::new(Some(start));
        let shuffle = ["e1f1", "e8f8", "f1e1", "f8e8"];

        let mut node = tree.root();
        for _ in 0..2 {
            for mv in shuffle {
                node = tree.make_move(node, mv, false).unwrap();
            }
        }
        // Root had castling rights, so only one earlier match so far.
        assert!(!tree.is_triple_repetition(node));

        for mv in shuffle {
            node = tree.make_move(node, mv, false).unwrap();
        }
        assert!(tree.is_triple_repetition(node));
    }

    #[test]
    fn test_detach_releases_subtree() {
        let mut tree = GameTree::default();
        let e4 = tree.make_move(tree.root(), "e2e4", false).unwrap();
        let e5 = tree.make_move(e4, "e7e5", false).unwrap();
        let nf3 = tree.make_move(e5, "g1f3", false).unwrap();
        let d4 = tree.make_move(tree.root(), "d2d4", false).unwrap();
        assert_eq!(tree.len(), 5);

        let current = tree.detach(e4);
        assert_eq!(current, tree.root());
        assert_eq!(tree.children(tree.root()), &[d4]);
        assert!(!tree.contains(e4));
        assert!(!tree.contains(e5));
        assert!(!tree.contains(nf3));
        assert_eq!(tree.position(nf3), None);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_released_slot_reuse_does_not_revive_handle() {
        let mut tree = GameTree::default();
        let e4 = tree.make_move(tree.root(), "e2e4", false).unwrap();
        tree.detach(e4);

        let d4 = tree.make_move(tree.root(), "d2d4", false).unwrap();
        assert_ne!(e4, d4);
        assert!(!tree.contains(e4));
        assert_eq!(tree.move_token(d4), Some("d2d4"));
        assert!(matches!(
            tree.make_move(e4, "e7e5", false),
            Err(TreeError::StaleNode(_))
        ));
    }

    #[test]
    fn test_detach_root_is_noop() {
        let mut tree = GameTree::default();
        let root = tree.root();
        assert_eq!(tree.detach(root), root);
        assert!(tree.contains(root));
    }
}
