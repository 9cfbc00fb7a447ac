//! Chess rules, as far as the match controller needs them.
//!
//! [`Position`] wraps a [`cozy_chess::Board`] and exposes the handful of
//! questions the hub asks: is this move legal, what does the position look
//! like as FEN, is the game over, and how should a move be written in a PGN.
//!
//! Moves are exchanged as UCI strings in Chess960 notation: castling is
//! written king-takes-rook (`e1h1`), which is what engines send once
//! `UCI_Chess960` is enabled. [`Position::translate_castling`] converts the
//! older king-two-squares form (`e1g1`) for engines that ignore the option.

use cozy_chess::{Board, Color, File, Move, Piece, Rank, Square};
use std::fmt;
use thiserror::Error;

/// FEN of the standard starting position.
pub const STARTPOS_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Errors produced when a move string cannot be applied to a position.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MoveError {
    /// The string is not a UCI move at all.
    #[error("malformed move: {0}")]
    Malformed(String),
    /// The move is well formed but not legal here.
    #[error("illegal move {mv}: {reason}")]
    Illegal { mv: String, reason: String },
    /// No legal move matches the SAN text.
    #[error("no legal move matches: {0}")]
    NoMatchingMove(String),
    /// More than one legal move matches the SAN text.
    #[error("ambiguous move: {0}")]
    AmbiguousMove(String),
}

/// The FEN string could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid FEN: {0}")]
pub struct FenError(pub String);

/// A chess position: piece placement, side to move, castling and en passant
/// rights, and the move counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    board: Board,
}

impl Default for Position {
    fn default() -> Self {
        Self {
            board: Board::default(),
        }
    }
}

impl Position {
    /// Parses a FEN (or Shredder-FEN) string. The move counters may be omitted.
    pub fn from_fen(fen: &str) -> Result<Self, FenError> {
        let fen = fen.trim();
        let full = if fen.split_whitespace().count() == 4 {
            format!("{} 0 1", fen)
        } else {
            fen.to_string()
        };

        Board::from_fen(&full, false)
            .or_else(|_| Board::from_fen(&full, true))
            .map(|board| Self { board })
            .map_err(|_| FenError(fen.to_string()))
    }

    pub fn side_to_move(&self) -> Color {
        self.board.side_to_move()
    }

    /// FEN of the position, optionally without the half-move and full-move
    /// counters.
    pub fn fen(&self, with_counters: bool) -> String {
        let fen = self.board.to_string();
        if with_counters {
            fen
        } else {
            fen.split_whitespace().take(4).collect::<Vec<_>>().join(" ")
        }
    }

    /// Returns why `token` cannot be played here, or `None` if it is legal.
    pub fn illegal_reason(&self, token: &str) -> Option<String> {
        let mv = match parse_move(token) {
            Ok(mv) => mv,
            Err(e) => return Some(e.to_string()),
        };

        let stm = self.board.side_to_move();
        match self.board.color_on(mv.from) {
            None => return Some(format!("no piece on {}", mv.from)),
            Some(color) if color != stm => {
                return Some(format!(
                    "piece on {} belongs to {}",
                    mv.from,
                    color_name(color)
                ))
            }
            Some(_) => {}
        }

        if !self.board.is_legal(mv) {
            return Some(format!("{} is not a legal move", token.trim()));
        }

        None
    }

    /// Rewrites king-two-squares castling (`e1g1`) into king-takes-rook form
    /// (`e1h1`). Any other move, including an already legal one, is returned
    /// unchanged.
    pub fn translate_castling(&self, token: &str) -> String {
        let token = token.trim();
        let Ok(mv) = parse_move(token) else {
            return token.to_string();
        };
        if mv.promotion.is_some() || self.board.is_legal(mv) {
            return token.to_string();
        }

        let stm = self.board.side_to_move();
        if self.board.piece_on(mv.from) != Some(Piece::King)
            || self.board.color_on(mv.from) != Some(stm)
        {
            return token.to_string();
        }

        let back_rank = Rank::First.relative_to(stm);
        if mv.from.rank() != back_rank || mv.to.rank() != back_rank {
            return token.to_string();
        }

        let rights = self.board.castle_rights(stm);
        let rook_file = match mv.to.file() {
            File::G => rights.short,
            File::C => rights.long,
            _ => None,
        };

        match rook_file {
            Some(file) => {
                let native = Move {
                    from: mv.from,
                    to: Square::new(file, back_rank),
                    promotion: None,
                };
                if self.board.is_legal(native) {
                    native.to_string()
                } else {
                    token.to_string()
                }
            }
            None => token.to_string(),
        }
    }

    /// Plays a legal move and returns the resulting position.
    pub fn apply(&self, token: &str) -> Result<Position, MoveError> {
        let mv = parse_move(token)?;
        if !self.board.is_legal(mv) {
            return Err(MoveError::Illegal {
                mv: token.trim().to_string(),
                reason: self
                    .illegal_reason(token)
                    .unwrap_or_else(|| "not legal".to_string()),
            });
        }

        let mut board = self.board.clone();
        board.play_unchecked(mv);
        Ok(Self { board })
    }

    /// All legal moves, castling in king-takes-rook form.
    pub fn legal_moves(&self) -> Vec<Move> {
        let mut moves = Vec::new();
        self.board.generate_moves(|piece_moves| {
            moves.extend(piece_moves);
            false
        });
        moves
    }

    pub fn has_no_legal_moves(&self) -> bool {
        !self.board.generate_moves(|piece_moves| !piece_moves.to.is_empty())
    }

    pub fn in_check(&self) -> bool {
        !self.board.checkers().is_empty()
    }

    /// Neither side can possibly mate: bare kings, a single minor piece, or
    /// only bishops that all stand on one square colour.
    pub fn has_insufficient_material(&self) -> bool {
        let board = &self.board;
        let heavy = board.pieces(Piece::Pawn) | board.pieces(Piece::Rook) | board.pieces(Piece::Queen);
        if !heavy.is_empty() {
            return false;
        }

        let knights = board.pieces(Piece::Knight);
        let bishops = board.pieces(Piece::Bishop);
        if (knights | bishops).len() <= 1 {
            return true;
        }
        if !knights.is_empty() {
            return false;
        }

        let mut shades = bishops.into_iter().map(is_light_square);
        match shades.next() {
            Some(first) => shades.all(|shade| shade == first),
            None => true,
        }
    }

    /// Plies since the last capture or pawn move.
    pub fn halfmove_clock(&self) -> u32 {
        u32::from(self.board.halfmove_clock())
    }

    /// Position equality in the repetition sense: placement, side to move,
    /// castling and en passant rights. Move counters are ignored.
    pub fn same_position(&self, other: &Position) -> bool {
        self.board.same_position(&other.board)
    }

    /// `"12."` when White is to move, `"12..."` when Black is.
    pub fn move_number_prefix(&self) -> String {
        let number = self.board.fullmove_number();
        match self.board.side_to_move() {
            Color::White => format!("{}.", number),
            Color::Black => format!("{}...", number),
        }
    }

    /// Standard Algebraic Notation for a legal move, with `+`/`#` suffix.
    pub fn san(&self, token: &str) -> Result<String, MoveError> {
        let mv = parse_move(token)?;
        let next = self.apply(token)?;

        let mut san = self.san_without_suffix(mv);
        if next.in_check() {
            san.push(if next.has_no_legal_moves() { '#' } else { '+' });
        }
        Ok(san)
    }

    /// Finds the legal move written as `text` (SAN, or UCI as a fallback) and
    /// returns it as a UCI token.
    pub fn parse_san(&self, text: &str) -> Result<String, MoveError> {
        let wanted = normalize_san(text);
        if wanted.is_empty() {
            return Err(MoveError::Malformed(text.to_string()));
        }

        if let Ok(mv) = wanted.parse::<Move>() {
            let token = self.translate_castling(&mv.to_string());
            if self.illegal_reason(&token).is_none() {
                return Ok(token);
            }
        }

        let matches: Vec<Move> = self
            .legal_moves()
            .into_iter()
            .filter(|&mv| normalize_san(&self.san_without_suffix(mv)) == wanted)
            .collect();

        match matches.as_slice() {
            [mv] => Ok(mv.to_string()),
            [] => Err(MoveError::NoMatchingMove(text.to_string())),
            _ => Err(MoveError::AmbiguousMove(text.to_string())),
        }
    }

    fn san_without_suffix(&self, mv: Move) -> String {
        let board = &self.board;
        let stm = board.side_to_move();
        let piece = board.piece_on(mv.from).unwrap_or(Piece::Pawn);

        if piece == Piece::King && board.colors(stm).has(mv.to) {
            let kingside = (mv.to.file() as u8) > (mv.from.file() as u8);
            return if kingside { "O-O" } else { "O-O-O" }.to_string();
        }

        let from = mv.from.to_string();
        let to = mv.to.to_string();
        let is_capture = board.colors(!stm).has(mv.to)
            || (piece == Piece::Pawn && mv.from.file() != mv.to.file());

        let mut san = String::new();

        if piece == Piece::Pawn {
            if is_capture {
                san.push_str(&from[..1]);
                san.push('x');
            }
            san.push_str(&to);
            if let Some(promotion) = mv.promotion {
                san.push('=');
                san.push(piece_char(promotion));
            }
            return san;
        }

        san.push(piece_char(piece));

        let mut rivals: Vec<Square> = Vec::new();
        board.generate_moves(|piece_moves| {
            if piece_moves.piece == piece && piece_moves.from != mv.from && piece_moves.to.has(mv.to)
            {
                rivals.push(piece_moves.from);
            }
            false
        });

        if !rivals.is_empty() {
            let shares_file = rivals.iter().any(|sq| sq.file() == mv.from.file());
            let shares_rank = rivals.iter().any(|sq| sq.rank() == mv.from.rank());
            if !shares_file {
                san.push_str(&from[..1]);
            } else if !shares_rank {
                san.push_str(&from[1..]);
            } else {
                san.push_str(&from);
            }
        }

        if is_capture {
            san.push('x');
        }
        san.push_str(&to);
        san
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.board)
    }
}

/// Lowercase colour name for log and alert messages.
pub fn color_name(color: Color) -> &'static str {
    match color {
        Color::White => "white",
        Color::Black => "black",
    }
}

/// True if `token` starts with a board coordinate such as `e2`.
pub fn starts_with_square(token: &str) -> bool {
    token.get(..2).is_some_and(|s| s.parse::<Square>().is_ok())
}

fn parse_move(token: &str) -> Result<Move, MoveError> {
    token
        .trim()
        .parse::<Move>()
        .map_err(|_| MoveError::Malformed(token.trim().to_string()))
}

fn piece_char(piece: Piece) -> char {
    match piece {
        Piece::Pawn => 'P',
        Piece::Knight => 'N',
        Piece::Bishop => 'B',
        Piece::Rook => 'R',
        Piece::Queen => 'Q',
        Piece::King => 'K',
    }
}

fn is_light_square(square: Square) -> bool {
    (square.file() as usize + square.rank() as usize) % 2 == 1
}

fn normalize_san(text: &str) -> String {
    let trimmed = text
        .trim()
        .trim_end_matches(|c| matches!(c, '+' | '#' | '!' | '?'));
    match trimmed {
        "0-0" => "O-O".to_string(),
        "0-0-0" => "O-O-O".to_string(),
        other => other.replace('=', ""),
    }
}
