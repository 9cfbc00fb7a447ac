//! UCI (Universal Chess Interface) protocol vocabulary, seen from the GUI side.
//!
//! This crate formats the commands a match controller sends to an engine and
//! classifies the lines an engine writes back. It does no I/O of its own.
//!
//! # Commands sent to engines
//!
//! - `uci` - Initialize engine, get id and options
//! - `setoption name <name> value <value>` - Configure an option
//! - `ucinewgame` - Next position belongs to a new game
//! - `isready` / `readyok` - Synchronization
//! - `position fen <fen> [moves <move>...]` - Set position
//! - `go [movetime <ms>]` - Start search
//! - `quit` - Exit engine
//!
//! # Example
//!
//! ```
//! use uci::{EngineMessage, GoOptions, GuiCommand};
//!
//! let go = GuiCommand::Go(GoOptions::movetime(3000));
//! assert_eq!(go.to_uci(), "go movetime 3000");
//!
//! let reply = EngineMessage::parse("bestmove e2e4 ponder e7e5");
//! assert_eq!(reply.best_move(), Some("e2e4"));
//! ```

mod command;
mod message;

pub use command::{GoOptions, GuiCommand};
pub use message::EngineMessage;

