//! Engine Match - unattended tournaments between UCI chess engines.
//!
//! This crate pairs engines from a match file, relays moves between them,
//! adjudicates finished games, and keeps a running results log per engine.
//! Games are played in Chess960-aware mode, so castling is always written
//! king-takes-rook on the wire.
//!
//! # Modules
//!
//! - [`rules`] - chess rules: legality, FEN, SAN, adjudication queries
//! - [`tree`] - game history as an arena-backed tree of positions
//! - [`engine`] - engine subprocesses and output synchronization
//! - [`config`] - match file loading and saving
//! - [`pairing`] - results logs, pairing and standings
//! - [`book`] - PGN opening books
//! - [`pgn`] - PGN output of finished games
//! - [`hub`] - the match orchestrator

pub mod book;
pub mod config;
pub mod engine;
pub mod hub;
pub mod pairing;
pub mod pgn;
pub mod rules;
pub mod tree;

#[cfg(test)]
mod testing;
