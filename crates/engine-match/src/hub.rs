//! Match orchestration.
//!
//! The [`Hub`] owns the match configuration and at most one running game.
//! It is driven entirely by [`HubEvent`]s: operator commands, engine output
//! lines and timer firings all arrive on one channel and are handled one at
//! a time by [`Hub::run`], so hub state is never touched concurrently.
//!
//! State moves between Idle (no match loaded), Ready (match loaded, no game)
//! and Running (one game in progress). After every finished game the next one
//! is started automatically after [`HubSettings::next_game_delay`], unless
//! the operator stops the match first.

use crate::book::{self, OpeningBook};
use crate::config::{self, EngineConfig, MatchConfig, DEFAULT_MOVETIME};
use crate::engine::{
    EngineAdapter, EngineError, EngineId, EngineLauncher, LineCallback, Stream,
    DEFAULT_KILL_GRACE,
};
use crate::pairing::{self, Outcome, ResultToken, Standing};
use crate::pgn;
use crate::rules::{self, color_name};
use crate::tree::{GameTree, NodeId, Tags};
use cozy_chess::Color;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uci::{EngineMessage, GoOptions, GuiCommand};

/// Pause between a finished game and the next one, so old engine processes
/// can exit first.
/// Pause between a finished game and the next one.
pub const DEFAULT_NEXT_GAME_DELAY: Duration = Duration::from_millis(2000);

/// The outcome of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    WhiteWins,
    BlackWins,
    Draw,
}

impl MatchResult {
    /// PGN result string: `1-0`, `0-1` or `1/2-1/2`.
    pub fn as_str(self) -> &'static str {
        match self {
            MatchResult::WhiteWins => "1-0",
            MatchResult::BlackWins => "0-1",
            MatchResult::Draw => "1/2-1/2",
        }
    }

    /// A win for `color`.
    pub fn win_for(color: Color) -> Self {
        match color {
            Color::White => MatchResult::WhiteWins,
            Color::Black => MatchResult::BlackWins,
        }
    }

    /// The result as seen by the engine playing `color`.
    pub fn outcome_for(self, color: Color) -> Outcome {
        let white = match self {
            MatchResult::WhiteWins => Outcome::Win,
            MatchResult::BlackWins => Outcome::Loss,
            MatchResult::Draw => Outcome::Draw,
        };
        match color {
            Color::White => white,
            Color::Black => white.reversed(),
        }
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1-0" => Ok(MatchResult::WhiteWins),
            "0-1" => Ok(MatchResult::BlackWins),
            "1/2-1/2" => Ok(MatchResult::Draw),
            other => Err(format!("unknown result '{}'", other)),
        }
    }
}

/// Coarse hub state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubState {
    /// No match loaded.
    Idle,
    /// Match loaded, no game in progress.
    Ready,
    /// A game is in progress.
    Running,
}

/// Timing knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubSettings {
    /// Pause before the next game starts on its own.
    pub next_game_delay: Duration,
    /// How long an engine gets to exit after `quit` before it is killed.
    pub kill_grace: Duration,
    /// Forfeit an engine that has not answered `go` within this time.
    pub stall_timeout: Option<Duration>,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            next_game_delay: DEFAULT_NEXT_GAME_DELAY,
            kill_grace: DEFAULT_KILL_GRACE,
            stall_timeout: None,
        }
    }
}

/// What a presenter needs to draw the match.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardView {
    pub match_file: Option<PathBuf>,
    pub running: bool,
    pub fen: Option<String>,
    /// Movetext of the move just played.
    pub last_move: Option<String>,
    pub white: Option<String>,
    pub black: Option<String>,
    pub standings: Vec<Standing>,
}

/// Receives display updates. Calls are fire-and-forget.
pub trait Presenter: Send {
    /// Called after every accepted move and whenever a game starts or stops.
    fn redraw(&mut self, view: &BoardView);

    /// Shows a problem to the operator.
    fn alert(&mut self, message: &str);
}

/// Operator commands. Each maps onto the [`Hub`] method of the same name.
#[derive(Debug)]
pub enum HubCommand {
    LoadMatch(PathBuf),
    StartGame,
    Terminate,
    FinishGame(MatchResult),
    ResetResults,
    /// The current standings are sent back on the channel.
    Standings(oneshot::Sender<Vec<Standing>>),
    /// Stop the running game and leave [`Hub::run`].
    Shutdown,
}

/// Everything the hub reacts to.
///
/// Engine lines carry the [`EngineId`] of the adapter that read them, and
/// timer events carry the serial they were armed with. Either one that no
/// longer matches the hub's state is ignored.
#[derive(Debug)]
pub enum HubEvent {
    Command(HubCommand),
    /// One line of engine output, as read by its reader thread.
    EngineLine {
        color: Color,
        engine: EngineId,
        stream: Stream,
        line: String,
    },
    /// The next-game delay has elapsed.
    StartGameDue {
        serial: u64,
    },
    /// The side to move has used up the stall timeout.
    StallCheck {
        serial: u64,
    },
}

struct PendingTimer {
    serial: u64,
    handle: JoinHandle<()>,
}

impl PendingTimer {
    fn cancel(self) {
        self.handle.abort();
    }
}

struct GameRecord {
    white: EngineAdapter,
    black: EngineAdapter,
    white_index: usize,
    black_index: usize,
    tree: GameTree,
    node: NodeId,
}

impl GameRecord {
    fn adapter(&self, color: Color) -> &EngineAdapter {
        match color {
            Color::White => &self.white,
            Color::Black => &self.black,
        }
    }

    fn adapter_mut(&mut self, color: Color) -> &mut EngineAdapter {
        match color {
            Color::White => &mut self.white,
            Color::Black => &mut self.black,
        }
    }

    fn side_to_move(&self) -> Option<Color> {
        self.tree.position(self.node).map(|p| p.side_to_move())
    }

    fn shutdown(mut self, grace: Duration) {
        self.white.shutdown(grace);
        self.black.shutdown(grace);
    }
}

/// The match orchestrator.
///
/// A hub is normally started with [`spawn`] and driven through the
/// returned [`HubHandle`]. Tests and embedders can also own one directly and
/// feed it events with [`Hub::handle_event`].
///
/// # Example
///
/// ```no_run
/// use engine_match::engine::ProcessLauncher;
/// use engine_match::hub::{self, BoardView, HubSettings, Presenter};
/// use std::sync::Arc;
///
/// struct Quiet;
///
/// impl Presenter for Quiet {
///     fn redraw(&mut self, _view: &BoardView) {}
///     fn alert(&mut self, message: &str) {
///         eprintln!("{}", message);
///     }
/// }
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let (handle, task) = hub::spawn(
///     HubSettings::default(),
///     Arc::new(ProcessLauncher),
///     Box::new(Quiet),
/// );
/// handle.load_match("match.json")?;
/// // ... later
/// handle.shutdown()?;
/// task.await?;
/// # Ok(())
/// # }
/// ```
pub struct Hub {
    settings: HubSettings,
    launcher: Arc<dyn EngineLauncher>,
    presenter: Box<dyn Presenter>,
    events: mpsc::UnboundedSender<HubEvent>,
    config: Option<MatchConfig>,
    config_path: Option<PathBuf>,
    book: Option<OpeningBook>,
    game: Option<GameRecord>,
    next_engine_id: u64,
    timer_serial: u64,
    next_game: Option<PendingTimer>,
    stall: Option<(PendingTimer, Color)>,
}

impl Hub {
    /// Creates an idle hub. Engine output and timers are posted to `events`,
    /// whose receiving end must be fed back through [`Hub::handle_event`]
    /// (normally by [`Hub::run`]).
    pub fn new(
        settings: HubSettings,
        launcher: Arc<dyn EngineLauncher>,
        presenter: Box<dyn Presenter>,
        events: mpsc::UnboundedSender<HubEvent>,
    ) -> Self {
        Self {
            settings,
            launcher,
            presenter,
            events,
            config: None,
            config_path: None,
            book: None,
            game: None,
            next_engine_id: 1,
            timer_serial: 0,
            next_game: None,
            stall: None,
        }
    }

    /// Idle, Ready or Running, derived from what the hub holds.
    pub fn state(&self) -> HubState {
        match (&self.config, &self.game) {
            (_, Some(_)) => HubState::Running,
            (Some(_), None) => HubState::Ready,
            (None, None) => HubState::Idle,
        }
    }

    /// The loaded match, including every result recorded so far.
    pub fn config(&self) -> Option<&MatchConfig> {
        self.config.as_ref()
    }

    /// True while a next-game timer is armed.
    pub fn next_game_pending(&self) -> bool {
        self.next_game.is_some()
    }

    /// FEN of the running game's current position.
    pub fn current_fen(&self) -> Option<String> {
        let game = self.game.as_ref()?;
        game.tree.position(game.node).map(|p| p.fen(true))
    }

    /// Moves of the running game so far.
    pub fn history(&self) -> Vec<String> {
        self.game
            .as_ref()
            .map(|game| game.tree.history(game.node))
            .unwrap_or_default()
    }

    /// Match-file indices of the running game's players.
    pub fn pairing(&self) -> Option<(usize, usize)> {
        self.game
            .as_ref()
            .map(|game| (game.white_index, game.black_index))
    }

    /// Processes events until a shutdown command arrives, then stops the
    /// running game.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<HubEvent>) {
        while let Some(event) = events.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }
        self.terminate();
        tracing::info!("Match hub stopped");
    }

    /// Handles one event. Returns false once the hub has been told to stop.
    pub fn handle_event(&mut self, event: HubEvent) -> bool {
        match event {
            HubEvent::Command(command) => return self.handle_command(command),
            HubEvent::EngineLine {
                color,
                engine,
                stream,
                line,
            } => self.on_engine_line(color, engine, stream, line),
            HubEvent::StartGameDue { serial } => {
                if self.next_game.as_ref().map(|t| t.serial) == Some(serial) {
                    self.next_game = None;
                    self.start_game();
                }
            }
            HubEvent::StallCheck { serial } => {
                if let Some((timer, color)) = self.stall.take() {
                    if timer.serial == serial {
                        self.forfeit(color, "no response");
                    } else {
                        self.stall = Some((timer, color));
                    }
                }
            }
        }
        true
    }

    fn handle_command(&mut self, command: HubCommand) -> bool {
        match command {
            HubCommand::LoadMatch(path) => {
                self.load_match(&path);
            }
            HubCommand::StartGame => self.start_game(),
            HubCommand::Terminate => self.terminate(),
            HubCommand::FinishGame(result) => self.finish_game(result),
            HubCommand::ResetResults => self.reset_results(),
            HubCommand::Standings(reply) => {
                let _ = reply.send(self.standings());
            }
            HubCommand::Shutdown => return false,
        }
        true
    }

    /// Loads a match file (and its opening book) and starts playing.
    ///
    /// A running game is terminated without a result before the new match
    /// takes over. Returns whether the match was loaded. On failure the
    /// operator is alerted and the previously loaded match, if any, stays in
    /// place.
    pub fn load_match(&mut self, path: &Path) -> bool {
        let config = match MatchConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to load {}: {}", path.display(), e);
                self.presenter.alert(&format!("{}: {}", path.display(), e));
                return false;
            }
        };

        let book = match &config.book {
            Some(book_path) => match OpeningBook::load(book_path) {
                Ok(book) => Some(book),
                Err(e) => {
                    tracing::error!("Failed to load book {}: {}", book_path.display(), e);
                    self.presenter
                        .alert(&format!("{}: {}", book_path.display(), e));
                    return false;
                }
            },
            None => None,
        };

        self.terminate();
        tracing::info!(
            "Loaded {} ({} engines, movetime {}ms)",
            path.display(),
            config.engines.len(),
            config.movetime
        );
        self.config = Some(config);
        self.config_path = Some(path.to_path_buf());
        self.book = book;
        self.start_game();
        true
    }

    /// The next pairing as `(white, black)` match-file indices.
    pub fn choose_engines(&self) -> Option<(usize, usize)> {
        self.config
            .as_ref()
            .and_then(|config| pairing::choose_engines(&config.engines))
    }

    /// Starts a game between the next pairing. Does nothing while a game is
    /// running or without a usable match.
    ///
    /// Both engines are launched and sent `uci`, `UCI_Chess960`, their
    /// configured options and `ucinewgame`. The game then starts from the
    /// book line for the pairing, or from the standard position. If an
    /// engine cannot be launched the operator is alerted and no game starts.
    pub fn start_game(&mut self) {
        if self.game.is_some() {
            return;
        }
        let Some(config) = self.config.as_ref() else {
            return;
        };
        let Some((white_index, black_index)) = pairing::choose_engines(&config.engines) else {
            self.presenter.alert("A match needs at least two engines");
            return;
        };
        let white_config = config.engines[white_index].clone();
        let black_config = config.engines[black_index].clone();
        self.cancel_next_game();

        let white = match self.launch_engine(Color::White, &white_config) {
            Ok(adapter) => adapter,
            Err(e) => return self.launch_failed(e, Vec::new()),
        };
        let black = match self.launch_engine(Color::Black, &black_config) {
            Ok(adapter) => adapter,
            Err(e) => return self.launch_failed(e, vec![white]),
        };

        let (tree, node) = self.opening(white_index, black_index);
        self.game = Some(GameRecord {
            white,
            black,
            white_index,
            black_index,
            tree,
            node,
        });
        tracing::info!(
            "Game started: {} (white) vs {} (black)",
            white_config.display_name(),
            black_config.display_name()
        );

        self.redraw();
        self.progress_game();
    }

    fn launch_engine(
        &mut self,
        color: Color,
        engine: &EngineConfig,
    ) -> Result<EngineAdapter, EngineError> {
        let id = EngineId(self.next_engine_id);
        self.next_engine_id += 1;

        let mut adapter = EngineAdapter::new(id);
        let on_line = self.line_callback(color, id);
        adapter.launch(self.launcher.as_ref(), &engine.path, &engine.args, on_line)?;

        adapter.send_command(&GuiCommand::Uci);
        adapter.set_option("UCI_Chess960", true);
        for (name, value) in &engine.options {
            adapter.set_option(name, config::option_value(value));
        }
        adapter.send_command(&GuiCommand::UciNewGame);
        Ok(adapter)
    }

    fn launch_failed(&mut self, error: EngineError, launched: Vec<EngineAdapter>) {
        tracing::error!("{}", error);
        for mut adapter in launched {
            adapter.shutdown(self.settings.kill_grace);
        }
        self.presenter.alert(&error.to_string());
        self.redraw();
    }

    fn line_callback(&self, color: Color, engine: EngineId) -> LineCallback {
        let events = self.events.clone();
        Arc::new(move |stream, line| {
            let _ = events.send(HubEvent::EngineLine {
                color,
                engine,
                stream,
                line,
            });
        })
    }

    /// Starting tree for a pairing: the book line for their head-to-head
    /// count, or the standard position.
    fn opening(&self, white_index: usize, black_index: usize) -> (GameTree, NodeId) {
        let fresh = || {
            let tree = GameTree::new(None);
            let root = tree.root();
            (tree, root)
        };
        let (Some(book), Some(config)) = (&self.book, &self.config) else {
            return fresh();
        };

        let (a, b) = (white_index.min(black_index), white_index.max(black_index));
        let Some(record) = book.line_for(pairing::head_to_head(&config.engines, a, b)) else {
            return fresh();
        };
        match book::load_record(record) {
            Ok((mut tree, node)) => {
                *tree.tags_mut() = Tags::roster();
                (tree, node)
            }
            Err(e) => {
                tracing::warn!("Skipping book line: {}", e);
                fresh()
            }
        }
    }

    /// Asks the side to move for its move: `position` with the root FEN and
    /// every move so far, then `isready` and `go movetime`.
    pub fn get_move(&mut self) {
        let movetime = self
            .config
            .as_ref()
            .map_or(DEFAULT_MOVETIME, |config| config.movetime);
        let Some(game) = self.game.as_mut() else {
            return;
        };
        let Some(color) = game.side_to_move() else {
            return;
        };

        let root_fen = game
            .tree
            .position(game.tree.root())
            .map(|p| p.fen(true));
        let moves = game.tree.history(game.node);

        let engine = game.adapter_mut(color);
        engine.send_command(&GuiCommand::Position {
            fen: root_fen,
            moves,
        });
        engine.send_command(&GuiCommand::IsReady);
        engine.send_command(&GuiCommand::Go(GoOptions::movetime(movetime)));

        self.arm_stall_watchdog(color);
    }

    fn on_engine_line(&mut self, color: Color, engine: EngineId, stream: Stream, line: String) {
        let Some(game) = self.game.as_mut() else {
            return;
        };
        let adapter = game.adapter_mut(color);
        if adapter.id() != engine {
            tracing::trace!("Ignoring output of retired engine {}", engine);
            return;
        }

        match stream {
            Stream::Stderr => tracing::debug!("{} (stderr) {}", adapter.name(), line),
            Stream::Stdout => {
                if let Some(line) = adapter.accept_line(&line) {
                    self.receive(color, engine, &line);
                }
            }
        }
    }

    /// Acts on a synchronized line from the engine playing `color`.
    ///
    /// Only `bestmove` matters. Lines from an adapter that is no longer
    /// playing are ignored. A `bestmove` sent out of turn, or one that names
    /// an illegal move, forfeits the game for `color`.
    pub fn receive(&mut self, color: Color, engine: EngineId, line: &str) {
        let Some(game) = self.game.as_ref() else {
            return;
        };
        if game.adapter(color).id() != engine {
            return;
        }
        let message = EngineMessage::parse(line);
        if !matches!(message, EngineMessage::BestMove { .. }) {
            return;
        }

        if game.side_to_move() != Some(color) {
            self.forfeit(color, "bestmove out of turn");
            return;
        }
        self.cancel_stall();

        if !self.try_move(message.best_move().unwrap_or("")) {
            self.forfeit(color, &format!("illegal: {}", line));
            return;
        }
        self.progress_game();
    }

    /// Plays `token` in the running game if it is legal. Nothing changes on
    /// rejection.
    ///
    /// `token` is a UCI move. Standard castling (`e1g1`) is translated to
    /// king-takes-rook (`e1h1`) first. Returns whether the move was played.
    pub fn try_move(&mut self, token: &str) -> bool {
        if !rules::starts_with_square(token) {
            return false;
        }
        let Some(game) = self.game.as_mut() else {
            return false;
        };
        let Some(position) = game.tree.position(game.node) else {
            return false;
        };

        let token = position.translate_castling(token);
        if let Some(reason) = position.illegal_reason(&token) {
            tracing::debug!("Rejected {}: {}", token, reason);
            return false;
        }

        match game.tree.make_move(game.node, &token, false) {
            Ok(node) => game.node = node,
            Err(e) => {
                tracing::warn!("Could not play {}: {}", token, e);
                return false;
            }
        }
        self.redraw();
        true
    }

    /// Finishes the game if it is over, otherwise asks for the next move.
    pub fn progress_game(&mut self) {
        match self.adjudicate() {
            Some(result) => self.finish_game(result),
            None => self.get_move(),
        }
    }

    /// The result of the current position, if the game is over.
    ///
    /// Checked in order: checkmate or stalemate, insufficient material, the
    /// fifty-move rule, threefold repetition. A mate that also completes the
    /// hundredth quiet ply is a win.
    pub fn adjudicate(&self) -> Option<MatchResult> {
        let game = self.game.as_ref()?;
        let position = game.tree.position(game.node)?;

        if position.has_no_legal_moves() {
            return Some(if position.in_check() {
                MatchResult::win_for(!position.side_to_move())
            } else {
                MatchResult::Draw
            });
        }
        if position.has_insufficient_material() {
            return Some(MatchResult::Draw);
        }
        if position.halfmove_clock() >= 100 {
            return Some(MatchResult::Draw);
        }
        if game.tree.is_triple_repetition(game.node) {
            return Some(MatchResult::Draw);
        }
        None
    }

    /// Records `result` for the running game, saves the match, writes the
    /// PGN, stops both engines and schedules the next game. Does nothing
    /// without a running game.
    pub fn finish_game(&mut self, result: MatchResult) {
        let Some(mut game) = self.game.take() else {
            return;
        };
        self.cancel_stall();

        let mut white_name = None;
        let mut black_name = None;
        if let Some(config) = self.config.as_mut() {
            let (w, b) = (game.white_index, game.black_index);
            if let Some(engine) = config.engines.get_mut(w) {
                pairing::record_result(
                    &mut engine.results,
                    ResultToken {
                        outcome: result.outcome_for(Color::White),
                        opponent: b,
                    },
                );
                white_name = engine.name.clone().filter(|name| !name.is_empty());
            }
            if let Some(engine) = config.engines.get_mut(b) {
                pairing::record_result(
                    &mut engine.results,
                    ResultToken {
                        outcome: result.outcome_for(Color::Black),
                        opponent: w,
                    },
                );
                black_name = engine.name.clone().filter(|name| !name.is_empty());
            }
        }
        self.save_config();

        let white_name = white_name.unwrap_or_else(|| game.white.name().to_string());
        let black_name = black_name.unwrap_or_else(|| game.black.name().to_string());
        let tags = game.tree.tags_mut();
        tags.set("White", white_name.as_str());
        tags.set("Black", black_name.as_str());
        tags.set("Result", result.as_str());

        tracing::info!("{} {} {}", white_name, result, black_name);
        if let Some(outpgn) = self.config.as_ref().and_then(|c| c.outpgn.as_ref()) {
            if let Err(e) = pgn::append_game(outpgn, &game.tree, game.node) {
                tracing::warn!("Failed to append to {}: {}", outpgn.display(), e);
            }
        }

        let view = self.board_view(Some(&game), false);
        game.shutdown(self.settings.kill_grace);
        self.presenter.redraw(&view);
        self.schedule_next_game();
    }

    /// Ends the game with a loss for `color` and alerts the operator with
    /// `reason`.
    pub fn forfeit(&mut self, color: Color, reason: &str) {
        let Some(game) = self.game.as_ref() else {
            return;
        };
        let name = game.adapter(color).name().to_string();
        tracing::warn!("Forfeit ({}), {}", color_name(color), reason);
        self.presenter
            .alert(&format!("{} ({}) forfeits: {}", name, color_name(color), reason));
        self.finish_game(MatchResult::win_for(!color));
    }

    /// Stops the running game without recording a result and cancels any
    /// pending restart.
    pub fn terminate(&mut self) {
        self.cancel_next_game();
        self.cancel_stall();
        if let Some(game) = self.game.take() {
            game.shutdown(self.settings.kill_grace);
            tracing::info!("Game terminated");
            self.redraw();
        }
    }

    /// Clears every engine's results, saves, and starts over.
    pub fn reset_results(&mut self) {
        if self.config.is_none() {
            return;
        }
        self.terminate();
        if let Some(config) = self.config.as_mut() {
            config.clear_results();
        }
        self.save_config();
        tracing::info!("Results cleared");
        self.start_game();
    }

    /// Per-engine W/D/L tallies of the loaded match, in match-file order.
    pub fn standings(&self) -> Vec<Standing> {
        self.config
            .as_ref()
            .map(|config| pairing::standings(&config.engines))
            .unwrap_or_default()
    }

    fn save_config(&self) {
        if let (Some(config), Some(path)) = (&self.config, &self.config_path) {
            if let Err(e) = config.save(path) {
                tracing::error!("Failed to save {}: {}", path.display(), e);
            }
        }
    }

    fn board_view(&self, game: Option<&GameRecord>, running: bool) -> BoardView {
        let name = |color: Color| {
            let game = game?;
            let index = match color {
                Color::White => game.white_index,
                Color::Black => game.black_index,
            };
            self.config
                .as_ref()
                .and_then(|c| c.engines.get(index))
                .map(EngineConfig::display_name)
        };

        BoardView {
            match_file: self.config_path.clone(),
            running,
            fen: game.and_then(|g| g.tree.position(g.node)).map(|p| p.fen(true)),
            last_move: game
                .filter(|g| g.node != g.tree.root())
                .map(|g| g.tree.token(g.node)),
            white: name(Color::White),
            black: name(Color::Black),
            standings: self.standings(),
        }
    }

    fn redraw(&mut self) {
        let view = self.board_view(self.game.as_ref(), self.game.is_some());
        self.presenter.redraw(&view);
    }

    fn next_timer_serial(&mut self) -> u64 {
        self.timer_serial += 1;
        self.timer_serial
    }

    fn schedule_next_game(&mut self) {
        self.cancel_next_game();
        let serial = self.next_timer_serial();
        let events = self.events.clone();
        let delay = self.settings.next_game_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(HubEvent::StartGameDue { serial });
        });
        self.next_game = Some(PendingTimer { serial, handle });
    }

    fn cancel_next_game(&mut self) {
        if let Some(timer) = self.next_game.take() {
            timer.cancel();
        }
    }

    fn arm_stall_watchdog(&mut self, color: Color) {
        self.cancel_stall();
        let Some(timeout) = self.settings.stall_timeout else {
            return;
        };
        let serial = self.next_timer_serial();
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = events.send(HubEvent::StallCheck { serial });
        });
        self.stall = Some((PendingTimer { serial, handle }, color));
    }

    fn cancel_stall(&mut self) {
        if let Some((timer, _)) = self.stall.take() {
            timer.cancel();
        }
    }
}

/// The hub task has stopped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("match hub has stopped")]
pub struct HubClosed;

/// Cloneable command interface to a hub running in its own task.
///
/// Commands are queued and handled in order with engine output and timers.
/// Every method fails with [`HubClosed`] once the hub task has exited.
#[derive(Debug, Clone)]
pub struct HubHandle {
    events: mpsc::UnboundedSender<HubEvent>,
}

impl HubHandle {
    fn command(&self, command: HubCommand) -> Result<(), HubClosed> {
        self.events
            .send(HubEvent::Command(command))
            .map_err(|_| HubClosed)
    }

    /// Queues [`Hub::load_match`]. Load failures are reported through the
    /// presenter, not here.
    ///
    /// # Errors
    ///
    /// Returns [`HubClosed`] if the hub task has exited.
    pub fn load_match(&self, path: impl Into<PathBuf>) -> Result<(), HubClosed> {
        self.command(HubCommand::LoadMatch(path.into()))
    }

    /// Queues [`Hub::start_game`].
    pub fn start_game(&self) -> Result<(), HubClosed> {
        self.command(HubCommand::StartGame)
    }

    /// Queues [`Hub::terminate`].
    pub fn terminate(&self) -> Result<(), HubClosed> {
        self.command(HubCommand::Terminate)
    }

    /// Queues [`Hub::finish_game`] with an operator-chosen result.
    pub fn finish_game(&self, result: MatchResult) -> Result<(), HubClosed> {
        self.command(HubCommand::FinishGame(result))
    }

    /// Queues [`Hub::reset_results`].
    pub fn reset_results(&self) -> Result<(), HubClosed> {
        self.command(HubCommand::ResetResults)
    }

    /// Fetches the standings once the hub reaches this request.
    ///
    /// # Errors
    ///
    /// Returns [`HubClosed`] if the hub task exits before answering.
    pub async fn standings(&self) -> Result<Vec<Standing>, HubClosed> {
        let (reply, response) = oneshot::channel();
        self.command(HubCommand::Standings(reply))?;
        response.await.map_err(|_| HubClosed)
    }

    /// Asks the hub to stop its game and exit its task.
    pub fn shutdown(&self) -> Result<(), HubClosed> {
        self.command(HubCommand::Shutdown)
    }
}

/// Runs a new hub on the current tokio runtime.
///
/// Returns the handle used to command it and the task, which finishes after
/// [`HubHandle::shutdown`]. Must be called from within a runtime.
pub fn spawn(
    settings: HubSettings,
    launcher: Arc<dyn EngineLauncher>,
    presenter: Box<dyn Presenter>,
) -> (HubHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let hub = Hub::new(settings, launcher, presenter, tx.clone());
    let task = tokio::spawn(hub.run(rx));
    (HubHandle { events: tx }, task)
}
