//! Terminal presentation and operator commands.

use engine_match::hub::{BoardView, MatchResult, Presenter};
use engine_match::pairing::Standing;
use std::path::PathBuf;

/// Prints game progress and standings to the terminal.
#[derive(Debug, Default)]
pub struct ConsolePresenter {
    was_running: bool,
}

impl Presenter for ConsolePresenter {
    fn redraw(&mut self, view: &BoardView) {
        match (self.was_running, view.running) {
            (false, true) => println!(
                "{} - {}",
                view.white.as_deref().unwrap_or("?"),
                view.black.as_deref().unwrap_or("?")
            ),
            (true, false) => {
                println!("Halted");
                print_standings(&view.standings);
            }
            _ => {}
        }
        if view.running {
            if let Some(last_move) = &view.last_move {
                tracing::info!("{}", last_move);
            }
        }
        self.was_running = view.running;
    }

    fn alert(&mut self, message: &str) {
        eprintln!("!! {}", message);
    }
}

pub fn print_standings(standings: &[Standing]) {
    let width = standings
        .iter()
        .map(|row| row.name.len())
        .max()
        .unwrap_or(0);
    for row in standings {
        println!(
            "{:>2}  {:<width$}  {}  ({:.1}/{})",
            row.index,
            row.name,
            row.tally,
            row.tally.score(),
            row.tally.games(),
            width = width
        );
    }
}

/// A line typed by the operator while a match runs.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    Load(PathBuf),
    Start,
    Stop,
    Finish(MatchResult),
    Reset,
    Standings,
    Quit,
}

pub const HELP: &str =
    "commands: load <file> | start | stop | finish 1-0|0-1|1/2-1/2 | reset | standings | quit";

/// Parses one operator line. Blank lines yield `Ok(None)`.
pub fn parse_operator_command(line: &str) -> Result<Option<OperatorCommand>, String> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word {
        "" => return Ok(None),
        "load" if !rest.is_empty() => OperatorCommand::Load(PathBuf::from(rest)),
        "start" => OperatorCommand::Start,
        "stop" => OperatorCommand::Stop,
        "finish" => OperatorCommand::Finish(rest.parse()?),
        "reset" => OperatorCommand::Reset,
        "standings" => OperatorCommand::Standings,
        "quit" | "exit" => OperatorCommand::Quit,
        _ => return Err(HELP.to_string()),
    };
    Ok(Some(command))
}
