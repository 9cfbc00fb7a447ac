mod console;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::{parse_operator_command, print_standings, ConsolePresenter, OperatorCommand};
use engine_match::config::MatchConfig;
use engine_match::engine::ProcessLauncher;
use engine_match::hub::{self, HubHandle, HubSettings};
use engine_match::pairing;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::Level;

#[derive(Parser)]
#[command(name = "engine-match")]
#[command(about = "Unattended matches between UCI chess engines")]
struct Cli {
    /// More log output (-v debug, -vv protocol trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a match; operator commands are read from stdin
    Run {
        /// Match file (JSON)
        match_file: PathBuf,
        /// Pause between games in milliseconds
        #[arg(long, default_value = "2000")]
        next_game_delay_ms: u64,
        /// Time an engine gets to exit after quit, in milliseconds
        #[arg(long, default_value = "2000")]
        kill_grace_ms: u64,
        /// Forfeit engines that take this long to answer go
        #[arg(long)]
        stall_timeout_ms: Option<u64>,
    },
    /// Print the standings of a match file
    Standings {
        /// Match file (JSON)
        match_file: PathBuf,
    },
    /// Clear every engine's results in a match file
    Reset {
        /// Match file (JSON)
        match_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            match_file,
            next_game_delay_ms,
            kill_grace_ms,
            stall_timeout_ms,
        } => {
            let settings = HubSettings {
                next_game_delay: Duration::from_millis(next_game_delay_ms),
                kill_grace: Duration::from_millis(kill_grace_ms),
                stall_timeout: stall_timeout_ms.map(Duration::from_millis),
            };
            run(match_file, settings).await
        }
        Commands::Standings { match_file } => {
            let config = MatchConfig::load(&match_file)
                .with_context(|| format!("loading {}", match_file.display()))?;
            print_standings(&pairing::standings(&config.engines));
            Ok(())
        }
        Commands::Reset { match_file } => {
            let mut config = MatchConfig::load(&match_file)
                .with_context(|| format!("loading {}", match_file.display()))?;
            config.clear_results();
            config
                .save(&match_file)
                .with_context(|| format!("saving {}", match_file.display()))?;
            println!("Results cleared");
            Ok(())
        }
    }
}

async fn run(match_file: PathBuf, settings: HubSettings) -> anyhow::Result<()> {
    tracing::info!("Starting match {}", match_file.display());
    let (hub, task) = hub::spawn(
        settings,
        Arc::new(ProcessLauncher),
        Box::new(ConsolePresenter::default()),
    );
    hub.load_match(&match_file)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                match line? {
                    Some(line) => match parse_operator_command(&line) {
                        Ok(Some(OperatorCommand::Quit)) => break,
                        Ok(Some(command)) => dispatch(&hub, command).await?,
                        Ok(None) => {}
                        Err(message) => eprintln!("{}", message),
                    },
                    None => stdin_open = false,
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    hub.shutdown()?;
    task.await?;
    // Let the reaper threads kill engines that ignore quit.
    tokio::time::sleep(settings.kill_grace).await;
    tracing::info!("Match stopped");
    Ok(())
}

async fn dispatch(hub: &HubHandle, command: OperatorCommand) -> anyhow::Result<()> {
    match command {
        OperatorCommand::Load(path) => hub.load_match(path)?,
        OperatorCommand::Start => hub.start_game()?,
        OperatorCommand::Stop => hub.terminate()?,
        OperatorCommand::Finish(result) => hub.finish_game(result)?,
        OperatorCommand::Reset => hub.reset_results()?,
        OperatorCommand::Standings => print_standings(&hub.standings().await?),
        OperatorCommand::Quit => {}
    }
    Ok(())
}
