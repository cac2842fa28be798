use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::viewer;
use crate::config::{
    BroadcastSettings, MatchConfig, MatchSettings, PlayerConfig, DEFAULT_ENGINE, DEFAULT_PORT,
};
use crate::core::driver::MoveDriver;
use crate::core::rules::{ChessRules, Side};
use crate::core::runner::MatchRunner;
use crate::uci::UciEngine;

#[derive(Parser, Debug)]
#[command(name = "cete")]
#[command(about = "Pit UCI chess engines against each other")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path or command of the white engine
    #[arg(long, default_value = DEFAULT_ENGINE)]
    pub white: String,

    /// Path or command of the black engine
    #[arg(long, default_value = DEFAULT_ENGINE)]
    pub black: String,

    /// Time per move in milliseconds
    #[arg(long = "time", default_value_t = 500)]
    pub time_ms: u64,

    /// Starting position in FEN
    #[arg(long)]
    pub fen: Option<String>,

    #[command(flatten)]
    pub output: OutputOptions,
}

/// Flags shared by every way of starting a match
#[derive(clap::Args, Debug, Clone, Copy)]
pub struct OutputOptions {
    /// Live broadcast in a web view
    #[arg(short, long, global = true)]
    pub broadcast: bool,

    /// Port used for the live broadcast
    #[arg(short, long, global = true, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Do not print the game in PGN format
    #[arg(long, global = true)]
    pub no_pgn: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Play a game described by a TOML match file
    Game {
        /// Match file, e.g. "./match.toml"
        file: PathBuf,
    },
    /// Follow a live broadcast from the terminal
    Watch {
        /// Broadcast address, e.g. "127.0.0.1:6061"
        #[arg(default_value = "127.0.0.1:6061")]
        addr: String,
    },
}

impl Cli {
    /// Match described by the top-level flags.
    pub fn match_config(&self) -> Result<MatchConfig> {
        let config = MatchConfig {
            white: PlayerConfig::new(&self.white),
            black: PlayerConfig::new(&self.black),
            settings: MatchSettings::new(Duration::from_millis(self.time_ms)),
            start_fen: self.fen.clone(),
        };
        config.validate()?;
        Ok(config)
    }
}

pub async fn run_cli(cli: Cli, cancel: CancellationToken) -> Result<()> {
    match &cli.command {
        Some(Commands::Game { file }) => {
            let config = MatchConfig::from_file(file)
                .with_context(|| format!("cannot load match file {}", file.display()))?;
            play_match(config, cli.output, &cancel).await
        }
        Some(Commands::Watch { addr }) => viewer::watch(addr, &cancel)
            .await
            .with_context(|| format!("cannot watch {addr}")),
        None => {
            let config = cli.match_config()?;
            play_match(config, cli.output, &cancel).await
        }
    }
}

/// Launches both engines, plays one game and prints it.
async fn play_match(config: MatchConfig, output: OutputOptions, cancel: &CancellationToken) -> Result<()> {
    let rules = match &config.start_fen {
        Some(fen) => ChessRules::from_fen(fen)?,
        None => ChessRules::new(),
    };

    let mut white = UciEngine::spawn(&config.white, Side::White).context("cannot start white engine")?;
    let mut black = UciEngine::spawn(&config.black, Side::Black).context("cannot start black engine")?;

    if let Err(e) = initialize(&mut white, &mut black, &config).await {
        white.terminate().await;
        black.terminate().await;
        return Err(e);
    }

    let white_name = white.name().to_string();
    let black_name = black.name().to_string();

    let report = {
        let mut runner = MatchRunner::new(&mut white, &mut black, config.settings);
        if output.broadcast {
            let settings = BroadcastSettings::on_port(output.port);
            runner.run_with_broadcast(cancel, rules, &settings).await
        } else {
            runner.run(cancel, rules).await
        }
    };

    white.terminate().await;
    black.terminate().await;

    if report.is_cancelled() {
        warn!(moves = report.game.move_count(), "match interrupted");
    }
    let (game, result) = report.into_result();
    if !output.no_pgn {
        println!("PGN:\n{}", game.rules().pgn(&white_name, &black_name));
    }
    result.context("match failed")?;
    info!(outcome = %game.outcome(), "done");
    Ok(())
}

async fn initialize(white: &mut UciEngine, black: &mut UciEngine, config: &MatchConfig) -> Result<()> {
    white
        .initialize(&config.white.options)
        .await
        .context("white engine failed to initialize")?;
    black
        .initialize(&config.black.options)
        .await
        .context("black engine failed to initialize")?;
    Ok(())
}
