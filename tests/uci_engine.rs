#![cfg(unix)]

use std::collections::BTreeMap;
use std::time::Duration;

use cete::config::{MatchSettings, PlayerConfig};
use cete::core::driver::MoveDriver;
use cete::core::rules::{ChessRules, RulesEngine, Side};
use cete::core::runner::MatchRunner;
use cete::error::{DriverError, MatchError};
use cete::uci::UciEngine;
use shakmaty::{Chess, Square};
use tokio_util::sync::CancellationToken;

/// A shell "engine" answering every search with the next move of `moves`.
fn scripted_engine(moves: &[&str]) -> PlayerConfig {
    let script = format!(
        r#"set -- {}
while read -r line; do
  case "$line" in
    uci) echo "id name scripted"; echo "uciok" ;;
    isready) echo "readyok" ;;
    go*) echo "info depth 1 score cp 0"; echo "bestmove $1"; shift ;;
    quit) exit 0 ;;
  esac
done"#,
        moves
            .iter()
            .map(|m| format!("'{m}'"))
            .collect::<Vec<_>>()
            .join(" ")
    );
    PlayerConfig {
        engine: "sh".to_string(),
        args: vec!["-c".to_string(), script],
        options: BTreeMap::new(),
    }
}

#[tokio::test]
async fn test_handshake_and_search() {
    let mut engine = UciEngine::spawn(&scripted_engine(&["e2e4"]), Side::White).unwrap();
    assert_eq!(engine.name(), "sh");
    assert_eq!(engine.side(), Side::White);

    let options = BTreeMap::from([("Hash".to_string(), "16".to_string())]);
    engine.initialize(&options).await.unwrap();

    let mv = engine
        .compute_move(&Chess::default(), Duration::from_millis(50))
        .await
        .unwrap();
    assert_eq!(mv.from(), Some(Square::E2));
    assert_eq!(mv.to(), Square::E4);

    engine.terminate().await;
}

#[tokio::test]
async fn test_engine_without_moves() {
    let mut engine = UciEngine::spawn(&scripted_engine(&["(none)"]), Side::White).unwrap();
    engine.initialize(&BTreeMap::new()).await.unwrap();
    let err = engine
        .compute_move(&Chess::default(), Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, DriverError::NoMove));
    engine.terminate().await;
}

#[tokio::test]
async fn test_engine_exit_is_reported() {
    let config = PlayerConfig {
        engine: "sh".to_string(),
        args: vec!["-c".to_string(), "read -r line; exit 0".to_string()],
        options: BTreeMap::new(),
    };
    let mut engine = UciEngine::spawn(&config, Side::White).unwrap();
    let err = engine.initialize(&BTreeMap::new()).await.unwrap_err();
    assert!(matches!(err, DriverError::Exited));
    engine.terminate().await;
}

#[tokio::test]
async fn test_stuck_engine_is_killed_on_terminate() {
    let config = PlayerConfig {
        engine: "sh".to_string(),
        args: vec!["-c".to_string(), "while true; do sleep 1; done".to_string()],
        options: BTreeMap::new(),
    };
    let mut engine = UciEngine::spawn(&config, Side::White).unwrap();
    tokio::time::timeout(Duration::from_secs(10), engine.terminate())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_match_between_processes() {
    let mut white = UciEngine::spawn(&scripted_engine(&["f2f3", "g2g4"]), Side::White).unwrap();
    let mut black = UciEngine::spawn(&scripted_engine(&["e7e5", "d8h4"]), Side::Black).unwrap();
    white.initialize(&BTreeMap::new()).await.unwrap();
    black.initialize(&BTreeMap::new()).await.unwrap();
    assert_eq!(black.side(), Side::Black);

    let cancel = CancellationToken::new();
    let report = MatchRunner::new(&mut white, &mut black, MatchSettings::new(Duration::from_millis(20)))
        .run(&cancel, ChessRules::new())
        .await;
    white.terminate().await;
    black.terminate().await;

    let (game, result) = report.into_result();
    result.unwrap();
    assert_eq!(game.rules().san_moves(), &["f3", "e5", "g4", "Qh4#"]);
}

#[tokio::test]
async fn test_illegal_engine_move_ends_match() {
    let mut white = UciEngine::spawn(&scripted_engine(&["e2e5"]), Side::White).unwrap();
    let mut black = UciEngine::spawn(&scripted_engine(&["e7e5"]), Side::Black).unwrap();
    white.initialize(&BTreeMap::new()).await.unwrap();
    black.initialize(&BTreeMap::new()).await.unwrap();

    let cancel = CancellationToken::new();
    let report = MatchRunner::new(&mut white, &mut black, MatchSettings::new(Duration::from_millis(20)))
        .run(&cancel, ChessRules::new())
        .await;
    white.terminate().await;
    black.terminate().await;

    assert!(matches!(report.error(), Some(MatchError::IllegalMove { mv, .. }) if mv == "e2e5"));
    assert_eq!(report.game.rules().fen(), ChessRules::new().fen());
}
