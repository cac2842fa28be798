mod common;

use std::time::Duration;

use cete::broadcast::message::BroadcastMessage;
use cete::broadcast::{BroadcastServer, ServerState};
use cete::client::viewer::{Replay, ViewerClient, ViewerEvent};
use cete::config::BroadcastSettings;
use cete::core::rules::fen;
use common::{http_request, post_start};
use shakmaty::uci::UciMove;
use shakmaty::{Chess, Move, Position};

fn local_settings() -> BroadcastSettings {
    BroadcastSettings {
        addr: "127.0.0.1:0".parse().unwrap(),
        ..BroadcastSettings::default()
    }
}

fn play(position: &mut Chess, uci: &str) -> Move {
    let mv = uci.parse::<UciMove>().unwrap().to_move(position).unwrap();
    position.play_unchecked(&mv);
    mv
}

async fn next_update(client: &mut ViewerClient) -> BroadcastMessage {
    match client.next_event().await.unwrap() {
        Some(ViewerEvent::Update(msg)) => msg,
        other => panic!("expected an update, got {other:?}"),
    }
}

#[tokio::test]
async fn test_viewer_gets_snapshot_then_moves_in_order() {
    let (mut server, _errors) = BroadcastServer::start(&local_settings()).await.unwrap();
    let addr = server.local_addr().to_string();

    let mut position = Chess::default();
    let opening = play(&mut position, "e2e4");
    server.publish(&opening, &position).unwrap();

    let mut client = ViewerClient::connect(&addr).await.unwrap();
    let snapshot = next_update(&mut client).await;
    assert!(snapshot.is_snapshot());
    assert_eq!(snapshot.position.as_deref(), Some(fen(&position).as_str()));
    assert_eq!(server.subscriber_count(), 1);

    let mut replay = Replay::default();
    replay.apply(&snapshot).unwrap();

    for uci in ["e7e5", "g1f3", "b8c6", "f1c4", "g8f6", "e1g1"] {
        let mv = play(&mut position, uci);
        server.publish(&mv, &position).unwrap();
    }

    let mut received = Vec::new();
    for _ in 0..6 {
        let msg = next_update(&mut client).await;
        replay.apply(&msg).unwrap();
        received.push(msg);
    }

    let moves: Vec<&str> = received.iter().filter_map(|m| m.mv.as_deref()).collect();
    assert_eq!(moves, vec!["e7-e5", "g1-f3", "b8-c6", "f1-c4", "g8-f6", "e1-g1"]);
    assert_eq!(received[5].castling_move.as_deref(), Some("h1-f1"));
    assert_eq!(fen(replay.position()), fen(&position));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_sends_going_away() {
    let (mut server, _errors) = BroadcastServer::start(&local_settings()).await.unwrap();
    let mut client = ViewerClient::connect(&server.local_addr().to_string()).await.unwrap();
    next_update(&mut client).await;

    server.shutdown().await.unwrap();
    assert_eq!(server.state(), ServerState::Closed);

    match client.next_event().await.unwrap() {
        Some(ViewerEvent::Closed { code, .. }) => assert_eq!(code, Some(1001)),
        other => panic!("expected close, got {other:?}"),
    }
    // a second shutdown is a no-op
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_departed_viewer_is_forgotten() {
    let (mut server, _errors) = BroadcastServer::start(&local_settings()).await.unwrap();
    let mut client = ViewerClient::connect(&server.local_addr().to_string()).await.unwrap();
    next_update(&mut client).await;
    assert_eq!(server.subscriber_count(), 1);
    drop(client);

    let forgotten = async {
        while server.subscriber_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), forgotten).await.unwrap();

    // publishing to nobody is fine
    let mut position = Chess::default();
    let mv = play(&mut position, "d2d4");
    server.publish(&mv, &position).unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_viewer_that_stops_reading_is_cut_off() {
    let settings = BroadcastSettings {
        queue_capacity: 2,
        ..local_settings()
    };
    let (mut server, _errors) = BroadcastServer::start(&settings).await.unwrap();
    let mut client = ViewerClient::connect(&server.local_addr().to_string()).await.unwrap();
    next_update(&mut client).await;
    assert_eq!(server.subscriber_count(), 1);

    // the viewer reads nothing while a burst of moves goes out
    let mut position = Chess::default();
    for _ in 0..25 {
        for uci in ["g1f3", "g8f6", "f3g1", "f6g8"] {
            let mv = play(&mut position, uci);
            server.publish(&mv, &position).unwrap();
        }
    }

    let forgotten = async {
        while server.subscriber_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), forgotten).await.unwrap();

    let closed = async {
        loop {
            match client.next_event().await.unwrap() {
                Some(ViewerEvent::Update(_)) => continue,
                Some(ViewerEvent::Closed { code, .. }) => return code,
                None => panic!("stream ended without a close frame"),
            }
        }
    };
    let code = tokio::time::timeout(Duration::from_secs(5), closed).await.unwrap();
    assert_eq!(code, Some(1008));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_start_is_accepted_twice_and_opens_once() {
    let (mut server, _errors) = BroadcastServer::start(&local_settings()).await.unwrap();
    let addr = server.local_addr();

    let first = post_start(addr).await;
    assert!(first.starts_with("HTTP/1.1 202"), "{first}");
    let second = post_start(addr).await;
    assert!(second.starts_with("HTTP/1.1 202"), "{second}");

    // the gate is already open
    assert!(!server.open_start_gate());
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_static_assets() {
    let (mut server, _errors) = BroadcastServer::start(&local_settings()).await.unwrap();
    let addr = server.local_addr();

    let index = http_request(addr, "GET", "/").await;
    assert!(index.starts_with("HTTP/1.1 200"), "{index}");
    assert!(index.to_ascii_lowercase().contains("content-type: text/html"));

    let script = http_request(addr, "GET", "/viewer.js").await;
    assert!(script.starts_with("HTTP/1.1 200"), "{script}");
    assert!(script.contains("/subscribe"));

    let missing = http_request(addr, "GET", "/missing.png").await;
    assert!(missing.starts_with("HTTP/1.1 404"), "{missing}");

    let wrong_method = http_request(addr, "GET", "/start").await;
    assert!(wrong_method.starts_with("HTTP/1.1 405"), "{wrong_method}");

    server.shutdown().await.unwrap();
}
