/// Terminal viewer: follows a live broadcast and replays it on a local board
use futures_util::StreamExt;
use shakmaty::fen::Fen;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, File, Position, Rank, Square};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::broadcast::message::BroadcastMessage;
use crate::core::rules::fen;
use crate::error::ViewerError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerEvent {
    Update(BroadcastMessage),
    /// The server closed the connection, with its close code if it sent one.
    Closed { code: Option<u16>, reason: String },
}

/// A subscription to the `/subscribe` endpoint of a broadcast server
pub struct ViewerClient {
    stream: WsStream,
}

impl ViewerClient {
    /// Connects to `addr` (`host:port`).
    pub async fn connect(addr: &str) -> Result<Self, ViewerError> {
        let url = format!("ws://{addr}/subscribe");
        let (stream, _) = connect_async(url.as_str()).await?;
        debug!(%url, "viewer connected");
        Ok(Self { stream })
    }

    /// Next message from the server. `None` once the stream has ended.
    pub async fn next_event(&mut self) -> Result<Option<ViewerEvent>, ViewerError> {
        while let Some(frame) = self.stream.next().await {
            match frame? {
                Message::Text(text) => {
                    let msg: BroadcastMessage = serde_json::from_str(text.as_str())?;
                    return Ok(Some(ViewerEvent::Update(msg)));
                }
                Message::Close(frame) => {
                    let event = match frame {
                        Some(frame) => ViewerEvent::Closed {
                            code: Some(u16::from(frame.code)),
                            reason: frame.reason.as_str().to_string(),
                        },
                        None => ViewerEvent::Closed {
                            code: None,
                            reason: String::new(),
                        },
                    };
                    return Ok(Some(event));
                }
                _ => {}
            }
        }
        Ok(None)
    }
}

/// Local copy of the broadcast position
#[derive(Debug, Clone, Default)]
pub struct Replay {
    position: Chess,
}

impl Replay {
    pub fn position(&self) -> &Chess {
        &self.position
    }

    /// Applies one broadcast message. A message carrying a position replaces
    /// the board outright.
    pub fn apply(&mut self, msg: &BroadcastMessage) -> Result<(), ViewerError> {
        if let Some(fen) = &msg.position {
            self.position = parse_position(fen)?;
            return Ok(());
        }
        let Some(mv) = &msg.mv else {
            return Err(ViewerError::Desync("empty message".to_string()));
        };

        let uci: UciMove = mv
            .replace('-', "")
            .parse()
            .map_err(|_| ViewerError::Desync(format!("unreadable move `{mv}`")))?;
        let mv = uci
            .to_move(&self.position)
            .map_err(|_| ViewerError::Desync(format!("move `{mv}` does not fit the board")))?;
        self.position.play_unchecked(&mv);
        Ok(())
    }
}

fn parse_position(text: &str) -> Result<Chess, ViewerError> {
    let parsed: Fen = text
        .parse()
        .map_err(|e| ViewerError::Desync(format!("bad position `{text}`: {e}")))?;
    parsed
        .into_position(CastlingMode::Standard)
        .map_err(|e| ViewerError::Desync(format!("bad position `{text}`: {e}")))
}

/// Text diagram of `position`, white at the bottom.
pub fn render(position: &Chess) -> String {
    let board = position.board();
    let mut out = String::new();
    for rank in Rank::ALL.into_iter().rev() {
        out.push(rank.char());
        out.push(' ');
        for file in File::ALL {
            let square = Square::from_coords(file, rank);
            out.push(board.piece_at(square).map_or('.', |piece| piece.char()));
            out.push(' ');
        }
        out.pop();
        out.push('\n');
    }
    out.push_str("  a b c d e f g h\n");
    out
}

/// Prints every update of the broadcast at `addr` until it closes or
/// `cancel` fires.
pub async fn watch(addr: &str, cancel: &CancellationToken) -> Result<(), ViewerError> {
    let mut client = ViewerClient::connect(addr).await?;
    let mut replay = Replay::default();
    info!(%addr, "watching live match");

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            event = client.next_event() => event?,
        };

        match event {
            Some(ViewerEvent::Update(msg)) => {
                replay.apply(&msg)?;
                match &msg.mv {
                    Some(mv) => println!("move {mv}"),
                    None => println!("position {}", fen(replay.position())),
                }
                println!("{}", render(replay.position()));
            }
            Some(ViewerEvent::Closed { code, reason }) => {
                info!(?code, %reason, "broadcast closed");
                return Ok(());
            }
            None => return Ok(()),
        }
    }
}
