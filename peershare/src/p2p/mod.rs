use tokio::sync::mpsc;
use crate::PeerId;

mod session;
mod message;
mod handshake;
pub mod state;

pub use session::PeerSession;

pub type Result<T, E = PeerError> = std::result::Result<T, E>;
pub type PeerTx = mpsc::UnboundedSender<PeerCommand>;
pub type PeerRx = mpsc::UnboundedReceiver<PeerCommand>;

#[derive(thiserror::Error, Debug)]
pub enum PeerError {

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed handshake")]
    MalformedHandshake,

    #[error("handshake from unexpected peer {0}")]
    HandshakeMismatch(PeerId),

    #[error("no handshake recieved")]
    NoHandshake,

    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),

    #[error("truncated message: need {needed} bytes, have {available}")]
    TruncatedMessage { needed: usize, available: usize },

    #[error("frame of {0} bytes exceeds the largest legal message")]
    FrameTooLarge(usize),

    #[error("invalid payload of {len} bytes for message type {id}")]
    InvalidPayload { id: u8, len: usize },

    #[error("could not connect after {0} attempts")]
    ConnectionFailure(u32),

    #[error("channel error: {0}")]
    Channel(String),

}

impl<T> From<mpsc::error::SendError<T>> for PeerError {
    fn from(e: mpsc::error::SendError<T>) -> Self {
        PeerError::Channel(e.to_string())
    }
}

// Commands that can be sent to a peer session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCommand {

    // Stop serving requests from the peer.
    Choke,

    // Start serving requests from the peer.
    Unchoke,

    // We acquired a piece (piece idx), advertise it.
    Have(usize),

    // End the peer session safely.
    Shutdown,

}
