use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Encoder, Decoder};
use crate::{bitfield, store::StoreInfo, Bitfield};
use super::PeerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {

    // No further requests will be served.
    Choke,

    // Requests from the peer will be served.
    Unchoke,

    // The sender wants pieces the receiver has.
    Interested,

    // The sender wants nothing the receiver has.
    NotInterested,

    // The sender now has the referenced piece.
    Have { idx: u32 },

    // Every piece the sender has, sent once after the handshake.
    Bitfield(Bitfield),

    // Ask for a whole piece.
    Request { idx: u32 },

    // A whole piece, the final one may be short.
    Piece { idx: u32, data: Bytes },

}

impl Message {

    fn id(&self) -> u8 {
        match self {
            Message::Choke => 0,
            Message::Unchoke => 1,
            Message::Interested => 2,
            Message::NotInterested => 3,
            Message::Have { .. } => 4,
            Message::Bitfield(_) => 5,
            Message::Request { .. } => 6,
            Message::Piece { .. } => 7,
        }
    }

    // Builds a message from its type byte and payload (length prefix and type stripped).
    // Bitfields are cut or padded to `num_pieces` bits.
    fn from_parts(id: u8, mut payload: Bytes, num_pieces: usize) -> Result<Message, PeerError> {
        let len = payload.len();
        let msg = match id {
            0..=3 if len != 0 => return Err(PeerError::InvalidPayload { id, len }),
            0 => Message::Choke,
            1 => Message::Unchoke,
            2 => Message::Interested,
            3 => Message::NotInterested,
            4 | 6 if len != 4 => return Err(PeerError::InvalidPayload { id, len }),
            4 => Message::Have { idx: payload.get_u32() },
            5 => Message::Bitfield(bitfield::from_wire(&payload, num_pieces)),
            6 => Message::Request { idx: payload.get_u32() },
            7 if len < 4 => return Err(PeerError::InvalidPayload { id, len }),
            7 => {
                let idx = payload.get_u32();
                Message::Piece { idx, data: payload }
            },
            id => return Err(PeerError::UnknownMessageType(id)),
        };
        Ok(msg)
    }

}

pub struct MessageCodec {
    // Largest length prefix accepted before the frame is treated as hostile.
    max_frame_len: usize,
    num_pieces: usize,
}

impl MessageCodec {
    pub fn new(info: &StoreInfo) -> Self {
        Self {
            max_frame_len: info.max_frame_len(),
            num_pieces: info.num_pieces,
        }
    }

    // Total size of the frame at the head of `src`, length prefix included.
    fn frame_len(&self, src: &[u8]) -> Result<usize, PeerError> {
        if src.len() < 4 {
            return Err(PeerError::TruncatedMessage { needed: 4, available: src.len() });
        }
        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > self.max_frame_len {
            return Err(PeerError::FrameTooLarge(len));
        }
        if src.len() < 4 + len {
            return Err(PeerError::TruncatedMessage { needed: 4 + len, available: src.len() });
        }
        Ok(4 + len)
    }
}

impl Encoder<Message> for MessageCodec {

    type Error = PeerError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let id = msg.id();
        match msg {

            // <len=0001><id>
            Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => {
                dst.put_u32(1);
                dst.put_u8(id);
            },

            // <len=0005><id><piece index>
            Message::Have { idx } | Message::Request { idx } => {
                dst.put_u32(5);
                dst.put_u8(id);
                dst.put_u32(idx);
            },

            // <len=0001+X><id=5><bitfield>
            Message::Bitfield(bitfield) => {
                let raw = bitfield::to_wire(&bitfield);
                dst.reserve(5 + raw.len());
                dst.put_u32(1 + raw.len() as u32);
                dst.put_u8(id);
                dst.extend_from_slice(&raw);
            },

            // <len=0005+X><id=7><piece index><piece>
            Message::Piece { idx, data } => {
                dst.reserve(9 + data.len());
                dst.put_u32(5 + data.len() as u32);
                dst.put_u8(id);
                dst.put_u32(idx);
                dst.extend_from_slice(&data);
            },
        }

        Ok(())
    }
}

impl Decoder for MessageCodec {

    type Item = Message;
    type Error = PeerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Malformed frames are dropped so one bad message doesn't end the stream.
        loop {
            let frame_len = match self.frame_len(src) {
                Ok(len) => len,
                Err(PeerError::TruncatedMessage { needed, available }) => {
                    // Haven't recieved all of message.
                    src.reserve(needed - available);
                    return Ok(None);
                },
                Err(e) => return Err(e),
            };

            let mut frame = src.split_to(frame_len);
            frame.advance(4);
            if frame.is_empty() {
                tracing::warn!("dropping zero-length frame");
                continue;
            }
            let id = frame.get_u8();

            match Message::from_parts(id, frame.freeze(), self.num_pieces) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e @ PeerError::InvalidPayload { .. }) => {
                    tracing::warn!("dropping frame: {}", e);
                },
                Err(e) => {
                    tracing::warn!("{}", e);
                    return Err(e);
                },
            }
        }
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::Choke => write!(f, "choke"),
            Message::Unchoke => write!(f, "unchoke"),
            Message::Interested => write!(f, "interested"),
            Message::NotInterested => write!(f, "not interested"),
            Message::Have { idx } => write!(f, "have piece idx: {}", idx),
            Message::Bitfield(bf) => write!(f, "bitfield with {} pieces", bf.count_ones()),
            Message::Request { idx } => write!(f, "request for piece idx: {}", idx),
            Message::Piece { idx, data } => write!(f, "piece {{ idx: {}, length: {} }}", idx, data.len()),
        }
    }
}
