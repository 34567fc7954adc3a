use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Encoder, Decoder};
use crate::PeerId;
use super::PeerError;

pub const HEADER: [u8; 18] = *b"P2PFILESHARINGPROJ";
pub const HANDSHAKE_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub peer_id: PeerId,
}

impl Handshake {

    pub fn new(peer_id: PeerId) -> Self {
        Self { peer_id }
    }

    // header | 10 zero bytes | peer id
    pub fn to_bytes(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0; HANDSHAKE_LEN];
        buf[..HEADER.len()].copy_from_slice(&HEADER);
        buf[HANDSHAKE_LEN - 4..].copy_from_slice(&self.peer_id.to_be_bytes());
        buf
    }

    // The zero bits are not checked.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, PeerError> {
        if buf.len() != HANDSHAKE_LEN || buf[..HEADER.len()] != HEADER {
            return Err(PeerError::MalformedHandshake);
        }
        let mut id = [0; 4];
        id.copy_from_slice(&buf[HANDSHAKE_LEN - 4..]);
        Ok(Self { peer_id: PeerId::from_be_bytes(id) })
    }

}

pub struct HandshakeCodec;

impl Encoder<Handshake> for HandshakeCodec {

    type Error = PeerError;

    fn encode(&mut self, item: Handshake, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(HANDSHAKE_LEN);
        dst.put_slice(&item.to_bytes());
        Ok(())
    }
}

impl Decoder for HandshakeCodec {

    type Item = Handshake;
    type Error = PeerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HANDSHAKE_LEN {
            // Handshake not fully recieved.
            src.reserve(HANDSHAKE_LEN - src.len());
            return Ok(None);
        }
        // Anything after the handshake belongs to the message stream.
        let frame = src.split_to(HANDSHAKE_LEN);
        Handshake::from_bytes(&frame).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_handshake(id: u32) -> BytesMut {
        let mut src = BytesMut::new();
        src.extend_from_slice(b"P2PFILESHARINGPROJ");
        src.extend_from_slice(&[0; 10]);
        src.put_u32(id);
        src
    }

    #[test]
    fn test_handshake_bytes() {
        let bytes = Handshake::new(1002).to_bytes();
        assert_eq!(&bytes[..18], b"P2PFILESHARINGPROJ");
        assert_eq!(&bytes[18..28], &[0; 10]);
        assert_eq!(&bytes[28..], &[0, 0, 0x03, 0xea]);
        assert_eq!(Handshake::from_bytes(&bytes).unwrap().peer_id, 1002);
    }

    #[test]
    fn test_handshake_decoding() {
        let mut src = raw_handshake(1001);
        let handshake = HandshakeCodec.decode(&mut src).unwrap().unwrap();
        assert_eq!(handshake, Handshake::new(1001));
        assert!(src.is_empty());
    }

    #[test]
    fn test_handshake_encoding() {
        let mut dst = BytesMut::new();
        HandshakeCodec.encode(Handshake::new(7), &mut dst).unwrap();
        assert_eq!(dst, raw_handshake(7));
    }

    #[test]
    fn test_handshake_decoding_with_incomplete_data() {
        let mut src = raw_handshake(1001);
        let _ = src.split_off(20);
        assert!(HandshakeCodec.decode(&mut src).unwrap().is_none());
    }

    #[test]
    fn test_handshake_decoding_with_invalid_header() {
        let mut src = raw_handshake(1001);
        src[0] = b'X';
        assert!(matches!(
            HandshakeCodec.decode(&mut src),
            Err(PeerError::MalformedHandshake)
        ));
    }

    #[test]
    fn test_handshake_from_bytes_wrong_length() {
        let src = raw_handshake(1001);
        assert!(matches!(
            Handshake::from_bytes(&src[..31]),
            Err(PeerError::MalformedHandshake)
        ));
    }

    #[test]
    fn test_handshake_decoding_with_extra_data() {
        let mut src = raw_handshake(1001);
        src.extend_from_slice(&[0, 0, 0, 1, 2]);
        let handshake = HandshakeCodec.decode(&mut src).unwrap();
        assert!(handshake.is_some());
        // Trailing message left for the next codec.
        assert_eq!(&src[..], &[0, 0, 0, 1, 2]);
    }
}
