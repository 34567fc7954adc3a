use crate::Bitfield;

// Bytes needed to carry one bit per piece.
pub fn wire_len(num_pieces: usize) -> usize {
    (num_pieces + 7) / 8
}

// Wire form of a bitfield: most significant bit first, pad bits cleared.
pub fn to_wire(bitfield: &Bitfield) -> Vec<u8> {
    let mut bytes = vec![0; wire_len(bitfield.len())];
    for idx in bitfield.iter_ones() {
        bytes[idx / 8] |= 0x80 >> (idx % 8);
    }
    bytes
}

// Reads a received bitfield, keeping only the first `num_pieces` bits.
// Missing trailing bytes are treated as unset.
pub fn from_wire(bytes: &[u8], num_pieces: usize) -> Bitfield {
    let mut bitfield = Bitfield::from_slice(bytes);
    bitfield.resize(num_pieces, false);
    bitfield
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_len() {
        assert_eq!(wire_len(0), 0);
        assert_eq!(wire_len(1), 1);
        assert_eq!(wire_len(8), 1);
        assert_eq!(wire_len(9), 2);
        assert_eq!(wire_len(16), 2);
    }

    #[test]
    fn test_msb_first() {
        let mut bitfield = Bitfield::repeat(false, 10);
        bitfield.set(0, true);
        bitfield.set(9, true);
        assert_eq!(to_wire(&bitfield), vec![0b1000_0000, 0b0100_0000]);
    }

    #[test]
    fn test_round_trip_exact_multiple_of_8() {
        let mut bitfield = Bitfield::repeat(false, 16);
        for idx in [0, 3, 7, 8, 15] {
            bitfield.set(idx, true);
        }
        assert_eq!(from_wire(&to_wire(&bitfield), 16), bitfield);
    }

    #[test]
    fn test_round_trip_partial_byte() {
        let mut bitfield = Bitfield::repeat(true, 13);
        bitfield.set(4, false);
        let bytes = to_wire(&bitfield);
        assert_eq!(bytes.len(), 2);
        // Pad bits go out as zero.
        assert_eq!(bytes[1] & 0b0000_0111, 0);
        assert_eq!(from_wire(&bytes, 13), bitfield);
    }

    #[test]
    fn test_pad_bits_ignored() {
        let bitfield = from_wire(&[0xff, 0xff], 10);
        assert_eq!(bitfield.len(), 10);
        assert!(bitfield.all());
    }

    #[test]
    fn test_short_bitfield_padded() {
        let bitfield = from_wire(&[0xff], 12);
        assert_eq!(bitfield.len(), 12);
        assert_eq!(bitfield.count_ones(), 8);
        assert!(!bitfield[11]);
    }
}
