use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::chunk_header::ChunkHeader;
use crate::error::TransportError;
use crate::safe_converter::SafeCast;

/// Reconstructs complete, length-correct chunks from the arbitrarily fragmented byte
///  deliveries of the underlying socket.
///
/// The socket may split or coalesce chunks at any byte offset, including mid-header.
///  Fragments are accumulated until the header-declared length is available, then exactly
///  that many bytes are split off as one chunk. Chunks come out in strict arrival order.
pub struct PacketAssembler {
    buffer: BytesMut,
    /// upper bound on a single chunk's declared length; 0 = unlimited
    max_chunk_size: u32,
}

impl PacketAssembler {
    pub fn new(max_chunk_size: u32) -> PacketAssembler {
        PacketAssembler {
            buffer: BytesMut::new(),
            max_chunk_size,
        }
    }

    /// Append a fragment and return every chunk that is now complete (possibly none,
    ///  possibly several).
    ///
    /// An error means the byte stream is unrecoverably out of sync - there is no way to
    ///  find the start of the next chunk - so the connection must be torn down.
    pub fn feed(&mut self, fragment: &[u8]) -> Result<Vec<Bytes>, TransportError> {
        self.buffer.extend_from_slice(fragment);

        let mut complete = Vec::new();
        while self.buffer.len() >= ChunkHeader::SERIALIZED_LEN {
            let header = ChunkHeader::deser(&mut &self.buffer[..])?;

            if (header.chunk_len as usize) < ChunkHeader::SERIALIZED_LEN {
                return Err(TransportError::MalformedHeader(format!(
                    "chunk declares a length of {} which is smaller than the header size {}",
                    header.chunk_len,
                    ChunkHeader::SERIALIZED_LEN
                )));
            }
            if self.max_chunk_size != 0 && header.chunk_len > self.max_chunk_size {
                return Err(TransportError::ChunkTooLarge {
                    size: header.chunk_len,
                    max: self.max_chunk_size,
                });
            }

            let chunk_len: usize = header.chunk_len.safe_cast();
            if self.buffer.len() < chunk_len {
                // wait for more data
                break;
            }

            trace!("assembled {:?} chunk of {} bytes", header.message_type, chunk_len);
            complete.push(self.buffer.split_to(chunk_len).freeze());
        }
        Ok(complete)
    }

    /// Bytes buffered but not yet forming a complete chunk.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;
    use rstest::rstest;

    use crate::chunk_header::{ChunkFinality, MessageType};

    fn test_chunk(message_type: MessageType, payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        ChunkHeader {
            message_type,
            finality: ChunkFinality::Final,
            chunk_len: (payload.len() + ChunkHeader::SERIALIZED_LEN) as u32,
        }
        .ser(&mut buf);
        buf.put_slice(payload);
        buf.to_vec()
    }

    #[test]
    fn test_single_fragment_single_chunk() {
        let chunk = test_chunk(MessageType::Message, b"hello world");

        let mut assembler = PacketAssembler::new(0);
        let out = assembler.feed(&chunk).unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref(), chunk.as_slice());
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn test_every_split_offset() {
        // a fragment boundary anywhere - mid-header included - must not matter
        let chunk = test_chunk(MessageType::Message, b"0123456789abcdef");

        for split in 1..chunk.len() {
            let mut assembler = PacketAssembler::new(0);
            let first = assembler.feed(&chunk[..split]).unwrap();
            assert!(first.is_empty(), "premature chunk at split offset {}", split);
            let second = assembler.feed(&chunk[split..]).unwrap();
            assert_eq!(second.len(), 1, "missing chunk at split offset {}", split);
            assert_eq!(second[0].as_ref(), chunk.as_slice());
        }
    }

    #[test]
    fn test_two_chunks_in_one_fragment() {
        let chunk_a = test_chunk(MessageType::Message, b"first");
        let chunk_b = test_chunk(MessageType::Error, b"second, longer payload");

        let mut fragment = chunk_a.clone();
        fragment.extend_from_slice(&chunk_b);

        let mut assembler = PacketAssembler::new(0);
        let out = assembler.feed(&fragment).unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref(), chunk_a.as_slice());
        assert_eq!(out[1].as_ref(), chunk_b.as_slice());
    }

    #[test]
    fn test_second_chunk_completed_later() {
        let chunk_a = test_chunk(MessageType::Message, b"first");
        let chunk_b = test_chunk(MessageType::Message, b"second");

        let mut fragment = chunk_a.clone();
        fragment.extend_from_slice(&chunk_b[..3]);

        let mut assembler = PacketAssembler::new(0);
        let out = assembler.feed(&fragment).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref(), chunk_a.as_slice());
        assert_eq!(assembler.pending_len(), 3);

        let out = assembler.feed(&chunk_b[3..]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref(), chunk_b.as_slice());
    }

    #[test]
    fn test_empty_fragment_is_harmless() {
        let mut assembler = PacketAssembler::new(0);
        assert!(assembler.feed(&[]).unwrap().is_empty());
    }

    #[rstest]
    #[case::zero(0u32)]
    #[case::below_header_size(7u32)]
    fn test_declared_length_below_header_size(#[case] declared: u32) {
        let mut raw = BytesMut::new();
        raw.put_slice(b"MSGF");
        raw.put_u32_le(declared);

        let mut assembler = PacketAssembler::new(0);
        assert!(matches!(
            assembler.feed(&raw),
            Err(TransportError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_chunk_exceeding_max_size() {
        let mut raw = BytesMut::new();
        raw.put_slice(b"MSGF");
        raw.put_u32_le(1024);

        let mut assembler = PacketAssembler::new(100);
        assert!(matches!(
            assembler.feed(&raw),
            Err(TransportError::ChunkTooLarge { size: 1024, max: 100 })
        ));
    }

    #[test]
    fn test_garbage_header_detected() {
        let mut assembler = PacketAssembler::new(0);
        assert!(matches!(
            assembler.feed(b"XXXXXXXXXXX"),
            Err(TransportError::MalformedHeader(_))
        ));
    }
}
