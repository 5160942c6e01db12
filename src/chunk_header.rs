use bytes::{Buf, BufMut, BytesMut};

use crate::error::TransportError;

/// The three-ASCII-byte tag at the start of every chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    /// `HEL` - sent once by the active connector to open the handshake
    Hello,
    /// `ACK` - the listener's answer to a Hello
    Acknowledge,
    /// `ERR` - handshake failure response, or the final message before an abort
    Error,
    /// `RHE` - sent by a server that dialed out in reverse-connect mode
    ReverseHello,
    /// `MSG` - application payload, opaque to this layer
    Message,
    /// `OPN` - secure channel open, opaque to this layer
    OpenSecureChannel,
    /// `CLO` - secure channel close, opaque to this layer
    CloseSecureChannel,
}

impl MessageType {
    pub fn as_bytes(&self) -> [u8; 3] {
        match self {
            MessageType::Hello => *b"HEL",
            MessageType::Acknowledge => *b"ACK",
            MessageType::Error => *b"ERR",
            MessageType::ReverseHello => *b"RHE",
            MessageType::Message => *b"MSG",
            MessageType::OpenSecureChannel => *b"OPN",
            MessageType::CloseSecureChannel => *b"CLO",
        }
    }

    pub fn from_bytes(raw: [u8; 3]) -> Result<MessageType, TransportError> {
        match &raw {
            b"HEL" => Ok(MessageType::Hello),
            b"ACK" => Ok(MessageType::Acknowledge),
            b"ERR" => Ok(MessageType::Error),
            b"RHE" => Ok(MessageType::ReverseHello),
            b"MSG" => Ok(MessageType::Message),
            b"OPN" => Ok(MessageType::OpenSecureChannel),
            b"CLO" => Ok(MessageType::CloseSecureChannel),
            _ => Err(TransportError::MalformedHeader(format!(
                "unknown message type tag {:?}",
                String::from_utf8_lossy(&raw)
            ))),
        }
    }
}

/// The single ASCII byte after the message type: whether this chunk completes a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkFinality {
    /// `F` - this chunk completes its message
    Final,
    /// `C` - the message continues in a following chunk
    Continuation,
    /// `A` - the sender abandons the message mid-flight
    Abort,
}

impl ChunkFinality {
    pub fn as_byte(&self) -> u8 {
        match self {
            ChunkFinality::Final => b'F',
            ChunkFinality::Continuation => b'C',
            ChunkFinality::Abort => b'A',
        }
    }

    pub fn from_byte(raw: u8) -> Result<ChunkFinality, TransportError> {
        match raw {
            b'F' => Ok(ChunkFinality::Final),
            b'C' => Ok(ChunkFinality::Continuation),
            b'A' => Ok(ChunkFinality::Abort),
            _ => Err(TransportError::MalformedHeader(format!(
                "finality byte must be one of 'F', 'C', 'A', was {:?}",
                raw as char
            ))),
        }
    }
}

/// The fixed eight-byte header prefixed to every chunk on the wire.
///
/// `chunk_len` is the total chunk size *including* this header, encoded little-endian
///  like all numeric fields of the protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkHeader {
    pub message_type: MessageType,
    pub finality: ChunkFinality,
    pub chunk_len: u32,
}

impl ChunkHeader {
    pub const SERIALIZED_LEN: usize = 8;

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.message_type.as_bytes());
        buf.put_u8(self.finality.as_byte());
        buf.put_u32_le(self.chunk_len);
    }

    pub fn deser(buf: &mut impl Buf) -> Result<ChunkHeader, TransportError> {
        if buf.remaining() < Self::SERIALIZED_LEN {
            return Err(TransportError::MalformedHeader(format!(
                "chunk header needs {} bytes, got {}",
                Self::SERIALIZED_LEN,
                buf.remaining()
            )));
        }

        let mut tag = [0u8; 3];
        buf.copy_to_slice(&mut tag);
        let message_type = MessageType::from_bytes(tag)?;
        let finality = ChunkFinality::from_byte(
            buf.try_get_u8()
                .map_err(|_| TransportError::MalformedHeader("truncated header".to_string()))?,
        )?;
        let chunk_len = buf
            .try_get_u32_le()
            .map_err(|_| TransportError::MalformedHeader("truncated header".to_string()))?;

        Ok(ChunkHeader {
            message_type,
            finality,
            chunk_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::hello_final(MessageType::Hello, ChunkFinality::Final, 8, vec![b'H',b'E',b'L',b'F', 8,0,0,0])]
    #[case::msg_continuation(MessageType::Message, ChunkFinality::Continuation, 0x12345678, vec![b'M',b'S',b'G',b'C', 0x78,0x56,0x34,0x12])]
    #[case::err_abort(MessageType::Error, ChunkFinality::Abort, 20, vec![b'E',b'R',b'R',b'A', 20,0,0,0])]
    #[case::reverse_hello(MessageType::ReverseHello, ChunkFinality::Final, 77, vec![b'R',b'H',b'E',b'F', 77,0,0,0])]
    fn test_ser_deser(
        #[case] message_type: MessageType,
        #[case] finality: ChunkFinality,
        #[case] chunk_len: u32,
        #[case] expected: Vec<u8>,
    ) {
        let original = ChunkHeader {
            message_type,
            finality,
            chunk_len,
        };

        let mut buf = BytesMut::new();
        original.ser(&mut buf);
        assert_eq!(buf.as_ref(), expected.as_slice());

        let mut b: &[u8] = &buf;
        let deser = ChunkHeader::deser(&mut b).unwrap();
        assert!(b.is_empty());
        assert_eq!(deser, original);
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::seven_bytes(vec![b'M',b'S',b'G',b'F', 8,0,0])]
    fn test_deser_too_short(#[case] raw: Vec<u8>) {
        let mut b: &[u8] = &raw;
        assert!(matches!(
            ChunkHeader::deser(&mut b),
            Err(TransportError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_deser_unknown_message_type() {
        let mut b: &[u8] = &[b'X', b'Y', b'Z', b'F', 8, 0, 0, 0];
        assert!(matches!(
            ChunkHeader::deser(&mut b),
            Err(TransportError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_deser_invalid_finality() {
        let mut b: &[u8] = &[b'M', b'S', b'G', b'Q', 8, 0, 0, 0];
        assert!(matches!(
            ChunkHeader::deser(&mut b),
            Err(TransportError::MalformedHeader(_))
        ));
    }
}
