use bytes::{Buf, BufMut, BytesMut};

use crate::error::TransportError;
use crate::safe_converter::PrecheckedCast;
use crate::status_code::StatusCode;

/// Upper bound for the URI / URL fields of Hello and Reverse-Hello messages. A peer
///  sending a longer value is violating the protocol and gets rejected with
///  `BadTcpEndpointUrlInvalid`.
pub const MAX_ENDPOINT_URL_LEN: usize = 4096;

/// Decode-time guard against absurd string lengths. Deliberately above
///  [`MAX_ENDPOINT_URL_LEN`]: an oversized endpoint URL must *decode* successfully so
///  that validation can reject it with the proper status code.
const MAX_DECODED_STRING_LEN: usize = 65536;

fn put_ua_string(buf: &mut BytesMut, value: &str) {
    buf.put_i32_le(value.len().prechecked_cast());
    buf.put_slice(value.as_bytes());
}

fn try_get_ua_string(buf: &mut impl Buf) -> Result<String, TransportError> {
    let len = buf
        .try_get_i32_le()
        .map_err(|_| TransportError::MalformedMessage("truncated string length".to_string()))?;
    if len < 0 {
        // a null string on the wire; the transport treats it like an empty one
        return Ok(String::new());
    }
    let len = len as usize;
    if len > MAX_DECODED_STRING_LEN {
        return Err(TransportError::MalformedMessage(format!(
            "string of {} bytes exceeds the decode limit of {}",
            len, MAX_DECODED_STRING_LEN
        )));
    }
    if buf.remaining() < len {
        return Err(TransportError::MalformedMessage(format!(
            "string declares {} bytes but only {} are available",
            len,
            buf.remaining()
        )));
    }
    let mut raw = vec![0u8; len];
    buf.copy_to_slice(&mut raw);
    String::from_utf8(raw)
        .map_err(|_| TransportError::MalformedMessage("string is not valid UTF-8".to_string()))
}

fn try_get_u32_field(buf: &mut impl Buf, field: &'static str) -> Result<u32, TransportError> {
    buf.try_get_u32_le()
        .map_err(|_| TransportError::MalformedMessage(format!("truncated field '{}'", field)))
}

/// Common shape of the four fixed-layout handshake messages, so they can be packed
///  into chunks generically.
pub trait HandshakeMessage {
    fn ser(&self, buf: &mut BytesMut);
}

/// Sent once by the active connector to negotiate buffer sizes and protocol version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HelloMessage {
    pub protocol_version: u32,
    pub receive_buffer_size: u32,
    pub send_buffer_size: u32,
    /// 0 = unlimited
    pub max_message_size: u32,
    /// 0 = unlimited
    pub max_chunk_count: u32,
    pub endpoint_url: String,
}

impl HandshakeMessage for HelloMessage {
    fn ser(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.protocol_version);
        buf.put_u32_le(self.receive_buffer_size);
        buf.put_u32_le(self.send_buffer_size);
        buf.put_u32_le(self.max_message_size);
        buf.put_u32_le(self.max_chunk_count);
        put_ua_string(buf, &self.endpoint_url);
    }
}

impl HelloMessage {
    pub fn deser(buf: &mut impl Buf) -> Result<HelloMessage, TransportError> {
        Ok(HelloMessage {
            protocol_version: try_get_u32_field(buf, "protocolVersion")?,
            receive_buffer_size: try_get_u32_field(buf, "receiveBufferSize")?,
            send_buffer_size: try_get_u32_field(buf, "sendBufferSize")?,
            max_message_size: try_get_u32_field(buf, "maxMessageSize")?,
            max_chunk_count: try_get_u32_field(buf, "maxChunkCount")?,
            endpoint_url: try_get_ua_string(buf)?,
        })
    }
}

/// The listener's answer to a Hello. The values become the negotiated parameters for
///  the life of the connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcknowledgeMessage {
    pub protocol_version: u32,
    pub receive_buffer_size: u32,
    pub send_buffer_size: u32,
    pub max_message_size: u32,
    pub max_chunk_count: u32,
}

impl HandshakeMessage for AcknowledgeMessage {
    fn ser(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.protocol_version);
        buf.put_u32_le(self.receive_buffer_size);
        buf.put_u32_le(self.send_buffer_size);
        buf.put_u32_le(self.max_message_size);
        buf.put_u32_le(self.max_chunk_count);
    }
}

impl AcknowledgeMessage {
    pub fn deser(buf: &mut impl Buf) -> Result<AcknowledgeMessage, TransportError> {
        Ok(AcknowledgeMessage {
            protocol_version: try_get_u32_field(buf, "protocolVersion")?,
            receive_buffer_size: try_get_u32_field(buf, "receiveBufferSize")?,
            send_buffer_size: try_get_u32_field(buf, "sendBufferSize")?,
            max_message_size: try_get_u32_field(buf, "maxMessageSize")?,
            max_chunk_count: try_get_u32_field(buf, "maxChunkCount")?,
        })
    }
}

/// Sent by a server that dialed out to a client in reverse-connect mode, at most once
///  per connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReverseHelloMessage {
    /// the ApplicationUri of the server which sent the message
    pub server_uri: String,
    /// the URL of the endpoint which the client uses to establish the secure channel
    pub endpoint_url: String,
}

impl HandshakeMessage for ReverseHelloMessage {
    fn ser(&self, buf: &mut BytesMut) {
        put_ua_string(buf, &self.server_uri);
        put_ua_string(buf, &self.endpoint_url);
    }
}

impl ReverseHelloMessage {
    pub fn deser(buf: &mut impl Buf) -> Result<ReverseHelloMessage, TransportError> {
        Ok(ReverseHelloMessage {
            server_uri: try_get_ua_string(buf)?,
            endpoint_url: try_get_ua_string(buf)?,
        })
    }
}

/// Handshake failure response, and the final message sent before an abort-initiated
///  disconnect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorMessage {
    pub status_code: StatusCode,
    pub reason: String,
}

impl HandshakeMessage for ErrorMessage {
    fn ser(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.status_code.into());
        put_ua_string(buf, &self.reason);
    }
}

impl ErrorMessage {
    pub fn deser(buf: &mut impl Buf) -> Result<ErrorMessage, TransportError> {
        let raw_status = try_get_u32_field(buf, "statusCode")?;
        Ok(ErrorMessage {
            status_code: StatusCode::from_wire(raw_status),
            reason: try_get_ua_string(buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_hello_ser_exact_bytes() {
        let hello = HelloMessage {
            protocol_version: 0,
            receive_buffer_size: 0x0001_0000,
            send_buffer_size: 0x0000_8000,
            max_message_size: 0,
            max_chunk_count: 0,
            endpoint_url: "opc.tcp://h:1/".to_string(),
        };

        let mut buf = BytesMut::new();
        hello.ser(&mut buf);

        #[rustfmt::skip]
        let expected: Vec<u8> = vec![
            0, 0, 0, 0,             // protocolVersion
            0, 0, 1, 0,             // receiveBufferSize = 0x10000
            0, 0x80, 0, 0,          // sendBufferSize = 0x8000
            0, 0, 0, 0,             // maxMessageSize
            0, 0, 0, 0,             // maxChunkCount
            14, 0, 0, 0,            // url length
            b'o',b'p',b'c',b'.',b't',b'c',b'p',b':',b'/',b'/',b'h',b':',b'1',b'/',
        ];
        assert_eq!(buf.as_ref(), expected.as_slice());

        let mut b: &[u8] = &buf;
        let deser = HelloMessage::deser(&mut b).unwrap();
        assert!(b.is_empty());
        assert_eq!(deser, hello);
    }

    #[test]
    fn test_acknowledge_round_trip() {
        let ack = AcknowledgeMessage {
            protocol_version: 0,
            receive_buffer_size: 655360,
            send_buffer_size: 655360,
            max_message_size: 16 * 1024 * 1024,
            max_chunk_count: 4096,
        };
        let mut buf = BytesMut::new();
        ack.ser(&mut buf);
        assert_eq!(buf.len(), 20);

        let mut b: &[u8] = &buf;
        assert_eq!(AcknowledgeMessage::deser(&mut b).unwrap(), ack);
    }

    #[test]
    fn test_error_ser_exact_bytes() {
        let msg = ErrorMessage {
            status_code: StatusCode::BadProtocolVersionUnsupported,
            reason: "no".to_string(),
        };
        let mut buf = BytesMut::new();
        msg.ser(&mut buf);

        #[rustfmt::skip]
        let expected: Vec<u8> = vec![
            0, 0, 0xBE, 0x80,       // BadProtocolVersionUnsupported = 0x80BE0000 LE
            2, 0, 0, 0,
            b'n', b'o',
        ];
        assert_eq!(buf.as_ref(), expected.as_slice());
    }

    #[test]
    fn test_reverse_hello_round_trip() {
        let rhe = ReverseHelloMessage {
            server_uri: "urn:example:server".to_string(),
            endpoint_url: "opc.tcp://client.example:4840/reverse".to_string(),
        };
        let mut buf = BytesMut::new();
        rhe.ser(&mut buf);
        let mut b: &[u8] = &buf;
        assert_eq!(ReverseHelloMessage::deser(&mut b).unwrap(), rhe);
    }

    #[test]
    fn test_null_string_decodes_as_empty() {
        let mut buf = BytesMut::new();
        buf.put_i32_le(-1); // serverUri: null
        buf.put_i32_le(-1); // endpointUrl: null
        let mut b: &[u8] = &buf;
        let rhe = ReverseHelloMessage::deser(&mut b).unwrap();
        assert_eq!(rhe.server_uri, "");
        assert_eq!(rhe.endpoint_url, "");
    }

    #[rstest]
    #[case::truncated_fixed(vec![0, 0, 0])]
    #[case::truncated_string(vec![0,0,0,0, 0,0,0,0, 0,0,0,0, 0,0,0,0, 0,0,0,0, 9,0,0,0, b'x'])]
    fn test_hello_deser_truncated(#[case] raw: Vec<u8>) {
        let mut b: &[u8] = &raw;
        assert!(matches!(
            HelloMessage::deser(&mut b),
            Err(TransportError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_oversized_url_still_decodes() {
        // validation, not decoding, is responsible for the 4096 byte limit
        let rhe = ReverseHelloMessage {
            server_uri: "u".repeat(5000),
            endpoint_url: "opc.tcp://h:1/".to_string(),
        };
        let mut buf = BytesMut::new();
        rhe.ser(&mut buf);
        let mut b: &[u8] = &buf;
        assert_eq!(ReverseHelloMessage::deser(&mut b).unwrap().server_uri.len(), 5000);
    }
}
