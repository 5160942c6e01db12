use std::fmt::{Display, Formatter};

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The subset of OPC UA status codes that the transport layer itself produces or
///  interprets. Codes travel on the wire as their standard u32 values (inside `ERR`
///  chunks); everything above the transport uses richer status code sets, but those
///  pass through this layer as opaque payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum StatusCode {
    Good = 0x0000_0000,
    BadUnexpectedError = 0x8001_0000,
    BadCommunicationError = 0x8005_0000,
    BadTimeout = 0x800A_0000,
    BadTcpMessageTypeInvalid = 0x807E_0000,
    BadTcpMessageTooLarge = 0x8080_0000,
    BadTcpInternalError = 0x8082_0000,
    BadTcpEndpointUrlInvalid = 0x8083_0000,
    BadConnectionRejected = 0x80AC_0000,
    BadConnectionClosed = 0x80AE_0000,
    BadProtocolVersionUnsupported = 0x80BE_0000,
}

impl StatusCode {
    /// The symbolic name, as it appears in user-facing error messages.
    pub fn name(&self) -> &'static str {
        match self {
            StatusCode::Good => "Good",
            StatusCode::BadUnexpectedError => "BadUnexpectedError",
            StatusCode::BadCommunicationError => "BadCommunicationError",
            StatusCode::BadTimeout => "BadTimeout",
            StatusCode::BadTcpMessageTypeInvalid => "BadTcpMessageTypeInvalid",
            StatusCode::BadTcpMessageTooLarge => "BadTcpMessageTooLarge",
            StatusCode::BadTcpInternalError => "BadTcpInternalError",
            StatusCode::BadTcpEndpointUrlInvalid => "BadTcpEndpointUrlInvalid",
            StatusCode::BadConnectionRejected => "BadConnectionRejected",
            StatusCode::BadConnectionClosed => "BadConnectionClosed",
            StatusCode::BadProtocolVersionUnsupported => "BadProtocolVersionUnsupported",
        }
    }

    /// Lenient conversion for decoding `ERR` chunks: peers may send status codes from
    ///  parts of the standard this layer does not know about.
    pub fn from_wire(raw: u32) -> StatusCode {
        StatusCode::try_from(raw).unwrap_or(StatusCode::BadUnexpectedError)
    }
}

impl Display for StatusCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
