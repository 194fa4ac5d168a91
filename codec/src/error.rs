use thiserror::Error;

/// The ways a packet can fail to encode or decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Packet too short, length fields inconsistent, or an unknown tag byte.
    #[error("invalid framing: {0}")]
    InvalidFraming(String),

    /// A string header carried a value type this transport does not support
    ///  (the source ecosystem's nil/bool/number/userdata/table tags), or a
    ///  long-string cookie other than 2 or 4.
    #[error("unsupported value type (type={type_tag}, cookie={cookie})")]
    UnsupportedValueType { type_tag: u8, cookie: u8 },

    /// A multipart body or tail arrived for a session with no open head.
    #[error("no multipart head for session {0}")]
    UnknownSession(u32),

    /// An all-zero address (id 0 and empty name), or a name that does not fit
    ///  the 1-byte length field.
    #[error("invalid request addr")]
    InvalidAddress,
}

/// A decode error paired with the session parsed before the failure, if any.
///
/// Receivers answer failed *calls* with a failure response carrying the error
///  text, which requires knowing the session even though decoding broke; when
///  the error struck before the session field (or the packet was a push) the
///  failure is dropped silently instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error}")]
pub struct DecodeFailure {
    pub session: Option<u32>,
    pub error: CodecError,
}

impl DecodeFailure {
    pub(crate) fn bare(error: CodecError) -> DecodeFailure {
        DecodeFailure { session: None, error }
    }

    pub(crate) fn for_session(session: u32, error: CodecError) -> DecodeFailure {
        DecodeFailure { session: Some(session), error }
    }

    /// The session a failure response should be routed to - `None` for pushes
    ///  and for errors that struck before the session was parsed.
    pub fn response_session(&self) -> Option<u32> {
        match self.session {
            Some(0) | None => None,
            Some(s) => Some(s),
        }
    }
}

impl From<CodecError> for DecodeFailure {
    fn from(error: CodecError) -> DecodeFailure {
        DecodeFailure::bare(error)
    }
}
