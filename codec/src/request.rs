use std::fmt::{self, Display};

use bytes::{Buf, BufMut};

use crate::error::{CodecError, DecodeFailure};
use crate::reassembly::ReassemblyTable;
use crate::strings::{ensure, pack_string, packed_len, unpack_string, unpack_strings};

/// Default per-chunk ceiling for multipart encoding. Both peers must agree on
///  the value; it also bounds single-frame payloads so that every emitted
///  frame fits the 2-byte length prefix.
pub const DEFAULT_PART_SIZE: usize = 32 * 1024;

const TAG_SINGLE_ID: u8 = 0x00;
const TAG_MULTI_HEAD_ID_CALL: u8 = 0x01;
pub(crate) const TAG_MULTI_BODY: u8 = 0x02;
pub(crate) const TAG_MULTI_TAIL: u8 = 0x03;
const TAG_TRACE: u8 = 0x04;
const TAG_MULTI_HEAD_ID_PUSH: u8 = 0x41;
const TAG_SINGLE_NAME: u8 = 0x80;
const TAG_MULTI_HEAD_NAME_CALL: u8 = 0x81;
const TAG_MULTI_HEAD_NAME_PUSH: u8 = 0xc1;

/// Destination of a request on the peer node: a numeric service id or a
///  textual service name. The all-zero forms (`Id(0)`, `Name("")`) are
///  rejected at encode time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServiceAddr {
    Id(u32),
    Name(String),
}

impl ServiceAddr {
    fn validate(&self) -> Result<(), CodecError> {
        match self {
            ServiceAddr::Id(0) => Err(CodecError::InvalidAddress),
            ServiceAddr::Id(_) => Ok(()),
            ServiceAddr::Name(name) if name.is_empty() || name.len() > 255 => {
                Err(CodecError::InvalidAddress)
            }
            ServiceAddr::Name(_) => Ok(()),
        }
    }
}

impl From<u32> for ServiceAddr {
    fn from(id: u32) -> ServiceAddr {
        ServiceAddr::Id(id)
    }
}

impl From<&str> for ServiceAddr {
    fn from(name: &str) -> ServiceAddr {
        ServiceAddr::Name(name.to_string())
    }
}

impl From<String> for ServiceAddr {
    fn from(name: String) -> ServiceAddr {
        ServiceAddr::Name(name)
    }
}

impl Display for ServiceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceAddr::Id(id) => write!(f, "#{}", id),
            ServiceAddr::Name(name) => f.write_str(name),
        }
    }
}

/// One request on the wire. A session of 0 is a push (fire-and-forget); any
///  other value correlates the eventual response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPacket {
    pub addr: ServiceAddr,
    pub session: u32,
    pub cmd: String,
    pub message: Vec<u8>,
}

impl RequestPacket {
    pub fn is_push(&self) -> bool {
        self.session == 0
    }
}

/// Per-connection reassembly state for inbound requests, keyed by session.
pub type RequestReassembly = ReassemblyTable<ServiceAddr>;

fn check_frame_len(body_len: usize) -> Result<(), CodecError> {
    if body_len > u16::MAX as usize {
        return Err(CodecError::InvalidFraming(format!(
            "packet body of {} bytes does not fit the length prefix",
            body_len
        )));
    }
    Ok(())
}

/// Emit the body/tail chunk frames of a multipart payload. All chunks carry
///  tag 0x02 except the last, which carries the tail tag 0x03 and completes
///  the peer's reassembly.
pub(crate) fn put_chunks(buf: &mut impl BufMut, session: u32, payload: &[u8], part_size: usize) {
    let chunk_count = payload.len().div_ceil(part_size);
    for (i, chunk) in payload.chunks(part_size).enumerate() {
        buf.put_u16((chunk.len() + 5) as u16);
        buf.put_u8(if i + 1 == chunk_count { TAG_MULTI_TAIL } else { TAG_MULTI_BODY });
        buf.put_u32_le(session);
        buf.put_slice(chunk);
    }
}

/// Encode a request as one or more length-prefixed frames.
///
/// The packed `cmd` + `message` payload decides the shape: below `part_size`
///  it travels in a single frame, otherwise as a head frame declaring the
///  total followed by chunk frames of at most `part_size` bytes each.
pub fn encode_request(
    buf: &mut impl BufMut,
    req: &RequestPacket,
    part_size: usize,
) -> Result<(), CodecError> {
    assert!(part_size > 0);
    req.addr.validate()?;

    let mut payload = Vec::with_capacity(packed_len(req.cmd.len()) + packed_len(req.message.len()));
    pack_string(&mut payload, req.cmd.as_bytes());
    pack_string(&mut payload, &req.message);
    let sz = payload.len();
    if sz > u32::MAX as usize {
        return Err(CodecError::InvalidFraming(format!(
            "packed payload of {} bytes exceeds the u32 total-size field",
            sz
        )));
    }

    if sz < part_size {
        match &req.addr {
            ServiceAddr::Id(id) => {
                check_frame_len(sz + 9)?;
                buf.put_u16((sz + 9) as u16);
                buf.put_u8(TAG_SINGLE_ID);
                buf.put_u32_le(*id);
                buf.put_u32_le(req.session);
            }
            ServiceAddr::Name(name) => {
                check_frame_len(sz + 6 + name.len())?;
                buf.put_u16((sz + 6 + name.len()) as u16);
                buf.put_u8(TAG_SINGLE_NAME);
                buf.put_u8(name.len() as u8);
                buf.put_slice(name.as_bytes());
                // the one big-endian field on the wire; see the crate docs
                buf.put_u32(req.session);
            }
        }
        buf.put_slice(&payload);
        return Ok(());
    }

    check_frame_len(part_size + 5)?;
    match &req.addr {
        ServiceAddr::Id(id) => {
            buf.put_u16(13);
            buf.put_u8(if req.is_push() { TAG_MULTI_HEAD_ID_PUSH } else { TAG_MULTI_HEAD_ID_CALL });
            buf.put_u32_le(*id);
        }
        ServiceAddr::Name(name) => {
            buf.put_u16((10 + name.len()) as u16);
            buf.put_u8(if req.is_push() { TAG_MULTI_HEAD_NAME_PUSH } else { TAG_MULTI_HEAD_NAME_CALL });
            buf.put_u8(name.len() as u8);
            buf.put_slice(name.as_bytes());
        }
    }
    buf.put_u32_le(req.session);
    buf.put_u32_le(sz as u32);

    put_chunks(buf, req.session, &payload, part_size);
    Ok(())
}

/// Decode one packet body (the bytes after the 2-byte length prefix).
///
/// Returns `Ok(Some(..))` when the packet completes a request - a single
///  frame or a multipart tail - and `Ok(None)` when it only advanced the
///  reassembly state.
pub fn decode_request(
    packet: &[u8],
    reassembly: &mut RequestReassembly,
) -> Result<Option<RequestPacket>, DecodeFailure> {
    let buf = &mut &packet[..];
    if buf.is_empty() {
        return Err(CodecError::InvalidFraming("empty request packet".to_string()).into());
    }

    match buf.get_u8() {
        TAG_SINGLE_ID => decode_single_id(buf),
        TAG_SINGLE_NAME => decode_single_name(buf),
        TAG_MULTI_HEAD_ID_CALL | TAG_MULTI_HEAD_ID_PUSH => decode_head_id(buf, reassembly),
        TAG_MULTI_HEAD_NAME_CALL | TAG_MULTI_HEAD_NAME_PUSH => decode_head_name(buf, reassembly),
        TAG_MULTI_BODY => {
            let session = chunk_session(buf)?;
            reassembly.append(session, *buf).map_err(DecodeFailure::bare)?;
            Ok(None)
        }
        TAG_MULTI_TAIL => decode_tail(buf, reassembly),
        TAG_TRACE => {
            Err(CodecError::InvalidFraming("trace packets are not supported".to_string()).into())
        }
        other => Err(CodecError::InvalidFraming(format!("unknown request tag 0x{:02x}", other)).into()),
    }
}

fn decode_single_id(buf: &mut &[u8]) -> Result<Option<RequestPacket>, DecodeFailure> {
    ensure(buf, 8, "request header").map_err(DecodeFailure::bare)?;
    let addr = ServiceAddr::Id(buf.get_u32_le());
    let session = buf.get_u32_le();

    let (cmd, message) =
        decode_cmd_and_message(buf).map_err(|e| DecodeFailure::for_session(session, e))?;
    Ok(Some(RequestPacket { addr, session, cmd, message }))
}

fn decode_single_name(buf: &mut &[u8]) -> Result<Option<RequestPacket>, DecodeFailure> {
    let (name, _) = decode_name(buf, 4).map_err(DecodeFailure::bare)?;
    let addr = ServiceAddr::Name(name);
    // matches the encoder: this session field alone is big-endian
    let session = buf.get_u32();

    let (cmd, message) =
        decode_cmd_and_message(buf).map_err(|e| DecodeFailure::for_session(session, e))?;
    Ok(Some(RequestPacket { addr, session, cmd, message }))
}

fn decode_head_id(
    buf: &mut &[u8],
    reassembly: &mut RequestReassembly,
) -> Result<Option<RequestPacket>, DecodeFailure> {
    if buf.remaining() != 12 {
        return Err(CodecError::InvalidFraming(format!(
            "multipart head must have a 12-byte body, got {}",
            buf.remaining()
        ))
        .into());
    }
    let addr = ServiceAddr::Id(buf.get_u32_le());
    let session = buf.get_u32_le();
    let declared = buf.get_u32_le() as usize;

    reassembly.begin(session, addr, declared);
    Ok(None)
}

fn decode_head_name(
    buf: &mut &[u8],
    reassembly: &mut RequestReassembly,
) -> Result<Option<RequestPacket>, DecodeFailure> {
    let (name, trailing) = decode_name(buf, 8).map_err(DecodeFailure::bare)?;
    if trailing != 8 {
        return Err(CodecError::InvalidFraming(format!(
            "multipart head must end in an 8-byte session/size field, got {}",
            trailing
        ))
        .into());
    }
    let session = buf.get_u32_le();
    let declared = buf.get_u32_le() as usize;

    reassembly.begin(session, ServiceAddr::Name(name), declared);
    Ok(None)
}

fn decode_tail(
    buf: &mut &[u8],
    reassembly: &mut RequestReassembly,
) -> Result<Option<RequestPacket>, DecodeFailure> {
    let session = chunk_session(buf)?;
    let (addr, payload) = reassembly.finish(session, *buf).map_err(DecodeFailure::bare)?;

    let (cmd, message) =
        parse_multipart_payload(&payload).map_err(|e| DecodeFailure::for_session(session, e))?;
    Ok(Some(RequestPacket { addr, session, cmd, message }))
}

pub(crate) fn chunk_session(buf: &mut &[u8]) -> Result<u32, DecodeFailure> {
    ensure(buf, 4, "multipart chunk header").map_err(DecodeFailure::bare)?;
    Ok(buf.get_u32_le())
}

/// Reads the 1-byte name length and the name itself, returning the name and
///  the number of bytes left after it (which the caller validates).
fn decode_name(buf: &mut &[u8], min_trailing: usize) -> Result<(String, usize), CodecError> {
    ensure(buf, 1, "name length")?;
    let namelen = buf.get_u8() as usize;
    ensure(buf, namelen + min_trailing, "name-addressed request")?;

    let mut name = vec![0u8; namelen];
    buf.copy_to_slice(&mut name);
    let name = String::from_utf8(name)
        .map_err(|_| CodecError::InvalidFraming("service name is not valid utf-8".to_string()))?;
    Ok((name, buf.remaining()))
}

fn decode_cmd_and_message(buf: &mut &[u8]) -> Result<(String, Vec<u8>), CodecError> {
    let cmd = utf8_command(unpack_string(buf)?)?;
    let message = unpack_string(buf)?;
    Ok((cmd, message))
}

/// A reassembled multipart payload carries the command and the message
///  back-to-back as two length-tagged strings.
fn parse_multipart_payload(payload: &[u8]) -> Result<(String, Vec<u8>), CodecError> {
    let strings = unpack_strings(payload)?;
    let [cmd, message]: [Vec<u8>; 2] = strings.try_into().map_err(|s: Vec<Vec<u8>>| {
        CodecError::InvalidFraming(format!(
            "multipart request payload must hold command and message, got {} strings",
            s.len()
        ))
    })?;
    Ok((utf8_command(cmd)?, message))
}

fn utf8_command(bytes: Vec<u8>) -> Result<String, CodecError> {
    String::from_utf8(bytes)
        .map_err(|_| CodecError::InvalidFraming("command is not valid utf-8".to_string()))
}
